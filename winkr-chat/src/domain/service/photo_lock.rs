//! 照片级临界区
//!
//! 按照片ID哈希到固定数量的互斥锁上。同一照片的准入判定在进程内串行，
//! 跨进程的串行由存储层条件更新保证。

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

const DEFAULT_STRIPES: usize = 64;

pub struct PhotoLocks {
    stripes: Vec<Mutex<()>>,
}

impl PhotoLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, photo_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        photo_id.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    pub async fn lock(&self, photo_id: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(photo_id)].lock().await
    }
}

impl Default for PhotoLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
