use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 默认最大查看次数
pub const DEFAULT_MAX_VIEWS: i32 = 1;
/// 默认存活时间（秒）
pub const DEFAULT_PHOTO_TTL_SECONDS: i64 = 30;
/// 查看统计使用的最近记录窗口
pub const DEFAULT_VIEW_STATS_WINDOW: i64 = 100;

/// 照片生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoState {
    /// 可查看，尚未被查看
    Active,
    /// 已被查看但仍有剩余次数
    Viewed,
    /// 已过期（终态）
    Expired,
    /// 已软删除（终态）
    SoftDeleted,
}

impl PhotoState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoState::Active => "active",
            PhotoState::Viewed => "viewed",
            PhotoState::Expired => "expired",
            PhotoState::SoftDeleted => "soft_deleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PhotoState::Expired | PhotoState::SoftDeleted)
    }
}

impl FromStr for PhotoState {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(PhotoState::Active),
            "viewed" => Ok(PhotoState::Viewed),
            "expired" => Ok(PhotoState::Expired),
            "soft_deleted" => Ok(PhotoState::SoftDeleted),
            _ => Err(()),
        }
    }
}

/// 对象存储中的资源位置
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLocator {
    pub url: String,
    pub storage_key: String,
}

impl AssetLocator {
    pub fn new(url: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            storage_key: storage_key.into(),
        }
    }
}

/// 阅后即焚照片
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralPhoto {
    pub id: String,
    pub owner_id: String,
    pub photo: AssetLocator,
    pub thumbnail: AssetLocator,
    /// 对外访问密钥（全局唯一，不复用）
    pub access_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_views: i32,
    pub view_count: i32,
    pub is_viewed: bool,
    pub is_expired: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EphemeralPhoto {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_time_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn views_exhausted(&self) -> bool {
        self.view_count >= self.max_views
    }

    pub fn remaining_views(&self) -> i32 {
        (self.max_views - self.view_count).max(0)
    }

    /// 按当前时间推导生命周期状态
    pub fn state(&self, now: DateTime<Utc>) -> PhotoState {
        if self.is_deleted() {
            PhotoState::SoftDeleted
        } else if self.is_expired || self.is_time_expired(now) || self.views_exhausted() {
            PhotoState::Expired
        } else if self.is_viewed {
            PhotoState::Viewed
        } else {
            PhotoState::Active
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

/// 一次查看记录（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralPhotoView {
    pub id: String,
    pub photo_id: String,
    pub owner_id: String,
    pub viewer_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
    pub duration_seconds: i32,
    pub viewed_at: DateTime<Utc>,
}

/// 上传请求
#[derive(Debug, Clone, Default)]
pub struct UploadPhotoRequest {
    pub owner_id: String,
    pub photo: AssetLocator,
    pub thumbnail: AssetLocator,
    /// 缺省或 <= 0 时使用默认值
    pub max_views: Option<i32>,
    /// 缺省或 <= 0 时使用默认值
    pub ttl_seconds: Option<i64>,
}

/// 查看者信息
#[derive(Debug, Clone, Default)]
pub struct ViewerInfo {
    /// 匿名查看时为 None
    pub viewer_id: Option<String>,
    pub ip_address: String,
    pub user_agent: String,
}

impl ViewerInfo {
    pub fn new(
        viewer_id: Option<String>,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            viewer_id,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// 照片查看统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhotoViewStats {
    pub photo_id: String,
    /// 来自存储的查看计数
    pub total_views: i64,
    /// 最近窗口内的去重查看者数量
    pub unique_viewers: i64,
    /// 最近窗口内的平均查看时长（秒）
    pub average_view_duration: f64,
    pub views_today: i64,
    pub views_last_7_days: i64,
    pub views_last_30_days: i64,
    /// 统计所用的最近记录窗口上限
    pub window_size: i64,
}

/// 照片聚合统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoStats {
    pub total_photos: i64,
    pub active_photos: i64,
    pub viewed_photos: i64,
    pub expired_photos: i64,
    pub deleted_photos: i64,
    pub total_views: i64,
}

/// 用户照片概览
#[derive(Debug, Clone, Default)]
pub struct UserPhotoOverview {
    pub user_id: String,
    pub stats: PhotoStats,
    pub active_photos: Vec<EphemeralPhoto>,
    pub expiring_soon: Vec<EphemeralPhoto>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn photo(now: DateTime<Utc>) -> EphemeralPhoto {
        EphemeralPhoto {
            id: "p1".to_string(),
            owner_id: "u1".to_string(),
            photo: AssetLocator::new("https://cdn/p1.jpg", "photos/p1.jpg"),
            thumbnail: AssetLocator::new("https://cdn/p1_t.jpg", "photos/p1_t.jpg"),
            access_key: "k".repeat(64),
            created_at: now,
            expires_at: now + Duration::seconds(60),
            max_views: 2,
            view_count: 0,
            is_viewed: false,
            is_expired: false,
            deleted_at: None,
        }
    }

    #[test]
    fn test_state_transitions() {
        let now = Utc::now();
        let mut p = photo(now);
        assert_eq!(p.state(now), PhotoState::Active);

        p.is_viewed = true;
        p.view_count = 1;
        assert_eq!(p.state(now), PhotoState::Viewed);
        assert_eq!(p.remaining_views(), 1);

        p.view_count = 2;
        assert_eq!(p.state(now), PhotoState::Expired);

        p.view_count = 1;
        assert_eq!(p.state(now + Duration::seconds(60)), PhotoState::Expired);

        p.deleted_at = Some(now);
        assert_eq!(p.state(now), PhotoState::SoftDeleted);
        assert!(p.state(now).is_terminal());
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [
            PhotoState::Active,
            PhotoState::Viewed,
            PhotoState::Expired,
            PhotoState::SoftDeleted,
        ] {
            assert_eq!(PhotoState::from_str(state.as_str()), Ok(state));
        }
        assert!(PhotoState::from_str("unknown").is_err());
    }
}
