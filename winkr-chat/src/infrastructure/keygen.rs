//! 访问密钥生成

use anyhow::{Context, Result};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::domain::repository::AccessKeyGenerator;

/// 访问密钥熵（字节），十六进制编码后为 64 个字符
pub const ACCESS_KEY_BYTES: usize = 32;

/// 基于系统 CSPRNG 的访问密钥生成器
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomAccessKeyGenerator;

impl AccessKeyGenerator for RandomAccessKeyGenerator {
    fn generate(&self) -> Result<String> {
        let mut bytes = [0u8; ACCESS_KEY_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .context("system random source unavailable")?;
        Ok(hex::encode(bytes))
    }
}
