//! 缓存键格式与 TTL 档位
//!
//! 键格式对运维可见，修改需同步运维脚本。聊天与管理后台两个缓存族互不重叠：
//! 管理后台只使用 `admin:` 前缀。

use std::time::Duration;

/// TTL 档位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    /// 约 5 分钟：输入状态、在线用户集合、统计
    Short,
    /// 约 30 分钟：在线状态、最近消息、照片
    Medium,
    /// 约 2 小时：未读数、会话成员
    Long,
}

impl CacheTtl {
    pub fn duration(&self) -> Duration {
        match self {
            CacheTtl::Short => Duration::from_secs(5 * 60),
            CacheTtl::Medium => Duration::from_secs(30 * 60),
            CacheTtl::Long => Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// 聊天缓存键
pub struct ChatCacheKeys;

impl ChatCacheKeys {
    pub fn user_online(user_id: &str) -> String {
        format!("user:online:{user_id}")
    }

    pub fn user_typing(user_id: &str, conversation_id: &str) -> String {
        format!("user:typing:{user_id}:{conversation_id}")
    }

    pub fn user_unread(user_id: &str, conversation_id: &str) -> String {
        format!("user:unread:{user_id}:{conversation_id}")
    }

    pub fn conversation_messages(conversation_id: &str) -> String {
        format!("conversation:messages:{conversation_id}")
    }

    pub fn conversation_participants(conversation_id: &str) -> String {
        format!("conversation:participants:{conversation_id}")
    }

    pub fn conversation_last_message(conversation_id: &str) -> String {
        format!("conversation:last_message:{conversation_id}")
    }

    pub fn conversation_typing_users(conversation_id: &str) -> String {
        format!("conversation:typing_users:{conversation_id}")
    }

    pub fn message(message_id: &str) -> String {
        format!("message:{message_id}")
    }

    pub fn ephemeral_photo(photo_id: &str) -> String {
        format!("ephemeral_photo:{photo_id}")
    }

    pub fn online_users() -> &'static str {
        "system:online_users"
    }

    pub fn chat_stats() -> &'static str {
        "system:chat_stats"
    }

    /// 会话级别的全部键
    pub fn conversation_keys(conversation_id: &str) -> [String; 4] {
        [
            Self::conversation_messages(conversation_id),
            Self::conversation_participants(conversation_id),
            Self::conversation_last_message(conversation_id),
            Self::conversation_typing_users(conversation_id),
        ]
    }

    /// 内嵌用户ID的键模式；ID 中的通配符按字面匹配
    pub fn user_patterns(user_id: &str) -> [String; 3] {
        let user_id = Self::escape_pattern(user_id);
        [
            format!("user:online:{user_id}"),
            format!("user:typing:{user_id}:*"),
            format!("user:unread:{user_id}:*"),
        ]
    }

    /// 转义 glob 元字符 `* ? [ ] \`
    pub fn escape_pattern(raw: &str) -> String {
        let mut escaped = String::with_capacity(raw.len());
        for c in raw.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped
    }
}

/// 管理后台缓存键（保留给 admin 缓存族）
pub struct AdminCacheKeys;

impl AdminCacheKeys {
    pub const PREFIX: &'static str = "admin:";

    pub fn user_stats(user_id: &str) -> String {
        format!("{}user_stats:{user_id}", Self::PREFIX)
    }

    pub fn dashboard() -> String {
        format!("{}dashboard", Self::PREFIX)
    }

    pub fn all() -> String {
        format!("{}*", Self::PREFIX)
    }
}
