pub mod chat_cache;
pub mod keys;
pub mod memory_kv;
pub mod redis_kv;

pub use chat_cache::{ChatCache, MAX_CACHED_MESSAGES};
pub use keys::{AdminCacheKeys, CacheTtl, ChatCacheKeys};
pub use memory_kv::MemoryKeyValueCache;
pub use redis_kv::RedisKeyValueCache;

/// Redis 风格的 glob 匹配（与 `SCAN MATCH` 一致）
///
/// 支持 `*`、`?`、`\` 转义，以及带 `^` 取反与 `a-z` 区间的字符类 `[...]`。
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while t < text.len() {
        let step = if p < pattern.len() && pattern[p] != '*' {
            match_single(&pattern, p, text[t])
        } else {
            None
        };

        if let Some(next) = step {
            p = next;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            resume = t;
            p += 1;
        } else if let Some(star_at) = star {
            p = star_at + 1;
            resume += 1;
            t = resume;
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// `pattern[p]` 处的单个元素匹配 `c` 时返回下一个元素的位置
fn match_single(pattern: &[char], p: usize, c: char) -> Option<usize> {
    match pattern[p] {
        '?' => Some(p + 1),
        '\\' if p + 1 < pattern.len() => (pattern[p + 1] == c).then_some(p + 2),
        '[' => match_class(pattern, p + 1, c),
        literal => (literal == c).then_some(p + 1),
    }
}

/// 未闭合的字符类延伸到模式末尾
fn match_class(pattern: &[char], mut p: usize, c: char) -> Option<usize> {
    let negate = pattern.get(p) == Some(&'^');
    if negate {
        p += 1;
    }

    let mut matched = false;
    while p < pattern.len() && pattern[p] != ']' {
        if pattern[p] == '\\' && p + 1 < pattern.len() {
            matched |= pattern[p + 1] == c;
            p += 2;
        } else if p + 2 < pattern.len() && pattern[p + 1] == '-' && pattern[p + 2] != ']' {
            let (low, high) = if pattern[p] <= pattern[p + 2] {
                (pattern[p], pattern[p + 2])
            } else {
                (pattern[p + 2], pattern[p])
            };
            matched |= (low..=high).contains(&c);
            p += 3;
        } else {
            matched |= pattern[p] == c;
            p += 1;
        }
    }

    (matched != negate).then_some((p + 1).min(pattern.len()))
}
