pub mod local_push;
pub mod redis_push;

pub use local_push::LocalPushChannel;
pub use redis_push::RedisPushChannel;
