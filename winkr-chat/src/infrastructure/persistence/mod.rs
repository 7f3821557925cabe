pub mod memory_photo;
pub mod postgres_photo;
pub mod user_repository;

pub use memory_photo::MemoryEphemeralPhotoStore;
pub use postgres_photo::PostgresEphemeralPhotoStore;
pub use user_repository::{MemoryUserRepository, PostgresUserRepository};
