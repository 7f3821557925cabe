pub mod cache;
pub mod keygen;
pub mod messaging;
pub mod persistence;
pub mod push;
