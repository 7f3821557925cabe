pub mod memory_message;

pub use memory_message::MemoryMessageService;
