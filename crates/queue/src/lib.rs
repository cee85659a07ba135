//! Durable job queues with consumer groups.

pub mod config;
pub mod dead_letter;
pub mod group;
pub mod health;
pub mod memory;
pub mod queue;
pub mod redis_streams;
pub mod store;

pub use config::*;
pub use dead_letter::*;
pub use group::*;
pub use memory::MemoryStore;
pub use queue::*;
pub use redis_streams::RedisStreamsStore;
pub use store::*;
