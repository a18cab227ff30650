//! Service layer modules for external integrations.
//!
//! Contains the completion service client and the record stores (memory,
//! flat files, Redis).

pub mod cache;
pub mod completion;
pub mod store;

pub use cache::RedisStore;
pub use completion::{CompletionClient, HttpCompletionClient};
pub use store::{ExtractionRepository, MemoryStore, Store};
