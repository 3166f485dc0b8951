// Core infrastructure modules
pub mod cache_registry; // Read-through caching for reference data
pub mod fast_cache; // Volatile cache interface and key namespace
pub mod memory_cache; // In-process FastCache implementation
pub mod sqlite_store; // SQLite store implementation
pub mod store; // Durable store interface

pub use cache_registry::CacheAsideRegistry;
pub use fast_cache::{keys, FastCache};
pub use memory_cache::MemoryCache;
pub use sqlite_store::SqliteStore;
pub use store::PersistentStore;
