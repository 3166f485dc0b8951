// Inkpulse - blog engagement backend

// Application wiring and runtime configuration
pub mod app_state;
pub mod config;

// Cache, persistent store, and the cache-aside layer over both
pub mod infrastructure;

// Row and view types shared across layers
pub mod models;

// Engagement services: views, likes, comments, catalog, visits
pub mod services;

// REST surface
pub mod http;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
