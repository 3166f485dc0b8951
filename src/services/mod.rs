// Engagement services built on the store and cache seams
pub mod catalog; // Reference data behind the cache-aside registry
pub mod comment_tree; // Paged comment trees and comment creation
pub mod like_counter; // At-most-once like counting
pub mod view_counter; // Cache-buffered view counting
pub mod visit_stats; // Fire-and-forget visit logging and stats

pub use catalog::{Catalog, SettingsService};
pub use comment_tree::CommentService;
pub use like_counter::LikeDedupCounter;
pub use view_counter::{FlushOutcome, ViewCountAccumulator};
pub use visit_stats::VisitTracker;
