// Durable store interface: source of truth for articles, likes, comments,
// reference data and visit rows

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{
    Article, ArticleId, Category, CategorySummary, Comment, CommentDraft, CommentId, CommentStats,
    LikeRecord, NewArticle, SiteSettings, TagSummary, VisitEvent,
};

/// Durable persistence seam. Everything here is authoritative; the cache tier
/// above it only ever holds derived state that can be rebuilt from these rows.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Create the schema. Safe to call on every startup.
    async fn initialize(&self) -> AppResult<()>;

    // Articles
    async fn create_article(&self, article: NewArticle) -> AppResult<Article>;
    async fn get_article(&self, id: ArticleId) -> AppResult<Option<Article>>;

    /// Atomically add `delta` to the persisted view base. Returns the new
    /// base, or `None` when the article does not exist.
    async fn increment_view_count(&self, id: ArticleId, delta: i64) -> AppResult<Option<i64>>;

    /// Atomically add `delta` to the persisted like base. Returns the new
    /// base, or `None` when the article does not exist.
    async fn increment_like_count(&self, id: ArticleId, delta: i64) -> AppResult<Option<i64>>;

    /// Remove the article row. Returns whether a row was removed.
    async fn delete_article(&self, id: ArticleId) -> AppResult<bool>;

    // Likes
    /// Record one like. The `(article_id, visitor_identity)` uniqueness
    /// constraint arbitrates races: a conflicting insert fails with
    /// `AppError::AlreadyLiked` no matter how the callers interleaved.
    async fn insert_like(&self, article_id: ArticleId, visitor_identity: &str)
        -> AppResult<LikeRecord>;

    async fn has_liked(&self, article_id: ArticleId, visitor_identity: &str) -> AppResult<bool>;

    /// Drop every like row for an article. Returns how many went away.
    async fn delete_likes(&self, article_id: ArticleId) -> AppResult<u64>;

    // Comments
    async fn insert_comment(&self, draft: CommentDraft) -> AppResult<Comment>;
    async fn get_comment(&self, id: CommentId) -> AppResult<Option<Comment>>;

    /// Number of approved root comments on an article.
    async fn count_approved_roots(&self, article_id: ArticleId) -> AppResult<i64>;

    /// One page of approved roots, oldest first.
    async fn page_approved_roots(
        &self,
        article_id: ArticleId,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Comment>>;

    /// Every approved reply whose `root_parent_id` is in `root_ids`, oldest
    /// first, in one batched query. An empty `root_ids` is a caller bug and
    /// fails with `AppError::Validation`.
    async fn children_of_roots(
        &self,
        article_id: ArticleId,
        root_ids: &[CommentId],
    ) -> AppResult<Vec<Comment>>;

    /// Counts over approved comments only.
    async fn comment_stats(&self, article_id: ArticleId) -> AppResult<CommentStats>;

    async fn delete_comments(&self, article_id: ArticleId) -> AppResult<u64>;

    // Reference data
    async fn create_category(&self, name: &str, sort: i64) -> AppResult<Category>;
    async fn create_tag(&self, name: &str) -> AppResult<i64>;
    async fn tag_article(&self, article_id: ArticleId, tag_id: i64) -> AppResult<()>;

    /// Active categories with their published-article counts, one grouped
    /// query.
    async fn categories_with_counts(&self) -> AppResult<Vec<CategorySummary>>;

    /// Tags with their published-article counts, one grouped query.
    async fn tags_with_counts(&self) -> AppResult<Vec<TagSummary>>;

    /// The single settings row; defaults when none has been written yet.
    async fn get_settings(&self) -> AppResult<SiteSettings>;
    async fn update_settings(&self, settings: &SiteSettings) -> AppResult<()>;

    // Visit log
    async fn insert_visit(&self, visit: &VisitEvent, visited_at: DateTime<Utc>) -> AppResult<()>;
    async fn count_visits_since(&self, start: DateTime<Utc>) -> AppResult<i64>;
    async fn count_distinct_visitors_since(&self, start: DateTime<Utc>) -> AppResult<i64>;
    async fn count_visits(&self) -> AppResult<i64>;
}
