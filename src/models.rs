// Core row and view types for the engagement layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ArticleId = i64;
pub type CommentId = i64;

/// Publication state of an article. Stored as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArticleStatus {
    Draft,
    Published,
    Offline,
}

impl ArticleStatus {
    pub fn code(self) -> i64 {
        match self {
            ArticleStatus::Draft => 0,
            ArticleStatus::Published => 1,
            ArticleStatus::Offline => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ArticleStatus::Draft),
            1 => Some(ArticleStatus::Published),
            2 => Some(ArticleStatus::Offline),
            _ => None,
        }
    }
}

/// Moderation state of a comment. Stored as an integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentStatus {
    Pending,
    Approved,
}

impl CommentStatus {
    pub fn code(self) -> i64 {
        match self {
            CommentStatus::Pending => 0,
            CommentStatus::Approved => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CommentStatus::Pending),
            1 => Some(CommentStatus::Approved),
            _ => None,
        }
    }
}

/// Article row. `view_count` and `like_count` are the persisted bases of the
/// derived effective counters; both only ever grow through atomic increments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub content: String,
    pub category_id: Option<i64>,
    pub status: ArticleStatus,
    pub view_count: i64,
    pub like_count: i64,
    pub publish_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewArticle {
    pub title: String,
    pub content: String,
    pub category_id: Option<i64>,
    pub status: ArticleStatus,
}

/// One accepted like. The store enforces at most one row per
/// `(article_id, visitor_identity)` pair.
#[derive(Debug, Clone)]
pub struct LikeRecord {
    pub id: i64,
    pub article_id: ArticleId,
    pub visitor_identity: String,
    pub created_at: DateTime<Utc>,
}

/// Comment row. `parent_id` is the immediate reply target; `root_parent_id`
/// is null for roots and otherwise names the root of the reply chain, however
/// deep the actual nesting goes.
#[derive(Debug, Clone)]
pub struct Comment {
    pub id: CommentId,
    pub article_id: ArticleId,
    pub parent_id: Option<CommentId>,
    pub root_parent_id: Option<CommentId>,
    pub nickname: String,
    pub email: Option<String>,
    pub content: String,
    pub status: CommentStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied comment input. `root_parent_id` is intentionally absent:
/// it is derived from the parent row on insert.
#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub article_id: ArticleId,
    pub nickname: String,
    pub email: Option<String>,
    pub content: String,
    pub parent_id: Option<CommentId>,
}

/// Fully resolved comment ready for insertion: status decided by the
/// moderation gate, `root_parent_id` already derived.
#[derive(Debug, Clone)]
pub struct CommentDraft {
    pub article_id: ArticleId,
    pub parent_id: Option<CommentId>,
    pub root_parent_id: Option<CommentId>,
    pub nickname: String,
    pub email: Option<String>,
    pub content: String,
    pub status: CommentStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// One root comment with its flattened replies, in display order.
#[derive(Debug, Clone, Serialize)]
pub struct CommentTreeNode {
    pub id: CommentId,
    pub nickname: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Nickname of the comment this one directly replies to. Cosmetic only;
    /// placement is decided by `root_parent_id`, never by this field.
    pub reply_to: Option<String>,
    pub children: Vec<CommentTreeNode>,
}

/// One page of the comment tree: total root count plus the current page of
/// roots, each carrying all of its replies.
#[derive(Debug, Clone, Serialize)]
pub struct CommentTreePage {
    pub total: i64,
    pub list: Vec<CommentTreeNode>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CommentStats {
    pub total: i64,
    pub root_count: i64,
    pub reply_count: i64,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub sort: i64,
    pub status: i64,
}

/// Category with its published-article count, as served to the read API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategorySummary {
    pub id: i64,
    pub name: String,
    pub article_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagSummary {
    pub id: i64,
    pub name: String,
    pub article_count: i64,
}

/// Site-wide settings, a single row in the store. `comment_audit` gates
/// whether new comments start out pending or approved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SiteSettings {
    pub site_name: String,
    pub site_description: String,
    pub comment_audit: bool,
    pub article_page_size: i64,
    pub comment_page_size: i64,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            site_name: String::new(),
            site_description: String::new(),
            comment_audit: false,
            article_page_size: 10,
            comment_page_size: 10,
        }
    }
}

/// One page view, handed to the visit recorder fire-and-forget.
#[derive(Debug, Clone)]
pub struct VisitEvent {
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub page_url: String,
    pub referer: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct VisitStats {
    pub today_pv: i64,
    pub today_uv: i64,
    pub total_pv: i64,
}
