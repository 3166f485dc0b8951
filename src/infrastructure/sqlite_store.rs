// SQLite implementation of the durable store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, SqlitePool};

use crate::error::{AppError, AppResult};
use crate::infrastructure::store::PersistentStore;
use crate::models::{
    Article, ArticleId, ArticleStatus, Category, CategorySummary, Comment, CommentDraft,
    CommentId, CommentStats, CommentStatus, LikeRecord, NewArticle, SiteSettings, TagSummary,
    VisitEvent,
};

const COMMENT_COLUMNS: &str = "id, article_id, parent_id, root_parent_id, nickname, email, \
     content, status, ip_address, user_agent, created_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to {}: {}", database_url, e)))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn article_from_row(row: &SqliteRow) -> AppResult<Article> {
        let status_code: i64 = row.get("status");
        let status = ArticleStatus::from_code(status_code).ok_or_else(|| {
            AppError::Database(format!("Unknown article status code {}", status_code))
        })?;
        Ok(Article {
            id: row.get("id"),
            title: row.get("title"),
            content: row.get("content"),
            category_id: row.get("category_id"),
            status,
            view_count: row.get("view_count"),
            like_count: row.get("like_count"),
            publish_time: row.get("publish_time"),
            created_at: row.get("created_at"),
        })
    }

    fn comment_from_row(row: &SqliteRow) -> AppResult<Comment> {
        let status_code: i64 = row.get("status");
        let status = CommentStatus::from_code(status_code).ok_or_else(|| {
            AppError::Database(format!("Unknown comment status code {}", status_code))
        })?;
        Ok(Comment {
            id: row.get("id"),
            article_id: row.get("article_id"),
            parent_id: row.get("parent_id"),
            root_parent_id: row.get("root_parent_id"),
            nickname: row.get("nickname"),
            email: row.get("email"),
            content: row.get("content"),
            status,
            ip_address: row.get("ip_address"),
            user_agent: row.get("user_agent"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    async fn initialize(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS article (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                category_id INTEGER,
                status INTEGER NOT NULL DEFAULT 0,
                view_count INTEGER NOT NULL DEFAULT 0,
                like_count INTEGER NOT NULL DEFAULT 0,
                publish_time TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create article table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS article_like (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id INTEGER NOT NULL,
                visitor_identity TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create article_like table: {}", e)))?;

        // The race arbiter for likes: concurrent inserts for the same pair
        // collapse to one winner regardless of cache state.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_article_like_identity
             ON article_like(article_id, visitor_identity)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create like index: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS comment (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id INTEGER NOT NULL,
                parent_id INTEGER,
                root_parent_id INTEGER,
                nickname TEXT NOT NULL,
                email TEXT,
                content TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 0,
                ip_address TEXT,
                user_agent TEXT,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create comment table: {}", e)))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_comment_article_roots
             ON comment(article_id, status, root_parent_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create comment index: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS category (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                sort INTEGER NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 1
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create category table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tag (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create tag table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS article_tag (
                article_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (article_id, tag_id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create article_tag table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS site_setting (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                site_name TEXT NOT NULL DEFAULT '',
                site_description TEXT NOT NULL DEFAULT '',
                comment_audit INTEGER NOT NULL DEFAULT 0,
                article_page_size INTEGER NOT NULL DEFAULT 10,
                comment_page_size INTEGER NOT NULL DEFAULT 10
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create site_setting table: {}", e)))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS visit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address TEXT NOT NULL,
                user_agent TEXT,
                page_url TEXT NOT NULL,
                referer TEXT,
                visited_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create visit_log table: {}", e)))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visit_log_time ON visit_log(visited_at)")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create visit index: {}", e)))?;

        Ok(())
    }

    async fn create_article(&self, article: NewArticle) -> AppResult<Article> {
        let now = Utc::now();
        let publish_time = match article.status {
            ArticleStatus::Published => Some(now),
            _ => None,
        };

        let result = sqlx::query(
            "INSERT INTO article (title, content, category_id, status, publish_time, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&article.title)
        .bind(&article.content)
        .bind(article.category_id)
        .bind(article.status.code())
        .bind(publish_time)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to create article: {}", e)))?;

        Ok(Article {
            id: result.last_insert_rowid(),
            title: article.title,
            content: article.content,
            category_id: article.category_id,
            status: article.status,
            view_count: 0,
            like_count: 0,
            publish_time,
            created_at: now,
        })
    }

    async fn get_article(&self, id: ArticleId) -> AppResult<Option<Article>> {
        let row = sqlx::query(
            "SELECT id, title, content, category_id, status, view_count, like_count,
                    publish_time, created_at
             FROM article WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch article {}: {}", id, e)))?;

        row.as_ref().map(Self::article_from_row).transpose()
    }

    async fn increment_view_count(&self, id: ArticleId, delta: i64) -> AppResult<Option<i64>> {
        let row = sqlx::query(
            "UPDATE article SET view_count = view_count + ? WHERE id = ? RETURNING view_count",
        )
        .bind(delta)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to increment view count for {}: {}", id, e))
        })?;

        Ok(row.map(|r| r.get("view_count")))
    }

    async fn increment_like_count(&self, id: ArticleId, delta: i64) -> AppResult<Option<i64>> {
        let row = sqlx::query(
            "UPDATE article SET like_count = like_count + ? WHERE id = ? RETURNING like_count",
        )
        .bind(delta)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to increment like count for {}: {}", id, e))
        })?;

        Ok(row.map(|r| r.get("like_count")))
    }

    async fn delete_article(&self, id: ArticleId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM article WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to delete article {}: {}", id, e)))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_like(
        &self,
        article_id: ArticleId,
        visitor_identity: &str,
    ) -> AppResult<LikeRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO article_like (article_id, visitor_identity, created_at) VALUES (?, ?, ?)",
        )
        .bind(article_id)
        .bind(visitor_identity)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(LikeRecord {
                id: done.last_insert_rowid(),
                article_id,
                visitor_identity: visitor_identity.to_string(),
                created_at: now,
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::AlreadyLiked)
            }
            Err(e) => Err(AppError::Database(format!(
                "Failed to insert like for article {}: {}",
                article_id, e
            ))),
        }
    }

    async fn has_liked(&self, article_id: ArticleId, visitor_identity: &str) -> AppResult<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM article_like WHERE article_id = ? AND visitor_identity = ? LIMIT 1",
        )
        .bind(article_id)
        .bind(visitor_identity)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to check like for article {}: {}", article_id, e))
        })?;
        Ok(row.is_some())
    }

    async fn delete_likes(&self, article_id: ArticleId) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM article_like WHERE article_id = ?")
            .bind(article_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::Database(format!(
                    "Failed to delete likes for article {}: {}",
                    article_id, e
                ))
            })?;
        Ok(result.rows_affected())
    }

    async fn insert_comment(&self, draft: CommentDraft) -> AppResult<Comment> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO comment (article_id, parent_id, root_parent_id, nickname, email,
                                  content, status, ip_address, user_agent, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(draft.article_id)
        .bind(draft.parent_id)
        .bind(draft.root_parent_id)
        .bind(&draft.nickname)
        .bind(&draft.email)
        .bind(&draft.content)
        .bind(draft.status.code())
        .bind(&draft.ip_address)
        .bind(&draft.user_agent)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::CreateFailed(format!("Failed to insert comment: {}", e)))?;

        Ok(Comment {
            id: result.last_insert_rowid(),
            article_id: draft.article_id,
            parent_id: draft.parent_id,
            root_parent_id: draft.root_parent_id,
            nickname: draft.nickname,
            email: draft.email,
            content: draft.content,
            status: draft.status,
            ip_address: draft.ip_address,
            user_agent: draft.user_agent,
            created_at: now,
        })
    }

    async fn get_comment(&self, id: CommentId) -> AppResult<Option<Comment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM comment WHERE id = ?",
            COMMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch comment {}: {}", id, e)))?;

        row.as_ref().map(Self::comment_from_row).transpose()
    }

    async fn count_approved_roots(&self, article_id: ArticleId) -> AppResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM comment
             WHERE article_id = ? AND status = ? AND root_parent_id IS NULL",
        )
        .bind(article_id)
        .bind(CommentStatus::Approved.code())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to count roots for article {}: {}", article_id, e))
        })?;
        Ok(row.get("n"))
    }

    async fn page_approved_roots(
        &self,
        article_id: ArticleId,
        offset: i64,
        limit: i64,
    ) -> AppResult<Vec<Comment>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM comment
             WHERE article_id = ? AND status = ? AND root_parent_id IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT ? OFFSET ?",
            COMMENT_COLUMNS
        ))
        .bind(article_id)
        .bind(CommentStatus::Approved.code())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to page roots for article {}: {}", article_id, e))
        })?;

        rows.iter().map(Self::comment_from_row).collect()
    }

    async fn children_of_roots(
        &self,
        article_id: ArticleId,
        root_ids: &[CommentId],
    ) -> AppResult<Vec<Comment>> {
        if root_ids.is_empty() {
            return Err(AppError::Validation(
                "children query needs at least one root id".to_string(),
            ));
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM comment WHERE article_id = ",
            COMMENT_COLUMNS
        ));
        builder.push_bind(article_id);
        builder.push(" AND status = ");
        builder.push_bind(CommentStatus::Approved.code());
        builder.push(" AND root_parent_id IN (");
        let mut ids = builder.separated(", ");
        for id in root_ids {
            ids.push_bind(*id);
        }
        ids.push_unseparated(")");
        builder.push(" ORDER BY created_at ASC, id ASC");

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::Database(format!(
                    "Failed to fetch children for article {}: {}",
                    article_id, e
                ))
            })?;

        rows.iter().map(Self::comment_from_row).collect()
    }

    async fn comment_stats(&self, article_id: ArticleId) -> AppResult<CommentStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN root_parent_id IS NULL THEN 1 ELSE 0 END), 0) AS roots
             FROM comment WHERE article_id = ? AND status = ?",
        )
        .bind(article_id)
        .bind(CommentStatus::Approved.code())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            AppError::Database(format!(
                "Failed to compute comment stats for article {}: {}",
                article_id, e
            ))
        })?;

        let total: i64 = row.get("total");
        let root_count: i64 = row.get("roots");
        Ok(CommentStats {
            total,
            root_count,
            reply_count: total - root_count,
        })
    }

    async fn delete_comments(&self, article_id: ArticleId) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM comment WHERE article_id = ?")
            .bind(article_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::Database(format!(
                    "Failed to delete comments for article {}: {}",
                    article_id, e
                ))
            })?;
        Ok(result.rows_affected())
    }

    async fn create_category(&self, name: &str, sort: i64) -> AppResult<Category> {
        let result = sqlx::query("INSERT INTO category (name, sort, status) VALUES (?, ?, 1)")
            .bind(name)
            .bind(sort)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create category: {}", e)))?;

        Ok(Category {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            sort,
            status: 1,
        })
    }

    async fn create_tag(&self, name: &str) -> AppResult<i64> {
        let result = sqlx::query("INSERT INTO tag (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to create tag: {}", e)))?;
        Ok(result.last_insert_rowid())
    }

    async fn tag_article(&self, article_id: ArticleId, tag_id: i64) -> AppResult<()> {
        sqlx::query("INSERT OR IGNORE INTO article_tag (article_id, tag_id) VALUES (?, ?)")
            .bind(article_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to tag article {}: {}", article_id, e))
            })?;
        Ok(())
    }

    async fn categories_with_counts(&self) -> AppResult<Vec<CategorySummary>> {
        let rows = sqlx::query(
            "SELECT c.id, c.name, COUNT(a.id) AS article_count
             FROM category c
             LEFT JOIN article a ON a.category_id = c.id AND a.status = ?
             WHERE c.status = 1
             GROUP BY c.id, c.name
             ORDER BY c.sort ASC, c.id ASC",
        )
        .bind(ArticleStatus::Published.code())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list categories: {}", e)))?;

        Ok(rows
            .iter()
            .map(|row| CategorySummary {
                id: row.get("id"),
                name: row.get("name"),
                article_count: row.get("article_count"),
            })
            .collect())
    }

    async fn tags_with_counts(&self) -> AppResult<Vec<TagSummary>> {
        let rows = sqlx::query(
            "SELECT t.id, t.name, COUNT(a.id) AS article_count
             FROM tag t
             LEFT JOIN article_tag at_junction ON at_junction.tag_id = t.id
             LEFT JOIN article a ON a.id = at_junction.article_id AND a.status = ?
             GROUP BY t.id, t.name
             ORDER BY t.id ASC",
        )
        .bind(ArticleStatus::Published.code())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to list tags: {}", e)))?;

        Ok(rows
            .iter()
            .map(|row| TagSummary {
                id: row.get("id"),
                name: row.get("name"),
                article_count: row.get("article_count"),
            })
            .collect())
    }

    async fn get_settings(&self) -> AppResult<SiteSettings> {
        let row = sqlx::query(
            "SELECT site_name, site_description, comment_audit, article_page_size,
                    comment_page_size
             FROM site_setting WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to fetch settings: {}", e)))?;

        Ok(match row {
            Some(row) => SiteSettings {
                site_name: row.get("site_name"),
                site_description: row.get("site_description"),
                comment_audit: row.get::<i64, _>("comment_audit") != 0,
                article_page_size: row.get("article_page_size"),
                comment_page_size: row.get("comment_page_size"),
            },
            None => SiteSettings::default(),
        })
    }

    async fn update_settings(&self, settings: &SiteSettings) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO site_setting (id, site_name, site_description, comment_audit,
                                       article_page_size, comment_page_size)
             VALUES (1, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                site_name = excluded.site_name,
                site_description = excluded.site_description,
                comment_audit = excluded.comment_audit,
                article_page_size = excluded.article_page_size,
                comment_page_size = excluded.comment_page_size",
        )
        .bind(&settings.site_name)
        .bind(&settings.site_description)
        .bind(settings.comment_audit as i64)
        .bind(settings.article_page_size)
        .bind(settings.comment_page_size)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to update settings: {}", e)))?;
        Ok(())
    }

    async fn insert_visit(&self, visit: &VisitEvent, visited_at: DateTime<Utc>) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO visit_log (ip_address, user_agent, page_url, referer, visited_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&visit.ip_address)
        .bind(&visit.user_agent)
        .bind(&visit.page_url)
        .bind(&visit.referer)
        .bind(visited_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to record visit: {}", e)))?;
        Ok(())
    }

    async fn count_visits_since(&self, start: DateTime<Utc>) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM visit_log WHERE visited_at >= ?")
            .bind(start)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to count visits: {}", e)))?;
        Ok(row.get("n"))
    }

    async fn count_distinct_visitors_since(&self, start: DateTime<Utc>) -> AppResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(DISTINCT ip_address) AS n FROM visit_log WHERE visited_at >= ?",
        )
        .bind(start)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Database(format!("Failed to count distinct visitors: {}", e)))?;
        Ok(row.get("n"))
    }

    async fn count_visits(&self) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM visit_log")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(format!("Failed to count visits: {}", e)))?;
        Ok(row.get("n"))
    }
}
