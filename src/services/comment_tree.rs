// Comment trees: two-stage paged query, flat two-level assembly, creation
// with a moderation gate

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::{AppError, AppResult};
use crate::infrastructure::PersistentStore;
use crate::models::{
    ArticleId, Comment, CommentDraft, CommentStats, CommentStatus, CommentTreeNode,
    CommentTreePage, NewComment,
};
use crate::services::catalog::SettingsService;

/// Reads and writes the comment section of an article. Display is always two
/// levels deep: roots in creation order, each with its flattened replies.
#[derive(Clone)]
pub struct CommentService {
    store: Arc<dyn PersistentStore>,
    settings: Arc<SettingsService>,
}

impl CommentService {
    pub fn new(store: Arc<dyn PersistentStore>, settings: Arc<SettingsService>) -> Self {
        Self { store, settings }
    }

    /// One page of the comment tree. Stage 1 pages approved roots; stage 2
    /// fetches every approved reply of exactly those roots in one batched
    /// query, so the result is bounded by page size times reply fanout, never
    /// by the article's total comment volume.
    #[instrument(skip(self))]
    pub async fn tree_page(
        &self,
        article_id: ArticleId,
        current: i64,
        size: i64,
    ) -> AppResult<CommentTreePage> {
        let current = current.max(1);
        let size = size.max(1);

        let total = self.store.count_approved_roots(article_id).await?;
        if total == 0 {
            return Ok(CommentTreePage {
                total,
                list: Vec::new(),
            });
        }

        let offset = (current - 1) * size;
        let roots = self
            .store
            .page_approved_roots(article_id, offset, size)
            .await?;
        if roots.is_empty() {
            return Ok(CommentTreePage {
                total,
                list: Vec::new(),
            });
        }

        let root_ids: Vec<_> = roots.iter().map(|c| c.id).collect();
        let children = self.store.children_of_roots(article_id, &root_ids).await?;

        Ok(CommentTreePage {
            total,
            list: assemble_tree(roots, children),
        })
    }

    /// Accept a comment. The stored `root_parent_id` is derived from the
    /// parent row here, never taken from the caller, so reply chains of any
    /// depth always collapse onto their root. Whether the comment starts out
    /// pending or approved is decided by the site settings.
    #[instrument(skip(self, new_comment))]
    pub async fn create(
        &self,
        new_comment: NewComment,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> AppResult<Comment> {
        let article_id = new_comment.article_id;
        self.store
            .get_article(article_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Article {} not found", article_id)))?;

        let content = new_comment.content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("Comment content is empty".to_string()));
        }
        let nickname = new_comment.nickname.trim();
        if nickname.is_empty() {
            return Err(AppError::Validation("Nickname is empty".to_string()));
        }

        let root_parent_id = match new_comment.parent_id {
            None => None,
            Some(parent_id) => {
                let parent = self
                    .store
                    .get_comment(parent_id)
                    .await?
                    .filter(|p| p.article_id == article_id)
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Parent comment {} not found", parent_id))
                    })?;
                Some(parent.root_parent_id.unwrap_or(parent.id))
            }
        };

        let settings = self.settings.get().await?;
        let status = if settings.comment_audit {
            CommentStatus::Pending
        } else {
            CommentStatus::Approved
        };

        let comment = self
            .store
            .insert_comment(CommentDraft {
                article_id,
                parent_id: new_comment.parent_id,
                root_parent_id,
                nickname: nickname.to_string(),
                email: new_comment.email,
                content: content.to_string(),
                status,
                ip_address,
                user_agent,
            })
            .await?;

        info!(
            "Comment {} on article {} created as {:?}",
            comment.id, article_id, status
        );
        Ok(comment)
    }

    pub async fn stats(&self, article_id: ArticleId) -> AppResult<CommentStats> {
        self.store.comment_stats(article_id).await
    }
}

/// Pure in-memory assembly: attach each child to its root's bucket by
/// `root_parent_id` and resolve the replied-to nickname by `parent_id`. The
/// nickname is cosmetic; placement never follows `parent_id`. Children whose
/// root is not in this page are dropped silently. Runs in O(roots + children).
fn assemble_tree(roots: Vec<Comment>, children: Vec<Comment>) -> Vec<CommentTreeNode> {
    let mut nicknames: HashMap<i64, String> =
        HashMap::with_capacity(roots.len() + children.len());
    for comment in roots.iter().chain(children.iter()) {
        nicknames.insert(comment.id, comment.nickname.clone());
    }

    let mut buckets: HashMap<i64, Vec<CommentTreeNode>> = HashMap::with_capacity(roots.len());
    for child in children {
        let Some(root_id) = child.root_parent_id else {
            continue;
        };
        let reply_to = child
            .parent_id
            .and_then(|parent_id| nicknames.get(&parent_id).cloned());
        buckets.entry(root_id).or_default().push(CommentTreeNode {
            id: child.id,
            nickname: child.nickname,
            content: child.content,
            created_at: child.created_at,
            reply_to,
            children: Vec::new(),
        });
    }

    roots
        .into_iter()
        .map(|root| {
            let children = buckets.remove(&root.id).unwrap_or_default();
            CommentTreeNode {
                id: root.id,
                nickname: root.nickname,
                content: root.content,
                created_at: root.created_at,
                reply_to: None,
                children,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::{CacheAsideRegistry, MemoryCache, SqliteStore};
    use crate::models::{ArticleStatus, NewArticle};
    use chrono::{TimeZone, Utc};
    use sqlx::sqlite::SqlitePoolOptions;

    fn comment(id: i64, parent: Option<i64>, root: Option<i64>, nickname: &str) -> Comment {
        Comment {
            id,
            article_id: 1,
            parent_id: parent,
            root_parent_id: root,
            nickname: nickname.to_string(),
            email: None,
            content: format!("comment {}", id),
            status: CommentStatus::Approved,
            ip_address: None,
            user_agent: None,
            created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        }
    }

    #[test]
    fn deep_chains_flatten_onto_their_root() {
        let roots = vec![comment(1, None, None, "ann"), comment(2, None, None, "bob")];
        // 3 replies to root 1 in a chain, 1 direct reply to root 2.
        let children = vec![
            comment(3, Some(1), Some(1), "cat"),
            comment(4, Some(3), Some(1), "dan"),
            comment(5, Some(4), Some(1), "eve"),
            comment(6, Some(2), Some(2), "fay"),
        ];

        let tree = assemble_tree(roots, children);
        assert_eq!(tree.len(), 2);
        assert_eq!(
            tree[0].children.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
        assert_eq!(tree[1].children.len(), 1);

        // reply_to names the direct parent, wherever it sits in the chain.
        assert_eq!(tree[0].children[0].reply_to.as_deref(), Some("ann"));
        assert_eq!(tree[0].children[1].reply_to.as_deref(), Some("cat"));
        assert_eq!(tree[0].children[2].reply_to.as_deref(), Some("dan"));
    }

    #[test]
    fn childless_roots_get_empty_collections() {
        let tree = assemble_tree(vec![comment(1, None, None, "ann")], Vec::new());
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children.is_empty());
    }

    #[test]
    fn stray_children_are_dropped() {
        let roots = vec![comment(1, None, None, "ann")];
        let children = vec![
            comment(3, Some(1), Some(1), "cat"),
            // Root 99 is not on this page.
            comment(4, Some(99), Some(99), "dan"),
            // Malformed: a child with no root at all.
            comment(5, Some(1), None, "eve"),
        ];

        let tree = assemble_tree(roots, children);
        assert_eq!(tree.len(), 1);
        assert_eq!(
            tree[0].children.iter().map(|c| c.id).collect::<Vec<_>>(),
            vec![3]
        );
    }

    #[test]
    fn reply_to_survives_an_unfetched_parent() {
        let roots = vec![comment(1, None, None, "ann")];
        // Parent 42 was never fetched (for instance, still pending).
        let children = vec![comment(3, Some(42), Some(1), "cat")];

        let tree = assemble_tree(roots, children);
        assert_eq!(tree[0].children[0].reply_to, None);
    }

    async fn service() -> (CommentService, Arc<dyn PersistentStore>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.initialize().await.unwrap();
        let store: Arc<dyn PersistentStore> = Arc::new(store);
        let registry = Arc::new(CacheAsideRegistry::new(Arc::new(MemoryCache::new(64))));
        let settings = Arc::new(SettingsService::new(registry, store.clone()));
        (CommentService::new(store.clone(), settings), store)
    }

    async fn article(store: &dyn PersistentStore) -> ArticleId {
        store
            .create_article(NewArticle {
                title: "t".to_string(),
                content: "c".to_string(),
                category_id: None,
                status: ArticleStatus::Published,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn replies_to_replies_collapse_onto_the_root() {
        let (comments, store) = service().await;
        let article_id = article(store.as_ref()).await;

        let root = comments
            .create(
                NewComment {
                    article_id,
                    nickname: "ann".to_string(),
                    email: None,
                    content: "root".to_string(),
                    parent_id: None,
                },
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(root.root_parent_id, None);

        let reply = comments
            .create(
                NewComment {
                    article_id,
                    nickname: "bob".to_string(),
                    email: None,
                    content: "reply".to_string(),
                    parent_id: Some(root.id),
                },
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply.root_parent_id, Some(root.id));

        let nested = comments
            .create(
                NewComment {
                    article_id,
                    nickname: "cat".to_string(),
                    email: None,
                    content: "deeper".to_string(),
                    parent_id: Some(reply.id),
                },
                None,
                None,
            )
            .await
            .unwrap();
        // Derived from the parent's root, not the parent itself.
        assert_eq!(nested.root_parent_id, Some(root.id));

        let page = comments.tree_page(article_id, 1, 10).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.list[0].children.len(), 2);
        assert_eq!(page.list[0].children[1].reply_to.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn create_validates_input_and_targets() {
        let (comments, store) = service().await;
        let article_id = article(store.as_ref()).await;

        let missing_article = comments
            .create(
                NewComment {
                    article_id: 999,
                    nickname: "ann".to_string(),
                    email: None,
                    content: "hello".to_string(),
                    parent_id: None,
                },
                None,
                None,
            )
            .await;
        assert!(matches!(missing_article, Err(AppError::NotFound(_))));

        let blank = comments
            .create(
                NewComment {
                    article_id,
                    nickname: "ann".to_string(),
                    email: None,
                    content: "   ".to_string(),
                    parent_id: None,
                },
                None,
                None,
            )
            .await;
        assert!(matches!(blank, Err(AppError::Validation(_))));

        let bad_parent = comments
            .create(
                NewComment {
                    article_id,
                    nickname: "ann".to_string(),
                    email: None,
                    content: "hello".to_string(),
                    parent_id: Some(12345),
                },
                None,
                None,
            )
            .await;
        assert!(matches!(bad_parent, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn parent_must_belong_to_the_same_article() {
        let (comments, store) = service().await;
        let first = article(store.as_ref()).await;
        let second = article(store.as_ref()).await;

        let root = comments
            .create(
                NewComment {
                    article_id: first,
                    nickname: "ann".to_string(),
                    email: None,
                    content: "root".to_string(),
                    parent_id: None,
                },
                None,
                None,
            )
            .await
            .unwrap();

        let cross = comments
            .create(
                NewComment {
                    article_id: second,
                    nickname: "bob".to_string(),
                    email: None,
                    content: "reply".to_string(),
                    parent_id: Some(root.id),
                },
                None,
                None,
            )
            .await;
        assert!(matches!(cross, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn moderation_gate_holds_comments_as_pending() {
        let (comments, store) = service().await;
        let article_id = article(store.as_ref()).await;

        let mut settings = store.get_settings().await.unwrap();
        settings.comment_audit = true;
        store.update_settings(&settings).await.unwrap();

        let held = comments
            .create(
                NewComment {
                    article_id,
                    nickname: "ann".to_string(),
                    email: None,
                    content: "hello".to_string(),
                    parent_id: None,
                },
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(held.status, CommentStatus::Pending);

        // Pending comments stay out of the tree and the stats.
        let page = comments.tree_page(article_id, 1, 10).await.unwrap();
        assert_eq!(page.total, 0);
        assert!(page.list.is_empty());
        assert_eq!(comments.stats(article_id).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn pages_partition_roots_without_leaking_children() {
        let (comments, store) = service().await;
        let article_id = article(store.as_ref()).await;

        let mut root_ids = Vec::new();
        for i in 0..25 {
            let root = comments
                .create(
                    NewComment {
                        article_id,
                        nickname: format!("visitor{}", i),
                        email: None,
                        content: format!("root {}", i),
                        parent_id: None,
                    },
                    None,
                    None,
                )
                .await
                .unwrap();
            root_ids.push(root.id);
        }
        // Give every root one reply so leakage would be visible.
        for &root_id in &root_ids {
            comments
                .create(
                    NewComment {
                        article_id,
                        nickname: "replier".to_string(),
                        email: None,
                        content: "reply".to_string(),
                        parent_id: Some(root_id),
                    },
                    None,
                    None,
                )
                .await
                .unwrap();
        }

        let page_one = comments.tree_page(article_id, 1, 10).await.unwrap();
        assert_eq!(page_one.total, 25);
        assert_eq!(page_one.list.len(), 10);

        let first_ten: Vec<_> = root_ids.iter().take(10).copied().collect();
        for node in &page_one.list {
            assert!(first_ten.contains(&node.id));
            assert_eq!(node.children.len(), 1);
        }

        let page_three = comments.tree_page(article_id, 3, 10).await.unwrap();
        assert_eq!(page_three.total, 25);
        assert_eq!(page_three.list.len(), 5);

        // Beyond the last page: total still reported, no stage-2 query.
        let beyond = comments.tree_page(article_id, 9, 10).await.unwrap();
        assert_eq!(beyond.total, 25);
        assert!(beyond.list.is_empty());
    }

    #[tokio::test]
    async fn stats_count_only_approved() {
        let (comments, store) = service().await;
        let article_id = article(store.as_ref()).await;

        let root = comments
            .create(
                NewComment {
                    article_id,
                    nickname: "ann".to_string(),
                    email: None,
                    content: "root".to_string(),
                    parent_id: None,
                },
                None,
                None,
            )
            .await
            .unwrap();
        comments
            .create(
                NewComment {
                    article_id,
                    nickname: "bob".to_string(),
                    email: None,
                    content: "reply".to_string(),
                    parent_id: Some(root.id),
                },
                None,
                None,
            )
            .await
            .unwrap();

        let stats = comments.stats(article_id).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.root_count, 1);
        assert_eq!(stats.reply_count, 1);
    }
}
