// REST surface for the engagement layer

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::{
    ArticleId, ArticleStatus, CategorySummary, CommentStats, CommentStatus, CommentTreePage,
    NewComment, SiteSettings, TagSummary, VisitEvent, VisitStats,
};

static STARTED_AT: Lazy<Instant> = Lazy::new(Instant::now);

#[derive(Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

#[derive(Serialize)]
struct ArticleResponse {
    id: ArticleId,
    title: String,
    content: String,
    category_id: Option<i64>,
    view_count: i64,
    like_count: i64,
    publish_time: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct LikeResponse {
    like_count: i64,
}

#[derive(Deserialize)]
struct TreePageParams {
    current: Option<i64>,
    size: Option<i64>,
}

#[derive(Deserialize)]
struct CreateCommentRequest {
    nickname: String,
    email: Option<String>,
    content: String,
    parent_id: Option<i64>,
}

#[derive(Serialize)]
struct CommentCreatedResponse {
    id: i64,
    status: CommentStatus,
}

pub fn router(state: AppState) -> Router {
    Lazy::force(&STARTED_AT);
    Router::new()
        .route("/health", get(health))
        .route("/api/articles/{id}", get(article_detail))
        .route("/api/articles/{id}/like", post(like_article))
        .route(
            "/api/articles/{id}/comments",
            get(comment_tree).post(create_comment),
        )
        .route("/api/articles/{id}/comments/stats", get(comment_stats))
        .route("/api/categories", get(categories))
        .route("/api/tags", get(tags))
        .route("/api/settings", get(site_settings))
        .route("/api/stats/visits", get(visit_stats))
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": STARTED_AT.elapsed().as_secs(),
    }))
}

/// Article detail. Reading it counts: a view increment and a visit event are
/// queued here, neither of which the response waits for.
async fn article_detail(
    State(state): State<AppState>,
    Path(article_id): Path<ArticleId>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
) -> AppResult<Json<ApiResponse<ArticleResponse>>> {
    let article = state
        .store
        .get_article(article_id)
        .await?
        .filter(|a| a.status == ArticleStatus::Published)
        .ok_or_else(|| AppError::NotFound(format!("Article {} not found", article_id)))?;

    let view_count = state.views.effective_for(&article).await;
    let like_count = state.likes.effective_for(&article).await;

    let views = state.views.clone();
    tokio::spawn(async move { views.record_view(article_id).await });
    state.visits.record(VisitEvent {
        ip_address: client_identity(&headers, &addr),
        user_agent: header_string(&headers, header::USER_AGENT),
        page_url: uri.path().to_string(),
        referer: header_string(&headers, header::REFERER),
    });

    Ok(ApiResponse::ok(ArticleResponse {
        id: article.id,
        title: article.title,
        content: article.content,
        category_id: article.category_id,
        view_count,
        like_count,
        publish_time: article.publish_time,
    }))
}

async fn like_article(
    State(state): State<AppState>,
    Path(article_id): Path<ArticleId>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> AppResult<Json<ApiResponse<LikeResponse>>> {
    let identity = client_identity(&headers, &addr);
    let like_count = state.likes.like(article_id, &identity).await?;
    info!("Article {} liked by {}", article_id, identity);
    Ok(ApiResponse::ok(LikeResponse { like_count }))
}

async fn comment_tree(
    State(state): State<AppState>,
    Path(article_id): Path<ArticleId>,
    Query(params): Query<TreePageParams>,
) -> AppResult<Json<ApiResponse<CommentTreePage>>> {
    let current = params.current.unwrap_or(1);
    let size = match params.size {
        Some(size) => size,
        None => state.settings.get().await?.comment_page_size,
    };
    let page = state.comments.tree_page(article_id, current, size).await?;
    Ok(ApiResponse::ok(page))
}

async fn create_comment(
    State(state): State<AppState>,
    Path(article_id): Path<ArticleId>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<CreateCommentRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<CommentCreatedResponse>>)> {
    let comment = state
        .comments
        .create(
            NewComment {
                article_id,
                nickname: request.nickname,
                email: request.email,
                content: request.content,
                parent_id: request.parent_id,
            },
            Some(client_identity(&headers, &addr)),
            header_string(&headers, header::USER_AGENT),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(CommentCreatedResponse {
            id: comment.id,
            status: comment.status,
        }),
    ))
}

async fn comment_stats(
    State(state): State<AppState>,
    Path(article_id): Path<ArticleId>,
) -> AppResult<Json<ApiResponse<CommentStats>>> {
    let stats = state.comments.stats(article_id).await?;
    Ok(ApiResponse::ok(stats))
}

async fn categories(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<CategorySummary>>>> {
    Ok(ApiResponse::ok(state.catalog.categories().await?))
}

async fn tags(State(state): State<AppState>) -> AppResult<Json<ApiResponse<Vec<TagSummary>>>> {
    Ok(ApiResponse::ok(state.catalog.tags().await?))
}

async fn site_settings(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<SiteSettings>>> {
    Ok(ApiResponse::ok(state.settings.get().await?))
}

async fn visit_stats(State(state): State<AppState>) -> AppResult<Json<ApiResponse<VisitStats>>> {
    Ok(ApiResponse::ok(state.visits.stats().await?))
}

/// Visitor identity for dedup and logging: the first hop of X-Forwarded-For
/// when present, else the peer address. A shared or rotating address skews
/// the counts; that is inherent to address-based identity.
fn client_identity(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
