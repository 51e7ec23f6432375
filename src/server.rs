//! HTTP server.
//!
//! A thin JSON layer over [`Engine`]. The acting identity is taken from
//! the `x-actor-id` / `x-actor-role` headers once per request and passed
//! explicitly to the stores; nothing below this module reads request
//! state.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `POST` | `/api/shops/{shop_id}/reviews` | Create a review or reply (multipart) |
//! | `GET` | `/api/shops/{shop_id}/reviews` | Page of top-level reviews |
//! | `PUT` | `/api/reviews/{id}` | Edit content and/or rating |
//! | `DELETE` | `/api/reviews/{id}` | Delete a review with its replies |
//! | `GET` | `/api/reviews/{id}/replies` | Replies, oldest first |
//! | `POST` | `/api/reviews/{id}/media` | Add photos (multipart) |
//! | `DELETE` | `/api/reviews/{id}/media/{media_id}` | Remove a photo |
//! | `GET` | `/api/shops` | Page of shops, filtered by `name` / `address` / `city` |
//! | `GET` | `/api/shops/top` | Top-rated shops |
//! | `GET` | `/api/shops/{id}` | Shop with media |
//! | `PUT` | `/api/shops/{id}` | Rename or move a shop (owner or admin) |
//! | `DELETE` | `/api/shops/{id}` | Delete a shop (admin) |
//! | `POST` | `/api/shops/{id}/rating/recompute` | Rating repair (admin) |
//! | `POST` | `/api/shops/{id}/media` | Add shop media (multipart) |
//! | `DELETE` | `/api/shops/{id}/media/{media_id}` | Remove shop media |
//! | `DELETE` | `/api/users/{id}` | Delete a user and their content (admin) |
//! | `GET` | `/api/users/{id}/reviews` | A user's reviews, newest first |
//! | `GET` | `/media/{*path}` | Stored file read-through |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "rating must be between 1 and 5, got 9" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthenticated` (401),
//! `unauthorized` (403), `not_found` (404), `file_storage` (500),
//! `consistency` (500), `internal` (500).

use axum::{
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::auth::{self, Actor, Role};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::ReviewError;
use crate::models::{
    DeleteSummary, MediaCleanup, NewReview, Page, PageRequest, Review, ReviewEdit,
    ReviewWithUploads, Shop, SortDir, SortField, UploadFile,
};
use crate::rating::RatingSummary;
use crate::shops::{ShopDeleteSummary, ShopEdit, ShopFilter, ShopWithUploads};
use crate::users::UserDeleteSummary;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::open(config).await?);
    let app = build_router(engine, config);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// All routes over an already opened engine.
pub fn build_router(engine: Arc<Engine>, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/api/shops/{shop_id}/reviews",
            post(handle_create_review).get(handle_list_reviews),
        )
        .route(
            "/api/reviews/{id}",
            put(handle_update_review).delete(handle_delete_review),
        )
        .route("/api/reviews/{id}/replies", get(handle_list_replies))
        .route("/api/reviews/{id}/media", post(handle_add_review_media))
        .route(
            "/api/reviews/{id}/media/{media_id}",
            delete(handle_delete_review_media),
        )
        .route("/api/shops/top", get(handle_top_shops))
        .route("/api/shops", get(handle_list_shops))
        .route(
            "/api/shops/{shop_id}",
            get(handle_get_shop)
                .put(handle_update_shop)
                .delete(handle_delete_shop),
        )
        .route(
            "/api/shops/{shop_id}/rating/recompute",
            post(handle_recompute_rating),
        )
        .route("/api/shops/{shop_id}/media", post(handle_add_shop_media))
        .route(
            "/api/shops/{shop_id}/media/{media_id}",
            delete(handle_delete_shop_media),
        )
        .route("/api/users/{id}", delete(handle_delete_user))
        .route("/api/users/{id}/reviews", get(handle_user_reviews))
        .route("/media/{*path}", get(handle_media))
        .layer(DefaultBodyLimit::max(body_limit(config)))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Large enough for a full batch of review photos or one shop video.
fn body_limit(config: &Config) -> usize {
    let media = &config.media;
    let photos = media.max_review_image_bytes.saturating_mul(media.max_review_images.max(1) as u64);
    let largest = photos.max(media.max_shop_file_bytes);
    usize::try_from(largest.saturating_add(1024 * 1024)).unwrap_or(usize::MAX)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ReviewError> for AppError {
    fn from(err: ReviewError) -> Self {
        let status =
            StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("request failed: {}", err);
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn unauthenticated(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthenticated".to_string(),
        message: message.into(),
    }
}

type ApiResult<T> = Result<T, AppError>;

// ============ Acting identity ============

/// The request's [`Actor`], read from the identity headers.
struct ActingUser(Actor);

impl<S: Send + Sync> FromRequestParts<S> for ActingUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let id = header_value(ACTOR_ID_HEADER)
            .ok_or_else(|| unauthenticated(format!("missing {} header", ACTOR_ID_HEADER)))?
            .parse::<i64>()
            .map_err(|_| bad_request(format!("{} must be an integer", ACTOR_ID_HEADER)))?;

        let role = match header_value(ACTOR_ROLE_HEADER) {
            Some(raw) => Role::parse(raw)
                .ok_or_else(|| bad_request(format!("unknown role: {}", raw)))?,
            None => Role::User,
        };

        Ok(ActingUser(Actor::new(id, role)))
    }
}

// ============ Multipart ============

/// Text fields and file parts of a multipart body.
#[derive(Default)]
struct MultipartForm {
    fields: Vec<(String, String)>,
    files: Vec<UploadFile>,
}

impl MultipartForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }

    fn int_field(&self, name: &str) -> ApiResult<Option<i64>> {
        match self.field(name) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| bad_request(format!("{} must be an integer", name))),
            None => Ok(None),
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> ApiResult<MultipartForm> {
    let mut form = MultipartForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read {}: {}", file_name, e)))?;
                form.files.push(UploadFile {
                    file_name,
                    content_type,
                    data: data.to_vec(),
                });
            }
            None => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("failed to read field {}: {}", name, e)))?;
                form.fields.push((name, value));
            }
        }
    }

    Ok(form)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Reviews ============

async fn handle_create_review(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(shop_id): Path<i64>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<ReviewWithUploads>)> {
    let form = read_multipart(multipart).await?;

    let new = NewReview {
        shop_id,
        rating: form.int_field("rating")?,
        content: form.field("content").map(str::to_string),
        parent_review_id: form.int_field("parentReviewId")?,
        files: form.files,
    };

    let created = state.engine.reviews.create(&actor, new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListReviewsQuery {
    page: Option<i64>,
    size: Option<i64>,
    sort_by: Option<String>,
    sort_dir: Option<String>,
}

async fn handle_list_reviews(
    State(state): State<AppState>,
    Path(shop_id): Path<i64>,
    Query(query): Query<ListReviewsQuery>,
) -> ApiResult<Json<Page<Review>>> {
    let defaults = PageRequest::default();
    let sort_field = match query.sort_by.as_deref() {
        Some(raw) => SortField::parse(raw)
            .ok_or_else(|| bad_request(format!("cannot sort by {}", raw)))?,
        None => defaults.sort_field,
    };
    let sort_dir = match query.sort_dir.as_deref() {
        Some(raw) => {
            SortDir::parse(raw).ok_or_else(|| bad_request(format!("invalid sort direction: {}", raw)))?
        }
        None => defaults.sort_dir,
    };

    let request = PageRequest {
        page: query.page.unwrap_or(defaults.page),
        size: query.size.unwrap_or(defaults.size),
        sort_field,
        sort_dir,
    };

    let page = state.engine.reviews.list_top_level(shop_id, request).await?;
    Ok(Json(page))
}

#[derive(Deserialize)]
struct UpdateReviewBody {
    content: Option<String>,
    rating: Option<i64>,
}

async fn handle_update_review(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateReviewBody>,
) -> ApiResult<Json<Review>> {
    let edit = ReviewEdit {
        content: body.content,
        rating: body.rating,
    };
    let review = state.engine.reviews.update(id, &actor, edit).await?;
    Ok(Json(review))
}

async fn handle_delete_review(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<DeleteSummary>> {
    Ok(Json(state.engine.reviews.delete(id, &actor).await?))
}

async fn handle_list_replies(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<Review>>> {
    Ok(Json(state.engine.reviews.list_replies(id).await?))
}

async fn handle_add_review_media(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> ApiResult<Json<ReviewWithUploads>> {
    let form = read_multipart(multipart).await?;
    let updated = state.engine.reviews.add_media(id, &actor, &form.files).await?;
    Ok(Json(updated))
}

async fn handle_delete_review_media(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path((id, media_id)): Path<(i64, i64)>,
) -> ApiResult<Json<MediaCleanup>> {
    Ok(Json(state.engine.reviews.delete_media(id, &actor, media_id).await?))
}

// ============ Shops ============

#[derive(Deserialize)]
struct TopShopsQuery {
    limit: Option<i64>,
    region: Option<String>,
}

async fn handle_top_shops(
    State(state): State<AppState>,
    Query(query): Query<TopShopsQuery>,
) -> ApiResult<Json<Vec<Shop>>> {
    let shops = state
        .engine
        .shops
        .top_rated(query.limit.unwrap_or(10), query.region.as_deref())
        .await?;
    Ok(Json(shops))
}

#[derive(Deserialize)]
struct ListShopsQuery {
    page: Option<i64>,
    size: Option<i64>,
    name: Option<String>,
    address: Option<String>,
    city: Option<String>,
}

async fn handle_list_shops(
    State(state): State<AppState>,
    Query(query): Query<ListShopsQuery>,
) -> ApiResult<Json<Page<Shop>>> {
    let filter = ShopFilter {
        name: query.name,
        address: query.address.or(query.city),
    };
    let page = state
        .engine
        .shops
        .list_shops(&filter, query.page.unwrap_or(0), query.size.unwrap_or(10))
        .await?;
    Ok(Json(page))
}

async fn handle_get_shop(
    State(state): State<AppState>,
    Path(shop_id): Path<i64>,
) -> ApiResult<Json<Shop>> {
    Ok(Json(state.engine.shops.get_shop(shop_id).await?))
}

#[derive(Deserialize)]
struct UpdateShopBody {
    name: Option<String>,
    address: Option<String>,
}

async fn handle_update_shop(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(shop_id): Path<i64>,
    Json(body): Json<UpdateShopBody>,
) -> ApiResult<Json<Shop>> {
    let edit = ShopEdit {
        name: body.name,
        address: body.address,
    };
    Ok(Json(state.engine.shops.update_shop(shop_id, &actor, edit).await?))
}

async fn handle_delete_shop(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(shop_id): Path<i64>,
) -> ApiResult<Json<ShopDeleteSummary>> {
    Ok(Json(state.engine.shops.delete_shop(shop_id, &actor).await?))
}

async fn handle_recompute_rating(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(shop_id): Path<i64>,
) -> ApiResult<Json<RatingSummary>> {
    auth::ensure_admin(&actor)?;
    Ok(Json(state.engine.shops.recompute_rating(shop_id).await?))
}

async fn handle_add_shop_media(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(shop_id): Path<i64>,
    multipart: Multipart,
) -> ApiResult<Json<ShopWithUploads>> {
    let form = read_multipart(multipart).await?;
    let updated = state
        .engine
        .shops
        .add_media(shop_id, &actor, &form.files)
        .await?;
    Ok(Json(updated))
}

async fn handle_delete_shop_media(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path((shop_id, media_id)): Path<(i64, i64)>,
) -> ApiResult<Json<MediaCleanup>> {
    Ok(Json(
        state
            .engine
            .shops
            .delete_media(shop_id, &actor, media_id)
            .await?,
    ))
}

// ============ Users ============

async fn handle_delete_user(
    State(state): State<AppState>,
    ActingUser(actor): ActingUser,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<UserDeleteSummary>> {
    Ok(Json(state.engine.users.delete_user(user_id, &actor).await?))
}

#[derive(Deserialize)]
struct UserReviewsQuery {
    page: Option<i64>,
    size: Option<i64>,
}

async fn handle_user_reviews(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(query): Query<UserReviewsQuery>,
) -> ApiResult<Json<Page<Review>>> {
    let page = state
        .engine
        .reviews
        .list_user_reviews(user_id, query.page.unwrap_or(0), query.size.unwrap_or(10))
        .await?;
    Ok(Json(page))
}

// ============ GET /media/{*path} ============

fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

async fn handle_media(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Response> {
    let data = state
        .engine
        .storage
        .load(&path)
        .await
        .map_err(|_| not_found(format!("no stored file at {}", path)))?;

    Ok(([(header::CONTENT_TYPE, content_type_for(&path))], data).into_response())
}
