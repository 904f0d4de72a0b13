use crate::archive::{ArchiveError, ArchiveManager, BatchCancel, FolderSync, NewEpisode, UploadFile};
use crate::db::{EpisodeId, ImageId, SequenceEdit, WorkId};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        multipart::MultipartRejection,
        DefaultBodyLimit, FromRequest, FromRequestParts, Multipart, Path, Query, Request, State,
    },
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Largest request body accepted by the admin routes
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub archive: ArchiveManager,
    /// Bearer token for the admin routes; `None` disables them
    pub admin_token: Option<String>,
}

/// Success envelope
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse { status: "ok", data }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub code: u16,
    pub message: String,
}

/// Error envelope, `{"status": "failed", "error": {...}}`
#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: &'static str,
    error: ApiErrorBody,
}

/// Archive errors mapped onto HTTP status codes
#[derive(Debug)]
pub struct ApiError(ArchiveError);

impl From<ArchiveError> for ApiError {
    fn from(error: ArchiveError) -> Self {
        ApiError(error)
    }
}

impl ApiError {
    fn invalid_request(message: String) -> Self {
        ApiError(ArchiveError::Validation(message))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_request(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::invalid_request(format!("Invalid path: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::invalid_request(format!("Invalid query: {}", rejection.body_text()))
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::invalid_request(format!("Invalid multipart body: {}", rejection.body_text()))
    }
}

/// `Json` whose rejections use the error envelope
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// `Path` whose rejections use the error envelope
#[derive(FromRequestParts)]
#[from_request(via(Path), rejection(ApiError))]
struct ApiPath<T>(T);

/// `Query` whose rejections use the error envelope
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(ApiError))]
struct ApiQuery<T>(T);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ArchiveError::Validation(_) => StatusCode::BAD_REQUEST,
            ArchiveError::NotFound(_) => StatusCode::NOT_FOUND,
            ArchiveError::Upload(_) => StatusCode::BAD_GATEWAY,
            ArchiveError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ArchiveError::PartialBatch(_) => StatusCode::MULTI_STATUS,
        };

        if let ArchiveError::PartialBatch(report) = self.0 {
            let body = ApiResponse {
                status: "partial",
                data: report,
            };
            return (status, Json(body)).into_response();
        }

        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }

        let body = ErrorResponse {
            status: "failed",
            error: ApiErrorBody {
                code: status.as_u16(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Create the kirin HTTP router
///
/// `media_root` is served under `/media` when uploads go to local storage.
pub fn create_router(state: AppState, media_root: Option<PathBuf>) -> Router {
    let mut routes = Router::new()
        .route("/api/health", get(health))
        .route("/api/works", get(list_works))
        .route("/api/works/:id", get(work_detail))
        .route("/api/episodes/:id/reader", get(reader_view))
        .route("/api/search", get(search));

    if state.admin_token.is_some() {
        let admin = Router::new()
            .route("/api/admin/works", post(create_work))
            .route("/api/admin/works/:id", delete(delete_work))
            .route("/api/admin/works/:id/thumbnail", put(replace_thumbnail))
            .route(
                "/api/admin/works/:id/episodes",
                get(admin_episodes)
                    .post(create_episode)
                    .delete(delete_episodes),
            )
            .route("/api/admin/episodes/:id", delete(delete_episode))
            .route("/api/admin/episodes/:id/images", post(attach_images))
            .route("/api/admin/episodes/:id/images/order", put(reorder_images))
            .route("/api/admin/images/:id", delete(delete_image))
            .route("/api/admin/sync", post(sync_folder))
            .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
            .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES));
        routes = routes.merge(admin);
    } else {
        warn!("No admin token configured, admin routes are disabled");
    }

    let mut router = routes.with_state(state);
    if let Some(root) = media_root {
        router = router.nest_service("/media", ServeDir::new(root));
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Reject admin requests without the configured bearer token
async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let authorized = match (&state.admin_token, request.headers().get(header::AUTHORIZATION)) {
        (Some(token), Some(value)) => value
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|provided| provided == token.as_str()),
        _ => false,
    };

    if !authorized {
        warn!("Rejected admin request to {}", request.uri().path());
        let body = ErrorResponse {
            status: "failed",
            error: ApiErrorBody {
                code: StatusCode::UNAUTHORIZED.as_u16(),
                message: "Missing or invalid admin token".to_string(),
            },
        };
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }

    next.run(request).await
}

// ---- Public routes ----

async fn health() -> impl IntoResponse {
    Json(ApiResponse::ok(serde_json::json!({})))
}

async fn list_works(State(state): State<AppState>) -> ApiResult<Vec<crate::db::DbWork>> {
    Ok(Json(ApiResponse::ok(state.archive.list_works().await?)))
}

async fn work_detail(
    State(state): State<AppState>,
    ApiPath(work_id): ApiPath<WorkId>,
) -> ApiResult<crate::archive::WorkDetail> {
    Ok(Json(ApiResponse::ok(
        state.archive.work_detail(work_id).await?,
    )))
}

async fn reader_view(
    State(state): State<AppState>,
    ApiPath(episode_id): ApiPath<EpisodeId>,
) -> ApiResult<crate::archive::ReaderView> {
    Ok(Json(ApiResponse::ok(
        state.archive.reader_view(episode_id).await?,
    )))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
}

async fn search(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> ApiResult<crate::tags::TagSearch<crate::archive::SearchHit>> {
    let query = params.q.unwrap_or_default();
    Ok(Json(ApiResponse::ok(
        state.archive.search_by_tag(&query).await?,
    )))
}

// ---- Admin routes ----

/// Text fields and files of a multipart form
#[derive(Debug, Default)]
struct UploadForm {
    fields: Vec<(String, String)>,
    files: Vec<(String, UploadFile)>,
}

impl UploadForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }

    /// Files submitted under `name`, in form order
    fn take_files(&mut self, name: &str) -> Vec<UploadFile> {
        let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|(field, _)| field == name);
        self.files = rest;
        matching.into_iter().map(|(_, file)| file).collect()
    }
}

async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadForm, ApiError> {
    let mut multipart = multipart?;
    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let bytes = field.bytes().await.map_err(invalid_form)?;
                if bytes.is_empty() && file_name.is_empty() {
                    continue;
                }
                form.files
                    .push((name, UploadFile::new(file_name, bytes.to_vec())));
            }
            None => {
                let value = field.text().await.map_err(invalid_form)?;
                form.fields.push((name, value));
            }
        }
    }

    Ok(form)
}

fn invalid_form(error: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::invalid_request(format!("Invalid multipart body: {}", error))
}

async fn create_work(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<crate::archive::Mutation<crate::db::DbWork>> {
    let mut form = read_form(multipart).await?;
    let title = form.field("title").unwrap_or_default().to_string();
    let thumbnail = form.take_files("thumbnail").into_iter().next();

    Ok(Json(ApiResponse::ok(
        state.archive.create_work(&title, thumbnail).await?,
    )))
}

async fn replace_thumbnail(
    State(state): State<AppState>,
    ApiPath(work_id): ApiPath<WorkId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<crate::archive::Mutation<crate::db::DbWork>> {
    let mut form = read_form(multipart).await?;
    let file = form
        .take_files("thumbnail")
        .into_iter()
        .next()
        .ok_or_else(|| ArchiveError::Validation("Thumbnail file is required".to_string()))?;

    Ok(Json(ApiResponse::ok(
        state.archive.replace_thumbnail(work_id, file).await?,
    )))
}

async fn delete_work(
    State(state): State<AppState>,
    ApiPath(work_id): ApiPath<WorkId>,
) -> ApiResult<crate::archive::Mutation<crate::db::CascadeReport>> {
    Ok(Json(ApiResponse::ok(
        state.archive.delete_work(work_id).await?,
    )))
}

async fn admin_episodes(
    State(state): State<AppState>,
    ApiPath(work_id): ApiPath<WorkId>,
) -> ApiResult<crate::archive::WorkDetail> {
    Ok(Json(ApiResponse::ok(
        state.archive.admin_episodes(work_id).await?,
    )))
}

async fn create_episode(
    State(state): State<AppState>,
    ApiPath(work_id): ApiPath<WorkId>,
    ApiJson(episode): ApiJson<NewEpisode>,
) -> ApiResult<crate::archive::Mutation<crate::db::DbEpisode>> {
    Ok(Json(ApiResponse::ok(
        state.archive.create_episode(work_id, episode).await?,
    )))
}

#[derive(Debug, Deserialize)]
struct DeleteEpisodesRequest {
    episode_ids: Vec<EpisodeId>,
}

async fn delete_episodes(
    State(state): State<AppState>,
    ApiPath(work_id): ApiPath<WorkId>,
    ApiJson(request): ApiJson<DeleteEpisodesRequest>,
) -> ApiResult<crate::archive::Mutation<crate::archive::BatchDeleteReport>> {
    Ok(Json(ApiResponse::ok(
        state
            .archive
            .delete_episodes(work_id, &request.episode_ids)
            .await?,
    )))
}

async fn delete_episode(
    State(state): State<AppState>,
    ApiPath(episode_id): ApiPath<EpisodeId>,
) -> ApiResult<crate::archive::Mutation<crate::db::CascadeReport>> {
    Ok(Json(ApiResponse::ok(
        state.archive.delete_episode(episode_id).await?,
    )))
}

/// Upload the `files` of a multipart form to an episode
///
/// Responds 207 with the report when some files failed.
async fn attach_images(
    State(state): State<AppState>,
    ApiPath(episode_id): ApiPath<EpisodeId>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut form = read_form(multipart).await?;
    let files = form.take_files("files");

    let mutation = state
        .archive
        .attach_images(episode_id, files, BatchCancel::never())
        .await?;

    if mutation.value.is_complete() {
        Ok(Json(ApiResponse::ok(mutation)).into_response())
    } else {
        let body = ApiResponse {
            status: "partial",
            data: mutation,
        };
        Ok((StatusCode::MULTI_STATUS, Json(body)).into_response())
    }
}

#[derive(Debug, Deserialize)]
struct ReorderRequest {
    edits: Vec<SequenceEdit>,
}

async fn reorder_images(
    State(state): State<AppState>,
    ApiPath(episode_id): ApiPath<EpisodeId>,
    ApiJson(request): ApiJson<ReorderRequest>,
) -> ApiResult<crate::archive::Mutation<Vec<crate::db::DbImage>>> {
    Ok(Json(ApiResponse::ok(
        state
            .archive
            .reorder_images(episode_id, &request.edits)
            .await?,
    )))
}

async fn delete_image(
    State(state): State<AppState>,
    ApiPath(image_id): ApiPath<ImageId>,
) -> ApiResult<crate::archive::Mutation<crate::db::CascadeReport>> {
    Ok(Json(ApiResponse::ok(
        state.archive.delete_image(image_id).await?,
    )))
}

async fn sync_folder(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<FolderSync>,
) -> ApiResult<crate::archive::Mutation<crate::archive::SyncReport>> {
    Ok(Json(ApiResponse::ok(
        state.archive.sync_episode_from_folder(request).await?,
    )))
}
