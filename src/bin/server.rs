#![forbid(unsafe_code)]

//! Axum server for the hometube API.
//!
//! Exposes the SQLite catalog plus the media files stored locally on disk:
//! signup/login with signed bearer tokens, video upload and playback,
//! subscriptions, comments and like/dislike toggles. Everything lives under
//! `DATA_ROOT`; there is no outbound network traffic.

use std::{
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Multipart, Path as AxumPath, Query, State, multipart::Field,
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, FixedOffset};
use hometube::auth::{self, TokenSigner};
use hometube::config::{RuntimeOverrides, resolve_runtime_config};
use hometube::format;
use hometube::security::ensure_not_root;
use hometube::store::{CommentRow, NewVideo, Store, UserRow, VideoRow};
use mime_guess::MimeGuess;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    signal,
};
use tokio_util::io::ReaderStream;

// Directory layout under DATA_ROOT. Keeping the names centralized means the
// same values are used for intake and for serving.
const UPLOADS_SUBDIR: &str = "uploads";
const VIDEOS_SUBDIR: &str = "videos";
const THUMBNAILS_SUBDIR: &str = "thumbnails";
const PROFILES_SUBDIR: &str = "profiles";
const BANNERS_SUBDIR: &str = "banners";

const DB_FILE: &str = "videos.db";
const TOKEN_KEY_FILE: &str = "token.key";

const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024 * 1024;
const DEFAULT_TITLE: &str = "Untitled Video";
const DEFAULT_DURATION: &str = "0:00";
const RECENT_USERS_LIMIT: i64 = 10;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

fn parse_overrides<I>(iter: I) -> Result<RuntimeOverrides>
where
    I: IntoIterator<Item = String>,
{
    let mut overrides = RuntimeOverrides::default();
    let mut args = iter.into_iter();
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--data-root=") {
            overrides.data_root = Some(PathBuf::from(value));
            continue;
        }
        if let Some(value) = arg.strip_prefix("--port=") {
            overrides.port = Some(parse_port_arg(value)?);
            continue;
        }
        if let Some(value) = arg.strip_prefix("--host=") {
            overrides.host = Some(value.to_string());
            continue;
        }

        match arg.as_str() {
            "--data-root" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--data-root requires a value"))?;
                overrides.data_root = Some(PathBuf::from(value));
            }
            "--port" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--port requires a value"))?;
                overrides.port = Some(parse_port_arg(&value)?);
            }
            "--host" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--host requires a value"))?;
                overrides.host = Some(value);
            }
            _ => return Err(anyhow!("unknown argument: {arg}")),
        }
    }
    Ok(overrides)
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/HOMETUBE_HOST")
}

/// Materialized file-system locations used at runtime.
struct FilePaths {
    videos: PathBuf,
    thumbnails: PathBuf,
    profiles: PathBuf,
    banners: PathBuf,
}

impl FilePaths {
    fn new(data_root: &Path) -> Self {
        let uploads = data_root.join(UPLOADS_SUBDIR);
        Self {
            videos: uploads.join(VIDEOS_SUBDIR),
            thumbnails: uploads.join(THUMBNAILS_SUBDIR),
            profiles: uploads.join(PROFILES_SUBDIR),
            banners: uploads.join(BANNERS_SUBDIR),
        }
    }

    fn ensure(&self) -> Result<()> {
        for dir in [&self.videos, &self.thumbnails, &self.profiles, &self.banners] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
impl FilePaths {
    fn for_base(path: &Path) -> Self {
        let paths = Self::new(path);
        paths.ensure().unwrap();
        paths
    }
}

#[derive(Clone)]
struct AppState {
    store: Store,
    files: Arc<FilePaths>,
    signer: Arc<TokenSigner>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    details: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Unexpected storage or filesystem failure: logged, reported as 500
    /// with the underlying error as a detail string.
    fn internal(err: impl std::fmt::Display) -> Self {
        let details = err.to_string();
        log::error!("request failed: {details}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "internal server error".to_string(),
            details: Some(details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.details {
            Some(details) => json!({ "error": self.message, "details": details }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let overrides = parse_overrides(std::env::args().skip(1))?;
    let config = resolve_runtime_config(overrides)?;
    ensure_not_root("server")?;
    let host = parse_host_arg(&config.host)?;

    let store = Store::open(&config.data_root.join(DB_FILE))
        .await
        .context("opening video database")?;
    let signer = TokenSigner::load_or_generate(&config.data_root.join(TOKEN_KEY_FILE))?;
    let files = FilePaths::new(&config.data_root);
    files.ensure()?;

    let state = AppState {
        store,
        files: Arc::new(files),
        signer: Arc::new(signer),
    };

    // Each route is small; helpers hold anything shared between handlers.
    let app = Router::new()
        .route("/api/videos", get(list_videos))
        .route("/api/videos/upload", post(upload_video))
        .route(
            "/api/videos/{id}",
            get(get_video).put(update_video).delete(delete_video),
        )
        .route("/api/videos/{id}/stream", get(stream_video))
        .route("/api/videos/{id}/like", post(like_video))
        .route("/api/videos/{id}/dislike", post(dislike_video))
        .route(
            "/api/videos/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route("/api/comments/{id}", put(update_comment).delete(delete_comment))
        .route("/api/thumbnails/{file}", get(get_thumbnail))
        .route("/api/profiles/{file}", get(get_profile_image))
        .route("/api/banners/{file}", get(get_banner_image))
        .route("/api/signup", post(signup))
        .route("/api/login", post(login))
        .route("/api/verify-token", get(verify_token))
        .route("/api/subscribe", post(subscribe))
        .route("/api/subscriptions/{user_id}", get(list_subscriptions))
        .route(
            "/api/channels/{name}/subscribers/count",
            get(channel_subscriber_count),
        )
        .route("/api/users", get(list_users))
        .route("/api/users/{username}", get(get_user_page))
        .route("/api/profile/update", put(update_profile))
        .route("/api/profile/change-password", put(change_password))
        .route("/api/profile/delete-account", delete(delete_account))
        .fallback(api_fallback)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state);

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    log::info!("API server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

async fn shutdown_signal() {
    // Only graceful shutdown is affected when the handler fails to install;
    // the process still terminates when Ctrl+C fires.
    if let Err(err) = signal::ctrl_c().await {
        log::warn!("failed to install Ctrl+C handler: {err}");
    }
}

async fn api_fallback() -> ApiError {
    ApiError::not_found("endpoint not found")
}

// --- identity ----------------------------------------------------------

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Resolves the `Authorization: Bearer` header to a live user row. Every
/// failure mode is a 401 with a distinct message.
async fn require_identity(state: &AppState, headers: &HeaderMap) -> ApiResult<UserRow> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthenticated("token required"))?;
    let token = auth::bearer_token(value)
        .ok_or_else(|| ApiError::unauthenticated("invalid authorization header"))?;
    let claims = state
        .signer
        .verify(token, unix_now())
        .map_err(|err| ApiError::unauthenticated(err.to_string()))?;
    state
        .store
        .user_by_id(claims.user_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::unauthenticated("invalid token"))
}

/// Like [`require_identity`] but anonymous access is fine.
async fn optional_identity(state: &AppState, headers: &HeaderMap) -> Option<UserRow> {
    require_identity(state, headers).await.ok()
}

// --- payload builders --------------------------------------------------

fn thumbnail_url(video: &VideoRow) -> Option<String> {
    video
        .thumbnail
        .as_deref()
        .map(|file| format!("/api/thumbnails/{file}"))
}

fn video_summary(video: &VideoRow, now: DateTime<FixedOffset>) -> Value {
    json!({
        "id": video.id,
        "title": video.title,
        "description": video.description,
        "channel": video.channel,
        "thumbnail": thumbnail_url(video),
        "views": format::format_views(video.views),
        "uploadTime": format::relative_from_stamp(&video.upload_time, now),
        "uploadDate": format::date_from_stamp(&video.upload_time),
        "duration": video.duration,
        "likes": video.likes,
        "dislikes": video.dislikes,
        "videoUrl": format!("/api/videos/{}/stream", video.id),
    })
}

fn video_detail(video: &VideoRow, subscriber_count: i64, now: DateTime<FixedOffset>) -> Value {
    let mut payload = video_summary(video, now);
    payload["subscriberCount"] = json!(subscriber_count);
    payload
}

fn comment_payload(comment: &CommentRow, now: DateTime<FixedOffset>) -> Value {
    json!({
        "id": comment.id,
        "userId": comment.user_id,
        "username": comment.username,
        "content": comment.content,
        "createdAt": format::relative_from_stamp(&comment.created_at, now),
    })
}

// --- catalog -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let term = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let videos = state
        .store
        .list_videos(term)
        .await
        .map_err(ApiError::internal)?;
    let now = format::now_kst();
    Ok(Json(
        videos.iter().map(|video| video_summary(video, now)).collect(),
    ))
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<Value>> {
    let video = state
        .store
        .record_view(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    let subscribers = state
        .store
        .subscriber_count(&video.channel)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(video_detail(&video, subscribers, format::now_kst())))
}

async fn update_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    let video = state
        .store
        .video_by_id(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    if video.channel != user.username {
        return Err(ApiError::forbidden("only the uploader can edit this video"));
    }

    let now = format::now_kst();
    let mut title = None;
    let mut description = None;
    let mut duration = None;
    let mut new_thumbnail = None;

    while let Some(field) = next_upload_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => {
                let value = read_text_field(field).await?.trim().to_string();
                if !value.is_empty() {
                    title = Some(value);
                }
            }
            "description" => description = Some(read_text_field(field).await?.trim().to_string()),
            "duration" => {
                let value = read_text_field(field).await?.trim().to_string();
                if !value.is_empty() {
                    duration = Some(value);
                }
            }
            "thumbnail" => {
                let original = field.file_name().unwrap_or_default().to_string();
                // Non-image thumbnails are dropped rather than rejected.
                if has_allowed_extension(&original, IMAGE_EXTENSIONS) {
                    let stored = stored_name("", &original, now);
                    save_field(&state.files.thumbnails.join(&stored), field).await?;
                    new_thumbnail = Some(stored);
                }
            }
            _ => {}
        }
    }

    state
        .store
        .update_video_text(id, title.as_deref(), description.as_deref(), duration.as_deref())
        .await
        .map_err(ApiError::internal)?;
    if let Some(stored) = &new_thumbnail {
        state
            .store
            .set_video_thumbnail(id, stored)
            .await
            .map_err(ApiError::internal)?;
        if let Some(old) = &video.thumbnail {
            remove_file_quiet(&state.files.thumbnails.join(old)).await;
        }
    }

    let updated = state
        .store
        .video_by_id(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::internal("video row missing after update"))?;
    let subscribers = state
        .store
        .subscriber_count(&updated.channel)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(video_detail(&updated, subscribers, now)))
}

async fn delete_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    let video = state
        .store
        .video_by_id(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    if video.channel != user.username {
        return Err(ApiError::forbidden("only the uploader can delete this video"));
    }

    remove_file_quiet(&state.files.videos.join(&video.filename)).await;
    if let Some(thumbnail) = &video.thumbnail {
        remove_file_quiet(&state.files.thumbnails.join(thumbnail)).await;
    }
    state
        .store
        .delete_video(id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "message": "video deleted" })))
}

async fn upload_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = require_identity(&state, &headers).await?;
    let now = format::now_kst();

    let mut title = String::new();
    let mut description = String::new();
    let mut duration = DEFAULT_DURATION.to_string();
    let mut video_file: Option<String> = None;
    let mut thumbnail_file: Option<String> = None;

    let intake: ApiResult<()> = async {
        while let Some(field) = next_upload_field(&mut multipart).await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "title" => title = read_text_field(field).await?.trim().to_string(),
                "description" => {
                    description = read_text_field(field).await?.trim().to_string();
                }
                "duration" => {
                    let value = read_text_field(field).await?.trim().to_string();
                    if !value.is_empty() {
                        duration = value;
                    }
                }
                "video" => {
                    let original = field.file_name().unwrap_or("video").to_string();
                    // Extension is checked before any byte hits the disk.
                    if !has_allowed_extension(&original, VIDEO_EXTENSIONS) {
                        return Err(ApiError::bad_request("unsupported video format"));
                    }
                    let stored = stored_name("", &original, now);
                    save_field(&state.files.videos.join(&stored), field).await?;
                    video_file = Some(stored);
                }
                "thumbnail" => {
                    let original = field.file_name().unwrap_or_default().to_string();
                    if has_allowed_extension(&original, IMAGE_EXTENSIONS) {
                        let stored = stored_name("", &original, now);
                        save_field(&state.files.thumbnails.join(&stored), field).await?;
                        thumbnail_file = Some(stored);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
    .await;

    if let Err(err) = intake {
        discard_upload(&state.files, &video_file, &thumbnail_file).await;
        return Err(err);
    }
    let Some(filename) = video_file else {
        discard_upload(&state.files, &None, &thumbnail_file).await;
        return Err(ApiError::bad_request("video file is required"));
    };
    if title.is_empty() {
        title = DEFAULT_TITLE.to_string();
    }

    // The channel is always the uploader; any client-sent channel field is
    // ignored by construction.
    let video = NewVideo {
        title,
        description,
        channel: user.username.clone(),
        filename,
        thumbnail: thumbnail_file,
        duration,
        upload_time: now.to_rfc3339(),
    };
    let id = state
        .store
        .insert_video(&video)
        .await
        .map_err(ApiError::internal)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "video uploaded", "video_id": id })),
    ))
}

async fn discard_upload(files: &FilePaths, video: &Option<String>, thumbnail: &Option<String>) {
    if let Some(file) = video {
        remove_file_quiet(&files.videos.join(file)).await;
    }
    if let Some(file) = thumbnail {
        remove_file_quiet(&files.thumbnails.join(file)).await;
    }
}

// --- media streaming ---------------------------------------------------

async fn stream_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let video = state
        .store
        .video_by_id(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    ensure_safe_path_segment(&video.filename)?;
    stream_file(state.files.videos.join(&video.filename), Some(&headers)).await
}

async fn get_thumbnail(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
) -> ApiResult<Response> {
    ensure_safe_path_segment(&file)?;
    stream_file(state.files.thumbnails.join(&file), None).await
}

async fn get_profile_image(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
) -> ApiResult<Response> {
    ensure_safe_path_segment(&file)?;
    stream_file(state.files.profiles.join(&file), None).await
}

async fn get_banner_image(
    State(state): State<AppState>,
    AxumPath(file): AxumPath<String>,
) -> ApiResult<Response> {
    ensure_safe_path_segment(&file)?;
    stream_file(state.files.banners.join(&file), None).await
}

// --- reactions ---------------------------------------------------------

async fn like_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    let counts = state
        .store
        .toggle_like(user.id, id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    Ok(Json(json!({
        "likes": counts.likes,
        "dislikes": counts.dislikes,
        "isLiked": counts.active,
    })))
}

async fn dislike_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    let counts = state
        .store
        .toggle_dislike(user.id, id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("video not found"))?;
    Ok(Json(json!({
        "likes": counts.likes,
        "dislikes": counts.dislikes,
        "isDisliked": counts.active,
    })))
}

// --- accounts ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CredentialsRequest {
    username: String,
    password: String,
}

async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let username = payload.username.trim().to_string();
    if username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::bad_request("username and password are required"));
    }
    if state
        .store
        .user_by_username(&username)
        .await
        .map_err(ApiError::internal)?
        .is_some()
    {
        return Err(ApiError::conflict("username already taken"));
    }

    let hash = auth::hash_password(&payload.password).map_err(ApiError::internal)?;
    let id = state
        .store
        .create_user(&username, &hash)
        .await
        .map_err(ApiError::internal)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "signup complete", "id": id })),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<CredentialsRequest>,
) -> ApiResult<Json<Value>> {
    // Unknown user and wrong password share one message on purpose.
    let user = state
        .store
        .user_by_username(payload.username.trim())
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::unauthenticated("invalid username or password"))?;
    if !auth::verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::unauthenticated("invalid username or password"));
    }

    let token = state.signer.issue(user.id, &user.username, unix_now());
    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "token": token,
    })))
}

async fn verify_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    Ok(Json(json!({
        "valid": true,
        "user": { "id": user.id, "username": user.username },
    })))
}

#[derive(Debug, Deserialize)]
struct ChangePasswordRequest {
    #[serde(rename = "currentPassword")]
    current_password: String,
    #[serde(rename = "newPassword")]
    new_password: String,
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    if payload.new_password.is_empty() {
        return Err(ApiError::bad_request("newPassword is required"));
    }
    if !auth::verify_password(&payload.current_password, &user.password_hash) {
        return Err(ApiError::unauthenticated("current password is incorrect"));
    }

    let hash = auth::hash_password(&payload.new_password).map_err(ApiError::internal)?;
    state
        .store
        .set_password_hash(user.id, &hash)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "message": "password changed" })))
}

async fn update_profile(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    let now = format::now_kst();

    let mut new_bio = None;
    let mut new_profile = None;
    let mut new_banner = None;

    while let Some(field) = next_upload_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "bio" => new_bio = Some(read_text_field(field).await?.trim().to_string()),
            "profileImage" => {
                let original = field.file_name().unwrap_or_default().to_string();
                if has_allowed_extension(&original, IMAGE_EXTENSIONS) {
                    let stored =
                        stored_name(&format!("profile_{}_", user.id), &original, now);
                    save_field(&state.files.profiles.join(&stored), field).await?;
                    new_profile = Some(stored);
                }
            }
            "bannerImage" => {
                let original = field.file_name().unwrap_or_default().to_string();
                if has_allowed_extension(&original, IMAGE_EXTENSIONS) {
                    let stored =
                        stored_name(&format!("banner_{}_", user.id), &original, now);
                    save_field(&state.files.banners.join(&stored), field).await?;
                    new_banner = Some(stored);
                }
            }
            _ => {}
        }
    }

    if let Some(bio) = &new_bio {
        state
            .store
            .set_bio(user.id, bio)
            .await
            .map_err(ApiError::internal)?;
    }
    if let Some(stored) = &new_profile {
        state
            .store
            .set_profile_image(user.id, stored)
            .await
            .map_err(ApiError::internal)?;
        if let Some(old) = &user.profile_image {
            remove_file_quiet(&state.files.profiles.join(old)).await;
        }
    }
    if let Some(stored) = &new_banner {
        state
            .store
            .set_banner_image(user.id, stored)
            .await
            .map_err(ApiError::internal)?;
        if let Some(old) = &user.banner_image {
            remove_file_quiet(&state.files.banners.join(old)).await;
        }
    }

    let refreshed = state
        .store
        .user_by_id(user.id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::internal("user row missing after update"))?;
    Ok(Json(json!({
        "message": "profile updated",
        "profileImage": refreshed
            .profile_image
            .as_deref()
            .map(|file| format!("/api/profiles/{file}")),
        "bannerImage": refreshed
            .banner_image
            .as_deref()
            .map(|file| format!("/api/banners/{file}")),
        "bio": refreshed.bio.unwrap_or_default(),
    })))
}

#[derive(Debug, Deserialize)]
struct DeleteAccountRequest {
    password: String,
}

async fn delete_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<DeleteAccountRequest>,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    if !auth::verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::unauthenticated("password is incorrect"));
    }

    // Media files go first; the row deletions then run in one transaction.
    // File removals already done are not undone if that transaction fails.
    let videos = state
        .store
        .videos_by_channel(&user.username)
        .await
        .map_err(ApiError::internal)?;
    for video in &videos {
        remove_file_quiet(&state.files.videos.join(&video.filename)).await;
        if let Some(thumbnail) = &video.thumbnail {
            remove_file_quiet(&state.files.thumbnails.join(thumbnail)).await;
        }
    }
    if let Some(file) = &user.profile_image {
        remove_file_quiet(&state.files.profiles.join(file)).await;
    }
    if let Some(file) = &user.banner_image {
        remove_file_quiet(&state.files.banners.join(file)).await;
    }

    state
        .store
        .delete_user_cascade(user.id, &user.username)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "message": "account deleted" })))
}

// --- channels ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    #[serde(rename = "channelName")]
    channel_name: String,
}

async fn subscribe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SubscribeRequest>,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    let channel = payload.channel_name.trim().to_string();
    if channel.is_empty() {
        return Err(ApiError::bad_request("channelName is required"));
    }
    if channel == user.username {
        return Err(ApiError::bad_request("cannot subscribe to yourself"));
    }

    // The channel side of a subscription is a plain string; no user row is
    // required to exist for it.
    let subscribed = state
        .store
        .toggle_subscription(user.id, &channel)
        .await
        .map_err(ApiError::internal)?;
    let count = state
        .store
        .subscriber_count(&channel)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({
        "subscribed": subscribed,
        "subscriberCount": count,
    })))
}

async fn list_subscriptions(
    State(state): State<AppState>,
    AxumPath(user_id): AxumPath<i64>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    if user.id != user_id {
        return Err(ApiError::forbidden(
            "cannot view another user's subscriptions",
        ));
    }

    let channels = state
        .store
        .subscriptions_for(user.id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!(channels)))
}

async fn channel_subscriber_count(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> ApiResult<Json<Value>> {
    let count = state
        .store
        .subscriber_count(&name)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "count": count })))
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Value>>> {
    let term = query.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let users = match term {
        Some(term) => state.store.search_users(term).await,
        None => state.store.recent_users(RECENT_USERS_LIMIT).await,
    }
    .map_err(ApiError::internal)?;
    Ok(Json(
        users
            .iter()
            .map(|user| {
                json!({
                    "id": user.id,
                    "username": user.username,
                    "subscriberCount": user.subscriber_count,
                })
            })
            .collect(),
    ))
}

async fn get_user_page(
    State(state): State<AppState>,
    AxumPath(username): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let target = state
        .store
        .user_by_username(&username)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("user not found"))?;

    let viewer = optional_identity(&state, &headers).await;
    let is_subscribed = match &viewer {
        Some(viewer) => state
            .store
            .is_subscribed(viewer.id, &target.username)
            .await
            .map_err(ApiError::internal)?,
        None => false,
    };
    let subscribers = state
        .store
        .subscriber_count(&target.username)
        .await
        .map_err(ApiError::internal)?;
    let videos = state
        .store
        .videos_by_channel(&target.username)
        .await
        .map_err(ApiError::internal)?;

    let now = format::now_kst();
    Ok(Json(json!({
        "id": target.id,
        "username": target.username,
        "subscriberCount": subscribers,
        "isSubscribed": is_subscribed,
        "videos": videos.iter().map(|video| video_summary(video, now)).collect::<Vec<_>>(),
        "videoCount": videos.len(),
        "profileImage": target
            .profile_image
            .as_deref()
            .map(|file| format!("/api/profiles/{file}")),
        "bannerImage": target
            .banner_image
            .as_deref()
            .map(|file| format!("/api/banners/{file}")),
        "bio": target.bio.unwrap_or_default(),
    })))
}

// --- comments ----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CommentRequest {
    content: String,
}

// An unknown video id yields an empty list rather than 404.
async fn list_comments(
    State(state): State<AppState>,
    AxumPath(video_id): AxumPath<i64>,
) -> ApiResult<Json<Vec<Value>>> {
    let comments = state
        .store
        .comments_for_video(video_id)
        .await
        .map_err(ApiError::internal)?;
    let now = format::now_kst();
    Ok(Json(
        comments
            .iter()
            .map(|comment| comment_payload(comment, now))
            .collect(),
    ))
}

async fn create_comment(
    State(state): State<AppState>,
    AxumPath(video_id): AxumPath<i64>,
    headers: HeaderMap,
    Json(payload): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = require_identity(&state, &headers).await?;
    let content = payload.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("comment content is required"));
    }
    if state
        .store
        .video_by_id(video_id)
        .await
        .map_err(ApiError::internal)?
        .is_none()
    {
        return Err(ApiError::not_found("video not found"));
    }

    let now = format::now_kst();
    let comment = state
        .store
        .insert_comment(video_id, user.id, &user.username, &content, &now.to_rfc3339())
        .await
        .map_err(ApiError::internal)?;
    Ok((StatusCode::CREATED, Json(comment_payload(&comment, now))))
}

async fn update_comment(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
    Json(payload): Json<CommentRequest>,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    let comment = state
        .store
        .comment_by_id(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("comment not found"))?;
    if comment.user_id != user.id {
        return Err(ApiError::forbidden("only the author can edit this comment"));
    }
    let content = payload.content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::bad_request("comment content is required"));
    }

    state
        .store
        .update_comment_content(id, &content)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "id": id, "content": content })))
}

async fn delete_comment(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let user = require_identity(&state, &headers).await?;
    let comment = state
        .store
        .comment_by_id(id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::not_found("comment not found"))?;
    if comment.user_id != user.id {
        return Err(ApiError::forbidden("only the author can delete this comment"));
    }

    state
        .store
        .delete_comment(id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "message": "comment deleted" })))
}

// --- upload plumbing ---------------------------------------------------

async fn next_upload_field(multipart: &mut Multipart) -> ApiResult<Option<Field<'_>>> {
    multipart
        .next_field()
        .await
        .map_err(|err| ApiError::bad_request(format!("reading upload: {err}")))
}

async fn read_text_field(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|err| ApiError::bad_request(format!("reading upload: {err}")))
}

/// Streams a multipart field to disk chunk by chunk; large uploads never
/// buffer fully in memory.
async fn save_field(path: &Path, mut field: Field<'_>) -> ApiResult<()> {
    let mut file = File::create(path).await.map_err(ApiError::internal)?;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| ApiError::bad_request(format!("reading upload: {err}")))?
    {
        file.write_all(&chunk).await.map_err(ApiError::internal)?;
    }
    file.flush().await.map_err(ApiError::internal)?;
    Ok(())
}

async fn remove_file_quiet(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await
        && err.kind() != std::io::ErrorKind::NotFound
    {
        log::warn!("failed to remove {}: {err}", path.display());
    }
}

/// Replaces anything outside `[A-Za-z0-9._-]` with underscores and strips
/// leading/trailing dots so the result is a plain file name.
fn sanitize_filename(original: &str) -> String {
    let cleaned: String = original
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

fn file_extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

fn has_allowed_extension(name: &str, allowed: &[&str]) -> bool {
    file_extension(name).is_some_and(|ext| allowed.contains(&ext.as_str()))
}

/// Storage name for an uploaded file: optional owner prefix, a second-level
/// timestamp, then the sanitized original name.
fn stored_name(prefix: &str, original: &str, now: DateTime<FixedOffset>) -> String {
    format!(
        "{prefix}{}_{}",
        now.format("%Y%m%d_%H%M%S"),
        sanitize_filename(original)
    )
}

// --- file serving ------------------------------------------------------

/// Validates that a single dynamic path segment never escapes its base folder.
fn ensure_safe_path_segment(value: &str) -> ApiResult<()> {
    if value.is_empty()
        || Path::new(value)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }

    Ok(())
}

/// Serves a file from disk, honoring a single `Range: bytes=` request with
/// 206/416 responses. The content type is guessed from the extension.
async fn stream_file(path: PathBuf, headers: Option<&HeaderMap>) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let metadata = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = metadata.len();

    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = if let Some((start, end)) = range {
        if start >= size {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = format!("bytes */{size}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        } else {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("file not found"))?;
            let body = Body::from_stream(ReaderStream::new(file.take(length)));
            let mut response = body.into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            if let Ok(value) = format!("bytes {start}-{end}/{size}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            if let Ok(value) = length.to_string().parse() {
                response.headers_mut().insert(header::CONTENT_LENGTH, value);
            }
            response
        }
    } else {
        Body::from_stream(ReaderStream::new(file)).into_response()
    };

    if let Ok(value) = "bytes".parse() {
        response.headers_mut().insert(header::ACCEPT_RANGES, value);
    }
    if let Some(mime) = MimeGuess::from_path(&path).first()
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn parse_range_header(value: &header::HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let mut parts = value.split('=');
    let unit = parts.next()?.trim();
    if unit != "bytes" {
        return None;
    }
    let range = parts.next()?.trim();
    if range.is_empty() {
        return None;
    }
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // Suffix range: "-N" means last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        if suffix_len >= size {
            return Some((0, size.saturating_sub(1)));
        }
        return Some((size - suffix_len, size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    if end < start {
        return None;
    }
    Some((start, end))
}
