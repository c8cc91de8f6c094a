// src/handlers/rest.rs

use axum::{
    body::Body,
    extract::{Multipart, Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password, JwtService};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{ContentChange, CreateShareRequest, CreateUserRequest, Share, ShareResponse, User, UserResponse};
use crate::storage::{Database, FileStore, PathContent, PathMeta};
use crate::vfs::{
    is_protected_root, resolve, resolve_share_target, virtual_key, ChangeEvent, ChangeKind,
    ChangeNotifier, DownloadTokenStore, ResolvedPath, WatcherRegistry,
};

/// 一次性下载 token 的有效期
const DOWNLOAD_TOKEN_TTL_MINUTES: i64 = 4;

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const OLDEST_COMPATIBLE_VERSION: &str = "0.1.0";

// ==================== 应用状态 ====================

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub file_store: Arc<FileStore>,
    pub tokens: Arc<DownloadTokenStore>,
    pub watchers: Arc<WatcherRegistry>,
    pub notifier: Arc<ChangeNotifier>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    fn resolve_for(&self, user: &User, virtual_path: &str) -> AppResult<ResolvedPath> {
        resolve(
            Path::new(virtual_path),
            self.file_store.homes_dir(),
            self.file_store.shared_dir(),
            &user.username,
        )
    }
}

fn root_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 存在性/类型检查在解析之后做，解析本身不碰文件系统
async fn metadata_of(path: &Path, missing_detail: &str) -> AppResult<std::fs::Metadata> {
    fs::metadata(path)
        .await
        .map_err(|_| AppError::ValidationError(missing_detail.to_string()))
}

async fn stream_file(real_path: &Path, download_name: &str) -> AppResult<Response> {
    let file = fs::File::open(real_path).await?;
    let length = file.metadata().await?.len();
    let content_type = mime_guess::from_path(real_path).first_or_octet_stream();
    let stream = ReaderStream::new(file);

    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (header::CONTENT_LENGTH, length.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download_name),
        ),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}

// ==================== 版本 ====================

#[derive(Debug, Serialize)]
pub struct ApiVersion {
    pub version: String,
    pub oldest_compatible: String,
}

pub async fn api_version() -> Json<ApiVersion> {
    Json(ApiVersion {
        version: CURRENT_VERSION.to_string(),
        oldest_compatible: OLDEST_COMPATIBLE_VERSION.to_string(),
    })
}

// ==================== 认证相关 ====================

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> AppResult<Json<TokenResponse>> {
    let user = state
        .db
        .get_user_by_username(&form.username)
        .await?
        .ok_or_else(|| AppError::AuthError("Incorrect username or password".to_string()))?;

    if !verify_password(&form.password, &user.password_hash)? {
        return Err(AppError::AuthError("Incorrect username or password".to_string()));
    }

    // home 根在第一次使用时创建
    state.file_store.ensure_user_home(&user.username).await?;

    let access_token = state.jwt_service.generate_token(&user)?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

pub async fn create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    if !state.config.auth.signups_allowed {
        return Err(AppError::AuthError("signups are disabled".to_string()));
    }

    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::ValidationError("username and password are required".to_string()));
    }

    if state.db.get_user_by_username(&req.username).await?.is_some() {
        return Err(AppError::Conflict("Username already exists".to_string()));
    }

    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: req.username,
        password_hash: hash_password(&req.password)?,
        is_admin: false,
        disabled: false,
        created_at: now,
        updated_at: now,
    };
    state.db.create_user(&user).await?;
    state.file_store.ensure_user_home(&user.username).await?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

// ==================== 用户相关 ====================

pub async fn get_me(Extension(user): Extension<User>) -> Json<UserResponse> {
    Json(user.into())
}

// ==================== 目录相关 ====================

#[derive(Debug, Deserialize)]
pub struct DirectoryRequest {
    pub directory: String,
}

#[derive(Debug, Serialize)]
pub struct Roots {
    pub shared: String,
    pub home: String,
}

pub async fn get_roots(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Json<Roots> {
    let shared = root_label(state.file_store.shared_dir());
    let homes = root_label(state.file_store.homes_dir());
    Json(Roots {
        shared,
        home: format!("{}/{}", homes, user.username),
    })
}

pub async fn get_directory_contents(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<DirectoryRequest>,
) -> AppResult<Json<Vec<PathContent>>> {
    let resolved = state.resolve_for(&user, &req.directory)?;

    let meta = metadata_of(&resolved.real_path, "directory must exist").await?;
    if !meta.is_dir() {
        return Err(AppError::ValidationError("path must be a directory".to_string()));
    }

    let contents = state.file_store.list_dir(&resolved.real_path).await?;
    Ok(Json(contents))
}

pub async fn make_directory(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<DirectoryRequest>,
) -> AppResult<StatusCode> {
    let resolved = state.resolve_for(&user, &req.directory)?;

    if fs::metadata(&resolved.real_path).await.is_ok() {
        return Err(AppError::Conflict("directory already exists".to_string()));
    }

    state.file_store.make_dir(&resolved.real_path).await?;

    let event = ChangeEvent::new(virtual_key(Path::new(&req.directory))?, ChangeKind::Created, true);
    state.notifier.notify(event, Some(&user)).await;

    Ok(StatusCode::CREATED)
}

pub async fn remove_directory(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<DirectoryRequest>,
) -> AppResult<StatusCode> {
    let resolved = state.resolve_for(&user, &req.directory)?;

    let meta = metadata_of(&resolved.real_path, "directory must exist").await?;
    if !meta.is_dir() {
        return Err(AppError::ValidationError("path must be a directory".to_string()));
    }

    // 删除之前先挡住租户根
    if resolved.is_root
        || is_protected_root(
            &resolved.real_path,
            state.file_store.homes_dir(),
            state.file_store.shared_dir(),
            &user.username,
        )
    {
        return Err(AppError::RootProtection("cannot delete a root directory".to_string()));
    }

    state.file_store.remove_dir(&resolved.real_path).await?;

    let event = ChangeEvent::new(virtual_key(Path::new(&req.directory))?, ChangeKind::Deleted, true);
    state.notifier.notify(event, Some(&user)).await;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct DownloadTokenResponse {
    pub token: Uuid,
}

/// 目录打包下载：先导出 zip，再发一次性 token 取走
pub async fn directory_download_token(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<DirectoryRequest>,
) -> AppResult<Json<DownloadTokenResponse>> {
    let resolved = state.resolve_for(&user, &req.directory)?;

    let meta = metadata_of(&resolved.real_path, "directory must exist").await?;
    if !meta.is_dir() {
        return Err(AppError::ValidationError("path must be a directory".to_string()));
    }

    let zip_path = state.file_store.zip_dir(&resolved.real_path).await?;
    let token = state
        .tokens
        .create(zip_path, Duration::minutes(DOWNLOAD_TOKEN_TTL_MINUTES));
    metrics::observe_token_issued();

    let event = ChangeEvent::new(
        virtual_key(Path::new(&req.directory))?,
        ChangeKind::Downloaded,
        true,
    );
    state.notifier.notify(event, Some(&user)).await;

    Ok(Json(DownloadTokenResponse { token }))
}

// ==================== 文件相关 ====================

#[derive(Debug, Deserialize)]
pub struct FilePathRequest {
    pub file_path: String,
}

pub async fn upload_overwrite(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<PathContent>)> {
    let mut directory: Option<String> = None;
    let mut file_name: Option<String> = None;
    let mut file_data: Option<axum::body::Bytes> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::ValidationError(format!("invalid multipart body: {}", e)))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("directory") => {
                directory = Some(field.text().await.map_err(|e| {
                    AppError::ValidationError(format!("invalid directory field: {}", e))
                })?);
            }
            Some("file") => {
                file_name = field.file_name().map(str::to_string);
                file_data = Some(field.bytes().await.map_err(|e| {
                    AppError::ValidationError(format!("invalid file field: {}", e))
                })?);
            }
            _ => {}
        }
    }

    let directory = directory
        .ok_or_else(|| AppError::ValidationError("directory field is required".to_string()))?;
    let file_name =
        file_name.ok_or_else(|| AppError::ValidationError("file name is required".to_string()))?;
    let file_data =
        file_data.ok_or_else(|| AppError::ValidationError("file field is required".to_string()))?;

    // 文件名必须是单独一段
    if file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name == "."
        || file_name == ".."
    {
        return Err(AppError::ValidationError("invalid file name".to_string()));
    }

    let resolved = state.resolve_for(&user, &directory)?;
    let meta = metadata_of(&resolved.real_path, "directory must exist").await?;
    if !meta.is_dir() {
        return Err(AppError::ValidationError("path must be a directory".to_string()));
    }

    state
        .file_store
        .write_file(&resolved.real_path.join(&file_name), &file_data)
        .await?;

    let event = ChangeEvent::new(
        format!("{}/{}", virtual_key(Path::new(&directory))?, file_name),
        ChangeKind::Created,
        false,
    );
    state.notifier.notify(event, Some(&user)).await;

    Ok((
        StatusCode::CREATED,
        Json(PathContent {
            name: file_name,
            meta: PathMeta { is_directory: false },
        }),
    ))
}

pub async fn remove_file(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<FilePathRequest>,
) -> AppResult<StatusCode> {
    let resolved = state.resolve_for(&user, &req.file_path)?;

    let meta = metadata_of(&resolved.real_path, "directory/file must exist").await?;
    if meta.is_dir() {
        return Err(AppError::ValidationError("cannot be a directory".to_string()));
    }

    state.file_store.remove_file(&resolved.real_path).await?;

    let event = ChangeEvent::new(virtual_key(Path::new(&req.file_path))?, ChangeKind::Deleted, false);
    state.notifier.notify(event, Some(&user)).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn file_download_token(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<FilePathRequest>,
) -> AppResult<Json<DownloadTokenResponse>> {
    let resolved = state.resolve_for(&user, &req.file_path)?;

    let meta = metadata_of(&resolved.real_path, "directory/file must exist").await?;
    if meta.is_dir() {
        return Err(AppError::ValidationError("cannot be a directory".to_string()));
    }

    let token = state
        .tokens
        .create(resolved.real_path, Duration::minutes(DOWNLOAD_TOKEN_TTL_MINUTES));
    metrics::observe_token_issued();

    let event = ChangeEvent::new(
        virtual_key(Path::new(&req.file_path))?,
        ChangeKind::Downloaded,
        false,
    );
    state.notifier.notify(event, Some(&user)).await;

    Ok(Json(DownloadTokenResponse { token }))
}

/// 凭 token 的匿名下载。token 一经访问即作废；
/// 未签发过、已用过、已过期的 token 返回同样的 404。
pub async fn download_by_token(
    State(state): State<AppState>,
    UrlPath(token): UrlPath<String>,
) -> AppResult<Response> {
    let token_id = Uuid::parse_str(&token)
        .map_err(|_| AppError::ValidationError("malformed token".to_string()))?;

    let real_path = state.tokens.consume(token_id)?;

    let download_name = real_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    stream_file(&real_path, &download_name).await
}

#[derive(Debug, Serialize)]
pub struct ContentChangeResponse {
    pub path: String,
    pub change_kind: i64,
    pub is_dir: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ContentChange> for ContentChangeResponse {
    fn from(change: ContentChange) -> Self {
        Self {
            path: change.path,
            change_kind: change.change_kind,
            is_dir: change.is_dir,
            created_at: change.created_at,
        }
    }
}

pub async fn file_history(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<FilePathRequest>,
) -> AppResult<Json<Vec<ContentChangeResponse>>> {
    // 解析仅做授权检查，历史记录按归一化路径查
    state.resolve_for(&user, &req.file_path)?;

    let changes = state
        .db
        .get_changes_by_path(&virtual_key(Path::new(&req.file_path))?)
        .await?;
    Ok(Json(changes.into_iter().map(Into::into).collect()))
}

// ==================== 分享相关 ====================

pub async fn create_share(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateShareRequest>,
) -> AppResult<(StatusCode, Json<ShareResponse>)> {
    if matches!(req.uses_left, Some(n) if n <= 0) {
        return Err(AppError::ValidationError("uses_left must be positive".to_string()));
    }

    let resolved = state.resolve_for(&user, &req.file_path)?;
    let meta = metadata_of(&resolved.real_path, "directory/file must exist").await?;
    if meta.is_dir() {
        return Err(AppError::ValidationError("cannot be a directory".to_string()));
    }

    let share = Share {
        id: Uuid::new_v4().to_string(),
        virtual_path: virtual_key(Path::new(&req.file_path))?,
        expires_at: req.expires,
        uses_left: req.uses_left,
        created_at: Utc::now(),
    };
    state.db.create_share(&share).await?;

    let event = ChangeEvent::new(share.virtual_path.clone(), ChangeKind::Shared, false);
    state.notifier.notify(event, Some(&user)).await;

    Ok((StatusCode::CREATED, Json(share.into())))
}

/// 分享链接下载，不要求认证。过期/耗尽在服务端判定，
/// 记录在判定时惰性删除。
pub async fn get_share_by_id(
    State(state): State<AppState>,
    UrlPath(share_id): UrlPath<String>,
) -> AppResult<Response> {
    let id = Uuid::parse_str(&share_id)
        .map_err(|_| AppError::ValidationError("malformed share id".to_string()))?;

    let share = state.db.use_share(id).await?;

    let resolved = resolve_share_target(
        Path::new(&share.virtual_path),
        state.file_store.homes_dir(),
        state.file_store.shared_dir(),
    )?;

    // 目标文件已不在磁盘上:分享一并清理
    if fs::metadata(&resolved.real_path).await.is_err() {
        state.db.delete_share(id).await?;
        return Err(AppError::NotFound);
    }

    let download_name = resolved
        .real_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    stream_file(&resolved.real_path, &download_name).await
}

pub async fn delete_share(
    State(state): State<AppState>,
    Extension(_user): Extension<User>,
    UrlPath(share_id): UrlPath<String>,
) -> AppResult<StatusCode> {
    let id = Uuid::parse_str(&share_id)
        .map_err(|_| AppError::ValidationError("malformed share id".to_string()))?;

    state.db.delete_share(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
