// src/server.rs

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::auth::{auth_middleware, AuthState};
use crate::handlers::{admin, health, rest, websocket};
use crate::handlers::rest::AppState;
use crate::metrics;

/// 组装完整路由。
///
/// /api 下分公开路由（版本、登录、token/分享下载、ws 握手）和
/// 需要认证的路由；认证中间件只挂在后者上。
pub fn build_router(state: AppState) -> Router {
    let auth_state = AuthState {
        jwt_service: state.jwt_service.clone(),
        db: state.db.clone(),
    };

    let public = Router::new()
        .route("/version", get(rest::api_version))
        .route("/auth/token", post(rest::login))
        .route("/auth/create-account", post(rest::create_account))
        .route("/file/download/by-token/:token", get(rest::download_by_token))
        .route("/share/:share_id", get(rest::get_share_by_id))
        .route("/ws", get(websocket::websocket_handler));

    let authed = Router::new()
        .route("/users/me", get(rest::get_me))
        .route("/directory/roots", get(rest::get_roots))
        .route("/directory/contents", post(rest::get_directory_contents))
        .route("/directory/mkdir", post(rest::make_directory))
        .route("/directory/rm", post(rest::remove_directory))
        .route("/directory/download/new-token", post(rest::directory_download_token))
        .route("/file/upload/overwrite", post(rest::upload_overwrite))
        .route("/file/rm", post(rest::remove_file))
        .route("/file/download/new-token", post(rest::file_download_token))
        .route("/file/history", post(rest::file_history))
        .route("/file/share/new", post(rest::create_share))
        .route("/file/share/:share_id", delete(rest::delete_share))
        .nest(
            "/admin",
            Router::new().route("/stats/roots", get(admin::root_stats)),
        )
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api", public.merge(authed))
        // 全局中间件
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(state.config.server.max_upload_bytes))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::auth::{hash_password, JwtService};
    use crate::config::{Config, DatabaseConfig, StorageConfig};
    use crate::models::User;
    use crate::storage::{Database, FileStore};
    use crate::vfs::{ChangeNotifier, DownloadTokenStore, WatcherRegistry};

    struct TestEnv {
        state: AppState,
        _temp_dir: TempDir,
    }

    async fn create_test_env() -> TestEnv {
        let temp_dir = TempDir::new().unwrap();
        let config = Arc::new(Config {
            database: DatabaseConfig {
                path: temp_dir.path().join("test.db").to_string_lossy().to_string(),
                max_connections: 1,
            },
            storage: StorageConfig {
                shared_dir: temp_dir.path().join("shared"),
                homes_dir: temp_dir.path().join("homes"),
                scratch_dir: temp_dir.path().join("scratch"),
            },
            ..Config::default()
        });

        let db = Database::new(&config.database).await.unwrap();
        db.run_migrations().await.unwrap();

        let file_store = Arc::new(FileStore::new(&config.storage).await.unwrap());
        let watchers = Arc::new(WatcherRegistry::new());
        let notifier = Arc::new(ChangeNotifier::new(
            watchers.clone(),
            db.clone(),
            config.history.enabled,
        ));
        let state = AppState {
            config: config.clone(),
            db: db.clone(),
            file_store,
            tokens: Arc::new(DownloadTokenStore::new()),
            watchers,
            notifier,
            jwt_service: Arc::new(JwtService::new(&config.auth)),
        };

        TestEnv {
            state,
            _temp_dir: temp_dir,
        }
    }

    async fn create_test_user(env: &TestEnv, username: &str) -> (User, String) {
        let now = chrono::Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: hash_password("password123").unwrap(),
            is_admin: false,
            disabled: false,
            created_at: now,
            updated_at: now,
        };
        env.state.db.create_user(&user).await.unwrap();
        env.state.file_store.ensure_user_home(username).await.unwrap();

        let token = env.state.jwt_service.generate_token(&user).unwrap();
        (user, token)
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let env = create_test_env().await;
        let app = build_router(env.state.clone());

        let response = app
            .oneshot(Request::get("/api/version").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_authed_route_rejects_anonymous() {
        let env = create_test_env().await;
        let app = build_router(env.state.clone());

        let response = app
            .oneshot(Request::get("/api/users/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_root_is_bad_request() {
        let env = create_test_env().await;
        let (_user, token) = create_test_user(&env, "alice").await;
        let app = build_router(env.state.clone());

        let response = app
            .oneshot(
                Request::post("/api/directory/contents")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"directory": "outside/etc"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_root_deletion_is_rejected() {
        let env = create_test_env().await;
        let (_user, token) = create_test_user(&env, "alice").await;
        let app = build_router(env.state.clone());

        for root in ["shared", "homes/alice"] {
            let response = app
                .clone()
                .oneshot(
                    Request::post("/api/directory/rm")
                        .header(header::AUTHORIZATION, format!("Bearer {}", token))
                        .header(header::CONTENT_TYPE, "application/json")
                        .body(Body::from(format!(r#"{{"directory": "{}"}}"#, root)))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "root: {root}");
            // 根目录必须原样保留
        }
        assert!(env.state.file_store.shared_dir().is_dir());
        assert!(env.state.file_store.homes_dir().join("alice").is_dir());
    }

    #[tokio::test]
    async fn test_download_token_end_to_end() {
        let env = create_test_env().await;
        let (_user, token) = create_test_user(&env, "alice").await;

        // 准备 homes/alice/report.pdf
        let report = env
            .state
            .file_store
            .homes_dir()
            .join("alice")
            .join("report.pdf");
        env.state
            .file_store
            .write_file(&report, b"pdf-bytes")
            .await
            .unwrap();

        let app = build_router(env.state.clone());

        // 1. 申请下载 token
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/file/download/new-token")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"file_path": "homes/alice/report.pdf"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let download_token = json["token"].as_str().unwrap().to_string();

        // 2. 第一次匿名下载成功并拿到文件内容
        let uri = format!("/api/file/download/by-token/{}", download_token);
        let response = app
            .clone()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"pdf-bytes");

        // 3. 重复同一个 token 是 404
        let response = app
            .clone()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // 4. 畸形 token 是 400
        let response = app
            .oneshot(
                Request::get("/api/file/download/by-token/not-a-uuid")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_share_link_end_to_end() {
        let env = create_test_env().await;
        let (_user, token) = create_test_user(&env, "alice").await;

        let target = env.state.file_store.shared_dir().join("notes.txt");
        env.state
            .file_store
            .write_file(&target, b"shared-notes")
            .await
            .unwrap();

        let app = build_router(env.state.clone());

        // 创建一次性分享
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/file/share/new")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"file_path": "shared/notes.txt", "uses_left": 1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let share_id = json["id"].as_str().unwrap().to_string();

        // 匿名访问一次成功
        let uri = format!("/api/share/{}", share_id);
        let response = app
            .clone()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"shared-notes");

        // 次数耗尽后 404，且记录已删除
        let response = app
            .clone()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let id = uuid::Uuid::parse_str(&share_id).unwrap();
        assert!(env.state.db.get_share(id).await.unwrap().is_none());
    }
}
