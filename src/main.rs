// src/main.rs

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nimbusd::auth::{hash_password, JwtService};
use nimbusd::cli::{Cli, CliHandler, Commands};
use nimbusd::config::Config;
use nimbusd::handlers::rest::AppState;
use nimbusd::metrics::init_metrics;
use nimbusd::server::build_router;
use nimbusd::storage::{Database, FileStore};
use nimbusd::vfs::{ChangeNotifier, DownloadTokenStore, WatcherRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nimbusd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 加载配置
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Arc::new(Config::default())
    });

    // 初始化数据库
    let db = Database::new(&config.database).await?;
    db.run_migrations().await?;

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::User(user_cmd)) => {
            let handler = CliHandler::new(db);
            handler.handle_user_command(user_cmd).await?;
            Ok(())
        }
        Some(Commands::Server) | None => run_server(config, db).await,
    }
}

async fn run_server(config: Arc<Config>, db: Database) -> anyhow::Result<()> {
    init_metrics();

    tracing::info!("Starting nimbusd v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Server configuration: {}:{}", config.server.host, config.server.port);
    tracing::info!("Database path: {}", config.database.path);
    tracing::info!("Shared root: {:?}", config.storage.shared_dir);
    tracing::info!("Homes root: {:?}", config.storage.homes_dir);

    // 初始化文件存储（建根目录并规范化路径）
    let file_store = Arc::new(FileStore::new(&config.storage).await?);
    tracing::info!("File store initialized");

    // 默认管理员
    if let (Some(username), Some(password)) = (
        config.auth.default_admin_username.as_deref(),
        config.auth.default_admin_password.as_deref(),
    ) {
        let password_hash = hash_password(password)?;
        db.ensure_default_admin(username, &password_hash).await?;
        file_store.ensure_user_home(username).await?;
    }

    // 核心服务对象都在这里构造一次，之后只通过 state 传递
    let tokens = Arc::new(DownloadTokenStore::new());
    let watchers = Arc::new(WatcherRegistry::new());
    let notifier = Arc::new(ChangeNotifier::new(
        watchers.clone(),
        db.clone(),
        config.history.enabled,
    ));
    let jwt_service = Arc::new(JwtService::new(&config.auth));

    let state = AppState {
        config: config.clone(),
        db,
        file_store,
        tokens,
        watchers,
        notifier,
        jwt_service,
    };

    let app = build_router(state);

    // 启动服务器
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // 优雅关闭
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        tracing::info!("Shutdown signal received, starting graceful shutdown...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}
