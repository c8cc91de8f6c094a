// src/config.rs

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 共享根目录（所有用户可见）
    pub shared_dir: PathBuf,
    /// 各用户 home 根目录的父目录
    pub homes_dir: PathBuf,
    /// zip 导出等临时文件目录
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expire_minutes: i64,
    pub signups_allowed: bool,
    /// 启动时自动创建的管理员账号（可选）
    pub default_admin_username: Option<String>,
    pub default_admin_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// 是否把内容变更写入审计表
    pub enabled: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Arc<Self>> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("NIMBUS").separator("__"))
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(Arc::new(config))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                max_upload_bytes: 100 * 1024 * 1024, // 100MB
            },
            database: DatabaseConfig {
                path: "data/nimbus.db".to_string(),
                max_connections: 10,
            },
            storage: StorageConfig {
                shared_dir: PathBuf::from("data/shared"),
                homes_dir: PathBuf::from("data/homes"),
                scratch_dir: PathBuf::from("data/scratch"),
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                token_expire_minutes: 30,
                signups_allowed: true,
                default_admin_username: None,
                default_admin_password: None,
            },
            history: HistoryConfig { enabled: true },
        }
    }
}
