// src/storage/database.rs

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tokio::fs;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use crate::models::{ContentChange, Share, User};
use crate::vfs::ChangeKind;

fn path_hash(path: &str) -> String {
    hex::encode(Sha256::digest(path.as_bytes()))
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> AppResult<Self> {
        // 确保数据库目录存在
        if let Some(parent) = Path::new(&config.path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::InternalError(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&format!("sqlite:{}?mode=rwc", config.path))
            .await?;

        // 启用 WAL 模式和外键约束
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn run_migrations(&self) -> AppResult<()> {
        self.create_tables().await?;
        Ok(())
    }

    async fn create_tables(&self) -> AppResult<()> {
        // Users 表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0,
                disabled INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Shares 表（持久化分享链接）
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS shares (
                id TEXT PRIMARY KEY,
                virtual_path TEXT NOT NULL,
                expires_at TEXT,
                uses_left INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Content Changes 表（审计记录）
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_changes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path_hash TEXT NOT NULL,
                path TEXT NOT NULL,
                change_kind INTEGER NOT NULL,
                is_dir INTEGER NOT NULL,
                triggered_by TEXT REFERENCES users(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_changes_path ON content_changes(path_hash)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_shares_path ON shares(virtual_path)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== 用户相关 ====================

    pub async fn create_user(&self, user: &User) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, is_admin, disabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(user.disabled)
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_user_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn list_users(&self) -> AppResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    pub async fn update_user_password(&self, username: &str, password_hash: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET password_hash = ?, updated_at = ? WHERE username = ?",
        )
        .bind(password_hash)
        .bind(Utc::now().to_rfc3339())
        .bind(username)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// 启动时保证默认管理员存在（已存在则原样返回）
    pub async fn ensure_default_admin(&self, username: &str, password_hash: &str) -> AppResult<User> {
        if let Some(user) = self.get_user_by_username(username).await? {
            return Ok(user);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            is_admin: true,
            disabled: false,
            created_at: now,
            updated_at: now,
        };
        self.create_user(&user).await?;
        tracing::info!("default admin account created: {}", username);
        Ok(user)
    }

    // ==================== 分享相关 ====================

    pub async fn create_share(&self, share: &Share) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO shares (id, virtual_path, expires_at, uses_left, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&share.id)
        .bind(&share.virtual_path)
        .bind(share.expires_at.map(|dt| dt.to_rfc3339()))
        .bind(share.uses_left)
        .bind(share.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_share(&self, id: Uuid) -> AppResult<Option<Share>> {
        let share = sqlx::query_as::<_, Share>("SELECT * FROM shares WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(share)
    }

    /// 取出分享并消耗一次使用额度。
    ///
    /// 递减是一条条件 UPDATE，SQLite 串行化写入，并发访问不会丢更新；
    /// 终态记录（过期/耗尽）在被访问到时惰性删除，统一返回 NotFound。
    pub async fn use_share(&self, id: Uuid) -> AppResult<Share> {
        let now = Utc::now();

        let mut share = self.get_share(id).await?.ok_or(AppError::NotFound)?;

        if share.is_terminal(now) {
            self.delete_share(id).await?;
            return Err(AppError::NotFound);
        }

        if let Some(uses) = share.uses_left {
            let updated = sqlx::query(
                r#"
                UPDATE shares SET uses_left = uses_left - 1
                WHERE id = ? AND uses_left > 0 AND (expires_at IS NULL OR expires_at > ?)
                "#,
            )
            .bind(id.to_string())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated == 0 {
                // 并发竞争下额度已被别人用完
                self.delete_share(id).await?;
                return Err(AppError::NotFound);
            }
            share.uses_left = Some(uses - 1);
        }

        Ok(share)
    }

    /// 删除分享；记录不存在不算错误
    pub async fn delete_share(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM shares WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_shares_by_path(&self, virtual_path: &str) -> AppResult<Vec<Share>> {
        let shares = sqlx::query_as::<_, Share>(
            "SELECT * FROM shares WHERE virtual_path = ? ORDER BY created_at DESC",
        )
        .bind(virtual_path)
        .fetch_all(&self.pool)
        .await?;
        Ok(shares)
    }

    // ==================== 审计相关 ====================

    pub async fn record_change(
        &self,
        virtual_path: &str,
        kind: ChangeKind,
        is_dir: bool,
        triggered_by: Option<&User>,
    ) -> AppResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_changes (path_hash, path, change_kind, is_dir, triggered_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(path_hash(virtual_path))
        .bind(virtual_path)
        .bind(kind.as_i64())
        .bind(is_dir)
        .bind(triggered_by.map(|u| u.id.clone()))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get_changes_by_path(&self, virtual_path: &str) -> AppResult<Vec<ContentChange>> {
        let changes = sqlx::query_as::<_, ContentChange>(
            "SELECT * FROM content_changes WHERE path_hash = ? ORDER BY created_at DESC",
        )
        .bind(path_hash(virtual_path))
        .fetch_all(&self.pool)
        .await?;
        Ok(changes)
    }
}
