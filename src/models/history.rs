// src/models/history.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// 内容变更审计记录
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ContentChange {
    pub id: i64,
    #[serde(skip_serializing)]
    pub path_hash: String,
    pub path: String,
    pub change_kind: i64,
    pub is_dir: bool,
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
}
