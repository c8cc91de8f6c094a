// src/models/share.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// 持久化的分享记录（多次使用的下载链接）
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Share {
    pub id: String,
    pub virtual_path: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub uses_left: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Share {
    pub fn id_as_uuid(&self) -> Uuid {
        Uuid::parse_str(&self.id).unwrap_or_default()
    }

    /// 过期或次数耗尽的分享是终态，下次访问即删除
    pub fn is_terminal(&self, now: DateTime<Utc>) -> bool {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return true;
            }
        }
        matches!(self.uses_left, Some(n) if n <= 0)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub file_path: String,
    pub expires: Option<DateTime<Utc>>,
    pub uses_left: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub id: Uuid,
    pub path: String,
    pub expires: Option<DateTime<Utc>>,
    pub uses_left: Option<i64>,
}

impl From<Share> for ShareResponse {
    fn from(share: Share) -> Self {
        Self {
            id: share.id_as_uuid(),
            path: share.virtual_path,
            expires: share.expires_at,
            uses_left: share.uses_left,
        }
    }
}
