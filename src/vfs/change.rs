// src/vfs/change.rs

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::watcher::WatcherRegistry;
use crate::metrics;
use crate::models::User;
use crate::storage::Database;

/// 内容变更类型，与客户端约定的整数编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Other,
    Created,
    Deleted,
    Downloaded,
    Shared,
}

impl ChangeKind {
    pub fn as_i64(self) -> i64 {
        match self {
            ChangeKind::Other => 0,
            ChangeKind::Created => 1,
            ChangeKind::Deleted => 2,
            ChangeKind::Downloaded => 3,
            ChangeKind::Shared => 4,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ChangeKind::Other),
            1 => Some(ChangeKind::Created),
            2 => Some(ChangeKind::Deleted),
            3 => Some(ChangeKind::Downloaded),
            4 => Some(ChangeKind::Shared),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChangeKind::Other => "other",
            ChangeKind::Created => "created",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Downloaded => "downloaded",
            ChangeKind::Shared => "shared",
        };
        write!(f, "{label}")
    }
}

impl Serialize for ChangeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for ChangeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        ChangeKind::from_i64(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown change kind: {value}")))
    }
}

/// 一次内容变更。产生后立即用于广播与审计，不落地保存。
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    /// 归一化的虚拟路径（`shared/a/b.txt` 形式）
    pub path: String,
    pub kind: ChangeKind,
    pub is_dir: bool,
    pub when: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(path: String, kind: ChangeKind, is_dir: bool) -> Self {
        Self {
            path,
            kind,
            is_dir,
            when: Utc::now(),
        }
    }
}

/// 变更通知器：审计（可选）+ 订阅广播。
pub struct ChangeNotifier {
    registry: Arc<WatcherRegistry>,
    db: Database,
    history_enabled: bool,
}

impl ChangeNotifier {
    pub fn new(registry: Arc<WatcherRegistry>, db: Database, history_enabled: bool) -> Self {
        Self {
            registry,
            db,
            history_enabled,
        }
    }

    /// 文件操作成功之后调用。
    ///
    /// 审计写入失败只记日志：通知和已完成的文件操作都不因它回滚。
    pub async fn notify(&self, event: ChangeEvent, actor: Option<&User>) {
        if self.history_enabled {
            if let Err(e) = self
                .db
                .record_change(&event.path, event.kind, event.is_dir, actor)
                .await
            {
                tracing::warn!("failed to record content change for {}: {}", event.path, e);
            }
        }

        metrics::observe_change_event(event.kind);
        self.registry.propagate_change(&event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kind_round_trip() {
        for kind in [
            ChangeKind::Other,
            ChangeKind::Created,
            ChangeKind::Deleted,
            ChangeKind::Downloaded,
            ChangeKind::Shared,
        ] {
            assert_eq!(ChangeKind::from_i64(kind.as_i64()), Some(kind));
        }
        assert_eq!(ChangeKind::from_i64(99), None);
    }

    #[test]
    fn test_change_kind_wire_encoding() {
        // 与客户端约定的整数编码不能变
        let json = serde_json::to_string(&ChangeKind::Downloaded).unwrap();
        assert_eq!(json, "3");

        let kind: ChangeKind = serde_json::from_str("4").unwrap();
        assert_eq!(kind, ChangeKind::Shared);
        assert!(serde_json::from_str::<ChangeKind>("9").is_err());
    }
}
