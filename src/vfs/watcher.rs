// src/vfs/watcher.rs

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::change::{ChangeEvent, ChangeKind};

/// 服务端 -> 客户端的 watchdog 消息类型
pub const MSG_WATCHDOG_UPDATE: u8 = 1;

/// 推送给订阅连接的消息信封
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogMessage {
    pub message_type: u8,
    pub when: DateTime<Utc>,
    pub payload: WatchdogPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchdogPayload {
    pub path: String,
    pub change_kind: ChangeKind,
}

impl WatchdogMessage {
    pub fn update(event: &ChangeEvent) -> Self {
        Self {
            message_type: MSG_WATCHDOG_UPDATE,
            when: event.when,
            payload: WatchdogPayload {
                path: event.path.clone(),
                change_kind: event.kind,
            },
        }
    }
}

struct Watcher {
    directory: Option<String>,
    sender: mpsc::Sender<WatchdogMessage>,
}

#[derive(Default)]
struct Inner {
    // connection_id -> watcher
    watchers: HashMap<Uuid, Watcher>,
    // directory key -> 订阅该目录的连接
    members: HashMap<String, HashSet<Uuid>>,
}

impl Inner {
    fn remove_membership(&mut self, id: Uuid, directory: &str) {
        if let Some(set) = self.members.get_mut(directory) {
            set.remove(&id);
            if set.is_empty() {
                self.members.remove(directory);
            }
        }
    }
}

/// 目录订阅注册表。
///
/// 一个连接同时只订阅一个目录；换目录通过 move_to，断开时清掉所有成员关系。
pub struct WatcherRegistry {
    inner: RwLock<Inner>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// 注册连接，可以带初始订阅目录。
    pub async fn connect(
        &self,
        sender: mpsc::Sender<WatchdogMessage>,
        directory: Option<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.inner.write().await;
        if let Some(dir) = &directory {
            inner.members.entry(dir.clone()).or_default().insert(id);
        }
        inner.watchers.insert(id, Watcher { directory, sender });
        tracing::debug!("watcher connected: id={}, total={}", id, inner.watchers.len());
        id
    }

    /// 把连接移动到新目录（None = 哨兵态，不订阅任何目录）。
    pub async fn move_to(&self, id: Uuid, new_directory: Option<String>) {
        let mut inner = self.inner.write().await;
        let old_directory = match inner.watchers.get(&id) {
            Some(watcher) => watcher.directory.clone(),
            None => return,
        };
        if let Some(dir) = &old_directory {
            inner.remove_membership(id, dir);
        }
        if let Some(dir) = &new_directory {
            inner.members.entry(dir.clone()).or_default().insert(id);
        }
        if let Some(watcher) = inner.watchers.get_mut(&id) {
            watcher.directory = new_directory;
        }
    }

    /// 注销连接。连接从未完整注册时调用也安全。
    pub async fn disconnect(&self, id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(watcher) = inner.watchers.remove(&id) {
            if let Some(dir) = &watcher.directory {
                inner.remove_membership(id, dir);
            }
            tracing::debug!("watcher disconnected: id={}, total={}", id, inner.watchers.len());
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.watchers.len()
    }

    /// 给目录的所有订阅者投递；directory 为 None 时全局广播。
    ///
    /// 先在读锁内拍快照再发送，单个连接失败不影响其他投递，
    /// 失败的连接在投递结束后被注销。
    pub async fn broadcast(&self, message: WatchdogMessage, directory: Option<&str>) {
        let targets: Vec<(Uuid, mpsc::Sender<WatchdogMessage>)> = {
            let inner = self.inner.read().await;
            match directory {
                Some(dir) => inner
                    .members
                    .get(dir)
                    .map(|ids| {
                        ids.iter()
                            .filter_map(|id| {
                                inner.watchers.get(id).map(|w| (*id, w.sender.clone()))
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
                None => inner
                    .watchers
                    .iter()
                    .map(|(id, w)| (*id, w.sender.clone()))
                    .collect(),
            }
        };

        let mut failed = Vec::new();
        for (id, sender) in targets {
            if sender.send(message.clone()).await.is_err() {
                failed.push(id);
            }
        }

        for id in failed {
            tracing::warn!("watcher send failed, dropping connection: id={}", id);
            self.disconnect(id).await;
        }
    }

    /// 把变更事件广播给受影响路径及其所有祖先目录的订阅者。
    ///
    /// 显式按 '/' 前缀逐级回退，终止在最后一段（不含空前缀）。
    pub async fn propagate_change(&self, event: &ChangeEvent) {
        let message = WatchdogMessage::update(event);
        let mut prefix = event.path.as_str();
        if prefix.is_empty() {
            return;
        }
        loop {
            self.broadcast(message.clone(), Some(prefix)).await;
            match prefix.rfind('/') {
                Some(idx) => prefix = &prefix[..idx],
                None => break,
            }
        }
    }
}

impl Default for WatcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_event(path: &str) -> ChangeEvent {
        ChangeEvent::new(path.to_string(), ChangeKind::Created, false)
    }

    async fn watch(
        registry: &WatcherRegistry,
        directory: Option<&str>,
    ) -> (Uuid, mpsc::Receiver<WatchdogMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let id = registry.connect(tx, directory.map(str::to_string)).await;
        (id, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<WatchdogMessage>) -> usize {
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    #[tokio::test]
    async fn test_propagation_reaches_ancestors_exactly_once() {
        let registry = WatcherRegistry::new();
        let (_a, mut rx_a) = watch(&registry, Some("shared")).await;
        let (_b, mut rx_b) = watch(&registry, Some("shared/a")).await;
        let (_c, mut rx_c) = watch(&registry, Some("shared/a/b")).await;
        let (_d, mut rx_d) = watch(&registry, Some("shared/other")).await;

        registry
            .propagate_change(&test_event("shared/a/b/file.txt"))
            .await;

        assert_eq!(drain(&mut rx_a), 1);
        assert_eq!(drain(&mut rx_b), 1);
        assert_eq!(drain(&mut rx_c), 1);
        assert_eq!(drain(&mut rx_d), 0);
    }

    #[tokio::test]
    async fn test_disconnected_watcher_not_notified() {
        let registry = WatcherRegistry::new();
        let (id, mut rx) = watch(&registry, Some("shared")).await;
        registry.disconnect(id).await;

        registry.propagate_change(&test_event("shared/file.txt")).await;
        assert_eq!(drain(&mut rx), 0);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_connection_is_safe() {
        let registry = WatcherRegistry::new();
        registry.disconnect(Uuid::new_v4()).await;
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_move_changes_delivery() {
        let registry = WatcherRegistry::new();
        let (id, mut rx) = watch(&registry, Some("shared/a")).await;

        registry.move_to(id, Some("shared/b".to_string())).await;

        registry.propagate_change(&test_event("shared/a/x.txt")).await;
        assert_eq!(drain(&mut rx), 0);

        registry.propagate_change(&test_event("shared/b/y.txt")).await;
        assert_eq!(drain(&mut rx), 1);

        // 移到哨兵态后不再收到目录广播
        registry.move_to(id, None).await;
        registry.propagate_change(&test_event("shared/b/z.txt")).await;
        assert_eq!(drain(&mut rx), 0);
    }

    #[tokio::test]
    async fn test_global_broadcast_reaches_all() {
        let registry = WatcherRegistry::new();
        let (_a, mut rx_a) = watch(&registry, Some("shared")).await;
        let (_b, mut rx_b) = watch(&registry, None).await;

        let message = WatchdogMessage::update(&test_event("shared/file.txt"));
        registry.broadcast(message, None).await;

        assert_eq!(drain(&mut rx_a), 1);
        assert_eq!(drain(&mut rx_b), 1);
    }

    #[tokio::test]
    async fn test_failed_send_drops_connection_without_aborting() {
        let registry = WatcherRegistry::new();
        let (_alive, mut rx_alive) = watch(&registry, Some("shared")).await;

        let (dead_id, rx_dead) = watch(&registry, Some("shared")).await;
        drop(rx_dead);

        registry.propagate_change(&test_event("shared/file.txt")).await;

        assert_eq!(drain(&mut rx_alive), 1);
        assert_eq!(registry.connection_count().await, 1);

        // dead 连接已被注销
        let inner = registry.inner.read().await;
        assert!(!inner.watchers.contains_key(&dead_id));
    }
}
