// src/vfs/tokens.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

struct TokenEntry {
    real_path: PathBuf,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct TokenMap {
    entries: HashMap<Uuid, TokenEntry>,
    /// 按过期时间排序的小顶堆，insert 时摊还清理。
    /// 已被 consume 的 token 会留下陈旧堆条目，弹出时跳过。
    expiry: BinaryHeap<Reverse<(DateTime<Utc>, Uuid)>>,
}

/// 一次性下载 token 存储。
///
/// token 授权一次后续的匿名下载：第一次 consume 即移除，无论是否过期。
/// 不提供枚举接口。
pub struct DownloadTokenStore {
    inner: Mutex<TokenMap>,
}

impl DownloadTokenStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(TokenMap::default()),
        }
    }

    /// 签发 token。插入前先把已过期的条目清掉（惰性回收，无后台定时器）。
    pub fn create(&self, real_path: PathBuf, ttl: Duration) -> Uuid {
        let now = Utc::now();
        let mut map = self.inner.lock();

        while let Some(Reverse((expires_at, id))) = map.expiry.peek().copied() {
            if expires_at > now {
                break;
            }
            map.expiry.pop();
            if let Some(entry) = map.entries.get(&id) {
                if entry.expires_at <= now {
                    map.entries.remove(&id);
                }
            }
        }

        let id = Uuid::new_v4();
        let expires_at = now + ttl;
        map.entries.insert(
            id,
            TokenEntry {
                real_path,
                expires_at,
            },
        );
        map.expiry.push(Reverse((expires_at, id)));
        id
    }

    /// 消费 token：先移除再查过期，过期的 token 被访问一次也同样作废。
    /// 不存在与已过期对调用方不可区分。
    pub fn consume(&self, id: Uuid) -> AppResult<PathBuf> {
        let entry = self.inner.lock().entries.remove(&id);
        match entry {
            Some(entry) if entry.expires_at > Utc::now() => Ok(entry.real_path),
            _ => Err(AppError::NotFound),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl Default for DownloadTokenStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_consume_once() {
        let store = DownloadTokenStore::new();
        let path = PathBuf::from("/data/shared/report.pdf");

        let id = store.create(path.clone(), Duration::minutes(4));
        assert_eq!(store.consume(id).unwrap(), path);

        // 第二次必须失败
        assert!(matches!(store.consume(id), Err(AppError::NotFound)));
    }

    #[test]
    fn test_unknown_token() {
        let store = DownloadTokenStore::new();
        assert!(matches!(store.consume(Uuid::new_v4()), Err(AppError::NotFound)));
    }

    #[test]
    fn test_zero_ttl_never_consumable() {
        let store = DownloadTokenStore::new();
        let id = store.create(PathBuf::from("/data/x"), Duration::zero());
        assert!(matches!(store.consume(id), Err(AppError::NotFound)));
    }

    #[test]
    fn test_expired_entries_swept_on_create() {
        let store = DownloadTokenStore::new();
        for i in 0..8 {
            store.create(PathBuf::from(format!("/data/{i}")), Duration::zero());
        }
        assert_eq!(store.len(), 8);

        // 新的 create 会把已过期的全部清掉
        store.create(PathBuf::from("/data/live"), Duration::minutes(4));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_consume_single_winner() {
        let store = Arc::new(DownloadTokenStore::new());
        let id = store.create(PathBuf::from("/data/once"), Duration::minutes(4));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.consume(id).is_ok() }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
