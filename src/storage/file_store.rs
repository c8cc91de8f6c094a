// src/storage/file_store.rs

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
pub struct PathMeta {
    pub is_directory: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathContent {
    pub name: String,
    pub meta: PathMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStats {
    pub bytes_size: u64,
    pub file_count: u64,
}

/// 真实文件系统操作。路径一律由调用方先经 resolver 解析。
pub struct FileStore {
    shared_dir: PathBuf,
    homes_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl FileStore {
    pub async fn new(config: &StorageConfig) -> AppResult<Self> {
        for dir in [&config.shared_dir, &config.homes_dir, &config.scratch_dir] {
            fs::create_dir_all(dir).await.map_err(|e| {
                AppError::InternalError(format!(
                    "Failed to create storage directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        // 规范化后 root guard 的相等比较才可靠
        Ok(Self {
            shared_dir: fs::canonicalize(&config.shared_dir).await?,
            homes_dir: fs::canonicalize(&config.homes_dir).await?,
            scratch_dir: fs::canonicalize(&config.scratch_dir).await?,
        })
    }

    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    pub fn homes_dir(&self) -> &Path {
        &self.homes_dir
    }

    /// 用户 home 在第一次使用时创建
    pub async fn ensure_user_home(&self, username: &str) -> AppResult<PathBuf> {
        let home = self.homes_dir.join(username);
        fs::create_dir_all(&home).await?;
        Ok(home)
    }

    pub async fn list_dir(&self, real_path: &Path) -> AppResult<Vec<PathContent>> {
        let mut entries = fs::read_dir(real_path).await?;
        let mut contents = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            contents.push(PathContent {
                name: entry.file_name().to_string_lossy().to_string(),
                meta: PathMeta {
                    is_directory: file_type.is_dir(),
                },
            });
        }
        contents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(contents)
    }

    pub async fn make_dir(&self, real_path: &Path) -> AppResult<()> {
        fs::create_dir_all(real_path).await?;
        Ok(())
    }

    pub async fn remove_dir(&self, real_path: &Path) -> AppResult<()> {
        fs::remove_dir_all(real_path).await?;
        Ok(())
    }

    pub async fn remove_file(&self, real_path: &Path) -> AppResult<()> {
        fs::remove_file(real_path).await?;
        Ok(())
    }

    pub async fn write_file(&self, real_path: &Path, data: &[u8]) -> AppResult<()> {
        if let Some(parent) = real_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(real_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(())
    }

    /// 目录统计（admin 用）。walkdir 在阻塞线程池里跑。
    pub async fn dir_stats(&self, real_path: &Path) -> AppResult<DirectoryStats> {
        let path = real_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut bytes_size = 0u64;
            let mut file_count = 0u64;
            for entry in WalkDir::new(&path).into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() {
                    file_count += 1;
                    if let Ok(meta) = entry.metadata() {
                        bytes_size += meta.len();
                    }
                }
            }
            DirectoryStats {
                bytes_size,
                file_count,
            }
        })
        .await
        .map_err(|e| AppError::InternalError(format!("stats task failed: {}", e)))
    }

    /// 把目录打成 zip 放进 scratch 目录，返回 zip 文件路径。
    /// 产物之后通过一次性下载 token 取走。
    pub async fn zip_dir(&self, real_path: &Path) -> AppResult<PathBuf> {
        let src = real_path.to_path_buf();
        let dest = self.scratch_dir.join(format!("{}.zip", Uuid::new_v4()));
        let out = dest.clone();

        tokio::task::spawn_blocking(move || zip_dir_blocking(&src, &out))
            .await
            .map_err(|e| AppError::InternalError(format!("zip task failed: {}", e)))??;

        Ok(dest)
    }
}

fn zip_dir_blocking(src: &Path, dest: &Path) -> AppResult<()> {
    let file = std::fs::File::create(dest)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| AppError::InternalError(format!("walk failed: {}", e)))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| AppError::InternalError(format!("bad zip entry path: {}", e)))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let name = relative.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .map_err(|e| AppError::InternalError(format!("zip write failed: {}", e)))?;
        } else if entry.file_type().is_file() {
            writer
                .start_file(name, options)
                .map_err(|e| AppError::InternalError(format!("zip write failed: {}", e)))?;
            let mut source = std::fs::File::open(entry.path())?;
            std::io::copy(&mut source, &mut writer)?;
        }
    }

    writer
        .finish()
        .map_err(|e| AppError::InternalError(format!("zip finish failed: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            shared_dir: dir.path().join("shared"),
            homes_dir: dir.path().join("homes"),
            scratch_dir: dir.path().join("scratch"),
        };
        let store = FileStore::new(&config).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_list_dir_and_write() {
        let (store, _dir) = create_test_store().await;
        let root = store.shared_dir().to_path_buf();

        store.make_dir(&root.join("docs")).await.unwrap();
        store.write_file(&root.join("a.txt"), b"hello").await.unwrap();

        let contents = store.list_dir(&root).await.unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0].name, "a.txt");
        assert!(!contents[0].meta.is_directory);
        assert_eq!(contents[1].name, "docs");
        assert!(contents[1].meta.is_directory);
    }

    #[tokio::test]
    async fn test_ensure_user_home_created_once() {
        let (store, _dir) = create_test_store().await;

        let home = store.ensure_user_home("alice").await.unwrap();
        assert!(home.is_dir());
        // 再次调用不报错
        let again = store.ensure_user_home("alice").await.unwrap();
        assert_eq!(home, again);
    }

    #[tokio::test]
    async fn test_dir_stats() {
        let (store, _dir) = create_test_store().await;
        let root = store.shared_dir().to_path_buf();

        store.write_file(&root.join("a.txt"), b"12345").await.unwrap();
        store.write_file(&root.join("sub/b.txt"), b"123").await.unwrap();

        let stats = store.dir_stats(&root).await.unwrap();
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.bytes_size, 8);
    }

    #[tokio::test]
    async fn test_zip_dir_contains_tree() {
        let (store, _dir) = create_test_store().await;
        let root = store.shared_dir().to_path_buf();

        store.write_file(&root.join("a.txt"), b"hello").await.unwrap();
        store.write_file(&root.join("sub/b.txt"), b"world").await.unwrap();

        let zip_path = store.zip_dir(&root).await.unwrap();
        assert!(zip_path.exists());

        let file = std::fs::File::open(&zip_path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"a.txt".to_string()));
        assert!(names.contains(&"sub/b.txt".to_string()));
    }
}
