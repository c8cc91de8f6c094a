// src/vfs/resolver.rs

use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, AppResult};

/// 虚拟路径所属的根
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualRoot {
    Shared,
    Home(String),
}

/// 解析结果，只能由 resolve 构造
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub real_path: PathBuf,
    pub root: VirtualRoot,
    pub is_root: bool,
}

/// 把虚拟路径拆成普通段。
///
/// 只接受 `Component::Normal`：`..`、绝对前缀、盘符一律拒绝，
/// 拼接结果因此不可能逃出匹配到的根目录。
fn split_segments(virtual_path: &Path) -> AppResult<Vec<&str>> {
    let mut segments = Vec::new();
    for component in virtual_path.components() {
        match component {
            Component::Normal(segment) => {
                let segment = segment
                    .to_str()
                    .ok_or_else(|| AppError::ValidationError("path is not valid UTF-8".to_string()))?;
                segments.push(segment);
            }
            Component::CurDir => continue,
            _ => {
                return Err(AppError::PathNotFound("invalid path segment".to_string()));
            }
        }
    }
    Ok(segments)
}

fn root_label(root: &Path) -> AppResult<&str> {
    root.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AppError::InternalError(format!("root directory has no label: {}", root.display())))
}

/// 把客户端传来的虚拟路径映射成真实文件系统路径。
///
/// 第一段等于共享根的目录名 -> 共享根下；前两段等于 (homes 目录名, 用户名)
/// -> 该用户 home 下；其余情况都是未知根。不做任何文件系统存在性检查，
/// 存在/类型检查由调用方在解析之后完成。
pub fn resolve(
    virtual_path: &Path,
    homes_root: &Path,
    shared_root: &Path,
    username: &str,
) -> AppResult<ResolvedPath> {
    let segments = split_segments(virtual_path)?;
    let shared_label = root_label(shared_root)?;
    let homes_label = root_label(homes_root)?;

    if let Some(first) = segments.first() {
        if *first == shared_label {
            let remainder = &segments[1..];
            let mut real_path = shared_root.to_path_buf();
            for segment in remainder {
                real_path.push(segment);
            }
            return Ok(ResolvedPath {
                real_path,
                root: VirtualRoot::Shared,
                is_root: remainder.is_empty(),
            });
        }
        if *first == homes_label && segments.get(1).map(|s| *s) == Some(username) {
            let remainder = &segments[2..];
            let mut real_path = homes_root.join(username);
            for segment in remainder {
                real_path.push(segment);
            }
            return Ok(ResolvedPath {
                real_path,
                root: VirtualRoot::Home(username.to_string()),
                is_root: remainder.is_empty(),
            });
        }
    }

    Err(AppError::PathNotFound("unknown root directory".to_string()))
}

/// 判断绝对路径是否正好是受保护的租户根。
///
/// 共享根、homes 根、`homes/<username>` 三者禁止删除。
pub fn is_protected_root(
    absolute_path: &Path,
    homes_root: &Path,
    shared_root: &Path,
    username: &str,
) -> bool {
    absolute_path == shared_root
        || absolute_path == homes_root
        || absolute_path == homes_root.join(username)
}

/// 归一化虚拟路径，作为订阅/广播的目录键（`shared/a/b` 形式）。
pub fn virtual_key(virtual_path: &Path) -> AppResult<String> {
    Ok(split_segments(virtual_path)?.join("/"))
}

/// 分享链接的匿名解析：没有已登录的主体，homes 下的用户名取自路径本身。
/// 只用于已经在创建分享时通过授权的虚拟路径。
pub fn resolve_share_target(
    virtual_path: &Path,
    homes_root: &Path,
    shared_root: &Path,
) -> AppResult<ResolvedPath> {
    let segments = split_segments(virtual_path)?;
    if let Some(first) = segments.first() {
        if *first == root_label(homes_root)? {
            if let Some(username) = segments.get(1) {
                return resolve(virtual_path, homes_root, shared_root, username);
            }
        }
    }
    // 其余情况（共享根或未知根）与正常解析一致
    resolve(virtual_path, homes_root, shared_root, "")
}
