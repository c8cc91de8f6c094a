// src/vfs/mod.rs

pub mod change;
pub mod resolver;
pub mod tokens;
pub mod watcher;

pub use change::{ChangeEvent, ChangeKind, ChangeNotifier};
pub use resolver::{
    is_protected_root, resolve, resolve_share_target, virtual_key, ResolvedPath, VirtualRoot,
};
pub use tokens::DownloadTokenStore;
pub use watcher::WatcherRegistry;
