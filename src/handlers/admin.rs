// src/handlers/admin.rs

use axum::{extract::State, Extension, Json};
use serde::Serialize;

use super::rest::AppState;
use crate::auth::require_admin;
use crate::error::AppResult;
use crate::models::User;

#[derive(Debug, Serialize)]
pub struct DirectoryStatsEntry {
    pub path: String,
    pub bytes_size: u64,
    pub file_count: u64,
}

#[derive(Debug, Serialize)]
pub struct RootStats {
    pub shared: DirectoryStatsEntry,
    pub homes: DirectoryStatsEntry,
}

/// GET /api/admin/stats/roots - 根目录占用统计
pub async fn root_stats(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Json<RootStats>> {
    require_admin(&user)?;

    let shared_dir = state.file_store.shared_dir();
    let homes_dir = state.file_store.homes_dir();

    let shared = state.file_store.dir_stats(shared_dir).await?;
    let homes = state.file_store.dir_stats(homes_dir).await?;

    Ok(Json(RootStats {
        shared: DirectoryStatsEntry {
            path: shared_dir.to_string_lossy().to_string(),
            bytes_size: shared.bytes_size,
            file_count: shared.file_count,
        },
        homes: DirectoryStatsEntry {
            path: homes_dir.to_string_lossy().to_string(),
            bytes_size: homes.bytes_size,
            file_count: homes.file_count,
        },
    }))
}
