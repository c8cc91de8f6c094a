// src/auth/middleware.rs

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::jwt::JwtService;
use crate::error::{AppError, AppResult};
use crate::models::User;
use crate::storage::Database;

#[derive(Clone)]
pub struct AuthState {
    pub jwt_service: Arc<JwtService>,
    pub db: Database,
}

/// 认证中间件 - 验证 JWT 并把当前用户放进 request extensions
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_token(&request)?;
    let token_data = auth_state.jwt_service.validate_token(&token)?;

    let user = auth_state
        .db
        .get_user_by_id(token_data.claims.sub)
        .await?
        .ok_or_else(|| AppError::AuthError("Could not validate credentials".to_string()))?;

    if user.disabled {
        return Err(AppError::AuthError("Inactive user".to_string()));
    }

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// 从请求中提取 token
fn extract_token(request: &Request) -> AppResult<String> {
    // 首先检查 Authorization header
    if let Some(auth_header) = request.headers().get(AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AppError::AuthError("Invalid authorization header".to_string()))?;

        if let Some(token) = auth_str.strip_prefix("Bearer ") {
            return Ok(token.to_string());
        }
    }

    // 检查查询参数（用于 WebSocket）
    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            let mut parts = pair.split('=');
            if let (Some("token"), Some(token)) = (parts.next(), parts.next()) {
                return Ok(token.to_string());
            }
        }
    }

    Err(AppError::AuthError("Missing authentication token".to_string()))
}

/// 管理员门槛，admin 路由在 handler 入口处调用
pub fn require_admin(user: &User) -> AppResult<()> {
    if !user.is_admin {
        return Err(AppError::PermissionDenied("Not admin".to_string()));
    }
    Ok(())
}
