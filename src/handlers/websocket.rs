// src/handlers/websocket.rs

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::borrow::Cow;
use std::path::Path;
use tokio::fs;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::rest::AppState;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::User;
use crate::vfs::{resolve, virtual_key, watcher::WatchdogMessage};

/// 客户端 -> 服务端的消息类型
const MSG_DIRECTORY_CHANGE: u8 = 1;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

/// 客户端消息信封
#[derive(Debug, Deserialize)]
struct ClientEnvelope {
    message_type: u8,
    #[allow(dead_code)]
    when: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DirectoryChangePayload {
    directory: String,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    // 握手前验证 token 并加载用户
    let token_data = state.jwt_service.validate_token(&query.token)?;
    let user = state
        .db
        .get_user_by_id(token_data.claims.sub)
        .await?
        .ok_or_else(|| AppError::AuthError("Could not validate credentials".to_string()))?;
    if user.disabled {
        return Err(AppError::AuthError("Inactive user".to_string()));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, state)))
}

async fn handle_socket(socket: WebSocket, user: User, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<WatchdogMessage>(32);

    // 先注册为哨兵态，订阅目录由客户端之后指定
    let connection_id = state.watchers.connect(tx, None).await;
    metrics::watchdog_connected();
    tracing::info!("watchdog connected: user={}, connection={}", user.username, connection_id);

    let mut policy_violation = false;

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => match serde_json::to_string(&message) {
                        Ok(json) => {
                            if ws_sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::error!("failed to serialize watchdog message: {}", e);
                        }
                    },
                    // 广播失败时注册表会把我们注销掉,发送端随之关闭
                    None => break,
                }
            }
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&text, &user, connection_id, &state).await {
                            tracing::warn!(
                                "watchdog policy violation: user={}, error={}",
                                user.username,
                                e
                            );
                            policy_violation = true;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Ping/Pong 由 axum 自动处理
                    }
                    Some(Err(e)) => {
                        tracing::warn!("watchdog socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    if policy_violation {
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: Cow::from("policy violation"),
            })))
            .await;
    }

    state.watchers.disconnect(connection_id).await;
    metrics::watchdog_disconnected();
    tracing::info!(
        "watchdog disconnected: user={}, connection={}",
        user.username,
        connection_id
    );
}

/// 处理一条客户端消息。
///
/// 格式错误的消息只记日志不断连；返回 Err 表示策略违规，连接会以
/// policy-violation 码关闭。
async fn handle_client_message(
    text: &str,
    user: &User,
    connection_id: Uuid,
    state: &AppState,
) -> AppResult<()> {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("invalid ws message received: {}", e);
            return Ok(());
        }
    };

    match envelope.message_type {
        MSG_DIRECTORY_CHANGE => {
            let payload: DirectoryChangePayload = match serde_json::from_value(envelope.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("invalid ws payload received: {}", e);
                    return Ok(());
                }
            };

            // 未知根/不存在的目录视为策略违规
            let resolved = resolve(
                Path::new(&payload.directory),
                state.file_store.homes_dir(),
                state.file_store.shared_dir(),
                &user.username,
            )?;
            let meta = fs::metadata(&resolved.real_path)
                .await
                .map_err(|_| AppError::PathNotFound("directory must exist".to_string()))?;
            if !meta.is_dir() {
                return Err(AppError::ValidationError("path must be a directory".to_string()));
            }

            let directory = virtual_key(Path::new(&payload.directory))?;
            state.watchers.move_to(connection_id, Some(directory)).await;
        }
        other => {
            tracing::warn!("unhandled ws message type: {}", other);
        }
    }

    Ok(())
}
