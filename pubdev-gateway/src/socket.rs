//! Websocket upgrades onto workspace gateways.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        FromRequestParts,
    },
    http::{header, request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use pubdev_core::{ScriptPath, WorkspaceId};
use pubdev_host::{Gateway, GatewayMultiplexer, Outbound, CLOSE_REASON};
use tokio::sync::mpsc;

use crate::error::GatewayError;

/// How long a closing connection may spend flushing queued frames.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// True if the request asks to switch to the websocket protocol.
#[must_use]
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

/// Accept an upgrade at `path` if the workspace has an open gateway there.
///
/// # Errors
/// Returns [`GatewayError::NoGateway`] if nothing is listening at `path`.
pub async fn upgrade(
    multiplexer: &GatewayMultiplexer,
    workspace: &WorkspaceId,
    path: &ScriptPath,
    parts: &mut Parts,
) -> Result<Response, GatewayError> {
    let gateway = multiplexer
        .resolve(workspace, path)
        .ok_or_else(|| GatewayError::NoGateway(format!("{workspace}/{path}")))?;
    let ws = match WebSocketUpgrade::from_request_parts(parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    tracing::debug!(gateway = %gateway.key(), "websocket upgrade accepted");
    Ok(ws.on_upgrade(move |socket| serve_client(gateway, socket)))
}

/// Pump one client's socket until it closes.
async fn serve_client(gateway: Arc<Gateway>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let client = match gateway.connect(tx).await {
        Ok(client) => client,
        Err(e) => {
            tracing::debug!(gateway = %gateway.key(), error = %e, "gateway closed before connect");
            let frame = CloseFrame { code: close_code::AWAY, reason: CLOSE_REASON.into() };
            let _ = sink.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(reason) => {
                    let frame = CloseFrame { code: close_code::NORMAL, reason: reason.into() };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let mut reason = String::new();
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => gateway.message(client, text.as_str().to_owned()).await,
            Ok(Message::Binary(bytes)) => {
                gateway.message(client, String::from_utf8_lossy(&bytes).into_owned()).await;
            }
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame {
                    reason = frame.reason.as_str().to_owned();
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                reason = e.to_string();
                break;
            }
        }
    }

    // Unregistering drops the client's only sender, so the writer flushes
    // whatever is still queued and then stops on its own.
    gateway.disconnect(client, reason).await;
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        tracing::debug!(gateway = %gateway.key(), client = %client, "writer did not drain in time");
        writer.abort();
    }
}
