//! `GET /ws` — browser-facing WebSocket transport for the webchat channel.
//!
//! Unlike the platform adapters, webchat owns no transport of its own; this
//! handler is that transport. Each accepted socket becomes one connection id
//! driven through [`iris_webchat::WebchatAdapter::register`] /
//! `receive_message` / `unregister`.

use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tracing::warn;

use crate::app::AppState;

pub async fn webchat_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let Some(webchat) = state.webchat.clone() else {
        return (StatusCode::NOT_FOUND, "no webchat channel configured").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, webchat))
}

async fn handle_socket(socket: WebSocket, webchat: Arc<iris_webchat::WebchatAdapter>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let mut outbound = webchat.register(conn_id.clone());
    let (mut sink, mut stream) = socket.split();

    let forward_conn_id = conn_id.clone();
    let mut forward_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = forward_conn_id;
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!(conn_id = %conn_id, error = %e, "webchat socket read error");
                break;
            }
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(payload) => webchat.receive_message(&conn_id, payload).await,
                Err(e) => warn!(conn_id = %conn_id, error = %e, "invalid webchat frame"),
            },
            Message::Close(_) => break,
            _ => {}
        }

        if forward_task.is_finished() {
            break;
        }
    }

    forward_task.abort();
    webchat.unregister(&conn_id);
}
