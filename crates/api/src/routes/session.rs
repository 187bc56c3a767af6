//! Interview Session WebSocket
//!
//! `/ws/video` carries one interview session. The client streams frames
//! and session commands as JSON with a `type` tag; the server answers with
//! per-frame `metrics`, `analytics` on end/stop, and `error`.

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use engagement::{FrameMetrics, SessionAnalytics, SessionWorker};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

/// Outbound messages buffered per connection
const WS_SEND_BUFFER_SIZE: usize = 32;
/// Push interval of `/ws/metrics`
const METRICS_PUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Frame {
        #[serde(alias = "image")]
        data: String,
    },
    NewQuestion,
    ResetSession,
    EndSession,
    Stop,
}

impl ClientMessage {
    fn kind(&self) -> &'static str {
        match self {
            Self::Frame { .. } => "frame",
            Self::NewQuestion => "new_question",
            Self::ResetSession => "reset_session",
            Self::EndSession => "end_session",
            Self::Stop => "stop",
        }
    }
}

/// Server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Metrics(FrameMetrics),
    Analytics(SessionAnalytics),
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Queue a message for the socket; false once the connection is gone
async fn send_message(tx: &mpsc::Sender<Message>, msg: &ServerMessage) -> bool {
    let json = match serde_json::to_string(msg) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialise message: {}", e);
            return true;
        }
    };
    match tx.try_send(Message::Text(json)) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(Message::Text(json))) => {
            debug!("WebSocket send buffer full, applying backpressure");
            tx.send(Message::Text(json)).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Full(_)) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// `GET /ws/video`
pub async fn ws_video(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    metrics::record_ws_connection("video");
    let session_id = Uuid::new_v4();
    ws.on_upgrade(move |socket| {
        handle_session(socket, state).instrument(tracing::info_span!("session", id = %session_id))
    })
}

async fn handle_session(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let pipeline = match state.new_pipeline() {
        Ok(pipeline) => pipeline,
        Err(e) => {
            warn!("Failed to start session: {}", e);
            send_message(&tx, &ServerMessage::error(e.to_string())).await;
            drop(tx);
            let _ = send_task.await;
            return;
        }
    };

    let (worker, mut updates) = SessionWorker::spawn(pipeline);
    let active = state.sessions.fetch_add(1, Ordering::SeqCst) + 1;
    metrics::set_ws_active_connections(active);
    info!("Interview session connected ({} active)", active);

    let forward = {
        let tx = tx.clone();
        tokio::spawn(
            async move {
                while let Some(frame_metrics) = updates.recv().await {
                    if !send_message(&tx, &ServerMessage::Metrics(frame_metrics)).await {
                        break;
                    }
                }
            }
            .in_current_span(),
        )
    };

    let mut stop_requested = false;
    while let Some(incoming) = receiver.next().await {
        let text = match incoming {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket receive failed: {}", e);
                break;
            }
        };

        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                if !send_message(&tx, &ServerMessage::error(format!("Invalid message: {}", e))).await {
                    break;
                }
                continue;
            }
        };
        metrics::record_ws_message_received(message.kind());

        let result = match message {
            ClientMessage::Frame { data } => {
                worker.submit_frame(data);
                Ok(())
            }
            ClientMessage::NewQuestion => worker.new_question().await.map(|_| ()),
            ClientMessage::ResetSession => worker.reset_session().await,
            ClientMessage::EndSession => match worker.end_session().await {
                Ok(analytics) => {
                    send_message(&tx, &ServerMessage::Analytics(analytics)).await;
                    Ok(())
                }
                Err(e) => Err(e),
            },
            ClientMessage::Stop => {
                stop_requested = true;
                break;
            }
        };
        if let Err(e) = result {
            warn!("Session worker unavailable: {}", e);
            send_message(&tx, &ServerMessage::error(e.to_string())).await;
            break;
        }
    }

    let analytics = worker.shutdown().await;
    // Metrics still in flight go out before the final analytics
    let _ = forward.await;
    match analytics {
        Ok(analytics) => {
            info!(
                "Interview session closed: {} frames, eye contact {:.1}%",
                analytics.total_frames_analyzed, analytics.overall_eye_contact_percentage
            );
            if stop_requested {
                send_message(&tx, &ServerMessage::Analytics(analytics)).await;
            }
        }
        Err(e) => warn!("Session ended without analytics: {}", e),
    }

    drop(tx);
    let _ = send_task.await;

    let active = state.sessions.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
    metrics::set_ws_active_connections(active);
}

/// `GET /ws/metrics`: latest metrics of the live preview session
pub async fn ws_metrics(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    metrics::record_ws_connection("metrics");
    ws.on_upgrade(move |socket| push_live_metrics(socket, state))
}

async fn push_live_metrics(mut socket: WebSocket, state: AppState) {
    let mut ticker = tokio::time::interval(METRICS_PUSH_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let latest = state.live_pipeline.lock().await.latest_metrics().clone();
                let Ok(json) = serde_json::to_string(&ServerMessage::Metrics(latest)) else {
                    continue;
                };
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Live metrics subscriber left");
}
