//! WebSocket job feed with backpressure support.
//!
//! The feed opens with the job's current snapshot, forwards every later
//! snapshot in order, and closes after the terminal one.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use vodclip_models::{JobId, WsMessage};
use vodclip_progress::{ProgressBus, Subscription};

use crate::error::ApiResult;
use crate::metrics;
use crate::state::AppState;

/// Global counter for active WebSocket connections.
static ACTIVE_WS_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

/// Configuration for WebSocket backpressure.
const WS_SEND_BUFFER_SIZE: usize = 32;
const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

const ENDPOINT: &str = "job";

/// Queue a text frame, waiting for room if the send buffer is full.
async fn send_ws_text(tx: &mpsc::Sender<Message>, text: String) -> bool {
    match tx.try_send(Message::Text(text)) {
        Ok(_) => true,
        Err(mpsc::error::TrySendError::Full(msg)) => {
            debug!("WebSocket send buffer full, applying backpressure");
            tx.send(msg).await.is_ok()
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Live snapshot feed for one job.
///
/// Unknown or evicted jobs are rejected with 404 before the upgrade.
pub async fn ws_job(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let job_id = JobId::parse(job_id)?;
    let subscription = state.bus.subscribe(&job_id)?;
    let bus = state.bus.clone();

    Ok(ws.on_upgrade(move |socket| async move {
        let count = ACTIVE_WS_CONNECTIONS.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_ws_active_connections(count);
        metrics::record_ws_connection(ENDPOINT);

        handle_job_socket(socket, subscription, bus).await;

        let count = ACTIVE_WS_CONNECTIONS.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_ws_active_connections(count);
    }))
}

async fn handle_job_socket(socket: WebSocket, mut subscription: Subscription, bus: ProgressBus) {
    let job_id = subscription.job_id().clone();
    let (ws_sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Message>(WS_SEND_BUFFER_SIZE);
    let send_task = tokio::spawn(async move {
        let mut ws_sender = ws_sender;
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    info!(job_id = %job_id, "Job feed opened");

    let mut heartbeat = interval(WS_HEARTBEAT_INTERVAL);
    let mut last_activity = Instant::now();
    let mut last_seq = None;
    let mut terminal_sent = false;

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else { break };
                last_activity = Instant::now();
                last_seq = Some(frame.event_seq);

                metrics::record_ws_message_sent(ENDPOINT, "snapshot");
                if !send_ws_text(&tx, frame.payload.to_string()).await {
                    warn!(job_id = %job_id, "WebSocket send failed, client disconnected");
                    break;
                }
                if frame.is_terminal() {
                    terminal_sent = true;
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if last_activity.elapsed() > WS_HEARTBEAT_INTERVAL / 2
                    && tx.send(Message::Ping(Vec::new())).await.is_err()
                {
                    warn!(job_id = %job_id, "Heartbeat failed, client disconnected");
                    break;
                }
            }
            client_msg = receiver.next() => {
                match client_msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        debug!(job_id = %job_id, "Client closed job feed");
                        break;
                    }
                    Some(Ok(_)) => {
                        metrics::record_ws_message_received(ENDPOINT);
                    }
                }
            }
        }
    }

    // A full queue may have skipped the terminal frame; send it from the registry.
    if !terminal_sent {
        if let Some(job) = bus.snapshot(&job_id) {
            if job.is_terminal() && last_seq.is_some_and(|seq| seq < job.event_seq) {
                if let Ok(text) = serde_json::to_string(&WsMessage::snapshot(job)) {
                    let _ = send_ws_text(&tx, text).await;
                }
            }
        }
    }

    drop(subscription);
    let _ = tx.send(Message::Close(None)).await;
    drop(tx);
    let _ = send_task.await;
    info!(job_id = %job_id, "Job feed closed");
}
