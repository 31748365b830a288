//! services/api/src/web/ws_handler.rs
//!
//! The live session channel. A lecturer keeps this open while the QR code is
//! on screen and receives every accepted scan, a periodic countdown and a
//! final notice when the window closes.

use crate::{
    error::ApiError,
    web::{middleware::CurrentUser, protocol::ServerMessage, state::AppState},
};
use attendance_core::{access::ensure_can_view_course, countdown, domain::Session, ScanEventStream};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use futures::{stream::StreamExt, Sink, SinkExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// The outgoing half of a socket, shared between the push task and the
/// connection's own loop.
type WsSender<S> = Arc<Mutex<S>>;

/// The handler for upgrading HTTP requests to WebSocket connections.
///
/// Access is checked before the upgrade so a refused client gets a normal
/// HTTP error instead of a socket that closes immediately.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(session_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let session = app_state.db.get_session(session_id).await?;
    let course = app_state.db.get_course(session.course_id).await?;
    ensure_can_view_course(&course, &user)?;

    let user_id = user.id;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, app_state, session, user_id)))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, session: Session, user_id: Uuid) {
    info!("Session channel opened for {} by user {}", session.id, user_id);

    // The sender is shared between the push task and the close handling below.
    let (sender, mut receiver) = socket.split();
    let ws_sender = Arc::new(Mutex::new(sender));

    // --- 1. Subscription Phase ---
    // Subscribe before confirming, so a scan accepted right after the client
    // sees `subscribed` is already on its way.
    let events = app_state.notifier.subscribe(session.id);
    let subscribed = ServerMessage::Subscribed {
        session_id: session.id,
        course_id: session.course_id,
        expires_at: session.expires_at,
    };
    if !send_message(&ws_sender, &subscribed).await {
        error!("Failed to send subscription confirmation.");
        return;
    }

    // --- 2. Push Task ---
    let token = CancellationToken::new();
    let push_task = {
        let app_state = app_state.clone();
        let ws_sender = ws_sender.clone();
        let token = token.clone();
        tokio::spawn(async move {
            push_updates(app_state, session, events, ws_sender, token).await;
        })
    };

    // --- 3. Main Message Loop ---
    // The channel is push-only; the loop just waits for the client to leave.
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                None => {
                    info!("Client disconnected.");
                    break;
                }
            }
        }
    }

    // --- 4. Cleanup ---
    token.cancel();
    if let Err(e) = push_task.await {
        error!("Session push task failed: {:?}", e);
    }
    info!("Session channel closed for user {}", user_id);
}

/// Forwards scan events and countdown ticks until the session expires or the
/// token is cancelled. Cancels the token itself once the session has expired.
async fn push_updates<S>(
    app_state: Arc<AppState>,
    session: Session,
    mut events: ScanEventStream,
    ws_sender: WsSender<S>,
    token: CancellationToken,
) where
    S: Sink<Message> + Unpin + Send,
{
    let mut ticker = tokio::time::interval(app_state.config.countdown_tick);

    let until_expiry = countdown::remaining(session.expires_at, app_state.clock.now())
        .to_std()
        .unwrap_or_default();
    let expiry = tokio::time::sleep(until_expiry);
    tokio::pin!(expiry);

    loop {
        let message = tokio::select! {
            _ = token.cancelled() => return,
            event = events.next() => match event {
                Some(event) => ServerMessage::ScanRecorded {
                    session_id: event.session_id,
                    student_id: event.student_id,
                    scanned_at: event.scanned_at,
                    scan_count: event.scan_count,
                },
                None => {
                    error!("Scan notifications ended for session {}", session.id);
                    let message = ServerMessage::Error {
                        message: "Live updates are unavailable.".to_string(),
                    };
                    send_message(&ws_sender, &message).await;
                    token.cancel();
                    return;
                }
            },
            _ = ticker.tick() => {
                let now = app_state.clock.now();
                if !session.is_open_at(now) {
                    break;
                }
                ServerMessage::Countdown {
                    session_id: session.id,
                    remaining_seconds: countdown::remaining(session.expires_at, now).num_seconds(),
                    remaining: countdown::describe(session.expires_at, now),
                }
            }
            _ = &mut expiry => {
                // The timer can fire a moment early relative to the clock.
                if session.is_open_at(app_state.clock.now()) {
                    expiry.as_mut().reset(tokio::time::Instant::now() + std::time::Duration::from_secs(1));
                    continue;
                }
                break;
            }
        };

        if !send_message(&ws_sender, &message).await {
            warn!("Failed to push update for session {}; stopping.", session.id);
            token.cancel();
            return;
        }
    }

    info!("Session {} expired; closing channel.", session.id);
    send_message(&ws_sender, &ServerMessage::SessionExpired { session_id: session.id }).await;
    if ws_sender.lock().await.send(Message::Close(None)).await.is_err() {
        warn!("Failed to send close frame for session {}", session.id);
    }
    token.cancel();
}

/// Serializes and sends one message. Returns `false` if the client is gone.
async fn send_message<S>(ws_sender: &WsSender<S>, message: &ServerMessage) -> bool
where
    S: Sink<Message> + Unpin + Send,
{
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return false;
        }
    };
    ws_sender.lock().await.send(Message::Text(json.into())).await.is_ok()
}
