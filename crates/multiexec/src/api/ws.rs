//! WebSocket dispatch endpoint
//!
//! One run per connection: the first text frame is the dispatch request,
//! every following server frame is a run event, and the server closes the
//! socket after `done`.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::IntoResponse;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use multiexec_api::{ControlMessage, DispatchRequest, RunEvent};
use multiexec_core::{DispatchPlan, RunSession};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Upgrade to the dispatch protocol
pub async fn dispatch_ws(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let request = match receiver.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<DispatchRequest>(&text) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed dispatch request");
                close_unsupported(&mut sender, "malformed dispatch request").await;
                return;
            }
        },
        Some(Ok(Message::Binary(_))) => {
            close_unsupported(&mut sender, "expected a JSON text frame").await;
            return;
        }
        _ => {
            debug!("client left before sending a request");
            return;
        }
    };

    info!(request = ?request, "dispatch requested");

    let session = match state.coordinator.start(DispatchPlan::from(request)) {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "dispatch rejected");
            let event = RunEvent::Error {
                message: e.to_string(),
            };
            if send_event(&mut sender, &event).await {
                let _ = sender.close().await;
            }
            return;
        }
    };

    state.track(&session).await;
    stream_run(session, sender, receiver).await;
}

/// Forward events until `done`, honouring stop requests and disconnects
async fn stream_run(
    mut session: RunSession,
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
) {
    let run_id = session.id();
    let mut client_open = true;

    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else {
                    break;
                };
                if client_open && !send_event(&mut sender, &event).await {
                    info!(run_id = %run_id, "client unreachable; cancelling run");
                    session.cancel();
                    client_open = false;
                }
            }
            msg = receiver.next(), if client_open => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ControlMessage>(&text) {
                    Ok(ControlMessage::Stop) => {
                        info!(run_id = %run_id, "stop requested by client");
                        session.cancel();
                    }
                    Err(e) => debug!(run_id = %run_id, error = %e, "ignoring client message"),
                },
                Some(Ok(Message::Close(_)) | Err(_)) | None => {
                    info!(run_id = %run_id, "client disconnected; cancelling run");
                    session.cancel();
                    client_open = false;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    if client_open {
        let _ = sender.close().await;
    }
    debug!(run_id = %run_id, "dispatch connection finished");
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &RunEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to serialize event");
            true
        }
    }
}

async fn close_unsupported(sender: &mut SplitSink<WebSocket, Message>, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::UNSUPPORTED,
        reason: reason.into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}
