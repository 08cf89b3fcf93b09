//! Media ingress
//!
//! The carrier connects one duplex socket per call and identifies the
//! call through the `start` event's custom parameters. Inbound frames
//! fan into the session queue; outbound frames ride a single writer task
//! so media/mark/clear keep their enqueue order on the wire.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxbridge_telephony::{parse_inbound, TelephonyInbound, TelephonyOutbound};

use crate::registry::{SessionHandle, SessionRegistry};
use crate::session::{SessionConfig, SessionEvent};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/media", get(ws_upgrade))
        .route("/sessions", post(create_session))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    call_id: String,
    system_prompt: String,
    #[serde(default = "default_greeting")]
    greeting: bool,
}

fn default_greeting() -> bool {
    true
}

/// Session-level control surface: the control plane registers the call
/// before the media socket opens.
async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> impl IntoResponse {
    state.registry.create(SessionConfig {
        call_id: req.call_id.clone(),
        system_prompt: req.system_prompt,
        greeting: req.greeting,
    });
    (StatusCode::CREATED, Json(json!({ "call_id": req.call_id })))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<TelephonyOutbound>();

    // Sole writer for this call's outbound leg.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if ws_tx.send(Message::Text(frame.to_json())).await.is_err() {
                break;
            }
        }
    });

    let mut bound: Option<SessionHandle> = None;

    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "media socket receive error");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Pings are answered by the websocket layer itself.
            _ => continue,
        };

        match parse_inbound(&text) {
            Ok(TelephonyInbound::Start { start }) => {
                let Some(call_id) = start.custom_parameters.get("call_id") else {
                    warn!(stream_sid = %start.stream_sid, "start event without call_id");
                    break;
                };
                if let Some(format) = &start.media_format {
                    if format.sample_rate != 8000 {
                        warn!(
                            sample_rate = format.sample_rate,
                            "unexpected media sample rate"
                        );
                    }
                }
                match state.registry.get(call_id) {
                    Some(handle) => {
                        info!(call_id = %call_id, stream_sid = %start.stream_sid, "media stream started");
                        handle.post(SessionEvent::StreamStarted {
                            stream_sid: start.stream_sid,
                            telephony: out_tx.clone(),
                        });
                        bound = Some(handle);
                    }
                    None => {
                        warn!(call_id = %call_id, "media stream for unknown session");
                        break;
                    }
                }
            }
            Ok(TelephonyInbound::Media { media }) => {
                let Some(handle) = &bound else {
                    debug!("media before start, dropped");
                    continue;
                };
                match TelephonyInbound::decode_media(&media) {
                    Ok(ulaw) => {
                        if !handle.post(SessionEvent::MediaFrame { ulaw }) {
                            warn!(call_id = %handle.call_id(), "session gone, dropping media stream");
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "undecodable media payload dropped");
                    }
                }
            }
            Ok(TelephonyInbound::Mark { mark }) => {
                if let Some(handle) = &bound {
                    handle.post(SessionEvent::MarkAck { name: mark.name });
                }
            }
            Ok(TelephonyInbound::Stop) => {
                debug!("stop event received");
                break;
            }
            Ok(TelephonyInbound::Unknown) => {
                warn!("unknown telephony event ignored");
            }
            Err(err) => {
                warn!(%err, "malformed telephony frame dropped");
            }
        }
    }

    if let Some(handle) = &bound {
        state.registry.close_all(handle.call_id());
    }
    drop(out_tx);
    let _ = writer.await;
}
