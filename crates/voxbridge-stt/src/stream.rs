//! Per-call upstream transcription stream
//!
//! Opened once at call start and kept for the life of the session. Audio
//! is forwarded only while the caller is speaking; the gate upstream of
//! this module enforces that. Shutdown sends the `EOS` sentinel and
//! leaves the socket open briefly so trailing finals can land.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use voxbridge_foundation::SttCredentials;

use crate::auth::TokenCache;
use crate::types::{ResultFrame, SttError, TranscriptEvent};

/// Upstream connect budget; exceeding it is fatal to the session.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the socket lingers after `EOS` so late finals arrive.
pub const STT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

enum SttCommand {
    Audio(Vec<u8>),
    Shutdown,
}

pub struct SttStream {
    cmd_tx: mpsc::UnboundedSender<SttCommand>,
    writer_handle: JoinHandle<()>,
    reader_handle: JoinHandle<()>,
}

impl SttStream {
    /// Connect the per-call stream. Renews the bearer token once if the
    /// upstream rejects the cached one with 401.
    pub async fn open(
        client: &reqwest::Client,
        creds: &SttCredentials,
        on_event: impl Fn(TranscriptEvent) + Send + Sync + 'static,
    ) -> Result<Self, SttError> {
        let token = TokenCache::global().bearer(client, creds).await?;

        let socket = match Self::connect(creds, &token).await {
            Ok(socket) => socket,
            Err(SttError::Auth(reason)) => {
                warn!(%reason, "transcription stream rejected token, renewing once");
                TokenCache::global().invalidate();
                let token = TokenCache::global().refresh(client, creds).await?;
                Self::connect(creds, &token).await?
            }
            Err(other) => return Err(other),
        };

        info!("transcription stream open");
        let (mut write, mut read) = socket.split();

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    SttCommand::Audio(frame) => {
                        if write.send(Message::Binary(frame)).await.is_err() {
                            warn!("transcription stream dropped while sending audio");
                            break;
                        }
                    }
                    SttCommand::Shutdown => {
                        let _ = write.send(Message::Text("EOS".into())).await;
                        tokio::time::sleep(STT_SHUTDOWN_GRACE).await;
                        let _ = write.close().await;
                        break;
                    }
                }
            }
        });

        let reader_handle = tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(raw)) => match serde_json::from_str::<ResultFrame>(&raw) {
                        Ok(frame) => {
                            if let Some(event) = frame.into_event() {
                                on_event(event);
                            }
                        }
                        Err(err) => {
                            warn!(%err, "unparseable transcription frame dropped");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        debug!("transcription stream closed by upstream");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        on_event(TranscriptEvent::Error {
                            message: err.to_string(),
                        });
                        break;
                    }
                }
            }
        });

        Ok(Self {
            cmd_tx,
            writer_handle,
            reader_handle,
        })
    }

    async fn connect(
        creds: &SttCredentials,
        token: &str,
    ) -> Result<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        SttError,
    > {
        let url = format!(
            "{}?sample_rate=8000&encoding=MULAW&use_itn=true&use_disfluency_filter=true&use_profanity_filter=false",
            creds.stream_url
        );

        let mut request = url
            .into_client_request()
            .map_err(|e| SttError::Connect(e.to_string()))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SttError::Connect(e.to_string()))?,
        );

        match timeout(CONNECT_TIMEOUT, connect_async(request)).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(WsError::Http(response))) if response.status().as_u16() == 401 => {
                Err(SttError::Auth("401 from stream endpoint".into()))
            }
            Ok(Err(err)) => Err(SttError::Connect(err.to_string())),
            Err(_) => Err(SttError::ConnectTimeout),
        }
    }

    /// Forward one µ-law frame upstream. Called only while the caller is
    /// speaking; frames outside an utterance are never forwarded.
    pub fn send_audio(&self, ulaw: Vec<u8>) {
        if self.cmd_tx.send(SttCommand::Audio(ulaw)).is_err() {
            debug!("audio dropped: transcription writer gone");
        }
    }

    /// Send the end sentinel and tear the stream down after the grace
    /// period.
    pub async fn close(self) {
        let _ = self.cmd_tx.send(SttCommand::Shutdown);
        let _ = self.writer_handle.await;
        let _ = self.reader_handle.await;
    }
}
