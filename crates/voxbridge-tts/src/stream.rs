//! Per-call synthesis connection
//!
//! One task owns the socket, the reassembly buffer, and the per-turn
//! flags, so interrupt/flush/audio ordering is the task's own event
//! order. The flush-quiet timer restarts whenever anything else happens,
//! which makes it exactly "500 ms without downstream frames after flush".

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxbridge_foundation::TtsSettings;
use voxbridge_telephony::{FrameAssembler, TelephonyOutbound};

use crate::types::{DownstreamFrame, TtsError, TtsEvent, MARK_EVERY_FRAMES};

/// Upstream connect budget; exceeding it is fatal.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum TtsCommand {
    BeginTurn,
    Token(String),
    Flush,
}

pub struct TtsStream {
    cmd_tx: mpsc::UnboundedSender<TtsCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TtsStream {
    /// Connect and send the begin-of-stream voice parameters.
    pub async fn open(
        settings: &TtsSettings,
        stream_sid: &str,
        flush_quiet_ms: u64,
        telephony: mpsc::UnboundedSender<TelephonyOutbound>,
        on_event: impl Fn(TtsEvent) + Send + Sync + 'static,
    ) -> Result<Self, TtsError> {
        let url = format!(
            "{}/{}/stream-input?model_id={}&output_format=ulaw_8000",
            settings.stream_url, settings.voice, settings.model
        );

        let mut socket = match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok((socket, _response))) => socket,
            Ok(Err(err)) => return Err(TtsError::Connect(err.to_string())),
            Err(_) => return Err(TtsError::ConnectTimeout),
        };

        let bos = json!({
            "text": " ",
            "voice_settings": {
                "stability": settings.stability,
                "similarity_boost": settings.similarity,
                "speed": settings.speed,
            },
            "xi_api_key": settings.api_key,
        });
        socket
            .send(Message::Text(bos.to_string()))
            .await
            .map_err(|err| TtsError::Connect(err.to_string()))?;

        info!(vendor = %settings.vendor, "synthesis stream open");

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let worker = Worker {
            socket,
            cmd_rx,
            cancel: cancel.clone(),
            telephony,
            on_event: Box::new(on_event),
            stream_sid: stream_sid.to_string(),
            flush_quiet: Duration::from_millis(flush_quiet_ms),
            assembler: FrameAssembler::new(),
            frames_sent: 0,
            mark_seq: 0,
            first_chunk_sent: false,
            flushed: false,
            completed: false,
        };
        let task = tokio::spawn(worker.run());

        Ok(Self {
            cmd_tx,
            cancel,
            task,
        })
    }

    /// Reset per-turn state before streaming a new response.
    pub fn begin_turn(&self) {
        let _ = self.cmd_tx.send(TtsCommand::BeginTurn);
    }

    /// Push one completion token for synthesis.
    pub fn send_token(&self, token: &str) {
        let _ = self.cmd_tx.send(TtsCommand::Token(token.to_string()));
    }

    /// Signal end-of-input for the current turn.
    pub fn flush(&self) {
        let _ = self.cmd_tx.send(TtsCommand::Flush);
    }

    /// Barge-in: drop buffered audio, stop emitting, close upstream.
    /// The next turn opens a fresh connection.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection can still serve a turn.
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.task.is_finished()
    }

    /// Tear the connection down at session close.
    pub async fn close(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

struct Worker {
    socket: Socket,
    cmd_rx: mpsc::UnboundedReceiver<TtsCommand>,
    cancel: CancellationToken,
    telephony: mpsc::UnboundedSender<TelephonyOutbound>,
    on_event: Box<dyn Fn(TtsEvent) + Send + Sync>,
    stream_sid: String,
    flush_quiet: Duration,
    assembler: FrameAssembler,
    frames_sent: u64,
    mark_seq: u64,
    first_chunk_sent: bool,
    flushed: bool,
    completed: bool,
}

impl Worker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                // Interrupt wins over everything already queued up.
                biased;

                _ = self.cancel.cancelled() => {
                    self.assembler.clear();
                    let _ = self.socket.close(None).await;
                    debug!("synthesis stream interrupted");
                    break;
                }

                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(cmd) => {
                            if !self.handle_command(cmd).await {
                                break;
                            }
                        }
                        None => {
                            let _ = self.socket.close(None).await;
                            break;
                        }
                    }
                }

                maybe_msg = self.socket.next() => {
                    match maybe_msg {
                        Some(Ok(Message::Text(raw))) => {
                            if !self.handle_frame(&raw) {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("synthesis stream closed by upstream");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            (self.on_event)(TtsEvent::UpstreamError {
                                message: err.to_string(),
                            });
                            break;
                        }
                    }
                }

                _ = tokio::time::sleep(self.flush_quiet), if self.flushed && !self.completed => {
                    debug!("flush-quiet window elapsed, declaring generation complete");
                    self.finish_generation();
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: TtsCommand) -> bool {
        let message = match cmd {
            TtsCommand::BeginTurn => {
                self.assembler.clear();
                self.frames_sent = 0;
                self.first_chunk_sent = false;
                self.flushed = false;
                self.completed = false;
                return true;
            }
            TtsCommand::Token(token) => {
                json!({ "text": token, "try_trigger_generation": true })
            }
            TtsCommand::Flush => {
                self.flushed = true;
                json!({ "text": "", "flush": true })
            }
        };

        if self
            .socket
            .send(Message::Text(message.to_string()))
            .await
            .is_err()
        {
            (self.on_event)(TtsEvent::UpstreamError {
                message: "synthesis stream dropped while sending".into(),
            });
            return false;
        }
        true
    }

    /// Returns false when the worker should stop.
    fn handle_frame(&mut self, raw: &str) -> bool {
        let frame: DownstreamFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "unparseable synthesis frame dropped");
                return true;
            }
        };

        if let Some(message) = frame.error {
            (self.on_event)(TtsEvent::UpstreamError { message });
            return true;
        }

        if let Some(audio_b64) = frame.audio {
            match BASE64.decode(audio_b64.as_bytes()) {
                Ok(bytes) => {
                    self.assembler.push(&bytes);
                    while let Some(out) = self.assembler.next_frame() {
                        if !self.emit_frame(&out) {
                            return false;
                        }
                    }
                }
                Err(err) => {
                    warn!(%err, "synthesis audio payload not base64, dropped");
                }
            }
        }

        if frame.is_final == Some(true) && !self.completed {
            self.finish_generation();
        }
        true
    }

    /// Returns false when the telephony writer is gone.
    fn emit_frame(&mut self, ulaw: &[u8]) -> bool {
        // An interrupt may land while a downstream message is mid-drain;
        // nothing is emitted past it.
        if self.cancel.is_cancelled() {
            return false;
        }
        if self
            .telephony
            .send(TelephonyOutbound::media(&self.stream_sid, ulaw))
            .is_err()
        {
            (self.on_event)(TtsEvent::SinkClosed);
            return false;
        }

        if !self.first_chunk_sent {
            self.first_chunk_sent = true;
            (self.on_event)(TtsEvent::FirstChunk);
        }
        (self.on_event)(TtsEvent::AudioSent);

        self.frames_sent += 1;
        if self.frames_sent % MARK_EVERY_FRAMES == 0 {
            self.mark_seq += 1;
            let name = format!("tts-{}", self.mark_seq);
            if self
                .telephony
                .send(TelephonyOutbound::mark(&self.stream_sid, name))
                .is_err()
            {
                (self.on_event)(TtsEvent::SinkClosed);
                return false;
            }
        }
        true
    }

    fn finish_generation(&mut self) {
        if let Some(tail) = self.assembler.flush_padded() {
            if !self.emit_frame(&tail) {
                return;
            }
        }
        self.completed = true;
        self.flushed = false;
        (self.on_event)(TtsEvent::Complete);
    }
}
