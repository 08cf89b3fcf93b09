//! Per-call session actor
//!
//! Every mutation of call state happens on one task: collaborators (media
//! ingress, transcription reader, completion task, synthesis worker) post
//! `SessionEvent`s into the session queue and this loop is the single
//! writer. The turn controller decides; this module executes.

pub mod history;
pub mod turn;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voxbridge_foundation::{ErrorPolicy, SessionError};
use voxbridge_llm::LlmEvent;
use voxbridge_stt::{SttStream, TranscriptEvent};
use voxbridge_telephony::TelephonyOutbound;
use voxbridge_tts::{TtsEvent, TtsStream};
use voxbridge_vad::{GateEvent, VadGate, WebRtcEngine};

use crate::registry::{CallSummary, CloseHook};
use crate::runtime::SharedRuntime;

use turn::{TurnAction, TurnController};

/// Everything that can happen to a call, serialized through one queue.
#[derive(Debug)]
pub enum SessionEvent {
    /// Media stream bound; carries the outbound frame sink.
    StreamStarted {
        stream_sid: String,
        telephony: mpsc::UnboundedSender<TelephonyOutbound>,
    },
    /// One inbound 20 ms µ-law frame.
    MediaFrame { ulaw: Vec<u8> },
    /// Carrier acknowledged playback up to a mark.
    MarkAck { name: String },
    Transcript(TranscriptEvent),
    Llm(LlmEvent),
    Tts(TtsEvent),
    /// Terminal; idempotent with every other close path.
    Close,
}

/// Per-call options fixed at session creation.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub call_id: String,
    pub system_prompt: String,
    /// Drive a one-shot greeting turn when the media stream starts.
    pub greeting: bool,
}

pub(crate) struct Session {
    cfg: SessionConfig,
    runtime: SharedRuntime,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    hooks: Arc<Mutex<Vec<CloseHook>>>,
    gate: VadGate,
    controller: TurnController,
    stream_sid: Option<String>,
    telephony: Option<mpsc::UnboundedSender<TelephonyOutbound>>,
    stt: Option<SttStream>,
    tts: Option<TtsStream>,
    llm_cancel: Option<CancellationToken>,
    recording: Vec<u8>,
    last_mark_ack: Option<String>,
    closed: bool,
}

impl Session {
    /// Spawn the session actor. Returns the event sender collaborators
    /// post into and the actor task handle.
    pub(crate) fn spawn(
        runtime: SharedRuntime,
        cfg: SessionConfig,
        hooks: Arc<Mutex<Vec<CloseHook>>>,
    ) -> (mpsc::UnboundedSender<SessionEvent>, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let gate = VadGate::new(
            Box::new(WebRtcEngine::new()),
            runtime.clock.clone(),
            runtime.config.turn.vad_silence_ms,
        );
        let controller = TurnController::new(runtime.clock.clone(), runtime.config.turn);

        let session = Session {
            cfg,
            runtime,
            events_tx: events_tx.clone(),
            events_rx,
            hooks,
            gate,
            controller,
            stream_sid: None,
            telephony: None,
            stt: None,
            tts: None,
            llm_cancel: None,
            recording: Vec::new(),
            last_mark_ack: None,
            closed: false,
        };

        let task = tokio::spawn(session.run());
        (events_tx, task)
    }

    async fn run(mut self) {
        self.runtime.metrics.session_opened();
        info!(call_id = %self.cfg.call_id, "session started");

        while let Some(event) = self.events_rx.recv().await {
            match event {
                SessionEvent::StreamStarted {
                    stream_sid,
                    telephony,
                } => {
                    if let Err(err) = self.handle_stream_started(stream_sid, telephony).await {
                        error!(call_id = %self.cfg.call_id, %err, "stream start failed");
                        if err.policy() == ErrorPolicy::FatalToSession {
                            self.close().await;
                            break;
                        }
                    }
                }
                SessionEvent::MediaFrame { ulaw } => self.handle_media_frame(&ulaw).await,
                SessionEvent::MarkAck { name } => {
                    debug!(call_id = %self.cfg.call_id, %name, "mark acknowledged");
                    self.last_mark_ack = Some(name);
                }
                SessionEvent::Transcript(ev) => self.handle_transcript(ev).await,
                SessionEvent::Llm(ev) => self.handle_llm(ev).await,
                SessionEvent::Tts(ev) => {
                    if self.handle_tts(ev).await {
                        self.close().await;
                        break;
                    }
                }
                SessionEvent::Close => {
                    self.close().await;
                    break;
                }
            }
        }

        if !self.closed {
            self.close().await;
        }
    }

    async fn handle_stream_started(
        &mut self,
        stream_sid: String,
        telephony: mpsc::UnboundedSender<TelephonyOutbound>,
    ) -> Result<(), SessionError> {
        if self.stream_sid.is_some() {
            warn!(call_id = %self.cfg.call_id, "duplicate start event ignored");
            return Ok(());
        }
        info!(call_id = %self.cfg.call_id, %stream_sid, "media stream bound");
        self.stream_sid = Some(stream_sid);
        self.telephony = Some(telephony);

        let events = self.events_tx.clone();
        let stt = SttStream::open(&self.runtime.http, &self.runtime.config.stt, move |ev| {
            let _ = events.send(SessionEvent::Transcript(ev));
        })
        .await
        .map_err(|err| SessionError::Connect {
            service: "stt",
            reason: err.to_string(),
        })?;
        self.stt = Some(stt);

        self.tts = Some(self.open_tts().await?);

        if self.cfg.greeting && !self.cfg.system_prompt.is_empty() {
            let actions = self.controller.start_greeting();
            self.execute(actions).await;
        }
        Ok(())
    }

    async fn open_tts(&mut self) -> Result<TtsStream, SessionError> {
        let telephony = self
            .telephony
            .as_ref()
            .ok_or(SessionError::TelephonyClosed)?
            .clone();
        let stream_sid = self
            .stream_sid
            .as_deref()
            .ok_or(SessionError::TelephonyClosed)?;
        let events = self.events_tx.clone();

        TtsStream::open(
            &self.runtime.config.tts,
            stream_sid,
            self.runtime.config.turn.tts_flush_quiet_ms,
            telephony,
            move |ev| {
                let _ = events.send(SessionEvent::Tts(ev));
            },
        )
        .await
        .map_err(|err| SessionError::Connect {
            service: "tts",
            reason: err.to_string(),
        })
    }

    async fn handle_media_frame(&mut self, ulaw: &[u8]) {
        self.runtime.metrics.inbound_frame();
        self.recording.extend_from_slice(ulaw);

        match self.gate.process_frame(ulaw) {
            Ok(Some(GateEvent::SpeechStarted { .. })) => {
                self.controller.on_speech_started();
            }
            Ok(Some(GateEvent::SpeechEnded { .. })) => {
                let actions = self.controller.on_speech_ended();
                self.execute(actions).await;
            }
            Ok(None) => {}
            Err(err) => {
                // Classifier hiccup: drop the frame, keep the stream.
                warn!(call_id = %self.cfg.call_id, %err, "vad dropped frame");
                return;
            }
        }

        // Utterance audio feeds transcription only while speech is live.
        if self.gate.is_speaking() {
            if let Some(stt) = &self.stt {
                stt.send_audio(ulaw.to_vec());
            }
        }

        let actions = self
            .controller
            .on_media_frame(self.gate.is_speaking(), self.gate.speech_started_at());
        if !actions.is_empty() {
            self.runtime.metrics.turn_interrupted();
            self.execute(actions).await;
        }
    }

    async fn handle_transcript(&mut self, event: TranscriptEvent) {
        match event {
            TranscriptEvent::Partial { seq, text, .. } => {
                debug!(call_id = %self.cfg.call_id, seq, %text, "partial transcript");
            }
            TranscriptEvent::Final { text, .. } => {
                self.controller.on_transcript_final(text);
            }
            TranscriptEvent::Error { message } => {
                error!(call_id = %self.cfg.call_id, %message, "transcription error");
                self.gate.reset();
                let actions = self.controller.on_transcript_error();
                self.execute(actions).await;
            }
        }
    }

    async fn handle_llm(&mut self, event: LlmEvent) {
        let actions = match event {
            LlmEvent::Token(token) => self.controller.on_llm_token(token),
            LlmEvent::Complete { full } => {
                self.llm_cancel = None;
                self.controller.on_llm_complete(full)
            }
            LlmEvent::Failed { message, aborted } => {
                self.llm_cancel = None;
                self.controller.on_llm_failed(&message, aborted)
            }
        };
        self.execute(actions).await;
    }

    /// Returns true when the session must close (telephony writer gone).
    async fn handle_tts(&mut self, event: TtsEvent) -> bool {
        match event {
            TtsEvent::FirstChunk => {
                self.controller.on_tts_first_chunk();
                false
            }
            TtsEvent::AudioSent => {
                self.runtime.metrics.outbound_frame();
                self.controller.on_tts_audio_sent();
                false
            }
            TtsEvent::Complete => {
                let actions = self.controller.on_tts_complete();
                self.execute(actions).await;
                false
            }
            TtsEvent::UpstreamError { message } => {
                let actions = self.controller.on_tts_error(&message);
                self.execute(actions).await;
                false
            }
            TtsEvent::SinkClosed => {
                warn!(call_id = %self.cfg.call_id, "telephony writer closed");
                true
            }
        }
    }

    /// Perform the controller's actions in order. A failed synthesis
    /// re-open aborts the rest of the plan and runs the abort actions
    /// instead.
    async fn execute(&mut self, actions: Vec<TurnAction>) {
        let mut queue: VecDeque<TurnAction> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                TurnAction::SendClear => {
                    if let (Some(tx), Some(sid)) = (&self.telephony, &self.stream_sid) {
                        let _ = tx.send(TelephonyOutbound::clear(sid));
                    }
                }
                TurnAction::InterruptTts => {
                    if let Some(tts) = &self.tts {
                        tts.interrupt();
                    }
                }
                TurnAction::CancelLlm => {
                    if let Some(cancel) = self.llm_cancel.take() {
                        cancel.cancel();
                    }
                }
                TurnAction::EnsureTtsOpen => {
                    let usable = self.tts.as_ref().map(TtsStream::is_open).unwrap_or(false);
                    if !usable {
                        match self.open_tts().await {
                            Ok(tts) => self.tts = Some(tts),
                            Err(err) => {
                                warn!(
                                    call_id = %self.cfg.call_id,
                                    %err,
                                    "synthesis re-open failed, turn aborted"
                                );
                                queue.clear();
                                queue.extend(self.controller.on_tts_error("reconnect failed"));
                            }
                        }
                    }
                }
                TurnAction::BeginTtsTurn => {
                    if let Some(tts) = &self.tts {
                        tts.begin_turn();
                    }
                }
                TurnAction::SendTtsToken(token) => {
                    if let Some(tts) = &self.tts {
                        tts.send_token(&token);
                    }
                }
                TurnAction::FlushTts => {
                    if let Some(tts) = &self.tts {
                        tts.flush();
                    }
                }
                TurnAction::StartLlm {
                    user_message,
                    history,
                } => {
                    let cancel = CancellationToken::new();
                    self.llm_cancel = Some(cancel.clone());
                    let events = self.events_tx.clone();
                    let _completion = self.runtime.llm.stream_chat(
                        &self.cfg.system_prompt,
                        &history,
                        &user_message,
                        cancel,
                        move |ev| {
                            let _ = events.send(SessionEvent::Llm(ev));
                        },
                    );
                }
                TurnAction::ReportLatency(latency) => {
                    info!(
                        call_id = %self.cfg.call_id,
                        vad_to_llm_ms = latency.vad_end_to_llm_call.as_millis() as u64,
                        llm_to_first_token_ms = latency.llm_call_to_first_token.as_millis() as u64,
                        token_to_first_audio_ms =
                            latency.first_token_to_first_chunk.as_millis() as u64,
                        end_to_end_ms = latency.end_to_end.as_millis() as u64,
                        "turn latency"
                    );
                    self.runtime.metrics.turn_completed(latency.end_to_end);
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if self.controller.finalize() {
            self.runtime.metrics.turn_interrupted();
        }
        if let Some(cancel) = self.llm_cancel.take() {
            cancel.cancel();
        }
        if let Some(stt) = self.stt.take() {
            stt.close().await;
        }
        if let Some(tts) = self.tts.take() {
            tts.close().await;
        }
        self.telephony = None;
        self.gate.reset();

        let summary = CallSummary {
            call_id: self.cfg.call_id.clone(),
            history: self.controller.history().to_vec(),
            recording_ulaw: std::mem::take(&mut self.recording),
            stats: self.controller.stats(),
        };
        let hooks: Vec<CloseHook> = self.hooks.lock().clone();
        for hook in hooks {
            hook(&summary);
        }

        self.runtime.metrics.session_closed();
        info!(
            call_id = %self.cfg.call_id,
            turns = summary.stats.completed,
            interrupted = summary.stats.interrupted,
            history_entries = summary.history.len(),
            recording_bytes = summary.recording_ulaw.len(),
            last_mark = ?self.last_mark_ack,
            "session closed"
        );
    }
}
