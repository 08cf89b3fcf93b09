//! Turn controller
//!
//! The integrating state machine for one call: decides when a user turn
//! dispatches, when completion tokens flow into synthesis, when barge-in
//! fires, and when the assistant reply commits to history.
//!
//! The controller is deliberately synchronous and IO-free. Every handler
//! returns the actions the session actor must perform, in order; the
//! interrupt sequence in particular is a fixed action order
//! (clear → mute synthesis → cancel completion → rollback history)
//! rather than anything left to drop order.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use voxbridge_foundation::{SharedClock, TurnTunables};
use voxbridge_llm::ChatMessage;
use voxbridge_telemetry::{TurnLatency, TurnTimings};

use super::history::History;

/// Lifecycle phase of the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Capturing,
    Transcribing,
    Generating,
    Speaking,
    Committing,
    Interrupted,
}

/// Side effects the session actor must perform, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnAction {
    /// Discard audio already buffered at the carrier.
    SendClear,
    /// Mute and tear down the synthesis stream.
    InterruptTts,
    /// Fire the cooperative abort of the in-flight completion.
    CancelLlm,
    /// Re-open the synthesis stream if an interrupt closed it.
    EnsureTtsOpen,
    /// Reset per-turn synthesis state.
    BeginTtsTurn,
    SendTtsToken(String),
    FlushTts,
    /// Start streaming a completion for this turn.
    StartLlm {
        user_message: String,
        history: Vec<ChatMessage>,
    },
    ReportLatency(TurnLatency),
}

/// Per-session turn statistics, surfaced in the end-of-call summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnStats {
    pub completed: u64,
    pub interrupted: u64,
}

pub struct TurnController {
    clock: SharedClock,
    tunables: TurnTunables,
    history: History,
    transcript_buffer: Vec<String>,
    phase: TurnPhase,
    pending_assistant_text: String,
    was_interrupted: bool,
    timings: TurnTimings,
    history_saved_at: Option<Instant>,
    last_audio_sent_at: Option<Instant>,
    tts_playing: bool,
    stats: TurnStats,
}

impl TurnController {
    pub fn new(clock: SharedClock, tunables: TurnTunables) -> Self {
        Self {
            clock,
            tunables,
            history: History::new(),
            transcript_buffer: Vec::new(),
            phase: TurnPhase::Idle,
            pending_assistant_text: String::new(),
            was_interrupted: false,
            timings: TurnTimings::new(),
            history_saved_at: None,
            last_audio_sent_at: None,
            tts_playing: false,
            stats: TurnStats::default(),
        }
    }

    // ─── Speech edges ────────────────────────────────────────────────

    pub fn on_speech_started(&mut self) {
        if self.phase == TurnPhase::Idle {
            self.phase = TurnPhase::Capturing;
        }
    }

    /// A finalized transcript segment. Finals that land after a turn
    /// already dispatched stay buffered and join the next turn.
    pub fn on_transcript_final(&mut self, text: String) {
        debug!(%text, "transcript final buffered");
        self.transcript_buffer.push(text);
    }

    /// Utterance closed. Dispatches a turn when there is anything to say;
    /// duplicate edges without buffered transcript are ignored.
    pub fn on_speech_ended(&mut self) -> Vec<TurnAction> {
        match self.phase {
            TurnPhase::Idle | TurnPhase::Capturing | TurnPhase::Interrupted => {
                if self.transcript_buffer.is_empty() {
                    self.phase = TurnPhase::Idle;
                    return Vec::new();
                }
                self.dispatch_turn()
            }
            // A turn is already generating or speaking; buffered finals
            // wait for the next dispatch.
            _ => Vec::new(),
        }
    }

    fn dispatch_turn(&mut self) -> Vec<TurnAction> {
        let now = self.clock.now();
        self.phase = TurnPhase::Transcribing;

        let user_text = self.transcript_buffer.join(" ");
        self.transcript_buffer.clear();
        self.history.push_user(&user_text);

        self.timings.clear();
        self.timings.mark_vad_end(now);
        self.pending_assistant_text.clear();
        self.was_interrupted = false;
        self.history_saved_at = None;

        self.timings.mark_llm_call(now);
        self.phase = TurnPhase::Generating;
        info!(%user_text, "turn dispatched");

        vec![
            TurnAction::EnsureTtsOpen,
            TurnAction::BeginTtsTurn,
            TurnAction::StartLlm {
                user_message: user_text,
                history: self.history.to_vec(),
            },
        ]
    }

    /// One-shot greeting turn driven by the system prompt alone.
    pub fn start_greeting(&mut self) -> Vec<TurnAction> {
        if self.phase != TurnPhase::Idle {
            return Vec::new();
        }
        self.pending_assistant_text.clear();
        self.was_interrupted = false;
        self.history_saved_at = None;
        self.timings.clear();
        self.timings.mark_llm_call(self.clock.now());
        self.phase = TurnPhase::Generating;
        info!("greeting turn dispatched");

        vec![
            TurnAction::BeginTtsTurn,
            TurnAction::StartLlm {
                user_message: String::new(),
                history: Vec::new(),
            },
        ]
    }

    // ─── Barge-in ────────────────────────────────────────────────────

    /// Runs on every inbound media frame. Fires the interrupt when the
    /// caller has been speaking over active synthesis audio long enough:
    /// fast path once a transcript confirms speech, safety path on
    /// duration alone.
    pub fn on_media_frame(
        &mut self,
        gate_speaking: bool,
        speech_started_at: Option<Instant>,
    ) -> Vec<TurnAction> {
        if self.was_interrupted || !gate_speaking {
            return Vec::new();
        }
        let Some(started_at) = speech_started_at else {
            return Vec::new();
        };

        let now = self.clock.now();
        let recent_audio = self
            .last_audio_sent_at
            .map(|at| {
                now.duration_since(at)
                    < Duration::from_millis(self.tunables.interrupt_tts_recent_ms)
            })
            .unwrap_or(false);
        if !self.tts_playing && !recent_audio {
            return Vec::new();
        }

        let speaking_for = now.duration_since(started_at);
        let fast = speaking_for > Duration::from_millis(self.tunables.interrupt_fast_ms)
            && !self.transcript_buffer.is_empty();
        let safety = speaking_for >= Duration::from_millis(self.tunables.interrupt_safety_ms);

        if fast || safety {
            info!(
                speaking_ms = speaking_for.as_millis() as u64,
                transcript = !self.transcript_buffer.is_empty(),
                "barge-in"
            );
            self.interrupt()
        } else {
            Vec::new()
        }
    }

    /// The interrupt sequence, in its fixed order.
    fn interrupt(&mut self) -> Vec<TurnAction> {
        let now = self.clock.now();
        self.was_interrupted = true;
        self.stats.interrupted += 1;

        let actions = vec![
            TurnAction::SendClear,
            TurnAction::InterruptTts,
            TurnAction::CancelLlm,
        ];

        // Commit race: synthesis completion may have committed the reply
        // just before the caller barged in. A fresh assistant tail is
        // rolled back.
        if let Some(saved_at) = self.history_saved_at {
            if now.duration_since(saved_at)
                < Duration::from_millis(self.tunables.history_rollback_ms)
                && self.history.tail_is_assistant()
            {
                self.history.rollback_assistant_tail();
                info!("assistant entry rolled back after barge-in race");
            }
        }

        self.last_audio_sent_at = None;
        self.pending_assistant_text.clear();
        self.history_saved_at = None;
        self.tts_playing = false;
        self.timings.clear();
        self.phase = TurnPhase::Interrupted;

        actions
    }

    // ─── Completion events ───────────────────────────────────────────

    pub fn on_llm_token(&mut self, token: String) -> Vec<TurnAction> {
        if self.was_interrupted
            || !matches!(self.phase, TurnPhase::Generating | TurnPhase::Speaking)
        {
            return Vec::new();
        }
        if !self.timings.has_first_token() {
            self.timings.mark_llm_first_token(self.clock.now());
            self.phase = TurnPhase::Speaking;
        }
        vec![TurnAction::SendTtsToken(token)]
    }

    pub fn on_llm_complete(&mut self, full: String) -> Vec<TurnAction> {
        self.pending_assistant_text = full;
        if self.was_interrupted {
            return Vec::new();
        }
        if matches!(self.phase, TurnPhase::Generating | TurnPhase::Speaking) {
            vec![TurnAction::FlushTts]
        } else {
            Vec::new()
        }
    }

    pub fn on_llm_failed(&mut self, message: &str, aborted: bool) -> Vec<TurnAction> {
        if aborted {
            debug!("completion aborted by interrupt");
            return Vec::new();
        }
        warn!(%message, "completion failed, turn aborted");
        if matches!(self.phase, TurnPhase::Generating | TurnPhase::Speaking) {
            self.pending_assistant_text.clear();
            self.tts_playing = false;
            self.timings.clear();
            self.phase = TurnPhase::Idle;
            // Tokens already pushed may be mid-synthesis; silence them.
            return vec![TurnAction::SendClear, TurnAction::InterruptTts];
        }
        Vec::new()
    }

    // ─── Synthesis events ────────────────────────────────────────────

    pub fn on_tts_first_chunk(&mut self) {
        self.timings.mark_tts_first_chunk(self.clock.now());
        self.tts_playing = true;
    }

    pub fn on_tts_audio_sent(&mut self) {
        self.last_audio_sent_at = Some(self.clock.now());
    }

    /// Current generation finished. Commits the assistant reply unless
    /// the turn was interrupted.
    pub fn on_tts_complete(&mut self) -> Vec<TurnAction> {
        self.tts_playing = false;
        if self.was_interrupted
            || !matches!(self.phase, TurnPhase::Generating | TurnPhase::Speaking)
        {
            return Vec::new();
        }

        self.phase = TurnPhase::Committing;
        if !self.pending_assistant_text.is_empty() {
            let text = std::mem::take(&mut self.pending_assistant_text);
            self.history.push_assistant(text);
            self.history_saved_at = Some(self.clock.now());
        }
        self.stats.completed += 1;

        let mut actions = Vec::new();
        if let Some(latency) = self.timings.report() {
            actions.push(TurnAction::ReportLatency(latency));
        }
        self.timings.clear();
        self.phase = TurnPhase::Idle;
        actions
    }

    // ─── Transcription events ────────────────────────────────────────

    /// Transcription upstream failed: the in-progress capture is lost,
    /// but a turn already dispatched keeps running and the session stays.
    pub fn on_transcript_error(&mut self) -> Vec<TurnAction> {
        self.transcript_buffer.clear();
        if self.phase == TurnPhase::Capturing {
            self.phase = TurnPhase::Idle;
        }
        Vec::new()
    }

    /// Vendor error ends the turn with nothing committed.
    pub fn on_tts_error(&mut self, message: &str) -> Vec<TurnAction> {
        warn!(%message, "synthesis error, turn ends without commit");
        self.tts_playing = false;
        if matches!(self.phase, TurnPhase::Generating | TurnPhase::Speaking) {
            self.pending_assistant_text.clear();
            self.timings.clear();
            self.phase = TurnPhase::Idle;
            return vec![TurnAction::CancelLlm];
        }
        Vec::new()
    }

    // ─── Close ───────────────────────────────────────────────────────

    /// Session teardown: an in-flight turn finalizes as interrupted.
    /// Returns whether one was live.
    pub fn finalize(&mut self) -> bool {
        let live = matches!(
            self.phase,
            TurnPhase::Transcribing
                | TurnPhase::Generating
                | TurnPhase::Speaking
                | TurnPhase::Committing
        );
        if live {
            self.was_interrupted = true;
            self.stats.interrupted += 1;
        }
        self.phase = TurnPhase::Idle;
        live
    }

    // ─── Accessors ───────────────────────────────────────────────────

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn stats(&self) -> TurnStats {
        self.stats
    }

    pub fn transcript_buffer(&self) -> &[String] {
        &self.transcript_buffer
    }

    pub fn was_interrupted(&self) -> bool {
        self.was_interrupted
    }
}
