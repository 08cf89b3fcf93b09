//! Utterance gate state machine
//!
//! Converts per-frame VAD decisions into `speech_started` /
//! `speech_ended` edges. Speech survives silence up to the hangover
//! window; crossing the window closes the utterance and hands back the
//! accumulated µ-law audio.

use std::time::{Duration, Instant};

use tracing::debug;

use voxbridge_foundation::SharedClock;
use voxbridge_telephony::ulaw_to_pcm;

use crate::engine::{VadEngine, VadError};
use crate::VadDecision;

/// Utterance edge produced by the gate.
#[derive(Debug, Clone)]
pub enum GateEvent {
    SpeechStarted {
        at: Instant,
    },
    /// Utterance closed: all µ-law audio from onset through the hangover.
    SpeechEnded {
        utterance: Vec<u8>,
        duration: Duration,
    },
}

enum GateState {
    Idle,
    Speaking {
        started_at: Instant,
        last_voice_at: Instant,
        pending: Vec<u8>,
    },
}

pub struct VadGate {
    engine: Box<dyn VadEngine>,
    clock: SharedClock,
    hangover: Duration,
    state: GateState,
}

impl VadGate {
    pub fn new(engine: Box<dyn VadEngine>, clock: SharedClock, silence_hangover_ms: u64) -> Self {
        Self {
            engine,
            clock,
            hangover: Duration::from_millis(silence_hangover_ms),
            state: GateState::Idle,
        }
    }

    /// Feed one inbound 20 ms µ-law frame.
    pub fn process_frame(&mut self, ulaw: &[u8]) -> Result<Option<GateEvent>, VadError> {
        let pcm = ulaw_to_pcm(ulaw);
        let decision = self.engine.classify(&pcm)?;
        let now = self.clock.now();

        let event = match (&mut self.state, decision) {
            (GateState::Idle, VadDecision::Voice) => {
                self.state = GateState::Speaking {
                    started_at: now,
                    last_voice_at: now,
                    pending: ulaw.to_vec(),
                };
                debug!("speech onset");
                Some(GateEvent::SpeechStarted { at: now })
            }
            (
                GateState::Speaking {
                    last_voice_at,
                    pending,
                    ..
                },
                VadDecision::Voice,
            ) => {
                *last_voice_at = now;
                pending.extend_from_slice(ulaw);
                None
            }
            (
                GateState::Speaking {
                    started_at,
                    last_voice_at,
                    pending,
                },
                VadDecision::Silence,
            ) => {
                if now.duration_since(*last_voice_at) <= self.hangover {
                    pending.extend_from_slice(ulaw);
                    None
                } else {
                    let utterance = std::mem::take(pending);
                    let duration = now.duration_since(*started_at);
                    self.state = GateState::Idle;
                    debug!(
                        bytes = utterance.len(),
                        duration_ms = duration.as_millis() as u64,
                        "utterance closed"
                    );
                    Some(GateEvent::SpeechEnded {
                        utterance,
                        duration,
                    })
                }
            }
            (GateState::Idle, VadDecision::Silence) => None,
        };

        Ok(event)
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self.state, GateState::Speaking { .. })
    }

    /// Onset timestamp of the in-progress utterance, if any.
    pub fn speech_started_at(&self) -> Option<Instant> {
        match &self.state {
            GateState::Speaking { started_at, .. } => Some(*started_at),
            GateState::Idle => None,
        }
    }

    /// Drop utterance state, e.g. when the session closes mid-speech.
    pub fn reset(&mut self) {
        self.state = GateState::Idle;
        self.engine.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voxbridge_foundation::TestClock;

    /// Engine that replays a script of decisions, ignoring the audio.
    struct ScriptedEngine {
        script: Vec<VadDecision>,
        pos: usize,
    }

    impl ScriptedEngine {
        fn new(script: Vec<VadDecision>) -> Self {
            Self { script, pos: 0 }
        }
    }

    impl VadEngine for ScriptedEngine {
        fn classify(&mut self, _frame: &[i16]) -> Result<VadDecision, VadError> {
            let decision = self.script[self.pos.min(self.script.len() - 1)];
            self.pos += 1;
            Ok(decision)
        }

        fn reset(&mut self) {
            self.pos = 0;
        }
    }

    const HANGOVER_MS: u64 = 800;

    fn gate_with(script: Vec<VadDecision>) -> (VadGate, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        let gate = VadGate::new(
            Box::new(ScriptedEngine::new(script)),
            clock.clone(),
            HANGOVER_MS,
        );
        (gate, clock)
    }

    fn frame(fill: u8) -> Vec<u8> {
        vec![fill; 160]
    }

    #[test]
    fn voice_onset_emits_speech_started() {
        let (mut gate, _clock) = gate_with(vec![VadDecision::Voice]);
        let event = gate.process_frame(&frame(1)).unwrap();
        assert!(matches!(event, Some(GateEvent::SpeechStarted { .. })));
        assert!(gate.is_speaking());
        assert!(gate.speech_started_at().is_some());
    }

    #[test]
    fn silence_within_hangover_does_not_end_utterance() {
        use VadDecision::*;
        let (mut gate, clock) = gate_with(vec![Voice, Silence, Silence, Silence, Silence]);

        gate.process_frame(&frame(1)).unwrap();
        // Many silence frames, each 200 ms apart but re-entering within
        // the hangover because the clock is only advanced to 800 ms total.
        for _ in 0..4 {
            clock.advance(Duration::from_millis(200));
            let event = gate.process_frame(&frame(2)).unwrap();
            assert!(event.is_none(), "utterance must survive silence <= hangover");
        }
        assert!(gate.is_speaking());
    }

    #[test]
    fn silence_past_hangover_ends_utterance() {
        use VadDecision::*;
        let (mut gate, clock) = gate_with(vec![Voice, Silence]);

        gate.process_frame(&frame(1)).unwrap();
        clock.advance(Duration::from_millis(HANGOVER_MS + 1));
        let event = gate.process_frame(&frame(2)).unwrap();

        match event {
            Some(GateEvent::SpeechEnded { utterance, duration }) => {
                // Only the onset frame accumulated; the closing frame is
                // not part of the utterance.
                assert_eq!(utterance, frame(1));
                assert_eq!(duration, Duration::from_millis(HANGOVER_MS + 1));
            }
            other => panic!("expected SpeechEnded, got {other:?}"),
        }
        assert!(!gate.is_speaking());
    }

    #[test]
    fn silence_at_exactly_hangover_keeps_utterance_open() {
        use VadDecision::*;
        let (mut gate, clock) = gate_with(vec![Voice, Silence]);

        gate.process_frame(&frame(1)).unwrap();
        clock.advance(Duration::from_millis(HANGOVER_MS));
        assert!(gate.process_frame(&frame(2)).unwrap().is_none());
        assert!(gate.is_speaking());
    }

    #[test]
    fn hangover_frames_are_part_of_the_utterance() {
        use VadDecision::*;
        let (mut gate, clock) = gate_with(vec![Voice, Silence, Voice, Silence]);

        gate.process_frame(&frame(1)).unwrap();
        clock.advance(Duration::from_millis(100));
        gate.process_frame(&frame(2)).unwrap();
        clock.advance(Duration::from_millis(100));
        gate.process_frame(&frame(3)).unwrap();
        clock.advance(Duration::from_millis(HANGOVER_MS + 1));
        let event = gate.process_frame(&frame(4)).unwrap();

        match event {
            Some(GateEvent::SpeechEnded { utterance, .. }) => {
                let mut expected = frame(1);
                expected.extend(frame(2));
                expected.extend(frame(3));
                assert_eq!(utterance, expected);
            }
            other => panic!("expected SpeechEnded, got {other:?}"),
        }
    }

    #[test]
    fn idle_silence_is_a_no_op() {
        let (mut gate, _clock) = gate_with(vec![VadDecision::Silence]);
        assert!(gate.process_frame(&frame(0)).unwrap().is_none());
        assert!(!gate.is_speaking());
        assert!(gate.speech_started_at().is_none());
    }

    #[test]
    fn reset_returns_gate_to_idle() {
        let (mut gate, _clock) = gate_with(vec![VadDecision::Voice]);
        gate.process_frame(&frame(1)).unwrap();
        assert!(gate.is_speaking());
        gate.reset();
        assert!(!gate.is_speaking());
    }

    #[test]
    fn voice_resets_the_hangover_window() {
        use VadDecision::*;
        let (mut gate, clock) = gate_with(vec![Voice, Silence, Voice, Silence]);

        gate.process_frame(&frame(1)).unwrap();
        clock.advance(Duration::from_millis(700));
        gate.process_frame(&frame(2)).unwrap();
        clock.advance(Duration::from_millis(50));
        gate.process_frame(&frame(3)).unwrap(); // voice again
        // 750 ms since the latest voice: still inside the window.
        clock.advance(Duration::from_millis(750));
        assert!(gate.process_frame(&frame(4)).unwrap().is_none());
        assert!(gate.is_speaking());
    }
}
