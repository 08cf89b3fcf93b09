//! Utterance-boundary tests for the public gate API
//!
//! Covers the silence-hangover edge exactly at and just past the
//! threshold, and long runs of intra-utterance silence.

use std::sync::Arc;
use std::time::Duration;

use voxbridge_foundation::{SharedClock, TestClock};
use voxbridge_vad::{GateEvent, VadDecision, VadEngine, VadError, VadGate};

/// Classifies by a fixed script; the audio content is irrelevant.
struct Script {
    decisions: Vec<VadDecision>,
    pos: usize,
}

impl Script {
    fn new(decisions: Vec<VadDecision>) -> Self {
        Self { decisions, pos: 0 }
    }
}

impl VadEngine for Script {
    fn classify(&mut self, _frame: &[i16]) -> Result<VadDecision, VadError> {
        let decision = self.decisions[self.pos.min(self.decisions.len() - 1)];
        self.pos += 1;
        Ok(decision)
    }

    fn reset(&mut self) {
        self.pos = 0;
    }
}

const HANGOVER_MS: u64 = 800;

fn gate(decisions: Vec<VadDecision>) -> (VadGate, Arc<TestClock>) {
    let clock = Arc::new(TestClock::new());
    let shared: SharedClock = clock.clone();
    (
        VadGate::new(Box::new(Script::new(decisions)), shared, HANGOVER_MS),
        clock,
    )
}

fn ulaw_frame() -> Vec<u8> {
    vec![0xFF; 160]
}

#[test]
fn many_short_silences_never_end_the_utterance() {
    let mut decisions = vec![VadDecision::Voice];
    decisions.extend(std::iter::repeat(VadDecision::Silence).take(200));
    let (mut gate, clock) = gate(decisions);

    assert!(matches!(
        gate.process_frame(&ulaw_frame()).unwrap(),
        Some(GateEvent::SpeechStarted { .. })
    ));

    // 200 silence frames, 4 ms of virtual time apiece: exactly the
    // hangover in total, so the window never closes.
    for _ in 0..200 {
        clock.advance(Duration::from_millis(4));
        assert!(gate.process_frame(&ulaw_frame()).unwrap().is_none());
    }
    assert!(gate.is_speaking());
}

#[test]
fn silence_one_past_the_hangover_ends_the_utterance() {
    let (mut gate, clock) = gate(vec![VadDecision::Voice, VadDecision::Silence]);

    gate.process_frame(&ulaw_frame()).unwrap();
    clock.advance(Duration::from_millis(HANGOVER_MS + 1));

    match gate.process_frame(&ulaw_frame()).unwrap() {
        Some(GateEvent::SpeechEnded { duration, .. }) => {
            assert_eq!(duration, Duration::from_millis(HANGOVER_MS + 1));
        }
        other => panic!("expected SpeechEnded, got {other:?}"),
    }
    assert!(!gate.is_speaking());
}

#[test]
fn a_new_utterance_can_start_after_the_previous_one_ends() {
    use VadDecision::*;
    let (mut gate, clock) = gate(vec![Voice, Silence, Voice]);

    gate.process_frame(&ulaw_frame()).unwrap();
    clock.advance(Duration::from_millis(HANGOVER_MS + 1));
    assert!(matches!(
        gate.process_frame(&ulaw_frame()).unwrap(),
        Some(GateEvent::SpeechEnded { .. })
    ));

    clock.advance(Duration::from_millis(500));
    assert!(matches!(
        gate.process_frame(&ulaw_frame()).unwrap(),
        Some(GateEvent::SpeechStarted { .. })
    ));
    assert!(gate.is_speaking());
}
