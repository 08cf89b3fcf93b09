//! Turn controller scenario tests
//!
//! Drives the per-call state machine through full conversational
//! exchanges on a virtual clock: clean turns, barge-in variants, the
//! commit/rollback race, late finals, and the greeting path.

use std::sync::Arc;
use std::time::Duration;

use voxbridge_app::session::turn::{TurnAction, TurnController, TurnPhase};
use voxbridge_foundation::{Clock, SharedClock, TestClock, TurnTunables};
use voxbridge_llm::ChatRole;

fn controller() -> (TurnController, Arc<TestClock>) {
    let clock = Arc::new(TestClock::new());
    let shared: SharedClock = clock.clone();
    (TurnController::new(shared, TurnTunables::default()), clock)
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Run a complete uninterrupted AI response through the controller.
fn complete_ai_response(ctrl: &mut TurnController, clock: &TestClock, text: &str) {
    clock.advance(ms(200));
    let actions = ctrl.on_llm_token(text.to_string());
    assert_eq!(actions, vec![TurnAction::SendTtsToken(text.to_string())]);

    let actions = ctrl.on_llm_complete(text.to_string());
    assert_eq!(actions, vec![TurnAction::FlushTts]);

    clock.advance(ms(100));
    ctrl.on_tts_first_chunk();
    ctrl.on_tts_audio_sent();
    clock.advance(ms(100));
    ctrl.on_tts_complete();
}

// ─── Scenario: clean single turn ─────────────────────────────────────

#[test]
fn clean_turn_commits_user_and_assistant() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    assert_eq!(ctrl.phase(), TurnPhase::Capturing);
    ctrl.on_transcript_final("안녕하세요".into());

    clock.advance(ms(800));
    let actions = ctrl.on_speech_ended();
    assert_eq!(ctrl.phase(), TurnPhase::Generating);
    assert!(matches!(
        actions.as_slice(),
        [
            TurnAction::EnsureTtsOpen,
            TurnAction::BeginTtsTurn,
            TurnAction::StartLlm { user_message, .. }
        ] if user_message == "안녕하세요"
    ));

    // Tokens stream, synthesis follows, nothing interrupts.
    clock.advance(ms(200));
    let actions = ctrl.on_llm_token("네, ".into());
    assert_eq!(actions, vec![TurnAction::SendTtsToken("네, ".into())]);
    assert_eq!(ctrl.phase(), TurnPhase::Speaking);
    ctrl.on_llm_token("안녕하세요.".into());

    let reply = "네, 안녕하세요. 무엇을 도와드릴까요?";
    let actions = ctrl.on_llm_complete(reply.into());
    assert_eq!(actions, vec![TurnAction::FlushTts]);

    clock.advance(ms(150));
    ctrl.on_tts_first_chunk();
    for _ in 0..120 {
        ctrl.on_tts_audio_sent();
    }
    clock.advance(ms(2400));
    let actions = ctrl.on_tts_complete();

    assert_eq!(ctrl.phase(), TurnPhase::Idle);
    let history = ctrl.history().entries();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, ChatRole::User);
    assert_eq!(history[0].content, "안녕하세요");
    assert_eq!(history[1].role, ChatRole::Assistant);
    assert_eq!(history[1].content, reply);

    // End-to-end latency comes out of the same timeline.
    match actions.as_slice() {
        [TurnAction::ReportLatency(latency)] => {
            assert_eq!(latency.vad_end_to_llm_call, ms(0));
            assert_eq!(latency.llm_call_to_first_token, ms(200));
            assert_eq!(latency.first_token_to_first_chunk, ms(150));
            assert_eq!(latency.end_to_end, ms(350));
        }
        other => panic!("expected latency report, got {other:?}"),
    }
    assert_eq!(ctrl.stats().completed, 1);
    assert_eq!(ctrl.stats().interrupted, 0);
}

#[test]
fn empty_buffer_speech_ended_returns_to_idle() {
    let (mut ctrl, _clock) = controller();
    ctrl.on_speech_started();
    let actions = ctrl.on_speech_ended();
    assert!(actions.is_empty());
    assert_eq!(ctrl.phase(), TurnPhase::Idle);
    assert!(ctrl.history().is_empty());
}

#[test]
fn duplicate_speech_ended_is_ignored() {
    let (mut ctrl, _clock) = controller();
    ctrl.on_speech_started();
    ctrl.on_speech_ended();
    let actions = ctrl.on_speech_ended();
    assert!(actions.is_empty());
    assert_eq!(ctrl.phase(), TurnPhase::Idle);
}

// ─── Scenario: barge-in during synthesis ─────────────────────────────

#[test]
fn barge_in_with_transcript_interrupts_and_discards_reply() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("첫 질문".into());
    ctrl.on_speech_ended();
    ctrl.on_llm_token("대답".into());
    ctrl.on_llm_complete("대답입니다".into());
    ctrl.on_tts_first_chunk();
    ctrl.on_tts_audio_sent();

    // 300 ms into playback the caller starts talking again.
    clock.advance(ms(300));
    ctrl.on_speech_started();
    let speech_start = clock.now();

    // 400 ms of overlap: below the fast threshold, no interrupt yet.
    clock.advance(ms(400));
    ctrl.on_transcript_final("잠깐만요".into());
    assert!(ctrl
        .on_media_frame(true, Some(speech_start))
        .is_empty());

    // Past 500 ms with a transcript: the fast path fires.
    clock.advance(ms(200));
    let actions = ctrl.on_media_frame(true, Some(speech_start));
    assert_eq!(
        actions,
        vec![
            TurnAction::SendClear,
            TurnAction::InterruptTts,
            TurnAction::CancelLlm,
        ]
    );
    assert!(ctrl.was_interrupted());
    assert_eq!(ctrl.stats().interrupted, 1);

    // The aborted reply never reaches history.
    let history = ctrl.history().entries();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, ChatRole::User);

    // The cancelled completion reports back as aborted; expected, no-op.
    assert!(ctrl.on_llm_failed("aborted", true).is_empty());

    // The interrupting utterance becomes the next turn.
    clock.advance(ms(900));
    let actions = ctrl.on_speech_ended();
    assert!(matches!(
        actions.as_slice(),
        [_, _, TurnAction::StartLlm { user_message, .. }] if user_message == "잠깐만요"
    ));
}

#[test]
fn interrupt_does_not_refire_while_turn_is_already_interrupted() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    ctrl.on_llm_token("토큰".into());
    ctrl.on_tts_first_chunk();
    ctrl.on_tts_audio_sent();

    ctrl.on_speech_started();
    let started = clock.now();
    clock.advance(ms(1600));
    ctrl.on_transcript_final("새 질문".into());
    assert!(!ctrl.on_media_frame(true, Some(started)).is_empty());
    assert!(ctrl.on_media_frame(true, Some(started)).is_empty());
    assert_eq!(ctrl.stats().interrupted, 1);
}

// ─── Scenario: silent false start ────────────────────────────────────

#[test]
fn safety_rule_interrupts_without_transcript_at_1500ms() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    ctrl.on_llm_token("대답".into());
    ctrl.on_tts_first_chunk();
    ctrl.on_tts_audio_sent();

    // Caller makes noise; the transcription service returns nothing.
    ctrl.on_speech_started();
    let started = clock.now();

    clock.advance(ms(1499));
    assert!(ctrl.on_media_frame(true, Some(started)).is_empty());

    clock.advance(ms(1));
    let actions = ctrl.on_media_frame(true, Some(started));
    assert_eq!(actions[0], TurnAction::SendClear);
    assert!(ctrl.was_interrupted());

    // Nothing committed for the interrupted response.
    assert_eq!(ctrl.history().len(), 1);
}

#[test]
fn short_utterance_without_transcript_does_not_interrupt() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    ctrl.on_llm_token("대답".into());
    ctrl.on_tts_first_chunk();
    ctrl.on_tts_audio_sent();

    ctrl.on_speech_started();
    let started = clock.now();
    clock.advance(ms(499));
    assert!(ctrl.on_media_frame(true, Some(started)).is_empty());
}

#[test]
fn no_interrupt_when_synthesis_is_not_active() {
    let (mut ctrl, clock) = controller();

    // A turn is generating but no audio has gone out and none is recent:
    // the check is skipped entirely.
    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();

    ctrl.on_speech_started();
    let started = clock.now();
    clock.advance(ms(2000));
    ctrl.on_transcript_final("더".into());
    assert!(ctrl.on_media_frame(true, Some(started)).is_empty());
    assert!(!ctrl.was_interrupted());
}

// ─── Scenario: commit/rollback race ──────────────────────────────────

#[test]
fn fresh_commit_rolls_back_when_barge_in_races_it() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    complete_ai_response(&mut ctrl, &clock, "대답입니다");
    assert_eq!(ctrl.history().len(), 2);
    assert!(ctrl.history().tail_is_assistant());

    // 200 ms after the commit the caller barges in with a transcript.
    ctrl.on_speech_started();
    let started = clock.now();
    clock.advance(ms(200));
    ctrl.on_transcript_final("아니요".into());
    clock.advance(ms(400));
    let actions = ctrl.on_media_frame(true, Some(started));
    assert!(!actions.is_empty(), "barge-in should fire on recent audio");

    // The racing commit was undone.
    assert_eq!(ctrl.history().len(), 1);
    assert!(!ctrl.history().tail_is_assistant());
}

#[test]
fn stale_commit_survives_a_later_barge_in() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    complete_ai_response(&mut ctrl, &clock, "대답입니다");
    assert_eq!(ctrl.history().len(), 2);

    // Well past the rollback window (and the recent-audio window): the
    // commit stands and no interrupt fires.
    clock.advance(ms(2500));
    ctrl.on_speech_started();
    let started = clock.now();
    clock.advance(ms(700));
    ctrl.on_transcript_final("다음".into());
    assert!(ctrl.on_media_frame(true, Some(started)).is_empty());
    assert_eq!(ctrl.history().len(), 2);
}

// ─── Scenario: late final ────────────────────────────────────────────

#[test]
fn final_after_dispatch_joins_the_next_turn() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("첫 문장".into());
    ctrl.on_speech_ended();
    assert_eq!(ctrl.phase(), TurnPhase::Generating);

    // The transcription service sends one more final 100 ms later.
    clock.advance(ms(100));
    ctrl.on_transcript_final("늦은 문장".into());
    assert_eq!(ctrl.transcript_buffer(), ["늦은 문장".to_string()]);

    // History for the current turn holds only the dispatched text.
    assert_eq!(ctrl.history().entries()[0].content, "첫 문장");

    complete_ai_response(&mut ctrl, &clock, "답변");

    // Next utterance dispatches with the late final included.
    ctrl.on_speech_started();
    ctrl.on_transcript_final("둘째 질문".into());
    clock.advance(ms(2500));
    let actions = ctrl.on_speech_ended();
    assert!(matches!(
        actions.as_slice(),
        [_, _, TurnAction::StartLlm { user_message, .. }]
            if user_message == "늦은 문장 둘째 질문"
    ));
}

// ─── Scenario: greeting ──────────────────────────────────────────────

#[test]
fn greeting_commits_when_uninterrupted() {
    let (mut ctrl, clock) = controller();

    let actions = ctrl.start_greeting();
    assert!(matches!(
        actions.as_slice(),
        [TurnAction::BeginTtsTurn, TurnAction::StartLlm { user_message, history }]
            if user_message.is_empty() && history.is_empty()
    ));

    complete_ai_response(&mut ctrl, &clock, "안녕하세요, 무엇을 도와드릴까요?");
    let history = ctrl.history().entries();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, ChatRole::Assistant);
}

#[test]
fn interrupted_greeting_is_not_recorded() {
    let (mut ctrl, clock) = controller();

    ctrl.start_greeting();
    ctrl.on_llm_token("안녕".into());
    ctrl.on_tts_first_chunk();
    ctrl.on_tts_audio_sent();

    // 200 ms into greeting audio the caller talks, with a transcript.
    clock.advance(ms(200));
    ctrl.on_speech_started();
    let started = clock.now();
    clock.advance(ms(600));
    ctrl.on_transcript_final("여보세요".into());
    let actions = ctrl.on_media_frame(true, Some(started));
    assert!(!actions.is_empty());

    ctrl.on_llm_failed("aborted", true);
    assert!(ctrl.history().is_empty());

    // The first real turn begins immediately with the caller's words.
    clock.advance(ms(900));
    let actions = ctrl.on_speech_ended();
    assert!(matches!(
        actions.as_slice(),
        [_, _, TurnAction::StartLlm { user_message, .. }] if user_message == "여보세요"
    ));
}

// ─── Failure paths ───────────────────────────────────────────────────

#[test]
fn genuine_llm_failure_aborts_turn_without_commit() {
    let (mut ctrl, _clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    ctrl.on_llm_token("부분".into());

    let actions = ctrl.on_llm_failed("upstream 500", false);
    assert_eq!(
        actions,
        vec![TurnAction::SendClear, TurnAction::InterruptTts]
    );
    assert_eq!(ctrl.phase(), TurnPhase::Idle);
    assert_eq!(ctrl.history().len(), 1);
}

#[test]
fn tts_vendor_error_ends_turn_without_commit() {
    let (mut ctrl, _clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    ctrl.on_llm_token("부분".into());
    ctrl.on_llm_complete("부분 전체".into());

    let actions = ctrl.on_tts_error("vendor says no");
    assert_eq!(actions, vec![TurnAction::CancelLlm]);
    assert_eq!(ctrl.phase(), TurnPhase::Idle);
    assert!(!ctrl.was_interrupted());
    assert_eq!(ctrl.history().len(), 1);
}

#[test]
fn tokens_arriving_after_interrupt_are_dropped() {
    let (mut ctrl, clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    ctrl.on_llm_token("대답".into());
    ctrl.on_tts_first_chunk();
    ctrl.on_tts_audio_sent();

    ctrl.on_speech_started();
    let started = clock.now();
    clock.advance(ms(1600));
    assert!(!ctrl.on_media_frame(true, Some(started)).is_empty());

    // A straggler token from the not-yet-dead completion task.
    assert!(ctrl.on_llm_token("늦은 토큰".into()).is_empty());
    // And a straggler completion: no flush for an interrupted turn.
    assert!(ctrl.on_llm_complete("늦은 전체".into()).is_empty());
}

#[test]
fn finalize_marks_live_turn_interrupted() {
    let (mut ctrl, _clock) = controller();

    ctrl.on_speech_started();
    ctrl.on_transcript_final("질문".into());
    ctrl.on_speech_ended();
    assert!(ctrl.finalize());
    assert_eq!(ctrl.stats().interrupted, 1);
    assert_eq!(ctrl.phase(), TurnPhase::Idle);

    // Idle sessions finalize with nothing live.
    assert!(!ctrl.finalize());
}
