//! Shared counters for cross-session monitoring

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Process-wide pipeline counters. Cloneable handle, all fields shared.
#[derive(Clone, Default)]
pub struct PipelineMetrics {
    pub active_sessions: Arc<AtomicUsize>,
    pub frames_in: Arc<AtomicU64>,
    pub frames_out: Arc<AtomicU64>,
    pub turns_completed: Arc<AtomicU64>,
    pub turns_interrupted: Arc<AtomicU64>,
    /// Most recent VAD-end → first-audio latency, in milliseconds.
    pub last_end_to_end_ms: Arc<AtomicU64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn inbound_frame(&self) {
        self.frames_in.fetch_add(1, Ordering::Relaxed);
    }

    pub fn outbound_frame(&self) {
        self.frames_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_completed(&self, end_to_end: Duration) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
        self.last_end_to_end_ms
            .store(end_to_end.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn turn_interrupted(&self) {
        self.turns_interrupted.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_counter_tracks_open_and_close() {
        let metrics = PipelineMetrics::new();
        metrics.session_opened();
        metrics.session_opened();
        metrics.session_closed();
        assert_eq!(metrics.active_sessions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn turn_completion_records_latency() {
        let metrics = PipelineMetrics::new();
        metrics.turn_completed(Duration::from_millis(640));
        assert_eq!(metrics.turns_completed.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.last_end_to_end_ms.load(Ordering::Relaxed), 640);
    }
}
