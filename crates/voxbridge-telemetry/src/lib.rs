//! Pipeline telemetry
//!
//! Per-turn latency capture points and process-wide counters shared
//! across session tasks.

pub mod pipeline_metrics;
pub mod turn_timings;

pub use pipeline_metrics::PipelineMetrics;
pub use turn_timings::{TurnLatency, TurnTimings};
