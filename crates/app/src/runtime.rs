//! Shared process context
//!
//! One of these per server: configuration, the shared HTTP client, the
//! completion streamer, metrics, and the clock every session reads.

use std::sync::Arc;

use voxbridge_foundation::{real_clock, BridgeConfig, SharedClock};
use voxbridge_llm::LlmStreamer;
use voxbridge_telemetry::PipelineMetrics;

pub struct Runtime {
    pub config: BridgeConfig,
    pub http: reqwest::Client,
    pub llm: LlmStreamer,
    pub metrics: PipelineMetrics,
    pub clock: SharedClock,
}

pub type SharedRuntime = Arc<Runtime>;

impl Runtime {
    pub fn new(config: BridgeConfig) -> SharedRuntime {
        Self::with_clock(config, real_clock())
    }

    pub fn with_clock(config: BridgeConfig, clock: SharedClock) -> SharedRuntime {
        let http = reqwest::Client::new();
        let llm = LlmStreamer::new(http.clone(), config.llm.clone());
        Arc::new(Self {
            config,
            http,
            llm,
            metrics: PipelineMetrics::new(),
            clock,
        })
    }
}
