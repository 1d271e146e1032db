//! Engine configuration with environment overrides.

use std::env;
use std::time::Duration;

use crate::core::context::EphemeralTopics;
use crate::core::segment::SegmenterConfig;
use crate::render::patch::PatchRules;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Reveal text unit by unit from the render loop instead of rendering every chunk at once.
    pub smooth_streaming: bool,
    /// Chars drained per stream per tick; at least one unit is always drained.
    pub min_chunk_buffer_size: usize,
    pub target_fps: u32,
    pub segment_min_split: usize,
    pub segment_max_unit: usize,
    pub pre_buffer_cap: usize,
    pub history_debounce: Duration,
    pub cleanup_grace: Duration,
    pub scroll_throttle: Duration,
    pub growth_pulse_threshold: usize,
    pub pulse_duration: Duration,
    pub entrance_duration: Duration,
    /// Auto-finalize streams that saw no activity for this long. Off by default.
    pub idle_timeout: Option<Duration>,
    pub ephemeral_topics: EphemeralTopics,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            smooth_streaming: true,
            min_chunk_buffer_size: 1,
            target_fps: 30,
            segment_min_split: 20,
            segment_max_unit: 10,
            pre_buffer_cap: 1000,
            history_debounce: Duration::from_secs(1),
            cleanup_grace: Duration::from_secs(5),
            scroll_throttle: Duration::from_millis(100),
            growth_pulse_threshold: 20,
            pulse_duration: Duration::from_millis(300),
            entrance_duration: Duration::from_millis(1000),
            idle_timeout: None,
            ephemeral_topics: EphemeralTopics::default(),
        }
    }
}

impl StreamConfig {
    /// Defaults overlaid with `TAPE_STREAM_*` variables. Invalid values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(smooth) = env_bool("TAPE_STREAM_SMOOTH") {
            config.smooth_streaming = smooth;
        }
        if let Some(size) = env_parse::<usize>("TAPE_STREAM_MIN_CHUNK") {
            config.min_chunk_buffer_size = size;
        }
        if let Some(fps) = env_parse::<u32>("TAPE_STREAM_FPS").filter(|fps| *fps > 0) {
            config.target_fps = fps;
        }
        if let Some(ms) = env_parse::<u64>("TAPE_STREAM_DEBOUNCE_MS") {
            config.history_debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("TAPE_STREAM_IDLE_TIMEOUT_MS").filter(|ms| *ms > 0) {
            config.idle_timeout = Some(Duration::from_millis(ms));
        }
        config
    }

    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.target_fps.max(1)
    }

    #[must_use]
    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            min_split: self.segment_min_split,
            max_unit: self.segment_max_unit,
        }
    }

    #[must_use]
    pub fn patch_rules(&self) -> PatchRules {
        PatchRules {
            growth_threshold: self.growth_pulse_threshold,
            pulse_duration: self.pulse_duration,
            entrance_duration: self.entrance_duration,
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    match env_string_opt(key)?.trim() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string_opt(key)?.trim().parse().ok()
}

pub(crate) fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value)
        }
    })
}
