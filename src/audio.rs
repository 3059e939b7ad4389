//! Audio playback and capture using CPAL
//!
//! The player emits the test tone on the default output device; the recorder
//! captures the default input device and turns it into level and spectrum
//! events for the coordinator.

mod analyzer;
mod player;
mod recorder;

pub use analyzer::{LevelMeter, MIN_LEVEL_DB, SPECTRUM_FLOOR_DB, SpectrumAnalyzer};
pub use player::Player;
pub use recorder::{ANALYSIS_INTERVAL, Recorder};

use anyhow::{Result, anyhow};
use cpal::{SampleRate, SupportedStreamConfig, SupportedStreamConfigRange};
use tracing::info;

/// Start/stop control shared by the player and the recorder
pub trait AudioStream {
    /// Name used in log lines
    fn name(&self) -> &'static str;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

pub(crate) fn log_transition(stream: &dyn AudioStream, description: &str) {
    info!("{}: {}", stream.name(), description);
}

/// Pick the supported configuration closest to the target sample rate
pub(crate) fn closest_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    target_sample_rate: u32,
) -> Result<SupportedStreamConfig> {
    let mut best_config = None;
    let mut best_diff = u32::MAX;

    for config in configs {
        let rate = target_sample_rate.clamp(config.min_sample_rate().0, config.max_sample_rate().0);
        let diff = rate.abs_diff(target_sample_rate);
        if diff < best_diff {
            best_diff = diff;
            best_config = Some((config, rate));
        }
    }

    let (config, rate) =
        best_config.ok_or_else(|| anyhow!("No suitable audio configuration found"))?;
    Ok(config.with_sample_rate(SampleRate(rate)))
}
