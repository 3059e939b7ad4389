//! Level control and spectrum gating
//!
//! The coordinator consumes the recorder's level and spectrum events. Level
//! readings drive the PID controller, which adjusts the recording volume;
//! spectrum frames are only averaged while the last level reading was inside
//! the acceptable range. Once enough frames are collected the session is done.

use crate::pid::PidController;
use crate::spectrum::RunningSpectrumAverage;
use crate::volume::{CommandRunner, VolumeEndpoint};
use thiserror::Error;
use tracing::{debug, error, info};

/// Time between two level readings, in seconds
pub const LEVEL_INTERVAL: f64 = 0.1;

/// PID gains used for recording level control
pub const LEVEL_KP: f64 = 1.0;
pub const LEVEL_KI: f64 = 0.01;
pub const LEVEL_KD: f64 = 0.01;
/// Largest volume change applied per level reading, in percent
pub const LEVEL_CHANGE_LIMIT: f64 = 10.0;

/// Event emitted by the recording pipeline once per analysis window
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Peak level in dB attenuation (0 = loudest)
    Level { peak: f64 },
    /// Magnitude per frequency band, in dB
    Spectrum { magnitudes: Vec<f64> },
}

/// Acceptable recording level, inclusive on both ends.
///
/// `low` is the more attenuated (more negative) bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelRange {
    pub low: f64,
    pub high: f64,
}

impl LevelRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, level: f64) -> bool {
        self.low <= level && level <= self.high
    }

    /// Level the controller aims for
    pub fn midpoint(&self) -> f64 {
        (self.low + self.high) / 2.0
    }
}

impl Default for LevelRange {
    fn default() -> Self {
        Self::new(-10.0, -2.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub level_range: LevelRange,
    /// Spectrum frames to average before the session is done
    pub required_samples: usize,
    /// Passed to `frequencies_over_average` when judging the result
    pub magnitude_threshold: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            level_range: LevelRange::default(),
            required_samples: 20,
            magnitude_threshold: -5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    AdjustingLevel,
    Sampling,
    Done,
    /// Recording volume could not be controlled
    Aborted,
}

impl CoordinatorState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CoordinatorState::Done | CoordinatorState::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoordinatorState::Idle => "Idle",
            CoordinatorState::AdjustingLevel => "Adjusting recording level",
            CoordinatorState::Sampling => "Recording audio samples",
            CoordinatorState::Done => "Done",
            CoordinatorState::Aborted => "Aborted",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordinatorError {
    #[error("unable to control recording volume, test results would be meaningless")]
    VolumeUnavailable,
}

type CompletionHandler = Box<dyn FnMut() + Send>;

/// Owns the session's controller, analyzer and recording volume
pub struct LevelSpectrumCoordinator<R> {
    config: CoordinatorConfig,
    pid: PidController,
    analyzer: RunningSpectrumAverage,
    volume: VolumeEndpoint<R>,
    state: CoordinatorState,
    level_in_range: bool,
    on_complete: Option<CompletionHandler>,
}

impl<R: CommandRunner> LevelSpectrumCoordinator<R> {
    /// Create a coordinator using the default level controller
    pub fn new(
        config: CoordinatorConfig,
        analyzer: RunningSpectrumAverage,
        volume: VolumeEndpoint<R>,
    ) -> Self {
        let pid = PidController::new(
            LEVEL_KP,
            LEVEL_KI,
            LEVEL_KD,
            config.level_range.midpoint(),
        )
        .with_change_limit(LEVEL_CHANGE_LIMIT);
        Self::with_controller(config, pid, analyzer, volume)
    }

    pub fn with_controller(
        config: CoordinatorConfig,
        pid: PidController,
        analyzer: RunningSpectrumAverage,
        volume: VolumeEndpoint<R>,
    ) -> Self {
        Self {
            config,
            pid,
            analyzer,
            volume,
            state: CoordinatorState::Idle,
            level_in_range: false,
            on_complete: None,
        }
    }

    /// Called once when enough spectrum frames have been collected
    pub fn on_complete(&mut self, handler: impl FnMut() + Send + 'static) {
        self.on_complete = Some(Box::new(handler));
    }

    /// Dispatch one pipeline event.
    ///
    /// Events arriving after the session ended are ignored.
    pub fn handle(&mut self, event: PipelineEvent) -> Result<CoordinatorState, CoordinatorError> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        match event {
            PipelineEvent::Level { peak } => self.handle_level(peak)?,
            PipelineEvent::Spectrum { magnitudes } => self.handle_spectrum(&magnitudes),
        }

        Ok(self.state)
    }

    fn handle_level(&mut self, peak: f64) -> Result<(), CoordinatorError> {
        if !peak.is_finite() {
            debug!("Dropping non-finite peak level: {}", peak);
            return Ok(());
        }

        let Some(current) = self.volume.volume() else {
            error!("Unable to control recording volume. Test results may be wrong");
            self.transition(CoordinatorState::Aborted);
            return Err(CoordinatorError::VolumeUnavailable);
        };

        let change = self.pid.input_change(peak, LEVEL_INTERVAL);
        let target = (current as f64 + change).round() as i32;
        debug!(
            "Peak level: {:.2}, volume: {}%, volume change: {:.2}%",
            peak, current, change
        );

        if target != current as i32 {
            if let Err(e) = self.volume.set_volume(target) {
                debug!("Volume not adjusted: {}", e);
            }
        }

        self.level_in_range = self.config.level_range.contains(peak);
        self.transition(if self.level_in_range {
            CoordinatorState::Sampling
        } else {
            CoordinatorState::AdjustingLevel
        });
        Ok(())
    }

    fn handle_spectrum(&mut self, magnitudes: &[f64]) {
        if !self.level_in_range {
            return;
        }

        debug!(
            "Sampling, recorded {} samples",
            self.analyzer.sample_count()
        );
        self.analyzer.sample(magnitudes);

        if self.analyzer.sample_count() >= self.config.required_samples {
            info!("Sampling complete, ending process");
            self.transition(CoordinatorState::Done);
            if let Some(mut handler) = self.on_complete.take() {
                handler();
            }
        }
    }

    fn transition(&mut self, next: CoordinatorState) {
        if self.state != next {
            info!("{}", next.as_str());
            self.state = next;
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &RunningSpectrumAverage {
        &self.analyzer
    }

    pub fn volume_endpoint(&self) -> &VolumeEndpoint<R> {
        &self.volume
    }

    pub fn volume_endpoint_mut(&mut self) -> &mut VolumeEndpoint<R> {
        &mut self.volume
    }

    /// Whether the most recent level reading was inside the range
    pub fn level_in_range(&self) -> bool {
        self.level_in_range
    }

    /// Hand back the analyzer and the recording volume once the session ends
    pub fn into_parts(self) -> (RunningSpectrumAverage, VolumeEndpoint<R>) {
        (self.analyzer, self.volume)
    }
}
