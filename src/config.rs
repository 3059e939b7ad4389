//! Session settings and their validation

use crate::coordinator::{CoordinatorConfig, LevelRange};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TEST_DURATION: Duration = Duration::from_secs(30);
/// Middle of the band at one third of the Nyquist range (256 bins, 44.1 kHz)
pub const DEFAULT_TEST_FREQUENCY: f64 = 7436.0;
pub const DEFAULT_BINS: usize = 256;
pub const DEFAULT_SAMPLING_FREQUENCY: u32 = 44100;
pub const DEFAULT_REQUIRED_SAMPLES: usize = 20;
pub const DEFAULT_THRESHOLD: f64 = -5.0;
pub const DEFAULT_OUTPUT_VOLUME: u8 = 30;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Volumes left behind once the session is over
pub const RESTORE_OUTPUT_VOLUME: i32 = 50;
pub const RESTORE_INPUT_VOLUME: i32 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("number of spectrum bins must be greater than zero")]
    NoBins,
    #[error("sampling frequency must be greater than zero")]
    NoSamplingFrequency,
    #[error("number of required samples must be greater than zero")]
    NoSamples,
    #[error("test duration must be greater than zero")]
    NoDuration,
    #[error("level range is inverted: low {low} dB is above high {high} dB")]
    InvertedLevelRange { low: f64, high: f64 },
    #[error("output volume {0}% is above 100%")]
    OutputVolume(u8),
    #[error("test frequency of {frequency} Hz is outside the spectrum (0 - {max} Hz]")]
    Frequency { frequency: f64, max: f64 },
}

/// Everything one calibration run needs to know
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub duration: Duration,
    pub frequency: f64,
    pub bins: usize,
    pub sampling_frequency: u32,
    pub required_samples: usize,
    pub threshold: f64,
    pub level_range: LevelRange,
    pub output_volume: u8,
    pub retry_delay: Duration,
    pub audio_path: Option<PathBuf>,
    pub waveform_path: Option<PathBuf>,
    pub spectrum_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration: DEFAULT_TEST_DURATION,
            frequency: DEFAULT_TEST_FREQUENCY,
            bins: DEFAULT_BINS,
            sampling_frequency: DEFAULT_SAMPLING_FREQUENCY,
            required_samples: DEFAULT_REQUIRED_SAMPLES,
            threshold: DEFAULT_THRESHOLD,
            level_range: LevelRange::default(),
            output_volume: DEFAULT_OUTPUT_VOLUME,
            retry_delay: DEFAULT_RETRY_DELAY,
            audio_path: None,
            waveform_path: None,
            spectrum_path: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bins == 0 {
            return Err(ConfigError::NoBins);
        }
        if self.sampling_frequency == 0 {
            return Err(ConfigError::NoSamplingFrequency);
        }
        if self.required_samples == 0 {
            return Err(ConfigError::NoSamples);
        }
        if self.duration.is_zero() {
            return Err(ConfigError::NoDuration);
        }

        let LevelRange { low, high } = self.level_range;
        if low > high {
            return Err(ConfigError::InvertedLevelRange { low, high });
        }
        if self.output_volume > 100 {
            return Err(ConfigError::OutputVolume(self.output_volume));
        }

        let max = self.sampling_frequency as f64 / 2.0;
        if !(self.frequency > 0.0 && self.frequency <= max) {
            return Err(ConfigError::Frequency {
                frequency: self.frequency,
                max,
            });
        }

        Ok(())
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            level_range: self.level_range,
            required_samples: self.required_samples,
            magnitude_threshold: self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(SessionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_default_frequency_band() {
        let config = SessionConfig::default();
        let band_width = config.sampling_frequency as f64 / 2.0 / config.bins as f64;
        // Band 86 of 256
        assert_eq!((config.frequency / band_width).ceil() as usize - 1, 86);
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let config = SessionConfig {
            bins: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoBins));

        let config = SessionConfig {
            required_samples: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoSamples));

        let config = SessionConfig {
            duration: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoDuration));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let config = SessionConfig {
            level_range: LevelRange::new(-2.0, -10.0),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvertedLevelRange {
                low: -2.0,
                high: -10.0
            })
        );
    }

    #[test]
    fn test_frequency_bounds() {
        let nyquist = SessionConfig {
            frequency: 22050.0,
            ..Default::default()
        };
        assert_eq!(nyquist.validate(), Ok(()));

        for frequency in [0.0, -1.0, 22050.5, f64::NAN] {
            let config = SessionConfig {
                frequency,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{} accepted", frequency);
        }
    }

    #[test]
    fn test_output_volume_limit() {
        let config = SessionConfig {
            output_volume: 101,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::OutputVolume(101)));
    }
}
