//! Pass/fail decision for the test tone
//!
//! Looks up the band containing the test frequency in the averaged spectrum
//! and checks that it stands out from the rest of the spectrum.

use crate::spectrum::RunningSpectrumAverage;
use serde::Serialize;
use thiserror::Error;

/// Noise-floor margin used when listing peaks in the report
pub const PEAK_THRESHOLD: f64 = 2.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DetectionError {
    #[error("test frequency of {frequency} Hz doesn't match any of the spectrum bands (0 - {max} Hz)")]
    FrequencyOutOfRange { frequency: f64, max: f64 },
}

/// Outcome of analyzing one session's spectrum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionReport {
    pub frequency: f64,
    pub band: usize,
    /// Lower and upper edge of `band` in Hz
    pub band_range: (f64, f64),
    pub magnitude: f64,
    pub average: f64,
    /// Bands considered loud enough to carry the tone
    pub candidates: Vec<usize>,
    pub peaks: Vec<usize>,
    pub samples: usize,
    /// No band rose above the average, not even ambient noise was recorded
    pub silent_input: bool,
    pub passed: bool,
}

impl DetectionReport {
    pub fn summary(&self) -> String {
        let (lower, upper) = self.band_range;
        if self.passed {
            format!(
                "PASS: Test frequency of {} in band ({:.2}, {:.2}) which had a magnitude higher than the average",
                self.frequency, lower, upper
            )
        } else {
            format!(
                "FAIL: Test frequency of {} is not in one of the bands with higher-than-average magnitude",
                self.frequency
            )
        }
    }
}

/// Decide whether `frequency` was present in the averaged spectrum.
///
/// `threshold` has the meaning of
/// [`RunningSpectrumAverage::frequencies_over_average`]: -5.0 requires the
/// band to be 5 dB above the average.
pub fn detect(
    analyzer: &RunningSpectrumAverage,
    frequency: f64,
    threshold: f64,
) -> Result<DetectionReport, DetectionError> {
    let band = band_for(analyzer, frequency)?;
    let out_of_range = || DetectionError::FrequencyOutOfRange {
        frequency,
        max: analyzer.sampling_frequency() / 2.0,
    };
    let band_range = analyzer.frequencies_for_band(band).ok_or_else(out_of_range)?;
    let magnitude = *analyzer.spectrum().get(band).ok_or_else(out_of_range)?;

    let average = analyzer.average();
    let candidates = analyzer.frequencies_over_average(threshold);
    let silent_input = !analyzer.spectrum().iter().any(|&m| m > average);
    let passed = analyzer.sample_count() > 0 && candidates.contains(&band);

    Ok(DetectionReport {
        frequency,
        band,
        band_range,
        magnitude,
        average,
        candidates,
        peaks: analyzer.local_peaks(PEAK_THRESHOLD),
        samples: analyzer.sample_count(),
        silent_input,
        passed,
    })
}

/// Band for the test frequency, checked before any audio is played
pub fn band_for(analyzer: &RunningSpectrumAverage, frequency: f64) -> Result<usize, DetectionError> {
    analyzer
        .frequency_band_for(frequency)
        .ok_or(DetectionError::FrequencyOutOfRange {
            frequency,
            max: analyzer.sampling_frequency() / 2.0,
        })
}
