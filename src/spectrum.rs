//! Running average of magnitude spectra
//!
//! Accumulates successive frequency-domain frames into a per-band mean and
//! answers band queries used to decide whether the test tone was captured:
//! - band lookup for a frequency and frequency range for a band
//! - bands above the spectrum's average
//! - local peaks above the estimated noise floor

use std::collections::HashMap;
use tracing::debug;

/// Per-band running mean over a fixed number of frequency bands.
///
/// Bands split the real frequency range `[0, sampling_frequency / 2]`
/// evenly; band 0 starts at 0 Hz.
#[derive(Debug, Clone)]
pub struct RunningSpectrumAverage {
    spectrum: Vec<f64>,
    frequencies: Vec<f64>,
    sample_count: usize,
    sampling_frequency: f64,
}

impl RunningSpectrumAverage {
    pub fn new(bins: usize, sampling_frequency: f64) -> Self {
        let band_width = (sampling_frequency / 2.0) / bins as f64;
        let frequencies = (0..bins).map(|i| band_width * i as f64).collect();

        Self {
            spectrum: vec![0.0; bins],
            frequencies,
            sample_count: 0,
            sampling_frequency,
        }
    }

    /// Fold one magnitude frame into the running mean.
    ///
    /// Frames whose width differs from the band count are ignored.
    pub fn sample(&mut self, magnitudes: &[f64]) {
        if magnitudes.len() != self.spectrum.len() {
            debug!(
                expected = self.spectrum.len(),
                got = magnitudes.len(),
                "Dropping spectrum frame with mismatched width"
            );
            return;
        }

        let n = self.sample_count as f64;
        for (avg, &new) in self.spectrum.iter_mut().zip(magnitudes) {
            *avg = (*avg * n + new) / (n + 1.0);
        }
        self.sample_count += 1;
    }

    /// Band containing `frequency`, or `None` outside `[0, fs / 2]`.
    ///
    /// A frequency lying exactly on a band edge belongs to the lower band.
    pub fn frequency_band_for(&self, frequency: f64) -> Option<usize> {
        let max_frequency = self.sampling_frequency / 2.0;
        if !(0.0..=max_frequency).contains(&frequency) || self.spectrum.is_empty() {
            return None;
        }

        let band = (frequency / self.band_width()).ceil() as usize;
        // 0 Hz sits on the lower edge of band 0; rounding at fs / 2 can
        // overshoot the last band
        Some(band.saturating_sub(1).min(self.spectrum.len() - 1))
    }

    /// Lower and upper edge of `band` in Hz
    pub fn frequencies_for_band(&self, band: usize) -> Option<(f64, f64)> {
        let lower = *self.frequencies.get(band)?;
        Some((lower, lower + self.band_width()))
    }

    /// Bands whose magnitude is at least `average - threshold`.
    ///
    /// A negative threshold asks for bands louder than the average.
    pub fn frequencies_over_average(&self, threshold: f64) -> Vec<usize> {
        let cutoff = self.average() - threshold;
        self.spectrum
            .iter()
            .enumerate()
            .filter(|&(_, &magnitude)| magnitude >= cutoff)
            .map(|(band, _)| band)
            .collect()
    }

    /// Interior bands louder than both neighbours and than the noise floor
    /// plus `threshold`.
    ///
    /// The noise floor is the most frequent magnitude in the spectrum.
    pub fn local_peaks(&self, threshold: f64) -> Vec<usize> {
        let Some(base_level) = self.base_level() else {
            return Vec::new();
        };

        self.spectrum
            .windows(3)
            .enumerate()
            .filter(|(_, w)| w[0] < w[1] && w[2] < w[1] && w[1] > base_level + threshold)
            .map(|(i, _)| i + 1)
            .collect()
    }

    /// Mode of the spectrum; ties go to the value seen first
    fn base_level(&self) -> Option<f64> {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for magnitude in &self.spectrum {
            *counts.entry(magnitude.to_bits()).or_default() += 1;
        }

        let mut best: Option<(f64, usize)> = None;
        for &magnitude in &self.spectrum {
            let count = counts[&magnitude.to_bits()];
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((magnitude, count));
            }
        }
        best.map(|(magnitude, _)| magnitude)
    }

    /// Mean magnitude across all bands
    pub fn average(&self) -> f64 {
        if self.spectrum.is_empty() {
            return 0.0;
        }
        self.spectrum.iter().sum::<f64>() / self.spectrum.len() as f64
    }

    /// Width of every band in Hz
    pub fn band_width(&self) -> f64 {
        (self.sampling_frequency / 2.0) / self.spectrum.len() as f64
    }

    pub fn spectrum(&self) -> &[f64] {
        &self.spectrum
    }

    /// Lower edge of every band in Hz
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn bins(&self) -> usize {
        self.spectrum.len()
    }

    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }
}
