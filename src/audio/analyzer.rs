//! Per-interval level and spectrum measurement
//!
//! Turns the raw recorded signal into the two readings the coordinator
//! works with:
//! - peak level of the interval in dB (0 dB = full scale)
//! - magnitude per frequency band in dB, floored at [`SPECTRUM_FLOOR_DB`]

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Lowest level reported by the level meter
pub const MIN_LEVEL_DB: f64 = -100.0;
/// Magnitudes below this are reported as this value
pub const SPECTRUM_FLOOR_DB: f64 = -60.0;

/// Tracks the peak sample of the current interval
#[derive(Debug, Default)]
pub struct LevelMeter {
    peak: f32,
}

impl LevelMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sample: f32) {
        self.peak = self.peak.max(sample.abs());
    }

    /// Peak of the interval in dB, then start a new interval
    pub fn finish_interval(&mut self) -> f64 {
        let peak = std::mem::take(&mut self.peak) as f64;
        if peak <= 0.0 {
            return MIN_LEVEL_DB;
        }
        (20.0 * peak.log10()).clamp(MIN_LEVEL_DB, 0.0)
    }
}

/// FFT-based spectrum analyzer producing a fixed number of bands.
///
/// Frames of `2 * bands` samples are Hann-windowed and transformed; the power
/// of all frames completed during one interval is averaged.
pub struct SpectrumAnalyzer {
    bands: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    frame: Vec<f32>,
    power_sum: Vec<f64>,
    frames: usize,
}

impl SpectrumAnalyzer {
    pub fn new(bands: usize) -> Self {
        let fft_size = bands * 2;

        // Generate Hann window to reduce spectral leakage
        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / fft_size as f32).cos())
            })
            .collect();

        Self {
            bands,
            fft: FftPlanner::new().plan_fft_forward(fft_size),
            window,
            frame: Vec::with_capacity(fft_size),
            power_sum: vec![0.0; bands],
            frames: 0,
        }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn push_sample(&mut self, sample: f32) {
        self.frame.push(sample);
        if self.frame.len() >= self.window.len() {
            self.process_frame();
            self.frame.clear();
        }
    }

    fn process_frame(&mut self) {
        let mut buffer: Vec<Complex<f32>> = self
            .frame
            .iter()
            .zip(self.window.iter())
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        // Hann coherent gain is 0.5: a full-scale sine peaks at N / 4
        let scale = 4.0 / self.window.len() as f64;
        for (sum, bin) in self.power_sum.iter_mut().zip(&buffer) {
            let amplitude = bin.norm() as f64 * scale;
            *sum += amplitude * amplitude;
        }
        self.frames += 1;
    }

    /// Band magnitudes in dB for the interval, then start a new interval.
    ///
    /// An interval without a complete frame reports the floor everywhere.
    pub fn finish_interval(&mut self) -> Vec<f64> {
        let frames = std::mem::take(&mut self.frames);
        self.power_sum
            .iter_mut()
            .map(|sum| {
                let power = std::mem::take(sum);
                if frames == 0 || power <= 0.0 {
                    return SPECTRUM_FLOOR_DB;
                }
                (10.0 * (power / frames as f64).log10()).max(SPECTRUM_FLOOR_DB)
            })
            .collect()
    }
}
