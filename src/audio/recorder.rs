//! Capture from the default input device
//!
//! Every [`ANALYSIS_INTERVAL`] of recorded audio becomes one
//! [`PipelineEvent::Level`] followed by one [`PipelineEvent::Spectrum`].

use super::analyzer::{LevelMeter, SpectrumAnalyzer};
use super::{AudioStream, closest_config, log_transition};
use crate::coordinator::PipelineEvent;
use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};

/// Length of audio behind each level/spectrum pair
pub const ANALYSIS_INTERVAL: Duration = Duration::from_millis(100);

pub struct Recorder {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    bands: usize,
    events: UnboundedSender<PipelineEvent>,
    stop_signal: Arc<AtomicBool>,
    buffer: Arc<Mutex<Vec<i16>>>,
    error: Arc<Mutex<Option<String>>>,
    stream: Option<cpal::Stream>,
}

impl Recorder {
    /// Open the default input device.
    ///
    /// Events stop flowing once `stop_signal` is set, either by the caller
    /// or by a stream error.
    pub fn new(
        sample_rate: u32,
        bands: usize,
        events: UnboundedSender<PipelineEvent>,
        stop_signal: Arc<AtomicBool>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No default input device found"))?;

        let supported = closest_config(device.supported_input_configs()?, sample_rate)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        debug!(
            "Recorder: {} ({} Hz, {} channels, {:?})",
            device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            bands,
            events,
            stop_signal,
            buffer: Arc::new(Mutex::new(Vec::new())),
            error: Arc::new(Mutex::new(None)),
            stream: None,
        })
    }

    /// Actual capture rate, which may differ from the requested one
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    /// Mono samples captured so far
    pub fn samples(&self) -> Vec<i16> {
        self.buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    /// Error reported by the input stream, if any
    pub fn take_error(&self) -> Option<String> {
        self.error.lock().ok().and_then(|mut error| error.take())
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        match self.sample_format {
            SampleFormat::F32 => self.build_stream_for::<f32>(),
            SampleFormat::I16 => self.build_stream_for::<i16>(),
            SampleFormat::U16 => self.build_stream_for::<u16>(),
            SampleFormat::I32 => self.build_stream_for::<i32>(),
            other => Err(anyhow!("Unsupported input sample format: {:?}", other)),
        }
    }

    fn build_stream_for<T>(&self) -> Result<cpal::Stream>
    where
        T: SizedSample + Send + 'static,
        f32: FromSample<T>,
    {
        let channels = (self.config.channels as usize).max(1);
        let mut analysis = IntervalAnalysis::new(self.sample_rate(), self.bands);
        let buffer = self.buffer.clone();
        let events = self.events.clone();
        let stop_clone = self.stop_signal.clone();
        let error_slot = self.error.clone();
        let error_stop = self.stop_signal.clone();

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if stop_clone.load(Ordering::Acquire) {
                    return;
                }

                let Ok(mut buffer) = buffer.lock() else {
                    return;
                };
                for frame in data.chunks(channels) {
                    let sum: f32 = frame
                        .iter()
                        .map(|&s| -> f32 { cpal::Sample::from_sample(s) })
                        .sum();
                    let sample = sum / frame.len() as f32;
                    buffer.push((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);

                    if let Some([level, spectrum]) = analysis.push(sample) {
                        // Receiver gone means the session is over
                        if events.send(level).is_err() || events.send(spectrum).is_err() {
                            stop_clone.store(true, Ordering::Release);
                            return;
                        }
                    }
                }
            },
            move |err| {
                error!("Audio device disconnected or stream error: {}", err);
                if let Ok(mut slot) = error_slot.lock() {
                    slot.get_or_insert_with(|| err.to_string());
                }
                error_stop.store(true, Ordering::Release);
            },
            None,
        )?;

        Ok(stream)
    }
}

impl AudioStream for Recorder {
    fn name(&self) -> &'static str {
        "Recorder"
    }

    fn start(&mut self) -> Result<()> {
        if self.stream.is_none() {
            self.stream = Some(self.build_stream()?);
        }
        if let Some(stream) = &self.stream {
            stream.play()?;
        }
        log_transition(self, "Starting");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            stream.pause()?;
        }
        log_transition(self, "Stopping");
        Ok(())
    }
}

/// Splits the incoming signal into analysis intervals
struct IntervalAnalysis {
    interval_samples: usize,
    pending: usize,
    level: LevelMeter,
    spectrum: SpectrumAnalyzer,
}

impl IntervalAnalysis {
    fn new(sample_rate: u32, bands: usize) -> Self {
        let interval_samples =
            (sample_rate as u128 * ANALYSIS_INTERVAL.as_millis() / 1000).max(1) as usize;
        Self {
            interval_samples,
            pending: 0,
            level: LevelMeter::new(),
            spectrum: SpectrumAnalyzer::new(bands),
        }
    }

    /// Feed one mono sample; returns the level and spectrum events when an
    /// interval completes
    fn push(&mut self, sample: f32) -> Option<[PipelineEvent; 2]> {
        self.level.push(sample);
        self.spectrum.push_sample(sample);
        self.pending += 1;

        if self.pending < self.interval_samples {
            return None;
        }
        self.pending = 0;

        Some([
            PipelineEvent::Level {
                peak: self.level.finish_interval(),
            },
            PipelineEvent::Spectrum {
                magnitudes: self.spectrum.finish_interval(),
            },
        ])
    }
}
