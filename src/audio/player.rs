use super::{AudioStream, closest_config, log_transition};
use crate::volume::{CommandRunner, PactlRunner, VolumeEndpoint};
use anyhow::{Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SizedSample, StreamConfig};
use tracing::{debug, error};

/// Peak amplitude of the generated tone
const TONE_AMPLITUDE: f32 = 0.5;

/// Plays a sine tone on the default output device
pub struct Player<R = PactlRunner> {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    frequency: f64,
    volume: VolumeEndpoint<R>,
    stream: Option<cpal::Stream>,
}

impl<R: CommandRunner> Player<R> {
    pub fn new(frequency: f64, sample_rate: u32, volume: VolumeEndpoint<R>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device found"))?;

        let supported = closest_config(device.supported_output_configs()?, sample_rate)?;
        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.into();

        debug!(
            "Player: sine {} Hz on {} ({} Hz, {} channels, {:?})",
            frequency,
            device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
            frequency,
            volume,
            stream: None,
        })
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn volume(&self) -> &VolumeEndpoint<R> {
        &self.volume
    }

    pub fn volume_mut(&mut self) -> &mut VolumeEndpoint<R> {
        &mut self.volume
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        match self.sample_format {
            SampleFormat::F32 => self.build_stream_for::<f32>(),
            SampleFormat::I16 => self.build_stream_for::<i16>(),
            SampleFormat::U16 => self.build_stream_for::<u16>(),
            SampleFormat::I32 => self.build_stream_for::<i32>(),
            other => Err(anyhow!("Unsupported output sample format: {:?}", other)),
        }
    }

    fn build_stream_for<T>(&self) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32> + Send + 'static,
    {
        let channels = self.config.channels as usize;
        let mut tone = Tone::new(self.frequency, self.config.sample_rate.0);

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let value: T = cpal::Sample::from_sample(tone.next_sample());
                    for sample in frame.iter_mut() {
                        *sample = value;
                    }
                }
            },
            |err| {
                error!("Playback error: {}", err);
            },
            None,
        )?;

        Ok(stream)
    }
}

impl<R: CommandRunner> AudioStream for Player<R> {
    fn name(&self) -> &'static str {
        "Player"
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

/// Phase-accumulating sine generator
struct Tone {
    phase: f64,
    step: f64,
}

impl Tone {
    fn new(frequency: f64, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: std::f64::consts::TAU * frequency / sample_rate as f64,
        }
    }

    fn next_sample(&mut self) -> f32 {
        let value = TONE_AMPLITUDE * self.phase.sin() as f32;
        self.phase = (self.phase + self.step) % std::f64::consts::TAU;
        value
    }
}
