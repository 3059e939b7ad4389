use audiotest::audio::{ANALYSIS_INTERVAL, AudioStream, Player, Recorder};
use audiotest::config::{RESTORE_INPUT_VOLUME, RESTORE_OUTPUT_VOLUME, SessionConfig};
use audiotest::coordinator::{LevelRange, LevelSpectrumCoordinator};
use audiotest::detection::{self, DetectionReport};
use audiotest::dump;
use audiotest::error::{AudioTestError, EXIT_FAIL, EXIT_PASS};
use audiotest::spectrum::RunningSpectrumAverage;
use audiotest::volume::{Direction, PACTL, PactlRunner, VolumeEndpoint, VolumeRestore};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

#[derive(Parser)]
#[command(name = "audiotest")]
#[command(about = "Play a tone, record it back and check that it was heard")]
#[command(version = "0.1.0")]
struct Cli {
    /// Maximum test duration in seconds
    #[arg(short, long, default_value = "30")]
    time: u64,

    /// Test tone frequency in Hz
    #[arg(short, long, default_value = "7436")]
    frequency: f64,

    /// Save the recorded audio as a WAV file
    #[arg(short, long)]
    audio: Option<PathBuf>,

    /// Save the recorded samples, one per line
    #[arg(short, long)]
    waveform: Option<PathBuf>,

    /// Save the averaged spectrum as "frequency magnitude" lines
    #[arg(short = 'u', long)]
    spectrum: Option<PathBuf>,

    /// Number of spectrum bands
    #[arg(long, default_value = "256")]
    bins: usize,

    /// Recording sample rate in Hz
    #[arg(long, default_value = "44100")]
    sampling_frequency: u32,

    /// Spectrum frames to average before judging
    #[arg(long, default_value = "20")]
    samples: usize,

    /// dB relative to the spectrum average a band must reach (negative = above)
    #[arg(long, default_value = "-5.0", allow_hyphen_values = true)]
    threshold: f64,

    /// Lowest acceptable recording level in dB
    #[arg(long, default_value = "-10.0", allow_hyphen_values = true)]
    level_low: f64,

    /// Highest acceptable recording level in dB
    #[arg(long, default_value = "-2.0", allow_hyphen_values = true)]
    level_high: f64,

    /// Playback volume in percent
    #[arg(long, default_value = "30")]
    output_volume: u8,

    /// Delay between retries of failed pactl calls in milliseconds
    #[arg(long, default_value = "5000")]
    retry_delay_ms: u64,

    /// Output format of the report
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Log progress
    #[arg(short, long)]
    verbose: bool,

    /// Log everything
    #[arg(short, long)]
    debug: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            duration: Duration::from_secs(self.time),
            frequency: self.frequency,
            bins: self.bins,
            sampling_frequency: self.sampling_frequency,
            required_samples: self.samples,
            threshold: self.threshold,
            level_range: LevelRange::new(self.level_low, self.level_high),
            output_volume: self.output_volume,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            audio_path: self.audio.clone(),
            waveform_path: self.waveform.clone(),
            spectrum_path: self.spectrum.clone(),
        }
    }

    fn log_level(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::DEBUG
        } else if self.verbose {
            LevelFilter::INFO
        } else {
            LevelFilter::ERROR
        }
    }
}

fn init_logging(level: LevelFilter) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy(); // RUST_LOG takes precedence

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

/// One calibration run, from volume setup to the verdict
struct Session {
    config: SessionConfig,
    runner: PactlRunner,
}

impl Session {
    fn new(config: SessionConfig) -> Self {
        let runner = PactlRunner::new().with_backoff(config.retry_delay);
        Self { config, runner }
    }

    /// Check everything that can be checked before touching the hardware
    fn preflight(&self) -> Result<(), AudioTestError> {
        PactlRunner::ensure_available()
            .map_err(|_| AudioTestError::MissingDependency(PACTL.to_string()))?;
        self.config.validate()?;

        let analyzer = RunningSpectrumAverage::new(
            self.config.bins,
            self.config.sampling_frequency as f64,
        );
        let band = detection::band_for(&analyzer, self.config.frequency)?;
        debug!("Test frequency {} Hz is in band {}", self.config.frequency, band);
        Ok(())
    }

    fn endpoint(&self, direction: Direction) -> Result<VolumeEndpoint, AudioTestError> {
        let mut endpoint = VolumeEndpoint::new(direction, self.runner.clone());
        let hardware = endpoint
            .resolve()
            .ok_or(AudioTestError::NoEndpoint(direction))?;
        info!("Using {} {} ({})", direction, hardware.name, hardware.id);
        Ok(endpoint)
    }

    async fn run(self) -> Result<DetectionReport, AudioTestError> {
        self.preflight()?;

        let mut output = self.endpoint(Direction::Output)?;
        let mut input = self.endpoint(Direction::Input)?;
        let restore = VolumeRestore::new(
            output.clone(),
            RESTORE_OUTPUT_VOLUME,
            input.clone(),
            RESTORE_INPUT_VOLUME,
        );
        output.mute(false)?;
        output.set_volume(self.config.output_volume as i32)?;
        input.mute(false)?;
        // The level controller works its way up from silence
        input.set_volume(0)?;

        let stop_signal = Arc::new(AtomicBool::new(false));
        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();

        let mut player = Player::new(self.config.frequency, self.config.sampling_frequency, output)
            .map_err(AudioTestError::Pipeline)?;
        let mut recorder = Recorder::new(
            self.config.sampling_frequency,
            self.config.bins,
            events_tx,
            stop_signal.clone(),
        )
        .map_err(AudioTestError::Pipeline)?;

        if recorder.sample_rate() != self.config.sampling_frequency {
            warn!(
                "Recording at {} Hz instead of {} Hz",
                recorder.sample_rate(),
                self.config.sampling_frequency
            );
        }
        let analyzer = RunningSpectrumAverage::new(self.config.bins, recorder.sample_rate() as f64);
        detection::band_for(&analyzer, self.config.frequency)?;

        let mut coordinator =
            LevelSpectrumCoordinator::new(self.config.coordinator_config(), analyzer, input);
        let complete = stop_signal.clone();
        coordinator.on_complete(move || complete.store(true, Ordering::Release));

        let started = player
            .start()
            .and_then(|_| recorder.start())
            .map_err(AudioTestError::Pipeline);

        let outcome = match started {
            Ok(()) => {
                let deadline = tokio::time::Instant::now() + self.config.duration;
                loop {
                    if coordinator.state().is_terminal() {
                        break Ok(());
                    }
                    if let Some(err) = recorder.take_error() {
                        break Err(AudioTestError::Pipeline(anyhow::anyhow!(err)));
                    }

                    let wait = tokio::time::sleep_until(deadline);
                    tokio::select! {
                        event = events_rx.recv() => match event {
                            Some(event) => {
                                if let Err(e) = coordinator.handle(event) {
                                    break Err(e.into());
                                }
                            }
                            None => break Ok(()),
                        },
                        _ = wait => {
                            info!("Test time of {}s elapsed", self.config.duration.as_secs());
                            break Ok(());
                        }
                        _ = tokio::time::sleep(ANALYSIS_INTERVAL * 5) => {}
                    }
                }
            }
            Err(e) => Err(e),
        };

        stop_signal.store(true, Ordering::Release);
        let streams: [&mut dyn AudioStream; 2] = [&mut recorder, &mut player];
        for stream in streams {
            if let Err(e) = stream.stop() {
                warn!("Failed to stop {}: {}", stream.name(), e);
            }
        }

        drop(restore);

        self.write_dumps(&recorder, coordinator.analyzer());
        outcome?;

        let report = detection::detect(
            coordinator.analyzer(),
            self.config.frequency,
            self.config.threshold,
        )?;
        if report.samples < self.config.required_samples {
            warn!(
                "Only {} of {} spectrum samples were collected",
                report.samples, self.config.required_samples
            );
        }
        if report.silent_input {
            warn!("No band rose above the average, the microphone seems broken");
        }
        Ok(report)
    }

    fn write_dumps(&self, recorder: &Recorder, analyzer: &RunningSpectrumAverage) {
        if let Some(path) = &self.config.audio_path {
            match dump::write_wav(&recorder.samples(), path, recorder.sample_rate()) {
                Ok(()) => info!("Audio saved to {}", path.display()),
                Err(e) => warn!("Failed to save audio to {}: {}", path.display(), e),
            }
        }
        if let Some(path) = &self.config.waveform_path {
            match dump::write_waveform(&recorder.samples(), path) {
                Ok(()) => info!("Waveform saved to {}", path.display()),
                Err(e) => warn!("Failed to save waveform to {}: {}", path.display(), e),
            }
        }
        if let Some(path) = &self.config.spectrum_path {
            match dump::write_spectrum(analyzer, path) {
                Ok(()) => info!("Spectrum saved to {}", path.display()),
                Err(e) => warn!("Failed to save spectrum to {}: {}", path.display(), e),
            }
        }
    }
}

fn print_report(report: &DetectionReport, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", report.summary()),
        OutputFormat::Json => match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to serialize report to JSON: {}", e),
        },
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    let session = Session::new(cli.session_config());
    let code = match session.run().await {
        Ok(report) => {
            print_report(&report, &cli.format);
            if report.passed { EXIT_PASS } else { EXIT_FAIL }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };

    std::process::exit(code);
}
