//! Drives a whole calibration session against a simulated room: the recorded
//! level follows the input volume set through the fake `pactl`.

use audiotest::config::SessionConfig;
use audiotest::coordinator::{
    CoordinatorError, CoordinatorState, LevelSpectrumCoordinator, PipelineEvent,
};
use audiotest::detection;
use audiotest::spectrum::RunningSpectrumAverage;
use audiotest::volume::{CommandError, Direction, VolumeCommand, VolumeEndpoint};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const SOURCES: &str = "0\talsa_output.pci-0000_00_1f.3.analog-stereo.monitor\tmodule-alsa-card.c\ts16le 2ch 44100Hz\tIDLE\n\
    1\talsa_input.pci-0000_00_1f.3.analog-stereo\tmodule-alsa-card.c\ts16le 2ch 44100Hz\tRUNNING";

const MONITORS_ONLY: &str =
    "0\talsa_output.pci-0000_00_1f.3.analog-stereo.monitor\tmodule-alsa-card.c\ts16le 2ch 44100Hz\tIDLE";

/// Room whose recorded peak rises half a dB per volume percent
#[derive(Clone, Default)]
struct Room {
    volume: Arc<Mutex<u8>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl Room {
    fn runner(
        &self,
        listing: &'static str,
    ) -> impl Fn(&VolumeCommand) -> Result<String, CommandError> + use<> {
        let volume = self.volume.clone();
        let commands = self.commands.clone();
        move |command: &VolumeCommand| -> Result<String, CommandError> {
            commands.lock().unwrap().push(command.to_string());
            match command {
                VolumeCommand::List(_) => Ok(listing.to_string()),
                VolumeCommand::SetVolume { percent, .. } => {
                    *volume.lock().unwrap() = *percent;
                    Ok(String::new())
                }
                VolumeCommand::SetMute { .. } => Ok(String::new()),
            }
        }
    }

    fn peak(&self) -> f64 {
        (-40.0 + 0.5 * *self.volume.lock().unwrap() as f64).min(0.0)
    }

    fn volume(&self) -> u8 {
        *self.volume.lock().unwrap()
    }
}

/// Quiet spectrum with the tone standing out in `band`
fn tone_spectrum(bins: usize, band: usize) -> Vec<f64> {
    (0..bins)
        .map(|i| match i {
            _ if i == band => -20.0,
            _ if i % 7 == 0 => -56.0,
            _ => -60.0,
        })
        .collect()
}

#[test]
fn test_session_converges_and_detects_tone() {
    let config = SessionConfig::default();
    let room = Room::default();

    let mut volume = VolumeEndpoint::new(Direction::Input, room.runner(SOURCES));
    assert_eq!(volume.resolve().map(|e| e.id), Some(1));
    volume.set_volume(0).unwrap();

    let analyzer = RunningSpectrumAverage::new(config.bins, config.sampling_frequency as f64);
    let band = detection::band_for(&analyzer, config.frequency).unwrap();
    assert_eq!(band, 86);

    let mut coordinator =
        LevelSpectrumCoordinator::new(config.coordinator_config(), analyzer, volume);
    let completions = Arc::new(AtomicUsize::new(0));
    let counter = completions.clone();
    coordinator.on_complete(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut events = 0;
    while !coordinator.state().is_terminal() && events < 400 {
        coordinator
            .handle(PipelineEvent::Level { peak: room.peak() })
            .unwrap();
        coordinator
            .handle(PipelineEvent::Spectrum {
                magnitudes: tone_spectrum(config.bins, band),
            })
            .unwrap();
        events += 1;
    }

    assert_eq!(coordinator.state(), CoordinatorState::Done);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.analyzer().sample_count(), config.required_samples);
    assert!(
        config.level_range.contains(room.peak()),
        "level {} at volume {}",
        room.peak(),
        room.volume()
    );

    // Late events change nothing
    coordinator
        .handle(PipelineEvent::Spectrum {
            magnitudes: tone_spectrum(config.bins, band),
        })
        .unwrap();
    assert_eq!(coordinator.analyzer().sample_count(), config.required_samples);

    let report =
        detection::detect(coordinator.analyzer(), config.frequency, config.threshold).unwrap();
    assert!(report.passed);
    assert_eq!(report.candidates, vec![band]);
    assert!(report.peaks.contains(&band));
    assert!(!report.silent_input);
    assert!(report.summary().starts_with("PASS"));

    let commands = room.commands.lock().unwrap();
    assert_eq!(commands[0], "pactl list sources short");
    assert_eq!(commands[1], "pactl set-source-volume 1 0%");
}

#[test]
fn test_tone_missing_from_recording_fails() {
    let config = SessionConfig::default();
    let room = Room::default();

    let mut volume = VolumeEndpoint::new(Direction::Input, room.runner(SOURCES));
    volume.resolve();
    volume.set_volume(70).unwrap();

    let analyzer = RunningSpectrumAverage::new(config.bins, config.sampling_frequency as f64);
    let mut coordinator =
        LevelSpectrumCoordinator::new(config.coordinator_config(), analyzer, volume);

    while !coordinator.state().is_terminal() {
        coordinator
            .handle(PipelineEvent::Level { peak: room.peak() })
            .unwrap();
        // Something loud, but not at the test frequency
        coordinator
            .handle(PipelineEvent::Spectrum {
                magnitudes: tone_spectrum(config.bins, 40),
            })
            .unwrap();
    }

    let report =
        detection::detect(coordinator.analyzer(), config.frequency, config.threshold).unwrap();
    assert_eq!(report.band, 86);
    assert!(!report.passed);
    assert!(report.summary().starts_with("FAIL"));
}

#[test]
fn test_saturated_input_never_samples() {
    let config = SessionConfig::default();
    let room = Room::default();

    let mut volume = VolumeEndpoint::new(Direction::Input, room.runner(SOURCES));
    volume.resolve();
    volume.set_volume(100).unwrap();

    let analyzer = RunningSpectrumAverage::new(config.bins, config.sampling_frequency as f64);
    let mut coordinator =
        LevelSpectrumCoordinator::new(config.coordinator_config(), analyzer, volume);

    // Clipping whatever the volume
    for _ in 0..50 {
        let state = coordinator
            .handle(PipelineEvent::Level { peak: 0.0 })
            .unwrap();
        assert_eq!(state, CoordinatorState::AdjustingLevel);
        coordinator
            .handle(PipelineEvent::Spectrum {
                magnitudes: tone_spectrum(config.bins, 86),
            })
            .unwrap();
    }

    assert_eq!(coordinator.analyzer().sample_count(), 0);
    assert!(room.volume() < 10, "volume {}", room.volume());

    let report =
        detection::detect(coordinator.analyzer(), config.frequency, config.threshold).unwrap();
    assert!(!report.passed);
}

#[test]
fn test_no_hardware_source_aborts() {
    let config = SessionConfig::default();
    let room = Room::default();

    let mut volume = VolumeEndpoint::new(Direction::Input, room.runner(MONITORS_ONLY));
    assert!(volume.resolve().is_none());

    let analyzer = RunningSpectrumAverage::new(config.bins, config.sampling_frequency as f64);
    let mut coordinator =
        LevelSpectrumCoordinator::new(config.coordinator_config(), analyzer, volume);

    assert_eq!(
        coordinator.handle(PipelineEvent::Level { peak: -6.0 }),
        Err(CoordinatorError::VolumeUnavailable)
    );
    assert_eq!(coordinator.state(), CoordinatorState::Aborted);

    // Nothing is processed after aborting
    assert_eq!(
        coordinator.handle(PipelineEvent::Level { peak: -6.0 }),
        Ok(CoordinatorState::Aborted)
    );
    let setters = room
        .commands
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.contains("set-"))
        .count();
    assert_eq!(setters, 0);
}
