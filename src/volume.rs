//! PulseAudio volume control through `pactl`
//!
//! A [`VolumeEndpoint`] resolves the hardware endpoint for one direction
//! (recording source or playback sink) once and then sets its volume or mute
//! state. Commands go through a [`CommandRunner`] so tests can substitute the
//! real `pactl` with canned output.

use std::fmt;
use std::io::ErrorKind;
use std::process::Command;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// External volume control binary
pub const PACTL: &str = "pactl";

/// Endpoint names containing any of these are never used
const REJECTED_NAMES: [&str; 2] = ["monitor", "auto_null"];
/// Modules backing null sinks
const REJECTED_MODULE: &str = "null-sink";

/// Which side of the audio path an endpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// PulseAudio object kind for this direction
    pub fn pactl_kind(&self) -> &'static str {
        match self {
            Direction::Input => "source",
            Direction::Output => "sink",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

impl FromStr for Direction {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "input" => Ok(Direction::Input),
            "output" => Ok(Direction::Output),
            other => Err(VolumeError::UnknownDirection(other.to_string())),
        }
    }
}

/// A hardware endpoint as listed by `pactl list {sources|sinks} short`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareEndpoint {
    pub id: u32,
    pub name: String,
}

/// Commands the volume controller needs from the audio server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeCommand {
    /// List all endpoints for a direction
    List(Direction),
    /// Set an endpoint's volume in percent
    SetVolume {
        direction: Direction,
        id: u32,
        percent: u8,
    },
    /// Mute or unmute an endpoint
    SetMute {
        direction: Direction,
        id: u32,
        mute: bool,
    },
}

impl VolumeCommand {
    /// Arguments passed to `pactl` for this command
    pub fn args(&self) -> Vec<String> {
        match self {
            VolumeCommand::List(direction) => vec![
                "list".to_string(),
                format!("{}s", direction.pactl_kind()),
                "short".to_string(),
            ],
            VolumeCommand::SetVolume {
                direction,
                id,
                percent,
            } => vec![
                format!("set-{}-volume", direction.pactl_kind()),
                id.to_string(),
                format!("{}%", percent),
            ],
            VolumeCommand::SetMute {
                direction,
                id,
                mute,
            } => vec![
                format!("set-{}-mute", direction.pactl_kind()),
                id.to_string(),
                if *mute { "1" } else { "0" }.to_string(),
            ],
        }
    }
}

impl fmt::Display for VolumeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", PACTL, self.args().join(" "))
    }
}

/// Command execution error types
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{program} failed (status {status:?}): {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("command failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<CommandError> },
    #[error("command I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Executes volume commands and returns their textual output
pub trait CommandRunner {
    fn run(&self, command: &VolumeCommand) -> Result<String, CommandError>;
}

impl<F> CommandRunner for F
where
    F: Fn(&VolumeCommand) -> Result<String, CommandError>,
{
    fn run(&self, command: &VolumeCommand) -> Result<String, CommandError> {
        self(command)
    }
}

/// Runs commands through the real `pactl` binary.
///
/// The audio server may not be ready right after boot, so failed invocations
/// are retried a few times with a fixed delay. Every command issued is
/// idempotent.
#[derive(Debug, Clone)]
pub struct PactlRunner {
    program: String,
    attempts: u32,
    backoff: Duration,
}

impl PactlRunner {
    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

    pub fn new() -> Self {
        Self {
            program: PACTL.to_string(),
            attempts: Self::DEFAULT_ATTEMPTS,
            backoff: Self::DEFAULT_BACKOFF,
        }
    }

    /// Run another binary with the same arguments
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Check that `pactl` is on the PATH
    pub fn ensure_available() -> Result<(), CommandError> {
        if !Command::new("which").arg(PACTL).output()?.status.success() {
            return Err(CommandError::NotFound(PACTL.to_string()));
        }
        Ok(())
    }

    fn run_once(&self, command: &VolumeCommand) -> Result<String, CommandError> {
        let output = Command::new(&self.program)
            .args(command.args())
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CommandError::NotFound(self.program.clone()),
                _ => CommandError::Io(e),
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                program: self.program.clone(),
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for PactlRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for PactlRunner {
    fn run(&self, command: &VolumeCommand) -> Result<String, CommandError> {
        let mut attempt = 1;
        loop {
            debug!("Running: {}", command);
            match self.run_once(command) {
                Ok(output) => return Ok(output),
                // Retrying will not make the binary appear
                Err(e @ CommandError::NotFound(_)) => return Err(e),
                Err(e) if attempt >= self.attempts => {
                    return Err(CommandError::Exhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "Attempt {}/{} of '{}' failed: {}",
                        attempt, self.attempts, command, e
                    );
                    std::thread::sleep(self.backoff);
                    attempt += 1;
                }
            }
        }
    }
}

/// Volume control error types
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("volume {0} is outside 0-100")]
    OutOfRange(i32),
    #[error("no {0} endpoint resolved")]
    Unresolved(Direction),
    #[error("unknown endpoint direction: {0}")]
    UnknownDirection(String),
    #[error("volume command failed: {0}")]
    Command(#[from] CommandError),
}

/// Volume and mute control for the default endpoint of one direction
#[derive(Clone)]
pub struct VolumeEndpoint<R = PactlRunner> {
    direction: Direction,
    runner: R,
    endpoint: Option<HardwareEndpoint>,
    volume: Option<u8>,
}

impl<R: CommandRunner> VolumeEndpoint<R> {
    pub fn new(direction: Direction, runner: R) -> Self {
        Self {
            direction,
            runner,
            endpoint: None,
            volume: None,
        }
    }

    /// Resolve (once) the endpoint to control.
    ///
    /// Picks the first listed endpoint that is neither a monitor nor a null
    /// sink. Returns `None` and caches nothing if the listing fails or no
    /// endpoint qualifies.
    pub fn resolve(&mut self) -> Option<&HardwareEndpoint> {
        if self.endpoint.is_none() {
            self.endpoint = self.lookup();
        }
        self.endpoint.as_ref()
    }

    fn lookup(&self) -> Option<HardwareEndpoint> {
        let listing = match self.runner.run(&VolumeCommand::List(self.direction)) {
            Ok(listing) => listing,
            Err(e) => {
                error!("Unable to list PulseAudio {}s: {}", self.direction.pactl_kind(), e);
                return None;
            }
        };

        match parse_endpoints(&listing).into_iter().next() {
            Some(endpoint) => {
                info!(
                    "Using PulseAudio identifier {} ({}) for {}",
                    endpoint.id, endpoint.name, self.direction
                );
                Some(endpoint)
            }
            None => {
                error!("No valid PulseAudio elements for {}", self.direction);
                None
            }
        }
    }

    /// Forget the resolved endpoint so the next `resolve` looks it up again
    pub fn invalidate(&mut self) {
        self.endpoint = None;
        self.volume = None;
    }

    /// Set the volume in percent.
    ///
    /// Nothing changes unless the command succeeds.
    pub fn set_volume(&mut self, volume: i32) -> Result<(), VolumeError> {
        let percent = u8::try_from(volume)
            .ok()
            .filter(|v| *v <= 100)
            .ok_or(VolumeError::OutOfRange(volume))?;
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or(VolumeError::Unresolved(self.direction))?;

        self.runner.run(&VolumeCommand::SetVolume {
            direction: self.direction,
            id: endpoint.id,
            percent,
        })?;

        self.volume = Some(percent);
        Ok(())
    }

    /// Last volume successfully set, if any
    pub fn volume(&self) -> Option<u8> {
        self.endpoint.as_ref().and(self.volume)
    }

    pub fn mute(&mut self, mute: bool) -> Result<(), VolumeError> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or(VolumeError::Unresolved(self.direction))?;

        self.runner.run(&VolumeCommand::SetMute {
            direction: self.direction,
            id: endpoint.id,
            mute,
        })?;
        Ok(())
    }

    pub fn endpoint(&self) -> Option<&HardwareEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

/// Sets both endpoints to fixed volumes when dropped, whatever way the
/// session ends
pub struct VolumeRestore<R: CommandRunner = PactlRunner> {
    output: VolumeEndpoint<R>,
    output_volume: i32,
    input: VolumeEndpoint<R>,
    input_volume: i32,
}

impl<R: CommandRunner> VolumeRestore<R> {
    pub fn new(
        output: VolumeEndpoint<R>,
        output_volume: i32,
        input: VolumeEndpoint<R>,
        input_volume: i32,
    ) -> Self {
        Self {
            output,
            output_volume,
            input,
            input_volume,
        }
    }
}

impl<R: CommandRunner> Drop for VolumeRestore<R> {
    fn drop(&mut self) {
        for (endpoint, volume) in [
            (&mut self.output, self.output_volume),
            (&mut self.input, self.input_volume),
        ] {
            match endpoint.set_volume(volume) {
                Ok(()) => debug!("Restored {} volume to {}%", endpoint.direction(), volume),
                Err(e) => warn!("Failed to restore {} volume: {}", endpoint.direction(), e),
            }
        }
    }
}

/// Parse `pactl list ... short` output, keeping only usable endpoints.
///
/// Lines are `ID\tNAME\tMODULE\tSAMPLE_SPEC\tSTATE`; only the first three
/// fields are looked at.
pub fn parse_endpoints(listing: &str) -> Vec<HardwareEndpoint> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t').map(str::trim);
            let id = fields.next()?.parse::<u32>().ok()?;
            let name = fields.next().filter(|n| !n.is_empty())?;
            let module = fields.next().unwrap_or_default();

            if REJECTED_NAMES.iter().any(|r| name.contains(r)) || module.contains(REJECTED_MODULE)
            {
                debug!("Skipping endpoint {} ({})", id, name);
                return None;
            }

            Some(HardwareEndpoint {
                id,
                name: name.to_string(),
            })
        })
        .collect()
}
