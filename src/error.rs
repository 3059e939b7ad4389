//! Errors that end a session before a verdict, and their exit codes

use crate::config::ConfigError;
use crate::coordinator::CoordinatorError;
use crate::detection::DetectionError;
use crate::volume::{CommandError, VolumeError};
use thiserror::Error;

pub const EXIT_PASS: i32 = 0;
pub const EXIT_FAIL: i32 = 1;
pub const EXIT_COMMAND: i32 = 2;
pub const EXIT_PIPELINE: i32 = 3;
pub const EXIT_CONFIG: i32 = 4;
pub const EXIT_MISSING_DEPENDENCY: i32 = 127;

#[derive(Error, Debug)]
pub enum AudioTestError {
    #[error("{0} is required but was not found")]
    MissingDependency(String),
    #[error("command execution failed: {0}")]
    Command(#[from] CommandError),
    #[error("volume control failed: {0}")]
    Volume(#[from] VolumeError),
    #[error("no hardware {0} endpoint found")]
    NoEndpoint(crate::volume::Direction),
    #[error("inconclusive: {0}")]
    Inconclusive(#[from] CoordinatorError),
    #[error("audio pipeline error: {0:#}")]
    Pipeline(anyhow::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    Detection(#[from] DetectionError),
}

impl AudioTestError {
    pub fn exit_code(&self) -> i32 {
        match self {
            AudioTestError::MissingDependency(_) => EXIT_MISSING_DEPENDENCY,
            AudioTestError::Command(_)
            | AudioTestError::Volume(_)
            | AudioTestError::NoEndpoint(_)
            | AudioTestError::Inconclusive(_) => EXIT_COMMAND,
            AudioTestError::Pipeline(_) => EXIT_PIPELINE,
            AudioTestError::Config(_) | AudioTestError::Detection(_) => EXIT_CONFIG,
        }
    }
}
