//! Closed-loop audio path test.
//!
//! Plays a tone on the output device, records it on the input device while a
//! PID controller keeps the recording level inside a window, averages the
//! recorded spectrum and checks that the tone stands out from it.

pub mod audio;
pub mod config;
pub mod coordinator;
pub mod detection;
pub mod dump;
pub mod error;
pub mod pid;
pub mod spectrum;
pub mod volume;
