//! Error types for the neurofeed session manager.
//!
//! Lifecycle errors (connection, configuration) are returned to the caller of
//! the command that produced them. Errors raised inside the polling loop or by
//! listeners are logged where they happen and never reach the caller.

use smol_str::SmolStr;
use thiserror::Error;
use tokio::task::JoinError;

use crate::headset::binding::DeviceError;

/// Main error type for the session manager.
#[derive(Error, Debug)]
pub enum NeurofeedError {
   #[error("Device library unavailable: {0}")]
   DeviceLibraryUnavailable(SmolStr),

   #[error("Cannot connect to any engine using {identifier}: {source}")]
   Connection {
      identifier: SmolStr,
      source: DeviceError,
   },

   #[error("Cannot disconnect from engine: {0}")]
   Disconnect(DeviceError),

   #[error("Device error: {0}")]
   Device(#[from] DeviceError),

   #[error("Session is not connected")]
   NotConnected,

   #[error("Session is connected; disconnect before changing {0}")]
   SessionActive(&'static str),

   #[error("Invalid monitor interval: {0}s")]
   InvalidInterval(f64),

   #[error("Unknown event kind: {0}")]
   UnknownEventKind(SmolStr),

   #[error("Poll failed with code {code:#06x} after {consecutive} consecutive errors")]
   PollFailed { code: i32, consecutive: u32 },

   #[error("Polling task panicked: {0}")]
   PollerPanicked(JoinError),

   #[error("Recorder is closed")]
   RecorderClosed,

   #[error("Recorder task panicked: {0}")]
   RecorderPanicked(JoinError),

   #[error("I/O error: {0}")]
   Io(#[from] std::io::Error),

   #[error("Could not determine config directory")]
   ConfigDirNotFound,

   #[error("TOML parsing error: {0}")]
   TomlParse(#[from] toml::de::Error),

   #[error("TOML serialization error: {0}")]
   TomlSerialize(#[from] toml::ser::Error),
}

/// Convenience type alias for Results with `NeurofeedError`.
pub type Result<T> = std::result::Result<T, NeurofeedError>;
