//! Boundary to the vendor engine.
//!
//! The engine is consumed through [`EngineBinding`]: a handshake-based
//! connect/disconnect, a bounded event poll, and accessors that decode the
//! event most recently returned by the poll. The session manager owns the only
//! binding instance and never re-enters it concurrently.

use std::{fmt, time::Duration};

use smol_str::SmolStr;
use thiserror::Error;

use crate::headset::protocol::{
   EE_EMOSTATE_UPDATED, EE_USER_ADDED, EE_USER_REMOVED, ExpressiveState, SampleRow, SensorId,
   WirelessSignal, error_code_name,
};

/// Identifier the engine assigns to a user (one per headset).
pub type UserId = u32;

/// Errors reported by an engine binding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
   /// The vendor library could not be loaded or initialised.
   #[error("Engine library unavailable: {0}")]
   LibraryUnavailable(SmolStr),

   /// The engine returned a non-success code.
   #[error("Engine returned {}", CodeName(.0))]
   Code(i32),

   /// The call did not complete within its bound.
   #[error("Engine call timed out")]
   Timeout,

   /// An accessor was used while no handshake is active.
   #[error("Engine not connected")]
   NotConnected,
}

struct CodeName<'a>(&'a i32);

impl fmt::Display for CodeName<'_> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match error_code_name(*self.0) {
         Some(name) => write!(f, "{name} ({:#06x})", self.0),
         None => write!(f, "unknown code {:#06x}", self.0),
      }
   }
}

/// Raw event handed out by the engine's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
   pub code: u32,
}

impl RawEvent {
   pub const fn new(code: u32) -> Self {
      Self { code }
   }
}

/// Outcome of one bounded poll of the engine's event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
   NoEvent,
   Event(RawEvent),
   Error(i32),
}

/// Decoded event types the session reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
   UserAdded,
   UserRemoved,
   StateUpdated,
   Other(u32),
}

impl DeviceEventKind {
   pub const fn from_code(code: u32) -> Self {
      match code {
         EE_USER_ADDED => Self::UserAdded,
         EE_USER_REMOVED => Self::UserRemoved,
         EE_EMOSTATE_UPDATED => Self::StateUpdated,
         other => Self::Other(other),
      }
   }
}

/// Battery charge as reported by the headset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatteryLevel {
   pub level: u8,
   pub max: u8,
}

/// Vendor engine interface.
///
/// Every call must return within a bounded time; `poll_next_event` in
/// particular must honour its `timeout` since the polling loop's liveness
/// depends on it. The `read_*` accessors decode the event most recently
/// returned by `poll_next_event`.
pub trait EngineBinding: Send {
   fn connect(&mut self, identifier: &str) -> Result<(), DeviceError>;

   fn disconnect(&mut self) -> Result<(), DeviceError>;

   /// Allocates the device-side sample buffer used while monitoring.
   fn open_sample_buffer(&mut self, seconds: f32) -> Result<(), DeviceError>;

   /// Releases the sample buffer. Safe to call when none is open.
   fn close_sample_buffer(&mut self);

   fn poll_next_event(&mut self, timeout: Duration) -> PollResult;

   fn decode_event_type(&self, event: &RawEvent) -> DeviceEventKind {
      DeviceEventKind::from_code(event.code)
   }

   fn read_user_id(&mut self) -> Result<UserId, DeviceError>;

   fn enable_acquisition(&mut self, user: UserId) -> Result<(), DeviceError>;

   fn read_sampling_rate(&mut self, user: UserId) -> Result<u32, DeviceError>;

   fn read_battery_level(&mut self) -> Result<BatteryLevel, DeviceError>;

   fn read_wireless_signal(&mut self) -> Result<WirelessSignal, DeviceError>;

   fn read_sensor_quality(&mut self, sensor: SensorId) -> Result<u8, DeviceError>;

   /// Rows acquired since the previous call; may be empty.
   fn read_new_samples(&mut self) -> Result<Vec<SampleRow>, DeviceError>;

   fn read_expressive(&mut self) -> Result<ExpressiveState, DeviceError>;
}
