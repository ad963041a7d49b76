//! Event taxonomy and listener interface for session updates.
//!
//! Listeners subscribe to an [`EventKind`] and receive the matching
//! [`SessionEvent`] synchronously on the polling task.

use std::{str::FromStr, sync::Arc};

use serde_json::json;
use smol_str::{SmolStr, ToSmolStr};
use strum::IntoEnumIterator;
use thiserror::Error;

use crate::{
   error::NeurofeedError,
   headset::protocol::{ExpressiveState, SampleRow, SensorQuality, WirelessSignal},
};

/// Kinds of events a listener can subscribe to.
#[repr(u16)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   strum::FromRepr,
   strum::Display,
   strum::EnumIter,
   strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
   UserPresence = 1001,
   Sampling = 1002,
   Connection = 1003,
   Monitoring = 1004,
   SensorQuality = 1005,
   HeadsetFound = 1006,
   Expressive = 1007,
}

impl EventKind {
   pub const fn id(self) -> u16 {
      self as u16
   }

   pub fn to_str(self) -> &'static str {
      self.into()
   }

   pub fn is_valid(id: u16) -> bool {
      Self::from_repr(id).is_some()
   }

   pub fn from_id(id: u16) -> Result<Self, NeurofeedError> {
      Self::from_repr(id).ok_or_else(|| NeurofeedError::UnknownEventKind(id.to_smolstr()))
   }

   pub fn parse(name: &str) -> Result<Self, NeurofeedError> {
      name.parse()
   }
}

impl FromStr for EventKind {
   type Err = NeurofeedError;

   fn from_str(name: &str) -> Result<Self, Self::Err> {
      Self::iter()
         .find(|kind| kind.to_str() == name)
         .ok_or_else(|| NeurofeedError::UnknownEventKind(name.into()))
   }
}

/// Connection telemetry delivered with [`EventKind::Connection`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
   pub connected: bool,
   pub battery_level: u8,
   pub max_battery_level: u8,
   pub wireless_signal: WirelessSignal,
}

impl ConnectionStatus {
   pub fn to_json(self) -> serde_json::Value {
      json!({
          "connected": self.connected,
          "battery_level": self.battery_level,
          "max_battery_level": self.max_battery_level,
          "wireless_signal": self.wireless_signal.to_str(),
      })
   }
}

/// Events dispatched to listeners.
#[derive(Debug, Clone)]
pub enum SessionEvent {
   UserPresence(bool),
   Sampling(Arc<[SampleRow]>),
   Connection(ConnectionStatus),
   Monitoring,
   SensorQuality(SensorQuality),
   HeadsetFound(bool),
   Expressive(ExpressiveState),
}

impl SessionEvent {
   pub const fn kind(&self) -> EventKind {
      match self {
         Self::UserPresence(_) => EventKind::UserPresence,
         Self::Sampling(_) => EventKind::Sampling,
         Self::Connection(_) => EventKind::Connection,
         Self::Monitoring => EventKind::Monitoring,
         Self::SensorQuality(_) => EventKind::SensorQuality,
         Self::HeadsetFound(_) => EventKind::HeadsetFound,
         Self::Expressive(_) => EventKind::Expressive,
      }
   }
}

/// Failure reported by a listener. Logged by the dispatcher, never propagated.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct ListenerError(pub SmolStr);

impl ListenerError {
   pub fn new(msg: impl Into<SmolStr>) -> Self {
      Self(msg.into())
   }
}

impl From<std::io::Error> for ListenerError {
   fn from(e: std::io::Error) -> Self {
      Self(e.to_smolstr())
   }
}

impl From<NeurofeedError> for ListenerError {
   fn from(e: NeurofeedError) -> Self {
      Self(e.to_smolstr())
   }
}

pub type ListenerResult = Result<(), ListenerError>;

/// Receives session events.
///
/// Called on the polling task; implementations must return quickly.
pub trait Listener: Send + Sync {
   fn on_event(&self, event: &SessionEvent) -> ListenerResult;
}

impl<F> Listener for F
where
   F: Fn(&SessionEvent) -> ListenerResult + Send + Sync,
{
   fn on_event(&self, event: &SessionEvent) -> ListenerResult {
      self(event)
   }
}

/// A listener that declares which events it follows.
///
/// Attaching a panel to a session subscribes it to each of its monitored
/// kinds.
pub trait Panel: Listener {
   fn monitored_events(&self) -> &[EventKind];
}
