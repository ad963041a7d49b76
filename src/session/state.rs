use std::{mem, sync::Arc, time::Duration};

use serde_json::json;

use crate::{
   error::{NeurofeedError, Result},
   event::ConnectionStatus,
   headset::{
      binding::{BatteryLevel, UserId},
      protocol::{ExpressiveState, SampleRow, SensorQuality, WirelessSignal},
   },
};

/// Seconds slept between two polls unless configured otherwise.
pub const DEFAULT_MONITOR_INTERVAL: f64 = 0.065;

/// Change produced by a state mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp<T> {
   /// No change occurred
   Noop,
   /// A value appeared (None -> Some)
   Inserted,
   /// A value was cleared (Some -> None), carrying the old value
   Deleted(T),
   /// An existing value changed, carrying the old value
   Updated(T),
}

impl<T: PartialEq> UpdateOp<T> {
   fn replace(dst: &mut T, new: T) -> Self {
      if *dst == new {
         return Self::Noop;
      }
      Self::Updated(mem::replace(dst, new))
   }

   fn replace_opt(dst: &mut Option<T>, new: Option<T>) -> Self {
      match (dst.take(), new) {
         (Some(p), Some(n)) if p == n => {
            *dst = Some(n);
            Self::Noop
         },
         (None, Some(n)) => {
            *dst = Some(n);
            Self::Inserted
         },
         (Some(p), None) => Self::Deleted(p),
         (Some(p), Some(n)) => {
            *dst = Some(n);
            Self::Updated(p)
         },
         (None, None) => Self::Noop,
      }
   }

   pub const fn is_updated(&self) -> bool {
      !matches!(self, Self::Noop)
   }
}

/// Side effects of a wireless-signal reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalChange {
   pub signal: UpdateOp<WirelessSignal>,
   pub has_user: UpdateOp<bool>,
   pub headset_found: UpdateOp<bool>,
}

impl SignalChange {
   const NONE: Self = Self {
      signal: UpdateOp::Noop,
      has_user: UpdateOp::Noop,
      headset_found: UpdateOp::Noop,
   };
}

/// Everything the session knows about the headset.
///
/// The state is passive: mutators only report what changed, the caller
/// decides what to announce.
#[derive(Debug, Clone)]
pub struct SessionState {
   connected: bool,
   has_user: bool,
   monitoring: bool,
   headset_found: bool,
   monitor_interval: f64,
   battery: BatteryLevel,
   wireless_signal: WirelessSignal,
   sensor_quality: SensorQuality,
   samples: Arc<[SampleRow]>,
   user_id: Option<UserId>,
   sampling_rate: Option<u32>,
   expressive: ExpressiveState,
}

impl Default for SessionState {
   fn default() -> Self {
      Self {
         connected: false,
         has_user: false,
         monitoring: false,
         headset_found: false,
         monitor_interval: DEFAULT_MONITOR_INTERVAL,
         battery: BatteryLevel::default(),
         wireless_signal: WirelessSignal::NoSignal,
         sensor_quality: SensorQuality::new(),
         samples: Arc::from(Vec::new()),
         user_id: None,
         sampling_rate: None,
         expressive: ExpressiveState::default(),
      }
   }
}

impl SessionState {
   pub fn new() -> Self {
      Self::default()
   }

   pub const fn is_connected(&self) -> bool {
      self.connected
   }

   pub const fn has_user(&self) -> bool {
      self.has_user
   }

   pub const fn is_monitoring(&self) -> bool {
      self.monitoring
   }

   pub const fn headset_found(&self) -> bool {
      self.headset_found
   }

   pub const fn monitor_interval(&self) -> f64 {
      self.monitor_interval
   }

   pub fn monitor_period(&self) -> Duration {
      Duration::try_from_secs_f64(self.monitor_interval).unwrap_or(Duration::MAX)
   }

   pub const fn battery(&self) -> BatteryLevel {
      self.battery
   }

   pub const fn wireless_signal(&self) -> WirelessSignal {
      self.wireless_signal
   }

   pub const fn sensor_quality(&self) -> SensorQuality {
      self.sensor_quality
   }

   /// Rows decoded by the most recent cycle that produced any.
   pub fn samples(&self) -> Arc<[SampleRow]> {
      self.samples.clone()
   }

   pub const fn user_id(&self) -> Option<UserId> {
      self.user_id
   }

   pub const fn sampling_rate(&self) -> Option<u32> {
      self.sampling_rate
   }

   pub const fn expressive(&self) -> ExpressiveState {
      self.expressive
   }

   pub const fn connection_status(&self) -> ConnectionStatus {
      ConnectionStatus {
         connected: self.connected,
         battery_level: self.battery.level,
         max_battery_level: self.battery.max,
         wireless_signal: self.wireless_signal,
      }
   }

   /// Marks the session connected or disconnected.
   ///
   /// Disconnecting drops every fact that only holds while connected: user
   /// presence, headset link, monitoring and the signal level.
   pub fn set_connected(&mut self, connected: bool) -> UpdateOp<bool> {
      let op = UpdateOp::replace(&mut self.connected, connected);
      if !connected {
         self.has_user = false;
         self.headset_found = false;
         self.monitoring = false;
         self.wireless_signal = WirelessSignal::NoSignal;
         self.user_id = None;
         self.sampling_rate = None;
      }
      op
   }

   pub fn set_has_user(&mut self, has_user: bool) -> Result<UpdateOp<bool>> {
      if !self.connected {
         return Err(NeurofeedError::NotConnected);
      }
      Ok(UpdateOp::replace(&mut self.has_user, has_user))
   }

   pub fn set_monitoring(&mut self, monitoring: bool) -> Result<UpdateOp<bool>> {
      if monitoring && !self.connected {
         return Err(NeurofeedError::NotConnected);
      }
      Ok(UpdateOp::replace(&mut self.monitoring, monitoring))
   }

   /// Clears the headset link when monitoring stops.
   pub fn clear_headset_found(&mut self) -> UpdateOp<bool> {
      UpdateOp::replace(&mut self.headset_found, false)
   }

   /// Records a signal reading.
   ///
   /// Leaving `NoSignal` means a user is wearing a headset in range; entering
   /// it means the user is gone. Readings at the current level change nothing.
   pub fn set_wireless_signal(&mut self, signal: WirelessSignal) -> Result<SignalChange> {
      if !self.connected {
         return Err(NeurofeedError::NotConnected);
      }
      let previous = self.wireless_signal;
      let op = UpdateOp::replace(&mut self.wireless_signal, signal);
      if !op.is_updated() {
         return Ok(SignalChange::NONE);
      }

      let mut change = SignalChange { signal: op, ..SignalChange::NONE };
      if previous.has_signal() != signal.has_signal() {
         let present = signal.has_signal();
         change.has_user = UpdateOp::replace(&mut self.has_user, present);
         change.headset_found = UpdateOp::replace(&mut self.headset_found, present);
      }
      Ok(change)
   }

   pub fn set_battery_level(&mut self, battery: BatteryLevel) -> UpdateOp<BatteryLevel> {
      UpdateOp::replace(&mut self.battery, battery)
   }

   pub fn set_sensor_quality(&mut self, quality: SensorQuality) -> UpdateOp<SensorQuality> {
      UpdateOp::replace(&mut self.sensor_quality, quality)
   }

   pub fn set_expressive(&mut self, expressive: ExpressiveState) -> UpdateOp<ExpressiveState> {
      UpdateOp::replace(&mut self.expressive, expressive)
   }

   /// Records the user announced by the engine.
   pub fn set_user(&mut self, user: Option<UserId>, sampling_rate: Option<u32>) -> UpdateOp<UserId> {
      self.sampling_rate = sampling_rate;
      UpdateOp::replace_opt(&mut self.user_id, user)
   }

   /// Replaces the sample buffer with `rows`. Empty batches are ignored.
   pub fn append_samples(&mut self, rows: Arc<[SampleRow]>) -> bool {
      if rows.is_empty() {
         return false;
      }
      self.samples = rows;
      true
   }

   pub fn set_monitor_interval(&mut self, seconds: f64) -> Result<()> {
      if self.connected {
         return Err(NeurofeedError::SessionActive("the monitor interval"));
      }
      if seconds <= 0.0 || Duration::try_from_secs_f64(seconds).is_err() {
         return Err(NeurofeedError::InvalidInterval(seconds));
      }
      self.monitor_interval = seconds;
      Ok(())
   }

   pub fn to_json(&self) -> serde_json::Value {
      json!({
          "connected": self.connected,
          "has_user": self.has_user,
          "monitoring": self.monitoring,
          "headset_found": self.headset_found,
          "monitor_interval": self.monitor_interval,
          "battery_level": self.battery.level,
          "max_battery_level": self.battery.max,
          "wireless_signal": self.wireless_signal.to_str(),
          "sensor_quality": self.sensor_quality.to_json(),
          "user_id": self.user_id,
          "sampling_rate": self.sampling_rate,
          "expressive": self.expressive.to_string(),
          "suite_scores": self.expressive.scores,
          "buffered_samples": self.samples.len(),
      })
   }
}
