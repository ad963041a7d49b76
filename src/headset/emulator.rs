//! Emulated headset engine.
//!
//! Produces the same event sequence as a real engine session: one
//! `UserAdded` after the handshake, then periodic state updates carrying
//! battery, signal, contact quality, expressive flags and synthetic EEG.

use std::{
   f64::consts::TAU,
   time::{Duration, Instant},
};

use log::{debug, info};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::headset::{
   binding::{BatteryLevel, DeviceError, EngineBinding, PollResult, RawEvent, UserId},
   protocol::{
      CHANNEL_COUNT, COGNITIVE_NEUTRAL, COMPLETE_SENSORS, Channel, EDK_CANNOT_ACQUIRE_DATA,
      EE_EMOSTATE_UPDATED, EE_USER_ADDED, EEG_COLUMNS, ExpressiveState, FaceAction, FaceActivity,
      SampleRow, SensorId, SensorQuality, SuiteScores, WirelessSignal,
   },
};

/// Settings for the emulated engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatorConfig {
   #[serde(default = "default_sampling_rate")]
   pub sampling_rate: u32,

   /// Milliseconds between two state updates.
   #[serde(default = "default_state_period_ms")]
   pub state_period_ms: u64,

   #[serde(default = "default_battery_level")]
   pub battery_level: u8,

   /// Seconds for the battery to drop one level.
   #[serde(default = "default_battery_drain_secs")]
   pub battery_drain_secs: u64,

   /// Dominant rhythm of the synthetic EEG, in Hz.
   #[serde(default = "default_rhythm_hz")]
   pub rhythm_hz: f64,

   #[serde(default)]
   pub seed: Option<u64>,
}

const fn default_sampling_rate() -> u32 {
   128
}

const fn default_state_period_ms() -> u64 {
   100
}

const fn default_battery_level() -> u8 {
   BATTERY_MAX
}

const fn default_battery_drain_secs() -> u64 {
   900
}

const fn default_rhythm_hz() -> f64 {
   10.0
}

impl Default for EmulatorConfig {
   fn default() -> Self {
      Self {
         sampling_rate: default_sampling_rate(),
         state_period_ms: default_state_period_ms(),
         battery_level: default_battery_level(),
         battery_drain_secs: default_battery_drain_secs(),
         rhythm_hz: default_rhythm_hz(),
         seed: None,
      }
   }
}

const BATTERY_MAX: u8 = 5;
/// Baseline of the raw EEG channels, in ADC units.
const EEG_BASELINE: f64 = 4200.0;
const EEG_AMPLITUDE: f64 = 20.0;
const GYRO_BASELINE: f64 = 1650.0;
/// Seconds for every sensor to settle to full contact.
const CONTACT_SETTLE_SECS: f64 = 8.0;

struct SampleBuffer {
   capacity: usize,
   last_read: Instant,
   pending: f64,
}

/// A simulated engine with one headset attached.
pub struct EmulatedHeadset {
   config: EmulatorConfig,
   rng: StdRng,
   connected_at: Option<Instant>,
   user_announced: bool,
   acquiring: bool,
   last_state: Option<Instant>,
   buffer: Option<SampleBuffer>,
   counter: u64,
   initial_quality: SensorQuality,
}

impl EmulatedHeadset {
   pub fn new(config: EmulatorConfig) -> Self {
      let mut rng = match config.seed {
         Some(seed) => StdRng::seed_from_u64(seed),
         None => StdRng::from_entropy(),
      };
      let initial_quality = COMPLETE_SENSORS
         .iter()
         .map(|&s| (s, rng.gen_range(0..=2)))
         .collect();
      Self {
         config,
         rng,
         connected_at: None,
         user_announced: false,
         acquiring: false,
         last_state: None,
         buffer: None,
         counter: 0,
         initial_quality,
      }
   }

   fn session_age(&self) -> Result<Duration, DeviceError> {
      self
         .connected_at
         .map(|t| t.elapsed())
         .ok_or(DeviceError::NotConnected)
   }

   fn synth_row(&mut self, t: f64) -> SampleRow {
      let mut row = [0.0; CHANNEL_COUNT];
      row[Channel::Counter.column()] = (self.counter % u64::from(self.config.sampling_rate)) as f64;
      let phase = TAU * self.config.rhythm_hz * t;
      for (i, col) in EEG_COLUMNS.enumerate() {
         // Occipital sites carry the strongest rhythm
         let gain = if matches!(i, 6 | 7) { 1.5 } else { 1.0 };
         let noise: f64 = self.rng.gen_range(-4.0..4.0);
         row[col] = EEG_BASELINE + gain * EEG_AMPLITUDE * (phase + i as f64 * 0.2).sin() + noise;
      }
      row[Channel::GyroX.column()] = GYRO_BASELINE + self.rng.gen_range(-2.0..2.0);
      row[Channel::GyroY.column()] = GYRO_BASELINE + self.rng.gen_range(-2.0..2.0);
      row[Channel::Timestamp.column()] = t;
      self.counter += 1;
      row
   }
}

impl EngineBinding for EmulatedHeadset {
   fn connect(&mut self, identifier: &str) -> Result<(), DeviceError> {
      info!("Emulated engine accepting handshake from {identifier:?}");
      self.connected_at = Some(Instant::now());
      self.user_announced = false;
      self.last_state = None;
      Ok(())
   }

   fn disconnect(&mut self) -> Result<(), DeviceError> {
      if self.connected_at.take().is_none() {
         return Err(DeviceError::NotConnected);
      }
      self.acquiring = false;
      self.buffer = None;
      Ok(())
   }

   fn open_sample_buffer(&mut self, seconds: f32) -> Result<(), DeviceError> {
      let capacity = (f64::from(seconds) * f64::from(self.config.sampling_rate)).ceil() as usize;
      debug!("Emulated sample buffer: {capacity} rows");
      self.buffer = Some(SampleBuffer {
         capacity: capacity.max(1),
         last_read: Instant::now(),
         pending: 0.0,
      });
      Ok(())
   }

   fn close_sample_buffer(&mut self) {
      self.buffer = None;
   }

   fn poll_next_event(&mut self, _timeout: Duration) -> PollResult {
      if self.connected_at.is_none() {
         return PollResult::NoEvent;
      }
      if !self.user_announced {
         self.user_announced = true;
         return PollResult::Event(RawEvent::new(EE_USER_ADDED));
      }
      let period = Duration::from_millis(self.config.state_period_ms);
      let due = self.last_state.is_none_or(|t| t.elapsed() >= period);
      if due {
         self.last_state = Some(Instant::now());
         PollResult::Event(RawEvent::new(EE_EMOSTATE_UPDATED))
      } else {
         PollResult::NoEvent
      }
   }

   fn read_user_id(&mut self) -> Result<UserId, DeviceError> {
      self.session_age()?;
      Ok(0)
   }

   fn enable_acquisition(&mut self, _user: UserId) -> Result<(), DeviceError> {
      self.session_age()?;
      self.acquiring = true;
      Ok(())
   }

   fn read_sampling_rate(&mut self, _user: UserId) -> Result<u32, DeviceError> {
      self.session_age()?;
      Ok(self.config.sampling_rate)
   }

   fn read_battery_level(&mut self) -> Result<BatteryLevel, DeviceError> {
      let age = self.session_age()?;
      let drained = age.as_secs() / self.config.battery_drain_secs.max(1);
      let level = u64::from(self.config.battery_level.min(BATTERY_MAX)).saturating_sub(drained);
      Ok(BatteryLevel {
         level: level as u8,
         max: BATTERY_MAX,
      })
   }

   fn read_wireless_signal(&mut self) -> Result<WirelessSignal, DeviceError> {
      self.session_age()?;
      Ok(WirelessSignal::Good)
   }

   fn read_sensor_quality(&mut self, sensor: SensorId) -> Result<u8, DeviceError> {
      let age = self.session_age()?.as_secs_f64();
      let gained = (age / CONTACT_SETTLE_SECS * f64::from(SensorQuality::MAX_LEVEL)) as u8;
      Ok(self
         .initial_quality
         .get(sensor)
         .saturating_add(gained)
         .min(SensorQuality::MAX_LEVEL))
   }

   fn read_new_samples(&mut self) -> Result<Vec<SampleRow>, DeviceError> {
      let age = self.session_age()?;
      if !self.acquiring {
         return Err(DeviceError::Code(EDK_CANNOT_ACQUIRE_DATA));
      }
      let rate = f64::from(self.config.sampling_rate);
      let Some(buffer) = self.buffer.as_mut() else {
         return Ok(Vec::new());
      };
      let now = Instant::now();
      buffer.pending += now.duration_since(buffer.last_read).as_secs_f64() * rate;
      buffer.last_read = now;
      let n = (buffer.pending.floor() as usize).min(buffer.capacity);
      buffer.pending -= buffer.pending.floor();

      let end = age.as_secs_f64();
      let rows = (0..n)
         .map(|i| {
            let t = end - (n - 1 - i) as f64 / rate;
            self.synth_row(t)
         })
         .collect();
      Ok(rows)
   }

   fn read_expressive(&mut self) -> Result<ExpressiveState, DeviceError> {
      let age = self.session_age()?.as_secs_f64();
      let blink = self.rng.gen_bool(0.05);
      let look = self.rng.gen_range(0..40);
      let smile = self.rng.gen_bool(0.03).then(|| FaceActivity {
         action: FaceAction::Smile,
         power: self.rng.gen_range(0.2..1.0),
      });

      // Slow drifts so consumers see plausible trends
      let scores = SuiteScores {
         excitement_short_term: (0.5 + 0.4 * (age / 7.0).sin()) as f32,
         excitement_long_term: (0.5 + 0.2 * (age / 60.0).sin()) as f32,
         engagement_boredom: (0.6 + 0.3 * (age / 11.0).cos()) as f32,
         cognitive_action: COGNITIVE_NEUTRAL,
         cognitive_power: 0.0,
      };
      Ok(ExpressiveState {
         blink,
         looking_left: look == 0,
         looking_right: look == 1,
         lower_face: smile,
         scores,
         ..Default::default()
      })
   }
}
