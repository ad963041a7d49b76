//! Scripted engine binding for tests.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;

use crate::headset::{
   binding::{BatteryLevel, DeviceError, EngineBinding, PollResult, RawEvent, UserId},
   protocol::{
      EE_EMOSTATE_UPDATED, EE_USER_ADDED, EE_USER_REMOVED, ExpressiveState, SampleRow, SensorId,
      SensorQuality, WirelessSignal,
   },
};

/// Readings and call log shared between a test and its binding.
#[derive(Debug, Default)]
pub struct Script {
   pub connect_results: VecDeque<Result<(), DeviceError>>,
   pub polls: VecDeque<PollResult>,
   pub samples: VecDeque<Vec<SampleRow>>,
   pub battery: BatteryLevel,
   pub battery_error: Option<DeviceError>,
   pub signal: WirelessSignal,
   pub quality: SensorQuality,
   pub expressive: ExpressiveState,
   pub user_id: UserId,
   pub sampling_rate: u32,
   /// Time `disconnect` blocks for after counting the call.
   pub disconnect_delay: Duration,

   pub connects: u32,
   pub disconnects: u32,
   pub buffers_opened: u32,
   pub buffers_closed: u32,
   pub polled: u32,
   pub acquisition: Vec<UserId>,
}

impl Script {
   pub fn push_user_added(&mut self) {
      self.polls.push_back(PollResult::Event(RawEvent::new(EE_USER_ADDED)));
   }

   pub fn push_user_removed(&mut self) {
      self.polls.push_back(PollResult::Event(RawEvent::new(EE_USER_REMOVED)));
   }

   pub fn push_state_updated(&mut self) {
      self.polls.push_back(PollResult::Event(RawEvent::new(EE_EMOSTATE_UPDATED)));
   }
}

#[derive(Clone, Default)]
pub struct ScriptedBinding(pub Arc<Mutex<Script>>);

impl ScriptedBinding {
   pub fn new() -> Self {
      let script = Script {
         battery: BatteryLevel { level: 7, max: 10 },
         sampling_rate: 128,
         ..Default::default()
      };
      Self(Arc::new(Mutex::new(script)))
   }

   pub fn script(&self) -> parking_lot::MutexGuard<'_, Script> {
      self.0.lock()
   }
}

pub fn row(counter: f64, value: f64) -> SampleRow {
   let mut row = [value; crate::headset::protocol::CHANNEL_COUNT];
   row[0] = counter;
   row
}

impl EngineBinding for ScriptedBinding {
   fn connect(&mut self, _identifier: &str) -> Result<(), DeviceError> {
      let mut s = self.0.lock();
      s.connects += 1;
      s.connect_results.pop_front().unwrap_or(Ok(()))
   }

   fn disconnect(&mut self) -> Result<(), DeviceError> {
      let delay = {
         let mut s = self.0.lock();
         s.disconnects += 1;
         s.disconnect_delay
      };
      if !delay.is_zero() {
         std::thread::sleep(delay);
      }
      Ok(())
   }

   fn open_sample_buffer(&mut self, _seconds: f32) -> Result<(), DeviceError> {
      self.0.lock().buffers_opened += 1;
      Ok(())
   }

   fn close_sample_buffer(&mut self) {
      self.0.lock().buffers_closed += 1;
   }

   fn poll_next_event(&mut self, _timeout: Duration) -> PollResult {
      let mut s = self.0.lock();
      s.polled += 1;
      s.polls.pop_front().unwrap_or(PollResult::NoEvent)
   }

   fn read_user_id(&mut self) -> Result<UserId, DeviceError> {
      Ok(self.0.lock().user_id)
   }

   fn enable_acquisition(&mut self, user: UserId) -> Result<(), DeviceError> {
      self.0.lock().acquisition.push(user);
      Ok(())
   }

   fn read_sampling_rate(&mut self, _user: UserId) -> Result<u32, DeviceError> {
      Ok(self.0.lock().sampling_rate)
   }

   fn read_battery_level(&mut self) -> Result<BatteryLevel, DeviceError> {
      let s = self.0.lock();
      match &s.battery_error {
         Some(e) => Err(e.clone()),
         None => Ok(s.battery),
      }
   }

   fn read_wireless_signal(&mut self) -> Result<WirelessSignal, DeviceError> {
      Ok(self.0.lock().signal)
   }

   fn read_sensor_quality(&mut self, sensor: SensorId) -> Result<u8, DeviceError> {
      Ok(self.0.lock().quality.get(sensor))
   }

   fn read_new_samples(&mut self) -> Result<Vec<SampleRow>, DeviceError> {
      Ok(self.0.lock().samples.pop_front().unwrap_or_default())
   }

   fn read_expressive(&mut self) -> Result<ExpressiveState, DeviceError> {
      Ok(self.0.lock().expressive)
   }
}
