//! Background polling of the engine's event queue.
//!
//! One task per monitoring period. Each iteration polls the engine once on a
//! blocking thread, decodes what the event carries while holding the binding,
//! then applies it to the session state and dispatches the resulting events
//! with no lock held. Between iterations the task sleeps for the session's
//! monitor interval, waking early on cancellation.

use std::{sync::Arc, time::Duration};

use log::{debug, error, info, warn};
use tokio::{
   sync::watch,
   task::{self, JoinHandle},
   time,
};

use super::Core;
use crate::{
   config::Config,
   dispatch::DispatchReport,
   error::{NeurofeedError, Result},
   event::SessionEvent,
   headset::{
      binding::{BatteryLevel, DeviceError, DeviceEventKind, EngineBinding, PollResult, UserId},
      protocol::{COMPLETE_SENSORS, ExpressiveState, SampleRow, SensorQuality, WirelessSignal},
   },
};

/// Parameters of a polling task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerSettings {
   /// Upper bound handed to each engine poll.
   pub poll_timeout: Duration,
   /// Consecutive poll errors that end the loop; `None` retries forever.
   pub error_limit: Option<u32>,
   /// Size of the device-side sample buffer.
   pub sample_buffer_secs: f32,
}

impl Default for PollerSettings {
   fn default() -> Self {
      Self::from(&Config::default())
   }
}

impl From<&Config> for PollerSettings {
   fn from(config: &Config) -> Self {
      Self {
         poll_timeout: Duration::from_millis(config.poll_timeout_ms),
         error_limit: config.poll_error_limit,
         sample_buffer_secs: config.sample_buffer_secs,
      }
   }
}

/// Counters kept by a polling task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
   pub iterations: u64,
   pub events: u64,
   pub poll_errors: u64,
   pub samples: u64,
   pub dispatched: u64,
   pub listener_failures: u64,
}

impl PollStats {
   fn record(&mut self, report: DispatchReport) {
      self.dispatched += report.delivered as u64;
      self.listener_failures += report.failed as u64;
   }
}

/// What one poll produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Polled {
   Idle,
   Event(DeviceEventKind),
   Error(i32),
}

#[derive(Debug, Default)]
struct Reading {
   battery: Option<BatteryLevel>,
   signal: Option<WirelessSignal>,
   samples: Option<Vec<SampleRow>>,
   quality: Option<SensorQuality>,
   expressive: Option<ExpressiveState>,
}

#[derive(Debug)]
enum Observation {
   UserAdded {
      user: Option<UserId>,
      sampling_rate: Option<u32>,
   },
   UserRemoved,
   StateUpdated(Reading),
   Ignored(u32),
}

fn read<T>(what: &str, result: std::result::Result<T, DeviceError>) -> Option<T> {
   result.inspect_err(|e| warn!("Failed to read {what}: {e}")).ok()
}

fn observe(binding: &mut dyn EngineBinding, kind: DeviceEventKind) -> Observation {
   match kind {
      DeviceEventKind::UserAdded => {
         let user = read("user id", binding.read_user_id());
         let sampling_rate = user.and_then(|user| {
            read("acquisition", binding.enable_acquisition(user))?;
            read("sampling rate", binding.read_sampling_rate(user))
         });
         Observation::UserAdded { user, sampling_rate }
      },
      DeviceEventKind::UserRemoved => Observation::UserRemoved,
      DeviceEventKind::StateUpdated => {
         let quality: std::result::Result<SensorQuality, DeviceError> = COMPLETE_SENSORS
            .iter()
            .map(|&sensor| binding.read_sensor_quality(sensor).map(|q| (sensor, q)))
            .collect();
         Observation::StateUpdated(Reading {
            battery: read("battery level", binding.read_battery_level()),
            signal: read("wireless signal", binding.read_wireless_signal()),
            samples: read("samples", binding.read_new_samples()),
            quality: read("sensor quality", quality),
            expressive: read("expressive state", binding.read_expressive()),
         })
      },
      DeviceEventKind::Other(code) => Observation::Ignored(code),
   }
}

fn emit(core: &Core, stats: &mut PollStats, event: SessionEvent) {
   stats.record(core.dispatcher.dispatch(&event));
}

fn apply(core: &Core, observation: Observation, stats: &mut PollStats) {
   match observation {
      Observation::UserAdded { user, sampling_rate } => {
         core.state.write().set_user(user, sampling_rate);
         info!("Engine added user {user:?} (sampling rate {sampling_rate:?} Hz)");
      },
      Observation::UserRemoved => {
         let op = {
            let mut state = core.state.write();
            state.set_user(None, None);
            state.set_has_user(false)
         };
         info!("Engine removed user");
         match op {
            Ok(op) if op.is_updated() => emit(core, stats, SessionEvent::UserPresence(false)),
            Ok(_) => {},
            Err(e) => debug!("Ignoring user removal: {e}"),
         }
      },
      Observation::StateUpdated(reading) => apply_reading(core, reading, stats),
      Observation::Ignored(code) => debug!("Ignoring engine event {code:#06x}"),
   }
}

fn apply_reading(core: &Core, reading: Reading, stats: &mut PollStats) {
   emit(core, stats, SessionEvent::Monitoring);

   if let Some(battery) = reading.battery {
      let (op, status) = {
         let mut state = core.state.write();
         (state.set_battery_level(battery), state.connection_status())
      };
      if op.is_updated() {
         emit(core, stats, SessionEvent::Connection(status));
      }
   }

   if let Some(signal) = reading.signal {
      let change = core.state.write().set_wireless_signal(signal);
      match change {
         Ok(change) => {
            let present = signal.has_signal();
            if change.has_user.is_updated() {
               emit(core, stats, SessionEvent::UserPresence(present));
            }
            if change.headset_found.is_updated() {
               info!("Headset {}", if present { "found" } else { "lost" });
               emit(core, stats, SessionEvent::HeadsetFound(present));
            }
         },
         Err(e) => debug!("Ignoring wireless signal {signal}: {e}"),
      }
   }

   if let Some(rows) = reading.samples.filter(|rows| !rows.is_empty()) {
      let rows: Arc<[SampleRow]> = rows.into();
      stats.samples += rows.len() as u64;
      core.state.write().append_samples(rows.clone());
      emit(core, stats, SessionEvent::Sampling(rows));
   }

   if let Some(quality) = reading.quality {
      let op = core.state.write().set_sensor_quality(quality);
      if op.is_updated() {
         emit(core, stats, SessionEvent::SensorQuality(quality));
      }
   }

   if let Some(expressive) = reading.expressive {
      let op = core.state.write().set_expressive(expressive);
      if op.is_updated() {
         emit(core, stats, SessionEvent::Expressive(expressive));
      }
   }
}

/// Runs one poll-decode-dispatch cycle.
pub(crate) fn iterate(core: &Core, timeout: Duration, stats: &mut PollStats) -> Polled {
   stats.iterations += 1;

   let (kind, observation) = {
      let mut binding = core.binding.lock();
      let event = match binding.poll_next_event(timeout) {
         PollResult::NoEvent => return Polled::Idle,
         PollResult::Error(code) => {
            stats.poll_errors += 1;
            return Polled::Error(code);
         },
         PollResult::Event(event) => event,
      };
      let kind = binding.decode_event_type(&event);
      (kind, observe(&mut **binding, kind))
   };

   stats.events += 1;
   apply(core, observation, stats);
   Polled::Event(kind)
}

async fn poll_until_cancelled(
   core: &Arc<Core>,
   settings: PollerSettings,
   cancel: &mut watch::Receiver<bool>,
) -> Result<PollStats> {
   let mut stats = PollStats::default();
   let mut consecutive = 0;

   loop {
      let cancelled = *cancel.borrow();
      if cancelled {
         break;
      }

      let task_core = core.clone();
      let (polled, next) = task::spawn_blocking(move || {
         let mut stats = stats;
         let polled = iterate(&task_core, settings.poll_timeout, &mut stats);
         (polled, stats)
      })
      .await
      .map_err(NeurofeedError::PollerPanicked)?;
      stats = next;

      if let Polled::Error(code) = polled {
         consecutive += 1;
         warn!("Engine poll failed: {}", DeviceError::Code(code));
         if settings.error_limit.is_some_and(|limit| consecutive >= limit) {
            return Err(NeurofeedError::PollFailed { code, consecutive });
         }
      } else {
         consecutive = 0;
      }

      let period = core.state.read().monitor_period();
      tokio::select! {
         () = time::sleep(period) => {},
         changed = cancel.changed() => {
            if changed.is_err() {
               break;
            }
         },
      }
   }

   Ok(stats)
}

async fn run(
   core: Arc<Core>,
   settings: PollerSettings,
   mut cancel: watch::Receiver<bool>,
) -> Result<PollStats> {
   info!("Polling loop started");
   let result = poll_until_cancelled(&core, settings, &mut cancel).await;
   match &result {
      Ok(stats) => info!(
         "Polling loop stopped after {} iterations ({} events, {} poll errors)",
         stats.iterations, stats.events, stats.poll_errors
      ),
      Err(e) => {
         error!("Polling loop terminated: {e}");
         let _ = core.state.write().set_monitoring(false);
      },
   }
   result
}

/// Handle on the polling task.
#[derive(Default)]
pub(crate) struct PollingLoop {
   cancel: Option<watch::Sender<bool>>,
   task: Option<JoinHandle<Result<PollStats>>>,
}

impl PollingLoop {
   pub fn is_running(&self) -> bool {
      self.task.as_ref().is_some_and(|t| !t.is_finished())
   }

   /// Whether a task exists that has not been joined yet.
   pub const fn is_spawned(&self) -> bool {
      self.task.is_some()
   }

   /// Opens the sample buffer and spawns the task. Returns `false` when a
   /// task already exists.
   pub fn start(&mut self, core: &Arc<Core>, settings: PollerSettings) -> Result<bool> {
      if self.task.is_some() {
         return Ok(false);
      }
      core.binding.lock().open_sample_buffer(settings.sample_buffer_secs)?;

      let (tx, rx) = watch::channel(false);
      self.task = Some(tokio::spawn(run(core.clone(), settings, rx)));
      self.cancel = Some(tx);
      Ok(true)
   }

   /// Cancels and joins the task, then releases the sample buffer.
   ///
   /// Returns `None` if no task was spawned, otherwise the task's statistics
   /// or the fault that ended it.
   pub async fn stop(&mut self, core: &Core) -> Result<Option<PollStats>> {
      let Some(task) = self.task.take() else {
         return Ok(None);
      };
      if let Some(cancel) = self.cancel.take() {
         let _ = cancel.send(true);
      }

      let joined = task.await;
      core.binding.lock().close_sample_buffer();
      match joined {
         Ok(result) => result.map(Some),
         Err(e) => Err(NeurofeedError::PollerPanicked(e)),
      }
   }

   /// Cancels the task without waiting for it.
   pub fn abort(&mut self) {
      if let Some(cancel) = self.cancel.take() {
         let _ = cancel.send(true);
      }
      if let Some(task) = self.task.take() {
         task.abort();
      }
   }
}
