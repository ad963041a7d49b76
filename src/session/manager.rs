//! Public entry point to a headset session.

use std::sync::Arc;

use log::{debug, info, warn};
use smol_str::SmolStr;

use super::{
   Core, SessionState,
   poller::{PollStats, PollerSettings, PollingLoop},
};
use crate::{
   config::Config,
   error::{NeurofeedError, Result},
   event::{ConnectionStatus, EventKind, Listener, Panel, SessionEvent},
   headset::{
      binding::{BatteryLevel, DeviceError, EngineBinding, UserId},
      protocol::{ExpressiveState, SampleRow, SensorQuality, WirelessSignal},
   },
};

/// Owns the engine binding, the session state and the polling task.
///
/// Lifecycle commands (`connect`, `disconnect`, `set_monitoring`) return
/// errors to the caller. Everything observed while monitoring is delivered to
/// subscribed listeners, which run on the polling task and may call any
/// getter. Dropping the manager stops polling and disconnects.
pub struct SessionManager {
   core: Arc<Core>,
   poller: tokio::sync::Mutex<PollingLoop>,
   identifier: SmolStr,
   settings: PollerSettings,
}

impl SessionManager {
   pub fn new(binding: Box<dyn EngineBinding>, config: &Config) -> Result<Self> {
      let core = Core::new(binding);
      core.state.write().set_monitor_interval(config.monitor_interval_secs)?;
      Ok(Self {
         core: Arc::new(core),
         poller: tokio::sync::Mutex::new(PollingLoop::default()),
         identifier: config.engine_identifier.as_str().into(),
         settings: PollerSettings::from(config),
      })
   }

   /// Performs the engine handshake. Does nothing when already connected.
   pub fn connect(&self) -> Result<()> {
      let status = {
         let mut binding = self.core.binding.lock();
         if self.core.state.read().is_connected() {
            debug!("Already connected to {}", self.identifier);
            return Ok(());
         }

         info!("Connecting to engine {}", self.identifier);
         binding.connect(&self.identifier).map_err(|e| match e {
            DeviceError::LibraryUnavailable(reason) => {
               NeurofeedError::DeviceLibraryUnavailable(reason)
            },
            source => NeurofeedError::Connection { identifier: self.identifier.clone(), source },
         })?;

         let mut state = self.core.state.write();
         state.set_connected(true);
         state.connection_status()
      };

      info!("Connected to engine {}", self.identifier);
      self.core.dispatcher.dispatch(&SessionEvent::Connection(status));
      Ok(())
   }

   /// Stops monitoring and closes the engine connection.
   ///
   /// A fault left behind by the polling task is logged, not returned; the
   /// connection is closed regardless. The poller stays locked until the
   /// session is marked disconnected, so no task can start in between.
   pub async fn disconnect(&self) -> Result<()> {
      let mut poller = self.poller.lock().await;
      if !self.is_connected() {
         return Ok(());
      }

      if let Err(e) = self.stop_polling(&mut poller).await {
         warn!("Polling loop ended with a fault: {e}");
      }

      let (had_user, status) = {
         let mut binding = self.core.binding.lock();
         binding.disconnect().map_err(NeurofeedError::Disconnect)?;
         let mut state = self.core.state.write();
         let had_user = state.has_user();
         state.set_connected(false);
         (had_user, state.connection_status())
      };
      drop(poller);

      info!("Disconnected from engine {}", self.identifier);
      self.core.dispatcher.dispatch(&SessionEvent::Connection(status));
      if had_user {
         self.core.dispatcher.dispatch(&SessionEvent::UserPresence(false));
      }
      Ok(())
   }

   /// Starts or stops the polling task.
   ///
   /// Starting while running does nothing. If the previous task ended on its
   /// own, its fault is returned and the next call starts a fresh task.
   pub async fn set_monitoring(&self, monitoring: bool) -> Result<()> {
      if !monitoring {
         self.stop_monitoring().await?;
         return Ok(());
      }

      let mut poller = self.poller.lock().await;
      if poller.is_running() {
         debug!("Monitoring already running");
         return Ok(());
      }
      if poller.is_spawned() {
         self.stop_polling(&mut poller).await?;
      }

      self.core.state.write().set_monitoring(true)?;
      if let Err(e) = poller.start(&self.core, self.settings) {
         let _ = self.core.state.write().set_monitoring(false);
         return Err(e);
      }
      info!("Monitoring started");
      Ok(())
   }

   /// Stops the polling task and returns its statistics, if one was running.
   pub async fn stop_monitoring(&self) -> Result<Option<PollStats>> {
      let mut poller = self.poller.lock().await;
      self.stop_polling(&mut poller).await
   }

   async fn stop_polling(&self, poller: &mut PollingLoop) -> Result<Option<PollStats>> {
      let result = poller.stop(&self.core).await;
      let lost = {
         let mut state = self.core.state.write();
         let _ = state.set_monitoring(false);
         state.clear_headset_found()
      };
      if lost.is_updated() {
         self.core.dispatcher.dispatch(&SessionEvent::HeadsetFound(false));
      }
      if let Ok(Some(stats)) = &result {
         info!(
            "Monitoring stopped: {} events, {} samples, {} listener failures",
            stats.events, stats.samples, stats.listener_failures
         );
      }
      result
   }

   /// Changes the sleep between polls. Only allowed while disconnected.
   pub fn set_monitor_interval(&self, seconds: f64) -> Result<()> {
      self.core.state.write().set_monitor_interval(seconds)
   }

   pub fn is_connected(&self) -> bool {
      self.core.state.read().is_connected()
   }

   pub fn has_user(&self) -> bool {
      self.core.state.read().has_user()
   }

   pub fn is_monitoring(&self) -> bool {
      self.core.state.read().is_monitoring()
   }

   pub fn headset_found(&self) -> bool {
      self.core.state.read().headset_found()
   }

   pub fn battery_level(&self) -> BatteryLevel {
      self.core.state.read().battery()
   }

   pub fn wireless_signal(&self) -> WirelessSignal {
      self.core.state.read().wireless_signal()
   }

   pub fn sensor_quality(&self) -> SensorQuality {
      self.core.state.read().sensor_quality()
   }

   pub fn latest_samples(&self) -> Arc<[SampleRow]> {
      self.core.state.read().samples()
   }

   pub fn user_id(&self) -> Option<UserId> {
      self.core.state.read().user_id()
   }

   pub fn sampling_rate(&self) -> Option<u32> {
      self.core.state.read().sampling_rate()
   }

   pub fn expressive(&self) -> ExpressiveState {
      self.core.state.read().expressive()
   }

   pub fn monitor_interval(&self) -> f64 {
      self.core.state.read().monitor_interval()
   }

   pub fn status(&self) -> ConnectionStatus {
      self.core.state.read().connection_status()
   }

   /// Copy of the whole session state.
   pub fn snapshot(&self) -> SessionState {
      self.core.state.read().clone()
   }

   pub fn to_json(&self) -> serde_json::Value {
      let mut json = self.core.state.read().to_json();
      json["engine"] = self.identifier.as_str().into();
      json
   }

   pub fn subscribe(&self, kind: EventKind, listener: &Arc<dyn Listener>) {
      self.core.dispatcher.subscribe(kind, listener);
   }

   pub fn subscribe_id(&self, id: u16, listener: &Arc<dyn Listener>) -> Result<()> {
      self.core.dispatcher.subscribe_id(id, listener)
   }

   pub fn unsubscribe(&self, kind: EventKind, listener: &Arc<dyn Listener>) -> bool {
      self.core.dispatcher.unsubscribe(kind, listener)
   }

   /// Subscribes `panel` to every kind it monitors.
   pub fn attach<P: Panel + 'static>(&self, panel: &Arc<P>) {
      let listener: Arc<dyn Listener> = panel.clone();
      for &kind in panel.monitored_events() {
         self.core.dispatcher.subscribe(kind, &listener);
      }
   }

   pub fn listener_count(&self, kind: EventKind) -> usize {
      self.core.dispatcher.listener_count(kind)
   }
}

impl Drop for SessionManager {
   fn drop(&mut self) {
      self.poller.get_mut().abort();

      let mut binding = self.core.binding.lock();
      let connected = self.core.state.read().is_connected();
      if connected {
         binding.close_sample_buffer();
         if let Err(e) = binding.disconnect() {
            warn!("Failed to disconnect from engine on drop: {e}");
         }
         self.core.state.write().set_connected(false);
         debug!("Session dropped while connected; forced disconnect");
      }
   }
}

#[cfg(test)]
mod tests {
   use std::{
      sync::atomic::{AtomicUsize, Ordering},
      time::Duration,
   };

   use parking_lot::Mutex;

   use super::*;
   use crate::{
      event::ListenerResult,
      headset::{
         binding::PollResult,
         protocol::{EDK_UNKNOWN_ERROR, SensorId},
         emulator::EmulatedHeadset,
         testing::ScriptedBinding,
      },
      emo_log::EmoStateLog,
      recorder::{Recorder, read_tsv},
      session::poller,
   };

   fn config() -> Config {
      Config { monitor_interval_secs: 0.001, poll_timeout_ms: 0, ..Config::default() }
   }

   fn manager(binding: &ScriptedBinding) -> Arc<SessionManager> {
      Arc::new(SessionManager::new(Box::new(binding.clone()), &config()).unwrap())
   }

   fn step(manager: &SessionManager) {
      let mut stats = PollStats::default();
      poller::iterate(&manager.core, Duration::ZERO, &mut stats);
   }

   fn counter(kind_hits: &Arc<AtomicUsize>) -> Arc<dyn Listener> {
      let hits = kind_hits.clone();
      Arc::new(move |_: &SessionEvent| -> ListenerResult {
         hits.fetch_add(1, Ordering::SeqCst);
         Ok(())
      })
   }

   async fn wait_until(mut done: impl FnMut() -> bool) {
      for _ in 0..400 {
         if done() {
            return;
         }
         tokio::time::sleep(Duration::from_millis(5)).await;
      }
   }

   #[tokio::test]
   async fn test_battery_change_dispatches_once() {
      let binding = ScriptedBinding::new();
      let manager = manager(&binding);
      manager.connect().unwrap();

      let observed = Arc::new(Mutex::new(Vec::new()));
      let (m, o) = (Arc::downgrade(&manager), observed.clone());
      let listener: Arc<dyn Listener> = Arc::new(move |event: &SessionEvent| -> ListenerResult {
         let SessionEvent::Connection(status) = event else {
            return Ok(());
         };
         // State is already updated when listeners run
         let current = m.upgrade().map(|m| m.battery_level().level);
         o.lock().push((status.battery_level, current));
         Ok(())
      });
      manager.subscribe(EventKind::Connection, &listener);

      binding.script().push_state_updated();
      step(&manager);
      assert_eq!(*observed.lock(), [(7, Some(7))]);

      binding.script().push_state_updated();
      step(&manager);
      assert_eq!(observed.lock().len(), 1);

      binding.script().battery.level = 6;
      binding.script().push_state_updated();
      step(&manager);
      assert_eq!(*observed.lock(), [(7, Some(7)), (6, Some(6))]);
   }

   #[tokio::test]
   async fn test_failed_connect_can_be_retried() {
      let binding = ScriptedBinding::new();
      binding.script().connect_results.push_back(Err(DeviceError::Code(EDK_UNKNOWN_ERROR)));
      let manager = manager(&binding);

      match manager.connect() {
         Err(NeurofeedError::Connection { identifier, source }) => {
            assert_eq!(identifier, "Emotiv Systems-5");
            assert_eq!(source, DeviceError::Code(EDK_UNKNOWN_ERROR));
         },
         other => panic!("unexpected: {other:?}"),
      }
      assert!(!manager.is_connected());

      manager.connect().unwrap();
      assert!(manager.is_connected());
      manager.connect().unwrap();
      assert_eq!(binding.script().connects, 2);
   }

   #[tokio::test]
   async fn test_missing_library_is_reported() {
      let binding = ScriptedBinding::new();
      binding
         .script()
         .connect_results
         .push_back(Err(DeviceError::LibraryUnavailable("libedk.so not found".into())));
      let manager = manager(&binding);
      assert!(matches!(manager.connect(), Err(NeurofeedError::DeviceLibraryUnavailable(_))));
      assert!(!manager.is_connected());
   }

   #[tokio::test]
   async fn test_monitoring_requires_connection() {
      let binding = ScriptedBinding::new();
      let manager = manager(&binding);
      assert!(matches!(manager.set_monitoring(true).await, Err(NeurofeedError::NotConnected)));
      assert!(!manager.is_monitoring());
      assert_eq!(binding.script().buffers_opened, 0);
   }

   #[tokio::test]
   async fn test_double_start_runs_one_task() {
      let binding = ScriptedBinding::new();
      let manager = manager(&binding);
      manager.connect().unwrap();

      manager.set_monitoring(true).await.unwrap();
      manager.set_monitoring(true).await.unwrap();
      assert!(manager.is_monitoring());
      assert_eq!(binding.script().buffers_opened, 1);

      wait_until(|| binding.script().polled > 3).await;
      let stats = manager.stop_monitoring().await.unwrap().unwrap();
      assert!(stats.iterations > 3);
      assert!(!manager.is_monitoring());
      assert!(manager.is_connected());
      assert_eq!(binding.script().buffers_closed, 1);
   }

   #[tokio::test]
   async fn test_loop_fault_surfaces_on_next_command() {
      let binding = ScriptedBinding::new();
      for _ in 0..2 {
         binding.script().polls.push_back(PollResult::Error(EDK_UNKNOWN_ERROR));
      }
      let config = Config { poll_error_limit: Some(2), ..config() };
      let manager = SessionManager::new(Box::new(binding.clone()), &config).unwrap();
      manager.connect().unwrap();
      manager.set_monitoring(true).await.unwrap();

      wait_until(|| !manager.is_monitoring()).await;
      assert!(!manager.is_monitoring());
      assert!(matches!(
         manager.set_monitoring(true).await,
         Err(NeurofeedError::PollFailed { consecutive: 2, .. })
      ));

      manager.set_monitoring(true).await.unwrap();
      assert!(manager.is_monitoring());
      assert_eq!(binding.script().buffers_opened, 2);
      manager.set_monitoring(false).await.unwrap();
   }

   #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
   async fn test_monitoring_cannot_start_during_disconnect() {
      let binding = ScriptedBinding::new();
      binding.script().disconnect_delay = Duration::from_millis(100);
      let manager = manager(&binding);
      manager.connect().unwrap();
      manager.set_monitoring(true).await.unwrap();

      let m = manager.clone();
      let disconnecting = tokio::spawn(async move { m.disconnect().await });
      wait_until(|| binding.script().disconnects == 1).await;

      // Waits for the disconnect to finish, then finds no connection
      assert!(matches!(manager.set_monitoring(true).await, Err(NeurofeedError::NotConnected)));
      disconnecting.await.unwrap().unwrap();
      assert!(!manager.is_connected());
      assert!(!manager.is_monitoring());

      let polled = binding.script().polled;
      tokio::time::sleep(Duration::from_millis(30)).await;
      assert_eq!(binding.script().polled, polled);

      binding.script().disconnect_delay = Duration::ZERO;
      manager.connect().unwrap();
      manager.set_monitoring(true).await.unwrap();
      assert!(manager.is_monitoring());
      assert_eq!(binding.script().buffers_opened, 2);
      manager.disconnect().await.unwrap();
   }

   #[tokio::test]
   async fn test_stop_interrupts_long_sleep() {
      let binding = ScriptedBinding::new();
      let config = Config { monitor_interval_secs: 10.0, ..config() };
      let manager = SessionManager::new(Box::new(binding.clone()), &config).unwrap();
      manager.connect().unwrap();
      manager.set_monitoring(true).await.unwrap();
      wait_until(|| binding.script().polled > 0).await;

      let started = std::time::Instant::now();
      let stats = manager.stop_monitoring().await.unwrap().unwrap();
      assert!(started.elapsed() < Duration::from_secs(2));
      assert_eq!(stats.iterations, 1);
      assert!(!manager.is_monitoring());
   }

   #[tokio::test]
   async fn test_disconnect_announces_lost_user() {
      let binding = ScriptedBinding::new();
      binding.script().signal = WirelessSignal::Good;
      let manager = manager(&binding);
      manager.connect().unwrap();
      binding.script().push_state_updated();
      step(&manager);
      assert!(manager.has_user());
      assert!(manager.headset_found());

      let seen = Arc::new(Mutex::new(Vec::new()));
      let s = seen.clone();
      let listener: Arc<dyn Listener> = Arc::new(move |event: &SessionEvent| -> ListenerResult {
         s.lock().push(event.clone());
         Ok(())
      });
      manager.subscribe(EventKind::Connection, &listener);
      manager.subscribe(EventKind::UserPresence, &listener);

      manager.disconnect().await.unwrap();
      assert!(!manager.is_connected());
      assert!(!manager.has_user());
      assert_eq!(manager.wireless_signal(), WirelessSignal::NoSignal);
      assert_eq!(binding.script().disconnects, 1);

      let seen = seen.lock();
      assert!(matches!(
         seen[0],
         SessionEvent::Connection(ConnectionStatus { connected: false, .. })
      ));
      assert!(matches!(seen[1], SessionEvent::UserPresence(false)));
      assert_eq!(seen.len(), 2);
   }

   #[tokio::test]
   async fn test_interval_locked_while_connected() {
      let binding = ScriptedBinding::new();
      let manager = manager(&binding);
      manager.set_monitor_interval(0.002).unwrap();
      manager.connect().unwrap();
      assert!(matches!(
         manager.set_monitor_interval(0.5),
         Err(NeurofeedError::SessionActive(_))
      ));
      assert_eq!(manager.monitor_interval(), 0.002);
   }

   #[test]
   fn test_configured_interval_is_validated() {
      let config = Config { monitor_interval_secs: 1e20, ..config() };
      let result = SessionManager::new(Box::new(ScriptedBinding::new()), &config);
      assert!(matches!(result, Err(NeurofeedError::InvalidInterval(_))));
   }

   struct QualityPanel {
      hits: AtomicUsize,
   }

   impl Listener for QualityPanel {
      fn on_event(&self, _event: &SessionEvent) -> ListenerResult {
         self.hits.fetch_add(1, Ordering::SeqCst);
         Ok(())
      }
   }

   impl Panel for QualityPanel {
      fn monitored_events(&self) -> &[EventKind] {
         &[EventKind::Monitoring, EventKind::SensorQuality]
      }
   }

   #[tokio::test]
   async fn test_attached_panel_follows_its_kinds() {
      let binding = ScriptedBinding::new();
      binding.script().quality.set(SensorId::O2, 2);
      let manager = manager(&binding);
      manager.connect().unwrap();

      let panel = Arc::new(QualityPanel { hits: AtomicUsize::new(0) });
      manager.attach(&panel);
      assert_eq!(manager.listener_count(EventKind::SensorQuality), 1);
      assert_eq!(manager.listener_count(EventKind::Connection), 0);

      binding.script().push_state_updated();
      step(&manager);
      assert_eq!(panel.hits.load(Ordering::SeqCst), 2);

      drop(panel);
      assert_eq!(manager.listener_count(EventKind::Monitoring), 0);
   }

   #[tokio::test]
   async fn test_numeric_subscription() {
      let binding = ScriptedBinding::new();
      let manager = manager(&binding);
      let hits = Arc::new(AtomicUsize::new(0));
      let listener = counter(&hits);
      assert!(manager.subscribe_id(77, &listener).is_err());
      manager.subscribe_id(EventKind::Connection.id(), &listener).unwrap();
      manager.connect().unwrap();
      assert_eq!(hits.load(Ordering::SeqCst), 1);
      assert!(manager.unsubscribe(EventKind::Connection, &listener));
   }

   #[tokio::test]
   async fn test_drop_forces_disconnect() {
      let binding = ScriptedBinding::new();
      {
         let manager = manager(&binding);
         manager.connect().unwrap();
         manager.set_monitoring(true).await.unwrap();
      }
      let script = binding.script();
      assert_eq!(script.disconnects, 1);
      assert!(script.buffers_closed >= 1);
   }

   #[tokio::test]
   async fn test_json_snapshot() {
      let binding = ScriptedBinding::new();
      let manager = manager(&binding);
      manager.connect().unwrap();
      let json = manager.to_json();
      assert_eq!(json["connected"], true);
      assert_eq!(json["engine"], "Emotiv Systems-5");
      assert_eq!(json["wireless_signal"], "no_signal");
      assert_eq!(json["sensor_quality"]["AF3"], 0);
      assert_eq!(json["expressive"], "neutral");
      assert_eq!(json["suite_scores"]["cognitive_action"], 0);
   }

   #[tokio::test]
   async fn test_emulated_session_records_samples() {
      let mut config = config();
      config.emulator.seed = Some(1);
      config.emulator.state_period_ms = 10;
      let headset = EmulatedHeadset::new(config.emulator.clone());
      let manager = SessionManager::new(Box::new(headset), &config).unwrap();
      manager.connect().unwrap();
      manager.set_monitoring(true).await.unwrap();

      let dir = tempfile::tempdir().unwrap();
      let recorder = Recorder::start(dir.path(), None).await.unwrap();
      manager.attach(recorder.sink());
      let emo_log = Arc::new(EmoStateLog::create(dir.path()).unwrap());
      manager.attach(&emo_log);

      wait_until(|| manager.has_user() && !manager.latest_samples().is_empty()).await;
      tokio::time::sleep(Duration::from_millis(50)).await;
      manager.set_monitoring(false).await.unwrap();
      let summary = recorder.finish().await.unwrap();
      assert!(emo_log.close().unwrap() > 0);

      assert!(!manager.headset_found());
      assert_eq!(manager.user_id(), Some(0));
      assert_eq!(manager.sampling_rate(), Some(128));
      assert!(summary.rows > 0);
      let recording = read_tsv(&summary.path).unwrap();
      assert_eq!(recording.rows.len() as u64, summary.rows);

      manager.disconnect().await.unwrap();
      assert!(!manager.is_connected());
   }
}
