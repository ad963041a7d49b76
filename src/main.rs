//! Headless neurofeed session.
//!
//! Connects to the configured engine, monitors the headset and records one
//! timed session to a tab-separated `.eeg` file, logging headset status on
//! the way. Stops early on Ctrl-C.

use std::{sync::Arc, time::Duration};

use log::{debug, info};
use tokio::{signal, time};

use neurofeed::{
   Config, EmoStateLog, EventKind, Listener, ListenerResult, Panel, Recorder, Result, SessionEvent,
   SessionManager,
   headset::{emulator::EmulatedHeadset, protocol::Channel},
   window::RollingWindow,
};

#[tokio::main]
async fn main() -> Result<()> {
   env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

   info!("Starting neurofeed...");

   // Load configuration
   let config = Config::load()?;
   info!(
      "Loaded configuration: engine {:?}, monitor interval {}s",
      config.engine_identifier, config.monitor_interval_secs
   );

   let headset = EmulatedHeadset::new(config.emulator.clone());
   let manager = SessionManager::new(Box::new(headset), &config)?;

   let status = Arc::new(StatusPanel);
   manager.attach(&status);
   let window = Arc::new(RollingWindow::new(config.window_secs, config.emulator.sampling_rate));
   manager.attach(&window);

   manager.connect()?;
   manager.set_monitoring(true).await?;

   let directory = config.recording.resolve_directory()?;
   let duration = Duration::from_secs(config.recording.session_duration_secs);
   let recorder = Recorder::start(&directory, Some(duration)).await?;
   manager.attach(recorder.sink());
   let emo_log = Arc::new(EmoStateLog::create(&directory)?);
   manager.attach(&emo_log);
   info!("Recording {}s session", duration.as_secs());

   let interrupted = {
      let ctrl_c = signal::ctrl_c();
      let finished = recorder.finished();
      tokio::pin!(ctrl_c, finished);
      let mut report = time::interval(Duration::from_secs(5));
      loop {
         tokio::select! {
            _ = &mut ctrl_c => break true,
            () = &mut finished => break false,
            _ = report.tick() => {
               let mean = window.with(|w| w.channel_mean(Channel::O1));
               if let Some(mean) = mean {
                  let battery = manager.battery_level();
                  info!("O1 window mean {mean:.2}, battery {}/{}", battery.level, battery.max);
               }
            },
         }
      }
   };

   let summary = if interrupted {
      info!("Interrupted, closing recording...");
      recorder.abort().await?
   } else {
      recorder.finish().await?
   };
   info!("Wrote {} rows to {}", summary.rows, summary.path.display());
   let lines = emo_log.close()?;
   info!("Logged {lines} expressive readings to {}", emo_log.path().display());

   if let Some(stats) = manager.stop_monitoring().await? {
      debug!("Polling statistics: {stats:?}");
   }
   manager.disconnect().await?;
   info!("Shutting down neurofeed...");

   Ok(())
}

/// Logs headset status changes.
struct StatusPanel;

impl Listener for StatusPanel {
   fn on_event(&self, event: &SessionEvent) -> ListenerResult {
      match event {
         SessionEvent::Connection(status) => info!(
            "Connection: connected={}, battery {}/{}, signal {}",
            status.connected,
            status.battery_level,
            status.max_battery_level,
            status.wireless_signal
         ),
         SessionEvent::HeadsetFound(found) => {
            info!("Headset {}", if *found { "in range" } else { "out of range" });
         },
         SessionEvent::UserPresence(present) => info!("User present: {present}"),
         SessionEvent::SensorQuality(quality) => {
            info!("Contact quality (worst EEG site): {}", quality.worst_eeg());
         },
         SessionEvent::Expressive(state) => debug!("Expressive: {state}"),
         SessionEvent::Sampling(_) | SessionEvent::Monitoring => {},
      }
      Ok(())
   }
}

impl Panel for StatusPanel {
   fn monitored_events(&self) -> &[EventKind] {
      &[
         EventKind::Connection,
         EventKind::HeadsetFound,
         EventKind::UserPresence,
         EventKind::SensorQuality,
         EventKind::Expressive,
      ]
   }
}
