//! Comma-separated log of every expressive reading.
//!
//! Unlike the sample recorder, lines are written straight from the listener:
//! expressive updates arrive at the state-update rate, not the sampling rate,
//! and listeners already run on the blocking polling thread.

use std::{
   fs::File,
   io::{BufWriter, Write},
   path::{Path, PathBuf},
   time::Instant,
};

use log::{debug, info};
use parking_lot::Mutex;

use crate::{
   error::{NeurofeedError, Result},
   event::{EventKind, Listener, ListenerResult, Panel, SessionEvent},
   headset::protocol::{ExpressiveState, FACE_ACTIONS},
};

pub const COLUMNS: [&str; 18] = [
   "Time",
   "Blink",
   "Wink Left",
   "Wink Right",
   "Look Left",
   "Look Right",
   "Eyebrow",
   "Furrow",
   "Smile",
   "Clench",
   "Smirk Left",
   "Smirk Right",
   "Laugh",
   "Short Term Excitement",
   "Long Term Excitement",
   "Engagement/Boredom",
   "Cognitive Action",
   "Cognitive Power",
];

struct LogFile {
   out: BufWriter<File>,
   lines: u64,
}

/// Listener appending one line per expressive reading.
pub struct EmoStateLog {
   path: PathBuf,
   started: Instant,
   file: Mutex<Option<LogFile>>,
}

impl EmoStateLog {
   /// Creates `emostate-<uuid>.csv` in `directory` and writes the header.
   pub fn create(directory: &Path) -> Result<Self> {
      std::fs::create_dir_all(directory)?;
      let path = directory.join(format!("emostate-{}.csv", uuid::Uuid::new_v4()));
      let mut out = BufWriter::new(File::create(&path)?);
      writeln!(out, "{}", COLUMNS.join(","))?;
      out.flush()?;

      info!("Logging expressive state to {}", path.display());
      Ok(Self {
         path,
         started: Instant::now(),
         file: Mutex::new(Some(LogFile { out, lines: 0 })),
      })
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub fn is_open(&self) -> bool {
      self.file.lock().is_some()
   }

   /// Flushes and closes the file, returning the number of lines logged.
   /// Later readings are refused.
   pub fn close(&self) -> Result<u64> {
      let Some(mut file) = self.file.lock().take() else {
         return Err(NeurofeedError::RecorderClosed);
      };
      file.out.flush()?;
      debug!("Closed {} after {} lines", self.path.display(), file.lines);
      Ok(file.lines)
   }
}

/// Formats one log line, without the trailing newline.
pub fn format_line(seconds: f64, state: &ExpressiveState) -> String {
   let flag = |set: bool| if set { "1" } else { "0" };
   let mut fields = vec![
      format!("{seconds:.3}"),
      flag(state.blink).to_owned(),
      flag(state.left_wink).to_owned(),
      flag(state.right_wink).to_owned(),
      flag(state.looking_left).to_owned(),
      flag(state.looking_right).to_owned(),
   ];
   fields.extend(FACE_ACTIONS.iter().map(|&a| format!("{:.6}", state.face_power(a))));

   let scores = &state.scores;
   fields.push(format!("{:.6}", scores.excitement_short_term));
   fields.push(format!("{:.6}", scores.excitement_long_term));
   fields.push(format!("{:.6}", scores.engagement_boredom));
   fields.push(format!("{:#06x}", scores.cognitive_action));
   fields.push(format!("{:.6}", scores.cognitive_power));
   fields.join(",")
}

impl Listener for EmoStateLog {
   fn on_event(&self, event: &SessionEvent) -> ListenerResult {
      let SessionEvent::Expressive(state) = event else {
         return Ok(());
      };
      let mut guard = self.file.lock();
      let Some(file) = guard.as_mut() else {
         return Err(NeurofeedError::RecorderClosed.into());
      };

      let line = format_line(self.started.elapsed().as_secs_f64(), state);
      writeln!(file.out, "{line}")?;
      file.out.flush()?;
      file.lines += 1;
      Ok(())
   }
}

impl Panel for EmoStateLog {
   fn monitored_events(&self) -> &[EventKind] {
      &[EventKind::Expressive]
   }
}
