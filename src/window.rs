//! Fixed-capacity sample windows.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{
   event::{EventKind, Listener, ListenerResult, Panel, SessionEvent},
   headset::protocol::{Channel, SampleRow},
};

/// Ring buffer holding the most recent `seconds × rate` rows.
#[derive(Debug, Clone)]
pub struct SampleWindow {
   rows: VecDeque<SampleRow>,
   capacity: usize,
}

impl SampleWindow {
   /// Window spanning `seconds` at `rate` samples per second. Holds at least
   /// one row.
   pub fn new(seconds: f64, rate: u32) -> Self {
      let capacity = (seconds * f64::from(rate)).round().max(1.0) as usize;
      Self { rows: VecDeque::with_capacity(capacity), capacity }
   }

   pub const fn capacity(&self) -> usize {
      self.capacity
   }

   pub fn len(&self) -> usize {
      self.rows.len()
   }

   pub fn is_empty(&self) -> bool {
      self.rows.is_empty()
   }

   pub fn is_full(&self) -> bool {
      self.rows.len() == self.capacity
   }

   /// Appends `rows`, evicting the oldest once full.
   pub fn extend(&mut self, rows: &[SampleRow]) {
      let skip = rows.len().saturating_sub(self.capacity);
      for row in &rows[skip..] {
         if self.rows.len() == self.capacity {
            self.rows.pop_front();
         }
         self.rows.push_back(*row);
      }
   }

   /// Rows from oldest to newest.
   pub fn iter(&self) -> impl ExactSizeIterator<Item = &SampleRow> {
      self.rows.iter()
   }

   pub fn latest(&self) -> Option<&SampleRow> {
      self.rows.back()
   }

   /// Values of one channel, oldest first.
   pub fn channel(&self, channel: Channel) -> impl Iterator<Item = f64> + '_ {
      let column = channel.column();
      self.rows.iter().map(move |row| row[column])
   }

   pub fn channel_mean(&self, channel: Channel) -> Option<f64> {
      if self.rows.is_empty() {
         return None;
      }
      Some(self.channel(channel).sum::<f64>() / self.rows.len() as f64)
   }

   pub fn clear(&mut self) {
      self.rows.clear();
   }
}

/// Listener keeping a [`SampleWindow`] filled from sampling events.
pub struct RollingWindow(Mutex<SampleWindow>);

impl RollingWindow {
   pub fn new(seconds: f64, rate: u32) -> Self {
      Self(Mutex::new(SampleWindow::new(seconds, rate)))
   }

   /// Runs `f` against the current window.
   pub fn with<R>(&self, f: impl FnOnce(&SampleWindow) -> R) -> R {
      f(&self.0.lock())
   }

   pub fn snapshot(&self) -> SampleWindow {
      self.0.lock().clone()
   }
}

impl Listener for RollingWindow {
   fn on_event(&self, event: &SessionEvent) -> ListenerResult {
      if let SessionEvent::Sampling(rows) = event {
         self.0.lock().extend(rows);
      }
      Ok(())
   }
}

impl Panel for RollingWindow {
   fn monitored_events(&self) -> &[EventKind] {
      &[EventKind::Sampling]
   }
}
