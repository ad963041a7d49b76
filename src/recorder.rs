//! Tab-separated session recording.
//!
//! A [`Recorder`] owns a writer task and a [`RecorderSink`]. The sink is the
//! listener: it only queues the sample batches it receives, so the polling
//! task never waits on file I/O. The writer drains the queue, appends one
//! line per sample and flushes after every batch.
//!
//! File layout: a header line with the channel names, then one line per
//! sample, values separated by tabs and printed with six decimals.

use std::{
   fmt::Write as _,
   fs,
   io,
   path::{Path, PathBuf},
   sync::Arc,
   time::Duration,
};

use crossbeam::queue::SegQueue;
use log::{debug, info, warn};
use parking_lot::RwLock;
use smol_str::SmolStr;
use tokio::{
   fs::File,
   io::{AsyncWriteExt, BufWriter},
   sync::{Notify, watch},
   task::JoinHandle,
   time::{self, Instant},
};

use crate::{
   error::{NeurofeedError, Result},
   event::{EventKind, Listener, ListenerResult, Panel, SessionEvent},
   headset::protocol::{CHANNEL_COUNT, CHANNELS, SampleRow},
};

/// File extension of recordings.
pub const EXTENSION: &str = "eeg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
   Open,
   Finishing,
   Aborted,
}

/// Listener side of a recorder.
pub struct RecorderSink {
   queue: SegQueue<Arc<[SampleRow]>>,
   notifier: Notify,
   // Held for reading while a batch is queued, so closing waits for it
   state: RwLock<SinkState>,
}

impl RecorderSink {
   fn new() -> Arc<Self> {
      Arc::new(Self {
         queue: SegQueue::new(),
         notifier: Notify::new(),
         state: RwLock::new(SinkState::Open),
      })
   }

   pub fn is_open(&self) -> bool {
      *self.state.read() == SinkState::Open
   }

   fn close(&self, state: SinkState) {
      {
         let mut current = self.state.write();
         if *current == SinkState::Open {
            *current = state;
         }
      }
      self.notifier.notify_waiters();
   }
}

impl Listener for RecorderSink {
   fn on_event(&self, event: &SessionEvent) -> ListenerResult {
      let SessionEvent::Sampling(rows) = event else {
         return Ok(());
      };
      {
         let state = self.state.read();
         if *state != SinkState::Open {
            return Err(NeurofeedError::RecorderClosed.into());
         }
         self.queue.push(rows.clone());
      }
      self.notifier.notify_waiters();
      Ok(())
   }
}

impl Panel for RecorderSink {
   fn monitored_events(&self) -> &[EventKind] {
      &[EventKind::Sampling]
   }
}

/// What a finished recording contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
   pub path: PathBuf,
   pub rows: u64,
   pub batches: u64,
   /// False when the recording was aborted.
   pub completed: bool,
}

/// A recording in progress.
pub struct Recorder {
   sink: Arc<RecorderSink>,
   task: JoinHandle<Result<RecordingSummary>>,
   done: watch::Receiver<bool>,
   path: PathBuf,
}

impl Recorder {
   /// Creates `session-<uuid>.eeg` in `directory` and starts the writer.
   ///
   /// With a `duration`, the recording completes on its own once it elapses.
   pub async fn start(directory: &Path, duration: Option<Duration>) -> Result<Self> {
      tokio::fs::create_dir_all(directory).await?;
      let path = directory.join(format!("session-{}.{EXTENSION}", uuid::Uuid::new_v4()));

      let mut file = BufWriter::new(File::create(&path).await?);
      file.write_all(header().as_bytes()).await?;
      file.flush().await?;

      let sink = RecorderSink::new();
      let (done_tx, done) = watch::channel(false);
      let deadline = duration.map(|d| Instant::now() + d);
      let task = tokio::spawn(write_session(sink.clone(), file, path.clone(), deadline, done_tx));

      info!("Recording to {}", path.display());
      Ok(Self { sink, task, done, path })
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   /// The listener to attach to a session.
   pub const fn sink(&self) -> &Arc<RecorderSink> {
      &self.sink
   }

   pub fn is_recording(&self) -> bool {
      self.sink.is_open() && !self.task.is_finished()
   }

   /// Resolves once the writer has stopped, either because the duration
   /// elapsed or because the recording was closed.
   pub async fn finished(&self) {
      let mut done = self.done.clone();
      let _ = done.wait_for(|d| *d).await;
   }

   /// Stops accepting samples, writes what is queued and closes the file.
   pub async fn finish(self) -> Result<RecordingSummary> {
      self.close(SinkState::Finishing).await
   }

   /// Like [`finish`](Self::finish) but marks the recording incomplete.
   pub async fn abort(self) -> Result<RecordingSummary> {
      self.close(SinkState::Aborted).await
   }

   async fn close(self, state: SinkState) -> Result<RecordingSummary> {
      self.sink.close(state);
      self.task.await.map_err(NeurofeedError::RecorderPanicked)?
   }
}

fn header() -> String {
   let mut line = CHANNELS.iter().map(|c| c.name()).collect::<Vec<_>>().join("\t");
   line.push('\n');
   line
}

fn format_row(out: &mut String, row: &SampleRow) {
   for (i, value) in row.iter().enumerate() {
      if i > 0 {
         out.push('\t');
      }
      let _ = write!(out, "{value:.6}");
   }
   out.push('\n');
}

async fn drain(
   sink: &RecorderSink,
   file: &mut BufWriter<File>,
   summary: &mut RecordingSummary,
   line: &mut String,
) -> io::Result<()> {
   while let Some(batch) = sink.queue.pop() {
      line.clear();
      for row in batch.iter() {
         format_row(line, row);
      }
      file.write_all(line.as_bytes()).await?;
      file.flush().await?;
      summary.rows += batch.len() as u64;
      summary.batches += 1;
   }
   Ok(())
}

async fn write_session(
   sink: Arc<RecorderSink>,
   mut file: BufWriter<File>,
   path: PathBuf,
   deadline: Option<Instant>,
   done: watch::Sender<bool>,
) -> Result<RecordingSummary> {
   let mut summary = RecordingSummary { path, rows: 0, batches: 0, completed: false };
   let result = record(&sink, &mut file, &mut summary, deadline).await;
   // Later batches are refused even if writing failed
   sink.close(SinkState::Aborted);
   let _ = done.send(true);

   match result {
      Ok(()) => {
         info!(
            "Recording {} closed: {} rows in {} batches{}",
            summary.path.display(),
            summary.rows,
            summary.batches,
            if summary.completed { "" } else { " (aborted)" }
         );
         Ok(summary)
      },
      Err(e) => {
         warn!("Recording {} failed: {e}", summary.path.display());
         Err(e.into())
      },
   }
}

async fn record(
   sink: &RecorderSink,
   file: &mut BufWriter<File>,
   summary: &mut RecordingSummary,
   deadline: Option<Instant>,
) -> io::Result<()> {
   let mut line = String::new();
   loop {
      let notified = sink.notifier.notified();
      let state = *sink.state.read();
      drain(sink, file, summary, &mut line).await?;

      match state {
         SinkState::Open => {},
         SinkState::Finishing => {
            summary.completed = true;
            break;
         },
         SinkState::Aborted => break,
      }

      match deadline {
         Some(deadline) => {
            tokio::select! {
               () = notified => {},
               () = time::sleep_until(deadline) => {
                  debug!("Recording duration elapsed");
                  sink.close(SinkState::Finishing);
               },
            }
         },
         None => notified.await,
      }
   }

   // Batches accepted while the state changed
   drain(sink, file, summary, &mut line).await?;
   file.shutdown().await
}

/// Contents of a recording file.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
   pub header: Vec<SmolStr>,
   pub rows: Vec<SampleRow>,
}

/// Reads a recording back.
pub fn read_tsv(path: &Path) -> Result<Recording> {
   let contents = fs::read_to_string(path)?;
   let mut lines = contents.lines();
   let header: Vec<SmolStr> = lines
      .next()
      .ok_or_else(|| invalid("missing header"))?
      .split('\t')
      .map(SmolStr::from)
      .collect();
   if header.len() != CHANNEL_COUNT {
      return Err(invalid(format!("header has {} columns", header.len())).into());
   }

   let mut rows = Vec::new();
   for (n, line) in lines.enumerate().filter(|(_, l)| !l.is_empty()) {
      let fields: Vec<&str> = line.split('\t').collect();
      if fields.len() != CHANNEL_COUNT {
         return Err(invalid(format!("line {} has {} columns", n + 2, fields.len())).into());
      }
      let mut row = [0.0; CHANNEL_COUNT];
      for (slot, field) in row.iter_mut().zip(fields) {
         *slot = field
            .parse()
            .map_err(|e| invalid(format!("line {}: {e}", n + 2)))?;
      }
      rows.push(row);
   }

   Ok(Recording { header, rows })
}

fn invalid(msg: impl Into<String>) -> io::Error {
   io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
