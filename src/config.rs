//! Configuration management for the neurofeed service.
//!
//! This module handles loading and saving configuration from disk,
//! including engine parameters, polling policy and recording defaults.

use std::{
   env, fs,
   path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
   error::{NeurofeedError, Result},
   headset::emulator::EmulatorConfig,
   session::DEFAULT_MONITOR_INTERVAL,
};

/// Main configuration structure for the service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
   /// Identifier handed to the engine on connect.
   #[serde(default = "default_engine_identifier")]
   pub engine_identifier: String,

   #[serde(default = "default_monitor_interval")]
   pub monitor_interval_secs: f64,

   #[serde(default = "default_sample_buffer")]
   pub sample_buffer_secs: f32,

   #[serde(default = "default_poll_timeout")]
   pub poll_timeout_ms: u64,

   /// Consecutive poll errors that stop monitoring. Unset retries forever.
   #[serde(default)]
   pub poll_error_limit: Option<u32>,

   /// Span of the rolling sample window kept for analysis.
   #[serde(default = "default_window")]
   pub window_secs: f64,

   #[serde(default)]
   pub recording: RecordingConfig,

   #[serde(default)]
   pub emulator: EmulatorConfig,
}

/// Where and for how long sessions are recorded.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RecordingConfig {
   #[serde(default)]
   pub directory: Option<PathBuf>,

   #[serde(default = "default_session_duration")]
   pub session_duration_secs: u64,
}

fn default_engine_identifier() -> String {
   "Emotiv Systems-5".to_owned()
}

const fn default_monitor_interval() -> f64 {
   DEFAULT_MONITOR_INTERVAL
}

const fn default_sample_buffer() -> f32 {
   1.0
}

const fn default_poll_timeout() -> u64 {
   10
}

const fn default_window() -> f64 {
   4.0
}

const fn default_session_duration() -> u64 {
   60
}

impl Default for Config {
   fn default() -> Self {
      Self {
         engine_identifier: default_engine_identifier(),
         monitor_interval_secs: default_monitor_interval(),
         sample_buffer_secs: default_sample_buffer(),
         poll_timeout_ms: default_poll_timeout(),
         poll_error_limit: None,
         window_secs: default_window(),
         recording: RecordingConfig::default(),
         emulator: EmulatorConfig::default(),
      }
   }
}

impl Default for RecordingConfig {
   fn default() -> Self {
      Self { directory: None, session_duration_secs: default_session_duration() }
   }
}

impl RecordingConfig {
   /// Configured directory, or the platform data directory.
   pub fn resolve_directory(&self) -> Result<PathBuf> {
      if let Some(dir) = &self.directory {
         return Ok(dir.clone());
      }
      dirs::data_local_dir()
         .map(|d| d.join("neurofeed").join("recordings"))
         .ok_or(NeurofeedError::ConfigDirNotFound)
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      Self::load_from(&Self::config_path()?)
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      self.save_to(&Self::config_path()?)
   }

   pub fn load_from(path: &Path) -> Result<Self> {
      if path.exists() {
         let contents = fs::read_to_string(path)?;
         Ok(toml::from_str(&contents)?)
      } else {
         let config = Self::default();
         config.save_to(path)?;
         Ok(config)
      }
   }

   pub fn save_to(&self, path: &Path) -> Result<()> {
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(path, contents)?;

      Ok(())
   }

   pub fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(home) = env::var("NEUROFEED_HOME") {
         PathBuf::from(home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(NeurofeedError::ConfigDirNotFound);
      };

      Ok(config_dir.join("neurofeed").join("config.toml"))
   }
}
