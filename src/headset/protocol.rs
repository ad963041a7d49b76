//! Headset protocol definitions and data structures.
//!
//! Sensor and channel identifiers, wireless signal levels and the vendor
//! engine's event and error codes for the 14-channel EEG headset.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

// Engine event codes
pub const EE_USER_ADDED: u32 = 0x0010;
pub const EE_USER_REMOVED: u32 = 0x0020;
pub const EE_EMOSTATE_UPDATED: u32 = 0x0040;
pub const EE_PROFILE_EVENT: u32 = 0x0080;
pub const EE_COGNITIV_EVENT: u32 = 0x0100;
pub const EE_EXPRESSIV_EVENT: u32 = 0x0200;
pub const EE_INTERNAL_STATE_CHANGED: u32 = 0x0400;
pub const EE_EMULATOR_ERROR: u32 = 0x0001;

// Engine error codes
pub const EDK_OK: i32 = 0x0000;
pub const EDK_UNKNOWN_ERROR: i32 = 0x0001;
pub const EDK_INVALID_PROFILE_ARCHIVE: i32 = 0x0101;
pub const EDK_NO_USER_FOR_BASE_PROFILE: i32 = 0x0102;
pub const EDK_CANNOT_ACQUIRE_DATA: i32 = 0x0200;
pub const EDK_BUFFER_TOO_SMALL: i32 = 0x0300;
pub const EDK_OUT_OF_RANGE: i32 = 0x0301;
pub const EDK_INVALID_PARAMETER: i32 = 0x0302;
pub const EDK_PARAMETER_LOCKED: i32 = 0x0303;
pub const EDK_NO_EVENT: i32 = 0x0600;

/// Returns the engine's symbolic name for an error code, if known.
pub const fn error_code_name(code: i32) -> Option<&'static str> {
   Some(match code {
      EDK_OK => "EDK_OK",
      EDK_UNKNOWN_ERROR => "EDK_UNKNOWN_ERROR",
      EDK_INVALID_PROFILE_ARCHIVE => "EDK_INVALID_PROFILE_ARCHIVE",
      EDK_NO_USER_FOR_BASE_PROFILE => "EDK_NO_USER_FOR_BASE_PROFILE",
      EDK_CANNOT_ACQUIRE_DATA => "EDK_CANNOT_ACQUIRE_DATA",
      EDK_BUFFER_TOO_SMALL => "EDK_BUFFER_TOO_SMALL",
      EDK_OUT_OF_RANGE => "EDK_OUT_OF_RANGE",
      EDK_INVALID_PARAMETER => "EDK_INVALID_PARAMETER",
      EDK_PARAMETER_LOCKED => "EDK_PARAMETER_LOCKED",
      EDK_NO_EVENT => "EDK_NO_EVENT",
      _ => return None,
   })
}

/// Physical electrodes, including the two common-mode references.
#[repr(u8)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
pub enum SensorId {
   #[strum(serialize = "CMS")]
   Cms = 0,
   #[strum(serialize = "DRL")]
   Drl = 1,
   #[strum(serialize = "AF3")]
   Af3 = 3,
   #[strum(serialize = "F7")]
   F7 = 4,
   #[strum(serialize = "F3")]
   F3 = 5,
   #[strum(serialize = "FC5")]
   Fc5 = 6,
   #[strum(serialize = "T7")]
   T7 = 7,
   #[strum(serialize = "P7")]
   P7 = 8,
   #[strum(serialize = "O1")]
   O1 = 9,
   #[strum(serialize = "O2")]
   O2 = 10,
   #[strum(serialize = "P8")]
   P8 = 11,
   #[strum(serialize = "T8")]
   T8 = 12,
   #[strum(serialize = "FC6")]
   Fc6 = 13,
   #[strum(serialize = "F4")]
   F4 = 14,
   #[strum(serialize = "F8")]
   F8 = 15,
   #[strum(serialize = "AF4")]
   Af4 = 16,
}

/// The 14 EEG sites.
pub const SENSORS: [SensorId; 14] = [
   SensorId::Af3,
   SensorId::F7,
   SensorId::F3,
   SensorId::Fc5,
   SensorId::T7,
   SensorId::P7,
   SensorId::O1,
   SensorId::O2,
   SensorId::P8,
   SensorId::T8,
   SensorId::Fc6,
   SensorId::F4,
   SensorId::F8,
   SensorId::Af4,
];

pub const SENSOR_COUNT: usize = 16;

/// Every sensor reporting contact quality: references first, then EEG sites.
pub const COMPLETE_SENSORS: [SensorId; SENSOR_COUNT] = [
   SensorId::Cms,
   SensorId::Drl,
   SensorId::Af3,
   SensorId::F7,
   SensorId::F3,
   SensorId::Fc5,
   SensorId::T7,
   SensorId::P7,
   SensorId::O1,
   SensorId::O2,
   SensorId::P8,
   SensorId::T8,
   SensorId::Fc6,
   SensorId::F4,
   SensorId::F8,
   SensorId::Af4,
];

impl SensorId {
   pub const fn id(self) -> u8 {
      self as u8
   }

   pub fn name(self) -> &'static str {
      self.into()
   }

   /// Position of the sensor in [`COMPLETE_SENSORS`].
   const fn quality_slot(self) -> usize {
      match self {
         Self::Cms => 0,
         Self::Drl => 1,
         // EEG sites are numbered contiguously from 3
         other => other as usize - 1,
      }
   }
}

/// Data channels delivered in every sample row.
#[repr(u8)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   strum::FromRepr,
   strum::Display,
   strum::EnumString,
   strum::IntoStaticStr,
)]
pub enum Channel {
   Counter = 0,
   #[strum(serialize = "AF3")]
   Af3 = 3,
   #[strum(serialize = "F7")]
   F7 = 4,
   #[strum(serialize = "F3")]
   F3 = 5,
   #[strum(serialize = "FC5")]
   Fc5 = 6,
   #[strum(serialize = "T7")]
   T7 = 7,
   #[strum(serialize = "P7")]
   P7 = 8,
   #[strum(serialize = "O1")]
   O1 = 9,
   #[strum(serialize = "O2")]
   O2 = 10,
   #[strum(serialize = "P8")]
   P8 = 11,
   #[strum(serialize = "T8")]
   T8 = 12,
   #[strum(serialize = "FC6")]
   Fc6 = 13,
   #[strum(serialize = "F4")]
   F4 = 14,
   #[strum(serialize = "F8")]
   F8 = 15,
   #[strum(serialize = "AF4")]
   Af4 = 16,
   GyroX = 17,
   GyroY = 18,
   Timestamp = 19,
   #[strum(serialize = "FUNC_ID")]
   FuncId = 21,
   #[strum(serialize = "FUNC_VALUE")]
   FuncValue = 22,
   #[strum(serialize = "MARKER")]
   Marker = 23,
   #[strum(serialize = "SYNC_SIGNAL")]
   SyncSignal = 24,
}

impl Channel {
   pub const fn id(self) -> u8 {
      self as u8
   }

   pub fn name(self) -> &'static str {
      self.into()
   }

   /// Column of this channel inside a [`SampleRow`].
   pub fn column(self) -> usize {
      CHANNELS
         .iter()
         .position(|c| *c == self)
         .unwrap_or_default()
   }
}

/// Column order of every sample row and of the recorder's header.
pub const CHANNELS: [Channel; CHANNEL_COUNT] = [
   Channel::Counter,
   Channel::Af3,
   Channel::F7,
   Channel::F3,
   Channel::Fc5,
   Channel::T7,
   Channel::P7,
   Channel::O1,
   Channel::O2,
   Channel::P8,
   Channel::T8,
   Channel::Fc6,
   Channel::F4,
   Channel::F8,
   Channel::Af4,
   Channel::GyroX,
   Channel::GyroY,
   Channel::Timestamp,
   Channel::FuncId,
   Channel::FuncValue,
   Channel::Marker,
   Channel::SyncSignal,
];

pub const CHANNEL_COUNT: usize = 22;

/// Columns of a sample row holding the 14 EEG channels.
pub const EEG_COLUMNS: std::ops::Range<usize> = 1..15;

/// One sample across all channels, in [`CHANNELS`] order.
pub type SampleRow = [f64; CHANNEL_COUNT];

/// Wireless link strength between headset and receiver.
#[repr(i32)]
#[derive(
   Debug,
   Clone,
   Copy,
   Default,
   PartialEq,
   Eq,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::IntoStaticStr,
)]
pub enum WirelessSignal {
   #[default]
   #[strum(serialize = "no_signal")]
   NoSignal = 0,
   #[strum(serialize = "bad")]
   Bad = 1,
   #[strum(serialize = "good")]
   Good = 2,
}

impl WirelessSignal {
   pub fn to_str(self) -> &'static str {
      self.into()
   }

   pub const fn has_signal(self) -> bool {
      !matches!(self, Self::NoSignal)
   }
}

/// Contact quality for every sensor in [`COMPLETE_SENSORS`].
///
/// Levels follow the engine's scale: 0 no signal, 1 very bad, 2 poor,
/// 3 fair, 4 good.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SensorQuality([u8; SENSOR_COUNT]);

impl SensorQuality {
   pub const MAX_LEVEL: u8 = 4;

   pub const fn new() -> Self {
      Self([0; SENSOR_COUNT])
   }

   pub const fn get(&self, sensor: SensorId) -> u8 {
      self.0[sensor.quality_slot()]
   }

   pub fn set(&mut self, sensor: SensorId, level: u8) {
      self.0[sensor.quality_slot()] = level.min(Self::MAX_LEVEL);
   }

   pub fn iter(&self) -> impl ExactSizeIterator<Item = (SensorId, u8)> + '_ {
      COMPLETE_SENSORS.iter().map(|&s| (s, self.get(s)))
   }

   /// Lowest contact level across the EEG sites.
   pub fn worst_eeg(&self) -> u8 {
      SENSORS.iter().map(|&s| self.get(s)).min().unwrap_or(0)
   }

   pub fn to_json(self) -> serde_json::Value {
      let map: serde_json::Map<_, _> = self
         .iter()
         .map(|(s, q)| (s.name().to_owned(), json!(q)))
         .collect();
      serde_json::Value::Object(map)
   }
}

impl FromIterator<(SensorId, u8)> for SensorQuality {
   fn from_iter<I: IntoIterator<Item = (SensorId, u8)>>(iter: I) -> Self {
      let mut quality = Self::new();
      for (sensor, level) in iter {
         quality.set(sensor, level);
      }
      quality
   }
}

/// Code the engine reports when no mental command is active.
pub const COGNITIVE_NEUTRAL: u32 = 0x0001;

/// Facial muscle actions scored by the expressive suite.
#[repr(u32)]
#[derive(
   Debug,
   Clone,
   Copy,
   PartialEq,
   Eq,
   Hash,
   Serialize,
   Deserialize,
   strum::FromRepr,
   strum::Display,
   strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum FaceAction {
   Eyebrow = 0x0020,
   Furrow = 0x0040,
   Smile = 0x0080,
   Clench = 0x0100,
   Laugh = 0x0200,
   SmirkLeft = 0x0400,
   SmirkRight = 0x0800,
}

/// Face actions in logging order.
pub const FACE_ACTIONS: [FaceAction; 7] = [
   FaceAction::Eyebrow,
   FaceAction::Furrow,
   FaceAction::Smile,
   FaceAction::Clench,
   FaceAction::SmirkLeft,
   FaceAction::SmirkRight,
   FaceAction::Laugh,
];

/// Strongest action on one half of the face, with its power in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceActivity {
   pub action: FaceAction,
   pub power: f32,
}

impl FaceActivity {
   /// Neutral and unrecognised action codes decode to `None`.
   pub fn from_code(code: u32, power: f32) -> Option<Self> {
      FaceAction::from_repr(code).map(|action| Self { action, power })
   }
}

/// Affective and cognitive suite scores, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteScores {
   pub excitement_short_term: f32,
   pub excitement_long_term: f32,
   pub engagement_boredom: f32,
   /// Engine code of the active mental command.
   pub cognitive_action: u32,
   pub cognitive_power: f32,
}

/// Expressive reading decoded from a state update: eye flags, face actions
/// and the suite scores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressiveState {
   pub blink: bool,
   pub left_wink: bool,
   pub right_wink: bool,
   pub looking_left: bool,
   pub looking_right: bool,
   pub upper_face: Option<FaceActivity>,
   pub lower_face: Option<FaceActivity>,
   pub scores: SuiteScores,
}

impl ExpressiveState {
   pub const fn is_neutral(&self) -> bool {
      !(self.blink || self.left_wink || self.right_wink || self.looking_left || self.looking_right)
         && self.upper_face.is_none()
         && self.lower_face.is_none()
   }

   /// Power of `action`, zero unless one half of the face reports it.
   pub fn face_power(&self, action: FaceAction) -> f32 {
      [self.upper_face, self.lower_face]
         .into_iter()
         .flatten()
         .find(|a| a.action == action)
         .map_or(0.0, |a| a.power)
   }
}

impl fmt::Display for ExpressiveState {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let flags = [
         (self.blink, "blink"),
         (self.left_wink, "left_wink"),
         (self.right_wink, "right_wink"),
         (self.looking_left, "looking_left"),
         (self.looking_right, "looking_right"),
      ];
      let mut first = true;
      for (set, name) in flags {
         if set {
            if !first {
               f.write_str("+")?;
            }
            f.write_str(name)?;
            first = false;
         }
      }
      for activity in [self.upper_face, self.lower_face].into_iter().flatten() {
         if !first {
            f.write_str("+")?;
         }
         write!(f, "{}:{:.2}", activity.action, activity.power)?;
         first = false;
      }
      if first {
         f.write_str("neutral")?;
      }
      Ok(())
   }
}
