//! Device session manager for wireless 14-channel EEG headsets.
//!
//! A [`SessionManager`] owns the connection to the vendor engine (behind the
//! [`EngineBinding`] trait), polls it on a background task and fans decoded
//! events out to [`Listener`]s: panels, the tab-separated [`Recorder`], the
//! expressive-state log and rolling analysis windows.

pub mod config;
pub mod dispatch;
pub mod emo_log;
pub mod error;
pub mod event;
pub mod headset;
pub mod recorder;
pub mod session;
pub mod window;

pub use config::Config;
pub use emo_log::EmoStateLog;
pub use error::{NeurofeedError, Result};
pub use event::{EventKind, Listener, ListenerError, ListenerResult, Panel, SessionEvent};
pub use headset::binding::EngineBinding;
pub use recorder::Recorder;
pub use session::SessionManager;
