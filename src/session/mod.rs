//! Device session: state, polling loop and the public manager.

mod manager;
mod poller;
mod state;

use parking_lot::{Mutex, RwLock};

pub use manager::SessionManager;
pub use poller::{PollStats, PollerSettings};
pub use state::{DEFAULT_MONITOR_INTERVAL, SessionState, SignalChange, UpdateOp};

use crate::{dispatch::Dispatcher, headset::binding::EngineBinding};

/// Shared between the manager and its polling task.
///
/// Lock order: `binding` before `state`. Neither lock is held while
/// listeners run.
pub(crate) struct Core {
   pub binding: Mutex<Box<dyn EngineBinding>>,
   pub state: RwLock<SessionState>,
   pub dispatcher: Dispatcher,
}

impl Core {
   pub fn new(binding: Box<dyn EngineBinding>) -> Self {
      Self {
         binding: Mutex::new(binding),
         state: RwLock::new(SessionState::new()),
         dispatcher: Dispatcher::new(),
      }
   }
}
