//! Synchronous event fan-out.
//!
//! The dispatcher keeps, per [`EventKind`], an ordered list of weak listener
//! references. Dispatch runs every live listener in subscription order on the
//! calling task and isolates failures: a listener that errors or panics is
//! logged and skipped, the rest still run.

use std::{
   collections::HashMap,
   panic::{self, AssertUnwindSafe},
   sync::{Arc, Weak},
};

use log::{debug, warn};
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::{
   error::{NeurofeedError, Result},
   event::{EventKind, Listener, SessionEvent},
};

type ListenerList = SmallVec<[Weak<dyn Listener>; 4]>;

/// Outcome of a single dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
   pub delivered: usize,
   pub failed: usize,
}

#[derive(Default)]
pub struct Dispatcher {
   listeners: RwLock<HashMap<EventKind, ListenerList>>,
}

fn same_listener(a: &Weak<dyn Listener>, b: &Weak<dyn Listener>) -> bool {
   // Compare data pointers only; vtables may differ between codegen units
   a.as_ptr().cast::<()>() == b.as_ptr().cast::<()>()
}

impl Dispatcher {
   pub fn new() -> Self {
      Self::default()
   }

   /// Registers `listener` for `kind`. Subscribing twice is a no-op.
   ///
   /// Only a weak reference is kept; the caller owns the listener.
   pub fn subscribe(&self, kind: EventKind, listener: &Arc<dyn Listener>) {
      let weak = Arc::downgrade(listener);
      let mut map = self.listeners.write();
      let list = map.entry(kind).or_default();
      if list.iter().any(|l| same_listener(l, &weak)) {
         return;
      }
      list.push(weak);
      debug!("Listener subscribed to {kind} ({} total)", list.len());
   }

   /// Registers a listener by numeric kind id.
   pub fn subscribe_id(&self, id: u16, listener: &Arc<dyn Listener>) -> Result<()> {
      self.subscribe(EventKind::from_id(id)?, listener);
      Ok(())
   }

   /// Removes `listener` from `kind`. Returns whether it was registered.
   pub fn unsubscribe(&self, kind: EventKind, listener: &Arc<dyn Listener>) -> bool {
      let weak = Arc::downgrade(listener);
      let mut map = self.listeners.write();
      let Some(list) = map.get_mut(&kind) else {
         return false;
      };
      let before = list.len();
      list.retain(|l| !same_listener(l, &weak));
      list.len() != before
   }

   /// Number of live listeners registered for `kind`.
   pub fn listener_count(&self, kind: EventKind) -> usize {
      self
         .listeners
         .read()
         .get(&kind)
         .map_or(0, |l| l.iter().filter(|w| w.strong_count() > 0).count())
   }

   /// Delivers `event` to every listener of its kind, in subscription order.
   pub fn dispatch(&self, event: &SessionEvent) -> DispatchReport {
      let kind = event.kind();
      // Listeners run without the lock held so they may (un)subscribe
      let (live, pruned) = {
         let map = self.listeners.read();
         let Some(list) = map.get(&kind) else {
            return DispatchReport::default();
         };
         let live: SmallVec<[Arc<dyn Listener>; 4]> =
            list.iter().filter_map(Weak::upgrade).collect();
         let pruned = live.len() != list.len();
         (live, pruned)
      };
      if pruned {
         self.prune(kind);
      }

      let mut report = DispatchReport::default();
      for listener in live {
         match panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
            Ok(Ok(())) => report.delivered += 1,
            Ok(Err(e)) => {
               warn!("Listener failed on {kind} event: {e}");
               report.failed += 1;
            },
            Err(_) => {
               warn!("Listener panicked on {kind} event");
               report.failed += 1;
            },
         }
      }
      report
   }

   /// Dispatches `event` after checking it against a numeric kind id.
   pub fn dispatch_id(&self, id: u16, event: &SessionEvent) -> Result<DispatchReport> {
      let kind = EventKind::from_id(id)?;
      if kind != event.kind() {
         return Err(NeurofeedError::UnknownEventKind(
            format!("{id} for {} payload", event.kind()).into(),
         ));
      }
      Ok(self.dispatch(event))
   }

   fn prune(&self, kind: EventKind) {
      if let Some(list) = self.listeners.write().get_mut(&kind) {
         list.retain(|l| l.strong_count() > 0);
         debug!("Pruned dropped listeners from {kind}");
      }
   }
}

#[cfg(test)]
mod tests {
   use std::sync::atomic::{AtomicUsize, Ordering};

   use parking_lot::Mutex;

   use super::*;
   use crate::event::{ListenerError, ListenerResult};

   fn counter() -> (Arc<AtomicUsize>, Arc<dyn Listener>) {
      let hits = Arc::new(AtomicUsize::new(0));
      let h = hits.clone();
      let listener: Arc<dyn Listener> = Arc::new(move |_: &SessionEvent| -> ListenerResult {
         h.fetch_add(1, Ordering::SeqCst);
         Ok(())
      });
      (hits, listener)
   }

   #[test]
   fn test_subscribe_is_idempotent() {
      let dispatcher = Dispatcher::new();
      let (hits, listener) = counter();
      dispatcher.subscribe(EventKind::Monitoring, &listener);
      dispatcher.subscribe(EventKind::Monitoring, &listener);
      assert_eq!(dispatcher.listener_count(EventKind::Monitoring), 1);

      let report = dispatcher.dispatch(&SessionEvent::Monitoring);
      assert_eq!(report.delivered, 1);
      assert_eq!(hits.load(Ordering::SeqCst), 1);
   }

   #[test]
   fn test_dispatch_only_reaches_matching_kind() {
      let dispatcher = Dispatcher::new();
      let (hits, listener) = counter();
      dispatcher.subscribe(EventKind::UserPresence, &listener);
      dispatcher.dispatch(&SessionEvent::Monitoring);
      assert_eq!(hits.load(Ordering::SeqCst), 0);
      dispatcher.dispatch(&SessionEvent::UserPresence(true));
      assert_eq!(hits.load(Ordering::SeqCst), 1);
   }

   #[test]
   fn test_dispatch_preserves_subscription_order() {
      let dispatcher = Dispatcher::new();
      let order = Arc::new(Mutex::new(Vec::new()));
      let listeners: Vec<Arc<dyn Listener>> = (0..4)
         .map(|i| {
            let order = order.clone();
            Arc::new(move |_: &SessionEvent| -> ListenerResult {
               order.lock().push(i);
               Ok(())
            }) as Arc<dyn Listener>
         })
         .collect();
      for l in &listeners {
         dispatcher.subscribe(EventKind::Connection, l);
      }
      dispatcher.dispatch(&SessionEvent::Connection(Default::default()));
      assert_eq!(*order.lock(), [0, 1, 2, 3]);
   }

   #[test]
   fn test_failing_listeners_are_isolated() {
      let dispatcher = Dispatcher::new();
      let (first_hits, first) = counter();
      let failing: Arc<dyn Listener> =
         Arc::new(|_: &SessionEvent| -> ListenerResult { Err(ListenerError::new("disk full")) });
      let panicking: Arc<dyn Listener> = Arc::new(|_: &SessionEvent| -> ListenerResult {
         panic!("listener bug");
      });
      let (last_hits, last) = counter();

      dispatcher.subscribe(EventKind::Sampling, &first);
      dispatcher.subscribe(EventKind::Sampling, &failing);
      dispatcher.subscribe(EventKind::Sampling, &panicking);
      dispatcher.subscribe(EventKind::Sampling, &last);

      let rows: Arc<[_]> = Arc::from(Vec::new());
      let report = dispatcher.dispatch(&SessionEvent::Sampling(rows));
      assert_eq!(report, DispatchReport { delivered: 2, failed: 2 });
      assert_eq!(first_hits.load(Ordering::SeqCst), 1);
      assert_eq!(last_hits.load(Ordering::SeqCst), 1);
   }

   #[test]
   fn test_dropped_listeners_are_pruned() {
      let dispatcher = Dispatcher::new();
      let (hits, kept) = counter();
      let (_, dropped) = counter();
      dispatcher.subscribe(EventKind::Monitoring, &dropped);
      dispatcher.subscribe(EventKind::Monitoring, &kept);
      drop(dropped);

      let report = dispatcher.dispatch(&SessionEvent::Monitoring);
      assert_eq!(report.delivered, 1);
      assert_eq!(hits.load(Ordering::SeqCst), 1);
      assert_eq!(dispatcher.listener_count(EventKind::Monitoring), 1);
   }

   #[test]
   fn test_unsubscribe() {
      let dispatcher = Dispatcher::new();
      let (hits, listener) = counter();
      dispatcher.subscribe(EventKind::Monitoring, &listener);
      assert!(dispatcher.unsubscribe(EventKind::Monitoring, &listener));
      assert!(!dispatcher.unsubscribe(EventKind::Monitoring, &listener));
      dispatcher.dispatch(&SessionEvent::Monitoring);
      assert_eq!(hits.load(Ordering::SeqCst), 0);
   }

   #[test]
   fn test_listener_may_subscribe_during_dispatch() {
      let dispatcher = Arc::new(Dispatcher::new());
      let (late_hits, late) = counter();
      let d = dispatcher.clone();
      let late_ref = late.clone();
      let registering: Arc<dyn Listener> = Arc::new(move |_: &SessionEvent| -> ListenerResult {
         d.subscribe(EventKind::Monitoring, &late_ref);
         Ok(())
      });
      dispatcher.subscribe(EventKind::Monitoring, &registering);

      dispatcher.dispatch(&SessionEvent::Monitoring);
      assert_eq!(late_hits.load(Ordering::SeqCst), 0);
      dispatcher.dispatch(&SessionEvent::Monitoring);
      assert_eq!(late_hits.load(Ordering::SeqCst), 1);
   }

   #[test]
   fn test_numeric_ids_are_validated() {
      let dispatcher = Dispatcher::new();
      let (hits, listener) = counter();
      assert!(matches!(
         dispatcher.subscribe_id(999, &listener),
         Err(NeurofeedError::UnknownEventKind(_))
      ));
      dispatcher.subscribe_id(1004, &listener).unwrap();
      assert!(matches!(
         dispatcher.dispatch_id(1234, &SessionEvent::Monitoring),
         Err(NeurofeedError::UnknownEventKind(_))
      ));
      assert!(dispatcher.dispatch_id(1001, &SessionEvent::Monitoring).is_err());
      dispatcher.dispatch_id(1004, &SessionEvent::Monitoring).unwrap();
      assert_eq!(hits.load(Ordering::SeqCst), 1);
   }
}
