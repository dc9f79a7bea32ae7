//! Background reconciliation of stale views.
//!
//! Each stale subscribed view gets a refetch spawned onto the runtime; the
//! result comes back over an unbounded channel and is drained by `poll()` on
//! the host's tick, the same shape as a query refetch in the rest of the
//! stack. A response only lands if the view's sequence number still matches
//! the one recorded when the refetch was issued; anything else is discarded
//! silently and the view stays stale for the next pass.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::{CacheStore, Freshness, Record, ViewKey};
use crate::error::EngineError;
use crate::remote::Remote;

struct InflightRefetch<T> {
  /// View sequence at issue time. The response is discarded unless the
  /// view's sequence still equals this when it arrives.
  issued_seq: u64,
  rx: mpsc::UnboundedReceiver<Result<Vec<T>, String>>,
}

/// Drives stale views back to fresh and guards against out-of-order results.
pub struct ReconciliationScheduler<T: Record> {
  remote: Arc<dyn Remote<T>>,
  inflight: HashMap<ViewKey, InflightRefetch<T>>,
  /// Views whose last refetch failed; parked until something invalidates
  /// them again, so a dead endpoint doesn't refetch on every tick.
  parked: HashSet<ViewKey>,
  /// Views with an optimistic mutation pending, counted per overlapping
  /// mutation. A canonical refetch landing mid-mutation would overwrite the
  /// provisional entries, so no refetch is issued while a hold is active.
  /// Invalidations do not clear holds; only the mutation's completion does.
  held: HashMap<ViewKey, u32>,
}

impl<T: Record> ReconciliationScheduler<T> {
  pub fn new(remote: Arc<dyn Remote<T>>) -> Self {
    Self {
      remote,
      inflight: HashMap::new(),
      parked: HashSet::new(),
      held: HashMap::new(),
    }
  }

  /// Note that a view changed for a reason that warrants a retry even if a
  /// previous refetch failed.
  pub fn unpark(&mut self, key: &ViewKey) {
    self.parked.remove(key);
  }

  /// Withhold refetches for a view until every hold on it is released.
  pub fn hold(&mut self, key: &ViewKey) {
    *self.held.entry(key.clone()).or_insert(0) += 1;
  }

  /// Drop one hold on a view. The view refetches again once no holds remain.
  pub fn release(&mut self, key: &ViewKey) {
    if let Some(count) = self.held.get_mut(key) {
      *count -= 1;
      if *count == 0 {
        self.held.remove(key);
      }
    }
  }

  /// Whether a refetch is in flight for this view.
  pub fn is_refetching(&self, key: &ViewKey) -> bool {
    self.inflight.contains_key(key)
  }

  /// Best-effort cancellation of an in-flight refetch: the receiver is
  /// dropped, so a late response has nowhere to land. The sequence guard
  /// remains the definitive defense.
  pub fn cancel(&mut self, key: &ViewKey, store: &mut CacheStore<T>) {
    if self.inflight.remove(key).is_some() {
      debug!(view = %key, "cancelled in-flight refetch");
      if store.get(key).map(|s| s.freshness()) == Some(Freshness::Refetching) {
        store.mark_stale(key);
      }
    }
    self.parked.remove(key);
  }

  /// Issue refetches for every subscribed stale view without one in flight,
  /// and expire fresh views older than `stale_after`.
  pub fn tick(&mut self, store: &mut CacheStore<T>, stale_after: Duration) {
    for key in store.expire_fresh(stale_after, Utc::now()) {
      self.parked.remove(&key);
    }
    for key in store.stale_subscribed() {
      if self.inflight.contains_key(&key)
        || self.parked.contains(&key)
        || self.held.contains_key(&key)
      {
        continue;
      }
      self.issue(&key, store);
    }
  }

  fn issue(&mut self, key: &ViewKey, store: &mut CacheStore<T>) {
    let Some(issued_seq) = store.seq(key) else {
      return;
    };
    let (tx, rx) = mpsc::unbounded_channel();
    let future = self.remote.fetch_view(key);
    tokio::spawn(async move {
      let result = future.await;
      // Receiver may have been dropped by a cancel; that's fine.
      let _ = tx.send(result);
    });

    store.mark_refetching(key);
    self.inflight.insert(key.clone(), InflightRefetch { issued_seq, rx });
    debug!(view = %key, issued_seq, "refetch issued");
  }

  /// Drain completed refetches. Returns true if any view changed.
  pub fn poll(&mut self, store: &mut CacheStore<T>) -> bool {
    let mut changed = false;
    let keys: Vec<ViewKey> = self.inflight.keys().cloned().collect();

    for key in keys {
      let Some(inflight) = self.inflight.get_mut(&key) else {
        continue;
      };
      match inflight.rx.try_recv() {
        Ok(Ok(entries)) => {
          let issued_seq = inflight.issued_seq;
          self.inflight.remove(&key);
          match store.seq(&key) {
            Some(current) if current == issued_seq => {
              store.write_canonical(&key, Arc::new(entries));
              changed = true;
            }
            Some(current) => {
              // The view was written since this refetch went out; the
              // response is stale. Leave the view stale so the next tick
              // reissues against the newer state.
              let err = EngineError::StaleResponse(key.as_str().to_string(), issued_seq, current);
              debug!("{}", err);
              store.mark_stale(&key);
            }
            None => {
              debug!(view = %key, "refetch resolved for evicted view");
            }
          }
        }
        Ok(Err(error)) => {
          self.inflight.remove(&key);
          warn!(view = %key, error = %error, "refetch failed; parking view");
          store.mark_stale(&key);
          self.parked.insert(key);
          changed = true;
        }
        Err(mpsc::error::TryRecvError::Empty) => {}
        Err(mpsc::error::TryRecvError::Disconnected) => {
          self.inflight.remove(&key);
          store.mark_stale(&key);
        }
      }
    }

    changed
  }
}
