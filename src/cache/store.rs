//! In-memory store of cached views.
//!
//! The store is the only shared mutable resource in the engine. All reads
//! and writes funnel through the coordinator, propagator, listener, and
//! scheduler; nothing else writes views directly, which is what preserves
//! the no-aliasing and id-uniqueness invariants.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::trace;

use super::traits::Record;
use super::view::{Freshness, Invalidation, ViewKey, ViewSlot};

/// Keyed storage of views with per-view freshness and sequence counters.
///
/// Owned by the application context and injected into the engine components;
/// there is no global singleton, so tests get isolated stores for free.
#[derive(Debug)]
pub struct CacheStore<T> {
  slots: HashMap<ViewKey, ViewSlot<T>>,
}

impl<T: Record> CacheStore<T> {
  pub fn new() -> Self {
    Self {
      slots: HashMap::new(),
    }
  }

  /// Subscribe to a view, creating it lazily on first use. A freshly
  /// created view starts empty and stale so the scheduler fetches it.
  pub fn subscribe(&mut self, key: &ViewKey) -> &ViewSlot<T> {
    let slot = self
      .slots
      .entry(key.clone())
      .or_insert_with(ViewSlot::new);
    slot.add_subscriber();
    slot
  }

  /// Drop one subscription. Views with no subscribers become eligible for
  /// eviction once the retention window elapses.
  pub fn unsubscribe(&mut self, key: &ViewKey) {
    if let Some(slot) = self.slots.get_mut(key) {
      slot.drop_subscriber(Utc::now());
    }
  }

  pub fn get(&self, key: &ViewKey) -> Option<&ViewSlot<T>> {
    self.slots.get(key)
  }

  pub fn contains(&self, key: &ViewKey) -> bool {
    self.slots.contains_key(key)
  }

  /// Sequence number of the view's last write, if the view exists.
  pub fn seq(&self, key: &ViewKey) -> Option<u64> {
    self.slots.get(key).map(|s| s.seq())
  }

  /// Current entries of a view, as a cheap `Arc` clone that stays valid
  /// across later rewrites. Introspection and snapshotting only.
  pub fn entries(&self, key: &ViewKey) -> Option<Arc<Vec<T>>> {
    self.slots.get(key).map(|s| Arc::clone(s.entries()))
  }

  /// Replace a view's entries, stamping a new sequence number.
  /// Freshness is left untouched; callers decide what the write means.
  pub fn write(&mut self, key: &ViewKey, entries: Arc<Vec<T>>) -> Option<u64> {
    let slot = self.slots.get_mut(key)?;
    let seq = slot.set_entries(entries);
    trace!(view = %key, seq, "view written");
    Some(seq)
  }

  /// Replace a view with canonical server data and mark it fresh.
  pub fn write_canonical(&mut self, key: &ViewKey, entries: Arc<Vec<T>>) -> Option<u64> {
    let slot = self.slots.get_mut(key)?;
    let seq = slot.set_entries(entries);
    slot.set_freshness(Freshness::Fresh);
    slot.set_refreshed_at(Utc::now());
    trace!(view = %key, seq, "view replaced with canonical data");
    Some(seq)
  }

  /// Mark a view stale without touching its entries or sequence.
  pub fn mark_stale(&mut self, key: &ViewKey) {
    if let Some(slot) = self.slots.get_mut(key) {
      slot.set_freshness(Freshness::Stale);
    }
  }

  /// Mark a view as having a refetch in flight.
  pub fn mark_refetching(&mut self, key: &ViewKey) {
    if let Some(slot) = self.slots.get_mut(key) {
      slot.set_freshness(Freshness::Refetching);
    }
  }

  /// Apply a push-driven invalidation: every matching view is marked stale
  /// and stamped with a new sequence number, so any refetch already in
  /// flight for it fails the sequence guard. Returns the affected keys.
  pub fn invalidate(&mut self, target: &Invalidation) -> Vec<ViewKey> {
    let mut hit = Vec::new();
    for (key, slot) in self.slots.iter_mut() {
      if target.matches(key) {
        slot.bump_seq();
        slot.set_freshness(Freshness::Stale);
        hit.push(key.clone());
      }
    }
    hit
  }

  /// Keys of subscribed views currently marked stale.
  pub fn stale_subscribed(&self) -> Vec<ViewKey> {
    self
      .slots
      .iter()
      .filter(|(_, s)| s.subscribers() > 0 && s.freshness() == Freshness::Stale)
      .map(|(k, _)| k.clone())
      .collect()
  }

  /// Keys of subscribed fresh views whose last canonical refresh is older
  /// than `stale_after`. Marks them stale and returns them.
  pub fn expire_fresh(&mut self, stale_after: Duration, now: DateTime<Utc>) -> Vec<ViewKey> {
    let mut expired = Vec::new();
    for (key, slot) in self.slots.iter_mut() {
      if slot.subscribers() > 0 && slot.freshness() == Freshness::Fresh {
        let old = match slot.refreshed_at() {
          Some(at) => now - at > stale_after,
          None => true,
        };
        if old {
          slot.set_freshness(Freshness::Stale);
          expired.push(key.clone());
        }
      }
    }
    expired
  }

  /// Evict views that have had no subscribers for longer than `retention`.
  /// Views with a refetch in flight are kept; they get another pass once
  /// the response lands. Returns the number of evicted views.
  pub fn evict_idle(&mut self, retention: Duration, now: DateTime<Utc>) -> usize {
    let before = self.slots.len();
    self.slots.retain(|key, slot| {
      if slot.subscribers() > 0 || slot.freshness() == Freshness::Refetching {
        return true;
      }
      match slot.idle_since() {
        Some(since) if now - since > retention => {
          trace!(view = %key, "evicting idle view");
          false
        }
        _ => true,
      }
    });
    before - self.slots.len()
  }
}

impl<T: Record> Default for CacheStore<T> {
  fn default() -> Self {
    Self::new()
  }
}
