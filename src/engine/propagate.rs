//! Cross-view propagation of entity writes.
//!
//! Given a batch of per-view write ops, rewrites every targeted view
//! copy-on-write: the previous entry vector is never mutated in place, so
//! snapshots and render diffing can keep holding it. Each rewritten view is
//! stamped with a fresh sequence number by the store.

use std::sync::Arc;

use tracing::trace;

use crate::cache::{CacheStore, Record, ViewKey};

/// Position gap for ordered views. Reordering renumbers the whole view as
/// `(index + 1) * POSITION_GAP` instead of renumbering incrementally; a full
/// rewrite per reorder is the accepted trade-off for always-distinct,
/// strictly increasing positions.
pub const POSITION_GAP: i64 = 10_000;

/// One write against one view.
#[derive(Debug, Clone)]
pub enum ViewWrite<T: Record> {
  /// Replace the entry with this id, or append it if absent.
  Upsert(T),
  /// Merge a typed patch into the entry with this id. No-op if absent.
  Patch { id: String, patch: T::Patch },
  /// Insert at an index, renumbering positions. Any existing entry with the
  /// same id is removed first, preserving id uniqueness.
  Insert { record: T, index: usize },
  /// Remove the entry with this id. No-op if absent.
  Remove { id: String },
  /// Move the entry with this id to an index, renumbering positions.
  MoveTo { id: String, index: usize },
}

/// Apply a batch of writes, one store pass per (view, op) pair.
///
/// Views the store does not hold are skipped: an unsubscribed view has no
/// cached state to keep coherent and will be fetched fresh when subscribed.
pub fn apply_writes<T: Record>(store: &mut CacheStore<T>, writes: &[(ViewKey, ViewWrite<T>)]) {
  for (key, write) in writes {
    let Some(current) = store.entries(key) else {
      trace!(view = %key, "skipping write to uncached view");
      continue;
    };

    let mut next: Vec<T> = current.as_ref().clone();
    let renumber = apply_one(&mut next, write);
    if renumber {
      renumber_positions(&mut next);
    }
    store.write(key, Arc::new(next));
  }
}

/// Apply one op to a detached entry vector. Returns whether positions must
/// be renumbered afterwards.
fn apply_one<T: Record>(entries: &mut Vec<T>, write: &ViewWrite<T>) -> bool {
  match write {
    ViewWrite::Upsert(record) => {
      match entries.iter_mut().find(|e| e.id() == record.id()) {
        Some(existing) => *existing = record.clone(),
        None => entries.push(record.clone()),
      }
      false
    }
    ViewWrite::Patch { id, patch } => {
      if let Some(entry) = entries.iter_mut().find(|e| e.id() == id.as_str()) {
        entry.apply_patch(patch);
      }
      false
    }
    ViewWrite::Insert { record, index } => {
      entries.retain(|e| e.id() != record.id());
      let at = (*index).min(entries.len());
      entries.insert(at, record.clone());
      true
    }
    ViewWrite::Remove { id } => {
      entries.retain(|e| e.id() != id.as_str());
      false
    }
    ViewWrite::MoveTo { id, index } => {
      let Some(from) = entries.iter().position(|e| e.id() == id.as_str()) else {
        return false;
      };
      let record = entries.remove(from);
      let at = (*index).min(entries.len());
      entries.insert(at, record);
      true
    }
  }
}

fn renumber_positions<T: Record>(entries: &mut [T]) {
  for (index, entry) in entries.iter_mut().enumerate() {
    entry.set_position((index as i64 + 1) * POSITION_GAP);
  }
}
