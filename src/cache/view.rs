//! View keys, freshness states, and per-view slots.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key naming one cached view (one denormalized query).
///
/// Keys are plain path-shaped strings rather than hashes so that diffuse
/// invalidations can match whole families of views by prefix (§listener).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ViewKey(String);

impl ViewKey {
  /// An arbitrary raw key. Prefer the typed constructors below.
  pub fn raw(key: impl Into<String>) -> Self {
    ViewKey(key.into())
  }

  /// Detail view of a single card.
  pub fn card(card_id: &str) -> Self {
    ViewKey(format!("card/{}", card_id))
  }

  /// Ordered cards of a list.
  pub fn cards_of_list(list_id: &str) -> Self {
    ViewKey(format!("list/{}/cards", list_id))
  }

  /// Detail view of a single list.
  pub fn list(list_id: &str) -> Self {
    ViewKey(format!("list/{}", list_id))
  }

  /// Ordered lists of a board.
  pub fn lists_of_board(board_id: &str) -> Self {
    ViewKey(format!("board/{}/lists", board_id))
  }

  /// Ordered attachments of a card.
  pub fn attachments_of_card(card_id: &str) -> Self {
    ViewKey(format!("card/{}/attachments", card_id))
  }

  /// Custom-field values of a card (unordered).
  pub fn fields_of_card(card_id: &str) -> Self {
    ViewKey(format!("card/{}/fields", card_id))
  }

  /// A derived/aggregate view (counts, filtered lists). These live under a
  /// shared prefix so diffuse events can invalidate the whole family.
  pub fn derived(name: &str) -> Self {
    ViewKey(format!("derived/{}", name))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn has_prefix(&self, prefix: &str) -> bool {
    self.0.starts_with(prefix)
  }
}

impl fmt::Display for ViewKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// An invalidation target produced by a push event: either one exact view
/// or every view under a key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
  Exact(ViewKey),
  Prefix(String),
}

impl Invalidation {
  pub fn matches(&self, key: &ViewKey) -> bool {
    match self {
      Invalidation::Exact(k) => k == key,
      Invalidation::Prefix(p) => key.has_prefix(p),
    }
  }
}

/// Per-view freshness state machine:
/// `Fresh → (mutation or push event) → Stale → (refetch issued) → Refetching
/// → (response, sequence check) → Fresh | discarded → Stale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  Fresh,
  Stale,
  Refetching,
}

/// One cached view: entries plus coherency metadata.
///
/// Entries live behind an `Arc` so every rewrite is copy-on-write: holders
/// of a previous value (snapshots, render diffing) keep seeing it unchanged.
#[derive(Debug)]
pub struct ViewSlot<T> {
  entries: Arc<Vec<T>>,
  seq: u64,
  freshness: Freshness,
  refreshed_at: Option<DateTime<Utc>>,
  subscribers: usize,
  idle_since: Option<DateTime<Utc>>,
}

impl<T> ViewSlot<T> {
  pub(crate) fn new() -> Self {
    Self {
      entries: Arc::new(Vec::new()),
      seq: 0,
      freshness: Freshness::Stale,
      refreshed_at: None,
      subscribers: 0,
      idle_since: None,
    }
  }

  /// Current entries. Cheap to clone; the clone stays valid across later
  /// rewrites of the view.
  pub fn entries(&self) -> &Arc<Vec<T>> {
    &self.entries
  }

  /// Sequence number of the last write to this view.
  pub fn seq(&self) -> u64 {
    self.seq
  }

  pub fn freshness(&self) -> Freshness {
    self.freshness
  }

  /// When the view last received canonical server data.
  pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
    self.refreshed_at
  }

  pub fn subscribers(&self) -> usize {
    self.subscribers
  }

  pub(crate) fn set_entries(&mut self, entries: Arc<Vec<T>>) -> u64 {
    self.entries = entries;
    self.seq += 1;
    self.seq
  }

  pub(crate) fn bump_seq(&mut self) -> u64 {
    self.seq += 1;
    self.seq
  }

  pub(crate) fn set_freshness(&mut self, freshness: Freshness) {
    self.freshness = freshness;
  }

  pub(crate) fn set_refreshed_at(&mut self, at: DateTime<Utc>) {
    self.refreshed_at = Some(at);
  }

  pub(crate) fn add_subscriber(&mut self) {
    self.subscribers += 1;
    self.idle_since = None;
  }

  pub(crate) fn drop_subscriber(&mut self, now: DateTime<Utc>) {
    self.subscribers = self.subscribers.saturating_sub(1);
    if self.subscribers == 0 {
      self.idle_since = Some(now);
    }
  }

  pub(crate) fn idle_since(&self) -> Option<DateTime<Utc>> {
    self.idle_since
  }
}
