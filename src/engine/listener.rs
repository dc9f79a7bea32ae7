//! Push-channel consumer that turns remote-origin events into view
//! invalidations.
//!
//! The listener never merges push payloads into views; it only marks views
//! stale and lets the scheduler refetch, so a remote write can't trample an
//! optimistic mutation in flight on the same view. Malformed frames are
//! logged and dropped; the listener must keep running through garbage.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::{CacheStore, Record};
use crate::engine::scheduler::ReconciliationScheduler;
use crate::error::EngineError;
use crate::events::{EventKind, PushFrame};

/// Consumes raw JSON frames from the push channel.
pub struct InvalidationListener {
  rx: mpsc::UnboundedReceiver<String>,
  last_ack: Option<DateTime<Utc>>,
  dropped: u64,
}

impl InvalidationListener {
  pub fn new(rx: mpsc::UnboundedReceiver<String>) -> Self {
    Self {
      rx,
      last_ack: None,
      dropped: 0,
    }
  }

  /// When the push connection last acknowledged itself. Liveness
  /// introspection only.
  pub fn last_ack(&self) -> Option<DateTime<Utc>> {
    self.last_ack
  }

  /// Count of malformed frames dropped so far.
  pub fn dropped(&self) -> u64 {
    self.dropped
  }

  /// Drain every frame waiting on the channel. Returns true if any view
  /// was invalidated.
  pub fn poll<T: Record>(
    &mut self,
    store: &mut CacheStore<T>,
    scheduler: &mut ReconciliationScheduler<T>,
  ) -> bool {
    let mut changed = false;
    loop {
      let raw = match self.rx.try_recv() {
        Ok(raw) => raw,
        Err(mpsc::error::TryRecvError::Empty) => break,
        Err(mpsc::error::TryRecvError::Disconnected) => break,
      };

      let frame: PushFrame = match serde_json::from_str(&raw) {
        Ok(frame) => frame,
        Err(parse_err) => {
          let err = EngineError::MalformedPushEvent(parse_err.to_string());
          warn!(frame = raw.as_str(), "{}", err);
          self.dropped += 1;
          continue;
        }
      };

      if frame.event == EventKind::ConnectionAck {
        self.last_ack = Some(Utc::now());
        continue;
      }

      for target in frame.invalidation_targets() {
        for key in store.invalidate(&target) {
          debug!(view = %key, event = ?frame.event, "view invalidated by push event");
          scheduler.unpark(&key);
          changed = true;
        }
      }
    }
    changed
  }
}
