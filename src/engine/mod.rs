//! The sync engine: coordinator, propagator, listener, and scheduler
//! composed over one cache store.
//!
//! Concurrency model: single-threaded and cooperative. The host event loop
//! owns the engine and calls `poll()` on every tick; network futures run on
//! the tokio runtime and report back over channels, so everything that
//! touches the store happens inside a synchronous `poll` or `mutate` call.
//! Hazards only exist between asynchronous completions, and those are
//! arbitrated by the per-view sequence numbers.

pub mod listener;
pub mod mutation;
pub mod propagate;
pub mod scheduler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::cache::{CacheStore, Freshness, Record, ViewKey};
use crate::config::EngineConfig;
use crate::remote::Remote;

use listener::InvalidationListener;
use mutation::{MutationCoordinator, MutationId, MutationSpec, Notice};
use scheduler::ReconciliationScheduler;

/// What a UI subscription sees: the current entries plus freshness metadata.
#[derive(Debug, Clone)]
pub struct ViewRead<T> {
  pub entries: Arc<Vec<T>>,
  pub freshness: Freshness,
  pub refreshed_at: Option<DateTime<Utc>>,
}

/// Facade owning the cache store and the four components that are allowed
/// to write to it.
pub struct Engine<T: Record> {
  store: CacheStore<T>,
  coordinator: MutationCoordinator<T>,
  scheduler: ReconciliationScheduler<T>,
  listener: InvalidationListener,
  config: EngineConfig,
  notices: Vec<Notice>,
}

impl<T: Record> Engine<T> {
  /// Build an engine over a network collaborator and a push channel.
  pub fn new(
    remote: Arc<dyn Remote<T>>,
    push_rx: mpsc::UnboundedReceiver<String>,
    config: EngineConfig,
  ) -> Self {
    Self {
      store: CacheStore::new(),
      coordinator: MutationCoordinator::new(Arc::clone(&remote), config.mutation_timeout()),
      scheduler: ReconciliationScheduler::new(remote),
      listener: InvalidationListener::new(push_rx),
      config,
      notices: Vec::new(),
    }
  }

  /// Subscribe to a view and read its current state. Creates the view
  /// lazily and kicks off a refetch if it has no fresh data yet.
  pub fn use_view(&mut self, key: &ViewKey) -> ViewRead<T> {
    self.store.subscribe(key);
    self.scheduler.tick(&mut self.store, self.config.stale_after());
    let slot = self.store.get(key).expect("subscribed view exists");
    ViewRead {
      entries: Arc::clone(slot.entries()),
      freshness: slot.freshness(),
      refreshed_at: slot.refreshed_at(),
    }
  }

  /// Drop one subscription to a view.
  pub fn release_view(&mut self, key: &ViewKey) {
    self.store.unsubscribe(key);
  }

  /// Read a view without subscribing. Introspection and testing only.
  pub fn get_snapshot(&self, key: &ViewKey) -> Option<Arc<Vec<T>>> {
    self.store.entries(key)
  }

  /// Freshness of a view, if cached.
  pub fn freshness(&self, key: &ViewKey) -> Option<Freshness> {
    self.store.get(key).map(|s| s.freshness())
  }

  /// Synthesize a temp id for a locally created entity.
  pub fn temp_id(&mut self) -> String {
    self.coordinator.temp_id()
  }

  /// Fire one optimistic mutation.
  pub fn mutate(&mut self, spec: MutationSpec<T>) -> MutationId {
    self
      .coordinator
      .begin(&mut self.store, &mut self.scheduler, spec)
  }

  /// Advance the engine: drain push frames, mutation completions, and
  /// refetch results; issue due refetches; evict idle views. Call from the
  /// host event loop tick. Returns true if any view changed.
  pub fn poll(&mut self) -> bool {
    let mut changed = false;

    changed |= self.listener.poll(&mut self.store, &mut self.scheduler);

    let (mutated, notices) = self.coordinator.poll(&mut self.store, &mut self.scheduler);
    changed |= mutated;
    self.notices.extend(notices);

    self.scheduler.tick(&mut self.store, self.config.stale_after());
    changed |= self.scheduler.poll(&mut self.store);

    self.store.evict_idle(self.config.retention(), Utc::now());

    changed
  }

  /// Drain user-visible transient notices (failed mutations).
  pub fn take_notices(&mut self) -> Vec<Notice> {
    std::mem::take(&mut self.notices)
  }

  /// When the push channel last acknowledged itself.
  pub fn push_last_ack(&self) -> Option<DateTime<Utc>> {
    self.listener.last_ack()
  }

  /// Number of mutations awaiting server confirmation.
  pub fn pending_mutations(&self) -> usize {
    self.coordinator.pending_count()
  }
}
