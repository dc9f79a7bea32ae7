//! Optimistic mutation lifecycle: cancel refetches, snapshot, apply,
//! send, then commit or roll back.
//!
//! A mutation's network request is spawned onto the runtime and reports
//! back over an unbounded channel; `poll()` drains completions on the
//! host's tick. Because commit and rollback each run inside one synchronous
//! `poll` pass, a multi-view mutation reverts all of its views or none of
//! them; there is no window where another completion sees half a rollback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::cache::{CacheStore, Record, ViewKey};
use crate::engine::propagate::{self, ViewWrite};
use crate::engine::scheduler::ReconciliationScheduler;
use crate::error::EngineError;
use crate::remote::{MutationRequest, Remote};

/// Identifier of one mutation, for notices and introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutationId(pub u64);

impl std::fmt::Display for MutationId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "m{}", self.0)
  }
}

/// A single optimistic write intent: the request for the server plus the
/// per-view rewrites that denormalize it into the cache.
#[derive(Debug, Clone)]
pub struct MutationSpec<T: Record> {
  pub request: MutationRequest,
  /// Every view this operation denormalizes into, with the op per view.
  /// Updating a card's name touches its detail view and its list's cards
  /// view; a cross-list move removes from one cards view and inserts into
  /// another.
  pub writes: Vec<(ViewKey, ViewWrite<T>)>,
  /// Temp id synthesized for a create, carried for introspection until the
  /// reconciling refetch replaces the provisional entry.
  pub temp_id: Option<String>,
}

/// Prior state of every view a mutation touched, captured before the
/// optimistic apply. Restore is a verbatim overwrite of the whole view.
#[derive(Debug, Clone)]
pub struct SnapshotSet<T> {
  pub mutation: MutationId,
  views: Vec<(ViewKey, Arc<Vec<T>>)>,
}

impl<T> SnapshotSet<T> {
  pub fn view(&self, key: &ViewKey) -> Option<&Arc<Vec<T>>> {
    self
      .views
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, entries)| entries)
  }
}

/// Transient, user-visible outcome of a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
  /// The mutation failed and its views were reverted; show a non-blocking
  /// error and move on.
  MutationFailed {
    mutation: MutationId,
    error: EngineError,
  },
}

struct PendingMutation<T> {
  id: MutationId,
  keys: Vec<ViewKey>,
  snapshot: SnapshotSet<T>,
  rx: mpsc::UnboundedReceiver<Result<serde_json::Value, String>>,
  started: Instant,
}

/// Orchestrates the optimistic-apply / confirm / rollback lifecycle.
pub struct MutationCoordinator<T: Record> {
  remote: Arc<dyn Remote<T>>,
  pending: Vec<PendingMutation<T>>,
  next_id: u64,
  next_temp: u64,
  /// Pending mutations older than this are failed as network timeouts and
  /// rolled back; the reconciling refetch settles whatever the server did.
  timeout: Duration,
}

impl<T: Record> MutationCoordinator<T> {
  pub fn new(remote: Arc<dyn Remote<T>>, timeout: Duration) -> Self {
    Self {
      remote,
      pending: Vec::new(),
      next_id: 0,
      next_temp: 0,
      timeout,
    }
  }

  /// Synthesize a temporary id for a locally created entity.
  pub fn temp_id(&mut self) -> String {
    self.next_temp += 1;
    format!("temp-{}", self.next_temp)
  }

  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }

  /// Start a mutation. Strict order: cancel in-flight refetches for every
  /// affected view and hold off new ones, snapshot the views, apply the
  /// optimistic writes, then fire the network request.
  pub fn begin(
    &mut self,
    store: &mut CacheStore<T>,
    scheduler: &mut ReconciliationScheduler<T>,
    spec: MutationSpec<T>,
  ) -> MutationId {
    self.next_id += 1;
    let id = MutationId(self.next_id);

    let mut keys: Vec<ViewKey> = Vec::new();
    for (key, _) in &spec.writes {
      if !keys.contains(key) {
        keys.push(key.clone());
      }
    }

    // A refetch response must not clobber the optimistic state we are about
    // to write. In-flight refetches are cancelled, and a hold keeps new ones
    // from being issued for these views until the mutation settles; a
    // refetch issued after the apply would carry a matching sequence and
    // land server data that lacks the provisional entries.
    for key in &keys {
      scheduler.cancel(key, store);
      scheduler.hold(key);
    }

    let views = keys
      .iter()
      .filter_map(|key| store.entries(key).map(|entries| (key.clone(), entries)))
      .collect();
    let snapshot = SnapshotSet {
      mutation: id,
      views,
    };

    propagate::apply_writes(store, &spec.writes);

    let (tx, rx) = mpsc::unbounded_channel();
    let future = self.remote.send_mutation(spec.request);
    tokio::spawn(async move {
      let result = future.await;
      let _ = tx.send(result);
    });

    debug!(mutation = %id, views = keys.len(), "mutation applied optimistically");
    self.pending.push(PendingMutation {
      id,
      keys,
      snapshot,
      rx,
      started: Instant::now(),
    });
    id
  }

  /// Drain mutation completions and expire timed-out mutations. Returns
  /// whether any view changed, plus the user-visible notices produced.
  pub fn poll(
    &mut self,
    store: &mut CacheStore<T>,
    scheduler: &mut ReconciliationScheduler<T>,
  ) -> (bool, Vec<Notice>) {
    let mut changed = false;
    let mut notices = Vec::new();
    let timeout = self.timeout;
    let mut index = 0;

    while index < self.pending.len() {
      let pending = &mut self.pending[index];
      let outcome = match pending.rx.try_recv() {
        Ok(Ok(_body)) => Some(Ok(())),
        Ok(Err(reason)) => Some(Err(EngineError::NetworkFailure(reason))),
        Err(mpsc::error::TryRecvError::Empty) => {
          if pending.started.elapsed() > timeout {
            Some(Err(EngineError::NetworkFailure(format!(
              "mutation {} timed out after {:?}",
              pending.id, timeout
            ))))
          } else {
            None
          }
        }
        Err(mpsc::error::TryRecvError::Disconnected) => Some(Err(EngineError::NetworkFailure(
          "mutation task dropped without a result".to_string(),
        ))),
      };

      let Some(outcome) = outcome else {
        index += 1;
        continue;
      };
      let pending = self.pending.remove(index);
      changed = true;

      match outcome {
        Ok(()) => {
          // Committed. No temp-id swap: the views go stale and the next
          // canonical refetch reconciles provisional with server data.
          debug!(mutation = %pending.id, "mutation committed");
          for key in &pending.keys {
            store.mark_stale(key);
            scheduler.release(key);
            scheduler.unpark(key);
          }
        }
        Err(err) => {
          warn!(mutation = %pending.id, error = %err, "mutation failed; rolling back");
          Self::rollback(store, &pending);
          for key in &pending.keys {
            store.mark_stale(key);
            scheduler.release(key);
            scheduler.unpark(key);
          }
          if err.is_user_visible() {
            notices.push(Notice::MutationFailed {
              mutation: pending.id,
              error: err,
            });
          }
        }
      }
    }

    (changed, notices)
  }

  /// Restore every affected view verbatim from the snapshot. Runs in one
  /// synchronous pass: all views revert together. Each restore stamps a new
  /// sequence number, so a refetch issued before the rollback can never
  /// reapply pre-rollback data.
  fn rollback(store: &mut CacheStore<T>, pending: &PendingMutation<T>) {
    for key in &pending.keys {
      match pending.snapshot.view(key) {
        Some(entries) => {
          store.write(key, Arc::clone(entries));
        }
        None => {
          // The view was not cached when the mutation began, so there is
          // nothing to restore. Anything else is an internal bug; flag it
          // instead of crashing.
          if store.contains(key) {
            let err = EngineError::MissingSnapshot(pending.id.0, key.as_str().to_string());
            error!(mutation = %pending.id, view = %key, "{}", err);
          }
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Freshness;
  use crate::entity::{Card, CardPatch, EntityKind};
  use crate::remote::OpKind;
  use futures::future::BoxFuture;
  use serde_json::{json, Value};
  use std::collections::{HashMap, VecDeque};
  use std::sync::Mutex;

  fn card(id: &str, list_id: &str, position: i64) -> Card {
    Card {
      id: id.to_string(),
      list_id: list_id.to_string(),
      name: id.to_string(),
      description: None,
      position,
      archived: false,
      due: None,
      labels: Vec::new(),
    }
  }

  /// Remote with scripted mutation outcomes and scripted view contents.
  struct FakeRemote {
    mutation_results: Mutex<VecDeque<Result<Value, String>>>,
    views: Mutex<HashMap<ViewKey, Vec<Card>>>,
    delay_ms: u64,
  }

  impl FakeRemote {
    fn new(delay_ms: u64) -> Arc<Self> {
      Arc::new(Self {
        mutation_results: Mutex::new(VecDeque::new()),
        views: Mutex::new(HashMap::new()),
        delay_ms,
      })
    }

    fn push_result(&self, result: Result<Value, String>) {
      self.mutation_results.lock().unwrap().push_back(result);
    }

    fn serve(&self, key: &ViewKey, cards: Vec<Card>) {
      self.views.lock().unwrap().insert(key.clone(), cards);
    }
  }

  impl Remote<Card> for FakeRemote {
    fn fetch_view(&self, key: &ViewKey) -> BoxFuture<'static, Result<Vec<Card>, String>> {
      let result = self
        .views
        .lock()
        .unwrap()
        .get(key)
        .cloned()
        .ok_or_else(|| format!("no such view: {}", key));
      let delay = self.delay_ms;
      Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        result
      })
    }

    fn send_mutation(&self, _request: MutationRequest) -> BoxFuture<'static, Result<Value, String>> {
      let result = self
        .mutation_results
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Err("no scripted result".to_string()));
      let delay = self.delay_ms;
      Box::pin(async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        result
      })
    }
  }

  fn setup(
    remote: Arc<FakeRemote>,
  ) -> (
    CacheStore<Card>,
    ReconciliationScheduler<Card>,
    MutationCoordinator<Card>,
  ) {
    let store = CacheStore::new();
    let scheduler = ReconciliationScheduler::new(remote.clone() as Arc<dyn Remote<Card>>);
    let coordinator =
      MutationCoordinator::new(remote as Arc<dyn Remote<Card>>, Duration::from_secs(30));
    (store, scheduler, coordinator)
  }

  fn create_request() -> MutationRequest {
    MutationRequest {
      entity: EntityKind::Card,
      op: OpKind::Create,
      payload: json!({"name": "Task", "list_id": "A"}),
    }
  }

  #[tokio::test]
  async fn optimistic_create_then_reconcile() {
    let remote = FakeRemote::new(5);
    remote.push_result(Ok(json!({"id": "c3"})));
    let key = ViewKey::cards_of_list("A");
    remote.serve(
      &key,
      vec![card("c1", "A", 10_000), card("c2", "A", 20_000), card("c3", "A", 30_000)],
    );

    let (mut store, mut scheduler, mut coordinator) = setup(remote);
    store.subscribe(&key);
    store.write(
      &key,
      Arc::new(vec![card("c1", "A", 10_000), card("c2", "A", 20_000)]),
    );

    let temp = coordinator.temp_id();
    let mut provisional = card(&temp, "A", 0);
    provisional.name = "Task".to_string();
    coordinator.begin(
      &mut store,
      &mut scheduler,
      MutationSpec {
        request: create_request(),
        writes: vec![(
          key.clone(),
          ViewWrite::Insert {
            record: provisional,
            index: 2,
          },
        )],
        temp_id: Some(temp.clone()),
      },
    );

    // Provisional entry visible immediately, positions renumbered.
    let entries = store.entries(&key).unwrap();
    let ids: Vec<&str> = entries.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", temp.as_str()]);
    assert_eq!(entries[2].position, 30_000);

    // Server confirms; commit marks stale, refetch reconciles.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let (changed, notices) = coordinator.poll(&mut store, &mut scheduler);
    assert!(changed);
    assert!(notices.is_empty());
    assert_eq!(store.get(&key).unwrap().freshness(), Freshness::Stale);

    scheduler.tick(&mut store, chrono::Duration::minutes(5));
    tokio::time::sleep(Duration::from_millis(30)).await;
    scheduler.poll(&mut store);

    let entries = store.entries(&key).unwrap();
    let ids: Vec<&str> = entries.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    assert_eq!(store.get(&key).unwrap().freshness(), Freshness::Fresh);
  }

  #[tokio::test]
  async fn failed_create_reverts_to_snapshot() {
    let remote = FakeRemote::new(5);
    remote.push_result(Err("500".to_string()));
    let key = ViewKey::cards_of_list("A");

    let (mut store, mut scheduler, mut coordinator) = setup(remote);
    store.subscribe(&key);
    let before = vec![card("c1", "A", 10_000), card("c2", "A", 20_000)];
    store.write(&key, Arc::new(before.clone()));

    let temp = coordinator.temp_id();
    let id = coordinator.begin(
      &mut store,
      &mut scheduler,
      MutationSpec {
        request: create_request(),
        writes: vec![(
          key.clone(),
          ViewWrite::Insert {
            record: card(&temp, "A", 0),
            index: 2,
          },
        )],
        temp_id: Some(temp),
      },
    );
    assert_eq!(store.entries(&key).unwrap().len(), 3);

    tokio::time::sleep(Duration::from_millis(30)).await;
    let (_, notices) = coordinator.poll(&mut store, &mut scheduler);

    // Rollback is deep-equal to the snapshot, and the failure surfaces as
    // exactly one transient notice.
    assert_eq!(*store.entries(&key).unwrap(), before);
    assert_eq!(notices.len(), 1);
    match &notices[0] {
      Notice::MutationFailed { mutation, error } => {
        assert_eq!(*mutation, id);
        assert!(matches!(error, EngineError::NetworkFailure(_)));
      }
    }
  }

  #[tokio::test]
  async fn failed_cross_list_move_reverts_both_views_together() {
    let remote = FakeRemote::new(5);
    remote.push_result(Err("conflict".to_string()));
    let key_a = ViewKey::cards_of_list("A");
    let key_b = ViewKey::cards_of_list("B");

    let (mut store, mut scheduler, mut coordinator) = setup(remote);
    store.subscribe(&key_a);
    store.subscribe(&key_b);
    store.write(&key_a, Arc::new(vec![card("c1", "A", 10_000)]));
    store.write(&key_b, Arc::new(vec![card("c4", "B", 10_000)]));

    let moved = card("c1", "B", 0);
    coordinator.begin(
      &mut store,
      &mut scheduler,
      MutationSpec {
        request: MutationRequest {
          entity: EntityKind::Card,
          op: OpKind::Move,
          payload: json!({"card_id": "c1", "to_list_id": "B", "index": 0}),
        },
        writes: vec![
          (key_a.clone(), ViewWrite::Remove { id: "c1".to_string() }),
          (key_b.clone(), ViewWrite::Insert { record: moved, index: 0 }),
        ],
        temp_id: None,
      },
    );

    // Optimistic state: A empty, B has both.
    assert!(store.entries(&key_a).unwrap().is_empty());
    let b_ids: Vec<String> = store
      .entries(&key_b)
      .unwrap()
      .iter()
      .map(|c| c.id.clone())
      .collect();
    assert_eq!(b_ids, vec!["c1", "c4"]);

    tokio::time::sleep(Duration::from_millis(30)).await;
    coordinator.poll(&mut store, &mut scheduler);

    // Atomic revert: c1 back in A, gone from B. Never in neither or both.
    let a_ids: Vec<String> = store
      .entries(&key_a)
      .unwrap()
      .iter()
      .map(|c| c.id.clone())
      .collect();
    let b_ids: Vec<String> = store
      .entries(&key_b)
      .unwrap()
      .iter()
      .map(|c| c.id.clone())
      .collect();
    assert_eq!(a_ids, vec!["c1"]);
    assert_eq!(b_ids, vec!["c4"]);
  }

  #[tokio::test]
  async fn update_patch_touches_all_named_views() {
    let remote = FakeRemote::new(5);
    remote.push_result(Ok(Value::Null));
    let detail = ViewKey::card("c1");
    let list = ViewKey::cards_of_list("A");

    let (mut store, mut scheduler, mut coordinator) = setup(remote);
    store.subscribe(&detail);
    store.subscribe(&list);
    store.write(&detail, Arc::new(vec![card("c1", "A", 10_000)]));
    store.write(&list, Arc::new(vec![card("c1", "A", 10_000)]));

    let patch = CardPatch {
      name: Some("Renamed".to_string()),
      ..Default::default()
    };
    coordinator.begin(
      &mut store,
      &mut scheduler,
      MutationSpec {
        request: MutationRequest {
          entity: EntityKind::Card,
          op: OpKind::Update,
          payload: json!({"card_id": "c1", "name": "Renamed"}),
        },
        writes: vec![
          (detail.clone(), ViewWrite::Patch { id: "c1".to_string(), patch: patch.clone() }),
          (list.clone(), ViewWrite::Patch { id: "c1".to_string(), patch }),
        ],
        temp_id: None,
      },
    );

    assert_eq!(store.entries(&detail).unwrap()[0].name, "Renamed");
    assert_eq!(store.entries(&list).unwrap()[0].name, "Renamed");
  }

  #[tokio::test]
  async fn pending_mutation_times_out_as_network_failure() {
    // Mutation response takes far longer than the configured timeout.
    let remote = FakeRemote::new(5_000);
    remote.push_result(Ok(Value::Null));
    let key = ViewKey::cards_of_list("A");

    let (mut store, mut scheduler, _) = setup(remote.clone());
    let mut coordinator = MutationCoordinator::new(
      remote as Arc<dyn Remote<Card>>,
      Duration::from_millis(10),
    );
    store.subscribe(&key);
    let before = vec![card("c1", "A", 10_000)];
    store.write(&key, Arc::new(before.clone()));

    coordinator.begin(
      &mut store,
      &mut scheduler,
      MutationSpec {
        request: create_request(),
        writes: vec![(
          key.clone(),
          ViewWrite::Upsert(card("temp-1", "A", 20_000)),
        )],
        temp_id: Some("temp-1".to_string()),
      },
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    let (_, notices) = coordinator.poll(&mut store, &mut scheduler);

    assert_eq!(*store.entries(&key).unwrap(), before);
    assert_eq!(notices.len(), 1);
    assert_eq!(coordinator.pending_count(), 0);
  }

  #[tokio::test]
  async fn invalidation_mid_mutation_does_not_refetch_over_provisional_entry() {
    let remote = FakeRemote::new(40);
    remote.push_result(Ok(json!({"id": "c2"})));
    let key = ViewKey::cards_of_list("A");
    remote.serve(&key, vec![card("c1", "A", 10_000), card("c2", "A", 20_000)]);

    let (mut store, mut scheduler, mut coordinator) = setup(remote);
    store.subscribe(&key);
    store.write_canonical(&key, Arc::new(vec![card("c1", "A", 10_000)]));

    let temp = coordinator.temp_id();
    coordinator.begin(
      &mut store,
      &mut scheduler,
      MutationSpec {
        request: create_request(),
        writes: vec![(
          key.clone(),
          ViewWrite::Insert {
            record: card(&temp, "A", 0),
            index: 1,
          },
        )],
        temp_id: Some(temp.clone()),
      },
    );

    // A remote-origin event hits the same view while the create is pending.
    store.invalidate(&crate::cache::Invalidation::Exact(key.clone()));
    scheduler.unpark(&key);
    scheduler.tick(&mut store, chrono::Duration::minutes(5));

    // No refetch is issued: server data fetched now would not contain the
    // provisional entry and would make it vanish before the commit.
    assert!(!scheduler.is_refetching(&key));
    let entries = store.entries(&key).unwrap();
    let ids: Vec<&str> = entries.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", temp.as_str()]);
    assert_eq!(coordinator.pending_count(), 1);

    // Commit releases the view; the held-off refetch then reconciles it.
    tokio::time::sleep(Duration::from_millis(80)).await;
    let (changed, notices) = coordinator.poll(&mut store, &mut scheduler);
    assert!(changed);
    assert!(notices.is_empty());

    scheduler.tick(&mut store, chrono::Duration::minutes(5));
    assert!(scheduler.is_refetching(&key));
    tokio::time::sleep(Duration::from_millis(80)).await;
    scheduler.poll(&mut store);

    let entries = store.entries(&key).unwrap();
    let ids: Vec<&str> = entries.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    assert_eq!(store.get(&key).unwrap().freshness(), Freshness::Fresh);
  }

  #[tokio::test]
  async fn begin_cancels_inflight_refetch_for_affected_views() {
    let remote = FakeRemote::new(50);
    remote.push_result(Ok(Value::Null));
    let key = ViewKey::cards_of_list("A");
    remote.serve(&key, vec![card("server", "A", 10_000)]);

    let (mut store, mut scheduler, mut coordinator) = setup(remote);
    store.subscribe(&key);
    store.write(&key, Arc::new(vec![card("c1", "A", 10_000)]));
    store.mark_stale(&key);

    scheduler.tick(&mut store, chrono::Duration::minutes(5));
    assert!(scheduler.is_refetching(&key));

    coordinator.begin(
      &mut store,
      &mut scheduler,
      MutationSpec {
        request: create_request(),
        writes: vec![(key.clone(), ViewWrite::Upsert(card("c2", "A", 20_000)))],
        temp_id: None,
      },
    );
    assert!(!scheduler.is_refetching(&key));

    // Even if the old response were still deliverable, the optimistic write
    // bumped the sequence; nothing stale can land.
    tokio::time::sleep(Duration::from_millis(80)).await;
    scheduler.poll(&mut store);
    let ids: Vec<String> = store
      .entries(&key)
      .unwrap()
      .iter()
      .map(|c| c.id.clone())
      .collect();
    assert_eq!(ids, vec!["c1", "c2"]);
  }
}
