//! External network collaborators.
//!
//! The HTTP client and serialization layer stay outside the engine; it only
//! sees these two operations. Futures resolve to `Result<_, String>` so the
//! engine never depends on a transport's error types.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::ViewKey;
use crate::entity::EntityKind;

/// Operation kind of a mutation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
  Create,
  Update,
  Move,
  Delete,
  Archive,
}

/// An opaque REST write. The response body is equally opaque: commits never
/// read it, because reconciliation goes through a canonical refetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
  pub entity: EntityKind,
  pub op: OpKind,
  pub payload: Value,
}

/// Data-fetch and mutation collaborator.
pub trait Remote<T>: Send + Sync {
  /// Fetch the canonical contents of one view.
  fn fetch_view(&self, key: &ViewKey) -> BoxFuture<'static, Result<Vec<T>, String>>;

  /// Send one write to the server. `Ok` means the server accepted it; the
  /// returned body is the server's canonical entity, unused by the engine.
  fn send_mutation(&self, request: MutationRequest) -> BoxFuture<'static, Result<Value, String>>;
}
