//! Error taxonomy for the sync engine.
//!
//! Failures are deliberately narrow: a failed mutation never propagates to
//! unrelated views or mutations, and the only user-visible failure is a
//! reverted view plus a transient notice.

use thiserror::Error;

/// Errors produced by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
  /// A mutation request was rejected by the server or timed out.
  /// Triggers a full rollback of every affected view plus a scheduled
  /// reconciliation refetch.
  #[error("network failure: {0}")]
  NetworkFailure(String),

  /// A push-channel frame could not be parsed or named an unknown event
  /// kind. Logged and dropped; the listener keeps running.
  #[error("malformed push event: {0}")]
  MalformedPushEvent(String),

  /// Rollback was attempted with no matching snapshot. Internal consistency
  /// bug; the rollback becomes a no-op instead of crashing.
  #[error("no snapshot for mutation {0} on view {1}")]
  MissingSnapshot(u64, String),

  /// An asynchronous result arrived stamped with an outdated sequence
  /// number. Never user-visible; discarded by the sequence guard.
  #[error("stale response for view {0}: stamped {1}, current {2}")]
  StaleResponse(String, u64, u64),
}

impl EngineError {
  /// Whether this error should surface to the UI as a transient notice.
  pub fn is_user_visible(&self) -> bool {
    matches!(self, EngineError::NetworkFailure(_))
  }
}
