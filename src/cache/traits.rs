//! Core trait for entities the cache can hold.

/// Trait for records that can live in a cached view.
///
/// Implementors provide a stable id, a typed patch, and (for entries of
/// ordered views) position accessors. Serialization stays with the wire
/// collaborators; the cache itself never serializes records.
pub trait Record: Clone + Send + Sync + 'static {
  /// Typed partial update for this record kind.
  type Patch: Clone + std::fmt::Debug + Send + Sync + 'static;

  /// Stable entity id. Temp ids (`temp-…`) count as ids until the next
  /// canonical refetch replaces the provisional entry.
  fn id(&self) -> &str;

  /// Merge a patch into this record.
  fn apply_patch(&mut self, patch: &Self::Patch);

  /// Current sort position, for entries of ordered views.
  /// None for record kinds that are never ordered.
  fn position(&self) -> Option<i64> {
    None
  }

  /// Assign a sort position. No-op for unordered record kinds.
  fn set_position(&mut self, _position: i64) {}
}
