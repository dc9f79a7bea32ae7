//! boardsync: optimistic mutation and cache-coherency engine for a kanban
//! client.
//!
//! The engine keeps redundant, denormalized client-side views of cards,
//! lists, attachments, and custom-field values consistent while:
//! - applying user writes optimistically before the server confirms them,
//! - absorbing push notifications about writes made by other clients,
//! - rolling back cleanly on failure, with no view ever mixing optimistic
//!   and rolled-back state.
//!
//! UI, HTTP transport, and authentication stay outside; the engine talks to
//! them through [`remote::Remote`] and a push channel of JSON frames, and
//! the host event loop drives it by calling [`engine::Engine::poll`] on
//! every tick.

pub mod cache;
pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod events;
pub mod remote;

pub use cache::{CacheStore, Freshness, Invalidation, Record, ViewKey};
pub use config::EngineConfig;
pub use engine::mutation::{MutationId, MutationSpec, Notice, SnapshotSet};
pub use engine::propagate::{ViewWrite, POSITION_GAP};
pub use engine::{Engine, ViewRead};
pub use error::EngineError;
pub use remote::{MutationRequest, OpKind, Remote};
