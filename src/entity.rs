//! Domain entities cached by the engine, and their typed patches.
//!
//! Each entity kind gets a patch struct whose fields are all optional;
//! applying a patch merges the set fields into the record. Patches are the
//! only way view entries change outside a full canonical replace, which
//! keeps merge logic statically checked per entity kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::Record;

/// Entity kinds known to the engine. Used to route mutation requests and
/// push events; the string form matches the REST collaborator's naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
  Card,
  List,
  Board,
  Attachment,
  Field,
}

impl EntityKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Card => "card",
      EntityKind::List => "list",
      EntityKind::Board => "board",
      EntityKind::Attachment => "attachment",
      EntityKind::Field => "field",
    }
  }
}

/// A card on a board list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
  pub id: String,
  pub list_id: String,
  pub name: String,
  pub description: Option<String>,
  pub position: i64,
  pub archived: bool,
  pub due: Option<DateTime<Utc>>,
  pub labels: Vec<String>,
}

/// Partial update for a card.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardPatch {
  pub name: Option<String>,
  pub description: Option<String>,
  pub list_id: Option<String>,
  pub archived: Option<bool>,
  pub due: Option<DateTime<Utc>>,
  pub labels: Option<Vec<String>>,
}

/// A list (column) on a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListCol {
  pub id: String,
  pub board_id: String,
  pub name: String,
  pub position: i64,
  pub archived: bool,
}

/// Partial update for a list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListColPatch {
  pub name: Option<String>,
  pub archived: Option<bool>,
}

/// Board summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardMeta {
  pub id: String,
  pub name: String,
  pub closed: bool,
}

/// Partial update for a board.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardMetaPatch {
  pub name: Option<String>,
  pub closed: Option<bool>,
}

/// A file attached to a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
  pub id: String,
  pub card_id: String,
  pub name: String,
  pub url: String,
  pub position: i64,
}

/// Partial update for an attachment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentPatch {
  pub name: Option<String>,
}

/// Typed content of a custom field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldContent {
  Checked(bool),
  Number(f64),
  Date(DateTime<Utc>),
  Text(String),
}

/// A custom-field value attached to a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
  pub id: String,
  pub card_id: String,
  pub field_id: String,
  pub value: FieldContent,
}

/// Partial update for a custom-field value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldValuePatch {
  pub value: Option<FieldContent>,
}

// ============================================================================
// Record implementations
// ============================================================================

impl Record for Card {
  type Patch = CardPatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn apply_patch(&mut self, patch: &CardPatch) {
    if let Some(name) = &patch.name {
      self.name = name.clone();
    }
    if let Some(description) = &patch.description {
      self.description = Some(description.clone());
    }
    if let Some(list_id) = &patch.list_id {
      self.list_id = list_id.clone();
    }
    if let Some(archived) = patch.archived {
      self.archived = archived;
    }
    if let Some(due) = patch.due {
      self.due = Some(due);
    }
    if let Some(labels) = &patch.labels {
      self.labels = labels.clone();
    }
  }

  fn position(&self) -> Option<i64> {
    Some(self.position)
  }

  fn set_position(&mut self, position: i64) {
    self.position = position;
  }
}

impl Record for ListCol {
  type Patch = ListColPatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn apply_patch(&mut self, patch: &ListColPatch) {
    if let Some(name) = &patch.name {
      self.name = name.clone();
    }
    if let Some(archived) = patch.archived {
      self.archived = archived;
    }
  }

  fn position(&self) -> Option<i64> {
    Some(self.position)
  }

  fn set_position(&mut self, position: i64) {
    self.position = position;
  }
}

impl Record for BoardMeta {
  type Patch = BoardMetaPatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn apply_patch(&mut self, patch: &BoardMetaPatch) {
    if let Some(name) = &patch.name {
      self.name = name.clone();
    }
    if let Some(closed) = patch.closed {
      self.closed = closed;
    }
  }
}

impl Record for Attachment {
  type Patch = AttachmentPatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn apply_patch(&mut self, patch: &AttachmentPatch) {
    if let Some(name) = &patch.name {
      self.name = name.clone();
    }
  }

  fn position(&self) -> Option<i64> {
    Some(self.position)
  }

  fn set_position(&mut self, position: i64) {
    self.position = position;
  }
}

impl Record for FieldValue {
  type Patch = FieldValuePatch;

  fn id(&self) -> &str {
    &self.id
  }

  fn apply_patch(&mut self, patch: &FieldValuePatch) {
    if let Some(value) = &patch.value {
      self.value = value.clone();
    }
  }
}

// ============================================================================
// Entity sum type
// ============================================================================

/// Any cached entity. Views that mix kinds (a store shared by the whole
/// client) use this; single-kind stores can use the concrete types directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Entity {
  Card(Card),
  List(ListCol),
  Board(BoardMeta),
  Attachment(Attachment),
  Field(FieldValue),
}

/// Patch for any entity kind. Applying a patch of the wrong kind to an
/// entity is a no-op; the propagator only routes patches built for the
/// entity they target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EntityPatch {
  Card(CardPatch),
  List(ListColPatch),
  Board(BoardMetaPatch),
  Attachment(AttachmentPatch),
  Field(FieldValuePatch),
}

impl Entity {
  pub fn kind(&self) -> EntityKind {
    match self {
      Entity::Card(_) => EntityKind::Card,
      Entity::List(_) => EntityKind::List,
      Entity::Board(_) => EntityKind::Board,
      Entity::Attachment(_) => EntityKind::Attachment,
      Entity::Field(_) => EntityKind::Field,
    }
  }
}

impl Record for Entity {
  type Patch = EntityPatch;

  fn id(&self) -> &str {
    match self {
      Entity::Card(c) => &c.id,
      Entity::List(l) => &l.id,
      Entity::Board(b) => &b.id,
      Entity::Attachment(a) => &a.id,
      Entity::Field(f) => &f.id,
    }
  }

  fn apply_patch(&mut self, patch: &EntityPatch) {
    match (self, patch) {
      (Entity::Card(c), EntityPatch::Card(p)) => c.apply_patch(p),
      (Entity::List(l), EntityPatch::List(p)) => l.apply_patch(p),
      (Entity::Board(b), EntityPatch::Board(p)) => b.apply_patch(p),
      (Entity::Attachment(a), EntityPatch::Attachment(p)) => a.apply_patch(p),
      (Entity::Field(f), EntityPatch::Field(p)) => f.apply_patch(p),
      _ => {}
    }
  }

  fn position(&self) -> Option<i64> {
    match self {
      Entity::Card(c) => c.position(),
      Entity::List(l) => l.position(),
      Entity::Attachment(a) => a.position(),
      Entity::Board(_) | Entity::Field(_) => None,
    }
  }

  fn set_position(&mut self, position: i64) {
    match self {
      Entity::Card(c) => c.set_position(position),
      Entity::List(l) => l.set_position(position),
      Entity::Attachment(a) => a.set_position(position),
      Entity::Board(_) | Entity::Field(_) => {}
    }
  }
}
