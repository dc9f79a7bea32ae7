//! Push-channel wire format and its mapping to view invalidations.
//!
//! Frames arrive as JSON text `{"event": "...", "data": {...}}`. Wire types
//! live here, away from the domain types; the listener turns each frame into
//! a set of invalidation targets and nothing else. Push payloads are never
//! merged into views directly, so a remote write can't collide with an
//! in-flight optimistic mutation on the same view.

use serde::Deserialize;

use crate::cache::{Invalidation, ViewKey};

/// Remote-origin change event kinds delivered over the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
  CardCreated,
  CardUpdated,
  CardMoved,
  CardDeleted,
  CardArchived,
  ListCreated,
  ListUpdated,
  ListMoved,
  ListDeleted,
  ListArchived,
  AttachmentCreated,
  AttachmentDeleted,
  FieldUpdated,
  ChecklistCreated,
  ChecklistUpdated,
  ChecklistDeleted,
  ConnectionAck,
}

/// Payload of a push frame. Fields are event-dependent; absent ids simply
/// narrow the invalidation the frame can express.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushData {
  pub card_id: Option<String>,
  pub list_id: Option<String>,
  pub from_list_id: Option<String>,
  pub to_list_id: Option<String>,
  pub board_id: Option<String>,
}

/// One inbound push frame.
#[derive(Debug, Clone, Deserialize)]
pub struct PushFrame {
  pub event: EventKind,
  #[serde(default)]
  pub data: PushData,
}

impl PushFrame {
  /// Deterministic mapping from event kind to invalidation targets.
  ///
  /// Card and list events hit their exact detail and collection views.
  /// Field and checklist events have diffuse effects on aggregate views, so
  /// they broaden to the card's whole key family plus the `derived/` family
  /// rather than tracking individual dependents.
  pub fn invalidation_targets(&self) -> Vec<Invalidation> {
    let d = &self.data;
    let mut targets = Vec::new();

    match self.event {
      EventKind::CardCreated | EventKind::CardUpdated => {
        if let Some(card_id) = &d.card_id {
          targets.push(Invalidation::Exact(ViewKey::card(card_id)));
        }
        if let Some(list_id) = &d.list_id {
          targets.push(Invalidation::Exact(ViewKey::cards_of_list(list_id)));
        }
      }
      EventKind::CardMoved => {
        if let Some(card_id) = &d.card_id {
          targets.push(Invalidation::Exact(ViewKey::card(card_id)));
        }
        if let Some(from) = &d.from_list_id {
          targets.push(Invalidation::Exact(ViewKey::cards_of_list(from)));
        }
        if let Some(to) = &d.to_list_id {
          targets.push(Invalidation::Exact(ViewKey::cards_of_list(to)));
        }
      }
      EventKind::CardDeleted | EventKind::CardArchived => {
        if let Some(card_id) = &d.card_id {
          // The card's detail, attachments, and fields all die with it.
          targets.push(Invalidation::Prefix(format!("card/{}", card_id)));
        }
        if let Some(list_id) = &d.list_id {
          targets.push(Invalidation::Exact(ViewKey::cards_of_list(list_id)));
        }
      }
      EventKind::ListCreated
      | EventKind::ListUpdated
      | EventKind::ListMoved
      | EventKind::ListDeleted
      | EventKind::ListArchived => {
        if let Some(list_id) = &d.list_id {
          targets.push(Invalidation::Prefix(format!("list/{}", list_id)));
        }
        if let Some(board_id) = &d.board_id {
          targets.push(Invalidation::Exact(ViewKey::lists_of_board(board_id)));
        }
      }
      EventKind::AttachmentCreated | EventKind::AttachmentDeleted => {
        if let Some(card_id) = &d.card_id {
          targets.push(Invalidation::Exact(ViewKey::attachments_of_card(card_id)));
          targets.push(Invalidation::Exact(ViewKey::card(card_id)));
        }
      }
      EventKind::FieldUpdated => {
        if let Some(card_id) = &d.card_id {
          targets.push(Invalidation::Prefix(format!("card/{}", card_id)));
        }
        targets.push(Invalidation::Prefix("derived/".to_string()));
      }
      EventKind::ChecklistCreated | EventKind::ChecklistUpdated | EventKind::ChecklistDeleted => {
        if let Some(card_id) = &d.card_id {
          targets.push(Invalidation::Prefix(format!("card/{}", card_id)));
        }
        targets.push(Invalidation::Prefix("derived/".to_string()));
      }
      EventKind::ConnectionAck => {}
    }

    targets
  }
}
