//! Duplicate-date conflicts.
//!
//! Only one active event may sit at a given date. When a new event collides
//! with an existing one the caller must pick a [`ConflictResolution`]; there
//! is no automatic choice.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::MeterEvent;

/// How the user chose to resolve a duplicate date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Apply the submitted values as an edit of the existing event. A
    /// top-up amount change goes through the usual cascade.
    EditExisting,
    /// Void the existing event and insert the new one. No cascade: the old
    /// event is treated as simply wrong.
    Replace,
}

/// A collision between a submitted event and an existing active event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateConflict {
    /// The event already recorded at the submitted date.
    pub existing: MeterEvent,
    /// Choices offered to the user.
    pub options: [ConflictResolution; 2],
}

impl DuplicateConflict {
    /// Wraps the colliding event with both resolution options.
    #[must_use]
    pub const fn new(existing: MeterEvent) -> Self {
        Self {
            existing,
            options: [ConflictResolution::EditExisting, ConflictResolution::Replace],
        }
    }
}

/// Reason recorded on an event voided by [`ConflictResolution::Replace`].
pub const REPLACED_REASON: &str = "replaced";

/// Reason recorded on an event voided by an edit.
pub const EDITED_REASON: &str = "edited";
