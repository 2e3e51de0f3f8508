//! Domain layer: meter events and the pure rules that govern them.
//!
//! Nothing in this module performs I/O. Validation, chronology lookups and
//! impact analysis are plain functions over events, so they can be used for
//! live previews as well as for the final gate before a write.

pub mod chronology;
pub mod conflict;
pub mod ids;
pub mod impact;
pub mod kwh;
pub mod meter_event;
pub mod recalculation;
pub mod user_locks;
pub mod validator;

pub use chronology::CascadeWindow;
pub use conflict::{ConflictResolution, DuplicateConflict};
pub use ids::{AuditId, EventId, UserId};
pub use impact::{AffectedPreview, ImpactIssue, ImpactPolicy, ImpactReport, Severity};
pub use kwh::{Kwh, KwhOverflow};
pub use meter_event::{EventStatus, EventType, MeterEvent};
pub use recalculation::{RecalculationAudit, TriggerType};
pub use user_locks::UserLocks;
pub use validator::ValidationResult;
