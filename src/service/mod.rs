//! Service layer: business logic orchestration.
//!
//! [`LedgerService`] runs the submit, edit, void and cascade pipelines over
//! a [`crate::persistence::LedgerStore`], serializing mutations per user.

pub mod ledger_service;
pub mod requests;

pub use ledger_service::LedgerService;
pub use requests::{CascadeRequest, EditEvent, NewEvent, SubmitOutcome};
