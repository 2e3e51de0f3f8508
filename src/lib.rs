//! # kwh-ledger
//!
//! REST service that keeps a prepaid electricity meter ledger per user.
//!
//! Users record dated meter readings and top-up purchases. Readings are
//! validated against the physics of a prepaid meter (without a top-up the
//! balance only goes down), and a top-up entered after the fact shifts every
//! later balance by its purchase amount in one atomic, audited and
//! undoable cascade.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)
//!     │
//!     ├── REST Handlers (api/)
//!     │
//!     ├── LedgerService (service/)
//!     ├── UserLocks (domain/)
//!     │
//!     ├── Validator, Chronology, Impact analysis (domain/)
//!     │
//!     └── LedgerStore (persistence/)
//!             ├── MemoryLedgerStore
//!             └── PostgreSQL
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
