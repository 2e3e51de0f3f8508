//! Data Transfer Objects for REST request/response serialization.
//!
//! All energy amounts are serialized as JSON strings to keep decimal
//! values exact.

pub mod audit_dto;
pub mod common_dto;
pub mod event_dto;

pub use audit_dto::*;
pub use common_dto::*;
pub use event_dto::*;
