//! Enrollment engine: applies enroll, drop, waitlist-drop and administrative
//! drop requests against a [`ledger::CatalogStore`], keeping seat counts,
//! enrollment records and waitlists consistent under concurrent callers.

pub mod engine;
pub mod error;
pub mod locks;
pub mod outcome;

pub use engine::{EngineOptions, EnrollmentEngine};
pub use error::{ConflictReason, EngineError, ErrorKind, InvalidStateReason, Result};
pub use outcome::{
    AuditReport, DropOutcome, EnrollOutcome, OpenClass, RosterView, WaitlistDropOutcome,
};
