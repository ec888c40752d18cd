//! Storage collaborators for the enrollment engine.
//!
//! The crate exposes:
//! - [`ClassRegistry`]: class capacity, waitlist limits and the seat counter.
//! - [`EnrollmentLedger`]: the current state of every (student, class) pair.
//! - [`WaitlistQueue`]: per-class FIFO of waitlisted students.
//! - [`TeachingAssignments`]: which instructor teaches which class.
//! - [`CatalogStore`] / [`InMemoryCatalog`]: the bundle injected into the engine, and its
//!   in-process implementation with json snapshots.

pub mod assignments;
pub mod config;
pub mod error;
pub mod ledger;
pub mod registry;
pub mod storage;
pub mod store;
pub mod waitlist;

pub use assignments::{InMemoryAssignments, TeachingAssignments};
pub use config::LedgerConfig;
pub use error::{SnapshotError, StoreError};
pub use ledger::{EnrollmentIdAllocator, EnrollmentLedger, EnrollmentRecord, InMemoryEnrollmentLedger};
pub use registry::{ClassRecord, ClassRegistry, InMemoryClassRegistry};
pub use storage::CatalogSnapshot;
pub use store::{CatalogStore, InMemoryCatalog};
pub use waitlist::{InMemoryWaitlist, WaitlistQueue};
