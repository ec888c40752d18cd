use std::path::PathBuf;

use core_types::{ClassId, EnrollmentState, StudentId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures reported by the registry, ledger and waitlist collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("class {class_id} not found")]
    ClassNotFound { class_id: ClassId },
    #[error("class {class_id} already exists")]
    ClassExists { class_id: ClassId },
    #[error("class {class_id} still has {enrolled} enrolled and {waitlisted} waitlisted students")]
    ClassInUse {
        class_id: ClassId,
        enrolled: u32,
        waitlisted: usize,
    },
    #[error(
        "enrollment count for class {class_id} would leave [0, {max}]: current {current}, delta {delta}"
    )]
    CountOutOfRange {
        class_id: ClassId,
        current: u32,
        delta: i32,
        max: u32,
    },
    #[error("store busy updating class {class_id}")]
    Contention { class_id: ClassId },
    #[error(
        "state conflict for student {student_id} in class {class_id}: expected {expected:?}, actual {actual:?}"
    )]
    StateConflict {
        student_id: StudentId,
        class_id: ClassId,
        expected: Option<EnrollmentState>,
        actual: Option<EnrollmentState>,
    },
    #[error("waitlist for class {class_id} is full ({capacity})")]
    WaitlistFull { class_id: ClassId, capacity: u32 },
    #[error("student {student_id} already queued for class {class_id}")]
    AlreadyQueued {
        student_id: StudentId,
        class_id: ClassId,
    },
}

impl StoreError {
    /// Whether the same request may succeed if simply retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Contention { .. })
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("state directory missing: {path}")]
    MissingStateDir { path: PathBuf },
    #[error("snapshot schema mismatch (file={found}, expected={expected})")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("snapshot encode/decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("snapshot references unknown class {class_id}")]
    DanglingClass { class_id: ClassId },
    #[error("snapshot inconsistent for class {class_id}: {detail}")]
    Inconsistent { class_id: ClassId, detail: String },
    #[error("store error while restoring snapshot: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
