use std::fmt;

use core_types::{ClassId, InstructorId, StudentId};
use ledger::StoreError;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Coarse classification handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidState,
    ResourceExhausted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    AlreadyEnrolled,
    AlreadyWaitlisted,
    AlreadyDropped,
    /// Student holds a seat; the waitlist drop does not apply.
    UseDrop,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictReason::AlreadyEnrolled => "already enrolled",
            ConflictReason::AlreadyWaitlisted => "already waitlisted",
            ConflictReason::AlreadyDropped => "already dropped",
            ConflictReason::UseDrop => "enrolled, use drop instead",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidStateReason {
    /// Student is waitlisted; the seat drop does not apply.
    UseWaitlistDrop,
    EnrollmentFrozen,
    ClassInactive,
}

impl fmt::Display for InvalidStateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InvalidStateReason::UseWaitlistDrop => "waitlisted, use waitlist drop instead",
            InvalidStateReason::EnrollmentFrozen => "enrollment is frozen",
            InvalidStateReason::ClassInactive => "class is inactive",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("class {class_id} not found")]
    ClassNotFound { class_id: ClassId },
    #[error("student {student_id} has no enrollment in class {class_id}")]
    EnrollmentNotFound {
        student_id: StudentId,
        class_id: ClassId,
    },
    #[error("student {student_id} is not enrolled in class {class_id}")]
    NotEnrolled {
        student_id: StudentId,
        class_id: ClassId,
    },
    #[error("student {student_id} is not on the waitlist for class {class_id}")]
    NotWaitlisted {
        student_id: StudentId,
        class_id: ClassId,
    },
    #[error("instructor {instructor_id} does not teach class {class_id}")]
    NotInstructor {
        instructor_id: InstructorId,
        class_id: ClassId,
    },
    #[error("student {student_id} in class {class_id}: {reason}")]
    Conflict {
        student_id: StudentId,
        class_id: ClassId,
        reason: ConflictReason,
    },
    #[error("class {class_id} already exists")]
    ClassExists { class_id: ClassId },
    #[error("class {class_id} still has {enrolled} enrolled and {waitlisted} waitlisted students")]
    ClassInUse {
        class_id: ClassId,
        enrolled: u32,
        waitlisted: usize,
    },
    #[error("class {class_id}: {reason}")]
    InvalidState {
        class_id: ClassId,
        reason: InvalidStateReason,
    },
    #[error("class {class_id} and waitlist full")]
    ClassFull { class_id: ClassId },
    #[error("student {student_id} is already waitlisted in {limit} classes")]
    WaitlistLimit { student_id: StudentId, limit: u32 },
    #[error("{resource} busy after {attempts} attempts")]
    Busy { resource: String, attempts: usize },
    #[error("internal error: {detail}")]
    Internal {
        detail: String,
        #[source]
        source: Option<StoreError>,
    },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ClassNotFound { .. }
            | EngineError::EnrollmentNotFound { .. }
            | EngineError::NotEnrolled { .. }
            | EngineError::NotWaitlisted { .. }
            | EngineError::NotInstructor { .. } => ErrorKind::NotFound,
            EngineError::Conflict { .. }
            | EngineError::ClassExists { .. }
            | EngineError::ClassInUse { .. } => ErrorKind::Conflict,
            EngineError::InvalidState { .. } => ErrorKind::InvalidState,
            EngineError::ClassFull { .. } | EngineError::WaitlistLimit { .. } => {
                ErrorKind::ResourceExhausted
            }
            EngineError::Busy { .. } | EngineError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Internal failures caused by contention rather than a broken invariant.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Busy { .. } => true,
            EngineError::Internal {
                source: Some(source),
                ..
            } => source.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn internal(detail: impl Into<String>, source: Option<StoreError>) -> Self {
        EngineError::Internal {
            detail: detail.into(),
            source,
        }
    }
}
