use std::{fmt, str::FromStr};

use core_types::{EnrollmentState, StudentId};
use ledger::{ClassRecord, EnrollmentRecord};
use serde::Serialize;

/// Result of a successful enroll request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollOutcome {
    pub record: EnrollmentRecord,
    pub current_enrollment: u32,
    /// Set when the student landed on the waitlist.
    pub waitlist_position: Option<usize>,
}

impl EnrollOutcome {
    pub fn state(&self) -> EnrollmentState {
        self.record.state
    }
}

/// Result of a seat drop, including any student promoted into the freed seat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropOutcome {
    pub dropped: EnrollmentRecord,
    pub current_enrollment: u32,
    pub promoted: Option<EnrollmentRecord>,
}

impl DropOutcome {
    pub fn promoted_student(&self) -> Option<StudentId> {
        self.promoted.as_ref().map(|r| r.student_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitlistDropOutcome {
    pub record: EnrollmentRecord,
    pub former_position: usize,
    pub waitlist_length: usize,
}

/// A class accepting requests, as shown to students.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenClass {
    #[serde(flatten)]
    pub class: ClassRecord,
    pub waitlist_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RosterView {
    Enrolled,
    Dropped,
    Waitlisted,
}

impl RosterView {
    pub fn state(&self) -> EnrollmentState {
        match self {
            RosterView::Enrolled => EnrollmentState::Enrolled,
            RosterView::Dropped => EnrollmentState::Dropped,
            RosterView::Waitlisted => EnrollmentState::Waitlisted,
        }
    }
}

impl fmt::Display for RosterView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RosterView::Enrolled => "enrolled",
            RosterView::Dropped => "dropped",
            RosterView::Waitlisted => "waitlisted",
        };
        f.write_str(text)
    }
}

impl FromStr for RosterView {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enrolled" => Ok(RosterView::Enrolled),
            "dropped" => Ok(RosterView::Dropped),
            "waitlisted" | "waitlist" => Ok(RosterView::Waitlisted),
            other => Err(format!("unknown roster view {other:?}")),
        }
    }
}

/// Per-class consistency check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub class: ClassRecord,
    pub enrolled_records: usize,
    pub waitlisted_records: usize,
    pub waitlist_length: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_view_parses_aliases() {
        assert_eq!("Enrolled".parse::<RosterView>(), Ok(RosterView::Enrolled));
        assert_eq!("waitlist".parse::<RosterView>(), Ok(RosterView::Waitlisted));
        assert!("pending".parse::<RosterView>().is_err());
        assert_eq!(RosterView::Dropped.state(), EnrollmentState::Dropped);
    }
}
