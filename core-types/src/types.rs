// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                value
                    .trim()
                    .parse::<u64>()
                    .map($name)
                    .map_err(|_| ParseIdError {
                        kind: $label,
                        value: value.to_string(),
                    })
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }
    };
}

id_type!(
    /// Student identity as issued by the user directory.
    StudentId,
    "student"
);
id_type!(
    /// Catalog class (course section) identifier.
    ClassId,
    "class"
);
id_type!(InstructorId, "instructor");
id_type!(
    /// Monotonically allocated enrollment record identifier.
    EnrollmentId,
    "enrollment"
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} id '{}'", self.kind, self.value)
    }
}

impl std::error::Error for ParseIdError {}

/// Current state of a (student, class) enrollment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentState {
    Enrolled,
    Waitlisted,
    Dropped,
}

impl EnrollmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentState::Enrolled => "ENROLLED",
            EnrollmentState::Waitlisted => "WAITLISTED",
            EnrollmentState::Dropped => "DROPPED",
        }
    }
}

impl fmt::Display for EnrollmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "ENROLLED" => Ok(EnrollmentState::Enrolled),
            "WAITLISTED" => Ok(EnrollmentState::Waitlisted),
            "DROPPED" => Ok(EnrollmentState::Dropped),
            other => Err(format!("unknown enrollment state '{other}'")),
        }
    }
}

/// Whether a class currently accepts enrollment requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassState {
    #[default]
    Active,
    Inactive,
}

impl fmt::Display for ClassState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassState::Active => f.write_str("active"),
            ClassState::Inactive => f.write_str("inactive"),
        }
    }
}

impl FromStr for ClassState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "active" => Ok(ClassState::Active),
            "inactive" => Ok(ClassState::Inactive),
            other => Err(format!("unknown class state '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_parse_and_reject_garbage() {
        assert_eq!("42".parse::<StudentId>().unwrap(), StudentId(42));
        assert_eq!(" 7 ".parse::<ClassId>().unwrap(), ClassId(7));
        let err = "x1".parse::<InstructorId>().unwrap_err();
        assert_eq!(err.kind, "instructor");
        assert_eq!(err.to_string(), "invalid instructor id 'x1'");
    }

    #[test]
    fn enrollment_state_uses_upper_case_wire_names() {
        let json = serde_json::to_string(&EnrollmentState::Waitlisted).unwrap();
        assert_eq!(json, "\"WAITLISTED\"");
        assert_eq!(
            "dropped".parse::<EnrollmentState>().unwrap(),
            EnrollmentState::Dropped
        );
        assert!("pending".parse::<EnrollmentState>().is_err());
    }

    #[test]
    fn class_state_defaults_to_active() {
        assert_eq!(ClassState::default(), ClassState::Active);
        let json = serde_json::to_string(&ClassState::Inactive).unwrap();
        assert_eq!(json, "\"inactive\"");
    }
}
