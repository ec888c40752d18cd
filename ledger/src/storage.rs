use std::{
    collections::{HashMap, HashSet},
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use core_types::{ClassId, EnrollmentState, InstructorId, StudentId};
use serde::{Deserialize, Serialize};

use crate::{error::SnapshotError, ledger::EnrollmentRecord, registry::ClassRecord};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistSnapshot {
    pub class_id: ClassId,
    pub students: Vec<StudentId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSnapshot {
    pub class_id: ClassId,
    pub instructor_id: InstructorId,
}

/// Point-in-time image of the whole catalog, stored as json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub next_enrollment_id: u64,
    #[serde(default)]
    pub frozen: bool,
    pub classes: Vec<ClassRecord>,
    pub records: Vec<EnrollmentRecord>,
    pub waitlists: Vec<WaitlistSnapshot>,
    pub assignments: Vec<AssignmentSnapshot>,
}

impl CatalogSnapshot {
    /// Reads a snapshot, returning `None` when the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>, SnapshotError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        let snapshot: Self = serde_json::from_slice(&bytes)?;
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(SnapshotError::SchemaMismatch {
                found: snapshot.schema_version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }
        snapshot.validate()?;
        Ok(Some(snapshot))
    }

    /// Writes next to `path` and renames over it so readers never see a torn file.
    pub fn write(&self, path: &Path) -> Result<(), SnapshotError> {
        let tmp_path = temp_path_for(path);
        let bytes = serde_json::to_vec_pretty(self)?;
        {
            let mut file: File = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_data()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        let known = |class_id: ClassId| self.classes.iter().any(|c| c.class_id == class_id);
        let referenced = self
            .records
            .iter()
            .map(|r| r.class_id)
            .chain(self.waitlists.iter().map(|w| w.class_id))
            .chain(self.assignments.iter().map(|a| a.class_id));
        for class_id in referenced {
            if !known(class_id) {
                return Err(SnapshotError::DanglingClass { class_id });
            }
        }
        for class in &self.classes {
            self.check_class(class)?;
        }
        Ok(())
    }

    /// Seat count matches the `ENROLLED` records and the queue holds exactly
    /// the `WAITLISTED` students, within the class limits.
    fn check_class(&self, class: &ClassRecord) -> Result<(), SnapshotError> {
        let class_id = class.class_id;
        let inconsistent = |detail: String| SnapshotError::Inconsistent { class_id, detail };
        let records: HashMap<StudentId, EnrollmentState> = self
            .records
            .iter()
            .filter(|r| r.class_id == class_id)
            .map(|r| (r.student_id, r.state))
            .collect();
        let enrolled = records
            .values()
            .filter(|s| **s == EnrollmentState::Enrolled)
            .count();
        if class.current_enrollment > class.max_capacity {
            return Err(inconsistent(format!(
                "count {} exceeds capacity {}",
                class.current_enrollment, class.max_capacity
            )));
        }
        if class.current_enrollment as usize != enrolled {
            return Err(inconsistent(format!(
                "count {} but {} enrolled records",
                class.current_enrollment, enrolled
            )));
        }

        let mut queued = HashSet::new();
        for student_id in self
            .waitlists
            .iter()
            .filter(|w| w.class_id == class_id)
            .flat_map(|w| w.students.iter().copied())
        {
            if !queued.insert(student_id) {
                return Err(inconsistent(format!("student {student_id} queued twice")));
            }
            let state = records.get(&student_id);
            if state != Some(&EnrollmentState::Waitlisted) {
                return Err(inconsistent(format!(
                    "queued student {student_id} recorded as {state:?}"
                )));
            }
        }
        if queued.len() > class.waitlist_maximum as usize {
            return Err(inconsistent(format!(
                "queue holds {} over maximum {}",
                queued.len(),
                class.waitlist_maximum
            )));
        }
        if let Some((student_id, _)) = records
            .iter()
            .find(|(s, state)| **state == EnrollmentState::Waitlisted && !queued.contains(*s))
        {
            return Err(inconsistent(format!(
                "waitlisted student {student_id} missing from queue"
            )));
        }
        Ok(())
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
