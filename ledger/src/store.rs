use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::{
    assignments::{InMemoryAssignments, TeachingAssignments},
    config::LedgerConfig,
    error::SnapshotError,
    ledger::{EnrollmentLedger, InMemoryEnrollmentLedger},
    registry::{ClassRegistry, InMemoryClassRegistry},
    storage::{AssignmentSnapshot, CatalogSnapshot, WaitlistSnapshot, SNAPSHOT_SCHEMA_VERSION},
    waitlist::{InMemoryWaitlist, WaitlistQueue},
};

/// The storage collaborators handed to the enrollment engine.
#[derive(Clone)]
pub struct CatalogStore {
    pub registry: Arc<dyn ClassRegistry>,
    pub ledger: Arc<dyn EnrollmentLedger>,
    pub waitlist: Arc<dyn WaitlistQueue>,
    pub assignments: Arc<dyn TeachingAssignments>,
}

impl CatalogStore {
    pub fn new(
        registry: Arc<dyn ClassRegistry>,
        ledger: Arc<dyn EnrollmentLedger>,
        waitlist: Arc<dyn WaitlistQueue>,
        assignments: Arc<dyn TeachingAssignments>,
    ) -> Self {
        Self {
            registry,
            ledger,
            waitlist,
            assignments,
        }
    }
}

/// Process-local catalog with json snapshot persistence.
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    pub registry: Arc<InMemoryClassRegistry>,
    pub ledger: Arc<InMemoryEnrollmentLedger>,
    pub waitlist: Arc<InMemoryWaitlist>,
    pub assignments: Arc<InMemoryAssignments>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &LedgerConfig) -> Self {
        Self {
            registry: Arc::new(InMemoryClassRegistry::with_write_timeout(
                config.count_write_timeout,
            )),
            ..Self::default()
        }
    }

    /// Creates the state directory and loads the last snapshot, if any.
    /// Returns the catalog and the freeze flag stored with it.
    pub fn bootstrap(config: &LedgerConfig) -> Result<(Self, bool), SnapshotError> {
        config.ensure_dirs()?;
        let catalog = Self::with_config(config);
        let path = config.snapshot_path();
        let frozen = match CatalogSnapshot::read(&path)? {
            Some(snapshot) => {
                info!(
                    "[catalog] restoring {} classes, {} records from {:?}",
                    snapshot.classes.len(),
                    snapshot.records.len(),
                    path
                );
                catalog.restore(snapshot)?
            }
            None => {
                info!("[catalog] no snapshot at {:?}; starting empty", path);
                false
            }
        };
        Ok((catalog, frozen))
    }

    fn restore(&self, snapshot: CatalogSnapshot) -> Result<bool, SnapshotError> {
        for class in snapshot.classes {
            self.registry.insert_class(class)?;
        }
        for record in snapshot.records {
            self.ledger.restore(record);
        }
        self.ledger.reserve_ids_from(snapshot.next_enrollment_id);
        for queue in snapshot.waitlists {
            for student_id in queue.students {
                self.waitlist
                    .reinsert(queue.class_id, student_id, usize::MAX)?;
            }
        }
        for assignment in snapshot.assignments {
            self.assignments
                .assign(assignment.class_id, assignment.instructor_id);
        }
        Ok(snapshot.frozen)
    }

    pub fn snapshot(&self, frozen: bool) -> CatalogSnapshot {
        CatalogSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: Utc::now(),
            next_enrollment_id: self.ledger.peek_next_id(),
            frozen,
            classes: self.registry.list_classes(),
            records: self.ledger.all_records(),
            waitlists: self
                .waitlist
                .export()
                .into_iter()
                .map(|(class_id, students)| WaitlistSnapshot { class_id, students })
                .collect(),
            assignments: self
                .assignments
                .export()
                .into_iter()
                .map(|(class_id, instructor_id)| AssignmentSnapshot {
                    class_id,
                    instructor_id,
                })
                .collect(),
        }
    }

    pub fn persist(&self, config: &LedgerConfig, frozen: bool) -> Result<(), SnapshotError> {
        if !config.state_dir().is_dir() {
            return Err(SnapshotError::MissingStateDir {
                path: config.state_dir.clone(),
            });
        }
        self.snapshot(frozen).write(&config.snapshot_path())
    }

    pub fn store(&self) -> CatalogStore {
        CatalogStore::new(
            self.registry.clone(),
            self.ledger.clone(),
            self.waitlist.clone(),
            self.assignments.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ClassRecord;
    use core_types::{ClassId, EnrollmentId, EnrollmentState, InstructorId, StudentId};
    use tempfile::tempdir;

    #[test]
    fn bootstrap_restores_persisted_catalog() {
        let dir = tempdir().unwrap();
        let config = LedgerConfig::new(dir.path().join("state"));

        let (catalog, frozen) = InMemoryCatalog::bootstrap(&config).unwrap();
        assert!(!frozen);
        let store = catalog.store();
        store
            .registry
            .insert_class(ClassRecord::new(ClassId(1), 1, 2))
            .unwrap();
        store.registry.update_enrollment_count(ClassId(1), 1).unwrap();
        store
            .ledger
            .set_state(StudentId(1), ClassId(1), None, EnrollmentState::Enrolled)
            .unwrap();
        store
            .ledger
            .set_state(StudentId(2), ClassId(1), None, EnrollmentState::Waitlisted)
            .unwrap();
        store.waitlist.append(ClassId(1), StudentId(2), 2).unwrap();
        catalog.assignments.assign(ClassId(1), InstructorId(7));
        catalog.persist(&config, true).unwrap();

        let (restored, frozen) = InMemoryCatalog::bootstrap(&config).unwrap();
        assert!(frozen);
        let store = restored.store();
        assert_eq!(
            store.registry.get_class(ClassId(1)).unwrap().current_enrollment,
            1
        );
        assert_eq!(store.waitlist.members(ClassId(1)), vec![StudentId(2)]);
        assert!(store.assignments.teaches(InstructorId(7), ClassId(1)));
        assert_eq!(store.ledger.next_enrollment_id(), EnrollmentId(3));
    }

    #[test]
    fn persist_requires_state_dir() {
        let dir = tempdir().unwrap();
        let config = LedgerConfig::new(dir.path().join("missing"));
        let err = InMemoryCatalog::new().persist(&config, false).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingStateDir { .. }));
    }
}
