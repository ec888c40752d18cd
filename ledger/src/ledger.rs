use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use core_types::{ClassId, EnrollmentId, EnrollmentState, StudentId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// The current enrollment state of one student in one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub enrollment_id: EnrollmentId,
    pub student_id: StudentId,
    pub class_id: ClassId,
    pub state: EnrollmentState,
    pub updated_at: DateTime<Utc>,
}

/// Collision-free enrollment id source.
#[derive(Debug)]
pub struct EnrollmentIdAllocator {
    next: AtomicU64,
}

impl EnrollmentIdAllocator {
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(1)),
        }
    }

    pub fn allocate(&self) -> EnrollmentId {
        EnrollmentId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    /// Ensures ids already in use (e.g. restored from a snapshot) are never handed out again.
    pub fn observe(&self, id: EnrollmentId) {
        self.next.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for EnrollmentIdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

/// Enrollment ledger contract consumed by the enrollment engine.
pub trait EnrollmentLedger: Send + Sync {
    fn get_state(&self, student_id: StudentId, class_id: ClassId) -> Option<EnrollmentState> {
        self.get_record(student_id, class_id).map(|r| r.state)
    }

    fn get_record(&self, student_id: StudentId, class_id: ClassId) -> Option<EnrollmentRecord>;

    /// Compare-and-set on the current state. `expected == None` means the pair
    /// has no record yet; a new record is allocated a fresh id.
    fn set_state(
        &self,
        student_id: StudentId,
        class_id: ClassId,
        expected: Option<EnrollmentState>,
        next: EnrollmentState,
    ) -> Result<EnrollmentRecord>;

    fn next_enrollment_id(&self) -> EnrollmentId;

    /// Records for a class, ordered by enrollment id.
    fn records_for_class(&self, class_id: ClassId) -> Vec<EnrollmentRecord>;

    fn records_for_student(&self, student_id: StudentId) -> Vec<EnrollmentRecord>;

    /// Deletes every record for a removed class, returning how many went.
    fn remove_class_records(&self, class_id: ClassId) -> usize;

    fn count_in_state(&self, class_id: ClassId, state: EnrollmentState) -> usize {
        self.records_for_class(class_id)
            .iter()
            .filter(|r| r.state == state)
            .count()
    }

    /// Number of classes in which the student is currently waitlisted.
    fn waitlisted_class_count(&self, student_id: StudentId) -> usize {
        self.records_for_student(student_id)
            .iter()
            .filter(|r| r.state == EnrollmentState::Waitlisted)
            .count()
    }
}

#[derive(Default)]
pub struct InMemoryEnrollmentLedger {
    records: RwLock<HashMap<ClassId, BTreeMap<StudentId, EnrollmentRecord>>>,
    ids: EnrollmentIdAllocator,
}

impl InMemoryEnrollmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a record verbatim, replacing any current record for the pair.
    pub fn restore(&self, record: EnrollmentRecord) {
        self.ids.observe(record.enrollment_id);
        self.records
            .write()
            .entry(record.class_id)
            .or_default()
            .insert(record.student_id, record);
    }

    pub fn all_records(&self) -> Vec<EnrollmentRecord> {
        let guard = self.records.read();
        let mut out: Vec<_> = guard
            .values()
            .flat_map(|by_student| by_student.values().cloned())
            .collect();
        out.sort_by_key(|r| r.enrollment_id);
        out
    }

    pub fn peek_next_id(&self) -> u64 {
        self.ids.peek()
    }

    pub fn reserve_ids_from(&self, next: u64) {
        if next > 0 {
            self.ids.observe(EnrollmentId(next - 1));
        }
    }
}

impl EnrollmentLedger for InMemoryEnrollmentLedger {
    fn get_record(&self, student_id: StudentId, class_id: ClassId) -> Option<EnrollmentRecord> {
        self.records
            .read()
            .get(&class_id)
            .and_then(|by_student| by_student.get(&student_id))
            .cloned()
    }

    fn set_state(
        &self,
        student_id: StudentId,
        class_id: ClassId,
        expected: Option<EnrollmentState>,
        next: EnrollmentState,
    ) -> Result<EnrollmentRecord> {
        let mut guard = self.records.write();
        let by_student = guard.entry(class_id).or_default();
        let actual = by_student.get(&student_id).map(|r| r.state);
        if actual != expected {
            return Err(StoreError::StateConflict {
                student_id,
                class_id,
                expected,
                actual,
            });
        }
        let now = Utc::now();
        let record = by_student
            .entry(student_id)
            .and_modify(|r| {
                r.state = next;
                r.updated_at = now;
            })
            .or_insert_with(|| EnrollmentRecord {
                enrollment_id: self.ids.allocate(),
                student_id,
                class_id,
                state: next,
                updated_at: now,
            });
        Ok(record.clone())
    }

    fn next_enrollment_id(&self) -> EnrollmentId {
        self.ids.allocate()
    }

    fn records_for_class(&self, class_id: ClassId) -> Vec<EnrollmentRecord> {
        let guard = self.records.read();
        let mut out: Vec<_> = guard
            .get(&class_id)
            .map(|by_student| by_student.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|r| r.enrollment_id);
        out
    }

    fn records_for_student(&self, student_id: StudentId) -> Vec<EnrollmentRecord> {
        let guard = self.records.read();
        let mut out: Vec<_> = guard
            .values()
            .filter_map(|by_student| by_student.get(&student_id).cloned())
            .collect();
        out.sort_by_key(|r| r.enrollment_id);
        out
    }

    fn remove_class_records(&self, class_id: ClassId) -> usize {
        self.records
            .write()
            .remove(&class_id)
            .map(|by_student| by_student.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Arc, thread};

    #[test]
    fn set_state_creates_then_updates_in_place() {
        let ledger = InMemoryEnrollmentLedger::new();
        let created = ledger
            .set_state(StudentId(1), ClassId(10), None, EnrollmentState::Enrolled)
            .unwrap();
        assert_eq!(created.enrollment_id, EnrollmentId(1));

        let dropped = ledger
            .set_state(
                StudentId(1),
                ClassId(10),
                Some(EnrollmentState::Enrolled),
                EnrollmentState::Dropped,
            )
            .unwrap();
        assert_eq!(dropped.enrollment_id, created.enrollment_id);
        assert_eq!(
            ledger.get_state(StudentId(1), ClassId(10)),
            Some(EnrollmentState::Dropped)
        );
        assert_eq!(ledger.records_for_class(ClassId(10)).len(), 1);
    }

    #[test]
    fn set_state_rejects_stale_expectation() {
        let ledger = InMemoryEnrollmentLedger::new();
        ledger
            .set_state(StudentId(1), ClassId(10), None, EnrollmentState::Waitlisted)
            .unwrap();
        let err = ledger
            .set_state(StudentId(1), ClassId(10), None, EnrollmentState::Enrolled)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::StateConflict {
                expected: None,
                actual: Some(EnrollmentState::Waitlisted),
                ..
            }
        ));
    }

    #[test]
    fn waitlisted_classes_are_counted_per_student() {
        let ledger = InMemoryEnrollmentLedger::new();
        for class in 1..=3 {
            ledger
                .set_state(StudentId(5), ClassId(class), None, EnrollmentState::Waitlisted)
                .unwrap();
        }
        ledger
            .set_state(StudentId(5), ClassId(4), None, EnrollmentState::Enrolled)
            .unwrap();
        assert_eq!(ledger.waitlisted_class_count(StudentId(5)), 3);
        assert_eq!(ledger.records_for_student(StudentId(5)).len(), 4);
        assert_eq!(
            ledger.count_in_state(ClassId(4), EnrollmentState::Enrolled),
            1
        );
    }

    #[test]
    fn removing_class_records_leaves_other_classes() {
        let ledger = InMemoryEnrollmentLedger::new();
        ledger
            .set_state(StudentId(1), ClassId(10), None, EnrollmentState::Dropped)
            .unwrap();
        ledger
            .set_state(StudentId(2), ClassId(10), None, EnrollmentState::Dropped)
            .unwrap();
        ledger
            .set_state(StudentId(1), ClassId(11), None, EnrollmentState::Enrolled)
            .unwrap();

        assert_eq!(ledger.remove_class_records(ClassId(10)), 2);
        assert_eq!(ledger.remove_class_records(ClassId(10)), 0);
        assert!(ledger.records_for_class(ClassId(10)).is_empty());
        assert_eq!(ledger.records_for_student(StudentId(1)).len(), 1);
    }

    #[test]
    fn ids_are_unique_across_threads() {
        let ledger = Arc::new(InMemoryEnrollmentLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                thread::spawn(move || {
                    (0..250)
                        .map(|_| ledger.next_enrollment_id())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 2_000);
    }

    #[test]
    fn restore_advances_allocator_past_existing_ids() {
        let ledger = InMemoryEnrollmentLedger::new();
        ledger.restore(EnrollmentRecord {
            enrollment_id: EnrollmentId(41),
            student_id: StudentId(2),
            class_id: ClassId(7),
            state: EnrollmentState::Enrolled,
            updated_at: Utc::now(),
        });
        assert_eq!(ledger.next_enrollment_id(), EnrollmentId(42));
    }
}
