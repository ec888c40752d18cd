use std::collections::BTreeMap;

use core_types::{ClassId, InstructorId};
use parking_lot::RwLock;

/// Answers whether an instructor teaches a class.
pub trait TeachingAssignments: Send + Sync {
    fn teaches(&self, instructor_id: InstructorId, class_id: ClassId) -> bool;

    fn instructor_for(&self, class_id: ClassId) -> Option<InstructorId>;

    /// Makes `instructor_id` the instructor of record, returning the previous one.
    fn assign(&self, class_id: ClassId, instructor_id: InstructorId) -> Option<InstructorId>;

    fn unassign(&self, class_id: ClassId) -> Option<InstructorId>;
}

/// One instructor per class; reassigning replaces the previous instructor.
#[derive(Default)]
pub struct InMemoryAssignments {
    by_class: RwLock<BTreeMap<ClassId, InstructorId>>,
}

impl InMemoryAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export(&self) -> Vec<(ClassId, InstructorId)> {
        self.by_class
            .read()
            .iter()
            .map(|(class_id, instructor_id)| (*class_id, *instructor_id))
            .collect()
    }
}

impl TeachingAssignments for InMemoryAssignments {
    fn teaches(&self, instructor_id: InstructorId, class_id: ClassId) -> bool {
        self.instructor_for(class_id) == Some(instructor_id)
    }

    fn instructor_for(&self, class_id: ClassId) -> Option<InstructorId> {
        self.by_class.read().get(&class_id).copied()
    }

    fn assign(&self, class_id: ClassId, instructor_id: InstructorId) -> Option<InstructorId> {
        self.by_class.write().insert(class_id, instructor_id)
    }

    fn unassign(&self, class_id: ClassId) -> Option<InstructorId> {
        self.by_class.write().remove(&class_id)
    }
}
