use std::collections::{HashMap, HashSet, VecDeque};

use core_types::{ClassId, StudentId};
use parking_lot::RwLock;

use crate::error::{Result, StoreError};

/// Per-class FIFO of waitlisted students. Positions are 1-based.
pub trait WaitlistQueue: Send + Sync {
    /// Appends to the tail, failing if the student is present or the queue
    /// already holds `capacity` students. Returns the new position.
    fn append(&self, class_id: ClassId, student_id: StudentId, capacity: u32) -> Result<usize>;

    fn pop_front(&self, class_id: ClassId) -> Option<StudentId>;

    fn front(&self, class_id: ClassId) -> Option<StudentId>;

    /// Removes the student, returning the position it held.
    fn remove(&self, class_id: ClassId, student_id: StudentId) -> Option<usize>;

    /// Puts a student back at `position` (clamped to the tail). Used to undo a
    /// removal, so capacity is not re-checked.
    fn reinsert(&self, class_id: ClassId, student_id: StudentId, position: usize) -> Result<usize>;

    fn length(&self, class_id: ClassId) -> usize;

    fn position_of(&self, class_id: ClassId, student_id: StudentId) -> Option<usize>;

    fn members(&self, class_id: ClassId) -> Vec<StudentId>;
}

#[derive(Debug, Default, Clone)]
struct ClassQueue {
    order: VecDeque<StudentId>,
    present: HashSet<StudentId>,
}

impl ClassQueue {
    fn push_back(&mut self, student_id: StudentId) -> usize {
        self.present.insert(student_id);
        self.order.push_back(student_id);
        self.order.len()
    }

    fn pop_front(&mut self) -> Option<StudentId> {
        let student_id = self.order.pop_front()?;
        self.present.remove(&student_id);
        Some(student_id)
    }

    fn remove(&mut self, student_id: StudentId) -> Option<usize> {
        if !self.present.remove(&student_id) {
            return None;
        }
        let idx = self.order.iter().position(|s| *s == student_id)?;
        self.order.remove(idx);
        Some(idx + 1)
    }

    fn position_of(&self, student_id: StudentId) -> Option<usize> {
        if !self.present.contains(&student_id) {
            return None;
        }
        self.order
            .iter()
            .position(|s| *s == student_id)
            .map(|idx| idx + 1)
    }
}

#[derive(Default)]
pub struct InMemoryWaitlist {
    queues: RwLock<HashMap<ClassId, ClassQueue>>,
}

impl InMemoryWaitlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every non-empty queue, for snapshots.
    pub fn export(&self) -> Vec<(ClassId, Vec<StudentId>)> {
        let guard = self.queues.read();
        let mut out: Vec<_> = guard
            .iter()
            .filter(|(_, q)| !q.order.is_empty())
            .map(|(class_id, q)| (*class_id, q.order.iter().copied().collect()))
            .collect();
        out.sort_by_key(|(class_id, _)| *class_id);
        out
    }
}

impl WaitlistQueue for InMemoryWaitlist {
    fn append(&self, class_id: ClassId, student_id: StudentId, capacity: u32) -> Result<usize> {
        let mut guard = self.queues.write();
        let queue = guard.entry(class_id).or_default();
        if queue.present.contains(&student_id) {
            return Err(StoreError::AlreadyQueued {
                student_id,
                class_id,
            });
        }
        if queue.order.len() >= capacity as usize {
            return Err(StoreError::WaitlistFull { class_id, capacity });
        }
        Ok(queue.push_back(student_id))
    }

    fn pop_front(&self, class_id: ClassId) -> Option<StudentId> {
        self.queues.write().get_mut(&class_id)?.pop_front()
    }

    fn front(&self, class_id: ClassId) -> Option<StudentId> {
        self.queues.read().get(&class_id)?.order.front().copied()
    }

    fn remove(&self, class_id: ClassId, student_id: StudentId) -> Option<usize> {
        self.queues.write().get_mut(&class_id)?.remove(student_id)
    }

    fn reinsert(&self, class_id: ClassId, student_id: StudentId, position: usize) -> Result<usize> {
        let mut guard = self.queues.write();
        let queue = guard.entry(class_id).or_default();
        if queue.present.contains(&student_id) {
            return Err(StoreError::AlreadyQueued {
                student_id,
                class_id,
            });
        }
        let idx = position.saturating_sub(1).min(queue.order.len());
        queue.present.insert(student_id);
        queue.order.insert(idx, student_id);
        Ok(idx + 1)
    }

    fn length(&self, class_id: ClassId) -> usize {
        self.queues
            .read()
            .get(&class_id)
            .map(|q| q.order.len())
            .unwrap_or(0)
    }

    fn position_of(&self, class_id: ClassId, student_id: StudentId) -> Option<usize> {
        self.queues.read().get(&class_id)?.position_of(student_id)
    }

    fn members(&self, class_id: ClassId) -> Vec<StudentId> {
        self.queues
            .read()
            .get(&class_id)
            .map(|q| q.order.iter().copied().collect())
            .unwrap_or_default()
    }
}
