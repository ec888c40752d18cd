use std::{collections::BTreeMap, time::Duration};

use core_types::{ClassId, ClassState};
use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(50);

/// Capacity limits and seat count for one class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub class_id: ClassId,
    pub max_capacity: u32,
    pub current_enrollment: u32,
    pub waitlist_maximum: u32,
    #[serde(default)]
    pub state: ClassState,
}

impl ClassRecord {
    pub fn new(class_id: ClassId, max_capacity: u32, waitlist_maximum: u32) -> Self {
        Self {
            class_id,
            max_capacity,
            current_enrollment: 0,
            waitlist_maximum,
            state: ClassState::Active,
        }
    }

    pub fn has_open_seat(&self) -> bool {
        self.current_enrollment < self.max_capacity
    }

    pub fn open_seats(&self) -> u32 {
        self.max_capacity.saturating_sub(self.current_enrollment)
    }

    pub fn is_active(&self) -> bool {
        self.state == ClassState::Active
    }
}

/// Class registry contract consumed by the enrollment engine.
pub trait ClassRegistry: Send + Sync {
    fn get_class(&self, class_id: ClassId) -> Result<ClassRecord>;

    /// Atomically applies `delta` to the seat count, rejecting results outside
    /// `[0, max_capacity]`. Returns the new count.
    fn update_enrollment_count(&self, class_id: ClassId, delta: i32) -> Result<u32>;

    fn insert_class(&self, record: ClassRecord) -> Result<()>;

    /// Removes a class with no occupied seats.
    fn remove_class(&self, class_id: ClassId) -> Result<ClassRecord>;

    fn set_state(&self, class_id: ClassId, state: ClassState) -> Result<ClassRecord>;

    fn list_classes(&self) -> Vec<ClassRecord>;
}

type ClassTable = BTreeMap<ClassId, ClassRecord>;

pub struct InMemoryClassRegistry {
    classes: RwLock<ClassTable>,
    write_timeout: Duration,
}

impl InMemoryClassRegistry {
    pub fn new() -> Self {
        Self::with_write_timeout(DEFAULT_WRITE_TIMEOUT)
    }

    /// Writers that cannot take the table within `write_timeout` get
    /// [`StoreError::Contention`] instead of blocking.
    pub fn with_write_timeout(write_timeout: Duration) -> Self {
        Self {
            classes: RwLock::new(BTreeMap::new()),
            write_timeout,
        }
    }

    fn write(&self, class_id: ClassId) -> Result<RwLockWriteGuard<'_, ClassTable>> {
        self.classes
            .try_write_for(self.write_timeout)
            .ok_or(StoreError::Contention { class_id })
    }
}

impl Default for InMemoryClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry for InMemoryClassRegistry {
    fn get_class(&self, class_id: ClassId) -> Result<ClassRecord> {
        self.classes
            .read()
            .get(&class_id)
            .cloned()
            .ok_or(StoreError::ClassNotFound { class_id })
    }

    fn update_enrollment_count(&self, class_id: ClassId, delta: i32) -> Result<u32> {
        let mut guard = self.write(class_id)?;
        let record = guard
            .get_mut(&class_id)
            .ok_or(StoreError::ClassNotFound { class_id })?;
        let next = i64::from(record.current_enrollment) + i64::from(delta);
        if next < 0 || next > i64::from(record.max_capacity) {
            return Err(StoreError::CountOutOfRange {
                class_id,
                current: record.current_enrollment,
                delta,
                max: record.max_capacity,
            });
        }
        record.current_enrollment = next as u32;
        Ok(record.current_enrollment)
    }

    fn insert_class(&self, record: ClassRecord) -> Result<()> {
        let class_id = record.class_id;
        if record.current_enrollment > record.max_capacity {
            return Err(StoreError::CountOutOfRange {
                class_id,
                current: record.current_enrollment,
                delta: 0,
                max: record.max_capacity,
            });
        }
        let mut guard = self.write(class_id)?;
        if guard.contains_key(&class_id) {
            return Err(StoreError::ClassExists { class_id });
        }
        guard.insert(class_id, record);
        Ok(())
    }

    fn remove_class(&self, class_id: ClassId) -> Result<ClassRecord> {
        let mut guard = self.write(class_id)?;
        let record = guard
            .get(&class_id)
            .ok_or(StoreError::ClassNotFound { class_id })?;
        if record.current_enrollment > 0 {
            return Err(StoreError::ClassInUse {
                class_id,
                enrolled: record.current_enrollment,
                waitlisted: 0,
            });
        }
        guard
            .remove(&class_id)
            .ok_or(StoreError::ClassNotFound { class_id })
    }

    fn set_state(&self, class_id: ClassId, state: ClassState) -> Result<ClassRecord> {
        let mut guard = self.write(class_id)?;
        let record = guard
            .get_mut(&class_id)
            .ok_or(StoreError::ClassNotFound { class_id })?;
        record.state = state;
        Ok(record.clone())
    }

    fn list_classes(&self) -> Vec<ClassRecord> {
        self.classes.read().values().cloned().collect()
    }
}
