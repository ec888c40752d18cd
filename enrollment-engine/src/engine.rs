// Copyright (c) James Kassemi, SC, US. All rights reserved.
use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use core_types::{
    config::{EngineSettings, RetrySettings},
    status::{
        MetricSample, ServiceMetricsReporter, ServiceStatusReporter, ServiceStatusSnapshot,
        StatusGauge,
    },
    ClassId, ClassState, EnrollmentState, InstructorId, RetryPolicy, ServiceStatusHandle,
    StudentId,
};
use ledger::{CatalogStore, ClassRecord, EnrollmentRecord, StoreError};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    error::{ConflictReason, EngineError, InvalidStateReason, Result},
    locks::KeyedLocks,
    outcome::{
        AuditReport, DropOutcome, EnrollOutcome, OpenClass, RosterView, WaitlistDropOutcome,
    },
};

const SERVICE_NAME: &str = "enroll";

/// Tunables for an [`EnrollmentEngine`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub default_waitlist_maximum: u32,
    /// Zero disables the per-student limit.
    pub max_waitlisted_classes: u32,
    pub lock_timeout: Duration,
    pub retry: RetryPolicy,
    pub start_frozen: bool,
}

impl EngineOptions {
    pub fn from_settings(engine: &EngineSettings, retry: &RetrySettings) -> Self {
        Self {
            default_waitlist_maximum: engine.default_waitlist_maximum,
            max_waitlisted_classes: engine.max_waitlisted_classes,
            lock_timeout: Duration::from_millis(engine.lock_timeout_ms),
            retry: retry.policy(),
            start_frozen: engine.start_frozen,
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default(), &RetrySettings::default())
    }
}

#[derive(Default)]
struct EngineCounters {
    enrolled: AtomicU64,
    waitlisted: AtomicU64,
    dropped: AtomicU64,
    waitlist_dropped: AtomicU64,
    promoted: AtomicU64,
    rejected: AtomicU64,
    faults: AtomicU64,
}

impl EngineCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn gauges(&self) -> Vec<StatusGauge> {
        let gauge = |label: &str, counter: &AtomicU64| StatusGauge {
            label: label.to_string(),
            value: counter.load(Ordering::Relaxed) as f64,
            max: None,
            unit: None,
        };
        vec![
            gauge("enrolled total", &self.enrolled),
            gauge("waitlisted total", &self.waitlisted),
            gauge("dropped total", &self.dropped),
            gauge("waitlist dropped total", &self.waitlist_dropped),
            gauge("promoted total", &self.promoted),
            gauge("rejected total", &self.rejected),
            gauge("faults total", &self.faults),
        ]
    }
}

/// Applies enrollment transitions across the class registry, the enrollment
/// ledger and the per-class waitlists.
///
/// Every transition for a class runs inside that class's exclusive section,
/// and each pair of writes is undone if its second half fails. Queue
/// membership therefore always mirrors the `WAITLISTED` records, and a freed
/// seat goes to the waitlist head before the section is released.
pub struct EnrollmentEngine {
    store: CatalogStore,
    options: EngineOptions,
    class_locks: KeyedLocks<ClassId>,
    student_locks: KeyedLocks<StudentId>,
    frozen: AtomicBool,
    status: ServiceStatusHandle,
    counters: EngineCounters,
}

impl EnrollmentEngine {
    pub fn new(store: CatalogStore, options: EngineOptions) -> Self {
        let frozen = AtomicBool::new(options.start_frozen);
        Self {
            store,
            options,
            class_locks: KeyedLocks::new("class"),
            student_locks: KeyedLocks::new("student"),
            frozen,
            status: ServiceStatusHandle::new(SERVICE_NAME),
            counters: EngineCounters::default(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn status_handle(&self) -> ServiceStatusHandle {
        self.status.clone()
    }

    /// Takes a seat if one is free, otherwise joins the waitlist tail.
    pub fn enroll(&self, student_id: StudentId, class_id: ClassId) -> Result<EnrollOutcome> {
        self.class(class_id)?;
        if self.is_frozen() {
            return Err(self.reject(EngineError::InvalidState {
                class_id,
                reason: InvalidStateReason::EnrollmentFrozen,
            }));
        }
        let lock = self.class_locks.handle(class_id);
        let _class_guard = self.lock_class(class_id, &lock)?;

        let class = self.class(class_id)?;
        if !class.is_active() {
            return Err(self.reject(EngineError::InvalidState {
                class_id,
                reason: InvalidStateReason::ClassInactive,
            }));
        }
        let prior = self.store.ledger.get_state(student_id, class_id);
        match prior {
            Some(EnrollmentState::Enrolled) => {
                return Err(self.conflict(student_id, class_id, ConflictReason::AlreadyEnrolled))
            }
            Some(EnrollmentState::Waitlisted) => {
                return Err(self.conflict(student_id, class_id, ConflictReason::AlreadyWaitlisted))
            }
            Some(EnrollmentState::Dropped) | None => {}
        }
        if self.store.waitlist.position_of(class_id, student_id).is_some() {
            return Err(self.fault(
                format!("student {student_id} queued for class {class_id} but recorded as {prior:?}"),
                None,
            ));
        }

        if class.has_open_seat() {
            self.take_seat(student_id, &class, prior)
        } else {
            self.join_waitlist(student_id, &class, prior)
        }
    }

    /// Gives up a seat. The waitlist head, if any, is promoted into it.
    pub fn drop_enrollment(&self, student_id: StudentId, class_id: ClassId) -> Result<DropOutcome> {
        self.class(class_id)?;
        let lock = self.class_locks.handle(class_id);
        let _class_guard = self.lock_class(class_id, &lock)?;

        match self.store.ledger.get_state(student_id, class_id) {
            None => Err(self.reject(EngineError::EnrollmentNotFound {
                student_id,
                class_id,
            })),
            Some(EnrollmentState::Dropped) => {
                Err(self.conflict(student_id, class_id, ConflictReason::AlreadyDropped))
            }
            Some(EnrollmentState::Waitlisted) => Err(self.reject(EngineError::InvalidState {
                class_id,
                reason: InvalidStateReason::UseWaitlistDrop,
            })),
            Some(EnrollmentState::Enrolled) => self.release_seat(student_id, class_id),
        }
    }

    /// Leaves the waitlist without affecting the seat count.
    pub fn drop_from_waitlist(
        &self,
        student_id: StudentId,
        class_id: ClassId,
    ) -> Result<WaitlistDropOutcome> {
        self.class(class_id)?;
        let lock = self.class_locks.handle(class_id);
        let _class_guard = self.lock_class(class_id, &lock)?;

        match self.store.ledger.get_state(student_id, class_id) {
            None => Err(self.reject(EngineError::EnrollmentNotFound {
                student_id,
                class_id,
            })),
            Some(EnrollmentState::Dropped) => {
                Err(self.conflict(student_id, class_id, ConflictReason::AlreadyDropped))
            }
            Some(EnrollmentState::Enrolled) => {
                Err(self.conflict(student_id, class_id, ConflictReason::UseDrop))
            }
            Some(EnrollmentState::Waitlisted) => self.leave_waitlist(student_id, class_id),
        }
    }

    /// Instructor-initiated seat drop. Ignores the enrollment freeze.
    pub fn administrative_drop(
        &self,
        instructor_id: InstructorId,
        student_id: StudentId,
        class_id: ClassId,
    ) -> Result<DropOutcome> {
        self.class(class_id)?;
        self.ensure_teaches(instructor_id, class_id)?;
        let lock = self.class_locks.handle(class_id);
        let _class_guard = self.lock_class(class_id, &lock)?;

        match self.store.ledger.get_state(student_id, class_id) {
            Some(EnrollmentState::Enrolled) => {
                let outcome = self.release_seat(student_id, class_id)?;
                info!(
                    "[{}] instructor {} dropped student {} from class {}",
                    SERVICE_NAME, instructor_id, student_id, class_id
                );
                Ok(outcome)
            }
            Some(EnrollmentState::Dropped) => {
                Err(self.conflict(student_id, class_id, ConflictReason::AlreadyDropped))
            }
            Some(EnrollmentState::Waitlisted) | None => Err(self.reject(EngineError::NotEnrolled {
                student_id,
                class_id,
            })),
        }
    }

    pub fn class(&self, class_id: ClassId) -> Result<ClassRecord> {
        self.store
            .registry
            .get_class(class_id)
            .map_err(|err| self.classify_lookup(class_id, err))
    }

    pub fn enrollment(&self, student_id: StudentId, class_id: ClassId) -> Option<EnrollmentRecord> {
        self.store.ledger.get_record(student_id, class_id)
    }

    pub fn instructor_for(&self, class_id: ClassId) -> Option<InstructorId> {
        self.store.assignments.instructor_for(class_id)
    }

    pub fn enrollments_for_student(&self, student_id: StudentId) -> Vec<EnrollmentRecord> {
        self.store.ledger.records_for_student(student_id)
    }

    /// 1-based place in the class waitlist.
    pub fn waitlist_position(&self, student_id: StudentId, class_id: ClassId) -> Result<usize> {
        self.class(class_id)?;
        self.store
            .waitlist
            .position_of(class_id, student_id)
            .ok_or(EngineError::NotWaitlisted {
                student_id,
                class_id,
            })
    }

    /// Students in one state for a class the instructor teaches. The
    /// waitlist view is in queue order; the others in enrollment order.
    pub fn roster(
        &self,
        instructor_id: InstructorId,
        class_id: ClassId,
        view: RosterView,
    ) -> Result<Vec<StudentId>> {
        self.class(class_id)?;
        self.ensure_teaches(instructor_id, class_id)?;
        if view == RosterView::Waitlisted {
            return Ok(self.store.waitlist.members(class_id));
        }
        let state = view.state();
        Ok(self
            .store
            .ledger
            .records_for_class(class_id)
            .into_iter()
            .filter(|r| r.state == state)
            .map(|r| r.student_id)
            .collect())
    }

    /// Active classes with a free seat or waitlist room. Empty while frozen.
    pub fn open_classes(&self) -> Vec<OpenClass> {
        if self.is_frozen() {
            return Vec::new();
        }
        self.store
            .registry
            .list_classes()
            .into_iter()
            .filter(ClassRecord::is_active)
            .filter_map(|class| {
                let waitlist_length = self.store.waitlist.length(class.class_id);
                let accepting =
                    class.has_open_seat() || waitlist_length < class.waitlist_maximum as usize;
                accepting.then_some(OpenClass {
                    class,
                    waitlist_length,
                })
            })
            .collect()
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Returns the previous freeze flag.
    pub fn set_frozen(&self, frozen: bool) -> bool {
        let previous = self.frozen.swap(frozen, Ordering::AcqRel);
        if previous != frozen {
            info!(
                "[{}] enrollment {}",
                SERVICE_NAME,
                if frozen { "frozen" } else { "thawed" }
            );
        }
        previous
    }

    /// Registers a class. `waitlist_maximum` falls back to the configured default.
    pub fn add_class(
        &self,
        class_id: ClassId,
        max_capacity: u32,
        waitlist_maximum: Option<u32>,
        instructor_id: Option<InstructorId>,
    ) -> Result<ClassRecord> {
        let record = ClassRecord::new(
            class_id,
            max_capacity,
            waitlist_maximum.unwrap_or(self.options.default_waitlist_maximum),
        );
        match self.store.registry.insert_class(record.clone()) {
            Ok(()) => {}
            Err(StoreError::ClassExists { class_id }) => {
                return Err(self.reject(EngineError::ClassExists { class_id }))
            }
            Err(err) => return Err(self.store_failure(class_id, "class insert failed", err)),
        }
        if let Some(instructor_id) = instructor_id {
            self.store.assignments.assign(class_id, instructor_id);
        }
        info!(
            "[{}] class {} added: capacity {}, waitlist {}",
            SERVICE_NAME, class_id, record.max_capacity, record.waitlist_maximum
        );
        Ok(record)
    }

    pub fn assign_instructor(
        &self,
        class_id: ClassId,
        instructor_id: InstructorId,
    ) -> Result<Option<InstructorId>> {
        self.class(class_id)?;
        Ok(self.store.assignments.assign(class_id, instructor_id))
    }

    /// Removes a class with no seats taken and an empty waitlist, along with
    /// its dropped records and instructor assignment.
    pub fn remove_class(&self, class_id: ClassId) -> Result<ClassRecord> {
        self.class(class_id)?;
        let lock = self.class_locks.handle(class_id);
        let _class_guard = self.lock_class(class_id, &lock)?;

        let class = self.class(class_id)?;
        let waitlisted = self.store.waitlist.length(class_id);
        if class.current_enrollment > 0 || waitlisted > 0 {
            return Err(self.reject(EngineError::ClassInUse {
                class_id,
                enrolled: class.current_enrollment,
                waitlisted,
            }));
        }
        match self.store.registry.remove_class(class_id) {
            Ok(removed) => {
                let purged = self.store.ledger.remove_class_records(class_id);
                let instructor = self.store.assignments.unassign(class_id);
                info!(
                    "[{}] class {} removed with {} records, instructor {:?}",
                    SERVICE_NAME, class_id, purged, instructor
                );
                Ok(removed)
            }
            Err(StoreError::ClassInUse {
                enrolled,
                waitlisted,
                ..
            }) => Err(self.reject(EngineError::ClassInUse {
                class_id,
                enrolled,
                waitlisted,
            })),
            Err(err) => Err(self.store_failure(class_id, "class removal failed", err)),
        }
    }

    pub fn set_class_state(&self, class_id: ClassId, state: ClassState) -> Result<ClassRecord> {
        self.class(class_id)?;
        let lock = self.class_locks.handle(class_id);
        let _class_guard = self.lock_class(class_id, &lock)?;
        let record = self
            .store
            .registry
            .set_state(class_id, state)
            .map_err(|err| self.store_failure(class_id, "class state update failed", err))?;
        info!("[{}] class {} is now {}", SERVICE_NAME, class_id, state);
        Ok(record)
    }

    /// Checks the seat count against the records and the queue against the
    /// `WAITLISTED` records. Any mismatch is an internal fault.
    pub fn audit(&self, class_id: ClassId) -> Result<AuditReport> {
        self.class(class_id)?;
        let lock = self.class_locks.handle(class_id);
        let _class_guard = self.lock_class(class_id, &lock)?;

        let class = self.class(class_id)?;
        let records = self.store.ledger.records_for_class(class_id);
        let queue = self.store.waitlist.members(class_id);
        let enrolled_records = records
            .iter()
            .filter(|r| r.state == EnrollmentState::Enrolled)
            .count();
        let waitlisted_records = records
            .iter()
            .filter(|r| r.state == EnrollmentState::Waitlisted)
            .count();

        let mut violations = Vec::new();
        if class.current_enrollment > class.max_capacity {
            violations.push(format!(
                "count {} exceeds capacity {}",
                class.current_enrollment, class.max_capacity
            ));
        }
        if class.current_enrollment as usize != enrolled_records {
            violations.push(format!(
                "count {} but {} enrolled records",
                class.current_enrollment, enrolled_records
            ));
        }
        if queue.len() != waitlisted_records {
            violations.push(format!(
                "queue holds {} but {} waitlisted records",
                queue.len(),
                waitlisted_records
            ));
        }
        if queue.len() > class.waitlist_maximum as usize {
            violations.push(format!(
                "queue holds {} over maximum {}",
                queue.len(),
                class.waitlist_maximum
            ));
        }
        for student_id in &queue {
            let state = self.store.ledger.get_state(*student_id, class_id);
            if state != Some(EnrollmentState::Waitlisted) {
                violations.push(format!("queued student {student_id} recorded as {state:?}"));
            }
        }
        if !violations.is_empty() {
            return Err(self.fault(
                format!("class {class_id} audit failed: {}", violations.join("; ")),
                None,
            ));
        }
        Ok(AuditReport {
            waitlist_length: queue.len(),
            class,
            enrolled_records,
            waitlisted_records,
        })
    }

    /// Audits every class, stopping at the first violation.
    pub fn audit_all(&self) -> Result<Vec<AuditReport>> {
        self.store
            .registry
            .list_classes()
            .into_iter()
            .map(|class| self.audit(class.class_id))
            .collect()
    }

    fn take_seat(
        &self,
        student_id: StudentId,
        class: &ClassRecord,
        prior: Option<EnrollmentState>,
    ) -> Result<EnrollOutcome> {
        let class_id = class.class_id;
        let count = self.update_count(class_id, 1)?;
        match self
            .store
            .ledger
            .set_state(student_id, class_id, prior, EnrollmentState::Enrolled)
        {
            Ok(record) => {
                EngineCounters::bump(&self.counters.enrolled);
                info!(
                    "[{}] student {} enrolled in class {} ({}/{})",
                    SERVICE_NAME, student_id, class_id, count, class.max_capacity
                );
                Ok(EnrollOutcome {
                    record,
                    current_enrollment: count,
                    waitlist_position: None,
                })
            }
            Err(err) => {
                if let Err(undo) = self.update_count(class_id, -1) {
                    error!(
                        "[{}] could not return seat in class {} after failed enroll: {}",
                        SERVICE_NAME, class_id, undo
                    );
                }
                Err(self.fault(
                    format!("recording enrollment of student {student_id} in class {class_id} failed"),
                    Some(err),
                ))
            }
        }
    }

    fn join_waitlist(
        &self,
        student_id: StudentId,
        class: &ClassRecord,
        prior: Option<EnrollmentState>,
    ) -> Result<EnrollOutcome> {
        let class_id = class.class_id;
        if self.store.waitlist.length(class_id) >= class.waitlist_maximum as usize {
            return Err(self.reject(EngineError::ClassFull { class_id }));
        }

        let lock = self.student_locks.handle(student_id);
        let _student_guard = self.student_locks.acquire(
            student_id,
            &lock,
            self.options.lock_timeout,
            &self.options.retry,
        )?;
        let limit = self.options.max_waitlisted_classes;
        if limit > 0 && self.store.ledger.waitlisted_class_count(student_id) >= limit as usize {
            return Err(self.reject(EngineError::WaitlistLimit { student_id, limit }));
        }

        let position = match self
            .store
            .waitlist
            .append(class_id, student_id, class.waitlist_maximum)
        {
            Ok(position) => position,
            Err(StoreError::WaitlistFull { .. }) => {
                return Err(self.reject(EngineError::ClassFull { class_id }))
            }
            Err(err) => {
                return Err(self.fault(
                    format!("queueing student {student_id} for class {class_id} failed"),
                    Some(err),
                ))
            }
        };
        match self
            .store
            .ledger
            .set_state(student_id, class_id, prior, EnrollmentState::Waitlisted)
        {
            Ok(record) => {
                EngineCounters::bump(&self.counters.waitlisted);
                info!(
                    "[{}] student {} waitlisted for class {} at position {}",
                    SERVICE_NAME, student_id, class_id, position
                );
                Ok(EnrollOutcome {
                    record,
                    current_enrollment: class.current_enrollment,
                    waitlist_position: Some(position),
                })
            }
            Err(err) => {
                if self.store.waitlist.remove(class_id, student_id).is_none() {
                    error!(
                        "[{}] student {} vanished from class {} queue during rollback",
                        SERVICE_NAME, student_id, class_id
                    );
                }
                Err(self.fault(
                    format!("recording waitlist entry of student {student_id} in class {class_id} failed"),
                    Some(err),
                ))
            }
        }
    }

    fn leave_waitlist(
        &self,
        student_id: StudentId,
        class_id: ClassId,
    ) -> Result<WaitlistDropOutcome> {
        let Some(position) = self.store.waitlist.remove(class_id, student_id) else {
            return Err(self.fault(
                format!("student {student_id} recorded WAITLISTED in class {class_id} but missing from its queue"),
                None,
            ));
        };
        match self.store.ledger.set_state(
            student_id,
            class_id,
            Some(EnrollmentState::Waitlisted),
            EnrollmentState::Dropped,
        ) {
            Ok(record) => {
                EngineCounters::bump(&self.counters.waitlist_dropped);
                let waitlist_length = self.store.waitlist.length(class_id);
                info!(
                    "[{}] student {} left class {} waitlist from position {}",
                    SERVICE_NAME, student_id, class_id, position
                );
                Ok(WaitlistDropOutcome {
                    record,
                    former_position: position,
                    waitlist_length,
                })
            }
            Err(err) => {
                if let Err(undo) = self.store.waitlist.reinsert(class_id, student_id, position) {
                    error!(
                        "[{}] could not requeue student {} in class {}: {}",
                        SERVICE_NAME, student_id, class_id, undo
                    );
                }
                Err(self.fault(
                    format!("recording waitlist drop of student {student_id} in class {class_id} failed"),
                    Some(err),
                ))
            }
        }
    }

    /// Caller holds the class section and has seen `student_id` ENROLLED.
    fn release_seat(&self, student_id: StudentId, class_id: ClassId) -> Result<DropOutcome> {
        let head = self.store.waitlist.front(class_id);
        // Promotion leaves the count unchanged, so it is read before any write.
        let mut seats = 0;
        if let Some(next) = head {
            let state = self.store.ledger.get_state(next, class_id);
            if state != Some(EnrollmentState::Waitlisted) {
                return Err(self.fault(
                    format!("waitlist head {next} for class {class_id} recorded as {state:?}"),
                    None,
                ));
            }
            seats = self.class(class_id)?.current_enrollment;
        }

        let dropped = self
            .store
            .ledger
            .set_state(
                student_id,
                class_id,
                Some(EnrollmentState::Enrolled),
                EnrollmentState::Dropped,
            )
            .map_err(|err| {
                self.fault(
                    format!("recording drop of student {student_id} in class {class_id} failed"),
                    Some(err),
                )
            })?;

        let Some(next) = head else {
            return match self.update_count(class_id, -1) {
                Ok(count) => {
                    EngineCounters::bump(&self.counters.dropped);
                    info!(
                        "[{}] student {} dropped class {}; {} seats taken",
                        SERVICE_NAME, student_id, class_id, count
                    );
                    Ok(DropOutcome {
                        dropped,
                        current_enrollment: count,
                        promoted: None,
                    })
                }
                Err(err) => {
                    self.revert_state(
                        student_id,
                        class_id,
                        EnrollmentState::Dropped,
                        EnrollmentState::Enrolled,
                    );
                    Err(err)
                }
            };
        };
        self.promote(next, class_id, seats, dropped)
    }

    /// Hands the seat vacated by `dropped` to `next`, the verified queue head.
    fn promote(
        &self,
        next: StudentId,
        class_id: ClassId,
        seats: u32,
        dropped: EnrollmentRecord,
    ) -> Result<DropOutcome> {
        let popped = self.store.waitlist.pop_front(class_id);
        if popped != Some(next) {
            if let Some(other) = popped {
                if let Err(undo) = self.store.waitlist.reinsert(class_id, other, 1) {
                    error!(
                        "[{}] could not requeue student {} in class {}: {}",
                        SERVICE_NAME, other, class_id, undo
                    );
                }
            }
            self.revert_state(
                dropped.student_id,
                class_id,
                EnrollmentState::Dropped,
                EnrollmentState::Enrolled,
            );
            return Err(self.fault(
                format!("class {class_id} queue head changed from {next} to {popped:?} during promotion"),
                None,
            ));
        }

        match self.store.ledger.set_state(
            next,
            class_id,
            Some(EnrollmentState::Waitlisted),
            EnrollmentState::Enrolled,
        ) {
            Ok(promoted) => {
                EngineCounters::bump(&self.counters.dropped);
                EngineCounters::bump(&self.counters.promoted);
                info!(
                    "[{}] student {} dropped class {}; promoted student {} from waitlist",
                    SERVICE_NAME, dropped.student_id, class_id, next
                );
                Ok(DropOutcome {
                    dropped,
                    current_enrollment: seats,
                    promoted: Some(promoted),
                })
            }
            Err(err) => {
                if let Err(undo) = self.store.waitlist.reinsert(class_id, next, 1) {
                    error!(
                        "[{}] could not requeue student {} in class {}: {}",
                        SERVICE_NAME, next, class_id, undo
                    );
                }
                self.revert_state(
                    dropped.student_id,
                    class_id,
                    EnrollmentState::Dropped,
                    EnrollmentState::Enrolled,
                );
                Err(self.fault(
                    format!("promoting student {next} in class {class_id} failed"),
                    Some(err),
                ))
            }
        }
    }

    fn lock_class<'a>(&self, class_id: ClassId, lock: &'a Mutex<()>) -> Result<MutexGuard<'a, ()>> {
        self.class_locks
            .acquire(class_id, lock, self.options.lock_timeout, &self.options.retry)
    }

    /// Count updates retry on contention. Anything else is a broken invariant,
    /// since capacity was checked under the class section.
    fn update_count(&self, class_id: ClassId, delta: i32) -> Result<u32> {
        self.options
            .retry
            .retry_if(
                |_| self.store.registry.update_enrollment_count(class_id, delta),
                StoreError::is_transient,
            )
            .map_err(|err| {
                if err.is_transient() {
                    warn!(
                        "[{}] class {} count update gave up: {}",
                        SERVICE_NAME, class_id, err
                    );
                    EngineError::internal(format!("class {class_id} count busy"), Some(err))
                } else {
                    self.fault(
                        format!("class {class_id} count update by {delta} failed"),
                        Some(err),
                    )
                }
            })
    }

    fn revert_state(
        &self,
        student_id: StudentId,
        class_id: ClassId,
        from: EnrollmentState,
        to: EnrollmentState,
    ) {
        if let Err(err) = self.store.ledger.set_state(student_id, class_id, Some(from), to) {
            self.fault(
                format!("could not restore student {student_id} in class {class_id} to {to}"),
                Some(err),
            );
        }
    }

    fn ensure_teaches(&self, instructor_id: InstructorId, class_id: ClassId) -> Result<()> {
        if self.store.assignments.teaches(instructor_id, class_id) {
            Ok(())
        } else {
            Err(self.reject(EngineError::NotInstructor {
                instructor_id,
                class_id,
            }))
        }
    }

    fn classify_lookup(&self, class_id: ClassId, err: StoreError) -> EngineError {
        match err {
            StoreError::ClassNotFound { class_id } => EngineError::ClassNotFound { class_id },
            other => self.store_failure(class_id, "class lookup failed", other),
        }
    }

    fn store_failure(&self, class_id: ClassId, what: &str, err: StoreError) -> EngineError {
        if err.is_transient() {
            warn!("[{}] class {}: {}: {}", SERVICE_NAME, class_id, what, err);
            EngineError::internal(format!("class {class_id}: {what}"), Some(err))
        } else {
            self.fault(format!("class {class_id}: {what}"), Some(err))
        }
    }

    fn conflict(&self, student_id: StudentId, class_id: ClassId, reason: ConflictReason) -> EngineError {
        self.reject(EngineError::Conflict {
            student_id,
            class_id,
            reason,
        })
    }

    fn reject(&self, err: EngineError) -> EngineError {
        EngineCounters::bump(&self.counters.rejected);
        debug!("[{}] rejected: {}", SERVICE_NAME, err);
        err
    }

    /// Logs and records an invariant violation on the status handle.
    fn fault(&self, detail: String, source: Option<StoreError>) -> EngineError {
        EngineCounters::bump(&self.counters.faults);
        match &source {
            Some(source) => error!("[{}] {}: {}", SERVICE_NAME, detail, source),
            None => error!("[{}] {}", SERVICE_NAME, detail),
        }
        self.status.record_fault(detail.clone());
        EngineError::internal(detail, source)
    }

    fn refresh_gauges(&self) {
        self.status.set_gauges(self.counters.gauges());
    }
}

impl ServiceStatusReporter for EnrollmentEngine {
    fn service_name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn status(&self) -> ServiceStatusSnapshot {
        self.refresh_gauges();
        self.status.snapshot()
    }
}

impl ServiceMetricsReporter for EnrollmentEngine {
    fn service_name(&self) -> &'static str {
        SERVICE_NAME
    }

    fn collect_metrics(&self) -> Vec<MetricSample> {
        self.refresh_gauges();
        let mut samples = self.status.collect_metrics();
        samples.push(MetricSample::gauge(
            format!("{SERVICE_NAME}_frozen"),
            if self.is_frozen() { 1.0 } else { 0.0 },
        ));
        samples
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use core_types::{status::OverallStatus, EnrollmentId};
    use ledger::{
        ClassRegistry, EnrollmentLedger, InMemoryCatalog, InMemoryClassRegistry,
        InMemoryEnrollmentLedger, InMemoryWaitlist, WaitlistQueue,
    };

    use super::*;
    use crate::error::ErrorKind;

    const CLASS: ClassId = ClassId(101);
    const TEACHER: InstructorId = InstructorId(9);

    fn engine_with(capacity: u32, waitlist: u32) -> (EnrollmentEngine, InMemoryCatalog) {
        let catalog = InMemoryCatalog::new();
        let engine = EnrollmentEngine::new(catalog.store(), test_options());
        engine
            .add_class(CLASS, capacity, Some(waitlist), Some(TEACHER))
            .unwrap();
        (engine, catalog)
    }

    fn test_options() -> EngineOptions {
        EngineOptions {
            lock_timeout: Duration::from_millis(20),
            retry: RetryPolicy::new(2, 1, 1, 0.0),
            ..EngineOptions::default()
        }
    }

    #[test]
    fn enroll_takes_free_seat() {
        let (engine, _) = engine_with(2, 2);
        let outcome = engine.enroll(StudentId(1), CLASS).unwrap();
        assert_eq!(outcome.state(), EnrollmentState::Enrolled);
        assert_eq!(outcome.current_enrollment, 1);
        assert_eq!(outcome.waitlist_position, None);
        assert_eq!(outcome.record.enrollment_id, EnrollmentId(1));
    }

    #[test]
    fn double_enroll_is_rejected_without_side_effects() {
        let (engine, _) = engine_with(2, 2);
        engine.enroll(StudentId(1), CLASS).unwrap();
        let err = engine.enroll(StudentId(1), CLASS).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict {
                reason: ConflictReason::AlreadyEnrolled,
                ..
            }
        ));
        assert_eq!(engine.class(CLASS).unwrap().current_enrollment, 1);
    }

    #[test]
    fn unknown_class_is_not_found() {
        let (engine, _) = engine_with(1, 1);
        let err = engine.enroll(StudentId(1), ClassId(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            engine.drop_enrollment(StudentId(1), ClassId(5)).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn zero_capacity_class_goes_straight_to_waitlist() {
        let (engine, _) = engine_with(0, 1);
        let outcome = engine.enroll(StudentId(1), CLASS).unwrap();
        assert_eq!(outcome.state(), EnrollmentState::Waitlisted);
        assert_eq!(outcome.waitlist_position, Some(1));
        assert_eq!(outcome.current_enrollment, 0);
    }

    #[test]
    fn zero_waitlist_means_full_class_is_exhausted() {
        let (engine, _) = engine_with(1, 0);
        engine.enroll(StudentId(1), CLASS).unwrap();
        let err = engine.enroll(StudentId(2), CLASS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        assert!(engine.enrollment(StudentId(2), CLASS).is_none());
    }

    #[test]
    fn drop_without_waitlist_frees_seat() {
        let (engine, _) = engine_with(1, 1);
        engine.enroll(StudentId(1), CLASS).unwrap();
        let outcome = engine.drop_enrollment(StudentId(1), CLASS).unwrap();
        assert_eq!(outcome.current_enrollment, 0);
        assert_eq!(outcome.dropped.state, EnrollmentState::Dropped);
        assert!(outcome.promoted.is_none());

        let err = engine.drop_enrollment(StudentId(1), CLASS).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict {
                reason: ConflictReason::AlreadyDropped,
                ..
            }
        ));
    }

    #[test]
    fn re_enroll_after_drop_keeps_enrollment_id() {
        let (engine, _) = engine_with(1, 1);
        let first = engine.enroll(StudentId(1), CLASS).unwrap();
        engine.drop_enrollment(StudentId(1), CLASS).unwrap();
        let again = engine.enroll(StudentId(1), CLASS).unwrap();
        assert_eq!(again.state(), EnrollmentState::Enrolled);
        assert_eq!(again.record.enrollment_id, first.record.enrollment_id);
        assert_eq!(again.current_enrollment, 1);
    }

    #[test]
    fn waitlist_drop_rules() {
        let (engine, _) = engine_with(1, 3);
        engine.enroll(StudentId(1), CLASS).unwrap();
        engine.enroll(StudentId(2), CLASS).unwrap();
        engine.enroll(StudentId(3), CLASS).unwrap();

        let err = engine.drop_from_waitlist(StudentId(1), CLASS).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict {
                reason: ConflictReason::UseDrop,
                ..
            }
        ));
        assert_eq!(
            engine.drop_from_waitlist(StudentId(8), CLASS).unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let outcome = engine.drop_from_waitlist(StudentId(2), CLASS).unwrap();
        assert_eq!(outcome.former_position, 1);
        assert_eq!(outcome.waitlist_length, 1);
        assert_eq!(engine.waitlist_position(StudentId(3), CLASS).unwrap(), 1);
        assert_eq!(
            engine.drop_from_waitlist(StudentId(2), CLASS).unwrap_err().kind(),
            ErrorKind::Conflict
        );
        assert_eq!(engine.class(CLASS).unwrap().current_enrollment, 1);
    }

    #[test]
    fn freeze_blocks_enroll_but_not_drops() {
        let (engine, _) = engine_with(1, 1);
        engine.enroll(StudentId(1), CLASS).unwrap();
        assert!(!engine.set_frozen(true));

        let err = engine.enroll(StudentId(2), CLASS).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidState {
                reason: InvalidStateReason::EnrollmentFrozen,
                ..
            }
        ));
        assert!(engine.open_classes().is_empty());
        engine.drop_enrollment(StudentId(1), CLASS).unwrap();
        assert!(engine.set_frozen(false));
        assert_eq!(engine.open_classes().len(), 1);
    }

    #[test]
    fn inactive_class_rejects_enroll() {
        let (engine, _) = engine_with(1, 1);
        engine.set_class_state(CLASS, ClassState::Inactive).unwrap();
        let err = engine.enroll(StudentId(1), CLASS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(engine.open_classes().is_empty());
    }

    #[test]
    fn per_student_waitlist_limit() {
        let catalog = InMemoryCatalog::new();
        let options = EngineOptions {
            max_waitlisted_classes: 2,
            ..test_options()
        };
        let engine = EnrollmentEngine::new(catalog.store(), options);
        for class in 1..=3 {
            engine.add_class(ClassId(class), 0, Some(5), None).unwrap();
        }
        engine.enroll(StudentId(1), ClassId(1)).unwrap();
        engine.enroll(StudentId(1), ClassId(2)).unwrap();
        let err = engine.enroll(StudentId(1), ClassId(3)).unwrap_err();
        assert!(matches!(err, EngineError::WaitlistLimit { limit: 2, .. }));
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);

        engine.drop_from_waitlist(StudentId(1), ClassId(1)).unwrap();
        engine.enroll(StudentId(1), ClassId(3)).unwrap();
    }

    #[test]
    fn administrative_drop_requires_assignment_and_seat() {
        let (engine, _) = engine_with(1, 1);
        engine.enroll(StudentId(1), CLASS).unwrap();
        engine.enroll(StudentId(2), CLASS).unwrap();

        let err = engine
            .administrative_drop(InstructorId(1), StudentId(1), CLASS)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotInstructor { .. }));
        let err = engine
            .administrative_drop(TEACHER, StudentId(2), CLASS)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotEnrolled { .. }));

        engine.set_frozen(true);
        let outcome = engine
            .administrative_drop(TEACHER, StudentId(1), CLASS)
            .unwrap();
        assert_eq!(outcome.promoted_student(), Some(StudentId(2)));
        assert_eq!(outcome.current_enrollment, 1);
        assert_eq!(
            engine
                .administrative_drop(TEACHER, StudentId(1), CLASS)
                .unwrap_err()
                .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn roster_views() {
        let (engine, _) = engine_with(1, 3);
        for student in 1..=4 {
            engine.enroll(StudentId(student), CLASS).unwrap();
        }
        engine.drop_from_waitlist(StudentId(3), CLASS).unwrap();
        assert_eq!(
            engine.roster(TEACHER, CLASS, RosterView::Enrolled).unwrap(),
            vec![StudentId(1)]
        );
        assert_eq!(
            engine.roster(TEACHER, CLASS, RosterView::Waitlisted).unwrap(),
            vec![StudentId(2), StudentId(4)]
        );
        assert_eq!(
            engine.roster(TEACHER, CLASS, RosterView::Dropped).unwrap(),
            vec![StudentId(3)]
        );
        assert_eq!(
            engine
                .roster(InstructorId(2), CLASS, RosterView::Enrolled)
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn remove_class_requires_empty_class() {
        let (engine, _) = engine_with(1, 1);
        engine.enroll(StudentId(1), CLASS).unwrap();
        let err = engine.remove_class(CLASS).unwrap_err();
        assert!(matches!(err, EngineError::ClassInUse { enrolled: 1, .. }));

        engine.drop_enrollment(StudentId(1), CLASS).unwrap();
        engine.remove_class(CLASS).unwrap();
        assert_eq!(engine.class(CLASS).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(
            engine.add_class(ClassId(7), 1, None, None).unwrap().waitlist_maximum,
            15
        );
        assert_eq!(
            engine.add_class(ClassId(7), 1, None, None).unwrap_err().kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn audit_detects_queue_drift() {
        let (engine, catalog) = engine_with(0, 2);
        engine.enroll(StudentId(1), CLASS).unwrap();
        assert_eq!(engine.audit(CLASS).unwrap().waitlist_length, 1);

        catalog.waitlist.append(CLASS, StudentId(2), 2).unwrap();
        let err = engine.audit(CLASS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(engine.status_handle().overall(), OverallStatus::Crit);
    }

    #[test]
    fn waitlisted_record_missing_from_queue_is_internal() {
        let (engine, catalog) = engine_with(0, 2);
        engine.enroll(StudentId(1), CLASS).unwrap();
        catalog.waitlist.remove(CLASS, StudentId(1));

        let err = engine.drop_from_waitlist(StudentId(1), CLASS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.is_transient());
        let status = engine.status();
        assert_eq!(status.overall, OverallStatus::Crit);
        assert_eq!(status.errors.len(), 1);
        assert_eq!(
            engine.enrollment(StudentId(1), CLASS).unwrap().state,
            EnrollmentState::Waitlisted
        );
    }

    /// Queue that accepts appends but never lets anything leave.
    struct StuckQueue {
        inner: InMemoryWaitlist,
    }

    impl WaitlistQueue for StuckQueue {
        fn append(
            &self,
            class_id: ClassId,
            student_id: StudentId,
            capacity: u32,
        ) -> std::result::Result<usize, StoreError> {
            self.inner.append(class_id, student_id, capacity)
        }

        fn pop_front(&self, _class_id: ClassId) -> Option<StudentId> {
            None
        }

        fn front(&self, class_id: ClassId) -> Option<StudentId> {
            self.inner.front(class_id)
        }

        fn remove(&self, class_id: ClassId, student_id: StudentId) -> Option<usize> {
            self.inner.remove(class_id, student_id)
        }

        fn reinsert(
            &self,
            class_id: ClassId,
            student_id: StudentId,
            position: usize,
        ) -> std::result::Result<usize, StoreError> {
            self.inner.reinsert(class_id, student_id, position)
        }

        fn length(&self, class_id: ClassId) -> usize {
            self.inner.length(class_id)
        }

        fn position_of(&self, class_id: ClassId, student_id: StudentId) -> Option<usize> {
            self.inner.position_of(class_id, student_id)
        }

        fn members(&self, class_id: ClassId) -> Vec<StudentId> {
            self.inner.members(class_id)
        }
    }

    #[test]
    fn failed_promotion_rolls_back_the_drop() {
        let catalog = InMemoryCatalog::new();
        let records: Arc<InMemoryEnrollmentLedger> = catalog.ledger.clone();
        let store = CatalogStore::new(
            catalog.registry.clone(),
            records.clone(),
            Arc::new(StuckQueue {
                inner: InMemoryWaitlist::new(),
            }),
            catalog.assignments.clone(),
        );
        let engine = EnrollmentEngine::new(store, test_options());
        engine.add_class(CLASS, 1, Some(1), None).unwrap();
        engine.enroll(StudentId(1), CLASS).unwrap();
        engine.enroll(StudentId(2), CLASS).unwrap();

        let err = engine.drop_enrollment(StudentId(1), CLASS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(
            records.get_state(StudentId(1), CLASS),
            Some(EnrollmentState::Enrolled)
        );
        assert_eq!(
            records.get_state(StudentId(2), CLASS),
            Some(EnrollmentState::Waitlisted)
        );
        assert_eq!(engine.class(CLASS).unwrap().current_enrollment, 1);
    }

    /// Registry whose lookups fail once `watched` holds a seat in the class.
    struct BlindAfterPromotion {
        inner: Arc<InMemoryClassRegistry>,
        records: Arc<InMemoryEnrollmentLedger>,
        watched: StudentId,
    }

    impl ClassRegistry for BlindAfterPromotion {
        fn get_class(&self, class_id: ClassId) -> std::result::Result<ClassRecord, StoreError> {
            if self.records.get_state(self.watched, class_id) == Some(EnrollmentState::Enrolled) {
                return Err(StoreError::Contention { class_id });
            }
            self.inner.get_class(class_id)
        }

        fn update_enrollment_count(
            &self,
            class_id: ClassId,
            delta: i32,
        ) -> std::result::Result<u32, StoreError> {
            self.inner.update_enrollment_count(class_id, delta)
        }

        fn insert_class(&self, record: ClassRecord) -> std::result::Result<(), StoreError> {
            self.inner.insert_class(record)
        }

        fn remove_class(&self, class_id: ClassId) -> std::result::Result<ClassRecord, StoreError> {
            self.inner.remove_class(class_id)
        }

        fn set_state(
            &self,
            class_id: ClassId,
            state: ClassState,
        ) -> std::result::Result<ClassRecord, StoreError> {
            self.inner.set_state(class_id, state)
        }

        fn list_classes(&self) -> Vec<ClassRecord> {
            self.inner.list_classes()
        }
    }

    #[test]
    fn committed_promotion_reports_success_without_rereading_class() {
        let catalog = InMemoryCatalog::new();
        let records: Arc<InMemoryEnrollmentLedger> = catalog.ledger.clone();
        let store = CatalogStore::new(
            Arc::new(BlindAfterPromotion {
                inner: catalog.registry.clone(),
                records: records.clone(),
                watched: StudentId(2),
            }),
            records.clone(),
            catalog.waitlist.clone(),
            catalog.assignments.clone(),
        );
        let engine = EnrollmentEngine::new(store, test_options());
        engine.add_class(CLASS, 1, Some(1), None).unwrap();
        engine.enroll(StudentId(1), CLASS).unwrap();
        engine.enroll(StudentId(2), CLASS).unwrap();

        let outcome = engine.drop_enrollment(StudentId(1), CLASS).unwrap();
        assert_eq!(outcome.promoted_student(), Some(StudentId(2)));
        assert_eq!(outcome.current_enrollment, 1);
        assert_eq!(
            records.get_state(StudentId(2), CLASS),
            Some(EnrollmentState::Enrolled)
        );
        assert_eq!(catalog.registry.get_class(CLASS).unwrap().current_enrollment, 1);
    }

    #[test]
    fn metrics_report_counters() {
        let (engine, _) = engine_with(1, 1);
        engine.enroll(StudentId(1), CLASS).unwrap();
        engine.enroll(StudentId(1), CLASS).unwrap_err();
        let metrics = engine.collect_metrics();
        let value = |name: &str| {
            metrics
                .iter()
                .find(|m| m.metric == name)
                .map(|m| m.value)
                .unwrap()
        };
        assert_eq!(value("enroll_enrolled_total"), 1.0);
        assert_eq!(value("enroll_rejected_total"), 1.0);
        assert_eq!(value("enroll_frozen"), 0.0);
    }
}
