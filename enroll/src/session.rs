use core_types::status::ServiceStatusReporter;
use enrollment_engine::{EngineError, EnrollmentEngine};
use ledger::{InMemoryCatalog, LedgerConfig, SnapshotError};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::command::{Command, ParseError};

/// The engine plus the catalog it runs on, for one process lifetime.
pub struct Session {
    pub engine: EnrollmentEngine,
    catalog: InMemoryCatalog,
    ledger: LedgerConfig,
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RequestError {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::Parse(_) => "invalid_request",
            RequestError::Engine(err) => err.kind().as_str(),
            RequestError::Snapshot(_) | RequestError::Encode(_) => "internal",
        }
    }
}

impl Session {
    pub fn new(engine: EnrollmentEngine, catalog: InMemoryCatalog, ledger: LedgerConfig) -> Self {
        Self {
            engine,
            catalog,
            ledger,
        }
    }

    pub fn persist(&self) -> Result<(), SnapshotError> {
        self.ledger.ensure_dirs()?;
        self.catalog.persist(&self.ledger, self.engine.is_frozen())
    }

    pub fn execute(&self, command: &Command) -> Result<Value, RequestError> {
        let engine = &self.engine;
        match *command {
            Command::Enroll {
                student_id,
                class_id,
            } => encode(engine.enroll(student_id, class_id)?),
            Command::Drop {
                student_id,
                class_id,
            } => encode(engine.drop_enrollment(student_id, class_id)?),
            Command::WaitlistDrop {
                student_id,
                class_id,
            } => encode(engine.drop_from_waitlist(student_id, class_id)?),
            Command::AdminDrop {
                instructor_id,
                student_id,
                class_id,
            } => encode(engine.administrative_drop(instructor_id, student_id, class_id)?),
            Command::Position {
                student_id,
                class_id,
            } => Ok(json!({ "position": engine.waitlist_position(student_id, class_id)? })),
            Command::Enrollments { student_id } => {
                encode(engine.enrollments_for_student(student_id))
            }
            Command::Roster {
                instructor_id,
                class_id,
                view,
            } => Ok(json!({
                "view": view,
                "students": engine.roster(instructor_id, class_id, view)?,
            })),
            Command::Open => encode(engine.open_classes()),
            Command::Class { class_id } => Ok(json!({
                "class": engine.class(class_id)?,
                "instructor": engine.instructor_for(class_id),
            })),
            Command::AddClass {
                class_id,
                max_capacity,
                waitlist_maximum,
                instructor_id,
            } => encode(engine.add_class(class_id, max_capacity, waitlist_maximum, instructor_id)?),
            Command::RemoveClass { class_id } => encode(engine.remove_class(class_id)?),
            Command::ClassState { class_id, state } => {
                encode(engine.set_class_state(class_id, state)?)
            }
            Command::Assign {
                class_id,
                instructor_id,
            } => Ok(json!({
                "previous": engine.assign_instructor(class_id, instructor_id)?,
            })),
            Command::Freeze => Ok(json!({ "was_frozen": engine.set_frozen(true) })),
            Command::Thaw => Ok(json!({ "was_frozen": engine.set_frozen(false) })),
            Command::Audit { class_id: Some(class_id) } => encode(engine.audit(class_id)?),
            Command::Audit { class_id: None } => encode(engine.audit_all()?),
            Command::Status => encode(engine.status()),
            Command::Save => {
                self.persist()?;
                Ok(json!({ "saved": self.ledger.snapshot_path() }))
            }
        }
    }

    /// Parses and runs one line, producing the reply object printed for it.
    pub fn handle_line(&self, seq: u64, line: &str) -> Option<Value> {
        let command = match Command::parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(err) => return Some(failure(seq, None, &RequestError::from(err))),
        };
        Some(self.reply(seq, &command))
    }

    pub fn reply(&self, seq: u64, command: &Command) -> Value {
        match self.execute(command) {
            Ok(result) => json!({
                "seq": seq,
                "command": command.name(),
                "ok": true,
                "result": result,
            }),
            Err(err) => failure(seq, Some(command.name()), &err),
        }
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, RequestError> {
    Ok(serde_json::to_value(value)?)
}

fn failure(seq: u64, command: Option<&str>, err: &RequestError) -> Value {
    json!({
        "seq": seq,
        "command": command,
        "ok": false,
        "kind": err.kind(),
        "error": err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrollment_engine::EngineOptions;
    use ledger::ClassRegistry;
    use tempfile::tempdir;

    fn session(dir: &std::path::Path) -> Session {
        let catalog = InMemoryCatalog::new();
        let engine = EnrollmentEngine::new(catalog.store(), EngineOptions::default());
        Session::new(engine, catalog, LedgerConfig::new(dir.join("state")))
    }

    #[test]
    fn replies_carry_results_and_error_kinds() {
        let dir = tempdir().unwrap();
        let session = session(dir.path());
        let added = session.handle_line(1, "add-class 10 1 1 3").unwrap();
        assert_eq!(added["ok"], true);
        assert_eq!(added["result"]["waitlist_maximum"], 1);

        let enrolled = session.handle_line(2, "enroll 1 10").unwrap();
        assert_eq!(enrolled["result"]["record"]["state"], "ENROLLED");
        assert_eq!(enrolled["result"]["current_enrollment"], 1);

        let waitlisted = session.handle_line(3, "enroll 2 10").unwrap();
        assert_eq!(waitlisted["result"]["waitlist_position"], 1);

        let full = session.handle_line(4, "enroll 3 10").unwrap();
        assert_eq!(full["ok"], false);
        assert_eq!(full["kind"], "resource_exhausted");
        assert_eq!(full["command"], "enroll");

        let roster = session.handle_line(5, "roster 3 10 waitlisted").unwrap();
        assert_eq!(roster["result"]["students"], json!([2]));

        let bad = session.handle_line(6, "enroll x 10").unwrap();
        assert_eq!(bad["kind"], "invalid_request");
        assert!(session.handle_line(7, "# comment").is_none());
    }

    #[test]
    fn save_writes_snapshot() {
        let dir = tempdir().unwrap();
        let session = session(dir.path());
        session.handle_line(1, "add-class 10 2").unwrap();
        session.handle_line(2, "freeze").unwrap();
        let saved = session.handle_line(3, "save").unwrap();
        assert_eq!(saved["ok"], true);

        let (restored, frozen) =
            InMemoryCatalog::bootstrap(&LedgerConfig::new(dir.path().join("state"))).unwrap();
        assert!(frozen);
        assert_eq!(restored.registry.list_classes().len(), 1);
    }
}
