use std::str::FromStr;

use core_types::{ClassId, ClassState, InstructorId, StudentId};
use enrollment_engine::RosterView;
use thiserror::Error;

/// One request line read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enroll {
        student_id: StudentId,
        class_id: ClassId,
    },
    Drop {
        student_id: StudentId,
        class_id: ClassId,
    },
    WaitlistDrop {
        student_id: StudentId,
        class_id: ClassId,
    },
    AdminDrop {
        instructor_id: InstructorId,
        student_id: StudentId,
        class_id: ClassId,
    },
    Position {
        student_id: StudentId,
        class_id: ClassId,
    },
    Enrollments {
        student_id: StudentId,
    },
    Roster {
        instructor_id: InstructorId,
        class_id: ClassId,
        view: RosterView,
    },
    Open,
    Class {
        class_id: ClassId,
    },
    AddClass {
        class_id: ClassId,
        max_capacity: u32,
        waitlist_maximum: Option<u32>,
        instructor_id: Option<InstructorId>,
    },
    RemoveClass {
        class_id: ClassId,
    },
    ClassState {
        class_id: ClassId,
        state: ClassState,
    },
    Assign {
        class_id: ClassId,
        instructor_id: InstructorId,
    },
    Freeze,
    Thaw,
    Audit {
        class_id: Option<ClassId>,
    },
    Status,
    Save,
}

impl Command {
    /// Parses a line. Blank lines and `#` comments yield `None`.
    pub fn parse_line(line: &str) -> Result<Option<Self>, ParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        line.parse().map(Some)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Enroll { .. } => "enroll",
            Command::Drop { .. } => "drop",
            Command::WaitlistDrop { .. } => "waitlist-drop",
            Command::AdminDrop { .. } => "admin-drop",
            Command::Position { .. } => "position",
            Command::Enrollments { .. } => "enrollments",
            Command::Roster { .. } => "roster",
            Command::Open => "open",
            Command::Class { .. } => "class",
            Command::AddClass { .. } => "add-class",
            Command::RemoveClass { .. } => "remove-class",
            Command::ClassState { .. } => "class-state",
            Command::Assign { .. } => "assign",
            Command::Freeze => "freeze",
            Command::Thaw => "thaw",
            Command::Audit { .. } => "audit",
            Command::Status => "status",
            Command::Save => "save",
        }
    }

    /// Registrar and maintenance commands wait for every in-flight request
    /// and run alone, so a script observes them in order.
    pub fn is_barrier(&self) -> bool {
        matches!(
            self,
            Command::AddClass { .. }
                | Command::RemoveClass { .. }
                | Command::ClassState { .. }
                | Command::Assign { .. }
                | Command::Freeze
                | Command::Thaw
                | Command::Audit { .. }
                | Command::Status
                | Command::Save
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("{command}: expected {expected}")]
    Arity {
        command: &'static str,
        expected: &'static str,
    },
    #[error("{command}: invalid {field} {value:?}")]
    InvalidArgument {
        command: &'static str,
        field: &'static str,
        value: String,
    },
}

struct Args<'a> {
    command: &'static str,
    usage: &'static str,
    tokens: &'a [&'a str],
}

impl<'a> Args<'a> {
    fn new(command: &'static str, usage: &'static str, tokens: &'a [&'a str]) -> Self {
        Self {
            command,
            usage,
            tokens,
        }
    }

    fn expect_len(&self, min: usize, max: usize) -> Result<(), ParseError> {
        if self.tokens.len() < min || self.tokens.len() > max {
            return Err(ParseError::Arity {
                command: self.command,
                expected: self.usage,
            });
        }
        Ok(())
    }

    fn get<T: FromStr>(&self, idx: usize, field: &'static str) -> Result<T, ParseError> {
        let raw = self.tokens.get(idx).copied().unwrap_or_default();
        raw.parse().map_err(|_| ParseError::InvalidArgument {
            command: self.command,
            field,
            value: raw.to_string(),
        })
    }

    fn optional<T: FromStr>(&self, idx: usize, field: &'static str) -> Result<Option<T>, ParseError> {
        if idx < self.tokens.len() {
            self.get(idx, field).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut tokens = line.split_whitespace();
        let head = tokens.next().unwrap_or_default().to_ascii_lowercase();
        let rest: Vec<&str> = tokens.collect();

        let student_class = |command: &'static str| -> Result<(StudentId, ClassId), ParseError> {
            let args = Args::new(command, "<student> <class>", &rest);
            args.expect_len(2, 2)?;
            Ok((args.get(0, "student")?, args.get(1, "class")?))
        };

        let command = match head.as_str() {
            "enroll" => {
                let (student_id, class_id) = student_class("enroll")?;
                Command::Enroll {
                    student_id,
                    class_id,
                }
            }
            "drop" => {
                let (student_id, class_id) = student_class("drop")?;
                Command::Drop {
                    student_id,
                    class_id,
                }
            }
            "waitlist-drop" => {
                let (student_id, class_id) = student_class("waitlist-drop")?;
                Command::WaitlistDrop {
                    student_id,
                    class_id,
                }
            }
            "position" => {
                let (student_id, class_id) = student_class("position")?;
                Command::Position {
                    student_id,
                    class_id,
                }
            }
            "admin-drop" => {
                let args = Args::new("admin-drop", "<instructor> <student> <class>", &rest);
                args.expect_len(3, 3)?;
                Command::AdminDrop {
                    instructor_id: args.get(0, "instructor")?,
                    student_id: args.get(1, "student")?,
                    class_id: args.get(2, "class")?,
                }
            }
            "enrollments" => {
                let args = Args::new("enrollments", "<student>", &rest);
                args.expect_len(1, 1)?;
                Command::Enrollments {
                    student_id: args.get(0, "student")?,
                }
            }
            "roster" => {
                let args = Args::new(
                    "roster",
                    "<instructor> <class> <enrolled|dropped|waitlisted>",
                    &rest,
                );
                args.expect_len(3, 3)?;
                Command::Roster {
                    instructor_id: args.get(0, "instructor")?,
                    class_id: args.get(1, "class")?,
                    view: args.get(2, "view")?,
                }
            }
            "open" => {
                Args::new("open", "no arguments", &rest).expect_len(0, 0)?;
                Command::Open
            }
            "class" => {
                let args = Args::new("class", "<class>", &rest);
                args.expect_len(1, 1)?;
                Command::Class {
                    class_id: args.get(0, "class")?,
                }
            }
            "add-class" => {
                let args = Args::new(
                    "add-class",
                    "<class> <capacity> [waitlist-max] [instructor]",
                    &rest,
                );
                args.expect_len(2, 4)?;
                Command::AddClass {
                    class_id: args.get(0, "class")?,
                    max_capacity: args.get(1, "capacity")?,
                    waitlist_maximum: args.optional(2, "waitlist-max")?,
                    instructor_id: args.optional(3, "instructor")?,
                }
            }
            "remove-class" => {
                let args = Args::new("remove-class", "<class>", &rest);
                args.expect_len(1, 1)?;
                Command::RemoveClass {
                    class_id: args.get(0, "class")?,
                }
            }
            "class-state" => {
                let args = Args::new("class-state", "<class> <active|inactive>", &rest);
                args.expect_len(2, 2)?;
                Command::ClassState {
                    class_id: args.get(0, "class")?,
                    state: args.get(1, "state")?,
                }
            }
            "assign" => {
                let args = Args::new("assign", "<class> <instructor>", &rest);
                args.expect_len(2, 2)?;
                Command::Assign {
                    class_id: args.get(0, "class")?,
                    instructor_id: args.get(1, "instructor")?,
                }
            }
            "audit" => {
                let args = Args::new("audit", "[class]", &rest);
                args.expect_len(0, 1)?;
                Command::Audit {
                    class_id: args.optional(0, "class")?,
                }
            }
            "freeze" | "thaw" | "status" | "save" => {
                let command = match head.as_str() {
                    "freeze" => Command::Freeze,
                    "thaw" => Command::Thaw,
                    "status" => Command::Status,
                    _ => Command::Save,
                };
                Args::new(command.name(), "no arguments", &rest).expect_len(0, 0)?;
                command
            }
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };
        Ok(command)
    }
}
