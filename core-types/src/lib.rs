// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared identifiers, enums, configuration, retry and health types for the enrollment service.

pub mod config;
pub mod retry;
pub mod status;
pub mod types;

pub use config::{EngineSettings, EnrollConfig, RetrySettings};
pub use retry::RetryPolicy;
pub use status::{OverallStatus, ServiceStatusHandle};
pub use types::{ClassId, ClassState, EnrollmentId, EnrollmentState, InstructorId, StudentId};
