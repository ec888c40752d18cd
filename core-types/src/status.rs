// Copyright (c) James Kassemi, SC, US. All rights reserved.
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum number of fault messages retained on a status handle.
pub const MAX_RETAINED_FAULTS: usize = 64;

/// Discrete health level exposed by a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OverallStatus {
    #[default]
    Ok,
    Warn,
    Crit,
}

/// Named numeric reading exported alongside the status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusGauge {
    pub label: String,
    pub value: f64,
    pub max: Option<f64>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub overall: OverallStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub gauges: Vec<StatusGauge>,
}

/// Immutable snapshot returned to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusSnapshot {
    pub name: String,
    pub overall: OverallStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub gauges: Vec<StatusGauge>,
}

/// Metric sample emitted by a service-specific reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric: String,
    pub value: f64,
    pub labels: Vec<(String, String)>,
}

impl MetricSample {
    pub fn gauge(metric: impl Into<String>, value: f64) -> Self {
        Self {
            metric: metric.into(),
            value,
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

pub trait ServiceStatusReporter: Send + Sync {
    fn service_name(&self) -> &'static str;
    fn status(&self) -> ServiceStatusSnapshot;
}

pub trait ServiceMetricsReporter: Send + Sync {
    fn service_name(&self) -> &'static str;
    fn collect_metrics(&self) -> Vec<MetricSample>;
}

/// Shared handle so a service can publish its own health.
#[derive(Clone)]
pub struct ServiceStatusHandle {
    name: &'static str,
    inner: Arc<RwLock<ServiceStatus>>,
}

impl ServiceStatusHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(RwLock::new(ServiceStatus::default())),
        }
    }

    pub fn service_name(&self) -> &'static str {
        self.name
    }

    pub fn update<F>(&self, mutator: F)
    where
        F: FnOnce(&mut ServiceStatus),
    {
        let mut guard = self.inner.write();
        mutator(&mut guard);
    }

    pub fn set_overall(&self, status: OverallStatus) {
        self.update(|s| s.overall = status);
    }

    pub fn push_warning(&self, msg: impl Into<String>) {
        self.update(|s| {
            s.warnings.push(msg.into());
            trim_front(&mut s.warnings);
            if s.overall == OverallStatus::Ok {
                s.overall = OverallStatus::Warn;
            }
        });
    }

    /// Records an invariant violation. The service stays `Crit` until errors are cleared.
    pub fn record_fault(&self, msg: impl Into<String>) {
        self.update(|s| {
            s.errors.push(msg.into());
            trim_front(&mut s.errors);
            s.overall = OverallStatus::Crit;
        });
    }

    pub fn clear_errors(&self) {
        self.update(|s| {
            s.errors.clear();
            s.overall = if s.warnings.is_empty() {
                OverallStatus::Ok
            } else {
                OverallStatus::Warn
            };
        });
    }

    pub fn set_gauges(&self, gauges: Vec<StatusGauge>) {
        self.update(|s| s.gauges = gauges);
    }

    pub fn snapshot(&self) -> ServiceStatusSnapshot {
        let guard = self.inner.read();
        ServiceStatusSnapshot {
            name: self.name.to_string(),
            overall: guard.overall,
            warnings: guard.warnings.clone(),
            errors: guard.errors.clone(),
            gauges: guard.gauges.clone(),
        }
    }

    pub fn overall(&self) -> OverallStatus {
        self.inner.read().overall
    }
}

fn trim_front(messages: &mut Vec<String>) {
    if messages.len() > MAX_RETAINED_FAULTS {
        let excess = messages.len() - MAX_RETAINED_FAULTS;
        messages.drain(..excess);
    }
}

impl ServiceStatusReporter for ServiceStatusHandle {
    fn service_name(&self) -> &'static str {
        self.name
    }

    fn status(&self) -> ServiceStatusSnapshot {
        self.snapshot()
    }
}

impl ServiceMetricsReporter for ServiceStatusHandle {
    fn service_name(&self) -> &'static str {
        self.name
    }

    fn collect_metrics(&self) -> Vec<MetricSample> {
        let guard = self.inner.read();
        guard
            .gauges
            .iter()
            .map(|g| MetricSample {
                metric: format!("{}_{}", self.name.to_lowercase(), slugify(&g.label)),
                value: g.value,
                labels: g
                    .unit
                    .as_ref()
                    .map(|unit| vec![("unit".to_string(), unit.clone())])
                    .unwrap_or_default(),
            })
            .collect()
    }
}

fn slugify(label: &str) -> String {
    label
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}
