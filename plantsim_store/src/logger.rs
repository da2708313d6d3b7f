//! Structured Event Logger.
//!
//! Uniform ingestion point for structured events. Every entry stamps
//! both simulation time (from the Clock) and wall time; AUDIT, ALARM,
//! and SECURITY entries are additionally appended to the State Store's
//! central audit log. Every entry is also emitted through `tracing` at
//! a level derived from `Severity`, so the same stream is visible both
//! through `get_audit_trail` and through the process's normal log sink.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use plantsim_common::consts::DEFAULT_LOGGER_RING_CAPACITY;
use plantsim_common::types::{AlarmPriority, AlarmState, Category, Severity};
use tracing::{debug, error, info, warn};

use crate::clock::SimulationClock;
use crate::store::{AuditEntry, AuditFilter, StateStore};

fn wall_time_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn emit_tracing(entry: &AuditEntry) {
    match entry.severity {
        Severity::Critical | Severity::Alert | Severity::Error => error!(
            category = ?entry.category,
            device = entry.device.as_deref().unwrap_or(""),
            "{}",
            entry.message
        ),
        Severity::Warning => warn!(
            category = ?entry.category,
            device = entry.device.as_deref().unwrap_or(""),
            "{}",
            entry.message
        ),
        Severity::Notice | Severity::Info => info!(
            category = ?entry.category,
            device = entry.device.as_deref().unwrap_or(""),
            "{}",
            entry.message
        ),
        Severity::Debug => debug!(
            category = ?entry.category,
            device = entry.device.as_deref().unwrap_or(""),
            "{}",
            entry.message
        ),
    }
}

/// A structured-event logger instance bound to a (name, device) tuple.
pub struct EventLogger {
    #[allow(dead_code)]
    name: String,
    device: Option<String>,
    clock: Arc<SimulationClock>,
    store: Arc<StateStore>,
    ring: Mutex<VecDeque<AuditEntry>>,
    ring_capacity: usize,
}

impl EventLogger {
    fn new(
        name: String,
        device: Option<String>,
        clock: Arc<SimulationClock>,
        store: Arc<StateStore>,
        ring_capacity: usize,
    ) -> Self {
        Self {
            name,
            device,
            clock,
            store,
            ring: Mutex::new(VecDeque::with_capacity(ring_capacity.min(4096))),
            ring_capacity: ring_capacity.max(1),
        }
    }

    fn build_entry(
        &self,
        severity: Severity,
        category: Category,
        message: impl Into<String>,
        user: Option<String>,
        correlation_id: Option<String>,
        data: serde_json::Value,
    ) -> AuditEntry {
        AuditEntry {
            sim_time: self.clock.now(),
            wall_time: wall_time_now(),
            severity,
            category,
            message: message.into(),
            device: self.device.clone(),
            user,
            correlation_id,
            data,
        }
    }

    fn push_ring(&self, entry: AuditEntry) {
        let mut ring = self.ring.lock();
        if ring.len() >= self.ring_capacity {
            ring.pop_front();
        }
        ring.push_back(entry);
    }

    fn feeds_central_log(category: Category) -> bool {
        matches!(category, Category::Audit | Category::Alarm | Category::Security)
    }

    /// General entry point.
    pub fn log_event(
        &self,
        severity: Severity,
        category: Category,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        let entry = self.build_entry(severity, category, message, None, None, data);
        emit_tracing(&entry);
        if Self::feeds_central_log(category) {
            self.store.append_audit_event(entry.clone());
        }
        self.push_ring(entry);
    }

    /// `category = AUDIT`, stored in the ring and fed to the central audit log.
    pub fn log_audit(
        &self,
        message: impl Into<String>,
        user: Option<String>,
        action: &str,
        result: &str,
    ) {
        let data = serde_json::json!({ "action": action, "result": result });
        let entry = self.build_entry(Severity::Notice, Category::Audit, message, user, None, data);
        emit_tracing(&entry);
        self.store.append_audit_event(entry.clone());
        self.push_ring(entry);
    }

    /// `category = ALARM`; severity is derived from `priority` by a fixed mapping.
    pub fn log_alarm(
        &self,
        message: impl Into<String>,
        priority: AlarmPriority,
        state: AlarmState,
    ) {
        let data = serde_json::json!({ "alarm_priority": priority, "alarm_state": state });
        let entry = self.build_entry(priority.severity(), Category::Alarm, message, None, None, data);
        emit_tracing(&entry);
        self.store.append_audit_event(entry.clone());
        self.push_ring(entry);
    }

    /// `category = SECURITY`.
    pub fn log_security(&self, message: impl Into<String>, severity: Severity, source_ip: Option<String>) {
        let data = serde_json::json!({ "source_ip": source_ip });
        let entry = self.build_entry(severity, Category::Security, message, None, None, data);
        emit_tracing(&entry);
        self.store.append_audit_event(entry.clone());
        self.push_ring(entry);
    }

    /// In-memory ring read (does not consult the central store).
    pub fn get_audit_trail(&self, limit: usize, filter: &AuditFilter) -> Vec<AuditEntry> {
        let ring = self.ring.lock();
        let mut entries: Vec<AuditEntry> = ring
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect();
        entries.reverse();
        entries
    }
}

/// Cache of logger instances obtained by (name, device) tuple. Held on
/// the root context, not a process-wide singleton — see Design Notes.
pub struct LoggerRegistry {
    clock: Arc<SimulationClock>,
    store: Arc<StateStore>,
    ring_capacity: usize,
    loggers: Mutex<HashMap<(String, Option<String>), Arc<EventLogger>>>,
}

impl LoggerRegistry {
    pub fn new(clock: Arc<SimulationClock>, store: Arc<StateStore>) -> Arc<Self> {
        Self::with_ring_capacity(clock, store, DEFAULT_LOGGER_RING_CAPACITY)
    }

    pub fn with_ring_capacity(
        clock: Arc<SimulationClock>,
        store: Arc<StateStore>,
        ring_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            clock,
            store,
            ring_capacity,
            loggers: Mutex::new(HashMap::new()),
        })
    }

    pub fn get_logger(&self, name: &str, device: Option<&str>) -> Arc<EventLogger> {
        let key = (name.to_string(), device.map(|d| d.to_string()));
        let mut loggers = self.loggers.lock();
        loggers
            .entry(key)
            .or_insert_with(|| {
                Arc::new(EventLogger::new(
                    name.to_string(),
                    device.map(|d| d.to_string()),
                    Arc::clone(&self.clock),
                    Arc::clone(&self.store),
                    self.ring_capacity,
                ))
            })
            .clone()
    }

    /// Clear the instance cache. Deliberate operation for test reset.
    pub fn reset(&self) {
        self.loggers.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockMode;

    fn setup() -> (Arc<SimulationClock>, Arc<StateStore>) {
        (SimulationClock::new(ClockMode::Stepped, 1.0), StateStore::with_default_capacity())
    }

    #[tokio::test]
    async fn audit_entries_feed_central_log() {
        let (clock, store) = setup();
        let registry = LoggerRegistry::new(clock, store.clone());
        let logger = registry.get_logger("test", Some("turbine_1"));
        logger.log_audit("setpoint changed", Some("operator".into()), "set_setpoint", "ok");
        let central = store.get_audit_log(&AuditFilter::default(), 10);
        assert_eq!(central.len(), 1);
        assert_eq!(central[0].category, Category::Audit);
    }

    #[tokio::test]
    async fn non_audit_events_stay_local() {
        let (clock, store) = setup();
        let registry = LoggerRegistry::new(clock, store.clone());
        let logger = registry.get_logger("test", None);
        logger.log_event(Severity::Info, Category::Process, "tick", serde_json::Value::Null);
        assert_eq!(store.get_audit_log(&AuditFilter::default(), 10).len(), 0);
        assert_eq!(logger.get_audit_trail(10, &AuditFilter::default()).len(), 1);
    }

    #[tokio::test]
    async fn registry_caches_by_name_and_device() {
        let (clock, store) = setup();
        let registry = LoggerRegistry::new(clock, store);
        let a = registry.get_logger("x", Some("d1"));
        let b = registry.get_logger("x", Some("d1"));
        assert!(Arc::ptr_eq(&a, &b));
        registry.reset();
        let c = registry.get_logger("x", Some("d1"));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn alarm_priority_maps_to_fixed_severity() {
        let (clock, store) = setup();
        let registry = LoggerRegistry::new(clock, store.clone());
        let logger = registry.get_logger("alarms", Some("rtu_1"));
        logger.log_alarm("breaker trip", AlarmPriority::Critical, AlarmState::Active);
        let entries = store.get_audit_log(&AuditFilter::default(), 1);
        assert_eq!(entries[0].severity, Severity::Critical);
    }
}
