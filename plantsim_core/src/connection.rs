//! Connection / audit registry: tracks every open
//! session against the simulated plant, independent of which protocol
//! carried it. A security event is logged on every open, close, and
//! kill.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use plantsim_common::consts::DEFAULT_CONNECTION_HISTORY_CAPACITY;
use plantsim_common::types::Severity;
use plantsim_store::logger::EventLogger;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ActiveConnection {
    pub session_id: String,
    pub source_ip: String,
    pub protocol: String,
    pub device: String,
    pub connected_at: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosedConnection {
    pub session_id: String,
    pub source_ip: String,
    pub protocol: String,
    pub device: String,
    pub connected_at: f64,
    pub closed_at: f64,
    pub reason: String,
}

pub struct ConnectionRegistry {
    logger: Arc<EventLogger>,
    next_id: AtomicU64,
    active: RwLock<HashMap<String, ActiveConnection>>,
    history: RwLock<VecDeque<ClosedConnection>>,
    history_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(logger: Arc<EventLogger>) -> Arc<Self> {
        Self::with_history_capacity(logger, DEFAULT_CONNECTION_HISTORY_CAPACITY)
    }

    pub fn with_history_capacity(logger: Arc<EventLogger>, history_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            logger,
            next_id: AtomicU64::new(1),
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            history_capacity,
        })
    }

    /// Opens a session and returns its opaque id.
    pub fn connect(&self, source_ip: impl Into<String>, protocol: impl Into<String>, device: impl Into<String>, sim_time: f64) -> String {
        let session_id = format!("conn-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let source_ip = source_ip.into();
        let connection = ActiveConnection {
            session_id: session_id.clone(),
            source_ip: source_ip.clone(),
            protocol: protocol.into(),
            device: device.into(),
            connected_at: sim_time,
        };
        self.logger.log_security(
            format!("connection {session_id} opened from {source_ip}"),
            Severity::Info,
            Some(source_ip),
        );
        self.active.write().insert(session_id.clone(), connection);
        session_id
    }

    pub fn disconnect(&self, session_id: &str, sim_time: f64) -> bool {
        self.close(session_id, sim_time, "client disconnect")
    }

    /// Operator-initiated forced close, distinct from a normal
    /// `disconnect` only in its logged reason.
    pub fn kill_connection(&self, session_id: &str, sim_time: f64) -> bool {
        self.close(session_id, sim_time, "killed by operator")
    }

    fn close(&self, session_id: &str, sim_time: f64, reason: &str) -> bool {
        let Some(connection) = self.active.write().remove(session_id) else { return false };
        self.logger.log_security(
            format!("connection {session_id} closed: {reason}"),
            Severity::Info,
            Some(connection.source_ip.clone()),
        );
        let mut history = self.history.write();
        history.push_back(ClosedConnection {
            session_id: connection.session_id,
            source_ip: connection.source_ip,
            protocol: connection.protocol,
            device: connection.device,
            connected_at: connection.connected_at,
            closed_at: sim_time,
            reason: reason.to_string(),
        });
        if history.len() > self.history_capacity {
            history.pop_front();
        }
        true
    }

    pub fn get_active(&self) -> Vec<ActiveConnection> {
        self.active.read().values().cloned().collect()
    }

    pub fn get_history(&self, limit: usize) -> Vec<ClosedConnection> {
        self.history.read().iter().rev().take(limit).cloned().collect()
    }

    /// Deliberate operation for test reset.
    pub fn reset(&self) {
        self.active.write().clear();
        self.history.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_store::clock::{ClockMode, SimulationClock};
    use plantsim_store::logger::LoggerRegistry;
    use plantsim_store::store::StateStore;

    fn make_registry() -> Arc<ConnectionRegistry> {
        let store = StateStore::with_default_capacity();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let logger = LoggerRegistry::new(clock, store).get_logger("connections", None);
        ConnectionRegistry::new(logger)
    }

    #[test]
    fn session_ids_are_unique_and_opaque() {
        let registry = make_registry();
        let a = registry.connect("10.0.0.1", "modbus", "turbine_1", 0.0);
        let b = registry.connect("10.0.0.2", "modbus", "turbine_1", 0.0);
        assert_ne!(a, b);
        assert_eq!(registry.get_active().len(), 2);
    }

    #[test]
    fn disconnect_moves_session_from_active_to_history() {
        let registry = make_registry();
        let session_id = registry.connect("10.0.0.1", "modbus", "turbine_1", 0.0);
        assert!(registry.disconnect(&session_id, 5.0));
        assert!(registry.get_active().is_empty());
        assert_eq!(registry.get_history(10).len(), 1);
    }

    #[test]
    fn kill_connection_records_distinct_reason() {
        let registry = make_registry();
        let session_id = registry.connect("10.0.0.1", "modbus", "turbine_1", 0.0);
        assert!(registry.kill_connection(&session_id, 5.0));
        let history = registry.get_history(1);
        assert_eq!(history[0].reason, "killed by operator");
    }

    #[test]
    fn history_is_bounded() {
        let store = StateStore::with_default_capacity();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let logger = LoggerRegistry::new(clock, store).get_logger("connections", None);
        let registry = ConnectionRegistry::with_history_capacity(logger, 2);
        for i in 0..5 {
            let session_id = registry.connect("10.0.0.1", "modbus", "turbine_1", i as f64);
            registry.disconnect(&session_id, i as f64 + 1.0);
        }
        assert_eq!(registry.get_history(10).len(), 2);
    }
}
