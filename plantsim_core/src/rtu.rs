//! Substation RTU: breakers and protection relays
//! watching the grid device's published frequency/voltage, with
//! report-by-exception telemetry (a deadband suppresses repeat
//! writes for an unchanged analog value).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use plantsim_common::error::SimResult;
use plantsim_common::memory::MemoryValue;
use plantsim_common::types::{AlarmPriority, AlarmState};
use plantsim_store::logger::EventLogger;
use plantsim_store::store::StateStore;
use serde::Serialize;
use tracing::info;

use crate::controller::{phase_error, ScanController, ScanStats};

/// ANSI device numbers, matching the relay library every vendor RTU
/// in this domain references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelayType {
    Overcurrent = 50,
    OvercurrentTime = 51,
    Undervoltage = 27,
    Overvoltage = 59,
    Underfrequency = 81,
    Differential = 87,
    Distance = 21,
    Recloser = 79,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Unknown,
    Open,
    Closed,
    Intermediate,
    Fault,
}

#[derive(Debug, Clone)]
pub struct ProtectionRelay {
    pub relay_id: String,
    pub relay_type: RelayType,
    pub description: String,
    pub pickup_value: f64,
    pub time_dial: f64,
    pub enabled: bool,
    pub tripped: bool,
    pub trip_count: u32,
    watched_channel: AnalogChannel,
    above_pickup: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnalogChannel {
    FrequencyHz,
    VoltagePu,
    CurrentA,
}

impl ProtectionRelay {
    pub fn new(relay_id: impl Into<String>, relay_type: RelayType, description: impl Into<String>, pickup_value: f64) -> Self {
        let watched_channel = match relay_type {
            RelayType::Undervoltage | RelayType::Overvoltage => AnalogChannel::VoltagePu,
            RelayType::Underfrequency => AnalogChannel::FrequencyHz,
            RelayType::Overcurrent
            | RelayType::OvercurrentTime
            | RelayType::Differential
            | RelayType::Distance
            | RelayType::Recloser => AnalogChannel::CurrentA,
        };
        Self {
            relay_id: relay_id.into(),
            relay_type,
            description: description.into(),
            pickup_value,
            time_dial: 0.1,
            enabled: true,
            tripped: false,
            trip_count: 0,
            watched_channel,
            above_pickup: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Breaker {
    pub breaker_id: String,
    pub description: String,
    pub state: BreakerState,
    pub rated_current: f64,
    pub rated_voltage: f64,
    pub fault_current: f64,
    pub operation_count: u32,
    pub last_trip_time: f64,
}

impl Breaker {
    pub fn new(breaker_id: impl Into<String>, description: impl Into<String>, rated_current: f64, rated_voltage: f64) -> Self {
        Self {
            breaker_id: breaker_id.into(),
            description: description.into(),
            state: BreakerState::Closed,
            rated_current,
            rated_voltage,
            fault_current: 0.0,
            operation_count: 0,
            last_trip_time: 0.0,
        }
    }
}

/// Nominal feeder line-to-line voltage used to convert aggregate load
/// (MW) into an approximate three-phase feeder current, in the absence
/// of a per-bus topology model.
const DEFAULT_FEEDER_VOLTAGE_KV: f64 = 138.0;
const SQRT_3: f64 = 1.732_050_808;

/// Approximate three-phase current from real power and per-unit voltage:
/// `I = P / (sqrt(3) * V_LL)`.
fn three_phase_current_a(power_mw: f64, voltage_pu: f64) -> f64 {
    let line_voltage_v = DEFAULT_FEEDER_VOLTAGE_KV * 1000.0 * voltage_pu.max(0.01);
    (power_mw.abs() * 1_000_000.0) / (SQRT_3 * line_voltage_v)
}

pub struct SubstationRtu {
    name: String,
    grid_device: String,
    store: Arc<StateStore>,
    logger: Arc<EventLogger>,
    stats: Arc<ScanStats>,
    breakers: HashMap<String, Breaker>,
    relays: HashMap<String, ProtectionRelay>,
    frequency_hz: f64,
    voltage_pu: f64,
    current_a: f64,
    last_reported: HashMap<String, f64>,
    deadband: f64,
}

impl SubstationRtu {
    pub fn new(name: impl Into<String>, grid_device: impl Into<String>, store: Arc<StateStore>, logger: Arc<EventLogger>) -> Self {
        Self {
            name: name.into(),
            grid_device: grid_device.into(),
            store,
            logger,
            stats: ScanStats::new(),
            breakers: HashMap::new(),
            relays: HashMap::new(),
            frequency_hz: 50.0,
            voltage_pu: 1.0,
            current_a: 0.0,
            last_reported: HashMap::new(),
            deadband: 0.01,
        }
    }

    pub fn add_breaker(&mut self, breaker: Breaker) {
        self.breakers.insert(breaker.breaker_id.clone(), breaker);
    }

    pub fn add_relay(&mut self, relay: ProtectionRelay) {
        self.relays.insert(relay.relay_id.clone(), relay);
    }

    pub fn breaker_state(&self, breaker_id: &str) -> Option<BreakerState> {
        self.breakers.get(breaker_id).map(|b| b.state)
    }

    pub fn any_relay_tripped(&self) -> bool {
        self.relays.values().any(|r| r.tripped)
    }

    /// No-op if the breaker is already open. Rejected if any relay is
    /// still latched tripped — use `reset_relay` first.
    pub fn close_breaker(&mut self, breaker_id: &str) -> bool {
        if self.any_relay_tripped() {
            return false;
        }
        let Some(breaker) = self.breakers.get_mut(breaker_id) else { return false };
        if breaker.state == BreakerState::Closed {
            return true;
        }
        breaker.state = BreakerState::Closed;
        breaker.operation_count += 1;
        self.logger.log_audit(
            format!("breaker {breaker_id} closed"),
            Some("operator".into()),
            "close_breaker",
            "ok",
        );
        true
    }

    /// No-op if the breaker is already open.
    pub fn trip_breaker(&mut self, breaker_id: &str, sim_time: f64) -> bool {
        let Some(breaker) = self.breakers.get_mut(breaker_id) else { return false };
        if breaker.state == BreakerState::Open {
            return true;
        }
        breaker.state = BreakerState::Open;
        breaker.operation_count += 1;
        breaker.last_trip_time = sim_time;
        true
    }

    pub fn reset_relay(&mut self, relay_id: &str) {
        if let Some(relay) = self.relays.get_mut(relay_id) {
            relay.tripped = false;
            relay.above_pickup = false;
            self.logger.log_audit(
                format!("relay {relay_id} reset"),
                Some("operator".into()),
                "reset_relay",
                "ok",
            );
        }
    }

    fn trip_all_closed_breakers(&mut self, sim_time: f64) {
        let ids: Vec<String> = self.breakers.values().filter(|b| b.state == BreakerState::Closed).map(|b| b.breaker_id.clone()).collect();
        for id in ids {
            self.trip_breaker(&id, sim_time);
        }
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "frequency_hz": self.frequency_hz,
            "voltage_pu": self.voltage_pu,
            "current_a": self.current_a.round(),
            "any_relay_tripped": self.any_relay_tripped(),
            "breakers": self.breakers.values().map(|b| serde_json::json!({
                "breaker_id": b.breaker_id,
                "state": format!("{:?}", b.state),
                "operation_count": b.operation_count,
                "fault_current_a": b.fault_current.round(),
            })).collect::<Vec<_>>(),
            "scan": self.stats.status(),
        })
    }
}

#[async_trait]
impl ScanController for SubstationRtu {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    async fn read_inputs(&mut self) -> SimResult<()> {
        let snapshot = self
            .store
            .get_device_state(&self.grid_device)
            .await
            .ok_or_else(|| phase_error("read_inputs", "grid device not registered"))?;

        self.frequency_hz = snapshot.memory.get("holding_registers[0]").and_then(|v| v.as_f64()).unwrap_or(50_000.0) / 1000.0;
        self.voltage_pu = snapshot.memory.get("holding_registers[1]").and_then(|v| v.as_f64()).unwrap_or(1_000.0) / 1000.0;

        let total_load_mw = snapshot.memory.get("holding_registers[3]").and_then(|v| v.as_f64()).unwrap_or(0.0);
        self.current_a = three_phase_current_a(total_load_mw, self.voltage_pu);
        for breaker in self.breakers.values_mut() {
            breaker.fault_current = if breaker.state == BreakerState::Closed { self.current_a } else { 0.0 };
        }
        Ok(())
    }

    async fn execute_logic(&mut self) -> SimResult<()> {
        let frequency_hz = self.frequency_hz;
        let voltage_pu = self.voltage_pu;
        let current_a = self.current_a;
        let mut any_new_trip = false;

        for relay in self.relays.values_mut() {
            if !relay.enabled {
                continue;
            }
            let value = match relay.watched_channel {
                AnalogChannel::FrequencyHz => frequency_hz,
                AnalogChannel::VoltagePu => voltage_pu,
                AnalogChannel::CurrentA => current_a,
            };
            // Over-quantity relays (voltage, current magnitude) trip
            // above the pickup; under-quantity relays (voltage sag,
            // underfrequency, distance reach) trip below it.
            let is_over = matches!(
                relay.relay_type,
                RelayType::Overvoltage | RelayType::Overcurrent | RelayType::OvercurrentTime | RelayType::Differential | RelayType::Recloser
            );
            let exceeded = if is_over { value > relay.pickup_value } else { value < relay.pickup_value };

            if exceeded && !relay.above_pickup {
                relay.above_pickup = true;
                if !relay.tripped {
                    relay.tripped = true;
                    relay.trip_count += 1;
                    any_new_trip = true;
                    info!(rtu = %self.name, relay = %relay.relay_id, "protection relay tripped");
                }
            } else if !exceeded {
                relay.above_pickup = false;
            }
        }

        if any_new_trip {
            self.logger.log_alarm("substation RTU protection relay tripped", AlarmPriority::Critical, AlarmState::Active);
            let sim_time = self.stats.last_scan_time();
            self.trip_all_closed_breakers(sim_time);
        }
        Ok(())
    }

    async fn write_outputs(&mut self) -> SimResult<()> {
        let mut telemetry: Vec<(String, MemoryValue)> = Vec::new();

        for (channel, value) in [("frequency_hz", self.frequency_hz), ("voltage_pu", self.voltage_pu)] {
            let changed = match self.last_reported.get(channel) {
                Some(prev) => (prev - value).abs() > self.deadband,
                None => true,
            };
            if changed {
                self.last_reported.insert(channel.to_string(), value);
                let index = if channel == "frequency_hz" { 0 } else { 1 };
                telemetry.push((format!("holding_registers[{index}]"), MemoryValue::F64(value)));
            }
        }
        for (i, breaker) in self.breakers.values().enumerate() {
            telemetry.push((format!("coils[{i}]"), MemoryValue::Bool(breaker.state == BreakerState::Closed)));
        }

        if telemetry.is_empty() {
            return Ok(());
        }
        self.store.bulk_write_memory(&self.name, telemetry).await.map_err(|e| phase_error("write_outputs", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_common::types::{DeviceKind, Protocol};
    use plantsim_store::clock::{ClockMode, SimulationClock};
    use plantsim_store::logger::LoggerRegistry;
    use std::collections::HashSet;

    async fn make_rtu() -> SubstationRtu {
        let store = StateStore::with_default_capacity();
        store
            .register_device("grid_1", DeviceKind::SubstationRtu, 1, HashSet::from([Protocol::Dnp3]), Default::default(), 0.0)
            .await
            .unwrap();
        store
            .register_device("rtu_1", DeviceKind::SubstationRtu, 2, HashSet::from([Protocol::Dnp3]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let logger = LoggerRegistry::new(clock, store.clone()).get_logger("rtu", Some("rtu_1"));
        let mut rtu = SubstationRtu::new("rtu_1", "grid_1", store, logger);
        rtu.add_breaker(Breaker::new("CB-1", "feeder breaker", 800.0, 138.0));
        rtu.add_relay(ProtectionRelay::new("R-27", RelayType::Undervoltage, "undervoltage", 0.9));
        rtu
    }

    #[tokio::test]
    async fn overcurrent_relay_watches_aggregate_load_current() {
        let mut rtu = make_rtu().await;
        rtu.add_relay(ProtectionRelay::new("R-50", RelayType::Overcurrent, "feeder overcurrent", 1000.0));
        rtu.store
            .bulk_write_memory(
                "grid_1",
                vec![
                    ("holding_registers[1]".into(), MemoryValue::I32(1000)),
                    ("holding_registers[3]".into(), MemoryValue::I32(800)),
                ],
            )
            .await
            .unwrap();
        rtu.read_inputs().await.unwrap();
        rtu.execute_logic().await.unwrap();

        assert!(rtu.relays["R-50"].tripped);
        assert!(rtu.breakers["CB-1"].fault_current > 1000.0);
    }

    #[tokio::test]
    async fn trip_opens_all_closed_breakers_and_blocks_close() {
        let mut rtu = make_rtu().await;
        rtu.store.bulk_write_memory("grid_1", vec![("holding_registers[1]".into(), MemoryValue::I32(700))]).await.unwrap();
        rtu.read_inputs().await.unwrap();
        rtu.execute_logic().await.unwrap();
        assert_eq!(rtu.breaker_state("CB-1"), Some(BreakerState::Open));
        assert!(!rtu.close_breaker("CB-1"));

        rtu.reset_relay("R-27");
        assert!(rtu.close_breaker("CB-1"));
    }

    #[tokio::test]
    async fn close_and_trip_are_noops_already_in_target_state() {
        let mut rtu = make_rtu().await;
        assert!(rtu.close_breaker("CB-1"));
        assert_eq!(rtu.breakers.get("CB-1").unwrap().operation_count, 0);
        assert!(rtu.trip_breaker("CB-1", 1.0));
        assert_eq!(rtu.breakers.get("CB-1").unwrap().operation_count, 1);
        assert!(rtu.trip_breaker("CB-1", 2.0));
        assert_eq!(rtu.breakers.get("CB-1").unwrap().operation_count, 1);
    }
}
