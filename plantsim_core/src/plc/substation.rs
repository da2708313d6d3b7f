//! Substation PLC: breaker control and protection
//! trip logic over a shared grid frequency/voltage feed, exposed
//! simultaneously under a Modbus map and an IEC-104 point map. Unlike
//! the turbine/reactor/HVAC PLCs, there is no separate physics device
//! to mirror — this controller owns its own telemetry the way the
//! physics engines do, deriving it from the grid device's published
//! frequency/voltage and its own breaker/protection state.
//!
//! Modbus map:
//! - `holding_registers[0-2]` phase voltages kV x10
//! - `holding_registers[3-5]` phase currents A x10
//! - `holding_registers[6]` frequency Hz x100
//! - `holding_registers[7]` active power MW x10
//! - `holding_registers[8]` reactive power MVAR x10
//! - `holding_registers[9]` trip count
//! - `coils[0]` breaker closed, `coils[1]` any protection trip latched
//! - `coils[10]` close command, `coils[11]` trip command
//! - `coils[12]` manual control enable, `coils[13]` protection reset command
//!
//! IEC-104 projection (informational): single-points at
//! IOA 100 (breaker closed), 110-114 (the five protection trips);
//! measured values at IOA 200-208 mirroring the same nine holding
//! registers above.

use std::sync::Arc;

use async_trait::async_trait;
use plantsim_common::error::SimResult;
use plantsim_common::memory::MemoryValue;
use plantsim_common::types::{AlarmPriority, AlarmState};
use plantsim_store::logger::EventLogger;
use plantsim_store::store::StateStore;

use crate::controller::{phase_error, EdgeDetector, ScanController, ScanStats};

#[derive(Debug, Clone)]
pub struct SubstationParameters {
    pub rated_voltage_kv: f64,
    pub rated_current_a: f64,
}

impl Default for SubstationParameters {
    fn default() -> Self {
        Self { rated_voltage_kv: 138.0, rated_current_a: 800.0 }
    }
}

#[derive(Debug, Clone, Default)]
struct Measurements {
    voltage_kv: [f64; 3],
    current_a: [f64; 3],
    frequency_hz: f64,
    active_power_mw: f64,
    reactive_power_mvar: f64,
}

#[derive(Debug, Clone, Default)]
struct Protection {
    overcurrent_trip: bool,
    undervoltage_trip: bool,
    overvoltage_trip: bool,
    underfrequency_trip: bool,
    overfrequency_trip: bool,
}

impl Protection {
    fn any(&self) -> bool {
        self.overcurrent_trip || self.undervoltage_trip || self.overvoltage_trip || self.underfrequency_trip || self.overfrequency_trip
    }
}

pub struct SubstationPlc {
    name: String,
    grid_device: String,
    params: SubstationParameters,
    store: Arc<StateStore>,
    logger: Arc<EventLogger>,
    stats: Arc<ScanStats>,
    measurements: Measurements,
    protection: Protection,
    breaker_closed: bool,
    manual_control_enabled: bool,
    trip_count: u32,
    pending_close: bool,
    pending_trip: bool,
    pending_protection_reset: bool,
    close_edge: EdgeDetector,
    trip_edge: EdgeDetector,
    reset_edge: EdgeDetector,
}

impl SubstationPlc {
    pub fn new(
        name: impl Into<String>,
        grid_device: impl Into<String>,
        params: SubstationParameters,
        store: Arc<StateStore>,
        logger: Arc<EventLogger>,
    ) -> Self {
        Self {
            name: name.into(),
            grid_device: grid_device.into(),
            params,
            store,
            logger,
            stats: ScanStats::new(),
            measurements: Measurements::default(),
            protection: Protection::default(),
            breaker_closed: true,
            manual_control_enabled: false,
            trip_count: 0,
            pending_close: false,
            pending_trip: false,
            pending_protection_reset: false,
            close_edge: EdgeDetector::default(),
            trip_edge: EdgeDetector::default(),
            reset_edge: EdgeDetector::default(),
        }
    }

    pub fn close_breaker(&mut self) {
        self.pending_close = true;
    }

    pub fn trip_breaker(&mut self) {
        self.pending_trip = true;
    }

    pub fn set_manual_control(&mut self, enabled: bool) {
        self.manual_control_enabled = enabled;
    }

    pub fn reset_protection(&mut self) {
        self.pending_protection_reset = true;
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "breaker_closed": self.breaker_closed,
            "protection_trip": self.protection.any(),
            "trip_count": self.trip_count,
            "iec104": {
                "single_points": {
                    "100": self.breaker_closed,
                    "110": self.protection.overcurrent_trip,
                    "111": self.protection.undervoltage_trip,
                    "112": self.protection.overvoltage_trip,
                    "113": self.protection.underfrequency_trip,
                    "114": self.protection.overfrequency_trip,
                },
                "measured_values": {
                    "200": self.measurements.voltage_kv[0],
                    "201": self.measurements.voltage_kv[1],
                    "202": self.measurements.voltage_kv[2],
                    "203": self.measurements.current_a[0],
                    "204": self.measurements.current_a[1],
                    "205": self.measurements.current_a[2],
                    "206": self.measurements.frequency_hz,
                    "207": self.measurements.active_power_mw,
                    "208": self.measurements.reactive_power_mvar,
                },
            },
            "scan": self.stats.status(),
        })
    }
}

#[async_trait]
impl ScanController for SubstationPlc {
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

        let get = |key: &str| snapshot.memory.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);
        let frequency_hz = get("holding_registers[0]") / 1000.0;
        let voltage_pu = get("holding_registers[1]") / 1000.0;
        let active_power_mw = get("holding_registers[2]");

        let voltage_kv = voltage_pu * self.params.rated_voltage_kv;
        let current_a = if voltage_kv > 1.0 { (active_power_mw * 1000.0) / (voltage_kv * 1.732) } else { 0.0 };

        self.measurements = Measurements {
            voltage_kv: [voltage_kv; 3],
            current_a: [current_a; 3],
            frequency_hz,
            active_power_mw,
            reactive_power_mvar: active_power_mw * 0.2,
        };
        Ok(())
    }

    async fn execute_logic(&mut self) -> SimResult<()> {
        let m = &self.measurements;
        let rated_v = self.params.rated_voltage_kv;
        let rated_i = self.params.rated_current_a;

        self.protection.undervoltage_trip = m.voltage_kv[0] < rated_v * 0.9;
        self.protection.overvoltage_trip = m.voltage_kv[0] > rated_v * 1.1;
        self.protection.overcurrent_trip = m.current_a.iter().any(|&i| i > rated_i * 1.2);
        self.protection.underfrequency_trip = m.frequency_hz < 49.0;
        self.protection.overfrequency_trip = m.frequency_hz > 51.0;

        if self.reset_edge.rising_edge(self.pending_protection_reset) {
            self.protection = Protection::default();
            self.logger.log_audit("substation protection reset", Some("operator".into()), "reset_protection", "ok");
        }
        self.pending_protection_reset = false;
        self.reset_edge.rising_edge(false);

        if self.protection.any() && self.breaker_closed {
            self.breaker_closed = false;
            self.trip_count += 1;
            self.logger.log_alarm("substation breaker tripped on protection", AlarmPriority::High, AlarmState::Active);
        }

        if self.trip_edge.rising_edge(self.pending_trip) && self.breaker_closed {
            self.breaker_closed = false;
            self.trip_count += 1;
            self.logger.log_audit("substation breaker tripped manually", Some("operator".into()), "trip_breaker", "ok");
        }
        self.pending_trip = false;
        self.trip_edge.rising_edge(false);

        if self.close_edge.rising_edge(self.pending_close) {
            if self.protection.any() {
                self.logger.log_event(
                    plantsim_common::types::Severity::Warning,
                    plantsim_common::types::Category::Process,
                    "substation breaker close rejected: protection still latched",
                    serde_json::Value::Null,
                );
            } else {
                self.breaker_closed = true;
                self.logger.log_audit("substation breaker closed", Some("operator".into()), "close_breaker", "ok");
            }
        }
        self.pending_close = false;
        self.close_edge.rising_edge(false);
        Ok(())
    }

    async fn write_outputs(&mut self) -> SimResult<()> {
        let m = &self.measurements;
        let telemetry: Vec<(String, MemoryValue)> = vec![
            ("holding_registers[0]".into(), MemoryValue::I32((m.voltage_kv[0] * 10.0) as i32)),
            ("holding_registers[1]".into(), MemoryValue::I32((m.voltage_kv[1] * 10.0) as i32)),
            ("holding_registers[2]".into(), MemoryValue::I32((m.voltage_kv[2] * 10.0) as i32)),
            ("holding_registers[3]".into(), MemoryValue::I32((m.current_a[0] * 10.0) as i32)),
            ("holding_registers[4]".into(), MemoryValue::I32((m.current_a[1] * 10.0) as i32)),
            ("holding_registers[5]".into(), MemoryValue::I32((m.current_a[2] * 10.0) as i32)),
            ("holding_registers[6]".into(), MemoryValue::I32((m.frequency_hz * 100.0) as i32)),
            ("holding_registers[7]".into(), MemoryValue::I32((m.active_power_mw * 10.0) as i32)),
            ("holding_registers[8]".into(), MemoryValue::I32((m.reactive_power_mvar * 10.0) as i32)),
            ("holding_registers[9]".into(), MemoryValue::I32(self.trip_count as i32)),
            ("coils[0]".into(), MemoryValue::Bool(self.breaker_closed)),
            ("coils[1]".into(), MemoryValue::Bool(self.protection.any())),
        ];
        self.store.bulk_write_memory(&self.name, telemetry).await.map_err(|e| phase_error("write_outputs", e))
    }
}
