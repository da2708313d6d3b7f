//! Turbine-governor PLC: vendor Modbus map for the
//! turbine physics device.
//!
//! Memory map (local to this controller, distinct from the physics
//! device's own `holding_registers[0-7]`/`coils[0-4]` telemetry
//! convention):
//!
//! - `discrete_inputs[0]` turbine running
//! - `discrete_inputs[1]` governor online (commanded, mirrored locally)
//! - `discrete_inputs[2]` trip active (commanded, mirrored locally)
//! - `discrete_inputs[3]` overspeed alarm (mirrored only; the
//!   overspeed trip itself is voted and latched by
//!   [`crate::safety::TurbineSafetyController`], not this PLC)
//! - `discrete_inputs[4]` high vibration alarm
//! - `discrete_inputs[5]` high bearing temperature alarm
//! - `input_registers[100-107]` mirrored telemetry (speed, steam temp,
//!   steam pressure, bearing temp, vibration x10, power, overspeed
//!   time, damage pct)
//! - `coils[0]` governor enabled (commanded)
//! - `coils[1]` emergency trip (commanded)
//! - `coils[2]` trip reset request (rising edge consumed each scan)
//! - `holding_registers[200]`/`[201]` speed setpoint, low/high words

use std::sync::Arc;

use async_trait::async_trait;
use plantsim_common::error::SimResult;
use plantsim_common::memory::{join_u32, split_u32};
use plantsim_store::logger::EventLogger;
use plantsim_store::store::StateStore;
use plantsim_common::types::{AlarmPriority, AlarmState};

use crate::controller::{phase_error, EdgeDetector, ScanController, ScanStats};

#[derive(Debug, Clone, Default)]
struct LocalMap {
    discrete_inputs: [bool; 6],
    input_registers: [i32; 8],
    coils: [bool; 3],
    holding_registers: [u16; 2],
}

pub struct TurbinePlc {
    name: String,
    physics_device: String,
    rated_speed_rpm: f64,
    store: Arc<StateStore>,
    logger: Arc<EventLogger>,
    stats: Arc<ScanStats>,
    map: LocalMap,
    pending_speed_setpoint_rpm: f64,
    pending_governor_enabled: bool,
    pending_trip: bool,
    trip_reset_edge: EdgeDetector,
}

impl TurbinePlc {
    pub fn new(
        name: impl Into<String>,
        physics_device: impl Into<String>,
        rated_speed_rpm: f64,
        store: Arc<StateStore>,
        logger: Arc<EventLogger>,
    ) -> Self {
        Self {
            name: name.into(),
            physics_device: physics_device.into(),
            rated_speed_rpm,
            store,
            logger,
            stats: ScanStats::new(),
            map: LocalMap::default(),
            pending_speed_setpoint_rpm: 0.0,
            pending_governor_enabled: false,
            pending_trip: false,
            trip_reset_edge: EdgeDetector::default(),
        }
    }

    /// Operator command: commit a new speed setpoint for the next scan.
    pub fn set_speed_command(&mut self, rpm: f64) {
        self.pending_speed_setpoint_rpm = rpm.max(0.0);
        let (lo, hi) = split_u32(self.pending_speed_setpoint_rpm.round() as u32);
        self.map.holding_registers = [lo, hi];
        self.logger.log_audit(
            format!("turbine speed setpoint commanded to {rpm:.1} rpm"),
            Some("operator".into()),
            "set_speed_command",
            "ok",
        );
    }

    pub fn enable_governor(&mut self, enabled: bool) {
        self.pending_governor_enabled = enabled;
        self.logger.log_audit(
            format!("turbine governor {}", if enabled { "enabled" } else { "disabled" }),
            Some("operator".into()),
            "enable_governor",
            "ok",
        );
    }

    /// Latches an emergency trip; cleared only by `reset_trip_command`.
    pub fn trigger_trip(&mut self) {
        self.pending_trip = true;
        self.map.coils[2] = false;
        self.logger.log_alarm("turbine emergency trip commanded", AlarmPriority::High, AlarmState::Active);
    }

    /// Requests a trip reset. Takes effect on the next scan's rising
    /// edge, and only while the mirrored shaft speed is already below
    /// rated (the PLC has no direct view of the engine's own
    /// precondition, only of the telemetry it mirrors).
    pub fn reset_trip_command(&mut self) {
        self.map.coils[2] = true;
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "running": self.map.discrete_inputs[0],
            "governor_online": self.map.discrete_inputs[1],
            "trip_active": self.map.discrete_inputs[2],
            "overspeed_alarm": self.map.discrete_inputs[3],
            "high_vibration_alarm": self.map.discrete_inputs[4],
            "high_bearing_temp_alarm": self.map.discrete_inputs[5],
            "shaft_speed_rpm": self.map.input_registers[0],
            "power_output_mw": self.map.input_registers[5],
            "scan": self.stats.status(),
        })
    }
}

#[async_trait]
impl ScanController for TurbinePlc {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    async fn read_inputs(&mut self) -> SimResult<()> {
        let snapshot = self
            .store
            .get_device_state(&self.physics_device)
            .await
            .ok_or_else(|| phase_error("read_inputs", "physics device not registered"))?;

        let get = |key: &str| snapshot.memory.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);
        let get_bool = |key: &str| snapshot.memory.get(key).and_then(|v| v.as_bool()).unwrap_or(false);

        self.map.input_registers = [
            get("holding_registers[0]") as i32,
            get("holding_registers[1]") as i32,
            get("holding_registers[2]") as i32,
            get("holding_registers[3]") as i32,
            get("holding_registers[4]") as i32,
            get("holding_registers[5]") as i32,
            get("holding_registers[6]") as i32,
            get("holding_registers[7]") as i32,
        ];
        self.map.discrete_inputs[0] = get_bool("coils[0]");
        self.map.discrete_inputs[3] = get_bool("coils[1]");
        self.map.discrete_inputs[4] = get_bool("coils[2]");
        self.map.discrete_inputs[5] = get_bool("coils[3]");
        Ok(())
    }

    async fn execute_logic(&mut self) -> SimResult<()> {
        let shaft_speed_rpm = self.map.input_registers[0] as f64;

        if self.trip_reset_edge.rising_edge(self.map.coils[2]) {
            if shaft_speed_rpm < self.rated_speed_rpm {
                self.pending_trip = false;
                self.logger.log_audit("turbine trip reset", Some("operator".into()), "reset_trip", "ok");
            } else {
                self.logger.log_event(
                    plantsim_common::types::Severity::Warning,
                    plantsim_common::types::Category::Process,
                    "turbine trip reset rejected: shaft speed still above rated",
                    serde_json::json!({ "shaft_speed_rpm": shaft_speed_rpm }),
                );
            }
        }
        self.map.coils[2] = false;
        self.trip_reset_edge.rising_edge(false);

        self.map.coils[0] = self.pending_governor_enabled && !self.pending_trip;
        self.map.coils[1] = self.pending_trip;
        self.map.discrete_inputs[1] = self.map.coils[0];
        self.map.discrete_inputs[2] = self.map.coils[1];
        Ok(())
    }

    async fn write_outputs(&mut self) -> SimResult<()> {
        let (lo, hi) = (self.map.holding_registers[0], self.map.holding_registers[1]);
        let setpoint_rpm = join_u32(lo, hi) as f64;

        use plantsim_common::memory::MemoryValue;
        self.store
            .bulk_write_memory(
                &self.physics_device,
                vec![
                    ("holding_registers[10]".into(), MemoryValue::F64(setpoint_rpm)),
                    ("coils[10]".into(), MemoryValue::Bool(self.map.coils[0])),
                    ("coils[11]".into(), MemoryValue::Bool(self.map.coils[1])),
                ],
            )
            .await
            .map_err(|e| phase_error("write_outputs", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_common::memory::MemoryValue;
    use plantsim_common::types::{DeviceKind, Protocol};
    use plantsim_store::clock::{ClockMode, SimulationClock};
    use plantsim_store::logger::LoggerRegistry;
    use std::collections::HashSet;

    async fn make_plc() -> TurbinePlc {
        let store = StateStore::with_default_capacity();
        store
            .register_device("turbine_1", DeviceKind::TurbinePlc, 1, HashSet::from([Protocol::ModbusTcp]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let logger = LoggerRegistry::new(clock, store.clone()).get_logger("turbine_plc", Some("turbine_1"));
        TurbinePlc::new("turbine_1_plc", "turbine_1", 3600.0, store, logger)
    }

    #[tokio::test]
    async fn mirrors_physics_telemetry_read_only() {
        let mut plc = make_plc().await;
        plc.store
            .bulk_write_memory(
                "turbine_1",
                vec![("holding_registers[0]".into(), MemoryValue::I32(3600)), ("coils[0]".into(), MemoryValue::Bool(true))],
            )
            .await
            .unwrap();
        plc.read_inputs().await.unwrap();
        assert_eq!(plc.map.input_registers[0], 3600);
        assert!(plc.map.discrete_inputs[0]);
    }

    #[tokio::test]
    async fn commanded_setpoint_commits_to_physics_control_registers() {
        let mut plc = make_plc().await;
        plc.set_speed_command(3600.0);
        plc.enable_governor(true);
        plc.read_inputs().await.unwrap();
        plc.execute_logic().await.unwrap();
        plc.write_outputs().await.unwrap();

        let setpoint = plc.store.read_memory("turbine_1", "holding_registers[10]").await.unwrap();
        assert_eq!(setpoint.as_f64(), Some(3600.0));
        let governor = plc.store.read_memory("turbine_1", "coils[10]").await.unwrap();
        assert_eq!(governor.as_bool(), Some(true));
    }

    #[tokio::test]
    async fn trip_latches_until_reset_below_rated_speed() {
        let mut plc = make_plc().await;
        plc.trigger_trip();
        plc.read_inputs().await.unwrap();
        plc.execute_logic().await.unwrap();
        assert!(plc.map.coils[1]);

        plc.map.input_registers[0] = 4000;
        plc.reset_trip_command();
        plc.execute_logic().await.unwrap();
        assert!(plc.map.coils[1], "reset must be rejected above rated speed");

        plc.map.input_registers[0] = 100;
        plc.reset_trip_command();
        plc.execute_logic().await.unwrap();
        assert!(!plc.map.coils[1]);
    }
}
