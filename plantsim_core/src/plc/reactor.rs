//! Reactor-control PLC: vendor Modbus map for the
//! reactor physics device.
//!
//! - `discrete_inputs[0]` reactor active
//! - `discrete_inputs[1]` over-temperature alarm
//! - `discrete_inputs[2]` over-pressure alarm
//! - `discrete_inputs[3]` instability alarm
//! - `discrete_inputs[4]` containment alarm
//! - `discrete_inputs[5]` SCRAM active
//! - `input_registers[100-109]` mirrored telemetry (core temp, coolant
//!   temp, pressure x10, power x10, stability x100, reaction rate x100,
//!   coolant flow x100, containment x100, overtemp time, damage pct)
//! - `coils[0]` SCRAM commanded, `coils[1]` stability dampener commanded,
//!   `coils[2]` SCRAM reset request (rising edge, consumed each scan)
//! - `holding_registers[200]`/`[201]` power setpoint percent x100, low/high
//! - `holding_registers[202]`/`[203]` coolant pump speed percent x100
//! - `holding_registers[204]`/`[205]` control rod position percent x100

use std::sync::Arc;

use async_trait::async_trait;
use plantsim_common::error::SimResult;
use plantsim_common::memory::{join_u32, split_u32, MemoryValue};
use plantsim_common::types::{AlarmPriority, AlarmState, Category, Severity};
use plantsim_store::logger::EventLogger;
use plantsim_store::store::StateStore;

use crate::controller::{phase_error, EdgeDetector, ScanController, ScanStats};

#[derive(Debug, Clone, Default)]
struct LocalMap {
    discrete_inputs: [bool; 6],
    input_registers: [i32; 10],
    coils: [bool; 3],
    holding_registers: [u16; 6],
}

pub struct ReactorPlc {
    name: String,
    physics_device: String,
    rated_temperature_c: f64,
    store: Arc<StateStore>,
    logger: Arc<EventLogger>,
    stats: Arc<ScanStats>,
    map: LocalMap,
    pending_power_setpoint_percent: f64,
    pending_coolant_pump_percent: f64,
    pending_control_rods_percent: f64,
    pending_dampener_enabled: bool,
    pending_scram: bool,
    scram_reset_edge: EdgeDetector,
}

impl ReactorPlc {
    pub fn new(
        name: impl Into<String>,
        physics_device: impl Into<String>,
        rated_temperature_c: f64,
        store: Arc<StateStore>,
        logger: Arc<EventLogger>,
    ) -> Self {
        Self {
            name: name.into(),
            physics_device: physics_device.into(),
            rated_temperature_c,
            store,
            logger,
            stats: ScanStats::new(),
            map: LocalMap::default(),
            pending_power_setpoint_percent: 0.0,
            pending_coolant_pump_percent: 0.0,
            pending_control_rods_percent: 100.0,
            pending_dampener_enabled: true,
            pending_scram: false,
            scram_reset_edge: EdgeDetector::default(),
        }
    }

    pub fn set_power_command(&mut self, percent: f64) {
        self.pending_power_setpoint_percent = percent.clamp(0.0, 100.0);
        let (lo, hi) = split_u32((self.pending_power_setpoint_percent * 100.0) as u32);
        self.map.holding_registers[0] = lo;
        self.map.holding_registers[1] = hi;
        self.logger.log_audit(
            format!("reactor power setpoint commanded to {percent:.1}%"),
            Some("operator".into()),
            "set_power_command",
            "ok",
        );
    }

    pub fn set_coolant_pump_command(&mut self, percent: f64) {
        self.pending_coolant_pump_percent = percent.clamp(0.0, 100.0);
        let (lo, hi) = split_u32((self.pending_coolant_pump_percent * 100.0) as u32);
        self.map.holding_registers[2] = lo;
        self.map.holding_registers[3] = hi;
    }

    pub fn set_control_rods_command(&mut self, percent: f64) {
        self.pending_control_rods_percent = percent.clamp(0.0, 100.0);
        let (lo, hi) = split_u32((self.pending_control_rods_percent * 100.0) as u32);
        self.map.holding_registers[4] = lo;
        self.map.holding_registers[5] = hi;
        self.logger.log_audit(
            format!("reactor control rods commanded to {percent:.1}%"),
            Some("operator".into()),
            "set_control_rods_command",
            "ok",
        );
    }

    pub fn enable_dampener(&mut self, enabled: bool) {
        self.pending_dampener_enabled = enabled;
    }

    pub fn trigger_scram(&mut self) {
        self.pending_scram = true;
        self.map.coils[2] = false;
        self.logger.log_alarm("reactor SCRAM commanded", AlarmPriority::Critical, AlarmState::Active);
    }

    /// Requests a SCRAM reset. Only takes effect on the rising edge, and
    /// only while the mirrored telemetry already satisfies the same
    /// preconditions the reactor engine itself checks (core below rated
    /// temperature, stability above 0.8, containment above 0.9).
    pub fn reset_scram_command(&mut self) {
        self.map.coils[2] = true;
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "active": self.map.discrete_inputs[0],
            "scram_active": self.map.discrete_inputs[5],
            "core_temperature_c": self.map.input_registers[0],
            "power_output_mw": self.map.input_registers[3],
            "scan": self.stats.status(),
        })
    }
}

#[async_trait]
impl ScanController for ReactorPlc {
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

        for i in 0..10 {
            self.map.input_registers[i] = get(&format!("holding_registers[{i}]")) as i32;
        }
        self.map.discrete_inputs[0] = get_bool("coils[0]");
        self.map.discrete_inputs[1] = get_bool("coils[1]");
        self.map.discrete_inputs[2] = get_bool("coils[2]");
        self.map.discrete_inputs[3] = get_bool("coils[3]");
        self.map.discrete_inputs[4] = get_bool("coils[4]");
        self.map.discrete_inputs[5] = get_bool("coils[5]");
        Ok(())
    }

    async fn execute_logic(&mut self) -> SimResult<()> {
        let core_temperature_c = self.map.input_registers[0] as f64;
        let stability = self.map.input_registers[4] as f64 / 100.0;
        let containment = self.map.input_registers[7] as f64 / 100.0;

        if self.scram_reset_edge.rising_edge(self.map.coils[2]) {
            let precondition = core_temperature_c < self.rated_temperature_c && stability > 0.8 && containment > 0.9;
            if precondition {
                self.pending_scram = false;
                self.logger.log_audit("reactor SCRAM reset", Some("operator".into()), "reset_scram", "ok");
            } else {
                self.logger.log_event(
                    Severity::Warning,
                    Category::Process,
                    "reactor SCRAM reset rejected: safe-state preconditions not met",
                    serde_json::json!({
                        "core_temperature_c": core_temperature_c,
                        "stability": stability,
                        "containment_integrity": containment,
                    }),
                );
            }
        }
        self.map.coils[2] = false;
        self.scram_reset_edge.rising_edge(false);
        self.map.coils[0] = self.pending_scram;
        self.map.coils[1] = self.pending_dampener_enabled;
        self.map.discrete_inputs[5] = self.map.coils[0] || self.map.discrete_inputs[5];
        Ok(())
    }

    async fn write_outputs(&mut self) -> SimResult<()> {
        let power_setpoint = join_u32(self.map.holding_registers[0], self.map.holding_registers[1]) as f64 / 100.0;
        let coolant_pump = join_u32(self.map.holding_registers[2], self.map.holding_registers[3]) as f64 / 100.0;
        let control_rods = join_u32(self.map.holding_registers[4], self.map.holding_registers[5]) as f64 / 100.0;

        self.store
            .bulk_write_memory(
                &self.physics_device,
                vec![
                    ("holding_registers[10]".into(), MemoryValue::F64(power_setpoint)),
                    ("holding_registers[11]".into(), MemoryValue::F64(coolant_pump)),
                    ("holding_registers[12]".into(), MemoryValue::F64(control_rods)),
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
    use plantsim_common::types::{DeviceKind, Protocol};
    use plantsim_store::clock::{ClockMode, SimulationClock};
    use plantsim_store::logger::LoggerRegistry;
    use std::collections::HashSet;

    async fn make_plc() -> ReactorPlc {
        let store = StateStore::with_default_capacity();
        store
            .register_device("reactor_1", DeviceKind::ReactorPlc, 1, HashSet::from([Protocol::ModbusTcp]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let logger = LoggerRegistry::new(clock, store.clone()).get_logger("reactor_plc", Some("reactor_1"));
        ReactorPlc::new("reactor_1_plc", "reactor_1", 350.0, store, logger)
    }

    #[tokio::test]
    async fn commanded_setpoints_commit_to_physics_control_registers() {
        let mut plc = make_plc().await;
        plc.set_power_command(60.0);
        plc.set_control_rods_command(80.0);
        plc.read_inputs().await.unwrap();
        plc.execute_logic().await.unwrap();
        plc.write_outputs().await.unwrap();

        let power = plc.store.read_memory("reactor_1", "holding_registers[10]").await.unwrap();
        assert_eq!(power.as_f64(), Some(60.0));
        let rods = plc.store.read_memory("reactor_1", "holding_registers[12]").await.unwrap();
        assert_eq!(rods.as_f64(), Some(80.0));
    }

    #[tokio::test]
    async fn scram_reset_rejected_above_rated_temperature() {
        let mut plc = make_plc().await;
        plc.trigger_scram();
        plc.read_inputs().await.unwrap();
        plc.execute_logic().await.unwrap();
        assert!(plc.map.coils[0]);

        plc.map.input_registers[0] = 500;
        plc.map.input_registers[4] = 100;
        plc.map.input_registers[7] = 100;
        plc.reset_scram_command();
        plc.execute_logic().await.unwrap();
        assert!(plc.map.coils[0], "reset must be rejected above rated temperature");

        plc.map.input_registers[0] = 30;
        plc.reset_scram_command();
        plc.execute_logic().await.unwrap();
        assert!(!plc.map.coils[0]);
    }
}
