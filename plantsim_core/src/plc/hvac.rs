//! Zone HVAC PLC: vendor Modbus map for the HVAC
//! physics device.
//!
//! - `discrete_inputs[0-2]` fan / heating / cooling active
//! - `discrete_inputs[3]` low stability alarm, `[4]` critical instability alarm
//! - `input_registers[100-109]` mirrored telemetry (zone temp x10, zone
//!   humidity x10, supply air temp x10, duct pressure, stability x100,
//!   fan speed, heating valve, cooling valve, damper position, energy kW x10)
//! - `coils[0]` system enable commanded, `coils[1]` dampener commanded
//! - `holding_registers[200]`/`[201]` zone temperature setpoint x10, low/high
//! - `holding_registers[202]`/`[203]` humidity setpoint x10
//! - `holding_registers[204]`/`[205]` fan speed percent
//! - `holding_registers[206]`/`[207]` mode select
//! - `holding_registers[208]`/`[209]` damper command percent

use std::sync::Arc;

use async_trait::async_trait;
use plantsim_common::error::SimResult;
use plantsim_common::memory::{join_u32, split_u32, MemoryValue};
use plantsim_store::logger::EventLogger;
use plantsim_store::store::StateStore;

use crate::controller::{phase_error, ScanController, ScanStats};

#[derive(Debug, Clone, Default)]
struct LocalMap {
    discrete_inputs: [bool; 5],
    input_registers: [i32; 10],
    coils: [bool; 2],
    holding_registers: [u16; 10],
}

pub struct HvacPlc {
    name: String,
    physics_device: String,
    store: Arc<StateStore>,
    logger: Arc<EventLogger>,
    stats: Arc<ScanStats>,
    map: LocalMap,
    pending_system_enabled: bool,
    pending_dampener_enabled: bool,
}

impl HvacPlc {
    pub fn new(
        name: impl Into<String>,
        physics_device: impl Into<String>,
        store: Arc<StateStore>,
        logger: Arc<EventLogger>,
    ) -> Self {
        Self {
            name: name.into(),
            physics_device: physics_device.into(),
            store,
            logger,
            stats: ScanStats::new(),
            map: LocalMap::default(),
            pending_system_enabled: true,
            pending_dampener_enabled: true,
        }
    }

    fn set_wide(&mut self, index: usize, scaled: i64) {
        let (lo, hi) = split_u32(scaled as u32);
        self.map.holding_registers[index * 2] = lo;
        self.map.holding_registers[index * 2 + 1] = hi;
    }

    pub fn set_zone_temperature_command(&mut self, celsius: f64) {
        self.set_wide(0, (celsius * 10.0) as i64);
        self.logger.log_audit(
            format!("HVAC zone setpoint commanded to {celsius:.1}C"),
            Some("operator".into()),
            "set_zone_temperature_command",
            "ok",
        );
    }

    pub fn set_humidity_command(&mut self, percent: f64) {
        self.set_wide(1, (percent * 10.0) as i64);
    }

    pub fn set_fan_speed_command(&mut self, percent: f64) {
        self.set_wide(2, percent as i64);
    }

    pub fn set_mode_command(&mut self, mode: i64) {
        self.set_wide(3, mode);
    }

    pub fn set_damper_command(&mut self, percent: f64) {
        self.set_wide(4, percent as i64);
    }

    pub fn set_system_enabled(&mut self, enabled: bool) {
        self.pending_system_enabled = enabled;
    }

    pub fn enable_dampener(&mut self, enabled: bool) {
        self.pending_dampener_enabled = enabled;
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "fan_running": self.map.discrete_inputs[0],
            "zone_temperature_c": self.map.input_registers[0] as f64 / 10.0,
            "stability": self.map.input_registers[4] as f64 / 100.0,
            "scan": self.stats.status(),
        })
    }
}

#[async_trait]
impl ScanController for HvacPlc {
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
        self.map.discrete_inputs[3] = get_bool("coils[5]");
        self.map.discrete_inputs[4] = get_bool("coils[6]");
        Ok(())
    }

    async fn execute_logic(&mut self) -> SimResult<()> {
        if self.map.discrete_inputs[4] {
            self.logger.log_event(
                plantsim_common::types::Severity::Warning,
                plantsim_common::types::Category::Process,
                "HVAC zone critically unstable",
                serde_json::json!({ "stability": self.map.input_registers[4] as f64 / 100.0 }),
            );
        }
        self.map.coils[0] = self.pending_system_enabled;
        self.map.coils[1] = self.pending_dampener_enabled;
        Ok(())
    }

    async fn write_outputs(&mut self) -> SimResult<()> {
        let temp_setpoint = join_u32(self.map.holding_registers[0], self.map.holding_registers[1]) as f64 / 10.0;
        let humidity_setpoint = join_u32(self.map.holding_registers[2], self.map.holding_registers[3]) as f64 / 10.0;
        let fan_speed = join_u32(self.map.holding_registers[4], self.map.holding_registers[5]) as f64;
        let mode = join_u32(self.map.holding_registers[6], self.map.holding_registers[7]) as f64;
        let damper = join_u32(self.map.holding_registers[8], self.map.holding_registers[9]) as f64;

        self.store
            .bulk_write_memory(
                &self.physics_device,
                vec![
                    ("holding_registers[10]".into(), MemoryValue::F64(temp_setpoint)),
                    ("holding_registers[11]".into(), MemoryValue::F64(humidity_setpoint)),
                    ("holding_registers[12]".into(), MemoryValue::F64(fan_speed)),
                    ("holding_registers[13]".into(), MemoryValue::F64(mode)),
                    ("holding_registers[14]".into(), MemoryValue::F64(damper)),
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

    async fn make_plc() -> HvacPlc {
        let store = StateStore::with_default_capacity();
        store
            .register_device("hvac_1", DeviceKind::HvacPlc, 1, HashSet::from([Protocol::ModbusTcp]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let logger = LoggerRegistry::new(clock, store.clone()).get_logger("hvac_plc", Some("hvac_1"));
        HvacPlc::new("hvac_1_plc", "hvac_1", store, logger)
    }

    #[tokio::test]
    async fn commanded_setpoint_commits_to_physics_control_registers() {
        let mut plc = make_plc().await;
        plc.set_zone_temperature_command(21.5);
        plc.set_fan_speed_command(75.0);
        plc.read_inputs().await.unwrap();
        plc.execute_logic().await.unwrap();
        plc.write_outputs().await.unwrap();

        let setpoint = plc.store.read_memory("hvac_1", "holding_registers[10]").await.unwrap();
        assert_eq!(setpoint.as_f64(), Some(21.5));
        let fan = plc.store.read_memory("hvac_1", "holding_registers[12]").await.unwrap();
        assert_eq!(fan.as_f64(), Some(75.0));
    }
}
