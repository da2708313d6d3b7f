//! DC power flow approximation: per-bus voltage and
//! angle state, per-line active/reactive flow, and thermal overload
//! detection. Unlike the single-device physics engines this module
//! operates network-wide, but it still implements `PhysicsEngine` so
//! the outer scan cycle drives it like any other engine; its backing
//! device carries an aggregate network summary rather than a single
//! physical device's registers.

use async_trait::async_trait;
use plantsim_common::config::GridTopologyConfig;
use plantsim_common::error::{SimError, SimResult};
use plantsim_common::types::DeviceKind;
use plantsim_store::store::StateStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct BusState {
    pub voltage_pu: f64,
    pub angle_deg: f64,
    pub load_mw: f64,
    pub load_mvar: f64,
    pub gen_mw: f64,
    pub gen_mvar: f64,
}

impl Default for BusState {
    fn default() -> Self {
        Self { voltage_pu: 1.0, angle_deg: 0.0, load_mw: 0.0, load_mvar: 0.0, gen_mw: 0.0, gen_mvar: 0.0 }
    }
}

#[derive(Debug, Clone)]
pub struct LineState {
    pub from_bus: String,
    pub to_bus: String,
    pub rating_mva: f64,
    pub current_a: f64,
    pub mw_flow: f64,
    pub mvar_flow: f64,
    pub overload: bool,
}

impl LineState {
    fn new(from_bus: String, to_bus: String, rating_mva: f64) -> Self {
        Self { from_bus, to_bus, rating_mva, current_a: 0.0, mw_flow: 0.0, mvar_flow: 0.0, overload: false }
    }
}

#[derive(Debug, Clone)]
pub struct PowerFlowParameters {
    pub base_mva: f64,
    pub default_line_rating_mva: f64,
    pub fixed_load_mw: f64,
}

impl Default for PowerFlowParameters {
    fn default() -> Self {
        Self { base_mva: 100.0, default_line_rating_mva: 150.0, fixed_load_mw: 80.0 }
    }
}

/// Steady-state electrical network: a set of named buses joined by
/// transmission lines, driven each cycle by turbine generation and a
/// fixed system load.
pub struct PowerFlowEngine {
    device_name: String,
    store: Arc<StateStore>,
    params: PowerFlowParameters,
    buses: BTreeMap<String, BusState>,
    lines: BTreeMap<String, LineState>,
    initialised: bool,
}

impl PowerFlowEngine {
    pub fn new(device_name: impl Into<String>, store: Arc<StateStore>, params: PowerFlowParameters) -> Self {
        Self { device_name: device_name.into(), store, params, buses: BTreeMap::new(), lines: BTreeMap::new(), initialised: false }
    }

    /// Builds topology from a `[grid]` config section. Falls back to a
    /// minimal two-bus system when the section is empty, matching the
    /// default grid used when no topology is configured.
    pub fn from_config(device_name: impl Into<String>, store: Arc<StateStore>, config: &GridTopologyConfig) -> Self {
        let mut engine = Self::new(
            device_name,
            store,
            PowerFlowParameters { base_mva: config.base_mva, fixed_load_mw: config.fixed_load_mw, ..Default::default() },
        );

        if config.buses.is_empty() || config.lines.is_empty() {
            engine.create_default_grid();
            return engine;
        }

        for bus_name in &config.buses {
            engine.buses.insert(bus_name.clone(), BusState::default());
        }
        for line in &config.lines {
            engine.lines.insert(
                line.name.clone(),
                LineState::new(line.from.clone(), line.to.clone(), line.rating_mva),
            );
        }
        engine
    }

    fn create_default_grid(&mut self) {
        self.buses.insert("bus_gen".into(), BusState::default());
        self.buses.insert("bus_load".into(), BusState::default());
        self.lines.insert(
            "line_gen_load".into(),
            LineState::new("bus_gen".into(), "bus_load".into(), self.params.default_line_rating_mva),
        );
    }

    async fn initialise_inner(&mut self) -> SimResult<()> {
        if self.store.get_device_state(&self.device_name).await.is_none() {
            return Err(SimError::UnknownDevice(self.device_name.clone()));
        }
        if self.buses.is_empty() {
            self.create_default_grid();
        }
        for bus in self.buses.values_mut() {
            bus.voltage_pu = 1.0;
            bus.angle_deg = 0.0;
        }
        self.update_from_devices().await?;
        self.write_telemetry_inner().await?;
        self.initialised = true;
        debug!(buses = self.buses.len(), lines = self.lines.len(), "power flow topology initialised");
        Ok(())
    }

    /// Aggregates turbine generation onto `bus_{turbine_name}` (when
    /// such a bus exists) and the fixed system load onto `bus_load`.
    async fn update_from_devices(&mut self) -> SimResult<()> {
        for bus in self.buses.values_mut() {
            bus.gen_mw = 0.0;
            bus.gen_mvar = 0.0;
            bus.load_mw = 0.0;
            bus.load_mvar = 0.0;
        }

        let turbines = self.store.get_devices_by_kind(DeviceKind::TurbinePlc).await;
        for turbine in &turbines {
            let power_mw = turbine
                .memory
                .get("holding_registers[5]")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);

            let bus_name = format!("bus_{}", turbine.name);
            if let Some(bus) = self.buses.get_mut(&bus_name) {
                bus.gen_mw += power_mw;
                bus.gen_mvar += power_mw * 0.484; // power factor 0.9: tan(acos(0.9))
            }
        }

        if let Some(bus) = self.buses.get_mut("bus_load") {
            bus.load_mw = self.params.fixed_load_mw;
            bus.load_mvar = self.params.fixed_load_mw * 0.5;
        }
        Ok(())
    }

    fn update_inner(&mut self, dt: f64) -> SimResult<()> {
        if !self.initialised {
            return Err(SimError::NotInitialised(self.device_name.clone()));
        }
        if dt <= 0.0 {
            warn!(dt, "skipping power flow update for non-positive dt");
            return Ok(());
        }
        self.update_dc_power_flow();
        self.check_line_overloads();
        Ok(())
    }

    fn update_dc_power_flow(&mut self) {
        for (line_id, line) in self.lines.iter_mut() {
            let (Some(from), Some(to)) = (self.buses.get(&line.from_bus), self.buses.get(&line.to_bus)) else {
                warn!(line = %line_id, from = %line.from_bus, to = %line.to_bus, "line references unknown bus");
                continue;
            };

            let voltage_diff = from.voltage_pu - to.voltage_pu;
            let angle_diff = from.angle_deg - to.angle_deg;

            line.mw_flow = voltage_diff * 100.0 + angle_diff * 10.0;
            line.mvar_flow = voltage_diff * 50.0;

            let apparent_mva = (line.mw_flow.powi(2) + line.mvar_flow.powi(2)).sqrt();
            line.current_a = apparent_mva / from.voltage_pu * 1000.0;
        }
    }

    fn check_line_overloads(&mut self) {
        for (line_id, line) in self.lines.iter_mut() {
            let apparent_mva = (line.mw_flow.powi(2) + line.mvar_flow.powi(2)).sqrt();
            let old_overload = line.overload;
            line.overload = apparent_mva > line.rating_mva;

            if line.overload && !old_overload {
                error!(
                    line = %line_id,
                    from = %line.from_bus,
                    to = %line.to_bus,
                    apparent_mva,
                    rating_mva = line.rating_mva,
                    "line overload"
                );
            }
        }
    }

    pub fn get_bus_states(&self) -> &BTreeMap<String, BusState> {
        &self.buses
    }

    pub fn get_line_states(&self) -> &BTreeMap<String, LineState> {
        &self.lines
    }

    async fn write_telemetry_inner(&self) -> SimResult<()> {
        use plantsim_common::memory::MemoryValue;

        let any_overload = self.lines.values().any(|line| line.overload);
        let max_line_loading_pct = self
            .lines
            .values()
            .map(|line| {
                let apparent_mva = (line.mw_flow.powi(2) + line.mvar_flow.powi(2)).sqrt();
                if line.rating_mva > 0.0 {
                    apparent_mva / line.rating_mva * 100.0
                } else {
                    0.0
                }
            })
            .fold(0.0_f64, f64::max);
        let net_injection_mw: f64 = self.buses.values().map(|bus| bus.gen_mw - bus.load_mw).sum();

        let telemetry: Vec<(String, MemoryValue)> = vec![
            ("holding_registers[0]".into(), MemoryValue::I32(self.buses.len() as i32)),
            ("holding_registers[1]".into(), MemoryValue::I32(self.lines.len() as i32)),
            ("holding_registers[2]".into(), MemoryValue::I32(net_injection_mw as i32)),
            ("holding_registers[3]".into(), MemoryValue::I32(max_line_loading_pct as i32)),
            ("coils[0]".into(), MemoryValue::Bool(any_overload)),
        ];
        self.store.bulk_write_memory(&self.device_name, telemetry).await
    }
}

#[async_trait]
impl crate::engine::PhysicsEngine for PowerFlowEngine {
    async fn initialise(&mut self) -> SimResult<()> {
        self.initialise_inner().await
    }

    async fn read_control_inputs(&mut self) -> SimResult<()> {
        self.update_from_devices().await
    }

    fn update(&mut self, dt: f64) -> SimResult<()> {
        self.update_inner(dt)
    }

    async fn write_telemetry(&self) -> SimResult<()> {
        self.write_telemetry_inner().await
    }

    fn get_telemetry(&self) -> serde_json::Value {
        let buses: serde_json::Map<String, serde_json::Value> = self
            .buses
            .iter()
            .map(|(name, bus)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "voltage_pu": (bus.voltage_pu * 1000.0).round() / 1000.0,
                        "angle_deg": (bus.angle_deg * 10.0).round() / 10.0,
                        "load_mw": (bus.load_mw * 10.0).round() / 10.0,
                        "gen_mw": (bus.gen_mw * 10.0).round() / 10.0,
                        "net_injection_mw": ((bus.gen_mw - bus.load_mw) * 10.0).round() / 10.0,
                    }),
                )
            })
            .collect();

        let lines: serde_json::Map<String, serde_json::Value> = self
            .lines
            .iter()
            .map(|(name, line)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "from_bus": line.from_bus,
                        "to_bus": line.to_bus,
                        "mw_flow": (line.mw_flow * 10.0).round() / 10.0,
                        "mvar_flow": (line.mvar_flow * 10.0).round() / 10.0,
                        "current_a": line.current_a.round(),
                        "overload": line.overload,
                    }),
                )
            })
            .collect();

        serde_json::json!({ "buses": buses, "lines": lines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PhysicsEngine;
    use plantsim_common::types::Protocol;
    use std::collections::HashSet;

    async fn make_engine() -> PowerFlowEngine {
        let store = StateStore::with_default_capacity();
        store
            .register_device("power_flow_1", DeviceKind::SubstationRtu, 1, HashSet::from([Protocol::Dnp3]), Default::default(), 0.0)
            .await
            .unwrap();
        PowerFlowEngine::new("power_flow_1", store, PowerFlowParameters::default())
    }

    #[tokio::test]
    async fn default_grid_has_two_buses_and_one_line() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        assert_eq!(engine.get_bus_states().len(), 2);
        assert_eq!(engine.get_line_states().len(), 1);
    }

    #[tokio::test]
    async fn rejects_update_before_initialise() {
        let mut engine = make_engine().await;
        assert!(engine.update(1.0).is_err());
    }

    #[tokio::test]
    async fn voltage_imbalance_drives_line_overload() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.buses.get_mut("bus_gen").unwrap().voltage_pu = 3.0;
        engine.update(1.0).unwrap();
        assert!(engine.get_line_states()["line_gen_load"].overload);
    }

    #[tokio::test]
    async fn balanced_buses_produce_zero_flow() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.update(1.0).unwrap();
        let line = &engine.get_line_states()["line_gen_load"];
        assert_eq!(line.mw_flow, 0.0);
        assert!(!line.overload);
    }

    #[tokio::test]
    async fn write_telemetry_reports_any_overload() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.buses.get_mut("bus_gen").unwrap().voltage_pu = 3.0;
        engine.update(1.0).unwrap();
        engine.write_telemetry().await.unwrap();

        let snapshot = engine.store.get_device_state("power_flow_1").await.unwrap();
        assert_eq!(snapshot.memory.get("coils[0]").and_then(|v| v.as_bool()), Some(true));
    }
}
