//! Grid dynamics: a swing-equation frequency response
//! to generation/load imbalance, plus the over/under frequency and
//! voltage protection latches that every substation RTU watches.

use async_trait::async_trait;
use plantsim_common::error::{SimError, SimResult};
use plantsim_common::types::DeviceKind;
use plantsim_store::store::StateStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Debug, Clone, Serialize)]
pub struct GridState {
    pub frequency_hz: f64,
    pub voltage_pu: f64,
    pub total_load_mw: f64,
    pub total_gen_mw: f64,
    pub under_frequency_trip: bool,
    pub over_frequency_trip: bool,
    pub undervoltage_trip: bool,
    pub overvoltage_trip: bool,
}

impl Default for GridState {
    fn default() -> Self {
        Self {
            frequency_hz: 50.0,
            voltage_pu: 1.0,
            total_load_mw: 0.0,
            total_gen_mw: 0.0,
            under_frequency_trip: false,
            over_frequency_trip: false,
            undervoltage_trip: false,
            overvoltage_trip: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GridParameters {
    pub nominal_frequency_hz: f64,
    pub frequency_deadband_hz: f64,
    pub max_frequency_hz: f64,
    pub min_frequency_hz: f64,
    pub voltage_deadband_pu: f64,
    pub max_voltage_pu: f64,
    pub min_voltage_pu: f64,
    pub inertia_constant: f64,
    pub damping: f64,
    pub fixed_load_mw: f64,
}

impl Default for GridParameters {
    fn default() -> Self {
        Self {
            nominal_frequency_hz: 50.0,
            frequency_deadband_hz: 0.2,
            max_frequency_hz: 51.0,
            min_frequency_hz: 49.0,
            voltage_deadband_pu: 0.05,
            max_voltage_pu: 1.1,
            min_voltage_pu: 0.9,
            inertia_constant: 5000.0,
            damping: 1.0,
            fixed_load_mw: 80.0,
        }
    }
}

pub struct GridEngine {
    device_name: String,
    store: Arc<StateStore>,
    params: GridParameters,
    state: GridState,
    initialised: bool,
}

impl GridEngine {
    pub fn new(device_name: impl Into<String>, store: Arc<StateStore>, params: GridParameters) -> Self {
        let frequency_hz = params.nominal_frequency_hz;
        Self {
            device_name: device_name.into(),
            store,
            params,
            state: GridState { frequency_hz, ..Default::default() },
            initialised: false,
        }
    }

    pub fn get_state(&self) -> GridState {
        self.state.clone()
    }

    /// Aggregates generation from every registered turbine PLC and the
    /// fixed system load. Call once per cycle before `update`.
    async fn update_from_devices(&mut self) -> SimResult<()> {
        let turbines = self.store.get_devices_by_kind(DeviceKind::TurbinePlc).await;

        let mut total_gen = 0.0;
        for turbine in &turbines {
            let power_mw = turbine
                .memory
                .get("holding_registers[5]")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            total_gen += power_mw;
        }

        self.state.total_gen_mw = total_gen;
        self.state.total_load_mw = self.params.fixed_load_mw;
        Ok(())
    }

    fn update_protection(&mut self) {
        let old_uf = self.state.under_frequency_trip;
        let old_of = self.state.over_frequency_trip;

        self.state.under_frequency_trip = self.state.frequency_hz < self.params.min_frequency_hz;
        self.state.over_frequency_trip = self.state.frequency_hz > self.params.max_frequency_hz;

        if self.state.under_frequency_trip && !old_uf {
            error!(device = %self.device_name, frequency_hz = self.state.frequency_hz, "under-frequency trip");
        }
        if self.state.over_frequency_trip && !old_of {
            error!(device = %self.device_name, frequency_hz = self.state.frequency_hz, "over-frequency trip");
        }

        let old_uv = self.state.undervoltage_trip;
        let old_ov = self.state.overvoltage_trip;

        self.state.undervoltage_trip = self.state.voltage_pu < self.params.min_voltage_pu;
        self.state.overvoltage_trip = self.state.voltage_pu > self.params.max_voltage_pu;

        if self.state.undervoltage_trip && !old_uv {
            error!(device = %self.device_name, voltage_pu = self.state.voltage_pu, "undervoltage trip");
        }
        if self.state.overvoltage_trip && !old_ov {
            error!(device = %self.device_name, voltage_pu = self.state.voltage_pu, "overvoltage trip");
        }
    }

    async fn write_telemetry_inner(&self) -> SimResult<()> {
        use plantsim_common::memory::MemoryValue;

        let telemetry: Vec<(String, MemoryValue)> = vec![
            ("holding_registers[0]".into(), MemoryValue::I32((self.state.frequency_hz * 1000.0) as i32)),
            ("holding_registers[1]".into(), MemoryValue::I32((self.state.voltage_pu * 1000.0) as i32)),
            ("holding_registers[2]".into(), MemoryValue::I32(self.state.total_gen_mw as i32)),
            ("holding_registers[3]".into(), MemoryValue::I32(self.state.total_load_mw as i32)),
            ("coils[0]".into(), MemoryValue::Bool(self.state.under_frequency_trip)),
            ("coils[1]".into(), MemoryValue::Bool(self.state.over_frequency_trip)),
            ("coils[2]".into(), MemoryValue::Bool(self.state.undervoltage_trip)),
            ("coils[3]".into(), MemoryValue::Bool(self.state.overvoltage_trip)),
        ];
        self.store.bulk_write_memory(&self.device_name, telemetry).await
    }
}

#[async_trait]
impl crate::engine::PhysicsEngine for GridEngine {
    async fn initialise(&mut self) -> SimResult<()> {
        if self.store.get_device_state(&self.device_name).await.is_none() {
            return Err(SimError::UnknownDevice(self.device_name.clone()));
        }
        self.state.frequency_hz = self.params.nominal_frequency_hz;
        self.state.voltage_pu = 1.0;
        self.update_from_devices().await?;
        self.write_telemetry_inner().await?;
        self.initialised = true;
        Ok(())
    }

    async fn read_control_inputs(&mut self) -> SimResult<()> {
        self.update_from_devices().await
    }

    fn update(&mut self, dt: f64) -> SimResult<()> {
        if !self.initialised {
            return Err(SimError::NotInitialised(self.device_name.clone()));
        }
        if dt <= 0.0 {
            return Ok(());
        }

        let imbalance_mw = self.state.total_gen_mw - self.state.total_load_mw;
        let frequency_deviation = self.state.frequency_hz - self.params.nominal_frequency_hz;
        let damping_mw = self.params.damping * frequency_deviation;
        let net_power_mw = imbalance_mw - damping_mw;
        let df_dt = net_power_mw / self.params.inertia_constant;
        self.state.frequency_hz += df_dt * dt;

        let voltage_deviation = imbalance_mw / 10_000.0;
        self.state.voltage_pu = 1.0 + voltage_deviation;

        self.update_protection();

        if frequency_deviation.abs() > self.params.frequency_deadband_hz {
            warn!(
                device = %self.device_name,
                frequency_hz = self.state.frequency_hz,
                imbalance_mw,
                "grid frequency deviation outside deadband"
            );
        }
        Ok(())
    }

    async fn write_telemetry(&self) -> SimResult<()> {
        self.write_telemetry_inner().await
    }

    fn get_telemetry(&self) -> serde_json::Value {
        serde_json::json!({
            "frequency_hz": (self.state.frequency_hz * 1000.0).round() / 1000.0,
            "voltage_pu": (self.state.voltage_pu * 1000.0).round() / 1000.0,
            "total_generation_mw": (self.state.total_gen_mw * 10.0).round() / 10.0,
            "total_load_mw": (self.state.total_load_mw * 10.0).round() / 10.0,
            "imbalance_mw": ((self.state.total_gen_mw - self.state.total_load_mw) * 10.0).round() / 10.0,
            "under_frequency_trip": self.state.under_frequency_trip,
            "over_frequency_trip": self.state.over_frequency_trip,
            "undervoltage_trip": self.state.undervoltage_trip,
            "overvoltage_trip": self.state.overvoltage_trip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PhysicsEngine;
    use plantsim_common::types::{DeviceKind, Protocol};
    use std::collections::HashSet;

    async fn make_engine() -> GridEngine {
        let store = StateStore::with_default_capacity();
        store
            .register_device("grid_1", DeviceKind::SubstationRtu, 1, HashSet::from([Protocol::Dnp3]), Default::default(), 0.0)
            .await
            .unwrap();
        GridEngine::new("grid_1", store, GridParameters::default())
    }

    #[tokio::test]
    async fn balanced_generation_holds_nominal_frequency() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.total_gen_mw = 80.0;
        engine.state.total_load_mw = 80.0;
        engine.update(10.0).unwrap();
        assert!((engine.get_state().frequency_hz - 50.0).abs() < 1e-9);
        assert!(!engine.get_state().under_frequency_trip);
    }

    #[tokio::test]
    async fn generation_deficit_drags_frequency_down() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.total_gen_mw = 40.0;
        engine.state.total_load_mw = 80.0;
        engine.update(60.0).unwrap();
        assert!(engine.get_state().frequency_hz < 50.0);
    }

    #[tokio::test]
    async fn under_frequency_trip_latches_once() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.frequency_hz = 48.0;
        engine.update_protection();
        assert!(engine.get_state().under_frequency_trip);
    }

    #[tokio::test]
    async fn rejects_update_before_initialise() {
        let mut engine = make_engine().await;
        assert!(engine.update(1.0).is_err());
    }
}
