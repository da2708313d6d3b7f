//! Reactor physics: heat balance, a stability field
//! (a didactic stand-in for a non-classical stability metric) that
//! degrades under power/temperature stress, containment, and a SCRAM
//! lifecycle with a gated reset precondition.

use async_trait::async_trait;
use plantsim_common::error::{SimError, SimResult};
use plantsim_common::memory::MemoryValue;
use plantsim_store::clock::SimulationClock;
use plantsim_store::store::StateStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SCRAM_HALF_LIFE_S: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct ReactorState {
    pub core_temperature_c: f64,
    pub coolant_temperature_c: f64,
    pub vessel_pressure_bar: f64,
    pub coolant_flow_rate: f64,
    pub reaction_rate: f64,
    pub power_output_mw: f64,
    pub stability: f64,
    pub containment_integrity: f64,
    pub cumulative_overtemp_time: f64,
    pub damage_level: f64,
    pub scram_active: bool,
}

impl Default for ReactorState {
    fn default() -> Self {
        Self {
            core_temperature_c: 25.0,
            coolant_temperature_c: 25.0,
            vessel_pressure_bar: 1.0,
            coolant_flow_rate: 0.0,
            reaction_rate: 0.0,
            power_output_mw: 0.0,
            stability: 1.0,
            containment_integrity: 1.0,
            cumulative_overtemp_time: 0.0,
            damage_level: 0.0,
            scram_active: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReactorParameters {
    pub rated_power_mw: f64,
    pub rated_temperature_c: f64,
    pub max_safe_temperature_c: f64,
    pub critical_temperature_c: f64,
    pub max_safe_pressure_bar: f64,
    pub thermal_mass: f64,
    pub coolant_capacity: f64,
    pub reaction_time_constant: f64,
    pub stability_decay_rate: f64,
    pub stability_recovery_rate: f64,
}

impl Default for ReactorParameters {
    fn default() -> Self {
        Self {
            rated_power_mw: 25.0,
            rated_temperature_c: 350.0,
            max_safe_temperature_c: 400.0,
            critical_temperature_c: 450.0,
            max_safe_pressure_bar: 150.0,
            thermal_mass: 50.0,
            coolant_capacity: 0.5,
            reaction_time_constant: 10.0,
            stability_decay_rate: 0.01,
            stability_recovery_rate: 0.05,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ReactorControls {
    power_setpoint_percent: f64,
    coolant_pump_speed: f64,
    control_rods_position: f64,
    emergency_shutdown: bool,
    stability_dampener_enabled: bool,
}

pub struct ReactorEngine {
    device_name: String,
    store: Arc<StateStore>,
    clock: Arc<SimulationClock>,
    params: ReactorParameters,
    state: ReactorState,
    controls: ReactorControls,
    initialised: bool,
}

impl ReactorEngine {
    pub fn new(
        device_name: impl Into<String>,
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        params: ReactorParameters,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            store,
            clock,
            params,
            state: ReactorState::default(),
            controls: ReactorControls { control_rods_position: 100.0, stability_dampener_enabled: true, ..Default::default() },
            initialised: false,
        }
    }

    pub fn get_state(&self) -> ReactorState {
        self.state.clone()
    }

    /// Clear the SCRAM flag if, and only if, reset preconditions hold:
    /// core below rated temperature, stability above 0.8, containment
    /// above 0.9.
    pub fn reset_scram(&mut self) -> bool {
        if self.state.core_temperature_c < self.params.rated_temperature_c
            && self.state.stability > 0.8
            && self.state.containment_integrity > 0.9
        {
            self.state.scram_active = false;
            info!(device = %self.device_name, "reactor SCRAM reset");
            true
        } else {
            warn!(device = %self.device_name, "reactor SCRAM reset rejected: conditions not safe");
            false
        }
    }

    pub fn is_scram_active(&self) -> bool {
        self.state.scram_active
    }

    /// Force a SCRAM immediately, independent of the next
    /// `read_control_inputs` cycle. Used by safety controllers driving
    /// the engine's safe-state action every cycle while a demand is
    /// latched.
    pub fn force_scram(&mut self) {
        self.controls.emergency_shutdown = true;
        self.state.scram_active = true;
    }

    /// Whether the reset preconditions currently hold, without
    /// attempting to clear the SCRAM flag.
    pub fn safe_state_precondition(&self) -> bool {
        self.state.core_temperature_c < self.params.rated_temperature_c
            && self.state.stability > 0.8
            && self.state.containment_integrity > 0.9
    }

    fn update_reaction_rate(&mut self, dt: f64, power_setpoint: f64, control_rods: f64) {
        let power_setpoint = power_setpoint.clamp(0.0, 100.0);
        let control_rods = control_rods.clamp(0.0, 100.0);

        let max_reaction = control_rods / 100.0;
        let mut target_reaction = (power_setpoint / 100.0).min(max_reaction);

        if self.state.stability < 0.8 {
            let instability = 1.0 - self.state.stability;
            let fluctuation = (self.clock.now() * 2.0).sin() * instability * 0.2;
            target_reaction *= 1.0 + fluctuation;
        }

        let rate_error = target_reaction - self.state.reaction_rate;
        self.state.reaction_rate += rate_error * (dt / self.params.reaction_time_constant);
        self.state.reaction_rate = self.state.reaction_rate.clamp(0.0, 1.5);
    }

    fn update_temperatures(&mut self, dt: f64, coolant_pump: f64) {
        self.state.coolant_flow_rate = coolant_pump.clamp(0.0, 100.0) / 100.0;

        let heat_generated = self.state.reaction_rate * self.params.rated_power_mw;
        let temp_difference = self.state.core_temperature_c - self.state.coolant_temperature_c;
        let heat_removed = self.state.coolant_flow_rate * self.params.coolant_capacity * temp_difference.max(0.0);

        let net_heat_rate = heat_generated - heat_removed;
        self.state.core_temperature_c += net_heat_rate * dt / self.params.thermal_mass;

        if self.state.coolant_flow_rate > 0.01 {
            let coolant_target = 25.0 + (self.state.core_temperature_c - 25.0) * 0.3;
            let coolant_error = coolant_target - self.state.coolant_temperature_c;
            self.state.coolant_temperature_c += coolant_error * 0.1 * dt;
        } else {
            self.state.coolant_temperature_c +=
                (self.state.core_temperature_c - self.state.coolant_temperature_c) * 0.01 * dt;
        }

        if self.state.core_temperature_c < 30.0 && self.state.reaction_rate < 0.01 {
            let ambient = 25.0;
            self.state.core_temperature_c += (ambient - self.state.core_temperature_c) * 0.01 * dt;
            self.state.coolant_temperature_c += (ambient - self.state.coolant_temperature_c) * 0.05 * dt;
        }

        self.state.core_temperature_c = self.state.core_temperature_c.max(25.0);
        self.state.coolant_temperature_c = self.state.coolant_temperature_c.max(25.0);
    }

    fn update_pressure(&mut self) {
        let base_pressure = 1.0;
        let temp_pressure = (self.params.max_safe_pressure_bar - base_pressure)
            * ((self.state.core_temperature_c - 25.0) / (self.params.rated_temperature_c - 25.0));
        self.state.vessel_pressure_bar = (base_pressure + temp_pressure).max(1.0);

        if self.state.stability < 0.7 {
            let instability = 1.0 - self.state.stability;
            let fluctuation = (self.clock.now() * 3.0).sin() * instability * 10.0;
            self.state.vessel_pressure_bar += fluctuation;
        }
    }

    fn update_stability(&mut self, dt: f64, dampener_enabled: bool) {
        let power_stress = self.state.reaction_rate;
        let temp_stress = ((self.state.core_temperature_c - self.params.rated_temperature_c) / 100.0).max(0.0);
        let total_stress = power_stress * 0.3 + temp_stress * 0.5;

        let (recovery, decay) = if dampener_enabled {
            (self.params.stability_recovery_rate * dt, total_stress * self.params.stability_decay_rate * dt * 0.5)
        } else {
            (self.params.stability_recovery_rate * dt * 0.2, total_stress * self.params.stability_decay_rate * dt * 2.0)
        };

        self.state.stability = (self.state.stability + recovery - decay).clamp(0.0, 1.0);

        if self.state.stability < 0.3 {
            let containment_damage = (0.3 - self.state.stability) * 0.01 * dt;
            self.state.containment_integrity = (self.state.containment_integrity - containment_damage).max(0.0);
            warn!(
                device = %self.device_name,
                stability = self.state.stability,
                containment = self.state.containment_integrity,
                "reactor stability field degrading"
            );
        }
    }

    fn update_power_output(&mut self) {
        let efficiency = if self.state.core_temperature_c > self.params.max_safe_temperature_c {
            0.8
        } else if self.state.core_temperature_c < 100.0 {
            0.5
        } else {
            1.0
        };
        self.state.power_output_mw = self.state.reaction_rate * self.params.rated_power_mw * efficiency;
    }

    fn update_damage(&mut self, dt: f64) {
        if self.state.core_temperature_c <= self.params.max_safe_temperature_c {
            return;
        }
        self.state.cumulative_overtemp_time += dt;
        let overtemp = self.state.core_temperature_c - self.params.max_safe_temperature_c;
        let damage_rate = overtemp / 100.0 * 0.01;
        self.state.damage_level = (self.state.damage_level + damage_rate * dt).min(1.0);
        if self.state.damage_level > 0.1 {
            warn!(
                device = %self.device_name,
                damage_pct = self.state.damage_level * 100.0,
                temp_c = self.state.core_temperature_c,
                "reactor thermal damage accumulating"
            );
        }
    }

    fn emergency_shutdown(&mut self, dt: f64) {
        self.state.scram_active = true;

        self.state.reaction_rate *= 0.5_f64.powf(dt / SCRAM_HALF_LIFE_S);
        if self.state.reaction_rate < 0.001 {
            self.state.reaction_rate = 0.0;
        }

        let decay_heat = self.state.reaction_rate * self.params.rated_power_mw * 0.07;
        self.state.coolant_flow_rate = 1.0;

        let temp_difference = self.state.core_temperature_c - 25.0;
        let cooling_rate = self.params.coolant_capacity * temp_difference - decay_heat;
        let temp_change = cooling_rate * dt / self.params.thermal_mass;
        self.state.core_temperature_c -= temp_change.max(0.0);
        self.state.core_temperature_c = self.state.core_temperature_c.max(25.0);

        self.state.stability = (self.state.stability + self.params.stability_recovery_rate * dt).min(1.0);

        self.update_pressure();
        self.update_power_output();
    }

    async fn write_telemetry_inner(&self) -> SimResult<()> {
        let telemetry: Vec<(String, MemoryValue)> = vec![
            ("holding_registers[0]".into(), MemoryValue::I32(self.state.core_temperature_c as i32)),
            ("holding_registers[1]".into(), MemoryValue::I32(self.state.coolant_temperature_c as i32)),
            ("holding_registers[2]".into(), MemoryValue::I32((self.state.vessel_pressure_bar * 10.0) as i32)),
            ("holding_registers[3]".into(), MemoryValue::I32((self.state.power_output_mw * 10.0) as i32)),
            ("holding_registers[4]".into(), MemoryValue::I32((self.state.stability * 100.0) as i32)),
            ("holding_registers[5]".into(), MemoryValue::I32((self.state.reaction_rate * 100.0) as i32)),
            ("holding_registers[6]".into(), MemoryValue::I32((self.state.coolant_flow_rate * 100.0) as i32)),
            ("holding_registers[7]".into(), MemoryValue::I32((self.state.containment_integrity * 100.0) as i32)),
            ("holding_registers[8]".into(), MemoryValue::I32(self.state.cumulative_overtemp_time as i32)),
            ("holding_registers[9]".into(), MemoryValue::I32((self.state.damage_level * 100.0) as i32)),
            ("coils[0]".into(), MemoryValue::Bool(self.state.reaction_rate > 0.01)),
            ("coils[1]".into(), MemoryValue::Bool(self.state.core_temperature_c > self.params.max_safe_temperature_c)),
            ("coils[2]".into(), MemoryValue::Bool(self.state.vessel_pressure_bar > self.params.max_safe_pressure_bar)),
            ("coils[3]".into(), MemoryValue::Bool(self.state.stability < 0.5)),
            ("coils[4]".into(), MemoryValue::Bool(self.state.containment_integrity < 0.8)),
            ("coils[5]".into(), MemoryValue::Bool(self.state.scram_active)),
            ("coils[6]".into(), MemoryValue::Bool(self.state.damage_level > 0.5)),
        ];
        self.store.bulk_write_memory(&self.device_name, telemetry).await
    }
}

#[async_trait]
impl crate::engine::PhysicsEngine for ReactorEngine {
    async fn initialise(&mut self) -> SimResult<()> {
        if self.store.get_device_state(&self.device_name).await.is_none() {
            return Err(SimError::UnknownDevice(self.device_name.clone()));
        }
        self.write_telemetry_inner().await?;
        self.initialised = true;
        Ok(())
    }

    async fn read_control_inputs(&mut self) -> SimResult<()> {
        let power_setpoint = self.store.read_memory(&self.device_name, "holding_registers[10]").await;
        let coolant_pump = self.store.read_memory(&self.device_name, "holding_registers[11]").await;
        let control_rods = self.store.read_memory(&self.device_name, "holding_registers[12]").await;
        let emergency_shutdown = self.store.read_memory(&self.device_name, "coils[10]").await;
        let dampener = self.store.read_memory(&self.device_name, "coils[11]").await;

        self.controls = ReactorControls {
            power_setpoint_percent: power_setpoint.and_then(|v| v.as_f64()).unwrap_or(0.0),
            coolant_pump_speed: coolant_pump.and_then(|v| v.as_f64()).unwrap_or(0.0),
            control_rods_position: control_rods.and_then(|v| v.as_f64()).unwrap_or(100.0),
            emergency_shutdown: emergency_shutdown.and_then(|v| v.as_bool()).unwrap_or(false),
            stability_dampener_enabled: dampener.and_then(|v| v.as_bool()).unwrap_or(true),
        };
        Ok(())
    }

    fn update(&mut self, dt: f64) -> SimResult<()> {
        if !self.initialised {
            return Err(SimError::NotInitialised(self.device_name.clone()));
        }
        if dt <= 0.0 {
            debug!(device = %self.device_name, dt, "skipping reactor update for non-positive dt");
            return Ok(());
        }

        let controls = self.controls.clone();

        if controls.emergency_shutdown || self.state.scram_active {
            self.emergency_shutdown(dt);
            return Ok(());
        }

        if self.state.core_temperature_c > self.params.critical_temperature_c
            || self.state.containment_integrity < 0.5
        {
            warn!(device = %self.device_name, "reactor auto-SCRAM triggered");
            self.emergency_shutdown(dt);
            return Ok(());
        }

        self.update_reaction_rate(dt, controls.power_setpoint_percent, controls.control_rods_position);
        self.update_temperatures(dt, controls.coolant_pump_speed);
        self.update_pressure();
        self.update_stability(dt, controls.stability_dampener_enabled);
        self.update_power_output();
        self.update_damage(dt);
        Ok(())
    }

    async fn write_telemetry(&self) -> SimResult<()> {
        self.write_telemetry_inner().await
    }

    fn get_telemetry(&self) -> serde_json::Value {
        serde_json::json!({
            "core_temperature_c": (self.state.core_temperature_c * 10.0).round() / 10.0,
            "coolant_temperature_c": (self.state.coolant_temperature_c * 10.0).round() / 10.0,
            "vessel_pressure_bar": (self.state.vessel_pressure_bar * 10.0).round() / 10.0,
            "power_output_mw": (self.state.power_output_mw * 100.0).round() / 100.0,
            "reaction_rate_percent": (self.state.reaction_rate * 1000.0).round() / 10.0,
            "coolant_flow_percent": (self.state.coolant_flow_rate * 1000.0).round() / 10.0,
            "stability": (self.state.stability * 100.0).round() / 100.0,
            "containment_integrity_percent": (self.state.containment_integrity * 1000.0).round() / 10.0,
            "reactor_active": self.state.reaction_rate > 0.01,
            "scram_active": self.state.scram_active,
            "high_temperature": self.state.core_temperature_c > self.params.max_safe_temperature_c,
            "stability_warning": self.state.stability < 0.5,
            "overtemp_time_sec": self.state.cumulative_overtemp_time.round(),
            "damage_percent": (self.state.damage_level * 1000.0).round() / 10.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PhysicsEngine;
    use plantsim_common::types::{DeviceKind, Protocol};
    use plantsim_store::clock::ClockMode;
    use std::collections::HashSet;

    async fn make_engine() -> ReactorEngine {
        let store = StateStore::with_default_capacity();
        store
            .register_device("reactor_1", DeviceKind::ReactorPlc, 1, HashSet::from([Protocol::S7comm]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        ReactorEngine::new("reactor_1", store, clock, ReactorParameters::default())
    }

    #[tokio::test]
    async fn scram_reset_rejected_when_hot() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.scram_active = true;
        engine.state.core_temperature_c = 500.0;
        assert!(!engine.reset_scram());
        assert!(engine.is_scram_active());
    }

    #[tokio::test]
    async fn scram_reset_succeeds_when_safe() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.scram_active = true;
        engine.state.core_temperature_c = 100.0;
        engine.state.stability = 0.95;
        engine.state.containment_integrity = 0.99;
        assert!(engine.reset_scram());
    }

    #[tokio::test]
    async fn auto_scram_on_critical_temperature() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.core_temperature_c = 500.0;
        engine.controls.control_rods_position = 100.0;
        engine.update(1.0).unwrap();
        assert!(engine.is_scram_active());
    }

    #[tokio::test]
    async fn scram_decays_reaction_rate_by_half_life() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.reaction_rate = 1.0;
        engine.controls.emergency_shutdown = true;
        engine.update(SCRAM_HALF_LIFE_S).unwrap();
        assert!((engine.get_state().reaction_rate - 0.5).abs() < 0.01);
    }
}
