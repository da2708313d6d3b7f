//! Steam turbine physics: shaft speed response to a
//! governor setpoint, thermal lag, vibration, power curve, and
//! overspeed damage accumulation.

use async_trait::async_trait;
use plantsim_common::error::{SimError, SimResult};
use plantsim_common::memory::MemoryValue;
use plantsim_store::store::StateStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::PhysicsEngine;

/// Overspeed trip point as a ratio of rated speed.
const OVERSPEED_TRIP_RATIO: f64 = 1.1;

#[derive(Debug, Clone, Serialize)]
pub struct TurbineState {
    pub shaft_speed_rpm: f64,
    pub steam_pressure_psi: f64,
    pub steam_temperature_f: f64,
    pub bearing_temperature_f: f64,
    pub vibration_mils: f64,
    pub power_output_mw: f64,
    pub cumulative_overspeed_time: f64,
    pub damage_level: f64,
    pub trip_active: bool,
}

impl Default for TurbineState {
    fn default() -> Self {
        Self {
            shaft_speed_rpm: 0.0,
            steam_pressure_psi: 0.0,
            steam_temperature_f: 0.0,
            bearing_temperature_f: 70.0,
            vibration_mils: 0.0,
            power_output_mw: 0.0,
            cumulative_overspeed_time: 0.0,
            damage_level: 0.0,
            trip_active: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurbineParameters {
    pub rated_speed_rpm: f64,
    pub rated_power_mw: f64,
    pub max_safe_speed_rpm: f64,
    pub acceleration_rate: f64,
    pub deceleration_rate: f64,
    pub vibration_normal_mils: f64,
    pub vibration_critical_mils: f64,
}

impl Default for TurbineParameters {
    fn default() -> Self {
        Self {
            rated_speed_rpm: 3600.0,
            rated_power_mw: 100.0,
            max_safe_speed_rpm: 3960.0,
            acceleration_rate: 100.0,
            deceleration_rate: 50.0,
            vibration_normal_mils: 2.0,
            vibration_critical_mils: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TurbineControls {
    speed_setpoint_rpm: f64,
    governor_enabled: bool,
    emergency_trip: bool,
}

pub struct TurbineEngine {
    device_name: String,
    store: Arc<StateStore>,
    params: TurbineParameters,
    state: TurbineState,
    controls: TurbineControls,
    initialised: bool,
}

impl TurbineEngine {
    pub fn new(device_name: impl Into<String>, store: Arc<StateStore>, params: TurbineParameters) -> Self {
        Self {
            device_name: device_name.into(),
            store,
            params,
            state: TurbineState::default(),
            controls: TurbineControls::default(),
            initialised: false,
        }
    }

    pub fn get_state(&self) -> TurbineState {
        self.state.clone()
    }

    pub fn is_trip_active(&self) -> bool {
        self.state.trip_active
    }

    /// Force an emergency trip immediately, independent of the next
    /// `read_control_inputs` cycle. Used by safety controllers driving
    /// the engine's safe-state action every cycle while a demand is
    /// latched; persisted on `state.trip_active` so it survives the
    /// next `read_control_inputs` overwriting `controls.emergency_trip`
    /// from the (unlatched) store-mediated command path.
    pub fn force_trip(&mut self) {
        self.controls.emergency_trip = true;
        self.state.trip_active = true;
    }

    /// A trip reset is only meaningful once the shaft has coasted down
    /// out of the overspeed band.
    pub fn safe_state_precondition(&self) -> bool {
        self.state.shaft_speed_rpm < self.params.rated_speed_rpm
    }

    /// Clear a latched trip, letting the governor resume control next
    /// cycle. Callers are expected to have already checked
    /// `safe_state_precondition`.
    pub fn reset_trip(&mut self) {
        self.controls.emergency_trip = false;
        self.state.trip_active = false;
    }

    fn update_with_governor(&mut self, dt: f64, setpoint_rpm: f64) {
        let setpoint_rpm = setpoint_rpm.clamp(0.0, self.params.max_safe_speed_rpm * 1.1);
        let speed_error = setpoint_rpm - self.state.shaft_speed_rpm;
        if speed_error.abs() < 1.0 {
            self.state.shaft_speed_rpm = setpoint_rpm;
            return;
        }
        if speed_error > 0.0 {
            let accel = self.params.acceleration_rate.min(speed_error.abs() * 10.0);
            self.state.shaft_speed_rpm += accel * dt;
        } else {
            let decel = self.params.deceleration_rate.min(speed_error.abs() * 10.0);
            self.state.shaft_speed_rpm -= decel * dt;
        }
        self.state.shaft_speed_rpm = self.state.shaft_speed_rpm.max(0.0);
    }

    fn natural_deceleration(&mut self, dt: f64) {
        if self.state.shaft_speed_rpm > 0.0 {
            self.state.shaft_speed_rpm -= self.params.deceleration_rate * dt;
            self.state.shaft_speed_rpm = self.state.shaft_speed_rpm.max(0.0);
        }
    }

    fn emergency_shutdown(&mut self, dt: f64) {
        if self.state.shaft_speed_rpm > 0.0 {
            let emergency_decel = self.params.deceleration_rate * 2.0;
            self.state.shaft_speed_rpm -= emergency_decel * dt;
            self.state.shaft_speed_rpm = self.state.shaft_speed_rpm.max(0.0);
        }
        let ambient = 70.0;
        let thermal_tc = 0.1;
        self.state.bearing_temperature_f += (ambient - self.state.bearing_temperature_f) * thermal_tc * dt;
        self.state.steam_temperature_f += (ambient - self.state.steam_temperature_f) * thermal_tc * 0.5 * dt;
    }

    fn update_temperatures(&mut self, dt: f64) {
        let speed_factor = self.state.shaft_speed_rpm / self.params.rated_speed_rpm;
        let vibration_factor = self.state.vibration_mils / self.params.vibration_normal_mils;

        let target_bearing_temp = 70.0 + speed_factor * 80.0 + vibration_factor * 20.0;
        let thermal_tc = 0.1;
        let temp_error = target_bearing_temp - self.state.bearing_temperature_f;
        self.state.bearing_temperature_f += temp_error * thermal_tc * dt;

        let (target_steam_temp, target_steam_pressure) = if self.state.shaft_speed_rpm > 100.0 {
            (600.0 + speed_factor * 300.0, 1000.0 + speed_factor * 800.0)
        } else {
            (70.0, 0.0)
        };

        let steam_tc = 0.05;
        let steam_temp_error = target_steam_temp - self.state.steam_temperature_f;
        self.state.steam_temperature_f += steam_temp_error * steam_tc * dt;

        let pressure_error = target_steam_pressure - self.state.steam_pressure_psi;
        self.state.steam_pressure_psi += pressure_error * thermal_tc * dt;
    }

    fn update_vibration(&mut self) {
        let speed_deviation = (self.state.shaft_speed_rpm - self.params.rated_speed_rpm).abs();
        let deviation_factor = speed_deviation / self.params.rated_speed_rpm;
        self.state.vibration_mils = self.params.vibration_normal_mils * (1.0 + deviation_factor * 3.0);
        self.state.vibration_mils *= 1.0 + self.state.damage_level;

        if self.state.vibration_mils > self.params.vibration_critical_mils {
            warn!(device = %self.device_name, mils = self.state.vibration_mils, "high turbine vibration");
        }
    }

    fn update_power_output(&mut self) {
        let speed_ratio = self.state.shaft_speed_rpm / self.params.rated_speed_rpm;
        self.state.power_output_mw = if speed_ratio < 0.2 {
            0.0
        } else if speed_ratio <= 1.0 {
            self.params.rated_power_mw * speed_ratio
        } else {
            self.params.rated_power_mw * speed_ratio.min(1.05)
        };
    }

    fn update_damage(&mut self, dt: f64) {
        if self.state.shaft_speed_rpm <= self.params.rated_speed_rpm {
            return;
        }
        self.state.cumulative_overspeed_time += dt;
        let overspeed_ratio = self.state.shaft_speed_rpm / self.params.rated_speed_rpm;
        if overspeed_ratio > OVERSPEED_TRIP_RATIO {
            let damage_rate = (overspeed_ratio - OVERSPEED_TRIP_RATIO) * 0.01;
            self.state.damage_level = (self.state.damage_level + damage_rate * dt).min(1.0);
            if self.state.damage_level > 0.1 {
                warn!(
                    device = %self.device_name,
                    damage_pct = self.state.damage_level * 100.0,
                    rpm = self.state.shaft_speed_rpm,
                    "turbine overspeed damage accumulating"
                );
            }
        }
    }

    async fn write_telemetry_inner(&self) -> SimResult<()> {
        let telemetry: Vec<(String, MemoryValue)> = vec![
            ("holding_registers[0]".into(), MemoryValue::I32(self.state.shaft_speed_rpm as i32)),
            ("holding_registers[1]".into(), MemoryValue::I32(self.state.steam_temperature_f as i32)),
            ("holding_registers[2]".into(), MemoryValue::I32(self.state.steam_pressure_psi as i32)),
            ("holding_registers[3]".into(), MemoryValue::I32(self.state.bearing_temperature_f as i32)),
            ("holding_registers[4]".into(), MemoryValue::I32((self.state.vibration_mils * 10.0) as i32)),
            ("holding_registers[5]".into(), MemoryValue::I32(self.state.power_output_mw as i32)),
            ("holding_registers[6]".into(), MemoryValue::I32(self.state.cumulative_overspeed_time as i32)),
            ("holding_registers[7]".into(), MemoryValue::I32((self.state.damage_level * 100.0) as i32)),
            ("coils[0]".into(), MemoryValue::Bool(self.state.shaft_speed_rpm > 100.0)),
            ("coils[1]".into(), MemoryValue::Bool(self.state.shaft_speed_rpm > self.params.max_safe_speed_rpm)),
            ("coils[2]".into(), MemoryValue::Bool(self.state.vibration_mils > self.params.vibration_critical_mils)),
            ("coils[3]".into(), MemoryValue::Bool(self.state.bearing_temperature_f > 150.0)),
            ("coils[4]".into(), MemoryValue::Bool(self.state.damage_level > 0.5)),
            ("coils[5]".into(), MemoryValue::Bool(self.state.trip_active)),
        ];
        self.store.bulk_write_memory(&self.device_name, telemetry).await
    }
}

#[async_trait]
impl PhysicsEngine for TurbineEngine {
    async fn initialise(&mut self) -> SimResult<()> {
        if self.store.get_device_state(&self.device_name).await.is_none() {
            return Err(SimError::UnknownDevice(self.device_name.clone()));
        }
        self.write_telemetry_inner().await?;
        self.initialised = true;
        Ok(())
    }

    async fn read_control_inputs(&mut self) -> SimResult<()> {
        let speed_setpoint = self.store.read_memory(&self.device_name, "holding_registers[10]").await;
        let governor_enabled = self.store.read_memory(&self.device_name, "coils[10]").await;
        let emergency_trip = self.store.read_memory(&self.device_name, "coils[11]").await;

        self.controls = TurbineControls {
            speed_setpoint_rpm: speed_setpoint.and_then(|v| v.as_f64()).unwrap_or(0.0),
            governor_enabled: governor_enabled.and_then(|v| v.as_bool()).unwrap_or(false),
            emergency_trip: emergency_trip.and_then(|v| v.as_bool()).unwrap_or(false),
        };
        Ok(())
    }

    fn update(&mut self, dt: f64) -> SimResult<()> {
        if !self.initialised {
            return Err(SimError::NotInitialised(self.device_name.clone()));
        }
        if dt <= 0.0 {
            debug!(device = %self.device_name, dt, "skipping turbine update for non-positive dt");
            return Ok(());
        }

        let controls = self.controls.clone();
        if controls.emergency_trip || self.state.trip_active {
            self.emergency_shutdown(dt);
        } else if controls.governor_enabled {
            self.update_with_governor(dt, controls.speed_setpoint_rpm);
        } else {
            self.natural_deceleration(dt);
        }

        self.update_temperatures(dt);
        self.update_vibration();
        self.update_power_output();
        self.update_damage(dt);
        Ok(())
    }

    async fn write_telemetry(&self) -> SimResult<()> {
        self.write_telemetry_inner().await
    }

    fn get_telemetry(&self) -> serde_json::Value {
        serde_json::json!({
            "shaft_speed_rpm": self.state.shaft_speed_rpm.round(),
            "power_output_mw": (self.state.power_output_mw * 10.0).round() / 10.0,
            "steam_pressure_psi": self.state.steam_pressure_psi.round(),
            "steam_temperature_f": self.state.steam_temperature_f.round(),
            "bearing_temperature_f": self.state.bearing_temperature_f.round(),
            "vibration_mils": (self.state.vibration_mils * 10.0).round() / 10.0,
            "turbine_running": self.state.shaft_speed_rpm > 100.0,
            "overspeed": self.state.shaft_speed_rpm > self.params.max_safe_speed_rpm,
            "overspeed_time_sec": self.state.cumulative_overspeed_time.round(),
            "damage_percent": (self.state.damage_level * 1000.0).round() / 10.0,
            "trip_active": self.state.trip_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_common::types::{DeviceKind, Protocol};
    use std::collections::HashSet;

    async fn make_engine() -> TurbineEngine {
        let store = StateStore::with_default_capacity();
        store
            .register_device(
                "turbine_1",
                DeviceKind::TurbinePlc,
                1,
                HashSet::from([Protocol::ModbusTcp]),
                Default::default(),
                0.0,
            )
            .await
            .unwrap();
        TurbineEngine::new("turbine_1", store, TurbineParameters::default())
    }

    #[tokio::test]
    async fn rejects_update_before_initialise() {
        let mut engine = make_engine().await;
        assert!(matches!(engine.update(1.0), Err(SimError::NotInitialised(_))));
    }

    #[tokio::test]
    async fn governor_accelerates_toward_setpoint() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.controls = TurbineControls { speed_setpoint_rpm: 3600.0, governor_enabled: true, emergency_trip: false };
        for _ in 0..500 {
            engine.update(1.0).unwrap();
        }
        assert!((engine.get_state().shaft_speed_rpm - 3600.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn overspeed_accumulates_damage() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.shaft_speed_rpm = 4200.0;
        for _ in 0..100 {
            engine.update_damage(1.0);
        }
        assert!(engine.get_state().damage_level > 0.0);
    }

    #[tokio::test]
    async fn trip_decelerates_at_double_rate() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.shaft_speed_rpm = 1000.0;
        engine.controls.emergency_trip = true;
        engine.update(1.0).unwrap();
        assert!(engine.get_state().shaft_speed_rpm < 1000.0 - engine.params.deceleration_rate);
    }
}
