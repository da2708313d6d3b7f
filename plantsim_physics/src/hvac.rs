//! HVAC physics: PI-controlled zone temperature and
//! humidity, fan/damper actuator lag, and a stability proxy that
//! decays under out-of-band environmental stress.

use async_trait::async_trait;
use plantsim_common::error::{SimError, SimResult};
use plantsim_common::memory::MemoryValue;
use plantsim_store::clock::SimulationClock;
use plantsim_store::store::StateStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::PhysicsEngine;

const MODE_OFF: i64 = 0;
const MODE_HEAT: i64 = 1;
const MODE_COOL: i64 = 2;
const MODE_AUTO: i64 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct HvacState {
    pub zone_temperature_c: f64,
    pub zone_humidity_percent: f64,
    pub supply_air_temp_c: f64,
    pub return_air_temp_c: f64,
    pub duct_pressure_pa: f64,
    pub fan_speed_percent: f64,
    pub heating_valve_percent: f64,
    pub cooling_valve_percent: f64,
    pub damper_position_percent: f64,
    pub humidifier_output_percent: f64,
    pub stability: f64,
    pub energy_consumption_kw: f64,
}

impl Default for HvacState {
    fn default() -> Self {
        Self {
            zone_temperature_c: 20.0,
            zone_humidity_percent: 45.0,
            supply_air_temp_c: 20.0,
            return_air_temp_c: 20.0,
            duct_pressure_pa: 0.0,
            fan_speed_percent: 0.0,
            heating_valve_percent: 0.0,
            cooling_valve_percent: 0.0,
            damper_position_percent: 0.0,
            humidifier_output_percent: 0.0,
            stability: 1.0,
            energy_consumption_kw: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HvacParameters {
    pub zone_thermal_mass: f64,
    pub rated_airflow_m3s: f64,
    pub min_humidity_percent: f64,
    pub max_humidity_percent: f64,
    pub min_temperature_c: f64,
    pub max_temperature_c: f64,
    pub outside_temp_c: f64,
    pub outside_humidity_percent: f64,
    pub stability_threshold_temp_c: f64,
    pub stability_threshold_humidity: f64,
}

impl Default for HvacParameters {
    fn default() -> Self {
        Self {
            zone_thermal_mass: 500.0,
            rated_airflow_m3s: 5.0,
            min_humidity_percent: 40.0,
            max_humidity_percent: 55.0,
            min_temperature_c: 18.0,
            max_temperature_c: 22.0,
            outside_temp_c: 10.0,
            outside_humidity_percent: 70.0,
            stability_threshold_temp_c: 25.0,
            stability_threshold_humidity: 60.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct HvacControls {
    temperature_setpoint_c: f64,
    humidity_setpoint_percent: f64,
    fan_speed_command: f64,
    mode_select: i64,
    damper_command: f64,
    system_enable: bool,
    stability_dampener_enable: bool,
}

pub struct HvacEngine {
    device_name: String,
    store: Arc<StateStore>,
    clock: Arc<SimulationClock>,
    params: HvacParameters,
    state: HvacState,
    controls: HvacControls,
    initialised: bool,
    temp_integral: f64,
    humidity_integral: f64,
}

impl HvacEngine {
    pub fn new(
        device_name: impl Into<String>,
        store: Arc<StateStore>,
        clock: Arc<SimulationClock>,
        params: HvacParameters,
    ) -> Self {
        Self {
            device_name: device_name.into(),
            store,
            clock,
            params,
            state: HvacState::default(),
            controls: HvacControls { stability_dampener_enable: true, ..Default::default() },
            initialised: false,
            temp_integral: 0.0,
            humidity_integral: 0.0,
        }
    }

    pub fn get_state(&self) -> HvacState {
        self.state.clone()
    }

    pub fn set_outside_conditions(&mut self, temperature_c: f64, humidity_percent: f64) {
        self.params.outside_temp_c = temperature_c;
        self.params.outside_humidity_percent = humidity_percent.clamp(0.0, 100.0);
    }

    fn system_off(&mut self, dt: f64) {
        self.state.fan_speed_percent *= 0.9_f64.powf(dt);
        if self.state.fan_speed_percent < 1.0 {
            self.state.fan_speed_percent = 0.0;
        }
        self.state.heating_valve_percent *= 0.8_f64.powf(dt);
        self.state.cooling_valve_percent *= 0.8_f64.powf(dt);
        self.state.damper_position_percent *= 0.9_f64.powf(dt);
        self.state.duct_pressure_pa *= 0.7_f64.powf(dt);

        let drift_rate = 0.001;
        self.state.zone_temperature_c += (self.params.outside_temp_c - self.state.zone_temperature_c) * drift_rate * dt;
        self.state.zone_humidity_percent +=
            (self.params.outside_humidity_percent - self.state.zone_humidity_percent) * drift_rate * dt;

        if self.state.stability > 0.5 {
            self.state.stability = (self.state.stability - 0.001 * dt).max(0.5);
        }

        self.state.energy_consumption_kw *= 0.5_f64.powf(dt);
        if self.state.energy_consumption_kw < 0.1 {
            self.state.energy_consumption_kw = 0.0;
        }
    }

    fn update_fan(&mut self, dt: f64, speed_command: f64) {
        let speed_command = speed_command.clamp(0.0, 100.0);
        let speed_error = speed_command - self.state.fan_speed_percent;
        let fan_time_constant = 5.0;
        self.state.fan_speed_percent += speed_error * (dt / fan_time_constant);
        self.state.fan_speed_percent = self.state.fan_speed_percent.clamp(0.0, 100.0);

        let max_pressure = 500.0;
        let target_pressure = max_pressure * (self.state.fan_speed_percent / 100.0).powi(2);
        let pressure_error = target_pressure - self.state.duct_pressure_pa;
        self.state.duct_pressure_pa += pressure_error * 0.5 * dt;
    }

    fn update_damper(&mut self, dt: f64, damper_command: f64) {
        let damper_command = damper_command.clamp(0.0, 100.0);
        let damper_error = damper_command - self.state.damper_position_percent;
        let damper_time_constant = 30.0;
        self.state.damper_position_percent += damper_error * (dt / damper_time_constant);
        self.state.damper_position_percent = self.state.damper_position_percent.clamp(0.0, 100.0);
    }

    fn update_heating_cooling(&mut self, dt: f64, temp_setpoint: f64, mode: i64) {
        let temp_setpoint = temp_setpoint.clamp(self.params.min_temperature_c, self.params.max_temperature_c);
        let temp_error = temp_setpoint - self.state.zone_temperature_c;

        let kp = 10.0;
        let ki = 0.5;
        self.temp_integral = (self.temp_integral + temp_error * dt).clamp(-50.0, 50.0);
        let control_output = kp * temp_error + ki * self.temp_integral;

        match mode {
            MODE_OFF => {
                self.state.heating_valve_percent = 0.0;
                self.state.cooling_valve_percent = 0.0;
            }
            MODE_HEAT => {
                self.state.heating_valve_percent = control_output.clamp(0.0, 100.0);
                self.state.cooling_valve_percent = 0.0;
            }
            MODE_COOL => {
                self.state.heating_valve_percent = 0.0;
                self.state.cooling_valve_percent = (-control_output).clamp(0.0, 100.0);
            }
            MODE_AUTO => {
                if control_output > 0.0 {
                    self.state.heating_valve_percent = control_output.clamp(0.0, 100.0);
                    self.state.cooling_valve_percent = 0.0;
                } else {
                    self.state.heating_valve_percent = 0.0;
                    self.state.cooling_valve_percent = (-control_output).clamp(0.0, 100.0);
                }
            }
            _ => {}
        }

        if self.state.heating_valve_percent > 0.0 {
            let heating_effect = self.state.heating_valve_percent / 100.0 * 15.0;
            self.state.supply_air_temp_c = self.state.return_air_temp_c + heating_effect;
        } else if self.state.cooling_valve_percent > 0.0 {
            let cooling_effect = self.state.cooling_valve_percent / 100.0 * 10.0;
            self.state.supply_air_temp_c = self.state.return_air_temp_c - cooling_effect;
        } else {
            let mixing_ratio = self.state.damper_position_percent / 100.0;
            self.state.supply_air_temp_c =
                self.state.return_air_temp_c * (1.0 - mixing_ratio) + self.params.outside_temp_c * mixing_ratio;
        }
    }

    fn update_zone_temperature(&mut self, dt: f64) {
        let airflow_fraction = self.state.fan_speed_percent / 100.0;
        let airflow = airflow_fraction * self.params.rated_airflow_m3s;

        let air_heat_capacity = 1.2;
        let temp_diff = self.state.supply_air_temp_c - self.state.zone_temperature_c;
        let heat_from_air = airflow * air_heat_capacity * temp_diff;

        let ua_value = 0.5;
        let heat_loss = ua_value * (self.state.zone_temperature_c - self.params.outside_temp_c);

        let mut internal_gains = 5.0;
        if self.state.stability < 0.7 {
            let instability = 1.0 - self.state.stability;
            let fluctuation = (self.clock.now() * 0.5).sin() * instability * 2.0;
            internal_gains += fluctuation;
        }

        let net_heat_kw = heat_from_air - heat_loss + internal_gains;
        self.state.zone_temperature_c += net_heat_kw * dt / self.params.zone_thermal_mass;
        self.state.return_air_temp_c = self.state.zone_temperature_c + 0.5;
    }

    fn update_humidity(&mut self, dt: f64, humidity_setpoint: f64) {
        let humidity_setpoint = humidity_setpoint.clamp(self.params.min_humidity_percent, self.params.max_humidity_percent);
        let humidity_error = humidity_setpoint - self.state.zone_humidity_percent;

        let kp = 2.0;
        let ki = 0.1;
        self.humidity_integral = (self.humidity_integral + humidity_error * dt).clamp(-100.0, 100.0);
        let control_output = kp * humidity_error + ki * self.humidity_integral;

        self.state.humidifier_output_percent = if control_output > 0.0 { control_output.clamp(0.0, 100.0) } else { 0.0 };

        let humidifier_effect = self.state.humidifier_output_percent / 100.0 * 5.0 * dt;
        let airflow_fraction = self.state.fan_speed_percent / 100.0;
        let damper_fraction = self.state.damper_position_percent / 100.0;
        let outside_air_effect = (self.params.outside_humidity_percent - self.state.zone_humidity_percent)
            * airflow_fraction
            * damper_fraction
            * 0.01
            * dt;

        let mut natural_sources = 0.1 * dt;
        if self.state.stability < 0.6 {
            let instability = 1.0 - self.state.stability;
            let fluctuation = (self.clock.now() * 0.3).cos() * instability * 3.0 * dt;
            natural_sources += fluctuation;
        }

        self.state.zone_humidity_percent += humidifier_effect + outside_air_effect + natural_sources;
        self.state.zone_humidity_percent = self.state.zone_humidity_percent.clamp(10.0, 90.0);
    }

    fn update_stability(&mut self, dt: f64, dampener_enabled: bool) {
        let mut temp_stress = 0.0;
        if self.state.zone_temperature_c > self.params.stability_threshold_temp_c {
            temp_stress = (self.state.zone_temperature_c - self.params.stability_threshold_temp_c) / 10.0;
        } else if self.state.zone_temperature_c < self.params.min_temperature_c {
            temp_stress = (self.params.min_temperature_c - self.state.zone_temperature_c) / 10.0;
        }

        let mut humidity_stress = 0.0;
        if self.state.zone_humidity_percent > self.params.stability_threshold_humidity {
            humidity_stress = (self.state.zone_humidity_percent - self.params.stability_threshold_humidity) / 20.0;
        } else if self.state.zone_humidity_percent < self.params.min_humidity_percent {
            humidity_stress = (self.params.min_humidity_percent - self.state.zone_humidity_percent) / 20.0;
        }

        let total_stress = temp_stress + humidity_stress;
        let (recovery_rate, decay_rate) =
            if dampener_enabled { (0.02, 0.01 * total_stress) } else { (0.005, 0.05 * total_stress) };

        self.state.stability = (self.state.stability + (recovery_rate - decay_rate) * dt).clamp(0.0, 1.0);

        if self.state.stability < 0.5 {
            warn!(device = %self.device_name, stability = self.state.stability, "HVAC stability warning");
        }
    }

    fn update_energy_consumption(&mut self) {
        let fan_power = 15.0 * (self.state.fan_speed_percent / 100.0).powi(3);
        let heating_power = 50.0 * self.state.heating_valve_percent / 100.0;
        let cooling_power = 75.0 * self.state.cooling_valve_percent / 100.0 / 3.0;
        let humidifier_power = 5.0 * self.state.humidifier_output_percent / 100.0;
        let dampener_power = if self.state.stability < 0.9 { 2.0 } else { 0.5 };

        self.state.energy_consumption_kw = fan_power + heating_power + cooling_power + humidifier_power + dampener_power;
    }

    async fn write_telemetry_inner(&self) -> SimResult<()> {
        let telemetry: Vec<(String, MemoryValue)> = vec![
            ("holding_registers[0]".into(), MemoryValue::I32((self.state.zone_temperature_c * 10.0) as i32)),
            ("holding_registers[1]".into(), MemoryValue::I32((self.state.zone_humidity_percent * 10.0) as i32)),
            ("holding_registers[2]".into(), MemoryValue::I32((self.state.supply_air_temp_c * 10.0) as i32)),
            ("holding_registers[3]".into(), MemoryValue::I32(self.state.duct_pressure_pa as i32)),
            ("holding_registers[4]".into(), MemoryValue::I32((self.state.stability * 100.0) as i32)),
            ("holding_registers[5]".into(), MemoryValue::I32(self.state.fan_speed_percent as i32)),
            ("holding_registers[6]".into(), MemoryValue::I32(self.state.heating_valve_percent as i32)),
            ("holding_registers[7]".into(), MemoryValue::I32(self.state.cooling_valve_percent as i32)),
            ("holding_registers[8]".into(), MemoryValue::I32(self.state.damper_position_percent as i32)),
            ("holding_registers[9]".into(), MemoryValue::I32((self.state.energy_consumption_kw * 10.0) as i32)),
            ("coils[0]".into(), MemoryValue::Bool(self.state.fan_speed_percent > 5.0)),
            ("coils[1]".into(), MemoryValue::Bool(self.state.heating_valve_percent > 5.0)),
            ("coils[2]".into(), MemoryValue::Bool(self.state.cooling_valve_percent > 5.0)),
            (
                "coils[3]".into(),
                MemoryValue::Bool(
                    self.state.zone_temperature_c < self.params.min_temperature_c
                        || self.state.zone_temperature_c > self.params.max_temperature_c,
                ),
            ),
            (
                "coils[4]".into(),
                MemoryValue::Bool(
                    self.state.zone_humidity_percent < self.params.min_humidity_percent
                        || self.state.zone_humidity_percent > self.params.max_humidity_percent,
                ),
            ),
            ("coils[5]".into(), MemoryValue::Bool(self.state.stability < 0.5)),
            ("coils[6]".into(), MemoryValue::Bool(self.state.stability < 0.3)),
        ];
        self.store.bulk_write_memory(&self.device_name, telemetry).await
    }
}

#[async_trait]
impl PhysicsEngine for HvacEngine {
    async fn initialise(&mut self) -> SimResult<()> {
        if self.store.get_device_state(&self.device_name).await.is_none() {
            return Err(SimError::UnknownDevice(self.device_name.clone()));
        }
        self.write_telemetry_inner().await?;
        self.initialised = true;
        Ok(())
    }

    async fn read_control_inputs(&mut self) -> SimResult<()> {
        let temp_setpoint = self.store.read_memory(&self.device_name, "holding_registers[10]").await;
        let humidity_setpoint = self.store.read_memory(&self.device_name, "holding_registers[11]").await;
        let fan_speed = self.store.read_memory(&self.device_name, "holding_registers[12]").await;
        let mode_select = self.store.read_memory(&self.device_name, "holding_registers[13]").await;
        let damper_command = self.store.read_memory(&self.device_name, "holding_registers[14]").await;
        let system_enable = self.store.read_memory(&self.device_name, "coils[10]").await;
        let dampener = self.store.read_memory(&self.device_name, "coils[11]").await;

        self.controls = HvacControls {
            temperature_setpoint_c: temp_setpoint.and_then(|v| v.as_f64()).unwrap_or(20.0),
            humidity_setpoint_percent: humidity_setpoint.and_then(|v| v.as_f64()).unwrap_or(45.0),
            fan_speed_command: fan_speed.and_then(|v| v.as_f64()).unwrap_or(0.0),
            mode_select: mode_select.and_then(|v| v.as_f64()).map(|v| v as i64).unwrap_or(MODE_OFF),
            damper_command: damper_command.and_then(|v| v.as_f64()).unwrap_or(0.0),
            system_enable: system_enable.and_then(|v| v.as_bool()).unwrap_or(false),
            stability_dampener_enable: dampener.and_then(|v| v.as_bool()).unwrap_or(true),
        };
        Ok(())
    }

    fn update(&mut self, dt: f64) -> SimResult<()> {
        if !self.initialised {
            return Err(SimError::NotInitialised(self.device_name.clone()));
        }
        if dt <= 0.0 {
            debug!(device = %self.device_name, dt, "skipping HVAC update for non-positive dt");
            return Ok(());
        }

        let controls = self.controls.clone();
        if !controls.system_enable {
            self.system_off(dt);
            return Ok(());
        }

        self.update_fan(dt, controls.fan_speed_command);
        self.update_damper(dt, controls.damper_command);
        self.update_heating_cooling(dt, controls.temperature_setpoint_c, controls.mode_select);
        self.update_zone_temperature(dt);
        self.update_humidity(dt, controls.humidity_setpoint_percent);
        self.update_stability(dt, controls.stability_dampener_enable);
        self.update_energy_consumption();
        Ok(())
    }

    async fn write_telemetry(&self) -> SimResult<()> {
        self.write_telemetry_inner().await
    }

    fn get_telemetry(&self) -> serde_json::Value {
        serde_json::json!({
            "zone_temperature_c": (self.state.zone_temperature_c * 10.0).round() / 10.0,
            "zone_humidity_percent": (self.state.zone_humidity_percent * 10.0).round() / 10.0,
            "supply_air_temp_c": (self.state.supply_air_temp_c * 10.0).round() / 10.0,
            "duct_pressure_pa": self.state.duct_pressure_pa.round(),
            "fan_speed_percent": (self.state.fan_speed_percent * 10.0).round() / 10.0,
            "heating_valve_percent": (self.state.heating_valve_percent * 10.0).round() / 10.0,
            "cooling_valve_percent": (self.state.cooling_valve_percent * 10.0).round() / 10.0,
            "stability": (self.state.stability * 100.0).round() / 100.0,
            "energy_consumption_kw": (self.state.energy_consumption_kw * 10.0).round() / 10.0,
            "fan_running": self.state.fan_speed_percent > 5.0,
            "heating_active": self.state.heating_valve_percent > 5.0,
            "cooling_active": self.state.cooling_valve_percent > 5.0,
            "temperature_alarm": self.state.zone_temperature_c < self.params.min_temperature_c
                || self.state.zone_temperature_c > self.params.max_temperature_c,
            "humidity_alarm": self.state.zone_humidity_percent < self.params.min_humidity_percent
                || self.state.zone_humidity_percent > self.params.max_humidity_percent,
            "stability_warning": self.state.stability < 0.5,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_common::types::{DeviceKind, Protocol};
    use plantsim_store::clock::ClockMode;
    use std::collections::HashSet;

    async fn make_engine() -> HvacEngine {
        let store = StateStore::with_default_capacity();
        store
            .register_device("hvac_1", DeviceKind::HvacPlc, 1, HashSet::from([Protocol::ModbusTcp]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        HvacEngine::new("hvac_1", store, clock, HvacParameters::default())
    }

    #[tokio::test]
    async fn settles_toward_setpoint_in_auto_mode() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.zone_temperature_c = 25.0;
        engine.controls = HvacControls {
            temperature_setpoint_c: 20.0,
            humidity_setpoint_percent: 45.0,
            fan_speed_command: 80.0,
            mode_select: MODE_AUTO,
            damper_command: 20.0,
            system_enable: true,
            stability_dampener_enable: true,
        };
        for _ in 0..6000 {
            engine.update(1.0).unwrap();
        }
        assert!((engine.get_state().zone_temperature_c - 20.0).abs() < 0.5);
        assert!(engine.get_state().energy_consumption_kw >= 0.0);
    }

    #[tokio::test]
    async fn disabled_system_drifts_toward_ambient() {
        let mut engine = make_engine().await;
        engine.initialise().await.unwrap();
        engine.state.fan_speed_percent = 50.0;
        engine.controls.system_enable = false;
        engine.update(10.0).unwrap();
        assert!(engine.get_state().fan_speed_percent < 50.0);
    }
}
