//! A zone temperature setpoint commanded through the HVAC PLC must
//! settle the physics engine's actual zone temperature, driven only
//! through the store-mediated control registers the PLC writes.

use std::collections::HashSet;

use plantsim_common::types::{DeviceKind, Protocol};
use plantsim_core::controller::ScanController;
use plantsim_core::plc::HvacPlc;
use plantsim_physics::engine::PhysicsEngine;
use plantsim_physics::hvac::{HvacEngine, HvacParameters};
use plantsim_store::clock::{ClockMode, SimulationClock};
use plantsim_store::logger::LoggerRegistry;
use plantsim_store::store::StateStore;

const MODE_AUTO: f64 = 3.0;

#[tokio::test]
async fn commanded_setpoint_settles_zone_temperature() {
    let store = StateStore::with_default_capacity();
    store
        .register_device("hvac_1", DeviceKind::HvacPlc, 1, HashSet::from([Protocol::ModbusTcp]), Default::default(), 0.0)
        .await
        .unwrap();
    let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
    let logger = LoggerRegistry::new(clock.clone(), store.clone()).get_logger("hvac_plc", Some("hvac_1"));

    let params = HvacParameters::default();
    let mut engine = HvacEngine::new("hvac_1", store.clone(), clock, params.clone());
    engine.initialise().await.unwrap();

    let mut plc = HvacPlc::new("hvac_1_plc", "hvac_1", store.clone(), logger);
    let setpoint_c = params.max_temperature_c;
    plc.set_zone_temperature_command(setpoint_c);
    plc.set_fan_speed_command(80.0);
    plc.set_mode_command(MODE_AUTO as i64);
    plc.set_damper_command(20.0);
    plc.set_system_enabled(true);

    for _ in 0..1000 {
        plc.read_inputs().await.unwrap();
        plc.execute_logic().await.unwrap();
        plc.write_outputs().await.unwrap();

        engine.read_control_inputs().await.unwrap();
        engine.update(1.0).unwrap();
        engine.write_telemetry().await.unwrap();
    }

    let final_temp = engine.get_state().zone_temperature_c;
    assert!((final_temp - setpoint_c).abs() < 1.5, "zone temperature {final_temp} did not settle near setpoint {setpoint_c}");
    assert!(plc.status()["fan_running"].as_bool().unwrap());
}
