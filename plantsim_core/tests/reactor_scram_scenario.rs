//! Sustained reactor overheat with no coolant flow must trip the
//! engine's own critical-temperature auto-SCRAM, independent of the
//! safety controller, and the safety controller's reset must stay
//! gated until the reactor has actually cooled and stabilised.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use plantsim_common::memory::MemoryValue;
use plantsim_common::types::{DeviceKind, Protocol};
use plantsim_core::controller::ScanController;
use plantsim_core::safety::ReactorSafetyController;
use plantsim_physics::engine::PhysicsEngine;
use plantsim_physics::reactor::{ReactorEngine, ReactorParameters};
use plantsim_store::clock::{ClockMode, SimulationClock};
use plantsim_store::logger::LoggerRegistry;
use plantsim_store::store::StateStore;

#[tokio::test]
async fn sustained_overheat_auto_scrams_and_reset_stays_gated_until_cool() {
    let store = StateStore::with_default_capacity();
    store
        .register_device("reactor_1", DeviceKind::ReactorPlc, 1, HashSet::from([Protocol::S7comm]), Default::default(), 0.0)
        .await
        .unwrap();
    let clock = SimulationClock::new(ClockMode::Stepped, 1.0);

    let params = ReactorParameters::default();
    let mut engine = ReactorEngine::new("reactor_1", store.clone(), clock.clone(), params.clone());
    engine.initialise().await.unwrap();

    // Full power demand, rods fully withdrawn, coolant pump off: nothing
    // carries heat away from the core.
    store
        .bulk_write_memory(
            "reactor_1",
            vec![
                ("holding_registers[10]".into(), MemoryValue::F64(100.0)),
                ("holding_registers[11]".into(), MemoryValue::F64(0.0)),
                ("holding_registers[12]".into(), MemoryValue::F64(100.0)),
            ],
        )
        .await
        .unwrap();

    let mut scrammed = false;
    for _ in 0..2000 {
        engine.read_control_inputs().await.unwrap();
        engine.update(1.0).unwrap();
        engine.write_telemetry().await.unwrap();
        if engine.is_scram_active() {
            scrammed = true;
            break;
        }
    }
    assert!(scrammed, "sustained overheat without coolant must auto-SCRAM within 2000 simulated seconds");
    assert!(engine.get_state().core_temperature_c > params.rated_temperature_c);

    let logger = LoggerRegistry::new(clock, store.clone()).get_logger("reactor_safety", Some("reactor_1"));
    let shared = Arc::new(Mutex::new(engine));
    let mut safety = ReactorSafetyController::new("reactor_1_safety", Arc::clone(&shared), logger);

    // Reset must be rejected while the core is still hot.
    safety.request_reset();
    safety.read_inputs().await.unwrap();
    safety.execute_logic().await.unwrap();
    assert!(shared.lock().is_scram_active(), "reset must be rejected while core is still above rated temperature");

    // Let decay heat and the forced coolant flow bring the core back
    // under rated temperature, then stability/containment were never
    // damaged (no low-stability path was exercised), so reset should
    // now succeed.
    for _ in 0..2000 {
        shared.lock().update(1.0).unwrap();
        if shared.lock().get_state().core_temperature_c < params.rated_temperature_c {
            break;
        }
    }
    assert!(shared.lock().get_state().core_temperature_c < params.rated_temperature_c, "core must cool back below rated temperature");

    safety.request_reset();
    safety.read_inputs().await.unwrap();
    safety.execute_logic().await.unwrap();
    assert!(!shared.lock().is_scram_active(), "reset must succeed once preconditions are satisfied");
}
