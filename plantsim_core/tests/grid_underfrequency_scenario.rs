//! A generation deficit drags grid frequency below the under-frequency
//! protection pickup; the substation RTU watching the grid device must
//! trip its relay and open every closed breaker, and refuse to close
//! them again until the relay is reset.

use std::collections::HashSet;

use plantsim_common::types::{DeviceKind, Protocol};
use plantsim_core::controller::ScanController;
use plantsim_core::rtu::{Breaker, BreakerState, ProtectionRelay, RelayType, SubstationRtu};
use plantsim_physics::engine::PhysicsEngine;
use plantsim_physics::grid::{GridEngine, GridParameters};
use plantsim_store::clock::{ClockMode, SimulationClock};
use plantsim_store::logger::LoggerRegistry;
use plantsim_store::store::StateStore;

#[tokio::test]
async fn generation_deficit_trips_underfrequency_relay_and_opens_breakers() {
    let store = StateStore::with_default_capacity();
    store
        .register_device("grid_1", DeviceKind::SubstationRtu, 1, HashSet::from([Protocol::Dnp3]), Default::default(), 0.0)
        .await
        .unwrap();
    store
        .register_device("substation_1", DeviceKind::SubstationRtu, 2, HashSet::from([Protocol::Dnp3]), Default::default(), 0.0)
        .await
        .unwrap();
    let clock = SimulationClock::new(ClockMode::Stepped, 1.0);

    // No generators are registered, so `update_from_devices` sees zero
    // generation against the fixed load: a sustained deficit.
    let params = GridParameters::default();
    let mut grid = GridEngine::new("grid_1", store.clone(), params.clone());
    grid.initialise().await.unwrap();

    let logger = LoggerRegistry::new(clock, store.clone()).get_logger("substation_rtu", Some("substation_1"));
    let mut rtu = SubstationRtu::new("substation_1", "grid_1", store.clone(), logger);
    rtu.add_relay(ProtectionRelay::new("relay_81", RelayType::Underfrequency, "underfrequency load shed", params.min_frequency_hz));
    rtu.add_breaker(Breaker::new("brk_main", "main incomer breaker", 800.0, 138.0));

    let mut tripped = false;
    for _ in 0..40 {
        grid.read_control_inputs().await.unwrap();
        grid.update(10.0).unwrap();
        grid.write_telemetry().await.unwrap();

        rtu.read_inputs().await.unwrap();
        rtu.execute_logic().await.unwrap();
        rtu.write_outputs().await.unwrap();

        if rtu.any_relay_tripped() {
            tripped = true;
            break;
        }
    }

    assert!(tripped, "sustained generation deficit must trip the underfrequency relay");
    assert!(grid.get_state().frequency_hz < params.min_frequency_hz);
    assert_eq!(rtu.breaker_state("brk_main"), Some(BreakerState::Open));
    assert!(!rtu.close_breaker("brk_main"), "breaker must not reclose while the relay is still latched");

    rtu.reset_relay("relay_81");
    assert!(rtu.close_breaker("brk_main"), "breaker may reclose once the relay is reset");
}
