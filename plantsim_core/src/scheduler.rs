//! Scheduler / Orchestrator: owns the outer physics
//! loop and every controller's independent scan task.
//!
//! `initialise` builds components in a fixed dependency order {clock →
//! store → logger → physics engines → controllers → safety →
//! boundary}, returning `ConfigurationError` on the first failure and
//! leaving already-built components intact for diagnostics.
//!
//! The outer loop's own errors halt the loop only — the clock and
//! every controller's independent scan task are untouched; a
//! controller's own errors are absorbed by `ScanController::scan_cycle`
//! and never reach here at all.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use plantsim_common::error::{SimError, SimResult};
use plantsim_physics::engine::PhysicsEngine;
use plantsim_store::clock::SimulationClock;
use plantsim_store::logger::LoggerRegistry;
use plantsim_store::store::StateStore;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::connection::ConnectionRegistry;
use crate::controller::{spawn_scan_loop, ScanController};

pub struct Scheduler {
    clock: Arc<SimulationClock>,
    store: Arc<StateStore>,
    logger_registry: Arc<LoggerRegistry>,
    connection_registry: Arc<ConnectionRegistry>,
    physics_engines: AsyncMutex<Vec<Box<dyn PhysicsEngine>>>,
    controller_handles: AsyncMutex<Vec<JoinHandle<()>>>,
    outer_loop_handle: AsyncMutex<Option<JoinHandle<()>>>,
    update_interval_s: f64,
    cycle_count: AtomicU64,
    initialised: AtomicBool,
}

impl Scheduler {
    pub fn new(clock: Arc<SimulationClock>, store: Arc<StateStore>, update_interval_s: f64) -> Arc<Self> {
        let logger_registry = LoggerRegistry::new(Arc::clone(&clock), Arc::clone(&store));
        let connection_registry = ConnectionRegistry::new(logger_registry.get_logger("connections", None));
        Arc::new(Self {
            clock,
            store,
            logger_registry,
            connection_registry,
            physics_engines: AsyncMutex::new(Vec::new()),
            controller_handles: AsyncMutex::new(Vec::new()),
            outer_loop_handle: AsyncMutex::new(None),
            update_interval_s,
            cycle_count: AtomicU64::new(0),
            initialised: AtomicBool::new(false),
        })
    }

    pub fn logger_registry(&self) -> Arc<LoggerRegistry> {
        Arc::clone(&self.logger_registry)
    }

    pub fn connection_registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.connection_registry)
    }

    pub fn store(&self) -> Arc<StateStore> {
        Arc::clone(&self.store)
    }

    pub fn clock(&self) -> Arc<SimulationClock> {
        Arc::clone(&self.clock)
    }

    /// Registers a physics engine, calling its `initialise` immediately
    /// (dependency-ordered startup: engines exist and have published
    /// their initial telemetry before any controller's first scan).
    pub async fn add_physics_engine(&self, mut engine: Box<dyn PhysicsEngine>) -> SimResult<()> {
        engine.initialise().await.map_err(|e| SimError::ConfigurationError(format!("physics engine failed to initialise: {e}")))?;
        self.physics_engines.lock().await.push(engine);
        Ok(())
    }

    /// Spawns a controller's independent scan task. Returns immediately;
    /// the task runs until `stop()` aborts it.
    pub async fn spawn_controller<C: ScanController + 'static>(&self, controller: C, scan_interval: Duration) {
        let handle = spawn_scan_loop(controller, Arc::clone(&self.clock), scan_interval);
        self.controller_handles.lock().await.push(handle);
    }

    /// Marks startup complete. Does not itself start the outer loop or
    /// any controller task — callers assemble engines/controllers with
    /// `add_physics_engine`/`spawn_controller` first, then call `start`.
    pub fn initialise(&self) -> SimResult<()> {
        self.initialised.store(true, Ordering::SeqCst);
        info!("scheduler initialised");
        Ok(())
    }

    /// Starts the clock and the outer physics loop.
    pub async fn start(self: &Arc<Self>) -> SimResult<()> {
        if !self.initialised.load(Ordering::SeqCst) {
            return Err(SimError::NotInitialised("scheduler".into()));
        }
        self.clock.start();

        let scheduler = Arc::clone(self);
        let interval = Duration::from_secs_f64(self.update_interval_s.max(0.001));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last_time = scheduler.clock.now();
            loop {
                ticker.tick().await;
                if scheduler.clock.is_paused() {
                    continue;
                }
                let now = scheduler.clock.now();
                let dt = now - last_time;
                last_time = now;
                if dt <= 0.0 {
                    continue;
                }
                if let Err(err) = scheduler.run_outer_cycle(dt).await {
                    error!(error = %err, "outer physics loop halted");
                    break;
                }
                scheduler.cycle_count.fetch_add(1, Ordering::Relaxed);
            }
        });
        *self.outer_loop_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn run_outer_cycle(&self, dt: f64) -> SimResult<()> {
        let mut engines = self.physics_engines.lock().await;
        for engine in engines.iter_mut() {
            engine.read_control_inputs().await?;
            engine.update(dt)?;
        }
        for engine in engines.iter() {
            engine.write_telemetry().await?;
        }
        Ok(())
    }

    /// Stops the outer loop, every controller's scan task, and the clock.
    pub async fn stop(&self) {
        if let Some(handle) = self.outer_loop_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        for handle in self.controller_handles.lock().await.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
        self.clock.stop().await;
        info!("scheduler stopped");
    }

    pub fn pause(&self) {
        self.clock.pause();
    }

    pub fn resume(&self) {
        self.clock.resume();
    }

    pub fn reset(&self) {
        self.clock.reset();
        self.cycle_count.store(0, Ordering::Relaxed);
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    pub async fn telemetry_snapshot(&self) -> serde_json::Value {
        let engines = self.physics_engines.lock().await;
        serde_json::json!({
            "clock": self.clock.snapshot(),
            "cycle_count": self.cycle_count(),
            "engines": engines.iter().map(|e| e.get_telemetry()).collect::<Vec<_>>(),
        })
    }

    pub async fn connection_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "active": self.connection_registry.get_active(),
            "recent_history": self.connection_registry.get_history(50),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_common::types::{DeviceKind, Protocol};
    use plantsim_physics::turbine::{TurbineEngine, TurbineParameters};
    use plantsim_store::clock::ClockMode;
    use std::collections::HashSet;

    async fn make_scheduler() -> Arc<Scheduler> {
        let store = StateStore::with_default_capacity();
        store
            .register_device("turbine_1", DeviceKind::TurbinePlc, 1, HashSet::from([Protocol::ModbusTcp]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        Scheduler::new(clock, store, 0.1)
    }

    #[tokio::test]
    async fn start_requires_initialise_first() {
        let scheduler = make_scheduler().await;
        assert!(scheduler.start().await.is_err());
    }

    #[tokio::test]
    async fn outer_loop_advances_registered_engines() {
        let scheduler = make_scheduler().await;
        let engine = TurbineEngine::new("turbine_1", scheduler.store(), TurbineParameters::default());
        scheduler.add_physics_engine(Box::new(engine)).await.unwrap();
        scheduler.initialise().unwrap();
        scheduler.start().await.unwrap();

        for _ in 0..20 {
            scheduler.clock().step(0.01).unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;
        assert!(scheduler.cycle_count() > 0);
    }
}
