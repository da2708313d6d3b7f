//! # plantsim Supervisor
//!
//! Process entrypoint for the plant simulation core. Loads a
//! `PlantConfig`, assembles the state store, physics engines, device
//! controllers, and safety subsystem, then drives them to completion
//! with signal-triggered graceful shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use plantsim_common::config::{ConfigLoader, LogFormat, PlantConfig};
use plantsim_common::device::DeviceMetadata;
use plantsim_common::error::{SimError, SimResult};
use plantsim_common::types::{DeviceKind, Protocol};
use plantsim_core::firewall::{Firewall, FirewallRule, RuleAction, RuleProtocol};
use plantsim_core::plc::{HvacPlc, ReactorPlc, SubstationPlc, TurbinePlc};
use plantsim_core::rtu::{Breaker, ProtectionRelay, RelayType, SubstationRtu};
use plantsim_core::safety::{ReactorSafetyController, SafetyStatusHandle, TurbineSafetyController};
use plantsim_core::scheduler::Scheduler;
use plantsim_physics::engine::PhysicsEngine;
use plantsim_physics::grid::{GridEngine, GridParameters};
use plantsim_physics::hvac::{HvacEngine, HvacParameters};
use plantsim_physics::power_flow::PowerFlowEngine;
use plantsim_physics::reactor::{ReactorEngine, ReactorParameters};
use plantsim_physics::turbine::{TurbineEngine, TurbineParameters};
use plantsim_store::clock::{ClockMode, SimulationClock};
use plantsim_store::store::StateStore;
use tokio::signal;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Grid topology is implicit infrastructure, not a configured device;
/// every substation PLC/RTU reads its measurements from this one.
const GRID_DEVICE_NAME: &str = "grid_1";

/// Backing device for the network-wide power flow engine, distinct from
/// `GRID_DEVICE_NAME` since it carries a per-bus/per-line summary rather
/// than one device's registers.
const POWER_FLOW_DEVICE_NAME: &str = "grid_network_1";

#[derive(Parser, Debug)]
#[command(name = "plantsim_supervisor")]
#[command(author = "plantsim")]
#[command(version)]
#[command(about = "Industrial control system plant simulation supervisor")]
#[command(long_about = None)]
struct Args {
    /// Path to the plant configuration file (plant.toml)
    #[arg(short, long, default_value = "/etc/plantsim/plant.toml")]
    config: PathBuf,

    /// Enable verbose (debug-level) logging
    #[arg(short, long)]
    verbose: bool,

    /// Force JSON log output regardless of the config file's log_format
    #[arg(long)]
    json: bool,
}

/// Shares one `ReactorEngine` between the outer physics loop and the
/// safety controller, which needs a direct handle to force a SCRAM
/// independent of the store-mediated PLC path.
struct SharedReactorEngine(Arc<Mutex<ReactorEngine>>);

#[async_trait::async_trait]
impl PhysicsEngine for SharedReactorEngine {
    async fn initialise(&mut self) -> SimResult<()> {
        let mut guard = self.0.lock();
        guard.initialise().await
    }

    async fn read_control_inputs(&mut self) -> SimResult<()> {
        let mut guard = self.0.lock();
        guard.read_control_inputs().await
    }

    fn update(&mut self, dt: f64) -> SimResult<()> {
        self.0.lock().update(dt)
    }

    async fn write_telemetry(&self) -> SimResult<()> {
        let guard = self.0.lock();
        guard.write_telemetry().await
    }

    fn get_telemetry(&self) -> serde_json::Value {
        self.0.lock().get_telemetry()
    }
}

/// Shares one `TurbineEngine` between the outer physics loop and the
/// safety controller, same rationale as [`SharedReactorEngine`].
struct SharedTurbineEngine(Arc<Mutex<TurbineEngine>>);

#[async_trait::async_trait]
impl PhysicsEngine for SharedTurbineEngine {
    async fn initialise(&mut self) -> SimResult<()> {
        let mut guard = self.0.lock();
        guard.initialise().await
    }

    async fn read_control_inputs(&mut self) -> SimResult<()> {
        let mut guard = self.0.lock();
        guard.read_control_inputs().await
    }

    fn update(&mut self, dt: f64) -> SimResult<()> {
        self.0.lock().update(dt)
    }

    async fn write_telemetry(&self) -> SimResult<()> {
        let guard = self.0.lock();
        guard.write_telemetry().await
    }

    fn get_telemetry(&self) -> serde_json::Value {
        self.0.lock().get_telemetry()
    }
}

pub struct PlantSupervisor {
    name: String,
    scheduler: Arc<Scheduler>,
    safety_handles: Vec<(String, Arc<SafetyStatusHandle>)>,
    started_at: Instant,
}

impl PlantSupervisor {
    pub async fn build(config: &PlantConfig) -> SimResult<Arc<Self>> {
        let clock_mode = if config.runtime.realtime { ClockMode::RealTime } else { ClockMode::Accelerated };
        let clock = SimulationClock::new(clock_mode, config.runtime.time_acceleration);
        let store = match config.audit_log_capacity {
            Some(capacity) => StateStore::new(capacity),
            None => StateStore::with_default_capacity(),
        };

        let scheduler = Scheduler::new(Arc::clone(&clock), Arc::clone(&store), config.runtime.update_interval_s);
        let logger_registry = scheduler.logger_registry();

        let mut safety_handles = Vec::new();

        let grid_params = GridParameters { fixed_load_mw: config.grid.fixed_load_mw, ..GridParameters::default() };
        store
            .register_device(GRID_DEVICE_NAME, DeviceKind::SubstationRtu, 0, [Protocol::Dnp3].into(), DeviceMetadata::default(), 0.0)
            .await?;
        let grid_engine = GridEngine::new(GRID_DEVICE_NAME, Arc::clone(&store), grid_params);
        scheduler
            .add_physics_engine(Box::new(grid_engine))
            .await
            .map_err(|e| SimError::ConfigurationError(format!("grid engine: {e}")))?;

        store
            .register_device(POWER_FLOW_DEVICE_NAME, DeviceKind::SubstationRtu, 1, [Protocol::Dnp3].into(), DeviceMetadata::default(), 0.0)
            .await?;
        let power_flow_engine = PowerFlowEngine::from_config(POWER_FLOW_DEVICE_NAME, Arc::clone(&store), &config.grid);
        scheduler
            .add_physics_engine(Box::new(power_flow_engine))
            .await
            .map_err(|e| SimError::ConfigurationError(format!("power flow engine: {e}")))?;

        for device in &config.devices {
            let metadata = DeviceMetadata { description: device.description.clone(), location: device.location.clone() };
            store
                .register_device(&device.name, device.kind, device.id, device.protocols.iter().copied().collect(), metadata, 0.0)
                .await?;

            match device.kind {
                DeviceKind::TurbinePlc => {
                    let params = TurbineParameters::default();
                    let engine = TurbineEngine::new(device.name.as_str(), Arc::clone(&store), params.clone());
                    let shared = Arc::new(Mutex::new(engine));
                    scheduler
                        .add_physics_engine(Box::new(SharedTurbineEngine(Arc::clone(&shared))))
                        .await
                        .map_err(|e| SimError::ConfigurationError(format!("{}: {e}", device.name)))?;

                    let plc = TurbinePlc::new(
                        format!("{}_plc", device.name),
                        device.name.as_str(),
                        params.rated_speed_rpm,
                        Arc::clone(&store),
                        logger_registry.get_logger("turbine_plc", Some(device.name.as_str())),
                    );
                    scheduler.spawn_controller(plc, Duration::from_secs_f64(config.controllers.plc_scan_interval_s)).await;

                    let safety_name = format!("{}_safety", device.name);
                    store
                        .register_device(&safety_name, DeviceKind::SafetyController, device.id + 1000, [Protocol::S7comm].into(), DeviceMetadata::default(), 0.0)
                        .await?;
                    let safety =
                        TurbineSafetyController::new(safety_name.clone(), shared, logger_registry.get_logger("turbine_safety", Some(device.name.as_str())));
                    safety_handles.push((safety_name, safety.status_handle()));
                    scheduler.spawn_controller(safety, Duration::from_secs_f64(config.controllers.safety_scan_interval_s)).await;
                }
                DeviceKind::ReactorPlc => {
                    let params = ReactorParameters::default();
                    let engine = ReactorEngine::new(device.name.as_str(), Arc::clone(&store), Arc::clone(&clock), params.clone());
                    let shared = Arc::new(Mutex::new(engine));
                    scheduler
                        .add_physics_engine(Box::new(SharedReactorEngine(Arc::clone(&shared))))
                        .await
                        .map_err(|e| SimError::ConfigurationError(format!("{}: {e}", device.name)))?;

                    let plc = ReactorPlc::new(
                        format!("{}_plc", device.name),
                        device.name.as_str(),
                        params.rated_temperature_c,
                        Arc::clone(&store),
                        logger_registry.get_logger("reactor_plc", Some(device.name.as_str())),
                    );
                    scheduler.spawn_controller(plc, Duration::from_secs_f64(config.controllers.plc_scan_interval_s)).await;

                    let safety_name = format!("{}_safety", device.name);
                    store
                        .register_device(&safety_name, DeviceKind::SafetyController, device.id + 1000, [Protocol::S7comm].into(), DeviceMetadata::default(), 0.0)
                        .await?;
                    let safety =
                        ReactorSafetyController::new(safety_name.clone(), shared, logger_registry.get_logger("reactor_safety", Some(device.name.as_str())));
                    safety_handles.push((safety_name, safety.status_handle()));
                    scheduler.spawn_controller(safety, Duration::from_secs_f64(config.controllers.safety_scan_interval_s)).await;
                }
                DeviceKind::HvacPlc => {
                    let params = HvacParameters::default();
                    let engine = HvacEngine::new(device.name.as_str(), Arc::clone(&store), Arc::clone(&clock), params);
                    scheduler
                        .add_physics_engine(Box::new(engine))
                        .await
                        .map_err(|e| SimError::ConfigurationError(format!("{}: {e}", device.name)))?;

                    let plc = HvacPlc::new(
                        format!("{}_plc", device.name),
                        device.name.as_str(),
                        Arc::clone(&store),
                        logger_registry.get_logger("hvac_plc", Some(device.name.as_str())),
                    );
                    scheduler.spawn_controller(plc, Duration::from_secs_f64(config.controllers.plc_scan_interval_s)).await;
                }
                DeviceKind::SubstationPlc => {
                    let plc = SubstationPlc::new(
                        device.name.as_str(),
                        GRID_DEVICE_NAME,
                        Default::default(),
                        Arc::clone(&store),
                        logger_registry.get_logger("substation_plc", Some(device.name.as_str())),
                    );
                    scheduler.spawn_controller(plc, Duration::from_secs_f64(config.controllers.plc_scan_interval_s)).await;
                }
                DeviceKind::SubstationRtu => {
                    let mut rtu = SubstationRtu::new(
                        device.name.as_str(),
                        GRID_DEVICE_NAME,
                        Arc::clone(&store),
                        logger_registry.get_logger("substation_rtu", Some(device.name.as_str())),
                    );
                    rtu.add_relay(ProtectionRelay::new("relay_27", RelayType::Undervoltage, "bus undervoltage", 0.9));
                    rtu.add_relay(ProtectionRelay::new("relay_59", RelayType::Overvoltage, "bus overvoltage", 1.1));
                    rtu.add_relay(ProtectionRelay::new("relay_81", RelayType::Underfrequency, "underfrequency load shed", 49.0));
                    rtu.add_breaker(Breaker::new("brk_main", "main incomer breaker", 800.0, 138.0));
                    rtu.add_breaker(Breaker::new("brk_tie", "bus tie breaker", 800.0, 138.0));
                    scheduler.spawn_controller(rtu, Duration::from_secs_f64(config.controllers.plc_scan_interval_s)).await;
                }
                DeviceKind::Firewall => {
                    let mut firewall = Firewall::new(device.name.as_str(), logger_registry.get_logger("firewall", Some(device.name.as_str())));
                    firewall.add_rule(
                        FirewallRule::new("allow-engineering-modbus", "engineering to control modbus", 10, RuleAction::Allow)
                            .from_zone("engineering")
                            .to_zone("control")
                            .for_protocol(RuleProtocol::ModbusTcp),
                    );
                    firewall.add_rule(
                        FirewallRule::new("deny-enterprise-to-control", "enterprise cannot reach control", 20, RuleAction::Deny)
                            .from_zone("enterprise")
                            .to_zone("control"),
                    );
                    scheduler.spawn_controller(firewall, Duration::from_secs_f64(config.controllers.slow_scan_interval_s)).await;
                }
                DeviceKind::GenericPlc | DeviceKind::SafetyController => {
                    warn!(device = %device.name, kind = ?device.kind, "device kind has no built-in controller wiring, registered only");
                }
            }
        }

        scheduler.initialise()?;
        Ok(Arc::new(Self {
            name: config.shared.service_name.clone(),
            scheduler,
            safety_handles,
            started_at: Instant::now(),
        }))
    }

    /// Read-only projection of every reactor safety controller's latest
    /// published status, independent of the scan task each one runs in.
    pub fn safety_status(&self) -> serde_json::Value {
        serde_json::Value::Array(self.safety_handles.iter().map(|(name, handle)| handle.status(name)).collect())
    }

    pub async fn run(self: &Arc<Self>) -> SimResult<()> {
        info!(supervisor = %self.name, "starting scan cycle");
        self.scheduler.start().await?;

        let shutdown = async {
            match signal::ctrl_c().await {
                Ok(()) => info!("received shutdown signal (Ctrl+C)"),
                Err(err) => error!(error = %err, "unable to listen for shutdown signal"),
            }
        };

        let heartbeat = async {
            let mut ticker = tokio::time::interval(Duration::from_secs(10));
            loop {
                ticker.tick().await;
                info!(cycles = self.scheduler.cycle_count(), "scan cycle heartbeat");
            }
        };

        tokio::select! {
            _ = heartbeat => {}
            _ = shutdown => {
                info!("initiating graceful shutdown");
            }
        }

        self.graceful_shutdown().await;
        Ok(())
    }

    async fn graceful_shutdown(&self) {
        self.scheduler.stop().await;

        let summary = self.scheduler.store().get_simulation_summary().await;
        let connections = self.scheduler.connection_summary().await;
        info!("final simulation summary:");
        info!(
            devices = summary.device_count,
            online = summary.online_count,
            audit_entries = summary.audit_log_len,
            audit_dropped = summary.audit_dropped,
            cycles = self.scheduler.cycle_count(),
            uptime_s = self.started_at.elapsed().as_secs_f64(),
            "shutdown statistics"
        );
        info!(active_connections = %connections["active"], "connection registry at shutdown");
        info!(safety = %self.safety_status(), "safety subsystem status at shutdown");
        info!(supervisor = %self.name, "plantsim supervisor shutdown complete");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = PlantConfig::load(&args.config)?;
    config.validate()?;

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let json_output = args.json || config.shared.log_format == LogFormat::Json;
    if json_output {
        tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_target(false).with_env_filter(filter).init();
    }

    info!(service = %config.shared.service_name, config = %args.config.display(), "starting plantsim supervisor");

    let supervisor = PlantSupervisor::build(&config).await?;
    supervisor.run().await?;
    Ok(())
}
