//! Reactor and turbine safety controllers: SIL-rated, voted trip
//! logic that forces the protected engine into its safe state on demand
//! and runs continuous cross-channel diagnostics.
//!
//! [`ReactorSafetyController`] votes five safety instrumented functions:
//! - SIF-R01 high core temperature, 2oo2 (dual channel)
//! - SIF-R02 high vessel pressure, 2oo2 (dual channel)
//! - SIF-R03 low stability, single channel
//! - SIF-R04 containment breach, single channel, CRITICAL
//! - SIF-R05 loss of coolant flow, single channel, only while the
//!   reactor is active
//!
//! [`TurbineSafetyController`] votes three:
//! - SIF-T01 overspeed, 2oo2 (dual channel)
//! - SIF-T02 high vibration, single channel
//! - SIF-T03 high bearing temperature, single channel
//!
//! Unlike the vendor PLCs in [`crate::plc`], a safety controller holds
//! a direct handle to the engine it protects: forcing a safe state is
//! not a normal operator command the store should mediate, it is the
//! one action this controller exists to guarantee happens every cycle
//! while a demand is latched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use async_trait::async_trait;
use plantsim_common::error::SimResult;
use plantsim_common::types::{AlarmPriority, AlarmState, Category, Severity};
use plantsim_physics::reactor::ReactorEngine;
use plantsim_physics::turbine::TurbineEngine;
use plantsim_store::logger::EventLogger;
use tokio::sync::Mutex;

use crate::controller::{EdgeDetector, ScanController, ScanStats};

/// A snapshot of [`ReactorSafetyController`] status, kept behind its own
/// `Arc` so a caller can read it after the controller itself has been
/// moved into its scan task (same idea as [`ScanStats`]).
#[derive(Debug, Default)]
pub struct SafetyStatusHandle {
    safe_state_active: AtomicBool,
    bypass_active: AtomicBool,
    demand_count: AtomicU64,
    fault_count: AtomicU64,
    diagnostic_fault: AtomicBool,
    diagnostic_status: AtomicU8,
}

impl SafetyStatusHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Shared by every safety controller kind: each publishes its own
    /// scalar status fields rather than the handle borrowing the
    /// controller type itself.
    fn publish(&self, safe_state_active: bool, bypass_active: bool, demand_count: u64, fault_count: u64, diagnostic_fault: bool, diagnostic_status: u8) {
        self.safe_state_active.store(safe_state_active, Ordering::Relaxed);
        self.bypass_active.store(bypass_active, Ordering::Relaxed);
        self.demand_count.store(demand_count, Ordering::Relaxed);
        self.fault_count.store(fault_count, Ordering::Relaxed);
        self.diagnostic_fault.store(diagnostic_fault, Ordering::Relaxed);
        self.diagnostic_status.store(diagnostic_status, Ordering::Relaxed);
    }

    pub fn status(&self, name: &str) -> serde_json::Value {
        serde_json::json!({
            "name": name,
            "safe_state_active": self.safe_state_active.load(Ordering::Relaxed),
            "bypass_active": self.bypass_active.load(Ordering::Relaxed),
            "demand_count": self.demand_count.load(Ordering::Relaxed),
            "fault_count": self.fault_count.load(Ordering::Relaxed),
            "diagnostic_fault": self.diagnostic_fault.load(Ordering::Relaxed),
            "diagnostic_status": self.diagnostic_status.load(Ordering::Relaxed),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyIntegrityLevel {
    Sil1,
    Sil2,
    #[default]
    Sil3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingArchitecture {
    OneOutOfOne,
    OneOutOfTwo,
    TwoOutOfTwo,
    TwoOutOfThree,
}

#[derive(Debug, Clone)]
pub struct SafetyThresholds {
    pub high_temperature_c: f64,
    pub high_pressure_bar: f64,
    pub low_stability: f64,
    pub low_containment: f64,
    pub low_coolant_flow: f64,
    pub temperature_discrepancy_c: f64,
    pub pressure_discrepancy_bar: f64,
}

impl Default for SafetyThresholds {
    fn default() -> Self {
        Self {
            high_temperature_c: 450.0,
            high_pressure_bar: 150.0,
            low_stability: 0.3,
            low_containment: 0.5,
            low_coolant_flow: 0.1,
            temperature_discrepancy_c: 5.0,
            pressure_discrepancy_bar: 3.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Channels {
    core_temperature_c: [f64; 2],
    vessel_pressure_bar: [f64; 2],
    stability: f64,
    containment_integrity: f64,
    coolant_flow_rate: f64,
    reaction_rate: f64,
}

pub struct ReactorSafetyController {
    name: String,
    reactor: Arc<Mutex<ReactorEngine>>,
    logger: Arc<EventLogger>,
    stats: Arc<ScanStats>,
    status_handle: Arc<SafetyStatusHandle>,
    thresholds: SafetyThresholds,
    sil_level: SafetyIntegrityLevel,
    dual_channel_voting: VotingArchitecture,
    channels: Channels,
    pub bypass_active: bool,
    safe_state_active: bool,
    demand_count: u64,
    fault_count: u64,
    diagnostic_fault: bool,
    diagnostic_status: u8,
    scram_alarm_raised: bool,
    manual_scram_edge: EdgeDetector,
    reset_edge: EdgeDetector,
    manual_scram_requested: bool,
    reset_requested: bool,
}

impl ReactorSafetyController {
    pub fn new(name: impl Into<String>, reactor: Arc<Mutex<ReactorEngine>>, logger: Arc<EventLogger>) -> Self {
        Self {
            name: name.into(),
            reactor,
            logger,
            stats: ScanStats::new(),
            status_handle: SafetyStatusHandle::new(),
            thresholds: SafetyThresholds::default(),
            sil_level: SafetyIntegrityLevel::Sil3,
            dual_channel_voting: VotingArchitecture::TwoOutOfTwo,
            channels: Channels::default(),
            bypass_active: false,
            safe_state_active: false,
            demand_count: 0,
            fault_count: 0,
            diagnostic_fault: false,
            diagnostic_status: 0,
            scram_alarm_raised: false,
            manual_scram_edge: EdgeDetector::default(),
            reset_edge: EdgeDetector::default(),
            manual_scram_requested: false,
            reset_requested: false,
        }
    }

    pub fn set_bypass(&mut self, active: bool) {
        self.bypass_active = active;
    }

    pub fn manual_scram(&mut self) {
        self.manual_scram_requested = true;
    }

    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    /// Independent of the physics engine's own telemetry, so tests can
    /// drive a cross-channel discrepancy without touching the engine.
    pub fn set_channel_readings(&mut self, temp_a: f64, temp_b: f64, pressure_a: f64, pressure_b: f64) {
        self.channels.core_temperature_c = [temp_a, temp_b];
        self.channels.vessel_pressure_bar = [pressure_a, pressure_b];
    }

    /// Kept behind its own `Arc` so a caller can still read status after
    /// the controller has been moved into its scan task.
    pub fn status_handle(&self) -> Arc<SafetyStatusHandle> {
        Arc::clone(&self.status_handle)
    }

    pub fn get_safety_status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "sil_level": format!("{:?}", self.sil_level),
            "dual_channel_voting": format!("{:?}", self.dual_channel_voting),
            "safe_state_active": self.safe_state_active,
            "bypass_active": self.bypass_active,
            "demand_count": self.demand_count,
            "fault_count": self.fault_count,
            "diagnostic_fault": self.diagnostic_fault,
            "diagnostic_status": self.diagnostic_status,
            "scan": self.stats.status(),
        })
    }

    fn evaluate_demand(&self) -> bool {
        let two_oo_two_temp =
            self.channels.core_temperature_c[0] > self.thresholds.high_temperature_c
                && self.channels.core_temperature_c[1] > self.thresholds.high_temperature_c;
        let two_oo_two_pressure =
            self.channels.vessel_pressure_bar[0] > self.thresholds.high_pressure_bar
                && self.channels.vessel_pressure_bar[1] > self.thresholds.high_pressure_bar;
        let low_stability = self.channels.stability < self.thresholds.low_stability;
        let low_containment = self.channels.containment_integrity < self.thresholds.low_containment;
        let reactor_active = self.channels.reaction_rate > 0.01;
        let loss_of_coolant = reactor_active && self.channels.coolant_flow_rate < self.thresholds.low_coolant_flow;

        two_oo_two_temp || two_oo_two_pressure || low_stability || low_containment || loss_of_coolant
    }

    async fn force_safe_state(&mut self) {
        self.safe_state_active = true;
        self.reactor.lock().await.force_scram();
        if !self.scram_alarm_raised {
            self.logger.log_alarm("reactor safety controller forced SCRAM", AlarmPriority::Critical, AlarmState::Active);
            self.scram_alarm_raised = true;
        }
    }
}

#[async_trait]
impl ScanController for ReactorSafetyController {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    async fn read_inputs(&mut self) -> SimResult<()> {
        let state = self.reactor.lock().await.get_state();
        if self.channels.core_temperature_c == [0.0, 0.0] {
            self.channels.core_temperature_c = [state.core_temperature_c; 2];
        }
        if self.channels.vessel_pressure_bar == [0.0, 0.0] {
            self.channels.vessel_pressure_bar = [state.vessel_pressure_bar; 2];
        }
        self.channels.stability = state.stability;
        self.channels.containment_integrity = state.containment_integrity;
        self.channels.coolant_flow_rate = state.coolant_flow_rate;
        self.channels.reaction_rate = state.reaction_rate;
        Ok(())
    }

    async fn execute_logic(&mut self) -> SimResult<()> {
        let demand = self.evaluate_demand() || self.manual_scram_edge.rising_edge(self.manual_scram_requested);
        self.manual_scram_requested = false;
        self.manual_scram_edge.rising_edge(false);

        if demand {
            self.demand_count += 1;
            if self.bypass_active {
                self.logger.log_alarm(
                    "reactor safety demand latched while bypass is active",
                    AlarmPriority::Critical,
                    AlarmState::Active,
                );
            } else {
                self.force_safe_state().await;
            }
        }

        if self.reset_edge.rising_edge(self.reset_requested) {
            let precondition = self.reactor.lock().await.safe_state_precondition();
            if precondition && self.reactor.lock().await.reset_scram() {
                self.safe_state_active = false;
                self.scram_alarm_raised = false;
                self.logger.log_audit("reactor safety state reset", Some("operator".into()), "reset_from_safe_state", "ok");
            } else {
                self.logger.log_event(
                    Severity::Warning,
                    Category::Safety,
                    "reactor safety reset rejected: preconditions not met",
                    serde_json::Value::Null,
                );
            }
        }
        self.reset_requested = false;
        self.reset_edge.rising_edge(false);
        Ok(())
    }

    async fn write_outputs(&mut self) -> SimResult<()> {
        if self.safe_state_active {
            self.reactor.lock().await.force_scram();
        }
        Ok(())
    }

    async fn run_diagnostics(&mut self) -> SimResult<()> {
        let temp_discrepancy = (self.channels.core_temperature_c[0] - self.channels.core_temperature_c[1]).abs();
        let pressure_discrepancy = (self.channels.vessel_pressure_bar[0] - self.channels.vessel_pressure_bar[1]).abs();

        let (fault, status) = if temp_discrepancy > self.thresholds.temperature_discrepancy_c {
            (true, 1u8)
        } else if pressure_discrepancy > self.thresholds.pressure_discrepancy_bar {
            (true, 2u8)
        } else {
            (false, 0u8)
        };

        if fault && !self.diagnostic_fault {
            self.fault_count += 1;
            self.logger.log_alarm("reactor safety channel discrepancy detected", AlarmPriority::High, AlarmState::Active);
        } else if !fault && self.diagnostic_fault {
            self.logger.log_alarm("reactor safety channel discrepancy cleared", AlarmPriority::High, AlarmState::Cleared);
        }
        self.diagnostic_fault = fault;
        self.diagnostic_status = status;
        self.status_handle.publish(
            self.safe_state_active,
            self.bypass_active,
            self.demand_count,
            self.fault_count,
            self.diagnostic_fault,
            self.diagnostic_status,
        );
        Ok(())
    }
}

/// Turbine overspeed protection: SIL-rated, voted trip logic that
/// forces the turbine engine into its safe state on demand.
///
/// Three safety instrumented functions:
/// - SIF-T01 overspeed, 2oo2 (dual channel)
/// - SIF-T02 excessive vibration, single channel
/// - SIF-T03 high bearing temperature, single channel
///
/// Mirrors [`ReactorSafetyController`]'s shape: a direct handle to the
/// engine it protects, forced into its safe state every cycle while a
/// demand is latched, independent of the normal PLC scan.
#[derive(Debug, Clone)]
pub struct TurbineSafetyThresholds {
    pub overspeed_rpm: f64,
    pub vibration_critical_mils: f64,
    pub bearing_temperature_critical_f: f64,
    pub speed_discrepancy_rpm: f64,
}

impl Default for TurbineSafetyThresholds {
    fn default() -> Self {
        Self {
            overspeed_rpm: 3960.0,
            vibration_critical_mils: 10.0,
            bearing_temperature_critical_f: 250.0,
            speed_discrepancy_rpm: 50.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TurbineChannels {
    shaft_speed_rpm: [f64; 2],
    vibration_mils: f64,
    bearing_temperature_f: f64,
}

pub struct TurbineSafetyController {
    name: String,
    turbine: Arc<Mutex<TurbineEngine>>,
    logger: Arc<EventLogger>,
    stats: Arc<ScanStats>,
    status_handle: Arc<SafetyStatusHandle>,
    thresholds: TurbineSafetyThresholds,
    sil_level: SafetyIntegrityLevel,
    dual_channel_voting: VotingArchitecture,
    channels: TurbineChannels,
    pub bypass_active: bool,
    safe_state_active: bool,
    demand_count: u64,
    fault_count: u64,
    diagnostic_fault: bool,
    diagnostic_status: u8,
    trip_alarm_raised: bool,
    manual_trip_edge: EdgeDetector,
    reset_edge: EdgeDetector,
    manual_trip_requested: bool,
    reset_requested: bool,
}

impl TurbineSafetyController {
    pub fn new(name: impl Into<String>, turbine: Arc<Mutex<TurbineEngine>>, logger: Arc<EventLogger>) -> Self {
        Self {
            name: name.into(),
            turbine,
            logger,
            stats: ScanStats::new(),
            status_handle: SafetyStatusHandle::new(),
            thresholds: TurbineSafetyThresholds::default(),
            sil_level: SafetyIntegrityLevel::Sil3,
            dual_channel_voting: VotingArchitecture::TwoOutOfTwo,
            channels: TurbineChannels::default(),
            bypass_active: false,
            safe_state_active: false,
            demand_count: 0,
            fault_count: 0,
            diagnostic_fault: false,
            diagnostic_status: 0,
            trip_alarm_raised: false,
            manual_trip_edge: EdgeDetector::default(),
            reset_edge: EdgeDetector::default(),
            manual_trip_requested: false,
            reset_requested: false,
        }
    }

    pub fn set_bypass(&mut self, active: bool) {
        self.bypass_active = active;
    }

    pub fn manual_trip(&mut self) {
        self.manual_trip_requested = true;
    }

    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    /// Independent of the physics engine's own telemetry, so tests can
    /// drive a cross-channel discrepancy without touching the engine.
    pub fn set_channel_readings(&mut self, speed_a: f64, speed_b: f64) {
        self.channels.shaft_speed_rpm = [speed_a, speed_b];
    }

    pub fn status_handle(&self) -> Arc<SafetyStatusHandle> {
        Arc::clone(&self.status_handle)
    }

    pub fn get_safety_status(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "sil_level": format!("{:?}", self.sil_level),
            "dual_channel_voting": format!("{:?}", self.dual_channel_voting),
            "safe_state_active": self.safe_state_active,
            "bypass_active": self.bypass_active,
            "demand_count": self.demand_count,
            "fault_count": self.fault_count,
            "diagnostic_fault": self.diagnostic_fault,
            "diagnostic_status": self.diagnostic_status,
            "scan": self.stats.status(),
        })
    }

    fn evaluate_demand(&self) -> bool {
        let two_oo_two_overspeed = self.channels.shaft_speed_rpm[0] > self.thresholds.overspeed_rpm
            && self.channels.shaft_speed_rpm[1] > self.thresholds.overspeed_rpm;
        let high_vibration = self.channels.vibration_mils > self.thresholds.vibration_critical_mils;
        let high_bearing_temp = self.channels.bearing_temperature_f > self.thresholds.bearing_temperature_critical_f;

        two_oo_two_overspeed || high_vibration || high_bearing_temp
    }

    async fn force_safe_state(&mut self) {
        self.safe_state_active = true;
        self.turbine.lock().await.force_trip();
        if !self.trip_alarm_raised {
            self.logger.log_alarm("turbine safety controller forced emergency trip", AlarmPriority::Critical, AlarmState::Active);
            self.trip_alarm_raised = true;
        }
    }
}

#[async_trait]
impl ScanController for TurbineSafetyController {
    fn name(&self) -> &str {
        &self.name
    }

    fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    async fn read_inputs(&mut self) -> SimResult<()> {
        let state = self.turbine.lock().await.get_state();
        if self.channels.shaft_speed_rpm == [0.0, 0.0] {
            self.channels.shaft_speed_rpm = [state.shaft_speed_rpm; 2];
        }
        self.channels.vibration_mils = state.vibration_mils;
        self.channels.bearing_temperature_f = state.bearing_temperature_f;
        Ok(())
    }

    async fn execute_logic(&mut self) -> SimResult<()> {
        let demand = self.evaluate_demand() || self.manual_trip_edge.rising_edge(self.manual_trip_requested);
        self.manual_trip_requested = false;
        self.manual_trip_edge.rising_edge(false);

        if demand {
            self.demand_count += 1;
            if self.bypass_active {
                self.logger.log_alarm(
                    "turbine safety demand latched while bypass is active",
                    AlarmPriority::Critical,
                    AlarmState::Active,
                );
            } else {
                self.force_safe_state().await;
            }
        }

        if self.reset_edge.rising_edge(self.reset_requested) {
            let precondition = self.turbine.lock().await.safe_state_precondition();
            if precondition {
                self.turbine.lock().await.reset_trip();
                self.safe_state_active = false;
                self.trip_alarm_raised = false;
                self.logger.log_audit("turbine safety state reset", Some("operator".into()), "reset_from_safe_state", "ok");
            } else {
                self.logger.log_event(
                    Severity::Warning,
                    Category::Safety,
                    "turbine safety reset rejected: preconditions not met",
                    serde_json::Value::Null,
                );
            }
        }
        self.reset_requested = false;
        self.reset_edge.rising_edge(false);
        Ok(())
    }

    async fn write_outputs(&mut self) -> SimResult<()> {
        if self.safe_state_active {
            self.turbine.lock().await.force_trip();
        }
        Ok(())
    }

    async fn run_diagnostics(&mut self) -> SimResult<()> {
        let speed_discrepancy = (self.channels.shaft_speed_rpm[0] - self.channels.shaft_speed_rpm[1]).abs();

        let (fault, status) = if speed_discrepancy > self.thresholds.speed_discrepancy_rpm { (true, 1u8) } else { (false, 0u8) };

        if fault && !self.diagnostic_fault {
            self.fault_count += 1;
            self.logger.log_alarm("turbine safety channel discrepancy detected", AlarmPriority::High, AlarmState::Active);
        } else if !fault && self.diagnostic_fault {
            self.logger.log_alarm("turbine safety channel discrepancy cleared", AlarmPriority::High, AlarmState::Cleared);
        }
        self.diagnostic_fault = fault;
        self.diagnostic_status = status;
        self.status_handle.publish(
            self.safe_state_active,
            self.bypass_active,
            self.demand_count,
            self.fault_count,
            self.diagnostic_fault,
            self.diagnostic_status,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plantsim_common::types::{DeviceKind, Protocol};
    use plantsim_physics::reactor::ReactorParameters;
    use plantsim_physics::turbine::TurbineParameters;
    use plantsim_store::clock::{ClockMode, SimulationClock};
    use plantsim_store::logger::LoggerRegistry;
    use plantsim_store::store::StateStore;
    use std::collections::HashSet;

    async fn make_controller() -> ReactorSafetyController {
        let store = StateStore::with_default_capacity();
        store
            .register_device("reactor_1", DeviceKind::ReactorPlc, 1, HashSet::from([Protocol::ModbusTcp]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let reactor = Arc::new(Mutex::new(ReactorEngine::new("reactor_1", store.clone(), clock.clone(), ReactorParameters::default())));
        let logger = LoggerRegistry::new(clock, store).get_logger("reactor_safety", Some("reactor_1"));
        ReactorSafetyController::new("reactor_1_safety", reactor, logger)
    }

    #[tokio::test]
    async fn two_oo_two_temperature_demand_forces_scram() {
        let mut controller = make_controller().await;
        controller.read_inputs().await.unwrap();
        controller.set_channel_readings(470.0, 465.0, 10.0, 10.0);
        controller.execute_logic().await.unwrap();
        controller.write_outputs().await.unwrap();
        assert!(controller.reactor.lock().await.is_scram_active());
        assert_eq!(controller.demand_count, 1);
    }

    #[tokio::test]
    async fn single_high_channel_alone_does_not_trip_two_oo_two() {
        let mut controller = make_controller().await;
        controller.read_inputs().await.unwrap();
        controller.set_channel_readings(470.0, 10.0, 10.0, 10.0);
        controller.execute_logic().await.unwrap();
        assert!(!controller.reactor.lock().await.is_scram_active());
    }

    #[tokio::test]
    async fn bypass_suppresses_latching_but_still_counts_demand() {
        let mut controller = make_controller().await;
        controller.set_bypass(true);
        controller.read_inputs().await.unwrap();
        controller.set_channel_readings(470.0, 465.0, 10.0, 10.0);
        controller.execute_logic().await.unwrap();
        assert!(!controller.reactor.lock().await.is_scram_active());
        assert_eq!(controller.demand_count, 1);
    }

    #[tokio::test]
    async fn cross_channel_discrepancy_raises_diagnostic_fault() {
        let mut controller = make_controller().await;
        controller.read_inputs().await.unwrap();
        controller.set_channel_readings(300.0, 290.0, 10.0, 10.0);
        controller.run_diagnostics().await.unwrap();
        assert!(controller.diagnostic_fault);
        assert_eq!(controller.diagnostic_status, 1);
    }

    #[tokio::test]
    async fn manual_scram_latches_once_per_rising_edge() {
        let mut controller = make_controller().await;
        controller.read_inputs().await.unwrap();
        controller.manual_scram();
        controller.execute_logic().await.unwrap();
        assert_eq!(controller.demand_count, 1);
        controller.execute_logic().await.unwrap();
        assert_eq!(controller.demand_count, 1, "demand must not re-latch without a new edge");
    }

    async fn make_turbine_controller() -> TurbineSafetyController {
        let store = StateStore::with_default_capacity();
        store
            .register_device("turbine_1", DeviceKind::TurbinePlc, 1, HashSet::from([Protocol::ModbusTcp]), Default::default(), 0.0)
            .await
            .unwrap();
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let turbine = Arc::new(Mutex::new(TurbineEngine::new("turbine_1", store.clone(), TurbineParameters::default())));
        let logger = LoggerRegistry::new(clock, store).get_logger("turbine_safety", Some("turbine_1"));
        TurbineSafetyController::new("turbine_1_safety", turbine, logger)
    }

    #[tokio::test]
    async fn two_oo_two_overspeed_demand_forces_trip() {
        let mut controller = make_turbine_controller().await;
        controller.read_inputs().await.unwrap();
        controller.set_channel_readings(4000.0, 4050.0);
        controller.execute_logic().await.unwrap();
        controller.write_outputs().await.unwrap();
        assert!(controller.turbine.lock().await.is_trip_active());
        assert_eq!(controller.demand_count, 1);
    }

    #[tokio::test]
    async fn single_high_channel_alone_does_not_trip_two_oo_two() {
        let mut controller = make_turbine_controller().await;
        controller.read_inputs().await.unwrap();
        controller.set_channel_readings(4000.0, 100.0);
        controller.execute_logic().await.unwrap();
        assert!(!controller.turbine.lock().await.is_trip_active());
    }

    #[tokio::test]
    async fn high_vibration_alone_forces_trip() {
        let mut controller = make_turbine_controller().await;
        controller.read_inputs().await.unwrap();
        controller.channels.vibration_mils = 15.0;
        controller.execute_logic().await.unwrap();
        assert!(controller.turbine.lock().await.is_trip_active());
    }

    #[tokio::test]
    async fn turbine_bypass_suppresses_latching_but_still_counts_demand() {
        let mut controller = make_turbine_controller().await;
        controller.set_bypass(true);
        controller.read_inputs().await.unwrap();
        controller.set_channel_readings(4000.0, 4050.0);
        controller.execute_logic().await.unwrap();
        assert!(!controller.turbine.lock().await.is_trip_active());
        assert_eq!(controller.demand_count, 1);
    }

    #[tokio::test]
    async fn turbine_cross_channel_discrepancy_raises_diagnostic_fault() {
        let mut controller = make_turbine_controller().await;
        controller.read_inputs().await.unwrap();
        controller.set_channel_readings(3600.0, 3500.0);
        controller.run_diagnostics().await.unwrap();
        assert!(controller.diagnostic_fault);
        assert_eq!(controller.diagnostic_status, 1);
    }

    #[tokio::test]
    async fn manual_turbine_trip_latches_once_per_rising_edge() {
        let mut controller = make_turbine_controller().await;
        controller.read_inputs().await.unwrap();
        controller.manual_trip();
        controller.execute_logic().await.unwrap();
        assert_eq!(controller.demand_count, 1);
        controller.execute_logic().await.unwrap();
        assert_eq!(controller.demand_count, 1, "demand must not re-latch without a new edge");
    }
}
