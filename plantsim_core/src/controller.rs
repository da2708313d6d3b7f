//! Generic scan-cycle driver shared by every device controller:
//! `readInputs → executeLogic → writeOutputs → diagnostics`, strictly
//! sequential within one cycle, on an independent `tokio::task` per
//! controller. A phase error increments `errorCount` and is logged;
//! it never halts the scan task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use plantsim_common::error::{SimError, SimResult};
use plantsim_store::clock::SimulationClock;
use tokio::task::JoinHandle;
use tracing::error;

/// `scanCount`/`errorCount`/`lastScanTime` diagnostics.
///
/// Held behind its own `Arc` so the scheduler can keep a handle for the
/// telemetry surface after the owning controller has been moved into
/// its scan task.
#[derive(Debug, Default)]
pub struct ScanStats {
    scan_count: AtomicU64,
    error_count: AtomicU64,
    last_scan_time: Mutex<f64>,
}

impl ScanStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scan_count(&self) -> u64 {
        self.scan_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn last_scan_time(&self) -> f64 {
        *self.last_scan_time.lock()
    }

    fn record_scan(&self, sim_time: f64) {
        self.scan_count.fetch_add(1, Ordering::Relaxed);
        *self.last_scan_time.lock() = sim_time;
    }

    fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset counters, for test fixtures that need a clean slate between cases.
    pub fn reset(&self) {
        self.scan_count.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        *self.last_scan_time.lock() = 0.0;
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "scan_count": self.scan_count(),
            "error_count": self.error_count(),
            "last_scan_time": self.last_scan_time(),
        })
    }
}

/// Implemented by every device controller (generic PLC, vendor PLCs,
/// RTU, safety controller, firewall). `scan_cycle` drives the fixed
/// four-phase sequence and absorbs any phase's error.
#[async_trait]
pub trait ScanController: Send + Sync {
    fn name(&self) -> &str;
    fn stats(&self) -> Arc<ScanStats>;

    async fn read_inputs(&mut self) -> SimResult<()>;
    async fn execute_logic(&mut self) -> SimResult<()>;
    async fn write_outputs(&mut self) -> SimResult<()>;

    /// Optional; most controllers have nothing beyond the three core phases.
    async fn run_diagnostics(&mut self) -> SimResult<()> {
        Ok(())
    }

    async fn scan_cycle(&mut self, sim_time: f64) {
        let result: SimResult<()> = async {
            self.read_inputs().await?;
            self.execute_logic().await?;
            self.write_outputs().await?;
            self.run_diagnostics().await?;
            Ok(())
        }
        .await;

        let stats = self.stats();
        stats.record_scan(sim_time);
        if let Err(err) = result {
            stats.record_error();
            error!(controller = self.name(), error = %err, "controller scan cycle failed");
        }
    }
}

/// Spawn a controller's scan loop on its own `tokio::time::interval`.
/// The returned handle is aborted and awaited by `Scheduler::stop`.
pub fn spawn_scan_loop<C>(mut controller: C, clock: Arc<SimulationClock>, scan_interval: Duration) -> JoinHandle<()>
where
    C: ScanController + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(scan_interval);
        loop {
            ticker.tick().await;
            let sim_time = clock.now();
            controller.scan_cycle(sim_time).await;
        }
    })
}

/// Rising-edge latch shared by every trip-reset / manual-command coil
/// in the PLC and safety-controller modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeDetector {
    previous: bool,
}

impl EdgeDetector {
    /// Feed the current sampled value; returns `true` exactly on the
    /// cycle where it transitions from `false` to `true`.
    pub fn rising_edge(&mut self, current: bool) -> bool {
        let edge = current && !self.previous;
        self.previous = current;
        edge
    }
}

/// Wraps an arbitrary phase failure as a `SimError::TransientIo`, the
/// kind scan-cycle errors are expected to surface as (: never
/// surfaced from pure logic, recoverable at the controller boundary).
pub fn phase_error(context: &str, message: impl std::fmt::Display) -> SimError {
    SimError::TransientIo(format!("{context}: {message}"))
}


#[cfg(test)]
mod edge_detector_props {
    use super::EdgeDetector;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn fires_exactly_once_per_false_to_true_transition(samples in prop::collection::vec(any::<bool>(), 0..64)) {
            let mut edge = EdgeDetector::default();
            let mut previous = false;
            let mut expected_edges = 0u32;
            let mut actual_edges = 0u32;
            for current in samples {
                if current && !previous {
                    expected_edges += 1;
                }
                if edge.rising_edge(current) {
                    actual_edges += 1;
                }
                previous = current;
            }
            prop_assert_eq!(actual_edges, expected_edges);
        }
    }
}
