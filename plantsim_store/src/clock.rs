//! Simulation Clock.
//!
//! A single, system-wide notion of "now" that can run at, faster than,
//! or slower than wall time, or be paused and stepped manually. Mirrors
//! `original_source/components/time/simulation_time.py`'s anchor
//! arithmetic: pause/resume/speed changes adjust `wall_time_start` so
//! that `now()` stays continuous across the transition.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use plantsim_common::consts::{CLOCK_TICK_MS, MAX_SPEED_MULTIPLIER, WAIT_FOR_MIN_SLEEP_MS};
use plantsim_common::error::{SimError, SimResult};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Simulation clock operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    RealTime,
    Accelerated,
    Stepped,
    Paused,
}

#[derive(Debug, Clone)]
struct ClockState {
    sim_time: f64,
    wall_time_start: Instant,
    wall_time_elapsed: f64,
    mode: ClockMode,
    speed_multiplier: f64,
    paused: bool,
    total_pause_duration: f64,
    pause_start: Option<Instant>,
}

impl ClockState {
    fn new(mode: ClockMode, speed_multiplier: f64) -> Self {
        let now = Instant::now();
        Self {
            sim_time: 0.0,
            wall_time_start: now,
            wall_time_elapsed: 0.0,
            mode,
            speed_multiplier,
            paused: mode == ClockMode::Paused,
            total_pause_duration: 0.0,
            pause_start: None,
        }
    }
}

/// Read-only projection of clock state for the telemetry surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub sim_time: f64,
    pub wall_time_elapsed: f64,
    pub mode: ClockMode,
    pub speed_multiplier: f64,
    pub paused: bool,
    pub total_pause_duration: f64,
}

/// The simulation's single time authority.
pub struct SimulationClock {
    state: Mutex<ClockState>,
    running: AtomicBool,
    advance_task: Mutex<Option<JoinHandle<()>>>,
}

impl SimulationClock {
    pub fn new(mode: ClockMode, speed_multiplier: f64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ClockState::new(mode, speed_multiplier)),
            running: AtomicBool::new(false),
            advance_task: Mutex::new(None),
        })
    }

    /// Seed wall/sim zero and, for real-time/accelerated modes, begin the
    /// internal advance loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mode = {
            let mut state = self.state.lock();
            state.wall_time_start = Instant::now();
            state.sim_time = 0.0;
            state.wall_time_elapsed = 0.0;
            state.total_pause_duration = 0.0;
            state.pause_start = None;
            state.paused = state.mode == ClockMode::Paused;
            state.mode
        };

        if matches!(mode, ClockMode::RealTime | ClockMode::Accelerated) {
            let clock = Arc::clone(self);
            let handle = tokio::spawn(async move { clock.advance_loop().await });
            *self.advance_task.lock() = Some(handle);
        }

        info!(?mode, "simulation clock started");
    }

    /// Halt the advance loop without resetting time.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.advance_task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        info!("simulation clock stopped");
    }

    /// Zero simulation time and wall-elapsed counters; preserves mode and speed.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.sim_time = 0.0;
        state.wall_time_start = Instant::now();
        state.wall_time_elapsed = 0.0;
        state.total_pause_duration = 0.0;
        state.pause_start = None;
        debug!("simulation clock reset");
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused {
            return;
        }
        state.paused = true;
        state.pause_start = Some(Instant::now());
        debug!("simulation clock paused");
    }

    /// Resume after a pause, adjusting anchors so `now()` is continuous.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        if !state.paused {
            return;
        }
        state.paused = false;
        if let Some(pause_start) = state.pause_start.take() {
            state.total_pause_duration += pause_start.elapsed().as_secs_f64();
        }
        let sim_time = state.sim_time;
        let speed = state.speed_multiplier;
        state.wall_time_start = Instant::now() - Duration::from_secs_f64(sim_time / speed);
        debug!("simulation clock resumed");
    }

    /// Manually advance simulation time. Only valid in `Stepped` or `Paused` mode.
    pub fn step(&self, dt: f64) -> SimResult<()> {
        if dt < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "step delta must be non-negative, got {dt}"
            )));
        }
        let mut state = self.state.lock();
        if !matches!(state.mode, ClockMode::Stepped | ClockMode::Paused) {
            return Err(SimError::InvalidMode(format!(
                "step() only valid in Stepped or Paused mode, current mode is {:?}",
                state.mode
            )));
        }
        state.sim_time += dt;
        state.wall_time_elapsed = state.wall_time_start.elapsed().as_secs_f64();
        Ok(())
    }

    /// Set the speed multiplier, adjusting anchors so `now()` is continuous.
    pub fn set_speed(&self, multiplier: f64) -> SimResult<()> {
        if multiplier <= 0.0 || multiplier > MAX_SPEED_MULTIPLIER {
            return Err(SimError::InvalidArgument(format!(
                "speed multiplier must be in (0, {MAX_SPEED_MULTIPLIER}], got {multiplier}"
            )));
        }
        let mut state = self.state.lock();
        let sim_time = state.sim_time;
        state.speed_multiplier = multiplier;
        state.wall_time_start = Instant::now() - Duration::from_secs_f64(sim_time / multiplier);
        Ok(())
    }

    pub fn now(&self) -> f64 {
        self.state.lock().sim_time
    }

    pub fn elapsed(&self) -> f64 {
        self.now()
    }

    pub fn wall_elapsed(&self) -> f64 {
        self.state.lock().wall_time_elapsed
    }

    pub fn delta(&self, from: f64) -> f64 {
        self.now() - from
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn speed(&self) -> f64 {
        self.state.lock().speed_multiplier
    }

    pub fn snapshot(&self) -> ClockSnapshot {
        let state = self.state.lock();
        ClockSnapshot {
            sim_time: state.sim_time,
            wall_time_elapsed: state.wall_time_elapsed,
            mode: state.mode,
            speed_multiplier: state.speed_multiplier,
            paused: state.paused,
            total_pause_duration: state.total_pause_duration,
        }
    }

    /// Suspend until simulation time has advanced by `dt` seconds, honouring
    /// pause (extends the wait) and speed (shorter wall sleeps when fast).
    pub async fn wait_for(&self, dt: f64) -> SimResult<()> {
        if dt < 0.0 {
            return Err(SimError::InvalidArgument(format!(
                "wait_for delta must be non-negative, got {dt}"
            )));
        }
        let target = self.now() + dt;
        loop {
            let (paused, remaining_sim, speed) = {
                let state = self.state.lock();
                (state.paused, target - state.sim_time, state.speed_multiplier)
            };
            if remaining_sim <= 0.0 {
                return Ok(());
            }
            if paused {
                tokio::time::sleep(Duration::from_millis(CLOCK_TICK_MS)).await;
                continue;
            }
            let remaining_wall_ms = (remaining_sim / speed * 1000.0).max(WAIT_FOR_MIN_SLEEP_MS as f64);
            let sleep_ms = remaining_wall_ms.min(CLOCK_TICK_MS as f64).max(WAIT_FOR_MIN_SLEEP_MS as f64);
            tokio::time::sleep(Duration::from_millis(sleep_ms as u64)).await;
        }
    }

    async fn advance_loop(self: Arc<Self>) {
        let tick = Duration::from_millis(CLOCK_TICK_MS);
        let mut last_update = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(tick).await;
            let current = Instant::now();
            let mut state = self.state.lock();
            if state.paused {
                last_update = current;
                continue;
            }
            let wall_delta = current.duration_since(last_update).as_secs_f64();
            last_update = current;
            let sim_delta = wall_delta * state.speed_multiplier;
            state.sim_time += sim_delta;
            state.wall_time_elapsed = current.duration_since(state.wall_time_start).as_secs_f64()
                - state.total_pause_duration;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn step_requires_stepped_or_paused_mode() {
        let clock = SimulationClock::new(ClockMode::RealTime, 1.0);
        assert!(matches!(clock.step(1.0), Err(SimError::InvalidMode(_))));
    }

    #[tokio::test]
    async fn step_rejects_negative_delta() {
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        assert!(matches!(clock.step(-1.0), Err(SimError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn step_advances_monotonically() {
        let clock = SimulationClock::new(ClockMode::Stepped, 1.0);
        let t0 = clock.now();
        clock.step(1.5).unwrap();
        let t1 = clock.now();
        assert!(t1 >= t0);
        assert!((t1 - t0 - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn set_speed_rejects_out_of_range() {
        let clock = SimulationClock::new(ClockMode::Accelerated, 1.0);
        assert!(clock.set_speed(0.0).is_err());
        assert!(clock.set_speed(-1.0).is_err());
        assert!(clock.set_speed(MAX_SPEED_MULTIPLIER * 2.0).is_err());
        assert!(clock.set_speed(10.0).is_ok());
    }

    #[tokio::test]
    async fn pause_freezes_time_then_resumes_continuously() {
        let clock = SimulationClock::new(ClockMode::Accelerated, 50.0);
        clock.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        clock.pause();
        let frozen = clock.now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(clock.now(), frozen);
        clock.resume();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(clock.now() >= frozen);
        clock.stop().await;
    }
}
