//! Common contract implemented by every continuous physics engine:
//! `initialise` once, then each cycle `read_control_inputs` →
//! `update(dt)` → `write_telemetry`, with `get_state`/`get_telemetry`
//! as pure projections at any time.

use async_trait::async_trait;
use plantsim_common::error::SimResult;

/// Lifecycle and step contract shared by all physics engines.
///
/// `update` is synchronous and pure with respect to I/O: it only reads
/// the cache populated by the most recent `read_control_inputs` and
/// mutates engine-local state. Splitting the async bracket phases from
/// the synchronous step keeps the hot update loop allocation-free and
/// makes the engine safe to call from a tight scheduler tick.
#[async_trait]
pub trait PhysicsEngine: Send + Sync {
    /// Verify the backing device exists and publish the initial state.
    async fn initialise(&mut self) -> SimResult<()>;

    /// Pull control inputs from the state store into an internal cache.
    /// Must be called before `update` on each cycle.
    async fn read_control_inputs(&mut self) -> SimResult<()>;

    /// Advance the engine by `dt` simulation seconds. A non-positive
    /// `dt` is a no-op, logged at debug level rather than rejected, so
    /// that a scheduler hiccup never produces a hard error.
    fn update(&mut self, dt: f64) -> SimResult<()>;

    /// Publish the current state to the device's memory map.
    async fn write_telemetry(&self) -> SimResult<()>;

    /// Display-oriented telemetry snapshot, independent of the memory
    /// map's wire encoding.
    fn get_telemetry(&self) -> serde_json::Value;
}
