//! Continuous physics for the plant floor: the `PhysicsEngine`
//! lifecycle contract and the five engines that implement it, plus
//! the network-wide DC power flow model that ties turbine output to
//! grid loading.

pub mod engine;
pub mod grid;
pub mod hvac;
pub mod power_flow;
pub mod reactor;
pub mod turbine;

pub mod prelude {
    pub use crate::engine::PhysicsEngine;
    pub use crate::grid::{GridEngine, GridParameters, GridState};
    pub use crate::hvac::{HvacEngine, HvacParameters, HvacState};
    pub use crate::power_flow::{BusState, LineState, PowerFlowEngine, PowerFlowParameters};
    pub use crate::reactor::{ReactorEngine, ReactorParameters, ReactorState};
    pub use crate::turbine::{TurbineEngine, TurbineParameters, TurbineState};
}
