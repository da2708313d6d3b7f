//! Vendor-shaped device controllers.
//!
//! Each PLC here is a plain struct holding the paired physics device's
//! name and a handle to the store; it does not register as a device of
//! its own. `read_inputs` mirrors the physics device's own telemetry
//! read-only into local SCADA-facing register fields using that
//! vendor's documented addressing; `execute_logic` validates/clamps
//! operator commands against those local fields; `write_outputs`
//! commits the result into the physics device's control-input
//! convention (`holding_registers[10+]` / `coils[10+]`) back through
//! the store. The store mediates between controller and physics tick
//! so no PLC here holds a direct engine reference.

pub mod hvac;
pub mod reactor;
pub mod substation;
pub mod turbine;

pub use hvac::HvacPlc;
pub use reactor::ReactorPlc;
pub use substation::SubstationPlc;
pub use turbine::TurbinePlc;
