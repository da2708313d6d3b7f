//! Device controllers, the safety subsystem, the scheduler, and the
//! connection registry that together drive the state store and
//! physics engines through a simulated scan cycle.

pub mod connection;
pub mod controller;
pub mod firewall;
pub mod plc;
pub mod rtu;
pub mod safety;
pub mod scheduler;

pub mod prelude {
    pub use crate::connection::ConnectionRegistry;
    pub use crate::controller::{EdgeDetector, ScanController, ScanStats};
    pub use crate::firewall::Firewall;
    pub use crate::plc::{HvacPlc, ReactorPlc, SubstationPlc, TurbinePlc};
    pub use crate::rtu::SubstationRtu;
    pub use crate::safety::ReactorSafetyController;
    pub use crate::scheduler::Scheduler;
}
