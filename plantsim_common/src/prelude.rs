//! Common re-exports for downstream crates.

pub use crate::config::{ConfigError, ConfigLoader, PlantConfig};
pub use crate::device::{DeviceIdentity, DeviceMetadata};
pub use crate::error::{SimError, SimResult};
pub use crate::memory::{MemoryMap, MemoryValue};
pub use crate::types::{AlarmPriority, AlarmState, Category, DeviceKind, Protocol, Severity};
