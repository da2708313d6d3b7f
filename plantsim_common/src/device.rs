//! Device identity and registration metadata.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{DeviceKind, Protocol};

/// Static metadata carried alongside a device's identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceMetadata {
    pub description: String,
    pub location: String,
}

/// A device's identity as recorded at registration.
///
/// Immutable once registered: `kind` never changes after
/// `StateStore::register_device`. The memory map and `online` flag are
/// the only mutable parts of a device record, and they live alongside
/// this identity in the store (see `plantsim_core::store::Device`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub id: u32,
    pub kind: DeviceKind,
    pub protocols: HashSet<Protocol>,
    pub metadata: DeviceMetadata,
    /// Simulation time at which the device was registered.
    pub registered_at: f64,
}
