//! Shared enumerations for events, devices, and protocols.

use serde::{Deserialize, Serialize};

/// Event severity, ordered from least to most urgent for comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Alert,
    Critical,
}

/// Event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Security,
    Safety,
    Process,
    Alarm,
    Audit,
    System,
    Communication,
    Diagnostic,
}

/// Alarm priority, distinct from event severity but mapped onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl AlarmPriority {
    /// Fixed mapping from alarm priority to event severity.
    pub fn severity(self) -> Severity {
        match self {
            AlarmPriority::Critical => Severity::Critical,
            AlarmPriority::High => Severity::Error,
            AlarmPriority::Medium => Severity::Warning,
            AlarmPriority::Low => Severity::Notice,
        }
    }
}

/// Alarm lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmState {
    Active,
    Acknowledged,
    Cleared,
    Suppressed,
}

/// Declared device kind. Immutable after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    TurbinePlc,
    ReactorPlc,
    HvacPlc,
    SubstationPlc,
    SubstationRtu,
    SafetyController,
    Firewall,
    GenericPlc,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::TurbinePlc => "turbine_plc",
            DeviceKind::ReactorPlc => "reactor_plc",
            DeviceKind::HvacPlc => "hvac_plc",
            DeviceKind::SubstationPlc => "substation_plc",
            DeviceKind::SubstationRtu => "substation_rtu",
            DeviceKind::SafetyController => "safety_controller",
            DeviceKind::Firewall => "firewall",
            DeviceKind::GenericPlc => "generic_plc",
        }
    }
}

/// On-wire protocol a device exposes. The core never codes these,
/// it only tags devices with the set a collaborator will serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    ModbusTcp,
    S7comm,
    Dnp3,
    Iec104,
    EthernetIp,
    OpcUa,
}
