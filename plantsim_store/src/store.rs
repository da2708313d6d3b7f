//! State Store.
//!
//! The single concurrent data substrate for device memory, the device
//! registry, and the central audit log. The device registry itself is a
//! coarse, rarely-mutated `tokio::sync::RwLock`; each device's memory
//! map is its own `parking_lot::RwLock` so that a bulk operation on one
//! device is atomic with respect to other bulk operations on that same
//! device without serialising unrelated devices behind it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock as SyncRwLock;
use plantsim_common::consts::DEFAULT_AUDIT_LOG_CAPACITY;
use plantsim_common::device::{DeviceIdentity, DeviceMetadata};
use plantsim_common::error::{SimError, SimResult};
use plantsim_common::memory::{MemoryMap, MemoryValue};
use plantsim_common::types::{Category, DeviceKind, Protocol, Severity};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock as AsyncRwLock;

/// A single append-only audit/event entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub sim_time: f64,
    pub wall_time: f64,
    pub severity: Severity,
    pub category: Category,
    pub message: String,
    pub device: Option<String>,
    pub user: Option<String>,
    pub correlation_id: Option<String>,
    pub data: serde_json::Value,
}

/// Filters accepted by `get_audit_log` / `get_audit_trail`.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub device: Option<String>,
    pub user: Option<String>,
    pub severity: Option<Severity>,
    pub category: Option<Category>,
}

impl AuditFilter {
    pub(crate) fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(device) = &self.device {
            if entry.device.as_deref() != Some(device.as_str()) {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if entry.user.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if entry.severity != severity {
                return false;
            }
        }
        if let Some(category) = self.category {
            if entry.category != category {
                return false;
            }
        }
        true
    }
}

/// A registered device: immutable identity, mutable online flag and memory map.
pub struct Device {
    pub identity: DeviceIdentity,
    online: AtomicBool,
    memory: SyncRwLock<MemoryMap>,
}

impl Device {
    fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            online: AtomicBool::new(false),
            memory: SyncRwLock::new(MemoryMap::new()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

/// Read-only projection of a device's identity, online flag, and memory map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub id: u32,
    pub kind: DeviceKind,
    pub protocols: Vec<Protocol>,
    pub metadata: DeviceMetadata,
    pub online: bool,
    pub memory: MemoryMap,
}

/// Aggregated counts returned by `get_simulation_summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub device_count: usize,
    pub online_count: usize,
    pub devices_by_kind: HashMap<String, usize>,
    pub audit_log_len: usize,
    pub audit_log_capacity: usize,
    pub audit_dropped: u64,
    pub revision: u64,
}

/// The single concurrent data substrate for devices and the audit log.
pub struct StateStore {
    devices: AsyncRwLock<HashMap<String, Arc<Device>>>,
    audit_log: SyncRwLock<VecDeque<AuditEntry>>,
    audit_capacity: usize,
    audit_dropped: AtomicU64,
    revision: AtomicU64,
}

impl StateStore {
    pub fn new(audit_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            devices: AsyncRwLock::new(HashMap::new()),
            audit_log: SyncRwLock::new(VecDeque::with_capacity(audit_capacity.min(4096))),
            audit_capacity: audit_capacity.max(1),
            audit_dropped: AtomicU64::new(0),
            revision: AtomicU64::new(0),
        })
    }

    pub fn with_default_capacity() -> Arc<Self> {
        Self::new(DEFAULT_AUDIT_LOG_CAPACITY)
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn register_device(
        &self,
        name: &str,
        kind: DeviceKind,
        id: u32,
        protocols: HashSet<Protocol>,
        metadata: DeviceMetadata,
        registered_at: f64,
    ) -> SimResult<()> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(name) {
            return Err(SimError::AlreadyExists(name.to_string()));
        }
        let identity = DeviceIdentity {
            name: name.to_string(),
            id,
            kind,
            protocols,
            metadata,
            registered_at,
        };
        devices.insert(name.to_string(), Arc::new(Device::new(identity)));
        drop(devices);
        self.bump_revision();
        Ok(())
    }

    pub async fn unregister_device(&self, name: &str) -> SimResult<()> {
        let mut devices = self.devices.write().await;
        if devices.remove(name).is_none() {
            return Err(SimError::UnknownDevice(name.to_string()));
        }
        drop(devices);
        self.bump_revision();
        Ok(())
    }

    async fn get_device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.read().await.get(name).cloned()
    }

    fn snapshot_of(device: &Device) -> DeviceSnapshot {
        DeviceSnapshot {
            name: device.identity.name.clone(),
            id: device.identity.id,
            kind: device.identity.kind,
            protocols: device.identity.protocols.iter().copied().collect(),
            metadata: device.identity.metadata.clone(),
            online: device.is_online(),
            memory: device.memory.read().clone(),
        }
    }

    /// Unknown-device reads return `None`, not an error.
    pub async fn get_device_state(&self, name: &str) -> Option<DeviceSnapshot> {
        let device = self.get_device(name).await?;
        Some(Self::snapshot_of(&device))
    }

    pub async fn get_devices_by_kind(&self, kind: DeviceKind) -> Vec<DeviceSnapshot> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.identity.kind == kind)
            .map(|d| Self::snapshot_of(d))
            .collect()
    }

    pub async fn set_online(&self, name: &str, online: bool) -> SimResult<()> {
        let device = self
            .get_device(name)
            .await
            .ok_or_else(|| SimError::UnknownDevice(name.to_string()))?;
        device.online.store(online, Ordering::Release);
        self.bump_revision();
        Ok(())
    }

    pub async fn read_memory(&self, name: &str, address: &str) -> Option<MemoryValue> {
        let device = self.get_device(name).await?;
        device.memory.read().get(address).cloned()
    }

    pub async fn write_memory(&self, name: &str, address: &str, value: MemoryValue) -> SimResult<()> {
        let device = self
            .get_device(name)
            .await
            .ok_or_else(|| SimError::UnknownDevice(name.to_string()))?;
        device.memory.write().insert(address.to_string(), value);
        self.bump_revision();
        Ok(())
    }

    /// Whole-map read. Atomic with respect to concurrent bulk writes on
    /// the same device.
    pub async fn bulk_read_memory(&self, name: &str) -> SimResult<MemoryMap> {
        let device = self
            .get_device(name)
            .await
            .ok_or_else(|| SimError::UnknownDevice(name.to_string()))?;
        Ok(device.memory.read().clone())
    }

    /// Multi-cell atomic write. All entries land together under a single
    /// lock acquisition.
    pub async fn bulk_write_memory(
        &self,
        name: &str,
        mapping: impl IntoIterator<Item = (String, MemoryValue)>,
    ) -> SimResult<()> {
        let device = self
            .get_device(name)
            .await
            .ok_or_else(|| SimError::UnknownDevice(name.to_string()))?;
        {
            let mut memory = device.memory.write();
            for (address, value) in mapping {
                memory.insert(address, value);
            }
        }
        self.bump_revision();
        Ok(())
    }

    /// Push an entry to the central audit log, evicting the oldest entry
    /// once the configured bound is exceeded.
    pub fn append_audit_event(&self, entry: AuditEntry) {
        let mut log = self.audit_log.write();
        if log.len() >= self.audit_capacity {
            log.pop_front();
            self.audit_dropped.fetch_add(1, Ordering::Relaxed);
        }
        log.push_back(entry);
        drop(log);
        self.bump_revision();
    }

    /// Most-recent-last subset matching the given filters.
    pub fn get_audit_log(&self, filter: &AuditFilter, limit: usize) -> Vec<AuditEntry> {
        let log = self.audit_log.read();
        let mut entries: Vec<AuditEntry> = log
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect();
        entries.reverse();
        entries
    }

    pub async fn get_simulation_summary(&self) -> SimulationSummary {
        let devices = self.devices.read().await;
        let mut by_kind: HashMap<String, usize> = HashMap::new();
        let mut online_count = 0usize;
        for device in devices.values() {
            *by_kind.entry(device.identity.kind.as_str().to_string()).or_insert(0) += 1;
            if device.is_online() {
                online_count += 1;
            }
        }
        let audit_log = self.audit_log.read();
        SimulationSummary {
            device_count: devices.len(),
            online_count,
            devices_by_kind: by_kind,
            audit_log_len: audit_log.len(),
            audit_log_capacity: self.audit_capacity,
            audit_dropped: self.audit_dropped.load(Ordering::Relaxed),
            revision: self.revision.load(Ordering::Relaxed),
        }
    }

    /// Drop all devices, memory, and audit records.
    pub async fn reset(&self) {
        self.devices.write().await.clear();
        self.audit_log.write().clear();
        self.audit_dropped.store(0, Ordering::Relaxed);
        self.bump_revision();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> DeviceMetadata {
        DeviceMetadata::default()
    }

    #[tokio::test]
    async fn register_is_idempotent_rejecting() {
        let store = StateStore::with_default_capacity();
        store
            .register_device("t1", DeviceKind::TurbinePlc, 1, HashSet::new(), meta(), 0.0)
            .await
            .unwrap();
        let err = store
            .register_device("t1", DeviceKind::TurbinePlc, 1, HashSet::new(), meta(), 0.0)
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn unknown_device_read_is_none_not_error() {
        let store = StateStore::with_default_capacity();
        assert!(store.get_device_state("nope").await.is_none());
        assert!(store.read_memory("nope", "coils[0]").await.is_none());
    }

    #[tokio::test]
    async fn write_to_unknown_device_fails() {
        let store = StateStore::with_default_capacity();
        let err = store
            .write_memory("nope", "coils[0]", MemoryValue::Bool(true))
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn bulk_write_is_atomic_for_bulk_read() {
        let store = StateStore::with_default_capacity();
        store
            .register_device("t1", DeviceKind::TurbinePlc, 1, HashSet::new(), meta(), 0.0)
            .await
            .unwrap();
        let mapping = vec![
            ("holding_registers[0]".to_string(), MemoryValue::U16(100)),
            ("holding_registers[1]".to_string(), MemoryValue::U16(200)),
        ];
        store.bulk_write_memory("t1", mapping).await.unwrap();
        let snapshot = store.bulk_read_memory("t1").await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["holding_registers[0]"].as_u16(), Some(100));
        assert_eq!(snapshot["holding_registers[1]"].as_u16(), Some(200));
    }

    #[tokio::test]
    async fn audit_log_bounded_drops_oldest() {
        let store = StateStore::new(2);
        for i in 0..5 {
            store.append_audit_event(AuditEntry {
                sim_time: i as f64,
                wall_time: 0.0,
                severity: Severity::Info,
                category: Category::System,
                message: format!("event {i}"),
                device: None,
                user: None,
                correlation_id: None,
                data: serde_json::Value::Null,
            });
        }
        let all = store.get_audit_log(&AuditFilter::default(), 100);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "event 3");
        assert_eq!(all[1].message, "event 4");
        let summary = store.get_simulation_summary().await;
        assert_eq!(summary.audit_dropped, 3);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let store = StateStore::with_default_capacity();
        store
            .register_device("t1", DeviceKind::TurbinePlc, 1, HashSet::new(), meta(), 0.0)
            .await
            .unwrap();
        store.append_audit_event(AuditEntry {
            sim_time: 0.0,
            wall_time: 0.0,
            severity: Severity::Info,
            category: Category::System,
            message: "hi".into(),
            device: None,
            user: None,
            correlation_id: None,
            data: serde_json::Value::Null,
        });
        store.reset().await;
        let summary = store.get_simulation_summary().await;
        assert_eq!(summary.device_count, 0);
        assert_eq!(summary.audit_log_len, 0);
    }
}
