//! Paired host listing
//!
//! Remembers which hosts were used as keyboard or FIDO hosts and which one is
//! reconnected after a registration. The store behind it is external; the
//! controller only reads and updates records through [`DeviceDirectory`].

use std::collections::BTreeMap;

use autotype_common::{AutotypeResult, DeviceAddress, HidMode, HostRole, PairedDeviceRecord};
use parking_lot::Mutex;
use tracing::debug;

/// Preference store for paired hosts
pub trait DeviceDirectory: Send + Sync {
    fn record(&self, device: &DeviceAddress) -> Option<PairedDeviceRecord>;

    fn role_of(&self, device: &DeviceAddress) -> HostRole;

    /// The default host, if it is still bonded.
    ///
    /// A default whose bond is gone is cleared and `None` is returned.
    fn default_host(&self) -> Option<PairedDeviceRecord>;

    /// Make `device` the default host. Only bonded devices are accepted.
    fn cache_default(&self, device: &DeviceAddress) -> bool;

    fn cache_role(&self, device: &DeviceAddress, role: HostRole);

    /// Forget `device`
    fn clear(&self, device: &DeviceAddress);

    fn keyboard_hosts(&self) -> Vec<PairedDeviceRecord>;

    fn is_keyboard_host(&self, device: &DeviceAddress) -> bool {
        self.role_of(device) == HostRole::KeyboardHost
    }

    fn is_fido_host(&self, device: &DeviceAddress) -> bool {
        self.role_of(device) == HostRole::FidoHost
    }

    /// Default host that can be served in `mode`
    fn default_host_for(&self, mode: HidMode) -> Option<DeviceAddress> {
        self.default_host()
            .filter(|r| r.role.serves(mode))
            .map(|r| r.address)
    }
}

/// In-process [`DeviceDirectory`]
#[derive(Default)]
pub struct MemoryDirectory {
    records: Mutex<BTreeMap<DeviceAddress, PairedDeviceRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: PairedDeviceRecord) {
        self.records.lock().insert(record.address.clone(), record);
    }

    /// Update the bond flag reported by the platform
    pub fn set_bonded(&self, device: &DeviceAddress, bonded: bool) {
        if let Some(record) = self.records.lock().get_mut(device) {
            record.bonded = bonded;
        }
    }

    pub fn records(&self) -> Vec<PairedDeviceRecord> {
        self.records.lock().values().cloned().collect()
    }

    /// Serialize all records for an external store
    pub fn to_bytes(&self) -> AutotypeResult<Vec<u8>> {
        Ok(bincode::serialize(&self.records())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> AutotypeResult<Self> {
        let records: Vec<PairedDeviceRecord> = bincode::deserialize(bytes)?;
        let directory = Self::new();
        for record in records {
            directory.upsert(record);
        }
        Ok(directory)
    }
}

impl DeviceDirectory for MemoryDirectory {
    fn record(&self, device: &DeviceAddress) -> Option<PairedDeviceRecord> {
        self.records.lock().get(device).cloned()
    }

    fn role_of(&self, device: &DeviceAddress) -> HostRole {
        self.records
            .lock()
            .get(device)
            .map(|r| r.role)
            .unwrap_or(HostRole::Unknown)
    }

    fn default_host(&self) -> Option<PairedDeviceRecord> {
        let mut records = self.records.lock();
        let record = records.values_mut().find(|r| r.is_default)?;
        if !record.bonded {
            debug!("Default host {} is no longer bonded, clearing", record.address);
            record.is_default = false;
            return None;
        }
        Some(record.clone())
    }

    fn cache_default(&self, device: &DeviceAddress) -> bool {
        let mut records = self.records.lock();
        match records.get(device) {
            Some(r) if r.bonded => {}
            _ => return false,
        }
        for record in records.values_mut() {
            record.is_default = &record.address == device;
        }
        true
    }

    fn cache_role(&self, device: &DeviceAddress, role: HostRole) {
        let mut records = self.records.lock();
        records
            .entry(device.clone())
            .and_modify(|r| r.role = role)
            .or_insert_with(|| PairedDeviceRecord::new(device.clone(), device.as_str(), role));
    }

    fn clear(&self, device: &DeviceAddress) {
        self.records.lock().remove(device);
    }

    fn keyboard_hosts(&self) -> Vec<PairedDeviceRecord> {
        self.records
            .lock()
            .values()
            .filter(|r| r.role == HostRole::KeyboardHost)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> DeviceAddress {
        DeviceAddress::new(s)
    }

    #[test]
    fn test_stale_default_is_cleared() {
        let dir = MemoryDirectory::new();
        dir.upsert(PairedDeviceRecord::new("AA:AA:AA:AA:AA:AA", "laptop", HostRole::FidoHost));
        assert!(dir.cache_default(&addr("AA:AA:AA:AA:AA:AA")));
        assert!(dir.default_host().is_some());

        dir.set_bonded(&addr("AA:AA:AA:AA:AA:AA"), false);
        assert!(dir.default_host().is_none());
        assert!(!dir.record(&addr("AA:AA:AA:AA:AA:AA")).unwrap().is_default);
    }

    #[test]
    fn test_cache_default_requires_bond() {
        let dir = MemoryDirectory::new();
        let mut rec = PairedDeviceRecord::new("BB:BB:BB:BB:BB:BB", "phone", HostRole::KeyboardHost);
        rec.bonded = false;
        dir.upsert(rec);

        assert!(!dir.cache_default(&addr("BB:BB:BB:BB:BB:BB")));
        assert!(!dir.cache_default(&addr("CC:CC:CC:CC:CC:CC")));
    }

    #[test]
    fn test_single_default() {
        let dir = MemoryDirectory::new();
        dir.cache_role(&addr("aa:aa:aa:aa:aa:aa"), HostRole::KeyboardHost);
        dir.cache_role(&addr("BB:BB:BB:BB:BB:BB"), HostRole::FidoHost);
        dir.cache_default(&addr("AA:AA:AA:AA:AA:AA"));
        dir.cache_default(&addr("BB:BB:BB:BB:BB:BB"));

        let defaults: Vec<_> = dir.records().into_iter().filter(|r| r.is_default).collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(dir.default_host_for(HidMode::Fido), Some(addr("BB:BB:BB:BB:BB:BB")));
        assert_eq!(dir.default_host_for(HidMode::Keyboard), None);
        assert!(dir.is_keyboard_host(&addr("AA:AA:AA:AA:AA:AA")));
        assert_eq!(dir.keyboard_hosts().len(), 1);
    }

    #[test]
    fn test_snapshot_restores_records() {
        let dir = MemoryDirectory::new();
        dir.cache_role(&addr("AA:AA:AA:AA:AA:AA"), HostRole::FidoHost);
        dir.cache_default(&addr("AA:AA:AA:AA:AA:AA"));

        let restored = MemoryDirectory::from_bytes(&dir.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.records(), dir.records());
        assert!(restored.is_fido_host(&addr("AA:AA:AA:AA:AA:AA")));
    }
}
