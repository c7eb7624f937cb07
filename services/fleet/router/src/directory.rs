//! Device directory: hostname to database id.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A known device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Hostname used in topics
    pub hostname: String,
    /// Database id assigned by the dashboard
    pub db_id: u32,
}

/// Lookup of provisioned devices
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Database id for a hostname
    async fn lookup(&self, hostname: &str) -> Option<u32>;

    /// Every known device
    async fn list(&self) -> Vec<DeviceEntry>;
}

/// Directory held in memory, seeded from configuration
#[derive(Debug, Default)]
pub struct StaticDirectory {
    devices: DashMap<String, u32>,
}

impl StaticDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from configured entries
    pub fn from_entries(entries: &[DeviceEntry]) -> Self {
        let directory = Self::new();
        for entry in entries {
            directory.insert(&entry.hostname, entry.db_id);
        }
        directory
    }

    /// Add or replace a device
    pub fn insert(&self, hostname: &str, db_id: u32) -> Option<u32> {
        self.devices.insert(hostname.to_string(), db_id)
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn lookup(&self, hostname: &str) -> Option<u32> {
        self.devices.get(hostname).map(|id| *id)
    }

    async fn list(&self) -> Vec<DeviceEntry> {
        let mut entries: Vec<DeviceEntry> = self
            .devices
            .iter()
            .map(|e| DeviceEntry {
                hostname: e.key().clone(),
                db_id: *e.value(),
            })
            .collect();
        entries.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_and_list() {
        let directory = StaticDirectory::from_entries(&[
            DeviceEntry { hostname: "esg-0002".to_string(), db_id: 2 },
            DeviceEntry { hostname: "esg-0001".to_string(), db_id: 1 },
        ]);
        assert_eq!(directory.lookup("esg-0001").await, Some(1));
        assert_eq!(directory.lookup("esg-9999").await, None);

        let list = directory.list().await;
        assert_eq!(list[0].hostname, "esg-0001");
        assert_eq!(list.len(), 2);
    }
}
