//! In-memory audit backend for development and testing

use crate::{AuditError, AuditLog, AuditRecord};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory audit log
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        debug!("Audit append {} for {}", record.record_type(), record.hostname());
        self.records.write().await.push(record);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().await;
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }

    async fn len(&self) -> Result<usize, AuditError> {
        Ok(self.records.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alarm(n: u32) -> AuditRecord {
        AuditRecord::Alarm {
            hostname: format!("esg-{:04}", n),
            device_db_id: Some(n),
            alarm: serde_json::json!({"type": "ALARM_PANIC1"}),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_recent() {
        let log = MemoryAuditLog::new();
        assert!(log.is_empty().await.unwrap());

        for n in 0..5 {
            log.append(alarm(n)).await.unwrap();
        }
        assert_eq!(log.len().await.unwrap(), 5);

        let recent = log.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].hostname(), "esg-0003");
        assert_eq!(recent[1].hostname(), "esg-0004");

        assert_eq!(log.recent(100).await.unwrap().len(), 5);
    }
}
