//! JSON-lines file audit backend

use crate::{AuditError, AuditLog, AuditRecord};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Audit log appending one JSON object per line
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<File>,
    count: AtomicUsize,
}

impl FileAuditLog {
    /// Open or create the log, counting rows already present
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let count = read_records(&path)?.len();
        info!("Opened audit log {} ({} records)", path.display(), count);

        Ok(Self {
            path,
            file: Mutex::new(file),
            count: AtomicUsize::new(count),
        })
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_records(path: &Path) -> Result<Vec<AuditRecord>, AuditError> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!("Skipping corrupt audit line {} in {}: {}", index + 1, path.display(), e),
        }
    }
    Ok(records)
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        {
            let mut file = self
                .file
                .lock()
                .map_err(|_| AuditError::Invalid("audit file lock poisoned".to_string()))?;
            file.write_all(&line)?;
            file.flush()?;
        }

        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Audit append {} for {} (#{})", record.record_type(), record.hostname(), count);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let mut records = read_records(&self.path)?;
        let start = records.len().saturating_sub(limit);
        Ok(records.split_off(start))
    }

    async fn len(&self) -> Result<usize, AuditError> {
        Ok(self.count.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{from_mode, AuditMode};
    use chrono::Utc;
    use tempfile::TempDir;

    fn command(sequence: u32, delivered: bool) -> AuditRecord {
        AuditRecord::Command {
            request_id: format!("req-{}", sequence),
            hostname: "esg-0001".to_string(),
            device_db_id: Some(1),
            sequence,
            kind: "SYSTEM".to_string(),
            action: "REBOOT".to_string(),
            delivered,
            detail: serde_json::json!({"sequence": sequence}),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit").join("commands.jsonl");

        let log = FileAuditLog::open(&path).await.unwrap();
        log.append(command(1, true)).await.unwrap();
        log.append(command(2, false)).await.unwrap();
        assert_eq!(log.len().await.unwrap(), 2);
        drop(log);

        let reopened = FileAuditLog::open(&path).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        reopened.append(command(3, true)).await.unwrap();

        let recent = reopened.recent(2).await.unwrap();
        assert_eq!(recent, vec![command_at(&recent[0], 2, false), command_at(&recent[1], 3, true)]);
    }

    // Rebuild an expected row with the timestamp of the one read back
    fn command_at(actual: &AuditRecord, sequence: u32, delivered: bool) -> AuditRecord {
        let mut expected = command(sequence, delivered);
        if let (AuditRecord::Command { at, .. }, AuditRecord::Command { at: read_at, .. }) = (&mut expected, actual) {
            *at = *read_at;
        }
        expected
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "not json\n\n").unwrap();

        let log = FileAuditLog::open(&path).await.unwrap();
        assert_eq!(log.len().await.unwrap(), 0);
        log.append(command(9, true)).await.unwrap();
        assert_eq!(log.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_from_mode_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = from_mode(AuditMode::File { path: path.clone() }).await.unwrap();
        log.append(command(1, true)).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"record\":\"command\""));
    }
}
