//! Append-only JSONL record sink.
//!
//! The relational audit schema lives outside this repo; for a single
//! operator an append-only line log is enough for the persistence
//! collaborator's contract.

use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use snag::capabilities::RecordSink;
use snag::claim::TaskStatus;
use snag_protocol::Posting;

pub struct JsonlSink {
    path: PathBuf,
    // Serializes appends so interleaved workers cannot shear lines.
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    fn append(&self, line: &serde_json::Value) -> snag::Result<()> {
        let _guard = self.write_lock.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn ts() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordSink for JsonlSink {
    async fn persist_posting(&self, posting: &Posting) -> snag::Result<()> {
        self.append(&json!({
            "kind": "posting",
            "ts": Self::ts(),
            "posting": posting,
        }))
    }

    async fn update_task_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        detail: serde_json::Value,
    ) -> snag::Result<()> {
        self.append(&json!({
            "kind": "task",
            "ts": Self::ts(),
            "taskId": task_id,
            "status": status,
            "detail": detail,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_append_one_line_each() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonlSink::new(dir.path().join("records.jsonl"));

        sink.update_task_status("T1", TaskStatus::InProgress, json!({ "attempt": 1 }))
            .await
            .unwrap();
        sink.update_task_status("T1", TaskStatus::Completed, json!({ "attempt": 1 }))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("records.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["taskId"], "T1");
        assert_eq!(lines[1]["status"], "completed");
    }
}
