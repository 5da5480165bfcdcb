// Append-only JSON-lines audit log of connect/disconnect/tool_call
// records. No direct teacher analog (the teacher has no client-facing
// audit trail), grounded in the teacher's general append-and-flush file
// handling plus the crash-safety posture of `daemon/pager.rs`'s temp
// file writer: every record is flushed before the call that produced it
// returns.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_derive::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum AuditRecord {
    #[serde(rename = "connect")]
    Connect { client_id: String, timestamp_ms: u64 },
    #[serde(rename = "disconnect")]
    Disconnect { client_id: String, timestamp_ms: u64 },
    #[serde(rename = "tool_call")]
    ToolCall { client_id: String, timestamp_ms: u64, tool: String, success: bool },
}

pub struct SessionLogger {
    file: Mutex<File>,
    path: PathBuf,
}

impl SessionLogger {
    /// Opens (creating if needed) the append-only log at `path`, and
    /// removes any stale `.tmp` sibling left by a prior crashed process.
    pub fn open(path: &Path) -> anyhow::Result<SessionLogger> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        cleanup_stale_temp(path);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(SessionLogger { file: Mutex::new(file), path: path.to_path_buf() })
    }

    pub fn log(&self, record: &AuditRecord) {
        let Ok(line) = serde_json::to_string(record) else {
            warn!("failed to serialize audit record");
            return;
        };
        let mut file = self.file.lock().unwrap();
        if let Err(e) = writeln!(file, "{line}") {
            warn!(error = %e, path = %self.path.display(), "audit log write failed");
            return;
        }
        // Crash-safe: the call that produced this record must not return
        // until the line is durable.
        let _ = file.flush();
    }
}

fn cleanup_stale_temp(path: &Path) {
    let tmp = path.with_extension("tmp");
    if tmp.exists() {
        let _ = std::fs::remove_file(&tmp);
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn records_are_appended_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let logger = SessionLogger::open(&path).unwrap();

        logger.log(&AuditRecord::Connect { client_id: "c1".to_string(), timestamp_ms: 1 });
        logger.log(&AuditRecord::ToolCall {
            client_id: "c1".to_string(),
            timestamp_ms: 2,
            tool: "getContent".to_string(),
            success: true,
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"connect\""));
        assert!(lines[1].contains("\"tool_call\""));
    }

    #[test]
    fn reopening_preserves_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let logger = SessionLogger::open(&path).unwrap();
            logger.log(&AuditRecord::Connect { client_id: "c1".to_string(), timestamp_ms: 1 });
        }
        {
            let logger = SessionLogger::open(&path).unwrap();
            logger.log(&AuditRecord::Disconnect { client_id: "c1".to_string(), timestamp_ms: 2 });
        }
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
