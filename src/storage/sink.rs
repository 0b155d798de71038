//! Persistence of completed inspections

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::inspection::record::InspectionResult;

/// Receives every completed pipeline run
pub trait StatisticsSink: Send + Sync {
    fn record(&self, result: &InspectionResult, session: Option<Uuid>) -> Result<()>;
}

impl<T: StatisticsSink + ?Sized> StatisticsSink for Arc<T> {
    fn record(&self, result: &InspectionResult, session: Option<Uuid>) -> Result<()> {
        (**self).record(result, session)
    }
}

#[derive(Serialize)]
struct Line<'a> {
    /// Milliseconds since the Unix epoch
    timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<Uuid>,
    result: &'a InspectionResult,
}

/// Appends one JSON object per run to a file
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it and its parent directories
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatisticsSink for JsonLinesSink {
    fn record(&self, result: &InspectionResult, session: Option<Uuid>) -> Result<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let line = serde_json::to_string(&Line {
            timestamp,
            session_id: session,
            result,
        })?;

        let mut file = self.file.lock();
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_one_line_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("results.jsonl");
        let session = Uuid::new_v4();

        {
            let sink = JsonLinesSink::open(&path).unwrap();
            let passed = InspectionResult {
                success: true,
                confidence: 0.6,
                text: "PRODUKT ABC123".to_string(),
                ..Default::default()
            };
            sink.record(&passed, Some(session)).unwrap();
            sink.record(&InspectionResult::default(), None).unwrap();
        }

        // Reopening appends
        JsonLinesSink::open(&path)
            .unwrap()
            .record(&InspectionResult::default(), None)
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["session_id"], session.to_string());
        assert_eq!(lines[0]["result"]["text"], "PRODUKT ABC123");
        assert_eq!(lines[0]["result"]["success"], true);
        assert!(lines[1].get("session_id").is_none());
        assert!(lines[2]["timestamp"].as_u64().unwrap() > 0);
    }
}
