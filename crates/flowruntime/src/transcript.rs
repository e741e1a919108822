use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowcore::{FlowError, Map, RunId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One completed run, as remembered by a transcript store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub run_id: RunId,
    pub flow_id: String,
    pub inputs: Map,
    pub final_output: String,
    pub completed_at: DateTime<Utc>,
}

/// Append-only history of completed runs
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    async fn append(&self, record: TranscriptRecord) -> Result<(), FlowError>;

    /// Records of one flow, oldest first
    async fn records(&self, flow_id: &str) -> Result<Vec<TranscriptRecord>, FlowError>;
}

#[derive(Default)]
pub struct MemoryTranscriptStore {
    records: Mutex<Vec<TranscriptRecord>>,
}

impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TranscriptStore for MemoryTranscriptStore {
    async fn append(&self, record: TranscriptRecord) -> Result<(), FlowError> {
        self.records.lock().await.push(record);
        Ok(())
    }

    async fn records(&self, flow_id: &str) -> Result<Vec<TranscriptRecord>, FlowError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| r.flow_id == flow_id)
            .cloned()
            .collect())
    }
}

/// JSON lines file, one record per line
pub struct JsonlTranscriptStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlTranscriptStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TranscriptStore for JsonlTranscriptStore {
    async fn append(&self, record: TranscriptRecord) -> Result<(), FlowError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn records(&self, flow_id: &str) -> Result<Vec<TranscriptRecord>, FlowError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: TranscriptRecord = serde_json::from_str(line)?;
            if record.flow_id == flow_id {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(flow_id: &str, output: &str) -> TranscriptRecord {
        TranscriptRecord {
            run_id: RunId::new_v4(),
            flow_id: flow_id.to_string(),
            inputs: Map::new(),
            final_output: output.to_string(),
            completed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_store_filters_by_flow() {
        let store = MemoryTranscriptStore::new();
        store.append(record("a", "one")).await.unwrap();
        store.append(record("b", "two")).await.unwrap();
        store.append(record("a", "three")).await.unwrap();

        let outputs: Vec<String> = store
            .records("a")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.final_output)
            .collect();
        assert_eq!(outputs, vec!["one", "three"]);
    }

    #[tokio::test]
    async fn jsonl_store_appends_lines() {
        let path = std::env::temp_dir().join(format!("transcripts-{}.jsonl", RunId::new_v4()));
        let store = JsonlTranscriptStore::new(&path);
        assert!(store.records("a").await.unwrap().is_empty());

        store.append(record("a", "first")).await.unwrap();
        store.append(record("a", "second")).await.unwrap();

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(content.lines().count(), 2);
        let records = store.records("a").await.unwrap();
        assert_eq!(records[1].final_output, "second");

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn jsonl_store_surfaces_io_and_parse_failures() {
        let dir = std::env::temp_dir();
        let store = JsonlTranscriptStore::new(&dir);
        assert!(matches!(
            store.append(record("a", "lost")).await,
            Err(FlowError::Io(_))
        ));

        let path = dir.join(format!("transcripts-{}.jsonl", RunId::new_v4()));
        tokio::fs::write(&path, "{\"run_id\": 42}\n").await.unwrap();
        let store = JsonlTranscriptStore::new(&path);
        assert!(matches!(
            store.records("a").await,
            Err(FlowError::Serialization(_))
        ));

        let _ = tokio::fs::remove_file(&path).await;
    }
}
