//! Terminal outputs, one per sink category.
//!
//! File sinks are append-only: a run never truncates what earlier runs
//! wrote. Each file is opened once per run and flushed when the run ends.

use crate::error::SweepError;
use crate::types::SinkCategory;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// Destination for classified identifiers.
#[async_trait]
pub trait VerdictSink: Send + Sync {
    async fn write(&self, category: SinkCategory, identifier: &str) -> Result<(), SweepError>;

    async fn flush(&self) -> Result<(), SweepError> {
        Ok(())
    }
}

/// `[output]` file names, relative to the output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkFileNames {
    pub success: String,
    pub blocked: String,
    pub failed: String,
    pub unknown: String,
}

impl Default for SinkFileNames {
    fn default() -> Self {
        Self {
            success: "success.txt".to_string(),
            blocked: "blocked.txt".to_string(),
            failed: "failed.txt".to_string(),
            unknown: "unknown.txt".to_string(),
        }
    }
}

impl SinkFileNames {
    pub fn name(&self, category: SinkCategory) -> &str {
        match category {
            SinkCategory::Success => &self.success,
            SinkCategory::Blocked => &self.blocked,
            SinkCategory::Failed => &self.failed,
            SinkCategory::Unknown => &self.unknown,
        }
    }
}

/// Append-mode text files, one identifier per line.
#[derive(Debug)]
pub struct FileSinks {
    files: HashMap<SinkCategory, tokio::sync::Mutex<BufWriter<File>>>,
    paths: HashMap<SinkCategory, PathBuf>,
}

impl FileSinks {
    /// Open (creating if needed) every sink file under `dir`.
    pub async fn open(dir: &Path, names: &SinkFileNames) -> Result<Self, SweepError> {
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            SweepError::file_error(
                dir.to_string_lossy(),
                format!("Failed to create output directory: {}", e),
            )
        })?;

        let mut files = HashMap::new();
        let mut paths = HashMap::new();
        for category in SinkCategory::ALL {
            let path = dir.join(names.name(category));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| {
                    SweepError::file_error(
                        path.to_string_lossy(),
                        format!("Failed to open sink file: {}", e),
                    )
                })?;
            files.insert(category, tokio::sync::Mutex::new(BufWriter::new(file)));
            paths.insert(category, path);
        }
        Ok(Self { files, paths })
    }

    pub fn path(&self, category: SinkCategory) -> Option<&Path> {
        self.paths.get(&category).map(PathBuf::as_path)
    }
}

#[async_trait]
impl VerdictSink for FileSinks {
    async fn write(&self, category: SinkCategory, identifier: &str) -> Result<(), SweepError> {
        let file = self
            .files
            .get(&category)
            .ok_or_else(|| SweepError::sink(category.as_str(), "sink not open"))?;
        let mut writer = file.lock().await;
        writer
            .write_all(format!("{}\n", identifier).as_bytes())
            .await
            .map_err(|e| SweepError::sink(category.as_str(), e.to_string()))
    }

    async fn flush(&self) -> Result<(), SweepError> {
        for (category, file) in &self.files {
            file.lock()
                .await
                .flush()
                .await
                .map_err(|e| SweepError::sink(category.as_str(), e.to_string()))?;
        }
        Ok(())
    }
}

/// In-memory sink, useful for embedding the engine and for tests.
#[derive(Debug, Default)]
pub struct MemorySinks {
    entries: Mutex<HashMap<SinkCategory, Vec<String>>>,
}

impl MemorySinks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers written to `category`, in write order.
    pub fn entries(&self, category: SinkCategory) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl VerdictSink for MemorySinks {
    async fn write(&self, category: SinkCategory, identifier: &str) -> Result<(), SweepError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(category)
            .or_default()
            .push(identifier.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_sinks_append_across_runs() {
        let dir = tempdir().unwrap();
        let names = SinkFileNames::default();

        let sinks = FileSinks::open(dir.path(), &names).await.unwrap();
        sinks.write(SinkCategory::Success, "https://a.example").await.unwrap();
        sinks.write(SinkCategory::Blocked, "https://b.example").await.unwrap();
        sinks.flush().await.unwrap();
        drop(sinks);

        let sinks = FileSinks::open(dir.path(), &names).await.unwrap();
        sinks.write(SinkCategory::Success, "https://c.example").await.unwrap();
        sinks.flush().await.unwrap();

        let success = std::fs::read_to_string(dir.path().join("success.txt")).unwrap();
        assert_eq!(success, "https://a.example\nhttps://c.example\n");
        let blocked = std::fs::read_to_string(dir.path().join("blocked.txt")).unwrap();
        assert_eq!(blocked, "https://b.example\n");
        let failed = std::fs::read_to_string(dir.path().join("failed.txt")).unwrap();
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn test_file_sinks_custom_names_and_nested_dir() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("runs").join("shard-7");
        let names = SinkFileNames {
            success: "whitelisted.txt".into(),
            ..SinkFileNames::default()
        };
        let sinks = FileSinks::open(&out, &names).await.unwrap();
        sinks.write(SinkCategory::Success, "x").await.unwrap();
        sinks.flush().await.unwrap();

        assert_eq!(
            sinks.path(SinkCategory::Success),
            Some(out.join("whitelisted.txt").as_path())
        );
        assert_eq!(std::fs::read_to_string(out.join("whitelisted.txt")).unwrap(), "x\n");
    }

    #[tokio::test]
    async fn test_memory_sinks_collect() {
        let sinks = MemorySinks::new();
        sinks.write(SinkCategory::Failed, "a").await.unwrap();
        sinks.write(SinkCategory::Failed, "b").await.unwrap();
        assert_eq!(sinks.entries(SinkCategory::Failed), vec!["a", "b"]);
        assert!(sinks.entries(SinkCategory::Success).is_empty());
        assert_eq!(sinks.total(), 2);
    }
}
