//! File-per-message fallback store for messages that could not be delivered.
//!
//! Files are named `{timestamp}_{event_kind}.json` and hold the full message
//! plus a `queued_for_manual_send` status marker. An operator picks them up
//! out-of-band; nothing here retries.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StoreError;
use crate::notify::message::OutboundMessage;

/// Status marker written into every fallback record.
pub const QUEUED_FOR_MANUAL_SEND: &str = "queued_for_manual_send";

/// Upper bound on `-N` suffixes tried when a file name is taken.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// On-disk shape of a fallback file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackRecord {
    #[serde(flatten)]
    pub message: OutboundMessage,
    pub status: String,
    pub failure_reason: String,
    pub persisted: DateTime<Utc>,
}

/// Directory-backed fallback store.
#[derive(Debug, Clone)]
pub struct FallbackStore {
    dir: PathBuf,
}

impl FallbackStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a message. Never overwrites an existing file.
    pub async fn persist(
        &self,
        message: &OutboundMessage,
        failure_reason: &str,
    ) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let now = Utc::now();
        let record = FallbackRecord {
            message: message.clone(),
            status: QUEUED_FOR_MANUAL_SEND.to_string(),
            failure_reason: failure_reason.to_string(),
            persisted: now,
        };
        let json = serde_json::to_vec_pretty(&record)?;

        let stem = format!("{}_{}", file_timestamp(now), message.event_kind.slug());
        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}-{attempt}.json")
            };
            let path = self.dir.join(name);

            let file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match file {
                Ok(f) => f,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(StoreError::Write { path, source }),
            };

            file.write_all(&json)
                .await
                .map_err(|source| StoreError::Write {
                    path: path.clone(),
                    source,
                })?;
            file.flush().await?;
            return Ok(path);
        }

        Err(StoreError::Write {
            path: self.dir.join(format!("{stem}.json")),
            source: std::io::Error::new(ErrorKind::AlreadyExists, "no free file name"),
        })
    }

    /// Fallback files currently on disk, oldest first.
    pub async fn list(&self) -> Result<Vec<PathBuf>, StoreError> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }
        let mut paths = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Read a fallback file back.
    pub async fn load(&self, path: &Path) -> Result<FallbackRecord, StoreError> {
        let raw = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// ISO-8601 UTC with `:` and `.` made file-name safe.
fn file_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}
