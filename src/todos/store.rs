//! Directory-backed TODO store: one `{id}.json` plus one `{id}.md` per record.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::todos::model::{TodoRecord, TodoStatus};

pub struct TodoStore {
    dir: PathBuf,
}

impl TodoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn json_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn markdown_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.md"))
    }

    /// Write (or overwrite) both files for a record. Returns the JSON path.
    pub async fn save(&self, record: &TodoRecord) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let json_path = self.json_path(record.id);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&json_path, json)
            .await
            .map_err(|source| StoreError::Write {
                path: json_path.clone(),
                source,
            })?;

        let md_path = self.markdown_path(record.id);
        fs::write(&md_path, record.to_markdown())
            .await
            .map_err(|source| StoreError::Write {
                path: md_path.clone(),
                source,
            })?;

        debug!(id = %record.id, path = %json_path.display(), "Saved todo record");
        Ok(json_path)
    }

    pub async fn load(&self, id: Uuid) -> Result<TodoRecord, StoreError> {
        let path = self.json_path(id);
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(id.to_string()));
        }
        read_record(&path).await
    }

    /// All records, oldest first. Unreadable JSON files are skipped.
    pub async fn list(&self) -> Result<Vec<TodoRecord>, StoreError> {
        if !fs::try_exists(&self.dir).await? {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable todo file");
                }
            }
        }
        records.sort_by_key(|r| r.created);
        Ok(records)
    }

    /// Change a record's status and rewrite both files.
    pub async fn set_status(&self, id: Uuid, status: TodoStatus) -> Result<TodoRecord, StoreError> {
        let mut record = self.load(id).await?;
        record.status = status;
        self.save(&record).await?;
        Ok(record)
    }
}

async fn read_record(path: &Path) -> Result<TodoRecord, StoreError> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}
