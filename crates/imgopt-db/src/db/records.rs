use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Directory of JSON records, one file per entity.
///
/// Writes go through a temp file and a rename so a crash never leaves a
/// truncated record behind. All writers share `write_lock`; callers take a fresh
/// snapshot of the entity *after* acquiring it so the last write always carries
/// the latest state.
pub(crate) struct RecordDir {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordDir {
    pub(crate) async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create record directory {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub(crate) fn write_lock(&self) -> &Mutex<()> {
        &self.write_lock
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    /// Caller must hold `write_lock`.
    pub(crate) async fn write_locked<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let path = self.path_for(name);
        let tmp = self.dir.join(format!("{}.json.tmp", name));
        let body = serde_json::to_vec_pretty(value).context("Failed to serialize record")?;
        fs::write(&tmp, body)
            .await
            .with_context(|| format!("Failed to write record {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move record into place {}", path.display()))?;
        Ok(())
    }

    /// Caller must hold `write_lock`.
    pub(crate) async fn remove_locked(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove record {}", path.display())),
        }
    }

    pub(crate) async fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let path = self.path_for(name);
        match fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .with_context(|| format!("Malformed record {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Failed to read record {}", path.display())),
        }
    }

    /// Load every record in the directory. Unreadable records are logged and skipped.
    pub(crate) async fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list records in {}", self.dir.display()))?;

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_record(&path) {
                continue;
            }
            let loaded = fs::read(&path)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|bytes| serde_json::from_slice::<T>(&bytes).map_err(anyhow::Error::from));
            match loaded {
                Ok(value) => out.push(value),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable record");
                }
            }
        }
        Ok(out)
    }
}

fn is_record(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}
