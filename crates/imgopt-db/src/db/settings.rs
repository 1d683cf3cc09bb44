use imgopt_core::{AdminSettings, AppError};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

use super::records::RecordDir;

const SETTINGS_RECORD: &str = "settings";

/// The single lock around [`AdminSettings`].
///
/// Readers take copies with [`SettingsRepository::snapshot`]; the worker pool and
/// the retention sweeper [`subscribe`](SettingsRepository::subscribe) to be woken
/// when an admin changes something.
#[derive(Clone)]
pub struct SettingsRepository {
    tx: Arc<watch::Sender<AdminSettings>>,
    records: Option<Arc<RecordDir>>,
}

impl SettingsRepository {
    pub fn in_memory(initial: AdminSettings) -> Self {
        let (tx, _rx) = watch::channel(initial.sanitized());
        Self {
            tx: Arc::new(tx),
            records: None,
        }
    }

    /// Load persisted settings from `root`, falling back to `initial` when none
    /// were saved yet.
    pub async fn open(root: impl AsRef<Path>, initial: AdminSettings) -> anyhow::Result<Self> {
        let records = RecordDir::open(root.as_ref()).await?;
        let settings = match records.read::<AdminSettings>(SETTINGS_RECORD).await {
            Ok(Some(saved)) => {
                tracing::info!(settings = ?saved, "Loaded persisted admin settings");
                saved.sanitized()
            }
            Ok(None) => initial.sanitized(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable admin settings");
                initial.sanitized()
            }
        };
        let (tx, _rx) = watch::channel(settings);
        Ok(Self {
            tx: Arc::new(tx),
            records: Some(Arc::new(records)),
        })
    }

    pub fn snapshot(&self) -> AdminSettings {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AdminSettings> {
        self.tx.subscribe()
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_desired_workers(&self, n: usize) -> Result<AdminSettings, AppError> {
        let n = AdminSettings::validate_desired_workers(n)?;
        self.update(|s| s.desired_workers = n).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_threads_per_batch(&self, n: usize) -> Result<AdminSettings, AppError> {
        let n = AdminSettings::validate_threads_per_batch(n)?;
        self.update(|s| s.threads_per_batch = n).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_retention_days(&self, days: u32) -> Result<AdminSettings, AppError> {
        self.update(|s| s.retention_days = days).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_auto_purge(&self, enabled: bool) -> Result<AdminSettings, AppError> {
        self.update(|s| s.auto_purge = enabled).await
    }

    /// Apply a change, write it to disk, and only then publish it to subscribers. A
    /// failed write leaves the published settings as they were.
    async fn update(
        &self,
        apply: impl FnOnce(&mut AdminSettings),
    ) -> Result<AdminSettings, AppError> {
        let _guard = match &self.records {
            Some(records) => Some(records.write_lock().lock().await),
            None => None,
        };
        let mut next = self.snapshot();
        apply(&mut next);
        if let Some(records) = &self.records {
            records.write_locked(SETTINGS_RECORD, &next).await?;
        }
        self.tx.send_replace(next);
        tracing::info!(settings = ?next, "Admin settings updated");
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initial() -> AdminSettings {
        AdminSettings {
            desired_workers: 2,
            threads_per_batch: 8,
            retention_days: 30,
            auto_purge: false,
        }
    }

    #[tokio::test]
    async fn test_updates_are_visible_to_snapshots_and_subscribers() {
        let repo = SettingsRepository::in_memory(initial());
        let mut rx = repo.subscribe();

        repo.set_desired_workers(5).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().desired_workers, 5);
        assert_eq!(repo.snapshot().desired_workers, 5);
    }

    #[tokio::test]
    async fn test_invalid_values_leave_settings_untouched() {
        let repo = SettingsRepository::in_memory(initial());
        assert!(matches!(
            repo.set_threads_per_batch(0).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(repo.set_desired_workers(1000).await.is_err());
        assert_eq!(repo.snapshot(), initial());
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let repo = SettingsRepository::in_memory(initial());
        let pinned = repo.snapshot();
        repo.set_threads_per_batch(2).await.unwrap();
        assert_eq!(pinned.threads_per_batch, 8);
        assert_eq!(repo.snapshot().threads_per_batch, 2);
    }

    #[tokio::test]
    async fn test_settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = SettingsRepository::open(dir.path(), initial()).await.unwrap();
            repo.set_retention_days(7).await.unwrap();
            repo.set_auto_purge(true).await.unwrap();
        }
        let repo = SettingsRepository::open(dir.path(), initial()).await.unwrap();
        let settings = repo.snapshot();
        assert_eq!(settings.retention_days, 7);
        assert!(settings.auto_purge);
        assert_eq!(settings.desired_workers, 2);
    }

    #[tokio::test]
    async fn test_failed_write_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SettingsRepository::open(dir.path(), initial()).await.unwrap();
        let mut rx = repo.subscribe();

        let record = dir.path().join(format!("{}.json", SETTINGS_RECORD));
        std::fs::create_dir_all(record.join("blocker")).unwrap();

        assert!(repo.set_desired_workers(5).await.is_err());
        assert_eq!(repo.snapshot(), initial());
        assert!(!rx.has_changed().unwrap());

        std::fs::remove_dir_all(&record).unwrap();
        repo.set_desired_workers(5).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().desired_workers, 5);
    }
}
