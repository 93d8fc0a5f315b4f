//! Durable record of relays that did not reach the endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::attachments::ResolvedAttachment;
use crate::client::RelayOutcome;

#[derive(Error, Debug)]
pub enum FailureStoreError {
    #[error("Failure log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failure record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    Transport { message: String },
    Rejected { status: u16, body: String },
}

impl FailureReason {
    /// Failure reason for an unsuccessful outcome, `None` on success
    pub fn from_outcome(outcome: &RelayOutcome) -> Option<Self> {
        match outcome {
            RelayOutcome::TransportError(message) => Some(FailureReason::Transport {
                message: message.clone(),
            }),
            RelayOutcome::Completed { status, body } if !outcome.is_success() => {
                Some(FailureReason::Rejected {
                    status: *status,
                    body: body.clone(),
                })
            }
            RelayOutcome::Completed { .. } => None,
        }
    }
}

/// Everything needed to rebuild and resend one relay request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRelay {
    pub id: Uuid,
    pub entry_id: i64,
    pub form_id: i64,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
    pub reason: FailureReason,
    pub name: String,
    pub date_of_birth: String,
    pub email: String,
    pub attachments: Vec<ResolvedAttachment>,
}

#[async_trait]
pub trait FailedRelayStore: Send + Sync {
    async fn record(&self, failure: &FailedRelay) -> Result<(), FailureStoreError>;

    async fn list(&self) -> Result<Vec<FailedRelay>, FailureStoreError>;

    /// Returns whether a record was removed
    async fn remove(&self, id: Uuid) -> Result<bool, FailureStoreError>;
}

/// Append-only JSON lines file.
///
/// Every append and rewrite holds an exclusive lock on a sibling `.lock`
/// file, so stores in different processes can share one log.
pub struct JsonlFailureStore {
    path: PathBuf,
    lock: Mutex<()>,
}

/// Held for the duration of one log access; dropping the file releases it
struct LogLock {
    _file: std::fs::File,
}

impl JsonlFailureStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    async fn lock_log(&self) -> Result<LogLock, FailureStoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let lock_path = self.lock_path();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(std::io::Error::other)??;

        Ok(LogLock { _file: file })
    }

    async fn read_all(&self) -> Result<Vec<FailedRelay>, FailureStoreError> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let file = tokio::fs::File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<FailedRelay>(line.trim()) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Ignoring unreadable line in {}: {}",
                    self.path.display(),
                    e
                ),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl FailedRelayStore for JsonlFailureStore {
    async fn record(&self, failure: &FailedRelay) -> Result<(), FailureStoreError> {
        let _guard = self.lock.lock().await;
        let _log = self.lock_log().await?;

        let mut line = serde_json::to_string(failure)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(
            "Recorded failed relay {} for entry {}",
            failure.id, failure.entry_id
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<FailedRelay>, FailureStoreError> {
        let _guard = self.lock.lock().await;
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }
        let _log = self.lock_log().await?;
        self.read_all().await
    }

    async fn remove(&self, id: Uuid) -> Result<bool, FailureStoreError> {
        let _guard = self.lock.lock().await;
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(false);
        }
        let _log = self.lock_log().await?;

        let records = self.read_all().await?;
        let before = records.len();
        let kept: Vec<FailedRelay> = records.into_iter().filter(|r| r.id != id).collect();
        if kept.len() == before {
            return Ok(false);
        }

        let mut contents = String::new();
        for record in &kept {
            contents.push_str(&serde_json::to_string(record)?);
            contents.push('\n');
        }

        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        Ok(true)
    }
}
