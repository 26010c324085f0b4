//! Cleanup Queue
//!
//! Deletion requests go through a bounded channel to a single consumer task,
//! so submitting a cleanup never ties up an execution resource per request.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::synthesizer::{ArtifactRef, ConversionState, GeneratedDocument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupTask {
    RemoveArtifact(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub missing: usize,
    pub failed: usize,
}

pub struct CleanupQueue {
    tx: mpsc::Sender<CleanupTask>,
    worker: JoinHandle<CleanupReport>,
}

impl CleanupQueue {
    /// Starts the consumer on the current runtime.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(consume(rx));
        Self { tx, worker }
    }

    /// Waits for queue space when the queue is full.
    pub async fn enqueue(&self, task: CleanupTask) -> EngineResult<()> {
        self.tx
            .send(task)
            .await
            .map_err(|_| EngineError::Internal("cleanup worker stopped".into()))
    }

    /// Queues removal of every stored artifact the document references.
    pub async fn enqueue_document(&self, document: &GeneratedDocument) -> EngineResult<()> {
        if let Some(path) = document.artifact.path() {
            self.enqueue(CleanupTask::RemoveArtifact(path.to_path_buf())).await?;
        }
        if let ConversionState::Converted {
            artifact: ArtifactRef::Location { path },
            ..
        } = &document.conversion
        {
            self.enqueue(CleanupTask::RemoveArtifact(path.clone())).await?;
        }
        Ok(())
    }

    /// Drains everything already queued, then stops the worker.
    pub async fn shutdown(self) -> EngineResult<CleanupReport> {
        drop(self.tx);
        self.worker
            .await
            .map_err(|e| EngineError::Internal(format!("cleanup worker failed: {}", e)))
    }
}

async fn consume(mut rx: mpsc::Receiver<CleanupTask>) -> CleanupReport {
    let mut report = CleanupReport::default();
    while let Some(task) = rx.recv().await {
        match task {
            CleanupTask::RemoveArtifact(path) => match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "removed artifact");
                    report.removed += 1;
                }
                Err(e) if e.kind() == IoErrorKind::NotFound => report.missing += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not remove artifact");
                    report.failed += 1;
                }
            },
        }
    }
    report
}
