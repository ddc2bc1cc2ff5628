//! Correlates started uploads with their token-scoped notifications.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::model::{FileId, FolderId, JobToken};
use crate::remote::{Channel, Notification, SubscriptionId, VaultService};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub fraction: f64,
    pub bytes_processed: u64,
    pub total_bytes: u64,
    pub percentage: u8,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum UploadOutcome {
    #[serde(rename_all = "camelCase")]
    Completed { file_id: FileId },
    Failed { reason: String },
}

impl UploadOutcome {
    pub fn into_result(self) -> Result<FileId> {
        match self {
            Self::Completed { file_id } => Ok(file_id),
            Self::Failed { reason } => Err(EngineError::JobFailure(reason)),
        }
    }
}

/// Change to a live job, for toast-style consumers.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum UploadEvent {
    Progress {
        token: JobToken,
        progress: UploadProgress,
    },
    #[serde(rename_all = "camelCase")]
    Finished {
        token: JobToken,
        target_folder: Option<FolderId>,
        outcome: UploadOutcome,
    },
}

/// Caller-side view of one upload. Dropping it only drops interest in the
/// result; the job itself still runs to completion and releases its
/// subscriptions.
#[derive(Debug)]
pub struct UploadHandle {
    token: JobToken,
    progress: watch::Receiver<UploadProgress>,
    outcome: oneshot::Receiver<UploadOutcome>,
}

impl UploadHandle {
    pub fn token(&self) -> &JobToken {
        &self.token
    }

    pub fn progress(&self) -> UploadProgress {
        self.progress.borrow().clone()
    }

    pub fn watch_progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.clone()
    }

    /// Waits for the single terminal outcome of this job.
    pub async fn outcome(self) -> UploadOutcome {
        self.outcome.await.unwrap_or_else(|_| UploadOutcome::Failed {
            reason: "Upload tracker shut down before the job finished".to_string(),
        })
    }
}

struct LiveJob {
    source: PathBuf,
    target: Option<FolderId>,
    started_at: DateTime<Utc>,
    subscriptions: Vec<SubscriptionId>,
    progress: UploadProgress,
    progress_tx: watch::Sender<UploadProgress>,
    outcome_tx: oneshot::Sender<UploadOutcome>,
}

/// Live uploads keyed by job token. Entries exist from a successful start until
/// the first terminal notification, and are never reused.
#[derive(Default)]
pub struct UploadJobTracker {
    jobs: HashMap<JobToken, LiveJob>,
}

impl UploadJobTracker {
    pub fn live_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_live(&self, token: &JobToken) -> bool {
        self.jobs.contains_key(token)
    }

    pub fn progress_of(&self, token: &JobToken) -> Option<&UploadProgress> {
        self.jobs.get(token).map(|job| &job.progress)
    }

    /// Starts the remote job and subscribes to its three channels. A failure at
    /// any step leaves no live entry and no subscription behind.
    pub async fn start<R: VaultService>(
        &mut self,
        remote: &R,
        source: &Path,
        target: Option<&FolderId>,
    ) -> Result<UploadHandle> {
        let token = remote
            .start_upload(source, target)
            .await
            .map_err(|err| EngineError::remote("start-upload", err))?;

        let mut subscriptions = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            match remote.subscribe(channel, &token).await {
                Ok(id) => subscriptions.push(id),
                Err(err) => {
                    for id in subscriptions {
                        remote.unsubscribe(id);
                    }
                    warn!(%token, "subscribing to {} failed: {err}", channel.event_name());
                    return Err(EngineError::remote("subscribe", err));
                }
            }
        }

        let (progress_tx, progress) = watch::channel(UploadProgress::default());
        let (outcome_tx, outcome) = oneshot::channel();
        self.jobs.insert(
            token.clone(),
            LiveJob {
                source: source.to_path_buf(),
                target: target.cloned(),
                started_at: Utc::now(),
                subscriptions,
                progress: UploadProgress::default(),
                progress_tx,
                outcome_tx,
            },
        );
        info!(%token, source = %source.display(), "upload started");

        Ok(UploadHandle {
            token,
            progress,
            outcome,
        })
    }

    /// Routes one notification. Unknown tokens, including jobs that already
    /// resolved, are dropped without effect.
    pub fn dispatch<R: VaultService>(
        &mut self,
        remote: &R,
        notification: Notification,
    ) -> Option<UploadEvent> {
        let token = notification.token().clone();
        let Some(job) = self.jobs.get_mut(&token) else {
            debug!(%token, channel = notification.channel().event_name(), "dropped notification for unknown job");
            return None;
        };

        let outcome = match notification {
            Notification::Progress {
                fraction,
                bytes_processed,
                total_bytes,
                ..
            } => {
                let fraction = fraction.clamp(0.0, 1.0).max(job.progress.fraction);
                job.progress = UploadProgress {
                    fraction,
                    bytes_processed: bytes_processed.max(job.progress.bytes_processed),
                    total_bytes,
                    percentage: calculate_percentage(fraction),
                };
                job.progress_tx.send_replace(job.progress.clone());
                return Some(UploadEvent::Progress {
                    token,
                    progress: job.progress.clone(),
                });
            }
            Notification::Complete { file_id, .. } => UploadOutcome::Completed { file_id },
            Notification::Error { reason, .. } => UploadOutcome::Failed { reason },
        };

        let job = self.jobs.remove(&token)?;
        Some(finish_job(remote, token, job, outcome))
    }
}

fn finish_job<R: VaultService>(
    remote: &R,
    token: JobToken,
    mut job: LiveJob,
    outcome: UploadOutcome,
) -> UploadEvent {
    for id in job.subscriptions.drain(..) {
        remote.unsubscribe(id);
    }

    if let UploadOutcome::Completed { .. } = outcome {
        job.progress.fraction = 1.0;
        job.progress.percentage = 100;
        if job.progress.total_bytes > 0 {
            job.progress.bytes_processed = job.progress.total_bytes;
        }
        job.progress_tx.send_replace(job.progress.clone());
    }

    let elapsed = Utc::now() - job.started_at;
    match &outcome {
        UploadOutcome::Completed { file_id } => info!(
            %token,
            %file_id,
            source = %job.source.display(),
            elapsed_ms = elapsed.num_milliseconds(),
            "upload completed"
        ),
        UploadOutcome::Failed { reason } => warn!(
            %token,
            source = %job.source.display(),
            "upload failed: {reason}"
        ),
    }

    if job.outcome_tx.send(outcome.clone()).is_err() {
        debug!(%token, "upload outcome discarded, caller stopped listening");
    }

    UploadEvent::Finished {
        token,
        target_folder: job.target,
        outcome,
    }
}

fn calculate_percentage(fraction: f64) -> u8 {
    (fraction * 100.0).round().clamp(0.0, 100.0) as u8
}
