//! Boundary to the vault service: request/response commands plus token-scoped
//! push notifications.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::model::{FileId, FileRecord, FolderId, FolderRecord, JobToken};

/// Notification channels a job can be subscribed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    Progress,
    Complete,
    Error,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Progress, Channel::Complete, Channel::Error];

    pub fn event_name(self) -> &'static str {
        match self {
            Self::Progress => "upload:progress",
            Self::Complete => "upload:complete",
            Self::Error => "upload:error",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Push notification emitted by the service for a running job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    Progress {
        token: JobToken,
        fraction: f64,
        bytes_processed: u64,
        total_bytes: u64,
    },
    #[serde(rename_all = "camelCase")]
    Complete { token: JobToken, file_id: FileId },
    Error { token: JobToken, reason: String },
}

impl Notification {
    pub fn token(&self) -> &JobToken {
        match self {
            Self::Progress { token, .. } | Self::Complete { token, .. } | Self::Error { token, .. } => {
                token
            }
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            Self::Progress { .. } => Channel::Progress,
            Self::Complete { .. } => Channel::Complete,
            Self::Error { .. } => Channel::Error,
        }
    }
}

/// Secret presented to unlock the vault.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Pin(String),
    RecoveryKey(String),
}

impl Credential {
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Pin(secret) | Self::RecoveryKey(secret) => secret.trim().is_empty(),
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pin(_) => f.write_str("Pin(..)"),
            Self::RecoveryKey(_) => f.write_str("RecoveryKey(..)"),
        }
    }
}

/// Commands the engine issues against the vault service.
///
/// Every async method is a suspension point of the engine; `unsubscribe` is
/// fire-and-forget so teardown can never be skipped by a failing call.
#[allow(async_fn_in_trait)]
pub trait VaultService {
    async fn list_files(&self, folder: Option<&FolderId>) -> Result<Vec<FileRecord>, RemoteError>;

    async fn list_subfolders(
        &self,
        parent: Option<&FolderId>,
    ) -> Result<Vec<FolderRecord>, RemoteError>;

    async fn get_folder(&self, folder: &FolderId) -> Result<FolderRecord, RemoteError>;

    async fn get_folder_tree(&self) -> Result<Vec<FolderRecord>, RemoteError>;

    async fn create_folder(
        &self,
        name: &str,
        parent: Option<&FolderId>,
    ) -> Result<FolderRecord, RemoteError>;

    async fn rename_file(&self, file: &FileId, name: &str) -> Result<(), RemoteError>;

    async fn rename_folder(&self, folder: &FolderId, name: &str) -> Result<(), RemoteError>;

    async fn delete_files(&self, files: &[FileId]) -> Result<(), RemoteError>;

    async fn delete_folder(&self, folder: &FolderId) -> Result<(), RemoteError>;

    async fn set_favorite(&self, file: &FileId, favorite: bool) -> Result<(), RemoteError>;

    async fn start_upload(
        &self,
        source: &Path,
        folder: Option<&FolderId>,
    ) -> Result<JobToken, RemoteError>;

    async fn subscribe(
        &self,
        channel: Channel,
        token: &JobToken,
    ) -> Result<SubscriptionId, RemoteError>;

    fn unsubscribe(&self, subscription: SubscriptionId);

    async fn authenticate(&self, credential: &Credential) -> Result<bool, RemoteError>;

    async fn remaining_session(&self) -> Result<u64, RemoteError>;

    async fn logout(&self) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_use_tagged_camel_case_payloads() {
        let raw = r#"{"event":"progress","token":"t-1","fraction":0.5,"bytesProcessed":5,"totalBytes":10}"#;
        let parsed: Notification = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.token(), &JobToken::new("t-1"));
        assert_eq!(parsed.channel(), Channel::Progress);

        let complete = Notification::Complete {
            token: JobToken::new("t-2"),
            file_id: FileId::new("f-9"),
        };
        let json = serde_json::to_value(&complete).unwrap();
        assert_eq!(json["event"], "complete");
        assert_eq!(json["fileId"], "f-9");
    }

    #[test]
    fn credential_debug_hides_secret() {
        let pin = Credential::Pin("4321".into());
        assert_eq!(format!("{pin:?}"), "Pin(..)");
        assert!(Credential::RecoveryKey("  ".into()).is_blank());
    }
}
