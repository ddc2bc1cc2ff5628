//! In-process vault service. Backs the demo binary and the test suites.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::RemoteError;
use crate::model::{FileId, FileRecord, FolderId, FolderRecord, JobToken};
use crate::remote::{Channel, Credential, Notification, SubscriptionId, VaultService};

const PBKDF2_ITERATIONS: u32 = 2_048;
const KEY_BYTES: usize = 32;
const SALT_BYTES: usize = 16;
const RECOVERY_KEY_LENGTH: usize = 24;

struct SecretHash {
    salt: [u8; SALT_BYTES],
    key: [u8; KEY_BYTES],
}

impl SecretHash {
    fn new(secret: &str) -> Self {
        let salt = random_bytes::<SALT_BYTES>();
        Self {
            key: derive_key(secret, &salt),
            salt,
        }
    }

    fn matches(&self, secret: &str) -> bool {
        derive_key(secret, &self.salt) == self.key
    }
}

struct PendingUpload {
    source: PathBuf,
    folder: Option<FolderId>,
    bytes_total: u64,
}

#[derive(Default)]
struct MemoryState {
    folders: Vec<FolderRecord>,
    files: Vec<FileRecord>,
    pin: Option<SecretHash>,
    recovery: Option<SecretHash>,
    session_ttl: u64,
    session_remaining: Option<u64>,
    uploads: HashMap<JobToken, PendingUpload>,
    subscriptions: HashMap<SubscriptionId, (Channel, JobToken)>,
    next_subscription: u64,
    failures: HashMap<String, String>,
    authenticate_calls: usize,
}

impl MemoryState {
    fn check(&self, command: &str) -> Result<(), RemoteError> {
        match self.failures.get(command) {
            Some(reason) => Err(RemoteError::new(reason.clone())),
            None => Ok(()),
        }
    }

    fn folder(&self, id: &FolderId) -> Result<&FolderRecord, RemoteError> {
        self.folders
            .iter()
            .find(|folder| &folder.id == id)
            .ok_or_else(|| RemoteError::new(format!("Folder not found: {id}")))
    }

    fn ensure_parent(&self, parent: Option<&FolderId>) -> Result<(), RemoteError> {
        if let Some(parent) = parent {
            self.folder(parent)?;
        }
        Ok(())
    }

    fn insert_folder(&mut self, name: &str, parent: Option<&FolderId>) -> Result<FolderRecord, RemoteError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RemoteError::new("Folder name cannot be empty"));
        }
        self.ensure_parent(parent)?;
        let sibling_taken = self
            .folders
            .iter()
            .any(|folder| folder.parent_id.as_ref() == parent && folder.name == name);
        if sibling_taken {
            return Err(RemoteError::new(format!("Folder already exists: {name}")));
        }

        let path = match parent {
            Some(parent) => format!("{}/{name}", self.folder(parent)?.path),
            None => format!("/{name}"),
        };
        let now = Utc::now();
        let record = FolderRecord {
            id: FolderId::new(Uuid::new_v4().to_string()),
            name: name.to_string(),
            parent_id: parent.cloned(),
            path,
            file_count: 0,
            total_size: 0,
            children: Vec::new(),
            created_at: now,
            modified_at: now,
        };
        if let Some(parent) = parent {
            if let Some(parent) = self.folders.iter_mut().find(|folder| &folder.id == parent) {
                parent.children.push(record.id.clone());
                parent.modified_at = now;
            }
        }
        self.folders.push(record.clone());
        Ok(record)
    }

    fn insert_file(
        &mut self,
        name: &str,
        size: u64,
        mime_type: &str,
        folder: Option<&FolderId>,
    ) -> Result<FileId, RemoteError> {
        self.ensure_parent(folder)?;
        let now = Utc::now();
        let id = FileId::new(Uuid::new_v4().to_string());
        self.files.push(FileRecord {
            id: id.clone(),
            name: name.to_string(),
            original_name: None,
            size,
            extension: extension_of(name),
            mime_type: mime_type.to_string(),
            folder_id: folder.cloned(),
            created_at: now,
            modified_at: now,
            compression: None,
            favorite: false,
            deleted: false,
        });
        self.recount();
        Ok(id)
    }

    fn remove_folder(&mut self, id: &FolderId) -> Result<(), RemoteError> {
        let parent = self.folder(id)?.parent_id.clone();
        let mut doomed = vec![id.clone()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let current = doomed[cursor].clone();
            doomed.extend(
                self.folders
                    .iter()
                    .filter(|folder| folder.parent_id.as_ref() == Some(&current))
                    .map(|folder| folder.id.clone()),
            );
            cursor += 1;
        }

        self.folders.retain(|folder| !doomed.contains(&folder.id));
        self.files.retain(|file| match &file.folder_id {
            Some(folder) => !doomed.contains(folder),
            None => true,
        });
        if let Some(parent) = parent {
            if let Some(parent) = self.folders.iter_mut().find(|folder| folder.id == parent) {
                parent.children.retain(|child| child != id);
            }
        }
        self.recount();
        Ok(())
    }

    fn rewrite_paths(&mut self, id: &FolderId) {
        let Some(base) = self
            .folders
            .iter()
            .find(|folder| &folder.id == id)
            .map(|folder| folder.path.clone())
        else {
            return;
        };
        let children: Vec<FolderId> = self
            .folders
            .iter()
            .filter(|folder| folder.parent_id.as_ref() == Some(id))
            .map(|folder| folder.id.clone())
            .collect();
        for child in children {
            if let Some(folder) = self.folders.iter_mut().find(|folder| folder.id == child) {
                folder.path = format!("{base}/{}", folder.name);
            }
            self.rewrite_paths(&child);
        }
    }

    fn recount(&mut self) {
        for folder in &mut self.folders {
            let direct = self
                .files
                .iter()
                .filter(|file| file.folder_id.as_ref() == Some(&folder.id));
            folder.file_count = 0;
            folder.total_size = 0;
            for file in direct {
                folder.file_count += 1;
                folder.total_size += file.size;
            }
        }
    }

    fn subscribed(&self, channel: Channel, token: &JobToken) -> bool {
        self.subscriptions
            .values()
            .any(|(sub_channel, sub_token)| *sub_channel == channel && sub_token == token)
    }
}

/// Vault service kept entirely in memory, with fault injection per command.
pub struct MemoryVault {
    state: Mutex<MemoryState>,
    events: mpsc::UnboundedSender<Notification>,
}

impl MemoryVault {
    /// Creates an empty vault and the receiving end of its notification stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let vault = Self {
            state: Mutex::new(MemoryState {
                session_ttl: 900,
                ..MemoryState::default()
            }),
            events,
        };
        (vault, receiver)
    }

    pub fn seed_folder(&self, name: &str, parent: Option<&FolderId>) -> Result<FolderId, RemoteError> {
        Ok(lock(&self.state)?.insert_folder(name, parent)?.id)
    }

    pub fn seed_file(
        &self,
        name: &str,
        size: u64,
        mime_type: &str,
        folder: Option<&FolderId>,
    ) -> Result<FileId, RemoteError> {
        lock(&self.state)?.insert_file(name, size, mime_type, folder)
    }

    pub fn set_pin(&self, pin: &str) -> Result<(), RemoteError> {
        lock(&self.state)?.pin = Some(SecretHash::new(pin));
        Ok(())
    }

    /// Generates and stores a new recovery key, returning its plain form.
    pub fn issue_recovery_key(&self) -> Result<String, RemoteError> {
        let key = generate_recovery_key();
        lock(&self.state)?.recovery = Some(SecretHash::new(&key));
        Ok(key)
    }

    /// Sets the ttl granted on login; an active session adopts it immediately.
    pub fn set_session_ttl(&self, secs: u64) {
        if let Ok(mut state) = lock(&self.state) {
            state.session_ttl = secs;
            if state.session_remaining.is_some() {
                state.session_remaining = Some(secs);
            }
        }
    }

    /// Makes every later call of `command` fail with `reason`.
    pub fn fail_command(&self, command: &str, reason: &str) {
        if let Ok(mut state) = lock(&self.state) {
            state.failures.insert(command.to_string(), reason.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut state) = lock(&self.state) {
            state.failures.clear();
        }
    }

    pub fn authenticate_calls(&self) -> usize {
        lock(&self.state).map(|state| state.authenticate_calls).unwrap_or(0)
    }

    pub fn subscription_count(&self, token: &JobToken) -> usize {
        lock(&self.state)
            .map(|state| {
                state
                    .subscriptions
                    .values()
                    .filter(|(_, sub_token)| sub_token == token)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn total_subscriptions(&self) -> usize {
        lock(&self.state).map(|state| state.subscriptions.len()).unwrap_or(0)
    }

    /// Reports transfer progress for a pending upload. Returns whether anyone
    /// was subscribed to hear it.
    pub fn report_progress(&self, token: &JobToken, bytes_processed: u64) -> Result<bool, RemoteError> {
        let state = lock(&self.state)?;
        let upload = state
            .uploads
            .get(token)
            .ok_or_else(|| RemoteError::new(format!("Unknown job: {token}")))?;
        let total_bytes = upload.bytes_total;
        let fraction = if total_bytes == 0 {
            0.0
        } else {
            (bytes_processed as f64 / total_bytes as f64).min(1.0)
        };
        let delivered = state.subscribed(Channel::Progress, token);
        drop(state);
        if delivered {
            self.push(Notification::Progress {
                token: token.clone(),
                fraction,
                bytes_processed,
                total_bytes,
            });
        }
        Ok(delivered)
    }

    /// Stores the uploaded file and announces completion.
    pub fn finish_upload(&self, token: &JobToken) -> Result<FileId, RemoteError> {
        let mut state = lock(&self.state)?;
        let upload = state
            .uploads
            .remove(token)
            .ok_or_else(|| RemoteError::new(format!("Unknown job: {token}")))?;
        let name = upload
            .source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "untitled".to_string());
        let mime = guess_mime_type(&name);
        let file_id = state.insert_file(&name, upload.bytes_total, mime, upload.folder.as_ref())?;
        let delivered = state.subscribed(Channel::Complete, token);
        drop(state);
        if delivered {
            self.push(Notification::Complete {
                token: token.clone(),
                file_id: file_id.clone(),
            });
        }
        Ok(file_id)
    }

    pub fn abort_upload(&self, token: &JobToken, reason: &str) -> Result<(), RemoteError> {
        let mut state = lock(&self.state)?;
        state
            .uploads
            .remove(token)
            .ok_or_else(|| RemoteError::new(format!("Unknown job: {token}")))?;
        let delivered = state.subscribed(Channel::Error, token);
        drop(state);
        if delivered {
            self.push(Notification::Error {
                token: token.clone(),
                reason: reason.to_string(),
            });
        }
        Ok(())
    }

    /// Sends a notification regardless of subscriptions.
    pub fn push(&self, notification: Notification) {
        if let Err(err) = self.events.send(notification) {
            debug!(token = %err.0.token(), "notification dropped, no receiver");
        }
    }
}

impl VaultService for MemoryVault {
    async fn list_files(&self, folder: Option<&FolderId>) -> Result<Vec<FileRecord>, RemoteError> {
        let state = lock(&self.state)?;
        state.check("list-files")?;
        state.ensure_parent(folder)?;
        Ok(state
            .files
            .iter()
            .filter(|file| file.folder_id.as_ref() == folder)
            .cloned()
            .collect())
    }

    async fn list_subfolders(&self, parent: Option<&FolderId>) -> Result<Vec<FolderRecord>, RemoteError> {
        let state = lock(&self.state)?;
        state.check("list-subfolders")?;
        state.ensure_parent(parent)?;
        Ok(state
            .folders
            .iter()
            .filter(|folder| folder.parent_id.as_ref() == parent)
            .cloned()
            .collect())
    }

    async fn get_folder(&self, folder: &FolderId) -> Result<FolderRecord, RemoteError> {
        let state = lock(&self.state)?;
        state.check("get-folder")?;
        state.folder(folder).cloned()
    }

    async fn get_folder_tree(&self) -> Result<Vec<FolderRecord>, RemoteError> {
        let state = lock(&self.state)?;
        state.check("get-folder-tree")?;
        Ok(state.folders.clone())
    }

    async fn create_folder(&self, name: &str, parent: Option<&FolderId>) -> Result<FolderRecord, RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("create-folder")?;
        state.insert_folder(name, parent)
    }

    async fn rename_file(&self, file: &FileId, name: &str) -> Result<(), RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("rename-file")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RemoteError::new("File name cannot be empty"));
        }
        let record = state
            .files
            .iter_mut()
            .find(|record| &record.id == file)
            .ok_or_else(|| RemoteError::new(format!("File not found: {file}")))?;
        if record.original_name.is_none() {
            record.original_name = Some(record.name.clone());
        }
        record.name = name.to_string();
        record.extension = extension_of(name);
        record.modified_at = Utc::now();
        Ok(())
    }

    async fn rename_folder(&self, folder: &FolderId, name: &str) -> Result<(), RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("rename-folder")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(RemoteError::new("Folder name cannot be empty"));
        }
        let parent_path = match state.folder(folder)?.parent_id.clone() {
            Some(parent) => state.folder(&parent)?.path.clone(),
            None => String::new(),
        };
        if let Some(record) = state.folders.iter_mut().find(|record| &record.id == folder) {
            record.name = name.to_string();
            record.path = format!("{parent_path}/{name}");
            record.modified_at = Utc::now();
        }
        state.rewrite_paths(folder);
        Ok(())
    }

    async fn delete_files(&self, files: &[FileId]) -> Result<(), RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("delete-files")?;
        if let Some(missing) = files.iter().find(|id| !state.files.iter().any(|file| &file.id == *id)) {
            return Err(RemoteError::new(format!("File not found: {missing}")));
        }
        state.files.retain(|file| !files.contains(&file.id));
        state.recount();
        Ok(())
    }

    async fn delete_folder(&self, folder: &FolderId) -> Result<(), RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("delete-folder")?;
        state.remove_folder(folder)
    }

    async fn set_favorite(&self, file: &FileId, favorite: bool) -> Result<(), RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("set-favorite")?;
        let record = state
            .files
            .iter_mut()
            .find(|record| &record.id == file)
            .ok_or_else(|| RemoteError::new(format!("File not found: {file}")))?;
        record.favorite = favorite;
        Ok(())
    }

    async fn start_upload(&self, source: &Path, folder: Option<&FolderId>) -> Result<JobToken, RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("start-upload")?;
        state.ensure_parent(folder)?;
        let bytes_total = fs::metadata(source).map(|meta| meta.len()).unwrap_or(0);
        let token = JobToken::new(Uuid::new_v4().to_string());
        state.uploads.insert(
            token.clone(),
            PendingUpload {
                source: source.to_path_buf(),
                folder: folder.cloned(),
                bytes_total,
            },
        );
        Ok(token)
    }

    async fn subscribe(&self, channel: Channel, token: &JobToken) -> Result<SubscriptionId, RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("subscribe")?;
        state.next_subscription += 1;
        let id = SubscriptionId(state.next_subscription);
        state.subscriptions.insert(id, (channel, token.clone()));
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if let Ok(mut state) = lock(&self.state) {
            state.subscriptions.remove(&subscription);
        }
    }

    async fn authenticate(&self, credential: &Credential) -> Result<bool, RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("authenticate")?;
        state.authenticate_calls += 1;
        let accepted = match credential {
            Credential::Pin(pin) => state.pin.as_ref().is_some_and(|hash| hash.matches(pin)),
            Credential::RecoveryKey(key) => state
                .recovery
                .as_ref()
                .is_some_and(|hash| hash.matches(&key.trim().to_ascii_uppercase())),
        };
        if accepted {
            let ttl = state.session_ttl;
            state.session_remaining = Some(ttl);
        }
        Ok(accepted)
    }

    async fn remaining_session(&self) -> Result<u64, RemoteError> {
        let state = lock(&self.state)?;
        state.check("get-remaining-session")?;
        Ok(state.session_remaining.unwrap_or(0))
    }

    async fn logout(&self) -> Result<(), RemoteError> {
        let mut state = lock(&self.state)?;
        state.check("logout")?;
        state.session_remaining = None;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RemoteError> {
    mutex.lock().map_err(|_| RemoteError::new("State lock poisoned"))
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

fn derive_key(secret: &str, salt: &[u8]) -> [u8; KEY_BYTES] {
    let mut key = [0u8; KEY_BYTES];
    pbkdf2_hmac::<Sha512>(secret.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn generate_recovery_key() -> String {
    const CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let bytes = random_bytes::<RECOVERY_KEY_LENGTH>();
    let mut key = String::with_capacity(RECOVERY_KEY_LENGTH + (RECOVERY_KEY_LENGTH / 4));

    for (idx, byte) in bytes.iter().enumerate() {
        if idx > 0 && idx % 4 == 0 {
            key.push('-');
        }
        key.push(CHARS[(*byte as usize) % CHARS.len()] as char);
    }

    key
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

fn guess_mime_type(name: &str) -> &'static str {
    match extension_of(name).as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "zip" => "application/zip",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn folder_tree_stays_consistent_across_mutations() {
        let (vault, _events) = MemoryVault::new();
        let docs = vault.seed_folder("Docs", None).unwrap();
        let taxes = vault.create_folder("Taxes", Some(&docs)).await.unwrap();
        vault.seed_file("w2.pdf", 10, "application/pdf", Some(&taxes.id)).unwrap();
        assert_eq!(taxes.path, "/Docs/Taxes");

        vault.rename_folder(&docs, "Paperwork").await.unwrap();
        let renamed = vault.get_folder(&taxes.id).await.unwrap();
        assert_eq!(renamed.path, "/Paperwork/Taxes");
        assert_eq!(renamed.file_count, 1);

        let tree = crate::model::FolderTree::build(vault.get_folder_tree().await.unwrap());
        assert!(tree.is_ok());

        vault.delete_folder(&docs).await.unwrap();
        assert!(vault.get_folder_tree().await.unwrap().is_empty());
        assert!(vault.list_files(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_sibling_names_are_rejected() {
        let (vault, _events) = MemoryVault::new();
        vault.create_folder("Photos", None).await.unwrap();
        let err = vault.create_folder("Photos", None).await.unwrap_err();
        assert_eq!(err.to_string(), "Folder already exists: Photos");
    }

    #[tokio::test]
    async fn secrets_are_verified_against_salted_hashes() {
        let (vault, _events) = MemoryVault::new();
        vault.set_pin("1357").unwrap();
        let recovery = vault.issue_recovery_key().unwrap();
        assert_eq!(recovery.len(), RECOVERY_KEY_LENGTH + RECOVERY_KEY_LENGTH / 4 - 1);

        assert!(!vault.authenticate(&Credential::Pin("1358".into())).await.unwrap());
        assert!(vault.authenticate(&Credential::Pin("1357".into())).await.unwrap());
        let lowercase = recovery.to_ascii_lowercase();
        assert!(vault
            .authenticate(&Credential::RecoveryKey(lowercase))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn notifications_only_reach_subscribers() {
        let (vault, mut events) = MemoryVault::new();
        let token = vault.start_upload(Path::new("/nonexistent/a.png"), None).await.unwrap();
        assert!(!vault.report_progress(&token, 0).unwrap());

        vault.subscribe(Channel::Complete, &token).await.unwrap();
        let file_id = vault.finish_upload(&token).unwrap();
        match events.try_recv().unwrap() {
            Notification::Complete { file_id: got, .. } => assert_eq!(got, file_id),
            other => panic!("unexpected notification {other:?}"),
        }
        let files = vault.list_files(None).await.unwrap();
        assert_eq!(files[0].name, "a.png");
        assert_eq!(files[0].mime_type, "image/png");
    }

    #[tokio::test]
    async fn aborted_upload_reports_error_and_stores_nothing() {
        let (vault, mut events) = MemoryVault::new();
        let token = vault.start_upload(Path::new("/nonexistent/b.zip"), None).await.unwrap();
        vault.subscribe(Channel::Error, &token).await.unwrap();

        vault.abort_upload(&token, "disk full").unwrap();
        match events.try_recv().unwrap() {
            Notification::Error { token: got, reason } => {
                assert_eq!(got, token);
                assert_eq!(reason, "disk full");
            }
            other => panic!("unexpected notification {other:?}"),
        }
        assert!(vault.list_files(None).await.unwrap().is_empty());
        assert!(vault.abort_upload(&token, "again").is_err());
    }
}
