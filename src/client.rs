//! The engine facade: one owner for every component, driven from one task.

use std::future::Future;
use std::path::Path;
use std::time::Duration as StdDuration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::{FileId, FileRecord, FolderId, FolderRecord, ItemRef};
use crate::navigation::NavigationController;
use crate::remote::{Credential, Notification, VaultService};
use crate::selection::{SelectMode, SelectionModel, SelectionState};
use crate::session::{AuthSessionGuard, AuthSnapshot, AuthState, SessionEnd};
use crate::upload::{UploadEvent, UploadHandle, UploadJobTracker, UploadOutcome};
use crate::view::{Collator, FilterSortPipeline, ViewCriteria, ViewOrder};

const UPLOAD_EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub id: FolderId,
    pub name: String,
}

impl From<&FolderRecord> for Breadcrumb {
    fn from(folder: &FolderRecord) -> Self {
        Self {
            id: folder.id.clone(),
            name: folder.name.clone(),
        }
    }
}

/// Everything a folder view renders, re-published on every change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViewSnapshot {
    /// Version of the view order the lists below were built from.
    pub version: u64,
    pub folder: Option<FolderRecord>,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub files: Vec<FileRecord>,
    pub folders: Vec<FolderRecord>,
    pub selection: SelectionState,
    pub can_go_back: bool,
}

pub struct VaultClient<R: VaultService, C: Clock = SystemClock> {
    config: EngineConfig,
    remote: R,
    navigation: NavigationController,
    pipeline: FilterSortPipeline,
    criteria: ViewCriteria,
    selection: SelectionModel,
    order: ViewOrder,
    uploads: UploadJobTracker,
    auth: AuthSessionGuard<C>,
    since_reconcile: StdDuration,
    view_tx: watch::Sender<ViewSnapshot>,
    auth_tx: watch::Sender<AuthSnapshot>,
    upload_tx: broadcast::Sender<UploadEvent>,
}

impl<R: VaultService> VaultClient<R> {
    pub fn new(remote: R, config: EngineConfig) -> Self {
        Self::with_clock(remote, SystemClock, config)
    }
}

impl<R: VaultService, C: Clock> VaultClient<R, C> {
    pub fn with_clock(remote: R, clock: C, config: EngineConfig) -> Self {
        let auth = AuthSessionGuard::new(clock, config.lockout_policy(), config.default_session_secs);
        let (view_tx, _) = watch::channel(ViewSnapshot::default());
        let (auth_tx, _) = watch::channel(auth.snapshot());
        let (upload_tx, _) = broadcast::channel(UPLOAD_EVENT_CAPACITY);

        Self {
            pipeline: FilterSortPipeline::new(Collator::for_locale(&config.locale)),
            config,
            remote,
            navigation: NavigationController::default(),
            criteria: ViewCriteria::default(),
            selection: SelectionModel::default(),
            order: ViewOrder::default(),
            uploads: UploadJobTracker::default(),
            auth,
            since_reconcile: StdDuration::ZERO,
            view_tx,
            auth_tx,
            upload_tx,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn criteria(&self) -> &ViewCriteria {
        &self.criteria
    }

    pub fn current_folder(&self) -> Option<&FolderId> {
        self.navigation.current()
    }

    pub fn view(&self) -> ViewSnapshot {
        self.view_tx.borrow().clone()
    }

    pub fn view_order(&self) -> &ViewOrder {
        &self.order
    }

    pub fn selection(&self) -> &SelectionState {
        self.selection.state()
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<ViewSnapshot> {
        self.view_tx.subscribe()
    }

    pub fn subscribe_auth(&self) -> watch::Receiver<AuthSnapshot> {
        self.auth_tx.subscribe()
    }

    pub fn subscribe_uploads(&self) -> broadcast::Receiver<UploadEvent> {
        self.upload_tx.subscribe()
    }

    pub fn live_uploads(&self) -> usize {
        self.uploads.live_jobs()
    }

    // Navigation

    /// Loads the folder tree and the root folder.
    pub async fn open(&mut self) -> Result<()> {
        self.refresh().await
    }

    pub async fn navigate(&mut self, folder: Option<&FolderId>) -> Result<()> {
        let previous = self.navigation.current().cloned();
        self.navigation.navigate(&self.remote, folder).await?;
        self.after_load(previous);
        Ok(())
    }

    pub async fn refresh(&mut self) -> Result<()> {
        let previous = self.navigation.current().cloned();
        self.navigation.refresh(&self.remote).await?;
        self.after_load(previous);
        Ok(())
    }

    /// Returns `false` when there is nowhere to go back to.
    pub async fn go_back(&mut self) -> Result<bool> {
        let previous = self.navigation.current().cloned();
        if self.navigation.back(&self.remote).await?.is_none() {
            return Ok(false);
        }
        self.after_load(previous);
        Ok(true)
    }

    /// Moves to the parent folder. Returns `false` at the root.
    pub async fn go_up(&mut self) -> Result<bool> {
        let Some(current) = self.navigation.snapshot().folder.as_ref() else {
            return Ok(false);
        };
        let parent = current.parent_id.clone();
        self.navigate(parent.as_ref()).await?;
        Ok(true)
    }

    // View and selection

    pub fn set_criteria(&mut self, criteria: ViewCriteria) {
        self.criteria = criteria;
        self.rebuild_view();
    }

    pub fn select(&mut self, item: ItemRef, mode: SelectMode) {
        self.selection.select(item, mode, &self.order);
        self.publish_view();
    }

    pub fn select_all(&mut self) {
        self.selection.select_all(&self.order);
        self.publish_view();
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.publish_view();
    }

    // Mutations

    pub async fn create_folder(&mut self, name: &str) -> Result<FolderRecord> {
        self.require_auth()?;
        let parent = self.navigation.current().cloned();
        let record = self
            .remote
            .create_folder(name, parent.as_ref())
            .await
            .map_err(|err| EngineError::remote("create-folder", err))?;
        info!(folder = %record.id, name = %record.name, "folder created");
        self.navigation.invalidate(parent.as_ref());
        self.refresh().await?;
        Ok(record)
    }

    pub async fn rename_file(&mut self, file: &FileId, name: &str) -> Result<()> {
        self.require_auth()?;
        self.remote
            .rename_file(file, name)
            .await
            .map_err(|err| EngineError::remote("rename-file", err))?;
        self.reload_current().await
    }

    pub async fn rename_folder(&mut self, folder: &FolderId, name: &str) -> Result<()> {
        self.require_auth()?;
        self.remote
            .rename_folder(folder, name)
            .await
            .map_err(|err| EngineError::remote("rename-folder", err))?;
        self.navigation.invalidate(Some(folder));
        self.refresh().await
    }

    pub async fn set_favorite(&mut self, file: &FileId, favorite: bool) -> Result<()> {
        self.require_auth()?;
        self.remote
            .set_favorite(file, favorite)
            .await
            .map_err(|err| EngineError::remote("set-favorite", err))?;
        self.reload_current().await
    }

    pub async fn delete_files(&mut self, files: &[FileId]) -> Result<()> {
        self.require_auth()?;
        if files.is_empty() {
            return Ok(());
        }
        self.remote
            .delete_files(files)
            .await
            .map_err(|err| EngineError::remote("delete-files", err))?;
        let removed: Vec<ItemRef> = files.iter().cloned().map(ItemRef::File).collect();
        self.selection.forget(&removed);
        info!(count = files.len(), "files deleted");
        self.reload_current().await
    }

    /// Deletes folders one by one. Stops at the first failure, but the view is
    /// refreshed either way so already-deleted folders disappear.
    pub async fn delete_folders(&mut self, folders: &[FolderId]) -> Result<()> {
        self.require_auth()?;
        if folders.is_empty() {
            return Ok(());
        }
        let mut deleted = Vec::with_capacity(folders.len());
        let mut failure = None;
        for folder in folders {
            match self.remote.delete_folder(folder).await {
                Ok(()) => deleted.push(ItemRef::Folder(folder.clone())),
                Err(err) => {
                    warn!(%folder, "folder delete failed: {err}");
                    failure = Some(EngineError::remote("delete-folder", err));
                    break;
                }
            }
        }

        for item in &deleted {
            if let ItemRef::Folder(id) = item {
                self.navigation.invalidate(Some(id));
            }
        }
        self.selection.forget(&deleted);
        info!(count = deleted.len(), "folders deleted");
        self.refresh().await?;
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Deletes every selected file, then every selected folder.
    pub async fn delete_selected(&mut self) -> Result<()> {
        self.require_auth()?;
        let mut files: Vec<FileId> = self.selection.state().files.iter().cloned().collect();
        let mut folders: Vec<FolderId> = self.selection.state().folders.iter().cloned().collect();
        files.sort();
        folders.sort();
        self.delete_files(&files).await?;
        self.delete_folders(&folders).await
    }

    // Uploads

    pub async fn upload(&mut self, source: &Path, target: Option<&FolderId>) -> Result<UploadHandle> {
        self.require_auth()?;
        self.uploads.start(&self.remote, source, target).await
    }

    /// Routes one push notification. A completed upload into the folder on
    /// screen reloads it.
    pub async fn handle_notification(&mut self, notification: Notification) -> Option<UploadEvent> {
        let event = self.uploads.dispatch(&self.remote, notification)?;

        if let UploadEvent::Finished {
            target_folder,
            outcome: UploadOutcome::Completed { .. },
            ..
        } = &event
        {
            let target = target_folder.clone();
            self.navigation.invalidate(target.as_ref());
            if target.as_ref() == self.navigation.current() {
                if let Err(err) = self.reload_current().await {
                    warn!("reload after upload failed: {err}");
                }
            }
        }

        if self.upload_tx.send(event.clone()).is_err() {
            debug!("no upload listeners");
        }
        Some(event)
    }

    // Authentication

    pub async fn authenticate(&mut self, credential: &Credential) -> Result<AuthState> {
        let result = self.auth.authenticate(&self.remote, credential).await;
        self.since_reconcile = StdDuration::ZERO;
        self.publish_auth();
        result
    }

    pub async fn logout(&mut self) {
        self.auth.logout(&self.remote).await;
        self.publish_auth();
    }

    /// Advances the session countdown by `elapsed`. Once `reconcileIntervalSecs`
    /// have passed the countdown is checked against the service.
    pub async fn tick(&mut self, elapsed: StdDuration) -> Option<SessionEnd> {
        let mut ended = self.auth.tick(elapsed);

        if ended.is_none() && self.auth.is_authenticated() {
            self.since_reconcile += elapsed;
            let interval = StdDuration::from_secs(self.config.reconcile_interval_secs);
            if self.since_reconcile >= interval {
                self.since_reconcile = StdDuration::ZERO;
                match self.auth.reconcile(&self.remote).await {
                    Ok(end) => ended = end,
                    Err(err) => warn!("session reconciliation failed: {err}"),
                }
            }
        }

        if let Some(end) = ended {
            info!(reason = ?end, "session ended");
        }
        self.publish_auth();
        ended
    }

    /// Drives ticks and push notifications from a single task until `shutdown`
    /// resolves.
    pub async fn run<F>(&mut self, mut notifications: mpsc::UnboundedReceiver<Notification>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_tick = ticker.tick().await;
        tokio::pin!(shutdown);
        let mut stream_open = true;

        info!("engine loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                now = ticker.tick() => {
                    let elapsed = now.duration_since(last_tick);
                    last_tick = now;
                    self.tick(elapsed).await;
                }
                received = notifications.recv(), if stream_open => match received {
                    Some(notification) => {
                        self.handle_notification(notification).await;
                    }
                    None => {
                        debug!("notification stream closed");
                        stream_open = false;
                    }
                },
            }
        }
        info!("engine loop stopped");
    }

    fn require_auth(&self) -> Result<()> {
        if self.auth.is_authenticated() {
            Ok(())
        } else {
            Err(EngineError::NotAuthenticated)
        }
    }

    async fn reload_current(&mut self) -> Result<()> {
        let current = self.navigation.current().cloned();
        self.navigation.invalidate(current.as_ref());
        self.navigate(current.as_ref()).await
    }

    /// Same folder: drop stale selection entries. Different folder: start over.
    fn after_load(&mut self, previous: Option<FolderId>) {
        if self.navigation.current() == previous.as_ref() {
            self.selection.reconcile(self.navigation.snapshot());
        } else {
            self.selection.clear();
        }
        self.rebuild_view();
    }

    fn rebuild_view(&mut self) {
        let snapshot = self.navigation.snapshot();
        let files = self.pipeline.files(&snapshot.files, &self.criteria);
        let folders = self.pipeline.folders(&snapshot.folders, &self.criteria);
        self.order = ViewOrder {
            version: self.order.version + 1,
            files: files.iter().map(|file| file.id.clone()).collect(),
            folders: folders.iter().map(|folder| folder.id.clone()).collect(),
        };

        let view = ViewSnapshot {
            version: self.order.version,
            folder: snapshot.folder.clone(),
            breadcrumbs: self.breadcrumbs(),
            files,
            folders,
            selection: self.selection.state().clone(),
            can_go_back: self.navigation.can_go_back(),
        };
        self.view_tx.send_replace(view);
    }

    fn publish_view(&self) {
        let selection = self.selection.state().clone();
        self.view_tx.send_modify(|view| view.selection = selection);
    }

    fn publish_auth(&self) {
        self.auth_tx.send_replace(self.auth.snapshot());
    }

    fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        let Some(current) = self.navigation.snapshot().folder.as_ref() else {
            return Vec::new();
        };
        let chain = self.navigation.tree().ancestors(&current.id);
        if chain.is_empty() {
            return vec![Breadcrumb::from(current)];
        }
        chain.into_iter().map(Breadcrumb::from).collect()
    }
}
