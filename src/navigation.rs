//! Current-folder ownership and loading of the raw collections.

use std::collections::HashMap;

use futures_util::future::{try_join, try_join3};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::model::{CollectionsSnapshot, FolderId, FolderTree};
use crate::remote::VaultService;

const HISTORY_MAX: usize = 50;

/// Sole writer of the raw collections and of the current folder.
#[derive(Debug, Default)]
pub struct NavigationController {
    current: Option<FolderId>,
    snapshot: CollectionsSnapshot,
    tree: FolderTree,
    cache: HashMap<Option<FolderId>, CollectionsSnapshot>,
    history: Vec<Option<FolderId>>,
    loaded: bool,
}

impl NavigationController {
    pub fn current(&self) -> Option<&FolderId> {
        self.current.as_ref()
    }

    pub fn snapshot(&self) -> &CollectionsSnapshot {
        &self.snapshot
    }

    pub fn tree(&self) -> &FolderTree {
        &self.tree
    }

    pub fn can_go_back(&self) -> bool {
        !self.history.is_empty()
    }

    /// Loads `folder` (root when `None`) and makes it current. On failure nothing
    /// changes.
    pub async fn navigate<R: VaultService>(
        &mut self,
        remote: &R,
        folder: Option<&FolderId>,
    ) -> Result<&CollectionsSnapshot> {
        let snapshot = fetch(remote, folder).await.inspect_err(|err| {
            warn!(folder = ?folder, "navigation failed: {err}");
        })?;
        self.enter(folder.cloned(), snapshot);
        Ok(&self.snapshot)
    }

    /// Returns to the previously viewed folder, reusing its cached listing when
    /// no mutation has invalidated it.
    pub async fn back<R: VaultService>(&mut self, remote: &R) -> Result<Option<&CollectionsSnapshot>> {
        let Some(target) = self.history.last().cloned() else {
            return Ok(None);
        };

        let snapshot = match self.cache.get(&target) {
            Some(cached) => {
                debug!(folder = ?target, "back navigation served from cache");
                cached.clone()
            }
            None => fetch(remote, target.as_ref()).await?,
        };

        self.history.pop();
        self.store_current_in_cache();
        self.current = target;
        self.snapshot = snapshot;
        Ok(Some(&self.snapshot))
    }

    /// Re-reads the folder tree and the current folder. When the current folder
    /// disappeared, falls back to its last known parent, then to the root.
    pub async fn refresh<R: VaultService>(&mut self, remote: &R) -> Result<&CollectionsSnapshot> {
        let records = remote
            .get_folder_tree()
            .await
            .map_err(|err| EngineError::remote("get-folder-tree", err))?;
        let tree = FolderTree::build(records)?;

        let target = match &self.current {
            None => None,
            Some(id) if tree.contains(id) => Some(id.clone()),
            Some(id) => {
                let parent = self
                    .snapshot
                    .folder
                    .as_ref()
                    .and_then(|folder| folder.parent_id.clone())
                    .filter(|parent| tree.contains(parent));
                info!(folder = %id, fallback = ?parent, "current folder vanished during refresh");
                parent
            }
        };

        let snapshot = fetch(remote, target.as_ref()).await?;
        self.tree = tree;
        self.cache.clear();
        self.current = target;
        self.snapshot = snapshot;
        self.loaded = true;
        let tree = &self.tree;
        self.history.retain(|entry| entry.as_ref().map_or(true, |id| tree.contains(id)));
        Ok(&self.snapshot)
    }

    /// Forgets the cached listing of a folder touched by a mutation.
    pub fn invalidate(&mut self, folder: Option<&FolderId>) {
        if self.cache.remove(&folder.cloned()).is_some() {
            debug!(folder = ?folder, "invalidated cached listing");
        }
    }

    pub fn is_cached(&self, folder: Option<&FolderId>) -> bool {
        self.cache.contains_key(&folder.cloned())
    }

    fn enter(&mut self, folder: Option<FolderId>, snapshot: CollectionsSnapshot) {
        if folder != self.current {
            self.store_current_in_cache();
            self.history.push(self.current.take());
            if self.history.len() > HISTORY_MAX {
                self.history.remove(0);
            }
        }
        self.current = folder;
        self.snapshot = snapshot;
        self.loaded = true;
        debug!(
            folder = ?self.current,
            files = self.snapshot.files.len(),
            folders = self.snapshot.folders.len(),
            "collections loaded"
        );
    }

    fn store_current_in_cache(&mut self) {
        if self.loaded {
            self.cache.insert(self.current.clone(), self.snapshot.clone());
        }
    }
}

async fn fetch<R: VaultService>(remote: &R, folder: Option<&FolderId>) -> Result<CollectionsSnapshot> {
    let files = async {
        remote
            .list_files(folder)
            .await
            .map_err(|err| EngineError::remote("list-files", err))
    };
    let folders = async {
        remote
            .list_subfolders(folder)
            .await
            .map_err(|err| EngineError::remote("list-subfolders", err))
    };

    match folder {
        None => {
            let (files, folders) = try_join(files, folders).await?;
            Ok(CollectionsSnapshot {
                folder: None,
                files,
                folders,
            })
        }
        Some(id) => {
            let meta = async {
                remote
                    .get_folder(id)
                    .await
                    .map_err(|err| EngineError::remote("get-folder", err))
            };
            let (files, folders, meta) = try_join3(files, folders, meta).await?;
            Ok(CollectionsSnapshot {
                folder: Some(meta),
                files,
                folders,
            })
        }
    }
}
