//! Records mirrored from the vault service and the folder tree built from them.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(FileId);
opaque_id!(FolderId);
opaque_id!(JobToken);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    File,
    Folder,
}

/// A selectable entry in the current view.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemRef {
    File(FileId),
    Folder(FolderId),
}

impl ItemRef {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::File(_) => ItemKind::File,
            Self::Folder(_) => ItemKind::Folder,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionInfo {
    pub compressed_size: u64,
    pub ratio: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    /// Name shown in the browser.
    pub name: String,
    /// Name the file had when it was imported, if it differs.
    #[serde(default)]
    pub original_name: Option<String>,
    pub size: u64,
    #[serde(default)]
    pub extension: String,
    pub mime_type: String,
    pub folder_id: Option<FolderId>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    #[serde(default)]
    pub compression: Option<CompressionInfo>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: FolderId,
    pub name: String,
    pub parent_id: Option<FolderId>,
    pub path: String,
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub children: Vec<FolderId>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Raw collections for one folder, exactly as the service returned them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CollectionsSnapshot {
    /// Metadata of the viewed folder; `None` at the root.
    pub folder: Option<FolderRecord>,
    pub files: Vec<FileRecord>,
    pub folders: Vec<FolderRecord>,
}

impl CollectionsSnapshot {
    pub fn folder_id(&self) -> Option<&FolderId> {
        self.folder.as_ref().map(|folder| &folder.id)
    }

    pub fn contains_file(&self, id: &FileId) -> bool {
        self.files.iter().any(|file| &file.id == id)
    }

    pub fn contains_folder(&self, id: &FolderId) -> bool {
        self.folders.iter().any(|folder| &folder.id == id)
    }
}

/// Validated folder hierarchy used by tree-style presentation and breadcrumbs.
#[derive(Clone, Debug, Default)]
pub struct FolderTree {
    nodes: HashMap<FolderId, FolderRecord>,
    roots: Vec<FolderId>,
}

impl FolderTree {
    /// Builds the tree, rejecting duplicate ids, dangling parents, mismatched
    /// parent/child links and cycles.
    pub fn build(records: Vec<FolderRecord>) -> Result<Self> {
        let mut nodes = HashMap::with_capacity(records.len());
        let mut order = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id.clone();
            if nodes.insert(id.clone(), record).is_some() {
                return Err(EngineError::InvalidTree(format!("duplicate folder {id}")));
            }
            order.push(id);
        }

        let mut roots = Vec::new();
        for id in &order {
            let node = &nodes[id];
            match &node.parent_id {
                None => roots.push(id.clone()),
                Some(parent_id) => {
                    let parent = nodes.get(parent_id).ok_or_else(|| {
                        EngineError::InvalidTree(format!("{id} has unknown parent {parent_id}"))
                    })?;
                    if !parent.children.contains(id) {
                        return Err(EngineError::InvalidTree(format!(
                            "{parent_id} does not list child {id}"
                        )));
                    }
                }
            }
            for child in &node.children {
                let linked = nodes
                    .get(child)
                    .is_some_and(|record| record.parent_id.as_ref() == Some(id));
                if !linked {
                    return Err(EngineError::InvalidTree(format!(
                        "{id} lists {child} which does not point back"
                    )));
                }
            }
        }

        let tree = Self { nodes, roots };
        for id in &order {
            tree.check_acyclic(id)?;
        }
        Ok(tree)
    }

    fn check_acyclic(&self, start: &FolderId) -> Result<()> {
        let mut seen = HashSet::new();
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            if !seen.insert(id) {
                return Err(EngineError::InvalidTree(format!("cycle through {start}")));
            }
            cursor = self.nodes.get(id).and_then(|node| node.parent_id.as_ref());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &FolderId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &FolderId) -> Option<&FolderRecord> {
        self.nodes.get(id)
    }

    pub fn roots(&self) -> impl Iterator<Item = &FolderRecord> {
        self.roots.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn children(&self, id: &FolderId) -> impl Iterator<Item = &FolderRecord> {
        self.nodes
            .get(id)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
            .iter()
            .filter_map(|child| self.nodes.get(child))
    }

    /// Root-first chain ending at `id`; empty when the folder is unknown.
    pub fn ancestors(&self, id: &FolderId) -> Vec<&FolderRecord> {
        let mut chain = Vec::new();
        let mut cursor = self.nodes.get(id);
        while let Some(node) = cursor {
            chain.push(node);
            cursor = node.parent_id.as_ref().and_then(|parent| self.nodes.get(parent));
        }
        chain.reverse();
        chain
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
    }

    pub fn file(id: &str, name: &str, size: u64, mime: &str, day: u32) -> FileRecord {
        FileRecord {
            id: FileId::new(id),
            name: name.to_string(),
            original_name: None,
            size,
            extension: name.rsplit_once('.').map(|(_, ext)| ext.to_string()).unwrap_or_default(),
            mime_type: mime.to_string(),
            folder_id: None,
            created_at: at(day),
            modified_at: at(day),
            compression: None,
            favorite: false,
            deleted: false,
        }
    }

    pub fn folder(id: &str, parent: Option<&str>, children: &[&str]) -> FolderRecord {
        FolderRecord {
            id: FolderId::new(id),
            name: id.to_string(),
            parent_id: parent.map(FolderId::new),
            path: format!("/{id}"),
            file_count: 0,
            total_size: 0,
            children: children.iter().map(|child| FolderId::new(*child)).collect(),
            created_at: at(1),
            modified_at: at(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::folder;
    use super::*;

    #[test]
    fn builds_tree_and_breadcrumbs() {
        let tree = FolderTree::build(vec![
            folder("docs", None, &["taxes"]),
            folder("taxes", Some("docs"), &["2023"]),
            folder("2023", Some("taxes"), &[]),
            folder("photos", None, &[]),
        ])
        .unwrap();

        assert_eq!(tree.len(), 4);
        assert_eq!(tree.roots().count(), 2);
        let chain: Vec<&str> = tree
            .ancestors(&FolderId::new("2023"))
            .iter()
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(chain, vec!["docs", "taxes", "2023"]);
        assert_eq!(tree.children(&FolderId::new("docs")).count(), 1);
    }

    #[test]
    fn rejects_unknown_parent() {
        let err = FolderTree::build(vec![folder("orphan", Some("gone"), &[])]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTree(_)));
    }

    #[test]
    fn rejects_child_link_that_does_not_point_back() {
        let err = FolderTree::build(vec![
            folder("a", None, &["b"]),
            folder("b", None, &[]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("does not point back"));
    }

    #[test]
    fn rejects_cycles() {
        let err = FolderTree::build(vec![
            folder("a", Some("b"), &["b"]),
            folder("b", Some("a"), &["a"]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }
}
