//! Multi-selection over the visible item order.

use std::collections::HashSet;

use tracing::debug;

use crate::model::{CollectionsSnapshot, FileId, FolderId, ItemKind, ItemRef};
use crate::view::ViewOrder;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectMode {
    /// Plain click: only this item stays selected.
    Replace,
    /// Ctrl/Cmd click.
    Toggle,
    /// Shift click: extend from the anchor in current view order.
    Range,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectionState {
    pub files: HashSet<FileId>,
    pub folders: HashSet<FolderId>,
    /// Last item picked with replace or toggle.
    pub anchor: Option<ItemRef>,
}

impl SelectionState {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.folders.len()
    }

    pub fn contains(&self, item: &ItemRef) -> bool {
        match item {
            ItemRef::File(id) => self.files.contains(id),
            ItemRef::Folder(id) => self.folders.contains(id),
        }
    }
}

/// Sole writer of [`SelectionState`].
#[derive(Debug, Default)]
pub struct SelectionModel {
    state: SelectionState,
}

impl SelectionModel {
    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn select(&mut self, item: ItemRef, mode: SelectMode, order: &ViewOrder) {
        match mode {
            SelectMode::Replace => self.replace(item),
            SelectMode::Toggle => {
                if !self.remove(&item) {
                    self.insert(item.clone());
                }
                self.state.anchor = Some(item);
            }
            SelectMode::Range => {
                let span = self.range_from_anchor(&item, order);
                match span {
                    Some(items) => {
                        for item in items {
                            self.insert(item);
                        }
                    }
                    // No usable anchor in this view: behave like a plain click.
                    None => self.replace(item),
                }
            }
        }
    }

    fn range_from_anchor(&self, target: &ItemRef, order: &ViewOrder) -> Option<Vec<ItemRef>> {
        let anchor = self.state.anchor.as_ref()?;
        if anchor.kind() != target.kind() {
            return None;
        }
        let from = order.position(anchor)?;
        let to = order.position(target)?;
        Some(order.span(target.kind(), from, to))
    }

    /// Selects every item in the view, keeping the anchor.
    pub fn select_all(&mut self, order: &ViewOrder) {
        for item in order.items() {
            self.insert(item);
        }
    }

    pub fn clear(&mut self) {
        self.state = SelectionState::default();
    }

    /// Drops ids that are no longer part of the loaded collections.
    pub fn reconcile(&mut self, snapshot: &CollectionsSnapshot) {
        let before = self.state.len();
        self.state.files.retain(|id| snapshot.contains_file(id));
        self.state.folders.retain(|id| snapshot.contains_folder(id));
        let anchor_alive = match &self.state.anchor {
            Some(ItemRef::File(id)) => snapshot.contains_file(id),
            Some(ItemRef::Folder(id)) => snapshot.contains_folder(id),
            None => true,
        };
        if !anchor_alive {
            self.state.anchor = None;
        }
        let purged = before - self.state.len();
        if purged > 0 {
            debug!(purged, "dropped stale selection entries");
        }
    }

    /// Forgets items the caller just deleted.
    pub fn forget(&mut self, items: &[ItemRef]) {
        for item in items {
            self.remove(item);
            if self.state.anchor.as_ref() == Some(item) {
                self.state.anchor = None;
            }
        }
    }

    fn replace(&mut self, item: ItemRef) {
        self.state.files.clear();
        self.state.folders.clear();
        self.insert(item.clone());
        self.state.anchor = Some(item);
    }

    fn insert(&mut self, item: ItemRef) {
        match item {
            ItemRef::File(id) => {
                self.state.files.insert(id);
            }
            ItemRef::Folder(id) => {
                self.state.folders.insert(id);
            }
        }
    }

    fn remove(&mut self, item: &ItemRef) -> bool {
        match item {
            ItemRef::File(id) => self.state.files.remove(id),
            ItemRef::Folder(id) => self.state.folders.remove(id),
        }
    }

    pub fn selected(&self, kind: ItemKind) -> usize {
        match kind {
            ItemKind::File => self.state.files.len(),
            ItemKind::Folder => self.state.folders.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{file, folder};
    use crate::view::{FilterSortPipeline, SortDirection, ViewCriteria};

    fn f(id: &str) -> ItemRef {
        ItemRef::File(FileId::new(id))
    }

    fn d(id: &str) -> ItemRef {
        ItemRef::Folder(FolderId::new(id))
    }

    fn order(files: &[&str], folders: &[&str]) -> ViewOrder {
        ViewOrder {
            version: 1,
            files: files.iter().map(|id| FileId::new(*id)).collect(),
            folders: folders.iter().map(|id| FolderId::new(*id)).collect(),
        }
    }

    fn selected_files(model: &SelectionModel) -> Vec<String> {
        let mut ids: Vec<String> = model.state().files.iter().map(|id| id.0.clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn replace_keeps_a_single_item_and_empties_other_kind() {
        let view = order(&["a", "b"], &["x", "y"]);
        let mut model = SelectionModel::default();
        model.select(d("x"), SelectMode::Toggle, &view);
        model.select(d("y"), SelectMode::Toggle, &view);
        model.select(f("a"), SelectMode::Toggle, &view);

        model.select(f("b"), SelectMode::Replace, &view);
        assert_eq!(model.selected(ItemKind::File), 1);
        assert_eq!(model.selected(ItemKind::Folder), 0);
        assert_eq!(model.state().anchor, Some(f("b")));
    }

    #[test]
    fn toggle_twice_restores_prior_state() {
        let view = order(&["a", "b", "c"], &["x"]);
        let mut model = SelectionModel::default();
        model.select(f("a"), SelectMode::Replace, &view);
        model.select(d("x"), SelectMode::Toggle, &view);
        let before = model.state().clone();

        model.select(f("c"), SelectMode::Toggle, &view);
        assert!(model.state().contains(&f("c")));
        model.select(f("c"), SelectMode::Toggle, &view);

        assert_eq!(model.state().files, before.files);
        assert_eq!(model.state().folders, before.folders);
    }

    #[test]
    fn range_does_not_move_the_anchor() {
        let view = order(&["a", "b", "c", "d", "e"], &[]);
        let mut model = SelectionModel::default();
        model.select(f("c"), SelectMode::Replace, &view);
        model.select(f("e"), SelectMode::Range, &view);
        assert_eq!(selected_files(&model), vec!["c", "d", "e"]);

        model.select(f("a"), SelectMode::Range, &view);
        assert_eq!(selected_files(&model), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(model.state().anchor, Some(f("c")));
    }

    #[test]
    fn range_follows_current_view_order_after_resort() {
        let records = vec![
            file("A", "a.txt", 1, "text/plain", 1),
            file("B", "b.txt", 1, "text/plain", 1),
            file("C", "c.txt", 1, "text/plain", 1),
            file("D", "d.txt", 1, "text/plain", 1),
        ];
        let pipeline = FilterSortPipeline::default();
        let to_order = |criteria: &ViewCriteria, version| ViewOrder {
            version,
            files: pipeline
                .files(&records, criteria)
                .into_iter()
                .map(|file| file.id)
                .collect(),
            folders: Vec::new(),
        };

        let ascending = to_order(&ViewCriteria::default(), 1);
        let mut model = SelectionModel::default();
        model.select(f("A"), SelectMode::Replace, &ascending);
        model.select(f("D"), SelectMode::Range, &ascending);
        assert_eq!(selected_files(&model), vec!["A", "B", "C", "D"]);

        let descending = to_order(
            &ViewCriteria {
                direction: SortDirection::Descending,
                ..ViewCriteria::default()
            },
            2,
        );
        assert_eq!(descending.files[0], FileId::new("D"));
        model.select(f("D"), SelectMode::Replace, &descending);
        model.select(f("A"), SelectMode::Range, &descending);
        assert_eq!(selected_files(&model), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn range_without_matching_anchor_acts_as_replace() {
        let view = order(&["a", "b"], &["x"]);
        let mut model = SelectionModel::default();
        model.select(d("x"), SelectMode::Replace, &view);
        model.select(f("b"), SelectMode::Range, &view);
        assert_eq!(selected_files(&model), vec!["b"]);
        assert!(model.state().folders.is_empty());
        assert_eq!(model.state().anchor, Some(f("b")));
    }

    #[test]
    fn reconcile_drops_missing_ids_silently() {
        let view = order(&["a", "b"], &["x"]);
        let mut model = SelectionModel::default();
        model.select(f("a"), SelectMode::Toggle, &view);
        model.select(f("b"), SelectMode::Toggle, &view);
        model.select(d("x"), SelectMode::Toggle, &view);

        let snapshot = CollectionsSnapshot {
            folder: None,
            files: vec![file("a", "a.txt", 1, "text/plain", 1)],
            folders: vec![folder("x", None, &[])],
        };
        model.reconcile(&snapshot);
        assert_eq!(selected_files(&model), vec!["a"]);
        assert!(model.state().contains(&d("x")));
        assert_eq!(model.state().anchor, Some(d("x")));

        model.reconcile(&CollectionsSnapshot::default());
        assert!(model.state().is_empty());
        assert_eq!(model.state().anchor, None);
    }

    #[test]
    fn select_all_and_forget() {
        let view = order(&["a", "b"], &["x"]);
        let mut model = SelectionModel::default();
        model.select_all(&view);
        assert_eq!(model.state().len(), 3);

        model.forget(&[f("a"), d("x")]);
        assert_eq!(selected_files(&model), vec!["b"]);
        model.clear();
        assert!(model.state().is_empty());
    }
}
