//! Filtering and ordering of raw collections into the displayed view.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::model::{FileId, FileRecord, FolderId, FolderRecord, ItemKind, ItemRef};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortField {
    #[default]
    Name,
    Size,
    Type,
    Modified,
    Created,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Inclusive byte range; a missing bound is unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl SizeRange {
    fn contains(&self, size: u64) -> bool {
        self.min.map_or(true, |min| size >= min) && self.max.map_or(true, |max| size <= max)
    }
}

/// Inclusive modification-time range; a missing bound is unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// Filter and sort settings. Changing them never issues a remote command.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewCriteria {
    pub query: String,
    pub sort_field: SortField,
    pub direction: SortDirection,
    /// Media-type prefix such as `image/`.
    pub type_prefix: Option<String>,
    pub size: SizeRange,
    pub modified: DateRange,
    pub favorites_only: bool,
    pub include_deleted: bool,
}

/// Name comparison following the vault's display language.
///
/// Primary strength ignores case and accents, secondary strength separates
/// accented forms, and the raw text decides whatever is still tied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Collator {
    tailoring: Tailoring,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Tailoring {
    #[default]
    Root,
    /// å ä ö after z.
    Swedish,
    /// æ ø å after z.
    DanoNorwegian,
}

impl Collator {
    pub fn for_locale(locale: &str) -> Self {
        let language = locale
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let tailoring = match language.as_str() {
            "sv" | "fi" => Tailoring::Swedish,
            "da" | "nb" | "nn" | "no" => Tailoring::DanoNorwegian,
            _ => Tailoring::Root,
        };
        Self { tailoring }
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        self.primary_key(a)
            .cmp(&self.primary_key(b))
            .then_with(|| secondary_key(a).cmp(&secondary_key(b)))
            .then_with(|| a.cmp(b))
    }

    fn primary_key(&self, text: &str) -> Vec<char> {
        let mut key = Vec::with_capacity(text.len());
        for ch in text.chars().flat_map(char::to_lowercase) {
            if let Some(weight) = self.tailored_weight(ch) {
                key.push(weight);
            } else if ch == 'ß' {
                key.extend(['s', 's']);
            } else {
                key.extend(std::iter::once(ch).nfd().filter(|c| !is_combining_mark(*c)));
            }
        }
        key
    }

    // Letters the language sorts after `z` get weights just above it.
    fn tailored_weight(&self, ch: char) -> Option<char> {
        let after_z = match (self.tailoring, ch) {
            (Tailoring::Swedish, 'å') | (Tailoring::DanoNorwegian, 'æ') => 1,
            (Tailoring::Swedish, 'ä') | (Tailoring::DanoNorwegian, 'ø') => 2,
            (Tailoring::Swedish, 'ö') | (Tailoring::DanoNorwegian, 'å') => 3,
            (Tailoring::Swedish, 'æ') => 2,
            (Tailoring::Swedish, 'ø') => 3,
            (Tailoring::DanoNorwegian, 'ä') => 1,
            (Tailoring::DanoNorwegian, 'ö') => 2,
            _ => return None,
        };
        char::from_u32('z' as u32 + after_z)
    }
}

fn secondary_key(text: &str) -> Vec<char> {
    text.chars().flat_map(char::to_lowercase).nfd().collect()
}

/// Ids of the displayed view, bumped on every recomputation so range selection
/// always reads the order that is actually on screen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewOrder {
    pub version: u64,
    pub files: Vec<FileId>,
    pub folders: Vec<FolderId>,
}

impl ViewOrder {
    pub fn position(&self, item: &ItemRef) -> Option<usize> {
        match item {
            ItemRef::File(id) => self.files.iter().position(|file| file == id),
            ItemRef::Folder(id) => self.folders.iter().position(|folder| folder == id),
        }
    }

    /// Items between two positions of one kind, inclusive, in view order.
    pub fn span(&self, kind: ItemKind, a: usize, b: usize) -> Vec<ItemRef> {
        let (start, end) = if a <= b { (a, b) } else { (b, a) };
        match kind {
            ItemKind::File => self
                .files
                .get(start..=end)
                .unwrap_or_default()
                .iter()
                .cloned()
                .map(ItemRef::File)
                .collect(),
            ItemKind::Folder => self
                .folders
                .get(start..=end)
                .unwrap_or_default()
                .iter()
                .cloned()
                .map(ItemRef::Folder)
                .collect(),
        }
    }

    pub fn items(&self) -> impl Iterator<Item = ItemRef> + '_ {
        self.folders
            .iter()
            .cloned()
            .map(ItemRef::Folder)
            .chain(self.files.iter().cloned().map(ItemRef::File))
    }
}

/// Pure transformation from raw collections to ordered view collections.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterSortPipeline {
    collator: Collator,
}

impl FilterSortPipeline {
    pub fn new(collator: Collator) -> Self {
        Self { collator }
    }

    pub fn files(&self, files: &[FileRecord], criteria: &ViewCriteria) -> Vec<FileRecord> {
        let needle = criteria.query.trim().to_lowercase();
        let type_prefix = criteria
            .type_prefix
            .as_deref()
            .map(str::to_ascii_lowercase)
            .filter(|prefix| !prefix.is_empty());

        let mut ordered: Vec<FileRecord> = files
            .iter()
            .filter(|file| criteria.include_deleted || !file.deleted)
            .filter(|file| !criteria.favorites_only || file.favorite)
            .filter(|file| {
                needle.is_empty()
                    || matches_query(&file.name, &needle)
                    || file
                        .original_name
                        .as_deref()
                        .is_some_and(|name| matches_query(name, &needle))
            })
            .filter(|file| {
                type_prefix
                    .as_deref()
                    .map_or(true, |prefix| file.mime_type.to_ascii_lowercase().starts_with(prefix))
            })
            .filter(|file| criteria.size.contains(file.size))
            .filter(|file| criteria.modified.contains(file.modified_at))
            .cloned()
            .collect();

        ordered.sort_by(|a, b| {
            let ord = match criteria.sort_field {
                SortField::Name => self.collator.compare(&a.name, &b.name),
                SortField::Size => a.size.cmp(&b.size),
                SortField::Type => a.mime_type.cmp(&b.mime_type),
                SortField::Modified => a.modified_at.cmp(&b.modified_at),
                SortField::Created => a.created_at.cmp(&b.created_at),
            };
            directed(ord, criteria.direction)
        });
        ordered
    }

    /// Folders only honour the text query; type, size and date filters are file
    /// properties.
    pub fn folders(&self, folders: &[FolderRecord], criteria: &ViewCriteria) -> Vec<FolderRecord> {
        let needle = criteria.query.trim().to_lowercase();
        let mut ordered: Vec<FolderRecord> = folders
            .iter()
            .filter(|folder| needle.is_empty() || matches_query(&folder.name, &needle))
            .cloned()
            .collect();

        ordered.sort_by(|a, b| {
            let ord = match criteria.sort_field {
                SortField::Name | SortField::Type => self.collator.compare(&a.name, &b.name),
                SortField::Size => a.total_size.cmp(&b.total_size),
                SortField::Modified => a.modified_at.cmp(&b.modified_at),
                SortField::Created => a.created_at.cmp(&b.created_at),
            };
            directed(ord, criteria.direction)
        });
        ordered
    }
}

fn matches_query(name: &str, needle_lower: &str) -> bool {
    name.to_lowercase().contains(needle_lower)
}

fn directed(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Ascending => ord,
        SortDirection::Descending => ord.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{at, file, folder};

    fn names(files: &[FileRecord]) -> Vec<&str> {
        files.iter().map(|file| file.name.as_str()).collect()
    }

    fn sample() -> Vec<FileRecord> {
        vec![
            file("1", "beta.txt", 300, "text/plain", 3),
            file("2", "Alpha.png", 100, "image/png", 5),
            file("3", "gamma.jpg", 200, "image/jpeg", 1),
            file("4", "delta.txt", 100, "text/plain", 4),
        ]
    }

    #[test]
    fn sorts_names_case_insensitively() {
        let pipeline = FilterSortPipeline::default();
        let ordered = pipeline.files(&sample(), &ViewCriteria::default());
        assert_eq!(names(&ordered), vec!["Alpha.png", "beta.txt", "delta.txt", "gamma.jpg"]);
    }

    #[test]
    fn equal_keys_keep_input_order_in_both_directions() {
        let pipeline = FilterSortPipeline::default();
        let criteria = ViewCriteria {
            sort_field: SortField::Size,
            ..ViewCriteria::default()
        };
        let ordered = pipeline.files(&sample(), &criteria);
        assert_eq!(names(&ordered), vec!["Alpha.png", "delta.txt", "gamma.jpg", "beta.txt"]);

        let descending = ViewCriteria {
            direction: SortDirection::Descending,
            ..criteria
        };
        let ordered = pipeline.files(&sample(), &descending);
        assert_eq!(names(&ordered), vec!["beta.txt", "gamma.jpg", "Alpha.png", "delta.txt"]);
    }

    #[test]
    fn applying_the_same_criteria_twice_is_idempotent() {
        let pipeline = FilterSortPipeline::default();
        let criteria = ViewCriteria {
            sort_field: SortField::Type,
            ..ViewCriteria::default()
        };
        let once = pipeline.files(&sample(), &criteria);
        let twice = pipeline.files(&once, &criteria);
        assert_eq!(once, twice);
    }

    #[test]
    fn query_matches_name_or_original_name() {
        let mut files = sample();
        files[2].original_name = Some("IMG_4411.JPG".into());
        let pipeline = FilterSortPipeline::default();
        let criteria = ViewCriteria {
            query: "img_44".into(),
            ..ViewCriteria::default()
        };
        assert_eq!(names(&pipeline.files(&files, &criteria)), vec!["gamma.jpg"]);

        let criteria = ViewCriteria {
            query: "ALP".into(),
            ..ViewCriteria::default()
        };
        assert_eq!(names(&pipeline.files(&files, &criteria)), vec!["Alpha.png"]);
    }

    #[test]
    fn type_size_and_date_filters_are_inclusive() {
        let pipeline = FilterSortPipeline::default();
        let criteria = ViewCriteria {
            type_prefix: Some("image/".into()),
            size: SizeRange {
                min: Some(100),
                max: Some(200),
            },
            modified: DateRange {
                from: Some(at(1)),
                to: Some(at(5)),
            },
            ..ViewCriteria::default()
        };
        assert_eq!(names(&pipeline.files(&sample(), &criteria)), vec!["Alpha.png", "gamma.jpg"]);

        let criteria = ViewCriteria {
            modified: DateRange {
                from: Some(at(4)),
                to: None,
            },
            ..ViewCriteria::default()
        };
        assert_eq!(names(&pipeline.files(&sample(), &criteria)), vec!["Alpha.png", "delta.txt"]);
    }

    #[test]
    fn deleted_files_hidden_unless_requested() {
        let mut files = sample();
        files[0].deleted = true;
        files[1].favorite = true;
        let pipeline = FilterSortPipeline::default();
        assert_eq!(pipeline.files(&files, &ViewCriteria::default()).len(), 3);

        let trash = ViewCriteria {
            include_deleted: true,
            ..ViewCriteria::default()
        };
        assert_eq!(pipeline.files(&files, &trash).len(), 4);

        let favorites = ViewCriteria {
            favorites_only: true,
            ..ViewCriteria::default()
        };
        assert_eq!(names(&pipeline.files(&files, &favorites)), vec!["Alpha.png"]);
    }

    #[test]
    fn folders_sort_by_name_and_total_size() {
        let mut a = folder("a", None, &[]);
        a.name = "Zeta".into();
        a.total_size = 10;
        let mut b = folder("b", None, &[]);
        b.name = "alpha".into();
        b.total_size = 50;
        let pipeline = FilterSortPipeline::default();

        let ordered = pipeline.folders(&[a.clone(), b.clone()], &ViewCriteria::default());
        assert_eq!(ordered[0].name, "alpha");

        let by_size = ViewCriteria {
            sort_field: SortField::Size,
            direction: SortDirection::Descending,
            ..ViewCriteria::default()
        };
        let ordered = pipeline.folders(&[a, b], &by_size);
        assert_eq!(ordered[0].name, "alpha");
    }

    #[test]
    fn collation_follows_locale() {
        let root = Collator::for_locale("en-US");
        assert_eq!(root.compare("Ärger", "Zebra"), Ordering::Less);
        assert_eq!(root.compare("resume", "résumé"), Ordering::Less);
        assert_eq!(root.compare("straße", "strasse"), Ordering::Greater);

        let swedish = Collator::for_locale("sv_SE");
        assert_eq!(swedish.compare("Ärger", "Zebra"), Ordering::Greater);
        assert_eq!(swedish.compare("åka", "ära"), Ordering::Less);
    }

    #[test]
    fn view_order_spans_are_inclusive_either_way() {
        let order = ViewOrder {
            version: 1,
            files: ["a", "b", "c", "d"].into_iter().map(FileId::new).collect(),
            folders: Vec::new(),
        };
        let span = order.span(ItemKind::File, 3, 1);
        assert_eq!(
            span,
            vec![
                ItemRef::File(FileId::new("b")),
                ItemRef::File(FileId::new("c")),
                ItemRef::File(FileId::new("d")),
            ]
        );
    }
}
