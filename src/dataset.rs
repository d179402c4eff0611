//! Join of a dataset's list file and classes file.
//!
//! The list file defines the canonical 1-indexed ordinal of every filename;
//! the classes file assigns filenames to classes. `DatasetIndex` holds both
//! directions of the list mapping, the class grouping, and the per-filename
//! details for names present in both files.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::{GatewayError, Result};
use crate::run_config::DatasetPaths;
use crate::storage::DatasetStore;
use crate::types::{FileDetail, Ordinal, Page, PageItem};

/// Filenames grouped by class, each group in classes-file order.
///
/// Classes are kept in first-seen order so serialized output follows the
/// classes file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassGroups {
    order: Vec<String>,
    groups: HashMap<String, Vec<String>>,
}

impl ClassGroups {
    fn push(&mut self, class: &str, filename: &str) {
        match self.groups.get_mut(class) {
            Some(names) => names.push(filename.to_string()),
            None => {
                self.order.push(class.to_string());
                self.groups
                    .insert(class.to_string(), vec![filename.to_string()]);
            }
        }
    }

    pub fn get(&self, class: &str) -> Option<&[String]> {
        self.groups.get(class).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.order
            .iter()
            .map(|class| (class.as_str(), self.groups[class].as_slice()))
    }
}

impl Serialize for ClassGroups {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.order.len()))?;
        for (class, names) in self.iter() {
            map.serialize_entry(class, names)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetIndex {
    /// `by_ordinal[n - 1]` is the filename with ordinal `n`.
    by_ordinal: Vec<String>,
    ordinal_of: HashMap<String, Ordinal>,
    by_class: ClassGroups,
    details: HashMap<String, FileDetail>,
}

/// Non-empty trimmed lines of a list file.
fn list_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `filename:class` pairs; anything without exactly one `:` and two
/// non-empty sides is skipped.
fn class_pairs(bytes: &[u8]) -> Vec<(String, String)> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (filename, class) = line.split_once(':')?;
            if class.contains(':') {
                return None;
            }
            let (filename, class) = (filename.trim(), class.trim());
            if filename.is_empty() || class.is_empty() {
                return None;
            }
            Some((filename.to_string(), class.to_string()))
        })
        .collect()
}

impl DatasetIndex {
    /// Build the index from the raw bytes of a list file and a classes file.
    pub fn build(list_bytes: &[u8], classes_bytes: &[u8]) -> Self {
        let by_ordinal = list_lines(list_bytes);

        let mut ordinal_of = HashMap::with_capacity(by_ordinal.len());
        for (idx, filename) in by_ordinal.iter().enumerate() {
            let ordinal = idx + 1;
            // Last occurrence wins for duplicated filenames.
            if let Some(previous) = ordinal_of.insert(filename.clone(), ordinal) {
                warn!(
                    filename = %filename,
                    previous,
                    ordinal,
                    "duplicate filename in list file"
                );
            }
        }

        let mut by_class = ClassGroups::default();
        let mut details = HashMap::new();
        for (filename, class) in class_pairs(classes_bytes) {
            by_class.push(&class, &filename);
            if let Some(&ordinal) = ordinal_of.get(&filename) {
                details.insert(filename, FileDetail { class, ordinal });
            }
        }

        debug!(
            items = by_ordinal.len(),
            classes = by_class.len(),
            joined = details.len(),
            "built dataset index"
        );

        Self {
            by_ordinal,
            ordinal_of,
            by_class,
            details,
        }
    }

    /// Read the list and classes files named by `paths` through `store` and
    /// build the index.
    #[instrument(skip(store, paths), fields(list = %paths.dataset_list, classes = %paths.class_list))]
    pub async fn load(store: &DatasetStore, paths: &DatasetPaths) -> Result<Self> {
        if paths.dataset_list.is_empty() {
            return Err(GatewayError::not_found(
                "INPUT_FILE_LIST is not set in the config",
            ));
        }
        if paths.class_list.is_empty() {
            return Err(GatewayError::not_found(
                "INPUT_FILE_CLASSES is not set in the config",
            ));
        }

        let (list_bytes, classes_bytes) = tokio::try_join!(
            store.read_memoized(&paths.dataset_list),
            store.read_memoized(&paths.class_list)
        )?;

        crate::metrics::INDEX_BUILDS_TOTAL.inc();
        Ok(Self::build(&list_bytes, &classes_bytes))
    }

    /// Number of filenames in the list file.
    pub fn len(&self) -> usize {
        self.by_ordinal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ordinal.is_empty()
    }

    /// All filenames in ordinal order.
    pub fn filenames(&self) -> &[String] {
        &self.by_ordinal
    }

    pub fn get_ordinal_for(&self, filename: &str) -> Result<Ordinal> {
        self.ordinal_of
            .get(filename.trim())
            .copied()
            .ok_or_else(|| GatewayError::not_found(format!("{filename} in list file")))
    }

    pub fn get_filename_at(&self, ordinal: i64) -> Result<&str> {
        let out_of_bounds = || GatewayError::OutOfBounds {
            ordinal,
            len: self.by_ordinal.len(),
        };
        let idx = usize::try_from(ordinal)
            .ok()
            .and_then(|n| n.checked_sub(1))
            .ok_or_else(out_of_bounds)?;
        self.by_ordinal
            .get(idx)
            .map(String::as_str)
            .ok_or_else(out_of_bounds)
    }

    /// Resolve ordinals in order, failing on the first one out of range.
    pub fn resolve_by_ordinals(&self, ordinals: &[i64]) -> Result<Vec<PageItem>> {
        ordinals
            .iter()
            .map(|&ordinal| {
                let filename = self.get_filename_at(ordinal)?;
                Ok(PageItem {
                    line_number: ordinal as Ordinal,
                    file_input_name_line: filename.to_string(),
                })
            })
            .collect()
    }

    pub fn filenames_grouped_by_class(&self) -> &ClassGroups {
        &self.by_class
    }

    /// Details for the given filenames; names without details are omitted.
    pub fn details_for_filenames<S: AsRef<str>>(
        &self,
        filenames: &[S],
    ) -> BTreeMap<String, FileDetail> {
        filenames
            .iter()
            .filter_map(|name| {
                let name = name.as_ref();
                self.details
                    .get(name)
                    .map(|detail| (name.to_string(), detail.clone()))
            })
            .collect()
    }

    /// Details for every filename present in both files.
    pub fn all_details(&self) -> BTreeMap<String, FileDetail> {
        self.details
            .iter()
            .map(|(name, detail)| (name.clone(), detail.clone()))
            .collect()
    }

    /// Details for the filenames at the given ordinals. Ordinals with no
    /// filename or no details are skipped with a warning.
    pub fn details_for_ordinals(&self, ordinals: &[i64]) -> BTreeMap<String, FileDetail> {
        let mut out = BTreeMap::new();
        for &ordinal in ordinals {
            let detail = self
                .get_filename_at(ordinal)
                .ok()
                .and_then(|name| self.details.get(name).map(|d| (name, d)));
            match detail {
                Some((name, detail)) => {
                    out.insert(name.to_string(), detail.clone());
                }
                None => warn!(ordinal, "no details found for line number"),
            }
        }
        out
    }

    /// One page of the list file. `page_index` is 1-indexed; pages past the
    /// end are empty but carry the correct totals.
    pub fn list_page(&self, page_index: usize, page_size: usize) -> Result<Page> {
        if page_index < 1 {
            return Err(GatewayError::BadRequest("page index must be >= 1".into()));
        }
        if page_size < 1 {
            return Err(GatewayError::BadRequest("page size must be >= 1".into()));
        }

        let total_items = self.by_ordinal.len();
        let start = (page_index - 1).saturating_mul(page_size);
        let end = start.saturating_add(page_size).min(total_items);
        let items = self
            .by_ordinal
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .map(|(offset, name)| PageItem {
                line_number: start + offset + 1,
                file_input_name_line: name.clone(),
            })
            .collect();

        Ok(Page {
            total_items,
            total_pages: total_items.div_ceil(page_size),
            current_page: page_index,
            page_size,
            items,
        })
    }
}
