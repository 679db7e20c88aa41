//! Purpose: Derive the visible inventory slice from the mirrored collection.
//! Exports: `SortField`, `SortDirection`, `SortSpec`, `NameCollator`, `Projection`, `project`,
//! `filter_and_sort`.
//! Role: Pure projection used by the controller, the CLI renderer, and CSV export.
//! Invariants: No hidden state; identical inputs yield identical output.
//! Invariants: Pages are 1-based; page 0 or past the end is an empty slice, not an error.
//! Invariants: `page_count` counts filtered rows; `total` keeps the unfiltered size.

use std::cmp::Ordering;

use icu_collator::options::CollatorOptions;
use icu_collator::{Collator, CollatorBorrowed};
use serde::{Deserialize, Serialize};

use crate::core::item::Item;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Name,
    Quantity,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Select `field` and flip the current direction, whichever field was active.
    pub fn toggle(self, field: SortField) -> Self {
        Self {
            field,
            direction: self.direction.flipped(),
        }
    }

    fn compare(&self, collator: &NameCollator, a: &Item, b: &Item) -> Ordering {
        let ordering = match self.field {
            SortField::Name => collator.compare(&a.name, &b.name),
            SortField::Quantity => a
                .quantity
                .cmp(&b.quantity)
                .then_with(|| collator.compare(&a.name, &b.name)),
        };
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub rows: Vec<Item>,
    pub matched: usize,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub page_count: usize,
}

/// Locale-aware name ordering backed by the ICU root collation.
///
/// Names that collate equal (canonically equivalent spellings) fall back to
/// code point order so sorting stays total.
pub struct NameCollator {
    collator: Option<CollatorBorrowed<'static>>,
}

impl NameCollator {
    pub fn root() -> Self {
        let collator = Collator::try_new(Default::default(), CollatorOptions::default()).ok();
        if collator.is_none() {
            tracing::warn!("root collation data unavailable; sorting names by code point");
        }
        Self { collator }
    }

    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        let collated = match &self.collator {
            Some(collator) => collator.compare(a, b),
            None => Ordering::Equal,
        };
        collated.then_with(|| a.cmp(b))
    }
}

impl Default for NameCollator {
    fn default() -> Self {
        Self::root()
    }
}

impl std::fmt::Debug for NameCollator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameCollator")
            .field("loaded", &self.collator.is_some())
            .finish()
    }
}

fn matches_search(name: &str, needle: &str) -> bool {
    needle.is_empty() || name.to_lowercase().contains(needle)
}

pub fn filter_and_sort(
    items: &[Item],
    search: &str,
    sort: SortSpec,
    collator: &NameCollator,
) -> Vec<Item> {
    let needle = search.to_lowercase();
    let mut rows: Vec<Item> = items
        .iter()
        .filter(|item| matches_search(&item.name, &needle))
        .cloned()
        .collect();
    rows.sort_by(|a, b| sort.compare(collator, a, b));
    rows
}

pub fn project(
    items: &[Item],
    search: &str,
    sort: SortSpec,
    page: usize,
    page_size: usize,
    collator: &NameCollator,
) -> Projection {
    let sorted = filter_and_sort(items, search, sort, collator);
    let matched = sorted.len();
    let page_count = if page_size == 0 {
        0
    } else {
        matched.div_ceil(page_size)
    };
    let rows = if page == 0 || page_size == 0 {
        Vec::new()
    } else {
        let start = (page - 1).saturating_mul(page_size);
        sorted.into_iter().skip(start).take(page_size).collect()
    };
    Projection {
        rows,
        matched,
        total: items.len(),
        page,
        page_size,
        page_count,
    }
}
