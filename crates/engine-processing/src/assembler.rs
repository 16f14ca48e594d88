use engine_core::error::FetchError;
use model::page::{Column, PageResult, Record, column_names};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Pages collected by a paginated executor, keyed by page index.
#[derive(Debug, Default)]
pub struct PageCollection {
    pub pages: BTreeMap<usize, PageResult>,
    pub failed: BTreeSet<usize>,
    /// Exclusive upper bound of the page indices that belong to the result.
    pub expected_pages: usize,
    pub cancelled: bool,
}

impl PageCollection {
    pub fn insert(&mut self, page: PageResult) {
        self.pages.insert(page.page_index, page);
    }
}

#[derive(Debug, Default)]
pub struct AssembledRows {
    pub columns: Vec<Column>,
    pub rows: Vec<Record>,
    pub failed_pages: BTreeSet<usize>,
    /// Pages below the expected count that were neither fetched nor failed.
    pub abandoned_pages: BTreeSet<usize>,
    pub pages_fetched: usize,
}

/// Concatenates pages in increasing index order.
///
/// The first page that reports columns fixes the schema; any later page with
/// a different column sequence fails the whole operation. Blank pages carry no
/// schema and are skipped by the check.
pub fn assemble(collection: PageCollection) -> Result<AssembledRows, FetchError> {
    let PageCollection {
        pages,
        failed,
        expected_pages,
        cancelled: _,
    } = collection;

    let abandoned_pages: BTreeSet<usize> = (0..expected_pages)
        .filter(|idx| !pages.contains_key(idx) && !failed.contains(idx))
        .collect();

    let mut columns: Option<Vec<Column>> = None;
    for page in pages.values().filter(|p| !p.is_blank()) {
        match &columns {
            None => columns = Some(page.columns.clone()),
            Some(expected) if column_names(expected) != column_names(&page.columns) => {
                return Err(FetchError::SchemaMismatch {
                    page: page.page_index,
                    expected: column_names(expected),
                    found: column_names(&page.columns),
                });
            }
            Some(_) => {}
        }
    }

    let total: usize = pages.values().map(|p| p.row_count).sum();
    let pages_fetched = pages.len();
    let mut rows = Vec::with_capacity(total);
    for (_, page) in pages {
        rows.extend(page.rows);
    }

    if !failed.is_empty() {
        warn!(failed = ?failed, rows = rows.len(), "Assembled partial result");
    }

    Ok(AssembledRows {
        columns: columns.unwrap_or_default(),
        rows,
        failed_pages: failed,
        abandoned_pages,
        pages_fetched,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(page_index: usize, columns: &[&str], values: &[i64]) -> PageResult {
        PageResult {
            page_index,
            columns: columns.iter().map(|c| Column::new(*c)).collect(),
            rows: values.iter().map(|v| vec![json!(v)]).collect(),
            row_count: values.len(),
            has_more: false,
        }
    }

    #[test]
    fn test_pages_are_ordered_by_index_not_arrival() {
        let mut collection = PageCollection {
            expected_pages: 3,
            ..Default::default()
        };
        collection.insert(page(0, &["a"], &[1, 2]));
        collection.insert(page(2, &["a"], &[5, 6]));
        collection.insert(page(1, &["a"], &[3, 4]));

        let assembled = assemble(collection).unwrap();
        let values: Vec<i64> = assembled
            .rows
            .iter()
            .map(|r| r[0].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(assembled.pages_fetched, 3);
        assert!(assembled.abandoned_pages.is_empty());
    }

    #[test]
    fn test_column_mismatch_is_fatal() {
        let mut collection = PageCollection::default();
        collection.insert(page(0, &["a", "b"], &[1]));
        collection.insert(page(1, &["a", "b", "c"], &[2]));

        match assemble(collection) {
            Err(FetchError::SchemaMismatch {
                page,
                expected,
                found,
            }) => {
                assert_eq!(page, 1);
                assert_eq!(expected, vec!["a", "b"]);
                assert_eq!(found, vec!["a", "b", "c"]);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_blank_pages_skip_schema_check() {
        let mut collection = PageCollection::default();
        collection.insert(page(0, &[], &[]));
        collection.insert(page(1, &["a"], &[1]));
        collection.insert(page(2, &[], &[]));

        let assembled = assemble(collection).unwrap();
        assert_eq!(column_names(&assembled.columns), vec!["a"]);
        assert_eq!(assembled.rows.len(), 1);
    }

    #[test]
    fn test_gaps_are_reported() {
        let mut collection = PageCollection {
            expected_pages: 5,
            ..Default::default()
        };
        collection.insert(page(0, &["a"], &[0]));
        collection.insert(page(1, &["a"], &[1]));
        collection.failed.insert(2);

        let assembled = assemble(collection).unwrap();
        assert_eq!(assembled.rows.len(), 2);
        assert_eq!(assembled.failed_pages, BTreeSet::from([2]));
        assert_eq!(assembled.abandoned_pages, BTreeSet::from([3, 4]));
    }
}
