use crate::query::QuerySpec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One positional result row as returned by the upstream service.
pub type Record = Vec<serde_json::Value>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_type: None,
        }
    }

    pub fn with_type(mut self, base_type: impl Into<String>) -> Self {
        self.base_type = Some(base_type.into());
        self
    }
}

/// Names of the columns, in order. Column sets are compared by name.
pub fn column_names(columns: &[Column]) -> Vec<String> {
    columns.iter().map(|c| c.name.clone()).collect()
}

/// Offset/limit slice of a result set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: u64,
}

impl PageWindow {
    pub fn for_page(page_index: usize, page_size: u64) -> Self {
        Self {
            offset: page_index as u64 * page_size,
            limit: page_size,
        }
    }
}

/// Rows returned by a single upstream call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<Column>,
    pub rows: Vec<Record>,
    /// The upstream reported that it capped the result.
    pub truncated: bool,
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub spec: Arc<QuerySpec>,
    pub window: PageWindow,
    pub page_index: usize,
}

impl PageRequest {
    pub fn new(spec: Arc<QuerySpec>, page_index: usize, page_size: u64) -> Self {
        Self {
            spec,
            window: PageWindow::for_page(page_index, page_size),
            page_index,
        }
    }

    pub fn offset(&self) -> u64 {
        self.window.offset
    }

    pub fn limit(&self) -> u64 {
        self.window.limit
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub page_index: usize,
    pub columns: Vec<Column>,
    pub rows: Vec<Record>,
    pub row_count: usize,
    /// A full page implies more rows may follow; not guaranteed by the upstream.
    pub has_more: bool,
}

impl PageResult {
    pub fn from_rows(request: &PageRequest, rows: QueryRows) -> Self {
        let row_count = rows.rows.len();
        Self {
            page_index: request.page_index,
            columns: rows.columns,
            rows: rows.rows,
            row_count,
            has_more: row_count as u64 == request.limit(),
        }
    }

    /// Empty pages may legitimately come back without column metadata.
    pub fn is_blank(&self) -> bool {
        self.row_count == 0 && self.columns.is_empty()
    }
}
