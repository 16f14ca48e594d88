use crate::error::QueryError;
use model::page::{Column, QueryRows, Record};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub id: Option<String>,
}

/// `GET /api/database` answers either `{ "data": [...] }` or a bare array
/// depending on the server version.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DatabaseList {
    Wrapped { data: Vec<DatabaseInfo> },
    Bare(Vec<DatabaseInfo>),
}

impl DatabaseList {
    pub fn into_vec(self) -> Vec<DatabaseInfo> {
        match self {
            DatabaseList::Wrapped { data } => data,
            DatabaseList::Bare(data) => data,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DatabaseInfo {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct TemplateTag {
    pub name: String,
    #[serde(rename = "display-name")]
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ParameterPayload {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub target: serde_json::Value,
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct NativeQuery {
    pub query: String,
    #[serde(rename = "template-tags")]
    pub template_tags: BTreeMap<String, TemplateTag>,
}

#[derive(Debug, Serialize)]
pub struct Constraints {
    #[serde(rename = "max-results")]
    pub max_results: u64,
    #[serde(rename = "max-results-bare-rows")]
    pub max_results_bare_rows: u64,
}

impl Constraints {
    pub fn capped_at(max_rows: u64) -> Self {
        Self {
            max_results: max_rows,
            max_results_bare_rows: max_rows,
        }
    }
}

/// Body of `POST /api/dataset`.
#[derive(Debug, Serialize)]
pub struct DatasetRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub native: NativeQuery,
    pub database: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterPayload>,
    pub constraints: Constraints,
}

/// Body of `POST /api/card/{id}/query`.
#[derive(Debug, Serialize)]
pub struct CardQueryRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterPayload>,
}

#[derive(Debug, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(default)]
    pub base_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DatasetData {
    #[serde(default)]
    pub rows: Vec<Record>,
    #[serde(default)]
    pub cols: Vec<ColumnInfo>,
    #[serde(default)]
    pub results_truncated: bool,
}

#[derive(Debug, Deserialize)]
pub struct DatasetResponse {
    pub status: Option<String>,
    pub data: Option<DatasetData>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

impl DatasetResponse {
    /// Converts a completed response into rows; any other status is a query failure.
    pub fn into_rows(self) -> Result<QueryRows, QueryError> {
        let status = self.status.unwrap_or_else(|| "unknown".to_string());
        if status != "completed" {
            let message = match self.error {
                Some(serde_json::Value::String(msg)) => msg,
                Some(other) => other.to_string(),
                None => "no error details".to_string(),
            };
            return Err(QueryError::Failed { status, message });
        }

        let data = self
            .data
            .ok_or_else(|| QueryError::Malformed("completed response without data".into()))?;

        let columns = data
            .cols
            .into_iter()
            .map(|c| Column {
                name: c.name,
                base_type: c.base_type,
            })
            .collect();

        Ok(QueryRows {
            columns,
            rows: data.rows,
            truncated: data.results_truncated,
        })
    }
}

/// Reads the single cell of a `COUNT(*)` result.
pub fn count_from_rows(rows: &QueryRows) -> Result<u64, QueryError> {
    let cell = rows
        .rows
        .first()
        .and_then(|row| row.first())
        .ok_or_else(|| QueryError::Malformed("count query returned no rows".into()))?;

    match cell {
        serde_json::Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| QueryError::Malformed(format!("invalid row count: {n}"))),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| QueryError::Malformed(format!("invalid row count: {s}"))),
        other => Err(QueryError::Malformed(format!("invalid row count: {other}"))),
    }
}

#[derive(Debug, Deserialize)]
pub struct Card {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dataset_query: Option<CardQuery>,
}

#[derive(Debug, Deserialize)]
pub struct CardQuery {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub native: Option<CardNative>,
}

#[derive(Debug, Deserialize)]
pub struct CardNative {
    #[serde(default)]
    pub query: Option<String>,
}

impl Card {
    /// SQL text of a native card, if any.
    pub fn native_sql(&self) -> Option<&str> {
        let query = self.dataset_query.as_ref()?;
        if query.kind.as_deref() != Some("native") {
            return None;
        }
        query
            .native
            .as_ref()
            .and_then(|n| n.query.as_deref())
            .filter(|sql| !sql.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_completed_response_into_rows() {
        let body = json!({
            "status": "completed",
            "data": {
                "rows": [[1, "a"], [2, "b"]],
                "cols": [
                    {"name": "id", "base_type": "type/Integer"},
                    {"name": "name", "base_type": "type/Text"}
                ],
                "results_truncated": true
            }
        });
        let resp: DatasetResponse = serde_json::from_value(body).unwrap();
        let rows = resp.into_rows().unwrap();
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.columns[1].name, "name");
        assert_eq!(rows.columns[0].base_type.as_deref(), Some("type/Integer"));
        assert!(rows.truncated);
    }

    #[test]
    fn test_failed_status_is_query_failure() {
        let body = json!({"status": "failed", "error": "Code: 60. Table doesn't exist"});
        let resp: DatasetResponse = serde_json::from_value(body).unwrap();
        match resp.into_rows() {
            Err(QueryError::Failed { status, message }) => {
                assert_eq!(status, "failed");
                assert!(message.contains("Table doesn't exist"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_count_accepts_numbers_and_strings() {
        let mut rows = QueryRows {
            columns: vec![Column::new("total_rows")],
            rows: vec![vec![json!(3_200_000)]],
            truncated: false,
        };
        assert_eq!(count_from_rows(&rows).unwrap(), 3_200_000);

        rows.rows = vec![vec![json!("42")]];
        assert_eq!(count_from_rows(&rows).unwrap(), 42);

        rows.rows = vec![];
        assert!(count_from_rows(&rows).is_err());
    }

    #[test]
    fn test_database_list_shapes() {
        let wrapped: DatabaseList =
            serde_json::from_value(json!({"data": [{"id": 3, "name": "x"}]})).unwrap();
        assert_eq!(wrapped.into_vec()[0].id, 3);

        let bare: DatabaseList = serde_json::from_value(json!([{"id": 4, "name": "y"}])).unwrap();
        assert_eq!(bare.into_vec()[0].name, "y");
    }

    #[test]
    fn test_card_native_sql() {
        let card: Card = serde_json::from_value(json!({
            "name": "Orders",
            "dataset_query": {"type": "native", "native": {"query": "SELECT 1"}}
        }))
        .unwrap();
        assert_eq!(card.native_sql(), Some("SELECT 1"));

        let gui: Card = serde_json::from_value(json!({
            "dataset_query": {"type": "query", "query": {"source-table": 4}}
        }))
        .unwrap();
        assert_eq!(gui.native_sql(), None);
    }

    #[test]
    fn test_dataset_request_shape() {
        let req = DatasetRequest {
            kind: "native",
            native: NativeQuery {
                query: "SELECT 1".into(),
                template_tags: BTreeMap::new(),
            },
            database: 12,
            parameters: vec![],
            constraints: Constraints::capped_at(25_000),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "native",
                "native": {"query": "SELECT 1", "template-tags": {}},
                "database": 12,
                "constraints": {"max-results": 25000, "max-results-bare-rows": 25000}
            })
        );
    }
}
