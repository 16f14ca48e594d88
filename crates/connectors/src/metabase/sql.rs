use crate::metabase::models::{ParameterPayload, TemplateTag};
use model::{page::PageWindow, query::QueryParameter};
use std::collections::BTreeMap;

/// Trims whitespace and trailing statement terminators.
pub fn strip_terminator(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Appends an offset/limit window. The newline keeps a trailing `--` comment
/// from swallowing the clause.
pub fn paginated_sql(sql: &str, window: PageWindow) -> String {
    format!(
        "{}\nLIMIT {} OFFSET {}",
        strip_terminator(sql),
        window.limit,
        window.offset
    )
}

pub fn count_sql(sql: &str) -> String {
    format!(
        "SELECT COUNT(*) AS total_rows FROM (\n{}\n) AS subquery",
        strip_terminator(sql)
    )
}

pub fn template_tags(params: &[QueryParameter]) -> BTreeMap<String, TemplateTag> {
    params
        .iter()
        .map(|p| {
            let kind = if p.value.is_number() { "number" } else { "text" };
            (
                p.name.clone(),
                TemplateTag {
                    name: p.name.clone(),
                    display_name: p.name.clone(),
                    kind,
                },
            )
        })
        .collect()
}

pub fn parameter_payloads(params: &[QueryParameter]) -> Vec<ParameterPayload> {
    params
        .iter()
        .map(|p| ParameterPayload {
            kind: "category",
            target: serde_json::json!(["variable", ["template-tag", p.name]]),
            value: p.value.clone(),
        })
        .collect()
}
