use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

/// A named parameter bound to a native query template tag or a saved question filter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryParameter {
    pub name: String,
    pub value: serde_json::Value,
}

impl QueryParameter {
    pub fn new(name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// What to run upstream.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuerySource {
    /// Raw SQL text executed as a native query.
    Native {
        sql: String,
        #[serde(default)]
        parameters: Vec<QueryParameter>,
    },

    /// A saved question (card) stored on the upstream service.
    SavedQuestion {
        id: u64,
        #[serde(default)]
        parameters: Vec<QueryParameter>,
    },
}

impl QuerySource {
    pub fn parameters(&self) -> &[QueryParameter] {
        match self {
            QuerySource::Native { parameters, .. } => parameters,
            QuerySource::SavedQuestion { parameters, .. } => parameters,
        }
    }
}

/// Team whose warehouse connection a query runs against.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Growth,
    Data,
    Product,
}

#[derive(Debug, Error)]
#[error("Invalid team '{0}'. Choose from: growth, data, product")]
pub struct InvalidTeam(pub String);

impl Team {
    pub const ALL: [Team; 3] = [Team::Growth, Team::Data, Team::Product];

    /// Display name of the team's database on the upstream service.
    pub fn database_name(&self) -> &'static str {
        match self {
            Team::Growth => "Growth Team Clickhouse Connection",
            Team::Data => "Data Team Clickhouse Connection",
            Team::Product => "Product Team Clickhouse Connection",
        }
    }
}

impl FromStr for Team {
    type Err = InvalidTeam;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "growth" => Ok(Team::Growth),
            "data" => Ok(Team::Data),
            "product" => Ok(Team::Product),
            other => Err(InvalidTeam(other.to_string())),
        }
    }
}

impl Display for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Team::Growth => write!(f, "growth"),
            Team::Data => write!(f, "data"),
            Team::Product => write!(f, "product"),
        }
    }
}

/// Which upstream database a query targets.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseTarget {
    Team(Team),
    Named(String),
    Id(u64),
}

impl DatabaseTarget {
    /// Name used to look the database up, if it is not already identified by id.
    pub fn lookup_name(&self) -> Option<&str> {
        match self {
            DatabaseTarget::Team(team) => Some(team.database_name()),
            DatabaseTarget::Named(name) => Some(name),
            DatabaseTarget::Id(_) => None,
        }
    }
}

impl Default for DatabaseTarget {
    fn default() -> Self {
        DatabaseTarget::Team(Team::Growth)
    }
}

impl Display for DatabaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseTarget::Team(team) => write!(f, "team:{team}"),
            DatabaseTarget::Named(name) => write!(f, "database:{name}"),
            DatabaseTarget::Id(id) => write!(f, "database#{id}"),
        }
    }
}

/// Immutable identity of one query against one database.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub source: QuerySource,
    pub database: DatabaseTarget,
}

impl QuerySpec {
    pub fn native(sql: impl Into<String>, database: DatabaseTarget) -> Self {
        Self {
            source: QuerySource::Native {
                sql: sql.into(),
                parameters: Vec::new(),
            },
            database,
        }
    }

    pub fn saved_question(id: u64, database: DatabaseTarget) -> Self {
        Self {
            source: QuerySource::SavedQuestion {
                id,
                parameters: Vec::new(),
            },
            database,
        }
    }

    pub fn with_parameter(mut self, param: QueryParameter) -> Self {
        match &mut self.source {
            QuerySource::Native { parameters, .. } => parameters.push(param),
            QuerySource::SavedQuestion { parameters, .. } => parameters.push(param),
        }
        self
    }

    /// Native SQL text, when the query is not an opaque saved question.
    pub fn sql(&self) -> Option<&str> {
        match &self.source {
            QuerySource::Native { sql, .. } => Some(sql),
            QuerySource::SavedQuestion { .. } => None,
        }
    }

    /// Short label for logs; never includes the full SQL text.
    pub fn label(&self) -> String {
        match &self.source {
            QuerySource::Native { sql, .. } => {
                let flat = sql.split_whitespace().collect::<Vec<_>>().join(" ");
                if flat.chars().count() > 60 {
                    format!("{}...", flat.chars().take(60).collect::<String>())
                } else {
                    flat
                }
            }
            QuerySource::SavedQuestion { id, .. } => format!("question #{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_parsing_is_case_insensitive() {
        assert_eq!("Growth".parse::<Team>().unwrap(), Team::Growth);
        assert_eq!(" product ".parse::<Team>().unwrap(), Team::Product);
        let err = "marketing".parse::<Team>().unwrap_err();
        assert!(err.to_string().contains("growth, data, product"));
    }

    #[test]
    fn test_team_database_names() {
        assert_eq!(
            DatabaseTarget::Team(Team::Data).lookup_name(),
            Some("Data Team Clickhouse Connection")
        );
        assert_eq!(DatabaseTarget::Id(7).lookup_name(), None);
    }

    #[test]
    fn test_label_truncates_long_sql() {
        let sql = format!("SELECT {} FROM t", "col, ".repeat(40));
        let spec = QuerySpec::native(sql, DatabaseTarget::default());
        let label = spec.label();
        assert!(label.ends_with("..."));
        assert_eq!(label.chars().count(), 63);
    }

    #[test]
    fn test_parameters_are_attached_to_source() {
        let spec = QuerySpec::saved_question(3132, DatabaseTarget::default())
            .with_parameter(QueryParameter::new("city_id", 5));
        assert_eq!(spec.source.parameters().len(), 1);
        assert!(spec.sql().is_none());
    }

    #[test]
    fn test_query_source_serde_tagging() {
        let json = r#"{"kind":"native","sql":"SELECT 1"}"#;
        let source: QuerySource = serde_json::from_str(json).unwrap();
        assert_eq!(
            source,
            QuerySource::Native {
                sql: "SELECT 1".to_string(),
                parameters: vec![]
            }
        );
    }
}
