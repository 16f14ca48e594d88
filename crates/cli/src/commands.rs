use crate::{error::CliError, output::OutputFormat};
use clap::{ArgGroup, Args, Subcommand};
use connectors::{
    metabase::{MetabaseClient, MetabaseConfig, MetabaseQueryService, MetabaseSessionProvider},
    session::SessionProvider,
    upstream::QueryService,
};
use engine_config::{FetchOptions, FetchSettings};
use model::query::{DatabaseTarget, QueryParameter, QuerySpec, Team};
use std::{path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch the full result of a query
    Fetch {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        tuning: TuningArgs,

        #[arg(long, value_enum, default_value_t = OutputFormat::Json, help = "Output format")]
        format: OutputFormat,

        #[arg(
            long,
            help = "If specified, writes the result to this file instead of stdout"
        )]
        output: Option<PathBuf>,

        #[arg(
            long,
            requires = "output",
            help = "Appends the fetch start time to the output file name"
        )]
        timestamp: bool,

        #[arg(
            long,
            help = "Exit successfully even when some pages could not be fetched"
        )]
        allow_partial: bool,
    },
    /// Estimate the result size and print the plan a fetch would use
    Estimate {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        tuning: TuningArgs,
    },
}

#[derive(Args, Debug)]
pub struct ConnectionArgs {
    #[arg(long, env = "METABASE_URL", help = "Base URL of the Metabase instance")]
    pub url: String,

    #[arg(long, env = "METABASE_USERNAME", help = "Metabase login")]
    pub username: String,

    #[arg(
        long,
        env = "METABASE_PASSWORD",
        hide_env_values = true,
        help = "Metabase password"
    )]
    pub password: String,
}

impl ConnectionArgs {
    pub fn connect(
        &self,
    ) -> Result<(Arc<dyn SessionProvider>, Arc<dyn QueryService>), CliError> {
        let config = MetabaseConfig::new(&self.url, &self.username, &self.password);
        let client = MetabaseClient::new(config)?;
        Ok((
            Arc::new(MetabaseSessionProvider::new(client.clone())),
            Arc::new(MetabaseQueryService::new(client)),
        ))
    }
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["sql", "sql_file", "question"])
))]
pub struct QueryArgs {
    #[arg(long, help = "SQL text to run")]
    pub sql: Option<String>,

    #[arg(long, help = "Read the SQL text from this file")]
    pub sql_file: Option<PathBuf>,

    #[arg(long, help = "Saved question id")]
    pub question: Option<u64>,

    /// Query parameter as NAME=VALUE; VALUE is parsed as JSON when possible
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    #[arg(
        long,
        conflicts_with_all = ["database", "database_id"],
        help = "Team warehouse to query: growth, data or product"
    )]
    pub team: Option<Team>,

    #[arg(
        long,
        conflicts_with = "database_id",
        help = "Database display name"
    )]
    pub database: Option<String>,

    #[arg(long, help = "Database id")]
    pub database_id: Option<u64>,
}

impl QueryArgs {
    pub async fn to_spec(&self) -> Result<QuerySpec, CliError> {
        let database = match (self.team, &self.database, self.database_id) {
            (_, _, Some(id)) => DatabaseTarget::Id(id),
            (_, Some(name), _) => DatabaseTarget::Named(name.clone()),
            (Some(team), _, _) => DatabaseTarget::Team(team),
            _ => DatabaseTarget::default(),
        };

        let mut spec = if let Some(id) = self.question {
            QuerySpec::saved_question(id, database)
        } else if let Some(path) = &self.sql_file {
            QuerySpec::native(tokio::fs::read_to_string(path).await?, database)
        } else if let Some(sql) = &self.sql {
            QuerySpec::native(sql.clone(), database)
        } else {
            return Err(CliError::InvalidArgument(
                "one of --sql, --sql-file or --question is required".to_string(),
            ));
        };

        for raw in &self.params {
            spec = spec.with_parameter(parse_param(raw)?);
        }
        Ok(spec)
    }
}

fn parse_param(raw: &str) -> Result<QueryParameter, CliError> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| CliError::InvalidArgument(format!("expected NAME=VALUE, got '{raw}'")))?;

    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidArgument(format!("missing parameter name in '{raw}'")));
    }

    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok(QueryParameter::new(name, value))
}

#[derive(Args, Debug)]
pub struct TuningArgs {
    #[arg(long, help = "JSON settings file; flags override its values")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Strategy: auto, single, sequential or parallel")]
    pub strategy: Option<String>,

    #[arg(long, help = "Rows per page")]
    pub page_size: Option<u64>,

    #[arg(long, help = "Parallel worker count")]
    pub workers: Option<usize>,

    #[arg(long, help = "Retries per page after the first attempt")]
    pub retries: Option<u32>,

    #[arg(long, help = "Timeout for a single page fetch")]
    pub page_timeout_secs: Option<u64>,

    #[arg(long, help = "Timeout for the whole operation")]
    pub timeout_secs: Option<u64>,
}

impl TuningArgs {
    pub fn to_options(&self, cancel: CancellationToken) -> Result<FetchOptions, CliError> {
        let mut settings = match &self.config {
            Some(path) => FetchSettings::load(path)?,
            None => FetchSettings::default(),
        };

        if let Some(strategy) = &self.strategy {
            settings.strategy = strategy.clone();
        }
        if let Some(page_size) = self.page_size {
            settings.page_size = Some(page_size);
        }
        if let Some(workers) = self.workers {
            settings.workers = workers;
        }
        if let Some(retries) = self.retries {
            settings.retries = retries;
        }
        if let Some(secs) = self.page_timeout_secs {
            settings.page_timeout_secs = secs;
        }
        if let Some(secs) = self.timeout_secs {
            settings.timeout_secs = Some(secs);
        }

        Ok(settings.into_options(cancel)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::query::QuerySource;
    use serde_json::json;

    #[test]
    fn test_param_values_are_json_when_possible() {
        let p = parse_param("limit=10").unwrap();
        assert_eq!(p.name, "limit");
        assert_eq!(p.value, json!(10));

        let p = parse_param("city=Cairo").unwrap();
        assert_eq!(p.value, json!("Cairo"));

        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=1").is_err());
    }

    #[tokio::test]
    async fn test_database_flags_take_precedence_over_team() {
        let args = QueryArgs {
            sql: Some("SELECT 1".into()),
            sql_file: None,
            question: None,
            params: vec!["day='2024-01-01'".into()],
            team: None,
            database: Some("Analytics".into()),
            database_id: None,
        };

        let spec = args.to_spec().await.unwrap();
        assert_eq!(spec.database, DatabaseTarget::Named("Analytics".into()));
        assert!(matches!(spec.source, QuerySource::Native { .. }));
        assert_eq!(spec.source.parameters().len(), 1);
    }

    #[test]
    fn test_flags_override_defaults() {
        let tuning = TuningArgs {
            config: None,
            strategy: Some("parallel".into()),
            page_size: Some(500),
            workers: Some(3),
            retries: Some(1),
            page_timeout_secs: None,
            timeout_secs: Some(90),
        };

        let options = tuning.to_options(CancellationToken::new()).unwrap();
        assert_eq!(options.workers, 3);
        assert_eq!(options.max_retries, 1);
        assert_eq!(options.page_size, Some(500));
        assert_eq!(options.overall_timeout, Some(std::time::Duration::from_secs(90)));
    }
}
