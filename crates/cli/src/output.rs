use crate::error::CliError;
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use model::outcome::FetchOutcome;
use serde_json::Value;
use std::{
    io::Write,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// The full outcome, including gap and timing information
    Json,
    /// Rows only, with a header line
    Csv,
}

fn render(outcome: &FetchOutcome, format: OutputFormat) -> Result<Vec<u8>, CliError> {
    match format {
        OutputFormat::Json => {
            let mut json = serde_json::to_vec_pretty(outcome)?;
            json.push(b'\n');
            Ok(json)
        }
        OutputFormat::Csv => render_csv(outcome),
    }
}

fn render_csv(outcome: &FetchOutcome) -> Result<Vec<u8>, CliError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(outcome.column_names())?;
    for row in &outcome.rows {
        writer.write_record(row.iter().map(csv_field))?;
    }
    writer
        .into_inner()
        .map_err(|err| CliError::Io(err.into_error()))
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `exports/events.csv` becomes `exports/events_20261017T093000Z.csv`.
pub fn timestamped_path(path: &Path, at: DateTime<Utc>) -> PathBuf {
    let stamp = at.format("%Y%m%dT%H%M%SZ");
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{stamp}"),
    };
    path.with_file_name(name)
}

pub async fn write_outcome(
    outcome: &FetchOutcome,
    format: OutputFormat,
    path: &Path,
) -> Result<(), CliError> {
    let bytes = render(outcome, format)?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

pub fn print_outcome(outcome: &FetchOutcome, format: OutputFormat) -> Result<(), CliError> {
    let bytes = render(outcome, format)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(())
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
