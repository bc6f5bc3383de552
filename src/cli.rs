use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Upload a CSV file, map its columns to named fields, and replay it", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Store a CSV upload and show a preview with the expected fields to map
    Upload(UploadArgs),
    /// Submit a column mapping and write the upload back out by field name
    Map(MapArgs),
    /// Flatten nested JSON parameters into bracketed path=value pairs
    Flatten(FlattenArgs),
}

#[derive(Debug, Args)]
pub struct WorkflowArgs {
    /// Directory holding stored uploads
    #[arg(long = "store")]
    pub store: PathBuf,
    /// Session file carrying the upload between commands
    #[arg(long = "session")]
    pub session: PathBuf,
    /// Account identifier used in storage keys
    #[arg(long, default_value = "local")]
    pub account: String,
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Expected field names (overrides `expected_fields` from the config)
    #[arg(short = 'E', long = "expected", value_delimiter = ',')]
    pub expected: Vec<String>,
    /// JSON file with request parameters
    #[arg(short, long)]
    pub params: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// CSV file to upload
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    #[command(flatten)]
    pub workflow: WorkflowArgs,
}

#[derive(Debug, Args)]
pub struct MapArgs {
    /// Column mapping entries of the form `column=field` (both 1-based)
    #[arg(short = 'f', long = "field", action = clap::ArgAction::Append)]
    pub fields: Vec<String>,
    /// Treat the first record as a header and do not emit it
    #[arg(long = "skip-first-row")]
    pub skip_first_row: bool,
    /// Emit the source record number as the first column
    #[arg(long = "row-numbers")]
    pub row_numbers: bool,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    #[command(flatten)]
    pub workflow: WorkflowArgs,
}

#[derive(Debug, Args)]
pub struct FlattenArgs {
    /// JSON file with request parameters
    #[arg(short, long)]
    pub params: PathBuf,
    /// Only flatten this top-level parameter group
    #[arg(long)]
    pub only: Option<String>,
}

/// Splits a `column=field` mapping entry.
pub fn parse_field_assignment(raw: &str) -> Result<(String, String), String> {
    let (column, field) = raw
        .split_once('=')
        .ok_or_else(|| format!("Mapping entry '{raw}' must look like column=field"))?;
    let column = column.trim();
    if column.is_empty() {
        return Err(format!("Mapping entry '{raw}' is missing a column"));
    }
    Ok((column.to_string(), field.trim().to_string()))
}
