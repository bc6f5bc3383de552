pub mod cli;
pub mod config;
pub mod error;
pub mod io_utils;
pub mod mapping;
pub mod params;
pub mod session;
pub mod storage;
pub mod table;
pub mod workflow;

use std::{env, fs, path::Path, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use itertools::Itertools;
use log::{LevelFilter, debug, info};
use serde_json::{Map, Value};

use crate::{
    cli::{Cli, Commands, FlattenArgs, MapArgs, UploadArgs, WorkflowArgs},
    config::MapFieldsConfig,
    params::Params,
    session::JsonFileSession,
    storage::FsStorage,
    workflow::{ExpectedFields, MapFields, MapFieldsOutcome, MapFieldsRequest, UploadedFile},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_map_fields", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Upload(args) => handle_upload(&args),
        Commands::Map(args) => handle_map(&args),
        Commands::Flatten(args) => handle_flatten(&args),
    }
}

fn load_config(args: &WorkflowArgs) -> Result<MapFieldsConfig> {
    let mut config = match &args.config {
        Some(path) => MapFieldsConfig::load(path)?,
        None => MapFieldsConfig::default(),
    };
    if !args.expected.is_empty() {
        config.expected_fields = args
            .expected
            .iter()
            .map(|field| field.trim().to_string())
            .filter(|field| !field.is_empty())
            .collect();
    }
    Ok(config)
}

fn load_params(path: Option<&Path>) -> Result<Params> {
    let Some(path) = path else {
        return Ok(Params::new());
    };
    let raw =
        fs::read_to_string(path).with_context(|| format!("Opening parameters file {path:?}"))?;
    match serde_json::from_str::<Value>(&raw)
        .with_context(|| format!("Parsing parameters file {path:?}"))?
    {
        Value::Object(map) => Ok(map),
        other => bail!("Parameters in {path:?} must be a JSON object, found {other}"),
    }
}

fn build_workflow(args: &WorkflowArgs, action: &str) -> Result<MapFields<FsStorage>> {
    let config = load_config(args)?;
    if !config.handles(action) {
        bail!("The mapping workflow is not registered for '{action}'");
    }
    let expected = ExpectedFields::fixed(config.expected_fields.clone());
    debug!("Expected fields: {}", config.expected_fields.iter().join(", "));
    MapFields::new(config, expected, FsStorage::new(&args.store))
}

fn handle_upload(args: &UploadArgs) -> Result<()> {
    let workflow = build_workflow(&args.workflow, "upload")?;
    let content =
        fs::read(&args.input).with_context(|| format!("Reading upload {:?}", args.input))?;
    let file_name = args
        .input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.csv".to_string());
    let request = MapFieldsRequest::new(args.workflow.account.clone())
        .with_params(load_params(args.workflow.params.as_deref())?)
        .with_file(
            workflow.config().file_field.clone(),
            UploadedFile::new(file_name, content),
        );

    let mut session = JsonFileSession::new(&args.workflow.session);
    let mut outcome = workflow.before_action(&mut session, &request)?;
    outcome.fields_mapped()?;
    print_mapping_form(&outcome);
    info!(
        "Stored {:?} as {}",
        args.input,
        outcome.storage_key().unwrap_or_default()
    );
    workflow.after_action(&mut session, &mut outcome)?;
    Ok(())
}

fn print_mapping_form(outcome: &MapFieldsOutcome) {
    print!("{}", table::preview_table(outcome.rows()).render());
    if !outcome.fields().is_empty() {
        println!();
        print!("{}", table::fields_table(outcome.fields()).render());
    }
    for pair in outcome.parameters() {
        println!("{}={}", pair.path, pair.value_text());
    }
}

fn handle_map(args: &MapArgs) -> Result<()> {
    let workflow = build_workflow(&args.workflow, "map")?;
    let mut params = load_params(args.workflow.params.as_deref())?;
    if !args.fields.is_empty() {
        let mut group = Map::new();
        for raw in &args.fields {
            let (column, field) = cli::parse_field_assignment(raw).map_err(|err| anyhow!(err))?;
            group.insert(column, Value::String(field));
        }
        params.insert(workflow.config().fields_param.clone(), Value::Object(group));
    }
    let request = MapFieldsRequest::new(args.workflow.account.clone()).with_params(params);

    let mut session = JsonFileSession::new(&args.workflow.session);
    let mut outcome = workflow.before_action(&mut session, &request)?;
    // a failed write leaves the upload and session in place for another attempt
    let rows = write_mapped_rows(&workflow, &outcome, args)?;
    workflow.after_action(&mut session, &mut outcome)?;

    let destination = args
        .output
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "stdout".to_string());
    info!("Wrote {rows} mapped row(s) -> {destination}");
    Ok(())
}

fn write_mapped_rows(
    workflow: &MapFields<FsStorage>,
    outcome: &MapFieldsOutcome,
    args: &MapArgs,
) -> Result<usize> {
    let mapper = workflow.mapper(outcome, args.skip_first_row)?;
    if mapper.mapping().is_empty() {
        bail!("No columns were mapped to expected fields");
    }
    let mut writer = io_utils::open_csv_writer(args.output.as_deref())?;

    let mut headers = Vec::with_capacity(mapper.mapping().len() + 1);
    if args.row_numbers {
        headers.push("row".to_string());
    }
    headers.extend(mapper.mapping().columns().map(|column| {
        column
            .text
            .clone()
            .unwrap_or_else(|| format!("field_{}", column.field_index + 1))
    }));
    writer
        .write_record(&headers)
        .context("Writing output headers")?;

    let mut written = 0usize;
    for row in mapper.rows()? {
        let row = row?;
        let mut record = Vec::with_capacity(headers.len());
        if args.row_numbers {
            record.push(row.number().to_string());
        }
        record.extend(
            row.named_values()
                .map(|(_, _, value)| value.unwrap_or_default().to_string()),
        );
        writer
            .write_record(&record)
            .with_context(|| format!("Writing output row {}", row.number()))?;
        written += 1;
    }
    writer.flush().context("Flushing output writer")?;
    Ok(written)
}

fn handle_flatten(args: &FlattenArgs) -> Result<()> {
    let params = load_params(Some(&args.params))?;
    let pairs = params::flatten(&params, args.only.as_deref());
    for pair in &pairs {
        println!("{}={}", pair.path, pair.value_text());
    }
    info!("Flattened {} parameter(s) from {:?}", pairs.len(), args.params);
    Ok(())
}
