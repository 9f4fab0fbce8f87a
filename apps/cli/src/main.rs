//! Command line front end for the FIMS query compiler
//!
//! Usage:
//!   fims-query-cli parse '_expeditions_:[A, B] AND col2:value'
//!   fims-query-cli compile --config project.json --entity event 'col2 > 10'
//!   fims-query-cli project --config project.json --entity sample --parent event --records rows.json --bcid

mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fims_query::expression::split_list;
use fims_query::{collectors, parse, ProjectConfig, Query, QueryResult, Record};
use serde_json::{json, Value as JsonValue};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

use crate::settings::Settings;

#[derive(Parser, Debug)]
#[clap(name = "fims-query-cli", version)]
#[clap(about = "Parse and compile FIMS queries into parameterized PostgreSQL")]
struct Cli {
    /// Settings file (defaults to ./fims-query.toml when present)
    #[clap(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, global = true)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[clap(long, global = true)]
    log_json: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a query and print its expression tree
    Parse {
        query: String,
    },

    /// Compile a query against a project configuration
    Compile {
        /// Project configuration JSON
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Query entity concept alias
        #[clap(short, long)]
        entity: Option<String>,

        /// Only return records of public expeditions
        #[clap(long)]
        public: bool,

        /// Page number, starting at 0
        #[clap(long, requires = "limit")]
        page: Option<u32>,

        /// Page size
        #[clap(long)]
        limit: Option<u32>,

        query: String,
    },

    /// Project query rows into column keyed records
    Project {
        /// Project configuration JSON
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Entity the rows were selected for
        #[clap(short, long)]
        entity: Option<String>,

        /// Parent entity whose columns are merged in
        #[clap(long)]
        parent: Option<String>,

        /// JSON array of result rows
        #[clap(short, long)]
        records: PathBuf,

        /// Add a bcid column
        #[clap(long)]
        bcid: bool,

        /// Comma separated columns to keep
        #[clap(long)]
        source: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

fn report(error: &anyhow::Error) {
    match error.downcast_ref::<fims_query::Error>() {
        Some(query_error) => eprintln!("{}", query_error.payload()),
        None => eprintln!("Error: {:#}", error),
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = Settings::load(cli.settings.as_deref())?;
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    settings.log_json |= cli.log_json;
    settings.validate()?;

    let _guard = logging::init_logging(&settings)?;
    debug!(?settings, "Settings loaded");

    match cli.command {
        Command::Parse { query } => print_json(&parse_command(&query)?),
        Command::Compile {
            config,
            entity,
            public,
            page,
            limit,
            query,
        } => {
            let project = load_project(config.as_deref(), &settings)?;
            let entity = query_entity(&project, entity, &settings)?;
            let query = Query::new(&project, &entity, &query)?.with_paging(page, limit);
            let compiled = query.parameterized_query(public || settings.public_only)?;
            info!(entity = %entity, params = compiled.params.len(), "Query compiled");
            print_json(&serde_json::to_value(&compiled)?)
        }
        Command::Project {
            config,
            entity,
            parent,
            records,
            bcid,
            source,
        } => {
            let project = load_project(config.as_deref(), &settings)?;
            let entity = query_entity(&project, entity, &settings)?;
            let rows = project_records(&project, &entity, parent.as_deref(), &records, bcid, source)?;
            print_json(&rows)
        }
    }
}

fn parse_command(query: &str) -> Result<JsonValue> {
    let expression = parse(query)?;
    Ok(json!({
        "query": expression.to_string(),
        "expression": expression,
        "expeditions": collectors::expeditions(&expression),
        "projects": collectors::projects(&expression),
        "entities": collectors::entities(&expression),
    }))
}

fn load_project(path: Option<&Path>, settings: &Settings) -> Result<ProjectConfig> {
    let path = path
        .or(settings.project_config.as_deref())
        .context("No project configuration given, pass --config or set project_config")?;

    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read project configuration {}", path.display()))?;
    let project = ProjectConfig::from_json(&raw)?;
    debug!(
        project_id = project.project_id,
        entities = project.entities.len(),
        "Project configuration loaded"
    );
    Ok(project)
}

/// `--entity`, then the configured default, then the only entity of the project.
fn query_entity(
    project: &ProjectConfig,
    entity: Option<String>,
    settings: &Settings,
) -> Result<String> {
    if let Some(entity) = entity.or_else(|| settings.default_entity.clone()) {
        return Ok(entity);
    }
    match project.entities.as_slice() {
        [only] => Ok(only.concept_alias.clone()),
        _ => anyhow::bail!("Project has several entities, pass --entity"),
    }
}

fn project_records(
    project: &ProjectConfig,
    entity: &str,
    parent: Option<&str>,
    records_path: &Path,
    include_bcid: bool,
    source: Option<String>,
) -> Result<JsonValue> {
    let entity = project
        .entity(entity)
        .ok_or_else(|| fims_query::Error::UnknownEntity(entity.to_string()))?;

    let raw = fs::read_to_string(records_path)
        .with_context(|| format!("Failed to read records {}", records_path.display()))?;
    let rows: Vec<JsonValue> = serde_json::from_str(&raw)
        .with_context(|| format!("Records file {} is not a JSON array", records_path.display()))?;
    let records: Vec<Record> = rows
        .iter()
        .map(|row| Record::from_json(row, &entity.concept_alias))
        .collect();

    let result = match parent {
        Some(alias) => {
            let parent = project
                .entity(alias)
                .ok_or_else(|| fims_query::Error::UnknownEntity(alias.to_string()))?;
            QueryResult::with_parent(records, entity, parent)
        }
        None => QueryResult::new(records, entity),
    };
    result.ensure_records()?;

    let source: Vec<String> = source
        .as_deref()
        .map(split_list)
        .unwrap_or_default()
        .into_iter()
        .map(str::to_string)
        .collect();

    Ok(serde_json::to_value(result.get_with_source(include_bcid, &source))?)
}

fn print_json(value: &JsonValue) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn compile_arguments() {
        let cli = Cli::try_parse_from([
            "fims-query-cli",
            "compile",
            "--config",
            "project.json",
            "-e",
            "event",
            "--public",
            "--page",
            "2",
            "--limit",
            "10",
            "col2:value",
        ])
        .unwrap();

        match cli.command {
            Command::Compile {
                config,
                entity,
                public,
                page,
                limit,
                query,
            } => {
                assert_eq!(config, Some(PathBuf::from("project.json")));
                assert_eq!(entity.as_deref(), Some("event"));
                assert!(public);
                assert_eq!((page, limit), (Some(2), Some(10)));
                assert_eq!(query, "col2:value");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn page_requires_limit() {
        assert!(Cli::try_parse_from(["fims-query-cli", "compile", "--page", "1", "*"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["fims-query-cli", "parse", "*", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn parse_command_output() {
        let value = parse_command("_expeditions_:[A, B] AND sample.col1:x").unwrap();
        assert_eq!(value["query"], "_expeditions_:[A, B] AND sample.col1 = x");
        assert_eq!(value["expeditions"], json!(["A", "B"]));
        assert_eq!(value["entities"], json!(["sample"]));
        assert_eq!(value["expression"]["type"], "logical");
    }

    #[test]
    fn parse_errors_carry_the_query_code() {
        let error = parse_command("col:[1 TO").unwrap_err();
        let query_error = error.downcast_ref::<fims_query::Error>().unwrap();
        assert_eq!(query_error.code(), fims_query::QueryCode::InvalidQuery);
    }

    #[test]
    fn single_entity_project_needs_no_entity_flag() {
        let project = ProjectConfig::new(1, vec![fims_query::Entity::new("event")]);
        assert_eq!(
            query_entity(&project, None, &Settings::default()).unwrap(),
            "event"
        );

        let settings = Settings {
            default_entity: Some("sample".to_string()),
            ..Settings::default()
        };
        assert_eq!(query_entity(&project, None, &settings).unwrap(), "sample");
    }
}
