//! qshape CLI: validate, explain and run YAML query definitions.

use clap::{Parser, Subcommand};
use qshape_core::config::CompilerConfig;
use qshape_core::id::ContextType;
use qshape_core::model::{DataType, EntityType};
use qshape_core::params::{ParameterValue, ParameterValues};
use qshape_exec::{Database, MemoryDocumentStore};
use qshape_planner::dsl::{parse_yaml_query, ParsedQuery, QueryConfigDef};
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONTEXT: &str = "QueryContext";

#[derive(Parser)]
#[command(name = "qshape")]
#[command(about = "Compile and run shaped document-store queries", long_about = None)]
struct Cli {
    /// Log compilation and execution at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query definition and compile it
    Validate {
        /// Path to the query YAML file
        #[arg(short, long)]
        query: PathBuf,
    },

    /// Show the compiled plan and, with parameters, the command it sends
    Explain {
        /// Path to the query YAML file
        #[arg(short, long)]
        query: PathBuf,

        /// Parameter binding as name=value (JSON values; arrays bind collections)
        #[arg(short, long = "param")]
        params: Vec<String>,
    },

    /// Execute a query against documents loaded into memory
    Run {
        /// Path to the query YAML file
        #[arg(short, long)]
        query: PathBuf,

        /// Documents for an entity type as Entity=path (.jsonl or .csv)
        #[arg(short, long)]
        data: Vec<String>,

        /// Parameter binding as name=value (JSON values; arrays bind collections)
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Tracking behavior (overrides config)
        #[arg(long)]
        tracking: Option<String>,

        /// Partition key (overrides config)
        #[arg(long)]
        partition_key: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Validate { query } => {
            if let Err(e) = validate_query(&query) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Query is valid");
        }
        Commands::Explain { query, params } => {
            if let Err(e) = explain_query(&query, &params) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Run {
            query,
            data,
            params,
            tracking,
            partition_key,
        } => {
            let overrides = QueryConfigDef {
                tracking,
                partition_key,
                ..Default::default()
            };
            if let Err(e) = run_query(&query, &data, &params, &overrides) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_query(path: &Path) -> Result<ParsedQuery, Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(path)?;
    Ok(parse_yaml_query(&yaml_content)?)
}

fn open_database(
    parsed: &ParsedQuery,
    overrides: &QueryConfigDef,
    store: &MemoryDocumentStore,
) -> Result<Database, Box<dyn std::error::Error>> {
    let config = build_config(&parsed.config, overrides)?;
    let context = parsed
        .config
        .context
        .clone()
        .unwrap_or_else(|| DEFAULT_CONTEXT.to_string());
    Ok(Database::new(
        ContextType::new(context),
        parsed.model.clone(),
        config,
        Arc::new(store.clone()),
    )?)
}

fn validate_query(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_query(path)?;
    let db = open_database(&parsed, &QueryConfigDef::default(), &MemoryDocumentStore::new())?;
    db.compile(&parsed.shaped)?;
    Ok(())
}

fn explain_query(path: &Path, params: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_query(path)?;
    let db = open_database(&parsed, &QueryConfigDef::default(), &MemoryDocumentStore::new())?;
    let plan = db.compile(&parsed.shaped)?;

    println!("Compiled Plan");
    println!("=============");
    println!();
    println!("Context: {}", db.context_type());
    println!("Tracking: {:?}", db.config().tracking_behavior);
    println!("Plan: {}", plan.describe());
    println!();
    println!("Lifted constants:");
    for slot in plan.constants.slots() {
        println!("  {}: {} <- {:?}", slot.name, slot.declared, slot.resolution);
    }

    if !params.is_empty() {
        let values = parse_params(params)?;
        let results = db
            .session()
            .execute_plan::<serde_json::Value>(&plan, values)?;
        println!();
        println!("Command:");
        println!("  {}", results.command_text()?);
        let bound = results.bound_parameters()?;
        if !bound.is_empty() && db.config().sensitive_data_logging {
            for (name, value) in bound {
                println!("  @{} = {}", name, value);
            }
        }
    }
    Ok(())
}

fn run_query(
    path: &Path,
    data: &[String],
    params: &[String],
    overrides: &QueryConfigDef,
) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load_query(path)?;
    let store = MemoryDocumentStore::new();
    for source in data {
        let (entity, file) = source
            .split_once('=')
            .ok_or_else(|| format!("--data expects Entity=path, got '{}'", source))?;
        let et = parsed.model.entity_type(entity)?;
        let n = load_documents(&store, et, Path::new(file))?;
        tracing::info!(entity, file, documents = n, "loaded documents");
    }

    let db = open_database(&parsed, overrides, &store)?;
    let session = db.session();
    let results = session.query::<serde_json::Value>(&parsed.shaped, parse_params(params)?)?;

    let mut count = 0usize;
    for row in results.iter() {
        println!("{}", serde_json::to_string(&row?)?);
        count += 1;
    }
    eprintln!("✓ {} result(s)", count);
    Ok(())
}

fn build_config(
    doc: &QueryConfigDef,
    overrides: &QueryConfigDef,
) -> Result<CompilerConfig, Box<dyn std::error::Error>> {
    let mut config = CompilerConfig::from_env();
    doc.apply(&mut config)?;
    overrides.apply(&mut config)?;
    Ok(config)
}

fn parse_params(raw: &[String]) -> Result<ParameterValues, Box<dyn std::error::Error>> {
    let mut values = ParameterValues::new();
    for p in raw {
        let (name, value) = p
            .split_once('=')
            .ok_or_else(|| format!("--param expects name=value, got '{}'", p))?;
        let json = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        values.insert(name.trim(), ParameterValue::from_json(&json));
    }
    Ok(values)
}

fn load_documents(
    store: &MemoryDocumentStore,
    entity_type: &EntityType,
    path: &Path,
) -> Result<usize, Box<dyn std::error::Error>> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => {
            let mut reader = csv::Reader::from_path(path)?;
            let headers = reader.headers()?.clone();
            let mut n = 0;
            for record in reader.records() {
                let record = record?;
                let mut doc = serde_json::Map::new();
                for (header, cell) in headers.iter().zip(record.iter()) {
                    let (json_name, value) = csv_cell(entity_type, header, cell)?;
                    doc.insert(json_name, value);
                }
                store.insert_entity(entity_type, serde_json::Value::Object(doc))?;
                n += 1;
            }
            Ok(n)
        }
        _ => {
            let file = fs::File::open(path)?;
            Ok(store.load_json_lines(entity_type, BufReader::new(file))?)
        }
    }
}

/// Convert one CSV cell to the property's JSON form; empty cells are null.
fn csv_cell(
    entity_type: &EntityType,
    header: &str,
    cell: &str,
) -> Result<(String, serde_json::Value), Box<dyn std::error::Error>> {
    let Some(p) = entity_type
        .properties
        .iter()
        .find(|p| p.name == header || p.json_name == header)
    else {
        return Ok((header.to_string(), serde_json::Value::String(cell.to_string())));
    };
    if cell.is_empty() {
        return Ok((p.json_name.clone(), serde_json::Value::Null));
    }
    let bad = || format!("column '{}' value '{}' is not a {:?}", header, cell, p.data_type);
    let value = match p.data_type {
        DataType::Boolean => serde_json::Value::Bool(cell.parse().map_err(|_| bad())?),
        DataType::Int32 | DataType::Int64 | DataType::Date64 => {
            serde_json::Value::from(cell.parse::<i64>().map_err(|_| bad())?)
        }
        DataType::Float32 | DataType::Float64 | DataType::Decimal128 => {
            serde_json::Value::from(cell.parse::<f64>().map_err(|_| bad())?)
        }
        DataType::Utf8 => serde_json::Value::String(cell.to_string()),
        DataType::Binary | DataType::Object => {
            serde_json::from_str(cell).map_err(|_| bad())?
        }
    };
    Ok((p.json_name.clone(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshape_core::config::QueryTrackingBehavior;
    use qshape_core::model::Property;
    use qshape_core::types::Scalar;

    #[test]
    fn query_config_overrides_env_defaults() {
        let doc = QueryConfigDef {
            tracking: Some("no_tracking".into()),
            partition_key: Some("eu".into()),
            ..Default::default()
        };
        let config = build_config(&doc, &QueryConfigDef::default()).unwrap();
        assert_eq!(config.tracking_behavior, QueryTrackingBehavior::NoTracking);
        assert_eq!(config.partition_key.as_deref(), Some("eu"));
    }

    #[test]
    fn cli_overrides_higher_priority_than_config() {
        let doc = QueryConfigDef {
            partition_key: Some("eu".into()),
            ..Default::default()
        };
        let cli = QueryConfigDef {
            partition_key: Some("us".into()),
            ..Default::default()
        };
        let config = build_config(&doc, &cli).unwrap();
        assert_eq!(config.partition_key.as_deref(), Some("us"));
    }

    #[test]
    fn params_parse_json_with_string_fallback() {
        let values = parse_params(&[
            "ids=[1,2]".to_string(),
            "name=Ann".to_string(),
            "n=3".to_string(),
        ])
        .unwrap();
        assert_eq!(
            values.get("ids").unwrap(),
            &ParameterValue::Collection(vec![Scalar::I32(1), Scalar::I32(2)])
        );
        assert_eq!(values.scalar("name").unwrap(), &Scalar::Str("Ann".into()));
        assert_eq!(values.scalar("n").unwrap(), &Scalar::I32(3));
        assert!(parse_params(&["oops".to_string()]).is_err());
    }

    #[test]
    fn csv_cells_follow_property_types() {
        let et = EntityType::new("Customer", "Customers")
            .with_property(Property::new("Id", DataType::Int32, false).with_json_name("id"))
            .with_property(Property::new("Name", DataType::Utf8, true));
        assert_eq!(
            csv_cell(&et, "Id", "7").unwrap(),
            ("id".to_string(), serde_json::json!(7))
        );
        assert_eq!(
            csv_cell(&et, "Name", "").unwrap(),
            ("Name".to_string(), serde_json::Value::Null)
        );
        assert!(csv_cell(&et, "Id", "x").is_err());
    }
}
