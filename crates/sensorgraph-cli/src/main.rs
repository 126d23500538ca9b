//! Sensorgraph CLI
//!
//! Offline tooling around the catalog core:
//! - Inspecting the entity catalog
//! - Compiling filters and topics, printing what they turn into
//! - Replaying change events against a store snapshot and a subscription set

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use sensorgraph_pubsub::{EngineConfig, TopicCompiler};
use sensorgraph_query::{MemoryStore, PredicateCompiler, QueryExecutor, QueryOptions};
use sensorgraph_schema::{sensor_things, FilterNode, PropertyStrategy, Registry};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod replay;

#[derive(Parser)]
#[command(name = "sensorgraph")]
#[command(author, version, about = "Sensorgraph: SensorThings catalog, filters, and subscriptions")]
struct Cli {
    /// Engine configuration (JSON). Missing fields take their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List entity types, their properties, and relations.
    Catalog {
        /// Only show this entity type
        #[arg(long)]
        entity: Option<String>,
    },

    /// Compile a filter tree (JSON) against a root entity type.
    Compile {
        /// Root entity type, e.g. `Datastream`
        #[arg(long)]
        root: String,
        /// Filter JSON file (`-` for stdin)
        #[arg(long)]
        filter: PathBuf,
        /// Also evaluate the predicate against this store snapshot
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Compile a subscription topic.
    Topic {
        /// Topic path, e.g. `v1.1/Things(52)/Locations`
        topic: String,
    },

    /// Print the related-collections snapshot of one entity.
    Related {
        /// Store snapshot (JSON)
        #[arg(long)]
        store: PathBuf,
        /// Entity type
        #[arg(long)]
        entity: String,
        /// Storage key
        #[arg(long)]
        key: u32,
    },

    /// Match change events against subscriptions over a store snapshot.
    Replay {
        /// Store snapshot (JSON)
        #[arg(long)]
        store: PathBuf,
        /// Subscription requests (JSON array)
        #[arg(long)]
        subscriptions: PathBuf,
        /// Change events (JSON array)
        #[arg(long)]
        events: PathBuf,
        /// Emit machine-readable JSON instead of a listing
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let registry = sensor_things();

    match cli.command {
        Commands::Catalog { entity } => cmd_catalog(&registry, entity.as_deref()),
        Commands::Compile {
            root,
            filter,
            store,
        } => cmd_compile(&registry, &config, &root, &filter, store.as_deref()),
        Commands::Topic { topic } => cmd_topic(&registry, &config, &topic),
        Commands::Related { store, entity, key } => cmd_related(&registry, &store, &entity, key),
        Commands::Replay {
            store,
            subscriptions,
            events,
            json,
        } => {
            let inputs = replay::ReplayInputs::load(&registry, &store, &subscriptions, &events)?;
            let outcomes = replay::run(registry, config, inputs)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcomes)?);
            } else {
                replay::print(&outcomes);
            }
            Ok(())
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

pub(crate) fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

pub(crate) fn load_store(registry: &Registry, path: &Path) -> Result<MemoryStore> {
    let text = read_input(path)?;
    MemoryStore::from_json(&text, registry)
        .with_context(|| format!("loading store {}", path.display()))
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_catalog(registry: &Registry, only: Option<&str>) -> Result<()> {
    if let Some(name) = only {
        if registry.entity(name).is_none() {
            return Err(anyhow!("unknown entity type `{name}`"));
        }
    }
    for ty in registry.types() {
        if only.is_some_and(|name| name != ty.name) {
            continue;
        }
        let set = if registry.is_addressable(&ty.name) {
            ty.set_name.normal()
        } else {
            "(internal)".dimmed()
        };
        println!("{} {} table={}", ty.name.green().bold(), set, ty.table);
        for property in ty.properties().iter().filter(|p| !p.is_relation_flag()) {
            let storage = match &property.strategy {
                PropertyStrategy::Direct { columns } => columns.join(", "),
                PropertyStrategy::Computed(rule) => format!("computed {rule:?}"),
                PropertyStrategy::RelationFlag { relation } => format!("flag {relation}"),
            };
            println!(
                "  {:<20} {:<9} {}",
                property.name,
                property.kind.to_string(),
                storage.dimmed()
            );
        }
        for relation in ty.relations() {
            println!(
                "  {} {:<18} -> {} ({:?})",
                "rel".cyan(),
                relation.name,
                relation.target,
                relation.cardinality
            );
        }
    }
    Ok(())
}

fn cmd_compile(
    registry: &Registry,
    config: &EngineConfig,
    root: &str,
    filter_path: &Path,
    store_path: Option<&Path>,
) -> Result<()> {
    let text = read_input(filter_path)?;
    let filter: FilterNode = serde_json::from_str(&text)
        .with_context(|| format!("parsing filter {}", filter_path.display()))?;
    let compiler = PredicateCompiler::with_config(registry, &config.compiler);
    let compiled = compiler.compile(root, &filter)?;

    println!("{} {}", "Compiled".green().bold(), compiled);
    println!(
        "  {} subquer{}",
        compiled.predicate.subquery_count(),
        if compiled.predicate.subquery_count() == 1 { "y" } else { "ies" }
    );

    if let Some(path) = store_path {
        let store = load_store(registry, path)?;
        let rows = store.find_all(&compiled, &QueryOptions::default())?;
        let keys: Vec<String> = rows.iter().map(|(key, _)| key.to_string()).collect();
        println!(
            "{} {} row(s): {}",
            "Matched".green().bold(),
            rows.len(),
            keys.join(", ")
        );
    }
    Ok(())
}

fn cmd_topic(registry: &Registry, config: &EngineConfig, topic: &str) -> Result<()> {
    let pattern = TopicCompiler::new(registry, &config.topic_prefixes).compile(topic)?;
    println!("{} {}", "Topic".green().bold(), pattern);
    println!("  wanted type: {}", pattern.wanted_type());
    if let Some(property) = pattern.property() {
        println!("  property:    {property}");
    }
    Ok(())
}

fn cmd_related(registry: &Registry, store_path: &Path, entity: &str, key: u32) -> Result<()> {
    let store = load_store(registry, store_path)?;
    let related = store.related_collections(registry, entity, key)?;
    println!("{} {}({})", "Related".green().bold(), entity, key);
    for (set, ids) in &related {
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        println!("  {:<22} [{}]", set, ids.join(", "));
    }
    Ok(())
}
