use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use rustmutant::definition::{DefinitionId, DefinitionSet, DefinitionStore};
use rustmutant::kinds::KindRegistry;
use rustmutant::models::ModelRegistry;
use rustmutant::shape::{Layout, ShapeContext, checksum};
use rustmutant::state::MemoryStateHandler;
use rustmutant::{SchemaEngine, fixtures, sync};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rustmutant")]
#[command(about = "Inspect runtime type definitions stored as JSON")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the checksum of every type definition
    Checksums {
        #[arg(long)]
        definitions: PathBuf,
    },
    /// Print the structural operations that build the definitions, or that
    /// migrate from `--previous` to them
    Plan {
        #[arg(long)]
        definitions: PathBuf,
        #[arg(long)]
        previous: Option<PathBuf>,
    },
    /// Materialize every type, optionally load fixtures, and print all records
    Dump {
        #[arg(long)]
        definitions: PathBuf,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Checksums { definitions } => print_checksums(&definitions),
        Command::Plan { definitions, previous } => print_plan(&definitions, previous.as_deref()),
        Command::Dump { definitions, data, out } => dump(&definitions, data.as_deref(), out.as_deref()).await,
    }
}

fn read_definitions(path: &Path) -> Result<DefinitionSet> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read definitions '{}'", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid definitions in '{}'", path.display()))
}

fn ordered_ids(set: &DefinitionSet) -> Result<Vec<DefinitionId>> {
    let ids: BTreeSet<DefinitionId> = set.type_ids().into_iter().collect();
    Ok(set.topological_order(&ids)?)
}

fn print_checksums(path: &Path) -> Result<()> {
    let set = read_definitions(path)?;
    let kinds = KindRegistry::with_builtins();
    let models = ModelRegistry::new();
    let ctx = ShapeContext::new(&set, &kinds, &models);

    for id in ordered_ids(&set)? {
        let shape = ctx.shape(id)?;
        println!("{}\t{}\t{}", id, shape.type_name, checksum(&shape)?);
    }
    Ok(())
}

fn layouts(set: &DefinitionSet) -> Result<Vec<(DefinitionId, Layout)>> {
    let kinds = KindRegistry::with_builtins();
    let models = ModelRegistry::new();
    let ctx = ShapeContext::new(set, &kinds, &models);
    ordered_ids(set)?
        .into_iter()
        .map(|id| Ok((id, ctx.shape(id)?.layout())))
        .collect()
}

fn print_plan(path: &Path, previous: Option<&Path>) -> Result<()> {
    let current = layouts(&read_definitions(path)?)?;
    let before = match previous {
        Some(previous) => layouts(&read_definitions(previous)?)?,
        None => Vec::new(),
    };

    let mut ids: Vec<DefinitionId> = current.iter().map(|(id, _)| *id).collect();
    ids.extend(before.iter().map(|(id, _)| *id).filter(|id| !current.iter().any(|(c, _)| c == id)));

    for id in ids {
        let old = before.iter().find(|(b, _)| *b == id).map(|(_, l)| l);
        let new = current.iter().find(|(c, _)| *c == id).map(|(_, l)| l);
        let plan = sync::plan(old, new);
        for op in plan.operations() {
            println!("{};", op);
        }
    }
    Ok(())
}

async fn dump(path: &Path, data: Option<&Path>, out: Option<&Path>) -> Result<()> {
    let set = read_definitions(path)?;
    let engine = SchemaEngine::builder()
        .store(Arc::new(DefinitionStore::from_set(set)))
        .state(Arc::new(MemoryStateHandler::new()))
        .build()
        .await?;

    if let Some(data) = data {
        let raw = fs::read_to_string(data)
            .with_context(|| format!("Failed to read fixtures '{}'", data.display()))?;
        let loaded = fixtures::load_json(&engine, &raw).await?;
        tracing::info!(records = loaded, "fixtures loaded");
    }

    let json = fixtures::dump_json(&engine).await?;
    match out {
        Some(out) => fs::write(out, json)
            .map_err(|err| anyhow!("Failed to write '{}': {}", out.display(), err))?,
        None => println!("{}", json),
    }
    Ok(())
}
