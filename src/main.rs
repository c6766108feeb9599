use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use modelcache::{
    Attrs, CacheConfig, DataType, EntityCache, EntityRegistry, EntityType, FlushReport,
    MemoryStore, StoreStats, sizeof_fmt,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "modelcache")]
#[command(about = "Bulk flush benchmark for the entity cache")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create parents with children in one unit of work and flush them.
    Bench {
        #[arg(long, default_value_t = 10_000)]
        parents: usize,
        #[arg(long, default_value_t = 3)]
        children: usize,
        #[arg(long, value_enum, default_value_t = Mode::Both)]
        mode: Mode,
        #[arg(long)]
        json: bool,
    },
    /// Print the benchmark schema as JSON.
    Schema,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Generic,
    Streaming,
    Both,
}

#[derive(Serialize)]
struct BenchResult {
    mode: &'static str,
    parents: usize,
    children: usize,
    create_ms: f64,
    flush_ms: f64,
    cache_bytes: usize,
    report: FlushReport,
    store: StoreStats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Bench {
            parents,
            children,
            mode,
            json,
        } => {
            let registry = Arc::new(schema()?);
            let modes: &[bool] = match mode {
                Mode::Generic => &[false],
                Mode::Streaming => &[true],
                Mode::Both => &[false, true],
            };

            for streaming in modes {
                let result = run_bench(&registry, parents, children, *streaming)?;
                if json {
                    println!("{}", serde_json::to_string(&result)?);
                } else {
                    print_result(&result);
                }
            }
            Ok(())
        }
        Command::Schema => {
            let registry = schema()?;
            let types: Vec<&EntityType> = registry.iter().map(|(_, entity)| entity).collect();
            println!("{}", serde_json::to_string_pretty(&types)?);
            Ok(())
        }
    }
}

fn schema() -> Result<EntityRegistry> {
    let parent = EntityType::builder("Parent")
        .primary_key("id", DataType::Integer)
        .attribute("name", DataType::Text)
        .attribute("score", DataType::Float)
        .default("score", 0.0)
        .build()?;
    let child = EntityType::builder("Child")
        .primary_key("id", DataType::Integer)
        .attribute("parent_id", DataType::Integer)
        .attribute("label", DataType::Text)
        .relationship("parent", "Parent", &[("parent_id", "id")])
        .build()?;
    Ok(EntityRegistry::new(vec![parent, child])?)
}

fn run_bench(
    registry: &Arc<EntityRegistry>,
    parents: usize,
    children: usize,
    streaming: bool,
) -> Result<BenchResult> {
    let store = MemoryStore::with_schema(registry)?;
    store.create_sequence("parent_id_seq", 1)?;
    store.create_sequence("child_id_seq", 1)?;

    let config = CacheConfig::new(["Parent", "Child"])
        .sequence("Parent", "id", "parent_id_seq")
        .sequence("Child", "id", "child_id_seq")
        .streaming_bulk_load(streaming);
    let mut cache = EntityCache::new(Arc::clone(registry), config, store.clone())?;

    let started = Instant::now();
    for p in 0..parents {
        let parent = cache.create("Parent", [("name", format!("parent-{}", p))])?;
        for c in 0..children {
            let child = cache.create("Child", [("label", format!("child-{}-{}", p, c))])?;
            cache.link(child, "parent", Some(parent))?;
        }
    }
    let create_ms = started.elapsed().as_secs_f64() * 1000.0;
    let cache_bytes = cache.stats().estimated_bytes;

    let started = Instant::now();
    let report = cache.flush().context("flush failed")?;
    let flush_ms = started.elapsed().as_secs_f64() * 1000.0;

    if store.row_count("parent")? != parents || store.row_count("child")? != parents * children {
        bail!("store row counts do not match the created instances");
    }
    if cache.find("Parent", Attrs::new())?.len() != parents {
        bail!("reloaded parents do not match the created instances");
    }

    Ok(BenchResult {
        mode: if streaming { "streaming" } else { "generic" },
        parents,
        children: parents * children,
        create_ms,
        flush_ms,
        cache_bytes,
        report,
        store: store.stats()?,
    })
}

fn print_result(result: &BenchResult) {
    println!("bench results ({}):", result.mode);
    println!("  parents: {}", result.parents);
    println!("  children: {}", result.children);
    println!("  create_ms: {:.2}", result.create_ms);
    println!("  flush_ms: {:.2}", result.flush_ms);
    println!("  cache_size: {}", sizeof_fmt(result.cache_bytes));
    println!("  sequence_values: {}", result.report.sequence_values);
    println!("  store_loads: {}", result.store.loads);
    println!("  store_sequence_draws: {}", result.store.sequence_draws);
    println!("  store_bulk_inserts: {}", result.store.bulk_inserts);
    println!("  store_bulk_loads: {}", result.store.bulk_loads);
    println!("  store_commits: {}", result.store.commits);
}
