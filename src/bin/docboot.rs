use clap::{Parser, Subcommand};
use docboot::config::DEFAULT_FIXTURE_CONCURRENCY;
use docboot::driver::mongo::MongoDriver;
use docboot::fixtures::{FixtureLoader, LoadOptions, LoaderSpec};
use docboot::{Bootstrap, BootstrapConfig, BootstrapError, SeedSpec};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "docboot")]
#[command(about = "Bring document databases to a ready state: indexes, seed data, fixtures")]
#[command(version)]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect, ensure indexes, then seed or load fixtures per the config
    Bootstrap {
        #[arg(long)]
        config: PathBuf,
        /// JSON file of `{database: {collection: [documents]}}`
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Load a fixture directory into one database
    Fixtures {
        #[arg(long)]
        uri: String,
        #[arg(long)]
        dir: PathBuf,
        /// Keep existing documents instead of clearing each collection
        #[arg(long)]
        no_clear: bool,
        /// Documents written in parallel per collection
        #[arg(long, default_value_t = DEFAULT_FIXTURE_CONCURRENCY)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(args.command).await {
        eprintln!("error [{}]: {e}", e.code_str());
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), BootstrapError> {
    match command {
        Command::Bootstrap { config, seed } => cmd_bootstrap(&config, seed.as_deref()).await,
        Command::Fixtures {
            uri,
            dir,
            no_clear,
            concurrency,
        } => cmd_fixtures(uri, &dir, !no_clear, concurrency).await,
    }
}

async fn cmd_bootstrap(config: &Path, seed: Option<&Path>) -> Result<(), BootstrapError> {
    let config = BootstrapConfig::load(config)?;
    let specs = match seed {
        Some(path) => read_seed_file(path)?,
        None => Vec::new(),
    };
    let services = Bootstrap::new(Arc::new(MongoDriver::new()), config)
        .with_seed_specs(specs)
        .initialize()
        .await?;

    for report in &services.index_reports {
        println!(
            "indexes\t{}\tapplied={}\tfailed={}",
            report.database,
            report.applied,
            report.failed.len()
        );
    }
    for report in &services.seed_report {
        for outcome in &report.collections {
            println!("seed\t{}\t{}\t{:?}", report.database, outcome.collection, outcome.outcome);
        }
    }
    for (database, report) in &services.fixture_reports {
        println!("fixtures\t{database}\tdocuments={}", report.written());
    }
    services.shutdown().await;
    Ok(())
}

async fn cmd_fixtures(
    uri: String,
    dir: &Path,
    clear: bool,
    concurrency: usize,
) -> Result<(), BootstrapError> {
    let driver = MongoDriver::new();
    let spec = LoaderSpec::uri(uri)
        .with_clear(clear)
        .with_concurrency(concurrency);
    let loader = FixtureLoader::open(&driver, spec).await?;
    let result = loader.load_fixtures(dir, LoadOptions::default()).await;
    loader.close().await?;
    let report = result?;
    for load in &report.collections {
        println!(
            "{}\tcleared={}\tinserted={}\tupserted={}\terrors={}",
            load.collection,
            load.cleared,
            load.inserted,
            load.upserted,
            load.errors.len()
        );
    }
    Ok(())
}

fn read_seed_file(path: &Path) -> Result<Vec<SeedSpec>, BootstrapError> {
    let text = std::fs::read_to_string(path)?;
    let parsed: Value = serde_json::from_str(&text).map_err(|e| BootstrapError::Parse {
        source_name: path.display().to_string(),
        message: e.to_string(),
    })?;
    let Value::Object(databases) = parsed else {
        return Err(BootstrapError::Parse {
            source_name: path.display().to_string(),
            message: "seed file must map database names to collections".into(),
        });
    };
    databases
        .into_iter()
        .map(|(database, collections)| SeedSpec::from_json(database, collections))
        .collect()
}
