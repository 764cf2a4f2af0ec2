use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use cmip_replica::app::{
    App, CatalogRequest, CatalogResult, CompleteRequest, CompleteResult, PathSource,
    ProgressEvent, ProgressSink, ReconcileRequest, ReconcileResult, SearchRequest, SearchResult,
};
use cmip_replica::config::ConfigLoader;
use cmip_replica::constraints::ConstraintSet;
use cmip_replica::domain::VarMip;
use cmip_replica::error::ReplicaError;
use cmip_replica::esgf::{EsgfHttpClient, Node};
use cmip_replica::output::{JsonOutput, OutputMode};
use cmip_replica::reconcile::RequestedSpace;

#[derive(Parser)]
#[command(name = "cmip-replica")]
#[command(about = "Catalog the CMIP5 replica tree and reconcile it with the ESGF archive")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List replica ensembles; OR within a selector, AND across selectors")]
    Catalog(CatalogArgs),
    #[command(about = "Download one ESGF wget script per experiment")]
    Search(SearchArgs),
    #[command(about = "Compare published files with the replica")]
    Reconcile(ReconcileArgs),
    #[command(about = "Find model runs holding every requested variable")]
    Complete(CompleteArgs),
}

#[derive(Args)]
struct CatalogArgs {
    #[arg(short = 'v', long = "variable", num_args = 1..)]
    variables: Vec<String>,

    #[arg(short = 'm', long = "model", num_args = 1..)]
    models: Vec<String>,

    #[arg(short = 'e', long = "experiment", num_args = 1..)]
    experiments: Vec<String>,

    #[arg(short = 't', long = "mip_table", num_args = 1..)]
    mip_tables: Vec<String>,

    #[arg(short = 'f', long = "frequency", num_args = 1..)]
    frequencies: Vec<String>,

    /// Path listing to read instead of the configured manifest
    #[arg(long, conflicts_with = "walk")]
    manifest: Option<Utf8PathBuf>,

    /// Walk this directory instead of reading a manifest
    #[arg(long)]
    walk: Option<Utf8PathBuf>,

    /// Catalog file; `.db` for SQLite, anything else for CSV
    #[arg(short = 'o', long, default_value = "CMIP5_database.db")]
    output: Utf8PathBuf,
}

#[derive(Args)]
struct RequestArgs {
    /// variable_miptable, e.g. tas_Amon
    #[arg(short = 'v', long = "variable", num_args = 1.., required = true)]
    variables: Vec<VarMip>,

    #[arg(short = 'e', long = "experiment", num_args = 1.., required = true)]
    experiments: Vec<String>,

    #[arg(short = 'm', long = "model", num_args = 1..)]
    models: Vec<String>,

    /// Directory holding the wget_<experiment>.out scripts
    #[arg(long, default_value = ".")]
    dir: Utf8PathBuf,
}

impl RequestArgs {
    fn space(&self) -> RequestedSpace {
        RequestedSpace::new(
            self.variables.iter().cloned(),
            self.models.iter().cloned(),
            self.experiments.iter().cloned(),
        )
    }
}

#[derive(Args)]
struct SearchArgs {
    #[command(flatten)]
    request: RequestArgs,

    #[arg(short = 'n', long)]
    node: Option<Node>,
}

#[derive(Args)]
struct ReconcileArgs {
    #[command(flatten)]
    request: RequestArgs,

    /// Root name of the report files
    #[arg(short = 'o', long, default_value = "variables")]
    output: String,

    /// Also write one summary table per experiment
    #[arg(long)]
    table: bool,

    /// Query ESGF instead of reading saved scripts
    #[arg(long)]
    fetch: bool,

    #[arg(short = 'n', long)]
    node: Option<Node>,

    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct CompleteArgs {
    /// variable_miptable, e.g. tas_Amon
    #[arg(short = 'v', long = "variable", num_args = 1.., required = true)]
    variables: Vec<VarMip>,

    /// Catalog written by the `catalog` command
    #[arg(long)]
    catalog: Utf8PathBuf,

    #[arg(short = 'o', long, default_value = "ensembles.csv")]
    output: String,
}

struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::info!("{}", event.message),
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<ReplicaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ReplicaError) -> u8 {
    match error {
        ReplicaError::NothingToReconcile(_)
        | ReplicaError::OutputExists(_)
        | ReplicaError::MissingConfig(_) => 2,
        ReplicaError::EsgfHttp(_) | ReplicaError::EsgfStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Catalog(args) => {
            let source = match (args.manifest, args.walk) {
                (_, Some(root)) => PathSource::Walk(root),
                (Some(manifest), None) => PathSource::Manifest(manifest),
                (None, None) => PathSource::Manifest(config.manifest.clone()),
            };
            let constraints =
                ConstraintSet::new(args.variables, args.models, args.experiments, args.mip_tables)
                    .with_frequencies(&args.frequencies);
            let client = EsgfHttpClient::new(config.node)?;
            let app = App::new(config, client);
            let result = app.catalog(
                CatalogRequest {
                    constraints,
                    source,
                    output: args.output,
                },
                &LogSink,
            )?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_catalog(&result).into_diagnostic()?,
                OutputMode::Human => print_catalog_summary(&result),
            }
        }
        Commands::Search(args) => {
            if let Some(node) = args.node {
                config.node = node;
            }
            let client = EsgfHttpClient::new(config.node)?;
            let app = App::new(config, client);
            let result = app.search(
                SearchRequest {
                    space: args.request.space(),
                    dir: args.request.dir.clone(),
                },
                &LogSink,
            )?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_search(&result).into_diagnostic()?,
                OutputMode::Human => print_search_summary(&result),
            }
        }
        Commands::Reconcile(args) => {
            if let Some(node) = args.node {
                config.node = node;
            }
            let client = EsgfHttpClient::new(config.node)?;
            let app = App::new(config, client);
            let result = app.reconcile(
                ReconcileRequest {
                    space: args.request.space(),
                    dir: args.request.dir.clone(),
                    fetch: args.fetch,
                    output_root: Some(args.output),
                    table: args.table,
                    workers: args.workers,
                },
                &LogSink,
            )?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_reconcile(&result).into_diagnostic()?,
                OutputMode::Human => print_reconcile_summary(&result),
            }
        }
        Commands::Complete(args) => {
            let client = EsgfHttpClient::new(config.node)?;
            let app = App::new(config, client);
            let result = app.complete(
                CompleteRequest {
                    catalog: args.catalog,
                    required: args.variables.into_iter().collect(),
                    output: Some(args.output),
                },
                &LogSink,
            )?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_complete(&result).into_diagnostic()?,
                OutputMode::Human => print_complete_summary(&result),
            }
        }
    }
    Ok(())
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn print_catalog_summary(result: &CatalogResult) {
    println!("{CYAN}CMIP5 catalog from {}{RESET}", result.source);
    println!(
        "  {} paths read, {} non-conforming, {} filtered out",
        result.stats.seen, result.stats.malformed, result.stats.filtered
    );
    println!(
        "{GREEN}  {} ensembles, {} new in {}{RESET}",
        result.records, result.persisted.inserted, result.output
    );
    if result.persisted.skipped > 0 {
        println!(
            "{YELLOW}  {} already catalogued{RESET}",
            result.persisted.skipped
        );
    }
}

fn print_search_summary(result: &SearchResult) {
    for item in &result.scripts {
        println!("{GREEN}{}{RESET} -> {}", item.experiment, item.path);
        println!("   {}", item.url);
    }
}

fn print_reconcile_summary(result: &ReconcileResult) {
    let reconciliation = &result.reconciliation;
    println!("{CYAN}Reconciliation{RESET}");
    for listing in &result.experiments {
        let note = if listing.no_matches { " (no matches)" } else { "" };
        println!(
            "  {}: {} files{note}",
            listing.experiment, listing.accepted
        );
    }
    println!(
        "{GREEN}  current: {}{RESET}",
        reconciliation.published_current.len()
    );
    println!(
        "{YELLOW}  needs update: {}{RESET}",
        reconciliation.published_stale.len()
    );
    println!(
        "  not published: {}",
        reconciliation.not_published.len()
    );
    if result.rejected_lines > 0 {
        println!(
            "{YELLOW}  {} malformed script lines skipped{RESET}",
            result.rejected_lines
        );
    }
    for report in &result.reports {
        println!("  wrote {report}");
    }
}

fn print_complete_summary(result: &CompleteResult) {
    println!(
        "{CYAN}Runs with all of {}{RESET}",
        result.required.join(", ")
    );
    println!("{GREEN}  complete: {}{RESET}", result.complete.len());
    println!("{YELLOW}  incomplete: {}{RESET}", result.incomplete.len());
    for report in &result.reports {
        println!("  wrote {report}");
    }
}
