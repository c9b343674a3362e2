use std::path::PathBuf;

use clap::{Parser, Subcommand};
use memvault::bootstrap::open_engine;
use memvault::config::Config;
use memvault_cli::commands::{
    AddArgs, DecayArgs, DeleteArgs, GetArgs, HistoryArgs, InferArgs, ListArgs, ReconcileArgs,
    ResetArgs, SearchArgs, WatchArgs,
};
use memvault_cli::error::CliResult;
use memvault_cli::output::OutputFormat;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "memvault")]
#[command(about = "memvault - long-term memory with oracle triage")]
#[command(version)]
pub struct Cli {
    #[clap(long, short, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[clap(long, short = 'd', global = true, help = "Path to data directory")]
    pub data_dir: Option<PathBuf>,

    #[clap(long, short = 'c', global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    #[clap(about = "Let the oracle decide whether a statement adds, updates or deletes a memory")]
    Infer(InferArgs),

    #[clap(about = "Store a memory directly, skipping triage")]
    Add(AddArgs),

    #[clap(about = "Search memories by similarity")]
    Search(SearchArgs),

    #[clap(about = "Show a single memory")]
    Get(GetArgs),

    #[clap(about = "List memories")]
    List(ListArgs),

    #[clap(about = "Show the history of a memory")]
    History(HistoryArgs),

    #[clap(about = "Delete a memory")]
    Delete(DeleteArgs),

    #[clap(about = "Delete every memory and all history")]
    Reset(ResetArgs),

    #[clap(about = "Run one importance decay pass")]
    Decay(DecayArgs),

    #[clap(about = "Repair records left inconsistent between the stores")]
    Reconcile(ReconcileArgs),

    #[clap(about = "Run the decay scheduler until interrupted")]
    Watch(WatchArgs),
}

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,memvault=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Table
    };

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    let engine = open_engine(&config).await?;

    match &cli.command {
        Command::Infer(args) => args.execute(&engine, format).await,
        Command::Add(args) => args.execute(&engine, format).await,
        Command::Search(args) => args.execute(&engine, format).await,
        Command::Get(args) => args.execute(&engine, format).await,
        Command::List(args) => args.execute(&engine, format).await,
        Command::History(args) => args.execute(&engine, format).await,
        Command::Delete(args) => args.execute(&engine, format).await,
        Command::Reset(args) => args.execute(&engine, format).await,
        Command::Decay(args) => args.execute(&engine, &config, format).await,
        Command::Reconcile(args) => args.execute(&engine, format).await,
        Command::Watch(args) => args.execute(&engine, &config, format).await,
    }
}
