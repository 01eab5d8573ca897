use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use performance_engine::config::AppConfig;

use crate::error::ApiError;
use crate::infra::build_context;
use crate::server;

#[derive(Parser, Debug)]
#[command(
    name = "Performance Scoring Service",
    about = "Run the multi-tenant employee performance scoring service",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Drain the pending activity-event queue once and print the report
    Sweep(SweepArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Seed a demo tenant so the service is exercisable out of the box
    #[arg(long)]
    pub(crate) demo: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Use the shorter replay debounce window instead of the default one
    #[arg(long)]
    pub(crate) replay: bool,
    /// Seed the demo tenant before sweeping
    #[arg(long)]
    pub(crate) demo: bool,
}

pub(crate) async fn run() -> Result<(), ApiError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => run_sweep(args),
    }
}

fn run_sweep(args: SweepArgs) -> Result<(), ApiError> {
    let config = AppConfig::load()?;
    let context = build_context(&config.engine, args.demo);
    let processor = if args.replay {
        &context.replay_processor
    } else {
        &context.processor
    };
    let report = processor.sweep(Utc::now())?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| format!("{report:?}"))
    );
    Ok(())
}
