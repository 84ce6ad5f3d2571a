//! th-cli - command line client for the certification test harness
//!
//! Creates test runs from capability declarations and property overrides,
//! follows them live and aborts them on request.

use clap::Parser;
use commands::Commands;
use th_cli::common::config::Config;
use th_cli::common::{logging, paths};
use th_cli::session::Session;
use th_cli::{cli, commands};

#[derive(Parser)]
#[command(name = "th-cli", about = "Certification test harness CLI")]
#[command(version, long_about = None)]
struct Cli {
    /// Backend host, overriding the configuration file
    #[arg(long, global = true)]
    hostname: Option<String>,

    /// Disable coloured output
    #[arg(long, global = true, env = "TH_CLI_NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let mut cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    };
    if let Some(hostname) = cli.hostname.take() {
        config.backend.hostname = hostname;
    }

    // Hold the guard so the run log is flushed before exit
    let guard = match &mut cli.command {
        Commands::RunTests(args) => {
            let title = args.title.get_or_insert_with(cli::run::default_title);
            let log_path = paths::run_log_path(&config.logging.output_log_path, title);
            match logging::init_run(&log_path) {
                Ok(guard) => {
                    tracing::info!(path = %log_path.display(), "Writing run log");
                    Some(guard)
                }
                Err(e) => {
                    logging::init_cli();
                    tracing::warn!(path = %log_path.display(), "Cannot open run log: {}", e);
                    None
                }
            }
        }
        _ => {
            logging::init_cli();
            None
        }
    };

    if cli.no_color {
        colored::control::set_override(false);
    }

    let result = match Session::connect(config) {
        Ok(session) => cli::dispatch(&session, cli.command, !cli.no_color).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        drop(guard);
        std::process::exit(e.exit_code());
    }
    drop(guard);
}
