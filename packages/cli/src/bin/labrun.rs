use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;

mod cli;

use labrun_sandbox::ProviderKind;

#[derive(Parser)]
#[command(name = "labrun")]
#[command(about = "Run code tasks in isolated sandboxes and capture what they render")]
#[command(version)]
struct Cli {
    /// Debug-level logging (ignored when RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Runtime provider, overriding LABRUN_PROVIDER
    #[arg(long, global = true)]
    provider: Option<ProviderKind>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job file and wait for its status document
    Run {
        /// JSON array of task specs, or an object with a `tasks` array
        job: PathBuf,

        /// Status poll interval in milliseconds
        #[arg(long, default_value = "500")]
        poll_ms: u64,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "3600")]
        wait_secs: u64,

        /// Write the status document here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Report provider availability and the resolved settings
    Check,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    labrun_cli::init_tracing(cli.verbose);

    let outcome = match cli.command {
        Commands::Run {
            job,
            poll_ms,
            wait_secs,
            output,
        } => {
            cli::run::run_command(cli::run::RunOptions {
                job,
                poll_ms,
                wait_secs,
                output,
                provider: cli.provider,
            })
            .await
        }
        Commands::Check => cli::check::check_command(cli.provider).await,
    };

    match outcome {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}
