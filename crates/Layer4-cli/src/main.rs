//! PocketShell CLI - Main entry point

mod cli;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// PocketShell - shell session, plans and conversation context from the terminal
#[derive(Parser, Debug)]
#[command(name = "pocket")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory (overrides storage.dataDir in config)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one command in a fresh shell session and print its output
    Exec {
        /// Timeout in seconds (default: shell.timeoutSecs)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Show or edit the active plan
    Plan {
        /// Print the raw plan record as JSON
        #[arg(long, conflicts_with_all = ["abandon", "complete", "add"])]
        json: bool,

        /// Abandon the active plan with a reason
        #[arg(long, value_name = "REASON", conflicts_with_all = ["complete", "add"])]
        abandon: Option<String>,

        /// Close the active plan as completed, with an optional summary
        #[arg(long, value_name = "SUMMARY", num_args = 0..=1, default_missing_value = "", conflicts_with = "add")]
        complete: Option<String>,

        /// Append a step to the active plan
        #[arg(long, value_name = "STEP")]
        add: Option<String>,
    },
    /// List stored context sessions
    Sessions {
        /// Number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Print the turns of a context session
    History {
        /// Session id
        session: String,

        /// Only the last N turns
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging (stdout 은 명령 결과용)
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = pocket_foundation::PocketConfig::load()?;
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = Some(data_dir);
    }

    match args.command {
        Command::Exec { timeout, command } => cli::exec(&config, &command.join(" "), timeout).await,
        Command::Plan {
            json,
            abandon,
            complete,
            add,
        } => {
            let edit = match (abandon, complete, add) {
                (Some(reason), _, _) => Some(cli::PlanEdit::Abandon(reason)),
                (_, Some(summary), _) => Some(cli::PlanEdit::Complete(
                    Some(summary).filter(|s| !s.trim().is_empty()),
                )),
                (_, _, Some(step)) => Some(cli::PlanEdit::AddStep(step)),
                _ => None,
            };
            match edit {
                Some(edit) => cli::edit_plan(&config, edit),
                None => cli::show_plan(&config, json),
            }
            .map(|_| ExitCode::SUCCESS)
        }
        Command::Sessions { limit } => {
            cli::list_sessions(&config, limit).map(|_| ExitCode::SUCCESS)
        }
        Command::History { session, limit } => {
            cli::show_history(&config, &session, limit).map(|_| ExitCode::SUCCESS)
        }
    }
}
