mod commands;
mod config;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Document approval flows and qualified signatures.
#[derive(Parser)]
#[command(
    name = "signflow",
    version,
    about = "Document approval flows and qualified signatures"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Path to a signflow.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 content hash of a document
    Hash {
        /// Path to the document
        file: PathBuf,
        /// Compare against an expected hash instead of printing it
        #[arg(long)]
        verify: Option<String>,
    },

    /// Build an approval flow from a new-flow JSON description
    CreateFlow {
        /// Path to the new-flow JSON file
        file: PathBuf,
    },

    /// Check a flow's structure
    Validate {
        /// Path to the flow JSON file
        flow: PathBuf,
    },

    /// Show step and signature completion for a flow
    Progress {
        /// Path to the flow JSON file
        flow: PathBuf,
    },

    /// Record an approval and print the updated flow
    Approve {
        /// Path to the flow JSON file
        flow: PathBuf,
        /// Step id or step number
        #[arg(long)]
        step: String,
        /// Approver user id
        #[arg(long)]
        approver: String,
        /// Approver display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        comments: Option<String>,
    },

    /// Record a rejection and print the updated flow
    Reject {
        /// Path to the flow JSON file
        flow: PathBuf,
        /// Step id or step number
        #[arg(long)]
        step: String,
        /// Approver user id
        #[arg(long)]
        approver: String,
        /// Approver display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        reason: String,
    },

    /// Cancel a flow and print it
    Cancel {
        /// Path to the flow JSON file
        flow: PathBuf,
        /// User cancelling the flow
        #[arg(long)]
        user: String,
        /// User display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        reason: String,
    },

    /// Show the effective status of a signature request
    RequestStatus {
        /// Path to the signature request JSON file
        request: PathBuf,
        /// Evaluate at this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let settings = match config::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(msg) => {
            report_error(&msg, cli.output, cli.quiet);
            process::exit(1);
        }
    };

    let ctx = commands::Context {
        output: cli.output,
        quiet: cli.quiet,
        config: settings,
    };

    match cli.command {
        Commands::Hash { file, verify } => {
            commands::hash::cmd_hash(&ctx, &file, verify.as_deref());
        }
        Commands::CreateFlow { file } => {
            commands::flow::cmd_create_flow(&ctx, &file);
        }
        Commands::Validate { flow } => {
            commands::flow::cmd_validate(&ctx, &flow);
        }
        Commands::Progress { flow } => {
            commands::flow::cmd_progress(&ctx, &flow);
        }
        Commands::Approve {
            flow,
            step,
            approver,
            name,
            comments,
        } => {
            commands::flow::cmd_approve(
                &ctx,
                &flow,
                &step,
                &approver,
                name.as_deref(),
                comments.as_deref(),
            );
        }
        Commands::Reject {
            flow,
            step,
            approver,
            name,
            reason,
        } => {
            commands::flow::cmd_reject(&ctx, &flow, &step, &approver, name.as_deref(), &reason);
        }
        Commands::Cancel {
            flow,
            user,
            name,
            reason,
        } => {
            commands::flow::cmd_cancel(&ctx, &flow, &user, name.as_deref(), &reason);
        }
        Commands::RequestStatus { request, at } => {
            commands::request::cmd_request_status(&ctx, &request, at.as_deref());
        }
    }
}

/// Logs go to stderr so stdout stays parseable. `RUST_LOG` overrides the
/// default level.
fn init_tracing(quiet: bool) {
    let default = if quiet { "error" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
