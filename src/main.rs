use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "weave")]
#[command(version, about = "Hybrid context-retrieval pipeline")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Answer any approval prompt with yes (non-interactive).
    #[arg(long, global = true)]
    pub yes: bool,

    /// Directory holding weave.toml and run state. Defaults to the
    /// current directory.
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a query through the pipeline
    Run {
        query: String,

        /// Subject the query is about (e.g. a file path)
        #[arg(short, long)]
        subject: Option<String>,

        /// Explicit run id; generated when omitted
        #[arg(long)]
        run_id: Option<String>,

        /// Newline-delimited corpus file for the local backend
        #[arg(long)]
        local_corpus: Option<PathBuf>,

        /// Newline-delimited corpus file for the global backend
        #[arg(long)]
        global_corpus: Option<PathBuf>,
    },
    /// Decide a pending approval and continue the suspended run
    Resume {
        run_id: String,

        /// Approve without prompting
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject without prompting
        #[arg(long, conflicts_with = "approve")]
        reject: bool,

        /// Newline-delimited corpus file for the local backend
        #[arg(long)]
        local_corpus: Option<PathBuf>,

        /// Newline-delimited corpus file for the global backend
        #[arg(long)]
        global_corpus: Option<PathBuf>,
    },
    /// Show the persisted state of one run
    Status { run_id: String },
    /// List all persisted runs
    Runs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            query,
            subject,
            run_id,
            local_corpus,
            global_corpus,
        } => {
            cmd::cmd_run(
                &project_dir,
                query,
                subject.clone(),
                run_id.clone(),
                local_corpus.as_deref(),
                global_corpus.as_deref(),
            )
            .await?;
        }
        Commands::Resume {
            run_id,
            approve,
            reject,
            local_corpus,
            global_corpus,
        } => {
            cmd::cmd_resume(
                &project_dir,
                &cli,
                run_id,
                *approve,
                *reject,
                local_corpus.as_deref(),
                global_corpus.as_deref(),
            )
            .await?;
        }
        Commands::Status { run_id } => cmd::cmd_status(&project_dir, run_id)?,
        Commands::Runs => cmd::cmd_runs(&project_dir)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "weave=debug" } else { "weave=info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
