//! Run inspection — `weave status` and `weave runs`.

use anyhow::Result;
use std::path::Path;

use weave::config::WeaveConfig;
use weave::state::{CheckpointStore, Diagnostic, PersistedOutcome};

fn store(project_dir: &Path) -> Result<CheckpointStore> {
    let mut config = WeaveConfig::load_or_default(project_dir)?;
    if config.checkpoint.dir.is_relative() {
        config.checkpoint.dir = project_dir.join(&config.checkpoint.dir);
    }
    Ok(CheckpointStore::new(config.checkpoint.dir))
}

pub fn cmd_status(project_dir: &Path, run_id: &str) -> Result<()> {
    let Some(cp) = store(project_dir)?.load(run_id)? else {
        anyhow::bail!("No run found with id '{run_id}'");
    };

    println!("{} {}", console::style("Run:").bold(), cp.run_id);
    println!("  stage:     {}", console::style(cp.stage).cyan());
    println!("  saved at:  {}", cp.saved_at.to_rfc3339());
    if let Some(intent) = cp.state.intent {
        println!("  intent:    {intent}");
    }
    println!("  documents: {}", cp.state.retrieved_documents.len());
    if !cp.state.backends_invoked.is_empty() {
        let invoked: Vec<&str> = cp.state.backends_invoked.iter().map(String::as_str).collect();
        println!("  backends:  {}", invoked.join(", "));
    }

    if let Some(request) = &cp.state.pending_approval {
        println!(
            "  {} {} (verb: {})",
            console::style("awaiting approval:").yellow(),
            request.description,
            request.matched_verb
        );
    }

    for diagnostic in &cp.state.diagnostics {
        match diagnostic {
            Diagnostic::BudgetExceeded {
                backend,
                budget,
                accepted,
                dropped,
            } => println!(
                "  {} {backend}: budget {budget}, accepted {accepted}, dropped {dropped}",
                console::style("budget exceeded").yellow()
            ),
            Diagnostic::BackendFailed { backend, message } => println!(
                "  {} {backend}: {message}",
                console::style("backend failed").red()
            ),
        }
    }

    match &cp.outcome {
        Some(PersistedOutcome::FinalAnswer { text }) => {
            println!("  {}", console::style("completed").green());
            println!("{text}");
        }
        Some(PersistedOutcome::Rejected { reason }) => {
            println!("  {} {reason}", console::style("rejected:").red());
        }
        Some(PersistedOutcome::Failed { message }) => {
            println!("  {} {message}", console::style("failed:").red());
        }
        None => {}
    }

    Ok(())
}

pub fn cmd_runs(project_dir: &Path) -> Result<()> {
    let store = store(project_dir)?;
    let run_ids = store.list()?;
    if run_ids.is_empty() {
        println!("No persisted runs.");
        return Ok(());
    }

    for run_id in run_ids {
        match store.load(&run_id)? {
            Some(cp) => println!("{run_id}  {}", console::style(cp.stage).cyan()),
            None => println!("{run_id}  (unreadable)"),
        }
    }
    Ok(())
}
