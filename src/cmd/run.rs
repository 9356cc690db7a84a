//! Pipeline execution — `weave run` and `weave resume`.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use super::super::Cli;
use weave::backend::{BackendSet, ContextBackend, GLOBAL, LOCAL, MemoryBackend};
use weave::config::WeaveConfig;
use weave::nodes::synthesizer::TemplateGenerator;
use weave::orchestration::{PipelineDriver, UpdateScheduler};
use weave::orchestration::hooks::TraceHook;
use weave::state::{ApprovalDecision, ApprovalRequest, RunOutcome};

pub async fn cmd_run(
    project_dir: &Path,
    query: &str,
    subject: Option<String>,
    run_id: Option<String>,
    local_corpus: Option<&Path>,
    global_corpus: Option<&Path>,
) -> Result<()> {
    let (driver, scheduler) = build_driver(project_dir, local_corpus, global_corpus)?;
    if let Some(scheduler) = &scheduler {
        scheduler.recover().await?;
    }
    let outcome = driver.run(query, subject, run_id).await;
    let result = report(outcome);
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    result
}

pub async fn cmd_resume(
    project_dir: &Path,
    cli: &Cli,
    run_id: &str,
    approve: bool,
    reject: bool,
    local_corpus: Option<&Path>,
    global_corpus: Option<&Path>,
) -> Result<()> {
    let (driver, scheduler) = build_driver(project_dir, local_corpus, global_corpus)?;
    if let Some(scheduler) = &scheduler {
        scheduler.recover().await?;
    }

    // An explicit rejection always wins, even with the global --yes flag.
    let decision = if reject {
        ApprovalDecision::Rejected
    } else if approve || cli.yes {
        ApprovalDecision::Approved
    } else {
        prompt_decision(driver.status(run_id)?.and_then(|cp| cp.state.pending_approval))?
    };

    let outcome = driver.resume(run_id, decision).await;
    let result = report(outcome);
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    result
}

/// Wire a driver from the project's `weave.toml`, the demo in-memory
/// backends, and (when enabled) the knowledge write-back queue.
fn build_driver(
    project_dir: &Path,
    local_corpus: Option<&Path>,
    global_corpus: Option<&Path>,
) -> Result<(PipelineDriver, Option<Arc<UpdateScheduler>>)> {
    let mut config = WeaveConfig::load_or_default(project_dir)?;
    // State directories in the config are relative to the project.
    if config.checkpoint.dir.is_relative() {
        config.checkpoint.dir = project_dir.join(&config.checkpoint.dir);
    }
    if config.updates.journal_dir.is_relative() {
        config.updates.journal_dir = project_dir.join(&config.updates.journal_dir);
    }

    let local = load_backend(LOCAL, local_corpus)?;
    let global = load_backend(GLOBAL, global_corpus)?;
    let backends = BackendSet::new(local, global.clone());

    let scheduler = if config.updates.enabled {
        Some(Arc::new(UpdateScheduler::start(global, &config.updates)?))
    } else {
        None
    };

    let mut driver = PipelineDriver::new(config, backends, Arc::new(TemplateGenerator))
        .with_hook(Box::new(TraceHook));
    if let Some(scheduler) = &scheduler {
        driver = driver.with_update_scheduler(scheduler.clone());
    }
    Ok((driver, scheduler))
}

fn load_backend(id: &str, corpus: Option<&Path>) -> Result<Arc<dyn ContextBackend>> {
    let backend = match corpus {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read corpus file {}", path.display()))?;
            MemoryBackend::from_lines(id, &text)
        }
        None => MemoryBackend::new(id, Vec::new()),
    };
    Ok(Arc::new(backend))
}

fn prompt_decision(pending: Option<ApprovalRequest>) -> Result<ApprovalDecision> {
    use dialoguer::Confirm;

    if let Some(request) = pending {
        println!(
            "{} {} (matched verb: {})",
            console::style("Pending approval:").yellow().bold(),
            request.description,
            console::style(&request.matched_verb).cyan()
        );
    }

    let approved = Confirm::new()
        .with_prompt("Approve this mutating operation on the global knowledge store?")
        .default(false)
        .interact()
        .context("Failed to read approval decision")?;

    Ok(if approved {
        ApprovalDecision::Approved
    } else {
        ApprovalDecision::Rejected
    })
}

fn report(outcome: RunOutcome) -> Result<()> {
    match outcome {
        RunOutcome::FinalAnswer(text) => {
            println!("{}", console::style("Answer").bold().green());
            println!("{text}");
            Ok(())
        }
        RunOutcome::AwaitingApproval(request) => {
            println!(
                "{} {}",
                console::style("Suspended:").yellow().bold(),
                request.description
            );
            println!(
                "  matched verb: {}",
                console::style(&request.matched_verb).cyan()
            );
            println!("  resume with: weave resume <run-id> --approve | --reject");
            Ok(())
        }
        RunOutcome::Rejected(reason) => {
            println!("{} {}", console::style("Rejected:").red().bold(), reason);
            Ok(())
        }
        RunOutcome::Failed(err) => Err(err.into()),
    }
}
