//! CLI workflow subcommands.
//!
//! Provides create, run, list, show, pending, approve/reject, rollback and
//! cancel on top of `WorkflowService`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::{Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use stepgate_core::service::RollbackTrigger;
use stepgate_core::workflow::rollback::{CompensationAction, RollbackReport};
use stepgate_types::approval::{ApprovalAction, ApprovalOutcome, ApprovalRequest};
use stepgate_types::event::WorkflowEvent;
use stepgate_types::workflow::{NewWorkflow, Workflow, WorkflowId, WorkflowStatus};

use crate::state::AppState;

/// How `run` answers approval requests raised by the workflow it follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    ApproveAll,
    RejectAll,
    /// Prompt on a terminal; otherwise leave the request for `stepgate approve`.
    Interactive,
}

impl DecisionMode {
    pub fn from_flags(approve_all: bool, reject_all: bool) -> Self {
        match (approve_all, reject_all) {
            (true, _) => DecisionMode::ApproveAll,
            (_, true) => DecisionMode::RejectAll,
            _ => DecisionMode::Interactive,
        }
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Parse a workflow definition. `.json` files are JSON, everything else TOML.
pub fn load_definition(path: &Path) -> Result<NewWorkflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse workflow JSON {}", path.display()))
    } else {
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse workflow TOML {}", path.display()))
    }
}

pub async fn create(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let draft = load_definition(file)?;
    let workflow = state
        .workflow_service
        .create_workflow(draft)
        .await
        .context("Failed to create workflow")?;

    if json {
        let out = serde_json::json!({
            "id": workflow.id.to_string(),
            "name": workflow.name,
            "status": workflow.status.to_string(),
            "steps": workflow.steps.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let approvals = workflow.steps.iter().filter(|s| s.requires_approval).count();
    println!();
    println!(
        "  {} Created workflow '{}'",
        style("*").green().bold(),
        style(&workflow.name).cyan()
    );
    println!("  ID: {}", workflow.id);
    println!("  Steps: {} ({} approval)", workflow.steps.len(), approvals);
    println!(
        "  Start it with: {}",
        style(format!("stepgate run {}", short_id(&workflow.id))).dim()
    );
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn run(
    state: &AppState,
    id: &str,
    mode: DecisionMode,
    approver: &str,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let service = &state.workflow_service;
    let workflow_id = resolve_workflow_id(state, id).await?;
    let workflow = service.get_workflow(workflow_id).await?;

    // The sweeper expires overdue requests and picks up decisions made from
    // other processes.
    let shutdown = CancellationToken::new();
    let _stop_sweeper = shutdown.clone().drop_guard();
    let sweeper = service.spawn_background(shutdown.clone());

    let mut events = service.subscribe();
    let mut handle = service
        .start_workflow(workflow_id)
        .await
        .with_context(|| format!("Failed to start workflow {workflow_id}"))?;

    let progress = if json || quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(workflow.steps.len() as u64);
        pb.set_style(
            ProgressStyle::with_template("  {spinner:.cyan} [{bar:30.cyan/dim}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message(workflow.name.clone());
        pb
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut joined = false;

    loop {
        tokio::select! {
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if event.workflow_id() != workflow_id {
                    continue;
                }
                emit(&progress, &event, json)?;
                if let WorkflowEvent::ApprovalRequested { request } = &event {
                    respond(state, request, mode, approver, &progress, json).await;
                }
                if event.is_final() {
                    break;
                }
            }
            result = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                    continue;
                }
                progress.println(format!("  {} interrupted, rolling back", style("!").yellow().bold()));
                service
                    .trigger_rollback(workflow_id, "interrupted by operator")
                    .await
                    .context("Failed to roll back interrupted workflow")?;
            }
            _ = &mut handle, if !joined => {
                // The run task ended; flush whatever it published last.
                joined = true;
                while let Ok(event) = events.try_recv() {
                    if event.workflow_id() == workflow_id {
                        emit(&progress, &event, json)?;
                    }
                }
                break;
            }
        }
    }

    if !joined {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "workflow task ended abnormally");
        }
    }
    progress.finish_and_clear();
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "approval sweeper ended abnormally");
    }

    let workflow = service.get_workflow(workflow_id).await?;
    if json {
        let out = serde_json::json!({
            "id": workflow.id.to_string(),
            "status": workflow.status.to_string(),
            "current_step": workflow.current_step,
        });
        println!("{out}");
    } else if !quiet {
        println!();
        println!(
            "  Workflow '{}' finished: {}",
            style(&workflow.name).cyan(),
            styled_status(workflow.status)
        );
        println!();
    }

    if workflow.status != WorkflowStatus::Completed {
        bail!("workflow {} ended {}", workflow.id, workflow.status);
    }
    Ok(())
}

/// Print one engine event as NDJSON or as a progress line.
fn emit(progress: &ProgressBar, event: &WorkflowEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    match event {
        WorkflowEvent::WorkflowStarted { name, total_steps, .. } => {
            progress.set_message(format!("{name} ({total_steps} steps)"));
        }
        WorkflowEvent::StepStarted { step_id, attempt, .. } => {
            if *attempt > 1 {
                progress.set_message(format!("{step_id} (attempt {attempt})"));
            } else {
                progress.set_message(step_id.clone());
            }
        }
        WorkflowEvent::StepCompleted { step_id, duration_ms, .. } => {
            progress.inc(1);
            progress.println(format!(
                "  {} {step_id} {}",
                style("✓").green(),
                style(format!("({duration_ms} ms)")).dim()
            ));
        }
        WorkflowEvent::StepRetrying { step_id, retry_count, error, .. } => {
            progress.println(format!(
                "  {} {step_id} retry {retry_count}: {}",
                style("↻").yellow(),
                style(error).dim()
            ));
        }
        WorkflowEvent::ApprovalRequested { request } => {
            progress.println(format!(
                "  {} approval required for '{}' (level {}, expires {})",
                style("⏸").magenta(),
                request.step_id,
                request.approval_level,
                until(request.timeout_at, Utc::now()),
            ));
            progress.println(format!("    request {}", style(request.id).dim()));
        }
        WorkflowEvent::ApprovalResolved { outcome, .. } => {
            let label = match outcome {
                ApprovalOutcome::Approved => style(outcome.to_string()).green(),
                ApprovalOutcome::Rejected => style(outcome.to_string()).red(),
                _ => style(outcome.to_string()).yellow(),
            };
            progress.println(format!("  {} approval {label}", style("•").dim()));
        }
        WorkflowEvent::WorkflowCompleted { .. } => {
            progress.println(format!("  {} workflow completed", style("✓").green().bold()));
        }
        WorkflowEvent::WorkflowFailed { failed_step, error, .. } => {
            progress.println(format!(
                "  {} failed at step {}: {}",
                style("✗").red().bold(),
                failed_step + 1,
                error
            ));
        }
        WorkflowEvent::RollbackCompleted { compensated, failed, .. } => {
            progress.println(format!(
                "  {} rolled back: {compensated} compensated, {failed} failed",
                style("↩").yellow().bold()
            ));
        }
    }
    Ok(())
}

/// Answer an approval request according to `mode`. Errors are reported, not
/// propagated: the engine handles an unanswered request on its own.
async fn respond(
    state: &AppState,
    request: &ApprovalRequest,
    mode: DecisionMode,
    approver: &str,
    progress: &ProgressBar,
    json: bool,
) {
    let decision = match mode {
        DecisionMode::ApproveAll => Some((ApprovalAction::Approve, None)),
        DecisionMode::RejectAll => Some((
            ApprovalAction::Reject,
            Some("rejected by --reject-all".to_string()),
        )),
        DecisionMode::Interactive if json || !console::user_attended() => {
            tracing::info!(request_id = %request.id, "waiting for an external approval decision");
            None
        }
        DecisionMode::Interactive => {
            let prompted = tokio::task::block_in_place(|| progress.suspend(|| prompt_decision(request)));
            match prompted {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::warn!(error = %e, "approval prompt failed");
                    None
                }
            }
        }
    };

    let Some((action, comment)) = decision else {
        if !json {
            progress.println(format!(
                "    decide with: {}",
                style(format!("stepgate approve {}", request.id)).dim()
            ));
        }
        return;
    };

    if let Err(e) = state
        .workflow_service
        .submit_approval_decision(request.id, action, approver, comment.as_deref())
        .await
    {
        progress.println(format!("  {} decision not recorded: {e}", style("!").yellow()));
    }
}

fn prompt_decision(request: &ApprovalRequest) -> Result<Option<(ApprovalAction, Option<String>)>> {
    let step_name = request
        .metadata
        .get("step_name")
        .and_then(|v| v.as_str())
        .unwrap_or(&request.step_id);

    let choice = Select::new()
        .with_prompt(format!("Approve '{step_name}' (level {})?", request.approval_level))
        .items(&["Approve", "Reject", "Decide later"])
        .default(0)
        .interact()?;

    let action = match choice {
        0 => ApprovalAction::Approve,
        1 => ApprovalAction::Reject,
        _ => return Ok(None),
    };

    let comment: String = Input::new()
        .with_prompt("Comment (optional)")
        .allow_empty(true)
        .interact_text()?;
    let comment = Some(comment.trim().to_string()).filter(|c| !c.is_empty());

    Ok(Some((action, comment)))
}

// ---------------------------------------------------------------------------
// List / Show
// ---------------------------------------------------------------------------

pub async fn list(state: &AppState, json: bool) -> Result<()> {
    let workflows = state.workflow_service.list_workflows().await?;

    if json {
        let out: Vec<_> = workflows
            .iter()
            .map(|w| {
                serde_json::json!({
                    "id": w.id.to_string(),
                    "name": w.name,
                    "status": w.status.to_string(),
                    "current_step": w.current_step,
                    "steps": w.steps.len(),
                    "priority": w.priority,
                    "created_at": w.created_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if workflows.is_empty() {
        println!();
        println!("  No workflows yet.");
        println!(
            "  Create one with: {}",
            style("stepgate create <file.toml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(Color::Cyan),
            Cell::new("Name"),
            Cell::new("Status"),
            Cell::new("Step"),
            Cell::new("Priority"),
            Cell::new("Created"),
        ]);

    for w in &workflows {
        table.add_row(vec![
            Cell::new(short_id(&w.id)),
            Cell::new(&w.name),
            format_status(w.status),
            Cell::new(step_position(w)),
            Cell::new(w.priority),
            Cell::new(w.created_at.format("%Y-%m-%d %H:%M").to_string()),
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

pub async fn show(state: &AppState, id: &str, json: bool) -> Result<()> {
    let workflow_id = resolve_workflow_id(state, id).await?;
    let workflow = state.workflow_service.get_workflow(workflow_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&workflow)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Workflow:").bold(),
        style(&workflow.name).cyan()
    );
    println!("  ID: {}", workflow.id);
    println!("  Status: {}", styled_status(workflow.status));
    println!("  Step: {}", step_position(&workflow));
    println!("  Priority: {}", workflow.priority);
    if let Some(ref description) = workflow.description {
        println!("  Description: {description}");
    }
    println!("  Created: {}", workflow.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(started) = workflow.started_at {
        println!("  Started: {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = workflow.completed_at {
        println!("  Finished: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }

    let mut steps = Table::new();
    steps
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("ID"),
            Cell::new("Name"),
            Cell::new("Action"),
            Cell::new("Approval"),
            Cell::new("Timeout"),
            Cell::new("Retries"),
        ]);
    for (index, step) in workflow.steps.iter().enumerate() {
        let marker = if index == workflow.current_step && workflow.status.is_active() {
            format!("▶ {}", index + 1)
        } else {
            (index + 1).to_string()
        };
        let approval = if step.requires_approval {
            format!("level {}", step.approval_level)
        } else {
            "-".to_string()
        };
        steps.add_row(vec![
            Cell::new(marker),
            Cell::new(&step.id),
            Cell::new(&step.name),
            Cell::new(&step.action_type),
            Cell::new(approval),
            Cell::new(format!("{}s", step.timeout_secs)),
            Cell::new(step.retry_count),
        ]);
    }
    println!();
    println!("{steps}");

    if !workflow.execution_log.is_empty() {
        let mut log = Table::new();
        log.load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Time").fg(Color::Cyan),
                Cell::new("Event"),
                Cell::new("Step"),
                Cell::new("Details"),
            ]);
        for entry in &workflow.execution_log {
            log.add_row(vec![
                Cell::new(entry.timestamp.format("%H:%M:%S%.3f").to_string()),
                Cell::new(entry.event_type.to_string()),
                Cell::new(entry.step_id.as_deref().unwrap_or("-")),
                Cell::new(truncate(&entry.data.to_string(), 80)),
            ]);
        }
        println!();
        println!("  {}", style("Execution log").bold());
        println!("{log}");
    }

    if let Some(ref snapshot) = workflow.rollback_data {
        println!();
        println!(
            "  {} taken {} at step {} ({})",
            style("Rollback snapshot").bold(),
            snapshot.snapshot_timestamp.format("%Y-%m-%d %H:%M:%S"),
            snapshot.current_step + 1,
            snapshot.completed_steps.join(", ")
        );
    }
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

pub async fn pending(state: &AppState, json: bool) -> Result<()> {
    let requests = state.workflow_service.get_pending_approvals().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&requests)?);
        return Ok(());
    }

    if requests.is_empty() {
        println!();
        println!("  No pending approvals.");
        println!();
        return Ok(());
    }

    let now = Utc::now();
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Request").fg(Color::Cyan),
            Cell::new("Workflow"),
            Cell::new("Step"),
            Cell::new("Level"),
            Cell::new("Expires"),
        ]);

    for r in &requests {
        let workflow_name = r
            .metadata
            .get("workflow_name")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| short_id(&r.workflow_id));
        let expires = if r.is_expired(now) {
            Cell::new("overdue").fg(Color::Red)
        } else {
            Cell::new(until(r.timeout_at, now))
        };
        table.add_row(vec![
            Cell::new(r.id),
            Cell::new(workflow_name),
            Cell::new(&r.step_id),
            Cell::new(r.approval_level),
            expires,
        ]);
    }

    println!();
    println!("{table}");
    println!();

    Ok(())
}

pub async fn decide(
    state: &AppState,
    request_id: &str,
    action: ApprovalAction,
    approver: &str,
    comment: Option<&str>,
    json: bool,
) -> Result<()> {
    let request_id: uuid::Uuid = request_id
        .parse()
        .with_context(|| format!("Invalid request ID: '{request_id}'"))?;

    let response = state
        .workflow_service
        .submit_approval_decision(request_id, action, approver, comment)
        .await
        .with_context(|| format!("Failed to {action} request {request_id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    let verb = match action {
        ApprovalAction::Approve => style("Approved").green().bold(),
        ApprovalAction::Reject => style("Rejected").red().bold(),
    };
    println!();
    println!("  {verb} request {} as {}", style(request_id).cyan(), response.approver);
    println!(
        "  {}",
        style("A running `stepgate run` picks this up on its next sweep.").dim()
    );
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Rollback / Cancel
// ---------------------------------------------------------------------------

pub async fn rollback(state: &AppState, id: &str, reason: &str, json: bool) -> Result<()> {
    let workflow_id = resolve_workflow_id(state, id).await?;
    let outcome = state
        .workflow_service
        .trigger_rollback(workflow_id, reason)
        .await
        .with_context(|| format!("Failed to roll back workflow {workflow_id}"))?;

    match outcome {
        RollbackTrigger::Scheduled => {
            if json {
                println!("{}", serde_json::json!({ "id": workflow_id.to_string(), "rollback": "scheduled" }));
            } else {
                println!();
                println!("  Rollback scheduled for {}", style(workflow_id).cyan());
                println!();
            }
        }
        RollbackTrigger::Executed(report) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }
    Ok(())
}

fn print_report(report: &RollbackReport) {
    println!();
    println!(
        "  {} Rolled back {}: {} compensated, {} skipped, {} failed",
        style("↩").yellow().bold(),
        style(report.workflow_id).cyan(),
        report.compensated(),
        report.skipped(),
        report.failed()
    );

    if report.visited.is_empty() {
        println!("  Nothing to compensate.");
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Compensation"),
        ]);
    for record in &report.visited {
        let action = match &record.action {
            CompensationAction::Executed { handler } => Cell::new(handler).fg(Color::Green),
            CompensationAction::Skipped => Cell::new("skipped (approval)").fg(Color::DarkGrey),
            CompensationAction::Failed { error } => Cell::new(format!("failed: {error}")).fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(record.step_index + 1),
            Cell::new(&record.step_id),
            action,
        ]);
    }
    println!("{table}");
    println!();
}

pub async fn cancel(state: &AppState, id: &str, reason: &str, json: bool) -> Result<()> {
    let workflow_id = resolve_workflow_id(state, id).await?;
    let workflow = state
        .workflow_service
        .cancel_workflow(workflow_id, reason)
        .await
        .with_context(|| format!("Failed to cancel workflow {workflow_id}"))?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "id": workflow.id.to_string(), "status": workflow.status.to_string() })
        );
    } else {
        println!();
        println!(
            "  {} Cancelled workflow '{}'",
            style("*").green().bold(),
            style(&workflow.name).cyan()
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Accept a full UUID or a unique prefix of one.
async fn resolve_workflow_id(state: &AppState, input: &str) -> Result<WorkflowId> {
    if let Ok(id) = input.parse::<WorkflowId>() {
        return Ok(id);
    }
    if input.len() < 4 {
        bail!("Invalid workflow ID '{input}': use the full UUID or at least 4 characters");
    }

    let workflows = state.workflow_service.list_workflows().await?;
    let ids: Vec<WorkflowId> = workflows.iter().map(|w| w.id).collect();
    match_prefix(&ids, input)
}

fn match_prefix(ids: &[WorkflowId], prefix: &str) -> Result<WorkflowId> {
    let prefix = prefix.to_lowercase();
    let matches: Vec<&WorkflowId> = ids
        .iter()
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();
    match matches.as_slice() {
        [id] => Ok(**id),
        [] => bail!("No workflow matches '{prefix}'"),
        _ => bail!("'{prefix}' matches {} workflows, use more characters", matches.len()),
    }
}

fn short_id(id: &WorkflowId) -> String {
    id.to_string().chars().take(8).collect()
}

fn step_position(workflow: &Workflow) -> String {
    let total = workflow.steps.len();
    match workflow.status {
        WorkflowStatus::Pending => format!("0/{total}"),
        WorkflowStatus::Completed => format!("{total}/{total}"),
        _ => format!("{}/{total}", (workflow.current_step + 1).min(total)),
    }
}

/// Human-readable time from `now` until `deadline`.
fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (deadline - now).num_seconds();
    if secs <= 0 {
        return "now".to_string();
    }
    match secs {
        s if s < 60 => format!("in {s}s"),
        s if s < 3_600 => format!("in {}m", s / 60),
        s if s < 86_400 => format!("in {}h {}m", s / 3_600, (s % 3_600) / 60),
        s => format!("in {}d {}h", s / 86_400, (s % 86_400) / 3_600),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{cut}…")
}

fn styled_status(status: WorkflowStatus) -> console::StyledObject<String> {
    let s = status.to_string();
    match status {
        WorkflowStatus::Completed => style(s).green(),
        WorkflowStatus::Failed => style(s).red(),
        WorkflowStatus::RolledBack | WorkflowStatus::Cancelled => style(s).yellow(),
        WorkflowStatus::AwaitingApproval => style(s).magenta(),
        WorkflowStatus::Running => style(s).blue(),
        WorkflowStatus::Pending => style(s).dim(),
    }
}

fn format_status(status: WorkflowStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        WorkflowStatus::Pending => cell.fg(Color::Yellow),
        WorkflowStatus::Running => cell.fg(Color::Blue),
        WorkflowStatus::AwaitingApproval => cell.fg(Color::Magenta),
        WorkflowStatus::Completed => cell.fg(Color::Green),
        WorkflowStatus::Failed => cell.fg(Color::Red),
        WorkflowStatus::RolledBack => cell.fg(Color::DarkYellow),
        WorkflowStatus::Cancelled => cell.fg(Color::DarkGrey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use uuid::Uuid;

    #[test]
    fn loads_toml_definition() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
name = "vendor-payment"
priority = 2

[metadata]
amount = 8200

[[steps]]
id = "validate"
name = "Validate invoice"
action_type = "validate_data"

[[steps]]
id = "finance"
name = "Finance approval"
action_type = "approval"
requires_approval = true
approval_level = 2
timeout_secs = 3600
"#
        )
        .unwrap();

        let draft = load_definition(file.path()).unwrap();
        assert_eq!(draft.name, "vendor-payment");
        assert_eq!(draft.priority, 2);
        assert_eq!(draft.metadata["amount"], 8200);
        assert_eq!(draft.steps.len(), 2);
        assert!(draft.steps[1].requires_approval);
        assert_eq!(draft.steps[1].timeout_secs, Some(3600));
        assert_eq!(draft.steps[0].approval_level, 1);
    }

    #[test]
    fn loads_json_definition() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"name": "deploy", "steps": [{{"id": "ship", "name": "Ship", "action_type": "deploy_system"}}]}}"#
        )
        .unwrap();

        let draft = load_definition(file.path()).unwrap();
        assert_eq!(draft.name, "deploy");
        assert_eq!(draft.steps[0].action_type, "deploy_system");
    }

    #[test]
    fn malformed_definition_names_the_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "name = ").unwrap();
        let err = load_definition(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn bundled_demos_are_valid() {
        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos");
        let mut checked = 0;
        for entry in std::fs::read_dir(&demos).unwrap() {
            let path = entry.unwrap().path();
            let draft = load_definition(&path).unwrap();
            stepgate_core::service::workflow::validate_draft(&draft)
                .unwrap_or_else(|e| panic!("{}: {e}", path.display()));
            checked += 1;
        }
        assert!(checked >= 3);
    }

    #[test]
    fn prefix_matching() {
        let a = WorkflowId::from_uuid(Uuid::parse_str("0190aaaa-0000-7000-8000-000000000001").unwrap());
        let b = WorkflowId::from_uuid(Uuid::parse_str("0190aaab-0000-7000-8000-000000000002").unwrap());
        let ids = [a, b];

        assert_eq!(match_prefix(&ids, "0190AAAB").unwrap(), b);
        assert!(match_prefix(&ids, "0190aaa").is_err());
        assert!(match_prefix(&ids, "ffff").is_err());
    }

    #[test]
    fn until_formats_relative_deadlines() {
        let now = Utc::now();
        assert_eq!(until(now - chrono::Duration::seconds(5), now), "now");
        assert_eq!(until(now + chrono::Duration::seconds(42), now), "in 42s");
        assert_eq!(until(now + chrono::Duration::seconds(3_700), now), "in 1h 1m");
        assert_eq!(until(now + chrono::Duration::days(2), now), "in 2d 0h");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 3), "éé…");
    }

    #[test]
    fn decision_mode_from_flags() {
        assert_eq!(DecisionMode::from_flags(true, false), DecisionMode::ApproveAll);
        assert_eq!(DecisionMode::from_flags(false, true), DecisionMode::RejectAll);
        assert_eq!(DecisionMode::from_flags(false, false), DecisionMode::Interactive);
    }
}
