//! CLI command definitions for the `stepgate` binary.
//!
//! Uses clap derive macros for argument parsing. Every subcommand operates
//! on workflows or their approval requests.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run multi-step workflows with human approval gates and automatic rollback.
#[derive(Parser)]
#[command(name = "stepgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a workflow from a TOML or JSON definition file.
    Create {
        /// Path to the definition file (.toml or .json).
        file: PathBuf,
    },

    /// Start a pending workflow and follow it to completion or rollback.
    Run {
        /// Workflow ID (full UUID or unique prefix).
        id: String,

        /// Approve every approval request raised by this run.
        #[arg(long, conflicts_with = "reject_all")]
        approve_all: bool,

        /// Reject every approval request raised by this run.
        #[arg(long)]
        reject_all: bool,

        /// Name recorded as the approver for decisions made by this command.
        #[arg(long, env = "STEPGATE_APPROVER", default_value = "cli")]
        approver: String,
    },

    /// List workflows, newest first.
    #[command(alias = "ls")]
    List,

    /// Show a workflow with its steps and execution log.
    Show {
        /// Workflow ID (full UUID or unique prefix).
        id: String,
    },

    /// List pending approval requests.
    Pending,

    /// Approve a pending approval request.
    Approve {
        /// Approval request UUID.
        request_id: String,

        #[arg(long, env = "STEPGATE_APPROVER", default_value = "cli")]
        approver: String,

        #[arg(long, short)]
        comment: Option<String>,
    },

    /// Reject a pending approval request.
    Reject {
        /// Approval request UUID.
        request_id: String,

        #[arg(long, env = "STEPGATE_APPROVER", default_value = "cli")]
        approver: String,

        #[arg(long, short)]
        comment: Option<String>,
    },

    /// Compensate a failed (or orphaned) workflow.
    Rollback {
        /// Workflow ID (full UUID or unique prefix).
        id: String,

        /// Reason recorded in the execution log and notifications.
        #[arg(long)]
        reason: String,
    },

    /// Cancel a workflow that has not started.
    Cancel {
        /// Workflow ID (full UUID or unique prefix).
        id: String,

        #[arg(long, default_value = "cancelled via CLI")]
        reason: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
