//! Stepgate CLI entry point.
//!
//! Binary name: `stepgate`
//!
//! Parses CLI arguments, initializes tracing, the database and the workflow
//! service, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::workflow::DecisionMode;
use cli::{Cli, Commands};
use stepgate_types::approval::ApprovalAction;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,stepgate_core=debug,stepgate_infra=debug",
        _ => "trace",
    };
    if let Err(e) = stepgate_observe::tracing_setup::init_tracing(filter, cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = dispatch(cli).await;
    stepgate_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepgate", &mut std::io::stdout());
        return Ok(());
    }

    // Initialize application state (config, DB, services)
    let state = AppState::init().await?;
    let json = cli.json;

    match cli.command {
        Commands::Create { file } => {
            cli::workflow::create(&state, &file, json).await?;
        }

        Commands::Run {
            id,
            approve_all,
            reject_all,
            approver,
        } => {
            let mode = DecisionMode::from_flags(approve_all, reject_all);
            cli::workflow::run(&state, &id, mode, &approver, json, cli.quiet).await?;
        }

        Commands::List => {
            cli::workflow::list(&state, json).await?;
        }

        Commands::Show { id } => {
            cli::workflow::show(&state, &id, json).await?;
        }

        Commands::Pending => {
            cli::workflow::pending(&state, json).await?;
        }

        Commands::Approve {
            request_id,
            approver,
            comment,
        } => {
            cli::workflow::decide(
                &state,
                &request_id,
                ApprovalAction::Approve,
                &approver,
                comment.as_deref(),
                json,
            )
            .await?;
        }

        Commands::Reject {
            request_id,
            approver,
            comment,
        } => {
            cli::workflow::decide(
                &state,
                &request_id,
                ApprovalAction::Reject,
                &approver,
                comment.as_deref(),
                json,
            )
            .await?;
        }

        Commands::Rollback { id, reason } => {
            cli::workflow::rollback(&state, &id, &reason, json).await?;
        }

        Commands::Cancel { id, reason } => {
            cli::workflow::cancel(&state, &id, &reason, json).await?;
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}
