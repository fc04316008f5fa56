//! Child-process entrypoint for the `worker` subcommand.
//!
//! Stdout is the reply protocol, one JSON line per message; logs go to
//! stderr. A oneshot worker serves exactly one request and exits; a
//! browser worker loops until it reads the stop sentinel or stdin
//! closes.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::execution::ipc::{decode_line, encode_line, WorkerReply, WorkerRequest};
use crate::execution::worker::{execute_society_task, ExecutionOutcome};
use crate::registry::{BrowserMode, TaskResult};
use crate::society::{CommandSocietyRunner, ModuleCatalog};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerMode {
    /// Serve one request, reply, exit.
    Oneshot,
    /// Persistent pool member; loops until stopped.
    Browser,
}

pub async fn run_worker(mode: WorkerMode, config: GatewayConfig) -> Result<()> {
    let catalog = ModuleCatalog::with_overrides(&config.modules);
    let runner = CommandSocietyRunner::new(&config.society);
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    info!(?mode, "worker ready");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request = match decode_line::<WorkerRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "discarding unparseable request line");
                continue;
            }
        };
        match request {
            WorkerRequest::Stop => {
                info!("stop sentinel received");
                break;
            }
            WorkerRequest::Run {
                task_id,
                module,
                query,
            } => {
                serve_one(&runner, &catalog, &config, task_id, &module, &query, &mut stdout)
                    .await?;
                if mode == WorkerMode::Oneshot {
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn serve_one(
    runner: &CommandSocietyRunner,
    catalog: &ModuleCatalog,
    config: &GatewayConfig,
    task_id: Uuid,
    module_name: &str,
    query: &str,
    stdout: &mut Stdout,
) -> Result<()> {
    let Some(manifest) = catalog.get(module_name) else {
        let reply = WorkerReply::Error {
            task_id,
            error: format!("unknown module '{module_name}'"),
            fallback: TaskResult::message(format!(
                "Task failed: module '{module_name}' is not available in this worker."
            )),
        };
        return write_reply(stdout, &reply).await;
    };

    let browser_mode = manifest
        .requires_visible_browser
        .then_some(BrowserMode::Visible);
    write_reply(
        stdout,
        &WorkerReply::Processing {
            task_id,
            message: "processing".to_string(),
            browser_mode,
        },
    )
    .await?;

    // Workers have no cross-process cancellation channel; the parent
    // freezes cancelled entries and kills the process when needed.
    let outcome = execute_society_task(
        runner,
        manifest,
        query,
        &config.browser,
        &config.pools,
        &CancellationToken::new(),
    )
    .await;

    let reply = match outcome {
        ExecutionOutcome::Success(result) => WorkerReply::Completed { task_id, result },
        ExecutionOutcome::Failure { error, fallback }
        | ExecutionOutcome::Timeout { error, fallback } => WorkerReply::Error {
            task_id,
            error,
            fallback,
        },
        ExecutionOutcome::Cancelled => WorkerReply::Error {
            task_id,
            error: "execution was cancelled".to_string(),
            fallback: TaskResult::message("Task cancelled."),
        },
    };
    write_reply(stdout, &reply).await
}

async fn write_reply(stdout: &mut Stdout, reply: &WorkerReply) -> Result<()> {
    let line = match encode_line(reply) {
        Ok(line) => line,
        Err(e) => {
            // Degrade to a minimal shape rather than dropping the reply.
            warn!(error = %e, "reply not serializable, degrading");
            let simplified = WorkerReply::Error {
                task_id: reply.task_id(),
                error: "result payload was not serializable".to_string(),
                fallback: TaskResult::message("Task completed but its payload was unreadable."),
            };
            encode_line(&simplified)?
        }
    };
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
