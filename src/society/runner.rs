//! Execution boundary for the external agent society.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SocietyConfig;
use crate::error::{GatewayError, Result};
use crate::registry::TaskResult;
use crate::society::ModuleManifest;

/// Wire shape the society command prints on its final stdout line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocietyOutcome {
    pub answer: String,
    #[serde(default)]
    pub chat_history: Vec<Value>,
    #[serde(default)]
    pub token_info: Map<String, Value>,
}

impl From<SocietyOutcome> for TaskResult {
    fn from(outcome: SocietyOutcome) -> Self {
        TaskResult {
            answer: outcome.answer,
            chat_history: outcome.chat_history,
            token_info: outcome.token_info,
        }
    }
}

/// Runs one society collaboration to completion and yields its result.
///
/// Implementations are opaque to the gateway; the dispatcher only decides
/// WHERE a run happens, never how the agents collaborate.
#[async_trait]
pub trait SocietyRunner: Send + Sync {
    async fn run_society(&self, module: &ModuleManifest, query: &str) -> Result<TaskResult>;
}

/// Invokes the society as an external command.
///
/// The command receives the module name and query as arguments, runs the
/// collaboration, and prints a [`SocietyOutcome`] JSON document as its
/// final stdout line. Diagnostic output before that line is ignored.
pub struct CommandSocietyRunner {
    command: String,
    base_args: Vec<String>,
}

impl CommandSocietyRunner {
    pub fn new(config: &SocietyConfig) -> Self {
        Self {
            command: config.command.clone(),
            base_args: config.args.clone(),
        }
    }

    fn parse_outcome(stdout: &str) -> Result<SocietyOutcome> {
        let line = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| {
                GatewayError::Society("society command produced no output".to_string())
            })?;
        serde_json::from_str(line).map_err(|e| {
            GatewayError::Society(format!("unparseable society output: {e}"))
        })
    }
}

#[async_trait]
impl SocietyRunner for CommandSocietyRunner {
    async fn run_society(&self, module: &ModuleManifest, query: &str) -> Result<TaskResult> {
        info!(
            module = %module.name,
            query_preview = %query.chars().take(60).collect::<String>(),
            "launching society command"
        );

        let mut command = Command::new(&self.command);
        command
            .args(&self.base_args)
            .arg("--module")
            .arg(&module.name)
            .arg(query)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if module.requires_visible_browser {
            command.env("SOCIETY_BROWSER_HEADLESS", "0");
        }

        let output = command.output().await.map_err(|e| {
            GatewayError::Society(format!("failed to launch {}: {e}", self.command))
        })?;

        if !output.status.success() {
            return Err(GatewayError::Society(format!(
                "society command exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outcome = Self::parse_outcome(&stdout)?;
        debug!(module = %module.name, "society command completed");
        Ok(outcome.into())
    }
}
