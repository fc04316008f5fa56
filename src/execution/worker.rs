//! The execution function run inside workers (and in-process for plain
//! modules): browser environment diagnostics plus a staged watchdog
//! around the society call.
//!
//! The contract here is that nothing escapes as a panic or error. Every
//! path collapses into an [`ExecutionOutcome`] carrying a well-formed
//! result payload, degraded where necessary.

use std::path::Path;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{BrowserConfig, PoolConfig};
use crate::registry::TaskResult;
use crate::society::{ModuleManifest, SocietyRunner};

/// Final shape of one execution attempt. Terminal failures still carry a
/// readable fallback result.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success(TaskResult),
    Failure { error: String, fallback: TaskResult },
    Timeout { error: String, fallback: TaskResult },
    Cancelled,
}

impl ExecutionOutcome {
    fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        let fallback = TaskResult::message(format!("Task failed: {error}"));
        ExecutionOutcome::Failure { error, fallback }
    }

    fn timeout(error: impl Into<String>) -> Self {
        let error = error.into();
        let fallback = TaskResult::message(format!("Task timed out: {error}"));
        ExecutionOutcome::Timeout { error, fallback }
    }
}

/// Well-known browser locations probed before falling back to PATH lookup.
const BROWSER_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/opt/google/chrome/chrome",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

const BROWSER_BINARIES: &[&str] = &["google-chrome", "chromium", "chromium-browser", "chrome"];

/// Locate a usable browser executable: configured paths first, then the
/// built-in list, then PATH.
pub fn find_browser(config: &BrowserConfig) -> Option<String> {
    for path in config.executable_paths.iter().map(String::as_str).chain(BROWSER_PATHS.iter().copied()) {
        if Path::new(path).exists() {
            return Some(path.to_string());
        }
    }
    for binary in BROWSER_BINARIES {
        if let Ok(found) = which::which(binary) {
            return Some(found.to_string_lossy().into_owned());
        }
    }
    None
}

/// Best-effort fallback installation. Failure is logged and swallowed;
/// the caller re-probes afterwards.
async fn try_install_browser(config: &BrowserConfig) {
    let Some((program, args)) = config.install_command.split_first() else {
        return;
    };
    info!(command = %program, "browser not found, attempting fallback install");
    let run = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();
    match tokio::time::timeout(config.install_timeout(), run).await {
        Ok(Ok(output)) if output.status.success() => {
            info!("fallback browser install completed");
        }
        Ok(Ok(output)) => {
            warn!(status = %output.status, "fallback browser install failed");
        }
        Ok(Err(e)) => warn!(error = %e, "fallback browser install could not start"),
        Err(_) => warn!("fallback browser install timed out"),
    }
}

/// Run one society task to a guaranteed outcome.
///
/// Visible-browser modules get an environment check first; a missing
/// browser short-circuits into an actionable error outcome instead of a
/// doomed launch. The society call itself runs under a two-stage
/// watchdog: a short launch window, then the long completion bound. The
/// cancellation token is observed throughout.
pub async fn execute_society_task(
    runner: &dyn SocietyRunner,
    module: &ModuleManifest,
    query: &str,
    browser: &BrowserConfig,
    pools: &PoolConfig,
    cancel: &CancellationToken,
) -> ExecutionOutcome {
    if module.requires_visible_browser {
        let mut found = find_browser(browser);
        if found.is_none() {
            try_install_browser(browser).await;
            found = find_browser(browser);
        }
        match found {
            Some(path) => info!(browser = %path, module = %module.name, "browser available"),
            None => {
                return ExecutionOutcome::failure(
                    "No Chrome or Chromium installation found. Install Chrome and retry, \
                     or use a module that does not require a visible browser.",
                );
            }
        }
    }

    if cancel.is_cancelled() {
        return ExecutionOutcome::Cancelled;
    }

    let run = runner.run_society(module, query);
    tokio::pin!(run);

    // Stage one: the launch window. A visible-browser run that produces
    // nothing in this window is most often a browser that never came up.
    tokio::select! {
        result = &mut run => return collapse(result),
        _ = cancel.cancelled() => return ExecutionOutcome::Cancelled,
        _ = sleep(pools.launch_timeout()) => {
            info!(module = %module.name, "launch window passed, execution in progress");
        }
    }

    let remaining = pools
        .completion_timeout()
        .saturating_sub(pools.launch_timeout())
        .max(Duration::from_secs(1));
    tokio::select! {
        result = &mut run => collapse(result),
        _ = cancel.cancelled() => ExecutionOutcome::Cancelled,
        _ = sleep(remaining) => {
            let detail = if module.requires_visible_browser {
                "execution exceeded the completion bound; the browser may be stuck"
            } else {
                "execution exceeded the completion bound"
            };
            warn!(module = %module.name, "society run timed out");
            ExecutionOutcome::timeout(detail)
        }
    }
}

fn collapse(result: crate::Result<TaskResult>) -> ExecutionOutcome {
    match result {
        Ok(result) => ExecutionOutcome::Success(result),
        Err(e) => ExecutionOutcome::failure(e.to_string()),
    }
}
