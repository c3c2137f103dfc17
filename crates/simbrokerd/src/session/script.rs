//! Script execution through the application launcher.
//!
//! Each call writes the script to its own freshly created temp file, so
//! concurrent sessions on one host never share a script path. The file is
//! removed when the call returns.

use std::io::Write;
use std::path::Path;

use simbroker_core::{Failure, FailureKind, Platform, ScriptConfig};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Prefix of generated script file names.
pub const SCRIPT_PREFIX: &str = "simbroker_script_";

/// Runs `lines` through the launcher resolved from `config`.
///
/// Blocks the calling task until the launcher exits and reports its exit
/// status. A non-zero exit is still a completed run.
pub async fn run_script(
    lines: &[String],
    config: &ScriptConfig,
    fallback_root: Option<&Path>,
    platform: Platform,
) -> Result<String, Failure> {
    let launcher = config.launcher_path(fallback_root, platform).ok_or_else(|| {
        Failure::new(
            FailureKind::Launch,
            "no installation root configured for script launcher",
        )
    })?;

    let mut file = tempfile::Builder::new()
        .prefix(SCRIPT_PREFIX)
        .suffix(".py")
        .tempfile()
        .map_err(Failure::io)?;
    for line in lines {
        writeln!(file, "{line}").map_err(Failure::io)?;
    }
    file.flush().map_err(Failure::io)?;

    // Close our handle but keep the path alive until the launcher exits.
    let script_path = file.into_temp_path();

    debug!(
        launcher = %launcher.display(),
        script = %script_path.display(),
        lines = lines.len(),
        "Running script"
    );

    let status = Command::new(&launcher)
        .arg(&*script_path)
        .status()
        .await
        .map_err(|e| {
            Failure::new(
                FailureKind::Launch,
                format!("failed to launch {}: {e}", launcher.display()),
            )
        })?;

    if let Err(e) = script_path.close() {
        warn!(error = %e, "Failed to remove script file");
    }

    if status.success() {
        info!(kind = %config.kind, "Script completed");
    } else {
        warn!(kind = %config.kind, %status, "Script exited with failure status");
    }

    Ok(match status.code() {
        Some(code) => format!("Script executed (exit code {code})"),
        None => "Script executed (terminated by signal)".to_string(),
    })
}
