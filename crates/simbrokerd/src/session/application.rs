//! Application handles and the factory that creates them.
//!
//! The broker treats an application as opaque: it can be created from an
//! [`AppRequest`], called through [`ApplicationHandle::invoke`] by the
//! remote client, and released. Nothing else is interpreted.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use simbroker_core::{AppKind, AppRequest, Failure, FailureKind, Platform};
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// One running application instance owned by a session.
///
/// Sessions are shared by reference across await points, so handles must
/// be `Sync` as well as `Send`.
#[async_trait]
pub trait ApplicationHandle: Send + Sync {
    fn kind(&self) -> AppKind;

    /// Short description shown to remote callers.
    fn describe(&self) -> String;

    /// Methods the handle knows about. Informational only: calls to
    /// other names are still forwarded.
    fn methods(&self) -> Vec<String> {
        Vec::new()
    }

    /// Calls a method on the application.
    async fn invoke(&mut self, method: &str, args: Vec<Value>) -> Result<Value, Failure>;

    /// Shuts the application down. Called at most once per handle.
    async fn release(&mut self) -> Result<(), Failure>;
}

/// Constructs application handles from requests.
#[async_trait]
pub trait ApplicationFactory: Send + Sync {
    async fn create(&self, request: &AppRequest) -> Result<Box<dyn ApplicationHandle>, Failure>;
}

// ============================================================================
// Desktop process factory
// ============================================================================

/// Factory launching the simulation desktop as a child process.
#[derive(Debug, Clone)]
pub struct DesktopFactory {
    install_root: Option<PathBuf>,
    platform: Platform,
}

impl DesktopFactory {
    pub fn new(install_root: Option<PathBuf>) -> Self {
        Self {
            install_root,
            platform: Platform::current(),
        }
    }

    /// Command line arguments for a request.
    pub fn arguments(request: &AppRequest) -> Vec<String> {
        let mut args = Vec::new();
        match request {
            AppRequest::Layout(params) => {
                args.push("-layout".to_string());
                if let Some(path) = &params.path {
                    args.push(path.clone());
                }
                if let Some(cell) = &params.cell {
                    args.push("-cell".to_string());
                    args.push(cell.clone());
                }
            }
            other => {
                if let Some(params) = other.design_params() {
                    if params.non_graphical {
                        args.push("-ng".to_string());
                    }
                    args.push("-product".to_string());
                    args.push(other.kind().as_str().to_string());
                    if let Some(design) = &params.design {
                        args.push("-design".to_string());
                        args.push(design.clone());
                    }
                    if let Some(solution) = &params.solution_type {
                        args.push("-solution".to_string());
                        args.push(solution.clone());
                    }
                    if let Some(project) = &params.project {
                        args.push(project.clone());
                    }
                }
            }
        }
        args
    }
}

#[async_trait]
impl ApplicationFactory for DesktopFactory {
    async fn create(&self, request: &AppRequest) -> Result<Box<dyn ApplicationHandle>, Failure> {
        let kind = request.kind();
        let root = self.install_root.as_deref().ok_or_else(|| {
            Failure::new(FailureKind::Launch, "no installation root configured")
        })?;
        let program = root.join(kind.launcher_name(self.platform));
        let args = Self::arguments(request);

        debug!(program = %program.display(), ?args, "Launching application");

        let child = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Failure::new(
                    FailureKind::Launch,
                    format!("failed to launch {}: {e}", program.display()),
                )
            })?;

        info!(kind = %kind, pid = ?child.id(), "Application started");

        Ok(Box::new(DesktopApplication {
            kind,
            request: request.clone(),
            child,
        }))
    }
}

/// A desktop application running as a child process.
pub struct DesktopApplication {
    kind: AppKind,
    request: AppRequest,
    child: Child,
}

#[async_trait]
impl ApplicationHandle for DesktopApplication {
    fn kind(&self) -> AppKind {
        self.kind
    }

    fn describe(&self) -> String {
        match self.child.id() {
            Some(pid) => format!("{} (pid {pid})", self.kind),
            None => format!("{} (exited)", self.kind),
        }
    }

    fn methods(&self) -> Vec<String> {
        ["pid", "is_running", "request"]
            .iter()
            .map(|m| m.to_string())
            .collect()
    }

    async fn invoke(&mut self, method: &str, _args: Vec<Value>) -> Result<Value, Failure> {
        match method {
            "pid" => Ok(json!(self.child.id())),
            "is_running" => {
                let running = matches!(self.child.try_wait(), Ok(None));
                Ok(json!(running))
            }
            "request" => serde_json::to_value(&self.request).map_err(Failure::io),
            other => Err(Failure::new(
                FailureKind::Application,
                format!("{} does not implement '{other}'", self.kind),
            )),
        }
    }

    async fn release(&mut self) -> Result<(), Failure> {
        if let Ok(Some(status)) = self.child.try_wait() {
            debug!(kind = %self.kind, %status, "Application already exited");
            return Ok(());
        }
        self.child.kill().await.map_err(Failure::io)?;
        info!(kind = %self.kind, "Application released");
        Ok(())
    }
}
