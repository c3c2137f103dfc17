//! Process-hosted sessions.
//!
//! Stopping a host sends it SIGTERM so it can release the applications its
//! sessions created. A reaper thread waits for the exit and falls back to a
//! hard kill once the grace period is over.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use simbroker_core::HostingMode;
use tracing::{debug, info, warn};

use super::{bind_listener, EphemeralHost, HostError, HostLauncher};

/// Subcommand that runs a single session host.
pub const SERVE_SESSION_COMMAND: &str = "serve-session";

/// Time a host gets to tear its sessions down after SIGTERM.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Interval between exit checks while waiting for a host
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Launches session hosts as child processes of the broker.
///
/// The child is the broker's own executable invoked with
/// `serve-session --host <hostname> --port <port>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    install_root: Option<PathBuf>,

    /// Config file the broker was started with, forwarded to the child
    config_path: Option<PathBuf>,

    terminate_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(program: PathBuf, install_root: Option<PathBuf>) -> Self {
        Self {
            program,
            install_root,
            config_path: None,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
        }
    }

    /// Launcher re-executing the current binary.
    pub fn current_exe(install_root: Option<PathBuf>) -> Result<Self, HostError> {
        let program = std::env::current_exe().map_err(|e| HostError::Spawn(e.to_string()))?;
        Ok(Self::new(program, install_root))
    }

    pub fn with_config(mut self, config_path: Option<PathBuf>) -> Self {
        self.config_path = config_path;
        self
    }

    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    /// Arguments passed to the child.
    pub fn arguments(&self, hostname: &str, port: u16) -> Vec<String> {
        let mut args = vec![
            SERVE_SESSION_COMMAND.to_string(),
            "--host".to_string(),
            hostname.to_string(),
            "--port".to_string(),
            port.to_string(),
        ];
        if let Some(root) = &self.install_root {
            args.push("--install-root".to_string());
            args.push(root.display().to_string());
        }
        if let Some(config) = &self.config_path {
            args.push("--config".to_string());
            args.push(config.display().to_string());
        }
        args
    }
}

impl HostLauncher for ProcessLauncher {
    fn mode(&self) -> HostingMode {
        HostingMode::Process
    }

    fn launch(&self, hostname: &str, port: u16) -> Result<Box<dyn EphemeralHost>, HostError> {
        // Probe the port so collisions are detected before spawning. The
        // probe is dropped right away and the child binds for real.
        drop(bind_listener(hostname, port)?);

        let child = Command::new(&self.program)
            .args(self.arguments(hostname, port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| HostError::Spawn(format!("{}: {e}", self.program.display())))?;

        info!(port, pid = child.id(), "Session host process started");
        Ok(Box::new(ProcessHost::new(port, child, self.terminate_grace)))
    }
}

/// A session host running as a child process.
///
/// `child` is `None` once termination has been handed to the reaper.
#[derive(Debug)]
pub struct ProcessHost {
    port: u16,
    pid: u32,
    child: Option<Child>,
    terminate_grace: Duration,
}

impl ProcessHost {
    pub fn new(port: u16, child: Child, terminate_grace: Duration) -> Self {
        Self {
            port,
            pid: child.id(),
            child: Some(child),
            terminate_grace,
        }
    }
}

impl EphemeralHost for ProcessHost {
    fn mode(&self) -> HostingMode {
        HostingMode::Process
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn has_exited(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(port = self.port, %status, "Session host exited");
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(port = self.port, error = %e, "Failed to poll session host");
                false
            }
        }
    }

    /// Asks the host to shut down and returns without waiting for it.
    fn terminate(&mut self) -> Result<(), HostError> {
        if self.has_exited() {
            return Ok(());
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        request_shutdown(&mut child)?;

        let port = self.port;
        let grace = self.terminate_grace;
        std::thread::Builder::new()
            .name(format!("reap-{port}"))
            .spawn(move || reap(child, port, grace))
            .map_err(|e| HostError::Terminate(e.to_string()))?;

        info!(port, pid = self.pid, "Session host asked to stop");
        Ok(())
    }
}

#[cfg(unix)]
fn request_shutdown(child: &mut Child) -> Result<(), HostError> {
    let pid = libc::pid_t::try_from(child.id()).map_err(|e| HostError::Terminate(e.to_string()))?;
    // The child is not reaped yet, so the pid still names it.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        return Err(HostError::Terminate(
            std::io::Error::last_os_error().to_string(),
        ));
    }
    Ok(())
}

#[cfg(not(unix))]
fn request_shutdown(child: &mut Child) -> Result<(), HostError> {
    child.kill().map_err(|e| HostError::Terminate(e.to_string()))
}

/// Waits up to `grace` for the host to exit, then kills it.
fn reap(mut child: Child, port: u16, grace: Duration) {
    let deadline = Instant::now() + grace;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                info!(port, %status, "Session host terminated");
                return;
            }
            Ok(None) if Instant::now() < deadline => std::thread::sleep(REAP_POLL_INTERVAL),
            Ok(None) => {
                warn!(port, grace_ms = grace.as_millis() as u64, "Session host did not stop in time, killing");
                break;
            }
            Err(e) => {
                warn!(port, error = %e, "Failed to poll session host, killing");
                break;
            }
        }
    }

    if let Err(e) = child.kill() {
        warn!(port, error = %e, "Failed to kill session host");
    }
    // Reap so the child does not linger as a zombie.
    if let Err(e) = child.wait() {
        warn!(port, error = %e, "Failed to reap session host");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments() {
        let launcher = ProcessLauncher::new(PathBuf::from("/usr/bin/simbrokerd"), None);
        assert_eq!(
            launcher.arguments("workerA", 18600),
            vec!["serve-session", "--host", "workerA", "--port", "18600"]
        );

        let launcher = ProcessLauncher::new(
            PathBuf::from("/usr/bin/simbrokerd"),
            Some(PathBuf::from("/opt/em")),
        );
        let args = launcher.arguments("workerA", 18600);
        assert_eq!(&args[5..], ["--install-root", "/opt/em"]);
    }

    #[test]
    fn test_arguments_forward_config() {
        let launcher = ProcessLauncher::new(PathBuf::from("/usr/bin/simbrokerd"), None)
            .with_config(Some(PathBuf::from("/etc/simbroker/custom.toml")));
        let args = launcher.arguments("workerA", 18600);
        assert_eq!(&args[5..], ["--config", "/etc/simbroker/custom.toml"]);
    }

    #[test]
    fn test_spawn_failure() {
        let launcher = ProcessLauncher::new(PathBuf::from("/nonexistent/simbrokerd"), None);
        let result = launcher.launch("127.0.0.1", 0);
        assert!(matches!(result, Err(HostError::Spawn(_))));
    }

    #[cfg(unix)]
    fn is_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    /// Polls until `pid` no longer exists (reaped) or `limit` elapses.
    #[cfg(unix)]
    fn wait_gone(pid: u32, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if !is_alive(pid) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        !is_alive(pid)
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_running_process() {
        let child = Command::new("/bin/sleep").arg("30").spawn().unwrap();
        let mut host = ProcessHost::new(0, child, DEFAULT_TERMINATE_GRACE);
        let pid = host.pid().unwrap();

        assert!(!host.has_exited());
        host.terminate().unwrap();
        assert!(host.has_exited());
        assert!(wait_gone(pid, Duration::from_secs(5)));
        // Terminating again is harmless.
        host.terminate().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_lets_host_clean_up() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("cleaned");
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("trap 'echo done > \"$0\"; exit 0' TERM; while true; do sleep 0.05; done")
            .arg(&marker)
            .spawn()
            .unwrap();
        // Give the shell time to install its trap.
        std::thread::sleep(Duration::from_millis(200));

        let mut host = ProcessHost::new(0, child, Duration::from_secs(5));
        let pid = host.pid().unwrap();
        host.terminate().unwrap();

        assert!(wait_gone(pid, Duration::from_secs(5)));
        assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "done");
    }

    #[cfg(unix)]
    #[test]
    fn test_terminate_kills_host_ignoring_sigterm() {
        let child = Command::new("/bin/sh")
            .arg("-c")
            .arg("trap '' TERM; while true; do sleep 0.05; done")
            .spawn()
            .unwrap();
        std::thread::sleep(Duration::from_millis(200));

        let mut host = ProcessHost::new(0, child, Duration::from_millis(200));
        let pid = host.pid().unwrap();
        host.terminate().unwrap();

        assert!(wait_gone(pid, Duration::from_secs(5)));
    }
}
