//! Thread-hosted sessions.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use simbroker_core::HostingMode;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{bind_listener, EphemeralHost, HostError, HostLauncher};
use crate::server::Server;
use crate::session::{ApplicationFactory, SessionSettings};

/// Launches session hosts on dedicated threads inside the broker process.
///
/// Each thread runs its own single-threaded runtime, so a blocking
/// application call in one session cannot stall the broker or another
/// session.
#[derive(Clone)]
pub struct ThreadLauncher {
    factory: Arc<dyn ApplicationFactory>,
    settings: SessionSettings,
    idle_timeout: Option<Duration>,
}

impl ThreadLauncher {
    pub fn new(factory: Arc<dyn ApplicationFactory>, settings: SessionSettings) -> Self {
        Self {
            factory,
            settings,
            idle_timeout: None,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

impl HostLauncher for ThreadLauncher {
    fn mode(&self) -> HostingMode {
        HostingMode::Thread
    }

    fn launch(&self, hostname: &str, port: u16) -> Result<Box<dyn EphemeralHost>, HostError> {
        // Bind on the caller's thread so collisions surface synchronously.
        let listener = bind_listener(hostname, port)?;
        listener
            .set_nonblocking(true)
            .map_err(|e| HostError::Bind {
                addr: format!("{hostname}:{port}"),
                error: e.to_string(),
            })?;

        let factory = Arc::clone(&self.factory);
        let settings = self.settings.clone();
        let idle_timeout = self.idle_timeout;

        let handle = std::thread::Builder::new()
            .name(format!("session-{port}"))
            .spawn(move || serve_session(listener, factory, settings, idle_timeout))
            .map_err(|e| HostError::Spawn(e.to_string()))?;

        info!(port, "Session host thread started");
        Ok(Box::new(ThreadHost { port, handle }))
    }
}

/// Thread body: runs a session server until its listener fails.
fn serve_session(
    listener: StdTcpListener,
    factory: Arc<dyn ApplicationFactory>,
    settings: SessionSettings,
    idle_timeout: Option<Duration>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build session runtime");
            return;
        }
    };

    let result = runtime.block_on(async move {
        let listener = TcpListener::from_std(listener)?;
        Server::session(listener, factory, settings, CancellationToken::new())
            .with_idle_timeout(idle_timeout)
            .run()
            .await
            .map_err(std::io::Error::other)
    });

    if let Err(e) = result {
        error!(error = %e, "Session host thread stopped");
    }
}

/// A session host running on a broker thread.
pub struct ThreadHost {
    port: u16,
    handle: JoinHandle<()>,
}

impl EphemeralHost for ThreadHost {
    fn mode(&self) -> HostingMode {
        HostingMode::Thread
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn has_exited(&mut self) -> bool {
        self.handle.is_finished()
    }

    fn terminate(&mut self) -> Result<(), HostError> {
        debug!(port = self.port, "Thread-hosted session cannot be terminated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DesktopFactory;

    fn launcher() -> ThreadLauncher {
        ThreadLauncher::new(
            Arc::new(DesktopFactory::new(None)),
            SessionSettings::default(),
        )
    }

    fn free_port() -> u16 {
        let probe = StdTcpListener::bind(("127.0.0.1", 0)).unwrap();
        probe.local_addr().unwrap().port()
    }

    #[test]
    fn test_thread_host_keeps_port_after_terminate() {
        let launcher = launcher();
        let port = free_port();

        let mut host = launcher.launch("127.0.0.1", port).unwrap();
        assert_eq!(host.mode(), HostingMode::Thread);
        assert!(host.pid().is_none());

        host.terminate().unwrap();
        assert!(!host.has_exited());

        // The thread still owns the port, so a relaunch reports a collision.
        let again = launcher.launch("127.0.0.1", port);
        assert!(matches!(again, Err(HostError::PortUnavailable { .. })));
    }

    #[test]
    fn test_thread_host_accepts_connections() {
        let port = free_port();
        let _host = launcher().launch("127.0.0.1", port).unwrap();
        assert!(std::net::TcpStream::connect(("127.0.0.1", port)).is_ok());
    }
}
