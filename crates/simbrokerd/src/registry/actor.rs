//! Registry actor - owns the port → session host table.
//!
//! The RegistryActor is the single owner of the table. It receives
//! commands via an mpsc channel and processes them sequentially.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Response send failures are ignored (the caller went away)

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use simbroker_core::PortRange;
use simbroker_protocol::ServiceInfo;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::commands::{RegistryCommand, RegistryError};
use crate::host::{EphemeralHost, HostError, HostLauncher};

/// One registered session host.
struct ServiceEntry {
    hostname: String,
    host: Box<dyn EphemeralHost>,
    started_at: DateTime<Utc>,
}

/// The registry actor.
///
/// # Invariants
///
/// - No two entries share a port.
/// - Every port in the table lies in the configured range.
/// - An entry exists only for a host that launched successfully.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryCommand>,

    launcher: Arc<dyn HostLauncher>,

    /// Range ports are drawn from
    range: PortRange,

    /// Draws per `StartService` before giving up
    max_attempts: u32,

    /// Live session hosts keyed by port
    services: BTreeMap<u16, ServiceEntry>,

    rng: StdRng,
}

impl RegistryActor {
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        launcher: Arc<dyn HostLauncher>,
        range: PortRange,
        max_attempts: u32,
    ) -> Self {
        Self {
            receiver,
            launcher,
            range,
            max_attempts,
            services: BTreeMap::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Replaces the random source (deterministic draws in tests).
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped),
    /// then terminates whatever hosts are still registered.
    pub async fn run(mut self) {
        info!(range = %self.range, mode = %self.launcher.mode(), "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        let terminated = self.handle_shutdown();
        info!(terminated, "Registry actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::StartService {
                hostname,
                respond_to,
            } => {
                let result = self.handle_start(hostname);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::StopService { port, respond_to } => {
                let result = self.handle_stop(port);
                let _ = respond_to.send(result);
            }
            RegistryCommand::ListServices { respond_to } => {
                let result = self.handle_list();
                let _ = respond_to.send(result);
            }
            RegistryCommand::Shutdown { respond_to } => {
                let result = self.handle_shutdown();
                let _ = respond_to.send(result);
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Draws ports until a host launches on one that is not registered.
    fn handle_start(&mut self, hostname: String) -> Result<u16, RegistryError> {
        self.reap_exited();

        for attempt in 1..=self.max_attempts {
            let port = self.range.draw(&mut self.rng);

            if self.services.contains_key(&port) {
                debug!(port, attempt, "Drawn port already registered");
                continue;
            }

            match self.launcher.launch(&hostname, port) {
                Ok(host) => {
                    info!(
                        port,
                        hostname = %hostname,
                        mode = %host.mode(),
                        pid = ?host.pid(),
                        "Session host registered"
                    );
                    self.services.insert(
                        port,
                        ServiceEntry {
                            hostname,
                            host,
                            started_at: Utc::now(),
                        },
                    );
                    return Ok(port);
                }
                Err(HostError::PortUnavailable { .. }) => {
                    debug!(port, attempt, "Drawn port in use by another process");
                }
                Err(e) => {
                    warn!(port, hostname = %hostname, error = %e, "Session host failed to start");
                    return Err(RegistryError::Launch(e.to_string()));
                }
            }
        }

        warn!(
            attempts = self.max_attempts,
            registered = self.services.len(),
            "Session port allocation exhausted"
        );
        Err(RegistryError::AllocationExhausted {
            attempts: self.max_attempts,
        })
    }

    fn handle_stop(&mut self, port: u16) -> bool {
        self.reap_exited();
        let Some(mut entry) = self.services.remove(&port) else {
            debug!(port, "Stop requested for unknown port");
            return true;
        };

        if entry.host.mode().supports_termination() {
            if let Err(e) = entry.host.terminate() {
                warn!(port, error = %e, "Failed to terminate session host");
            }
        } else {
            debug!(port, "Forgetting thread-hosted session; its port stays bound");
        }

        info!(port, hostname = %entry.hostname, "Session host stopped");
        true
    }

    fn handle_list(&mut self) -> Vec<ServiceInfo> {
        self.reap_exited();
        self.services
            .iter()
            .map(|(port, entry)| ServiceInfo {
                port: *port,
                hostname: entry.hostname.clone(),
                hosting: entry.host.mode(),
                pid: entry.host.pid(),
                started_at: entry.started_at,
            })
            .collect()
    }

    fn handle_shutdown(&mut self) -> usize {
        let mut terminated = 0;
        for (port, mut entry) in std::mem::take(&mut self.services) {
            if !entry.host.mode().supports_termination() {
                continue;
            }
            match entry.host.terminate() {
                Ok(()) => terminated += 1,
                Err(e) => warn!(port, error = %e, "Failed to terminate session host"),
            }
        }
        terminated
    }

    /// Drops entries whose host already stopped on its own.
    fn reap_exited(&mut self) {
        self.services.retain(|port, entry| {
            if entry.host.has_exited() {
                info!(port = *port, hostname = %entry.hostname, "Reaped exited session host");
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbroker_core::HostingMode;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct HostState {
        terminated: AtomicUsize,
        exited: AtomicBool,
    }

    struct FakeHost {
        mode: HostingMode,
        state: Arc<HostState>,
    }

    impl EphemeralHost for FakeHost {
        fn mode(&self) -> HostingMode {
            self.mode
        }

        fn pid(&self) -> Option<u32> {
            None
        }

        fn has_exited(&mut self) -> bool {
            self.state.exited.load(Ordering::SeqCst)
        }

        fn terminate(&mut self) -> Result<(), HostError> {
            self.state.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FakeLauncher {
        mode: HostingMode,
        /// Ports some other process holds
        busy: HashSet<u16>,
        fail: bool,
        hosts: Mutex<Vec<(u16, Arc<HostState>)>>,
    }

    impl FakeLauncher {
        fn new(mode: HostingMode) -> Self {
            Self {
                mode,
                busy: HashSet::new(),
                fail: false,
                hosts: Mutex::new(Vec::new()),
            }
        }

        fn state(&self, port: u16) -> Arc<HostState> {
            let hosts = self.hosts.lock().unwrap();
            let (_, state) = hosts.iter().find(|(p, _)| *p == port).unwrap();
            Arc::clone(state)
        }
    }

    impl HostLauncher for FakeLauncher {
        fn mode(&self) -> HostingMode {
            self.mode
        }

        fn launch(&self, _hostname: &str, port: u16) -> Result<Box<dyn EphemeralHost>, HostError> {
            if self.fail {
                return Err(HostError::Spawn("no executable".to_string()));
            }
            if self.busy.contains(&port) {
                return Err(HostError::PortUnavailable { port });
            }
            let state = Arc::new(HostState::default());
            self.hosts.lock().unwrap().push((port, Arc::clone(&state)));
            Ok(Box::new(FakeHost {
                mode: self.mode,
                state,
            }))
        }
    }

    fn create_actor(launcher: Arc<FakeLauncher>, range: PortRange) -> RegistryActor {
        let (_tx, rx) = mpsc::channel(16);
        RegistryActor::new(rx, launcher, range, 64).with_rng(StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_start_registers_port_in_range() {
        let launcher = Arc::new(FakeLauncher::new(HostingMode::Process));
        let range = PortRange::new(18500, 20000);
        let mut actor = create_actor(launcher, range);

        let port = actor.handle_start("workerA".to_string()).unwrap();
        assert!(range.contains(port));
        assert_eq!(actor.service_count(), 1);

        let services = actor.handle_list();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].port, port);
        assert_eq!(services[0].hostname, "workerA");
    }

    #[test]
    fn test_ports_are_distinct_until_range_is_full() {
        let launcher = Arc::new(FakeLauncher::new(HostingMode::Process));
        let mut actor = create_actor(launcher, PortRange::new(30000, 30003));

        let mut ports = HashSet::new();
        for _ in 0..4 {
            ports.insert(actor.handle_start("localhost".to_string()).unwrap());
        }
        assert_eq!(ports.len(), 4);

        let err = actor.handle_start("localhost".to_string()).unwrap_err();
        assert_eq!(err, RegistryError::AllocationExhausted { attempts: 64 });
        assert_eq!(actor.service_count(), 4);
    }

    #[test]
    fn test_busy_ports_are_skipped() {
        let mut launcher = FakeLauncher::new(HostingMode::Process);
        launcher.busy = (30000..=30009).filter(|p| p % 2 == 0).collect();
        let mut actor = create_actor(Arc::new(launcher), PortRange::new(30000, 30009));

        for _ in 0..3 {
            let port = actor.handle_start("localhost".to_string()).unwrap();
            assert_eq!(port % 2, 1);
        }
    }

    #[test]
    fn test_launch_failure_registers_nothing() {
        let mut launcher = FakeLauncher::new(HostingMode::Process);
        launcher.fail = true;
        let mut actor = create_actor(Arc::new(launcher), PortRange::default());

        let err = actor.handle_start("localhost".to_string()).unwrap_err();
        assert!(matches!(err, RegistryError::Launch(_)));
        assert_eq!(actor.service_count(), 0);
    }

    #[test]
    fn test_stop_terminates_process_host() {
        let launcher = Arc::new(FakeLauncher::new(HostingMode::Process));
        let mut actor = create_actor(Arc::clone(&launcher), PortRange::default());

        let port = actor.handle_start("localhost".to_string()).unwrap();
        assert!(actor.handle_stop(port));
        assert_eq!(launcher.state(port).terminated.load(Ordering::SeqCst), 1);
        assert_eq!(actor.service_count(), 0);

        // Second stop of the same port is accepted and does nothing.
        assert!(actor.handle_stop(port));
        assert_eq!(launcher.state(port).terminated.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_thread_host_only_forgets() {
        let launcher = Arc::new(FakeLauncher::new(HostingMode::Thread));
        let mut actor = create_actor(Arc::clone(&launcher), PortRange::default());

        let port = actor.handle_start("localhost".to_string()).unwrap();
        assert!(actor.handle_stop(port));
        assert_eq!(launcher.state(port).terminated.load(Ordering::SeqCst), 0);
        assert_eq!(actor.service_count(), 0);
    }

    #[test]
    fn test_stop_unknown_port() {
        let launcher = Arc::new(FakeLauncher::new(HostingMode::Process));
        let mut actor = create_actor(launcher, PortRange::default());
        assert!(actor.handle_stop(19999));
    }

    #[test]
    fn test_exited_hosts_are_reaped() {
        let launcher = Arc::new(FakeLauncher::new(HostingMode::Process));
        let mut actor = create_actor(Arc::clone(&launcher), PortRange::default());

        let gone = actor.handle_start("a".to_string()).unwrap();
        let kept = actor.handle_start("b".to_string()).unwrap();
        launcher.state(gone).exited.store(true, Ordering::SeqCst);

        let services = actor.handle_list();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].port, kept);
    }

    #[test]
    fn test_shutdown_terminates_process_hosts() {
        let launcher = Arc::new(FakeLauncher::new(HostingMode::Process));
        let mut actor = create_actor(Arc::clone(&launcher), PortRange::default());

        let a = actor.handle_start("a".to_string()).unwrap();
        let b = actor.handle_start("b".to_string()).unwrap();

        assert_eq!(actor.handle_shutdown(), 2);
        assert_eq!(actor.service_count(), 0);
        assert_eq!(launcher.state(a).terminated.load(Ordering::SeqCst), 1);
        assert_eq!(launcher.state(b).terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let launcher = Arc::new(FakeLauncher::new(HostingMode::Process));
        let (tx, rx) = mpsc::channel(16);
        let mut actor = RegistryActor::new(rx, launcher, PortRange::default(), 64);

        let (respond_to, response) = tokio::sync::oneshot::channel();
        tx.send(RegistryCommand::StartService {
            hostname: "localhost".to_string(),
            respond_to,
        })
        .await
        .unwrap();

        // Process the command manually (actor not running in background)
        if let Some(cmd) = actor.receiver.recv().await {
            actor.handle_command(cmd);
        }

        let port = response.await.unwrap().unwrap();
        assert!(PortRange::default().contains(port));
    }
}
