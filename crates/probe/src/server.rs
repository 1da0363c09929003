use std::time::Duration;

use events::{EventBus, RunEvent};
use serde::{Deserialize, Serialize};
use stackcheck_core::{serde_millis, Classification};
use supervisor::{CommandSpec, ProcessHandle, ProcessSupervisor, Termination};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ProbeError, Result};
use crate::probe::AvailabilityProbe;

/// Service name the backend reports from `/health`.
pub const DEFAULT_SERVICE: &str = "simple-web-stack-backend";

/// What to do when no healthy server answers at the configured URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerPolicy {
    /// Fail with instructions for starting the server by hand
    #[default]
    RequireExisting,
    /// Launch the configured command when the port refuses connections
    SpawnIfAbsent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub policy: ServerPolicy,
    /// Required for [`ServerPolicy::SpawnIfAbsent`]
    pub launch: Option<CommandSpec>,
    pub expected_service: Option<String>,
    #[serde(rename = "probe_timeout_ms", with = "serde_millis")]
    pub probe_timeout: Duration,
    #[serde(rename = "startup_timeout_ms", with = "serde_millis")]
    pub startup_timeout: Duration,
    #[serde(rename = "poll_interval_ms", with = "serde_millis")]
    pub poll_interval: Duration,
    #[serde(rename = "grace_period_ms", with = "serde_millis")]
    pub grace_period: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            policy: ServerPolicy::default(),
            launch: None,
            expected_service: None,
            probe_timeout: crate::probe::DEFAULT_PROBE_TIMEOUT,
            startup_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(100),
            grace_period: supervisor::DEFAULT_GRACE_PERIOD,
        }
    }
}

/// How the server used by the run was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerSource {
    /// Already running; not owned by this run and never torn down
    Reused,
    /// Launched by this run; torn down by [`ServerManager::shutdown`]
    Spawned { pid: u32 },
}

/// Finds or starts the server under test according to its [`ServerPolicy`].
pub struct ServerManager {
    config: ServerConfig,
    probe: AvailabilityProbe,
    supervisor: ProcessSupervisor,
    spawned: Mutex<Option<ProcessHandle>>,
    events: Option<EventBus>,
}

impl ServerManager {
    pub fn new(config: ServerConfig, supervisor: ProcessSupervisor) -> Result<Self> {
        let mut probe = AvailabilityProbe::with_timeout(&config.url, config.probe_timeout)?;
        if let Some(service) = &config.expected_service {
            probe = probe.expect_service(service);
        }

        Ok(Self {
            config,
            probe,
            supervisor,
            spawned: Mutex::new(None),
            events: None,
        })
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn probe(&self) -> &AvailabilityProbe {
        &self.probe
    }

    /// Make sure a healthy server answers at the configured URL.
    pub async fn ensure_available(&self) -> Result<ServerSource> {
        let url = self.probe.base_url().to_string();
        info!(url = %url, policy = ?self.config.policy, "Checking server");

        let mut spawned = self.spawned.lock().await;
        if let Some(handle) = spawned.clone() {
            if handle.is_running() && self.probe.check().await.available {
                debug!(pid = handle.pid(), "Spawned server still healthy");
                return Ok(ServerSource::Spawned { pid: handle.pid() });
            }
            warn!(pid = handle.pid(), "Spawned server no longer healthy, stopping it");
            if let Err(e) = self
                .supervisor
                .terminate(&handle, self.config.grace_period)
                .await
            {
                warn!(error = %e, "Failed to stop unhealthy server");
            }
            *spawned = None;
        }

        let outcome = self.probe.check().await;
        if outcome.available {
            info!(url = %url, "Server already running, reusing it");
            self.emit(RunEvent::ServerReused { url });
            return Ok(ServerSource::Reused);
        }

        self.emit(RunEvent::ServerUnavailable {
            url: url.clone(),
            classification: outcome.classification,
        });

        match (self.config.policy, outcome.classification) {
            (ServerPolicy::SpawnIfAbsent, Classification::Refused) => {
                let launch = self
                    .config
                    .launch
                    .as_ref()
                    .ok_or(ProbeError::NoLaunchCommand)?;

                info!(url = %url, command = %launch.display(), "Starting server");
                let handle = self.supervisor.spawn(launch)?;
                let pid = handle.pid();
                // Owned from here on, even if the caller stops waiting.
                *spawned = Some(handle.clone());
                self.emit(RunEvent::ServerSpawned {
                    url: url.clone(),
                    pid,
                });

                match self.wait_until_healthy(&url, &handle).await {
                    Ok(()) => Ok(ServerSource::Spawned { pid }),
                    Err(e) => {
                        *spawned = None;
                        Err(e)
                    }
                }
            }
            (policy, classification) => Err(ProbeError::Unavailable {
                guidance: self.guidance(policy, classification),
                url,
                classification,
                detail: outcome.raw_detail,
            }),
        }
    }

    /// Terminate the server if this manager spawned it. Safe to call more
    /// than once; later calls return `None`.
    pub async fn shutdown(&self) -> Option<Result<Termination>> {
        let handle = self.spawned.lock().await.take()?;
        info!(pid = handle.pid(), "Stopping spawned server");
        Some(
            self.supervisor
                .terminate(&handle, self.config.grace_period)
                .await
                .map_err(ProbeError::from),
        )
    }

    /// Pid of the server this manager spawned, if it is still owned.
    pub async fn spawned_pid(&self) -> Option<u32> {
        self.spawned.lock().await.as_ref().map(ProcessHandle::pid)
    }

    /// Poll until `handle` serves a healthy response. A server that exits
    /// early or misses the startup timeout is reclaimed before returning.
    async fn wait_until_healthy(&self, url: &str, handle: &ProcessHandle) -> Result<()> {
        let started = tokio::time::Instant::now();
        let mut attempt = 0u32;
        loop {
            tokio::time::sleep(self.config.poll_interval).await;
            attempt += 1;

            if let Some(exit) = handle.exit_status() {
                let output = handle.wait_with_output().await;
                return Err(ProbeError::ServerExited {
                    exit: exit.to_string(),
                    stderr: output.stderr,
                });
            }

            let outcome = self.probe.check().await;
            if outcome.available {
                info!(url = %url, pid = handle.pid(), attempts = attempt, "Server ready");
                return Ok(());
            }
            debug!(
                attempt,
                classification = %outcome.classification,
                "Server not ready yet"
            );

            if started.elapsed() >= self.config.startup_timeout {
                break;
            }
        }

        warn!(
            url = %url,
            timeout_ms = self.config.startup_timeout.as_millis() as u64,
            "Server failed to become healthy, stopping it"
        );
        let stderr = match self
            .supervisor
            .terminate(handle, self.config.grace_period)
            .await
        {
            Ok(_) => handle.wait_with_output().await.stderr,
            Err(e) => {
                warn!(error = %e, "Failed to stop unhealthy server");
                handle.stderr_snapshot()
            }
        };

        Err(ProbeError::StartupTimeout {
            url: url.to_string(),
            waited_ms: self.config.startup_timeout.as_millis() as u64,
            stderr,
        })
    }

    fn guidance(&self, policy: ServerPolicy, classification: Classification) -> String {
        match (policy, classification) {
            (_, Classification::Refused) => format!(
                "Nothing is listening at {}. Start the server first, with `deno task up` \
                 (Docker Compose) or `cd backend && cargo run`, or set \
                 `server.policy = \"spawn-if-absent\"` with a `server.launch` command. \
                 Expected {}/health to answer {{\"status\":\"healthy\",\"service\":\"{}\",...}}.",
                self.config.url,
                self.probe.base_url(),
                self.config.expected_service.as_deref().unwrap_or(DEFAULT_SERVICE)
            ),
            (_, Classification::Timeout) => format!(
                "The server at {} did not answer within {}ms. \
                 It may still be starting or be overloaded; retry once it settles.",
                self.config.url,
                self.config.probe_timeout.as_millis()
            ),
            (ServerPolicy::SpawnIfAbsent, _) => format!(
                "Something answers at {} but it is not a healthy server. \
                 Refusing to start a second server on the same address.",
                self.config.url
            ),
            (ServerPolicy::RequireExisting, _) => format!(
                "The server at {} answered but is not healthy. Check its logs.",
                self.config.url
            ),
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}

impl std::fmt::Debug for ServerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerManager")
            .field("url", &self.config.url)
            .field("policy", &self.config.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn healthy_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "healthy",
                "timestamp": "2024-05-01T12:00:00Z",
                "service": "backend"
            })))
            .mount(&server)
            .await;
        server
    }

    async fn closed_port_url() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    fn config(url: String, policy: ServerPolicy) -> ServerConfig {
        ServerConfig {
            url,
            policy,
            probe_timeout: Duration::from_millis(200),
            startup_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            grace_period: Duration::from_secs(2),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_config_deserialization_with_defaults() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"url":"http://127.0.0.1:9000","policy":"spawn-if-absent","startup_timeout_ms":3000,
                "launch":{"program":"cargo","args":["run"]}}"#,
        )
        .unwrap();
        assert_eq!(config.policy, ServerPolicy::SpawnIfAbsent);
        assert_eq!(config.startup_timeout, Duration::from_secs(3));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.launch.unwrap().program, "cargo");
    }

    #[tokio::test]
    async fn test_reuses_healthy_server() {
        let server = healthy_server().await;
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let manager = ServerManager::new(
            config(server.uri(), ServerPolicy::SpawnIfAbsent),
            ProcessSupervisor::new(),
        )
        .unwrap()
        .with_events(events);

        let source = manager.ensure_available().await.unwrap();
        assert_eq!(source, ServerSource::Reused);
        assert!(matches!(
            rx.recv().await.unwrap().event,
            RunEvent::ServerReused { .. }
        ));

        // A reused server is not ours to stop.
        assert!(manager.shutdown().await.is_none());
    }

    #[tokio::test]
    async fn test_require_existing_fails_with_guidance() {
        let url = closed_port_url().await;
        let manager = ServerManager::new(
            config(url.clone(), ServerPolicy::RequireExisting),
            ProcessSupervisor::new(),
        )
        .unwrap();

        let err = manager.ensure_available().await.unwrap_err();
        assert_eq!(err.classification(), Some(Classification::Refused));
        let msg = err.to_string();
        assert!(msg.contains(&url));
        assert!(msg.contains("Start the server first"));
        assert!(msg.contains("cd backend && cargo run"));
        assert!(msg.contains("\"service\":\"simple-web-stack-backend\""));
    }

    #[tokio::test]
    async fn test_spawn_if_absent_requires_launch_command() {
        let manager = ServerManager::new(
            config(closed_port_url().await, ServerPolicy::SpawnIfAbsent),
            ProcessSupervisor::new(),
        )
        .unwrap();

        let err = manager.ensure_available().await.unwrap_err();
        assert!(matches!(err, ProbeError::NoLaunchCommand));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_does_not_spawn_when_port_answers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("spawned");
        let mut cfg = config(server.uri(), ServerPolicy::SpawnIfAbsent);
        cfg.launch = Some(CommandSpec::new("touch").arg(marker.to_string_lossy()));

        let supervisor = ProcessSupervisor::new();
        let manager = ServerManager::new(cfg, supervisor.clone()).unwrap();
        let err = manager.ensure_available().await.unwrap_err();

        assert_eq!(err.classification(), Some(Classification::OtherError));
        assert!(err.to_string().contains("Refusing to start a second server"));
        assert!(!marker.exists());
        assert!(supervisor.running().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_server_that_never_becomes_healthy() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let mut cfg = config(closed_port_url().await, ServerPolicy::SpawnIfAbsent);
        cfg.launch = Some(
            CommandSpec::new("sh").args(["-c", "echo 'binding failed' >&2; exec sleep 30"]),
        );

        let supervisor = ProcessSupervisor::new();
        let manager = ServerManager::new(cfg, supervisor.clone())
            .unwrap()
            .with_events(events);
        let err = manager.ensure_available().await.unwrap_err();

        match &err {
            ProbeError::StartupTimeout { waited_ms, stderr, .. } => {
                assert_eq!(*waited_ms, 500);
                assert!(stderr.contains("binding failed"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(supervisor.running().is_empty());
        assert!(manager.spawned_pid().await.is_none());

        assert!(matches!(
            rx.recv().await.unwrap().event,
            RunEvent::ServerUnavailable {
                classification: Classification::Refused,
                ..
            }
        ));
        assert!(matches!(
            rx.recv().await.unwrap().event,
            RunEvent::ServerSpawned { .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_server_that_exits_early() {
        let mut cfg = config(closed_port_url().await, ServerPolicy::SpawnIfAbsent);
        cfg.launch = Some(CommandSpec::new("sh").args(["-c", "echo 'no such module' >&2; exit 1"]));

        let manager = ServerManager::new(cfg, ProcessSupervisor::new()).unwrap();
        let err = manager.ensure_available().await.unwrap_err();

        match err {
            ProbeError::ServerExited { exit, stderr } => {
                assert_eq!(exit, "exit code 1");
                assert!(stderr.contains("no such module"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_is_owned_while_still_starting() {
        let mut cfg = config(closed_port_url().await, ServerPolicy::SpawnIfAbsent);
        cfg.startup_timeout = Duration::from_secs(10);
        cfg.launch = Some(CommandSpec::new("sleep").arg("30"));

        let supervisor = ProcessSupervisor::new();
        let manager = ServerManager::new(cfg, supervisor.clone()).unwrap();

        // The caller gives up long before the startup timeout.
        let waited =
            tokio::time::timeout(Duration::from_millis(300), manager.ensure_available()).await;
        assert!(waited.is_err());

        let running = supervisor.running();
        assert_eq!(running.len(), 1);
        assert_eq!(manager.spawned_pid().await, Some(running[0].pid()));

        let termination = manager.shutdown().await.unwrap().unwrap();
        assert!(!termination.exit.success());
        assert!(!running[0].is_running());
        assert!(supervisor.running().is_empty());
        assert!(manager.shutdown().await.is_none());
    }
}
