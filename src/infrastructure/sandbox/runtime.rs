//! Container runtime abstraction.
//!
//! The sandbox manager talks to a [`ContainerRuntime`] trait so the
//! container engine can be swapped (docker/podman CLI in production, an
//! in-memory runtime in tests). The CLI implementation shells out with
//! `tokio::process::Command` and maps non-zero exits to typed errors.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::sandbox::{NetworkMode, ResourceUsage, SandboxSpec};

/// Label marking containers owned by this system; the orphan reaper only
/// touches containers carrying it.
pub const MANAGED_LABEL: &str = "axscan.managed";
/// Label carrying the creation timestamp (unix millis).
pub const CREATED_LABEL: &str = "axscan.created_ms";
/// Label carrying the absolute sandbox timeout (millis).
pub const TIMEOUT_LABEL: &str = "axscan.timeout_ms";

/// Runtime-level errors.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Runtime binary unavailable: {0}")]
    Unavailable(String),

    #[error("Runtime command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Combined output of a command executed inside a container.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// A container found by the managed-container listing.
#[derive(Debug, Clone)]
pub struct ManagedContainer {
    pub container_ref: String,
    pub created_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl ManagedContainer {
    /// Whether the container outlived its recorded timeout plus grace.
    pub fn expired(&self, grace: Duration) -> bool {
        let deadline = self.created_at
            + chrono::Duration::from_std(self.timeout + grace)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        Utc::now() > deadline
    }
}

/// Container engine interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Runtime name for logging.
    fn name(&self) -> &'static str;

    /// Whether the runtime is usable on this host.
    fn is_available(&self) -> bool;

    /// Create (but do not start) a container, returning its runtime handle.
    async fn create(
        &self,
        name: &str,
        spec: &SandboxSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, RuntimeError>;

    async fn start(&self, container_ref: &str) -> Result<(), RuntimeError>;

    /// Run a command inside the container and capture its output.
    async fn exec(&self, container_ref: &str, command: &[String]) -> Result<ExecOutput, RuntimeError>;

    /// Graceful stop with the given grace period.
    async fn stop(&self, container_ref: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Remove the container and its ephemeral volumes.
    async fn remove(&self, container_ref: &str, force: bool) -> Result<(), RuntimeError>;

    /// Point-in-time resource usage.
    async fn usage(&self, container_ref: &str) -> Result<ResourceUsage, RuntimeError>;

    /// All containers carrying the managed label.
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, RuntimeError>;
}

/// Docker/podman CLI runtime.
#[derive(Debug)]
pub struct DockerCliRuntime {
    binary: String,
}

impl DockerCliRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    async fn run(&self, args: &[String]) -> Result<String, RuntimeError> {
        debug!(binary = %self.binary, ?args, "running container runtime command");
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.contains("No such container") {
                return Err(RuntimeError::NotFound(stderr));
            }
            return Err(RuntimeError::CommandFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Hardened `create` arguments for a sandbox spec.
    fn create_args(
        &self,
        name: &str,
        spec: &SandboxSpec,
        labels: &BTreeMap<String, String>,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            name.into(),
            // Hard memory ceiling, swap pinned to the same value.
            "--memory".into(),
            format!("{}b", spec.memory_bytes),
            "--memory-swap".into(),
            format!("{}b", spec.memory_bytes),
            "--cpus".into(),
            format!("{}", spec.cpu_quota),
            "--pids-limit".into(),
            format!("{}", spec.pids_limit),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--user".into(),
            spec.run_as_user.clone(),
            "--read-only".into(),
            "--tmpfs".into(),
            format!("/tmp:rw,noexec,nosuid,size={}", spec.tmpfs_bytes),
        ];

        match spec.network {
            NetworkMode::Disabled => {
                args.push("--network".into());
                args.push("none".into());
            }
            NetworkMode::Isolated => {
                args.push("--network".into());
                args.push(spec.isolated_network.clone());
            }
        }

        for cap in &spec.cap_add {
            args.push("--cap-add".into());
            args.push(cap.clone());
        }

        for (host, container) in &spec.readonly_mounts {
            args.push("--volume".into());
            args.push(format!("{}:{}:ro", host, container));
        }

        for (key, value) in &spec.env {
            args.push("--env".into());
            args.push(format!("{}={}", key, value));
        }

        for (key, value) in labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value));
        }

        args.push(spec.image.clone());
        // Keep PID 1 alive so commands can be exec'd on demand.
        args.push("sleep".into());
        args.push("infinity".into());
        args
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    fn name(&self) -> &'static str {
        "docker-cli"
    }

    fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    async fn create(
        &self,
        name: &str,
        spec: &SandboxSpec,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, RuntimeError> {
        let args = self.create_args(name, spec, labels);
        self.run(&args).await
    }

    async fn start(&self, container_ref: &str) -> Result<(), RuntimeError> {
        self.run(&["start".into(), container_ref.into()]).await?;
        Ok(())
    }

    async fn exec(&self, container_ref: &str, command: &[String]) -> Result<ExecOutput, RuntimeError> {
        let mut args: Vec<String> = vec!["exec".into(), container_ref.into()];
        args.extend(command.iter().cloned());

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    async fn stop(&self, container_ref: &str, grace: Duration) -> Result<(), RuntimeError> {
        self.run(&[
            "stop".into(),
            "--time".into(),
            format!("{}", grace.as_secs().max(1)),
            container_ref.into(),
        ])
        .await?;
        Ok(())
    }

    async fn remove(&self, container_ref: &str, force: bool) -> Result<(), RuntimeError> {
        let mut args: Vec<String> = vec!["rm".into(), "--volumes".into()];
        if force {
            args.push("--force".into());
        }
        args.push(container_ref.into());
        self.run(&args).await?;
        Ok(())
    }

    async fn usage(&self, container_ref: &str) -> Result<ResourceUsage, RuntimeError> {
        let line = self
            .run(&[
                "stats".into(),
                "--no-stream".into(),
                "--format".into(),
                "{{.CPUPerc}}|{{.MemUsage}}|{{.PIDs}}".into(),
                container_ref.into(),
            ])
            .await?;
        Ok(parse_stats_line(&line).unwrap_or_default())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, RuntimeError> {
        let output = self
            .run(&[
                "ps".into(),
                "--all".into(),
                "--filter".into(),
                format!("label={}=1", MANAGED_LABEL),
                "--format".into(),
                format!(
                    "{{{{.ID}}}}|{{{{.Label \"{}\"}}}}|{{{{.Label \"{}\"}}}}",
                    CREATED_LABEL, TIMEOUT_LABEL
                ),
            ])
            .await?;

        let mut containers = Vec::new();
        for line in output.lines().filter(|l| !l.trim().is_empty()) {
            match parse_managed_line(line) {
                Some(container) => containers.push(container),
                None => warn!(line, "skipping unparseable managed-container line"),
            }
        }
        Ok(containers)
    }
}

fn parse_managed_line(line: &str) -> Option<ManagedContainer> {
    let mut parts = line.split('|');
    let container_ref = parts.next()?.trim().to_string();
    let created_ms: i64 = parts.next()?.trim().parse().ok()?;
    let timeout_ms: u64 = parts.next()?.trim().parse().ok()?;
    Some(ManagedContainer {
        container_ref,
        created_at: Utc.timestamp_millis_opt(created_ms).single()?,
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn parse_stats_line(line: &str) -> Option<ResourceUsage> {
    let mut parts = line.split('|');
    let cpu = parts.next()?.trim().trim_end_matches('%').parse().ok()?;
    // "12.5MiB / 512MiB" — only the used side matters here.
    let mem_used = parts.next()?.split('/').next()?.trim();
    let memory_bytes = parse_mem_size(mem_used)?;
    let pids = parts.next()?.trim().parse().ok()?;
    Some(ResourceUsage {
        cpu_percent: cpu,
        memory_bytes,
        pids,
    })
}

fn parse_mem_size(text: &str) -> Option<u64> {
    let (number, unit) = text.split_at(text.find(|c: char| c.is_ascii_alphabetic())?);
    let value: f64 = number.trim().parse().ok()?;
    let multiplier = match unit.trim() {
        "B" => 1.0,
        "KiB" | "KB" | "kB" => 1024.0,
        "MiB" | "MB" => 1024.0 * 1024.0,
        "GiB" | "GB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

/// In-memory runtime for tests and environments without a container engine.
///
/// Records every call, succeeds by default and can be primed with managed
/// containers (for reaper tests) or forced failures (for rollback tests).
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<InMemoryState>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    live: BTreeMap<String, bool>,
    managed: Vec<ManagedContainer>,
    calls: Vec<String>,
    fail_create: bool,
    fail_start: bool,
    exec_results: Vec<ExecOutput>,
}

impl InMemoryRuntime {
    pub fn failing_create() -> Self {
        let runtime = Self::default();
        runtime.state.try_lock().expect("fresh lock").fail_create = true;
        runtime
    }

    pub fn failing_start() -> Self {
        let runtime = Self::default();
        runtime.state.try_lock().expect("fresh lock").fail_start = true;
        runtime
    }

    /// Queue an exec result; defaults to success with empty output when the
    /// queue is drained.
    pub async fn push_exec_result(&self, output: ExecOutput) {
        self.state.lock().await.exec_results.push(output);
    }

    pub async fn seed_managed(&self, container: ManagedContainer) {
        self.state.lock().await.managed.push(container);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn live_containers(&self) -> Vec<String> {
        self.state.lock().await.live.keys().cloned().collect()
    }
}

#[async_trait]
impl ContainerRuntime for InMemoryRuntime {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn create(
        &self,
        name: &str,
        _spec: &SandboxSpec,
        _labels: &BTreeMap<String, String>,
    ) -> Result<String, RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("create:{}", name));
        if state.fail_create {
            return Err(RuntimeError::CommandFailed {
                exit_code: 125,
                stderr: "simulated create failure".to_string(),
            });
        }
        let container_ref = format!("ctr-{}", name);
        state.live.insert(container_ref.clone(), false);
        Ok(container_ref)
    }

    async fn start(&self, container_ref: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("start:{}", container_ref));
        if state.fail_start {
            return Err(RuntimeError::CommandFailed {
                exit_code: 125,
                stderr: "simulated start failure".to_string(),
            });
        }
        match state.live.get_mut(container_ref) {
            Some(running) => {
                *running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(container_ref.to_string())),
        }
    }

    async fn exec(&self, container_ref: &str, command: &[String]) -> Result<ExecOutput, RuntimeError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(format!("exec:{}:{}", container_ref, command.join(" ")));
        if !state.live.contains_key(container_ref) {
            return Err(RuntimeError::NotFound(container_ref.to_string()));
        }
        if state.exec_results.is_empty() {
            Ok(ExecOutput::default())
        } else {
            Ok(state.exec_results.remove(0))
        }
    }

    async fn stop(&self, container_ref: &str, _grace: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state.calls.push(format!("stop:{}", container_ref));
        match state.live.get_mut(container_ref) {
            Some(running) => {
                *running = false;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(container_ref.to_string())),
        }
    }

    async fn remove(&self, container_ref: &str, force: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().await;
        state
            .calls
            .push(format!("remove:{}:force={}", container_ref, force));
        let was_managed = state.managed.iter().any(|c| c.container_ref == container_ref);
        state.managed.retain(|c| c.container_ref != container_ref);
        if state.live.remove(container_ref).is_none() && !was_managed {
            return Err(RuntimeError::NotFound(container_ref.to_string()));
        }
        Ok(())
    }

    async fn usage(&self, _container_ref: &str) -> Result<ResourceUsage, RuntimeError> {
        Ok(ResourceUsage {
            cpu_percent: 1.0,
            memory_bytes: 10 * 1024 * 1024,
            pids: 3,
        })
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, RuntimeError> {
        let state = self.state.lock().await;
        let mut managed = state.managed.clone();
        for container_ref in state.live.keys() {
            managed.push(ManagedContainer {
                container_ref: container_ref.clone(),
                created_at: Utc::now(),
                timeout: Duration::from_secs(3600),
            });
        }
        Ok(managed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec() -> SandboxSpec {
        SandboxSpec {
            image: "axscan/browser:latest".to_string(),
            memory_bytes: 268_435_456,
            cpu_quota: 1.5,
            pids_limit: 128,
            network: NetworkMode::Disabled,
            isolated_network: "axscan-net".to_string(),
            tmpfs_bytes: 16_777_216,
            readonly_mounts: vec![("/opt/agent".to_string(), "/opt/axscan".to_string())],
            env: BTreeMap::new(),
            run_as_user: "1000:1000".to_string(),
            cap_add: vec![],
            timeout_ms: 60_000,
        }
    }

    #[test]
    fn create_args_enforce_hardening() {
        let runtime = DockerCliRuntime::new("docker");
        let args = runtime.create_args("axscan-test", &spec(), &BTreeMap::new());
        let joined = args.join(" ");
        assert!(joined.contains("--memory 268435456b"));
        assert!(joined.contains("--memory-swap 268435456b"));
        assert!(joined.contains("--cap-drop ALL"));
        assert!(joined.contains("--security-opt no-new-privileges"));
        assert!(joined.contains("--network none"));
        assert!(joined.contains("--read-only"));
        assert!(joined.contains("noexec"));
        assert!(joined.contains("--pids-limit 128"));
        assert!(joined.contains("--user 1000:1000"));
        assert!(joined.contains("/opt/agent:/opt/axscan:ro"));
    }

    #[test]
    fn isolated_network_maps_to_named_network() {
        let runtime = DockerCliRuntime::new("docker");
        let mut isolated = spec();
        isolated.network = NetworkMode::Isolated;
        let args = runtime.create_args("n", &isolated, &BTreeMap::new());
        let joined = args.join(" ");
        assert!(joined.contains("--network axscan-net"));
    }

    #[test]
    fn parses_stats_line() {
        let usage = parse_stats_line("3.25%|12.5MiB / 512MiB|17").unwrap();
        assert!((usage.cpu_percent - 3.25).abs() < f64::EPSILON);
        assert_eq!(usage.memory_bytes, (12.5 * 1024.0 * 1024.0) as u64);
        assert_eq!(usage.pids, 17);
    }

    #[test]
    fn parses_managed_line() {
        let container = parse_managed_line("abc123|1700000000000|180000").unwrap();
        assert_eq!(container.container_ref, "abc123");
        assert_eq!(container.timeout, Duration::from_secs(180));
    }

    #[test]
    fn managed_expiry_includes_grace() {
        let container = ManagedContainer {
            container_ref: "x".to_string(),
            created_at: Utc::now() - chrono::Duration::seconds(120),
            timeout: Duration::from_secs(60),
        };
        assert!(container.expired(Duration::from_secs(10)));
        assert!(!container.expired(Duration::from_secs(600)));
    }

    #[tokio::test]
    async fn in_memory_runtime_lifecycle() {
        let runtime = InMemoryRuntime::default();
        let id = runtime
            .create("s1", &spec(), &BTreeMap::new())
            .await
            .unwrap();
        runtime.start(&id).await.unwrap();
        runtime.stop(&id, Duration::from_secs(1)).await.unwrap();
        runtime.remove(&id, true).await.unwrap();
        assert!(runtime.live_containers().await.is_empty());
        // second remove is NotFound, the manager treats that as already gone
        assert!(matches!(
            runtime.remove(&id, true).await,
            Err(RuntimeError::NotFound(_))
        ));
    }
}
