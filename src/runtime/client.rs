//! Docker CLI backed runtime client.
//!
//! Every daemon interaction goes through [`DockerClient`], which provides
//! consistent timeout handling, error mapping to [`RuntimeError`], and a single
//! point where the `docker` process is constructed.

use super::{
    AttachHandle, AttachOptions, ContainerCreate, ContainerDetails, ContainerState,
    ImageDetails, ListFilter, LogLine, LogSource, LogStream, LogsOptions, Mount, PortMapping,
    RemoveOptions, RuntimeClient, RuntimeError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};

/// Timeout for short daemon calls (inspect, rename, pause...).
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for image pulls.
const PULL_TIMEOUT: Duration = Duration::from_secs(600);

/// Extra time granted on top of a stop grace period before the CLI call is abandoned.
const STOP_SLACK: Duration = Duration::from_secs(30);

/// Buffered log lines per stream before the reader waits on the consumer.
const LOG_CHANNEL_CAPACITY: usize = 256;

/// Client for the `docker` command line.
///
/// Cheap to clone; clones share the table of attachments waiting for their
/// container to start.
#[derive(Debug, Clone)]
pub struct DockerClient {
    program: String,
    pending_attach: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl DockerClient {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Use a different executable, e.g. `podman`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            pending_attach: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    fn command_string(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    /// Run a command with a timeout, returning raw Output.
    async fn run(&self, args: &[String], timeout: Duration) -> Result<Output, RuntimeError> {
        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new(&self.program)
                .args(args)
                .stdin(Stdio::null())
                .output(),
        )
        .await;

        let cmd_str = self.command_string(args);
        tracing::trace!(command = %cmd_str, "running");

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(RuntimeError::exec_failed(cmd_str, e)),
            Err(_) => Err(RuntimeError::timeout(cmd_str, timeout)),
        }
    }

    /// Run a command with a timeout, returning Output only if exit 0.
    async fn run_success(&self, args: &[String], timeout: Duration) -> Result<Output, RuntimeError> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(RuntimeError::failed(self.command_string(args), &output))
        }
    }

    /// Run a command that tolerates certain stderr fragments as success.
    async fn run_tolerating(
        &self,
        args: &[String],
        timeout: Duration,
        tolerated: &[&str],
    ) -> Result<(), RuntimeError> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if tolerated.iter().any(|t| stderr.contains(t)) {
            return Ok(());
        }
        Err(RuntimeError::failed(self.command_string(args), &output))
    }

    async fn inspect_many(&self, ids: &[String]) -> Result<Vec<ContainerDetails>, RuntimeError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = strings(&["inspect", "--type", "container"]);
        args.extend(ids.iter().cloned());
        let output = self.run_success(&args, COMMAND_TIMEOUT).await?;
        parse_inspect(&self.command_string(&args), &output.stdout)
    }

    /// Wait until a container has left the `created` state.
    async fn await_started(&self, id: &str) -> Result<(), RuntimeError> {
        const POLL: Duration = Duration::from_millis(100);
        let deadline = tokio::time::Instant::now() + COMMAND_TIMEOUT;
        loop {
            match self.inspect_container(id).await? {
                Some(details) if details.state.status != "created" => return Ok(()),
                Some(_) => {}
                None => {
                    return Err(RuntimeError::ContainerNotFound {
                        container: id.to_string(),
                    })
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RuntimeError::timeout(
                    format!("{} start --attach {}", self.program, id),
                    COMMAND_TIMEOUT,
                ));
            }
            tokio::time::sleep(POLL).await;
        }
    }
}

impl Default for DockerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuntimeClient for DockerClient {
    // ========================================================================
    // Container lifecycle
    // ========================================================================

    async fn create_container(&self, request: &ContainerCreate) -> Result<String, RuntimeError> {
        let args = create_args(request);
        let output = self.run(&args, COMMAND_TIMEOUT).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("is already in use") {
                return Err(RuntimeError::NameConflict {
                    name: request.name.clone(),
                });
            }
            return Err(RuntimeError::failed(self.command_string(&args), &output));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::malformed(
                self.command_string(&args),
                "no container id printed",
            ));
        }
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        // An attachment registered for this container performs the start itself.
        let pending = self.pending_attach.lock().remove(id);
        if let Some(trigger) = pending {
            let _ = trigger.send(());
            return self.await_started(id).await;
        }
        self.run_success(&strings(&["start", id]), COMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let grace = timeout.as_secs().to_string();
        self.run_success(
            &strings(&["stop", "-t", &grace, id]),
            timeout + STOP_SLACK,
        )
        .await
        .map(|_| ())
    }

    async fn restart_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let grace = timeout.as_secs().to_string();
        self.run_success(
            &strings(&["restart", "-t", &grace, id]),
            timeout + STOP_SLACK,
        )
        .await
        .map(|_| ())
    }

    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), RuntimeError> {
        // Already stopped is not an error
        self.run_tolerating(
            &strings(&["kill", "-s", signal, id]),
            COMMAND_TIMEOUT,
            &["is not running"],
        )
        .await
    }

    async fn pause_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run_success(&strings(&["pause", id]), COMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn unpause_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.run_success(&strings(&["unpause", id]), COMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError> {
        let mut args = strings(&["rm"]);
        if options.force {
            args.push("-f".to_string());
        }
        if options.remove_volumes {
            args.push("-v".to_string());
        }
        args.push(id.to_string());
        self.run_tolerating(&args, COMMAND_TIMEOUT, &["No such container"])
            .await
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        self.run_success(&strings(&["rename", id, new_name]), COMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    async fn inspect_container(
        &self,
        name_or_id: &str,
    ) -> Result<Option<ContainerDetails>, RuntimeError> {
        let args = strings(&["inspect", "--type", "container", name_or_id]);
        match self.run_success(&args, COMMAND_TIMEOUT).await {
            Ok(output) => {
                let mut all = parse_inspect(&self.command_string(&args), &output.stdout)?;
                Ok(all.pop())
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_containers(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<ContainerDetails>, RuntimeError> {
        let mut args = strings(&["ps", "-a", "-q", "--no-trunc"]);
        for (key, value) in &filter.labels {
            args.push("--filter".to_string());
            args.push(format!("label={}={}", key, value));
        }
        if let Some(name) = &filter.name {
            args.push("--filter".to_string());
            args.push(format!("name={}", name));
        }
        let output = self.run_success(&args, COMMAND_TIMEOUT).await?;
        let ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // `name=` is a substring match on the CLI, so re-check exactly.
        let details = self.inspect_many(&ids).await?;
        Ok(details.into_iter().filter(|d| filter.matches(d)).collect())
    }

    // ========================================================================
    // Attach / Wait / Logs
    // ========================================================================

    async fn attach_container(
        &self,
        id: &str,
        options: AttachOptions,
    ) -> Result<AttachHandle, RuntimeError> {
        // The CLI cannot attach to a container that is not running yet, so the
        // attachment is parked until `start_container` and then performed with
        // `docker start --attach`, which starts and attaches in one step.
        let (trigger, triggered) = oneshot::channel();
        self.pending_attach.lock().insert(id.to_string(), trigger);

        let mut args = strings(&["start", "--attach"]);
        if options.stdin {
            args.push("--interactive".to_string());
        }
        args.push(id.to_string());

        let program = self.program.clone();
        let cmd_str = self.command_string(&args);
        let task = tokio::spawn(async move {
            if triggered.await.is_err() {
                // Client dropped before the container was started.
                return Ok(());
            }
            let mut command = tokio::process::Command::new(&program);
            command
                .args(&args)
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
            if options.stdin {
                command.stdin(Stdio::inherit());
            } else {
                command.stdin(Stdio::null());
            }
            // The exit status mirrors the container's; it is read through wait.
            command
                .status()
                .await
                .map(|_| ())
                .map_err(|e| RuntimeError::exec_failed(cmd_str, e))
        });
        Ok(AttachHandle::new(task))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let args = strings(&["wait", id]);
        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::exec_failed(self.command_string(&args), e))?;
        if !output.status.success() {
            return Err(RuntimeError::failed(self.command_string(&args), &output));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<i64>().map_err(|e| {
            RuntimeError::malformed(
                self.command_string(&args),
                format!("exit code '{}': {}", text.trim(), e),
            )
        })
    }

    async fn container_logs(
        &self,
        id: &str,
        options: LogsOptions,
    ) -> Result<LogStream, RuntimeError> {
        let mut args = strings(&["logs"]);
        if options.follow {
            args.push("--follow".to_string());
        }
        if options.timestamps {
            args.push("--timestamps".to_string());
        }
        args.push(id.to_string());

        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RuntimeError::exec_failed(self.command_string(&args), e))?;

        let (tx, rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, LogSource::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, LogSource::Stderr, tx.clone()));
        }
        tokio::spawn(async move {
            let abandoned = tokio::select! {
                _ = child.wait() => false,
                _ = tx.closed() => true,
            };
            if abandoned {
                let _ = child.kill().await;
            }
        });
        Ok(rx)
    }

    // ========================================================================
    // Images
    // ========================================================================

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageDetails>, RuntimeError> {
        let args = strings(&["image", "inspect", "--format", "{{.Id}}", image]);
        match self.run_success(&args, COMMAND_TIMEOUT).await {
            Ok(output) => Ok(Some(ImageDetails {
                id: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            })),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        // "up to date" or "already exists" aren't real failures
        self.run_tolerating(
            &strings(&["pull", image]),
            PULL_TIMEOUT,
            &["up to date", "already exists"],
        )
        .await
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.run_tolerating(&strings(&["rmi", image]), COMMAND_TIMEOUT, &["No such image"])
            .await
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

async fn forward_lines<R>(reader: R, source: LogSource, tx: mpsc::Sender<LogLine>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(LogLine { source, line }).await.is_err() {
            break;
        }
    }
}

/// Translate a create request into `docker create` arguments.
pub(crate) fn create_args(request: &ContainerCreate) -> Vec<String> {
    let mut args = strings(&["create", "--name", &request.name]);
    let mut flag = |name: &str, value: &str| {
        args.push(name.to_string());
        args.push(value.to_string());
    };

    for (key, value) in &request.labels {
        flag("--label", &format!("{}={}", key, value));
    }
    for env in &request.env {
        flag("--env", env);
    }
    for volume in &request.volumes {
        flag("--volume", volume);
    }
    for port in &request.expose {
        flag("--expose", port);
    }
    if let Some(hostname) = &request.hostname {
        flag("--hostname", hostname);
    }
    if let Some(domainname) = &request.domainname {
        flag("--domainname", domainname);
    }
    if let Some(user) = &request.user {
        flag("--user", user);
    }
    if let Some(dir) = &request.working_dir {
        flag("--workdir", dir);
    }

    let host = &request.host;
    for bind in &host.binds {
        flag("--volume", bind);
    }
    for link in &host.links {
        flag("--link", link);
    }
    for port in &host.port_bindings {
        flag("--publish", port);
    }
    for source in &host.volumes_from {
        flag("--volumes-from", source);
    }
    if let Some(mode) = &host.network_mode {
        flag("--network", mode);
    }
    if let Some(mode) = &host.ipc_mode {
        flag("--ipc", mode);
    }
    if let Some(mode) = &host.pid_mode {
        flag("--pid", mode);
    }
    if let Some(policy) = &host.restart_policy {
        flag("--restart", policy);
    }
    for dns in &host.dns {
        flag("--dns", dns);
    }
    for search in &host.dns_search {
        flag("--dns-search", search);
    }
    for cap in &host.cap_add {
        flag("--cap-add", cap);
    }
    for cap in &host.cap_drop {
        flag("--cap-drop", cap);
    }
    for entry in &host.extra_hosts {
        flag("--add-host", entry);
    }
    if let Some(memory) = &host.memory {
        flag("--memory", memory);
    }
    if let Some(shares) = host.cpu_shares {
        flag("--cpu-shares", &shares.to_string());
    }

    // `--entrypoint` takes a single executable; the rest of the vector
    // becomes the leading part of the command.
    let (entrypoint, entry_args) = match request.entrypoint.split_first() {
        Some((first, rest)) => (Some(first.clone()), rest.to_vec()),
        None => (None, Vec::new()),
    };
    if let Some(entrypoint) = &entrypoint {
        flag("--entrypoint", entrypoint);
    }

    if host.privileged {
        args.push("--privileged".to_string());
    }
    if host.read_only {
        args.push("--read-only".to_string());
    }
    if request.tty {
        args.push("--tty".to_string());
    }
    if request.stdin_open {
        args.push("--interactive".to_string());
    }

    args.push(request.image.clone());
    args.extend(entry_args);
    args.extend(request.command.iter().cloned());
    args
}

// ============================================================================
// `docker inspect` decoding
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectContainer {
    id: String,
    name: String,
    image: String,
    config: InspectConfig,
    state: InspectState,
    mounts: Vec<InspectMount>,
    network_settings: InspectNetwork,
    host_config: InspectHostConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectConfig {
    image: String,
    cmd: Option<Vec<String>>,
    labels: Option<BTreeMap<String, String>>,
    tty: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectState {
    running: bool,
    paused: bool,
    exit_code: i64,
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectMount {
    source: String,
    destination: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectNetwork {
    ports: Option<BTreeMap<String, Option<Vec<InspectBinding>>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectBinding {
    host_ip: String,
    host_port: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct InspectHostConfig {
    binds: Option<Vec<String>>,
    links: Option<Vec<String>>,
}

fn parse_inspect(command: &str, stdout: &[u8]) -> Result<Vec<ContainerDetails>, RuntimeError> {
    let raw: Vec<InspectContainer> =
        serde_json::from_slice(stdout).map_err(|e| RuntimeError::malformed(command, e.to_string()))?;
    Ok(raw.into_iter().map(ContainerDetails::from).collect())
}

impl From<InspectContainer> for ContainerDetails {
    fn from(raw: InspectContainer) -> Self {
        let mut ports = Vec::new();
        for (key, bindings) in raw.network_settings.ports.unwrap_or_default() {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            let Ok(private_port) = port.parse::<u16>() else {
                continue;
            };
            match bindings {
                Some(bindings) if !bindings.is_empty() => {
                    for binding in bindings {
                        ports.push(PortMapping {
                            ip: binding.host_ip,
                            private_port,
                            public_port: binding.host_port.parse().ok(),
                            protocol: protocol.to_string(),
                        });
                    }
                }
                _ => ports.push(PortMapping {
                    ip: String::new(),
                    private_port,
                    public_port: None,
                    protocol: protocol.to_string(),
                }),
            }
        }

        ContainerDetails {
            id: raw.id,
            name: raw.name.trim_start_matches('/').to_string(),
            image: raw.config.image,
            image_id: raw.image,
            command: raw.config.cmd.unwrap_or_default().join(" "),
            labels: raw.config.labels.unwrap_or_default(),
            state: ContainerState {
                running: raw.state.running,
                paused: raw.state.paused,
                exit_code: raw.state.exit_code,
                status: raw.state.status,
            },
            mounts: raw
                .mounts
                .into_iter()
                .map(|m| Mount {
                    source: m.source,
                    destination: m.destination,
                })
                .collect(),
            ports,
            tty: raw.config.tty,
            binds: raw.host_config.binds.unwrap_or_default(),
            links: raw.host_config.links.unwrap_or_default(),
        }
    }
}
