//! In-process runtime.
//!
//! Keeps containers and images in memory and records every call it receives,
//! so lifecycle logic can be exercised without a daemon.

use super::{
    AttachHandle, AttachOptions, ContainerCreate, ContainerDetails, ContainerState,
    ImageDetails, ListFilter, LogLine, LogSource, LogStream, LogsOptions, Mount, PortMapping,
    RemoveOptions, RuntimeClient, RuntimeError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct Stored {
    details: ContainerDetails,
    request: ContainerCreate,
    logs: Vec<LogLine>,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    containers: Vec<Stored>,
    images: BTreeMap<String, String>,
    calls: Vec<String>,
    failures: Vec<(String, String)>,
    exit_codes: BTreeMap<String, i64>,
    hold_followed_logs: bool,
    held_log_senders: Vec<mpsc::Sender<LogLine>>,
}

impl State {
    fn position(&self, name_or_id: &str) -> Option<usize> {
        self.containers.iter().position(|c| {
            c.details.name == name_or_id
                || c.details.id == name_or_id
                || (name_or_id.len() >= 12 && c.details.id.starts_with(name_or_id))
        })
    }

    fn get_mut(&mut self, name_or_id: &str) -> Result<&mut Stored, RuntimeError> {
        match self.position(name_or_id) {
            Some(idx) => Ok(&mut self.containers[idx]),
            None => Err(RuntimeError::ContainerNotFound {
                container: name_or_id.to_string(),
            }),
        }
    }

    /// Record a call and fail it if a failure was injected for it.
    fn record(&mut self, op: &str, target: &str) -> Result<(), RuntimeError> {
        self.calls.push(format!("{} {}", op, target));
        let injected = self
            .failures
            .iter()
            .position(|(o, t)| o == op && (t == target || t == "*"));
        match injected {
            Some(idx) => {
                self.failures.remove(idx);
                Err(RuntimeError::cmd_failed(
                    format!("{} {}", op, target),
                    "injected failure",
                    Some(1),
                ))
            }
            None => Ok(()),
        }
    }
}

/// A [`RuntimeClient`] that never leaves the process.
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
}

impl InMemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an image available locally under `reference` with content `id`.
    pub fn add_image(&self, reference: &str, id: &str) {
        self.state
            .lock()
            .images
            .insert(reference.to_string(), id.to_string());
    }

    pub fn has_image(&self, reference: &str) -> bool {
        self.state.lock().images.contains_key(reference)
    }

    /// Fail the next `op` call addressed at `target` (`*` matches any target).
    ///
    /// Ops are named after the trait methods without suffix: `create`,
    /// `start`, `stop`, `kill`, `remove`, `rename`, `pull`...
    pub fn fail_next(&self, op: &str, target: &str) {
        self.state
            .lock()
            .failures
            .push((op.to_string(), target.to_string()));
    }

    /// Every call received so far, as `"<op> <target>"`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn container(&self, name_or_id: &str) -> Option<ContainerDetails> {
        let state = self.state.lock();
        state
            .position(name_or_id)
            .map(|idx| state.containers[idx].details.clone())
    }

    /// The request a container was created from.
    pub fn create_request(&self, name_or_id: &str) -> Option<ContainerCreate> {
        let state = self.state.lock();
        state
            .position(name_or_id)
            .map(|idx| state.containers[idx].request.clone())
    }

    /// Names of all containers, in creation order.
    pub fn container_names(&self) -> Vec<String> {
        self.state
            .lock()
            .containers
            .iter()
            .map(|c| c.details.name.clone())
            .collect()
    }

    /// Insert a container that was not created through this client.
    pub fn insert_container(&self, details: ContainerDetails) {
        let request = ContainerCreate {
            name: details.name.clone(),
            image: details.image.clone(),
            labels: details.labels.clone(),
            ..Default::default()
        };
        self.state.lock().containers.push(Stored {
            details,
            request,
            logs: Vec::new(),
        });
    }

    pub fn set_label(&self, name_or_id: &str, key: &str, value: &str) {
        let mut state = self.state.lock();
        if let Ok(stored) = state.get_mut(name_or_id) {
            stored
                .details
                .labels
                .insert(key.to_string(), value.to_string());
        }
    }

    pub fn add_mount(&self, name_or_id: &str, source: &str, destination: &str) {
        let mut state = self.state.lock();
        if let Ok(stored) = state.get_mut(name_or_id) {
            stored.details.mounts.push(Mount {
                source: source.to_string(),
                destination: destination.to_string(),
            });
        }
    }

    /// Exit code reported when the named container finishes.
    pub fn set_exit_code(&self, name: &str, code: i64) {
        self.state.lock().exit_codes.insert(name.to_string(), code);
    }

    pub fn push_log(&self, name_or_id: &str, source: LogSource, line: &str) {
        let mut state = self.state.lock();
        if let Ok(stored) = state.get_mut(name_or_id) {
            stored.logs.push(LogLine {
                source,
                line: line.to_string(),
            });
        }
    }

    /// Keep followed log streams open after the recorded lines, like a
    /// container that is still running.
    pub fn hold_followed_logs(&self) {
        self.state.lock().hold_followed_logs = true;
    }

    /// Close every log stream held open by [`Self::hold_followed_logs`].
    pub fn release_followed_logs(&self) {
        let mut state = self.state.lock();
        state.hold_followed_logs = false;
        state.held_log_senders.clear();
    }

    /// Mark a container as exited, as if its process terminated on its own.
    pub fn exit(&self, name_or_id: &str, code: i64) {
        let mut state = self.state.lock();
        if let Ok(stored) = state.get_mut(name_or_id) {
            set_exited(&mut stored.details.state, code);
        }
    }
}

fn set_exited(state: &mut ContainerState, code: i64) {
    state.running = false;
    state.paused = false;
    state.exit_code = code;
    state.status = "exited".to_string();
}

fn parse_published(spec: &str) -> Option<PortMapping> {
    let (spec, protocol) = spec.split_once('/').unwrap_or((spec, "tcp"));
    let parts: Vec<&str> = spec.split(':').collect();
    let (ip, public, private) = match parts.as_slice() {
        [private] => ("0.0.0.0", None, *private),
        [public, private] => ("0.0.0.0", Some(*public), *private),
        [ip, public, private] => (*ip, Some(*public), *private),
        _ => return None,
    };
    let private_port = private.parse().ok()?;
    // An empty or ranged host side gets an ephemeral port.
    let public_port = match public {
        Some(p) => p.parse().ok().or(Some(32768 + private_port % 1000)),
        None => Some(32768 + private_port % 1000),
    };
    Some(PortMapping {
        ip: if ip.is_empty() { "0.0.0.0" } else { ip }.to_string(),
        private_port,
        public_port,
        protocol: protocol.to_string(),
    })
}

fn details_for(id: String, request: &ContainerCreate, image_id: String) -> ContainerDetails {
    let mut mounts: Vec<Mount> = request
        .host
        .binds
        .iter()
        .filter_map(|bind| {
            let mut parts = bind.splitn(3, ':');
            let source = parts.next()?;
            let destination = parts.next()?;
            Some(Mount {
                source: source.to_string(),
                destination: destination.to_string(),
            })
        })
        .collect();
    for volume in &request.volumes {
        let destination = volume.rsplit(':').next().unwrap_or(volume);
        if mounts.iter().all(|m| m.destination != destination) {
            mounts.push(Mount {
                source: format!("/var/lib/docker/volumes/{}/_data", &id[..12]),
                destination: destination.to_string(),
            });
        }
    }

    let mut ports: Vec<PortMapping> = request
        .host
        .port_bindings
        .iter()
        .filter_map(|p| parse_published(p))
        .collect();
    for exposed in &request.expose {
        let (port, protocol) = exposed.split_once('/').unwrap_or((exposed.as_str(), "tcp"));
        if let Ok(private_port) = port.parse() {
            if ports.iter().all(|p| p.private_port != private_port) {
                ports.push(PortMapping {
                    ip: String::new(),
                    private_port,
                    public_port: None,
                    protocol: protocol.to_string(),
                });
            }
        }
    }

    let mut command = request.entrypoint.clone();
    command.extend(request.command.iter().cloned());

    ContainerDetails {
        id,
        name: request.name.clone(),
        image: request.image.clone(),
        image_id,
        command: command.join(" "),
        labels: request.labels.clone(),
        state: ContainerState {
            status: "created".to_string(),
            ..Default::default()
        },
        mounts,
        ports,
        tty: request.tty,
        binds: request.host.binds.clone(),
        links: request.host.links.clone(),
    }
}

#[async_trait]
impl RuntimeClient for InMemoryRuntime {
    async fn create_container(&self, request: &ContainerCreate) -> Result<String, RuntimeError> {
        let mut state = self.state.lock();
        state.record("create", &request.name)?;
        if state.position(&request.name).is_some() {
            return Err(RuntimeError::NameConflict {
                name: request.name.clone(),
            });
        }
        let image_id = match state.images.get(&request.image) {
            Some(id) => id.clone(),
            None => {
                return Err(RuntimeError::cmd_failed(
                    format!("create {}", request.name),
                    format!("No such image: {}", request.image),
                    Some(1),
                ))
            }
        };
        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        let details = details_for(id.clone(), request, image_id);
        state.containers.push(Stored {
            details,
            request: request.clone(),
            logs: Vec::new(),
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("start", id)?;
        let stored = state.get_mut(id)?;
        stored.details.state.running = true;
        stored.details.state.paused = false;
        stored.details.state.status = "running".to_string();
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("stop", id)?;
        let stored = state.get_mut(id)?;
        set_exited(&mut stored.details.state, 0);
        Ok(())
    }

    async fn restart_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("restart", id)?;
        let stored = state.get_mut(id)?;
        stored.details.state.running = true;
        stored.details.state.paused = false;
        stored.details.state.status = "running".to_string();
        Ok(())
    }

    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("kill", id)?;
        let stored = state.get_mut(id)?;
        stored.details.state.running = false;
        stored.details.state.paused = false;
        stored.details.state.status = "exited".to_string();
        stored.details.state.exit_code = if signal == "SIGKILL" { 137 } else { 143 };
        Ok(())
    }

    async fn pause_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("pause", id)?;
        let stored = state.get_mut(id)?;
        stored.details.state.paused = true;
        stored.details.state.status = "paused".to_string();
        Ok(())
    }

    async fn unpause_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("unpause", id)?;
        let stored = state.get_mut(id)?;
        stored.details.state.paused = false;
        stored.details.state.status = "running".to_string();
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveOptions,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("remove", id)?;
        let Some(idx) = state.position(id) else {
            return Ok(());
        };
        if state.containers[idx].details.state.running && !options.force {
            return Err(RuntimeError::cmd_failed(
                format!("remove {}", id),
                "You cannot remove a running container. Stop the container before attempting removal or force remove",
                Some(1),
            ));
        }
        state.containers.remove(idx);
        Ok(())
    }

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("rename", id)?;
        if state.position(new_name).is_some() {
            return Err(RuntimeError::NameConflict {
                name: new_name.to_string(),
            });
        }
        let stored = state.get_mut(id)?;
        stored.details.name = new_name.to_string();
        Ok(())
    }

    async fn inspect_container(
        &self,
        name_or_id: &str,
    ) -> Result<Option<ContainerDetails>, RuntimeError> {
        let mut state = self.state.lock();
        state.record("inspect", name_or_id)?;
        Ok(state
            .position(name_or_id)
            .map(|idx| state.containers[idx].details.clone()))
    }

    async fn list_containers(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<ContainerDetails>, RuntimeError> {
        let mut state = self.state.lock();
        state.record("list", "*")?;
        Ok(state
            .containers
            .iter()
            .filter(|c| filter.matches(&c.details))
            .map(|c| c.details.clone())
            .collect())
    }

    async fn attach_container(
        &self,
        id: &str,
        _options: AttachOptions,
    ) -> Result<AttachHandle, RuntimeError> {
        let mut state = self.state.lock();
        state.record("attach", id)?;
        state.get_mut(id)?;
        Ok(AttachHandle::closed())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut state = self.state.lock();
        state.record("wait", id)?;
        let idx = state.position(id).ok_or_else(|| RuntimeError::ContainerNotFound {
            container: id.to_string(),
        })?;
        let name = state.containers[idx].details.name.clone();
        let code = state.exit_codes.get(&name).copied().unwrap_or(0);
        // Containers in memory finish as soon as somebody waits for them.
        let details = &mut state.containers[idx].details;
        if details.state.running {
            set_exited(&mut details.state, code);
        }
        Ok(details.state.exit_code)
    }

    async fn container_logs(
        &self,
        id: &str,
        options: LogsOptions,
    ) -> Result<LogStream, RuntimeError> {
        let mut state = self.state.lock();
        state.record("logs", id)?;
        let lines = state.get_mut(id)?.logs.clone();
        let (tx, rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            // Capacity covers every line, so this never waits.
            let _ = tx.try_send(line);
        }
        if options.follow && state.hold_followed_logs {
            state.held_log_senders.push(tx);
        }
        Ok(rx)
    }

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageDetails>, RuntimeError> {
        let mut state = self.state.lock();
        state.record("inspect_image", image)?;
        Ok(state
            .images
            .get(image)
            .map(|id| ImageDetails { id: id.clone() }))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("pull", image)?;
        if !state.images.contains_key(image) {
            let id = format!("sha256:pulled-{}", image);
            state.images.insert(image.to_string(), id);
        }
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        state.record("remove_image", image)?;
        state.images.remove(image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str) -> ContainerCreate {
        ContainerCreate {
            name: name.to_string(),
            image: "busybox".to_string(),
            volumes: vec!["/data".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_requires_local_image() {
        let runtime = InMemoryRuntime::new();
        let err = runtime.create_container(&request("a")).await.unwrap_err();
        assert!(err.is_not_found());

        runtime.add_image("busybox", "sha256:1");
        let id = runtime.create_container(&request("a")).await.unwrap();
        let details = runtime.inspect_container(&id).await.unwrap().unwrap();
        assert_eq!(details.name, "a");
        assert_eq!(details.image_id, "sha256:1");
        assert_eq!(details.state.status, "created");
        assert_eq!(details.mounts[0].destination, "/data");
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let runtime = InMemoryRuntime::new();
        runtime.add_image("busybox", "sha256:1");
        runtime.create_container(&request("a")).await.unwrap();
        let err = runtime.create_container(&request("a")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::NameConflict { .. }));
    }

    #[tokio::test]
    async fn running_containers_need_force_to_remove() {
        let runtime = InMemoryRuntime::new();
        runtime.add_image("busybox", "sha256:1");
        let id = runtime.create_container(&request("a")).await.unwrap();
        runtime.start_container(&id).await.unwrap();

        assert!(runtime
            .remove_container(&id, RemoveOptions::default())
            .await
            .is_err());
        runtime
            .remove_container(
                &id,
                RemoveOptions {
                    force: true,
                    remove_volumes: false,
                },
            )
            .await
            .unwrap();
        assert!(runtime.container("a").is_none());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let runtime = InMemoryRuntime::new();
        runtime.add_image("busybox", "sha256:1");
        runtime.fail_next("create", "a");
        assert!(runtime.create_container(&request("a")).await.is_err());
        assert!(runtime.create_container(&request("a")).await.is_ok());
        assert_eq!(runtime.calls(), vec!["create a", "create a"]);
    }

    #[tokio::test]
    async fn logs_replay_recorded_lines() {
        let runtime = InMemoryRuntime::new();
        runtime.add_image("busybox", "sha256:1");
        runtime.create_container(&request("a")).await.unwrap();
        runtime.push_log("a", LogSource::Stdout, "hello");
        runtime.push_log("a", LogSource::Stderr, "oops");

        let mut rx = runtime
            .container_logs("a", LogsOptions::default())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().line, "hello");
        assert_eq!(rx.recv().await.unwrap().source, LogSource::Stderr);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn published_ports_parse() {
        let p = parse_published("127.0.0.1:8080:80/udp").unwrap();
        assert_eq!(p.render(), "127.0.0.1:8080->80/udp");
        let p = parse_published("5432").unwrap();
        assert_eq!(p.private_port, 5432);
        assert!(p.public_port.is_some());
    }
}
