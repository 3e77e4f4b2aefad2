//! Request and response shapes exchanged with a [`RuntimeClient`](super::RuntimeClient).

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::RuntimeError;

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerCreate {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub entrypoint: Vec<String>,
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Container-side volume destinations declared by the service.
    pub volumes: Vec<String>,
    /// Container ports exposed without publishing.
    pub expose: Vec<String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    pub user: Option<String>,
    pub working_dir: Option<String>,
    pub tty: bool,
    pub stdin_open: bool,
    pub host: HostConfig,
}

/// Host-side settings of a container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostConfig {
    /// `source:destination[:mode]` bind mounts.
    pub binds: Vec<String>,
    /// `container:alias` links.
    pub links: Vec<String>,
    /// Port publishing specs (`[ip:][host:]container[/proto]`).
    pub port_bindings: Vec<String>,
    pub volumes_from: Vec<String>,
    pub network_mode: Option<String>,
    pub ipc_mode: Option<String>,
    pub pid_mode: Option<String>,
    pub privileged: bool,
    pub read_only: bool,
    pub restart_policy: Option<String>,
    pub dns: Vec<String>,
    pub dns_search: Vec<String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub extra_hosts: Vec<String>,
    pub memory: Option<String>,
    pub cpu_shares: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub paused: bool,
    pub exit_code: i64,
    /// Human readable status, e.g. `running`, `exited`.
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub destination: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub ip: String,
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: String,
}

impl PortMapping {
    /// `ip:public->private/proto` for published ports, `private/proto` otherwise.
    pub fn render(&self) -> String {
        match self.public_port {
            Some(public) => format!(
                "{}:{}->{}/{}",
                self.ip, public, self.private_port, self.protocol
            ),
            None => format!("{}/{}", self.private_port, self.protocol),
        }
    }
}

/// Inspected state of one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerDetails {
    pub id: String,
    /// Name without the leading `/`.
    pub name: String,
    /// Image reference the container was created with.
    pub image: String,
    /// Content id of the image the container was created against.
    pub image_id: String,
    pub command: String,
    pub labels: BTreeMap<String, String>,
    pub state: ContainerState,
    pub mounts: Vec<Mount>,
    pub ports: Vec<PortMapping>,
    pub tty: bool,
    pub binds: Vec<String>,
    pub links: Vec<String>,
}

impl ContainerDetails {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

/// First 12 characters of a runtime id.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(12) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDetails {
    pub id: String,
}

/// Label and name filter for container listings. All conditions must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub labels: Vec<(String, String)>,
    pub name: Option<String>,
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn matches(&self, details: &ContainerDetails) -> bool {
        let labels_match = self
            .labels
            .iter()
            .all(|(k, v)| details.labels.get(k).map(String::as_str) == Some(v.as_str()));
        let name_match = self
            .name
            .as_ref()
            .map_or(true, |name| details.name == *name);
        labels_match && name_match
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub force: bool,
    pub remove_volumes: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttachOptions {
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogsOptions {
    pub follow: bool,
    pub timestamps: bool,
}

impl Default for LogsOptions {
    fn default() -> Self {
        Self {
            follow: false,
            timestamps: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub source: LogSource,
    pub line: String,
}

/// Stream of log lines; closed when the runtime stops producing output.
pub type LogStream = mpsc::Receiver<LogLine>;

/// An interactive attachment; completes when the hijacked streams close.
pub struct AttachHandle {
    task: JoinHandle<Result<(), RuntimeError>>,
}

impl AttachHandle {
    pub fn new(task: JoinHandle<Result<(), RuntimeError>>) -> Self {
        Self { task }
    }

    /// An attachment whose streams are already closed.
    pub fn closed() -> Self {
        Self::new(tokio::spawn(async { Ok(()) }))
    }

    pub async fn wait(self) -> Result<(), RuntimeError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(RuntimeError::malformed("attach", e.to_string())),
        }
    }
}

/// Default grace period for stop and restart.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_rendering() {
        let published = PortMapping {
            ip: "0.0.0.0".to_string(),
            private_port: 80,
            public_port: Some(8080),
            protocol: "tcp".to_string(),
        };
        assert_eq!(published.render(), "0.0.0.0:8080->80/tcp");

        let exposed = PortMapping {
            ip: String::new(),
            private_port: 443,
            public_port: None,
            protocol: "tcp".to_string(),
        };
        assert_eq!(exposed.render(), "443/tcp");
    }

    #[test]
    fn short_id_truncates_to_twelve() {
        assert_eq!(short_id("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn filter_requires_every_label() {
        let mut details = ContainerDetails {
            name: "app_web_1".to_string(),
            ..Default::default()
        };
        details.labels.insert("a".to_string(), "1".to_string());

        assert!(ListFilter::new().label("a", "1").matches(&details));
        assert!(!ListFilter::new().label("a", "1").label("b", "2").matches(&details));
        assert!(ListFilter::new().name("app_web_1").matches(&details));
        assert!(!ListFilter::new().name("app_web_2").matches(&details));
    }
}
