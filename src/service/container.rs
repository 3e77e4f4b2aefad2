//! One container of a service.
//!
//! A [`Container`] is a name plus a borrowed [`Service`]. It holds no runtime
//! state: every operation re-inspects the container by name, and operations
//! on a container that does not exist are no-ops.

use super::{convert, Service};
use crate::config::{service_hash, ServiceConfig};
use crate::error::{Error, Result};
use crate::events::{data, EventType};
use crate::labels::{one_off_value, Label, COMPOSE_VERSION, DEFAULT_SIZE, SIZE_LABEL};
use crate::project::relationship::RelationshipKind;
use crate::runtime::{
    short_id, AttachOptions, ContainerCreate, ContainerDetails, HostConfig, LogSource,
    LogsOptions, RemoveOptions, RuntimeClient,
};
use crossterm::tty::IsTty;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Settings that replace the service's own for a single container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverride {
    pub command: Vec<String>,
    pub tty: bool,
    pub stdin_open: bool,
}

impl ConfigOverride {
    /// An empty command keeps the service's own.
    fn apply(&self, config: &mut ServiceConfig) {
        if !self.command.is_empty() {
            config.command = self.command.clone();
        }
        config.tty = self.tty;
        config.stdin_open = self.stdin_open;
    }
}

/// What `ps` shows for a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Info {
    Id(String),
    Summary {
        name: String,
        command: String,
        state: String,
        ports: String,
    },
}

pub struct Container<'s> {
    client: Arc<dyn RuntimeClient>,
    name: String,
    number: u32,
    one_off: bool,
    service: &'s Service,
}

impl std::fmt::Debug for Container<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("number", &self.number)
            .field("one_off", &self.one_off)
            .field("service", &self.service.name())
            .finish()
    }
}

impl<'s> Container<'s> {
    pub fn new(
        client: Arc<dyn RuntimeClient>,
        name: impl Into<String>,
        number: u32,
        one_off: bool,
        service: &'s Service,
    ) -> Self {
        Self {
            client,
            name: name.into(),
            number,
            one_off,
            service,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn is_one_off(&self) -> bool {
        self.one_off
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    pub fn project_name(&self) -> &str {
        self.service.project().name()
    }

    /// Current runtime record, `None` when the container does not exist.
    pub async fn details(&self) -> Result<Option<ContainerDetails>> {
        Ok(self.client.inspect_container(&self.name).await?)
    }

    pub async fn id(&self) -> Result<Option<String>> {
        Ok(self.details().await?.map(|d| d.id))
    }

    pub async fn is_running(&self) -> Result<bool> {
        Ok(self
            .details()
            .await?
            .is_some_and(|d| d.state.running))
    }

    pub async fn info(&self, quiet: bool) -> Result<Option<Info>> {
        let Some(details) = self.details().await? else {
            return Ok(None);
        };
        if quiet {
            return Ok(Some(Info::Id(details.id)));
        }
        let ports = details
            .ports
            .iter()
            .map(|p| p.render())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Some(Info::Summary {
            name: details.name,
            command: details.command,
            state: details.state.status,
            ports,
        }))
    }

    /// Host bindings of `private_port` (`80` or `80/udp`), one `ip:port` per line.
    pub async fn port(&self, private_port: &str) -> Result<Option<String>> {
        let Some(details) = self.details().await? else {
            return Ok(None);
        };
        let (port, protocol) = private_port
            .split_once('/')
            .unwrap_or((private_port, "tcp"));
        let Ok(port) = port.parse::<u16>() else {
            return Ok(None);
        };

        let bindings: Vec<String> = details
            .ports
            .iter()
            .filter(|p| p.private_port == port && p.protocol == protocol)
            .filter_map(|p| p.public_port.map(|public| format!("{}:{}", p.ip, public)))
            .collect();
        Ok((!bindings.is_empty()).then(|| bindings.join("\n")))
    }

    // ========================================================================
    // Creation
    // ========================================================================

    pub async fn create(&self, image: &str) -> Result<ContainerDetails> {
        self.create_with_override(image, None).await
    }

    /// Create the container unless it already exists.
    pub async fn create_with_override(
        &self,
        image: &str,
        config_override: Option<&ConfigOverride>,
    ) -> Result<ContainerDetails> {
        if let Some(existing) = self.details().await? {
            return Ok(existing);
        }
        let created = self.create_container(image, None, config_override).await?;
        self.service
            .notify(EventType::ContainerCreated, data("name", &self.name));
        Ok(created)
    }

    /// Replace the container with a fresh one under the same name.
    ///
    /// The old container is renamed out of the way first and removed only
    /// once the replacement exists. Anonymous volumes of the old container
    /// are carried over as binds.
    pub async fn recreate(&self, image: &str) -> Result<ContainerDetails> {
        let Some(existing) = self.details().await? else {
            return self.create(image).await;
        };
        if Label::Hash.get(&existing).is_none() {
            return Err(Error::MissingHash(existing.name));
        }

        let temp_name = format!("{}-{}", self.name, existing.short_id());
        debug!("Renaming {} => {}", self.name, temp_name);
        if let Err(e) = self.client.rename_container(&existing.id, &temp_name).await {
            error!("Failed to rename old container {}: {}", self.name, e);
            return Err(e.into());
        }

        let created = self.create_container(image, Some(&existing), None).await?;
        debug!("Created replacement container {}", created.id);

        let options = RemoveOptions {
            force: true,
            remove_volumes: false,
        };
        if let Err(e) = self.client.remove_container(&existing.id, options).await {
            error!("Failed to remove old container {}: {}", self.name, e);
            return Err(e.into());
        }
        debug!("Removed old container {} {}", temp_name, existing.id);

        Ok(created)
    }

    async fn create_container(
        &self,
        image: &str,
        previous: Option<&ContainerDetails>,
        config_override: Option<&ConfigOverride>,
    ) -> Result<ContainerDetails> {
        let own_config = self.service.config();
        let project = self.service.project();

        let mut request = match config_override {
            Some(config_override) => {
                let mut config = ServiceConfig::clone(own_config);
                config_override.apply(&mut config);
                convert::container_create(&config, project.name(), project.configs())
            }
            None => convert::container_create(own_config, project.name(), project.configs()),
        };
        request.name = self.name.clone();
        request.image = image.to_string();
        self.add_labels(&mut request);

        if let Some(previous) = previous {
            preserve_volumes(&mut request, previous);
        }
        self.populate_host_config(&mut request.host).await?;

        debug!(
            "Creating container {} from image {} for service {}",
            self.name,
            image,
            self.service.name()
        );
        let id = self.client.create_container(&request).await?;
        self.client
            .inspect_container(&id)
            .await?
            .ok_or_else(|| Error::ContainerVanished(self.name.clone()))
    }

    fn add_labels(&self, request: &mut ContainerCreate) {
        let config = self.service.config();
        let hash = service_hash(self.service.name(), config);
        let labels = [
            (Label::Project.as_str(), self.project_name().to_string()),
            (Label::Service.as_str(), self.service.name().to_string()),
            (Label::Number.as_str(), self.number.to_string()),
            (Label::Hash.as_str(), hash),
            (Label::OneOff.as_str(), one_off_value(self.one_off).to_string()),
            (Label::Version.as_str(), COMPOSE_VERSION.to_string()),
            (
                SIZE_LABEL,
                config.size.clone().unwrap_or_else(|| DEFAULT_SIZE.to_string()),
            ),
        ];
        for (key, value) in labels {
            request.labels.insert(key.to_string(), value);
        }
    }

    /// Links and namespace joins derived from the service's relationships.
    async fn populate_host_config(&self, host: &mut HostConfig) -> Result<()> {
        let project = self.service.project();
        // alias -> container name
        let mut links: BTreeMap<String, String> = BTreeMap::new();

        for relationship in self.service.dependent_services() {
            if !project.configs().has(&relationship.target) {
                continue;
            }
            let target = project.create_service(&relationship.target)?;
            let containers = target.containers().await?;

            match relationship.kind {
                RelationshipKind::Link => {
                    for container in &containers {
                        links
                            .entry(relationship.alias.clone())
                            .or_insert_with(|| container.name().to_string());
                        links.insert(container.name().to_string(), container.name().to_string());
                    }
                }
                RelationshipKind::IpcNamespace | RelationshipKind::NetNamespace => {
                    let first = match containers.first() {
                        Some(container) => container.id().await?,
                        None => None,
                    };
                    let Some(id) = first else {
                        return Err(Error::NamespaceTarget {
                            service: self.service.name().to_string(),
                            target: relationship.target.clone(),
                            kind: relationship.kind.to_string(),
                        });
                    };
                    let mode = Some(format!("container:{}", id));
                    if relationship.kind == RelationshipKind::IpcNamespace {
                        host.ipc_mode = mode;
                    } else {
                        host.network_mode = mode;
                    }
                }
                RelationshipKind::VolumesFrom => {}
            }
        }

        host.links = links
            .into_iter()
            .map(|(alias, name)| format!("{}:{}", name, alias))
            .collect();
        host.links
            .extend(self.service.config().external_links.iter().cloned());
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create if needed, then start if not running.
    pub async fn up(&self, image: &str) -> Result<()> {
        let details = self.create(image).await?;
        if !details.state.running {
            self.start_existing(&details).await?;
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        match self.details().await? {
            Some(details) if !details.state.running => self.start_existing(&details).await,
            _ => Ok(()),
        }
    }

    async fn start_existing(&self, details: &ContainerDetails) -> Result<()> {
        debug!("Starting container {} ({})", self.name, details.short_id());
        if let Err(e) = self.client.start_container(&details.id).await {
            debug!("Failed to start container {}: {}", self.name, e);
            return Err(e.into());
        }
        self.service
            .notify(EventType::ContainerStarted, data("name", &self.name));
        Ok(())
    }

    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        if let Some(details) = self.details().await? {
            self.client.stop_container(&details.id, timeout).await?;
        }
        Ok(())
    }

    pub async fn restart(&self, timeout: Duration) -> Result<()> {
        if let Some(details) = self.details().await? {
            self.client.restart_container(&details.id, timeout).await?;
        }
        Ok(())
    }

    /// Signal a running container. Stopped containers are left alone.
    pub async fn kill(&self, signal: &str) -> Result<()> {
        match self.details().await? {
            Some(details) if details.state.running => {
                Ok(self.client.kill_container(&details.id, signal).await?)
            }
            _ => Ok(()),
        }
    }

    pub async fn pause(&self) -> Result<()> {
        match self.details().await? {
            Some(details) if !details.state.paused => {
                Ok(self.client.pause_container(&details.id).await?)
            }
            _ => Ok(()),
        }
    }

    pub async fn unpause(&self) -> Result<()> {
        match self.details().await? {
            Some(details) if details.state.paused => {
                Ok(self.client.unpause_container(&details.id).await?)
            }
            _ => Ok(()),
        }
    }

    /// Remove the container unless it is running.
    pub async fn delete(&self, remove_volumes: bool) -> Result<()> {
        match self.details().await? {
            Some(details) if !details.state.running => {
                let options = RemoveOptions {
                    force: true,
                    remove_volumes,
                };
                Ok(self.client.remove_container(&details.id, options).await?)
            }
            _ => Ok(()),
        }
    }

    /// Whether the container no longer matches `image` or the service
    /// configuration.
    pub async fn out_of_sync(&self, image: &str) -> Result<bool> {
        let Some(details) = self.details().await? else {
            return Ok(false);
        };

        if details.image != image {
            debug!(
                "Images for {} do not match {}!={}",
                self.name, details.image, image
            );
            return Ok(true);
        }

        let expected = service_hash(self.service.name(), self.service.config());
        if Label::Hash.get(&details) != Some(expected.as_str()) {
            debug!(
                "Hash for {} does not match {:?}!={}",
                self.name,
                Label::Hash.get(&details),
                expected
            );
            return Ok(true);
        }

        let Some(local) = self.client.inspect_image(&details.image).await? else {
            debug!(
                "Image {} does not exist locally, cannot tell if {} is out of sync",
                details.image, self.name
            );
            return Ok(false);
        };
        debug!(
            "Checking existing image id vs container image id: {} == {}",
            local.id, details.image_id
        );
        Ok(local.id != details.image_id)
    }

    /// Forward the container's output to a logger named `<service>-<number>`.
    pub async fn log(&self, follow: bool) -> Result<()> {
        let Some(details) = self.details().await? else {
            return Ok(());
        };
        let logger = self
            .service
            .logger_factory()
            .create(&format!("{}-{}", self.service.name(), self.number));

        let options = LogsOptions {
            follow,
            timestamps: false,
        };
        let mut lines = self.client.container_logs(&details.id, options).await?;
        while let Some(line) = lines.recv().await {
            match line.source {
                LogSource::Stdout => logger.out(&line.line),
                LogSource::Stderr => logger.err(&line.line),
            }
        }
        Ok(())
    }

    // ========================================================================
    // One-off runs
    // ========================================================================

    /// Create a fresh container, run it attached, and return its exit code.
    pub async fn run(
        &self,
        image: &str,
        config_override: &ConfigOverride,
        autoremove: bool,
    ) -> Result<i64> {
        let created = self
            .create_container(image, None, Some(config_override))
            .await?;
        let id = created.id;

        let attach = AttachOptions {
            stdin: config_override.stdin_open,
            stdout: true,
            stderr: true,
            tty: config_override.tty,
        };
        let handle = self.client.attach_container(&id, attach).await?;

        let raw = config_override.tty && config_override.stdin_open && std::io::stdin().is_tty();
        let attached = {
            let _terminal = if raw { Some(RawTerminal::enable()?) } else { None };
            self.client.start_container(&id).await?;
            handle.wait().await
        };
        if let Err(e) = attached {
            debug!("Error while attached to {}: {}", self.name, e);
            return Err(e.into());
        }

        if autoremove {
            let state = self
                .client
                .inspect_container(&id)
                .await?
                .ok_or_else(|| Error::ContainerVanished(self.name.clone()))?
                .state;
            if state.running || state.paused {
                warn!(
                    "Detached from {}, awaiting its termination in order to uphold \"--rm\"",
                    short_id(&id)
                );
            }
            self.client.wait_container(&id).await?;
            let exit_code = self.exit_code(&id).await?;
            let options = RemoveOptions {
                force: true,
                remove_volumes: false,
            };
            self.client.remove_container(&id, options).await?;
            return Ok(exit_code);
        }

        if !config_override.tty {
            // Without a tty there is no detaching, so the container has to exit.
            return Ok(self.client.wait_container(&id).await?);
        }
        self.exit_code(&id).await
    }

    async fn exit_code(&self, id: &str) -> Result<i64> {
        let details = self
            .client
            .inspect_container(id)
            .await?
            .ok_or_else(|| Error::ContainerVanished(self.name.clone()))?;
        Ok(details.state.exit_code)
    }
}

/// Carry anonymous volumes of `previous` over as binds.
fn preserve_volumes(request: &mut ContainerCreate, previous: &ContainerDetails) {
    let preserved: Vec<String> = previous
        .mounts
        .iter()
        .filter(|m| request.volumes.iter().any(|v| *v == m.destination))
        .map(|m| format!("{}:{}", m.source, m.destination))
        .collect();

    for bind in preserved {
        if !request.host.binds.contains(&bind) {
            request.host.binds.push(bind);
        }
    }

    let bound: Vec<String> = request
        .host
        .binds
        .iter()
        .map(|b| convert::volume_destination(b).to_string())
        .collect();
    request.volumes.retain(|v| !bound.contains(v));
}

/// Raw mode on the controlling terminal, restored on drop.
struct RawTerminal;

impl RawTerminal {
    fn enable() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if let Err(e) = crossterm::terminal::disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfigs;
    use crate::project::{Context, Project};
    use crate::runtime::{InMemoryRuntime, Mount};

    #[test]
    fn preserved_volumes_replace_anonymous_ones() {
        let mut request = ContainerCreate {
            volumes: vec!["/data".to_string(), "/cache".to_string()],
            host: HostConfig {
                binds: vec!["/srv/conf:/etc/app".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let previous = ContainerDetails {
            mounts: vec![
                Mount {
                    source: "/var/lib/docker/volumes/abc/_data".to_string(),
                    destination: "/data".to_string(),
                },
                Mount {
                    source: "/srv/conf".to_string(),
                    destination: "/etc/app".to_string(),
                },
                Mount {
                    source: "/tmp/undeclared".to_string(),
                    destination: "/undeclared".to_string(),
                },
            ],
            ..Default::default()
        };

        preserve_volumes(&mut request, &previous);
        assert_eq!(
            request.host.binds,
            vec![
                "/srv/conf:/etc/app".to_string(),
                "/var/lib/docker/volumes/abc/_data:/data".to_string(),
            ]
        );
        assert_eq!(request.volumes, vec!["/cache".to_string()]);
    }

    #[test]
    fn override_replaces_run_settings_only() {
        let mut config = ServiceConfig {
            image: Some("busybox".to_string()),
            command: vec!["sleep".to_string(), "60".to_string()],
            ..Default::default()
        };
        ConfigOverride {
            command: vec!["echo".to_string(), "hi".to_string()],
            tty: true,
            stdin_open: true,
        }
        .apply(&mut config);
        assert_eq!(config.command, vec!["echo", "hi"]);
        assert!(config.tty && config.stdin_open);
        assert_eq!(config.image.as_deref(), Some("busybox"));

        ConfigOverride::default().apply(&mut config);
        assert_eq!(config.command, vec!["echo", "hi"]);
    }

    #[derive(Default)]
    struct Counter(parking_lot::Mutex<Vec<EventType>>);

    impl crate::events::EventNotifier for Counter {
        fn notify(&self, event_type: EventType, _service: &str, _data: BTreeMap<String, String>) {
            self.0.lock().push(event_type);
        }
    }

    fn project(
        runtime: &Arc<InMemoryRuntime>,
        events: Arc<Counter>,
        config: ServiceConfig,
    ) -> Arc<Project> {
        let mut configs = ServiceConfigs::new();
        configs.add("web", config);
        let context = Context::builder()
            .client(runtime.clone())
            .events(events)
            .build()
            .unwrap();
        Project::new("app", configs, context).unwrap()
    }

    fn nginx() -> ServiceConfig {
        ServiceConfig {
            image: Some("nginx".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_and_notifies_once() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.add_image("nginx", "sha256:1");
        let events = Arc::new(Counter::default());
        let project = project(&runtime, events.clone(), nginx());
        let service = project.create_service("web").unwrap();
        let container = Container::new(runtime.clone(), "app_web_1", 1, false, &service);

        let first = container.create("nginx").await.unwrap();
        let second = container.create("nginx").await.unwrap();

        assert_eq!(first.id, second.id);
        let created = events
            .0
            .lock()
            .iter()
            .filter(|e| **e == EventType::ContainerCreated)
            .count();
        assert_eq!(created, 1);
        assert_eq!(
            first.labels.get(SIZE_LABEL).map(String::as_str),
            Some(DEFAULT_SIZE)
        );
    }

    #[tokio::test]
    async fn absent_containers_ignore_lifecycle_calls() {
        let runtime = Arc::new(InMemoryRuntime::new());
        let project = project(&runtime, Arc::new(Counter::default()), nginx());
        let service = project.create_service("web").unwrap();
        let container = Container::new(runtime.clone(), "app_web_1", 1, false, &service);

        container.start().await.unwrap();
        container.stop(Duration::from_secs(1)).await.unwrap();
        container.kill("SIGTERM").await.unwrap();
        container.pause().await.unwrap();
        container.delete(true).await.unwrap();
        assert!(!container.out_of_sync("nginx").await.unwrap());
        assert_eq!(container.info(false).await.unwrap(), None);
        assert!(runtime.container_names().is_empty());
    }

    #[tokio::test]
    async fn port_reports_published_bindings_only() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.add_image("nginx", "sha256:1");
        let config = ServiceConfig {
            ports: vec!["127.0.0.1:8080:80".to_string()],
            expose: vec!["443".to_string()],
            ..nginx()
        };
        let project = project(&runtime, Arc::new(Counter::default()), config);
        let service = project.create_service("web").unwrap();
        let container = Container::new(runtime.clone(), "app_web_1", 1, false, &service);
        container.create("nginx").await.unwrap();

        assert_eq!(
            container.port("80").await.unwrap().as_deref(),
            Some("127.0.0.1:8080")
        );
        assert_eq!(container.port("443").await.unwrap(), None);
        assert_eq!(container.port("80/udp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn image_missing_locally_is_not_drift() {
        let runtime = Arc::new(InMemoryRuntime::new());
        runtime.add_image("nginx", "sha256:1");
        let project = project(&runtime, Arc::new(Counter::default()), nginx());
        let service = project.create_service("web").unwrap();
        let container = Container::new(runtime.clone(), "app_web_1", 1, false, &service);
        container.create("nginx").await.unwrap();

        runtime.remove_image("nginx").await.unwrap();
        assert!(!container.out_of_sync("nginx").await.unwrap());
        assert!(container.out_of_sync("nginx:latest").await.unwrap());
    }
}
