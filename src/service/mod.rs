//! Service reconciliation.
//!
//! A [`Service`] drives every container of one declared service towards a
//! target state. It keeps no state of its own: each operation lists the
//! service's containers by label, then acts on them through [`Container`]s,
//! fanning out with a [`ParallelExecutor`].
//!
//! Submodules:
//!
//! - `container` - the per-container state machine
//! - `convert` - [`ServiceConfig`] to runtime create request
//! - `namer` - name and index allocation for new containers
//! - `parallel` - bounded fan-out

mod container;
pub mod convert;
mod namer;
mod parallel;

pub use container::*;
pub use namer::*;
pub use parallel::*;

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::events::EventType;
use crate::labels::{container_number, service_filter};
use crate::logger::LoggerFactory;
use crate::project::relationship::{dependent_services, ServiceRelationship};
use crate::project::Project;
use crate::runtime::RuntimeClient;
use futures::future::join_all;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Keep existing containers even when they drifted.
    pub no_recreate: bool,
    /// Recreate existing containers even when they did not drift.
    pub force_recreate: bool,
    pub no_build: bool,
}

pub type UpOptions = CreateOptions;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    pub remove_volumes: bool,
}

/// Which images `remove_image` deletes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImageType {
    #[default]
    None,
    /// Only images named after the service, i.e. ones it would build.
    Local,
    All,
}

impl FromStr for ImageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "" => Ok(ImageType::None),
            "local" => Ok(ImageType::Local),
            "all" => Ok(ImageType::All),
            other => Err(Error::Config(format!(
                "Invalid image type '{}': expected 'local' or 'all'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Remove the container once it exited.
    pub autoremove: bool,
    pub tty: bool,
    pub stdin_open: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            autoremove: false,
            tty: true,
            stdin_open: true,
        }
    }
}

pub struct Service {
    name: String,
    config: Arc<ServiceConfig>,
    project: Arc<Project>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("project", &self.project.name())
            .finish()
    }
}

impl Service {
    pub(crate) fn new(name: impl Into<String>, config: Arc<ServiceConfig>, project: Arc<Project>) -> Self {
        Self {
            name: name.into(),
            config,
            project,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Arc<ServiceConfig> {
        &self.config
    }

    pub fn project(&self) -> &Arc<Project> {
        &self.project
    }

    fn client(&self) -> Arc<dyn RuntimeClient> {
        self.project.context().client_factory().create(Some(&self.name))
    }

    fn executor(&self) -> ParallelExecutor {
        ParallelExecutor::new(self.project.context().parallelism())
    }

    pub(crate) fn notify(&self, event_type: EventType, data: BTreeMap<String, String>) {
        self.project
            .context()
            .events()
            .notify(event_type, &self.name, data);
    }

    pub(crate) fn logger_factory(&self) -> &dyn LoggerFactory {
        self.project.context().logger_factory()
    }

    /// The declared image, or `<project>_<service>` for services that build.
    pub fn image_name(&self) -> String {
        match &self.config.image {
            Some(image) => image.clone(),
            None => format!("{}_{}", self.project.name(), self.name),
        }
    }

    pub fn dependent_services(&self) -> Vec<ServiceRelationship> {
        dependent_services(&self.config, self.project.configs())
    }

    /// Scaled (not one-off) containers of the service, ordered by index.
    pub async fn containers(&self) -> Result<Vec<Container<'_>>> {
        let client = self.client();
        let listed = client
            .list_containers(&service_filter(self.project.name(), &self.name, false))
            .await?;

        let mut result = Vec::with_capacity(listed.len());
        for details in listed {
            let number = container_number(&details)?;
            result.push(Container::new(
                Arc::clone(&client),
                details.name,
                number,
                false,
                self,
            ));
        }
        result.sort_by_key(|c| c.number());
        Ok(result)
    }

    async fn ensure_image_exists(&self, no_build: bool) -> Result<String> {
        let image = self.image_name();
        if self.client().inspect_image(&image).await?.is_some() {
            return Ok(image);
        }
        if self.config.image.is_none() {
            debug!(
                "Service {} has no image and no_build={}; refusing to build",
                self.name, no_build
            );
            return Err(Error::BuildUnsupported(self.name.clone()));
        }
        self.pull().await?;
        Ok(image)
    }

    /// Make sure at least `count` containers exist, naming new ones through
    /// the service's namer.
    async fn construct_containers(&self, image: &str, count: usize) -> Result<Vec<Container<'_>>> {
        let mut result = self.containers().await?;
        let client = self.client();

        let mut namer: Box<dyn Namer> = match &self.config.container_name {
            Some(custom) => {
                if count > 1 {
                    warn!(
                        "The \"{}\" service is using the custom container name \"{}\". Docker requires each container to have a unique name. Remove the custom name to scale the service.",
                        self.name, custom
                    );
                }
                Box::new(SingleNamer::new(custom.clone()))
            }
            None => Box::new(
                DefaultNamer::new(client.as_ref(), self.project.name(), &self.name, false).await?,
            ),
        };

        while result.len() < count {
            let (name, number) = namer.next();
            let container = Container::new(Arc::clone(&client), name, number, false, self);
            let created = container.create(image).await?;
            debug!("Created container {}: {}", created.id, created.name);
            result.push(container);
        }
        Ok(result)
    }

    async fn create_one(&self, image: &str) -> Result<Container<'_>> {
        let mut containers = self.construct_containers(image, 1).await?;
        containers
            .pop()
            .ok_or_else(|| Error::ContainerVanished(self.name.clone()))
    }

    async fn recreate_if_needed(
        &self,
        image: &str,
        container: &Container<'_>,
        options: CreateOptions,
    ) -> Result<()> {
        if options.no_recreate {
            return Ok(());
        }
        let out_of_sync = container.out_of_sync(image).await?;
        debug!(
            out_of_sync,
            force_recreate = options.force_recreate,
            "Deciding whether {} needs recreating",
            container.name()
        );
        if options.force_recreate || out_of_sync {
            info!("Recreating {}", self.name);
            container.recreate(image).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Create one container if there is none, otherwise recreate the ones that
    /// drifted.
    pub async fn create(&self, options: CreateOptions) -> Result<()> {
        let containers = self.containers().await?;
        let image = self.ensure_image_exists(options.no_build).await?;

        if containers.is_empty() {
            self.create_one(&image).await?;
            return Ok(());
        }
        let image = image.as_str();
        self.executor()
            .run(&containers, |c| self.recreate_if_needed(image, c, options))
            .await
    }

    /// Create (or recreate) and start every container.
    pub async fn up(&self, options: UpOptions) -> Result<()> {
        let mut containers = self.containers().await?;
        let image = if containers.is_empty() || !options.no_recreate {
            self.ensure_image_exists(options.no_build).await?
        } else {
            self.image_name()
        };
        debug!(
            "Found {} existing containers for service {}",
            containers.len(),
            self.name
        );

        if containers.is_empty() {
            containers.push(self.create_one(&image).await?);
        }
        let image = image.as_str();
        self.executor()
            .run(&containers, |c| async move {
                self.recreate_if_needed(image, c, options).await?;
                c.up(image).await
            })
            .await
    }

    /// Start existing containers without creating any.
    pub async fn start(&self) -> Result<()> {
        let containers = self.containers().await?;
        self.executor().run(&containers, |c| c.start()).await
    }

    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let containers = self.containers().await?;
        self.executor().run(&containers, |c| c.stop(timeout)).await
    }

    pub async fn restart(&self, timeout: Duration) -> Result<()> {
        let containers = self.containers().await?;
        self.executor().run(&containers, |c| c.restart(timeout)).await
    }

    pub async fn kill(&self, signal: &str) -> Result<()> {
        let containers = self.containers().await?;
        self.executor().run(&containers, |c| c.kill(signal)).await
    }

    pub async fn pause(&self) -> Result<()> {
        let containers = self.containers().await?;
        self.executor().run(&containers, |c| c.pause()).await
    }

    pub async fn unpause(&self) -> Result<()> {
        let containers = self.containers().await?;
        self.executor().run(&containers, |c| c.unpause()).await
    }

    /// Remove stopped containers. Running ones are left in place.
    pub async fn delete(&self, options: DeleteOptions) -> Result<()> {
        let containers = self.containers().await?;
        self.executor()
            .run(&containers, |c| c.delete(options.remove_volumes))
            .await
    }

    /// Forward the output of every container at once. Following streams never
    /// finish, so this skips the bounded executor.
    pub async fn log(&self, follow: bool) -> Result<()> {
        let containers = self.containers().await?;
        join_all(containers.iter().map(|c| c.log(follow)))
            .await
            .into_iter()
            .collect()
    }

    pub async fn info(&self, quiet: bool) -> Result<Vec<Info>> {
        let mut result = Vec::new();
        for container in self.containers().await? {
            if let Some(info) = container.info(quiet).await? {
                result.push(info);
            }
        }
        Ok(result)
    }

    /// Bring the number of containers to exactly `count`.
    ///
    /// Containers with the highest indices are removed first; missing ones
    /// are created one at a time. All remaining containers are started.
    pub async fn scale(&self, count: u32, timeout: Duration) -> Result<()> {
        if !self.config.fixed_host_ports().is_empty() {
            warn!(
                "The \"{}\" service specifies a port on the host. If multiple containers for this service are created on a single host, the port will clash.",
                self.name
            );
        }

        let count = count as usize;
        let containers = self.containers().await?;
        if containers.len() > count {
            let excess: Vec<&Container<'_>> = containers[count..].iter().rev().collect();
            self.executor()
                .run(excess, |c| async move {
                    c.stop(timeout).await?;
                    c.delete(false).await
                })
                .await?;
        }

        if containers.len() < count {
            let image = self.ensure_image_exists(false).await?;
            self.construct_containers(&image, count).await?;
        }
        self.start().await
    }

    /// Run a one-off container and return its exit code.
    pub async fn run(&self, command: Vec<String>, options: RunOptions) -> Result<i64> {
        let image = self.ensure_image_exists(false).await?;
        let client = self.client();

        let mut namer =
            DefaultNamer::new(client.as_ref(), self.project.name(), &self.name, true).await?;
        let (name, number) = namer.next();
        let container = Container::new(client, name, number, true, self);

        let config_override = ConfigOverride {
            command,
            tty: options.tty,
            stdin_open: options.stdin_open,
        };
        container
            .run(&image, &config_override, options.autoremove)
            .await
    }

    /// Pull the declared image. Services without one are skipped.
    pub async fn pull(&self) -> Result<()> {
        let Some(image) = &self.config.image else {
            return Ok(());
        };
        info!("Pulling {} ({})...", self.name, image);
        self.client().pull_image(image).await?;
        Ok(())
    }

    /// Images are never built. Services that need one fail when their
    /// containers are created.
    pub async fn build(&self) -> Result<()> {
        if self.config.image.is_none() {
            debug!("Skipping build of {}: building is not supported", self.name);
        }
        Ok(())
    }

    pub async fn remove_image(&self, kind: ImageType) -> Result<()> {
        let remove = match kind {
            ImageType::None => false,
            ImageType::Local => self.config.image.is_none(),
            ImageType::All => true,
        };
        if !remove {
            return Ok(());
        }

        let image = self.image_name();
        match self.client().remove_image(&image).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Image {} already gone", image);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
