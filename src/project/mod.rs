//! Project-wide orchestration.
//!
//! A [`Project`] is a named set of resolved service configurations plus the
//! [`Context`] its services share. Project operations process services in
//! dependency groups: services within a group run concurrently, groups run
//! one after another. Forward operations (up, create, start...) handle
//! dependencies first; teardown operations (stop, kill, delete, down) handle
//! them last.

mod context;
pub mod graph;
pub mod relationship;

pub use context::{Context, ContextBuilder};
pub use graph::Graph;
pub use relationship::{RelationshipKind, ServiceRelationship};

use crate::config::{
    merge_services, validate_references, EnvironmentLookup, FileResourceLookup, ResourceLookup,
    ServiceConfigs,
};
use crate::error::{Error, Result};
use crate::events::EventType;
use crate::service::{
    CreateOptions, DeleteOptions, ImageType, Info, RunOptions, Service, UpOptions,
};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Lowercase alphanumerics only, as used in container names and labels.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    DependenciesFirst,
    DependentsFirst,
}

/// Events emitted around one project operation.
#[derive(Debug, Clone, Copy)]
struct OpEvents {
    project_start: EventType,
    project_done: EventType,
    service_start: EventType,
    service_done: EventType,
}

impl OpEvents {
    const fn new(
        project_start: EventType,
        project_done: EventType,
        service_start: EventType,
        service_done: EventType,
    ) -> Self {
        Self {
            project_start,
            project_done,
            service_start,
            service_done,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownOptions {
    pub timeout: Duration,
    pub remove_volumes: bool,
    pub remove_images: ImageType,
}

impl Default for DownOptions {
    fn default() -> Self {
        Self {
            timeout: crate::runtime::DEFAULT_STOP_TIMEOUT,
            remove_volumes: false,
            remove_images: ImageType::None,
        }
    }
}

pub struct Project {
    name: String,
    configs: ServiceConfigs,
    context: Context,
    files: Vec<String>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("services", &self.configs.keys())
            .field("files", &self.files)
            .finish()
    }
}

impl Project {
    /// A project over already resolved configurations.
    pub fn new(name: &str, configs: ServiceConfigs, context: Context) -> Result<Arc<Self>> {
        Self::assemble(name, configs, context, Vec::new()).map(Arc::new)
    }

    fn assemble(
        name: &str,
        configs: ServiceConfigs,
        context: Context,
        files: Vec<String>,
    ) -> Result<Self> {
        validate_references(&configs)?;
        let project = Self {
            name: normalize_name(name),
            configs,
            context,
            files,
        };
        project.graph().parallel_groups()?;
        Ok(project)
    }

    /// Load and merge declaration files from disk, later files overriding
    /// earlier ones.
    pub fn load(
        name: &str,
        files: &[impl AsRef<Path>],
        context: Context,
        env: &dyn EnvironmentLookup,
    ) -> Result<Arc<Self>> {
        let mut sources = Vec::with_capacity(files.len());
        for file in files {
            let file = file.as_ref();
            let bytes = std::fs::read(file).map_err(|e| {
                Error::Config(format!("Failed to read {}: {}", file.display(), e))
            })?;
            sources.push((file.display().to_string(), bytes));
        }
        Self::from_sources(name, &sources, context, env, Some(&FileResourceLookup))
    }

    /// Merge in-memory declaration sources, given as `(file name, contents)`.
    pub fn from_sources(
        name: &str,
        sources: &[(String, Vec<u8>)],
        context: Context,
        env: &dyn EnvironmentLookup,
        resources: Option<&dyn ResourceLookup>,
    ) -> Result<Arc<Self>> {
        let mut configs = ServiceConfigs::new();
        for (file, bytes) in sources {
            debug!("Loading services from {}", file);
            for (service, config) in merge_services(&configs, env, resources, file, bytes)? {
                configs.add(service, config);
            }
        }

        let files = sources.iter().map(|(file, _)| file.clone()).collect();
        Self::assemble(name, configs, context, files).map(Arc::new)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn configs(&self) -> &ServiceConfigs {
        &self.configs
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Files the project was loaded from, in merge order.
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// A fresh handle on one service. Handles are never cached.
    pub fn create_service(self: &Arc<Self>, name: &str) -> Result<Service> {
        let config = self
            .configs
            .get(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
        Ok(Service::new(name, Arc::clone(config), Arc::clone(self)))
    }

    fn notify(&self, event_type: EventType, service: &str) {
        self.context
            .events()
            .notify(event_type, service, BTreeMap::new());
    }

    /// Dependency graph over every service.
    fn graph(&self) -> Graph {
        let mut graph = Graph::new();
        for (name, config) in self.configs.iter() {
            graph.add_node(name);
            for relationship in relationship::dependent_services(config, &self.configs) {
                if self.configs.has(&relationship.target) {
                    graph.add_edge(name, &relationship.target);
                }
            }
        }
        graph
    }

    /// Groups of services to process, in processing order.
    ///
    /// An empty selection means every service. `with_dependencies` pulls in
    /// everything the selected services depend on.
    fn groups(
        &self,
        selected: &[String],
        order: Order,
        with_dependencies: bool,
    ) -> Result<Vec<Vec<String>>> {
        let selected = self.selection(selected)?;
        let graph = self.graph();
        let mut groups = graph.parallel_groups()?;

        let mut included: HashSet<String> = selected.iter().cloned().collect();
        if with_dependencies {
            for name in &selected {
                included.extend(graph.dependencies(name));
            }
        }
        for group in &mut groups {
            group.retain(|name| included.contains(name));
        }
        groups.retain(|group| !group.is_empty());

        if order == Order::DependentsFirst {
            groups.reverse();
        }
        Ok(groups)
    }

    async fn perform<F, Fut>(
        self: &Arc<Self>,
        events: OpEvents,
        selected: &[String],
        order: Order,
        with_dependencies: bool,
        action: F,
    ) -> Result<()>
    where
        F: Fn(Service) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let groups = self.groups(selected, order, with_dependencies)?;
        self.notify(events.project_start, "");

        for group in groups {
            debug!("Processing services {:?}", group);
            let tasks = group.iter().map(|name| {
                let action = &action;
                async move {
                    let service = self.create_service(name)?;
                    self.notify(events.service_start, name);
                    action(service).await?;
                    self.notify(events.service_done, name);
                    Ok::<(), Error>(())
                }
            });

            let mut errors: Vec<Error> = join_all(tasks)
                .await
                .into_iter()
                .filter_map(|r| r.err())
                .collect();
            if errors.len() == 1 {
                return Err(errors.remove(0));
            }
            if !errors.is_empty() {
                return Err(Error::Multiple(errors));
            }
        }

        self.notify(events.project_done, "");
        Ok(())
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub async fn create(self: &Arc<Self>, services: &[String], options: CreateOptions) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectCreateStart,
            EventType::ProjectCreateDone,
            EventType::ServiceCreateStart,
            EventType::ServiceCreate,
        );
        self.perform(events, services, Order::DependenciesFirst, true, |s| async move {
            s.create(options).await
        })
        .await
    }

    pub async fn up(self: &Arc<Self>, services: &[String], options: UpOptions) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectUpStart,
            EventType::ProjectUpDone,
            EventType::ServiceUpStart,
            EventType::ServiceUp,
        );
        self.perform(events, services, Order::DependenciesFirst, true, |s| async move {
            s.up(options).await
        })
        .await
    }

    pub async fn start(self: &Arc<Self>, services: &[String]) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectStartStart,
            EventType::ProjectStartDone,
            EventType::ServiceStartStart,
            EventType::ServiceStart,
        );
        self.perform(events, services, Order::DependenciesFirst, true, |s| async move {
            s.start().await
        })
        .await
    }

    pub async fn stop(self: &Arc<Self>, services: &[String], timeout: Duration) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectStopStart,
            EventType::ProjectStopDone,
            EventType::ServiceStopStart,
            EventType::ServiceStop,
        );
        self.perform(events, services, Order::DependentsFirst, false, |s| async move {
            s.stop(timeout).await
        })
        .await
    }

    pub async fn restart(self: &Arc<Self>, services: &[String], timeout: Duration) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectRestartStart,
            EventType::ProjectRestartDone,
            EventType::ServiceRestartStart,
            EventType::ServiceRestart,
        );
        self.perform(events, services, Order::DependenciesFirst, false, |s| async move {
            s.restart(timeout).await
        })
        .await
    }

    pub async fn kill(self: &Arc<Self>, services: &[String], signal: &str) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectKillStart,
            EventType::ProjectKillDone,
            EventType::ServiceKillStart,
            EventType::ServiceKill,
        );
        self.perform(events, services, Order::DependentsFirst, false, |s| async move {
            s.kill(signal).await
        })
        .await
    }

    pub async fn pause(self: &Arc<Self>, services: &[String]) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectPauseStart,
            EventType::ProjectPauseDone,
            EventType::ServicePauseStart,
            EventType::ServicePause,
        );
        self.perform(events, services, Order::DependentsFirst, false, |s| async move {
            s.pause().await
        })
        .await
    }

    pub async fn unpause(self: &Arc<Self>, services: &[String]) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectUnpauseStart,
            EventType::ProjectUnpauseDone,
            EventType::ServiceUnpauseStart,
            EventType::ServiceUnpause,
        );
        self.perform(events, services, Order::DependenciesFirst, false, |s| async move {
            s.unpause().await
        })
        .await
    }

    /// Remove stopped containers.
    pub async fn delete(self: &Arc<Self>, services: &[String], options: DeleteOptions) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectDeleteStart,
            EventType::ProjectDeleteDone,
            EventType::ServiceDeleteStart,
            EventType::ServiceDelete,
        );
        self.perform(events, services, Order::DependentsFirst, false, |s| async move {
            s.delete(options).await
        })
        .await
    }

    /// Stop and remove every container, optionally with volumes and images.
    pub async fn down(self: &Arc<Self>, services: &[String], options: DownOptions) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectDownStart,
            EventType::ProjectDownDone,
            EventType::ServiceDownStart,
            EventType::ServiceDown,
        );
        self.perform(events, services, Order::DependentsFirst, false, |s| async move {
            s.stop(options.timeout).await?;
            s.delete(DeleteOptions {
                remove_volumes: options.remove_volumes,
            })
            .await?;
            s.remove_image(options.remove_images).await
        })
        .await
    }

    pub async fn pull(self: &Arc<Self>, services: &[String]) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectPullStart,
            EventType::ProjectPullDone,
            EventType::ServicePullStart,
            EventType::ServicePull,
        );
        self.perform(events, services, Order::DependenciesFirst, false, |s| async move {
            s.pull().await
        })
        .await
    }

    pub async fn build(self: &Arc<Self>, services: &[String]) -> Result<()> {
        let events = OpEvents::new(
            EventType::ProjectBuildStart,
            EventType::ProjectBuildDone,
            EventType::ServiceBuildStart,
            EventType::ServiceBuild,
        );
        self.perform(events, services, Order::DependenciesFirst, false, |s| async move {
            s.build().await
        })
        .await
    }

    /// Scale each named service to its count.
    pub async fn scale(
        self: &Arc<Self>,
        counts: &BTreeMap<String, u32>,
        timeout: Duration,
    ) -> Result<()> {
        let selected: Vec<String> = counts.keys().cloned().collect();
        if selected.is_empty() {
            return Ok(());
        }
        let events = OpEvents::new(
            EventType::ProjectScaleStart,
            EventType::ProjectScaleDone,
            EventType::ServiceScaleStart,
            EventType::ServiceScale,
        );
        self.perform(events, &selected, Order::DependenciesFirst, false, |s| async move {
            let count = counts.get(s.name()).copied().unwrap_or_default();
            s.scale(count, timeout).await
        })
        .await
    }

    /// Run a one-off command in a new container of `service`.
    pub async fn run(
        self: &Arc<Self>,
        service: &str,
        command: Vec<String>,
        options: RunOptions,
    ) -> Result<i64> {
        let service = self.create_service(service)?;
        self.notify(EventType::ServiceRunStart, service.name());
        let exit_code = service.run(command, options).await?;
        self.notify(EventType::ServiceRun, service.name());
        Ok(exit_code)
    }

    /// Container summaries of the selected services, in declaration order.
    pub async fn info(self: &Arc<Self>, services: &[String], quiet: bool) -> Result<Vec<Info>> {
        let mut result = Vec::new();
        for name in self.selection(services)? {
            result.extend(self.create_service(&name)?.info(quiet).await?);
        }
        Ok(result)
    }

    /// Names of the containers of the selected services.
    pub async fn containers(self: &Arc<Self>, services: &[String]) -> Result<Vec<String>> {
        let mut result = Vec::new();
        for name in self.selection(services)? {
            let service = self.create_service(&name)?;
            result.extend(
                service
                    .containers()
                    .await?
                    .iter()
                    .map(|c| c.name().to_string()),
            );
        }
        Ok(result)
    }

    /// Forward the output of every selected service concurrently.
    pub async fn log(self: &Arc<Self>, services: &[String], follow: bool) -> Result<()> {
        let handles = self
            .selection(services)?
            .iter()
            .map(|name| self.create_service(name))
            .collect::<Result<Vec<_>>>()?;
        let mut errors: Vec<Error> = join_all(handles.iter().map(|s| s.log(follow)))
            .await
            .into_iter()
            .filter_map(|r| r.err())
            .collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }

    /// `services` if given, otherwise every service, in declaration order.
    fn selection(&self, services: &[String]) -> Result<Vec<String>> {
        if services.is_empty() {
            return Ok(self.configs.keys().to_vec());
        }
        for name in services {
            if !self.configs.has(name) {
                return Err(Error::ServiceNotFound(name.clone()));
            }
        }
        Ok(services.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize_name("My-App_2"), "myapp2");
        assert_eq!(normalize_name("stevedore"), "stevedore");
    }
}
