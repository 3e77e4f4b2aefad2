//! Container runtime boundary.
//!
//! The engine never talks to a daemon directly. Everything goes through the
//! [`RuntimeClient`] trait: [`DockerClient`] drives the `docker` CLI, and
//! [`InMemoryRuntime`] keeps containers in process memory for tests and dry
//! runs.

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::DockerClient;
pub use error::RuntimeError;
pub use memory::InMemoryRuntime;
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Operations the engine needs from a container runtime.
///
/// Lookups by name or id return `Ok(None)` when the object does not exist.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Create a container and return its id.
    async fn create_container(&self, request: &ContainerCreate) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn restart_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), RuntimeError>;

    async fn pause_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn unpause_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str, options: RemoveOptions)
        -> Result<(), RuntimeError>;

    async fn rename_container(&self, id: &str, new_name: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(
        &self,
        name_or_id: &str,
    ) -> Result<Option<ContainerDetails>, RuntimeError>;

    /// All containers, running or not, matching every condition of `filter`.
    async fn list_containers(
        &self,
        filter: &ListFilter,
    ) -> Result<Vec<ContainerDetails>, RuntimeError>;

    /// Attach to a container's streams. Must be called before the container
    /// is started so that no output is lost.
    async fn attach_container(
        &self,
        id: &str,
        options: AttachOptions,
    ) -> Result<AttachHandle, RuntimeError>;

    /// Block until the container exits and return its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    async fn container_logs(&self, id: &str, options: LogsOptions)
        -> Result<LogStream, RuntimeError>;

    async fn inspect_image(&self, image: &str) -> Result<Option<ImageDetails>, RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError>;
}

/// Hands out runtime clients, optionally specialised per service.
pub trait ClientFactory: Send + Sync {
    fn create(&self, service: Option<&str>) -> Arc<dyn RuntimeClient>;
}

/// A factory that returns the same shared client for every service.
#[derive(Clone)]
pub struct SharedClientFactory {
    client: Arc<dyn RuntimeClient>,
}

impl SharedClientFactory {
    pub fn new(client: Arc<dyn RuntimeClient>) -> Self {
        Self { client }
    }
}

impl ClientFactory for SharedClientFactory {
    fn create(&self, _service: Option<&str>) -> Arc<dyn RuntimeClient> {
        Arc::clone(&self.client)
    }
}
