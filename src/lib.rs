#![allow(unused_assignments)]

//! # Stevedore
//!
//! Declarative multi-container orchestration: reconcile a set of service
//! definitions against the containers actually present in a container
//! runtime.
//!
//! ## Features
//!
//! - **Reconciliation**: create, recreate, start, stop, scale and tear down
//!   the containers of each service
//! - **Drift detection**: a content hash of each service's configuration is
//!   stored on its containers, and containers whose hash or image changed are
//!   recreated with their anonymous volumes carried over
//! - **Dependency awareness**: links, `volumes_from` and shared IPC/network
//!   namespaces order project operations and shape each container's host
//!   configuration
//! - **Layered configuration**: multiple declaration files, `extends`,
//!   `env_file` and `${VAR}` interpolation
//! - **Labels as state**: nothing is persisted besides labels on containers
//!
//! ## Quick Start
//!
//! ```no_run
//! use stevedore::config::OsEnvLookup;
//! use stevedore::project::{Context, Project};
//! use stevedore::runtime::DockerClient;
//! use stevedore::service::UpOptions;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), stevedore::Error> {
//! let context = Context::builder()
//!     .client(Arc::new(DockerClient::new()))
//!     .build()?;
//! let project = Project::load("myapp", &["docker-compose.yml"], context, &OsEnvLookup)?;
//!
//! // Bring every service up, dependencies first
//! project.up(&[], UpOptions::default()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - Containers of one service are acted on concurrently, bounded by the
//!   context's parallelism
//! - Services of one dependency group are processed concurrently; groups run
//!   in order
//! - Callers must not run two operations on the same service at once

pub mod config;
pub mod error;
pub mod events;
pub mod labels;
pub mod logger;
pub mod project;
pub mod runtime;
pub mod service;

// Re-export commonly used types
pub use config::{ServiceConfig, ServiceConfigs};
pub use error::{Error, Result};
pub use events::{Event, EventBus, EventNotifier, EventType};
pub use project::{Context, Project};
pub use runtime::{DockerClient, InMemoryRuntime, RuntimeClient, RuntimeError};
pub use service::{Container, Service};
