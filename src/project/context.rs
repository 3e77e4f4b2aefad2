use crate::error::{Error, Result};
use crate::events::{EventBus, EventNotifier};
use crate::logger::{LoggerFactory, NullLoggerFactory};
use crate::runtime::{ClientFactory, RuntimeClient, SharedClientFactory};
use crate::service::DEFAULT_PARALLELISM;
use std::sync::Arc;

/// Collaborators shared by every service of a project.
#[derive(Clone)]
pub struct Context {
    client_factory: Arc<dyn ClientFactory>,
    events: Arc<dyn EventNotifier>,
    logger_factory: Arc<dyn LoggerFactory>,
    parallelism: usize,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    pub fn client_factory(&self) -> &dyn ClientFactory {
        self.client_factory.as_ref()
    }

    pub fn events(&self) -> &dyn EventNotifier {
        self.events.as_ref()
    }

    pub fn logger_factory(&self) -> &dyn LoggerFactory {
        self.logger_factory.as_ref()
    }

    /// Maximum number of containers acted on at once.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }
}

/// Builder for a [`Context`].
///
/// # Example
///
/// ```no_run
/// use stevedore::project::Context;
/// use stevedore::runtime::DockerClient;
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), stevedore::Error> {
/// let context = Context::builder()
///     .client(Arc::new(DockerClient::new()))
///     .parallelism(8)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ContextBuilder {
    client_factory: Option<Arc<dyn ClientFactory>>,
    events: Option<Arc<dyn EventNotifier>>,
    logger_factory: Option<Arc<dyn LoggerFactory>>,
    parallelism: usize,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            client_factory: None,
            events: None,
            logger_factory: None,
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Set the factory handing out runtime clients per service.
    ///
    /// This (or [`client`](Self::client)) is required to build the context.
    pub fn client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.client_factory = Some(factory);
        self
    }

    /// Use one runtime client for every service.
    pub fn client(self, client: Arc<dyn RuntimeClient>) -> Self {
        self.client_factory(Arc::new(SharedClientFactory::new(client)))
    }

    /// Where lifecycle events go. Defaults to an [`EventBus`] nobody listens to.
    pub fn events(mut self, events: Arc<dyn EventNotifier>) -> Self {
        self.events = Some(events);
        self
    }

    /// Where container output goes. Defaults to discarding it.
    pub fn logger_factory(mut self, factory: Arc<dyn LoggerFactory>) -> Self {
        self.logger_factory = Some(factory);
        self
    }

    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn build(self) -> Result<Context> {
        let client_factory = self.client_factory.ok_or_else(|| {
            Error::Config("A runtime client is required to build a project context".to_string())
        })?;
        Ok(Context {
            client_factory,
            events: self.events.unwrap_or_else(|| Arc::new(EventBus::new())),
            logger_factory: self
                .logger_factory
                .unwrap_or_else(|| Arc::new(NullLoggerFactory)),
            parallelism: self.parallelism,
        })
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
