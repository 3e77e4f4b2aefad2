//! Lifecycle events.
//!
//! The engine publishes events through an [`EventNotifier`] and never waits on
//! their delivery. [`EventBus`] fans events out to any number of channel
//! subscribers, and [`DefaultListener`] turns a subscription into log lines.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ContainerCreated,
    ContainerStarted,

    ServiceAdd,
    ServiceUpStart,
    ServiceUpIgnored,
    ServiceUp,
    ServiceCreateStart,
    ServiceCreate,
    ServiceDeleteStart,
    ServiceDelete,
    ServiceDownStart,
    ServiceDown,
    ServiceRestartStart,
    ServiceRestart,
    ServicePullStart,
    ServicePull,
    ServiceKillStart,
    ServiceKill,
    ServiceStartStart,
    ServiceStart,
    ServiceBuildStart,
    ServiceBuild,
    ServicePauseStart,
    ServicePause,
    ServiceUnpauseStart,
    ServiceUnpause,
    ServiceStopStart,
    ServiceStop,
    ServiceRunStart,
    ServiceRun,
    ServiceScaleStart,
    ServiceScale,

    ProjectDownStart,
    ProjectDownDone,
    ProjectCreateStart,
    ProjectCreateDone,
    ProjectUpStart,
    ProjectUpDone,
    ProjectDeleteStart,
    ProjectDeleteDone,
    ProjectRestartStart,
    ProjectRestartDone,
    ProjectKillStart,
    ProjectKillDone,
    ProjectStartStart,
    ProjectStartDone,
    ProjectBuildStart,
    ProjectBuildDone,
    ProjectPauseStart,
    ProjectPauseDone,
    ProjectUnpauseStart,
    ProjectUnpauseDone,
    ProjectStopStart,
    ProjectStopDone,
    ProjectPullStart,
    ProjectPullDone,
    ProjectScaleStart,
    ProjectScaleDone,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        use EventType::*;
        match self {
            ContainerCreated => "Created container",
            ContainerStarted => "Started container",

            ServiceAdd => "Adding",
            ServiceUpStart => "Starting",
            ServiceUpIgnored => "Ignoring",
            ServiceUp => "Started",
            ServiceCreateStart => "Creating",
            ServiceCreate => "Created",
            ServiceDeleteStart => "Deleting",
            ServiceDelete => "Deleted",
            ServiceDownStart => "Stopping",
            ServiceDown => "Stopped",
            ServiceRestartStart => "Restarting",
            ServiceRestart => "Restarted",
            ServicePullStart => "Pulling",
            ServicePull => "Pulled",
            ServiceKillStart => "Killing",
            ServiceKill => "Killed",
            ServiceStartStart => "Starting",
            ServiceStart => "Started",
            ServiceBuildStart => "Building",
            ServiceBuild => "Built",
            ServicePauseStart => "Pausing",
            ServicePause => "Paused",
            ServiceUnpauseStart => "Unpausing",
            ServiceUnpause => "Unpaused",
            ServiceStopStart => "Stopping",
            ServiceStop => "Stopped",
            ServiceRunStart => "Executing",
            ServiceRun => "Executed",
            ServiceScaleStart => "Scaling",
            ServiceScale => "Scaled",

            ProjectDownStart => "Stopping project",
            ProjectDownDone => "Project stopped",
            ProjectCreateStart => "Creating project",
            ProjectCreateDone => "Project created",
            ProjectUpStart => "Starting project",
            ProjectUpDone => "Project started",
            ProjectDeleteStart => "Deleting project",
            ProjectDeleteDone => "Project deleted",
            ProjectRestartStart => "Restarting project",
            ProjectRestartDone => "Project restarted",
            ProjectKillStart => "Killing project",
            ProjectKillDone => "Project killed",
            ProjectStartStart => "Starting project",
            ProjectStartDone => "Project started",
            ProjectBuildStart => "Building project",
            ProjectBuildDone => "Project built",
            ProjectPauseStart => "Pausing project",
            ProjectPauseDone => "Project paused",
            ProjectUnpauseStart => "Unpausing project",
            ProjectUnpauseDone => "Project unpaused",
            ProjectStopStart => "Stopping project",
            ProjectStopDone => "Project stopped",
            ProjectPullStart => "Pulling project",
            ProjectPullDone => "Project pulled",
            ProjectScaleStart => "Scaling project",
            ProjectScaleDone => "Project scaled",
        }
    }

    /// Milestones worth reporting at `info` level.
    pub fn is_milestone(self) -> bool {
        use EventType::*;
        matches!(
            self,
            ProjectDeleteDone
                | ProjectDeleteStart
                | ProjectDownDone
                | ProjectDownStart
                | ProjectRestartDone
                | ProjectRestartStart
                | ProjectUpDone
                | ProjectUpStart
                | ServiceDeleteStart
                | ServiceDelete
                | ServiceDownStart
                | ServiceDown
                | ServiceRestartStart
                | ServiceRestart
                | ServiceUpStart
                | ServiceUp
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub event_type: EventType,
    /// Empty for project-wide events.
    pub service_name: String,
    pub data: BTreeMap<String, String>,
}

/// Sink for lifecycle events. Implementations must not block.
pub trait EventNotifier: Send + Sync {
    fn notify(&self, event_type: EventType, service_name: &str, data: BTreeMap<String, String>);
}

/// Shorthand for a single-entry event payload.
pub fn data(key: &str, value: impl Into<String>) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value.into())])
}

/// Broadcasts events to every live subscriber.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

impl EventNotifier for EventBus {
    fn notify(&self, event_type: EventType, service_name: &str, data: BTreeMap<String, String>) {
        let event = Event {
            event_type,
            service_name: service_name.to_string(),
            data,
        };
        // Dropped receivers are pruned on the way.
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Logs every event of a project, counting services as they come up.
pub struct DefaultListener {
    project: String,
    service_count: usize,
    up_count: usize,
}

impl DefaultListener {
    pub fn new(project: impl Into<String>, service_count: usize) -> Self {
        Self {
            project: project.into(),
            service_count,
            up_count: 0,
        }
    }

    /// Consume `events` on a background task until every sender is gone.
    pub fn spawn(mut self, mut events: mpsc::UnboundedReceiver<Event>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let line = self.render(&event);
                if event.event_type.is_milestone() {
                    tracing::info!("{}", line);
                } else {
                    tracing::debug!("{}", line);
                }
            }
        })
    }

    /// Format one event, updating the running count of started services.
    pub fn render(&mut self, event: &Event) -> String {
        if event.event_type == EventType::ServiceUp {
            self.up_count += 1;
        }
        let payload = event
            .data
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");

        if event.service_name.is_empty() {
            format!("Project [{}]: {} {}", self.project, event.event_type, payload)
        } else {
            format!(
                "[{}/{}] [{}]: {} {}",
                self.up_count, self.service_count, event.service_name, event.event_type, payload
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bus_delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.notify(EventType::ContainerCreated, "web", data("name", "app_web_1"));

        let ea = a.recv().await.unwrap();
        let eb = b.recv().await.unwrap();
        assert_eq!(ea, eb);
        assert_eq!(ea.event_type, EventType::ContainerCreated);
        assert_eq!(ea.data.get("name").unwrap(), "app_web_1");
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let bus = EventBus::new();
        drop(bus.subscribe());
        bus.notify(EventType::ProjectUpStart, "", BTreeMap::new());
        assert!(bus.subscribers.lock().is_empty());
    }

    #[test]
    fn listener_counts_started_services() {
        let mut listener = DefaultListener::new("app", 2);
        let up = Event {
            event_type: EventType::ServiceUp,
            service_name: "web".to_string(),
            data: BTreeMap::new(),
        };
        assert_eq!(listener.render(&up), "[1/2] [web]: Started ");

        let project = Event {
            event_type: EventType::ProjectUpDone,
            service_name: String::new(),
            data: data("services", "2"),
        };
        assert_eq!(listener.render(&project), "Project [app]: Project started services=2");
    }
}
