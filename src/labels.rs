//! Label keys written on every container the engine creates.
//!
//! Labels are the only orchestration state that survives between calls; the
//! key strings are a compatibility contract and must not change.

use crate::error::{Error, Result};
use crate::runtime::{ContainerDetails, ListFilter};

/// Schema version written into [`Label::Version`].
pub const COMPOSE_VERSION: &str = "1.5.0";

/// Label holding the container size class.
pub const SIZE_LABEL: &str = "sh_hyper_instancetype";

/// Size class used when a service does not declare one.
pub const DEFAULT_SIZE: &str = "s4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Project,
    Service,
    Number,
    Hash,
    OneOff,
    Version,
}

impl Label {
    pub const fn as_str(self) -> &'static str {
        match self {
            Label::Project => "com.docker.compose.project",
            Label::Service => "com.docker.compose.service",
            Label::Number => "com.docker.compose.container-number",
            Label::Hash => "com.docker.compose.config-hash",
            Label::OneOff => "com.docker.compose.oneoff",
            Label::Version => "com.docker.compose.version",
        }
    }

    /// Value of this label on `details`, if present.
    pub fn get(self, details: &ContainerDetails) -> Option<&str> {
        details.labels.get(self.as_str()).map(String::as_str)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `"True"` / `"False"`, as stored in the one-off label.
pub fn one_off_value(one_off: bool) -> &'static str {
    if one_off {
        "True"
    } else {
        "False"
    }
}

/// Filter selecting the containers of one service, scaled or one-off.
pub fn service_filter(project: &str, service: &str, one_off: bool) -> ListFilter {
    ListFilter::new()
        .label(Label::Project.as_str(), project)
        .label(Label::Service.as_str(), service)
        .label(Label::OneOff.as_str(), one_off_value(one_off))
}

/// Filter selecting every container of a project.
pub fn project_filter(project: &str) -> ListFilter {
    ListFilter::new().label(Label::Project.as_str(), project)
}

/// Parse the container-number label; missing or non-numeric is an inconsistency.
pub fn container_number(details: &ContainerDetails) -> Result<u32> {
    let raw = Label::Number.get(details);
    raw.and_then(|v| v.parse::<u32>().ok())
        .ok_or_else(|| Error::InvalidLabel {
            container: details.name.clone(),
            label: Label::Number.as_str().to_string(),
            value: raw.map(str::to_string),
        })
}
