//! Relationships between the services of a project.

use crate::config::{ServiceConfig, ServiceConfigs};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// `links`: the target's containers are reachable under an alias.
    Link,
    /// `volumes_from`: the target's volumes are mounted.
    VolumesFrom,
    /// `ipc: service:<target>`: the target's IPC namespace is joined.
    IpcNamespace,
    /// `network_mode: service:<target>`: the target's network stack is joined.
    NetNamespace,
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipKind::Link => "link",
            RelationshipKind::VolumesFrom => "volumes_from",
            RelationshipKind::IpcNamespace => "ipc",
            RelationshipKind::NetNamespace => "network",
        };
        f.write_str(s)
    }
}

/// A dependency of one service on another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRelationship {
    pub target: String,
    /// Link alias; the target name when none is given.
    pub alias: String,
    pub kind: RelationshipKind,
}

impl ServiceRelationship {
    /// Build from a `name` or `name:alias` reference.
    pub fn new(name_alias: &str, kind: RelationshipKind) -> Self {
        let (target, alias) = match name_alias.split_once(':') {
            Some((target, alias)) => (target, alias),
            None => (name_alias, name_alias),
        };
        Self {
            target: target.to_string(),
            alias: alias.to_string(),
            kind,
        }
    }
}

/// Service named by an `ipc` or `network_mode` value, if any.
///
/// `service:<name>` always names a service; `container:<name>` does when
/// `<name>` is a service of the project and is left to the runtime otherwise.
pub fn namespace_service<'a>(mode: &'a str, configs: &ServiceConfigs) -> Option<&'a str> {
    if let Some(name) = mode.strip_prefix("service:") {
        return Some(name);
    }
    mode.strip_prefix("container:")
        .filter(|name| configs.has(name))
}

/// Service named by a `volumes_from` entry, if any.
pub fn volumes_from_service<'a>(entry: &'a str, configs: &ServiceConfigs) -> Option<&'a str> {
    if entry.starts_with("container:") {
        return None;
    }
    let entry = entry.strip_prefix("service:").unwrap_or(entry);
    // `name:ro` / `name:rw`
    let name = entry.split(':').next().unwrap_or(entry);
    configs.has(name).then_some(name)
}

/// Every service `config` depends on: links first, then `volumes_from`,
/// then the network and IPC namespaces.
pub fn dependent_services(
    config: &ServiceConfig,
    configs: &ServiceConfigs,
) -> Vec<ServiceRelationship> {
    let mut result: Vec<ServiceRelationship> = config
        .links
        .iter()
        .map(|link| ServiceRelationship::new(link, RelationshipKind::Link))
        .collect();

    for entry in &config.volumes_from {
        if let Some(target) = volumes_from_service(entry, configs) {
            result.push(ServiceRelationship::new(target, RelationshipKind::VolumesFrom));
        }
    }
    if let Some(target) = config
        .network_mode
        .as_deref()
        .and_then(|mode| namespace_service(mode, configs))
    {
        result.push(ServiceRelationship::new(target, RelationshipKind::NetNamespace));
    }
    if let Some(target) = config
        .ipc
        .as_deref()
        .and_then(|mode| namespace_service(mode, configs))
    {
        result.push(ServiceRelationship::new(target, RelationshipKind::IpcNamespace));
    }
    result
}
