//! Translation of a [`ServiceConfig`] into a runtime create request.
//!
//! Only the parts that follow from the configuration alone are filled in
//! here. Names, labels, links and namespace joins depend on live runtime
//! state and are added by the container.

use crate::config::{ServiceConfig, ServiceConfigs};
use crate::project::relationship::{namespace_service, volumes_from_service};
use crate::runtime::{ContainerCreate, HostConfig};

/// `dest` is an anonymous volume; anything with a source is a bind.
fn is_bind(volume: &str) -> bool {
    volume.contains(':')
}

/// Destination of a volume or bind spec.
pub fn volume_destination(volume: &str) -> &str {
    let mut parts = volume.split(':');
    match (parts.next(), parts.next()) {
        (Some(_), Some(destination)) => destination,
        (Some(destination), None) => destination,
        _ => volume,
    }
}

pub fn container_create(
    config: &ServiceConfig,
    project: &str,
    configs: &ServiceConfigs,
) -> ContainerCreate {
    let (binds, volumes): (Vec<String>, Vec<String>) =
        config.volumes.iter().cloned().partition(|v| is_bind(v));

    let host = HostConfig {
        binds,
        links: Vec::new(),
        port_bindings: config.ports.clone(),
        volumes_from: config
            .volumes_from
            .iter()
            .map(|entry| resolve_volumes_from(entry, project, configs))
            .collect(),
        network_mode: runtime_mode(config.network_mode.as_deref(), configs),
        ipc_mode: runtime_mode(config.ipc.as_deref(), configs),
        pid_mode: config.pid.clone(),
        privileged: config.privileged,
        read_only: config.read_only,
        restart_policy: config.restart.clone(),
        dns: config.dns.clone(),
        dns_search: config.dns_search.clone(),
        cap_add: config.cap_add.clone(),
        cap_drop: config.cap_drop.clone(),
        extra_hosts: config.extra_hosts.clone(),
        memory: config.mem_limit.clone(),
        cpu_shares: config.cpu_shares,
    };

    ContainerCreate {
        name: String::new(),
        image: String::new(),
        command: config.command.clone(),
        entrypoint: config.entrypoint.clone(),
        env: config
            .environment
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect(),
        labels: config.labels.clone(),
        volumes,
        expose: config.expose.clone(),
        hostname: config.hostname.clone(),
        domainname: config.domainname.clone(),
        user: config.user.clone(),
        working_dir: config.working_dir.clone(),
        tty: config.tty,
        stdin_open: config.stdin_open,
        host,
    }
}

/// Namespace modes pointing at a service are resolved later, against the
/// target's running container.
fn runtime_mode(mode: Option<&str>, configs: &ServiceConfigs) -> Option<String> {
    let mode = mode?;
    match namespace_service(mode, configs) {
        Some(_) => None,
        None => Some(mode.to_string()),
    }
}

/// A service in `volumes_from` stands for its first container.
fn resolve_volumes_from(entry: &str, project: &str, configs: &ServiceConfigs) -> String {
    let Some(service) = volumes_from_service(entry, configs) else {
        return entry
            .strip_prefix("container:")
            .unwrap_or(entry)
            .to_string();
    };
    let container = configs
        .get(service)
        .and_then(|config| config.container_name.clone())
        .unwrap_or_else(|| format!("{}_{}_1", project, service));

    let entry = entry.strip_prefix("service:").unwrap_or(entry);
    match entry.split_once(':') {
        Some((_, mode)) => format!("{}:{}", container, mode),
        None => container,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs() -> ServiceConfigs {
        let mut configs = ServiceConfigs::new();
        configs.add(
            "data",
            ServiceConfig {
                image: Some("busybox".to_string()),
                ..Default::default()
            },
        );
        configs.add(
            "named",
            ServiceConfig {
                image: Some("busybox".to_string()),
                container_name: Some("the-store".to_string()),
                ..Default::default()
            },
        );
        configs.add(
            "vpn",
            ServiceConfig {
                image: Some("vpn".to_string()),
                ..Default::default()
            },
        );
        configs
    }

    #[test]
    fn volumes_split_into_binds_and_anonymous() {
        let config = ServiceConfig {
            volumes: vec![
                "/var/lib/postgresql/data".to_string(),
                "./conf:/etc/app:ro".to_string(),
            ],
            ..Default::default()
        };
        let request = container_create(&config, "app", &configs());
        assert_eq!(request.volumes, vec!["/var/lib/postgresql/data"]);
        assert_eq!(request.host.binds, vec!["./conf:/etc/app:ro"]);
    }

    #[test]
    fn volume_destinations() {
        assert_eq!(volume_destination("/data"), "/data");
        assert_eq!(volume_destination("/host:/data"), "/data");
        assert_eq!(volume_destination("/host:/data:ro"), "/data");
    }

    #[test]
    fn volumes_from_services_resolve_to_first_container() {
        let config = ServiceConfig {
            volumes_from: vec![
                "data".to_string(),
                "named:ro".to_string(),
                "container:legacy".to_string(),
            ],
            ..Default::default()
        };
        let request = container_create(&config, "app", &configs());
        assert_eq!(
            request.host.volumes_from,
            vec!["app_data_1", "the-store:ro", "legacy"]
        );
    }

    #[test]
    fn service_namespaces_are_left_for_later() {
        let config = ServiceConfig {
            network_mode: Some("service:vpn".to_string()),
            ipc: Some("host".to_string()),
            pid: Some("host".to_string()),
            ..Default::default()
        };
        let request = container_create(&config, "app", &configs());
        assert_eq!(request.host.network_mode, None);
        assert_eq!(request.host.ipc_mode.as_deref(), Some("host"));
        assert_eq!(request.host.pid_mode.as_deref(), Some("host"));
    }

    #[test]
    fn environment_becomes_key_value_pairs() {
        let mut config = ServiceConfig::default();
        config
            .environment
            .insert("MODE".to_string(), "prod".to_string());
        config.environment.insert("EMPTY".to_string(), String::new());
        let request = container_create(&config, "app", &configs());
        assert_eq!(request.env, vec!["EMPTY=", "MODE=prod"]);
    }
}
