use super::{ServiceConfig, ServiceConfigs};
use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};

/// Keys a service declaration may carry.
pub const KNOWN_KEYS: &[&str] = &[
    "build",
    "cap_add",
    "cap_drop",
    "command",
    "container_name",
    "cpu_shares",
    "dns",
    "dns_search",
    "dockerfile",
    "domainname",
    "entrypoint",
    "env_file",
    "environment",
    "expose",
    "extends",
    "external_links",
    "extra_hosts",
    "hostname",
    "image",
    "ipc",
    "labels",
    "links",
    "mem_limit",
    "net",
    "network_mode",
    "pid",
    "ports",
    "privileged",
    "read_only",
    "restart",
    "scale",
    "size",
    "stdin_open",
    "tty",
    "user",
    "volumes",
    "volumes_from",
    "working_dir",
];

/// Shape check of a raw declaration file, before any merging.
pub fn validate_raw(services: &Mapping, file: &str) -> Result<()> {
    for (name, service) in services {
        let Some(name) = name.as_str() else {
            return Err(Error::Validation(format!(
                "{}: service names must be strings, found {:?}",
                file, name
            )));
        };
        let Value::Mapping(fields) = service else {
            return Err(Error::Validation(format!(
                "{}: service '{}' must be a mapping",
                file, name
            )));
        };

        for key in fields.keys() {
            let key = key.as_str().unwrap_or_default();
            if !KNOWN_KEYS.contains(&key) {
                return Err(Error::Validation(format!(
                    "{}: service '{}' has unsupported option '{}'",
                    file, name, key
                )));
            }
        }

        if let Some(extends) = fields.get("extends") {
            validate_extends(extends).map_err(|reason| {
                Error::Validation(format!(
                    "{}: service '{}' has an invalid 'extends': {}",
                    file, name, reason
                ))
            })?;
        }
    }
    Ok(())
}

fn validate_extends(extends: &Value) -> std::result::Result<(), &'static str> {
    match extends {
        Value::String(_) => Ok(()),
        Value::Mapping(map) => {
            for key in map.keys() {
                if !matches!(key.as_str(), Some("service" | "file")) {
                    return Err("only 'service' and 'file' are allowed");
                }
            }
            match map.get("service") {
                Some(Value::String(_)) => {}
                _ => return Err("'service' is required and must be a string"),
            }
            match map.get("file") {
                None | Some(Value::String(_)) => Ok(()),
                _ => Err("'file' must be a string"),
            }
        }
        _ => Err("expected a service name or a mapping"),
    }
}

impl ServiceConfig {
    /// Structural constraints of one resolved service.
    pub fn validate(&self, name: &str) -> Result<()> {
        match (&self.image, &self.build) {
            (None, None) => {
                return Err(Error::Validation(format!(
                    "Service '{}' has neither an image nor a build path specified. Exactly one must be provided.",
                    name
                )))
            }
            (Some(_), Some(_)) => {
                return Err(Error::Validation(format!(
                    "Service '{}' has both an image and build path specified. A service can either be built to image or use an existing image, not both.",
                    name
                )))
            }
            _ => {}
        }

        if self.container_name.is_some() && self.scale.is_some_and(|s| s > 1) {
            return Err(Error::Validation(format!(
                "Service '{}' declares container_name and scale > 1. A custom container name must be unique, so the service cannot be scaled.",
                name
            )));
        }

        if let Some(memory) = &self.mem_limit {
            validate_memory_string(memory).map_err(|e| {
                Error::Validation(format!("Service '{}': invalid mem_limit: {}", name, e))
            })?;
        }

        Ok(())
    }
}

/// Every `links`, `volumes_from`, `ipc` and `network_mode` reference to another
/// service must name a service of the project.
pub fn validate_references(configs: &ServiceConfigs) -> Result<()> {
    for (name, config) in configs.iter() {
        let links = config
            .links
            .iter()
            .map(|l| l.split(':').next().unwrap_or(l));
        let volumes_from = config
            .volumes_from
            .iter()
            .filter_map(|v| {
                // `container:<name>` points outside the project
                if v.starts_with("container:") {
                    return None;
                }
                let v = v.strip_prefix("service:").unwrap_or(v);
                v.split(':').next()
            });
        let namespaces = [&config.ipc, &config.network_mode]
            .into_iter()
            .flatten()
            .filter_map(|mode| mode.strip_prefix("service:"));

        for target in links.chain(volumes_from).chain(namespaces) {
            if !configs.has(target) {
                return Err(Error::Validation(format!(
                    "Service '{}' references undefined service '{}'",
                    name, target
                )));
            }
        }
    }
    Ok(())
}

/// Validate memory string format (e.g., "512m", "2g", "1024mb")
fn validate_memory_string(memory: &str) -> std::result::Result<(), String> {
    // Must start with a digit
    if !memory.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err("memory string must start with a number".to_string());
    }

    // Find where the suffix starts (first non-digit, non-dot character)
    let suffix_start = memory
        .chars()
        .position(|c| !c.is_ascii_digit() && c != '.')
        .unwrap_or(memory.len());

    let num_part = &memory[..suffix_start];
    let suffix = &memory[suffix_start..];

    let value: f64 = num_part
        .parse()
        .map_err(|_| format!("invalid numeric value '{}'", num_part))?;
    if value <= 0.0 {
        return Err("memory value must be positive".to_string());
    }

    match suffix.to_lowercase().as_str() {
        "" | "b" | "k" | "kb" | "m" | "mb" | "g" | "gb" => Ok(()),
        _ => Err(format!(
            "invalid memory suffix '{}' (valid: b, k, kb, m, mb, g, gb)",
            suffix
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn image(image: &str) -> ServiceConfig {
        ServiceConfig {
            image: Some(image.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_raw_accepts_known_keys() {
        let services = raw("web:\n  image: nginx\n  extends: base\nbase:\n  image: x\n");
        assert!(validate_raw(&services, "docker-compose.yml").is_ok());
    }

    #[test]
    fn test_validate_raw_rejects_unknown_key() {
        let services = raw("web:\n  image: nginx\n  healthcheck: {}\n");
        let err = validate_raw(&services, "docker-compose.yml").unwrap_err();
        assert!(err.to_string().contains("unsupported option 'healthcheck'"));
    }

    #[test]
    fn test_validate_raw_rejects_non_mapping_service() {
        let services = raw("web: nginx\n");
        let err = validate_raw(&services, "docker-compose.yml").unwrap_err();
        assert!(err.to_string().contains("must be a mapping"));
    }

    #[test]
    fn test_validate_raw_checks_extends_shape() {
        let services = raw("web:\n  extends:\n    file: other.yml\n");
        assert!(validate_raw(&services, "f.yml").is_err());

        let services = raw("web:\n  extends:\n    service: base\n    other: x\n");
        assert!(validate_raw(&services, "f.yml").is_err());

        let services = raw("web:\n  extends: [base]\n");
        assert!(validate_raw(&services, "f.yml").is_err());
    }

    #[test]
    fn test_validate_image_or_build_required() {
        let err = ServiceConfig::default().validate("web").unwrap_err();
        assert!(err.to_string().contains("neither an image nor a build"));

        let both = ServiceConfig {
            build: Some(".".to_string()),
            ..image("nginx")
        };
        assert!(both.validate("web").is_err());
        assert!(image("nginx").validate("web").is_ok());
    }

    #[test]
    fn test_validate_container_name_with_scale() {
        let config = ServiceConfig {
            container_name: Some("the-web".to_string()),
            scale: Some(2),
            ..image("nginx")
        };
        let err = config.validate("web").unwrap_err();
        assert!(err.to_string().contains("'web'"));

        let single = ServiceConfig {
            scale: Some(1),
            ..config
        };
        assert!(single.validate("web").is_ok());
    }

    #[test]
    fn test_validate_memory_string() {
        assert!(validate_memory_string("512m").is_ok());
        assert!(validate_memory_string("1.5g").is_ok());
        assert!(validate_memory_string("m512").is_err());
        assert!(validate_memory_string("12x").is_err());
        assert!(validate_memory_string("0").is_err());
    }

    #[test]
    fn test_validate_references() {
        let mut configs = ServiceConfigs::new();
        configs.add("db", image("postgres"));
        configs.add(
            "web",
            ServiceConfig {
                links: vec!["db:database".to_string()],
                volumes_from: vec!["container:external".to_string()],
                ipc: Some("host".to_string()),
                ..image("nginx")
            },
        );
        assert!(validate_references(&configs).is_ok());

        configs.add(
            "worker",
            ServiceConfig {
                network_mode: Some("service:cache".to_string()),
                ..image("worker")
            },
        );
        let err = validate_references(&configs).unwrap_err();
        assert!(err.to_string().contains("'cache'"));
    }
}
