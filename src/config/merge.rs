//! Layered declaration merging and `extends` resolution.
//!
//! Each declaration file is parsed into a raw, order-preserving mapping,
//! interpolated, shape-checked, and then resolved service by service:
//!
//! 1. `env_file` contents are folded into `environment`.
//! 2. `extends` is resolved depth-first, base first, against the same file or
//!    a file loaded through the [`ResourceLookup`].
//! 3. The base is merged under the service's own fields.
//! 4. A config for the same service from an earlier file is merged under the
//!    result, so later files win.
//!
//! Scalars and lists are replaced wholesale; mappings merge key-wise.

use super::{
    env_file::parse_env_file, interpolate::interpolate_services, validation::validate_raw,
    EnvironmentLookup, ResourceLookup, ServiceConfig, ServiceConfigs,
};
use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};

/// Fields a base service may not carry.
pub const NON_EXTENDABLE: &[&str] = &["links", "volumes_from"];

/// Merge one declaration file over the services resolved from earlier files.
///
/// Returns the services declared in `bytes`, in declaration order.
pub fn merge_services(
    existing: &ServiceConfigs,
    env: &dyn EnvironmentLookup,
    resources: Option<&dyn ResourceLookup>,
    file: &str,
    bytes: &[u8],
) -> Result<Vec<(String, ServiceConfig)>> {
    let services = load_raw(env, file, bytes)?;
    let merger = Merger { env, resources };

    let mut resolved = Vec::with_capacity(services.len());
    for (name, data) in &services {
        let name = name.as_str().unwrap_or_default();
        let mut stack = Vec::new();
        let mut data = merger
            .resolve(file, name, data, &services, &mut stack)
            .inspect_err(|e| tracing::error!("Failed to parse service {}: {}", name, e))?;

        if let Some(previous) = existing.get(name) {
            let previous = match serde_yaml::to_value(previous.as_ref())? {
                Value::Mapping(map) => map,
                _ => Mapping::new(),
            };
            data = merge_config(previous, &data);
        }
        resolved.push((name.to_string(), data));
    }

    let mut configs = Vec::with_capacity(resolved.len());
    for (name, data) in resolved {
        let config: ServiceConfig = serde_yaml::from_value(Value::Mapping(data))
            .map_err(|e| Error::Parse(format!("{}: service '{}': {}", file, name, e)))?;
        config.validate(&name)?;
        configs.push((name, config));
    }
    Ok(configs)
}

/// Parse, interpolate and shape-check one file.
fn load_raw(env: &dyn EnvironmentLookup, file: &str, bytes: &[u8]) -> Result<Mapping> {
    let value: Value = serde_yaml::from_slice(bytes)
        .map_err(|e| Error::Parse(format!("Failed to parse {}: {}", file, e)))?;
    let mut services = match value {
        Value::Mapping(map) => map,
        Value::Null => Mapping::new(),
        _ => {
            return Err(Error::Validation(format!(
                "{}: top level must be a mapping of services",
                file
            )))
        }
    };
    interpolate_services(&mut services, env)?;
    validate_raw(&services, file)?;
    Ok(services)
}

struct Merger<'a> {
    env: &'a dyn EnvironmentLookup,
    resources: Option<&'a dyn ResourceLookup>,
}

impl Merger<'_> {
    /// Resolve one raw service of `file`. `stack` holds the `file#service`
    /// chain currently being resolved.
    fn resolve(
        &self,
        file: &str,
        name: &str,
        data: &Value,
        siblings: &Mapping,
        stack: &mut Vec<String>,
    ) -> Result<Mapping> {
        let key = format!("{}#{}", file, name);
        if stack.contains(&key) {
            let mut chain: Vec<String> = stack
                .iter()
                .map(|k| k.rsplit('#').next().unwrap_or(k).to_string())
                .collect();
            chain.push(name.to_string());
            return Err(Error::CircularExtends(chain));
        }

        let mut data = match data {
            Value::Mapping(map) => normalize(map.clone(), self.env),
            _ => Mapping::new(),
        };
        self.read_env_files(file, &mut data)?;

        let Some(extends) = data.remove("extends") else {
            return Ok(data);
        };
        let (base_file, base_name) = extends_target(&extends);
        let Some(base_name) = base_name else {
            return Ok(data);
        };

        stack.push(key);
        let base = match base_file.as_deref() {
            None => {
                let base_data = siblings.get(base_name.as_str()).ok_or_else(|| {
                    Error::ExtendsNotFound {
                        service: base_name.clone(),
                        file: None,
                    }
                })?;
                self.resolve(file, &base_name, base_data, siblings, stack)?
            }
            Some(other) => {
                let resources = self.resources.ok_or_else(|| Error::MissingResourceLookup {
                    directive: "extends".to_string(),
                    file: file.to_string(),
                })?;
                let (bytes, resolved) = resources
                    .lookup(other, file)
                    .inspect_err(|e| tracing::error!("Failed to lookup file {}: {}", other, e))?;
                let base_services = load_raw(self.env, &resolved, &bytes)?;
                let base_data = base_services.get(base_name.as_str()).ok_or_else(|| {
                    Error::ExtendsNotFound {
                        service: base_name.clone(),
                        file: Some(other.to_string()),
                    }
                })?;
                self.resolve(&resolved, &base_name, base_data, &base_services, stack)?
            }
        };
        stack.pop();

        for field in NON_EXTENDABLE {
            if base.contains_key(*field) {
                return Err(Error::NonExtendable {
                    service: name.to_string(),
                    base: base_name,
                    file: base_file.unwrap_or_else(|| file.to_string()),
                    field: field.to_string(),
                });
            }
        }

        tracing::debug!("Merging {} over its base {}", name, base_name);
        Ok(merge_config(base, &data))
    }

    /// Fold `env_file` entries into `environment`. Explicit entries win, and
    /// later files win over earlier ones.
    fn read_env_files(&self, file: &str, data: &mut Mapping) -> Result<()> {
        let Some(env_files) = data.remove("env_file") else {
            return Ok(());
        };
        let env_files: Vec<String> = match env_files {
            Value::String(s) => vec![s],
            Value::Sequence(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        if env_files.is_empty() {
            return Ok(());
        }

        let resources = self.resources.ok_or_else(|| Error::MissingResourceLookup {
            directive: "env_file".to_string(),
            file: file.to_string(),
        })?;

        let mut environment = match data.remove("environment") {
            Some(Value::Mapping(map)) => map,
            _ => Mapping::new(),
        };
        for env_file in env_files.iter().rev() {
            let (content, resolved) = resources.lookup(env_file, file)?;
            for (key, value) in parse_env_file(&content, &resolved)? {
                if !environment.contains_key(key.as_str()) {
                    environment.insert(Value::String(key), Value::String(value));
                }
            }
        }
        data.insert(Value::from("environment"), Value::Mapping(environment));
        Ok(())
    }
}

/// `extends` target as (file, service).
fn extends_target(extends: &Value) -> (Option<String>, Option<String>) {
    match extends {
        Value::String(service) => (None, Some(service.clone())),
        Value::Mapping(map) => (
            map.get("file").and_then(Value::as_str).map(str::to_string),
            map.get("service")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        ),
        _ => (None, None),
    }
}

/// Bring key-value fields into a single shape before merging.
///
/// `net` becomes `network_mode`; `environment` and `labels` become mappings.
/// Environment entries without a value take it from `env`, and are dropped
/// when the variable is unset.
fn normalize(mut data: Mapping, env: &dyn EnvironmentLookup) -> Mapping {
    if let Some(net) = data.remove("net") {
        if !data.contains_key("network_mode") {
            data.insert(Value::from("network_mode"), net);
        }
    }
    if let Some(environment) = data.remove("environment") {
        let mut map = to_mapping(environment);
        let unresolved: Vec<Value> = map
            .iter()
            .filter(|(_, v)| v.is_null())
            .map(|(k, _)| k.clone())
            .collect();
        for key in unresolved {
            match key.as_str().and_then(|k| env.lookup(k)) {
                Some(value) => {
                    map.insert(key, Value::String(value));
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        data.insert(Value::from("environment"), Value::Mapping(map));
    }
    if let Some(labels) = data.remove("labels") {
        let map = to_mapping(labels);
        data.insert(Value::from("labels"), Value::Mapping(map));
    }
    data
}

/// `KEY=VALUE` lists become mappings; a bare `KEY` maps to null.
fn to_mapping(value: Value) -> Mapping {
    match value {
        Value::Mapping(map) => map,
        Value::Sequence(items) => items
            .into_iter()
            .filter_map(|item| {
                let entry = item.as_str()?.to_string();
                Some(match entry.split_once('=') {
                    Some((k, v)) => (Value::from(k), Value::from(v)),
                    None => (Value::from(entry), Value::Null),
                })
            })
            .collect(),
        _ => Mapping::new(),
    }
}

/// Merge `data` over `base`.
pub fn merge_config(mut base: Mapping, data: &Mapping) -> Mapping {
    for (key, value) in data {
        // image and build are mutually exclusive
        match key.as_str() {
            Some("image") => {
                base.remove("build");
                base.remove("dockerfile");
            }
            Some("build") => {
                base.remove("image");
            }
            _ => {}
        }
        let merged = match base.remove(key) {
            Some(existing) => merge_value(existing, value),
            None => value.clone(),
        };
        base.insert(key.clone(), merged);
    }
    base
}

fn merge_value(existing: Value, value: &Value) -> Value {
    match (existing, value) {
        (Value::Mapping(mut left), Value::Mapping(right)) => {
            for (k, v) in right {
                let merged = match left.remove(k) {
                    Some(old) => merge_value(old, v),
                    None => v.clone(),
                };
                left.insert(k.clone(), merged);
            }
            Value::Mapping(left)
        }
        (_, value) => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnvLookup;
    use std::collections::BTreeMap;

    /// Serves files from memory.
    struct Files(BTreeMap<String, String>);

    impl ResourceLookup for Files {
        fn lookup(&self, file: &str, _relative_to: &str) -> Result<(Vec<u8>, String)> {
            self.0
                .get(file)
                .map(|c| (c.as_bytes().to_vec(), file.to_string()))
                .ok_or_else(|| Error::Config(format!("no such file {}", file)))
        }
    }

    fn files(entries: &[(&str, &str)]) -> Files {
        Files(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn merge(yaml: &str) -> Result<Vec<(String, ServiceConfig)>> {
        merge_services(
            &ServiceConfigs::new(),
            &MapEnvLookup::new(),
            None,
            "docker-compose.yml",
            yaml.as_bytes(),
        )
    }

    fn get<'a>(configs: &'a [(String, ServiceConfig)], name: &str) -> &'a ServiceConfig {
        &configs.iter().find(|(n, _)| n == name).unwrap().1
    }

    #[test]
    fn extends_uses_base_as_defaults() {
        let configs = merge(
            r#"
a:
  image: x
  command: a
b:
  extends:
    service: a
  command: b
"#,
        )
        .unwrap();
        let a = get(&configs, "a");
        let b = get(&configs, "b");
        assert_eq!(b.image.as_deref(), Some("x"));
        assert_eq!(b.command, vec!["b"]);

        let mut b = b.clone();
        b.command = vec!["changed".to_string()];
        assert_eq!(a.command, vec!["a"]);
    }

    #[test]
    fn declaration_order_is_preserved() {
        let configs = merge("zeta:\n  image: z\nalpha:\n  image: a\n").unwrap();
        let names: Vec<&str> = configs.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn string_extends_is_shorthand() {
        let configs = merge("base:\n  image: x\nweb:\n  extends: base\n").unwrap();
        assert_eq!(get(&configs, "web").image.as_deref(), Some("x"));
    }

    #[test]
    fn multi_level_extends_resolves_base_first() {
        let configs = merge(
            r#"
root:
  image: x
  environment:
    A: root
    B: root
middle:
  extends: root
  environment:
    B: middle
    C: middle
leaf:
  extends: middle
  environment:
    C: leaf
"#,
        )
        .unwrap();
        let env = &get(&configs, "leaf").environment;
        assert_eq!(env.get("A").unwrap(), "root");
        assert_eq!(env.get("B").unwrap(), "middle");
        assert_eq!(env.get("C").unwrap(), "leaf");
    }

    #[test]
    fn lists_are_replaced_not_appended() {
        let configs = merge(
            r#"
base:
  image: x
  ports: ["80"]
  dns: [1.1.1.1]
web:
  extends: base
  ports: ["8080:80"]
"#,
        )
        .unwrap();
        let web = get(&configs, "web");
        assert_eq!(web.ports, vec!["8080:80"]);
        assert_eq!(web.dns, vec!["1.1.1.1"]);
    }

    #[test]
    fn environment_list_and_map_forms_merge_key_wise() {
        let configs = merge(
            r#"
base:
  image: x
  environment:
    - A=1
    - B=2
web:
  extends: base
  environment:
    B: override
"#,
        )
        .unwrap();
        let env = &get(&configs, "web").environment;
        assert_eq!(env.get("A").unwrap(), "1");
        assert_eq!(env.get("B").unwrap(), "override");
    }

    #[test]
    fn image_and_build_replace_each_other() {
        let configs = merge(
            r#"
base:
  build: ./app
web:
  extends: base
  image: prebuilt/app
"#,
        )
        .unwrap();
        let web = get(&configs, "web");
        assert_eq!(web.image.as_deref(), Some("prebuilt/app"));
        assert!(web.build.is_none());
    }

    #[test]
    fn non_extendable_fields_are_rejected() {
        let err = merge(
            r#"
db:
  image: postgres
base:
  image: x
  links: [db]
web:
  extends: base
"#,
        )
        .unwrap_err();
        match err {
            Error::NonExtendable {
                service,
                base,
                file,
                field,
            } => {
                assert_eq!(service, "web");
                assert_eq!(base, "base");
                assert_eq!(file, "docker-compose.yml");
                assert_eq!(field, "links");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_base_is_an_error() {
        let err = merge("web:\n  image: x\n  extends: nothing\n").unwrap_err();
        assert!(matches!(err, Error::ExtendsNotFound { file: None, .. }));
    }

    #[test]
    fn extends_cycles_are_detected() {
        let err = merge("a:\n  image: x\n  extends: b\nb:\n  image: y\n  extends: a\n").unwrap_err();
        match err {
            Error::CircularExtends(chain) => assert_eq!(chain, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cross_file_extends_needs_a_resource_lookup() {
        let yaml = "web:\n  extends:\n    file: common.yml\n    service: base\n";
        let err = merge(yaml).unwrap_err();
        assert!(matches!(err, Error::MissingResourceLookup { .. }));

        let lookup = files(&[("common.yml", "base:\n  image: shared\n  user: app\n")]);
        let configs = merge_services(
            &ServiceConfigs::new(),
            &MapEnvLookup::new(),
            Some(&lookup),
            "docker-compose.yml",
            yaml.as_bytes(),
        )
        .unwrap();
        let web = get(&configs, "web");
        assert_eq!(web.image.as_deref(), Some("shared"));
        assert_eq!(web.user.as_deref(), Some("app"));
    }

    #[test]
    fn cross_file_missing_service_names_the_file() {
        let lookup = files(&[("common.yml", "other:\n  image: x\n")]);
        let err = merge_services(
            &ServiceConfigs::new(),
            &MapEnvLookup::new(),
            Some(&lookup),
            "docker-compose.yml",
            b"web:\n  extends:\n    file: common.yml\n    service: base\n",
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to find service 'base' to extend in file common.yml"
        );
    }

    #[test]
    fn env_files_fill_in_missing_environment() {
        let lookup = files(&[
            ("first.env", "A=first\nB=first\n"),
            ("second.env", "B=second\nC=second\n"),
        ]);
        let configs = merge_services(
            &ServiceConfigs::new(),
            &MapEnvLookup::new(),
            Some(&lookup),
            "docker-compose.yml",
            br#"
web:
  image: x
  env_file: [first.env, second.env]
  environment:
    C: explicit
"#,
        )
        .unwrap();
        let web = get(&configs, "web");
        assert_eq!(web.environment.get("A").unwrap(), "first");
        assert_eq!(web.environment.get("B").unwrap(), "second");
        assert_eq!(web.environment.get("C").unwrap(), "explicit");
        assert!(web.env_file.is_empty());
    }

    #[test]
    fn bare_environment_keys_come_from_the_lookup() {
        let env = MapEnvLookup::new().with("TOKEN", "abc");
        let configs = merge_services(
            &ServiceConfigs::new(),
            &env,
            None,
            "f.yml",
            b"web:\n  image: x\n  environment:\n    - TOKEN\n    - UNSET\n",
        )
        .unwrap();
        let web = get(&configs, "web");
        assert_eq!(web.environment.get("TOKEN").unwrap(), "abc");
        assert!(!web.environment.contains_key("UNSET"));
    }

    #[test]
    fn later_files_override_earlier_ones() {
        let first = merge("web:\n  image: x\n  command: a\n  environment:\n    A: '1'\n").unwrap();
        let mut existing = ServiceConfigs::new();
        for (name, config) in first {
            existing.add(name, config);
        }

        let second = merge_services(
            &existing,
            &MapEnvLookup::new(),
            None,
            "override.yml",
            b"web:\n  command: b\n  environment:\n    B: '2'\n",
        )
        .unwrap();
        let web = get(&second, "web");
        assert_eq!(web.image.as_deref(), Some("x"));
        assert_eq!(web.command, vec!["b"]);
        assert_eq!(web.environment.len(), 2);
    }

    #[test]
    fn constraints_are_checked_after_merging() {
        let err = merge("web:\n  image: x\n  container_name: web\n  scale: 3\n").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = merge("web:\n  command: run\n").unwrap_err();
        assert!(err.to_string().contains("neither an image nor a build"));
    }

    #[test]
    fn resolved_child_is_independent_of_its_base() {
        let mut configs =
            merge("a:\n  image: x\n  command: a\nb:\n  extends: a\n  command: b\n").unwrap();
        let (_, b) = configs.iter_mut().find(|(name, _)| name == "b").unwrap();
        assert_eq!(b.image.as_deref(), Some("x"));
        assert_eq!(b.command, vec!["b"]);
        b.image = Some("changed".to_string());

        let a = get(&configs, "a");
        assert_eq!(a.image.as_deref(), Some("x"));
        assert_eq!(a.command, vec!["a"]);
    }

    #[test]
    fn net_is_an_alias_of_network_mode() {
        let configs = merge("web:\n  image: x\n  net: host\n").unwrap();
        assert_eq!(get(&configs, "web").network_mode.as_deref(), Some("host"));
    }
}
