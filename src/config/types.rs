//! Typed service configuration.
//!
//! [`ServiceConfig`] is what the merge pipeline produces and what the engine
//! consumes. Fields accept the loose shapes found in declaration files
//! (`command` as string or list, `environment` as map or `KEY=VALUE` list...)
//! and are normalized on deserialization.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Effective configuration of one service.
///
/// Serialization skips empty fields, so adding a field never changes the
/// config hash of services that do not use it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub image: Option<String>,

    /// Build context. Builds are not performed; see `Service::build`.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub build: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub dockerfile: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::command")]
    pub command: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::command")]
    pub entrypoint: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "de::string_map")]
    pub environment: BTreeMap<String, String>,

    /// Consumed by the merge pipeline, which folds the files into `environment`.
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub env_file: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty", deserialize_with = "de::string_map")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub ports: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub expose: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub volumes: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub volumes_from: Vec<String>,

    /// `service` or `service:alias`.
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub links: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub external_links: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub container_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub domainname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub working_dir: Option<String>,

    /// `bridge`, `host`, `none`, `container:<name>` or `service:<name>`.
    #[serde(default, alias = "net", skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub network_mode: Option<String>,

    /// `host` or `service:<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub ipc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub pid: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub privileged: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub restart: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub dns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub dns_search: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub cap_add: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::string_list")]
    pub cap_drop: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "de::host_list")]
    pub extra_hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub mem_limit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub tty: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub stdin_open: bool,

    /// Size class label value.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de::opt_string")]
    pub size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,
}

fn is_false(b: &bool) -> bool {
    !b
}

impl ServiceConfig {
    /// Host-side port of each published port declaration, if fixed.
    pub fn fixed_host_ports(&self) -> Vec<&str> {
        self.ports
            .iter()
            .filter_map(|p| {
                let spec = p.split('/').next().unwrap_or(p);
                let parts: Vec<&str> = spec.split(':').collect();
                match parts.as_slice() {
                    [_container] => None,
                    [host, _container] | [_, host, _container] if !host.is_empty() => Some(*host),
                    _ => None,
                }
            })
            .collect()
    }
}

/// Service name → configuration, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfigs {
    order: Vec<String>,
    configs: HashMap<String, Arc<ServiceConfig>>,
}

impl ServiceConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Replacing keeps the original position.
    pub fn add(&mut self, name: impl Into<String>, config: ServiceConfig) {
        let name = name.into();
        if !self.configs.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.configs.insert(name, Arc::new(config));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServiceConfig>> {
        self.configs.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.configs.contains_key(name)
    }

    pub fn keys(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<ServiceConfig>)> {
        self.order
            .iter()
            .filter_map(|name| self.configs.get(name).map(|c| (name.as_str(), c)))
    }
}

/// Split a command string into words, honouring single and double quotes.
pub fn split_command(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                in_word = true;
            }
            (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                    in_word = true;
                }
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Lenient field deserializers.
mod de {
    use super::split_command;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer};
    use serde_yaml::Value;
    use std::collections::BTreeMap;

    pub(super) fn scalar(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null => Some(String::new()),
            _ => None,
        }
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            other => scalar(&other)
                .map(Some)
                .ok_or_else(|| D::Error::custom("expected a string")),
        }
    }

    pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(Vec::new()),
            Value::Sequence(items) => items
                .iter()
                .map(|v| scalar(v).ok_or_else(|| D::Error::custom("expected a list of strings")))
                .collect(),
            other => scalar(&other)
                .map(|s| vec![s])
                .ok_or_else(|| D::Error::custom("expected a string or a list of strings")),
        }
    }

    pub fn command<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(Vec::new()),
            Value::String(s) => Ok(split_command(&s)),
            Value::Sequence(items) => items
                .iter()
                .map(|v| scalar(v).ok_or_else(|| D::Error::custom("expected a list of strings")))
                .collect(),
            _ => Err(D::Error::custom("expected a command string or list")),
        }
    }

    /// Map form, or a list of `KEY=VALUE` entries.
    pub fn string_map<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<String, String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(BTreeMap::new()),
            Value::Mapping(map) => map
                .iter()
                .map(|(k, v)| match (scalar(k), scalar(v)) {
                    (Some(k), Some(v)) => Ok((k, v)),
                    _ => Err(D::Error::custom("expected string keys and values")),
                })
                .collect(),
            Value::Sequence(items) => items
                .iter()
                .map(|item| {
                    let entry = scalar(item)
                        .ok_or_else(|| D::Error::custom("expected KEY=VALUE entries"))?;
                    Ok(match entry.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (entry, String::new()),
                    })
                })
                .collect(),
            _ => Err(D::Error::custom("expected a mapping or a list of KEY=VALUE")),
        }
    }

    /// `extra_hosts` as a list of `host:ip` or a `host: ip` mapping.
    pub fn host_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        match Value::deserialize(d)? {
            Value::Mapping(map) => map
                .iter()
                .map(|(k, v)| match (scalar(k), scalar(v)) {
                    (Some(k), Some(v)) => Ok(format!("{}:{}", k, v)),
                    _ => Err(D::Error::custom("expected host: ip entries")),
                })
                .collect(),
            Value::Null => Ok(Vec::new()),
            Value::Sequence(items) => items
                .iter()
                .map(|v| scalar(v).ok_or_else(|| D::Error::custom("expected host:ip entries")))
                .collect(),
            other => scalar(&other)
                .map(|s| vec![s])
                .ok_or_else(|| D::Error::custom("expected host:ip entries")),
        }
    }
}
