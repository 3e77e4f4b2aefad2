//! Lookups the merge pipeline delegates to its caller.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Source of values for `${VAR}` interpolation and bare environment keys.
pub trait EnvironmentLookup: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Reads the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEnvLookup;

impl EnvironmentLookup for OsEnvLookup {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Fixed set of variables, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnvLookup {
    vars: BTreeMap<String, String>,
}

impl MapEnvLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnvLookup {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl EnvironmentLookup for MapEnvLookup {
    fn lookup(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Loads files referenced from a declaration file (`extends.file`, `env_file`).
pub trait ResourceLookup: Send + Sync {
    /// Read `file`, interpreted relative to the file `relative_to`. Returns the
    /// content and the resolved path, which becomes the `relative_to` of
    /// references inside the loaded file.
    fn lookup(&self, file: &str, relative_to: &str) -> Result<(Vec<u8>, String)>;
}

/// Resolves references against the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileResourceLookup;

impl FileResourceLookup {
    pub fn resolve(file: &str, relative_to: &str) -> PathBuf {
        let path = Path::new(file);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let base = Path::new(relative_to)
            .parent()
            .unwrap_or_else(|| Path::new(""));
        base.join(path)
    }
}

impl ResourceLookup for FileResourceLookup {
    fn lookup(&self, file: &str, relative_to: &str) -> Result<(Vec<u8>, String)> {
        let resolved = Self::resolve(file, relative_to);
        let content = std::fs::read(&resolved).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", resolved.display(), e))
        })?;
        Ok((content, resolved.to_string_lossy().into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn relative_references_resolve_next_to_the_referencing_file() {
        assert_eq!(
            FileResourceLookup::resolve("common.yml", "/srv/app/docker-compose.yml"),
            PathBuf::from("/srv/app/common.yml")
        );
        assert_eq!(
            FileResourceLookup::resolve("/etc/base.yml", "/srv/app/docker-compose.yml"),
            PathBuf::from("/etc/base.yml")
        );
        assert_eq!(
            FileResourceLookup::resolve("common.yml", "docker-compose.yml"),
            PathBuf::from("common.yml")
        );
    }

    #[test]
    fn file_lookup_reads_content() {
        let dir = TempDir::new().unwrap();
        let main = dir.path().join("docker-compose.yml");
        std::fs::write(dir.path().join("app.env"), "A=1\n").unwrap();

        let (content, resolved) = FileResourceLookup
            .lookup("app.env", main.to_str().unwrap())
            .unwrap();
        assert_eq!(content, b"A=1\n");
        assert!(resolved.ends_with("app.env"));

        assert!(FileResourceLookup
            .lookup("missing.env", main.to_str().unwrap())
            .is_err());
    }

    #[test]
    fn map_lookup() {
        let env: MapEnvLookup = [("A", "1")].into_iter().collect();
        assert_eq!(env.lookup("A").as_deref(), Some("1"));
        assert_eq!(env.lookup("B"), None);
    }
}
