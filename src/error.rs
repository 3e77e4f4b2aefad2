// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use crate::runtime::RuntimeError;
use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Runtime error: {0}")]
    #[diagnostic(
        code(stevedore::runtime::error),
        help("Check that the container runtime is running with `docker ps`")
    )]
    Runtime(#[from] RuntimeError),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(stevedore::config::validation),
        help("Run `stevedore config` to inspect the merged configuration")
    )]
    Validation(String),

    #[error("Variable interpolation failed: {0}")]
    #[diagnostic(
        code(stevedore::config::interpolation),
        help("Use `$$` to write a literal dollar sign")
    )]
    Interpolation(String),

    #[error("Failed to find service '{service}' to extend{}", .file.as_ref().map(|f| format!(" in file {}", f)).unwrap_or_default())]
    #[diagnostic(
        code(stevedore::config::extends),
        help("Check the `extends.service` (and `extends.file`) reference")
    )]
    ExtendsNotFound {
        service: String,
        file: Option<String>,
    },

    #[error("Cannot extend service '{base}' in {file}: services with '{field}' cannot be extended (extended by '{service}')")]
    #[diagnostic(
        code(stevedore::config::non_extendable),
        help("Move '{field}' into the extending service instead of the base service")
    )]
    NonExtendable {
        service: String,
        base: String,
        file: String,
        field: String,
    },

    #[error("Cannot use {directive} in file {file}: no mechanism provided to load files")]
    #[diagnostic(code(stevedore::config::resource_lookup))]
    MissingResourceLookup { directive: String, file: String },

    #[error("Circular extends detected: {}", .0.join(" -> "))]
    #[diagnostic(
        code(stevedore::config::circular_extends),
        help("A service cannot extend itself, directly or through another service")
    )]
    CircularExtends(Vec<String>),

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    #[diagnostic(
        code(stevedore::dependency::circular),
        help("Services cannot depend on each other in a cycle. Review links, ipc and network_mode")
    )]
    CircularDependency(Vec<String>),

    #[error("Service not found: {0}")]
    #[diagnostic(
        code(stevedore::service::not_found),
        help("Check available services with `stevedore config`")
    )]
    ServiceNotFound(String),

    #[error("Container '{container}' has an invalid '{label}' label: {value:?}")]
    #[diagnostic(
        code(stevedore::labels::invalid),
        help("A container carrying this project's labels was created or modified outside of stevedore. Remove it with `docker rm`")
    )]
    InvalidLabel {
        container: String,
        label: String,
        value: Option<String>,
    },

    #[error("Failed to find hash on old container: {0}")]
    MissingHash(String),

    #[error("Service '{0}' needs to be built, but building images is not supported")]
    #[diagnostic(
        code(stevedore::service::build_unsupported),
        help("Build the image yourself and reference it with `image:`")
    )]
    BuildUnsupported(String),

    #[error("Failed to find container for {kind} namespace of service '{target}' (required by '{service}')")]
    #[diagnostic(
        code(stevedore::service::namespace_target),
        help("Start '{target}' before '{service}'")
    )]
    NamespaceTarget {
        service: String,
        target: String,
        kind: String,
    },

    #[error("Container '{0}' disappeared while it was being created")]
    ContainerVanished(String),

    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::ServiceNotFound(name) => Some(format!(
                "Check the spelling of '{}' or list services with 'stevedore config'.",
                name
            )),
            Error::NonExtendable { field, .. } => Some(format!(
                "Services declaring '{}' are deployment-specific; declare it on the extending service.",
                field
            )),
            Error::MissingResourceLookup { directive, .. } => Some(format!(
                "Load the project from files on disk so that '{}' references can be resolved.",
                directive
            )),
            Error::InvalidLabel { container, .. } => Some(format!(
                "Remove the foreign container with: docker rm -f {}",
                container
            )),
            Error::BuildUnsupported(service) => Some(format!(
                "Add an 'image:' to service '{}' pointing at a pre-built image.",
                service
            )),
            Error::CircularDependency(path) => Some(format!(
                "Review the links, ipc and network_mode settings of: {}",
                path.join(", ")
            )),
            Error::Config(_) | Error::Validation(_) | Error::Interpolation(_) => {
                Some("Inspect the merged configuration with: stevedore config".to_string())
            }
            Error::Runtime(_) => Some("Check that Docker is running: docker ps".to_string()),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_extendable_names_service_file_and_field() {
        let err = Error::NonExtendable {
            service: "web".to_string(),
            base: "base".to_string(),
            file: "docker-compose.yml".to_string(),
            field: "links".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'web'"));
        assert!(msg.contains("'base'"));
        assert!(msg.contains("docker-compose.yml"));
        assert!(msg.contains("'links'"));
    }

    #[test]
    fn extends_not_found_mentions_file_when_present() {
        let err = Error::ExtendsNotFound {
            service: "base".to_string(),
            file: Some("common.yml".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Failed to find service 'base' to extend in file common.yml"
        );

        let err = Error::ExtendsNotFound {
            service: "base".to_string(),
            file: None,
        };
        assert_eq!(err.to_string(), "Failed to find service 'base' to extend");
    }

    #[test]
    fn multiple_lists_every_error() {
        let err = Error::Multiple(vec![
            Error::ServiceNotFound("a".to_string()),
            Error::ServiceNotFound("b".to_string()),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("  - Service not found: a"));
        assert!(msg.contains("  - Service not found: b"));
    }

    #[test]
    fn with_suggestion_appends_hint() {
        let err = Error::BuildUnsupported("api".to_string());
        let text = err.with_suggestion();
        assert!(text.contains("Hint: Add an 'image:'"));
    }
}
