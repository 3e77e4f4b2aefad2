//! `env_file` parsing.
//!
//! Uses dotenvy for parsing which handles:
//! - KEY=VALUE format
//! - Comments starting with #
//! - Single and double quoted values
//! - Empty lines

use crate::error::{Error, Result};

/// Parse env file content into ordered `(key, value)` pairs.
///
/// `source` names the file in error messages.
pub fn parse_env_file(content: &[u8], source: &str) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::new();
    for item in dotenvy::from_read_iter(content) {
        let (key, value) = item.map_err(|e| {
            Error::Config(format!(
                "Failed to parse environment file {}: {}",
                source, e
            ))
        })?;
        validate_env_name(&key)?;
        vars.push((key, value));
    }
    Ok(vars)
}

/// Validate an environment variable name.
///
/// Names must start with a letter or underscore and contain only
/// alphanumeric characters and underscores.
pub fn validate_env_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(Error::Config(
            "Environment variable name cannot be empty".to_string(),
        ));
    };

    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(Error::Config(format!(
            "Invalid environment variable name '{}': must start with a letter or underscore",
            name
        )));
    }

    if let Some((i, c)) = name
        .chars()
        .enumerate()
        .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
    {
        return Err(Error::Config(format!(
            "Invalid environment variable name '{}': character '{}' at position {} is not allowed",
            name, c, i
        )));
    }

    Ok(())
}
