//! `${VAR}` substitution over raw declaration data.
//!
//! Supported forms: `$VAR`, `${VAR}`, `${VAR:-default}` (default when unset
//! or empty), `${VAR-default}` (default when unset) and `$$` for a literal
//! dollar sign. Unset variables without a default expand to an empty string.

use super::EnvironmentLookup;
use crate::error::{Error, Result};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::sync::OnceLock;

/// Interpolate every string value of every service in `services`.
pub fn interpolate_services(services: &mut Mapping, env: &dyn EnvironmentLookup) -> Result<()> {
    for (name, service) in services.iter_mut() {
        let service_name = name.as_str().unwrap_or_default().to_string();
        let Value::Mapping(fields) = service else {
            continue;
        };
        for (key, value) in fields.iter_mut() {
            let key = key.as_str().unwrap_or_default();
            interpolate_value(value, env).map_err(|raw| {
                Error::Interpolation(format!(
                    "Invalid interpolation format for key \"{}\" in service \"{}\": \"{}\"",
                    key, service_name, raw
                ))
            })?;
        }
    }
    Ok(())
}

/// On failure returns the offending raw string.
fn interpolate_value(value: &mut Value, env: &dyn EnvironmentLookup) -> std::result::Result<(), String> {
    match value {
        Value::String(s) => {
            let replaced = interpolate_str(s, env).ok_or_else(|| s.clone())?;
            *s = replaced;
        }
        Value::Sequence(items) => {
            for item in items {
                interpolate_value(item, env)?;
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate_value(item, env)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// `$$`, `${NAME}`, `${NAME:-default}`, `${NAME-default}` or `$NAME`.
/// A `$` matching none of the forms leaves every group empty.
static REFERENCE_REGEX: OnceLock<Regex> = OnceLock::new();

fn reference_regex() -> &'static Regex {
    REFERENCE_REGEX.get_or_init(|| {
        Regex::new(
            r"\$(?:(\$)|\{([A-Za-z_][A-Za-z0-9_]*)(?:(:?-)([^}]*))?\}|([A-Za-z_][A-Za-z0-9_]*))?",
        )
        .expect("static regex pattern is valid")
    })
}

/// Expand one string. `None` when the string holds a malformed reference.
pub fn interpolate_str(input: &str, env: &dyn EnvironmentLookup) -> Option<String> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for cap in reference_regex().captures_iter(input) {
        let full = cap.get(0)?;
        out.push_str(&input[last..full.start()]);
        last = full.end();

        if cap.get(1).is_some() {
            out.push('$');
        } else if let Some(name) = cap.get(2) {
            let name = name.as_str();
            let default = cap.get(4).map_or("", |d| d.as_str());
            let value = match cap.get(3).map(|m| m.as_str()) {
                Some(":-") => match env.lookup(name) {
                    Some(v) if !v.is_empty() => v,
                    _ => default.to_string(),
                },
                Some(_) => env.lookup(name).unwrap_or_else(|| default.to_string()),
                None => resolve(name, env),
            };
            out.push_str(&value);
        } else if let Some(name) = cap.get(5) {
            out.push_str(&resolve(name.as_str(), env));
        } else {
            return None;
        }
    }
    out.push_str(&input[last..]);
    Some(out)
}

fn resolve(name: &str, env: &dyn EnvironmentLookup) -> String {
    env.lookup(name).unwrap_or_else(|| {
        tracing::warn!(
            "The {} variable is not set. Substituting a blank string.",
            name
        );
        String::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapEnvLookup;

    fn env() -> MapEnvLookup {
        MapEnvLookup::new()
            .with("TAG", "1.25")
            .with("EMPTY", "")
            .with("HOST_PORT", "8080")
    }

    #[test]
    fn expands_all_reference_forms() {
        let env = env();
        assert_eq!(interpolate_str("nginx:$TAG", &env).unwrap(), "nginx:1.25");
        assert_eq!(interpolate_str("nginx:${TAG}", &env).unwrap(), "nginx:1.25");
        assert_eq!(
            interpolate_str("${HOST_PORT}:80", &env).unwrap(),
            "8080:80"
        );
        assert_eq!(interpolate_str("${MISSING:-x}", &env).unwrap(), "x");
        assert_eq!(interpolate_str("${EMPTY:-x}", &env).unwrap(), "x");
        assert_eq!(interpolate_str("${EMPTY-x}", &env).unwrap(), "");
        assert_eq!(interpolate_str("${MISSING-x}", &env).unwrap(), "x");
        assert_eq!(interpolate_str("$MISSING/bin", &env).unwrap(), "/bin");
        assert_eq!(interpolate_str("cost: $$5", &env).unwrap(), "cost: $5");
    }

    #[test]
    fn adjacent_references_and_multibyte_text() {
        let env = env();
        assert_eq!(
            interpolate_str("ü${TAG}$HOST_PORT€$$", &env).unwrap(),
            "ü1.258080€$"
        );
        assert_eq!(
            interpolate_str("${MISSING:-a b:c}", &env).unwrap(),
            "a b:c"
        );
        assert_eq!(interpolate_str("${MISSING-}", &env).unwrap(), "");
        assert_eq!(interpolate_str("no references", &env).unwrap(), "no references");
    }

    #[test]
    fn malformed_references_fail() {
        let env = env();
        assert!(interpolate_str("${TAG", &env).is_none());
        assert!(interpolate_str("${}", &env).is_none());
        assert!(interpolate_str("${1A}", &env).is_none());
        assert!(interpolate_str("trailing $", &env).is_none());
        assert!(interpolate_str("$ 5", &env).is_none());
        assert!(interpolate_str("${TAG?err}", &env).is_none());
    }

    #[test]
    fn services_are_walked_recursively_and_errors_name_the_key() {
        let mut services: Mapping = serde_yaml::from_str(
            r#"
web:
  image: "nginx:${TAG}"
  ports: ["${HOST_PORT}:80"]
  environment:
    MODE: $TAG
"#,
        )
        .unwrap();
        interpolate_services(&mut services, &env()).unwrap();
        let web = &services["web"];
        assert_eq!(web["image"].as_str(), Some("nginx:1.25"));
        assert_eq!(web["ports"][0].as_str(), Some("8080:80"));
        assert_eq!(web["environment"]["MODE"].as_str(), Some("1.25"));

        let mut broken: Mapping = serde_yaml::from_str("api:\n  command: \"echo ${\"\n").unwrap();
        let err = interpolate_services(&mut broken, &env()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("\"command\""));
        assert!(msg.contains("\"api\""));
    }
}
