//! Loading projects from declaration files on disk.

use std::path::PathBuf;
use std::sync::Arc;
use stevedore::config::MapEnvLookup;
use stevedore::{Context, Error, InMemoryRuntime, Project};
use tempfile::TempDir;

fn context() -> Context {
    Context::builder()
        .client(Arc::new(InMemoryRuntime::new()))
        .build()
        .unwrap()
}

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_later_files_override_earlier_ones() {
    let dir = tempfile::tempdir().unwrap();
    let base = write(
        &dir,
        "docker-compose.yml",
        "web:\n  image: nginx\n  environment:\n    LEVEL: base\n    KEEP: yes\ndb:\n  image: postgres\n",
    );
    let overrides = write(
        &dir,
        "docker-compose.override.yml",
        "web:\n  image: nginx:1.25\n  environment:\n    LEVEL: override\n",
    );

    let project = Project::load("app", &[base, overrides], context(), &MapEnvLookup::new()).unwrap();

    let web = project.configs().get("web").unwrap();
    assert_eq!(web.image.as_deref(), Some("nginx:1.25"));
    assert_eq!(web.environment.get("LEVEL").map(String::as_str), Some("override"));
    assert_eq!(web.environment.get("KEEP").map(String::as_str), Some("yes"));
    assert_eq!(project.configs().keys(), ["web", "db"]);
    assert_eq!(project.files().len(), 2);
}

#[test]
fn test_extends_and_env_file_resolve_relative_to_declaring_file() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir,
        "shared/common.yml",
        "base:\n  image: app\n  env_file: base.env\n  environment:\n    FROM: common\n",
    );
    write(&dir, "shared/base.env", "# defaults\nPORT=8080\nFROM=env_file\n");
    let main = write(
        &dir,
        "docker-compose.yml",
        "web:\n  extends:\n    file: shared/common.yml\n    service: base\n  command: serve\n",
    );

    let project = Project::load("app", &[main], context(), &MapEnvLookup::new()).unwrap();

    let web = project.configs().get("web").unwrap();
    assert_eq!(web.image.as_deref(), Some("app"));
    assert_eq!(web.command, vec!["serve"]);
    assert_eq!(web.environment.get("PORT").map(String::as_str), Some("8080"));
    assert_eq!(web.environment.get("FROM").map(String::as_str), Some("common"));
    assert!(!project.configs().has("base"));
}

#[test]
fn test_variables_are_interpolated_from_the_environment() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(
        &dir,
        "docker-compose.yml",
        "web:\n  image: \"registry.local/web:${TAG}\"\n  environment:\n    PRICE: \"$$5\"\n",
    );
    let env = MapEnvLookup::new().with("TAG", "v2");

    let project = Project::load("app", &[main], context(), &env).unwrap();

    let web = project.configs().get("web").unwrap();
    assert_eq!(web.image.as_deref(), Some("registry.local/web:v2"));
    assert_eq!(web.environment.get("PRICE").map(String::as_str), Some("$5"));
}

#[test]
fn test_missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yml");

    let err = Project::load("app", &[missing], context(), &MapEnvLookup::new()).unwrap_err();
    assert!(matches!(err, Error::Config(ref m) if m.contains("nope.yml")), "{:?}", err);
}

#[test]
fn test_link_to_undefined_service_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let main = write(&dir, "docker-compose.yml", "web:\n  image: x\n  links: [db]\n");

    let err = Project::load("app", &[main], context(), &MapEnvLookup::new()).unwrap_err();
    assert!(err.to_string().contains("undefined service 'db'"), "{}", err);
}

#[test]
fn test_in_memory_sources_cannot_extend_other_files() {
    let yaml = "web:\n  extends:\n    file: common.yml\n    service: base\n";
    let sources = [("docker-compose.yml".to_string(), yaml.as_bytes().to_vec())];

    let err = Project::from_sources("app", &sources, context(), &MapEnvLookup::new(), None)
        .unwrap_err();
    assert!(matches!(err, Error::MissingResourceLookup { .. }), "{:?}", err);
}
