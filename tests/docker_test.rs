//! End-to-end checks against a real Docker daemon.
//!
//! Run with: cargo test --test docker_test -- --ignored

use std::sync::Arc;
use std::time::Duration;
use stevedore::config::MapEnvLookup;
use stevedore::project::DownOptions;
use stevedore::service::{CreateOptions, ImageType, RunOptions};
use stevedore::{Context, DockerClient, Project};

fn docker_project(name: &str, yaml: &str) -> Arc<Project> {
    let context = Context::builder()
        .client(Arc::new(DockerClient::new()))
        .build()
        .unwrap();
    let sources = [("docker-compose.yml".to_string(), yaml.as_bytes().to_vec())];
    Project::from_sources(name, &sources, context, &MapEnvLookup::new(), None).unwrap()
}

/// Ignored tests still bail out when no daemon answers.
fn docker_available() -> bool {
    std::process::Command::new("docker")
        .arg("info")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn teardown() -> DownOptions {
    DownOptions {
        timeout: Duration::from_secs(1),
        remove_volumes: true,
        remove_images: ImageType::None,
    }
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_up_is_idempotent_against_docker() {
    if !docker_available() {
        eprintln!("Docker is not available, skipping");
        return;
    }
    let project = docker_project(
        "stevedoreitup",
        "sleeper:\n  image: busybox:latest\n  command: sleep 300\n",
    );

    project.up(&[], CreateOptions::default()).await.unwrap();
    let first = project.containers(&[]).await.unwrap();
    project.up(&[], CreateOptions::default()).await.unwrap();
    let second = project.containers(&[]).await.unwrap();

    project.down(&[], teardown()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
}

#[tokio::test]
#[ignore = "requires a running Docker daemon"]
async fn test_run_reports_exit_code_against_docker() {
    if !docker_available() {
        eprintln!("Docker is not available, skipping");
        return;
    }
    let project = docker_project("stevedoreitrun", "job:\n  image: busybox:latest\n");

    let options = RunOptions {
        autoremove: true,
        tty: false,
        stdin_open: false,
    };
    let code = project
        .run("job", vec!["sh".into(), "-c".into(), "exit 4".into()], options)
        .await
        .unwrap();

    project.down(&[], teardown()).await.unwrap();
    assert_eq!(code, 4);
}
