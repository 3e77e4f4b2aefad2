use std::sync::Arc;
use stevedore::service::RunOptions;
use stevedore::Project;

/// Run a one-off command and return the exit code of its container.
pub async fn run_oneoff(
    project: &Arc<Project>,
    service: &str,
    command: Vec<String>,
    autoremove: bool,
    no_tty: bool,
) -> anyhow::Result<i64> {
    let options = RunOptions {
        autoremove,
        tty: !no_tty,
        stdin_open: true,
    };
    Ok(project.run(service, command, options).await?)
}
