mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use commands::seconds;
use output::{CliOutput, UserOutput};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stevedore::config::OsEnvLookup;
use stevedore::events::DefaultListener;
use stevedore::logger::PrefixLoggerFactory;
use stevedore::service::CreateOptions;
use stevedore::{Context, DockerClient, Error as StevedoreError, EventBus, Project};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let Some(err) = e.downcast_ref::<StevedoreError>() {
                eprintln!("Error: {}", err);
                if let Some(suggestion) = err.suggestion() {
                    eprintln!("\nHint: {}", suggestion);
                }
            } else {
                eprintln!("Error: {:#}", e);
            }
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "stevedore=debug" } else { "stevedore=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// `-p`, then `COMPOSE_PROJECT_NAME` (both via clap), then the directory
/// holding the first declaration file.
fn project_name(explicit: Option<&str>, files: &[PathBuf]) -> String {
    if let Some(name) = explicit.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    let first = files.first().map(PathBuf::as_path).unwrap_or(Path::new("."));
    let dir = first
        .canonicalize()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok());
    dir.as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let bus = Arc::new(EventBus::new());
    let events = bus.subscribe();
    let context = Context::builder()
        .client(Arc::new(DockerClient::new()))
        .events(bus.clone())
        .logger_factory(Arc::new(PrefixLoggerFactory::new()))
        .parallelism(cli.parallelism)
        .build()?;

    let name = project_name(cli.project_name.as_deref(), &cli.files);
    let project = Project::load(&name, &cli.files, context, &OsEnvLookup)?;
    let listener = DefaultListener::new(project.name(), project.configs().len()).spawn(events);

    let out = CliOutput;
    let code = dispatch(cli.command, &project, &out).await?;

    // Close the bus so the listener drains and exits.
    drop(project);
    drop(bus);
    let _ = listener.await;
    Ok(code)
}

async fn dispatch(command: Commands, project: &Arc<Project>, out: &dyn UserOutput) -> anyhow::Result<i32> {
    match command {
        Commands::Up {
            services,
            detach,
            no_recreate,
            force_recreate,
        } => {
            let options = CreateOptions {
                no_recreate,
                force_recreate,
                no_build: false,
            };
            commands::run_up(project, &services, options, detach, out).await?;
        }
        Commands::Create {
            services,
            no_recreate,
            force_recreate,
        } => {
            let options = CreateOptions {
                no_recreate,
                force_recreate,
                no_build: false,
            };
            commands::run_create(project, &services, options).await?;
        }
        Commands::Start { services } => project.start(&services).await?,
        Commands::Stop { services, timeout } => project.stop(&services, seconds(timeout)).await?,
        Commands::Restart { services, timeout } => {
            project.restart(&services, seconds(timeout)).await?
        }
        Commands::Kill { services, signal } => project.kill(&services, &signal).await?,
        Commands::Rm { services, volumes } => commands::run_rm(project, &services, volumes).await?,
        Commands::Down {
            volumes,
            rmi,
            timeout,
        } => commands::run_down(project, volumes, rmi.as_deref(), seconds(timeout), out).await?,
        Commands::Pause { services } => project.pause(&services).await?,
        Commands::Unpause { services } => project.unpause(&services).await?,
        Commands::Ps { services, quiet } => commands::run_ps(project, &services, quiet, out).await?,
        Commands::Logs { services, follow } => commands::run_logs(project, &services, follow).await?,
        Commands::Pull { services } => project.pull(&services).await?,
        Commands::Scale { targets, timeout } => {
            commands::run_scale(project, &targets, seconds(timeout), out).await?
        }
        Commands::Run {
            rm,
            no_tty,
            service,
            command,
        } => {
            let code = commands::run_oneoff(project, &service, command, rm, no_tty).await?;
            return Ok(i32::try_from(code).unwrap_or(1));
        }
        Commands::Config { services } => commands::run_config(project, services, out)?,
    }
    Ok(0)
}
