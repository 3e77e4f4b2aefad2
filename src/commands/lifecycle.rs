use crate::output::UserOutput;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use stevedore::project::DownOptions;
use stevedore::service::{CreateOptions, DeleteOptions, ImageType, UpOptions};
use stevedore::Project;

pub async fn run_up(
    project: &Arc<Project>,
    services: &[String],
    options: UpOptions,
    detach: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    project.up(services, options).await?;
    if detach {
        return Ok(());
    }

    out.status("Attaching to container output (Ctrl-C to detach)...");
    tokio::select! {
        result = project.log(services, true) => result?,
        _ = tokio::signal::ctrl_c() => {
            out.status("Detached. Containers keep running; stop them with `stevedore stop`.");
        }
    }
    Ok(())
}

pub async fn run_create(
    project: &Arc<Project>,
    services: &[String],
    options: CreateOptions,
) -> anyhow::Result<()> {
    project.create(services, options).await?;
    Ok(())
}

pub async fn run_down(
    project: &Arc<Project>,
    volumes: bool,
    rmi: Option<&str>,
    timeout: Duration,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let remove_images = match rmi {
        Some(kind) => kind.parse::<ImageType>()?,
        None => ImageType::None,
    };
    out.status(&format!("Stopping and removing project {}...", project.name()));
    project
        .down(
            &[],
            DownOptions {
                timeout,
                remove_volumes: volumes,
                remove_images,
            },
        )
        .await?;
    Ok(())
}

pub async fn run_rm(
    project: &Arc<Project>,
    services: &[String],
    volumes: bool,
) -> anyhow::Result<()> {
    project
        .delete(
            services,
            DeleteOptions {
                remove_volumes: volumes,
            },
        )
        .await?;
    Ok(())
}

/// Parse `service=count` pairs.
pub fn parse_scale_targets(targets: &[String]) -> anyhow::Result<BTreeMap<String, u32>> {
    let mut counts = BTreeMap::new();
    for target in targets {
        let (service, count) = target
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Invalid scale target '{}': expected SERVICE=NUM", target))?;
        let count: u32 = count
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid scale target '{}': '{}' is not a number", target, count))?;
        counts.insert(service.to_string(), count);
    }
    Ok(counts)
}

pub async fn run_scale(
    project: &Arc<Project>,
    targets: &[String],
    timeout: Duration,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let counts = parse_scale_targets(targets)?;
    for (service, count) in &counts {
        out.status(&format!("Setting scale {}={}...", service, count));
    }
    project.scale(&counts, timeout).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_targets_parse() {
        let counts =
            parse_scale_targets(&["web=3".to_string(), "worker=0".to_string()]).unwrap();
        assert_eq!(counts.get("web"), Some(&3));
        assert_eq!(counts.get("worker"), Some(&0));

        assert!(parse_scale_targets(&["web".to_string()]).is_err());
        assert!(parse_scale_targets(&["web=many".to_string()]).is_err());
    }
}
