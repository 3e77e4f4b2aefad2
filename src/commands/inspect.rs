use crate::output::UserOutput;
use std::sync::Arc;
use stevedore::service::Info;
use stevedore::Project;

pub async fn run_ps(
    project: &Arc<Project>,
    services: &[String],
    quiet: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let infos = project.info(services, quiet).await?;
    if quiet {
        for info in infos {
            if let Info::Id(id) = info {
                out.line(&id);
            }
        }
        return Ok(());
    }

    let rows: Vec<[String; 4]> = infos
        .into_iter()
        .filter_map(|info| match info {
            Info::Summary {
                name,
                command,
                state,
                ports,
            } => Some([name, command, state, ports]),
            Info::Id(_) => None,
        })
        .collect();
    if rows.is_empty() {
        out.warning(&format!("No containers found for project {}", project.name()));
        return Ok(());
    }
    for line in render_table(["Name", "Command", "State", "Ports"], &rows) {
        out.line(&line);
    }
    Ok(())
}

/// Left-aligned columns separated by three spaces.
fn render_table(header: [&str; 4], rows: &[[String; 4]]) -> Vec<String> {
    let mut widths = header.map(str::len);
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let format_row = |cells: [&str; 4]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("   ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_row(header)];
    lines.push("-".repeat(widths.iter().sum::<usize>() + 9));
    for row in rows {
        lines.push(format_row([&row[0], &row[1], &row[2], &row[3]]));
    }
    lines
}

pub async fn run_logs(
    project: &Arc<Project>,
    services: &[String],
    follow: bool,
) -> anyhow::Result<()> {
    project.log(services, follow).await?;
    Ok(())
}

/// Print the merged configuration as YAML.
pub fn run_config(project: &Project, names_only: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    if names_only {
        for name in project.configs().keys() {
            out.line(name);
        }
        return Ok(());
    }

    let mut services = serde_yaml::Mapping::new();
    for (name, config) in project.configs().iter() {
        services.insert(name.into(), serde_yaml::to_value(config.as_ref())?);
    }
    out.line(serde_yaml::to_string(&services)?.trim_end());
    Ok(())
}
