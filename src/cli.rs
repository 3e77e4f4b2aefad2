use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stevedore")]
#[command(about = "Stevedore - Reconcile declared services against running containers")]
pub struct Cli {
    /// Declaration file (can be repeated; later files override earlier ones)
    #[arg(short, long = "file", default_value = "docker-compose.yml")]
    pub files: Vec<PathBuf>,

    /// Project name (defaults to the directory of the first file)
    #[arg(short, long, env = "COMPOSE_PROJECT_NAME")]
    pub project_name: Option<String>,

    /// Log engine decisions at debug level
    #[arg(long)]
    pub verbose: bool,

    /// Maximum number of containers acted on at once
    #[arg(long, default_value_t = 64)]
    pub parallelism: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create and start containers
    Up {
        /// Services to bring up (defaults to all)
        services: Vec<String>,

        /// Return once containers are started instead of following their logs
        #[arg(short, long)]
        detach: bool,

        /// Keep existing containers even when their configuration changed
        #[arg(long, conflicts_with = "force_recreate")]
        no_recreate: bool,

        /// Recreate containers even when their configuration did not change
        #[arg(long)]
        force_recreate: bool,
    },
    /// Create containers without starting them
    Create {
        services: Vec<String>,

        #[arg(long, conflicts_with = "force_recreate")]
        no_recreate: bool,

        #[arg(long)]
        force_recreate: bool,
    },
    /// Start existing containers
    Start { services: Vec<String> },
    /// Stop running containers
    Stop {
        services: Vec<String>,

        /// Seconds to wait for a container to stop before killing it
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// Restart containers
    Restart {
        services: Vec<String>,

        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// Send a signal to running containers
    Kill {
        services: Vec<String>,

        #[arg(short, long, default_value = "SIGKILL")]
        signal: String,
    },
    /// Remove stopped containers
    Rm {
        services: Vec<String>,

        /// Also remove anonymous volumes
        #[arg(short, long)]
        volumes: bool,
    },
    /// Stop and remove containers
    Down {
        /// Also remove anonymous volumes
        #[arg(short, long)]
        volumes: bool,

        /// Remove images: 'local' (built ones) or 'all'
        #[arg(long, value_name = "TYPE")]
        rmi: Option<String>,

        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// Pause running containers
    Pause { services: Vec<String> },
    /// Unpause paused containers
    Unpause { services: Vec<String> },
    /// List containers
    Ps {
        services: Vec<String>,

        /// Only show container ids
        #[arg(short, long)]
        quiet: bool,
    },
    /// Show container output
    Logs {
        services: Vec<String>,

        #[arg(short, long)]
        follow: bool,
    },
    /// Pull service images
    Pull { services: Vec<String> },
    /// Set the number of containers of services
    Scale {
        /// `service=count` pairs
        #[arg(required = true, value_name = "SERVICE=NUM")]
        targets: Vec<String>,

        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },
    /// Run a one-off command in a new container
    Run {
        /// Remove the container once it exited
        #[arg(long)]
        rm: bool,

        /// Do not allocate a tty
        #[arg(short = 'T')]
        no_tty: bool,

        /// Service to run the command for
        service: String,

        /// Command and arguments (defaults to the service's command)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the merged configuration
    Config {
        /// Only list service names
        #[arg(long)]
        services: bool,
    },
}
