//! agentd — the AgentGrid daemon.
//!
//! Drives the global agent maintainer against a slot inventory:
//! - `check` validates a global agent config file
//! - `plan` runs a single scheduling tick and prints the result
//! - `run` ticks periodically until Ctrl-C
//!
//! With `--job-config`, roles no global group accepts are scheduled on
//! agents owned by their build job.
//!
//! # Usage
//!
//! ```text
//! agentd run --config global_agent.json --inventory slots.json \
//!     --roles roles.json --data-dir /var/lib/agentgrid --interval 10
//! ```

mod daemon;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use agentgrid_core::GlobalAgentConfig;

#[derive(Parser)]
#[command(name = "agentd", about = "AgentGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a global agent config file.
    Check {
        /// Global agent config (JSON).
        #[arg(long)]
        config: PathBuf,
    },

    /// Run one scheduling tick and print the assignment.
    Plan {
        #[arg(long)]
        config: PathBuf,

        /// Slot inventory (JSON) standing in for the slot scheduler.
        #[arg(long)]
        inventory: PathBuf,

        /// Desired target roles (JSON map of role name to role).
        #[arg(long)]
        roles: PathBuf,

        /// Agent group config (JSON) for job-local agents.
        #[arg(long)]
        job_config: Option<PathBuf>,

        /// Data directory for the persisted assignment. In-memory when unset.
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Schedule periodically until interrupted.
    Run {
        #[arg(long)]
        config: PathBuf,

        #[arg(long)]
        inventory: PathBuf,

        /// Re-read every tick.
        #[arg(long)]
        roles: PathBuf,

        #[arg(long)]
        job_config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/agentgrid")]
        data_dir: PathBuf,

        /// Tick interval in seconds.
        #[arg(long, default_value = "10")]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,agentd=debug,agentgrid=debug"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Command::Check { config } => check(config),
        Command::Plan {
            config,
            inventory,
            roles,
            job_config,
            data_dir,
        } => daemon::plan_once(config, inventory, roles, job_config, data_dir),
        Command::Run {
            config,
            inventory,
            roles,
            job_config,
            data_dir,
            interval,
        } => daemon::run(config, inventory, roles, job_config, data_dir, interval).await,
    }
}

fn check(path: PathBuf) -> anyhow::Result<()> {
    let config = GlobalAgentConfig::from_file(&path)?;
    config.check()?;
    let groups: usize = config
        .global_agent_groups
        .iter()
        .map(|g| g.groups.agent_node_groups.len())
        .sum();
    info!(
        path = ?path,
        global_groups = config.global_agent_groups.len(),
        agent_groups = groups,
        flexible_targets = config.flexible_scale_config.len(),
        "config valid"
    );
    Ok(())
}
