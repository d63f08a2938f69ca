//! Daemon wiring: slot inventory, proxy, assignment store, maintainers.
//!
//! Each tick re-reads the desired roles, reloads the config file when it
//! changed on disk, and routes roles into global groups. Roles no global
//! group accepts go to job-local agents when a job config is given, which
//! also retires agent nodes of inactive builds. Due flexible updates are
//! applied last.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use agentgrid_core::TargetRolePlan;
use agentgrid_maintainer::{GlobalAgentMaintainer, GlobalPlan, JobAgentMaintainer, active_build_ids};
use agentgrid_proxy::{InMemorySlotScheduler, SlotInventory, SlotSchedulerProxy, spawn_refresh_loop};
use agentgrid_state::{AssignmentStore, StateStore};

type InventoryProxy = SlotSchedulerProxy<InMemorySlotScheduler>;

/// Maintainers plus the files they are driven from.
struct Daemon {
    maintainer: GlobalAgentMaintainer,
    jobs: Option<JobAgentMaintainer>,
    proxy: Arc<InventoryProxy>,
    config_path: PathBuf,
    roles_path: PathBuf,
    config_modified: Option<SystemTime>,
}

impl Daemon {
    fn open(
        config_path: PathBuf,
        inventory: &Path,
        roles_path: PathBuf,
        job_config: Option<&Path>,
        store: Arc<dyn AssignmentStore>,
    ) -> anyhow::Result<Self> {
        let inventory = SlotInventory::from_file(inventory)?;
        info!(roles = inventory.slots.len(), "slot inventory loaded");
        let proxy = Arc::new(SlotSchedulerProxy::new(Arc::new(
            InMemorySlotScheduler::from_inventory(inventory),
        )));

        let config_modified = modified(&config_path);
        let maintainer = GlobalAgentMaintainer::load_from_file(&config_path, Arc::clone(&store))?;
        let jobs = match job_config {
            Some(path) => Some(JobAgentMaintainer::load_from_file(path, store)?),
            None => None,
        };
        Ok(Self {
            maintainer,
            jobs,
            proxy,
            config_path,
            roles_path,
            config_modified,
        })
    }

    fn tick(&mut self, now: u64) -> anyhow::Result<GlobalPlan> {
        self.reload_if_changed();

        let roles = load_roles(&self.roles_path)?;
        let config_path = self.config_path.display().to_string();
        self.maintainer
            .add_target_role_plan(&roles, &BTreeSet::new(), &config_path, None);
        let local: TargetRolePlan = roles
            .iter()
            .filter(|(name, _)| !self.maintainer.is_routed(name))
            .map(|(name, role)| (name.clone(), role.clone()))
            .collect();
        let plan = self.maintainer.make_plan_at(self.proxy.as_ref(), now)?;

        let mut job_agents: usize = 0;
        match &mut self.jobs {
            Some(jobs) => {
                let plans = jobs.make_plan_at(self.proxy.as_ref(), &local, &active_build_ids(&roles), now)?;
                job_agents = plans.values().map(|p| p.assignment.len()).sum();
            }
            None if !local.is_empty() => {
                debug!(unscheduled = local.len(), "roles accepted by no global group");
            }
            None => {}
        }

        let updates = self.maintainer.run_flexible_updates(now)?;
        if !updates.is_empty() {
            self.config_modified = modified(&self.config_path);
        }
        info!(
            roles = roles.len(),
            agents = plan.assignment.len(),
            job_agents,
            persisted = plan.persisted,
            flexible_updates = updates.len(),
            "scheduling tick complete"
        );
        Ok(plan)
    }

    fn reload_if_changed(&mut self) {
        let current = modified(&self.config_path);
        if current.is_none() || current == self.config_modified {
            return;
        }
        debug!(path = ?self.config_path, "config file changed");
        // A rejected reload leaves the previous config running.
        if self.maintainer.reload_config().is_ok() {
            info!(path = ?self.config_path, "config reloaded");
        }
        self.config_modified = current;
    }
}

/// Run a single tick and print the assignment and schedule info.
pub fn plan_once(
    config: PathBuf,
    inventory: PathBuf,
    roles: PathBuf,
    job_config: Option<PathBuf>,
    data_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let store = open_store(data_dir.as_deref())?;
    let mut daemon = Daemon::open(config, &inventory, roles, job_config.as_deref(), store)?;
    daemon.proxy.refresh();
    let plan = daemon.tick(epoch_secs())?;

    let schedule = daemon.maintainer.schedule_info();
    let mut jobs = serde_json::Map::new();
    if let Some(job_maintainer) = &daemon.jobs {
        for job in job_maintainer.jobs() {
            jobs.insert(job.build_id().to_string(), serde_json::to_value(job.assignment().as_ref())?);
        }
    }
    let output = serde_json::json!({
        "assignment": serde_json::to_value(&plan.assignment)?,
        "schedule": serde_json::to_value(schedule.as_ref())?,
        "jobs": jobs,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Tick every `interval` seconds until Ctrl-C.
pub async fn run(
    config: PathBuf,
    inventory: PathBuf,
    roles: PathBuf,
    job_config: Option<PathBuf>,
    data_dir: PathBuf,
    interval: u64,
) -> anyhow::Result<()> {
    info!("AgentGrid daemon starting");
    let store = open_store(Some(&data_dir))?;
    let mut daemon = Daemon::open(config, &inventory, roles, job_config.as_deref(), store)?;
    let period = Duration::from_secs(interval.max(1));

    // ── Shutdown signal ────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_handle = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // ── Background refresh ─────────────────────────────────────
    let refresh_handle = spawn_refresh_loop(Arc::clone(&daemon.proxy), period, shutdown_rx.clone());

    // ── Scheduling loop ────────────────────────────────────────
    let mut ticker = tokio::time::interval(period);
    let mut shutdown = shutdown_rx;
    info!(interval, "scheduling loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = daemon.tick(epoch_secs()) {
                    warn!(error = %e, "scheduling tick failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    let _ = refresh_handle.await;
    signal_handle.abort();
    info!("AgentGrid daemon stopped");
    Ok(())
}

fn open_store(data_dir: Option<&Path>) -> anyhow::Result<Arc<dyn AssignmentStore>> {
    match data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let db_path = dir.join("agentgrid.redb");
            let store = StateStore::open(&db_path)?;
            info!(path = ?db_path, "state store opened");
            Ok(Arc::new(store))
        }
        None => {
            debug!("using in-memory state store");
            Ok(Arc::new(StateStore::open_in_memory()?))
        }
    }
}

fn load_roles(path: &Path) -> anyhow::Result<TargetRolePlan> {
    let content = std::fs::read_to_string(path)?;
    let roles: TargetRolePlan = serde_json::from_str(&content)?;
    Ok(roles)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "global_agent_groups": [
            {
                "global_id": "shared",
                "packages": ["pkg://indexer/1.0"],
                "agent_node_groups": [
                    {"identifier": "proc", "role_pattern": "app\\..*", "node_count": 2}
                ]
            }
        ]
    }"#;

    const INVENTORY: &str = r#"{
        "slots": {
            "shared.proc.agent.0": [{"address": "10.0.0.1:7000", "identifier": "id-0", "service_ready": true}],
            "shared.proc.agent.1": [{"address": "10.0.0.2:7000", "identifier": "id-1", "service_ready": true}]
        }
    }"#;

    const SHARED_PKG: &[&str] = &["pkg://indexer/1.0"];
    const OTHER_PKG: &[&str] = &["pkg://other/2.0"];

    const JOB_CONFIG: &str = r#"{
        "agent_node_groups": [
            {"identifier": "local", "role_pattern": ".*", "node_count": 1, "dynamic_role_mapping": true}
        ]
    }"#;

    fn make_role_json(name: &str, packages: &[&str]) -> serde_json::Value {
        serde_json::to_value(
            agentgrid_core::TargetRole::new(name, agentgrid_core::BuildId::new("app", "t", 1))
                .with_packages(packages),
        )
        .unwrap()
    }

    fn write_roles(path: &Path, roles: &[(&str, &[&str])]) {
        let plan: serde_json::Map<String, serde_json::Value> = roles
            .iter()
            .map(|(r, packages)| (r.to_string(), make_role_json(r, packages)))
            .collect();
        std::fs::write(path, serde_json::to_string(&plan).unwrap()).unwrap();
    }

    fn write_files(dir: &Path, roles: &[&str]) -> (PathBuf, PathBuf, PathBuf) {
        let config = dir.join("global_agent.json");
        let inventory = dir.join("slots.json");
        let roles_path = dir.join("roles.json");
        std::fs::write(&config, CONFIG).unwrap();
        std::fs::write(&inventory, INVENTORY).unwrap();
        let shared: Vec<(&str, &[&str])> = roles.iter().map(|r| (*r, SHARED_PKG)).collect();
        write_roles(&roles_path, &shared);
        (config, inventory, roles_path)
    }

    #[test]
    fn tick_schedules_roles_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let (config, inventory, roles) = write_files(dir.path(), &["app.t.1.a", "app.t.1.b"]);
        let store = open_store(Some(&dir.path().join("data"))).unwrap();
        let mut daemon = Daemon::open(config, &inventory, roles, None, store).unwrap();

        let plan = daemon.tick(100).unwrap();
        assert!(plan.persisted);
        assert_eq!(plan.assignment.len(), 2);
        assert!(plan.assignment.agent_of("app.t.1.a").is_some());
        assert!(dir.path().join("data").join("agentgrid.redb").exists());

        // Declared agents pick up identifiers on the next refresh.
        daemon.proxy.refresh();
        let plan = daemon.tick(101).unwrap();
        assert_eq!(plan.assignment.get("shared.proc.agent.0").unwrap().identifier, "id-0");
    }

    #[test]
    fn unreadable_roles_fail_the_tick() {
        let dir = tempfile::tempdir().unwrap();
        let (config, inventory, roles) = write_files(dir.path(), &[]);
        std::fs::write(&roles, "not json").unwrap();
        let mut daemon = Daemon::open(config, &inventory, roles, None, open_store(None).unwrap()).unwrap();
        assert!(daemon.tick(100).is_err());
    }

    #[test]
    fn unrouted_roles_go_to_job_agents() {
        let dir = tempfile::tempdir().unwrap();
        let (config, inventory, roles) = write_files(dir.path(), &[]);
        write_roles(
            &roles,
            &[("app.t.1.a", SHARED_PKG), ("app.t.1.solo", OTHER_PKG)],
        );
        let job_config = dir.path().join("job_agent.json");
        std::fs::write(&job_config, JOB_CONFIG).unwrap();
        let mut daemon =
            Daemon::open(config, &inventory, roles.clone(), Some(&job_config), open_store(None).unwrap()).unwrap();

        let plan = daemon.tick(100).unwrap();
        assert!(plan.assignment.agent_of("app.t.1.a").is_some());
        assert!(plan.assignment.agent_of("app.t.1.solo").is_none());

        let build = agentgrid_core::BuildId::new("app", "t", 1);
        let jobs = daemon.jobs.as_ref().unwrap();
        let job = jobs.job(&build).unwrap();
        assert_eq!(job.assignment().agent_of("app.t.1.solo"), Some("app.t.1.local.agent.0"));
        assert!(daemon
            .proxy
            .declared_agent_roles()
            .contains(&"app.t.1.local.agent.0".to_string()));

        // The build goes away: its job agents are retired.
        write_roles(&roles, &[]);
        daemon.tick(110).unwrap();
        assert!(daemon.jobs.as_ref().unwrap().job(&build).is_none());
        assert!(!daemon
            .proxy
            .declared_agent_roles()
            .contains(&"app.t.1.local.agent.0".to_string()));
    }
}
