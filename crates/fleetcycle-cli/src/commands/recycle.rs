use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, ValueEnum};
use tracing::{error, info};

use fleetcycle_core::{
    ConfigError, Poller, RecycleConfig, RestorePolicy, ShutdownSignal, TokioClock,
};
use fleetcycle_orchestrator::{RecycleOrchestrator, RecycleSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Flags for a recycle run. Each one overrides the matching field from
/// `--config`.
#[derive(Debug, Args)]
pub struct RecycleArgs {
    /// ECS cluster name.
    #[arg(long, env = "FLEETCYCLE_CLUSTER")]
    pub cluster: Option<String>,

    /// Auto Scaling group backing the cluster.
    #[arg(long, visible_alias = "asg-name", env = "FLEETCYCLE_CAPACITY_GROUP")]
    pub capacity_group: Option<String>,

    /// AWS region (default: from the environment/profile).
    #[arg(long)]
    pub region: Option<String>,

    /// TOML file with recycle settings.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds between polls.
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Seconds to wait for capacity and for the new member to join.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds to wait for a member to drain.
    #[arg(long)]
    pub drain_timeout: Option<u64>,

    /// Seconds to wait after a new member joins and after a drain.
    #[arg(long)]
    pub settle: Option<u64>,

    /// Refuse clusters with more members than this.
    #[arg(long)]
    pub ceiling: Option<usize>,

    /// Report the plan without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Terminate members still running tasks once the drain timeout
    /// elapses.
    #[arg(long)]
    pub force_after_timeout: bool,

    /// Leave desired capacity where it ends instead of restoring it.
    #[arg(long)]
    pub no_restore: bool,

    /// Raise the group's max size when the temporary bump needs it.
    #[arg(long)]
    pub raise_max_size: bool,

    /// Do not suspend AZRebalance and friends during the run.
    #[arg(long)]
    pub no_suspend: bool,

    /// Summary format on stdout.
    #[arg(long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

impl RecycleArgs {
    /// Load `--config` (if given) and apply flag overrides.
    pub fn to_config(&self) -> Result<RecycleConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => RecycleConfig::from_file(path)?,
            None => RecycleConfig::default(),
        };

        if let Some(cluster) = &self.cluster {
            config.cluster = cluster.clone();
        }
        if let Some(group) = &self.capacity_group {
            config.capacity_group = group.clone();
        }
        if self.region.is_some() {
            config.region = self.region.clone();
        }
        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }
        if let Some(secs) = self.timeout {
            config.capacity_timeout_secs = secs;
            config.join_timeout_secs = secs;
        }
        if let Some(secs) = self.drain_timeout {
            config.drain_timeout_secs = secs;
        }
        if let Some(secs) = self.settle {
            config.settle_secs = secs;
        }
        if let Some(ceiling) = self.ceiling {
            config.member_ceiling = ceiling;
        }
        config.dry_run |= self.dry_run;
        config.force_after_timeout |= self.force_after_timeout;
        config.raise_max_size |= self.raise_max_size;
        if self.no_restore {
            config.restore = RestorePolicy::Leave;
        }
        if self.no_suspend {
            config.suspend_processes.clear();
        }

        config.validate()?;
        Ok(config)
    }
}

fn print_summary(summary: &RecycleSummary, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(summary)?),
        OutputFormat::Text => print!("{}", summary.render_text()),
    }
    Ok(())
}

pub async fn run(args: RecycleArgs, shutdown: ShutdownSignal) -> anyhow::Result<()> {
    let config = args.to_config()?;
    info!(
        cluster = %config.cluster,
        group = %config.capacity_group,
        dry_run = config.dry_run,
        "starting recycle"
    );

    let (ecs, asg) = fleetcycle_aws::connect(
        &config.cluster,
        &config.capacity_group,
        config.region.as_deref(),
    )
    .await;

    let poller = Poller::new(Arc::new(TokioClock::new())).with_shutdown(shutdown);
    let mut orchestrator = RecycleOrchestrator::new(config, Arc::new(ecs), Arc::new(asg), poller);

    match orchestrator.run().await {
        Ok(summary) => print_summary(&summary, args.output),
        Err(e) => {
            error!(error = %e, exit_code = e.exit_code(), "recycle failed");
            print_summary(&orchestrator.summary(), args.output)?;
            Err(e.into())
        }
    }
}
