//! Tessera Operator - reconciles placement groups and VPCs against the cloud API

mod controller_runner;
mod startup;

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser};
use kube::Client;

use tessera_cloud::{HttpClientFactory, DEFAULT_API_URL};
use tessera_common::config::ControllerTimeouts;
use tessera_common::telemetry::{init_telemetry, TelemetryConfig};

use controller_runner::{build_placement_group_controller, build_vpc_controller};

/// Tessera - declarative placement groups and VPCs for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "tessera-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Do not install CRDs on startup
    #[arg(long)]
    skip_crd_install: bool,

    /// Base URL of the cloud API
    #[arg(long, env = "TESSERA_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Token used for objects without a credentials reference
    #[arg(long, env = "TESSERA_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[command(flatten)]
    timeouts: TimeoutArgs,
}

/// Timeout overrides, in seconds
#[derive(Args, Debug, Default)]
struct TimeoutArgs {
    /// Deadline for one reconcile call
    #[arg(long, env = "TESSERA_RECONCILE_TIMEOUT")]
    reconcile_timeout: Option<u64>,

    /// Delay between retries inside a retry window
    #[arg(long, env = "TESSERA_REQUEUE_DELAY")]
    requeue_delay: Option<u64>,

    /// How long create errors are retried
    #[arg(long, env = "TESSERA_CREATE_TIMEOUT")]
    create_timeout: Option<u64>,

    /// How long fetch/delete errors during deletion are retried
    #[arg(long, env = "TESSERA_DELETE_TIMEOUT")]
    delete_timeout: Option<u64>,

    /// How long a placement group waits for members to leave
    #[arg(long, env = "TESSERA_PLACEMENT_GROUP_DETACH_TIMEOUT")]
    placement_group_detach_timeout: Option<u64>,

    /// How long a VPC waits for nodes to leave its subnets
    #[arg(long, env = "TESSERA_VPC_DETACH_TIMEOUT")]
    vpc_detach_timeout: Option<u64>,
}

impl TimeoutArgs {
    fn apply(&self, base: ControllerTimeouts, detach: Option<u64>) -> ControllerTimeouts {
        let mut timeouts = base;
        if let Some(secs) = self.reconcile_timeout {
            timeouts = timeouts.with_reconcile(Duration::from_secs(secs));
        }
        if let Some(secs) = self.requeue_delay {
            timeouts = timeouts.with_requeue_delay(Duration::from_secs(secs));
        }
        if let Some(secs) = self.create_timeout {
            timeouts = timeouts.with_create(Duration::from_secs(secs));
        }
        if let Some(secs) = self.delete_timeout {
            timeouts = timeouts.with_delete(Duration::from_secs(secs));
        }
        if let Some(secs) = detach {
            timeouts = timeouts.with_detach_wait(Duration::from_secs(secs));
        }
        timeouts
    }

    fn placement_groups(&self) -> ControllerTimeouts {
        self.apply(
            ControllerTimeouts::placement_groups(),
            self.placement_group_detach_timeout,
        )
    }

    fn vpcs(&self) -> ControllerTimeouts {
        self.apply(ControllerTimeouts::vpcs(), self.vpc_detach_timeout)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        println!("{}", startup::crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())?;
    run(cli).await
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = Client::try_default().await?;

    if cli.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        startup::ensure_crds_installed(&client).await?;
    }

    if cli.api_token.is_none() {
        tracing::warn!("No default API token; only objects with a credentials reference can reconcile");
    }
    let clients = Arc::new(HttpClientFactory::new(cli.api_url.clone(), cli.api_token.clone())?);

    tracing::info!(api_url = %cli.api_url, "Starting controllers");
    let controllers = vec![
        build_placement_group_controller(
            client.clone(),
            clients.clone(),
            cli.timeouts.placement_groups(),
        ),
        build_vpc_controller(client, clients, cli.timeouts.vpcs()),
    ];
    futures::future::join_all(controllers).await;

    tracing::info!("Controllers stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_per_kind_timeouts() {
        let cli = Cli::try_parse_from(["tessera-operator"]).unwrap();
        assert_eq!(cli.api_url, DEFAULT_API_URL);
        assert_eq!(cli.timeouts.placement_groups(), ControllerTimeouts::placement_groups());
        assert_eq!(cli.timeouts.vpcs(), ControllerTimeouts::vpcs());
    }

    #[test]
    fn shared_overrides_apply_to_both_kinds() {
        let cli = Cli::try_parse_from([
            "tessera-operator",
            "--delete-timeout",
            "30",
            "--vpc-detach-timeout",
            "60",
        ])
        .unwrap();

        let pg = cli.timeouts.placement_groups();
        let vpc = cli.timeouts.vpcs();
        assert_eq!(pg.delete, Duration::from_secs(30));
        assert_eq!(vpc.delete, Duration::from_secs(30));
        assert_eq!(pg.detach_wait, ControllerTimeouts::placement_groups().detach_wait);
        assert_eq!(vpc.detach_wait, Duration::from_secs(60));
    }

    #[test]
    fn crd_flag_parses() {
        let cli = Cli::try_parse_from(["tessera-operator", "--crd"]).unwrap();
        assert!(cli.crd);
    }
}
