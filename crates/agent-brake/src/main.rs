mod cli;
mod config;

use std::sync::Arc;

use anyhow::{Context, Result};
use brake_proxy::{BrakeProxy, Interceptor, OutcomeObserver, ProxyExit};
use brake_runtime::{PolicyHandles, SessionTracker};
use clap::Parser;
use cli::Cli;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout is the protocol channel
    brake_runtime::init_logging();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    let (chain, handles) = config
        .policies
        .build()
        .context("Invalid policy configuration")?;
    let (command, args) = cli.backend();

    info!(
        agent = %config.agent.name,
        trust_level = ?config.agent.trust_level,
        policies = ?chain.names(),
        cmd = %command,
        args = ?args,
        "AgentBrake starting"
    );

    let tracker = SessionTracker::new(config.agent.trust_level);
    let mut interceptor = Interceptor::new(tracker, chain);
    if let Some(registry) = config.notifications.build_registry()? {
        interceptor = interceptor.with_notifiers(registry);
    }

    let mut proxy = BrakeProxy::new(command, args.to_vec(), interceptor);
    if let Some(circuit) = handles.circuit_breaker.clone() {
        proxy = proxy.with_observer(Arc::new(OutcomeObserver::new(circuit)));
    }

    let exit = proxy.run().await?;
    log_summary(&exit, &handles);

    // Exit without tearing down the runtime: the stdin reader may still be
    // parked in a blocking read.
    std::process::exit(exit.code());
}

fn log_summary(exit: &ProxyExit, handles: &PolicyHandles) {
    if let Some(budget) = &handles.budget {
        info!(
            spend = budget.spend(),
            remaining = budget.remaining(),
            percent_used = budget.percent_used(),
            "Budget at exit"
        );
    }
    if let Some(approval) = &handles.approval {
        for request in approval.pending() {
            warn!(id = %request.id, tool = %request.tool, "Approval still pending at exit");
        }
    }
    match exit {
        ProxyExit::Exited(code) => info!(code, "AgentBrake exiting"),
        ProxyExit::Killed(verdict) => warn!(
            policy = %verdict.policy_name,
            reason = %verdict.reason,
            "AgentBrake exiting after kill"
        ),
    }
}
