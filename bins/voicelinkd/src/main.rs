// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! voicelinkd: loads agent definitions from YAML and runs them until
//! interrupted. Failed agents are reported in the periodic status log
//! and never restarted automatically.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tokio::time::{interval, Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vl_agent::AgentManager;
use vl_core::AgentConfig;

/// SIP-to-websocket voice gateway daemon
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the YAML agent configuration
    #[arg(long, default_value = "voicelink.yaml")]
    config: PathBuf,
    /// Maximum number of concurrently running agents
    #[arg(long, default_value_t = 16)]
    max_agents: usize,
    /// Seconds between status log lines (0 disables)
    #[arg(long, default_value_t = 30)]
    status_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
struct DaemonConfig {
    agents: Vec<AgentConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let raw = tokio::fs::read_to_string(&args.config)
        .await
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config: DaemonConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing {}", args.config.display()))?;

    let manager = AgentManager::new(args.max_agents);
    for agent in config.agents {
        let agent = agent.finalize();
        let name = agent.agent_name.clone();
        manager
            .start_agent(agent)
            .with_context(|| format!("starting agent {}", name))?;
        info!(agent = %name, "agent started");
    }
    info!(agents = manager.len(), "voicelinkd up");

    if args.status_interval_secs > 0 {
        let mut status_timer = interval(Duration::from_secs(args.status_interval_secs));
        status_timer.tick().await; // immediate first tick, skip it
        loop {
            tokio::select! {
                _ = status_timer.tick() => {
                    for row in manager.status() {
                        info!(
                            agent = %row.name,
                            sip = %row.sip_state,
                            ws_close = row.ws_close_code,
                            "status"
                        );
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
    } else {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutting down");
    Ok(())
}
