// voicelink - SIP-to-websocket voice gateway
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Registry of running agents.
//!
//! Each agent gets its own task; a failed agent stays listed with its
//! terminal state until it is removed, and is never restarted
//! automatically. The control plane decides what to do with failures.

use std::sync::Arc;

use anyhow::{bail, Result};
use dashmap::DashMap;
use smol_str::SmolStr;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use vl_core::{AgentConfig, SharedAgentState, SipState};

use crate::agent::AgentOrchestrator;

/// One row of the control-plane status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    pub name: SmolStr,
    pub sip_state: SipState,
    pub ws_close_code: u16,
}

struct AgentEntry {
    state: SharedAgentState,
    task: JoinHandle<()>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

pub struct AgentManager {
    agents: DashMap<SmolStr, AgentEntry>,
    slots: Arc<Semaphore>,
}

impl AgentManager {
    pub fn new(max_agents: usize) -> Self {
        AgentManager {
            agents: DashMap::new(),
            slots: Arc::new(Semaphore::new(max_agents)),
        }
    }

    /// Spawns an agent for the given config. Fails when the name is
    /// already taken or all agent slots are in use.
    pub fn start_agent(&self, config: AgentConfig) -> Result<SharedAgentState> {
        let name = config.agent_name.clone();
        if self.agents.contains_key(&name) {
            bail!("agent {} is already running", name);
        }
        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            bail!("all agent slots are in use");
        };

        let state = SharedAgentState::new(name.clone());
        let orchestrator = AgentOrchestrator::new(Arc::new(config), state.clone());
        let task_state = state.clone();
        let task = tokio::spawn(async move {
            match orchestrator.run().await {
                Ok(()) => info!(agent = %task_state.name(), "agent finished"),
                Err(e) => {
                    // Contain the failure to this agent; the entry
                    // stays queryable with its terminal state.
                    error!(agent = %task_state.name(), error = %e, "agent failed");
                }
            }
        });

        self.agents.insert(
            name,
            AgentEntry {
                state: state.clone(),
                task,
                _permit: permit,
            },
        );
        Ok(state)
    }

    /// Aborts the agent's task and frees its slot.
    pub fn remove_agent(&self, name: &str) -> bool {
        match self.agents.remove(name) {
            Some((_, entry)) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> Vec<AgentStatus> {
        let mut rows: Vec<AgentStatus> = self
            .agents
            .iter()
            .map(|entry| AgentStatus {
                name: entry.key().clone(),
                sip_state: entry.value().state.sip_state(),
                ws_close_code: entry.value().state.ws_close_code(),
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    pub fn agent_state(&self, name: &str) -> Option<SharedAgentState> {
        self.agents.get(name).map(|entry| entry.state.clone())
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named_config(name: &str) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.agent_name = SmolStr::new(name);
        // Ephemeral ports; these agents never register in this test.
        config.sip_local_port = 0;
        config.rtp_local_port = 0;
        config.finalize()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn duplicate_names_are_rejected() {
        let manager = AgentManager::new(4);
        manager.start_agent(named_config("a")).unwrap();
        assert!(manager.start_agent(named_config("a")).is_err());
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slots_are_bounded_and_freed_on_remove() {
        let manager = AgentManager::new(2);
        manager.start_agent(named_config("a")).unwrap();
        manager.start_agent(named_config("b")).unwrap();
        assert!(manager.start_agent(named_config("c")).is_err());

        assert!(manager.remove_agent("a"));
        manager.start_agent(named_config("c")).unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn status_lists_agents_by_name() {
        let manager = AgentManager::new(4);
        manager.start_agent(named_config("b")).unwrap();
        manager.start_agent(named_config("a")).unwrap();

        let rows = manager.status();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name.as_str(), "a");
        assert_eq!(rows[1].name.as_str(), "b");
        assert_eq!(rows[0].sip_state, SipState::Unregistered);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn removing_unknown_agent_is_a_noop() {
        let manager = AgentManager::new(1);
        assert!(!manager.remove_agent("ghost"));
    }
}
