use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::scheduler::job::JobType;
use crate::scheduler::ledger::JobLedger;

/// A decision to start one instance of a job on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub instance_id: Uuid,
    pub job: String,
    pub job_type: JobType,
    pub node: String,
    pub run_at: DateTime<Utc>,
}

/// Node liveness tracking
#[derive(Debug, Clone)]
pub struct NodeState {
    pub id: String,
    pub last_heartbeat: Instant,
}

impl NodeState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            last_heartbeat: Instant::now(),
        }
    }

    pub fn update_heartbeat(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    pub fn is_alive(&self, timeout_ms: u64) -> bool {
        self.last_heartbeat.elapsed().as_millis() < timeout_ms as u128
    }
}

/// Turns due deadlines into placements on live nodes.
#[derive(Debug, Default)]
pub struct JobAssigner {
    nodes: HashMap<String, NodeState>,
    node_timeout_ms: u64,
}

impl JobAssigner {
    pub fn new(node_timeout_ms: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            node_timeout_ms,
        }
    }

    /// Register a node
    pub fn register_node(&mut self, node: &str) {
        self.nodes.insert(node.to_string(), NodeState::new(node));
        tracing::info!(node = %node, "Node registered");
    }

    /// Update node heartbeat
    pub fn node_heartbeat(&mut self, node: &str) {
        if let Some(state) = self.nodes.get_mut(node) {
            state.update_heartbeat();
        } else {
            self.register_node(node);
        }
    }

    /// Live nodes, sorted by id
    pub fn live_nodes(&self) -> Vec<String> {
        let mut live: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.is_alive(self.node_timeout_ms))
            .map(|n| n.id.clone())
            .collect();
        live.sort();
        live
    }

    /// Nodes whose heartbeat has lapsed
    pub fn check_dead_nodes(&self) -> Vec<String> {
        let mut dead: Vec<String> = self
            .nodes
            .values()
            .filter(|n| !n.is_alive(self.node_timeout_ms))
            .map(|n| n.id.clone())
            .collect();
        dead.sort();
        dead
    }

    /// Run one planning pass over every schedulable job.
    ///
    /// Must be called with exclusive access to the ledger: each placement is
    /// recorded before the next job is evaluated. A job that fails is logged
    /// and skipped.
    pub fn plan(&self, ledger: &mut JobLedger, now: DateTime<Utc>) -> Vec<Placement> {
        let live = self.live_nodes();
        let mut placements = Vec::new();

        for name in ledger.schedulable_jobs() {
            match Self::plan_job(ledger, &name, &live, now) {
                Ok(mut planned) => placements.append(&mut planned),
                Err(e) => tracing::warn!(job = %name, error = %e, "Skipping job"),
            }
        }

        placements
    }

    fn plan_job(
        ledger: &mut JobLedger,
        name: &str,
        live: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<Placement>> {
        let entry = ledger.get_or_create_entry(name)?;
        let due = entry.poll_deadline(now);
        let job_type = entry.job_type();

        if entry.is_exhausted() && !entry.is_running() {
            ledger.remove_entry(name);
            tracing::info!(job = %name, "Schedule exhausted, job retired");
            return Ok(Vec::new());
        }

        let Some(run_at) = due else {
            return Ok(Vec::new());
        };

        let wanted = match job_type {
            JobType::Batch => 1,
            // At most one instance per node per round.
            JobType::Service => live.len(),
        };

        let mut placements = Vec::new();
        while placements.len() < wanted {
            if job_type == JobType::Service && ledger.is_satisfied(name) {
                break;
            }

            let admission = ledger.evaluate_admission(name, live)?;
            if !admission.is_placeable() {
                tracing::debug!(
                    job = %name,
                    admitted = admission.admitted,
                    "Job held by rules"
                );
                break;
            }

            let Some(node) = Self::pick_node(ledger, &admission.candidates) else {
                break;
            };
            ledger.add_node(name, &node)?;

            let placement = Placement {
                instance_id: Uuid::new_v4(),
                job: name.to_string(),
                job_type,
                node,
                run_at,
            };
            tracing::info!(
                job = %placement.job,
                node = %placement.node,
                instance_id = %placement.instance_id,
                run_at = %placement.run_at,
                "Job placed"
            );
            placements.push(placement);
        }

        let settled = !placements.is_empty()
            || (job_type == JobType::Service && ledger.is_satisfied(name));
        if settled {
            ledger.get_or_create_entry(name)?.consume_deadline(now);
        }

        Ok(placements)
    }

    /// Least loaded candidate, ties broken by node id.
    fn pick_node(ledger: &JobLedger, candidates: &[String]) -> Option<String> {
        candidates
            .iter()
            .min_by(|a, b| {
                ledger
                    .load_of(a)
                    .cmp(&ledger.load_of(b))
                    .then_with(|| a.cmp(b))
            })
            .cloned()
    }
}
