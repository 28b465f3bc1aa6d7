use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::definition::JobCatalog;
use crate::leadership::Leadership;
use crate::scheduler::{JobAssigner, JobLedger, JobType, Placement, SharedLedger};

/// Notifications from process supervision and cluster membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A node is alive and can take placements.
    Heartbeat { node: String },
    /// An instance is running. Also used to rebuild the ledger after failover.
    InstanceStarted { job: String, node: String },
    /// An instance exited.
    InstanceFinished { job: String, node: String },
}

/// Scheduler node: feeds cluster events into the ledger and, while leader,
/// turns due jobs into placements.
pub struct Node<L: Leadership> {
    pub config: SchedulerConfig,
    pub ledger: SharedLedger,
    pub leadership: L,
    assigner: JobAssigner,
    was_leader: bool,
}

impl<L: Leadership> Node<L> {
    pub fn new(config: SchedulerConfig, catalog: JobCatalog, leadership: L) -> Self {
        let mut assigner = JobAssigner::new(config.node_timeout_ms);
        for node in config.initial_nodes() {
            assigner.register_node(&node);
        }

        Self {
            ledger: SharedLedger::new(JobLedger::new(catalog)),
            assigner,
            leadership,
            config,
            was_leader: false,
        }
    }

    /// Run until `shutdown` is cancelled or the placement receiver goes away.
    ///
    /// Three sources are multiplexed:
    /// 1. `shutdown` cancellation
    /// 2. cluster events, applied to the ledger on every node
    /// 3. the planning tick, acted upon only while leader
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ClusterEvent>,
        placements: mpsc::Sender<Placement>,
        shutdown: CancellationToken,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut events_open = true;

        tracing::info!(node_id = %self.config.node_id, "Scheduler loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(node_id = %self.config.node_id, "Scheduler loop stopped");
                    break;
                }

                event = events.recv(), if events_open => {
                    match event {
                        Some(event) => self.apply_event(event).await,
                        None => {
                            tracing::warn!("Cluster event channel closed");
                            events_open = false;
                        }
                    }
                }

                _ = tick.tick() => {
                    for placement in self.tick(Utc::now()).await {
                        if placements.send(placement).await.is_err() {
                            tracing::warn!("Placement receiver dropped, stopping scheduler loop");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One planning pass. Returns nothing unless this node is the leader.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Vec<Placement> {
        let is_leader = self.leadership.is_leader();
        if is_leader != self.was_leader {
            if is_leader {
                tracing::info!(node_id = %self.config.node_id, "Acquired leadership, planning enabled");
            } else {
                tracing::info!(node_id = %self.config.node_id, "Lost leadership, planning paused");
            }
            self.was_leader = is_leader;
        }
        if !is_leader {
            return Vec::new();
        }

        for node in self.assigner.check_dead_nodes() {
            tracing::debug!(node = %node, "Node missed heartbeats, not placing on it");
        }

        let assigner = &self.assigner;
        self.ledger
            .exclusive(|ledger| assigner.plan(ledger, now))
            .await
    }

    pub async fn apply_event(&mut self, event: ClusterEvent) {
        match event {
            ClusterEvent::Heartbeat { node } => {
                self.assigner.node_heartbeat(&node);
            }
            ClusterEvent::InstanceStarted { job, node } => {
                let result = self
                    .ledger
                    .exclusive(|ledger| {
                        let entry = ledger.get_or_create_entry(&job)?;
                        if entry.runs_on(&node) {
                            // Already recorded at placement time.
                            return Ok(());
                        }
                        entry.add_node(node.as_str())
                    })
                    .await;
                if let Err(e) = result {
                    tracing::warn!(job = %job, node = %node, error = %e, "Ignoring start report");
                }
            }
            ClusterEvent::InstanceFinished { job, node } => {
                let result = self
                    .ledger
                    .exclusive(|ledger| ledger.drop_node(&job, &node))
                    .await;
                if let Err(e) = result {
                    tracing::warn!(job = %job, node = %node, error = %e, "Ignoring finish report");
                }
            }
        }
    }
}

/// Placement consumer for a node running without process supervision.
///
/// Each placement is logged as dispatched. Batch instances are reported
/// finished right away so their quota and node are freed for the next
/// deadline; service instances stay recorded as running. Reports are sent
/// from their own task so a full event channel never stalls the node loop
/// that feeds `placements`.
pub async fn dispatch_standalone(
    mut placements: mpsc::Receiver<Placement>,
    events: mpsc::Sender<ClusterEvent>,
) {
    while let Some(placement) = placements.recv().await {
        tracing::info!(
            job = %placement.job,
            node = %placement.node,
            instance_id = %placement.instance_id,
            job_type = %placement.job_type,
            "Dispatching placement"
        );

        if placement.job_type == JobType::Batch {
            let events = events.clone();
            tokio::spawn(async move {
                let finished = ClusterEvent::InstanceFinished {
                    job: placement.job,
                    node: placement.node,
                };
                if events.send(finished).await.is_err() {
                    tracing::debug!("Event receiver dropped, finish report lost");
                }
            });
        }
    }
}
