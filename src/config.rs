use std::path::PathBuf;

/// Runtime settings for a scheduler node.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Identifier of this node, also used as its placement target.
    pub node_id: String,
    /// Nodes registered at startup, before any heartbeat arrives.
    pub nodes: Vec<String>,
    /// How often the leader runs a planning pass.
    pub tick_interval_ms: u64,
    /// A node without a heartbeat for this long receives no placements.
    pub node_timeout_ms: u64,
    /// Capacity of the event and placement channels.
    pub event_buffer: usize,
    /// JSON file holding the job definitions.
    pub jobs_path: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            node_id: "node1".to_string(),
            nodes: Vec::new(),
            tick_interval_ms: 1000,
            node_timeout_ms: 5000,
            event_buffer: 100,
            jobs_path: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        let node = node.into();
        if !self.nodes.contains(&node) {
            self.nodes.push(node);
        }
        self
    }

    pub fn with_jobs_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.jobs_path = Some(path.into());
        self
    }

    /// Every node known at startup, this one included.
    pub fn initial_nodes(&self) -> Vec<String> {
        let mut nodes = self.nodes.clone();
        if !nodes.contains(&self.node_id) {
            nodes.insert(0, self.node_id.clone());
        }
        nodes
    }
}
