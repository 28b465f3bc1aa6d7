use crate::rule::Constraint;
use crate::scheduler::job::JobEntry;

/// Drives jobs tagged `tag` to exactly `target_instances` instances, each on
/// a distinct node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replicate {
    pub tag: String,
    pub target_instances: u32,
}

impl Replicate {
    pub fn new(tag: impl Into<String>, target_instances: u32) -> Self {
        Self {
            tag: tag.into(),
            target_instances,
        }
    }

    fn instances(&self, running: &[&JobEntry]) -> usize {
        running
            .iter()
            .filter(|j| j.has_tag(&self.tag))
            .map(|j| j.nodes().len())
            .sum()
    }
}

impl Constraint for Replicate {
    fn can_run(&self, job: &JobEntry, running: &[&JobEntry]) -> bool {
        if !job.has_tag(&self.tag) {
            return true;
        }

        self.instances(running) < self.target_instances as usize
    }

    fn can_run_on(&self, node: &str, job: &JobEntry, running: &[&JobEntry]) -> bool {
        if !job.has_tag(&self.tag) {
            return true;
        }

        !running.iter().any(|j| j.has_tag(&self.tag) && j.runs_on(node))
    }

    fn satisfied(&self, running: &[&JobEntry]) -> bool {
        self.instances(running) == self.target_instances as usize
    }
}
