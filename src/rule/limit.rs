use crate::rule::Constraint;
use crate::scheduler::job::JobEntry;

/// Caps how many jobs carrying `tag` may run at the same time, cluster wide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub tag: String,
    pub maximum_concurrent: u32,
}

impl Quota {
    pub fn new(tag: impl Into<String>, maximum_concurrent: u32) -> Self {
        Self {
            tag: tag.into(),
            maximum_concurrent,
        }
    }
}

impl Constraint for Quota {
    fn can_run(&self, job: &JobEntry, running: &[&JobEntry]) -> bool {
        if !job.has_tag(&self.tag) {
            return true;
        }

        let count = running.iter().filter(|j| j.has_tag(&self.tag)).count();
        count < self.maximum_concurrent as usize
    }

    fn can_run_on(&self, _node: &str, _job: &JobEntry, _running: &[&JobEntry]) -> bool {
        true
    }

    fn satisfied(&self, _running: &[&JobEntry]) -> bool {
        true
    }
}

/// Keeps a job tagged `tag` off any node already running a job tagged `avoid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclude {
    pub tag: String,
    pub avoid: String,
}

impl Exclude {
    pub fn new(tag: impl Into<String>, avoid: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            avoid: avoid.into(),
        }
    }
}

impl Constraint for Exclude {
    fn can_run(&self, _job: &JobEntry, _running: &[&JobEntry]) -> bool {
        true
    }

    fn can_run_on(&self, node: &str, job: &JobEntry, running: &[&JobEntry]) -> bool {
        if !job.has_tag(&self.tag) {
            return true;
        }

        !running
            .iter()
            .any(|j| j.has_tag(&self.avoid) && j.runs_on(node))
    }

    fn satisfied(&self, _running: &[&JobEntry]) -> bool {
        true
    }
}
