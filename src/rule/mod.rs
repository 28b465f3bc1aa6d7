//! Admission rules evaluated against the ledger of running jobs.
//!
//! Every rule answers three questions:
//!
//! - [`Constraint::can_run`]: may the job run at all right now?
//! - [`Constraint::can_run_on`]: may it run on this particular node?
//! - [`Constraint::satisfied`]: does the cluster already run enough instances?
//!
//! A rule only constrains jobs carrying its tag; for any other job all three
//! answers are `true`. Rules from every job definition are collected into one
//! flat list and evaluated independently.

pub mod availability;
pub mod limit;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::JobEntry;

pub use availability::Replicate;
pub use limit::{Exclude, Quota};

pub trait Constraint {
    fn can_run(&self, job: &JobEntry, running: &[&JobEntry]) -> bool;

    fn can_run_on(&self, node: &str, job: &JobEntry, running: &[&JobEntry]) -> bool;

    fn satisfied(&self, running: &[&JobEntry]) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Quota(Quota),
    Exclude(Exclude),
    Replicate(Replicate),
}

impl Rule {
    /// Tag a job must carry for this rule to constrain it.
    pub fn tag(&self) -> &str {
        match self {
            Rule::Quota(rule) => &rule.tag,
            Rule::Exclude(rule) => &rule.tag,
            Rule::Replicate(rule) => &rule.tag,
        }
    }

    pub fn applies_to(&self, job: &JobEntry) -> bool {
        job.has_tag(self.tag())
    }
}

impl Constraint for Rule {
    fn can_run(&self, job: &JobEntry, running: &[&JobEntry]) -> bool {
        match self {
            Rule::Quota(rule) => rule.can_run(job, running),
            Rule::Exclude(rule) => rule.can_run(job, running),
            Rule::Replicate(rule) => rule.can_run(job, running),
        }
    }

    fn can_run_on(&self, node: &str, job: &JobEntry, running: &[&JobEntry]) -> bool {
        match self {
            Rule::Quota(rule) => rule.can_run_on(node, job, running),
            Rule::Exclude(rule) => rule.can_run_on(node, job, running),
            Rule::Replicate(rule) => rule.can_run_on(node, job, running),
        }
    }

    fn satisfied(&self, running: &[&JobEntry]) -> bool {
        match self {
            Rule::Quota(rule) => rule.satisfied(running),
            Rule::Exclude(rule) => rule.satisfied(running),
            Rule::Replicate(rule) => rule.satisfied(running),
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rule::Quota(rule) => write!(f, "quota({}, {})", rule.tag, rule.maximum_concurrent),
            Rule::Exclude(rule) => write!(f, "exclude({}, {})", rule.tag, rule.avoid),
            Rule::Replicate(rule) => {
                write!(f, "replicate({}, {})", rule.tag, rule.target_instances)
            }
        }
    }
}

/// One tag or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(tag) => vec![tag],
            OneOrMany::Many(tags) => tags,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSpec {
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub quota: Option<u32>,
    #[serde(default)]
    pub avoid: Option<OneOrMany>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySpec {
    #[serde(default)]
    pub tag: Option<String>,
    pub instances: u32,
}

/// Rule descriptor as written in a job definition. The tag defaults to the
/// name of the job declaring the rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSpec {
    Limit(LimitSpec),
    Availability(AvailabilitySpec),
}

impl RuleSpec {
    pub fn compile(&self, job: &str) -> Result<Vec<Rule>> {
        match self {
            RuleSpec::Limit(spec) => {
                let tag = spec.tag.clone().unwrap_or_else(|| job.to_string());
                let avoid = spec.avoid.clone().map(OneOrMany::into_vec).unwrap_or_default();
                if spec.quota.is_none() && avoid.is_empty() {
                    return Err(SchedulerError::AmbiguousRule(tag));
                }

                let mut rules = Vec::with_capacity(1 + avoid.len());
                if let Some(quota) = spec.quota {
                    rules.push(Rule::Quota(Quota::new(tag.clone(), quota)));
                }
                rules.extend(
                    avoid
                        .into_iter()
                        .map(|avoid| Rule::Exclude(Exclude::new(tag.clone(), avoid))),
                );
                Ok(rules)
            }
            RuleSpec::Availability(spec) => {
                let tag = spec.tag.clone().unwrap_or_else(|| job.to_string());
                if spec.instances == 0 {
                    return Err(SchedulerError::InvalidRule {
                        tag,
                        reason: "replication target must be at least 1".to_string(),
                    });
                }
                Ok(vec![Rule::Replicate(Replicate::new(tag, spec.instances))])
            }
        }
    }
}
