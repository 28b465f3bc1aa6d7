use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Invalid recurrence for {field}: {reason}")]
    InvalidRecurrence { field: &'static str, reason: String },

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Limit rule for tag {0:?} sets neither quota nor avoid")]
    AmbiguousRule(String),

    #[error("Invalid rule for tag {tag:?}: {reason}")]
    InvalidRule { tag: String, reason: String },

    #[error("Invalid job definition {name:?}: {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("Job {job} already has an instance on node {node}")]
    NodeAlreadyRunning { job: String, node: String },

    #[error("Job {job} is not running on node {node}")]
    NodeNotRunning { job: String, node: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SchedulerError {
    pub(crate) fn recurrence(field: &'static str, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidRecurrence {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
