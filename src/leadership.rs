use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers whether this process currently holds cluster leadership.
///
/// Election itself belongs to the coordination service; only the leader
/// evaluates admission and mutates the ledger.
pub trait Leadership: Send + Sync {
    fn is_leader(&self) -> bool;
}

/// Leadership state flipped by whatever runs the election.
#[derive(Debug, Clone, Default)]
pub struct LeaderFlag {
    inner: Arc<AtomicBool>,
}

impl LeaderFlag {
    pub fn new(is_leader: bool) -> Self {
        Self {
            inner: Arc::new(AtomicBool::new(is_leader)),
        }
    }

    pub fn set(&self, is_leader: bool) {
        self.inner.store(is_leader, Ordering::SeqCst);
    }
}

impl Leadership for LeaderFlag {
    fn is_leader(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}
