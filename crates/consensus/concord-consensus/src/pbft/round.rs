//! Per-`(view, seq)` bookkeeping for one PBFT round: which agents have
//! prepared/committed, and a notification fired once commit quorum lands.

use crate::types::Proposal;
use dashmap::DashSet;
use std::sync::atomic::AtomicBool;
use tokio::sync::Notify;

use crate::types::AgentId;

pub struct RoundState {
    pub digest: [u8; 32],
    #[allow(dead_code)]
    pub proposal: Proposal,
    pub prepares: DashSet<AgentId>,
    pub commits: DashSet<AgentId>,
    pub commit_broadcast: AtomicBool,
    notify: Notify,
    committed: AtomicBool,
}

impl RoundState {
    pub fn new(digest: [u8; 32], proposal: Proposal) -> Self {
        Self {
            digest,
            proposal,
            prepares: DashSet::new(),
            commits: DashSet::new(),
            commit_broadcast: AtomicBool::new(false),
            notify: Notify::new(),
            committed: AtomicBool::new(false),
        }
    }

    /// Mark this round committed and wake anyone awaiting it.
    pub fn signal_commit(&self) {
        use std::sync::atomic::Ordering;
        if !self.committed.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Wait until [`Self::signal_commit`] has been called.
    ///
    /// Registers interest in the notification *before* checking the flag so
    /// a `signal_commit` racing with this call is never missed.
    pub async fn wait_for_commit(&self) {
        use std::sync::atomic::Ordering;
        let notified = self.notify.notified();
        if self.committed.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}
