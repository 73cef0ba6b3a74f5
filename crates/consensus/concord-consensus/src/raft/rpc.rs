//! Raft RPC payloads: `RequestVote` and `AppendEntries`.

use crate::types::{AgentId, LogEntry, Term};
use serde::{Deserialize, Serialize};

/// `RequestVote` arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteArgs {
    /// Candidate's term.
    pub term: Term,
    /// Candidate requesting the vote.
    pub candidate_id: AgentId,
    /// Index of the candidate's last log entry.
    pub last_log_index: u64,
    /// Term of the candidate's last log entry.
    pub last_log_term: Term,
}

/// `RequestVote` reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestVoteReply {
    /// The voter's current term, for the candidate to update itself.
    pub term: Term,
    /// Whether the vote was granted.
    pub vote_granted: bool,
}

/// `AppendEntries` arguments (also used as heartbeat when `entries` is empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesArgs {
    /// Leader's term.
    pub term: Term,
    /// So followers can redirect clients.
    pub leader_id: AgentId,
    /// Index of the log entry immediately preceding the new ones.
    pub prev_log_index: u64,
    /// Term of `prev_log_index`.
    pub prev_log_term: Term,
    /// Entries to append (empty for a heartbeat).
    pub entries: Vec<LogEntry>,
    /// Leader's commit index.
    pub leader_commit: u64,
}

/// `AppendEntries` reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    /// The follower's current term.
    pub term: Term,
    /// Whether the append succeeded (log matched at `prev_log_index`).
    pub success: bool,
    /// The follower's last log index, so the leader can fast-forward
    /// `nextIndex` on conflict instead of decrementing one at a time.
    pub last_log_index: u64,
}
