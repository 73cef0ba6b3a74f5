//! Leader-based Raft consensus: an alternative, simpler agreement path to
//! PBFT. Implements election, log replication, and the standard Raft
//! commit rule (majority **and** leader's current term).

pub mod rpc;

use crate::error::ConsensusError;
use crate::traits::{ProposalSink, RaftTransport};
use crate::types::{AgentId, LogEntry, Proposal, RaftRole, Term};
use async_trait::async_trait;
use concord_core::{
    ClusterConfig, ConcordResult, EventBus, HealthLevel, HealthStatus, Observable, ObservableState,
    ObservableStatus, ConcordEvent,
};
use parking_lot::RwLock;
use rpc::{AppendEntriesArgs, AppendEntriesReply, RequestVoteArgs, RequestVoteReply};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

struct RaftState {
    role: RaftRole,
    current_term: Term,
    voted_for: Option<AgentId>,
    log: Vec<LogEntry>,
    commit_index: u64,
    leader_id: Option<AgentId>,
}

impl RaftState {
    fn last_log_index(&self) -> u64 {
        self.log.last().map_or(0, |e| e.index)
    }

    fn last_log_term(&self) -> Term {
        self.log.last().map_or(Term(0), |e| e.term)
    }

    fn entry_at(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.log.get((index - 1) as usize)
    }
}

/// The Raft consensus engine for one node.
pub struct RaftEngine<RT, S> {
    node_id: AgentId,
    peers: Vec<AgentId>,
    config: ClusterConfig,
    transport: Arc<RT>,
    sink: Arc<S>,
    events: Arc<EventBus>,
    state: RwLock<RaftState>,
}

impl<RT, S> RaftEngine<RT, S>
where
    RT: RaftTransport,
    S: ProposalSink,
{
    /// Construct a new Raft node starting as a follower in term 0.
    pub fn new(
        node_id: AgentId,
        peers: Vec<AgentId>,
        config: ClusterConfig,
        transport: Arc<RT>,
        sink: Arc<S>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            node_id,
            peers,
            config,
            transport,
            sink,
            events,
            state: RwLock::new(RaftState {
                role: RaftRole::Follower,
                current_term: Term(0),
                voted_for: None,
                log: Vec::new(),
                commit_index: 0,
                leader_id: None,
            }),
        }
    }

    /// Current role.
    #[must_use]
    pub fn role(&self) -> RaftRole {
        self.state.read().role
    }

    /// Current term.
    #[must_use]
    pub fn current_term(&self) -> Term {
        self.state.read().current_term
    }

    fn majority(&self) -> usize {
        (self.peers.len() + 1) / 2 + 1
    }

    /// Transition to candidate, vote for self, and solicit votes from every
    /// peer. Becomes leader if a majority (including self) grants a vote in
    /// the term this call started.
    pub async fn run_election(&self) -> ConcordResult<()> {
        let (term, args) = {
            let mut state = self.state.write();
            state.role = RaftRole::Candidate;
            state.current_term = state.current_term.next();
            state.voted_for = Some(self.node_id);
            let term = state.current_term;
            (
                term,
                RequestVoteArgs {
                    term,
                    candidate_id: self.node_id,
                    last_log_index: state.last_log_index(),
                    last_log_term: state.last_log_term(),
                },
            )
        };

        let mut votes = 1usize; // vote for self
        for peer in &self.peers {
            match self.transport.request_vote(*peer, args.clone()).await {
                Ok(reply) => {
                    if reply.term > term {
                        self.step_down(reply.term);
                        return Ok(());
                    }
                    if reply.vote_granted {
                        votes += 1;
                    }
                }
                Err(_) => continue,
            }
        }

        if votes >= self.majority() {
            let mut state = self.state.write();
            if state.current_term == term && state.role == RaftRole::Candidate {
                state.role = RaftRole::Leader;
                state.leader_id = Some(self.node_id);
                info!(?term, "elected Raft leader");
                drop(state);
                self.events.publish(ConcordEvent::LeaderElected { leader: self.node_id.0, term_or_view: term.0 });
            }
        }
        Ok(())
    }

    fn step_down(&self, new_term: Term) {
        let mut state = self.state.write();
        state.current_term = new_term;
        state.role = RaftRole::Follower;
        state.voted_for = None;
    }

    /// Handle an inbound `RequestVote` RPC.
    pub fn handle_request_vote(&self, args: RequestVoteArgs) -> RequestVoteReply {
        let mut state = self.state.write();
        if args.term < state.current_term {
            return RequestVoteReply { term: state.current_term, vote_granted: false };
        }
        if args.term > state.current_term {
            state.current_term = args.term;
            state.role = RaftRole::Follower;
            state.voted_for = None;
        }

        let log_ok = args.last_log_term > state.last_log_term()
            || (args.last_log_term == state.last_log_term() && args.last_log_index >= state.last_log_index());
        let can_vote = matches!(state.voted_for, None | Some(c) if c == args.candidate_id);

        if can_vote && log_ok {
            state.voted_for = Some(args.candidate_id);
            RequestVoteReply { term: state.current_term, vote_granted: true }
        } else {
            RequestVoteReply { term: state.current_term, vote_granted: false }
        }
    }

    /// Handle an inbound `AppendEntries` RPC (heartbeat when `entries` is empty).
    pub async fn handle_append_entries(&self, args: AppendEntriesArgs) -> ConcordResult<AppendEntriesReply> {
        let to_apply: Vec<LogEntry>;
        let reply;
        {
            let mut state = self.state.write();
            if args.term < state.current_term {
                return Ok(AppendEntriesReply { term: state.current_term, success: false, last_log_index: state.last_log_index() });
            }
            state.current_term = args.term;
            state.role = RaftRole::Follower;
            state.leader_id = Some(args.leader_id);

            if args.prev_log_index > 0 {
                match state.entry_at(args.prev_log_index) {
                    Some(entry) if entry.term == args.prev_log_term => {}
                    _ => {
                        return Ok(AppendEntriesReply {
                            term: state.current_term,
                            success: false,
                            last_log_index: state.last_log_index(),
                        });
                    }
                }
            }

            // Log matching: truncate any conflicting suffix, then append.
            let mut insert_at = args.prev_log_index as usize;
            for entry in &args.entries {
                if let Some(existing) = state.log.get(insert_at) {
                    if existing.term != entry.term {
                        state.log.truncate(insert_at);
                    } else {
                        insert_at += 1;
                        continue;
                    }
                }
                if state.log.len() == insert_at {
                    state.log.push(entry.clone());
                }
                insert_at += 1;
            }

            if args.leader_commit > state.commit_index {
                state.commit_index = args.leader_commit.min(state.last_log_index());
            }

            to_apply = state
                .log
                .iter()
                .filter(|e| e.index <= state.commit_index && !e.committed)
                .cloned()
                .collect();
            for entry in &to_apply {
                if let Some(stored) = state.log.get_mut((entry.index - 1) as usize) {
                    stored.committed = true;
                }
            }

            reply = AppendEntriesReply { term: state.current_term, success: true, last_log_index: state.last_log_index() };
        }

        for entry in to_apply {
            let proposal = Proposal::new(args.leader_id, entry.command.clone());
            self.sink.apply_committed(&proposal, entry.index).await?;
        }
        Ok(reply)
    }

    /// Leader-only: append a command to the local log and replicate it to
    /// every peer. Resolves once the entry is committed (stored on a
    /// majority, at the leader's current term) or the request times out.
    pub async fn append_command(&self, command: Vec<u8>) -> ConcordResult<u64> {
        let (term, entry, prev_index, prev_term) = {
            let mut state = self.state.write();
            if state.role != RaftRole::Leader {
                return Err(ConsensusError::NotLeader.into());
            }
            let term = state.current_term;
            let prev_index = state.last_log_index();
            let prev_term = state.last_log_term();
            let entry = LogEntry {
                index: prev_index + 1,
                term,
                command,
                timestamp: chrono::Utc::now(),
                committed: false,
            };
            state.log.push(entry.clone());
            (term, entry, prev_index, prev_term)
        };

        let args = AppendEntriesArgs {
            term,
            leader_id: self.node_id,
            prev_log_index: prev_index,
            prev_log_term: prev_term,
            entries: vec![entry.clone()],
            leader_commit: self.state.read().commit_index,
        };

        let mut acked = 1usize; // the leader itself
        for peer in &self.peers {
            if let Ok(reply) =
                tokio::time::timeout(self.config.consensus_timeout, self.transport.append_entries(*peer, args.clone())).await
            {
                match reply {
                    Ok(r) if r.success && r.term == term => acked += 1,
                    Ok(r) if r.term > term => {
                        self.step_down(r.term);
                        return Err(ConsensusError::NotLeader.into());
                    }
                    _ => {}
                }
            }
        }

        if acked >= self.majority() {
            let mut state = self.state.write();
            if entry.index > state.commit_index {
                state.commit_index = entry.index;
            }
            if let Some(stored) = state.log.get_mut((entry.index - 1) as usize) {
                stored.committed = true;
            }
            drop(state);
            let proposal = Proposal::new(self.node_id, entry.command.clone());
            self.sink.apply_committed(&proposal, entry.index).await?;
            debug!(index = entry.index, "Raft entry committed");
            Ok(entry.index)
        } else {
            Err(ConsensusError::NoQuorum.into())
        }
    }
}

#[async_trait]
impl<RT, S> Observable for RaftEngine<RT, S>
where
    RT: RaftTransport,
    S: ProposalSink,
{
    async fn status(&self) -> ConcordResult<ObservableStatus> {
        Ok(ObservableStatus {
            state: ObservableState::Running,
            last_updated: chrono::Utc::now(),
            metadata: HashMap::new(),
        })
    }

    async fn health(&self) -> ConcordResult<HealthStatus> {
        let overall = if self.state.read().leader_id.is_some() { HealthLevel::Healthy } else { HealthLevel::Degraded };
        Ok(HealthStatus { overall, checks: HashMap::new(), last_check: chrono::Utc::now() })
    }

    async fn metrics(&self) -> ConcordResult<HashMap<String, f64>> {
        let state = self.state.read();
        let mut metrics = HashMap::new();
        metrics.insert("current_term".to_string(), state.current_term.0 as f64);
        metrics.insert("commit_index".to_string(), state.commit_index as f64);
        metrics.insert("log_len".to_string(), state.log.len() as f64);
        Ok(metrics)
    }

    fn describe(&self) -> String {
        format!("RaftEngine(node={}, role={:?}, term={:?})", self.node_id, self.role(), self.current_term())
    }
}
