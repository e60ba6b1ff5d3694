//! The membership consensus state machine.
//!
//! One engine instance lives on every seed behind the runtime's state
//! lock. Registrations and deaths follow the same majority-commit shape:
//! a single designated proposer (the seed that received the
//! `REGISTER_REQUEST`, or the seed whose dead-report window filled)
//! broadcasts a proposal, every seed votes exactly once, and the
//! proposer commits when yes-votes — its own implicit yes included —
//! reach `⌊n/2⌋ + 1` before the proposal deadline.
//!
//! Concurrent proposals for the *same* subject are resolved by the lower
//! proposer identity winning: the higher proposer withdraws its pending
//! entry and votes yes on the winner's proposal.

use {
    crate::{
        roster::SeedRoster,
        types::{EngineOutput, Outbound, PeerList},
    },
    gossipnet_wire::{NodeId, WireMessage},
    log::{debug, info, warn},
    std::{
        collections::{HashMap, HashSet},
        time::{Duration, Instant},
    },
};

/// Timing knobs for the consensus protocol.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// How long a proposal may gather votes before it is discarded.
    pub proposal_timeout: Duration,
    /// Dead reports older than this no longer count toward a proposal.
    pub report_window: Duration,
    /// Independent dead reports (distinct reporters) required before a
    /// death proposal starts.
    pub min_dead_reports: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            proposal_timeout: Duration::from_secs(3),
            report_window: Duration::from_secs(10),
            min_dead_reports: 2,
        }
    }
}

impl MembershipConfig {
    /// Short deadlines for hermetic tests.
    pub fn dev_default() -> Self {
        Self {
            proposal_timeout: Duration::from_millis(500),
            report_window: Duration::from_secs(5),
            min_dead_reports: 2,
        }
    }
}

/// A proposal this seed knows about, keyed by its subject.
#[derive(Debug)]
struct Proposal {
    proposer: NodeId,
    /// Vote tally; only populated (and only meaningful) when this seed
    /// is the proposer. The proposer's own yes is inserted at creation.
    votes: HashMap<NodeId, bool>,
    deadline: Instant,
}

impl Proposal {
    fn yes_count(&self) -> usize {
        self.votes.values().filter(|v| **v).count()
    }

    fn no_count(&self) -> usize {
        self.votes.values().filter(|v| !**v).count()
    }
}

/// What a registration or death proposal is about; selects the wire
/// message variants and log tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Register,
    Death,
}

/// The seed membership engine.
pub struct MembershipEngine {
    identity: NodeId,
    roster: SeedRoster,
    config: MembershipConfig,
    pl: PeerList,
    pending_registers: HashMap<NodeId, Proposal>,
    pending_deaths: HashMap<NodeId, Proposal>,
    /// Candidates whose `REGISTER_REQUEST` arrived here directly; they
    /// are answered (ACK/NACK) when their proposal resolves, whoever
    /// proposed it.
    local_requests: HashSet<NodeId>,
    /// Victim → reporter → time of report, pruned to the report window.
    dead_reports: HashMap<NodeId, HashMap<NodeId, Instant>>,
}

impl MembershipEngine {
    /// Create an engine for the seed `identity` over the configured
    /// roster.
    pub fn new(identity: NodeId, roster: SeedRoster, config: MembershipConfig) -> Self {
        Self {
            identity,
            roster,
            config,
            pl: PeerList::default(),
            pending_registers: HashMap::new(),
            pending_deaths: HashMap::new(),
            local_requests: HashSet::new(),
            dead_reports: HashMap::new(),
        }
    }

    /// Committed peer list snapshot (for `PL_REQUEST` and ACKs).
    pub fn peers(&self) -> Vec<NodeId> {
        self.pl.snapshot()
    }

    /// Number of committed peers.
    pub fn peer_count(&self) -> usize {
        self.pl.len()
    }

    // ── Registration ────────────────────────────────────────────────────

    /// A candidate asked this seed to join.
    pub fn on_register_request(&mut self, peer: NodeId, now: Instant) -> EngineOutput {
        info!("REGISTER_REQUEST {peer}");
        let mut output = EngineOutput::none();

        if self.pl.contains(&peer) {
            // Idempotent re-registration (e.g. a peer retrying after a
            // lost ACK): answer with the committed list immediately.
            debug!("{peer} already committed, acking");
            output.push(Outbound::Candidate(
                peer,
                WireMessage::RegisterAck {
                    peers: self.pl.snapshot(),
                },
            ));
            return output;
        }

        self.local_requests.insert(peer.clone());

        if self.pending_registers.contains_key(&peer) {
            // A proposal is already in flight (possibly ours, possibly a
            // peer seed's); the requester is answered when it resolves.
            debug!("registration of {peer} already pending");
            return output;
        }

        let mut votes = HashMap::new();
        votes.insert(self.identity.clone(), true);
        self.pending_registers.insert(
            peer.clone(),
            Proposal {
                proposer: self.identity.clone(),
                votes,
                deadline: now + self.config.proposal_timeout,
            },
        );
        info!(
            "REGISTER_PROPOSAL {peer} broadcast to {} seed(s)",
            self.roster.len().saturating_sub(1)
        );
        output.push(Outbound::Seeds(WireMessage::RegisterProposal {
            peer: peer.clone(),
            proposer: self.identity.clone(),
        }));
        // A single-seed roster reaches quorum on its own vote.
        output.merge(self.try_commit(Subject::Register, &peer));
        output
    }

    /// A peer seed asked for our vote on admitting `peer`.
    pub fn on_register_proposal(
        &mut self,
        peer: NodeId,
        proposer: NodeId,
        now: Instant,
    ) -> EngineOutput {
        info!("REGISTER_PROPOSAL {peer} from {proposer}");
        let vote = self.decide_vote(Subject::Register, &peer, &proposer, now);
        info!("REGISTER_VOTE {peer} vote={vote}");
        let mut output = EngineOutput::none();
        output.push(Outbound::Seed(
            proposer,
            WireMessage::RegisterVote {
                peer,
                vote,
                voter: self.identity.clone(),
            },
        ));
        output
    }

    /// A peer seed's vote on our registration proposal.
    pub fn on_register_vote(&mut self, peer: NodeId, vote: bool, voter: NodeId) -> EngineOutput {
        info!("REGISTER_VOTE {peer} voter={voter} vote={vote}");
        self.record_vote(Subject::Register, &peer, vote, voter);
        self.try_commit(Subject::Register, &peer)
    }

    /// Another seed committed a registration; apply it idempotently.
    pub fn on_register_commit(&mut self, peer: NodeId) -> EngineOutput {
        let mut output = EngineOutput::none();
        self.pending_registers.remove(&peer);
        if self.pl.insert(peer.clone()) {
            info!("REGISTER_COMMIT {peer} (synced, PL size {})", self.pl.len());
        }
        if self.local_requests.remove(&peer) {
            output.push(Outbound::Candidate(
                peer,
                WireMessage::RegisterAck {
                    peers: self.pl.snapshot(),
                },
            ));
        }
        output
    }

    // ── Death ───────────────────────────────────────────────────────────

    /// A peer reported `victim` dead after its neighborhood quorum.
    pub fn on_dead_report(&mut self, victim: NodeId, reporter: NodeId, now: Instant) -> EngineOutput {
        info!("DEAD_REPORT victim={victim} reporter={reporter}");
        if !self.pl.contains(&victim) {
            debug!("dead report for unknown/removed peer {victim}");
            return EngineOutput::none();
        }

        let window = self.config.report_window;
        let reports = self.dead_reports.entry(victim.clone()).or_default();
        reports.retain(|_, at| now.duration_since(*at) <= window);
        reports.insert(reporter, now);
        let distinct = reports.len();

        if distinct < self.config.min_dead_reports {
            debug!(
                "death of {victim} needs {} distinct report(s), have {distinct}",
                self.config.min_dead_reports
            );
            return EngineOutput::none();
        }
        if self.pending_deaths.contains_key(&victim) {
            return EngineOutput::none();
        }

        let mut votes = HashMap::new();
        votes.insert(self.identity.clone(), true);
        self.pending_deaths.insert(
            victim.clone(),
            Proposal {
                proposer: self.identity.clone(),
                votes,
                deadline: now + self.config.proposal_timeout,
            },
        );
        info!("DEAD_PROPOSAL {victim} broadcast ({distinct} reports)");
        let mut output = EngineOutput::none();
        output.push(Outbound::Seeds(WireMessage::DeadProposal {
            victim: victim.clone(),
            proposer: self.identity.clone(),
        }));
        output.merge(self.try_commit(Subject::Death, &victim));
        output
    }

    /// A peer seed asked for our vote on evicting `victim`.
    pub fn on_dead_proposal(
        &mut self,
        victim: NodeId,
        proposer: NodeId,
        now: Instant,
    ) -> EngineOutput {
        info!("DEAD_PROPOSAL {victim} from {proposer}");
        let vote = self.decide_vote(Subject::Death, &victim, &proposer, now);
        info!("DEAD_VOTE {victim} vote={vote}");
        let mut output = EngineOutput::none();
        output.push(Outbound::Seed(
            proposer,
            WireMessage::DeadVote {
                victim,
                vote,
                voter: self.identity.clone(),
            },
        ));
        output
    }

    /// A peer seed's vote on our death proposal.
    pub fn on_dead_vote(&mut self, victim: NodeId, vote: bool, voter: NodeId) -> EngineOutput {
        info!("DEAD_VOTE {victim} voter={voter} vote={vote}");
        self.record_vote(Subject::Death, &victim, vote, voter);
        self.try_commit(Subject::Death, &victim)
    }

    /// Another seed committed an eviction; apply it idempotently.
    pub fn on_dead_confirmed(&mut self, victim: NodeId) -> EngineOutput {
        self.pending_deaths.remove(&victim);
        self.dead_reports.remove(&victim);
        if self.pl.remove(&victim) {
            info!("DEAD_CONFIRMED {victim} (synced, PL size {})", self.pl.len());
        }
        EngineOutput::none()
    }

    // ── Deadlines ───────────────────────────────────────────────────────

    /// Resolve expired proposals and prune the dead-report window.
    /// Driven by the runtime's reaper ticker.
    pub fn expire(&mut self, now: Instant) -> EngineOutput {
        let mut output = EngineOutput::none();

        let lapsed: Vec<NodeId> = self
            .pending_registers
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in lapsed {
            let proposal = match self.pending_registers.remove(&peer) {
                Some(p) => p,
                None => continue,
            };
            warn!(
                "registration of {peer} timed out (proposer {}, {} yes)",
                proposal.proposer,
                proposal.yes_count()
            );
            if self.local_requests.remove(&peer) {
                output.push(Outbound::Candidate(peer, WireMessage::RegisterNack));
            }
        }

        let lapsed: Vec<NodeId> = self
            .pending_deaths
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(victim, _)| victim.clone())
            .collect();
        for victim in lapsed {
            self.pending_deaths.remove(&victim);
            warn!("death proposal for {victim} timed out");
        }

        let window = self.config.report_window;
        self.dead_reports.retain(|_, reports| {
            reports.retain(|_, at| now.duration_since(*at) <= window);
            !reports.is_empty()
        });

        output
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn pending_mut(&mut self, subject: Subject) -> &mut HashMap<NodeId, Proposal> {
        match subject {
            Subject::Register => &mut self.pending_registers,
            Subject::Death => &mut self.pending_deaths,
        }
    }

    /// Decide our vote on an inbound proposal, recording a pending entry
    /// (or resolving a same-subject conflict by proposer identity).
    fn decide_vote(
        &mut self,
        subject: Subject,
        target: &NodeId,
        proposer: &NodeId,
        now: Instant,
    ) -> bool {
        // Membership precondition: a registration needs the candidate
        // absent, an eviction needs the victim present.
        let precondition = match subject {
            Subject::Register => !self.pl.contains(target),
            Subject::Death => self.pl.contains(target),
        };
        if !precondition {
            return false;
        }

        let deadline = now + self.config.proposal_timeout;
        let me = self.identity.clone();
        let pending = self.pending_mut(subject);
        match pending.get_mut(target) {
            None => {
                pending.insert(
                    target.clone(),
                    Proposal {
                        proposer: proposer.clone(),
                        votes: HashMap::new(),
                        deadline,
                    },
                );
                true
            }
            Some(existing) if existing.proposer == *proposer => {
                // Duplicate delivery; repeat our yes.
                true
            }
            Some(existing) => {
                // Conflicting proposers for the same subject: lower
                // identity wins. Withdraw the loser's entry.
                if *proposer < existing.proposer {
                    let withdrawn = existing.proposer.clone();
                    existing.proposer = proposer.clone();
                    existing.votes.clear();
                    existing.deadline = deadline;
                    if withdrawn == me {
                        debug!("withdrawing own proposal for {target} in favor of {proposer}");
                    }
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_vote(&mut self, subject: Subject, target: &NodeId, vote: bool, voter: NodeId) {
        let me = self.identity.clone();
        if !self.roster.contains(&voter) {
            warn!("discarding vote from unconfigured seed {voter}");
            return;
        }
        if let Some(proposal) = self.pending_mut(subject).get_mut(target) {
            if proposal.proposer == me {
                proposal.votes.insert(voter, vote);
            }
        }
    }

    /// Commit or reject our own proposal once the tally allows it.
    fn try_commit(&mut self, subject: Subject, target: &NodeId) -> EngineOutput {
        let quorum = self.roster.quorum();
        let n = self.roster.len();
        let me = self.identity.clone();
        let decision = {
            match self.pending_mut(subject).get(target) {
                Some(p) if p.proposer == me => {
                    if p.yes_count() >= quorum {
                        Some(true)
                    } else if p.no_count() > n - quorum {
                        // Quorum is no longer reachable; fail fast.
                        Some(false)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        let mut output = EngineOutput::none();
        match decision {
            None => {}
            Some(true) => {
                self.pending_mut(subject).remove(target);
                match subject {
                    Subject::Register => {
                        self.pl.insert(target.clone());
                        info!("REGISTER_COMMIT {target} (PL size {})", self.pl.len());
                        output.push(Outbound::Seeds(WireMessage::RegisterCommit {
                            peer: target.clone(),
                        }));
                        if self.local_requests.remove(target) {
                            output.push(Outbound::Candidate(
                                target.clone(),
                                WireMessage::RegisterAck {
                                    peers: self.pl.snapshot(),
                                },
                            ));
                        }
                    }
                    Subject::Death => {
                        self.pl.remove(target);
                        self.dead_reports.remove(target);
                        info!("DEAD_CONFIRMED {target} (PL size {})", self.pl.len());
                        let confirm = WireMessage::DeadConfirmed {
                            victim: target.clone(),
                        };
                        output.push(Outbound::Seeds(confirm.clone()));
                        output.push(Outbound::Peers(confirm));
                    }
                }
            }
            Some(false) => {
                self.pending_mut(subject).remove(target);
                warn!("{subject:?} proposal for {target} rejected by majority");
                if subject == Subject::Register && self.local_requests.remove(target) {
                    output.push(Outbound::Candidate(target.clone(), WireMessage::RegisterNack));
                }
            }
        }
        output
    }
}
