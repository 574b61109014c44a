use std::collections::BTreeMap;

use alloy::primitives::Address;

use crate::event::ChainEvent;

pub type ProposalId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
    Pending,
    Active,
    Passed,
    Failed,
}

impl ProposalStatus {
    /// Status is a pure function of the voting window, the tallies and the current time.
    /// It is recomputed on every tick and never cached across a time boundary.
    pub fn compute(
        start_time: u64,
        end_time: u64,
        votes_for: u64,
        votes_against: u64,
        now: u64,
    ) -> Self {
        if now < start_time {
            ProposalStatus::Pending
        } else if now <= end_time {
            ProposalStatus::Active
        } else if votes_for > votes_against {
            // A tie is Failed.
            ProposalStatus::Passed
        } else {
            ProposalStatus::Failed
        }
    }
}

/// Human-readable time left in a voting window, coarsening with distance: "2d 3h",
/// "3h 24m", "24m 10s", "10s", or "Ended" once the window has closed.
pub fn time_remaining(end_time: u64, now: u64) -> String {
    let Some(remaining) = end_time.checked_sub(now).filter(|r| *r > 0) else {
        return "Ended".to_string();
    };

    let days = remaining / 86_400;
    let hours = remaining % 86_400 / 3_600;
    let minutes = remaining % 3_600 / 60;
    let seconds = remaining % 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainVotes {
    pub votes_for: u64,
    pub votes_against: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub id: ProposalId,
    pub description: String,
    pub start_time: u64,
    pub end_time: u64,
    pub total_votes_for: u64,
    pub total_votes_against: u64,
    /// Per-chain tallies. The totals are always the sum of these.
    pub chain_votes: BTreeMap<u64, ChainVotes>,
    /// Every voter observed in a `VoteCasted` event for this proposal. The contract
    /// enforces one vote per voter, so this doubles as a dedup set for at-least-once
    /// event delivery, and lets viewer-relative fields be recomputed locally when the
    /// account changes.
    pub voters: BTreeMap<Address, bool>,
    pub has_voted: bool,
    pub user_vote_direction: Option<bool>,
    pub status: ProposalStatus,
}

/// The local view of all known proposals. Mirrors an append-only ledger: entries are
/// inserted and updated, never removed. The whole map can be discarded and rebuilt from
/// a full historical replay at any time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalMap {
    proposals: BTreeMap<ProposalId, Proposal>,
}

impl ProposalMap {
    pub fn get(&self, id: ProposalId) -> Option<&Proposal> {
        self.proposals.get(&id)
    }

    pub fn get_mut(&mut self, id: ProposalId) -> Option<&mut Proposal> {
        self.proposals.get_mut(&id)
    }

    pub fn contains(&self, id: ProposalId) -> bool {
        self.proposals.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    pub fn ids(&self) -> Vec<ProposalId> {
        self.proposals.keys().copied().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values()
    }

    pub fn insert(&mut self, proposal: Proposal) {
        self.proposals.insert(proposal.id, proposal);
    }

    /// Insert a newly created proposal with zero tallies. The immutable fields of the
    /// first occurrence win; a repeat creation event for a known id is a no-op.
    pub fn apply_created(
        &mut self,
        id: ProposalId,
        description: String,
        start_time: u64,
        end_time: u64,
        now: u64,
    ) {
        if self.proposals.contains_key(&id) {
            return;
        }

        self.proposals.insert(
            id,
            Proposal {
                id,
                description,
                start_time,
                end_time,
                total_votes_for: 0,
                total_votes_against: 0,
                chain_votes: BTreeMap::new(),
                voters: BTreeMap::new(),
                has_voted: false,
                user_vote_direction: None,
                status: ProposalStatus::compute(start_time, end_time, 0, 0, now),
            },
        );
    }

    /// Fold one vote into the proposal it targets, updating the total and the originating
    /// chain's tally. A repeated vote by a known voter is ignored, which makes the fold
    /// idempotent under duplicate event delivery.
    ///
    /// Returns `false` if the proposal is not (yet) known locally.
    pub fn apply_vote(
        &mut self,
        chain_id: u64,
        proposal_id: ProposalId,
        voter: Address,
        support: bool,
        viewer: Option<Address>,
        now: u64,
    ) -> bool {
        let Some(proposal) = self.proposals.get_mut(&proposal_id) else {
            return false;
        };

        if proposal.voters.contains_key(&voter) {
            return true;
        }
        proposal.voters.insert(voter, support);

        let chain = proposal.chain_votes.entry(chain_id).or_default();
        if support {
            proposal.total_votes_for += 1;
            chain.votes_for += 1;
        } else {
            proposal.total_votes_against += 1;
            chain.votes_against += 1;
        }

        if viewer == Some(voter) {
            proposal.has_voted = true;
            proposal.user_vote_direction = Some(support);
        }

        proposal.status = ProposalStatus::compute(
            proposal.start_time,
            proposal.end_time,
            proposal.total_votes_for,
            proposal.total_votes_against,
            now,
        );

        true
    }

    /// Recompute the viewer-relative fields from the vote ledger. Tallies are untouched.
    pub fn recompute_viewer(&mut self, viewer: Option<Address>) {
        for proposal in self.proposals.values_mut() {
            let direction = viewer.and_then(|v| proposal.voters.get(&v).copied());
            proposal.has_voted = direction.is_some();
            proposal.user_vote_direction = direction;
        }
    }

    /// Recompute every proposal's status against the given time, without refetching.
    pub fn refresh_statuses(&mut self, now: u64) {
        for proposal in self.proposals.values_mut() {
            proposal.status = ProposalStatus::compute(
                proposal.start_time,
                proposal.end_time,
                proposal.total_votes_for,
                proposal.total_votes_against,
                now,
            );
        }
    }

    /// Rebuild the whole map from per-chain event histories. Creations are merged first
    /// (first occurrence wins), then votes are folded per originating chain. Replaying
    /// the identical histories twice yields identical maps.
    pub fn rebuild(
        history: &[(u64, Vec<ChainEvent>)],
        viewer: Option<Address>,
        now: u64,
    ) -> Self {
        let mut map = ProposalMap::default();

        for (_, events) in history {
            for event in events {
                if let ChainEvent::ProposalCreated {
                    proposal_id,
                    description,
                    start_time,
                    end_time,
                } = event
                {
                    map.apply_created(
                        *proposal_id,
                        description.clone(),
                        *start_time,
                        *end_time,
                        now,
                    );
                }
            }
        }

        for (chain_id, events) in history {
            for event in events {
                if let ChainEvent::VoteCasted {
                    proposal_id,
                    voter,
                    support,
                } = event
                {
                    map.apply_vote(*chain_id, *proposal_id, *voter, *support, viewer, now);
                }
            }
        }

        map
    }
}
