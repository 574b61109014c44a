use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
    sol_types::SolEvent,
};

use crate::{contracts::CrossChainVoting, error::Error};

/// Selector for log queries and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    ProposalCreated,
    VoteCasted,
    VoteSent,
}

impl EventKind {
    pub fn signature_hash(&self) -> B256 {
        match self {
            EventKind::ProposalCreated => CrossChainVoting::ProposalCreated::SIGNATURE_HASH,
            EventKind::VoteCasted => CrossChainVoting::VoteCasted::SIGNATURE_HASH,
            EventKind::VoteSent => CrossChainVoting::VoteSent::SIGNATURE_HASH,
        }
    }
}

/// A decoded contract event. Raw logs are validated and decoded at the adapter boundary;
/// everything above this layer only ever sees these tagged variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    ProposalCreated {
        proposal_id: u64,
        description: String,
        start_time: u64,
        end_time: u64,
    },
    VoteCasted {
        proposal_id: u64,
        voter: Address,
        support: bool,
    },
    /// A vote relayed from another chain towards the governance chain. Only surfaced as a
    /// notification; the corresponding `VoteCasted` is what updates tallies.
    VoteSent {
        source_chain_id: u64,
        proposal_id: u64,
        voter: Address,
        support: bool,
    },
}

impl ChainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChainEvent::ProposalCreated { .. } => EventKind::ProposalCreated,
            ChainEvent::VoteCasted { .. } => EventKind::VoteCasted,
            ChainEvent::VoteSent { .. } => EventKind::VoteSent,
        }
    }

    pub fn proposal_id(&self) -> u64 {
        match self {
            ChainEvent::ProposalCreated { proposal_id, .. }
            | ChainEvent::VoteCasted { proposal_id, .. }
            | ChainEvent::VoteSent { proposal_id, .. } => *proposal_id,
        }
    }

    /// Decode a raw log into a tagged event, rejecting malformed records.
    pub fn decode(kind: EventKind, log: &Log) -> Result<ChainEvent, Error> {
        match kind {
            EventKind::ProposalCreated => {
                let ev = log
                    .log_decode::<CrossChainVoting::ProposalCreated>()
                    .map_err(|e| Error::MalformedEvent(e.to_string()))?
                    .inner
                    .data;
                Ok(ChainEvent::ProposalCreated {
                    proposal_id: into_u64(ev.proposalId)?,
                    description: ev.description,
                    start_time: into_u64(ev.startTime)?,
                    end_time: into_u64(ev.endTime)?,
                })
            }
            EventKind::VoteCasted => {
                let ev = log
                    .log_decode::<CrossChainVoting::VoteCasted>()
                    .map_err(|e| Error::MalformedEvent(e.to_string()))?
                    .inner
                    .data;
                Ok(ChainEvent::VoteCasted {
                    proposal_id: into_u64(ev.proposalId)?,
                    voter: ev.voter,
                    support: ev.support,
                })
            }
            EventKind::VoteSent => {
                let ev = log
                    .log_decode::<CrossChainVoting::VoteSent>()
                    .map_err(|e| Error::MalformedEvent(e.to_string()))?
                    .inner
                    .data;
                Ok(ChainEvent::VoteSent {
                    source_chain_id: into_u64(ev.sourceChainId)?,
                    proposal_id: into_u64(ev.vote.proposalId)?,
                    voter: ev.vote.voter,
                    support: ev.vote.support,
                })
            }
        }
    }
}

fn into_u64(value: U256) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::MalformedEvent(format!("uint256 out of range: {value}")))
}
