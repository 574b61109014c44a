use std::sync::Arc;

use alloy::primitives::TxHash;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    client::{ChainClient, VotingCall},
    error::Error,
};

/// Where an in-flight transaction is in its lifecycle. Observed through
/// [`TxSubmitter::phase`]; the UI disables the triggering control while this is not
/// `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Idle,
    /// Submitted, awaiting inclusion.
    Pending,
    /// Included, awaiting confirmation.
    Confirming,
}

/// Submits voting transactions to one chain, one at a time.
///
/// Every call settles to an explicit result: either the transaction hash or a typed
/// [`Error`] carrying a human-readable reason. The phase always returns to `Idle` on
/// settlement, success or failure.
pub struct TxSubmitter {
    client: Arc<dyn ChainClient>,
    phase: watch::Sender<TxPhase>,
}

impl TxSubmitter {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        TxSubmitter {
            client,
            phase: watch::Sender::new(TxPhase::Idle),
        }
    }

    pub fn phase(&self) -> watch::Receiver<TxPhase> {
        self.phase.subscribe()
    }

    pub async fn cast_vote(&self, proposal_id: u64, support: bool) -> Result<TxHash, Error> {
        self.submit(VotingCall::CastVote {
            proposal_id,
            support,
        })
        .await
    }

    pub async fn create_proposal(
        &self,
        description: String,
        voting_period: u64,
    ) -> Result<TxHash, Error> {
        self.submit(VotingCall::CreateProposal {
            description,
            voting_period,
        })
        .await
    }

    async fn submit(&self, call: VotingCall) -> Result<TxHash, Error> {
        // Check-and-set in one step, so two concurrent callers cannot both pass the gate.
        let mut claimed = false;
        self.phase.send_if_modified(|phase| {
            if *phase == TxPhase::Idle {
                *phase = TxPhase::Pending;
                claimed = true;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(Error::InFlight);
        }

        let result = self.drive(call).await;
        self.phase.send_replace(TxPhase::Idle);

        match &result {
            Ok(tx_hash) => {
                info!(chain_id = self.client.chain_id(), %tx_hash, "transaction confirmed")
            }
            Err(err) => warn!(chain_id = self.client.chain_id(), %err, "transaction failed"),
        }
        result
    }

    async fn drive(&self, call: VotingCall) -> Result<TxHash, Error> {
        let pending = self.client.submit(call).await?;
        self.phase.send_replace(TxPhase::Confirming);
        self.client.wait_for_receipt(&pending).await?;
        Ok(pending.tx_hash)
    }
}
