use std::time::Duration;

use alloy::{
    eips::BlockNumberOrTag,
    network::EthereumWallet,
    primitives::{Address, TxHash, U256},
    providers::{DynProvider, Provider, ProviderBuilder, WsConnect},
    rpc::types::Filter,
    signers::local::PrivateKeySigner,
};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use crate::{
    cfg::ChainConfig,
    contracts::CrossChainVoting,
    error::Error,
    event::{ChainEvent, EventKind},
};

/// A batch of decoded events from one chain's subscription.
pub type EventStream = futures::stream::BoxStream<'static, Vec<ChainEvent>>;

/// A transaction that has been submitted but not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTx {
    pub chain_id: u64,
    pub tx_hash: TxHash,
}

/// A call to one of the voting contract's state-changing functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VotingCall {
    CastVote { proposal_id: u64, support: bool },
    CreateProposal { description: String, voting_period: u64 },
}

/// The per-chain capability everything else is written against. One instance per
/// configured chain; the production implementation is [`RpcChainClient`].
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Fetch all matching historical events over the full chain history, optionally
    /// restricted to a single proposal.
    async fn fetch_events(
        &self,
        kind: EventKind,
        proposal_id: Option<u64>,
    ) -> Result<Vec<ChainEvent>, Error>;

    /// Subscribe to new matching events. Dropping the stream unsubscribes.
    async fn subscribe(&self, kind: EventKind) -> Result<EventStream, Error>;

    async fn submit(&self, call: VotingCall) -> Result<PendingTx, Error>;

    async fn wait_for_receipt(&self, tx: &PendingTx) -> Result<(), Error>;

    /// Direct read of the contract's `getVoterDirection` view. `None` means the voter has
    /// not voted on this proposal.
    async fn voter_direction(
        &self,
        proposal_id: u64,
        voter: Address,
    ) -> Result<Option<bool>, Error>;
}

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);
const RECEIPT_POLL_ATTEMPTS: u32 = 120;

/// Chain client over a websocket RPC provider.
pub struct RpcChainClient {
    pub rpc_url: String,
    provider: DynProvider,
    contract_address: Address,
    chain_id: u64,
}

impl RpcChainClient {
    pub async fn connect(
        config: &ChainConfig,
        contract_address: Address,
        signer: PrivateKeySigner,
    ) -> Result<Self, Error> {
        let ws = WsConnect::new(&config.rpc_url);
        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .on_ws(ws)
            .await
            .map_err(Error::transport)?
            .erased();
        let chain_id = provider.get_chain_id().await.map_err(Error::transport)?;

        Ok(RpcChainClient {
            rpc_url: config.rpc_url.clone(),
            provider,
            contract_address,
            chain_id,
        })
    }

    fn filter(&self, kind: EventKind, proposal_id: Option<u64>) -> Filter {
        let mut filter = Filter::new()
            .address(self.contract_address)
            .event_signature(kind.signature_hash())
            .from_block(BlockNumberOrTag::Earliest)
            .to_block(BlockNumberOrTag::Latest);
        // Only `ProposalCreated` indexes the proposal id; other kinds are filtered after
        // decoding.
        if kind == EventKind::ProposalCreated {
            if let Some(id) = proposal_id {
                filter = filter.topic1(U256::from(id));
            }
        }
        filter
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn fetch_events(
        &self,
        kind: EventKind,
        proposal_id: Option<u64>,
    ) -> Result<Vec<ChainEvent>, Error> {
        let filter = self.filter(kind, proposal_id);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(Error::transport)?;

        let mut events = Vec::with_capacity(logs.len());
        for log in &logs {
            match ChainEvent::decode(kind, log) {
                Ok(ev) => {
                    if proposal_id.is_none_or(|id| ev.proposal_id() == id) {
                        events.push(ev);
                    }
                }
                Err(err) => {
                    warn!(chain_id = self.chain_id, %err, "rejecting malformed event log");
                }
            }
        }

        Ok(events)
    }

    async fn subscribe(&self, kind: EventKind) -> Result<EventStream, Error> {
        let filter = Filter::new()
            .address(self.contract_address)
            .event_signature(kind.signature_hash());
        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(Error::transport)?;

        let chain_id = self.chain_id;
        let stream = subscription
            .into_stream()
            .filter_map(move |log| {
                futures::future::ready(match ChainEvent::decode(kind, &log) {
                    Ok(ev) => Some(vec![ev]),
                    Err(err) => {
                        warn!(chain_id, %err, "rejecting malformed event log");
                        None
                    }
                })
            })
            .boxed();

        Ok(stream)
    }

    async fn submit(&self, call: VotingCall) -> Result<PendingTx, Error> {
        let contract = CrossChainVoting::new(self.contract_address, self.provider.clone());
        let pending = match call {
            VotingCall::CastVote {
                proposal_id,
                support,
            } => {
                contract
                    .castVote(U256::from(proposal_id), support)
                    .send()
                    .await
            }
            VotingCall::CreateProposal {
                description,
                voting_period,
            } => {
                contract
                    .createProposal(description, U256::from(voting_period))
                    .send()
                    .await
            }
        }
        .map_err(Error::from_contract)?;

        Ok(PendingTx {
            chain_id: self.chain_id,
            tx_hash: *pending.tx_hash(),
        })
    }

    async fn wait_for_receipt(&self, tx: &PendingTx) -> Result<(), Error> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            if let Some(receipt) = self
                .provider
                .get_transaction_receipt(tx.tx_hash)
                .await
                .map_err(Error::transport)?
            {
                if receipt.status() {
                    return Ok(());
                }
                return Err(Error::Reverted {
                    reason: "transaction reverted".to_string(),
                });
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }

        Err(Error::Network(format!(
            "timed out waiting for receipt of {}",
            tx.tx_hash
        )))
    }

    async fn voter_direction(
        &self,
        proposal_id: u64,
        voter: Address,
    ) -> Result<Option<bool>, Error> {
        let contract = CrossChainVoting::new(self.contract_address, self.provider.clone());
        let direction = contract
            .getVoterDirection(U256::from(proposal_id), voter)
            .call()
            .await
            .map_err(Error::from_contract)?
            ._0;

        match direction {
            0 => Ok(None),
            1 => Ok(Some(true)),
            2 => Ok(Some(false)),
            other => Err(Error::MalformedEvent(format!(
                "unknown vote direction {other}"
            ))),
        }
    }
}
