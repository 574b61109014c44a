use std::{collections::HashMap, sync::Arc};

use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use tokio::task::JoinSet;
use tracing::info;

use crate::{
    cfg::Config,
    client::{ChainClient, RpcChainClient},
    notify::{Notifier, relay_chain_events},
    submit::TxSubmitter,
    sync::{ProposalSync, SyncHandle},
};

/// Connect a websocket chain client for every configured chain.
pub async fn connect_clients(
    config: &Config,
    signer: PrivateKeySigner,
) -> Result<Vec<Arc<dyn ChainClient>>> {
    let mut clients: Vec<Arc<dyn ChainClient>> = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        let client =
            RpcChainClient::connect(chain, config.contract_address, signer.clone()).await?;
        info!(chain_id = client.chain_id(), rpc_url = %chain.rpc_url, "connected chain client");
        clients.push(Arc::new(client));
    }

    Ok(clients)
}

/// Wires the aggregator, the notification relay and the per-chain submitters together
/// and owns their background tasks.
pub struct Node {
    sync: SyncHandle,
    notifier: Notifier,
    submitters: HashMap<u64, TxSubmitter>,
    tasks: JoinSet<Result<()>>,
}

impl Node {
    pub fn start(
        clients: Vec<Arc<dyn ChainClient>>,
        config: &Config,
        notifier: Notifier,
    ) -> Node {
        let sync = ProposalSync::new(clients.clone(), config.status_refresh_interval);
        let handle = sync.handle();

        let mut tasks = JoinSet::new();
        tasks.spawn(sync.run());
        tasks.spawn(relay_chain_events(notifier.clone(), clients.clone()));

        let submitters = clients
            .iter()
            .map(|client| (client.chain_id(), TxSubmitter::new(client.clone())))
            .collect();

        Node {
            sync: handle,
            notifier,
            submitters,
            tasks,
        }
    }

    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn submitter(&self, chain_id: u64) -> Option<&TxSubmitter> {
        self.submitters.get(&chain_id)
    }

    /// Abort all background tasks and wait for them to finish.
    pub async fn shutdown(mut self) {
        self.tasks.shutdown().await;
    }
}
