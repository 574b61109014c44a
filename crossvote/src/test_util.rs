//! An in-memory chain client for tests: scripted event histories, injectable live
//! events and scripted submission failures.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use alloy::primitives::{Address, TxHash};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    client::{ChainClient, EventStream, PendingTx, VotingCall},
    error::Error,
    event::{ChainEvent, EventKind},
};

pub struct MockChainClient {
    chain_id: u64,
    history: Mutex<Vec<ChainEvent>>,
    live: broadcast::Sender<ChainEvent>,
    directions: Mutex<HashMap<(u64, Address), bool>>,
    submit_failures: Mutex<VecDeque<Error>>,
    submitted: Mutex<Vec<VotingCall>>,
    next_tx: AtomicU64,
    fetch_error: AtomicBool,
    fetch_delay: Mutex<Duration>,
    confirm_delay: Mutex<Duration>,
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Arc<Self> {
        let (live, _) = broadcast::channel(64);
        Arc::new(MockChainClient {
            chain_id,
            history: Mutex::new(Vec::new()),
            live,
            directions: Mutex::new(HashMap::new()),
            submit_failures: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            next_tx: AtomicU64::new(0),
            fetch_error: AtomicBool::new(false),
            fetch_delay: Mutex::new(Duration::ZERO),
            confirm_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Append an event to the historical log store, as if it had long been on chain.
    pub fn push_history(&self, event: ChainEvent) {
        self.history.lock().push(event);
    }

    /// Deliver a live event to every current subscriber.
    pub fn emit(&self, event: ChainEvent) {
        let _ = self.live.send(event);
    }

    pub fn set_direction(&self, proposal_id: u64, voter: Address, support: bool) {
        self.directions.lock().insert((proposal_id, voter), support);
    }

    /// Make the next submission fail with the given error.
    pub fn script_submit_failure(&self, error: Error) {
        self.submit_failures.lock().push_back(error);
    }

    pub fn submitted_calls(&self) -> Vec<VotingCall> {
        self.submitted.lock().clone()
    }

    /// Make every historical log query fail with a network error.
    pub fn set_fetch_error(&self, fail: bool) {
        self.fetch_error.store(fail, Ordering::SeqCst);
    }

    /// Delay log query results. The history is captured before the delay, so a slow query
    /// returns what was on chain when it started.
    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }

    pub fn set_confirm_delay(&self, delay: Duration) {
        *self.confirm_delay.lock() = delay;
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn fetch_events(
        &self,
        kind: EventKind,
        proposal_id: Option<u64>,
    ) -> Result<Vec<ChainEvent>, Error> {
        if self.fetch_error.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".to_string()));
        }

        let events: Vec<ChainEvent> = self
            .history
            .lock()
            .iter()
            .filter(|ev| ev.kind() == kind)
            .filter(|ev| proposal_id.is_none_or(|id| ev.proposal_id() == id))
            .cloned()
            .collect();

        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(events)
    }

    async fn subscribe(&self, kind: EventKind) -> Result<EventStream, Error> {
        let rx = self.live.subscribe();
        let stream = BroadcastStream::new(rx)
            .filter_map(move |event| {
                futures::future::ready(match event {
                    Ok(event) if event.kind() == kind => Some(vec![event]),
                    _ => None,
                })
            })
            .boxed();

        Ok(stream)
    }

    async fn submit(&self, call: VotingCall) -> Result<PendingTx, Error> {
        if let Some(error) = self.submit_failures.lock().pop_front() {
            return Err(error);
        }
        self.submitted.lock().push(call);

        let nonce = self.next_tx.fetch_add(1, Ordering::SeqCst);
        Ok(PendingTx {
            chain_id: self.chain_id,
            tx_hash: TxHash::with_last_byte(nonce as u8),
        })
    }

    async fn wait_for_receipt(&self, _tx: &PendingTx) -> Result<(), Error> {
        let delay = *self.confirm_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn voter_direction(
        &self,
        proposal_id: u64,
        voter: Address,
    ) -> Result<Option<bool>, Error> {
        Ok(self.directions.lock().get(&(proposal_id, voter)).copied())
    }
}
