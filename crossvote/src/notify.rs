use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::{
    select,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinSet,
};
use tracing::warn;

use crate::{
    client::ChainClient,
    event::{ChainEvent, EventKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Info,
}

/// A transient user notification. Never persisted; auto-retires after the dispatcher's
/// TTL or on explicit dismissal, whichever happens first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub kind: ToastKind,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToastEvent {
    Posted(Toast),
    Retired(u64),
}

struct Inner {
    next_id: AtomicU64,
    next_listener: AtomicU64,
    listeners: Mutex<HashMap<u64, UnboundedSender<ToastEvent>>>,
    ttl: Duration,
}

/// Process-wide broadcast channel for toast notifications. An explicit service instance,
/// created at application start and injected into whatever publishes or renders toasts.
///
/// Delivery is fire-and-forget: messages fan out to all currently registered listeners
/// and are never replayed to late subscribers.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<Inner>,
}

impl Notifier {
    pub fn new(ttl: Duration) -> Self {
        Notifier {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(0),
                next_listener: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
                ttl,
            }),
        }
    }

    /// Publish a toast to every registered listener. Returns the assigned id, which is
    /// strictly increasing across the life of the process.
    pub fn publish(&self, kind: ToastKind, title: impl Into<String>, body: impl Into<String>) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.fanout(ToastEvent::Posted(Toast {
            id,
            kind,
            title: title.into(),
            body: body.into(),
        }));

        let notifier = self.clone();
        let ttl = self.inner.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            notifier.dismiss(id);
        });

        id
    }

    pub fn success(&self, title: impl Into<String>, body: impl Into<String>) -> u64 {
        self.publish(ToastKind::Success, title, body)
    }

    pub fn error(&self, title: impl Into<String>, body: impl Into<String>) -> u64 {
        self.publish(ToastKind::Error, title, body)
    }

    pub fn info(&self, title: impl Into<String>, body: impl Into<String>) -> u64 {
        self.publish(ToastKind::Info, title, body)
    }

    /// Retire a toast from every listener's view.
    pub fn dismiss(&self, id: u64) {
        self.fanout(ToastEvent::Retired(id));
    }

    pub fn subscribe(&self) -> ToastFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        self.inner.listeners.lock().insert(key, tx);

        ToastFeed {
            key,
            rx,
            inner: self.inner.clone(),
        }
    }

    fn fanout(&self, event: ToastEvent) {
        self.inner
            .listeners
            .lock()
            .retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

/// A listener's event stream. Dropping the feed deregisters the listener.
pub struct ToastFeed {
    key: u64,
    rx: UnboundedReceiver<ToastEvent>,
    inner: Arc<Inner>,
}

impl ToastFeed {
    pub async fn next(&mut self) -> Option<ToastEvent> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<ToastEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for ToastFeed {
    fn drop(&mut self) {
        self.inner.listeners.lock().remove(&self.key);
    }
}

/// The ordered list of live toasts a renderer displays. Applies feed events; retirement
/// removes the toast regardless of which listener's timer or dismissal produced it.
#[derive(Debug, Default)]
pub struct ToastTray {
    toasts: Vec<Toast>,
}

impl ToastTray {
    pub fn apply(&mut self, event: ToastEvent) {
        match event {
            ToastEvent::Posted(toast) => self.toasts.push(toast),
            ToastEvent::Retired(id) => self.toasts.retain(|t| t.id != id),
        }
    }

    pub fn toasts(&self) -> &[Toast] {
        &self.toasts
    }
}

/// Turn a decoded chain event into its user-facing notification.
pub fn announce(notifier: &Notifier, event: &ChainEvent) {
    match event {
        ChainEvent::ProposalCreated { proposal_id, .. } => {
            notifier.success(
                "New Proposal Created",
                format!(
                    "Proposal #{proposal_id} has been successfully created and is ready for voting."
                ),
            );
        }
        ChainEvent::VoteCasted {
            proposal_id,
            support,
            ..
        } => {
            let direction = if *support { "in favor of" } else { "against" };
            notifier.info(
                "Vote Recorded",
                format!("A new vote has been cast {direction} Proposal #{proposal_id}"),
            );
        }
        ChainEvent::VoteSent {
            source_chain_id,
            proposal_id,
            ..
        } => {
            notifier.info(
                "Cross-Chain Vote",
                format!(
                    "A vote from chain {source_chain_id} has been processed for Proposal #{proposal_id}"
                ),
            );
        }
    }
}

/// Watch every chain's contract events and publish a toast for each one. Runs until all
/// per-chain watchers have stopped.
pub async fn relay_chain_events(
    notifier: Notifier,
    clients: Vec<Arc<dyn ChainClient>>,
) -> Result<()> {
    let mut watchers: JoinSet<Result<()>> = JoinSet::new();
    for client in clients {
        let notifier = notifier.clone();
        watchers.spawn(async move { relay_one(notifier, client).await });
    }

    while let Some(result) = watchers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "chain event watcher stopped"),
            Err(err) => warn!(%err, "chain event watcher panicked"),
        }
    }

    Ok(())
}

async fn relay_one(notifier: Notifier, client: Arc<dyn ChainClient>) -> Result<()> {
    let chain_id = client.chain_id();
    let mut created = client.subscribe(EventKind::ProposalCreated).await?;
    let mut casted = client.subscribe(EventKind::VoteCasted).await?;
    let mut sent = client.subscribe(EventKind::VoteSent).await?;

    loop {
        select! {
            Some(batch) = created.next() => {
                for event in &batch {
                    announce(&notifier, event);
                }
            }
            Some(batch) = casted.next() => {
                for event in &batch {
                    announce(&notifier, event);
                }
            }
            Some(batch) = sent.next() => {
                for event in &batch {
                    announce(&notifier, event);
                }
            }
            else => {
                warn!(chain_id, "event subscriptions closed");
                return Ok(());
            }
        }
    }
}
