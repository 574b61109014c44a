use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy::primitives::Address;
use anyhow::Result;
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::{
    select,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinSet,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    client::ChainClient,
    error::Error,
    event::{ChainEvent, EventKind},
    proposal::{Proposal, ProposalId, ProposalMap},
};

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A consistent, immutable view of the aggregate state at one point in time.
#[derive(Clone)]
pub struct SyncSnapshot {
    pub proposals: Arc<ProposalMap>,
    /// True from the moment a full resync is requested until the most recent one
    /// completes or fails.
    pub syncing: bool,
    /// Set when the most recent full resync failed. Previously synced proposals are kept.
    pub error: Option<String>,
    pub viewer: Option<Address>,
}

struct Shared {
    state: RwLock<SyncSnapshot>,
}

impl Shared {
    /// All map mutations go through here: clone, mutate, swap. Readers only ever observe
    /// a map with the whole update applied.
    fn mutate_map(&self, f: impl FnOnce(&mut ProposalMap)) {
        let mut state = self.state.write();
        let mut map = (*state.proposals).clone();
        f(&mut map);
        state.proposals = Arc::new(map);
    }
}

enum Command {
    Refresh,
    SetViewer(Option<Address>),
}

enum Outcome {
    Full(Result<ProposalMap, Error>),
    One(ProposalId, Result<Option<Proposal>, Error>),
}

struct SyncOutcome {
    generation: u64,
    viewer: Option<Address>,
    outcome: Outcome,
}

/// Handle to a running [`ProposalSync`]. Cheap to clone.
#[derive(Clone)]
pub struct SyncHandle {
    shared: Arc<Shared>,
    commands: UnboundedSender<Command>,
}

impl SyncHandle {
    pub fn snapshot(&self) -> SyncSnapshot {
        self.shared.state.read().clone()
    }

    /// Request a full resync. Safe to call while one is already running; a superseded
    /// resync never overwrites the newer one's result.
    pub fn refresh(&self) {
        let _ = self.commands.send(Command::Refresh);
    }

    /// Change the viewer account. Recomputes `has_voted` / `user_vote_direction` from the
    /// local vote ledger; tallies are untouched.
    pub fn set_viewer(&self, viewer: Option<Address>) {
        let _ = self.commands.send(Command::SetViewer(viewer));
    }
}

/// Aggregates historical contract events from every configured chain into a local
/// `proposal id -> Proposal` view and keeps it live via event subscriptions.
pub struct ProposalSync {
    clients: Vec<Arc<dyn ChainClient>>,
    status_refresh_interval: Duration,
    shared: Arc<Shared>,
    commands: UnboundedReceiver<Command>,
    handle: SyncHandle,
}

/// Tracks which resync results are still allowed to land, and the live events that
/// arrived while one was in flight.
///
/// Every launched resync gets the next generation. A full resync result applies only if
/// it is the most recently launched full one; a single-proposal resync applies only if no
/// full resync was launched after it.
///
/// A resync rebuilds from the logs its fetch captured, so a live event delivered after
/// the launch would be wiped by the swapped-in result. Those events are kept in
/// `backlog` and folded back onto the rebuilt map before the swap; the voter ledger
/// makes replaying an event the fetch did include a no-op.
#[derive(Default)]
struct Resyncs {
    next: u64,
    latest_full: u64,
    inflight: usize,
    backlog: Vec<(u64, ChainEvent)>,
}

impl ProposalSync {
    pub fn new(clients: Vec<Arc<dyn ChainClient>>, status_refresh_interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            state: RwLock::new(SyncSnapshot {
                proposals: Arc::new(ProposalMap::default()),
                syncing: true,
                error: None,
                viewer: None,
            }),
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = SyncHandle {
            shared: shared.clone(),
            commands: command_tx,
        };

        ProposalSync {
            clients,
            status_refresh_interval,
            shared,
            commands: command_rx,
            handle,
        }
    }

    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    pub async fn run(mut self) -> Result<()> {
        // Detach the command receiver so the select arms below can borrow `self`.
        let (_detached, dummy) = mpsc::unbounded_channel();
        let mut commands = std::mem::replace(&mut self.commands, dummy);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<(u64, ChainEvent)>();
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<SyncOutcome>();
        let mut watchers = self.spawn_event_watchers(event_tx);

        let mut resyncs = Resyncs::default();
        self.start_full_resync(&mut resyncs, &outcome_tx);

        let mut tick = tokio::time::interval(self.status_refresh_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = tick.tick() => {
                    self.shared.mutate_map(|map| map.refresh_statuses(unix_now()));
                }
                Some((chain_id, event)) = event_rx.recv() => {
                    self.handle_live_event(chain_id, event, &mut resyncs, &outcome_tx);
                }
                Some(command) = commands.recv() => {
                    match command {
                        Command::Refresh => self.start_full_resync(&mut resyncs, &outcome_tx),
                        Command::SetViewer(viewer) => self.set_viewer(viewer),
                    }
                }
                Some(outcome) = outcome_rx.recv() => {
                    self.apply_outcome(outcome, &mut resyncs);
                }
                Some(result) = watchers.join_next() => {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(%err, "event watcher stopped"),
                        Err(err) => warn!(%err, "event watcher panicked"),
                    }
                }
            }
        }
    }

    /// One watcher task per (chain, event kind), forwarding decoded live events into the
    /// main loop.
    fn spawn_event_watchers(
        &self,
        event_tx: UnboundedSender<(u64, ChainEvent)>,
    ) -> JoinSet<Result<(), Error>> {
        let mut watchers = JoinSet::new();
        for client in &self.clients {
            let chain_id = client.chain_id();
            for kind in [EventKind::ProposalCreated, EventKind::VoteCasted] {
                let client = client.clone();
                let event_tx = event_tx.clone();
                watchers.spawn(async move {
                    let mut stream = client.subscribe(kind).await?;
                    while let Some(batch) = stream.next().await {
                        for event in batch {
                            if event_tx.send((chain_id, event)).is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Ok(())
                });
            }
        }
        watchers
    }

    fn set_viewer(&self, viewer: Option<Address>) {
        let mut state = self.shared.state.write();
        if state.viewer == viewer {
            return;
        }
        state.viewer = viewer;
        let mut map = (*state.proposals).clone();
        map.recompute_viewer(viewer);
        state.proposals = Arc::new(map);
    }

    fn start_full_resync(&self, resyncs: &mut Resyncs, outcome_tx: &UnboundedSender<SyncOutcome>) {
        resyncs.next += 1;
        let generation = resyncs.next;
        resyncs.latest_full = generation;
        resyncs.inflight += 1;

        let viewer = {
            let mut state = self.shared.state.write();
            state.syncing = true;
            state.viewer
        };

        info!(generation, "starting full resync");
        let clients = self.clients.clone();
        let outcome_tx = outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = full_resync(&clients, viewer).await;
            let _ = outcome_tx.send(SyncOutcome {
                generation,
                viewer,
                outcome: Outcome::Full(outcome),
            });
        });
    }

    fn start_one_resync(
        &self,
        proposal_id: ProposalId,
        resyncs: &mut Resyncs,
        outcome_tx: &UnboundedSender<SyncOutcome>,
    ) {
        resyncs.next += 1;
        let generation = resyncs.next;
        resyncs.inflight += 1;
        let viewer = self.shared.state.read().viewer;

        debug!(generation, proposal_id, "starting targeted resync");
        let clients = self.clients.clone();
        let outcome_tx = outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = resync_one(&clients, proposal_id, viewer).await;
            let _ = outcome_tx.send(SyncOutcome {
                generation,
                viewer,
                outcome: Outcome::One(proposal_id, outcome),
            });
        });
    }

    fn handle_live_event(
        &self,
        chain_id: u64,
        event: ChainEvent,
        resyncs: &mut Resyncs,
        outcome_tx: &UnboundedSender<SyncOutcome>,
    ) {
        if resyncs.inflight > 0 && !matches!(event, ChainEvent::VoteSent { .. }) {
            resyncs.backlog.push((chain_id, event.clone()));
        }

        match event {
            ChainEvent::ProposalCreated {
                proposal_id,
                description,
                start_time,
                end_time,
            } => {
                debug!(chain_id, proposal_id, "live proposal created");
                self.shared.mutate_map(|map| {
                    map.apply_created(proposal_id, description, start_time, end_time, unix_now())
                });
            }
            ChainEvent::VoteCasted {
                proposal_id,
                voter,
                support,
            } => {
                debug!(chain_id, proposal_id, "live vote casted");
                let viewer = self.shared.state.read().viewer;
                let mut known = true;
                self.shared.mutate_map(|map| {
                    known = map.apply_vote(chain_id, proposal_id, voter, support, viewer, unix_now());
                });
                if !known {
                    // The vote raced ahead of its proposal's creation event (it may have
                    // originated on a chain we saw first). Rebuild just that proposal.
                    self.start_one_resync(proposal_id, resyncs, outcome_tx);
                }
            }
            ChainEvent::VoteSent { .. } => {}
        }
    }

    fn apply_outcome(&self, outcome: SyncOutcome, resyncs: &mut Resyncs) {
        resyncs.inflight = resyncs.inflight.saturating_sub(1);

        match outcome.outcome {
            Outcome::Full(result) => {
                if outcome.generation != resyncs.latest_full {
                    debug!(
                        generation = outcome.generation,
                        latest = resyncs.latest_full,
                        "discarding stale resync result"
                    );
                } else {
                    let mut state = self.shared.state.write();
                    state.syncing = false;
                    match result {
                        Ok(mut map) => {
                            // The resync captured the viewer at launch; the account may
                            // have switched since.
                            if state.viewer != outcome.viewer {
                                map.recompute_viewer(state.viewer);
                            }
                            refold_backlog(&mut map, &resyncs.backlog, None, state.viewer);
                            info!(proposals = map.len(), "full resync complete");
                            state.proposals = Arc::new(map);
                            state.error = None;
                        }
                        Err(err) => {
                            warn!(%err, "full resync failed");
                            state.error = Some(err.user_message());
                        }
                    }
                }
            }
            Outcome::One(proposal_id, result) => {
                if outcome.generation <= resyncs.latest_full {
                    debug!(
                        generation = outcome.generation,
                        proposal_id, "discarding stale targeted resync"
                    );
                } else {
                    match result {
                        Ok(Some(mut proposal)) => {
                            let mut state = self.shared.state.write();
                            if state.viewer != outcome.viewer {
                                let direction =
                                    state.viewer.and_then(|v| proposal.voters.get(&v).copied());
                                proposal.has_voted = direction.is_some();
                                proposal.user_vote_direction = direction;
                            }
                            let mut map = (*state.proposals).clone();
                            map.insert(proposal);
                            refold_backlog(
                                &mut map,
                                &resyncs.backlog,
                                Some(proposal_id),
                                state.viewer,
                            );
                            state.proposals = Arc::new(map);
                        }
                        Ok(None) => {
                            debug!(proposal_id, "targeted resync found no creation event");
                        }
                        Err(err) => {
                            // The live vote that triggered this resync is not in the view.
                            // Surface the failure; a later refresh recovers the proposal.
                            warn!(%err, proposal_id, "targeted resync failed");
                            self.shared.state.write().error = Some(err.user_message());
                        }
                    }
                }
            }
        }

        if resyncs.inflight == 0 {
            resyncs.backlog.clear();
        }
    }
}

/// Fold live events received during a resync's flight onto its rebuilt result.
/// Creations first, then votes, mirroring [`ProposalMap::rebuild`]; both folds are
/// idempotent, so an event the resync's log fetch already included changes nothing.
fn refold_backlog(
    map: &mut ProposalMap,
    backlog: &[(u64, ChainEvent)],
    only: Option<ProposalId>,
    viewer: Option<Address>,
) {
    let now = unix_now();
    for (_, event) in backlog {
        if let ChainEvent::ProposalCreated {
            proposal_id,
            description,
            start_time,
            end_time,
        } = event
        {
            if only.is_none_or(|id| *proposal_id == id) {
                map.apply_created(*proposal_id, description.clone(), *start_time, *end_time, now);
            }
        }
    }

    for (chain_id, event) in backlog {
        if let ChainEvent::VoteCasted {
            proposal_id,
            voter,
            support,
        } = event
        {
            if only.is_none_or(|id| *proposal_id == id) {
                map.apply_vote(*chain_id, *proposal_id, *voter, *support, viewer, now);
            }
        }
    }
}

/// Replay the full event history of every chain and rebuild the proposal map.
///
/// The viewer's vote direction is then refined with the contract's direct
/// `getVoterDirection` read, which is authoritative; the event-derived value is kept as a
/// fallback when the read fails.
async fn full_resync(
    clients: &[Arc<dyn ChainClient>],
    viewer: Option<Address>,
) -> Result<ProposalMap, Error> {
    let mut history = Vec::with_capacity(clients.len());
    for client in clients {
        let mut events = client.fetch_events(EventKind::ProposalCreated, None).await?;
        events.extend(client.fetch_events(EventKind::VoteCasted, None).await?);
        history.push((client.chain_id(), events));
    }

    let mut map = ProposalMap::rebuild(&history, viewer, unix_now());

    if let Some(viewer) = viewer {
        for id in map.ids() {
            // When the read is unavailable on every chain, the event-derived value from
            // the replay is kept.
            if let Some(direction) = lookup_direction(clients, id, viewer).await {
                if let Some(proposal) = map.get_mut(id) {
                    proposal.has_voted = direction.is_some();
                    proposal.user_vote_direction = direction;
                }
            }
        }
    }

    Ok(map)
}

/// Ask each chain for the viewer's recorded direction. Returns `None` when no chain could
/// answer (as opposed to `Some(None)`: an authoritative "has not voted").
async fn lookup_direction(
    clients: &[Arc<dyn ChainClient>],
    proposal_id: ProposalId,
    viewer: Address,
) -> Option<Option<bool>> {
    let mut answered = false;
    for client in clients {
        match client.voter_direction(proposal_id, viewer).await {
            Ok(Some(direction)) => return Some(Some(direction)),
            Ok(None) => answered = true,
            Err(err) => {
                warn!(chain_id = client.chain_id(), proposal_id, %err, "voter direction read failed");
            }
        }
    }
    answered.then_some(None)
}

/// Rebuild a single proposal from the filtered event history of every chain.
async fn resync_one(
    clients: &[Arc<dyn ChainClient>],
    proposal_id: ProposalId,
    viewer: Option<Address>,
) -> Result<Option<Proposal>, Error> {
    let mut history = Vec::with_capacity(clients.len());
    for client in clients {
        let mut events = client
            .fetch_events(EventKind::ProposalCreated, Some(proposal_id))
            .await?;
        events.extend(
            client
                .fetch_events(EventKind::VoteCasted, Some(proposal_id))
                .await?,
        );
        history.push((client.chain_id(), events));
    }

    let map = ProposalMap::rebuild(&history, viewer, unix_now());
    Ok(map.get(proposal_id).cloned())
}
