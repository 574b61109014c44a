//! End-to-end tests of the aggregation loop against in-memory chain clients.

use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use alloy::primitives::Address;
use crossvote::{
    client::ChainClient,
    event::ChainEvent,
    proposal::ProposalStatus,
    sync::{ProposalSync, SyncHandle, SyncSnapshot},
    test_util::MockChainClient,
};

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

fn created(proposal_id: u64, start_time: u64, end_time: u64) -> ChainEvent {
    ChainEvent::ProposalCreated {
        proposal_id,
        description: format!("proposal {proposal_id}"),
        start_time,
        end_time,
    }
}

fn vote(proposal_id: u64, voter: Address, support: bool) -> ChainEvent {
    ChainEvent::VoteCasted {
        proposal_id,
        voter,
        support,
    }
}

fn start_sync(chains: &[Arc<MockChainClient>]) -> SyncHandle {
    let clients: Vec<Arc<dyn ChainClient>> = chains
        .iter()
        .map(|c| c.clone() as Arc<dyn ChainClient>)
        .collect();
    let sync = ProposalSync::new(clients, Duration::from_secs(1));
    let handle = sync.handle();
    tokio::spawn(sync.run());
    handle
}

/// Poll the snapshot until `predicate` holds. The paused clock makes the sleeps free.
async fn wait_until(
    handle: &SyncHandle,
    predicate: impl Fn(&SyncSnapshot) -> bool,
) -> SyncSnapshot {
    for _ in 0..2000 {
        let snapshot = handle.snapshot();
        if predicate(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for snapshot condition");
}

/// Let spawned tasks (event watchers in particular) get scheduled.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test(start_paused = true)]
async fn full_resync_aggregates_across_chains() {
    let chain_a = MockChainClient::new(901);
    let chain_b = MockChainClient::new(902);
    chain_a.push_history(created(1, now() - 10, now() + 600));
    chain_a.push_history(vote(1, addr(1), true));
    chain_b.push_history(vote(1, addr(2), false));
    chain_b.push_history(vote(1, addr(3), true));

    let handle = start_sync(&[chain_a, chain_b]);
    let snapshot = wait_until(&handle, |s| !s.syncing && s.proposals.contains(1)).await;

    let proposal = snapshot.proposals.get(1).unwrap();
    assert_eq!(proposal.total_votes_for, 2);
    assert_eq!(proposal.total_votes_against, 1);
    assert_eq!(proposal.chain_votes[&901].votes_for, 1);
    assert_eq!(proposal.chain_votes[&902].votes_for, 1);
    assert_eq!(proposal.chain_votes[&902].votes_against, 1);
    assert_eq!(proposal.status, ProposalStatus::Active);
    assert!(snapshot.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn repeated_resyncs_are_idempotent() {
    let chain = MockChainClient::new(901);
    chain.push_history(created(1, now() - 10, now() + 600));
    chain.push_history(vote(1, addr(1), true));

    let handle = start_sync(&[chain]);
    let first = wait_until(&handle, |s| !s.syncing && s.proposals.contains(1)).await;

    handle.refresh();
    settle().await;
    let second = wait_until(&handle, |s| !s.syncing).await;

    assert_eq!(*first.proposals, *second.proposals);
}

#[tokio::test(start_paused = true)]
async fn live_events_update_the_view_without_a_resync() {
    let chain = MockChainClient::new(901);
    let handle = start_sync(&[chain.clone()]);
    wait_until(&handle, |s| !s.syncing).await;
    settle().await;

    chain.emit(created(2, now() - 5, now() + 600));
    let snapshot = wait_until(&handle, |s| s.proposals.contains(2)).await;
    let proposal = snapshot.proposals.get(2).unwrap();
    assert_eq!(proposal.total_votes_for, 0);
    assert_eq!(proposal.status, ProposalStatus::Active);

    chain.emit(vote(2, addr(7), true));
    let snapshot = wait_until(&handle, |s| {
        s.proposals.get(2).is_some_and(|p| p.total_votes_for == 1)
    })
    .await;
    assert_eq!(snapshot.proposals.get(2).unwrap().chain_votes[&901].votes_for, 1);
}

#[tokio::test(start_paused = true)]
async fn live_updates_and_replay_converge() {
    let chain = MockChainClient::new(901);
    chain.push_history(created(1, now() - 10, now() + 600));

    let handle = start_sync(&[chain.clone()]);
    wait_until(&handle, |s| !s.syncing && s.proposals.contains(1)).await;
    settle().await;

    // The vote lands both in the historical log and as a live delivery.
    chain.push_history(vote(1, addr(1), true));
    chain.emit(vote(1, addr(1), true));
    let live = wait_until(&handle, |s| {
        s.proposals.get(1).is_some_and(|p| p.total_votes_for == 1)
    })
    .await;

    handle.refresh();
    settle().await;
    let replayed = wait_until(&handle, |s| !s.syncing).await;

    // No double count from the duplicate delivery, and the replay agrees with the
    // incrementally maintained view.
    assert_eq!(replayed.proposals.get(1).unwrap().total_votes_for, 1);
    assert_eq!(*live.proposals, *replayed.proposals);
}

#[tokio::test(start_paused = true)]
async fn vote_before_creation_triggers_a_targeted_resync() {
    let chain = MockChainClient::new(901);
    let handle = start_sync(&[chain.clone()]);
    wait_until(&handle, |s| !s.syncing).await;
    settle().await;

    // The proposal exists on chain but its creation event was never delivered live.
    chain.push_history(created(3, now() - 10, now() + 600));
    chain.push_history(vote(3, addr(1), true));
    chain.emit(vote(3, addr(1), true));

    let snapshot = wait_until(&handle, |s| s.proposals.contains(3)).await;
    let proposal = snapshot.proposals.get(3).unwrap();
    assert_eq!(proposal.total_votes_for, 1);
    assert_eq!(proposal.description, "proposal 3");
}

#[tokio::test(start_paused = true)]
async fn stale_resync_results_are_discarded() {
    let chain = MockChainClient::new(901);
    chain.push_history(created(1, now() - 10, now() + 600));

    let handle = start_sync(&[chain.clone()]);
    wait_until(&handle, |s| !s.syncing && s.proposals.contains(1)).await;

    // A slow resync captures the history before proposal 2 exists...
    chain.set_fetch_delay(Duration::from_secs(5));
    handle.refresh();
    settle().await;

    // ...then a newer, fast resync sees it.
    chain.set_fetch_delay(Duration::ZERO);
    chain.push_history(created(2, now() - 5, now() + 600));
    handle.refresh();
    let snapshot = wait_until(&handle, |s| !s.syncing && s.proposals.contains(2)).await;
    assert!(snapshot.error.is_none());

    // Once the slow resync finally lands its result is thrown away, so proposal 2 does
    // not vanish.
    tokio::time::sleep(Duration::from_secs(12)).await;
    let snapshot = handle.snapshot();
    assert!(snapshot.proposals.contains(1));
    assert!(snapshot.proposals.contains(2));
    assert!(!snapshot.syncing);
}

#[tokio::test(start_paused = true)]
async fn live_vote_survives_an_inflight_resync() {
    let chain = MockChainClient::new(901);
    chain.push_history(created(1, now() - 10, now() + 600));

    let handle = start_sync(&[chain.clone()]);
    wait_until(&handle, |s| !s.syncing && s.proposals.contains(1)).await;
    settle().await;

    // A slow resync captures the history before the vote exists anywhere.
    chain.set_fetch_delay(Duration::from_secs(5));
    handle.refresh();
    settle().await;

    chain.emit(vote(1, addr(1), true));
    wait_until(&handle, |s| {
        s.proposals.get(1).is_some_and(|p| p.total_votes_for == 1)
    })
    .await;

    // The resync's rebuilt map does not contain the vote; folding the live update back
    // onto the result keeps it in the view.
    tokio::time::sleep(Duration::from_secs(12)).await;
    let snapshot = handle.snapshot();
    assert!(!snapshot.syncing);
    assert_eq!(snapshot.proposals.get(1).unwrap().total_votes_for, 1);
    assert_eq!(snapshot.proposals.get(1).unwrap().chain_votes[&901].votes_for, 1);
}

#[tokio::test(start_paused = true)]
async fn live_vote_survives_an_inflight_targeted_resync() {
    let chain = MockChainClient::new(901);
    let handle = start_sync(&[chain.clone()]);
    wait_until(&handle, |s| !s.syncing).await;
    settle().await;

    // Proposal 3 exists on chain but its creation event was never delivered live, so
    // the first vote triggers a slow targeted rebuild.
    chain.push_history(created(3, now() - 10, now() + 600));
    chain.push_history(vote(3, addr(1), true));
    chain.set_fetch_delay(Duration::from_secs(3));
    chain.emit(vote(3, addr(1), true));
    settle().await;

    // A second vote arrives while that rebuild is in flight and is in no historical log
    // yet; it must not be wiped when the rebuilt proposal is inserted.
    chain.emit(vote(3, addr(2), false));

    let snapshot = wait_until(&handle, |s| {
        s.proposals.get(3).is_some_and(|p| p.total_votes_against == 1)
    })
    .await;
    let proposal = snapshot.proposals.get(3).unwrap();
    assert_eq!(proposal.total_votes_for, 1);
    assert_eq!(proposal.total_votes_against, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_targeted_resync_surfaces_an_error() {
    let chain = MockChainClient::new(901);
    let handle = start_sync(&[chain.clone()]);
    wait_until(&handle, |s| !s.syncing).await;
    settle().await;

    chain.push_history(created(3, now() - 10, now() + 600));
    chain.push_history(vote(3, addr(1), true));
    chain.set_fetch_error(true);
    chain.emit(vote(3, addr(1), true));

    let snapshot = wait_until(&handle, |s| s.error.is_some()).await;
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Network error. Please check your connection and try again")
    );

    // A later successful refresh recovers the proposal and clears the flag.
    chain.set_fetch_error(false);
    handle.refresh();
    let snapshot =
        wait_until(&handle, |s| s.proposals.contains(3) && s.error.is_none()).await;
    assert_eq!(snapshot.proposals.get(3).unwrap().total_votes_for, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_resync_keeps_previous_data_and_reports() {
    let chain = MockChainClient::new(901);
    chain.push_history(created(1, now() - 10, now() + 600));

    let handle = start_sync(&[chain.clone()]);
    wait_until(&handle, |s| !s.syncing && s.proposals.contains(1)).await;

    chain.set_fetch_error(true);
    handle.refresh();
    let snapshot = wait_until(&handle, |s| !s.syncing && s.error.is_some()).await;
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Network error. Please check your connection and try again")
    );
    // The previously synced view survives the failure.
    assert!(snapshot.proposals.contains(1));

    chain.set_fetch_error(false);
    handle.refresh();
    let snapshot = wait_until(&handle, |s| !s.syncing && s.error.is_none()).await;
    assert!(snapshot.proposals.contains(1));
}

#[tokio::test(start_paused = true)]
async fn viewer_switches_recompute_only_viewer_fields() {
    let chain = MockChainClient::new(901);
    chain.push_history(created(1, now() - 10, now() + 600));
    chain.push_history(vote(1, addr(1), true));
    chain.push_history(vote(1, addr(2), false));
    chain.set_direction(1, addr(1), true);
    chain.set_direction(1, addr(2), false);

    let handle = start_sync(&[chain]);
    wait_until(&handle, |s| !s.syncing && s.proposals.contains(1)).await;

    handle.set_viewer(Some(addr(1)));
    let snapshot = wait_until(&handle, |s| s.viewer == Some(addr(1))).await;
    let proposal = snapshot.proposals.get(1).unwrap();
    assert!(proposal.has_voted);
    assert_eq!(proposal.user_vote_direction, Some(true));

    handle.set_viewer(Some(addr(2)));
    let snapshot = wait_until(&handle, |s| s.viewer == Some(addr(2))).await;
    let proposal = snapshot.proposals.get(1).unwrap();
    assert!(proposal.has_voted);
    assert_eq!(proposal.user_vote_direction, Some(false));
    assert_eq!(proposal.total_votes_for, 1);
    assert_eq!(proposal.total_votes_against, 1);

    handle.set_viewer(None);
    let snapshot = wait_until(&handle, |s| s.viewer.is_none()).await;
    assert!(!snapshot.proposals.get(1).unwrap().has_voted);
}

#[tokio::test(start_paused = true)]
async fn direct_direction_read_refines_the_replayed_view() {
    let chain = MockChainClient::new(901);
    chain.push_history(created(1, now() - 10, now() + 600));
    // The replay has no vote by the viewer, but the contract read says they voted in
    // favor; the direct read wins.
    chain.set_direction(1, addr(5), true);

    let handle = start_sync(&[chain]);
    wait_until(&handle, |s| !s.syncing).await;

    handle.set_viewer(Some(addr(5)));
    wait_until(&handle, |s| s.viewer == Some(addr(5))).await;
    handle.refresh();
    let snapshot =
        wait_until(&handle, |s| s.proposals.get(1).is_some_and(|p| p.has_voted)).await;

    let proposal = snapshot.proposals.get(1).unwrap();
    assert!(!snapshot.syncing);
    assert_eq!(proposal.user_vote_direction, Some(true));
}
