#![cfg(test)]
use std::collections::HashSet;

use crate::error::SyncError;
use crate::sync::engine::logic::{
    classify_update, consumer_block_range, needs_intersection_query, pool_union_and_intersection,
    select_common_history,
};
use crate::sync::engine::state::transition;
use crate::sync::engine::{Action, LifecycleState, ObserverChange, State, UpdateConsumersResult};
use crate::sync::node::api::NodeEvent;
use crate::sync::node::mock::mock_hash;
use crate::types::{Hash, SyncStart};

// =========================================================================
// Helpers
// =========================================================================

fn ids(ns: &[u32]) -> HashSet<Hash> {
    ns.iter().map(|n| mock_hash(7, *n)).collect()
}

fn started() -> LifecycleState {
    let mut state = LifecycleState::new();
    state.start().unwrap();
    state
}

// =========================================================================
// Lifecycle
// =========================================================================

#[test]
fn first_start_cleans_outdated_pool_then_syncs() {
    let mut state = LifecycleState::new();
    assert_eq!(state.start().unwrap(), State::DeleteOldTxs);

    let t = state.advance();
    assert_eq!(t.entered, State::DeleteOldTxs);
    assert_eq!(t.action, Action::RemoveOutdatedTransactions);
    assert_eq!(t.observer, ObserverChange::Attach);
    assert_eq!(state.future(), State::BlockchainSync);

    let t = state.advance();
    assert_eq!(t.action, Action::SyncBlockchain);
    assert_eq!(t.observer, ObserverChange::Keep);
    assert_eq!(state.future(), State::PoolSync);

    let t = state.advance();
    assert_eq!(t.action, Action::SyncPool);
    assert_eq!(state.future(), State::Idle);

    let t = state.advance();
    assert_eq!(t.action, Action::WaitForWork);
    assert_eq!(state.future(), State::Idle);
}

#[test]
fn restart_goes_straight_to_blockchain_sync() {
    let mut state = started();
    state.request(State::Stopped);
    state.advance();
    assert!(state.is_fully_stopped());

    assert_eq!(state.start().unwrap(), State::BlockchainSync);
}

#[test]
fn start_requires_fully_stopped() {
    let mut state = started();
    assert!(matches!(state.start(), Err(SyncError::AlreadyStarted)));

    // Stop requested but not yet processed: still not fully stopped.
    state.advance();
    state.request(State::Stopped);
    assert!(!state.is_fully_stopped());
    assert!(matches!(state.start(), Err(SyncError::AlreadyStarted)));
}

#[test]
fn stop_outranks_every_request() {
    let mut state = started();
    assert!(state.request(State::Stopped));

    assert!(!state.request(State::DeleteOldTxs));
    assert!(!state.request(State::BlockchainSync));
    assert!(!state.request(State::PoolSync));
    assert!(!state.return_to_idle());
    assert_eq!(state.future(), State::Stopped);
}

#[test]
fn requests_never_regress_silently() {
    let mut state = started();
    state.advance(); // DeleteOldTxs, future BlockchainSync

    assert!(!state.request(State::PoolSync));
    assert_eq!(state.future(), State::BlockchainSync);

    // Explicit regression after an error is allowed.
    assert!(state.return_to_idle());
    assert_eq!(state.future(), State::Idle);
}

#[test]
fn entering_stopped_detaches_observer() {
    let mut state = started();
    state.advance();
    state.request(State::Stopped);

    let t = state.advance();
    assert_eq!(t.entered, State::Stopped);
    assert_eq!(t.action, Action::Nothing);
    assert_eq!(t.observer, ObserverChange::Detach);

    // A second pass over a stopped engine touches nothing.
    assert_eq!(state.advance().observer, ObserverChange::Keep);
}

#[test]
fn stop_before_first_iteration_needs_no_observer_changes() {
    let mut state = started();
    state.request(State::Stopped);
    assert_eq!(state.advance().observer, ObserverChange::Keep);
}

#[test]
fn node_events_map_to_sync_requests() {
    let mut state = started();
    for _ in 0..4 {
        state.advance();
    }
    assert_eq!(state.current(), State::Idle);

    assert!(state.handle_node_event(NodeEvent::PoolChanged));
    assert_eq!(state.future(), State::PoolSync);

    assert!(state.handle_node_event(NodeEvent::LastKnownBlockHeightUpdated(9)));
    assert_eq!(state.future(), State::BlockchainSync);

    // Lower priority request does not override.
    assert!(!state.handle_node_event(NodeEvent::PoolChanged));
    assert!(!state.handle_node_event(NodeEvent::LocalBlockchainUpdated(10)));
}

#[test]
fn transition_table_is_total() {
    assert_eq!(transition(State::Stopped), (Action::Nothing, None));
    assert_eq!(transition(State::Idle), (Action::WaitForWork, None));
    assert_eq!(
        transition(State::PoolSync),
        (Action::SyncPool, Some(State::Idle))
    );
}

// =========================================================================
// Reconciliation arithmetic
// =========================================================================

#[test]
fn union_and_intersection_of_agreeing_consumers() {
    let (union, intersection) = pool_union_and_intersection(vec![ids(&[1, 2]), ids(&[1, 2])]);
    assert_eq!(union, ids(&[1, 2]));
    assert_eq!(union, intersection);
    assert!(!needs_intersection_query(&union, &intersection, true));
    assert!(needs_intersection_query(&union, &intersection, false));
}

#[test]
fn intersection_is_subset_of_union() {
    let sets = vec![ids(&[1, 2, 3]), ids(&[2, 3, 4]), ids(&[3, 5]), ids(&[])];
    for n in 1..=sets.len() {
        let (union, intersection) = pool_union_and_intersection(sets[..n].to_vec());
        assert!(intersection.is_subset(&union));
    }

    let (union, intersection) = pool_union_and_intersection(sets[..3].to_vec());
    assert_eq!(union, ids(&[1, 2, 3, 4, 5]));
    assert_eq!(intersection, ids(&[3]));
    assert!(needs_intersection_query(&union, &intersection, true));
}

#[test]
fn no_consumers_means_empty_sets() {
    let (union, intersection) = pool_union_and_intersection(Vec::<HashSet<Hash>>::new());
    assert!(union.is_empty());
    assert!(intersection.is_empty());
}

#[test]
fn common_history_picks_lowest_height_and_earliest_start() {
    let entries = vec![
        (SyncStart { timestamp: 500, height: 30 }, 150),
        (SyncStart { timestamp: 900, height: 10 }, 100),
        (SyncStart { timestamp: 700, height: 20 }, 120),
    ];

    let (shortest, start) = select_common_history(&entries).unwrap();
    assert_eq!(shortest, 1);
    assert_eq!(start, SyncStart { timestamp: 500, height: 10 });
}

#[test]
fn common_history_keeps_first_on_ties() {
    let entries = vec![(SyncStart::default(), 100), (SyncStart::default(), 100)];
    assert_eq!(select_common_history(&entries).unwrap().0, 0);
    assert!(select_common_history(&[]).is_none());
}

#[test]
fn block_range_for_resuming_consumer() {
    assert_eq!(consumer_block_range(10, 10, 5), (0, 5));
    assert_eq!(consumer_block_range(10, 12, 5), (2, 3));
}

#[test]
fn classification_prefers_errors() {
    assert_eq!(classify_update(true, true), UpdateConsumersResult::ErrorOccurred);
    assert_eq!(classify_update(false, true), UpdateConsumersResult::AddedNewBlocks);
    assert_eq!(classify_update(false, false), UpdateConsumersResult::NothingChanged);
}
