use crate::error::SyncError;
use crate::sync::engine::types::{Action, ObserverChange, State, Transition};
use crate::sync::node::api::NodeEvent;

/// The `(current, future)` state pair plus the first-start flag.
#[derive(Debug, Clone)]
pub struct LifecycleState {
    current: State,
    future: State,
    was_started: bool,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleState {
    pub fn new() -> Self {
        Self {
            current: State::Stopped,
            future: State::Stopped,
            was_started: false,
        }
    }

    pub fn current(&self) -> State {
        self.current
    }

    pub fn future(&self) -> State {
        self.future
    }

    pub fn was_started(&self) -> bool {
        self.was_started
    }

    /// Both the current and the pending state are `Stopped`.
    pub fn is_fully_stopped(&self) -> bool {
        self.current == State::Stopped && self.future == State::Stopped
    }

    pub fn should_stop(&self) -> bool {
        self.future == State::Stopped
    }

    /// Requests `state` if it outranks the pending one.
    pub fn request(&mut self, state: State) -> bool {
        self.request_if(state, |s| state > s.future)
    }

    pub fn request_if(&mut self, state: State, pred: impl FnOnce(&Self) -> bool) -> bool {
        if pred(self) {
            self.future = state;
            true
        } else {
            false
        }
    }

    /// Explicit regression to `Idle` after a failed cycle, unless stopping.
    pub fn return_to_idle(&mut self) -> bool {
        self.request_if(State::Idle, |s| s.future != State::Stopped)
    }

    /// Leaves `Stopped`: the first start ever cleans outdated pool data.
    pub fn start(&mut self) -> Result<State, SyncError> {
        if !self.is_fully_stopped() {
            return Err(SyncError::AlreadyStarted);
        }

        let next = if self.was_started {
            State::BlockchainSync
        } else {
            State::DeleteOldTxs
        };

        self.was_started = true;
        self.future = next;
        Ok(next)
    }

    /// Maps a node notification to the state it asks for.
    pub fn handle_node_event(&mut self, event: NodeEvent) -> bool {
        match event {
            NodeEvent::LocalBlockchainUpdated(_) | NodeEvent::LastKnownBlockHeightUpdated(_) => {
                self.request(State::BlockchainSync)
            }
            NodeEvent::PoolChanged => self.request(State::PoolSync),
        }
    }

    /// Enters the pending state and schedules its default successor.
    pub fn advance(&mut self) -> Transition {
        let observer = observer_change(self.current, self.future);

        self.current = self.future;
        let (action, successor) = transition(self.current);
        if let Some(next) = successor {
            self.future = next;
        }

        Transition {
            entered: self.current,
            action,
            observer,
        }
    }
}

/// Pure transition table: side effect of entering `state` and the state
/// scheduled right after it.
pub fn transition(state: State) -> (Action, Option<State>) {
    match state {
        State::Stopped => (Action::Nothing, None),
        State::DeleteOldTxs => (Action::RemoveOutdatedTransactions, Some(State::BlockchainSync)),
        State::BlockchainSync => (Action::SyncBlockchain, Some(State::PoolSync)),
        State::PoolSync => (Action::SyncPool, Some(State::Idle)),
        State::Idle => (Action::WaitForWork, None),
    }
}

fn observer_change(current: State, future: State) -> ObserverChange {
    match (current, future) {
        (State::Stopped, State::Stopped) => ObserverChange::Keep,
        (State::Stopped, _) => ObserverChange::Attach,
        (_, State::Stopped) => ObserverChange::Detach,
        _ => ObserverChange::Keep,
    }
}
