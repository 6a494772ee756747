use std::io::{Read, Write};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::persistence::{load_genesis, save_genesis};
use crate::sync::consumer::BlockchainConsumer;
use crate::sync::currency::Currency;
use crate::sync::domain::sync_state::SynchronizationState;
use crate::sync::engine::{Action, LifecycleState, ObserverChange, State};
use crate::sync::lock;
use crate::sync::node::api::{ListenerId, NodeApi, NodeEvent, NodeListener};
use crate::sync::runtime::events::{ObserverId, ObserverRegistry, SyncEvent};
use crate::sync::runtime::registry::{ConsumerId, ConsumerRegistry, StoppedRegistry};
use crate::sync::runtime::scheduler::{settle, DrainedTasks, TaskHandle, TaskQueue};
use crate::types::{Hash, Transaction};

const WORKER_THREAD_NAME: &str = "blockchain-sync";

/// Lifecycle and pending tasks, guarded together so the idle wait can watch
/// both.
#[derive(Default)]
pub(super) struct Control {
    pub lifecycle: LifecycleState,
    pub tasks: TaskQueue,
}

/// State shared between the public handle, the worker thread and the node
/// listener.
///
/// Lock order: `consumers` before `control`. Nothing holds `control` while
/// taking `consumers`.
pub(super) struct SynchronizerInner {
    pub node: Arc<dyn NodeApi>,
    pub currency: Arc<dyn Currency>,
    pub config: SyncConfig,
    pub genesis_block_hash: Hash,
    pub control: Mutex<Control>,
    pub wake: Condvar,
    pub consumers: Mutex<ConsumerRegistry>,
    pub observers: ObserverRegistry,
    pub last_block_id: Mutex<Hash>,
    node_listener: Mutex<Option<ListenerId>>,
    self_ref: Weak<SynchronizerInner>,
}

/// **BlockchainSynchronizer**
///
/// The **Imperative Shell** around the lifecycle core. It:
/// 1. Owns the **worker thread** that runs one state at a time.
/// 2. Talks to the **node** (queries, observer registration).
/// 3. Fans blocks, pool changes and unconfirmed transactions out to every
///    registered **consumer**, keeping one tracker per consumer.
///
/// Consumers and observers are called from the worker thread. They must not
/// call `stop()` or the registry operations from inside a callback.
pub struct BlockchainSynchronizer {
    inner: Arc<SynchronizerInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BlockchainSynchronizer {
    pub fn new(node: Arc<dyn NodeApi>, currency: Arc<dyn Currency>, config: SyncConfig) -> Self {
        let genesis_block_hash = currency.genesis_block_hash();
        let inner = Arc::new_cyclic(|self_ref| SynchronizerInner {
            node,
            currency,
            config,
            genesis_block_hash,
            control: Mutex::new(Control::default()),
            wake: Condvar::new(),
            consumers: Mutex::new(ConsumerRegistry::default()),
            observers: ObserverRegistry::default(),
            last_block_id: Mutex::new(genesis_block_hash),
            node_listener: Mutex::new(None),
            self_ref: self_ref.clone(),
        });

        Self {
            inner,
            worker: Mutex::new(None),
        }
    }

    // =====================================================================
    // Consumer registry (fully stopped only)
    // =====================================================================

    pub fn add_consumer(&self, consumer: Arc<dyn BlockchainConsumer>) -> Result<ConsumerId> {
        let mut registry = self.inner.stopped_registry("add consumer")?;
        let id = registry.insert(consumer, self.inner.genesis_block_hash)?;
        log::info!("[SYNC] Consumer added: {}", id);
        Ok(id)
    }

    pub fn remove_consumer(&self, id: ConsumerId) -> Result<bool> {
        let mut registry = self.inner.stopped_registry("remove consumer")?;
        let removed = registry.remove(id);
        log::info!("[SYNC] Consumer {} removed: {}", id, removed);
        Ok(removed)
    }

    /// Snapshot of the consumer's tracker.
    pub fn get_consumer_state(&self, id: ConsumerId) -> Result<Option<SynchronizationState>> {
        let registry = self.inner.stopped_registry("get consumer state")?;
        Ok(registry.state(id).cloned())
    }

    pub fn get_consumer_known_blocks(&self, id: ConsumerId) -> Result<Vec<Hash>> {
        let registry = self.inner.stopped_registry("get consumer known blocks")?;
        registry
            .state(id)
            .map(|state| state.known_block_hashes().to_vec())
            .ok_or(SyncError::ConsumerNotFound)
    }

    pub fn save_consumer_state<W: Write>(&self, id: ConsumerId, writer: &mut W) -> Result<()> {
        let registry = self.inner.stopped_registry("save consumer state")?;
        registry
            .state(id)
            .ok_or(SyncError::ConsumerNotFound)?
            .save(writer)
    }

    pub fn load_consumer_state<R: Read>(&self, id: ConsumerId, reader: &mut R) -> Result<()> {
        let mut registry = self.inner.stopped_registry("load consumer state")?;
        registry
            .state_mut(id)
            .ok_or(SyncError::ConsumerNotFound)?
            .load(reader, &self.inner.genesis_block_hash)
    }

    // =====================================================================
    // Unconfirmed transaction tasks
    // =====================================================================

    /// Queues `transaction` for every consumer. The handle settles after the
    /// worker ran the task.
    pub fn add_unconfirmed_transaction(&self, transaction: Transaction) -> Result<TaskHandle> {
        log::info!("[SYNC] Adding unconfirmed transaction, hash {}", transaction.hash);
        self.inner
            .submit("add unconfirmed transaction", |tasks| tasks.push_addition(transaction))
    }

    pub fn remove_unconfirmed_transaction(&self, transaction_hash: Hash) -> Result<TaskHandle> {
        log::info!("[SYNC] Removing unconfirmed transaction, hash {}", transaction_hash);
        self.inner
            .submit("remove unconfirmed transaction", |tasks| tasks.push_removal(transaction_hash))
    }

    // =====================================================================
    // Lifecycle
    // =====================================================================

    pub fn start(&self) -> Result<()> {
        log::info!("[SYNC] Starting...");

        // Held until the handle is stored so a concurrent stop() joins it.
        let mut worker = lock(&self.worker);

        {
            let consumers = lock(&self.inner.consumers);
            if consumers.is_empty() {
                log::error!("[SYNC] Failed to start: no consumers");
                return Err(SyncError::NoConsumers);
            }

            let next = lock(&self.inner.control).lifecycle.start().map_err(|e| {
                log::error!("[SYNC] Failed to start: {}", e);
                e
            })?;
            log::debug!("[SYNC] First state: {:?}", next);
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || inner.working_procedure());

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                log::info!("[SYNC] Started");
                Ok(())
            }
            Err(e) => {
                log::error!("[SYNC] Failed to spawn worker thread: {}", e);
                // No worker will ever enter the requested state.
                let mut control = lock(&self.inner.control);
                control.lifecycle.request(State::Stopped);
                control.lifecycle.advance();
                Err(e.into())
            }
        }
    }

    /// Requests `Stopped` and joins the worker. Pending tasks are settled
    /// before the worker exits.
    pub fn stop(&self) {
        log::info!("[SYNC] Stopping...");
        self.inner.request_state(State::Stopped);

        let worker = lock(&self.worker).take();
        if let Some(handle) = worker {
            if handle.join().is_err() {
                log::error!("[SYNC] Worker thread panicked");
            }
        }

        log::info!("[SYNC] Stopped");
    }

    /// Writes the genesis block hash.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        log::info!("[SYNC] Saving...");
        save_genesis(writer, &self.inner.genesis_block_hash)?;
        log::info!("[SYNC] Saved");
        Ok(())
    }

    /// Reads a genesis block hash and checks it against the currency's.
    pub fn load<R: Read>(&self, reader: &mut R) -> Result<()> {
        log::info!("[SYNC] Loading...");
        load_genesis(reader, &self.inner.genesis_block_hash).map_err(|e| {
            log::error!("[SYNC] Failed to load: {}", e);
            e
        })?;
        log::info!("[SYNC] Loaded");
        Ok(())
    }

    // =====================================================================
    // Observers and introspection
    // =====================================================================

    pub fn add_observer<F>(&self, listener: F) -> ObserverId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.inner.observers.add(Arc::new(listener))
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.remove(id)
    }

    /// Hash of the newest block accepted by any consumer, genesis initially.
    pub fn last_block_id(&self) -> Hash {
        *lock(&self.inner.last_block_id)
    }

    /// `(current, future)` lifecycle states.
    pub fn state(&self) -> (State, State) {
        let control = lock(&self.inner.control);
        (control.lifecycle.current(), control.lifecycle.future())
    }

    pub fn is_fully_stopped(&self) -> bool {
        lock(&self.inner.control).lifecycle.is_fully_stopped()
    }
}

impl Drop for BlockchainSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl SynchronizerInner {
    // =====================================================================
    // Worker loop
    // =====================================================================

    fn working_procedure(&self) {
        log::debug!("[SYNC] Worker started");

        while !self.should_stop() {
            self.actualize_future_state();
        }

        // Enter Stopped: detach from the node, settle queued tasks.
        self.actualize_future_state();

        log::debug!("[SYNC] Worker stopped");
    }

    fn actualize_future_state(&self) {
        let (transition, tasks) = {
            let mut control = lock(&self.control);
            let tasks = control.tasks.drain();
            let transition = control.lifecycle.advance();
            (transition, tasks)
        };

        match transition.observer {
            ObserverChange::Attach => self.attach_node_observer(),
            ObserverChange::Detach => self.detach_node_observer(),
            ObserverChange::Keep => {}
        }

        self.run_tasks(tasks);

        log::trace!("[SYNC] Entered {:?}, action {:?}", transition.entered, transition.action);
        match transition.action {
            Action::Nothing => {}
            Action::RemoveOutdatedTransactions => self.remove_outdated_transactions(),
            Action::SyncBlockchain => self.start_blockchain_sync(),
            Action::SyncPool => self.start_pool_sync(),
            Action::WaitForWork => self.wait_for_work(),
        }
    }

    fn wait_for_work(&self) {
        log::debug!("[SYNC] Idle");
        let control = lock(&self.control);
        let _control = self
            .wake
            .wait_while(control, |c| {
                c.lifecycle.future() == State::Idle && c.tasks.is_empty()
            })
            .unwrap_or_else(PoisonError::into_inner);
        log::debug!("[SYNC] Woke up");
    }

    /// Sleeps up to `duration`, returning early on stop. Returns whether
    /// stop was requested.
    pub(super) fn pause(&self, duration: Duration) -> bool {
        let control = lock(&self.control);
        let (control, _) = self
            .wake
            .wait_timeout_while(control, duration, |c| !c.lifecycle.should_stop())
            .unwrap_or_else(PoisonError::into_inner);
        control.lifecycle.should_stop()
    }

    // =====================================================================
    // Lifecycle helpers
    // =====================================================================

    pub(super) fn should_stop(&self) -> bool {
        lock(&self.control).lifecycle.should_stop()
    }

    pub(super) fn request_state(&self, state: State) -> bool {
        let changed = lock(&self.control).lifecycle.request(state);
        if changed {
            self.wake.notify_all();
        }
        changed
    }

    pub(super) fn request_state_unless_stopping(&self, state: State) -> bool {
        let changed = lock(&self.control)
            .lifecycle
            .request_if(state, |s| !s.should_stop());
        if changed {
            self.wake.notify_all();
        }
        changed
    }

    pub(super) fn return_to_idle(&self) -> bool {
        lock(&self.control).lifecycle.return_to_idle()
    }

    /// Ends a cycle on error: back to idle unless stopping, then one
    /// completion event.
    pub(super) fn fail_cycle(&self, error: SyncError, context: &str) {
        if error.is_interrupted() {
            log::debug!("[SYNC] {}: interrupted", context);
        } else {
            log::error!("[SYNC] {}: {}", context, error);
            self.return_to_idle();
        }
        self.notify_completed(Err(error));
    }

    pub(super) fn notify_completed(&self, result: Result<()>) {
        self.observers.notify(SyncEvent::Completed(result));
    }

    pub(super) fn notify_progress(&self, processed: u32, total: u32) {
        self.observers
            .notify(SyncEvent::ProgressUpdated { processed, total });
    }

    fn stopped_registry(&self, operation: &'static str) -> Result<StoppedRegistry<'_>> {
        let guard = lock(&self.consumers);
        if !lock(&self.control).lifecycle.is_fully_stopped() {
            log::error!("[SYNC] Failed to {}: not stopped", operation);
            return Err(SyncError::NotStopped(operation));
        }
        Ok(StoppedRegistry::new(guard))
    }

    fn submit<F>(&self, operation: &'static str, push: F) -> Result<TaskHandle>
    where
        F: FnOnce(&mut TaskQueue) -> TaskHandle,
    {
        let mut control = lock(&self.control);
        if control.lifecycle.should_stop() {
            log::error!("[SYNC] Failed to {}: not running", operation);
            return Err(SyncError::NotRunning(operation));
        }
        let handle = push(&mut control.tasks);
        self.wake.notify_all();
        Ok(handle)
    }

    // =====================================================================
    // Node observer
    // =====================================================================

    fn on_node_event(&self, event: NodeEvent) {
        log::debug!("[NODE] Event: {:?}", event);
        let changed = lock(&self.control).lifecycle.handle_node_event(event);
        if changed {
            self.wake.notify_all();
        }
    }

    fn attach_node_observer(&self) {
        let weak = self.self_ref.clone();
        let listener: NodeListener = Arc::new(move |event: NodeEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.on_node_event(event);
            }
        });

        let id = self.node.add_observer(listener);
        log::debug!("[NODE] Observer attached: {:?}", id);
        *lock(&self.node_listener) = Some(id);
    }

    fn detach_node_observer(&self) {
        let id = lock(&self.node_listener).take();
        if let Some(id) = id {
            let removed = self.node.remove_observer(id);
            log::debug!("[NODE] Observer detached: {:?} ({})", id, removed);
        }
    }

    // =====================================================================
    // Unconfirmed transactions
    // =====================================================================

    fn run_tasks(&self, tasks: DrainedTasks) {
        if tasks.is_empty() {
            return;
        }

        log::debug!(
            "[SYNC] Running {} removal and {} addition tasks",
            tasks.removals.len(),
            tasks.additions.len()
        );

        for (hash, sender) in tasks.removals {
            settle(sender, || {
                self.remove_unconfirmed(&hash);
                Ok(())
            });
        }

        for (transaction, sender) in tasks.additions {
            settle(sender, || self.add_unconfirmed(&transaction));
        }
    }

    /// Adds to every consumer, rolling back the ones that already accepted
    /// when a later one fails.
    fn add_unconfirmed(&self, transaction: &Transaction) -> Result<()> {
        let consumers = lock(&self.consumers);

        for (index, (id, entry)) in consumers.iter().enumerate() {
            if let Err(e) = entry.consumer.add_unconfirmed_transaction(transaction) {
                log::error!(
                    "[SYNC] Failed to add unconfirmed transaction {} to {}: {:#}",
                    transaction.hash,
                    id,
                    e
                );
                for (_, accepted) in consumers.iter().take(index) {
                    accepted
                        .consumer
                        .remove_unconfirmed_transaction(&transaction.hash);
                }
                return Err(SyncError::Consumer(e));
            }
        }

        log::info!("[SYNC] Unconfirmed transaction added, hash {}", transaction.hash);
        Ok(())
    }

    fn remove_unconfirmed(&self, transaction_hash: &Hash) {
        let consumers = lock(&self.consumers);
        for (_, entry) in consumers.iter() {
            entry.consumer.remove_unconfirmed_transaction(transaction_hash);
        }
        log::info!("[SYNC] Unconfirmed transaction removed, hash {}", transaction_hash);
    }
}
