//! Request scheduling for the worker thread.
//!
//! * Node calls are callback based; `round_trip` turns one call into a
//!   blocking wait on a oneshot channel, with cooperative cancellation
//!   checks before and after.
//! * Unconfirmed transaction tasks are queued by application threads and
//!   drained by the worker, each settling its own `TaskHandle`.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{NodeError, Result, SyncError};
use crate::sync::node::api::Callback;
use crate::types::{Hash, Transaction};

/// Issues one node request and blocks until its callback fires.
///
/// Must run on a thread outside any async runtime (the worker thread).
pub(crate) fn round_trip<T, S, F>(should_stop: S, issue: F) -> Result<T>
where
    T: Send + 'static,
    S: Fn() -> bool,
    F: FnOnce(Callback<T>),
{
    if should_stop() {
        return Err(SyncError::Interrupted);
    }

    let (sender, receiver) = oneshot::channel();
    issue(Box::new(move |result| {
        let _ = sender.send(result);
    }));

    let result = receiver
        .blocking_recv()
        .unwrap_or(Err(NodeError::RequestDropped));

    if should_stop() {
        return Err(SyncError::Interrupted);
    }

    Ok(result?)
}

type TaskSender = oneshot::Sender<Result<()>>;

/// Completion handle of an unconfirmed transaction task.
///
/// Settled exactly once by the worker thread. Use `wait` from plain threads
/// or `.await` it from async code.
#[derive(Debug)]
pub struct TaskHandle {
    receiver: oneshot::Receiver<Result<()>>,
}

impl TaskHandle {
    fn new() -> (Self, TaskSender) {
        let (sender, receiver) = oneshot::channel();
        (Self { receiver }, sender)
    }

    /// Blocks until the task is settled. Panics inside an async runtime.
    pub fn wait(self) -> Result<()> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(SyncError::Interrupted))
    }

    /// Result if already settled, without blocking.
    pub fn try_wait(&mut self) -> Option<Result<()>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(SyncError::Interrupted)),
        }
    }
}

impl Future for TaskHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(SyncError::Interrupted)))
    }
}

/// Two independent FIFO queues of pending transaction tasks.
#[derive(Default)]
pub(crate) struct TaskQueue {
    additions: VecDeque<(Transaction, TaskSender)>,
    removals: VecDeque<(Hash, TaskSender)>,
}

/// Tasks taken out of the queue in one drain, removals first.
pub(crate) struct DrainedTasks {
    pub removals: Vec<(Hash, TaskSender)>,
    pub additions: Vec<(Transaction, TaskSender)>,
}

impl TaskQueue {
    pub fn push_addition(&mut self, transaction: Transaction) -> TaskHandle {
        let (handle, sender) = TaskHandle::new();
        self.additions.push_back((transaction, sender));
        handle
    }

    pub fn push_removal(&mut self, hash: Hash) -> TaskHandle {
        let (handle, sender) = TaskHandle::new();
        self.removals.push_back((hash, sender));
        handle
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    pub fn drain(&mut self) -> DrainedTasks {
        DrainedTasks {
            removals: self.removals.drain(..).collect(),
            additions: self.additions.drain(..).collect(),
        }
    }
}

impl DrainedTasks {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.additions.is_empty()
    }
}

/// Runs one task body, turning a panic into an error for its handle.
pub(crate) fn settle<F>(sender: TaskSender, task: F)
where
    F: FnOnce() -> Result<()>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(task))
        .unwrap_or_else(|payload| Err(SyncError::TaskPanicked(panic_message(payload.as_ref()))));

    if sender.send(result).is_err() {
        log::debug!("[SYNC] task handle dropped before completion");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
