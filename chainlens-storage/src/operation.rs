//! Cancellable units of work and the queue that runs them.
//!
//! An [`Operation`] is a named, lazily started future paired with a
//! cancellation token. Operations compose into small dependency graphs with
//! [`Operation::and_then`] and [`Operation::map`]: a downstream step only
//! runs once its upstream succeeded, and an upstream failure short-circuits
//! every step after it. All steps of a graph share one token, so cancelling
//! any handle cancels the whole graph.
//!
//! [`OperationQueue`] submits operations to a tokio runtime. Callers get an
//! [`OperationHandle`] and either await it or block on its one-shot signal.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use chainlens_core::{ChainlensResult, OperationError};
use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// A named, cancellable unit of asynchronous work.
///
/// Nothing runs until [`Operation::run`] is awaited or the operation is
/// enqueued. An operation cancelled before it starts never executes its body;
/// one cancelled while suspended is dropped at that suspension point.
pub struct Operation<T> {
    name: Cow<'static, str>,
    token: CancellationToken,
    body: BoxFuture<'static, ChainlensResult<T>>,
}

impl<T> fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("cancelled", &self.token.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn cancelled(name: &str) -> chainlens_core::ChainlensError {
    OperationError::Cancelled {
        operation: name.to_string(),
    }
    .into()
}

impl<T: Send + 'static> Operation<T> {
    /// Wrap a future as an operation.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, body: F) -> Self
    where
        F: Future<Output = ChainlensResult<T>> + Send + 'static,
    {
        Self {
            name: name.into(),
            token: CancellationToken::new(),
            body: Box::pin(body),
        }
    }

    /// An operation that immediately yields `result`.
    pub fn ready(name: impl Into<Cow<'static, str>>, result: ChainlensResult<T>) -> Self {
        Self::new(name, std::future::ready(result))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token shared by every step of this operation's graph.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Execute the operation on the current task.
    pub async fn run(self) -> ChainlensResult<T> {
        let Self { name, token, body } = self;

        if token.is_cancelled() {
            trace!(operation = %name, "skipping cancelled operation");
            return Err(cancelled(&name));
        }

        tokio::select! {
            biased;
            () = token.cancelled() => {
                trace!(operation = %name, "operation cancelled while suspended");
                Err(cancelled(&name))
            }
            result = body => result,
        }
    }

    /// Add a step that depends on this operation's output.
    ///
    /// `next` only runs if this operation succeeds; otherwise the new
    /// operation yields the upstream error unchanged.
    pub fn and_then<U, F, Fut>(self, name: impl Into<Cow<'static, str>>, next: F) -> Operation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ChainlensResult<U>> + Send + 'static,
    {
        let token = self.token.clone();
        let body = async move {
            let value = self.run().await?;
            next(value).await
        };

        Operation {
            name: name.into(),
            token,
            body: Box::pin(body),
        }
    }

    /// Add a synchronous mapping step.
    pub fn map<U, F>(self, name: impl Into<Cow<'static, str>>, f: F) -> Operation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> ChainlensResult<U> + Send + 'static,
    {
        self.and_then(name, move |value| std::future::ready(f(value)))
    }
}

/// Submits operations to a shared tokio runtime.
#[derive(Debug, Clone)]
pub struct OperationQueue {
    handle: Handle,
}

impl OperationQueue {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Queue backed by the runtime of the calling context.
    pub fn current() -> ChainlensResult<Self> {
        Handle::try_current().map(Self::new).map_err(|_| {
            OperationError::RuntimeUnavailable {
                operation: "operation queue".to_string(),
            }
            .into()
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Schedule `operation` on a worker and return a handle to its result.
    pub fn enqueue<T: Send + 'static>(&self, operation: Operation<T>) -> OperationHandle<T> {
        let name = operation.name.clone();
        let token = operation.cancellation_token();
        let (sender, receiver) = oneshot::channel();

        self.handle.spawn(async move {
            let result = operation.run().await;
            // The caller may have stopped waiting.
            let _ = sender.send(result);
        });

        OperationHandle {
            name,
            token,
            receiver,
        }
    }
}

/// Handle to an enqueued operation.
#[derive(Debug)]
pub struct OperationHandle<T> {
    name: Cow<'static, str>,
    token: CancellationToken,
    receiver: oneshot::Receiver<ChainlensResult<T>>,
}

impl<T> OperationHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the operation. Has no effect once it has completed.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the operation's result.
    pub async fn join(self) -> ChainlensResult<T> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(OperationError::Aborted {
                operation: self.name.into_owned(),
            }
            .into()),
        }
    }

    /// Block the current thread until the result arrives.
    ///
    /// Must not be called from within an async context.
    pub fn join_blocking(self) -> ChainlensResult<T> {
        match self.receiver.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(OperationError::Aborted {
                operation: self.name.into_owned(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainlens_core::{ChainlensError, CodecError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_run_yields_body_result() {
        let op = Operation::new("answer", async { Ok(42u32) });
        assert_eq!(op.run().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_cancelled_operation_never_runs_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let op = Operation::new("side effect", async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        op.cancel();
        let err = op.run().await.unwrap_err();

        assert!(err.is_cancelled());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dependent_steps_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first_log = Arc::clone(&log);
        let second_log = Arc::clone(&log);

        let op = Operation::new("first", async move {
            first_log.lock().unwrap().push("first");
            Ok(1u32)
        })
        .and_then("second", move |value| async move {
            second_log.lock().unwrap().push("second");
            Ok(value + 1)
        })
        .map("third", |value| Ok(value * 10));

        assert_eq!(op.run().await.unwrap(), 20);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_upstream_failure_short_circuits() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let op = Operation::<u32>::ready(
            "fetch codec",
            Err(CodecError::FactoryUnavailable {
                reason: "metadata syncing".to_string(),
            }
            .into()),
        )
        .and_then("decode", move |value| async move {
            flag.store(true, Ordering::SeqCst);
            Ok(value)
        });

        let err = op.run().await.unwrap_err();
        assert!(matches!(err, ChainlensError::Codec(_)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelling_downstream_cancels_graph() {
        let op = Operation::new("first", async { Ok(1u32) })
            .map("second", |value| Ok(value + 1));
        op.cancel();
        assert!(op.run().await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_queue_runs_operation() {
        let queue = OperationQueue::current().unwrap();
        let handle = queue.enqueue(Operation::new("queued", async { Ok("done") }));
        assert_eq!(handle.name(), "queued");
        assert_eq!(handle.join().await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_queue_cancel_before_start() {
        // current_thread runtime: the spawned task cannot start before we yield
        let queue = OperationQueue::current().unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let handle = queue.enqueue(Operation::new("late", async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));
        handle.cancel();

        assert!(handle.join().await.unwrap_err().is_cancelled());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_queue_without_runtime_fails() {
        let err = OperationQueue::current().unwrap_err();
        assert!(matches!(
            err,
            ChainlensError::Operation(OperationError::RuntimeUnavailable { .. })
        ));
    }

    #[test]
    fn test_join_blocking_from_plain_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let queue = OperationQueue::new(runtime.handle().clone());

        let handle = queue.enqueue(Operation::new("blocking", async { Ok(7u8) }));
        assert_eq!(handle.join_blocking().unwrap(), 7);
    }
}
