//! [`Delegate`] implementations over common asynchronous primitives.

use crate::delegate::{Delegate, DelegateError, DelegateFuture};
use crate::error::BoxError;

use std::future::Future;
use std::marker::PhantomData;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives any fallible future. Abandonment simply drops it.
pub struct FutureDelegate<F, T, E> {
  future: F,
  _output: PhantomData<fn() -> (T, E)>,
}

/// Adapts a future yielding `Result<T, E>` into a delegate.
pub fn from_future<F, T, E>(future: F) -> FutureDelegate<F, T, E>
where
  F: Future<Output = Result<T, E>> + Send + 'static,
  T: Clone + Send + Sync + 'static,
  E: Into<BoxError> + 'static,
{
  FutureDelegate {
    future,
    _output: PhantomData,
  }
}

impl<F, T, E> Delegate for FutureDelegate<F, T, E>
where
  F: Future<Output = Result<T, E>> + Send + 'static,
  T: Clone + Send + Sync + 'static,
  E: Into<BoxError> + 'static,
{
  type Output = T;

  fn run(self, _cancel: CancellationToken) -> DelegateFuture<T> {
    let future = self.future;
    Box::pin(async move { future.await.map_err(DelegateError::failed) })
  }
}

/// Work that takes the cancellation token and checks it itself.
pub struct CooperativeDelegate<M> {
  make: M,
}

/// Adapts a closure `FnOnce(CancellationToken) -> Future` into a delegate.
pub fn from_fn<M, Fut, T>(make: M) -> CooperativeDelegate<M>
where
  M: FnOnce(CancellationToken) -> Fut + Send + 'static,
  Fut: Future<Output = Result<T, DelegateError>> + Send + 'static,
  T: Clone + Send + Sync + 'static,
{
  CooperativeDelegate { make }
}

impl<M, Fut, T> Delegate for CooperativeDelegate<M>
where
  M: FnOnce(CancellationToken) -> Fut + Send + 'static,
  Fut: Future<Output = Result<T, DelegateError>> + Send + 'static,
  T: Clone + Send + Sync + 'static,
{
  type Output = T;

  fn run(self, cancel: CancellationToken) -> DelegateFuture<T> {
    Box::pin((self.make)(cancel))
  }
}

/// Wraps an already spawned Tokio task.
///
/// Abandoning the delegate aborts the task. A task aborted by someone else
/// settles as cancelled; a task that panicked settles as failed.
pub struct SpawnedDelegate<T, E> {
  task: AbortOnDrop<Result<T, E>>,
}

pub fn from_join_handle<T, E>(handle: JoinHandle<Result<T, E>>) -> SpawnedDelegate<T, E>
where
  T: Clone + Send + Sync + 'static,
  E: Into<BoxError> + Send + 'static,
{
  SpawnedDelegate {
    task: AbortOnDrop(handle),
  }
}

/// Aborts the wrapped task when dropped; aborting a finished task is a no-op.
struct AbortOnDrop<R>(JoinHandle<R>);

impl<R> Drop for AbortOnDrop<R> {
  fn drop(&mut self) {
    self.0.abort();
  }
}

impl<T, E> Delegate for SpawnedDelegate<T, E>
where
  T: Clone + Send + Sync + 'static,
  E: Into<BoxError> + Send + 'static,
{
  type Output = T;

  fn run(self, cancel: CancellationToken) -> DelegateFuture<T> {
    let mut guard = self.task;
    Box::pin(async move {
      tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DelegateError::Cancelled),
        joined = &mut guard.0 => match joined {
          Ok(result) => result.map_err(DelegateError::failed),
          Err(join_error) => Err(DelegateError::failed(join_error)),
        },
      }
    })
  }
}

/// Producer half of [`deferred`].
///
/// Settles the paired delegate from outside the pool. Dropping it without
/// settling counts as cancellation of the delegate's own work.
#[derive(Debug)]
pub struct Completer<T> {
  tx: oneshot::Sender<Result<T, DelegateError>>,
}

impl<T> Completer<T> {
  /// Returns `false` when the delegate is no longer listening (abandoned or
  /// the pool went away).
  pub fn complete(self, value: T) -> bool {
    self.tx.send(Ok(value)).is_ok()
  }

  pub fn fail(self, cause: impl Into<BoxError>) -> bool {
    self.tx.send(Err(DelegateError::failed(cause))).is_ok()
  }

  pub fn cancel(self) -> bool {
    self.tx.send(Err(DelegateError::Cancelled)).is_ok()
  }

  /// Whether the delegate side was dropped, i.e. the outcome will never be read.
  pub fn is_abandoned(&self) -> bool {
    self.tx.is_closed()
  }
}

/// Consumer half of [`deferred`].
#[derive(Debug)]
pub struct DeferredDelegate<T> {
  rx: oneshot::Receiver<Result<T, DelegateError>>,
}

/// Creates a delegate whose outcome is set by hand through the returned [`Completer`].
pub fn deferred<T>() -> (Completer<T>, DeferredDelegate<T>)
where
  T: Clone + Send + Sync + 'static,
{
  let (tx, rx) = oneshot::channel();
  (Completer { tx }, DeferredDelegate { rx })
}

impl<T> Delegate for DeferredDelegate<T>
where
  T: Clone + Send + Sync + 'static,
{
  type Output = T;

  fn run(self, _cancel: CancellationToken) -> DelegateFuture<T> {
    let rx = self.rx;
    Box::pin(async move {
      match rx.await {
        Ok(result) => result,
        Err(_sender_dropped) => Err(DelegateError::Cancelled),
      }
    })
  }
}
