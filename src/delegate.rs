use crate::error::{BoxError, Cancelled};

use std::future::Future;
use std::pin::Pin;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

/// The future a delegate runs to its terminal event.
pub type DelegateFuture<T> = Pin<Box<dyn Future<Output = Result<T, DelegateError>> + Send + 'static>>;

/// How a delegate's work ended without producing a value.
///
/// Cancellation and failure are kept apart here so the pool never has to
/// guess which one an error represents.
#[derive(Debug)]
pub enum DelegateError {
  /// The work was cancelled from inside its own execution.
  Cancelled,
  /// The work failed; the cause is surfaced to observers wrapped in a
  /// [`DelegateFailure`](crate::DelegateFailure).
  Failed(BoxError),
}

impl DelegateError {
  /// Classifies an arbitrary error raised by delegate work.
  ///
  /// The [`Cancelled`] marker and a cancelled [`JoinError`] are cancellation
  /// signals, everything else is a failure.
  pub fn failed(cause: impl Into<BoxError>) -> Self {
    let cause = cause.into();
    if cause.is::<Cancelled>() {
      return DelegateError::Cancelled;
    }
    if let Some(join_error) = cause.downcast_ref::<JoinError>() {
      if join_error.is_cancelled() {
        return DelegateError::Cancelled;
      }
    }
    DelegateError::Failed(cause)
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, DelegateError::Cancelled)
  }
}

impl From<Cancelled> for DelegateError {
  fn from(_: Cancelled) -> Self {
    DelegateError::Cancelled
  }
}

/// A unit of deferred work the pool can drive to a single terminal outcome.
///
/// `run` is called once, on the delegate's own task, right after the pool
/// registers it. The pool stops polling the returned future as soon as the
/// delegate is abandoned and cancels `cancel` at the same moment, so work that
/// lives outside the future (spawned tasks, threads) should watch the token.
pub trait Delegate: Send + 'static {
  type Output: Clone + Send + Sync + 'static;

  fn run(self, cancel: CancellationToken) -> DelegateFuture<Self::Output>;
}
