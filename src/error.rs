use crate::identity::DelegateId;

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

/// A type-erased error raised by a delegate's underlying work.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by the `delegate_pool` crate.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
  #[error("Outcome read before the delegate settled")]
  Unsettled,

  #[error(transparent)]
  DelegateFailed(#[from] DelegateFailure),

  #[error("Delegate was cancelled")]
  Cancelled,

  #[error("Pool is shutting down or already shut down, cannot start new delegates")]
  PoolShuttingDown,
}

/// The single externally visible failure kind.
///
/// Wraps whatever the delegate's work raised; the original error stays
/// reachable through [`DelegateFailure::cause`] and [`StdError::source`].
#[derive(Error, Debug, Clone)]
#[error("Delegate {delegate_id} failed: {cause}")]
pub struct DelegateFailure {
  delegate_id: DelegateId,
  #[source]
  cause: Arc<dyn StdError + Send + Sync + 'static>,
}

impl DelegateFailure {
  pub(crate) fn new(delegate_id: DelegateId, cause: BoxError) -> Self {
    Self {
      delegate_id,
      cause: Arc::from(cause),
    }
  }

  /// Identity of the delegate whose work failed.
  pub fn delegate_id(&self) -> &DelegateId {
    &self.delegate_id
  }

  /// The error raised by the delegate, unwrapped.
  pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
    &*self.cause
  }

  /// Attempts to view the cause as a concrete error type.
  pub fn cause_as<E: StdError + 'static>(&self) -> Option<&E> {
    self.cause.downcast_ref::<E>()
  }
}

/// Marker error a delegate may raise to signal that its own work was
/// cancelled. It is never wrapped as a failure.
#[derive(Error, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[error("delegate work was cancelled")]
pub struct Cancelled;

/// Cause recorded when a delegate panics while running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delegate panicked: {message}")]
pub struct DelegatePanicked {
  pub message: String,
}
