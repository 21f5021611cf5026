use crate::error::{DelegateFailure, PoolError};
use crate::identity::DelegateId;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures_intrusive::sync::ManualResetEvent;
use parking_lot::Mutex;
use tracing::{error, trace};

/// The terminal result of a delegate.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
  Completed(T),
  Failed(DelegateFailure),
  /// Cancelled from inside the delegate or abandoned by the pool owner.
  Cancelled,
}

impl<T> Outcome<T> {
  pub fn is_completed(&self) -> bool {
    matches!(self, Outcome::Completed(_))
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, Outcome::Failed(_))
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, Outcome::Cancelled)
  }

  pub fn completed(&self) -> Option<&T> {
    match self {
      Outcome::Completed(value) => Some(value),
      _ => None,
    }
  }

  pub fn failure(&self) -> Option<&DelegateFailure> {
    match self {
      Outcome::Failed(failure) => Some(failure),
      _ => None,
    }
  }

  pub fn into_result(self) -> Result<T, PoolError> {
    match self {
      Outcome::Completed(value) => Ok(value),
      Outcome::Failed(failure) => Err(PoolError::DelegateFailed(failure)),
      Outcome::Cancelled => Err(PoolError::Cancelled),
    }
  }
}

type Observer<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

enum CellState<T> {
  Pending(Vec<Observer<T>>),
  Settled(Outcome<T>),
}

struct Cell<T> {
  delegate_id: DelegateId,
  generation: u64,
  state: Mutex<CellState<T>>,
  settled: ManualResetEvent,
}

/// Single-assignment container for a delegate's eventual outcome.
///
/// Clones share the same cell: the pool hands one clone to every caller
/// asking for the same delegate, and all of them observe the same outcome.
pub struct OutcomeFuture<T> {
  cell: Arc<Cell<T>>,
}

impl<T> Clone for OutcomeFuture<T> {
  fn clone(&self) -> Self {
    Self {
      cell: self.cell.clone(),
    }
  }
}

impl<T> fmt::Debug for OutcomeFuture<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("OutcomeFuture")
      .field("delegate_id", &self.cell.delegate_id)
      .field("generation", &self.cell.generation)
      .field("settled", &self.is_settled())
      .finish()
  }
}

/// A settlement that won the race, with the observers it still has to notify.
///
/// Held back so the pool can finish its registry bookkeeping before any
/// observer code runs. Waiters are released only after the observers ran,
/// whether the receipt is dispatched or simply dropped.
#[must_use = "observers are only notified when the receipt is dispatched"]
pub(crate) struct SettleReceipt<T> {
  cell: Arc<Cell<T>>,
  outcome: Outcome<T>,
  observers: Vec<Observer<T>>,
}

impl<T> SettleReceipt<T> {
  pub(crate) fn outcome(&self) -> &Outcome<T> {
    &self.outcome
  }

  pub(crate) fn dispatch(self) {
    drop(self);
  }
}

impl<T> Drop for SettleReceipt<T> {
  fn drop(&mut self) {
    for observer in std::mem::take(&mut self.observers) {
      run_observer(observer, &self.outcome);
    }
    self.cell.settled.set();
  }
}

fn run_observer<T>(observer: Observer<T>, outcome: &Outcome<T>) {
  if catch_unwind(AssertUnwindSafe(|| observer(outcome))).is_err() {
    error!("An outcome observer panicked; the outcome itself is unaffected.");
  }
}

impl<T> OutcomeFuture<T> {
  /// Identity of the delegate this future belongs to.
  pub fn id(&self) -> &DelegateId {
    &self.cell.delegate_id
  }

  /// Registration number; a delegate re-registered under the same id gets a new one.
  pub fn generation(&self) -> u64 {
    self.cell.generation
  }

  /// Whether both handles point at the same cell.
  pub fn ptr_eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.cell, &other.cell)
  }

  pub fn is_settled(&self) -> bool {
    matches!(*self.cell.state.lock(), CellState::Settled(_))
  }
}

impl<T: Clone + Send + Sync + 'static> OutcomeFuture<T> {
  pub(crate) fn new(delegate_id: DelegateId, generation: u64) -> Self {
    Self {
      cell: Arc::new(Cell {
        delegate_id,
        generation,
        state: Mutex::new(CellState::Pending(Vec::new())),
        settled: ManualResetEvent::new(false),
      }),
    }
  }

  /// Reads the outcome without waiting.
  ///
  /// # Errors
  /// Returns `PoolError::Unsettled` if the delegate has not reached a terminal state yet.
  pub fn try_outcome(&self) -> Result<Outcome<T>, PoolError> {
    match &*self.cell.state.lock() {
      CellState::Settled(outcome) => Ok(outcome.clone()),
      CellState::Pending(_) => Err(PoolError::Unsettled),
    }
  }

  /// Reads the completed value without waiting.
  ///
  /// # Errors
  /// `PoolError::Unsettled` before settlement, `PoolError::DelegateFailed` or
  /// `PoolError::Cancelled` if the delegate did not complete.
  pub fn get_completed(&self) -> Result<T, PoolError> {
    self.try_outcome()?.into_result()
  }

  /// Suspends until the delegate settles and returns its outcome.
  ///
  /// Returns only after every observer registered with
  /// [`on_settled`](Self::on_settled) before settlement has run.
  pub async fn wait(&self) -> Outcome<T> {
    loop {
      self.cell.settled.wait().await;
      if let Ok(outcome) = self.try_outcome() {
        return outcome;
      }
    }
  }

  /// Blocks the current thread until the delegate settles.
  ///
  /// Do not call this from a Tokio worker thread; use [`wait`](Self::wait) there.
  pub fn wait_blocking(&self) -> Outcome<T> {
    futures::executor::block_on(self.wait())
  }

  /// Registers a callback run exactly once with the outcome.
  ///
  /// Callbacks registered before settlement run on the settling thread, in
  /// registration order, before [`wait`](Self::wait) and
  /// [`wait_blocking`](Self::wait_blocking) return. If the future is already
  /// settled the callback runs immediately on the calling thread. An observer
  /// must not wait on the future it is registered on.
  pub fn on_settled(&self, observer: impl FnOnce(&Outcome<T>) + Send + 'static) {
    let observer: Observer<T> = Box::new(observer);
    let outcome = {
      let mut state = self.cell.state.lock();
      match &mut *state {
        CellState::Pending(observers) => {
          observers.push(observer);
          return;
        }
        CellState::Settled(outcome) => outcome.clone(),
      }
    };
    run_observer(observer, &outcome);
  }

  /// Records `outcome` if nothing was recorded yet.
  ///
  /// Returns `None` when another settlement already won; the losing outcome
  /// is dropped without error.
  pub(crate) fn settle(&self, outcome: Outcome<T>) -> Option<SettleReceipt<T>> {
    let observers = {
      let mut state = self.cell.state.lock();
      match &mut *state {
        CellState::Settled(_) => {
          trace!(delegate_id = %self.cell.delegate_id, generation = self.cell.generation, "Discarding second settlement.");
          return None;
        }
        CellState::Pending(observers) => {
          let observers = std::mem::take(observers);
          *state = CellState::Settled(outcome.clone());
          observers
        }
      }
    };
    Some(SettleReceipt {
      cell: self.cell.clone(),
      outcome,
      observers,
    })
  }
}
