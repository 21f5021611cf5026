use crate::delegate::Delegate;
use crate::error::PoolError;
use crate::identity::DelegateId;
use crate::notifier::{CompletionInfo, CompletionNotifier, CompletionStatus, SettlementSink};
use crate::outcome::{Outcome, OutcomeFuture, SettleReceipt};
use crate::translate::translate;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Defines how the pool should behave upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Refuses new delegates and waits for every registered one to settle.
  Graceful,
  /// Abandons every registered delegate.
  ForcefulCancel,
}

struct PoolEntry<T> {
  generation: u64,
  token: CancellationToken,
  outcome: OutcomeFuture<T>,
}

type Registry<T> = Arc<DashMap<DelegateId, PoolEntry<T>>>;

/// Registry of running delegates keyed by [`DelegateId`].
///
/// Asking for the outcome of an id starts the delegate once; every later
/// request for the same id, until it settles, gets the same [`OutcomeFuture`].
pub struct DelegatePool<T: Clone + Send + Sync + 'static> {
  pool_name: Arc<String>,
  tokio_handle: TokioHandle,
  registry: Registry<T>,
  shutdown_token: CancellationToken,
  next_generation: AtomicU64,
  sink: Mutex<Option<SettlementSink>>,
  notifier: Arc<CompletionNotifier>,
}

impl<T: Clone + Send + Sync + 'static> DelegatePool<T> {
  pub fn new(tokio_handle: TokioHandle, pool_name: &str) -> Arc<Self> {
    let pool_name = Arc::new(pool_name.to_string());
    let (notifier, sink) = CompletionNotifier::new(tokio_handle.clone(), pool_name.clone());
    info!(pool_name = %*pool_name, "Delegate pool created.");
    Arc::new(Self {
      pool_name,
      tokio_handle,
      registry: Arc::new(DashMap::new()),
      shutdown_token: CancellationToken::new(),
      next_generation: AtomicU64::new(1),
      sink: Mutex::new(Some(sink)),
      notifier,
    })
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  /// Number of delegates registered and not yet settled.
  pub fn active_count(&self) -> usize {
    self.registry.len()
  }

  pub fn is_registered(&self, delegate_id: &DelegateId) -> bool {
    self.registry.contains_key(delegate_id)
  }

  pub fn registered_ids(&self) -> Vec<DelegateId> {
    self.registry.iter().map(|entry| entry.key().clone()).collect()
  }

  /// Returns the outcome of the delegate registered under `delegate_id`,
  /// starting one built by `make` if none is running.
  ///
  /// `make` is called at most once, and only when a new delegate is started.
  /// The identity is already registered while `make` runs, so concurrent
  /// callers join the same future and `make` itself may use the pool. A
  /// panicking `make` settles the outcome as failed.
  ///
  /// # Errors
  /// Returns `PoolError::PoolShuttingDown` if a new delegate would have to be
  /// started after shutdown began. Already running delegates can still be
  /// observed.
  pub fn outcome_for<D, M>(&self, delegate_id: DelegateId, make: M) -> Result<OutcomeFuture<T>, PoolError>
  where
    D: Delegate<Output = T>,
    M: FnOnce() -> D,
  {
    let (generation, token, outcome, sink) = match self.registry.entry(delegate_id.clone()) {
      Entry::Occupied(slot) => {
        trace!(pool_name = %*self.pool_name, %delegate_id, generation = slot.get().generation, "Joining delegate already in flight.");
        return Ok(slot.get().outcome.clone());
      }
      Entry::Vacant(slot) => {
        if self.shutdown_token.is_cancelled() {
          warn!(pool_name = %*self.pool_name, %delegate_id, "Refusing to start a delegate on a pool that is shutting down.");
          return Err(PoolError::PoolShuttingDown);
        }
        let sink = self.sink.lock().clone().ok_or(PoolError::PoolShuttingDown)?;

        let generation = self.next_generation.fetch_add(1, AtomicOrdering::Relaxed);
        let token = CancellationToken::new();
        let outcome = OutcomeFuture::new(delegate_id.clone(), generation);
        slot.insert(PoolEntry {
          generation,
          token: token.clone(),
          outcome: outcome.clone(),
        });
        (generation, token, outcome, sink)
      }
    };

    // The slot lock is released here.
    let delegate = match catch_unwind(AssertUnwindSafe(make)) {
      Ok(delegate) => delegate,
      Err(panic_payload) => {
        error!(pool_name = %*self.pool_name, %delegate_id, generation, "Delegate factory panicked.");
        let failed = translate(&delegate_id, Err(panic_payload));
        if let Some(receipt) = settle_registered(&self.registry, &delegate_id, generation, &outcome, failed) {
          sink.publish(&delegate_id, generation, receipt.outcome());
          receipt.dispatch();
        }
        return Ok(outcome);
      }
    };
    debug!(pool_name = %*self.pool_name, %delegate_id, generation, "Registered delegate. Starting it.");

    self.spawn_runner(delegate_id, generation, delegate, token, outcome.clone(), sink);
    Ok(outcome)
  }

  /// Looks up the outcome of a running delegate without starting anything.
  pub fn outcome_of(&self, delegate_id: &DelegateId) -> Option<OutcomeFuture<T>> {
    self.registry.get(delegate_id).map(|entry| entry.outcome.clone())
  }

  /// Cancels the delegate registered under `delegate_id` and settles its
  /// outcome as [`Outcome::Cancelled`].
  ///
  /// Unknown or already settled ids are ignored. The future settles as soon as
  /// cancellation is requested, whether or not the delegate has stopped yet.
  pub fn abandon(&self, delegate_id: &DelegateId) {
    let settled = match self.registry.entry(delegate_id.clone()) {
      Entry::Occupied(slot) => {
        let entry = slot.get();
        let generation = entry.generation;
        entry.token.cancel();
        let receipt = entry.outcome.settle(Outcome::Cancelled);
        slot.remove();
        receipt.map(|receipt| (generation, receipt))
      }
      Entry::Vacant(_) => None,
    };

    match settled {
      Some((generation, receipt)) => {
        debug!(pool_name = %*self.pool_name, %delegate_id, generation, "Abandoned delegate.");
        if let Some(sink) = self.sink.lock().as_ref() {
          sink.publish(delegate_id, generation, receipt.outcome());
        }
        receipt.dispatch();
      }
      None => trace!(pool_name = %*self.pool_name, %delegate_id, "Abandon: no running delegate, nothing to do."),
    }
  }

  /// Abandons every registered delegate of the given kind.
  pub fn abandon_kind(&self, kind: &str) {
    let matching: Vec<DelegateId> = self
      .registry
      .iter()
      .filter(|entry| entry.key().kind() == kind)
      .map(|entry| entry.key().clone())
      .collect();
    info!(pool_name = %*self.pool_name, kind, "Abandoning {} delegates of kind.", matching.len());
    for delegate_id in &matching {
      self.abandon(delegate_id);
    }
  }

  /// Registers a handler called once for every settlement in this pool.
  pub fn add_completion_handler(&self, handler: impl Fn(CompletionInfo) + Send + Sync + 'static) {
    self.notifier.add_handler(handler);
  }

  pub async fn shutdown(&self, mode: ShutdownMode) -> Result<(), PoolError> {
    let already_shutting_down = self.shutdown_token.is_cancelled();
    if already_shutting_down {
      info!(pool_name = %*self.pool_name, "Shutdown already in progress or initiated by another call/Drop.");
    } else {
      info!(pool_name = %*self.pool_name, "Initiating pool shutdown (mode: {:?}).", mode);
      self.shutdown_token.cancel();
    }

    match mode {
      ShutdownMode::ForcefulCancel => {
        for delegate_id in self.registered_ids() {
          self.abandon(&delegate_id);
        }
      }
      ShutdownMode::Graceful => {
        let pending: Vec<OutcomeFuture<T>> = self.registry.iter().map(|entry| entry.outcome.clone()).collect();
        info!(pool_name = %*self.pool_name, "Graceful shutdown: waiting for {} delegates to settle.", pending.len());
        for outcome in pending {
          outcome.wait().await;
        }
      }
    }

    // Runners hold their own sinks; the notifier drains once the last one is gone.
    drop(self.sink.lock().take());
    self.notifier.await_shutdown().await;

    info!(pool_name = %*self.pool_name, "Pool shutdown completed.");
    Ok(())
  }

  fn spawn_runner<D>(
    &self,
    delegate_id: DelegateId,
    generation: u64,
    delegate: D,
    token: CancellationToken,
    outcome: OutcomeFuture<T>,
    sink: SettlementSink,
  ) where
    D: Delegate<Output = T>,
  {
    let registry = self.registry.clone();
    let span = info_span!("delegate", pool_name = %*self.pool_name, %delegate_id, generation);
    let delegate_token = token.clone();

    self.tokio_handle.spawn(
      async move {
        let run = AssertUnwindSafe(async move { delegate.run(delegate_token).await }).catch_unwind();
        let caught = tokio::select! {
          biased;
          _ = token.cancelled() => {
            debug!("Delegate abandoned. Dropping its work.");
            return;
          }
          caught = run => caught,
        };

        let settled = settle_registered(&registry, &delegate_id, generation, &outcome, translate(&delegate_id, caught));
        match settled {
          Some(receipt) => {
            debug!(outcome = ?CompletionStatus::from(receipt.outcome()), "Delegate settled.");
            sink.publish(&delegate_id, generation, receipt.outcome());
            receipt.dispatch();
          }
          None => trace!("Delegate finished after its outcome was already settled. Result discarded."),
        }
      }
      .instrument(span),
    );
  }
}

/// Settles `outcome` and removes its registry entry in one critical section.
///
/// The entry is only removed when it still belongs to `generation`, so a
/// runner that lost a race with `abandon` cannot evict a delegate registered
/// later under the same id.
fn settle_registered<T: Clone + Send + Sync + 'static>(
  registry: &DashMap<DelegateId, PoolEntry<T>>,
  delegate_id: &DelegateId,
  generation: u64,
  outcome: &OutcomeFuture<T>,
  value: Outcome<T>,
) -> Option<SettleReceipt<T>> {
  match registry.entry(delegate_id.clone()) {
    Entry::Occupied(slot) if slot.get().generation == generation => {
      let receipt = slot.get().outcome.settle(value);
      slot.remove();
      receipt
    }
    _ => outcome.settle(value),
  }
}

impl<T: Clone + Send + Sync + 'static> Drop for DelegatePool<T> {
  fn drop(&mut self) {
    if !self.shutdown_token.is_cancelled() {
      info!(
        pool_name = %*self.pool_name,
        "DelegatePool dropped. Initiating implicit shutdown; {} running delegates will still settle.",
        self.registry.len()
      );
      self.shutdown_token.cancel();
    } else {
      trace!(pool_name = %*self.pool_name, "Drop: Shutdown already in progress or completed.");
    }
    drop(self.sink.get_mut().take());
  }
}
