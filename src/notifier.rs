use crate::identity::DelegateId;
use crate::outcome::Outcome;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

// --- Public Event Structs for Handlers ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
  Completed,
  Failed,
  Cancelled,
}

impl<T> From<&Outcome<T>> for CompletionStatus {
  fn from(outcome: &Outcome<T>) -> Self {
    match outcome {
      Outcome::Completed(_) => CompletionStatus::Completed,
      Outcome::Failed(_) => CompletionStatus::Failed,
      Outcome::Cancelled => CompletionStatus::Cancelled,
    }
  }
}

#[derive(Debug, Clone)]
pub struct CompletionInfo {
  pub delegate_id: DelegateId,
  pub generation: u64,
  pub pool_name: Arc<String>,
  pub status: CompletionStatus,
  pub completion_time: SystemTime,
}

// --- Internal Message ---

#[derive(Debug)]
pub(crate) struct SettlementMessage {
  pub(crate) delegate_id: DelegateId,
  pub(crate) generation: u64,
  pub(crate) status: CompletionStatus,
}

type Handler = Arc<dyn Fn(CompletionInfo) + Send + Sync + 'static>;

/// Sending side handed to every delegate runner.
///
/// Messages are only queued once a handler exists, so a pool nobody listens
/// to does not accumulate them.
#[derive(Clone)]
pub(crate) struct SettlementSink {
  tx: UnboundedSender<SettlementMessage>,
  listening: Arc<AtomicBool>,
}

impl SettlementSink {
  pub(crate) fn publish<T>(&self, delegate_id: &DelegateId, generation: u64, outcome: &Outcome<T>) {
    if !self.listening.load(Ordering::Acquire) {
      return;
    }
    let message = SettlementMessage {
      delegate_id: delegate_id.clone(),
      generation,
      status: CompletionStatus::from(outcome),
    };
    if self.tx.send(message).is_err() {
      trace!(%delegate_id, generation, "Notifier worker gone; settlement notification dropped.");
    }
  }
}

struct NotifierState {
  rx_for_init: Option<UnboundedReceiver<SettlementMessage>>,
  worker_join_handle: Option<JoinHandle<()>>,
}

pub(crate) struct CompletionNotifier {
  handlers: Arc<RwLock<Vec<Handler>>>,
  listening: Arc<AtomicBool>,
  init_once: Once,
  state: Mutex<NotifierState>,
  tokio_handle: TokioHandle,
  pool_name: Arc<String>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompletionNotifier")
      .field("handler_count", &self.handlers.read().len())
      .field("initialized", &self.init_once.is_completed())
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(tokio_handle: TokioHandle, pool_name: Arc<String>) -> (Arc<Self>, SettlementSink) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listening = Arc::new(AtomicBool::new(false));
    let notifier = Arc::new(Self {
      handlers: Arc::new(RwLock::new(Vec::new())),
      listening: listening.clone(),
      init_once: Once::new(),
      state: Mutex::new(NotifierState {
        rx_for_init: Some(rx),
        worker_join_handle: None,
      }),
      tokio_handle,
      pool_name,
    });
    (notifier, SettlementSink { tx, listening })
  }

  fn ensure_worker_initialized(&self) {
    self.init_once.call_once(|| {
      let mut state = self.state.lock();
      if let Some(rx) = state.rx_for_init.take() {
        info!(pool_name = %*self.pool_name, "First completion handler added. Initializing notification worker.");
        let worker = Self::run_notification_worker_loop(
          rx,
          self.handlers.clone(),
          self.tokio_handle.clone(),
          self.pool_name.clone(),
        )
        .instrument(info_span!("notification_worker_loop", pool_name = %*self.pool_name));
        state.worker_join_handle = Some(self.tokio_handle.spawn(worker));
      } else {
        warn!(pool_name = %*self.pool_name, "Notifier initialization: receiver already taken.");
      }
    });
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(CompletionInfo) + Send + Sync + 'static) {
    self.ensure_worker_initialized();
    let mut handlers = self.handlers.write();
    handlers.push(Arc::new(handler));
    self.listening.store(true, Ordering::Release);
    info!(pool_name = %*self.pool_name, "Notifier: Added completion handler. Total handlers: {}", handlers.len());
  }

  async fn run_notification_worker_loop(
    mut queue_rx: UnboundedReceiver<SettlementMessage>,
    handlers: Arc<RwLock<Vec<Handler>>>,
    tokio_handle: TokioHandle,
    pool_name: Arc<String>,
  ) {
    info!("Notification worker started. Runs until every settlement sink is dropped.");

    while let Some(message) = queue_rx.recv().await {
      let handlers_snapshot: Vec<Handler> = handlers.read().clone();
      if handlers_snapshot.is_empty() {
        trace!(delegate_id = %message.delegate_id, "No completion handlers registered, dropping notification.");
        continue;
      }

      let info = CompletionInfo {
        delegate_id: message.delegate_id,
        generation: message.generation,
        pool_name: pool_name.clone(),
        status: message.status,
        completion_time: SystemTime::now(),
      };
      debug!(delegate_id = %info.delegate_id, status = ?info.status, "Dispatching notification to {} handlers.", handlers_snapshot.len());

      for handler in handlers_snapshot {
        let info = info.clone();
        tokio_handle.spawn(async move {
          let delegate_id = info.delegate_id.clone();
          let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(info)));
          if result.is_err() {
            error!(%delegate_id, "A completion handler panicked during execution.");
          }
        });
      }
    }

    info!("Notification worker stopped (all settlement sinks dropped).");
  }

  /// Waits for the worker to drain; it exits once every sink is dropped.
  pub(crate) async fn await_shutdown(&self) {
    let handle = self.state.lock().worker_join_handle.take();
    match handle {
      Some(handle) => {
        info!(pool_name = %*self.pool_name, "Notifier: Waiting for notification worker loop to join.");
        if let Err(join_error) = handle.await {
          error!(pool_name = %*self.pool_name, "Notifier: Error joining notification worker: {:?}", join_error);
        } else {
          debug!(pool_name = %*self.pool_name, "Notifier: Notification worker loop joined.");
        }
      }
      None => trace!(pool_name = %*self.pool_name, "Notifier: Worker never started or already joined."),
    }
  }
}
