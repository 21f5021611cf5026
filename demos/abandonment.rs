use delegate_pool::{from_fn, DelegateError, DelegateId, DelegatePool, ShutdownMode};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Abandonment Example ---");

  let pool = DelegatePool::<u64>::new(Handle::current(), "download_pool");
  let id = DelegateId::keyed("download", "big_file");

  let download = |label: &'static str| {
    from_fn(move |cancel: CancellationToken| async move {
      let mut received = 0u64;
      while received < 100 {
        if cancel.is_cancelled() {
          warn!("{}: noticed cancellation after {} chunks", label, received);
          return Err(DelegateError::Cancelled);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        received += 1;
      }
      Ok(received)
    })
  };

  let first = pool.outcome_for(id.clone(), || download("first")).expect("pool is running");
  tokio::time::sleep(Duration::from_millis(300)).await;

  info!("Owner navigated away; abandoning {}.", id);
  pool.abandon(&id);
  info!("First download outcome: {:?}", first.wait().await);

  // Abandoning again, or abandoning an unknown id, is harmless.
  pool.abandon(&id);
  pool.abandon(&DelegateId::new("never_started"));

  let second = pool.outcome_for(id.clone(), || download("second")).expect("pool is running");
  info!(
    "Re-registered {}: fresh future (generation {} vs {}).",
    id,
    second.generation(),
    first.generation()
  );

  pool.shutdown(ShutdownMode::ForcefulCancel).await.expect("Pool shutdown failed");
  info!("Second download outcome after forceful shutdown: {:?}", second.wait().await);
  info!("--- Abandonment Example End ---");
}
