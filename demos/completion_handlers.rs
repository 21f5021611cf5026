use delegate_pool::{deferred, CompletionInfo, DelegateId, DelegatePool, ShutdownMode};
use std::io;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Completion Handlers Example ---");

  let pool = DelegatePool::<String>::new(Handle::current(), "notified_pool");
  pool.add_completion_handler(|info: CompletionInfo| {
    info!(
      "[handler] {} (generation {}) settled as {:?} in pool '{}'",
      info.delegate_id, info.generation, info.status, info.pool_name
    );
  });

  let (ok, ok_delegate) = deferred::<String>();
  let (failing, failing_delegate) = deferred::<String>();
  let (_abandoned, abandoned_delegate) = deferred::<String>();

  let ok_outcome = pool.outcome_for(DelegateId::keyed("job", 1), || ok_delegate).expect("pool is running");
  let failing_outcome = pool
    .outcome_for(DelegateId::keyed("job", 2), || failing_delegate)
    .expect("pool is running");
  let abandoned_outcome = pool
    .outcome_for(DelegateId::keyed("job", 3), || abandoned_delegate)
    .expect("pool is running");

  ok.complete("all good".to_string());
  failing.fail(io::Error::new(io::ErrorKind::BrokenPipe, "upstream went away"));
  pool.abandon(&DelegateId::keyed("job", 3));

  info!("job#1: {:?}", ok_outcome.wait().await);
  info!("job#2: {:?}", failing_outcome.wait().await);
  info!("job#3: {:?}", abandoned_outcome.wait().await);

  tokio::time::sleep(Duration::from_millis(50)).await;
  pool.shutdown(ShutdownMode::Graceful).await.expect("Pool shutdown failed");
  info!("--- Completion Handlers Example End ---");
}
