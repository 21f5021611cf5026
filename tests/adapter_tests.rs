use delegate_pool::{
  from_fn, from_join_handle, DelegateError, DelegateId, DelegatePool, Outcome, ShutdownMode,
};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,delegate_pool=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

async fn settled(outcome: &delegate_pool::OutcomeFuture<u32>) -> Outcome<u32> {
  timeout(Duration::from_secs(2), outcome.wait())
    .await
    .expect("outcome did not settle in time")
}

#[tokio::test]
async fn test_spawned_task_result_is_delivered() {
  setup_tracing_for_test();
  let pool = DelegatePool::<u32>::new(tokio::runtime::Handle::current(), "test_adapter_spawned_ok");
  let handle = tokio::spawn(async {
    sleep(Duration::from_millis(20)).await;
    Ok::<u32, io::Error>(7)
  });

  let outcome = pool.outcome_for(DelegateId::new("spawned"), || from_join_handle(handle)).unwrap();
  assert_eq!(settled(&outcome).await.completed(), Some(&7));

  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

#[tokio::test]
async fn test_abandon_aborts_spawned_task() {
  setup_tracing_for_test();
  let pool = DelegatePool::<u32>::new(tokio::runtime::Handle::current(), "test_adapter_spawned_abort");
  let finished = Arc::new(AtomicBool::new(false));
  let flag = finished.clone();
  let handle = tokio::spawn(async move {
    sleep(Duration::from_millis(200)).await;
    flag.store(true, Ordering::SeqCst);
    Ok::<u32, io::Error>(1)
  });

  let id = DelegateId::new("spawned");
  let outcome = pool.outcome_for(id.clone(), || from_join_handle(handle)).unwrap();
  sleep(Duration::from_millis(20)).await;
  pool.abandon(&id);
  assert!(settled(&outcome).await.is_cancelled());

  sleep(Duration::from_millis(300)).await;
  assert!(!finished.load(Ordering::SeqCst), "abandoning should abort the spawned task");

  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

#[tokio::test]
async fn test_externally_aborted_task_settles_cancelled() {
  setup_tracing_for_test();
  let pool = DelegatePool::<u32>::new(tokio::runtime::Handle::current(), "test_adapter_external_abort");
  let handle = tokio::spawn(async {
    sleep(Duration::from_secs(30)).await;
    Ok::<u32, io::Error>(1)
  });
  let abort_handle = handle.abort_handle();

  let outcome = pool.outcome_for(DelegateId::new("spawned"), || from_join_handle(handle)).unwrap();
  abort_handle.abort();
  let outcome = settled(&outcome).await;
  assert!(outcome.is_cancelled(), "expected Cancelled, got {:?}", outcome);

  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

#[tokio::test]
async fn test_panicking_spawned_task_settles_failed() {
  setup_tracing_for_test();
  let pool = DelegatePool::<u32>::new(tokio::runtime::Handle::current(), "test_adapter_spawned_panic");
  let handle = tokio::spawn(async {
    sleep(Duration::from_millis(5)).await;
    if true {
      panic!("spawned task intentionally panicked");
    }
    Ok::<u32, io::Error>(1)
  });

  let outcome = pool.outcome_for(DelegateId::new("spawned"), || from_join_handle(handle)).unwrap();
  let outcome = settled(&outcome).await;
  let failure = outcome.failure().expect("panic in the spawned task is a failure");
  let join_error = failure.cause_as::<tokio::task::JoinError>().expect("cause should be the JoinError");
  assert!(join_error.is_panic());

  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

#[tokio::test]
async fn test_cooperative_delegate_can_report_its_own_cancellation() {
  setup_tracing_for_test();
  let pool = DelegatePool::<u32>::new(tokio::runtime::Handle::current(), "test_adapter_cooperative");
  let stop = CancellationToken::new();
  let stop_for_delegate = stop.clone();

  let outcome = pool
    .outcome_for(DelegateId::new("ticker"), move || {
      from_fn(move |pool_cancel: CancellationToken| async move {
        let mut ticks = 0u32;
        loop {
          if stop_for_delegate.is_cancelled() || pool_cancel.is_cancelled() {
            return Err(DelegateError::Cancelled);
          }
          if ticks == 1_000 {
            return Ok(ticks);
          }
          ticks += 1;
          sleep(Duration::from_millis(5)).await;
        }
      })
    })
    .unwrap();

  sleep(Duration::from_millis(30)).await;
  stop.cancel();
  assert!(settled(&outcome).await.is_cancelled());

  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_observers_and_blocking_waiters() {
  setup_tracing_for_test();
  let pool = DelegatePool::<u32>::new(tokio::runtime::Handle::current(), "test_adapter_observers");
  let (completer, delegate) = delegate_pool::deferred::<u32>();
  let outcome = pool.outcome_for(DelegateId::new("observed"), || delegate).unwrap();

  let calls = Arc::new(AtomicUsize::new(0));
  let early_calls = calls.clone();
  outcome.on_settled(move |settled| {
    assert_eq!(settled.completed(), Some(&99));
    early_calls.fetch_add(1, Ordering::SeqCst);
  });

  let blocking_outcome = outcome.clone();
  let blocking_waiter = tokio::task::spawn_blocking(move || blocking_outcome.wait_blocking());

  sleep(Duration::from_millis(20)).await;
  completer.complete(99);

  let from_blocking = timeout(Duration::from_secs(2), blocking_waiter).await.unwrap().unwrap();
  assert_eq!(from_blocking.completed(), Some(&99));
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  let late_calls = calls.clone();
  outcome.on_settled(move |_| {
    late_calls.fetch_add(1, Ordering::SeqCst);
  });
  assert_eq!(calls.load(Ordering::SeqCst), 2);

  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
}
