use delegate_pool::{
  deferred, from_future, CompletionInfo, CompletionStatus, DelegateId, DelegatePool, ShutdownMode,
};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle as TokioHandle;
use tokio::time::sleep;

// Helper to initialize tracing for tests
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

// Helper for collecting notifications in tests
fn create_collecting_handler() -> (
  Arc<Mutex<Vec<CompletionInfo>>>,
  impl Fn(CompletionInfo) + Send + Sync + 'static,
) {
  let collected = Arc::new(Mutex::new(Vec::new()));
  let collected_clone = collected.clone();
  let handler = move |info: CompletionInfo| {
    tracing::debug!(
      "Test collecting handler: received notification for {}, status: {:?}",
      info.delegate_id,
      info.status
    );
    collected_clone.lock().unwrap().push(info);
  };
  (collected, handler)
}

#[tokio::test]
async fn test_notifier_reports_each_outcome_kind() {
  setup_tracing_for_test();
  let pool_name = "test_notifier_outcome_kinds";
  let pool = DelegatePool::<String>::new(TokioHandle::current(), pool_name);
  let (notifications, handler) = create_collecting_handler();
  pool.add_completion_handler(handler);

  let ok_id = DelegateId::keyed("fetch", "ok");
  let failing_id = DelegateId::keyed("fetch", "failing");
  let abandoned_id = DelegateId::keyed("fetch", "abandoned");

  let ok = pool
    .outcome_for(ok_id.clone(), || from_future(async { Ok::<_, io::Error>("fine".to_string()) }))
    .unwrap();
  let failing = pool
    .outcome_for(failing_id.clone(), || {
      from_future(async { Err::<String, _>(io::Error::new(io::ErrorKind::ConnectionReset, "reset")) })
    })
    .unwrap();
  let (_completer, delegate) = deferred::<String>();
  let abandoned = pool.outcome_for(abandoned_id.clone(), || delegate).unwrap();

  ok.wait().await;
  failing.wait().await;
  pool.abandon(&abandoned_id);
  assert!(abandoned.is_settled());

  sleep(Duration::from_millis(20)).await;
  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
  sleep(Duration::from_millis(10)).await;

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 3);
  let status_of = |id: &DelegateId| {
    notifs
      .iter()
      .find(|info| &info.delegate_id == id)
      .map(|info| info.status)
      .expect("every settlement should be notified")
  };
  assert_eq!(status_of(&ok_id), CompletionStatus::Completed);
  assert_eq!(status_of(&failing_id), CompletionStatus::Failed);
  assert_eq!(status_of(&abandoned_id), CompletionStatus::Cancelled);

  for info in notifs.iter() {
    assert_eq!(*info.pool_name, pool_name);
    assert!(info.completion_time <= std::time::SystemTime::now());
  }
  let ok_info = notifs.iter().find(|info| info.delegate_id == ok_id).unwrap();
  assert_eq!(ok_info.generation, ok.generation());
}

#[tokio::test]
async fn test_notifier_reports_only_the_winning_settlement() {
  setup_tracing_for_test();
  let pool = DelegatePool::<String>::new(TokioHandle::current(), "test_notifier_single_settlement");
  let (notifications, handler) = create_collecting_handler();
  pool.add_completion_handler(handler);

  let id = DelegateId::new("once");
  let (completer, delegate) = deferred::<String>();
  let outcome = pool.outcome_for(id.clone(), || delegate).unwrap();

  pool.abandon(&id);
  pool.abandon(&id);
  completer.complete("ignored".to_string());
  assert!(outcome.try_outcome().unwrap().is_cancelled());

  sleep(Duration::from_millis(20)).await;
  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
  sleep(Duration::from_millis(10)).await;

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 1);
  assert_eq!(notifs[0].status, CompletionStatus::Cancelled);
}

#[tokio::test]
async fn test_multiple_handlers_and_panicking_handler() {
  setup_tracing_for_test();
  let pool = DelegatePool::<String>::new(TokioHandle::current(), "test_notifier_multiple_handlers");
  let (first, first_handler) = create_collecting_handler();
  let (second, second_handler) = create_collecting_handler();
  pool.add_completion_handler(first_handler);
  pool.add_completion_handler(|_info| panic!("handler intentionally panicked"));
  pool.add_completion_handler(second_handler);

  let outcome = pool
    .outcome_for(DelegateId::new("broadcast"), || {
      from_future(async { Ok::<_, io::Error>("heard".to_string()) })
    })
    .unwrap();
  outcome.wait().await;

  sleep(Duration::from_millis(20)).await;
  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
  sleep(Duration::from_millis(10)).await;

  assert_eq!(first.lock().unwrap().len(), 1);
  assert_eq!(second.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_no_handler_means_no_notifications_queued() {
  setup_tracing_for_test();
  let pool = DelegatePool::<String>::new(TokioHandle::current(), "test_notifier_no_handler");

  let before = pool
    .outcome_for(DelegateId::new("unheard"), || {
      from_future(async { Ok::<_, io::Error>("quiet".to_string()) })
    })
    .unwrap();
  before.wait().await;

  let (notifications, handler) = create_collecting_handler();
  pool.add_completion_handler(handler);

  let after = pool
    .outcome_for(DelegateId::new("heard"), || {
      from_future(async { Ok::<_, io::Error>("loud".to_string()) })
    })
    .unwrap();
  after.wait().await;

  sleep(Duration::from_millis(20)).await;
  pool.shutdown(ShutdownMode::Graceful).await.unwrap();
  sleep(Duration::from_millis(10)).await;

  let notifs = notifications.lock().unwrap();
  assert_eq!(notifs.len(), 1);
  assert_eq!(notifs[0].delegate_id, DelegateId::new("heard"));
}
