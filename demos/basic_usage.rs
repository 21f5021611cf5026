use delegate_pool::{from_future, DelegateId, DelegatePool, Outcome, ShutdownMode};
use std::io;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn fetch_profile(user_id: u32, delay_ms: u64) -> Result<String, io::Error> {
  info!("Fetching profile {} ({}ms)", user_id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if user_id % 4 == 3 {
    return Err(io::Error::new(io::ErrorKind::TimedOut, "profile service timed out"));
  }
  Ok(format!("profile of user {}", user_id))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let pool = DelegatePool::<String>::new(Handle::current(), "profile_pool");
  let mut outcomes = Vec::new();

  for user_id in 0..5u32 {
    let delay_ms = 200 + (user_id as u64 % 3 * 150);
    let id = DelegateId::keyed("profile", user_id);
    let outcome = pool
      .outcome_for(id, || from_future(fetch_profile(user_id, delay_ms)))
      .expect("pool is running");
    outcomes.push(outcome);
  }

  // A second screen asking for the same profile joins the first request.
  let again = pool
    .outcome_for(DelegateId::keyed("profile", 1), || from_future(fetch_profile(1, 0)))
    .expect("pool is running");
  info!("Second request for profile#1 shares the first future: {}", again.ptr_eq(&outcomes[1]));

  for outcome in outcomes {
    match outcome.wait().await {
      Outcome::Completed(profile) => info!("{} -> {}", outcome.id(), profile),
      Outcome::Failed(failure) => info!("{} -> failed: {}", outcome.id(), failure.cause()),
      Outcome::Cancelled => info!("{} -> cancelled", outcome.id()),
    }
  }

  pool.shutdown(ShutdownMode::Graceful).await.expect("Pool shutdown failed");
  info!("--- Basic Usage Example End ---");
}
