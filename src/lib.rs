//! A Tokio-based registry for keyed asynchronous delegates with exactly-once
//! outcome delivery, failure translation and cooperative abandonment.

pub mod adapter;
mod delegate;
mod error;
mod identity;
mod notifier;
mod outcome;
mod pool;
mod translate;

pub use adapter::{deferred, from_fn, from_future, from_join_handle, Completer};
pub use delegate::{Delegate, DelegateError, DelegateFuture};
pub use error::{BoxError, Cancelled, DelegateFailure, DelegatePanicked, PoolError};
pub use identity::DelegateId;
pub use notifier::{CompletionInfo, CompletionStatus};
pub use outcome::{Outcome, OutcomeFuture};
pub use pool::{DelegatePool, ShutdownMode};
