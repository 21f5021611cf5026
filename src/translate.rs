use crate::delegate::DelegateError;
use crate::error::{DelegateFailure, DelegatePanicked};
use crate::identity::DelegateId;
use crate::outcome::Outcome;

use std::any::Any;

/// Result of polling a delegate under `catch_unwind`.
pub(crate) type CaughtRun<T> = Result<Result<T, DelegateError>, Box<dyn Any + Send + 'static>>;

/// Maps the terminal event of a delegate onto the outcome observers see.
///
/// Failures are wrapped into a [`DelegateFailure`] carrying the original cause.
/// Cancellation passes through untouched.
pub(crate) fn translate<T>(delegate_id: &DelegateId, run: CaughtRun<T>) -> Outcome<T> {
  match run {
    Ok(Ok(value)) => Outcome::Completed(value),
    Ok(Err(DelegateError::Cancelled)) => Outcome::Cancelled,
    Ok(Err(DelegateError::Failed(cause))) => Outcome::Failed(DelegateFailure::new(delegate_id.clone(), cause)),
    Err(panic_payload) => {
      let cause = DelegatePanicked {
        message: panic_message(panic_payload.as_ref()),
      };
      Outcome::Failed(DelegateFailure::new(delegate_id.clone(), Box::new(cause)))
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
