//! Bounded exponential-backoff retry over transient source failures.

use crate::error::{ErrorClass, Result};
use std::time::Duration;
use tracing::{error, warn};

pub(crate) const MAX_ATTEMPTS: u32 = 10;

pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs_f64(0.5 * 1.5f64.powi(attempt as i32))
}

/// Run `op`, sleeping and retrying while it fails with a transient source
/// error.
///
/// Returns `Ok(None)` once every attempt has been spent; the caller must
/// treat that as best effort and carry on. Duplicate-key and invalidated-
/// cursor failures cannot be improved by waiting and are returned
/// immediately, as is anything that is not a source driver error.
pub fn with_retries<T, F>(desc: &str, mut op: F) -> Result<Option<T>>
where
    F: FnMut() -> Result<T>,
{
    for attempt in 0..MAX_ATTEMPTS {
        match op() {
            Ok(value) => return Ok(Some(value)),
            Err(e) => match e.class() {
                ErrorClass::Transient => {
                    let delay = backoff(attempt);
                    warn!(%desc, attempt, ?delay, error = %e, "transient source error, will retry");
                    std::thread::sleep(delay);
                }
                ErrorClass::DuplicateKey | ErrorClass::CursorInvalidated => {
                    error!(%desc, error = %e, "source error cannot be retried");
                    return Err(e);
                }
                ErrorClass::Other => return Err(e),
            },
        }
    }
    warn!(%desc, attempts = MAX_ATTEMPTS, "giving up after repeated transient failures");
    Ok(None)
}
