//! Bounded retry with exponential backoff for upstream loads.

use std::time::Duration;

use tracing::warn;

use crate::error::Error;

/// Runs `op` up to `attempts` times, sleeping `backoff`, `2 * backoff`, ...
/// between attempts. Only [`Error::is_retryable`] errors are retried; after
/// the last attempt the failure is surfaced as
/// [`Error::UpstreamDataUnavailable`].
pub fn with_retry<T, F>(what: &str, attempts: u32, backoff: Duration, mut op: F) -> Result<T, Error>
where
    F: FnMut() -> Result<T, Error>,
{
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= attempts => {
                return Err(match e {
                    Error::UpstreamDataUnavailable(msg) => Error::UpstreamDataUnavailable(format!(
                        "{what}: {msg} (after {attempts} attempts)"
                    )),
                    other => Error::UpstreamDataUnavailable(format!(
                        "{what}: {other} (after {attempts} attempts)"
                    )),
                });
            }
            Err(e) => {
                warn!("{what} failed (attempt {attempt}/{attempts}), retrying in {delay:?}: {e}");
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}
