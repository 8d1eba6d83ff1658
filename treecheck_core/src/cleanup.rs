use std::fmt::Display;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use treecheck_common::TreeCheckError;

/// Attempts made when removing a directory that may still be locked
pub const REMOVE_ATTEMPTS: u32 = 5;

/// Delay before the first retry; doubled after every failure
pub const REMOVE_INITIAL_DELAY: Duration = Duration::from_millis(100);

/// Run `op` until it succeeds or `attempts` runs out, sleeping between tries.
pub fn retry_with_backoff<T, E, F>(attempts: u32, initial_delay: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let attempts = attempts.max(1);
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt, attempts, e, delay
                );
                thread::sleep(delay);
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Recursively remove `path`, retrying on transient failures.
///
/// Returns `false` if there was nothing to remove.
pub fn remove_dir_with_retry(path: &Path) -> Result<bool, TreeCheckError> {
    if !path.exists() {
        return Ok(false);
    }

    let removed = retry_with_backoff(REMOVE_ATTEMPTS, REMOVE_INITIAL_DELAY, || {
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    });
    removed?;

    debug!("Removed {:?}", path);
    Ok(true)
}
