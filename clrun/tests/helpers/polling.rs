use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

const INITIAL_DELAY_MS: u64 = 25;
const MAX_DELAY_MS: u64 = 500;

/// Error returned when a condition never held within the timeout.
#[derive(Debug)]
pub struct WaitError {
    what: String,
    attempts: u32,
    waited: Duration,
    last_seen: String,
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timed out after {} attempts over {:?} waiting for {}. Last seen: {}",
            self.attempts,
            self.waited,
            self.what,
            if self.last_seen.is_empty() {
                "<nothing>"
            } else {
                &self.last_seen
            }
        )
    }
}

impl std::error::Error for WaitError {}

/// Poll `probe` with exponential backoff until it returns `Ok`.
///
/// `Err(text)` means "not yet"; the last text ends up in the timeout error.
pub fn wait_until<T, F>(what: &str, timeout: Duration, mut probe: F) -> Result<T, WaitError>
where
    F: FnMut() -> Result<T, String>,
{
    let start = Instant::now();
    let mut delay = Duration::from_millis(INITIAL_DELAY_MS);
    let mut attempts = 0;

    let last_seen = loop {
        attempts += 1;
        let seen = match probe() {
            Ok(value) => return Ok(value),
            Err(seen) => seen,
        };

        let remaining = timeout.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            break seen;
        }

        thread::sleep(delay.min(remaining));
        delay = (delay * 2).min(Duration::from_millis(MAX_DELAY_MS));
    };

    Err(WaitError {
        what: what.to_string(),
        attempts,
        waited: start.elapsed(),
        last_seen,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_until_returns_first_success() {
        let mut calls = 0;
        let value = wait_until("third call", Duration::from_secs(2), || {
            calls += 1;
            if calls >= 3 {
                Ok(calls)
            } else {
                Err(format!("call {calls}"))
            }
        })
        .expect("should succeed");
        assert_eq!(value, 3);
    }

    #[test]
    fn wait_until_times_out_with_context() {
        let err = wait_until::<(), _>("a miracle", Duration::from_millis(30), || {
            Err("still nothing".to_string())
        })
        .expect_err("should time out");
        let message = err.to_string();
        assert!(message.contains("a miracle"), "{message}");
        assert!(message.contains("still nothing"), "{message}");
    }
}
