//! Generic bounded retry for transient IO contention.
//!
//! Locked or scanner-held files on Windows routinely fail a first delete or
//! write and succeed moments later. Every call site shares this one policy
//! instead of hand-rolling its own sleep loop.

use std::io;
use std::time::Duration;

/// Fixed-backoff retry policy parameterized by attempt count and delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Run `op` up to `attempts` times, sleeping `backoff` between failures.
    /// The final attempt's error is returned unchanged.
    pub fn run<T>(&self, mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
        let attempts = self.attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) => {
                    last_error = Some(e);
                    if attempt + 1 < attempts {
                        std::thread::sleep(self.backoff);
                    }
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| io::Error::other("retry policy ran zero attempts")))
    }
}
