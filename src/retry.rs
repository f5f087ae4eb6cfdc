//! Rate limiting, timeouts and retries around any [`SheetClient`].
//!
//! [`GuardedClient`] spaces calls at least `min_interval` apart, gives each
//! call `timeout` to finish on a worker thread, and retries retryable
//! failures with a [`Backoff`] schedule. All waiting goes through a
//! [`Clock`]. A timed-out call is still allowed to land before anything
//! else is sent, so a retry never races the attempt it replaces.

use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    client::{CellWrite, Grid, SheetClient},
    clock::Clock,
    error::SheetError,
    table::Table,
};

/// Delay before retry number `attempt` (1-based).
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// `base * 2^(attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential {
            base_ms: 1_000,
            max_ms: 32_000,
        }
    }
}

impl BackoffConfig {
    pub fn build(&self) -> Box<dyn Backoff> {
        match *self {
            BackoffConfig::Fixed { delay_ms } => {
                Box::new(FixedBackoff(Duration::from_millis(delay_ms)))
            }
            BackoffConfig::Exponential { base_ms, max_ms } => Box::new(ExponentialBackoff {
                base: Duration::from_millis(base_ms),
                max: Duration::from_millis(max_ms),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts per call, the first one included.
    pub max_attempts: u32,
    pub min_interval_ms: u64,
    /// Per-attempt limit; `None` waits indefinitely. An attempt over the
    /// limit is reported as a timeout once its worker has returned.
    pub timeout_ms: Option<u64>,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_interval_ms: 1_000,
            timeout_ms: Some(60_000),
            backoff: BackoffConfig::default(),
        }
    }
}

impl RetryPolicy {
    /// No spacing, no timeout, a single attempt.
    pub fn immediate() -> Self {
        Self {
            max_attempts: 1,
            min_interval_ms: 0,
            timeout_ms: None,
            backoff: BackoffConfig::Fixed { delay_ms: 0 },
        }
    }
}

pub struct GuardedClient<C> {
    inner: Arc<C>,
    clock: Arc<dyn Clock>,
    backoff: Box<dyn Backoff>,
    max_attempts: u32,
    min_interval: Duration,
    timeout: Option<Duration>,
    last_call: Mutex<Option<Instant>>,
}

impl<C: SheetClient + 'static> GuardedClient<C> {
    pub fn new(inner: Arc<C>, clock: Arc<dyn Clock>, policy: &RetryPolicy) -> Self {
        Self {
            inner,
            clock,
            backoff: policy.backoff.build(),
            max_attempts: policy.max_attempts.max(1),
            min_interval: Duration::from_millis(policy.min_interval_ms),
            timeout: policy.timeout_ms.map(Duration::from_millis),
            last_call: Mutex::new(None),
        }
    }

    fn call<T, F>(&self, operation: &str, f: F) -> Result<T, SheetError>
    where
        T: Send + 'static,
        F: Fn(&C) -> Result<T, SheetError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 1u32;
        loop {
            self.throttle();
            match self.attempt(operation, Arc::clone(&f)) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "{operation} failed (attempt {attempt}/{}): {err}; retrying in {delay:?}",
                        self.max_attempts
                    );
                    self.clock.sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!("{operation} failed after {attempt} attempt(s): {err}");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Waits until `min_interval` has passed since the previous call started.
    fn throttle(&self) {
        let mut last = self
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let elapsed = self.clock.now().saturating_duration_since(previous);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!("Rate limiting: waiting {wait:?}");
                self.clock.sleep(wait);
            }
        }
        *last = Some(self.clock.now());
    }

    fn attempt<T, F>(&self, operation: &str, f: Arc<F>) -> Result<T, SheetError>
    where
        T: Send + 'static,
        F: Fn(&C) -> Result<T, SheetError> + Send + Sync + 'static,
    {
        let Some(timeout) = self.timeout else {
            return f(&*self.inner);
        };
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            let _ = tx.send(f(&*inner));
        });
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("{operation} is taking longer than {timeout:?}; waiting for it to land");
                // the late result is dropped; the caller sees the timeout
                let late = rx.recv();
                debug!("{operation} returned after the timeout (ok: {})", matches!(late, Ok(Ok(_))));
                Err(SheetError::Timeout {
                    operation: operation.to_string(),
                    after: timeout,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SheetError::Transient(format!(
                "{operation} worker stopped without a result"
            ))),
        }
    }
}

impl<C: SheetClient + 'static> SheetClient for GuardedClient<C> {
    fn read_grid(&self, source_id: &str, selector: Option<&str>) -> Result<Grid, SheetError> {
        let source = source_id.to_string();
        let selector = selector.map(str::to_string);
        self.call(&format!("read {source_id}"), move |client: &C| {
            client.read_grid(&source, selector.as_deref())
        })
    }

    fn write_table(&self, destination_id: &str, table: &Table) -> Result<(), SheetError> {
        let destination = destination_id.to_string();
        let table = table.clone();
        self.call(&format!("write {destination_id}"), move |client: &C| {
            client.write_table(&destination, &table)
        })
    }

    fn copy_template(&self, template_id: &str, new_id: &str) -> Result<(), SheetError> {
        let template = template_id.to_string();
        let target = new_id.to_string();
        self.call(&format!("copy {template_id} to {new_id}"), move |client: &C| {
            client.copy_template(&template, &target)
        })
    }

    fn write_cells(&self, document_id: &str, writes: &[CellWrite]) -> Result<(), SheetError> {
        let document = document_id.to_string();
        let writes = writes.to_vec();
        self.call(
            &format!("write {} cell(s) to {document_id}", writes.len()),
            move |client: &C| client.write_cells(&document, &writes),
        )
    }

    fn list_sheets(&self) -> Result<Vec<String>, SheetError> {
        self.call("list sheets", |client: &C| client.list_sheets())
    }
}
