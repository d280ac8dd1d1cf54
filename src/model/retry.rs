use std::thread;
use std::time::Duration;
use tracing::warn;

use super::{InferenceRequest, ModelCapability, ModelResult};
use crate::config;

/// Retries transient model failures with capped exponential backoff.
///
/// Waits `min(base * 2^(n-1), cap)` before retry `n`, and gives up early
/// when the request's deadline falls inside that wait. Invalid responses are
/// returned immediately.
pub struct RetryingModel<M> {
    inner: M,
    attempts: u32,
    base: Duration,
    cap: Duration,
}

impl<M: ModelCapability> RetryingModel<M> {
    pub fn new(inner: M, attempts: u32) -> Self {
        let cfg = config::get();
        Self {
            inner,
            attempts: attempts.max(1),
            base: Duration::from_millis(cfg.playback.backoff_base_ms),
            cap: Duration::from_millis(cfg.playback.backoff_cap_ms),
        }
    }

    pub fn backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.base = base;
        self.cap = cap;
        self
    }
}

/// Delay before retry `retry` (1-based): `min(base * 2^(retry-1), cap)`
pub fn backoff_delay(base: Duration, cap: Duration, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

impl<M: ModelCapability> ModelCapability for RetryingModel<M> {
    fn infer(&self, request: &InferenceRequest) -> ModelResult<String> {
        let mut attempt = 1;
        loop {
            match self.inner.infer(request) {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = backoff_delay(self.base, self.cap, attempt);
                    if request.remaining().is_some_and(|left| left <= delay) {
                        return Err(e);
                    }
                    warn!(model = self.inner.name(), attempt, error = %e, ?delay, "retrying model call");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
