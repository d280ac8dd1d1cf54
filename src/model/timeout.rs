use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

use super::{InferenceRequest, ModelCapability, ModelError, ModelResult};
use crate::config;

/// Bounds the wall-clock time of every call to the inner model.
///
/// The call runs on a worker thread and the caller waits with
/// `recv_timeout`. The request carries the same deadline, so the inner
/// model stops by itself (curl `--max-time`, no retries past it) once the
/// worker has been abandoned.
pub struct TimeoutModel<M> {
    inner: Arc<M>,
    timeout: Duration,
}

impl<M: ModelCapability + 'static> TimeoutModel<M> {
    pub fn new(inner: M, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }

    /// Use the configured call timeout
    pub fn with_default_timeout(inner: M) -> Self {
        Self::new(inner, Duration::from_secs(config::get().model.call_timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl<M: ModelCapability + 'static> ModelCapability for TimeoutModel<M> {
    fn infer(&self, request: &InferenceRequest) -> ModelResult<String> {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        let request = request.clone().deadline(Instant::now() + self.timeout);

        thread::Builder::new()
            .name("model-call".to_string())
            .spawn(move || {
                let _ = tx.send(inner.infer(&request));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(model = self.inner.name(), timeout = ?self.timeout, "model call timed out");
                Err(ModelError::CallTimeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ModelError::ConnectionFailed(
                "model worker exited without a result".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
