use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{InferenceRequest, ModelCapability, ModelError, ModelResult};

#[derive(Debug)]
enum Scripted {
    Reply(String),
    Fail(ModelError),
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<Scripted>,
    fallback: Option<String>,
    requests: Vec<InferenceRequest>,
}

/// Deterministic model that replays queued answers in order.
///
/// Clones share the same script, so a test can keep one clone to inspect
/// the requests after handing another to the code under test. When the
/// queue runs dry the fallback reply is used, or the call fails with
/// `ConnectionFailed` if there is none.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_reply(self, text: impl Into<String>) -> Self {
        self.lock().queue.push_back(Scripted::Reply(text.into()));
        self
    }

    pub fn then_fail(self, error: ModelError) -> Self {
        self.lock().queue.push_back(Scripted::Fail(error));
        self
    }

    /// Reply used once the queue is empty
    pub fn otherwise(self, text: impl Into<String>) -> Self {
        self.lock().fallback = Some(text.into());
        self
    }

    /// Number of calls made so far
    pub fn calls(&self) -> usize {
        self.lock().requests.len()
    }

    /// Requests received, in order
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.lock().requests.clone()
    }

    /// Queued answers not yet consumed
    pub fn remaining(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ModelCapability for ScriptedModel {
    fn infer(&self, request: &InferenceRequest) -> ModelResult<String> {
        let mut state = self.lock();
        state.requests.push(request.clone());
        match state.queue.pop_front() {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Fail(error)) => Err(error),
            None => state
                .fallback
                .clone()
                .ok_or_else(|| ModelError::ConnectionFailed("script exhausted".to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
