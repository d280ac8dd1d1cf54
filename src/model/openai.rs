//! OpenAI-compatible chat-completions client with streaming support.
//!
//! Requests go through a `curl` child process:
//! - Streaming responses (activity-based timeout; a request deadline becomes
//!   curl's `--max-time`)
//! - Request bodies piped on stdin, so large screenshots never hit argv limits
//! - Non-streaming servers handled from the same response body
//! - Progress callbacks for long-running calls
//!
//! # Configuration
//!
//! Settings come from [`config::get`](crate::config::get):
//! - `REPLAY_VISION_MODEL_ENDPOINT`: API endpoint URL
//! - `REPLAY_VISION_MODEL`: Model name
//! - `REPLAY_VISION_MODEL_API_KEY` (or `OPENAI_API_KEY`): Bearer token
//! - `REPLAY_VISION_MAX_TOKENS`: Max tokens in response
//! - `REPLAY_VISION_ACTIVITY_TIMEOUT`: Activity timeout (seconds)
//! - `REPLAY_VISION_CONNECT_TIMEOUT`: Connection timeout (seconds)

use base64::Engine;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{InferenceRequest, ModelCapability, ModelError, ModelResult, PromptPart};
use crate::config;

/// Configuration for [`OpenAiClient`]
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name to use
    pub model: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Timeout for initial connection (seconds)
    pub connection_timeout: u64,
    /// Timeout for inactivity during streaming (seconds)
    pub activity_timeout: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let cfg = config::get();
        Self {
            endpoint: cfg.model.endpoint.clone(),
            model: cfg.model.model.clone(),
            api_key: cfg.model.api_key.clone(),
            max_tokens: cfg.model.max_tokens,
            connection_timeout: cfg.model.connect_timeout,
            activity_timeout: cfg.model.activity_timeout,
        }
    }
}

impl ModelConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn activity_timeout(mut self, seconds: u64) -> Self {
        self.activity_timeout = seconds;
        self
    }
}

/// Progress update during a streamed call
#[derive(Debug, Clone)]
pub enum StreamProgress {
    /// Request sent
    Connected,
    /// Receiving data (content so far)
    Receiving(String),
    /// Call complete
    Complete(String),
}

/// Check if the model endpoint is reachable (connection-only check).
///
/// Only verifies the server answers; a full inference can take much longer
/// than a health check should.
pub fn check_health(endpoint: &str, timeout_secs: u64) -> ModelResult<bool> {
    let url = endpoint
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host_port = url.split('/').next().unwrap_or("127.0.0.1:8080");
    let scheme = if endpoint.starts_with("https://") { "https" } else { "http" };

    let output = Command::new("curl")
        .args([
            "-s",
            "-o",
            "/dev/null",
            "-w",
            "%{http_code}",
            "--connect-timeout",
            &timeout_secs.to_string(),
            "--max-time",
            &timeout_secs.to_string(),
            "-I",
            &format!("{}://{}", scheme, host_port),
        ])
        .output()?;

    // 000 means the connection failed; any real status means it is up
    let status = String::from_utf8_lossy(&output.stdout);
    let code: u16 = status.trim().parse().unwrap_or(0);
    Ok(code > 0)
}

/// Streaming chat-completions client
#[derive(Debug, Clone, Default)]
pub struct OpenAiClient {
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Run one request, reporting progress while the answer streams in
    pub fn infer_with_progress<F>(
        &self,
        request: &InferenceRequest,
        mut on_progress: F,
    ) -> ModelResult<String>
    where
        F: FnMut(StreamProgress),
    {
        let max_time = match request.remaining() {
            Some(left) if left.is_zero() => return Err(ModelError::CallTimeout(Duration::ZERO)),
            Some(left) => Some(max_time_secs(left)),
            None => None,
        };
        let body = request_body(&self.config, request);
        let body = serde_json::to_vec(&body).map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let mut command = Command::new("curl");
        command.args([
            "-s",
            "-N",
            "-X",
            "POST",
            &self.config.endpoint,
            "-H",
            "Content-Type: application/json",
            "--data-binary",
            "@-",
            "--connect-timeout",
            &self.config.connection_timeout.to_string(),
        ]);
        if let Some(key) = &self.config.api_key {
            command.args(["-H", &format!("Authorization: Bearer {}", key)]);
        }
        if let Some(secs) = max_time {
            command.args(["--max-time", &secs.to_string()]);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ModelError::ConnectionFailed(format!("failed to spawn curl: {}", e)))?;

        // curl reads the whole body before sending the request
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&body)?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ModelError::Io(std::io::Error::other("failed to capture stdout")))?;

        let (tx, rx) = mpsc::channel();
        let activity_timeout = Duration::from_secs(self.config.activity_timeout);

        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });

        on_progress(StreamProgress::Connected);

        let mut content = String::new();
        // Lines that are not SSE events: a non-streaming body or an error
        let mut plain = String::new();
        let mut last_activity = Instant::now();

        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(line)) => {
                    last_activity = Instant::now();
                    let Some(data) = line.strip_prefix("data:") else {
                        plain.push_str(&line);
                        plain.push('\n');
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break;
                    }
                    if let Ok(json) = serde_json::from_str::<serde_json::Value>(data) {
                        let delta = &json["choices"][0]["delta"];
                        if let Some(piece) = delta["content"].as_str() {
                            content.push_str(piece);
                            on_progress(StreamProgress::Receiving(content.clone()));
                        }
                        if let Some(error) = json["error"]["message"].as_str() {
                            let _ = child.kill();
                            return Err(ModelError::Api(error.to_string()));
                        }
                    }
                }
                Ok(Err(e)) => {
                    let _ = child.kill();
                    return Err(ModelError::Io(e));
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if last_activity.elapsed() > activity_timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ModelError::ActivityTimeout(activity_timeout));
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        let status = child.wait()?;
        if content.is_empty() {
            if !status.success() && request.expired() {
                return Err(ModelError::CallTimeout(Duration::from_secs(max_time.unwrap_or_default())));
            }
            if !status.success() && plain.trim().is_empty() {
                return Err(ModelError::ConnectionFailed(format!(
                    "curl exited with {}",
                    status
                )));
            }
            // Server ignored "stream": parse the whole body instead
            content = parse_completion(&plain)?;
        }

        debug!(model = %self.config.model, chars = content.len(), "model call complete");
        on_progress(StreamProgress::Complete(content.clone()));
        Ok(content)
    }
}

impl ModelCapability for OpenAiClient {
    fn infer(&self, request: &InferenceRequest) -> ModelResult<String> {
        self.infer_with_progress(request, |_| {})
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

/// Whole seconds for curl's `--max-time`, rounded up and never zero
fn max_time_secs(left: Duration) -> u64 {
    (left.as_secs_f64().ceil() as u64).max(1)
}

/// Build the chat-completions JSON body
fn request_body(config: &ModelConfig, request: &InferenceRequest) -> serde_json::Value {
    let content: Vec<serde_json::Value> = request
        .parts
        .iter()
        .map(|part| match part {
            PromptPart::Text(text) => serde_json::json!({
                "type": "text",
                "text": text
            }),
            PromptPart::Image(png) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(png);
                serde_json::json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:image/png;base64,{}", encoded)
                    }
                })
            }
        })
        .collect();

    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(serde_json::json!({
            "role": "system",
            "content": system
        }));
    }
    messages.push(serde_json::json!({
        "role": "user",
        "content": content
    }));

    serde_json::json!({
        "model": config.model,
        "messages": messages,
        "max_tokens": config.max_tokens,
        "stream": true
    })
}

/// Extract the answer from a non-streaming response body
fn parse_completion(body: &str) -> ModelResult<String> {
    let response: serde_json::Value = serde_json::from_str(body.trim())
        .map_err(|e| ModelError::InvalidResponse(format!("{}: {}", e, truncate(body, 200))))?;

    if let Some(error) = response["error"]["message"].as_str() {
        return Err(ModelError::Api(error.to_string()));
    }

    let message = &response["choices"][0]["message"];
    match message["content"].as_str() {
        Some(content) if !content.is_empty() => Ok(content.to_string()),
        _ => {
            warn!("model response had no content");
            Err(ModelError::InvalidResponse("response has no content".to_string()))
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelConfig {
        ModelConfig::new("http://localhost:8080/v1/chat/completions")
            .model("llava")
            .max_tokens(200)
    }

    #[test]
    fn test_max_time_rounds_up() {
        assert_eq!(max_time_secs(Duration::from_millis(10)), 1);
        assert_eq!(max_time_secs(Duration::from_millis(2500)), 3);
        assert_eq!(max_time_secs(Duration::from_secs(4)), 4);
    }

    #[test]
    fn test_expired_request_is_not_sent() {
        let client = OpenAiClient::new(config());
        let request = InferenceRequest::new().text("hi").deadline(Instant::now());
        assert!(matches!(client.infer(&request), Err(ModelError::CallTimeout(_))));
    }

    #[test]
    fn test_model_config_builder() {
        let config = config().activity_timeout(30).api_key(Some("sk-test".into()));

        assert_eq!(config.endpoint, "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.model, "llava");
        assert_eq!(config.max_tokens, 200);
        assert_eq!(config.activity_timeout, 30);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_request_body_layout() {
        let request = InferenceRequest::new()
            .system("You operate a desktop.")
            .text("Frame 1 (t=0.00s)")
            .image(vec![0x89, 0x50])
            .text("List the steps.");
        let body = request_body(&config(), &request);

        assert_eq!(body["model"], "llava");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        let content = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_parse_completion() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"done"}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), "done");

        let error = r#"{"error":{"message":"model not loaded"}}"#;
        assert!(matches!(parse_completion(error), Err(ModelError::Api(_))));

        assert!(matches!(
            parse_completion("<html>502</html>"),
            Err(ModelError::InvalidResponse(_))
        ));
    }
}
