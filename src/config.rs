//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for replay-vision, supporting:
//! - Environment variables for all configurable values
//! - Documented defaults for every retry, timeout and sampling parameter
//! - Builder pattern for programmatic configuration
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `REPLAY_VISION_MODEL_ENDPOINT` | Chat-completions endpoint URL | `http://127.0.0.1:8080/v1/chat/completions` |
//! | `REPLAY_VISION_MODEL` | Model name | `qwen2.5-vl` |
//! | `REPLAY_VISION_MODEL_API_KEY` | Bearer token sent to the endpoint | unset |
//! | `REPLAY_VISION_MAX_TOKENS` | Maximum tokens per response | `1024` |
//! | `REPLAY_VISION_CONNECT_TIMEOUT` | Connection timeout in seconds | `10` |
//! | `REPLAY_VISION_ACTIVITY_TIMEOUT` | Streaming inactivity timeout in seconds | `60` |
//! | `REPLAY_VISION_CALL_TIMEOUT` | Hard timeout for one model call in seconds | `180` |
//! | `REPLAY_VISION_MODEL_RETRIES` | Transport attempts per model call | `3` |
//! | `REPLAY_VISION_SESSION_DIR` | Base directory for sessions | `/tmp/replay-vision` |
//! | `REPLAY_VISION_MAX_FRAMES` | Frame budget for sampling | `24` |
//! | `REPLAY_VISION_MIN_DIFFERENCE` | Minimum difference ratio between sampled frames | `0.02` |
//! | `REPLAY_VISION_DECODE_FPS` | Frames per second decoded from video files | `2` |
//! | `REPLAY_VISION_MAX_ATTEMPTS` | Planner invocations allowed per step | `10` |
//! | `REPLAY_VISION_BACKOFF_BASE_MS` | First retry delay | `1000` |
//! | `REPLAY_VISION_BACKOFF_CAP_MS` | Maximum retry delay | `8000` |
//! | `REPLAY_VISION_HISTORY_WINDOW` | Transcript entries shown to the planner | `8` |
//! | `REPLAY_VISION_SCREENSHOT_MAX_WIDTH` | Screenshots wider than this are downscaled | `1280` |
//! | `REPLAY_VISION_SETTLE_MS` | Delay after an action before the confirmation capture | `500` |
//! | `REPLAY_VISION_TYPING_DELAY_MS` | Delay between typed characters | `12` |
//!
//! # Example
//!
//! ```bash
//! # Use a local Ollama server
//! export REPLAY_VISION_MODEL_ENDPOINT="http://localhost:11434/v1/chat/completions"
//! export REPLAY_VISION_MODEL="llava"
//!
//! # Be stricter about retries
//! export REPLAY_VISION_MAX_ATTEMPTS=4
//! ```

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;

// ============================================================================
// Default Values
// ============================================================================

/// Default model API endpoint
pub const DEFAULT_MODEL_ENDPOINT: &str = "http://127.0.0.1:8080/v1/chat/completions";

/// Default model name
pub const DEFAULT_MODEL: &str = "qwen2.5-vl";

/// Default max tokens for model responses
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Default model connection timeout (seconds)
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

/// Default streaming activity timeout (seconds)
pub const DEFAULT_ACTIVITY_TIMEOUT: u64 = 60;

/// Default hard timeout for one model call (seconds)
pub const DEFAULT_CALL_TIMEOUT: u64 = 180;

/// Default transport attempts per model call
pub const DEFAULT_MODEL_RETRIES: u32 = 3;

/// Default session base directory
pub const DEFAULT_SESSION_DIR: &str = "/tmp/replay-vision";

/// Default frame budget
pub const DEFAULT_MAX_FRAMES: usize = 24;

/// Default minimum difference ratio between accepted frames
pub const DEFAULT_MIN_DIFFERENCE: f32 = 0.02;

/// Default decode rate for video files
pub const DEFAULT_DECODE_FPS: f32 = 2.0;

/// Default planner invocations per step
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default first backoff delay (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;

/// Default backoff cap (milliseconds)
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 8000;

/// Default number of transcript entries given to the planner
pub const DEFAULT_HISTORY_WINDOW: usize = 8;

/// Default maximum screenshot width sent to the model
pub const DEFAULT_SCREENSHOT_MAX_WIDTH: u32 = 1280;

/// Default settle delay after an action (milliseconds)
pub const DEFAULT_SETTLE_MS: u64 = 500;

/// Default delay between typed characters (milliseconds)
pub const DEFAULT_TYPING_DELAY_MS: u64 = 12;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_MODEL_ENDPOINT: &str = "REPLAY_VISION_MODEL_ENDPOINT";
pub const ENV_MODEL: &str = "REPLAY_VISION_MODEL";
pub const ENV_MODEL_API_KEY: &str = "REPLAY_VISION_MODEL_API_KEY";
pub const ENV_MAX_TOKENS: &str = "REPLAY_VISION_MAX_TOKENS";
pub const ENV_CONNECT_TIMEOUT: &str = "REPLAY_VISION_CONNECT_TIMEOUT";
pub const ENV_ACTIVITY_TIMEOUT: &str = "REPLAY_VISION_ACTIVITY_TIMEOUT";
pub const ENV_CALL_TIMEOUT: &str = "REPLAY_VISION_CALL_TIMEOUT";
pub const ENV_MODEL_RETRIES: &str = "REPLAY_VISION_MODEL_RETRIES";
pub const ENV_SESSION_DIR: &str = "REPLAY_VISION_SESSION_DIR";
pub const ENV_MAX_FRAMES: &str = "REPLAY_VISION_MAX_FRAMES";
pub const ENV_MIN_DIFFERENCE: &str = "REPLAY_VISION_MIN_DIFFERENCE";
pub const ENV_DECODE_FPS: &str = "REPLAY_VISION_DECODE_FPS";
pub const ENV_MAX_ATTEMPTS: &str = "REPLAY_VISION_MAX_ATTEMPTS";
pub const ENV_BACKOFF_BASE_MS: &str = "REPLAY_VISION_BACKOFF_BASE_MS";
pub const ENV_BACKOFF_CAP_MS: &str = "REPLAY_VISION_BACKOFF_CAP_MS";
pub const ENV_HISTORY_WINDOW: &str = "REPLAY_VISION_HISTORY_WINDOW";
pub const ENV_SCREENSHOT_MAX_WIDTH: &str = "REPLAY_VISION_SCREENSHOT_MAX_WIDTH";
pub const ENV_SETTLE_MS: &str = "REPLAY_VISION_SETTLE_MS";
pub const ENV_TYPING_DELAY_MS: &str = "REPLAY_VISION_TYPING_DELAY_MS";

/// Generic OpenAI-style key, used when the dedicated variable is unset
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";

// ============================================================================
// Configuration Getters (with caching)
// ============================================================================

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// Centralized configuration for replay-vision
#[derive(Debug, Clone)]
pub struct Config {
    /// Model endpoint configuration
    pub model: ModelSettings,
    /// Session configuration
    pub session: SessionSettings,
    /// Frame sampling configuration
    pub sampler: SamplerSettings,
    /// Playback loop configuration
    pub playback: PlaybackSettings,
}

/// Model-related settings
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// API endpoint URL
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Maximum tokens in response
    pub max_tokens: u32,
    /// Connection timeout (seconds)
    pub connect_timeout: u64,
    /// Activity timeout during streaming (seconds)
    pub activity_timeout: u64,
    /// Hard timeout for one call (seconds)
    pub call_timeout: u64,
    /// Transport attempts per call
    pub retries: u32,
}

/// Session-related settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Base directory for session storage
    pub base_dir: String,
}

/// Frame sampling settings
#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub max_frames: usize,
    pub min_difference: f32,
    pub decode_fps: f32,
}

/// Playback loop settings
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub history_window: usize,
    pub screenshot_max_width: u32,
    pub settle_ms: u64,
    pub typing_delay_ms: u64,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            model: ModelSettings::from_env(),
            session: SessionSettings::from_env(),
            sampler: SamplerSettings::from_env(),
            playback: PlaybackSettings::from_env(),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            model: ModelSettings::defaults(),
            session: SessionSettings::defaults(),
            sampler: SamplerSettings::defaults(),
            playback: PlaybackSettings::defaults(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ModelSettings {
    /// Create model settings from environment variables
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var(ENV_MODEL_ENDPOINT)
                .unwrap_or_else(|_| DEFAULT_MODEL_ENDPOINT.to_string()),
            model: env::var(ENV_MODEL).unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            api_key: env::var(ENV_MODEL_API_KEY)
                .or_else(|_| env::var(ENV_OPENAI_API_KEY))
                .ok()
                .filter(|key| !key.is_empty()),
            max_tokens: env_parse(ENV_MAX_TOKENS, DEFAULT_MAX_TOKENS),
            connect_timeout: env_parse(ENV_CONNECT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT),
            activity_timeout: env_parse(ENV_ACTIVITY_TIMEOUT, DEFAULT_ACTIVITY_TIMEOUT),
            call_timeout: env_parse(ENV_CALL_TIMEOUT, DEFAULT_CALL_TIMEOUT),
            retries: env_parse(ENV_MODEL_RETRIES, DEFAULT_MODEL_RETRIES),
        }
    }

    /// Create model settings with defaults
    pub fn defaults() -> Self {
        Self {
            endpoint: DEFAULT_MODEL_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            activity_timeout: DEFAULT_ACTIVITY_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            retries: DEFAULT_MODEL_RETRIES,
        }
    }
}

impl SessionSettings {
    /// Create session settings from environment variables
    pub fn from_env() -> Self {
        Self {
            base_dir: env::var(ENV_SESSION_DIR).unwrap_or_else(|_| DEFAULT_SESSION_DIR.to_string()),
        }
    }

    /// Create session settings with defaults
    pub fn defaults() -> Self {
        Self {
            base_dir: DEFAULT_SESSION_DIR.to_string(),
        }
    }
}

impl SamplerSettings {
    pub fn from_env() -> Self {
        Self {
            max_frames: env_parse(ENV_MAX_FRAMES, DEFAULT_MAX_FRAMES),
            min_difference: env_parse(ENV_MIN_DIFFERENCE, DEFAULT_MIN_DIFFERENCE),
            decode_fps: env_parse(ENV_DECODE_FPS, DEFAULT_DECODE_FPS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            min_difference: DEFAULT_MIN_DIFFERENCE,
            decode_fps: DEFAULT_DECODE_FPS,
        }
    }
}

impl PlaybackSettings {
    pub fn from_env() -> Self {
        Self {
            max_attempts: env_parse(ENV_MAX_ATTEMPTS, DEFAULT_MAX_ATTEMPTS),
            backoff_base_ms: env_parse(ENV_BACKOFF_BASE_MS, DEFAULT_BACKOFF_BASE_MS),
            backoff_cap_ms: env_parse(ENV_BACKOFF_CAP_MS, DEFAULT_BACKOFF_CAP_MS),
            history_window: env_parse(ENV_HISTORY_WINDOW, DEFAULT_HISTORY_WINDOW),
            screenshot_max_width: env_parse(ENV_SCREENSHOT_MAX_WIDTH, DEFAULT_SCREENSHOT_MAX_WIDTH),
            settle_ms: env_parse(ENV_SETTLE_MS, DEFAULT_SETTLE_MS),
            typing_delay_ms: env_parse(ENV_TYPING_DELAY_MS, DEFAULT_TYPING_DELAY_MS),
        }
    }

    pub fn defaults() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            history_window: DEFAULT_HISTORY_WINDOW,
            screenshot_max_width: DEFAULT_SCREENSHOT_MAX_WIDTH,
            settle_ms: DEFAULT_SETTLE_MS,
            typing_delay_ms: DEFAULT_TYPING_DELAY_MS,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Read and parse an environment variable, falling back on absence or parse failure
fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| parse_value(&s))
        .unwrap_or(default)
}

fn parse_value<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}

/// Get model endpoint from environment (convenience function)
pub fn model_endpoint() -> String {
    get().model.endpoint.clone()
}

/// Get model name from environment (convenience function)
pub fn model_name() -> String {
    get().model.model.clone()
}

/// Get session base directory (convenience function)
pub fn session_base_dir() -> String {
    get().session.base_dir.clone()
}
