//! Client and animator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Shape of the request body sent to the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFormat {
    /// A chat proxy that accepts `{ "messages": [...] }` with raw attachments
    /// and formats the upstream call itself.
    Proxy,
    /// An OpenAI-compatible `chat/completions` endpoint.
    #[default]
    OpenAi,
}

/// Configuration for the completion client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Full URL requests are posted to.
    #[serde(default = "ClientConfig::default_endpoint")]
    pub endpoint: String,

    /// Bearer token sent in the `Authorization` header.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name (OpenAI format only).
    #[serde(default = "ClientConfig::default_model")]
    pub model: String,

    /// Completion token limit (OpenAI format only).
    #[serde(default = "ClientConfig::default_max_tokens")]
    pub max_tokens: u32,

    /// System prompt prepended to every request (OpenAI format only).
    #[serde(default)]
    pub system_prompt: Option<String>,

    /// Request body shape.
    #[serde(default)]
    pub format: ApiFormat,

    /// TCP connect timeout in seconds.
    #[serde(default = "ClientConfig::default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Whole-request timeout in seconds. Unset means the stream may run
    /// as long as the server keeps it open.
    #[serde(default)]
    pub request_timeout_seconds: Option<u64>,
}

impl ClientConfig {
    fn default_endpoint() -> String {
        "https://openrouter.ai/api/v1/chat/completions".to_string()
    }

    fn default_model() -> String {
        "anthropic/claude-3-haiku".to_string()
    }

    const fn default_max_tokens() -> u32 {
        2048
    }

    const fn default_connect_timeout() -> u64 {
        10
    }

    /// Get the connect timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get the request timeout as a `Duration`, if one is set.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_seconds.map(Duration::from_secs)
    }

    /// Check the configuration before building a client.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidConfig` for a non-HTTP endpoint or a
    /// zero token limit.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ClientError::InvalidConfig(format!(
                "endpoint must be an http(s) URL, got {:?}",
                self.endpoint
            )));
        }
        if self.max_tokens == 0 {
            return Err(ClientError::InvalidConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            api_key: None,
            model: Self::default_model(),
            max_tokens: Self::default_max_tokens(),
            system_prompt: None,
            format: ApiFormat::default(),
            connect_timeout_seconds: Self::default_connect_timeout(),
            request_timeout_seconds: None,
        }
    }
}

/// Pacing of the typewriter reveal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnimatorConfig {
    /// Reveal rate in characters per second.
    #[serde(default = "AnimatorConfig::default_chars_per_second")]
    pub chars_per_second: f64,

    /// Time between animation frames in milliseconds.
    #[serde(default = "AnimatorConfig::default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl AnimatorConfig {
    const fn default_chars_per_second() -> f64 {
        80.0
    }

    const fn default_frame_interval_ms() -> u64 {
        16 // ~60 frames per second
    }

    /// Config with the given rate and the default frame interval.
    ///
    /// Non-positive or non-finite rates fall back to the default.
    #[must_use]
    pub fn with_rate(chars_per_second: f64) -> Self {
        Self {
            chars_per_second,
            ..Self::default()
        }
        .sanitized()
    }

    /// Replace out-of-range values with defaults.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let chars_per_second = if self.chars_per_second.is_finite() && self.chars_per_second > 0.0 {
            self.chars_per_second
        } else {
            tracing::warn!(
                chars_per_second = self.chars_per_second,
                "Invalid reveal rate, using default"
            );
            Self::default_chars_per_second()
        };
        Self {
            chars_per_second,
            frame_interval_ms: self.frame_interval_ms.max(1),
        }
    }

    /// Get the frame interval as a `Duration`.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        Self {
            chars_per_second: Self::default_chars_per_second(),
            frame_interval_ms: Self::default_frame_interval_ms(),
        }
    }
}
