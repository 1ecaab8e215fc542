//! HTTP client for the completion endpoint.
//!
//! [`CompletionBackend`] is the seam the orchestrator streams through, so
//! tests can substitute a scripted byte stream for the network.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;

use crate::config::{ApiFormat, ClientConfig};
use crate::error::ClientError;
use crate::request::ChatRequest;

/// Raw response body of a streaming completion.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Source of streamed completions.
///
/// This trait abstracts the transport, allowing for mock implementations
/// in tests.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Submit the history and return the SSE response body.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the endpoint
    /// answers with a non-success status.
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ClientError>;
}

/// Client posting chat requests to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    client: Client,
    config: ClientConfig,
}

impl ProxyClient {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;

        let mut builder = Client::builder().connect_timeout(config.connect_timeout());
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client, config })
    }

    /// Get the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build headers for a streaming request.
    fn headers(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(key) = &self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| ClientError::InvalidConfig(format!("api key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Serialize the body for the configured endpoint format.
    fn body(&self, request: &ChatRequest) -> Result<Vec<u8>, ClientError> {
        let body = match self.config.format {
            ApiFormat::Proxy => serde_json::to_vec(request)?,
            ApiFormat::OpenAi => serde_json::to_vec(&request.to_completion_request(&self.config))?,
        };
        Ok(body)
    }

    /// Handle API error responses.
    async fn handle_error(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let message = match response.text().await {
            Ok(body) if !body.trim().is_empty() => body,
            _ => status.canonical_reason().unwrap_or("Unknown error").to_string(),
        };
        ClientError::Api {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl CompletionBackend for ProxyClient {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream, ClientError> {
        tracing::debug!(
            endpoint = %self.config.endpoint,
            format = ?self.config.format,
            messages = request.messages.len(),
            "Opening completion stream"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .headers(self.headers()?)
            .body(self.body(request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let err = Self::handle_error(response).await;
            tracing::warn!(error = %err, "Completion request rejected");
            return Err(err);
        }

        Ok(response.bytes_stream().map_err(ClientError::Http).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_is_rejected() {
        let config = ClientConfig {
            endpoint: "localhost:3000".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            ProxyClient::new(config),
            Err(ClientError::InvalidConfig(_))
        ));
    }

    #[test]
    fn bearer_header_only_with_key() {
        let anonymous = ProxyClient::new(ClientConfig::default()).unwrap();
        assert!(anonymous.headers().unwrap().get(AUTHORIZATION).is_none());

        let keyed = ProxyClient::new(ClientConfig {
            api_key: Some("sk-test".to_string()),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            keyed.headers().unwrap().get(AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
    }

    #[test]
    fn api_key_with_newline_is_invalid() {
        let client = ProxyClient::new(ClientConfig {
            api_key: Some("bad\nkey".to_string()),
            ..ClientConfig::default()
        })
        .unwrap();
        assert!(matches!(client.headers(), Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn body_follows_format() {
        let request = ChatRequest::with_user_message(&[], "Hi", None);

        let proxy = ProxyClient::new(ClientConfig {
            format: ApiFormat::Proxy,
            ..ClientConfig::default()
        })
        .unwrap();
        let proxy_body: serde_json::Value = serde_json::from_slice(&proxy.body(&request).unwrap()).unwrap();
        assert!(proxy_body.get("model").is_none());
        assert_eq!(proxy_body["messages"][0]["content"], "Hi");

        let openai = ProxyClient::new(ClientConfig::default()).unwrap();
        let openai_body: serde_json::Value = serde_json::from_slice(&openai.body(&request).unwrap()).unwrap();
        assert_eq!(openai_body["stream"], true);
        assert_eq!(openai_body["model"], "anthropic/claude-3-haiku");
    }
}
