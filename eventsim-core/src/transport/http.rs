//! Event-source connections over HTTP

use super::{EventSourceConnection, EventSourceConnector, decode_event_stream, failed_stream};
use crate::error::{Result, SimulatorError};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};

/// Connects to real SSE endpoints with reqwest
#[derive(Debug, Clone)]
pub struct HttpConnector {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpConnector {
    /// Connector for absolute URLs
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: None,
        }
    }

    /// Resolve relative URLs (`/events`) against `base_url`
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: Some(base_url.into()),
        }
    }

    fn resolve(&self, url: &str) -> Result<reqwest::Url> {
        match reqwest::Url::parse(url) {
            Ok(parsed) => Ok(parsed),
            Err(_) => {
                let base = self.base_url.as_deref().ok_or_else(|| {
                    SimulatorError::Configuration(format!(
                        "Relative URL {} needs a base URL",
                        url
                    ))
                })?;
                reqwest::Url::parse(base)
                    .and_then(|base| base.join(url))
                    .map_err(|e| SimulatorError::Configuration(format!("Invalid URL {}: {}", url, e)))
            }
        }
    }
}

impl Default for HttpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSourceConnector for HttpConnector {
    async fn connect(&self, url: &str) -> Result<EventSourceConnection> {
        let target = self.resolve(url)?;

        let response = match self
            .client
            .get(target)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url, "Failed to connect: {}", e);
                return Ok(EventSourceConnection::new(
                    url,
                    failed_stream(format!("request failed: {}", e)),
                ));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Ok(EventSourceConnection::new(
                url,
                failed_stream(format!("unexpected status {}", status)),
            ));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !content_type.starts_with("text/event-stream") {
            return Ok(EventSourceConnection::new(
                url,
                failed_stream(format!("unexpected content type {:?}", content_type)),
            ));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| format!("stream read error: {}", e)));

        Ok(EventSourceConnection::new(
            url,
            decode_event_stream(Box::pin(chunks)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_url_requires_base() {
        let connector = HttpConnector::new();
        assert!(connector.resolve("/events").unwrap_err().is_configuration());

        let connector = HttpConnector::with_base_url("http://localhost:8080/app/");
        assert_eq!(
            connector.resolve("/events").unwrap().as_str(),
            "http://localhost:8080/events"
        );
        assert_eq!(
            connector.resolve("https://example.com/sse").unwrap().as_str(),
            "https://example.com/sse"
        );
    }

    #[tokio::test]
    async fn unreachable_host_yields_failed_connection() {
        let connector = HttpConnector::new();
        let mut conn = connector.connect("http://127.0.0.1:9/never").await.unwrap();
        assert!(matches!(
            conn.next_event().await,
            Some(super::super::TransportEvent::Error {
                ready_state: super::super::ReadyState::Closed,
                ..
            })
        ));
    }
}
