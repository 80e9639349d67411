use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header::CONTENT_TYPE};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("tally request failed: {0}")]
    Transport(String),

    #[error("tally request timed out after {0:?}")]
    Timeout(Duration),

    #[error("tally responded with HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

/// Raw response of a Tally XML call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TallyResponse {
    pub status: u16,
    pub body: String,
}

/// Anything that accepts a Tally XML envelope and answers with XML.
#[async_trait]
pub trait TallySource: Send + Sync {
    /// Posts `body` and returns the response whatever its status.
    async fn send(&self, body: &str) -> Result<TallyResponse, ClientError>;

    /// Posts `body`; non-2xx responses are transport errors.
    async fn post_xml(&self, body: &str) -> Result<String, ClientError> {
        let response = self.send(body).await?;
        if (200..300).contains(&response.status) {
            Ok(response.body)
        } else {
            Err(ClientError::Status {
                status: response.status,
                body: truncate(&response.body, 256),
            })
        }
    }
}

#[derive(Clone)]
pub struct HttpTallyClient {
    http: Client,
    url: String,
    timeout: Duration,
}

impl HttpTallyClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Transport(err.to_string()))?;

        Ok(Self {
            http,
            url: url.into(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TallySource for HttpTallyClient {
    async fn send(&self, body: &str) -> Result<TallyResponse, ClientError> {
        debug!(url = %self.url, bytes = body.len(), "posting tally request");

        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "application/xml")
            .body(body.to_string())
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|err| self.classify(err))?;
        Ok(TallyResponse { status, body })
    }
}

impl HttpTallyClient {
    fn classify(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

fn truncate(value: &str, limit: usize) -> String {
    match value.char_indices().nth(limit) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(u16, &'static str);

    #[async_trait]
    impl TallySource for Fixed {
        async fn send(&self, _body: &str) -> Result<TallyResponse, ClientError> {
            Ok(TallyResponse {
                status: self.0,
                body: self.1.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn non_success_status_is_a_transport_error() {
        let err = Fixed(503, "busy").post_xml("<ENVELOPE/>").await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 503, .. }));

        let body = Fixed(200, "<ENVELOPE/>").post_xml("<ENVELOPE/>").await.unwrap();
        assert_eq!(body, "<ENVELOPE/>");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("₹₹₹", 2), "₹₹...");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
