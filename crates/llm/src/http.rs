use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::ACCEPT;
use snafu::ResultExt;

use crate::error::{
    BuildClientSnafu, HttpStatusSnafu, ReadChunkSnafu, SendRequestSnafu, TransportResult,
};
use crate::request::ChatRequest;
use crate::transport::{BoxFuture, ByteStream, ChatTransport};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
pub const DEFAULT_CHAT_PATH: &str = "/api/chat";
pub const DEFAULT_HEALTH_PATH: &str = "/api/health";

/// Longest error-body excerpt written to the logs.
const MAX_LOGGED_BODY_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub endpoint: String,
    pub chat_path: String,
    pub health_path: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, DEFAULT_CHAT_PATH, DEFAULT_HEALTH_PATH)
    }
}

impl TransportConfig {
    pub fn new(
        endpoint: impl Into<String>,
        chat_path: impl Into<String>,
        health_path: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            chat_path: chat_path.into().trim().to_string(),
            health_path: health_path.into().trim().to_string(),
        }
    }

    pub fn chat_url(&self) -> String {
        self.join(&self.chat_path)
    }

    pub fn health_url(&self) -> String {
        self.join(&self.health_path)
    }

    fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// `ChatTransport` over HTTP with a streamed response body.
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    pub fn new(config: TransportConfig) -> TransportResult<Self> {
        // No request timeout: a stalled stream waits until cancelled or dropped by the peer.
        let client = reqwest::Client::builder().build().context(BuildClientSnafu {
            stage: "build-client",
        })?;

        Ok(Self { client, config })
    }

    async fn post_chat(&self, request: ChatRequest) -> TransportResult<ByteStream> {
        let url = self.config.chat_url();
        tracing::debug!(
            url = %url,
            history_len = request.history.len(),
            use_docs = request.use_docs,
            context_provided = request.context_provided,
            "opening chat stream"
        );

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-chat-request",
                url: url.clone(),
            })?;

        let status = response.status();
        if !status.is_success() {
            // The body stays in the logs; callers only see the status line.
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(MAX_LOGGED_BODY_CHARS).collect();
            tracing::debug!(status = status.as_u16(), body = %excerpt, "chat request rejected");
            return HttpStatusSnafu {
                stage: "chat-http-status",
                status: status.as_u16(),
                reason: reason_phrase(status),
            }
            .fail();
        }

        let body = response.bytes_stream().map(|chunk| {
            chunk.context(ReadChunkSnafu {
                stage: "read-chat-chunk",
            })
        });
        Ok(body.boxed())
    }

    async fn get_health(&self) -> TransportResult<()> {
        let url = self.config.health_url();
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "send-health-probe",
                url: url.clone(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return HttpStatusSnafu {
                stage: "health-http-status",
                status: status.as_u16(),
                reason: reason_phrase(status),
            }
            .fail();
        }

        Ok(())
    }
}

fn reason_phrase(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("Unknown Status")
        .to_string()
}

impl ChatTransport for HttpTransport {
    fn open_stream<'a>(
        &'a self,
        request: ChatRequest,
    ) -> BoxFuture<'a, TransportResult<ByteStream>> {
        Box::pin(self.post_chat(request))
    }

    fn probe<'a>(&'a self) -> BoxFuture<'a, TransportResult<()>> {
        Box::pin(self.get_health())
    }
}
