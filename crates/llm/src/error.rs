use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TransportError {
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request to {url} failed on `{stage}`, {source}"))]
    SendRequest {
        stage: &'static str,
        url: String,
        source: reqwest::Error,
    },
    #[snafu(display("HTTP {status}: {reason}"))]
    HttpStatus {
        stage: &'static str,
        status: u16,
        reason: String,
    },
    #[snafu(display("failed to read response body on `{stage}`, {source}"))]
    ReadChunk {
        stage: &'static str,
        source: reqwest::Error,
    },
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Reasons a single event-data payload is dropped by the interpreter.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum MalformedEventError {
    #[snafu(display("event payload is not a valid record: {source}"))]
    InvalidPayload {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("event payload carries no recognized field"))]
    UnrecognizedPayload { stage: &'static str },
}
