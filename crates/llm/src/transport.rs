use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::TransportResult;
use crate::request::ChatRequest;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
/// Response body as delivered by the network, in arbitrary chunks.
pub type ByteStream = BoxStream<'static, TransportResult<Bytes>>;

/// Network capability consumed by the session engine.
///
/// Implementations perform the request and hand back the raw body; decoding,
/// cancellation and transcript updates stay on the engine side.
pub trait ChatTransport: Send + Sync {
    /// Opens a streamed chat request. Non-success statuses resolve to an error.
    fn open_stream<'a>(
        &'a self,
        request: ChatRequest,
    ) -> BoxFuture<'a, TransportResult<ByteStream>>;

    /// Checks backend reachability.
    fn probe<'a>(&'a self) -> BoxFuture<'a, TransportResult<()>>;
}
