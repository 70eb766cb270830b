//! Wire side of the chat client: request types, the streamed-response decoder and
//! the transport boundary.

mod error;
mod http;
mod protocol;
mod request;
mod stream;
mod transport;

pub use error::{MalformedEventError, TransportError, TransportResult};
pub use http::{
    DEFAULT_CHAT_PATH, DEFAULT_ENDPOINT, DEFAULT_HEALTH_PATH, HttpTransport, TransportConfig,
};
pub use protocol::{
    DATA_PREFIX, DONE_SENTINEL, StreamDecoder, StreamEvent, decode_events, interpret_line,
};
pub use request::{ChatRequest, HistoryEntry, HistoryRole, Language, TurnId};
pub use stream::{
    StreamEventMapped, StreamEventPayload, StreamOutcome, StreamWorker, TurnEventStream,
    TurnStreamHandle, start_turn,
};
pub use transport::{BoxFuture, ByteStream, ChatTransport};
