use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::protocol::{StreamEvent, decode_events};
use crate::request::{ChatRequest, TurnId};
use crate::transport::ChatTransport;

/// How a turn's stream ended. Exactly one is reported per turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    /// The transport accepted the request and the body is being read.
    Opened,
    Token(String),
    ContextProvided(bool),
    Terminate,
    End(StreamOutcome),
}

impl From<StreamEvent> for StreamEventPayload {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Token(token) => Self::Token(token),
            StreamEvent::ContextProvided(flag) => Self::ContextProvided(flag),
            StreamEvent::Terminate => Self::Terminate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub turn: TurnId,
    pub payload: StreamEventPayload,
}

pub type StreamWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving side of one turn. Dropping it cancels the worker.
pub struct TurnEventStream {
    events: mpsc::UnboundedReceiver<StreamEventMapped>,
    cancel: CancellationToken,
}

pub struct TurnStreamHandle {
    pub stream: TurnEventStream,
    pub worker: StreamWorker,
}

impl TurnEventStream {
    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.events.recv().await
    }

    /// Signals cancellation. Returns false if it was already requested.
    pub fn cancel(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.cancel.cancel();
        true
    }
}

impl Drop for TurnEventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Prepares the worker and event stream for one turn.
///
/// Nothing touches the network until the caller spawns `worker`.
pub fn start_turn(
    transport: Arc<dyn ChatTransport>,
    turn: TurnId,
    request: ChatRequest,
) -> TurnStreamHandle {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let worker: StreamWorker = Box::pin(run_stream_worker(
        transport,
        turn,
        request,
        event_tx,
        cancel.clone(),
    ));

    TurnStreamHandle {
        stream: TurnEventStream {
            events: event_rx,
            cancel,
        },
        worker,
    }
}

async fn run_stream_worker(
    transport: Arc<dyn ChatTransport>,
    turn: TurnId,
    request: ChatRequest,
    event_tx: mpsc::UnboundedSender<StreamEventMapped>,
    cancel: CancellationToken,
) {
    let outcome = drive_stream(transport.as_ref(), turn, request, &event_tx, &cancel).await;

    match &outcome {
        StreamOutcome::Completed => tracing::debug!(turn = %turn, "stream completed"),
        StreamOutcome::Cancelled => tracing::debug!(turn = %turn, "stream cancelled"),
        StreamOutcome::Failed(error) => {
            tracing::warn!(turn = %turn, error = %error, "stream failed")
        }
    }

    let _ = event_tx.send(StreamEventMapped {
        turn,
        payload: StreamEventPayload::End(outcome),
    });
}

async fn drive_stream(
    transport: &dyn ChatTransport,
    turn: TurnId,
    request: ChatRequest,
    event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
    cancel: &CancellationToken,
) -> StreamOutcome {
    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return StreamOutcome::Cancelled,
        opened = transport.open_stream(request) => match opened {
            Ok(body) => body,
            Err(error) => return StreamOutcome::Failed(error.to_string()),
        },
    };

    let forward = |payload: StreamEventPayload| {
        event_tx.send(StreamEventMapped { turn, payload }).is_ok()
    };

    // A closed receiver means the session let go of the turn.
    if !forward(StreamEventPayload::Opened) {
        return StreamOutcome::Cancelled;
    }

    let mut events = decode_events(body);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamOutcome::Cancelled,
            next = events.next() => match next {
                Some(Ok(event)) => {
                    let terminal = event == StreamEvent::Terminate;
                    if !forward(event.into()) {
                        return StreamOutcome::Cancelled;
                    }
                    if terminal {
                        return StreamOutcome::Completed;
                    }
                }
                Some(Err(error)) => return StreamOutcome::Failed(error.to_string()),
                None => return StreamOutcome::Completed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, TransportResult};
    use crate::transport::{BoxFuture, ByteStream};
    use bytes::Bytes;
    use futures::stream;

    enum Body {
        Chunks(Vec<&'static str>),
        ChunksThenError(Vec<&'static str>),
        Pending,
        Reject,
    }

    struct FakeTransport {
        body: Body,
    }

    impl ChatTransport for FakeTransport {
        fn open_stream<'a>(
            &'a self,
            _request: ChatRequest,
        ) -> BoxFuture<'a, TransportResult<ByteStream>> {
            let result: TransportResult<ByteStream> = match &self.body {
                Body::Chunks(chunks) => Ok(chunk_stream(chunks).boxed()),
                Body::ChunksThenError(chunks) => Ok(chunk_stream(chunks)
                    .chain(stream::once(async {
                        Err(TransportError::HttpStatus {
                            stage: "test",
                            status: 502,
                            reason: "Bad Gateway".to_string(),
                        })
                    }))
                    .boxed()),
                Body::Pending => Ok(stream::pending().boxed()),
                Body::Reject => Err(TransportError::HttpStatus {
                    stage: "test",
                    status: 500,
                    reason: "Internal Server Error".to_string(),
                }),
            };
            Box::pin(async move { result })
        }

        fn probe<'a>(&'a self) -> BoxFuture<'a, TransportResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    fn chunk_stream(
        chunks: &[&'static str],
    ) -> impl futures::Stream<Item = TransportResult<Bytes>> + Send + 'static {
        stream::iter(
            chunks
                .to_vec()
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes()))),
        )
    }

    async fn run(body: Body, cancel_first: bool) -> Vec<StreamEventPayload> {
        let transport: Arc<dyn ChatTransport> = Arc::new(FakeTransport { body });
        let TurnStreamHandle { mut stream, worker } =
            start_turn(transport, TurnId::new(7), ChatRequest::new("X", Vec::new()));
        if cancel_first {
            assert!(stream.cancel());
            assert!(!stream.cancel());
        }
        let task = tokio::spawn(worker);

        let mut payloads = Vec::new();
        while let Some(event) = stream.recv().await {
            assert_eq!(event.turn, TurnId::new(7));
            let end = matches!(event.payload, StreamEventPayload::End(_));
            payloads.push(event.payload);
            if end {
                break;
            }
        }
        task.await.expect("worker joins");
        payloads
    }

    #[tokio::test]
    async fn forwards_events_and_stops_after_terminate() {
        let payloads = run(
            Body::Chunks(vec![
                "data: {\"token\":\"Hi\"}\n\ndata: [DONE]\n\n",
                "data: {\"token\":\"late\"}\n\n",
            ]),
            false,
        )
        .await;

        assert_eq!(
            payloads,
            vec![
                StreamEventPayload::Opened,
                StreamEventPayload::Token("Hi".to_string()),
                StreamEventPayload::Terminate,
                StreamEventPayload::End(StreamOutcome::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn body_end_without_terminator_completes() {
        let payloads = run(
            Body::Chunks(vec!["data: {\"context_provided\":true}\n", "data: {\"tok"]),
            false,
        )
        .await;

        assert_eq!(
            payloads,
            vec![
                StreamEventPayload::Opened,
                StreamEventPayload::ContextProvided(true),
                StreamEventPayload::End(StreamOutcome::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn rejected_request_fails_without_opening() {
        let payloads = run(Body::Reject, false).await;
        assert_eq!(
            payloads,
            vec![StreamEventPayload::End(StreamOutcome::Failed(
                "HTTP 500: Internal Server Error".to_string()
            ))]
        );
    }

    #[tokio::test]
    async fn mid_stream_error_fails_after_delivered_tokens() {
        let payloads = run(
            Body::ChunksThenError(vec!["data: {\"token\":\"part\"}\n"]),
            false,
        )
        .await;

        assert_eq!(payloads.len(), 3);
        assert_eq!(payloads[1], StreamEventPayload::Token("part".to_string()));
        assert_eq!(
            payloads[2],
            StreamEventPayload::End(StreamOutcome::Failed(
                "HTTP 502: Bad Gateway".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn cancellation_before_open_reports_cancelled() {
        let payloads = run(Body::Pending, true).await;
        assert_eq!(
            payloads,
            vec![StreamEventPayload::End(StreamOutcome::Cancelled)]
        );
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_body() {
        let transport: Arc<dyn ChatTransport> = Arc::new(FakeTransport {
            body: Body::Pending,
        });
        let TurnStreamHandle { mut stream, worker } =
            start_turn(transport, TurnId::new(1), ChatRequest::new("X", Vec::new()));
        let task = tokio::spawn(worker);

        let opened = stream.recv().await.expect("opened event");
        assert_eq!(opened.payload, StreamEventPayload::Opened);

        stream.cancel();
        let end = stream.recv().await.expect("end event");
        assert_eq!(end.payload, StreamEventPayload::End(StreamOutcome::Cancelled));
        task.await.expect("worker joins");
    }
}
