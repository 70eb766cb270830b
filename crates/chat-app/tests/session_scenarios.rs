use std::sync::Arc;
use std::time::Duration;

use murmur::chat::{
    ChatSession, MessageStatus, Role, SessionUpdate, StreamOutcome, user_facing_error,
};
use murmur::connection::{ConnectionHandle, ConnectionMonitor};
use murmur_llm::{ChatTransport, HttpTransport, TransportConfig};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HELLO_BODY: &str = "data: {\"token\":\"Hi\"}\n\n\
data: {\"token\":\" there\",\"context_provided\":true}\n\n\
data: [DONE]\n\n";

fn transport_for(server: &MockServer) -> Arc<dyn ChatTransport> {
    let config = TransportConfig::new(server.uri(), "/api/chat", "/api/health");
    Arc::new(HttpTransport::new(config).expect("http transport should build"))
}

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn hello_streams_into_a_completed_reply() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "message": "Hello",
            "useDocs": false,
            "language": "en",
            "context_provided": false,
        })))
        .respond_with(sse(HELLO_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let connection = ConnectionHandle::new();
    let mut session = ChatSession::new(transport_for(&server), connection.clone());

    session.send("Hello").expect("send should start a turn");
    let updates = session.settle().await;

    let messages = session.transcript().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Hello");
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hi there");
    assert_eq!(messages[1].status, MessageStatus::Complete);

    assert!(session.context_provided());
    assert!(!session.is_in_flight());
    assert!(connection.state().connected);
    assert!(matches!(
        updates.last(),
        Some(SessionUpdate::TurnFinished {
            outcome: StreamOutcome::Completed,
            ..
        })
    ));
}

#[tokio::test]
async fn follow_up_turn_carries_history_and_context_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({ "message": "Hello" })))
        .respond_with(sse(HELLO_BODY))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "message": "Again",
            "context_provided": true,
        })))
        .respond_with(sse("data: {\"token\":\"Sure\"}\n\ndata: [DONE]\n\n"))
        .expect(1)
        .mount(&server)
        .await;

    let mut session = ChatSession::new(transport_for(&server), ConnectionHandle::new());
    session.send("Hello").expect("first turn");
    session.settle().await;
    session.send("Again").expect("second turn");
    session.settle().await;

    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    let first: serde_json::Value =
        serde_json::from_slice(&requests[0].body).expect("request body is json");
    assert_eq!(first["history"], json!([]));

    let second: serde_json::Value =
        serde_json::from_slice(&requests[1].body).expect("request body is json");
    assert_eq!(
        second["history"],
        json!([
            { "role": "user", "content": "Hello" },
            { "role": "assistant", "content": "Hi there" },
        ])
    );

    let last = session.transcript().last().expect("reply present");
    assert_eq!(last.content, "Sure");
    assert_eq!(last.status, MessageStatus::Complete);
}

#[tokio::test]
async fn server_error_marks_reply_errored_and_goes_offline() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let connection = ConnectionHandle::new();
    connection.mark_connected();
    let mut session = ChatSession::new(transport_for(&server), connection.clone());

    session.send("X").expect("send should start a turn");
    session.settle().await;

    let reply = session.transcript().last().expect("errored reply present");
    assert_eq!(reply.status, MessageStatus::Errored);
    assert_eq!(
        reply.content,
        user_facing_error("HTTP 500: Internal Server Error")
    );

    let state = connection.state();
    assert!(!state.connected);
    assert_eq!(
        state.last_error.as_deref(),
        Some("HTTP 500: Internal Server Error")
    );
    assert!(!session.is_in_flight());
}

#[tokio::test]
async fn cancel_before_first_token_leaves_only_the_user_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(sse(HELLO_BODY).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let mut session = ChatSession::new(transport_for(&server), ConnectionHandle::new());
    session.send("Hello").expect("send should start a turn");
    assert!(session.cancel());
    assert!(!session.cancel());

    let updates = tokio::time::timeout(Duration::from_secs(5), session.settle())
        .await
        .expect("cancellation settles without waiting for the backend");

    assert!(updates.iter().any(|update| matches!(
        update,
        SessionUpdate::TurnFinished {
            outcome: StreamOutcome::Cancelled,
            ..
        }
    )));
    let messages = session.transcript().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "Hello");
    assert_eq!(session.transcript().streaming_count(), 0);
    assert!(!session.is_in_flight());

    session.send("Again").expect("a new turn may start after cancellation");
}

#[tokio::test]
async fn monitor_reports_reachable_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let monitor = ConnectionMonitor::spawn(transport_for(&server), Duration::from_secs(60));
    let mut states = monitor.subscribe();

    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|state| state.connected))
        .await
        .expect("first probe runs immediately")
        .expect("monitor keeps the channel open");

    monitor.shutdown().await;
}

#[tokio::test]
async fn monitor_reports_unreachable_backend() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let connection = ConnectionHandle::new();
    connection.mark_connected();
    let monitor = ConnectionMonitor::spawn_with_handle(
        transport_for(&server),
        Duration::from_secs(60),
        connection.clone(),
    );
    let mut states = connection.subscribe();

    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|state| !state.connected))
        .await
        .expect("first probe runs immediately")
        .expect("monitor keeps the channel open");
    assert_eq!(
        connection.state().last_error.as_deref(),
        Some("Backend not available")
    );

    monitor.shutdown().await;
}
