use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chatstream_rs::config::ClientConfig;
use chatstream_rs::stream::{StreamOptions, StreamOutcome};
use chatstream_rs::transport::{ByteStream, Transport, TransportRequest, TransportResponse};
use chatstream_rs::{
    CallbackSink, ChatClient, CredentialStore, StreamAccess, StreamError, StreamRequest,
    StreamState,
};
use http::StatusCode;

const NAMED_INPUT: &str = "event: token\ndata: Hello\n\nevent: token\ndata:  world\n\nevent: done\ndata: {\"conversation_id\": 42}\n\n";
const LEGACY_INPUT: &str =
    "data: {\"event\":\"token\",\"data\":\"Hi\"}\n\ndata: {\"event\":\"done\",\"data\":{}}\n\n";

#[derive(Debug, Clone)]
enum Step {
    Chunk(Bytes),
    Pause(Duration),
    Fail(StreamError),
    Hang,
}

fn chunk(text: &str) -> Step {
    Step::Chunk(Bytes::copy_from_slice(text.as_bytes()))
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// In-memory backend that replays a fixed script.
struct ScriptedTransport {
    status: StatusCode,
    steps: Vec<Step>,
    has_body: bool,
    connect_delay: Option<Duration>,
    requests: Arc<Mutex<Vec<TransportRequest>>>,
    body_dropped: Arc<AtomicBool>,
}

impl ScriptedTransport {
    fn ok(steps: Vec<Step>) -> Self {
        Self::with_status(StatusCode::OK, steps)
    }

    fn with_status(status: StatusCode, steps: Vec<Step>) -> Self {
        Self {
            status,
            steps,
            has_body: true,
            connect_delay: None,
            requests: Arc::new(Mutex::new(Vec::new())),
            body_dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    fn body(&self) -> ByteStream {
        let guard = DropFlag(Arc::clone(&self.body_dropped));
        let steps = VecDeque::from(self.steps.clone());
        Box::pin(futures_util::stream::unfold(
            (steps, guard),
            |(mut steps, guard)| async move {
                loop {
                    let Some(step) = steps.pop_front() else {
                        return None;
                    };
                    match step {
                        Step::Chunk(bytes) => return Some((Ok(bytes), (steps, guard))),
                        Step::Fail(err) => return Some((Err(err), (steps, guard))),
                        Step::Pause(delay) => tokio::time::sleep(delay).await,
                        Step::Hang => futures_util::future::pending::<()>().await,
                    }
                }
            },
        ))
    }
}

impl Transport for ScriptedTransport {
    async fn post_stream(&self, request: TransportRequest) -> Result<TransportResponse, StreamError> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(TransportResponse {
            status: self.status,
            body: self.has_body.then(|| self.body()),
        })
    }
}

fn client(transport: ScriptedTransport) -> ChatClient<ScriptedTransport> {
    let mut config = ClientConfig::default();
    config.backend.base_url = "http://backend.test".to_string();
    let credentials = Arc::new(CredentialStore::with_token("session-token").unwrap());
    ChatClient::new(transport, credentials, &config)
        .unwrap()
        .with_options(StreamOptions {
            coalesce_interval: Duration::from_millis(10),
            error_body_limit: 1024,
            error_body_timeout: Duration::from_millis(50),
        })
}

async fn run_script(steps: Vec<Step>) -> chatstream_rs::stream::Transcript {
    client(ScriptedTransport::ok(steps))
        .start_stream(StreamAccess::Authenticated, StreamRequest::new("hi"))
        .collect_text()
        .await
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Token(String),
    Error(String),
    Complete(Option<i64>),
}

fn recording_sink(calls: &Arc<Mutex<Vec<Call>>>) -> CallbackSink {
    let tokens = Arc::clone(calls);
    let errors = Arc::clone(calls);
    let completes = Arc::clone(calls);
    CallbackSink::new(move |text| tokens.lock().unwrap().push(Call::Token(text.to_string())))
        .with_error(move |err| errors.lock().unwrap().push(Call::Error(err.user_message())))
        .with_complete(move |id| completes.lock().unwrap().push(Call::Complete(id)))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn assert_completed(outcome: &StreamOutcome, expected: Option<i64>) {
    match outcome {
        StreamOutcome::Completed { conversation_id } => assert_eq!(*conversation_id, expected),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_named_events_produce_text_and_conversation_id() {
    let transcript = run_script(vec![chunk(NAMED_INPUT)]).await;
    assert_eq!(transcript.text, "Hello world");
    assert_completed(&transcript.outcome, Some(42));
}

#[tokio::test]
async fn test_legacy_encoding_matches_named_form() {
    let transcript = run_script(vec![chunk(LEGACY_INPUT)]).await;
    assert_eq!(transcript.text, "Hi");
    assert_completed(&transcript.outcome, None);
}

#[tokio::test]
async fn test_tokens_in_one_interval_arrive_as_one_call() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let client = client(ScriptedTransport::ok(vec![chunk(
        "event: token\ndata: a\n\nevent: token\ndata: b\n\nevent: token\ndata: c\n\nevent: done\ndata: {}\n\n",
    )]));

    let handle = client.start_stream_with(
        StreamAccess::Authenticated,
        StreamRequest::new("hi"),
        recording_sink(&calls),
    );
    wait_until(|| calls.lock().unwrap().contains(&Call::Complete(None))).await;

    assert_eq!(
        *calls.lock().unwrap(),
        vec![Call::Token("abc".to_string()), Call::Complete(None)]
    );
    assert_eq!(handle.state(), StreamState::Completed);
}

#[tokio::test]
async fn test_tokens_separated_by_a_pause_flush_separately() {
    let transcript = run_script(vec![
        chunk("event: token\ndata: first\n\n"),
        Step::Pause(Duration::from_millis(150)),
        chunk("event: token\ndata:  second\n\nevent: done\ndata: {\"conversation_id\": 7}\n\n"),
    ])
    .await;
    assert_eq!(transcript.text, "first second");
    assert_eq!(transcript.token_chunks, 2);
    assert_completed(&transcript.outcome, Some(7));
}

#[tokio::test]
async fn test_every_chunk_boundary_yields_the_same_text() {
    let input = "event: token\ndata: h\u{e9}llo \u{1f30d}\n\nevent: token\ndata:  \u{4e16}\u{754c}\n\nevent: done\ndata: {\"conversation_id\": 3}\n\n";
    let bytes = input.as_bytes();
    for split in 1..bytes.len() {
        let transcript = run_script(vec![
            Step::Chunk(Bytes::copy_from_slice(&bytes[..split])),
            Step::Chunk(Bytes::copy_from_slice(&bytes[split..])),
        ])
        .await;
        assert_eq!(
            transcript.text, "h\u{e9}llo \u{1f30d} \u{4e16}\u{754c}",
            "split at {split}"
        );
        assert_completed(&transcript.outcome, Some(3));
    }
}

#[tokio::test]
async fn test_byte_at_a_time_delivery() {
    let steps = NAMED_INPUT
        .as_bytes()
        .iter()
        .map(|byte| Step::Chunk(Bytes::copy_from_slice(std::slice::from_ref(byte))))
        .collect();
    let transcript = run_script(steps).await;
    assert_eq!(transcript.text, "Hello world");
    assert_completed(&transcript.outcome, Some(42));
}

#[tokio::test]
async fn test_crlf_line_endings() {
    let transcript = run_script(vec![chunk(
        "event: token\r\ndata: Hi\r\n\r\nevent: done\r\ndata: {\"conversation_id\": 5}\r\n\r\n",
    )])
    .await;
    assert_eq!(transcript.text, "Hi");
    assert_completed(&transcript.outcome, Some(5));
}

#[tokio::test]
async fn test_malformed_done_payload_still_completes() {
    let transcript = run_script(vec![chunk(
        "event: token\ndata: ok\n\nevent: done\ndata: {not json\n\n",
    )])
    .await;
    assert_eq!(transcript.text, "ok");
    assert_completed(&transcript.outcome, None);
}

#[tokio::test]
async fn test_end_of_body_without_done_completes() {
    let transcript = run_script(vec![chunk(
        "event: token\ndata: partial\n\nevent: token\ndata: unterminated",
    )])
    .await;
    assert_eq!(transcript.text, "partial");
    assert_completed(&transcript.outcome, None);
}

#[tokio::test]
async fn test_body_cut_inside_a_character_completes() {
    let transcript = client(ScriptedTransport::ok(vec![Step::Chunk(Bytes::from_static(
        b"event: token\ndata: Hello\n\ndata: caf\xC3",
    ))]))
    .start_stream(StreamAccess::Public, StreamRequest::new("hi"))
    .collect_text()
    .await;

    assert_eq!(transcript.text, "Hello");
    assert_completed(&transcript.outcome, None);
}

#[tokio::test]
async fn test_done_stops_reading_the_body() {
    let transport = ScriptedTransport::ok(vec![
        chunk("event: token\ndata: kept\n\nevent: done\ndata: {\"conversation_id\": 9}\n\nevent: token\ndata: dropped\n\n"),
        Step::Hang,
    ]);
    let dropped = Arc::clone(&transport.body_dropped);

    let transcript = client(transport)
        .start_stream(StreamAccess::Authenticated, StreamRequest::new("hi"))
        .collect_text()
        .await;

    assert_eq!(transcript.text, "kept");
    assert_completed(&transcript.outcome, Some(9));
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_upstream_error_uses_detail() {
    let transport = ScriptedTransport::with_status(
        StatusCode::INTERNAL_SERVER_ERROR,
        vec![chunk(r#"{"detail":"server overloaded"}"#)],
    );
    let transcript = client(transport)
        .start_stream(StreamAccess::Authenticated, StreamRequest::new("hi"))
        .collect_text()
        .await;

    assert_eq!(transcript.text, "");
    match transcript.outcome {
        StreamOutcome::Failed(err) => {
            assert!(matches!(err, StreamError::Upstream { status: 500, .. }));
            assert_eq!(err.user_message(), "server overloaded");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_upstream_error_body_that_never_ends_still_fails() {
    let transport = ScriptedTransport::with_status(
        StatusCode::SERVICE_UNAVAILABLE,
        vec![chunk(r#"{"detail":"warming up"}"#), Step::Hang],
    );
    let transcript = tokio::time::timeout(
        Duration::from_secs(5),
        client(transport)
            .start_stream(StreamAccess::Authenticated, StreamRequest::new("hi"))
            .collect_text(),
    )
    .await
    .expect("stream finished");

    match transcript.outcome {
        StreamOutcome::Failed(err) => {
            assert!(matches!(err, StreamError::Upstream { status: 503, .. }));
            assert_eq!(err.user_message(), "warming up");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_upstream_error_without_body_uses_status_reason() {
    let mut transport = ScriptedTransport::with_status(StatusCode::BAD_GATEWAY, Vec::new());
    transport.has_body = false;
    let transcript = client(transport)
        .start_stream(StreamAccess::Authenticated, StreamRequest::new("hi"))
        .collect_text()
        .await;

    match transcript.outcome {
        StreamOutcome::Failed(err) => assert_eq!(err.user_message(), "Bad Gateway"),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_success_without_body_fails() {
    let mut transport = ScriptedTransport::ok(Vec::new());
    transport.has_body = false;
    let transcript = client(transport)
        .start_stream(StreamAccess::Authenticated, StreamRequest::new("hi"))
        .collect_text()
        .await;

    match transcript.outcome {
        StreamOutcome::Failed(err) => {
            assert!(matches!(err, StreamError::Upstream { status: 200, .. }));
            assert_eq!(err.user_message(), "No response body");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_utf8_fails_after_flushing_tokens() {
    let transcript = run_script(vec![
        chunk("event: token\ndata: before\n\n"),
        Step::Chunk(Bytes::from_static(b"data: \xff\xfe\n\n")),
    ])
    .await;

    assert_eq!(transcript.text, "before");
    assert!(matches!(
        transcript.outcome,
        StreamOutcome::Failed(StreamError::Decode(_))
    ));
}

#[tokio::test]
async fn test_read_failure_mid_stream_reports_transport_error() {
    let transcript = run_script(vec![
        chunk("event: token\ndata: half\n\n"),
        Step::Fail(StreamError::Transport("connection reset".into())),
    ])
    .await;

    assert_eq!(transcript.text, "half");
    assert!(matches!(
        transcript.outcome,
        StreamOutcome::Failed(StreamError::Transport(_))
    ));
}

#[tokio::test]
async fn test_cancel_mid_stream_stops_callbacks_and_releases_body() {
    let transport = ScriptedTransport::ok(vec![
        chunk("event: token\ndata: streaming\n\n"),
        Step::Pause(Duration::from_millis(50)),
        chunk("event: token\ndata:  more\n\n"),
        Step::Hang,
    ]);
    let dropped = Arc::clone(&transport.body_dropped);
    let client = client(transport);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let handle = client.start_stream_with(
        StreamAccess::Authenticated,
        StreamRequest::new("hi"),
        recording_sink(&calls),
    );
    wait_until(|| !calls.lock().unwrap().is_empty()).await;

    handle.cancel();
    let seen = calls.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(calls.lock().unwrap().len(), seen);
    assert!(calls
        .lock()
        .unwrap()
        .iter()
        .all(|call| matches!(call, Call::Token(_))));
    assert_eq!(handle.state(), StreamState::Cancelled);
    wait_until(|| dropped.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn test_cancel_before_response_prevents_all_callbacks() {
    let mut transport = ScriptedTransport::ok(vec![chunk(NAMED_INPUT)]);
    transport.connect_delay = Some(Duration::from_millis(50));
    let client = client(transport);
    let calls = Arc::new(Mutex::new(Vec::new()));

    let handle = client.start_stream_with(
        StreamAccess::Authenticated,
        StreamRequest::new("hi"),
        recording_sink(&calls),
    );
    handle.cancel();
    handle.cancel();
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(handle.state(), StreamState::Cancelled);
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let client = client(ScriptedTransport::ok(vec![chunk(NAMED_INPUT)]));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let handle = client.start_stream_with(
        StreamAccess::Authenticated,
        StreamRequest::new("hi"),
        recording_sink(&calls),
    );
    wait_until(|| calls.lock().unwrap().contains(&Call::Complete(Some(42)))).await;

    handle.cancel();
    handle.cancel();

    assert_eq!(handle.state(), StreamState::Completed);
    assert_eq!(
        calls.lock().unwrap().last(),
        Some(&Call::Complete(Some(42)))
    );
}

#[tokio::test]
async fn test_dropping_chat_stream_cancels() {
    let transport = ScriptedTransport::ok(vec![chunk("event: token\ndata: x\n\n"), Step::Hang]);
    let dropped = Arc::clone(&transport.body_dropped);
    let client = client(transport);

    let stream = client.start_stream(StreamAccess::Authenticated, StreamRequest::new("hi"));
    let handle = stream.handle().clone();
    wait_until(|| handle.state() == StreamState::Streaming).await;
    drop(stream);

    assert_eq!(handle.state(), StreamState::Cancelled);
    wait_until(|| dropped.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn test_request_carries_headers_and_body() {
    let transport = ScriptedTransport::ok(vec![chunk(NAMED_INPUT)]);
    let requests = Arc::clone(&transport.requests);

    let request = StreamRequest::new("what is rust?")
        .with_conversation_id(11)
        .with_rag(true);
    client(transport)
        .start_stream(StreamAccess::Authenticated, request)
        .collect_text()
        .await;

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let sent = &requests[0];
    assert_eq!(sent.url.as_str(), "http://backend.test/api/chat/stream");
    assert_eq!(sent.headers["authorization"], "Bearer session-token");
    assert_eq!(sent.headers["accept"], "text/event-stream");
    let body: serde_json::Value = serde_json::from_slice(&sent.body).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"message": "what is rust?", "conversation_id": 11, "use_rag": true})
    );
}
