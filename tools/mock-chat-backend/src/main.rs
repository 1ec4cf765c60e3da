use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

const DEFAULT_BACKEND_PORT: u16 = 8000;
const CHAT_STREAM_PATH: &str = "/api/chat/stream";
const PUBLIC_STREAM_PATH: &str = "/api/chat/public/stream";
const REPLY_WORDS: &[&str] = &[
    "Streaming", " works:", " each", " word", " arrives", " as", " its", " own", " t\u{f6}ken", ".",
];
const MOCK_CONVERSATION_ID: i64 = 42;

type MockBody = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Copy, Clone)]
enum MockEncoding {
    Named,
    Legacy,
}

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    MalformedDone,
    NoDone,
    Error,
    Unauthorized,
}

struct MockState {
    encoding: MockEncoding,
    scenario: MockScenario,
    token_delay: Duration,
    required_token: Option<String>,
    streams: AtomicU64,
    rejected: AtomicU64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("MOCK_PORT", DEFAULT_BACKEND_PORT);
    let state = Arc::new(MockState {
        encoding: parse_encoding(),
        scenario: parse_scenario(),
        token_delay: Duration::from_millis(env_u64("MOCK_TOKEN_DELAY_MS", 20)),
        required_token: env::var("MOCK_REQUIRED_TOKEN").ok(),
        streams: AtomicU64::new(0),
        rejected: AtomicU64::new(0),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock backend on 127.0.0.1:{port}: {err}"));
    eprintln!("mock chat backend listening on http://127.0.0.1:{port}");

    let conn_builder = http1::Builder::new();
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        let connection = conn_builder.serve_connection(io, service);
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                eprintln!("mock backend connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_encoding() -> MockEncoding {
    match env::var("MOCK_ENCODING").as_deref() {
        Ok("legacy") => MockEncoding::Legacy,
        Ok("named") | Err(_) => MockEncoding::Named,
        Ok(other) => {
            eprintln!("unknown MOCK_ENCODING '{other}', fallback to named");
            MockEncoding::Named
        }
    }
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("malformed_done") => MockScenario::MalformedDone,
        Ok("no_done") => MockScenario::NoDone,
        Ok("error") => MockScenario::Error,
        Ok("unauthorized") => MockScenario::Unauthorized,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<MockBody> {
    let (parts, body) = request.into_parts();
    drain_request_body(body).await;

    let method = parts.method;
    let path = parts.uri.path();

    if method == Method::GET && path == "/_mock/stats" {
        return stats_response(state);
    }
    if method != Method::POST {
        return json_response(StatusCode::METHOD_NOT_ALLOWED, r#"{"detail":"Method Not Allowed"}"#);
    }

    let requires_token = match path {
        CHAT_STREAM_PATH => true,
        PUBLIC_STREAM_PATH => false,
        _ => return json_response(StatusCode::NOT_FOUND, r#"{"detail":"Not Found"}"#),
    };

    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let token_ok = match (&state.required_token, bearer) {
        (_, None) => !requires_token,
        (Some(expected), Some(token)) => token == expected,
        (None, Some(_)) => true,
    };
    if !token_ok || matches!(state.scenario, MockScenario::Unauthorized) {
        state.rejected.fetch_add(1, Ordering::Relaxed);
        return json_response(
            StatusCode::UNAUTHORIZED,
            r#"{"detail":"Could not validate credentials"}"#,
        );
    }

    if matches!(state.scenario, MockScenario::Error) {
        state.rejected.fetch_add(1, Ordering::Relaxed);
        return json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"detail":"server overloaded"}"#,
        );
    }

    state.streams.fetch_add(1, Ordering::Relaxed);
    streaming_response(state)
}

async fn drain_request_body(mut body: Incoming) {
    while let Some(frame_result) = body.frame().await {
        if frame_result.is_err() {
            break;
        }
    }
}

fn token_frame(encoding: MockEncoding, word: &str) -> String {
    let escaped = word.replace('\\', "\\\\").replace('"', "\\\"");
    match encoding {
        MockEncoding::Named => format!("event: token\ndata: {word}\n\n"),
        MockEncoding::Legacy => format!("data: {{\"event\":\"token\",\"data\":\"{escaped}\"}}\n\n"),
    }
}

fn done_frame(encoding: MockEncoding, scenario: MockScenario) -> Option<String> {
    match (scenario, encoding) {
        (MockScenario::NoDone, _) => None,
        (MockScenario::MalformedDone, MockEncoding::Named) => {
            Some("event: done\ndata: {conversation_id: oops\n\n".to_string())
        }
        (MockScenario::MalformedDone, MockEncoding::Legacy) => {
            Some("data: {\"event\":\"done\",\"data\":\"oops\"}\n\n".to_string())
        }
        (_, MockEncoding::Named) => Some(format!(
            "event: done\ndata: {{\"conversation_id\": {MOCK_CONVERSATION_ID}}}\n\n"
        )),
        (_, MockEncoding::Legacy) => Some(format!(
            "data: {{\"event\":\"done\",\"data\":{{\"conversation_id\":{MOCK_CONVERSATION_ID}}}}}\n\n"
        )),
    }
}

fn streaming_response(state: &MockState) -> Response<MockBody> {
    let mut frames: Vec<String> = REPLY_WORDS
        .iter()
        .map(|word| token_frame(state.encoding, word))
        .collect();
    frames.extend(done_frame(state.encoding, state.scenario));

    let delay = state.token_delay;
    let stream = futures_util::stream::unfold(frames.into_iter(), move |mut frames| async move {
        let Some(frame) = frames.next() else {
            return None;
        };
        tokio::time::sleep(delay).await;
        Some((Ok::<_, Infallible>(Frame::data(Bytes::from(frame))), frames))
    });

    let mut response = Response::new(StreamBody::new(stream).boxed_unsync());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn stats_response(state: &MockState) -> Response<MockBody> {
    let body = format!(
        "{{\"streams\":{},\"rejected\":{}}}",
        state.streams.load(Ordering::Relaxed),
        state.rejected.load(Ordering::Relaxed)
    );
    json_response(StatusCode::OK, &body)
}

fn json_response(status: StatusCode, body: &str) -> Response<MockBody> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())).boxed_unsync());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
