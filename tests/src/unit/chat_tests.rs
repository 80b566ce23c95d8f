use super::{ok, settings_for, test_runtime, user_body};
use magicapp::MagicApp;
use magicapp_core::api::{ApiClient, ClientContext};
use magicapp_core::chat::{ChatSession, MessageRole, FAILURE_REPLY};
use magicapp_core::storage::{KeyValueStore, MemoryStore, ACCESS_TOKEN_KEY};
use serde_json::json;
use std::io::{self, Write};
use std::sync::Arc;
use wiremock::matchers::{bearer_token, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EVENT_BODY: &str = concat!(
    "data: {\"response\":\"Hi\"}\n\n",
    "data: {bad json\n\n",
    "data: {\"response\":\" there\"}\n\n",
    "data: [DONE]\n\n",
    "data: {\"response\":\"ignored\"}\n\n",
);

fn event_stream() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(EVENT_BODY)
}

#[test]
fn streamed_reply_skips_bad_records_and_stops_at_done() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/chat"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(event_stream())
            .expect(1)
            .mount(&server)
            .await;

        let chat = ChatSession::new(Arc::new(ApiClient::new(server.uri(), ClientContext::new())));
        let mut partials = Vec::new();
        let reply = chat
            .send("hello", |partial| partials.push(partial.to_string()))
            .await
            .unwrap();

        assert_eq!(reply.content, "Hi there");
        assert_eq!(partials, vec!["Hi", "Hi there"]);
        let transcript = chat.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript.last().map(|m| m.role), Some(MessageRole::Assistant));
    });
}

#[test]
fn rejected_stream_becomes_the_failure_reply() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/chat"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let chat = ChatSession::new(Arc::new(ApiClient::new(server.uri(), ClientContext::new())));
        let reply = chat.send("hello", |_| {}).await.unwrap();
        assert_eq!(reply.content, FAILURE_REPLY);
        assert!(reply.timestamp.is_none());
    });
}

#[test]
fn non_streaming_turn_uses_message_field() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/chat"))
            .respond_with(ok(json!({"success": true, "data": {"message": "Sure thing"}})))
            .expect(1)
            .mount(&server)
            .await;

        let chat = ChatSession::new(Arc::new(ApiClient::new(server.uri(), ClientContext::new())));
        let reply = chat.send_once("make it blue").await.unwrap();
        assert_eq!(reply.content, "Sure thing");
    });
}

#[test]
fn chat_command_streams_with_the_session_credential() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .and(bearer_token("a1"))
            .respond_with(ok(user_body("u1", "Ada")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ai/chat"))
            .and(bearer_token("a1"))
            .respond_with(event_stream())
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "a1").await.unwrap();
        let app = MagicApp::new(settings_for(&server), Arc::new(store));
        app.start(None).await;

        let mut input = tokio::io::BufReader::new(&b"\nhello\n/exit\nnever sent\n"[..]);
        let mut out = Vec::new();
        app.chat(false, &mut input, &mut out).await.unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.starts_with("MagicAppDev: Hello! How can I help you build your app today?"));
        assert!(printed.contains("MagicAppDev: Hi there\n"));
        assert!(!printed.contains("ignored"));
    });
}

/// Accepts output until a write contains `reject`.
struct ClosingWriter {
    written: Vec<u8>,
    reject: &'static str,
}

impl Write for ClosingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if String::from_utf8_lossy(buf).contains(self.reject) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout closed"));
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn chat_command_reports_a_closed_output() {
    let runtime = test_runtime();
    runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/me"))
            .respond_with(ok(user_body("u1", "Ada")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ai/chat"))
            .respond_with(event_stream())
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        store.set(ACCESS_TOKEN_KEY, "a1").await.unwrap();
        let app = MagicApp::new(settings_for(&server), Arc::new(store));
        app.start(None).await;

        let mut input = tokio::io::BufReader::new(&b"hello\nagain\n"[..]);
        let mut out = ClosingWriter {
            written: Vec::new(),
            reject: "Hi",
        };
        let err = app.chat(false, &mut input, &mut out).await.unwrap_err();
        let io_err = err.downcast_ref::<io::Error>().unwrap();
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
        assert!(String::from_utf8_lossy(&out.written).ends_with("MagicAppDev: "));
    });
}
