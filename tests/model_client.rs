//! HTTP model client against a local mock server.
//!
//! The client shells out to curl; tests are skipped when it is missing.

use httpmock::prelude::*;
use std::process::Command;
use std::time::{Duration, Instant};

use replay_vision::model::{
    InferenceRequest, ModelCapability, ModelConfig, ModelError, OpenAiClient, StreamProgress, check_health,
};

const PATH: &str = "/v1/chat/completions";

fn curl_available() -> bool {
    Command::new("curl").arg("--version").output().is_ok()
}

fn client(server: &MockServer) -> OpenAiClient {
    OpenAiClient::new(ModelConfig::new(server.url(PATH)).model("test-model"))
}

fn request() -> InferenceRequest {
    InferenceRequest::new()
        .system("You are terse.")
        .image(vec![0x89, b'P', b'N', b'G'])
        .text("What is on the screen?")
}

#[test]
fn test_streamed_answer() {
    if !curl_available() {
        return;
    }
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST).path(PATH);
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(
                "data: {\"choices\":[{\"delta\":{\"content\":\"A text \"}}]}\n\n\
                 data: {\"choices\":[{\"delta\":{\"content\":\"editor\"}}]}\n\n\
                 data: [DONE]\n\n",
            );
    });

    let mut updates = 0;
    let answer = client(&server)
        .infer_with_progress(&request(), |progress| {
            if matches!(progress, StreamProgress::Receiving(_)) {
                updates += 1;
            }
        })
        .unwrap();

    mock.assert();
    assert_eq!(answer, "A text editor");
    assert_eq!(updates, 2);
}

#[test]
fn test_non_streaming_answer() {
    if !curl_available() {
        return;
    }
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(PATH);
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"action\": \"left_click\"}"}}]}"#);
    });

    let answer = client(&server).infer(&request()).unwrap();
    assert_eq!(answer, r#"{"action": "left_click"}"#);
}

#[test]
fn test_api_error() {
    if !curl_available() {
        return;
    }
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(PATH);
        then.status(404)
            .header("content-type", "application/json")
            .body(r#"{"error":{"message":"model not found"}}"#);
    });

    match client(&server).infer(&request()) {
        Err(ModelError::Api(message)) => assert_eq!(message, "model not found"),
        other => panic!("expected an API error, got {:?}", other),
    }
}

#[test]
fn test_deadline_ends_slow_call() {
    if !curl_available() {
        return;
    }
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(PATH);
        then.status(200)
            .delay(Duration::from_secs(10))
            .header("content-type", "application/json")
            .body(r#"{"choices":[{"message":{"content":"late"}}]}"#);
    });

    let started = Instant::now();
    let request = request().deadline(Instant::now() + Duration::from_secs(1));
    let error = client(&server).infer(&request).unwrap_err();

    assert!(matches!(error, ModelError::CallTimeout(_)), "got {:?}", error);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_connection_refused() {
    if !curl_available() {
        return;
    }
    let client = OpenAiClient::new(ModelConfig::new("http://127.0.0.1:9/v1/chat/completions"));
    let error = client.infer(&request()).unwrap_err();
    assert!(matches!(error, ModelError::ConnectionFailed(_)));
    assert!(error.is_transient());
}

#[test]
fn test_health_check() {
    if !curl_available() {
        return;
    }
    let server = MockServer::start();
    assert!(check_health(&server.url(PATH), 5).unwrap());
    assert!(!check_health("http://127.0.0.1:9/v1/chat/completions", 2).unwrap());
}
