//! API endpoint integration tests

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use base64::Engine;
use futures::{SinkExt, StreamExt};
use sprout_gateway::api::ApiServerBuilder;
use sprout_gateway::orchestrator::OrchestratorConfig;
use sprout_gateway::quality::QualityThresholds;
use sprout_gateway::stt::SessionConfig;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

mod common;
use common::{FakeGenerator, FakeRecognizer, FakeSynthesizer, LONG, Upstream};

fn session_config() -> SessionConfig {
    SessionConfig {
        thresholds: QualityThresholds {
            min_duration_ms: 0,
            ..QualityThresholds::default()
        },
        connect_timeout: LONG,
        idle_timeout: LONG,
        drain_timeout: LONG,
        ..SessionConfig::default()
    }
}

fn builder() -> ApiServerBuilder {
    ApiServerBuilder::new(0, session_config(), OrchestratorConfig::default())
}

async fn send(app: Router, request: Request<Body>) -> Response {
    tokio_test::assert_ok!(app.oneshot(request).await)
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = builder().build().router();

    let response = send(app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_without_collaborators_is_degraded() {
    let app = builder().build().router();

    let response = send(app, get("/ready")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = json_body(response).await;
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["recognizer"]["status"], "unavailable");
    assert_eq!(json["checks"]["generator"]["status"], "unavailable");
}

#[tokio::test]
async fn test_ready_without_synthesizer_is_ok() {
    let (recognizer, _connections) = FakeRecognizer::new();
    let app = builder()
        .recognizer(recognizer)
        .generator(FakeGenerator::replying("hi"))
        .build()
        .router();

    let response = send(app, get("/ready")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["checks"]["recognizer"]["status"], "ok");
    assert_eq!(json["checks"]["synthesizer"]["status"], "unavailable");
}

#[tokio::test]
async fn test_capabilities_reflect_configuration() {
    let app = builder()
        .synthesizer(FakeSynthesizer::working())
        .build()
        .router();

    let json = json_body(send(app, get("/api/voice/capabilities")).await).await;
    assert_eq!(json["stt_available"], false);
    assert_eq!(json["tts_available"], true);
    assert_eq!(json["chat_available"], false);
}

#[tokio::test]
async fn test_evaluate_uses_configured_thresholds() {
    let app = ApiServerBuilder::new(0, SessionConfig::default(), OrchestratorConfig::default())
        .build()
        .router();

    let body = serde_json::json!({
        "transcript": "I want to build a sandcastle",
        "confidence": 0.91,
        "duration_ms": 1800,
    });
    let json = json_body(send(app.clone(), post_json("/api/voice/evaluate", &body)).await).await;
    assert_eq!(json["verdict"], "acceptable");
    assert_eq!(json["acceptable"], true);

    let body = serde_json::json!({
        "transcript": "hello there",
        "confidence": 0.9,
        "duration_ms": 100,
    });
    let json = json_body(send(app, post_json("/api/voice/evaluate", &body)).await).await;
    assert_eq!(json["verdict"], "too_short_duration");
    assert_eq!(json["acceptable"], false);
}

#[tokio::test]
async fn test_synthesize_not_configured() {
    let app = builder().build().router();

    let body = serde_json::json!({ "text": "hello" });
    let response = send(app, post_json("/api/voice/synthesize", &body)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "not_configured");
}

#[tokio::test]
async fn test_synthesize_rejects_empty_text() {
    let app = builder()
        .synthesizer(FakeSynthesizer::working())
        .build()
        .router();

    let body = serde_json::json!({ "text": "   " });
    let response = send(app, post_json("/api/voice/synthesize", &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_synthesize_returns_audio() {
    let app = builder()
        .synthesizer(FakeSynthesizer::working())
        .build()
        .router();

    let body = serde_json::json!({ "text": "Once upon a time", "style": "calm" });
    let response = send(app, post_json("/api/voice/synthesize", &body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"Once upon a time");
}

#[tokio::test]
async fn test_synthesize_upstream_failure() {
    let app = builder()
        .synthesizer(FakeSynthesizer::failing())
        .build()
        .router();

    let body = serde_json::json!({ "text": "hello" });
    let response = send(app, post_json("/api/voice/synthesize", &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json = json_body(response).await;
    assert_eq!(json["error"]["code"], "synthesis_failed");
}

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_json(ws: &mut Client) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_listen_refuses_without_recognizer() {
    let addr = serve(builder().build().router()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/listen"))
        .await
        .unwrap();

    let json = next_json(&mut ws).await;
    assert_eq!(json["type"], "error");
}

#[tokio::test]
async fn test_listen_runs_a_full_turn() {
    let (recognizer, mut connections) = FakeRecognizer::new();
    let router = builder()
        .recognizer(recognizer)
        .generator(FakeGenerator::replying("Sharks have lots of teeth!"))
        .synthesizer(FakeSynthesizer::working())
        .build()
        .router();
    let addr = serve(router).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/listen"))
        .await
        .unwrap();

    ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "pong");

    let start = serde_json::json!({
        "type": "start",
        "profile": { "name": "Leo", "interests": ["sharks"] },
    });
    ws.send(Message::Text(start.to_string().into())).await.unwrap();

    let connected = next_json(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    assert!(connected["session_id"].is_string());

    let mut upstream: Upstream = connections.recv().await.unwrap();
    ws.send(Message::binary(b"pcm-audio".to_vec())).await.unwrap();
    assert_eq!(&upstream.next_audio().await[..], b"pcm-audio");

    upstream.partial("I love", 0.7).await;
    let partial = next_json(&mut ws).await;
    assert_eq!(partial["type"], "partial");
    assert_eq!(partial["text"], "I love");

    upstream.finalize("I love sharks", 0.95).await;
    let final_msg = next_json(&mut ws).await;
    assert_eq!(final_msg["type"], "final");
    assert_eq!(final_msg["verdict"], "acceptable");

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "reply");
    assert_eq!(reply["text"], "Sharks have lots of teeth!");
    assert_eq!(reply["keywords"], serde_json::json!(["sharks"]));

    let audio = next_json(&mut ws).await;
    assert_eq!(audio["type"], "audio");
    assert_eq!(audio["encoding"], "mp3");
    let data = base64::engine::general_purpose::STANDARD
        .decode(audio["data"].as_str().unwrap())
        .unwrap();
    assert_eq!(data, b"Sharks have lots of teeth!");

    let done = next_json(&mut ws).await;
    assert_eq!(done["type"], "turn_complete");
    assert_eq!(done["kind"], "reply");

    ws.send(Message::Text(r#"{"type":"stop"}"#.into())).await.unwrap();
    upstream.expect_finish().await;
    drop(upstream);
    assert_eq!(next_json(&mut ws).await["type"], "closed");
}

#[tokio::test]
async fn test_listen_reports_malformed_messages() {
    let (recognizer, _connections) = FakeRecognizer::new();
    let router = builder()
        .recognizer(recognizer)
        .generator(FakeGenerator::replying("hi"))
        .build()
        .router();
    let addr = serve(router).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/listen"))
        .await
        .unwrap();

    ws.send(Message::Text(r#"{"type":"dance"}"#.into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "error");
}
