//! Live stream and control routes over a real socket, backed by the scripted tool.

mod common;

use common::*;
use futures_util::StreamExt;
use rtxss_agent::api::router;
use rtxss_agent::sampler::Sampler;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn serve(state: rtxss_agent::state::AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    addr
}

async fn next_json<S>(ws: &mut S) -> Value
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(t) = msg {
            return serde_json::from_str(&t).expect("json frame");
        }
    }
}

// Minimal HTTP/1.1 POST; returns (status code, body json).
async fn post(addr: SocketAddr, path: &str, body: &str) -> (u16, Value) {
    let mut s = tokio::net::TcpStream::connect(addr).await.unwrap();
    let req = format!(
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    s.write_all(req.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    s.read_to_end(&mut buf).await.unwrap();
    let text = String::from_utf8_lossy(&buf);
    let code: u16 = text
        .split_whitespace()
        .nth(1)
        .and_then(|c| c.parse().ok())
        .expect("status line");
    let body = text.split("\r\n\r\n").nth(1).unwrap_or("");
    (code, serde_json::from_str(body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn new_client_gets_greeting_history_and_last_sample() {
    let (state, _runner) = scripted_state();
    let mut sampler = Sampler::new(state.clone());
    sampler.cycle().await.unwrap();

    let addr = serve(state.clone()).await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.expect("connect");

    let greet = next_json(&mut ws).await;
    assert_eq!(greet["type"], "status");
    assert_eq!(greet["data"]["level"], "info");

    let history = next_json(&mut ws).await;
    assert_eq!(history["type"], "history");
    assert_eq!(history["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(history["data"][0]["temperature_c"], 41.0);

    let sample = next_json(&mut ws).await;
    assert_eq!(sample["type"], "sample");
    assert_eq!(sample["data"]["device_name"], "NVIDIA GeForce RTX 5090");
    assert_eq!(sample["data"]["cuda_version"], "12.9");

    // next cycle is pushed without asking
    sampler.cycle().await.unwrap();
    let pushed = next_json(&mut ws).await;
    assert_eq!(pushed["type"], "sample");

    ws.close(None).await.ok();
    drop(ws);
    // closed clients are pruned lazily
    for _ in 0..50 {
        sampler.cycle().await.unwrap();
        if state.broadcaster.subscriber_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.broadcaster.subscriber_count(), 0);
}

#[tokio::test]
async fn control_routes_validate_input() {
    let (state, runner) = scripted_state();
    let addr = serve(state.clone()).await;

    let (code, body) = post(addr, "/api/set_power", r#"{"wattage": 425}"#).await;
    assert_eq!(code, 400);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "invalid_value");
    assert!(runner.calls().is_empty());

    let (code, body) = post(addr, "/api/set_power", r#"{"wattage": 550}"#).await;
    assert_eq!(code, 200);
    assert_eq!(body["success"], true);

    runner.set_power(failed(4, "Insufficient Permissions", ""));
    let (code, body) = post(addr, "/api/set_power", r#"{"wattage": 600}"#).await;
    assert_eq!(code, 403);
    assert_eq!(body["kind"], "permission_denied");

    // wrong types and missing fields still get a JSON reply
    for bad in [r#"{"wattage": "500"}"#, r#"{"wattage": 500.5}"#, r#"{"wattage": null}"#, "{}", "not json"] {
        let (code, body) = post(addr, "/api/set_power", bad).await;
        assert_eq!(code, 400, "{bad}");
        assert_eq!(body["success"], false, "{bad}");
        assert_eq!(body["kind"], "invalid_value", "{bad}");
    }
    assert_eq!(runner.calls().len(), 2);

    let (code, _) = post(addr, "/api/set_update_interval", r#"{"interval": 50}"#).await;
    assert_eq!(code, 400);
    for bad in [r#"{"interval": 250.5}"#, r#"{"interval": "250"}"#, "{}"] {
        let (code, body) = post(addr, "/api/set_update_interval", bad).await;
        assert_eq!(code, 400, "{bad}");
        assert_eq!(body["kind"], "invalid_value", "{bad}");
    }
    assert_eq!(state.interval.get(), Duration::from_millis(100));
    let (code, body) = post(addr, "/api/set_update_interval", r#"{"interval": 2500}"#).await;
    assert_eq!(code, 200);
    assert_eq!(body["message"], "Update interval set to 2500ms");
    assert_eq!(state.interval.get(), Duration::from_millis(2500));
}
