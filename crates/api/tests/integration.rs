use proxbridge_api::create_router;
use proxbridge_common::BridgeConfig;
use proxbridge_manager::Manager;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;

async fn spawn_server() -> (SocketAddr, Arc<Manager>) {
    let manager = Arc::new(Manager::from_config(BridgeConfig::default()).unwrap());
    manager.start().await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(Arc::clone(&manager));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, manager)
}

#[tokio::test]
async fn health_reports_running() {
    let (addr, _manager) = spawn_server().await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["phase"], "running");
}

#[tokio::test]
async fn catalog_lists_builtin_tools() {
    let (addr, _manager) = spawn_server().await;
    let body: Value = reqwest::get(format!("http://{addr}/api/v1/tools"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|tool| tool["name"].as_str())
        .collect();
    assert!(names.contains(&"cluster_status"));
    assert!(names.contains(&"vm_start"));
    assert!(names.contains(&"send_notification"));
}

#[tokio::test]
async fn unknown_tool_is_404() {
    let (addr, _manager) = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/tools/no_such_tool"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "tool_not_found");
}

#[tokio::test]
async fn missing_arguments_are_400() {
    let (addr, _manager) = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/tools/vm_status"))
        .json(&json!({"node": "pve1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "invalid_arguments");
}

#[tokio::test]
async fn unknown_node_is_404() {
    let (addr, _manager) = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/tools/node_status"))
        .json(&json!({"node": "ghost"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "node_unknown");
    assert_eq!(body["error"]["node"], "ghost");
}

#[tokio::test]
async fn send_notification_round_trip() {
    let (addr, _manager) = spawn_server().await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/tools/send_notification"))
        .json(&json!({"title": "Hello", "message": "from the integration test"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "queued");
}

#[tokio::test]
async fn nodes_endpoint_is_empty_without_configuration() {
    let (addr, _manager) = spawn_server().await;
    let body: Value = reqwest::get(format!("http://{addr}/api/v1/nodes"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["nodes"], json!([]));
}

#[tokio::test]
async fn selftest_passes_on_empty_configuration() {
    let (addr, _manager) = spawn_server().await;
    let response = reqwest::get(format!("http://{addr}/api/v1/selftest"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["passed"], true);
}

#[tokio::test]
async fn shutdown_turns_tools_away() {
    let (addr, manager) = spawn_server().await;
    manager.shutdown().await.unwrap();
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/tools/cluster_status"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "cancelled");
}
