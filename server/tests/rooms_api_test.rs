//! Integration tests for the room directory and health REST endpoints.

mod common;

use common::{start_node, Client};
use serde_json::{json, Value};

#[tokio::test]
async fn test_create_and_list_rooms() {
    let node = start_node().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(node.http("/api/rooms"))
        .json(&json!({ "id": "music", "name": "Music", "icon": "🎵" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["id"], "music");
    assert_eq!(created["users"], 0);

    let rooms: Value = client
        .get(node.http("/api/rooms"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let rooms = rooms.as_array().unwrap();
    assert!(rooms.iter().any(|r| r["id"] == "music" && r["icon"] == "🎵"));
}

#[tokio::test]
async fn test_create_room_rejects_bad_input() {
    let node = start_node().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(node.http("/api/rooms"))
        .json(&json!({ "name": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let first = client
        .post(node.http("/api/rooms"))
        .json(&json!({ "id": "dup", "name": "Dup" }))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);
    let second = client
        .post(node.http("/api/rooms"))
        .json(&json!({ "id": "dup", "name": "Dup again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 409);
}

#[tokio::test]
async fn test_created_room_is_pushed_to_clients() {
    let node = start_node().await;
    let mut watcher = Client::connect(&node).await;

    let resp = reqwest::Client::new()
        .post(node.http("/api/rooms"))
        .json(&json!({ "name": "Generated" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert!(!created["id"].as_str().unwrap().is_empty());

    let listing = watcher.expect("rooms:list").await;
    assert!(listing["data"]["rooms"]
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["name"] == "Generated"));
}

#[tokio::test]
async fn test_health_reports_node_and_connections() {
    let node = start_node().await;
    let _client = Client::connect(&node).await;

    let health: Value = reqwest::get(node.http("/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["node_id"], "solo");
    assert_eq!(health["connections"], 1);
    assert!(health["version"].is_string());
}
