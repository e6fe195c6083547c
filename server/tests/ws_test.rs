//! Integration tests for the WebSocket event surface on a single node.

mod common;

use chorus_server::store::HistoryStore;
use common::{settle, start_node, user_names, Client};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

#[tokio::test]
async fn test_join_converges_membership_with_empty_history() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    let mut bob = Client::connect(&node).await;

    alice.join("general", "Alice").await;
    let history = alice.expect("chat:history").await;
    assert_eq!(history["data"]["roomId"], "general");
    assert!(history["data"]["messages"].as_array().unwrap().is_empty());

    let snapshot = bob.join("general", "Bob").await;
    assert_eq!(user_names(&snapshot), vec!["Alice", "Bob"]);
    let seen_by_alice = alice.expect("room:users").await;
    assert_eq!(user_names(&seen_by_alice), vec!["Alice", "Bob"]);

    // Bob's backlog has Alice's join announcement only.
    let history = bob.expect("chat:history").await;
    let messages = history["data"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["kind"], "system");
    assert_eq!(messages[0]["text"], "Alice joined the room");
}

#[tokio::test]
async fn test_room_message_reaches_everyone_with_same_id() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    let mut bob = Client::connect(&node).await;
    alice.join("general", "Alice").await;
    bob.join("general", "Bob").await;
    bob.expect("chat:history").await;
    settle().await;

    alice.send("chat:send", json!({ "text": "hi" })).await;

    let mut received = Vec::new();
    for client in [&mut alice, &mut bob] {
        loop {
            let frame = client.expect("chat:message").await;
            if frame["data"]["kind"] == "text" {
                received.push(frame);
                break;
            }
        }
    }
    assert_eq!(received[0]["data"]["id"], received[1]["data"]["id"]);
    for frame in &received {
        assert_eq!(frame["data"]["author"], "Alice");
        assert_eq!(frame["data"]["text"], "hi");
        assert_eq!(frame["data"]["roomId"], "general");
    }
}

#[tokio::test]
async fn test_reaction_toggle_twice_clears_set() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    alice.join("general", "Alice").await;
    alice.send("chat:send", json!({ "text": "react to me" })).await;
    let message_id = loop {
        let frame = alice.expect("chat:message").await;
        if frame["data"]["kind"] == "text" {
            break frame["data"]["id"].as_str().unwrap().to_string();
        }
    };

    alice
        .send("chat:react", json!({ "messageId": message_id, "emoji": "👍" }))
        .await;
    let first = alice.expect("chat:reaction").await;
    assert_eq!(first["data"]["users"], json!(["Alice"]));

    alice
        .send("chat:react", json!({ "messageId": message_id, "emoji": "👍" }))
        .await;
    let second = alice.expect("chat:reaction").await;
    assert_eq!(second["data"]["users"], json!([]));
}

#[tokio::test]
async fn test_call_request_accept_and_end() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    let mut bob = Client::connect(&node).await;
    alice.online("Alice").await;
    bob.online("Bob").await;
    settle().await;

    alice.send("call:request", json!({ "to": "Bob" })).await;
    let incoming = bob.expect("call:incoming").await;
    assert_eq!(incoming["data"]["from"], "Alice");
    let ringing = alice.expect("call:ringing").await;
    assert_eq!(ringing["data"]["from"], "Bob");

    bob.send("call:accept", json!({ "to": "Alice" })).await;
    assert_eq!(alice.expect("call:accepted").await["data"]["from"], "Bob");
    assert_eq!(bob.expect("call:accepted").await["data"]["from"], "Alice");

    bob.send("webrtc:offer", json!({ "to": "Alice", "offer": { "sdp": "v=0" } }))
        .await;
    let offer = alice.expect("webrtc:offer").await;
    assert_eq!(offer["data"]["offer"]["sdp"], "v=0");

    alice.send("call:end", json!({ "to": "Bob" })).await;
    assert_eq!(bob.expect("call:ended").await["data"]["from"], "Alice");
    let log = bob.expect("dm:message").await;
    assert_eq!(log["data"]["kind"], "call-log");
    assert_eq!(log["data"]["call"]["kind"], "ended");
    assert_eq!(log["data"]["dmId"], "alice:bob");
}

#[tokio::test]
async fn test_call_to_absent_user_is_unavailable() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    alice.online("Alice").await;

    alice.send("call:request", json!({ "to": "Charlie" })).await;
    let unavailable = alice.expect("call:unavailable").await;
    assert_eq!(unavailable["data"]["to"], "Charlie");
    settle().await;
    assert!(node.state.calls.is_empty());
}

#[tokio::test]
async fn test_dm_delivery_and_history() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    let mut bob = Client::connect(&node).await;
    alice.online("Alice").await;
    bob.online("Bob").await;
    settle().await;

    alice
        .send("dm:send", json!({ "toUser": "Bob", "text": "secret" }))
        .await;
    let echo = alice.expect("dm:message").await;
    let delivered = bob.expect("dm:message").await;
    assert_eq!(echo["data"]["id"], delivered["data"]["id"]);
    assert_eq!(delivered["data"]["text"], "secret");

    bob.send("dm:history", json!({ "toUser": "Alice" })).await;
    let history = bob.expect("dm:history").await;
    assert_eq!(history["data"]["dmId"], "alice:bob");
    assert_eq!(history["data"]["history"].as_array().unwrap().len(), 1);

    alice
        .send("dm:send", json!({ "toUser": "alice", "text": "me" }))
        .await;
    let err = alice.expect("error").await;
    assert_eq!(err["data"]["code"], 400);
}

#[tokio::test]
async fn test_leave_then_disconnect_changes_membership_once() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    let mut bob = Client::connect(&node).await;
    alice.join("general", "Alice").await;
    bob.join("general", "Bob").await;
    alice.expect("room:users").await;
    settle().await;

    bob.send("room:leave", json!({})).await;
    let left = bob.expect("room:left").await;
    assert_eq!(left["data"]["roomId"], "general");
    let after_leave = alice.expect("room:users").await;
    assert_eq!(user_names(&after_leave), vec!["Alice"]);

    bob.close().await;
    settle().await;
    alice.expect_none("room:users", Duration::from_millis(300)).await;
    assert_eq!(node.state.rooms.members("general").len(), 1);

    let history = node
        .state
        .history
        .history(&chorus_server::chat::message::ChannelId::room("general"))
        .unwrap();
    let departures = history
        .iter()
        .filter(|m| matches!(&m.body, chorus_server::chat::message::MessageBody::System { text } if text == "Bob left the room"))
        .count();
    assert_eq!(departures, 1);
}

#[tokio::test]
async fn test_disconnect_releases_presence_and_membership() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    let bob = {
        let mut bob = Client::connect(&node).await;
        bob.join("general", "Bob").await;
        bob
    };
    alice.join("general", "Alice").await;
    settle().await;

    bob.close().await;
    let snapshot = alice.expect("room:users").await;
    assert_eq!(user_names(&snapshot), vec!["Alice"]);
    settle().await;
    let bob_id = chorus_server::session::Identity::parse("Bob").unwrap();
    assert!(node.state.presence.lookup(&bob_id).is_none());
}

#[tokio::test]
async fn test_invalid_frames_get_error_events() {
    let node = start_node().await;
    let mut client = Client::connect(&node).await;

    client.send("room:join", json!({ "roomId": "", "user": { "name": "A" } })).await;
    assert_eq!(client.expect("error").await["data"]["code"], 400);

    client.send("made:up", json!({})).await;
    assert_eq!(client.expect("error").await["data"]["code"], 404);

    client.send("chat:typing", json!({ "isTyping": true })).await;
    assert_eq!(client.expect("error").await["data"]["code"], 400);

    client.send_raw(Message::Binary(vec![1, 2, 3].into())).await;
    assert_eq!(client.expect("error").await["data"]["code"], 400);

    client.send("call:request", json!({ "to": "Bob" })).await;
    assert_eq!(client.expect("error").await["data"]["code"], 400);
}

#[tokio::test]
async fn test_typing_is_not_echoed_to_sender() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    let mut bob = Client::connect(&node).await;
    alice.join("general", "Alice").await;
    bob.join("general", "Bob").await;
    settle().await;

    alice.send("chat:typing", json!({ "isTyping": true })).await;
    let typing = bob.expect("chat:typing").await;
    assert_eq!(typing["data"]["user"], "Alice");
    assert_eq!(typing["data"]["isTyping"], true);
    alice.expect_none("chat:typing", Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_names_with_separator_are_rejected() {
    let node = start_node().await;
    let mut alice = Client::connect(&node).await;
    alice.online("Alice").await;

    let mut mallory = Client::connect(&node).await;
    mallory.online("b:c").await;
    assert_eq!(mallory.expect("error").await["data"]["code"], 400);

    alice
        .send("dm:send", json!({ "toUser": "b:c", "text": "hi" }))
        .await;
    assert_eq!(alice.expect("error").await["data"]["code"], 400);
    alice.expect_none("dm:message", Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_message_racing_a_join_is_seen_exactly_once() {
    let node = start_node().await;
    for round in 0..10 {
        let room = format!("race-{round}");
        let text = format!("hello {round}");
        let mut alice = Client::connect(&node).await;
        alice.join(&room, "Alice").await;
        alice.expect("chat:history").await;
        let mut carol = Client::connect(&node).await;

        tokio::join!(
            alice.send("chat:send", json!({ "text": text })),
            carol.send("room:join", json!({ "roomId": room, "user": { "name": "Carol" } })),
        );

        let mut frames = Vec::new();
        while let Some(frame) = carol.next_event(Duration::from_millis(300)).await {
            frames.push(frame);
        }
        let position = |event: &str| frames.iter().position(|f| f["event"] == event);
        let users_at = position("room:users").expect("room:users");
        let history_at = position("chat:history").expect("chat:history");
        assert!(users_at < history_at, "round {round}: {frames:?}");

        let in_history = frames[history_at]["data"]["messages"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|m| m["kind"] == "text" && m["text"] == text.as_str())
            .count();
        let live: Vec<usize> = frames
            .iter()
            .enumerate()
            .filter(|(_, f)| {
                f["event"] == "chat:message"
                    && f["data"]["kind"] == "text"
                    && f["data"]["roomId"] == room.as_str()
                    && f["data"]["text"] == text.as_str()
            })
            .map(|(i, _)| i)
            .collect();
        assert!(live.iter().all(|i| *i > history_at), "round {round}: {frames:?}");
        assert_eq!(in_history + live.len(), 1, "round {round}: {frames:?}");

        alice.close().await;
        carol.close().await;
    }
}
