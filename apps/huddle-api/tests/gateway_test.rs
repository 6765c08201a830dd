mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_tungstenite::tungstenite;

use common::TestClient;
use huddle_api::config::Config;
use huddle_api::db::store::MemoryStore;
use huddle_api::gateway::connections::ChannelBinding;
use huddle_api::gateway::dispatcher;
use huddle_api::gateway::session::GatewaySession;

const QUIET: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// Admission and wire protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn channel_connection_without_credentials_is_rejected() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    for query in ["userId=u1", "channelId=general", "channelId=%20&userId=u1", ""] {
        let url = format!("ws://{addr}/gateway/channel?{query}");
        match tokio_tungstenite::connect_async(&url).await {
            Err(tungstenite::Error::Http(resp)) => assert_eq!(resp.status().as_u16(), 401),
            Err(err) => panic!("expected 401 for {query:?}, got {err}"),
            Ok(_) => panic!("connection for {query:?} should have been rejected"),
        }
    }

    assert!(state.connections.is_empty());
    assert!(!state.presence.has_channel("general"));
}

#[tokio::test]
async fn hello_carries_connection_id_and_heartbeat_interval() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let client = TestClient::channel(addr, "general", "u1").await;
    assert!(client.connection_id.starts_with("conn_"));
    assert_eq!(client.heartbeat_interval, state.config.heartbeat_interval_ms);

    common::eventually(|| async { state.connections.get(&client.connection_id).is_some() }).await;
    let entry = state.connections.get(&client.connection_id).unwrap();
    assert_eq!(
        entry.binding,
        Some(ChannelBinding {
            channel_id: "general".to_string(),
            user_id: "u1".to_string(),
        })
    );
}

#[tokio::test]
async fn heartbeat_is_acknowledged() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state).await;

    let mut client = TestClient::unscoped(addr).await;
    client.send_raw(r#"{"op":1,"d":{"seq":3}}"#).await;

    let ack = client.recv_matching(|m| m["op"] == 6).await;
    assert_eq!(ack["d"]["ack"], 3);
}

#[tokio::test]
async fn invalid_json_closes_with_4000() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state).await;

    let mut client = TestClient::unscoped(addr).await;
    client.send_raw("not json").await;
    assert_eq!(client.recv_close_code().await, Some(4000));
}

#[tokio::test]
async fn unknown_opcode_closes_with_4001() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state).await;

    let mut client = TestClient::unscoped(addr).await;
    client.send_raw(r#"{"op":9,"d":{}}"#).await;
    assert_eq!(client.recv_close_code().await, Some(4001));
}

#[tokio::test]
async fn missed_heartbeats_close_and_clean_up() {
    let config = Config {
        heartbeat_interval_ms: 100,
        ..Config::default()
    };
    let state = common::state_with(config, Arc::new(MemoryStore::new()));
    let addr = common::start_ws_server(state.clone()).await;

    let mut client = TestClient::channel(addr, "general", "u1").await;
    assert_eq!(client.recv_close_code().await, Some(4009));

    common::eventually(|| async { !state.presence.has_channel("general") }).await;
    assert!(state.connections.is_empty());
}

#[tokio::test]
async fn slow_handler_does_not_time_out_a_live_client() {
    let config = Config {
        heartbeat_interval_ms: 100,
        ..Config::default()
    };
    let store = Arc::new(common::FaultyStore::new().with_insert_delay(Duration::from_millis(400)));
    let state = common::state_with(config, store);
    let addr = common::start_ws_server(state).await;

    let mut client = TestClient::channel(addr, "general", "u1").await;
    client.send_raw(r#"{"op":1,"d":{"seq":1}}"#).await;
    client.send_event("message", json!({ "content": "slow" })).await;

    // Keep heartbeating while the connection is stuck in the store call.
    for seq in 2..20 {
        tokio::time::sleep(Duration::from_millis(40)).await;
        client.send_raw(&format!(r#"{{"op":1,"d":{{"seq":{seq}}}}}"#)).await;
    }

    assert_eq!(client.recv_event("message").await["content"], "slow");
    client.send_raw(r#"{"op":1,"d":{"seq":99}}"#).await;
    let ack = client.recv_matching(|m| m["op"] == 6 && m["d"]["ack"] == 99).await;
    assert_eq!(ack["op"], 6);
}

#[tokio::test]
async fn unknown_events_are_ignored() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state).await;

    let mut client = TestClient::channel(addr, "general", "u1").await;
    client.send_event("doesNotExist", json!({})).await;
    client.send_event("joinedMeeting", json!({ "meetingId": 5 })).await;
    client
        .send_event_with_ack("checkActiveMeetingsInChannel", json!({}), 1)
        .await;

    // Still connected and answering.
    let reply = client.recv_ack(1).await;
    assert_eq!(reply["active"], false);
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn user_stays_online_until_last_tab_closes() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let mut a1 = TestClient::channel(addr, "general", "a").await;
    let joined = a1.recv_event("user_presence").await;
    assert_eq!(joined["channelId"], "general");
    assert_eq!(joined["action"], "joined");
    assert_eq!(joined["onlineUsers"], json!(["a"]));

    let a2 = TestClient::channel(addr, "general", "a").await;
    common::eventually(|| async { state.connections.len() == 2 }).await;
    let mut b = TestClient::channel(addr, "general", "b").await;
    let joined = b.recv_event("user_presence").await;
    assert_eq!(joined["onlineUsers"], json!(["a", "b"]));

    // First tab goes away: still online, nothing broadcast.
    a1.close().await;
    common::eventually(|| async { state.connections.len() == 2 }).await;
    assert!(state.presence.is_online("general", "a"));
    b.expect_no_event("user_presence", QUIET).await;

    // Last tab goes away.
    a2.close().await;
    let left = b.recv_event("user_presence").await;
    assert_eq!(left["action"], "left");
    assert_eq!(left["onlineUsers"], json!(["b"]));

    b.close().await;
    common::eventually(|| async { !state.presence.has_channel("general") }).await;
}

#[tokio::test]
async fn presence_is_scoped_to_the_channel() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state).await;

    let mut general = TestClient::channel(addr, "general", "a").await;
    general.recv_event("user_presence").await;

    let _random = TestClient::channel(addr, "random", "b").await;
    general.expect_no_event("user_presence", QUIET).await;
}

// ---------------------------------------------------------------------------
// Meeting sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn latest_meeting_session_wins() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let mut c1 = TestClient::channel(addr, "general", "u1").await;
    let mut c2 = TestClient::channel(addr, "general", "u1").await;
    let mut c3 = TestClient::channel(addr, "general", "u1").await;

    c1.send_event("joinedMeeting", json!({ "meetingId": "m1", "sessionId": "s1" }))
        .await;
    common::eventually(|| async { state.meetings.sessions("m1", "u1") == vec!["s1"] }).await;

    c2.send_event("joinedMeeting", json!({ "meetingId": "m1", "sessionId": "s2" }))
        .await;
    let kicked = c1.recv_event("duplicateSessionKicked").await;
    assert_eq!(kicked["sessionId"], "s1");
    assert_eq!(kicked["meetingId"], "m1");
    assert_eq!(kicked["userId"], "u1");
    assert_eq!(kicked["action"], "leave_immediately");
    assert!(kicked["reason"].is_string());
    let removed = c2.recv_event("removeOldParticipantSession").await;
    assert_eq!(removed["sessionId"], "s1");
    assert_eq!(removed["survivorSessionId"], "s2");

    c3.send_event("joinedMeeting", json!({ "meetingId": "m1", "sessionId": "s3" }))
        .await;
    let kicked = c2.recv_event("duplicateSessionKicked").await;
    assert_eq!(kicked["sessionId"], "s2");
    let removed = c3.recv_event("removeOldParticipantSession").await;
    assert_eq!(removed["sessionId"], "s2");

    assert_eq!(state.meetings.sessions("m1", "u1"), vec!["s3"]);
    c3.expect_no_event("duplicateSessionKicked", QUIET).await;
}

#[tokio::test]
async fn left_meeting_removes_the_session() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let mut client = TestClient::channel(addr, "general", "u1").await;
    client
        .send_event("joinedMeeting", json!({ "meetingId": "m1", "sessionId": "s1" }))
        .await;
    client
        .send_event("leftMeeting", json!({ "meetingId": "m1", "sessionId": "s1" }))
        .await;
    client
        .send_event_with_ack("checkActiveMeetingsInChannel", json!({}), 1)
        .await;
    client.recv_ack(1).await;

    assert!(state.meetings.participants("m1").is_empty());
}

#[tokio::test]
async fn disconnect_cleanup_is_idempotent() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let mut client = TestClient::channel(addr, "general", "u1").await;
    let connection_id = client.connection_id.clone();
    client
        .send_event("joinedMeeting", json!({ "meetingId": "m1", "sessionId": "s1" }))
        .await;
    common::eventually(|| async { !state.meetings.sessions("m1", "u1").is_empty() }).await;

    client.close().await;
    common::eventually(|| async {
        state.connections.is_empty()
            && state.meetings.sessions("m1", "u1").is_empty()
            && !state.presence.has_channel("general")
    })
    .await;

    // A second cleanup for the same connection changes and broadcasts nothing.
    let mut rx = state.broadcast.subscribe();
    let session = GatewaySession::new(
        connection_id,
        Some(ChannelBinding {
            channel_id: "general".to_string(),
            user_id: "u1".to_string(),
        }),
    );
    dispatcher::on_disconnect(&state, &session);
    dispatcher::on_disconnect(&state, &session);
    assert!(rx.try_recv().is_err());
    assert!(!state.presence.has_channel("general"));
}

// ---------------------------------------------------------------------------
// Active meetings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn meeting_lifecycle_end_to_end() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let mut tab1 = TestClient::channel(addr, "general", "u1").await;
    let mut tab2 = TestClient::channel(addr, "general", "u1").await;
    let mut observer = TestClient::channel(addr, "general", "u2").await;

    // Two tabs join the same meeting; the first is kicked.
    tab1.send_event("joinedMeeting", json!({ "meetingId": "m1", "sessionId": "s1" }))
        .await;
    common::eventually(|| async { !state.meetings.sessions("m1", "u1").is_empty() }).await;
    tab2.send_event("joinedMeeting", json!({ "meetingId": "m1", "sessionId": "s2" }))
        .await;
    let kicked = tab1.recv_event("duplicateSessionKicked").await;
    assert_eq!(kicked["sessionId"], "s1");

    // Meeting goes live.
    tab2.send_event(
        "updateMeetingStatus",
        json!({ "meetingId": "m1", "status": "ongoing" }),
    )
    .await;
    let changed = observer.recv_event("meetingStatusChanged").await;
    assert_eq!(changed["channelId"], "general");
    assert_eq!(changed["meetingId"], "m1");
    assert_eq!(changed["status"], "ongoing");
    assert!(changed["startedAt"].is_string());

    tab2.send_event_with_ack("checkActiveMeetingsInChannel", json!({ "channelId": "general" }), 7)
        .await;
    let active = tab2.recv_ack(7).await;
    assert_eq!(active["active"], true);
    assert_eq!(active["meetingId"], "m1");

    // Meeting ends.
    tab2.send_event(
        "updateMeetingStatus",
        json!({ "meetingId": "m1", "status": "ended" }),
    )
    .await;
    let changed = observer.recv_event("meetingStatusChanged").await;
    assert_eq!(changed["status"], "ended");
    assert_eq!(changed["meetingId"], "m1");

    common::eventually(|| async { state.meetings.participants("m1").is_empty() }).await;
    assert!(!state.active_meetings.check("general").active);
}

#[tokio::test]
async fn stale_stop_does_not_clear_newer_meeting() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let mut client = TestClient::channel(addr, "general", "u1").await;
    client
        .send_event(
            "setActiveMeetingInChannel",
            json!({ "channelId": "general", "meetingId": "m1", "active": true }),
        )
        .await;
    client.recv_event("meetingStatusChanged").await;

    client
        .send_event(
            "setActiveMeetingInChannel",
            json!({ "channelId": "general", "meetingId": "m2", "active": false }),
        )
        .await;
    client
        .send_event_with_ack("checkActiveMeetingsInChannel", json!({}), 2)
        .await;
    let reply = client.recv_ack(2).await;
    assert_eq!(reply["active"], true);
    assert_eq!(reply["meetingId"], "m1");
    client.expect_no_event("meetingStatusChanged", QUIET).await;
}

#[tokio::test]
async fn unscoped_connection_drives_channel_meetings() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let mut member = TestClient::channel(addr, "general", "u1").await;
    let mut control = TestClient::unscoped(addr).await;

    control
        .send_event_with_ack("checkActiveMeetingsInChannel", json!({ "channelId": "general" }), 1)
        .await;
    let reply = control.recv_ack(1).await;
    assert_eq!(reply["active"], false);
    assert!(reply["meetingId"].is_null());

    control
        .send_event(
            "setActiveMeetingInChannel",
            json!({ "channelId": "general", "meetingId": "m9", "active": true }),
        )
        .await;
    let changed = member.recv_event("meetingStatusChanged").await;
    assert_eq!(changed["meetingId"], "m9");
    assert_eq!(changed["status"], "ongoing");

    // Needs the connection's own user; ignored here.
    control
        .send_event("joinedMeeting", json!({ "meetingId": "m9", "sessionId": "s1" }))
        .await;

    // A global end clears every channel running the meeting.
    control
        .send_event("meetingEnded", json!({ "meetingId": "m9" }))
        .await;
    let changed = member.recv_event("meetingStatusChanged").await;
    assert_eq!(changed["status"], "ended");

    control
        .send_event_with_ack("checkActiveMeetingsInChannel", json!({ "channelId": "general" }), 2)
        .await;
    assert_eq!(control.recv_ack(2).await["active"], false);
    assert!(state.meetings.participants("m9").is_empty());
}

#[tokio::test]
async fn meeting_ended_without_id_uses_the_channel_meeting() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state.clone()).await;

    let mut host = TestClient::channel(addr, "general", "u1").await;
    host.send_event(
        "setActiveMeetingInChannel",
        json!({ "channelId": "general", "meetingId": "m1", "active": true }),
    )
    .await;
    host.recv_event("meetingStatusChanged").await;

    host.send_event("meetingEnded", json!({})).await;
    let changed = host.recv_event("meetingStatusChanged").await;
    assert_eq!(changed["status"], "ended");
    assert_eq!(changed["meetingId"], "m1");
    assert!(!state.active_meetings.check("general").active);
}

// ---------------------------------------------------------------------------
// Relays
// ---------------------------------------------------------------------------

#[tokio::test]
async fn typing_is_relayed_to_everyone_but_the_sender() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state).await;

    let mut alice = TestClient::channel(addr, "general", "u1").await;
    let mut bob = TestClient::channel(addr, "general", "u2").await;

    alice
        .send_event("typing_start", json!({ "username": "alice" }))
        .await;
    let typing = bob.recv_event("user_typing").await;
    assert_eq!(typing["channelId"], "general");
    assert_eq!(typing["userId"], "u1");
    assert_eq!(typing["username"], "alice");
    assert_eq!(typing["isTyping"], true);

    alice
        .send_event("typing_end", json!({ "username": "alice" }))
        .await;
    let typing = bob.recv_event("user_typing").await;
    assert_eq!(typing["isTyping"], false);

    alice.expect_no_event("user_typing", QUIET).await;
}

#[tokio::test]
async fn mic_status_is_relayed_to_the_whole_channel() {
    let (state, _) = common::test_state();
    let addr = common::start_ws_server(state).await;

    let mut alice = TestClient::channel(addr, "general", "u1").await;
    let mut bob = TestClient::channel(addr, "general", "u2").await;
    let mut elsewhere = TestClient::channel(addr, "random", "u3").await;

    alice
        .send_event("rotateMicStatus", json!({ "userId": "u1", "muted": true }))
        .await;
    assert_eq!(alice.recv_event("rotateMicStatus").await["muted"], true);
    assert_eq!(bob.recv_event("rotateMicStatus").await["userId"], "u1");
    elsewhere.expect_no_event("rotateMicStatus", QUIET).await;
}
