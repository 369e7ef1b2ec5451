//! End-to-end tests of the chat node against the in-memory mock transport
//!
//! Each test drives a node through its command interface and observes it only
//! through `AppEvent`s and the bytes the mock peer saw on the wire.


use std::time::Duration;

use gattchat_core::{
    AppEvent, ChatNode, ConnectError, DeliveryStatus, DeviceId, Direction, Envelope, EnvelopeBody,
    EnvelopeKind, Fragmenter, GattchatConfig, GroupId, NodeHandle, PeerId, ProtocolConfig,
    SessionConfig, SessionState, SystemNotice, WriteError,
};
use test_utils::{alice_config, drain, next_event, wait_for, MockController, MockTransport};
use tokio::sync::mpsc;

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

struct Harness {
    node: NodeHandle,
    events: mpsc::Receiver<AppEvent>,
    peer: MockController,
}

fn spawn_node() -> Harness {
    spawn_node_with(alice_config())
}

fn spawn_node_with(config: GattchatConfig) -> Harness {
    let (transport, peer) = MockTransport::new();
    let mut node = ChatNode::spawn(config, transport).unwrap();
    let events = node.take_event_receiver().unwrap();
    Harness { node, events, peer }
}

async fn discover(harness: &mut Harness) {
    harness.node.request_scan().await.unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::DeviceDiscovered(device) if device.id.as_str() == "dev-1")
    })
    .await;
}

async fn connected_node() -> Harness {
    connected_node_with(alice_config()).await
}

async fn connected_node_with(config: GattchatConfig) -> Harness {
    let mut harness = spawn_node_with(config);
    harness.peer.add_device("dev-1", Some("Bob's phone"));
    discover(&mut harness).await;
    harness
        .node
        .request_connect(DeviceId::new("dev-1"))
        .await
        .unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::Connected { .. }))
    })
    .await;
    harness
}

fn bob(body: EnvelopeBody) -> Envelope {
    Envelope::new(PeerId::new("B"), "Bob".to_string(), body)
}

fn states(events: &[AppEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|event| match event {
            AppEvent::ConnectionStateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

async fn next_group_state(
    events: &mut mpsc::Receiver<AppEvent>,
) -> Option<gattchat_core::GroupState> {
    match wait_for(events, |e| matches!(e, AppEvent::GroupStateChanged(_))).await {
        AppEvent::GroupStateChanged(state) => state,
        _ => unreachable!(),
    }
}

async fn next_appended(events: &mut mpsc::Receiver<AppEvent>) -> gattchat_core::ChatLogEntry {
    match wait_for(events, |e| matches!(e, AppEvent::ChatLogAppended(_))).await {
        AppEvent::ChatLogAppended(entry) => entry,
        _ => unreachable!(),
    }
}

async fn next_updated(events: &mut mpsc::Receiver<AppEvent>) -> gattchat_core::ChatLogEntry {
    match wait_for(events, |e| matches!(e, AppEvent::ChatLogUpdated(_))).await {
        AppEvent::ChatLogUpdated(entry) => entry,
        _ => unreachable!(),
    }
}

// ----------------------------------------------------------------------------
// Session lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_scan_reports_each_device_once() {
    let mut harness = spawn_node();
    harness.peer.add_device("dev-1", Some("Bob's phone"));
    harness.node.request_scan().await.unwrap();

    let events = drain(&mut harness.events).await;
    let discovered = events
        .iter()
        .filter(|e| matches!(e, AppEvent::DeviceDiscovered(_)))
        .count();
    assert_eq!(discovered, 1);
    assert_eq!(
        states(&events),
        vec![SessionState::Scanning, SessionState::DeviceFound]
    );
    assert!(events.contains(&AppEvent::Notice(SystemNotice::ScanStarted)));

    // devices found after the scan started are reported too
    harness.peer.add_device("dev-2", None);
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::DeviceDiscovered(device) if device.id.as_str() == "dev-2")
    })
    .await;
}

#[tokio::test]
async fn test_stop_scan_reports_device_count() {
    let mut harness = spawn_node();
    harness.peer.add_device("dev-1", None);
    harness.peer.add_device("dev-2", None);
    harness.node.request_scan().await.unwrap();
    drain(&mut harness.events).await;

    harness.node.request_stop_scan().await.unwrap();
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::DevicesFound { .. }))
    })
    .await;
    assert_eq!(event, AppEvent::Notice(SystemNotice::DevicesFound { count: 2 }));
}

#[tokio::test]
async fn test_connect_walks_states_to_ready() {
    let mut harness = spawn_node();
    harness.peer.add_device("dev-1", Some("Bob's phone"));
    discover(&mut harness).await;
    drain(&mut harness.events).await;

    harness
        .node
        .request_connect(DeviceId::new("dev-1"))
        .await
        .unwrap();
    let events = drain(&mut harness.events).await;

    assert_eq!(
        states(&events),
        vec![
            SessionState::Connecting,
            SessionState::Connected,
            SessionState::Subscribing,
            SessionState::Ready,
        ]
    );
    assert!(events.contains(&AppEvent::Notice(SystemNotice::Connected {
        device: "Bob's phone (dev-1)".to_string()
    })));
    assert_eq!(harness.peer.connects(), 1);
    assert!(harness.peer.is_subscribed());
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let mut harness = spawn_node();
    harness.peer.add_device("dev-1", None);
    harness.peer.fail_connect(ConnectError::Unreachable {
        device_id: "dev-1".to_string(),
        reason: "out of range".to_string(),
    });
    discover(&mut harness).await;

    harness
        .node
        .request_connect(DeviceId::new("dev-1"))
        .await
        .unwrap();
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::ConnectionFailed { .. }))
    })
    .await;
    match event {
        AppEvent::Notice(SystemNotice::ConnectionFailed { reason, .. }) => {
            assert!(reason.contains("out of range"))
        }
        other => panic!("unexpected event {:?}", other),
    }

    let events = drain(&mut harness.events).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, AppEvent::ConnectionStateChanged(SessionState::Ready))));
}

#[tokio::test]
async fn test_connect_to_unknown_device_fails() {
    let mut harness = spawn_node();
    harness
        .node
        .request_connect(DeviceId::new("nowhere"))
        .await
        .unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::ConnectionFailed { .. }))
    })
    .await;
    assert_eq!(harness.peer.connects(), 0);
}

#[tokio::test]
async fn test_subscribe_failure_disconnects() {
    let mut harness = spawn_node();
    harness.peer.add_device("dev-1", None);
    harness.peer.fail_subscribe();
    discover(&mut harness).await;

    harness
        .node
        .request_connect(DeviceId::new("dev-1"))
        .await
        .unwrap();
    let events = drain(&mut harness.events).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, AppEvent::Notice(SystemNotice::ConnectionFailed { .. }))));
    assert_eq!(states(&events).last(), Some(&SessionState::Disconnected));
    assert_eq!(harness.peer.disconnects(), 1);
}

#[tokio::test]
async fn test_peer_drop_tears_down_session() {
    let mut harness = connected_node().await;
    harness.node.request_create_group(None).await.unwrap();
    next_group_state(&mut harness.events).await;

    harness.peer.drop_link();
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::Disconnected { .. }))
    })
    .await;
    assert_eq!(
        event,
        AppEvent::Notice(SystemNotice::Disconnected {
            reason: "link closed".to_string()
        })
    );

    let events = drain(&mut harness.events).await;
    assert!(events.contains(&AppEvent::ConnectionStateChanged(SessionState::Disconnected)));
    assert_eq!(harness.peer.disconnects(), 1);
}

#[tokio::test]
async fn test_disconnect_clears_group_and_is_idempotent() {
    let mut harness = connected_node().await;
    harness.node.request_create_group(None).await.unwrap();
    assert!(next_group_state(&mut harness.events).await.is_some());

    harness.node.request_disconnect().await.unwrap();
    assert!(next_group_state(&mut harness.events).await.is_none());
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::Disconnected { .. }))
    })
    .await;

    harness.node.request_disconnect().await.unwrap();
    let events = drain(&mut harness.events).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, AppEvent::Notice(SystemNotice::Disconnected { .. }))));
    assert_eq!(harness.peer.disconnects(), 1);
}

#[tokio::test]
async fn test_rescan_after_disconnect() {
    let mut harness = connected_node().await;
    harness.node.request_disconnect().await.unwrap();
    drain(&mut harness.events).await;

    harness.node.request_scan().await.unwrap();
    let events = drain(&mut harness.events).await;
    assert_eq!(
        states(&events),
        vec![SessionState::Scanning, SessionState::DeviceFound]
    );
}

#[tokio::test]
async fn test_shutdown_disconnects() {
    let harness = connected_node().await;
    let peer = harness.peer.clone();
    harness.node.shutdown().await.unwrap();
    assert_eq!(peer.disconnects(), 1);
}

// ----------------------------------------------------------------------------
// Sending
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_send_text_without_group_is_plain_message() {
    let mut harness = connected_node().await;
    harness
        .node
        .request_send("hi".to_string(), None, None)
        .await
        .unwrap();

    let appended = next_appended(&mut harness.events).await;
    assert_eq!(appended.direction, Direction::Sent);
    assert_eq!(appended.status, DeliveryStatus::Pending);

    let updated = next_updated(&mut harness.events).await;
    assert_eq!(updated.id, appended.id);
    assert_eq!(updated.status, DeliveryStatus::Sent);

    let envelopes = harness.peer.wait_for_envelopes(1).await;
    assert_eq!(envelopes[0].kind(), EnvelopeKind::PlainMessage);
    assert_eq!(envelopes[0].group_id(), None);
    assert_eq!(envelopes[0].text(), Some("hi"));
    assert_eq!(envelopes[0].sender_id, PeerId::new("A"));
    assert_eq!(envelopes[0].sender_name, "Alice");
}

#[tokio::test]
async fn test_send_in_group_is_group_message() {
    let mut harness = connected_node().await;
    harness
        .node
        .request_create_group(Some("Hikers".to_string()))
        .await
        .unwrap();
    let group = next_group_state(&mut harness.events).await.unwrap();
    assert_eq!(group.group_name, "Hikers");

    harness
        .node
        .request_send("hi".to_string(), None, Some(group.group_id.clone()))
        .await
        .unwrap();
    next_updated(&mut harness.events).await;

    let envelopes = harness.peer.wait_for_envelopes(2).await;
    assert_eq!(envelopes[0].kind(), EnvelopeKind::GroupCreate);
    assert_eq!(envelopes[0].group_name(), Some("Hikers"));
    assert_eq!(envelopes[1].kind(), EnvelopeKind::GroupMessage);
    assert_eq!(envelopes[1].group_id(), Some(&group.group_id));
}

#[tokio::test]
async fn test_chunks_respect_negotiated_size() {
    let mut harness = spawn_node();
    harness.peer.set_mtu(Some(50));
    harness.peer.add_device("dev-1", None);
    discover(&mut harness).await;
    harness
        .node
        .request_connect(DeviceId::new("dev-1"))
        .await
        .unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::Connected { .. }))
    })
    .await;

    let text = "a fairly long message that needs several chunks {with braces}".repeat(3);
    harness
        .node
        .request_send(text.clone(), None, None)
        .await
        .unwrap();
    let envelopes = harness.peer.wait_for_envelopes(1).await;
    assert_eq!(envelopes[0].text(), Some(text.as_str()));

    let writes = harness.peer.writes();
    assert!(writes.len() > 1);
    assert!(writes.iter().all(|chunk| chunk.len() <= 47));
    assert!(writes[..writes.len() - 1].iter().all(|chunk| chunk.len() == 47));
}

#[tokio::test]
async fn test_refused_mtu_uses_default_chunk_size() {
    let mut harness = connected_node().await;
    harness
        .node
        .request_send("x".repeat(100), None, None)
        .await
        .unwrap();
    harness.peer.wait_for_envelopes(1).await;
    next_updated(&mut harness.events).await;
    assert!(harness.peer.writes().iter().all(|chunk| chunk.len() <= 20));
}

#[tokio::test]
async fn test_send_location_with_and_without_fix() {
    let mut harness = connected_node().await;
    let here = gattchat_core::Coordinates::new(52.52, 13.405);

    harness
        .node
        .request_send_location(Some("here".to_string()), Some(here))
        .await
        .unwrap();
    let entry = next_appended(&mut harness.events).await;
    assert!(entry
        .display_text()
        .contains("https://www.openstreetmap.org/?mlat=52.52&mlon=13.405"));

    harness
        .node
        .request_send_location(Some("no fix".to_string()), None)
        .await
        .unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::LocationUnavailable))
    })
    .await;

    let envelopes = harness.peer.wait_for_envelopes(2).await;
    assert_eq!(envelopes[0].location(), Some(here));
    assert_eq!(envelopes[1].location(), None);
    assert_eq!(envelopes[1].text(), Some("no fix"));
}

#[tokio::test]
async fn test_send_while_disconnected_fails_entry() {
    let mut harness = spawn_node();
    harness
        .node
        .request_send("hello?".to_string(), None, None)
        .await
        .unwrap();

    let entry = next_appended(&mut harness.events).await;
    assert_eq!(
        entry.status,
        DeliveryStatus::Failed {
            reason: "not connected".to_string()
        }
    );
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::SendFailed { .. }))
    })
    .await;
}

#[tokio::test]
async fn test_write_failure_marks_entry_failed() {
    let mut harness = connected_node().await;
    harness.peer.fail_writes(Some(WriteError::Rejected {
        reason: "gatt error 0x0e".to_string(),
    }));
    harness
        .node
        .request_send("hi".to_string(), None, None)
        .await
        .unwrap();

    let updated = next_updated(&mut harness.events).await;
    match updated.status {
        DeliveryStatus::Failed { reason } => assert!(reason.contains("gatt error 0x0e")),
        other => panic!("unexpected status {:?}", other),
    }

    // the connection survives a rejected write
    harness.peer.fail_writes(None);
    harness
        .node
        .request_send("again".to_string(), None, None)
        .await
        .unwrap();
    let updated = next_updated(&mut harness.events).await;
    assert_eq!(updated.status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn test_link_loss_during_write_disconnects() {
    let mut harness = connected_node().await;
    harness.peer.fail_writes(Some(WriteError::Disconnected {
        reason: "peer gone".to_string(),
    }));
    harness
        .node
        .request_send("hi".to_string(), None, None)
        .await
        .unwrap();

    let updated = next_updated(&mut harness.events).await;
    assert!(updated.is_failed());
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::ConnectionStateChanged(SessionState::Disconnected))
    })
    .await;
}

#[tokio::test]
async fn test_disconnect_mid_write_cancels_send() {
    let config = alice_config().with_session(SessionConfig {
        write_timeout: Duration::from_secs(10),
        ..SessionConfig::testing()
    });
    let mut harness = connected_node_with(config).await;
    harness.peer.hold_writes();
    harness
        .node
        .request_send("never arrives".to_string(), None, None)
        .await
        .unwrap();
    let entry = next_appended(&mut harness.events).await;
    assert!(entry.is_pending());
    harness.peer.wait_for_blocked_write().await;

    harness.node.request_disconnect().await.unwrap();
    let updated = next_updated(&mut harness.events).await;
    assert_eq!(updated.id, entry.id);
    assert_eq!(
        updated.status,
        DeliveryStatus::Failed {
            reason: WriteError::Cancelled.to_string()
        }
    );
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::Disconnected { .. }))
    })
    .await;

    // the cancelled write is abandoned, not retried once the gate opens
    harness.peer.release_writes();
    let later = drain(&mut harness.events).await;
    assert!(!later
        .iter()
        .any(|e| matches!(e, AppEvent::ChatLogUpdated(_) | AppEvent::ChatLogAppended(_))));
    assert_eq!(harness.peer.blocked_writes(), 0);
    assert!(harness.peer.writes().is_empty());
}

#[tokio::test]
async fn test_empty_message_is_rejected() {
    let mut harness = connected_node().await;
    harness
        .node
        .request_send("   ".to_string(), None, None)
        .await
        .unwrap();
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::CommandFailed { .. })
    })
    .await;
    assert!(matches!(event, AppEvent::CommandFailed { command: "send", .. }));
}

// ----------------------------------------------------------------------------
// Receiving
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_received_message_is_logged() {
    let mut harness = connected_node().await;
    let envelope = bob(EnvelopeBody::PlainMessage {
        text: Some("hey {alice}".to_string()),
        location: None,
    });
    assert!(harness.peer.push_envelope(&envelope, 20));

    let entry = next_appended(&mut harness.events).await;
    assert_eq!(entry.direction, Direction::Received);
    assert_eq!(entry.text.as_deref(), Some("hey {alice}"));
    assert_eq!(entry.sender_name, "Bob");
    assert!(!entry.out_of_group);
}

#[tokio::test]
async fn test_corrupt_frame_does_not_block_stream() {
    let mut harness = connected_node().await;

    let mut frame = Fragmenter::frame(b"{\"kind\":\"message\"}", 1024).unwrap();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;
    assert!(harness.peer.push_chunk(&frame));
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::CorruptFrame { .. }))
    })
    .await;

    let envelope = bob(EnvelopeBody::PlainMessage {
        text: Some("still here".to_string()),
        location: None,
    });
    assert!(harness.peer.push_envelope(&envelope, 20));
    let entry = next_appended(&mut harness.events).await;
    assert_eq!(entry.text.as_deref(), Some("still here"));
}

#[tokio::test]
async fn test_truncated_frame_expires_as_corrupt() {
    let config = alice_config().with_protocol(ProtocolConfig {
        reassembly_timeout: Duration::from_millis(200),
        ..ProtocolConfig::testing()
    });
    let mut harness = connected_node_with(config).await;

    let frame = Fragmenter::frame(b"{\"kind\":\"message\",\"text\":\"cut\"}", 1024).unwrap();
    assert!(harness.peer.push_chunk(&frame[..frame.len() / 2]));

    let events = {
        let mut seen = Vec::new();
        loop {
            let event = next_event(&mut harness.events).await;
            let done = matches!(event, AppEvent::Notice(SystemNotice::CorruptFrame { .. }));
            seen.push(event);
            if done {
                break seen;
            }
        }
    };
    assert!(!events.iter().any(|e| matches!(e, AppEvent::ChatLogAppended(_))));

    // the connection stays usable after the partial frame is dropped
    let envelope = bob(EnvelopeBody::PlainMessage {
        text: Some("after the gap".to_string()),
        location: None,
    });
    assert!(harness.peer.push_envelope(&envelope, 20));
    let entry = next_appended(&mut harness.events).await;
    assert_eq!(entry.text.as_deref(), Some("after the gap"));
}

#[tokio::test]
async fn test_undecodable_payload_is_logged_unparsed() {
    let mut harness = connected_node().await;
    assert!(harness.peer.push_payload(b"definitely not json", 20));

    let entry = next_appended(&mut harness.events).await;
    assert!(entry.unparsed);
    assert_eq!(entry.sender_id, None);
}

#[tokio::test]
async fn test_out_of_group_message_is_flagged() {
    let mut harness = connected_node().await;
    let envelope = bob(EnvelopeBody::GroupMessage {
        group_id: GroupId::new("g9"),
        text: Some("psst".to_string()),
        location: None,
    });
    assert!(harness.peer.push_envelope(&envelope, 20));

    let entry = next_appended(&mut harness.events).await;
    assert!(entry.out_of_group);
    assert_eq!(entry.group_id, Some(GroupId::new("g9")));
}

// ----------------------------------------------------------------------------
// Group membership
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_inbound_group_create_is_adopted() {
    let mut harness = connected_node().await;
    let envelope = bob(EnvelopeBody::GroupCreate {
        group_id: GroupId::new("g1"),
        group_name: "Hikers".to_string(),
    });
    assert!(harness.peer.push_envelope(&envelope, 20));

    let state = next_group_state(&mut harness.events).await.unwrap();
    assert_eq!(state.group_id, GroupId::new("g1"));
    assert_eq!(state.members.len(), 1);
    assert!(state.members.contains_key(&PeerId::new("B")));

    // a later message for that group is in-group
    let message = bob(EnvelopeBody::GroupMessage {
        group_id: GroupId::new("g1"),
        text: Some("welcome".to_string()),
        location: None,
    });
    assert!(harness.peer.push_envelope(&message, 20));
    let entry = next_appended(&mut harness.events).await;
    assert!(!entry.out_of_group);
}

#[tokio::test]
async fn test_duplicate_join_adds_member_once() {
    let mut harness = connected_node().await;
    harness.node.request_create_group(None).await.unwrap();
    let group = next_group_state(&mut harness.events).await.unwrap();

    let join = bob(EnvelopeBody::GroupJoin {
        group_id: group.group_id.clone(),
    });
    assert!(harness.peer.push_envelope(&join, 20));
    let state = next_group_state(&mut harness.events).await.unwrap();
    assert_eq!(state.members.len(), 1);

    assert!(harness.peer.push_envelope(&join, 20));
    let events = drain(&mut harness.events).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, AppEvent::GroupStateChanged(_))));
}

#[tokio::test]
async fn test_accept_invite_joins_group() {
    let mut harness = connected_node().await;
    let invite = bob(EnvelopeBody::GroupInvite {
        group_id: GroupId::new("g2"),
        group_name: "Climbers".to_string(),
    });
    assert!(harness.peer.push_envelope(&invite, 20));
    let event = wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::InviteReceived(_))
    })
    .await;
    match event {
        AppEvent::InviteReceived(pending) => assert_eq!(pending.from_name, "Bob"),
        _ => unreachable!(),
    }

    harness
        .node
        .request_accept_invite(GroupId::new("g2"))
        .await
        .unwrap();
    let state = next_group_state(&mut harness.events).await.unwrap();
    assert_eq!(state.group_id, GroupId::new("g2"));
    assert!(state.members.contains_key(&PeerId::new("B")));

    let envelopes = harness.peer.wait_for_envelopes(1).await;
    assert_eq!(envelopes[0].kind(), EnvelopeKind::GroupJoin);
    assert_eq!(envelopes[0].group_id(), Some(&GroupId::new("g2")));
}

#[tokio::test]
async fn test_invite_requires_group() {
    let mut harness = connected_node().await;
    harness.node.request_invite().await.unwrap();
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::CommandFailed { command: "invite", .. })
    })
    .await;

    harness.node.request_create_group(None).await.unwrap();
    let group = next_group_state(&mut harness.events).await.unwrap();
    harness.node.request_invite().await.unwrap();

    let envelopes = harness.peer.wait_for_envelopes(2).await;
    assert_eq!(envelopes[1].kind(), EnvelopeKind::GroupInvite);
    assert_eq!(envelopes[1].group_id(), Some(&group.group_id));
}

#[tokio::test]
async fn test_join_then_leave() {
    let mut harness = connected_node().await;
    harness
        .node
        .request_join_group(GroupId::new("g3"), None)
        .await
        .unwrap();
    let state = next_group_state(&mut harness.events).await.unwrap();
    assert_eq!(state.group_id, GroupId::new("g3"));
    assert!(state.members.is_empty());

    harness.node.request_leave_group().await.unwrap();
    assert!(next_group_state(&mut harness.events).await.is_none());
}

#[tokio::test]
async fn test_group_actions_without_connection_report_control_failure() {
    let mut harness = spawn_node();
    harness.node.request_create_group(None).await.unwrap();
    assert!(next_group_state(&mut harness.events).await.is_some());
    wait_for(&mut harness.events, |e| {
        matches!(e, AppEvent::Notice(SystemNotice::ControlSendFailed { .. }))
    })
    .await;
}
