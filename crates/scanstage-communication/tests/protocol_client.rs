//! Protocol client behavior over a scripted transport

use scanstage_communication::{MockHandle, MockTransport, ProtocolClient, ProtocolConfig};
use scanstage_core::{Error, MachineState, ProtocolError};
use std::time::Duration;

fn test_config() -> ProtocolConfig {
    ProtocolConfig {
        command_timeout_ms: 200,
        poll_interval_ms: 20,
        staleness_threshold_ms: 3000,
        message_log_capacity: 50,
    }
}

fn connect() -> (ProtocolClient, MockHandle) {
    let (transport, handle) = MockTransport::new();
    let client = ProtocolClient::connect(Box::new(transport), test_config());
    (client, handle)
}

#[tokio::test]
async fn test_ok_resolves_oldest_command() {
    let (client, handle) = connect();
    handle.respond("G1", vec!["ok"]);

    client
        .send("G1 X1.000 F100", Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(handle.sent_lines(), vec!["G1 X1.000 F100"]);

    client.shutdown().await;
}

#[tokio::test]
async fn test_error_resolves_command_as_rejected() {
    let (client, handle) = connect();
    handle.respond("G1", vec!["error:9"]);

    let err = client
        .send("G1 X1.000 F100", Duration::from_millis(500))
        .await
        .unwrap_err();
    match err {
        Error::Protocol(ProtocolError::Rejected { code }) => assert_eq!(code, 9),
        other => panic!("unexpected error: {other:?}"),
    }

    client.shutdown().await;
}

#[tokio::test]
async fn test_timeout_frees_the_slot() {
    let (client, handle) = connect();
    // No scripted reply for G4: the command never gets an ok.
    handle.respond("G1", vec!["ok"]);

    let err = client
        .send("G4 P0", Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // The slot was freed; the next command goes through.
    client
        .send("G1 X1.000 F100", Duration::from_millis(500))
        .await
        .unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn test_priority_command_bypasses_outstanding_normal_command() {
    let (client, handle) = connect();
    let client = std::sync::Arc::new(client);

    // First normal command never acks and holds the slot; the second
    // normal command must wait behind it, but the priority unlock must
    // not.
    let first = tokio::spawn({
        let client = client.clone();
        async move {
            let _ = client
                .send("G1 X5.000 F100", Duration::from_millis(300))
                .await;
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = tokio::spawn({
        let client = client.clone();
        async move {
            let _ = client
                .send("G1 X6.000 F100", Duration::from_millis(300))
                .await;
        }
    });
    let unlock = tokio::spawn({
        let client = client.clone();
        async move {
            let _ = client.send_priority("$X", Duration::from_millis(300)).await;
        }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(handle.sent_lines(), vec!["G1 X5.000 F100", "$X"]);

    // Don't care how the hung commands resolve; just drain them.
    let _ = first.await;
    let _ = second.await;
    let _ = unlock.await;
    match std::sync::Arc::try_unwrap(client) {
        Ok(client) => client.shutdown().await,
        Err(_) => panic!("client still shared"),
    }
}

#[tokio::test]
async fn test_status_reports_refresh_the_cache() {
    let (client, handle) = connect();
    handle.set_status("<Idle|MPos:1.000,2.000,3.000,90.000>");

    // The automatic poll picks the report up without any command traffic.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = client.cached_status();
    assert_eq!(snapshot.state, MachineState::Idle);
    assert_eq!(snapshot.position.c, 90.0);
    assert!(!client.is_stale());

    client.shutdown().await;
}

#[tokio::test]
async fn test_query_status_returns_a_fresh_snapshot() {
    let (client, handle) = connect();
    handle.set_status("<Run|MPos:5.000,0.000,0.000,0.000>");

    let snapshot = client
        .query_status(Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(snapshot.state, MachineState::Run);
    assert_eq!(snapshot.position.x, 5.0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_bracketed_messages_feed_the_log() {
    let (client, handle) = connect();
    let mark = client.message_seq();

    handle.push_line("[MSG:Homed:X]");
    handle.push_line("[MSG:Homing done]");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let messages: Vec<String> = client
        .messages_since(mark)
        .into_iter()
        .map(|(_, m)| m)
        .collect();
    assert_eq!(messages, vec!["Homed:X", "Homing done"]);

    client.shutdown().await;
}

#[tokio::test]
async fn test_message_log_is_bounded() {
    let (client, handle) = connect();

    for i in 0..60 {
        handle.push_line(format!("[MSG:debug {}]", i));
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let recent = client.recent_messages();
    assert_eq!(recent.len(), 50);
    assert_eq!(recent.first().map(String::as_str), Some("debug 10"));
    assert_eq!(recent.last().map(String::as_str), Some("debug 59"));

    client.shutdown().await;
}

#[tokio::test]
async fn test_unparseable_lines_never_block_the_reader() {
    let (client, handle) = connect();
    handle.push_line("!!corrupted$$");
    handle.push_line("");
    handle.respond("G1", vec!["ok"]);

    client
        .send("G1 X1.000 F100", Duration::from_millis(500))
        .await
        .unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn test_greeting_mid_session_fails_outstanding_commands() {
    let (client, handle) = connect();

    let send = tokio::spawn({
        let handle = handle.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.push_line("Grbl 1.1h ['$' for help]");
        }
    });

    let err = client
        .send("G1 X1.000 F100", Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::LinkReset)
    ));

    send.await.unwrap();
    client.shutdown().await;
}

#[tokio::test]
async fn test_link_failure_fails_outstanding_commands() {
    let (client, handle) = connect();

    // The link dies while a command is outstanding: its result must still
    // be delivered, never abandoned.
    let breaker = tokio::spawn({
        let handle = handle.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.fail_link();
        }
    });

    let err = client
        .send("G1 X1.000 F100", Duration::from_secs(2))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(ProtocolError::Shutdown)));
    assert_eq!(client.cached_status().state, MachineState::Disconnected);

    breaker.await.unwrap();
    client.shutdown().await;
}

#[tokio::test]
async fn test_realtime_bytes_hit_the_wire_directly() {
    let (client, handle) = connect();

    client.send_realtime(0x18).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handle.raw_bytes().contains(&0x18));
    // Realtime bytes are not line traffic.
    assert!(handle.sent_lines().is_empty());

    client.shutdown().await;
}
