//! Motion controller heuristics over a scripted transport
//!
//! Exercises the completion and recovery behavior the firmware family
//! makes necessary: settle detection, the dropped-acknowledgment
//! heuristic, bounded alarm recovery, and dual homing-completion
//! detection.

use scanstage_communication::{
    MockHandle, MockTransport, MotionConfig, MotionController, ProtocolClient, ProtocolConfig,
};
use scanstage_core::{Axis, MachineState, MotionControl, MotionError, Position};
use std::sync::Arc;
use std::time::Duration;

fn idle_at(x: f64, y: f64, z: f64, c: f64) -> String {
    format!("<Idle|MPos:{:.3},{:.3},{:.3},{:.3}>", x, y, z, c)
}

fn protocol_config() -> ProtocolConfig {
    ProtocolConfig {
        command_timeout_ms: 200,
        poll_interval_ms: 20,
        staleness_threshold_ms: 3000,
        message_log_capacity: 50,
    }
}

fn motion_config() -> MotionConfig {
    MotionConfig {
        default_feed_rate: 1500.0,
        position_tolerance: 0.05,
        command_timeout_ms: 200,
        settle_timeout_ms: 2000,
        settle_poll_ms: 20,
        status_query_timeout_ms: 500,
        unlock_attempts: 3,
        unlock_backoff_ms: 20,
        homing_accept_timeout_ms: 200,
        homing_timeout_ms: 5000,
        homing_idle_window_ms: 100,
        ..MotionConfig::default()
    }
}

fn connect(config: MotionConfig) -> (Arc<MotionController>, MockHandle) {
    let (transport, handle) = MockTransport::new();
    let client = ProtocolClient::connect(Box::new(transport), protocol_config());
    (Arc::new(MotionController::new(client, config)), handle)
}

#[tokio::test]
async fn test_move_completes_and_repeating_is_a_noop() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    handle.respond_with("G1", vec!["ok"], Some(&idle_at(10.0, 5.0, 2.0, 90.0)));

    let target = Position::new(10.0, 5.0, 2.0, 90.0);
    controller.move_to(target, None).await.unwrap();
    assert!(controller.position().approx_eq(&target, 0.05));
    assert_eq!(handle.sent_count("G1"), 1);

    // Repeating the same move is a no-op motion and still succeeds.
    controller.move_to(target, None).await.unwrap();
    assert_eq!(handle.sent_count("G1"), 1);
}

#[tokio::test]
async fn test_out_of_range_move_produces_no_wire_traffic() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));

    let err = controller
        .move_to(Position::new(500.0, 0.0, 0.0, 0.0), None)
        .await
        .unwrap_err();
    assert!(err.is_out_of_range());
    assert!(handle.sent_lines().is_empty());
}

#[tokio::test]
async fn test_turntable_target_wraps_instead_of_failing() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    handle.respond_with("G1", vec!["ok"], Some(&idle_at(0.0, 0.0, 0.0, 90.0)));

    controller
        .move_to(Position::new(0.0, 0.0, 0.0, 450.0), None)
        .await
        .unwrap();

    let sent = handle.sent_lines();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("C90.000"), "wrapped angle in {}", sent[0]);
}

#[tokio::test]
async fn test_completion_waits_for_idle_after_issuance() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    // Ack arrives, but the machine is still running; completion must wait.
    handle.respond_with("G1", vec!["ok"], Some("<Run|MPos:3.000,0.000,0.000,0.000>"));

    let task = tokio::spawn({
        let controller = controller.clone();
        async move {
            controller
                .move_to(Position::new(10.0, 0.0, 0.0, 0.0), None)
                .await
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished(), "move must not complete while running");

    handle.set_status(idle_at(10.0, 0.0, 0.0, 0.0));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_lost_ack_with_confirmed_idle_counts_as_success() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    // The firmware "executes" the move but never emits ok.
    handle.respond_with("G1", vec![], Some(&idle_at(10.0, 0.0, 0.0, 0.0)));

    controller
        .move_to(Position::new(10.0, 0.0, 0.0, 0.0), None)
        .await
        .unwrap();
    assert_eq!(handle.sent_count("G1"), 1);
}

#[tokio::test]
async fn test_lost_ack_without_idle_propagates_the_timeout() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    // No ok, and the machine stays stuck in Run: a real failure.
    handle.respond_with("G1", vec![], Some("<Run|MPos:1.000,0.000,0.000,0.000>"));

    let err = controller
        .move_to(Position::new(10.0, 0.0, 0.0, 0.0), None)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_non_motion_command_gets_no_benefit_of_the_doubt() {
    let (controller, handle) = connect(motion_config());
    // Machine is idle the whole time, but $H is never acknowledged: a
    // non-motion command must report the timeout, not success.
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));

    let err = controller.home(None).await.unwrap_err();
    assert!(err.is_timeout());
    assert!(!controller.is_homed());
}

#[tokio::test]
async fn test_alarmed_home_sends_at_most_three_unlocks() {
    let (controller, handle) = connect(motion_config());
    handle.set_status("<Alarm|MPos:0.000,0.000,0.000,0.000>");
    // Unlock is acknowledged but the alarm never clears.
    handle.respond("$X", vec!["ok"]);

    let err = controller.home(None).await.unwrap_err();
    match err {
        scanstage_core::Error::Motion(MotionError::AlarmNotCleared { attempts }) => {
            assert_eq!(attempts, 3)
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(handle.sent_count("$X"), 3);
}

#[tokio::test]
async fn test_idle_home_sends_zero_unlocks() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    handle.respond("$H", vec!["ok"]);

    // Completion comes from the sustained-idle fallback window.
    controller.home(None).await.unwrap();
    assert_eq!(handle.sent_count("$X"), 0);
    assert_eq!(handle.sent_count("$H"), 1);
    assert!(controller.is_homed());
}

#[tokio::test]
async fn test_per_axis_markers_do_not_complete_homing() {
    let config = MotionConfig {
        // Disable the sustained-idle fallback so only the final marker can
        // end the wait.
        homing_idle_window_ms: 60_000,
        ..motion_config()
    };
    let (controller, handle) = connect(config);
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    handle.respond_with("$H", vec!["ok"], Some("<Home|MPos:0.000,0.000,0.000,0.000>"));

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.home(None).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Individual axis messages arrive while the cycle is still going.
    handle.push_line("[MSG:Homed:X]");
    handle.push_line("[MSG:Homed:Y]");
    handle.push_line("[MSG:Homed:Z]");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !task.is_finished(),
        "per-axis markers must not end the wait"
    );

    // The final marker does.
    handle.push_line("[MSG:Homing done]");
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    task.await.unwrap().unwrap();
    assert!(controller.is_homed());
}

#[tokio::test]
async fn test_axis_restricted_homing_commands() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));
    handle.respond("$HX", vec!["ok"]);
    handle.respond("$HZ", vec!["ok"]);

    controller.home(Some(&[Axis::X, Axis::Z])).await.unwrap();

    assert_eq!(handle.sent_count("$HX"), 1);
    assert_eq!(handle.sent_count("$HZ"), 1);
    assert!(!handle.sent_lines().iter().any(|l| l == "$H"));
}

#[tokio::test]
async fn test_emergency_stop_bypasses_the_command_queue() {
    let (controller, handle) = connect(motion_config());
    handle.set_status(idle_at(0.0, 0.0, 0.0, 0.0));

    controller.emergency_stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handle.raw_bytes().contains(&0x18));
    assert!(handle.sent_lines().is_empty());
    assert!(!controller.is_homed());
}

#[tokio::test]
async fn test_machine_state_reflects_the_cache() {
    let (controller, handle) = connect(motion_config());
    handle.set_status("<Alarm|MPos:0.000,0.000,0.000,0.000>");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(controller.machine_state(), MachineState::Alarm);
}
