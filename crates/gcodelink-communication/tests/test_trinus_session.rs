mod common;

use common::fake_session;
use gcodelink_communication::FirmwareProtocol;
use gcodelink_core::{Error, ProtocolError, TrafficEvent};
use std::time::Duration;

#[tokio::test]
async fn test_queue_sends_checksummed_line() {
    let (mut session, mut device, sink) = fake_session(FirmwareProtocol::Trinus);

    let script = tokio::spawn(async move {
        device.expect("G0 X1 *30").await;
        device.reply(&["[ECHO] G0 X1", "ok"]).await;
        device
    });

    let ack = session.queue("G0 X1 ; move").await.unwrap();
    assert_eq!(ack.as_deref(), Some("ok"));
    assert_eq!(session.notices().front().map(String::as_str), Some("[ECHO] G0 X1"));
    assert_eq!(
        sink.events()[0],
        TrafficEvent::Sent {
            line: "G0 X1 *30".to_string(),
            original: Some("G0 X1 ; move".to_string()),
        }
    );
    script.await.unwrap();
}

#[tokio::test]
async fn test_checksum_error_resends_identical_line() {
    let (mut session, mut device, sink) = fake_session(FirmwareProtocol::Trinus);

    let script = tokio::spawn(async move {
        device.expect("G0 X1 *30").await;
        device.reply(&["[ERROR] invalid checksum", "ok"]).await;
        device.expect("G0 X1 *30").await;
        device.reply(&["ok"]).await;
        device
    });

    let ack = session.queue("G0 X1").await.unwrap();
    assert_eq!(ack.as_deref(), Some("ok"));
    assert_eq!(sink.sent_lines(), vec!["G0 X1 *30", "G0 X1 *30"]);
    assert_eq!(
        sink.count(|e| matches!(e, TrafficEvent::ResendRequested(_))),
        1
    );
    script.await.unwrap();
}

#[tokio::test]
async fn test_other_error_is_fatal() {
    let (mut session, mut device, _sink) = fake_session(FirmwareProtocol::Trinus);

    let script = tokio::spawn(async move {
        device.expect("M104 S200 *25").await;
        device.reply(&["[VALUE] T:25", "[ERROR] heater fault"]).await;
        device
    });

    let err = session.queue("M104 S200").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::DeviceError { ref message }) if message == "[ERROR] heater fault"
    ));
    let notices: Vec<_> = session.notices().iter().cloned().collect();
    assert_eq!(notices, vec!["[VALUE] T:25", "[ERROR] heater fault"]);
    script.await.unwrap();
}

#[tokio::test]
async fn test_chatter_is_ignored() {
    let (mut session, mut device, sink) = fake_session(FirmwareProtocol::Trinus);

    let script = tokio::spawn(async move {
        device.expect("G28 *109").await;
        device.reply(&["busy", "homing...", "ok"]).await;
        device
    });

    session.queue("G28").await.unwrap();
    assert_eq!(sink.count(|e| matches!(e, TrafficEvent::Ignored(_))), 2);
    script.await.unwrap();
}

#[tokio::test]
async fn test_blocked_line_is_not_sent() {
    let (mut session, device, sink) = fake_session(FirmwareProtocol::Trinus);

    // Nothing answers, so a read would never complete.
    let ack = tokio::time::timeout(Duration::from_secs(1), session.queue("G21"))
        .await
        .expect("queue blocked on a read")
        .unwrap();
    assert_eq!(ack, None);
    assert_eq!(
        sink.events(),
        vec![TrafficEvent::Suppressed("G21".to_string())]
    );

    session.close().await.unwrap();
    assert_eq!(device.remaining().await, "");
}

#[tokio::test]
async fn test_display_message_passes_verbatim() {
    let (mut session, mut device, _sink) = fake_session(FirmwareProtocol::Trinus);

    let script = tokio::spawn(async move {
        device.expect("M117 Printing").await;
        device.reply(&["ok"]).await;
        device
    });

    // Comment stripped, no checksum appended.
    session.queue("M117 Printing; layer 1").await.unwrap();
    script.await.unwrap();
}
