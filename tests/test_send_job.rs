use gcodelink::{create_session, Endpoint, FirmwareProtocol, GcodeProgram, JobSender, LineTransport};
use gcodelink_communication::SessionTiming;
use gcodelink_core::MemorySink;
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn fast_timing() -> SessionTiming {
    SessionTiming {
        queue_full_retry: Duration::from_millis(5),
        idle_poll: Duration::from_millis(5),
        read_retry: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn test_trinus_job_over_tcp() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "; generated\nG21\nG28\nG0 X1 ; travel\nM117 Done\n").unwrap();
    let program = GcodeProgram::load(file.path()).unwrap();
    assert_eq!(program.len(), 4);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Fake printer: acknowledge every line, ask for one resend.
    let device = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut received = Vec::new();
        let mut corrupted_once = false;

        while let Some(line) = lines.next_line().await.unwrap() {
            if line == "G0 X1 *30" && !corrupted_once {
                corrupted_once = true;
                writer.write_all(b"[ERROR] invalid checksum\nok\n").await.unwrap();
            } else {
                writer.write_all(b"ok\n").await.unwrap();
            }
            received.push(line);
        }
        received
    });

    let transport = LineTransport::new(Endpoint::tcp("127.0.0.1", port), FirmwareProtocol::Trinus.terminator())
        .with_read_timeout(Duration::from_millis(100));
    let sink = MemorySink::new();
    let mut session = create_session(FirmwareProtocol::Trinus, transport, sink.clone(), fast_timing());
    session.open(false).await.unwrap();

    let report = JobSender::new()
        .run(session.as_mut(), &program, std::future::pending)
        .await
        .unwrap();

    assert_eq!(report.lines_sent, 4);
    assert_eq!(report.last_line, 5);
    assert!(!report.interrupted);

    let received = device.await.unwrap();
    assert_eq!(
        received,
        vec!["G28 *109", "G0 X1 *30", "G0 X1 *30", "M117 Done"]
    );
}

/// Fake GRBL 1.1 that sits in Alarm and acknowledges everything else
async fn alarmed_grbl(listener: TcpListener) -> Vec<String> {
    let (stream, _) = listener.accept().await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut received = Vec::new();

    while let Ok(Some(line)) = lines.next_line().await {
        let reply: &[u8] = if line == "?" {
            b"<Alarm|MPos:0.000,0.000,0.000|Bf:15,128|FS:0,0>\r\n"
        } else {
            b"ok\r\n"
        };
        if writer.write_all(reply).await.is_err() {
            break;
        }
        received.push(line);
    }
    received
}

async fn grbl_session(port: u16) -> Box<dyn gcodelink::DeviceSession> {
    let transport = LineTransport::new(Endpoint::tcp("127.0.0.1", port), FirmwareProtocol::Grbl.terminator())
        .with_read_timeout(Duration::from_millis(100));
    let mut session = create_session(FirmwareProtocol::Grbl, transport, MemorySink::new(), fast_timing());
    session.open(false).await.unwrap();
    session
}

#[tokio::test]
async fn test_interrupted_job_on_alarmed_grbl_returns() {
    let program = GcodeProgram::parse("G0 X1\nG0 X2\n").unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = tokio::spawn(alarmed_grbl(listener));

    let mut session = grbl_session(port).await;
    let report = tokio::time::timeout(
        Duration::from_secs(3),
        JobSender::new().run(session.as_mut(), &program, || async {}),
    )
    .await
    .expect("interrupted job did not return")
    .unwrap();

    assert!(report.interrupted);
    assert_eq!(report.lines_sent, 0);
    assert!(device.await.unwrap().is_empty());
}

#[tokio::test]
async fn test_finish_on_alarmed_grbl_fails_instead_of_waiting() {
    let program = GcodeProgram::parse("G0 X1\n").unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let device = tokio::spawn(alarmed_grbl(listener));

    // First interrupt fires at once; the one guarding the end-of-job wait never does.
    let mut calls = 0;
    let interrupt = move || {
        calls += 1;
        let first = calls == 1;
        async move {
            if !first {
                std::future::pending::<()>().await;
            }
        }
    };

    let mut session = grbl_session(port).await;
    let err = tokio::time::timeout(
        Duration::from_secs(3),
        JobSender::new().run(session.as_mut(), &program, interrupt),
    )
    .await
    .expect("end-of-job wait kept polling an alarmed machine")
    .unwrap_err();

    assert!(err.is_protocol_error());
    assert_eq!(device.await.unwrap(), vec!["?"]);
}
