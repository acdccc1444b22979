//! In-memory fake devices for session tests
#![allow(dead_code)]

use gcodelink_communication::{
    create_session, DeviceSession, DuplexLink, FirmwareProtocol, LineTerminator, LineTransport,
    SessionTiming,
};
use gcodelink_core::MemorySink;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

pub const TEST_READ_TIMEOUT: Duration = Duration::from_millis(100);

pub fn fast_timing() -> SessionTiming {
    SessionTiming {
        queue_full_retry: Duration::from_millis(5),
        idle_poll: Duration::from_millis(5),
        read_retry: Duration::from_millis(5),
    }
}

/// Device side of an in-memory link
pub struct FakeDevice {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    terminator: &'static str,
}

impl FakeDevice {
    /// Next line the host sent, without its terminator
    pub async fn expect_line(&mut self) -> String {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "host closed the link");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Assert the host sends exactly `expected` next
    pub async fn expect(&mut self, expected: &str) {
        assert_eq!(self.expect_line().await, expected);
    }

    /// Send response lines
    pub async fn reply(&mut self, lines: &[&str]) {
        for line in lines {
            self.writer
                .write_all(format!("{}{}", line, self.terminator).as_bytes())
                .await
                .unwrap();
        }
        self.writer.flush().await.unwrap();
    }

    /// Send raw bytes
    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Everything the host sends until it closes the link
    pub async fn remaining(mut self) -> String {
        drop(self.writer);
        let mut rest = String::new();
        let mut line = String::new();
        while self.reader.read_line(&mut line).await.unwrap() > 0 {
            rest.push_str(&line);
            line.clear();
        }
        rest
    }
}

/// Open transport wired to a fake device
pub fn fake_link(terminator: LineTerminator) -> (LineTransport, FakeDevice) {
    let (host, device) = tokio::io::duplex(4096);
    let (host_reader, host_writer) = tokio::io::split(host);
    let transport = LineTransport::from_link(
        DuplexLink::from_stream(host_reader, host_writer),
        terminator,
    )
    .with_read_timeout(TEST_READ_TIMEOUT);

    let (device_reader, device_writer) = tokio::io::split(device);
    let device = FakeDevice {
        reader: BufReader::new(device_reader),
        writer: device_writer,
        terminator: match terminator {
            LineTerminator::Lf => "\n",
            LineTerminator::CrLf => "\r\n",
        },
    };
    (transport, device)
}

/// Session for `protocol` over a fake device, with a capturing sink
pub fn fake_session(
    protocol: FirmwareProtocol,
) -> (Box<dyn DeviceSession>, FakeDevice, Arc<MemorySink>) {
    let (transport, device) = fake_link(protocol.terminator());
    let sink = MemorySink::new();
    let session = create_session(protocol, transport, sink.clone(), fast_timing());
    (session, device, sink)
}
