//! Runs the `gcodelink` binary as a relay on its own stdin/stdout.

#![cfg(unix)]

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[tokio::test]
async fn test_stdio_relay_exits_on_interrupt() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "").unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_gcodelink"))
        .arg("--config")
        .arg(&config)
        .args(["relay", "--listen", "tcp://127.0.0.1:0"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .unwrap();

    // Stdin stays open for the whole test, so the upstream never reaches EOF.
    let _stdin = child.stdin.take().unwrap();
    let mut log = BufReader::new(child.stderr.take().unwrap()).lines();
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(line) = log.next_line().await.unwrap() {
            if line.contains("Relay listening") {
                return;
            }
        }
        panic!("relay exited before listening");
    })
    .await
    .expect("relay did not start listening");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let pid = child.id().unwrap().to_string();
    let killed = std::process::Command::new("kill")
        .args(["-INT", &pid])
        .status()
        .unwrap();
    assert!(killed.success());

    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .expect("relay kept running after the interrupt")
        .unwrap();
    assert!(status.success());
}
