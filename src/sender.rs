//! Job sender
//!
//! Queues a program's lines into a device session one at a time, stopping
//! early when interrupted, and always releases the session's link.

use gcodelink_communication::DeviceSession;
use gcodelink_core::{GcodeProgram, Result};
use std::future::Future;

/// Summary of one job run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Lines the session accepted (suppressed lines included)
    pub lines_sent: usize,
    /// Source line number of the last accepted line, 0 if none
    pub last_line: usize,
    /// The run stopped because of the interrupt
    pub interrupted: bool,
}

/// Streams programs into a session
#[derive(Debug, Clone, Copy)]
pub struct JobSender {
    wait_idle: bool,
}

impl Default for JobSender {
    fn default() -> Self {
        Self { wait_idle: true }
    }
}

impl JobSender {
    /// Sender that waits for the device to finish after the last line
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether to call the session's end-of-job hook
    pub fn with_wait_idle(mut self, wait_idle: bool) -> Self {
        self.wait_idle = wait_idle;
        self
    }

    /// Queue every line of `program`, until done or interrupted
    ///
    /// `interrupt` is called for a fresh interrupt future each time the run
    /// can be cut short: once around streaming, and again around the
    /// end-of-job hook, so a second interrupt abandons waiting for the
    /// device. The session is closed on every path. Session errors abort the
    /// run and are returned after closing; the end-of-job hook is then
    /// skipped.
    pub async fn run<I, F>(
        &self,
        session: &mut dyn DeviceSession,
        program: &GcodeProgram,
        mut interrupt: I,
    ) -> Result<JobReport>
    where
        I: FnMut() -> F + Send,
        F: Future<Output = ()> + Send,
    {
        let mut report = JobReport::default();
        let streamed = Self::stream(session, program, interrupt(), &mut report).await;

        let finished = match streamed {
            Ok(()) if self.wait_idle => {
                tokio::select! {
                    biased;
                    _ = interrupt() => {
                        tracing::warn!("Interrupted while waiting for the device to finish");
                        report.interrupted = true;
                        Ok(())
                    }
                    done = session.finish() => done,
                }
            }
            other => other,
        };

        let closed = session.close().await;
        finished?;
        closed?;

        tracing::info!("Last line sent is {}", report.last_line);
        Ok(report)
    }

    async fn stream<F>(
        session: &mut dyn DeviceSession,
        program: &GcodeProgram,
        interrupt: F,
        report: &mut JobReport,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(interrupt);

        for line in program.lines() {
            tracing::info!("Sending line {:4}", line.number);
            tokio::select! {
                biased;
                _ = &mut interrupt => {
                    tracing::warn!("Interrupted before line {}", line.number);
                    report.interrupted = true;
                    return Ok(());
                }
                ack = session.queue(&line.text) => {
                    ack?;
                    report.lines_sent += 1;
                    report.last_line = line.number;
                }
            }
        }

        Ok(())
    }
}
