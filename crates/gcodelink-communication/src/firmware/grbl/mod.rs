//! GRBL firmware support
//!
//! Provides:
//! - Status report parsing for GRBL 0.9 and 1.1
//! - Error and alarm code decoding
//! - [`GrblSession`], the status-polled, `ok`-acknowledged session

pub mod error_decoder;
pub mod session;
pub mod status_parser;

pub use error_decoder::{decode_alarm, decode_error, describe_rejection};
pub use session::GrblSession;
pub use status_parser::{Overrides, Position, StatusParser, StatusReport};

/// Planner blocks GRBL 0.9 may have queued before we stop sending
const V0_9_MAX_QUEUED_BLOCKS: u32 = 10;
/// Receive buffer bytes GRBL 0.9 may hold before we stop sending
const V0_9_MAX_QUEUED_BYTES: u32 = 100;
/// Planner blocks GRBL 1.1 must keep free
const V1_1_MIN_FREE_BLOCKS: u32 = 2;
/// Receive buffer bytes GRBL 1.1 keeps free for manual entry
const V1_1_RESERVED_BYTES: usize = 5;

/// GRBL firmware generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrblVersion {
    /// 0.9: comma-separated status, buffer occupancy
    V0_9,
    /// 1.1: pipe-separated status, buffer availability
    V1_1,
}

impl GrblVersion {
    /// Parse a status line with this version's grammar
    pub fn parse_status(&self, line: &str) -> Option<StatusReport> {
        match self {
            Self::V0_9 => StatusParser::parse_v0_9(line),
            Self::V1_1 => StatusParser::parse_v1_1(line),
        }
    }

    /// Whether a line of `pending_len` bytes may be sent given `report`
    pub fn can_send(&self, report: &StatusReport, pending_len: usize) -> bool {
        match self {
            Self::V0_9 => {
                report.cmdbuf < V0_9_MAX_QUEUED_BLOCKS && report.rxbuf < V0_9_MAX_QUEUED_BYTES
            }
            Self::V1_1 => {
                report.cmdbuf > V1_1_MIN_FREE_BLOCKS
                    && report.rxbuf as usize > V1_1_RESERVED_BYTES + pending_len
            }
        }
    }
}
