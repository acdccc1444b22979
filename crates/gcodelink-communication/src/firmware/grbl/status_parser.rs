//! GRBL Status Report Parsing
//!
//! Parses the `<...>` status line GRBL answers a `?` query with. The two
//! supported firmware generations use different fixed grammars:
//!
//! - 0.9: `<STATE,MPos:x,y,z,WPos:x,y,z,Buf:cmdbuf,RX:rxbuf,Ln:n,F:feed.>`
//! - 1.1: `<STATE|MPos:x,y,z|Bf:cmdbuf,rxbuf|FS:feed,speed|...>`
//!
//! A report either parses completely or not at all.

use serde::{Deserialize, Serialize};

/// Three-axis position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X position
    pub x: f64,
    /// Y position
    pub y: f64,
    /// Z position
    pub z: f64,
}

impl Position {
    /// Parse `x,y,z[,a...]`; extra axes are accepted and ignored
    pub fn parse(pos_str: &str) -> Option<Self> {
        let coords = pos_str
            .split(',')
            .map(|s| s.trim().parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()?;

        if coords.len() < 3 {
            return None;
        }

        Some(Self {
            x: coords[0],
            y: coords[1],
            z: coords[2],
        })
    }
}

/// Override state (Feed, Rapid, Spindle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

impl Overrides {
    /// Parse `feed,rapid,spindle`
    pub fn parse(ov_str: &str) -> Option<Self> {
        let mut parts = ov_str.split(',').map(|s| s.trim().parse::<u16>().ok());
        let feed = parts.next()??;
        let rapid = parts.next()??;
        let spindle = parts.next()??;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            feed,
            rapid,
            spindle,
        })
    }
}

/// Parsed status report
///
/// Buffer figures are reported as the firmware sends them: for 0.9 they are
/// occupancy (blocks queued, bytes received), for 1.1 they are availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Machine state token (Idle, Run, Hold:0, Alarm, ...)
    pub state: String,
    /// Planner (command) buffer figure
    pub cmdbuf: u32,
    /// Serial receive buffer figure, in bytes
    pub rxbuf: u32,
    /// Machine position
    pub mpos: Option<Position>,
    /// Work position
    pub wpos: Option<Position>,
    /// Work coordinate offset
    pub wco: Option<Position>,
    /// Line number being executed
    pub line_number: Option<u32>,
    /// Current feed rate
    pub feed: Option<f64>,
    /// Current spindle speed
    pub spindle: Option<f64>,
    /// Override percentages
    pub overrides: Option<Overrides>,
}

impl StatusReport {
    /// State token without its sub-state (`Hold:0` -> `Hold`)
    pub fn base_state(&self) -> &str {
        self.state.split(':').next().unwrap_or_default()
    }

    /// Whether the machine reports itself idle
    pub fn is_idle(&self) -> bool {
        self.base_state() == "Idle"
    }

    /// Whether the machine is locked in an alarm; it stays there until reset
    pub fn is_alarm(&self) -> bool {
        self.base_state() == "Alarm"
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(char::is_whitespace)
}

fn token(s: &str) -> Option<&str> {
    is_token(s).then_some(s)
}

/// Status report grammar parsers
pub struct StatusParser;

impl StatusParser {
    /// Parse a GRBL 0.9 status line
    pub fn parse_v0_9(status_line: &str) -> Option<StatusReport> {
        let inner = status_line.strip_prefix('<')?.strip_suffix(".>")?;

        let (state, rest) = inner.split_once(',')?;
        let rest = rest.strip_prefix("MPos:")?;
        let (mpos, rest) = rest.split_once(",WPos:")?;
        let (wpos, rest) = rest.split_once(",Buf:")?;
        let (cmdbuf, rest) = rest.split_once(",RX:")?;
        let (rxbuf, rest) = rest.split_once(",Ln:")?;
        let (line_number, feed) = rest.split_once(",F:")?;

        Some(StatusReport {
            state: token(state)?.to_string(),
            cmdbuf: token(cmdbuf)?.parse().ok()?,
            rxbuf: token(rxbuf)?.parse().ok()?,
            mpos: Some(Position::parse(token(mpos)?)?),
            wpos: Some(Position::parse(token(wpos)?)?),
            wco: None,
            line_number: Some(token(line_number)?.parse().ok()?),
            feed: Some(token(feed)?.parse().ok()?),
            spindle: None,
            overrides: None,
        })
    }

    /// Parse a GRBL 1.1 status line
    ///
    /// The leading state and a `Bf:` field are required. Known fields that
    /// fail to parse invalidate the report; unknown fields are ignored.
    pub fn parse_v1_1(status_line: &str) -> Option<StatusReport> {
        let inner = status_line.strip_prefix('<')?.strip_suffix('>')?;
        let mut fields = inner.split('|');
        let state = token(fields.next()?)?;

        let mut buffers = None;
        let mut mpos = None;
        let mut wpos = None;
        let mut wco = None;
        let mut line_number = None;
        let mut feed = None;
        let mut spindle = None;
        let mut overrides = None;

        for field in fields {
            let Some((key, value)) = field.split_once(':') else {
                continue;
            };

            match key {
                "Bf" => {
                    let (cmd, rx) = value.split_once(',')?;
                    buffers = Some((cmd.trim().parse().ok()?, rx.trim().parse().ok()?));
                }
                "MPos" => mpos = Some(Position::parse(value)?),
                "WPos" => wpos = Some(Position::parse(value)?),
                "WCO" => wco = Some(Position::parse(value)?),
                "Ln" => line_number = Some(value.trim().parse().ok()?),
                "F" => feed = Some(value.trim().parse().ok()?),
                "FS" => {
                    let (f, s) = value.split_once(',')?;
                    feed = Some(f.trim().parse().ok()?);
                    spindle = Some(s.trim().parse().ok()?);
                }
                "Ov" => overrides = Some(Overrides::parse(value)?),
                _ => {}
            }
        }

        let (cmdbuf, rxbuf) = buffers?;

        Some(StatusReport {
            state: state.to_string(),
            cmdbuf,
            rxbuf,
            mpos,
            wpos,
            wco,
            line_number,
            feed,
            spindle,
            overrides,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v0_9_idle() {
        let report = StatusParser::parse_v0_9(
            "<Idle,MPos:0.000,0.000,0.000,WPos:0.000,0.000,0.000,Buf:0,RX:0,Ln:0,F:0.>",
        )
        .unwrap();
        assert_eq!(report.state, "Idle");
        assert_eq!(report.cmdbuf, 0);
        assert_eq!(report.rxbuf, 0);
        assert_eq!(report.line_number, Some(0));
        assert_eq!(report.feed, Some(0.0));
        assert!(report.is_idle());
    }

    #[test]
    fn test_parse_v0_9_running() {
        let report = StatusParser::parse_v0_9(
            "<Run,MPos:10.500,-2.000,1.250,WPos:0.500,-2.000,1.250,Buf:12,RX:87,Ln:42,F:600.>",
        )
        .unwrap();
        assert_eq!(report.state, "Run");
        assert_eq!(report.cmdbuf, 12);
        assert_eq!(report.rxbuf, 87);
        assert_eq!(
            report.mpos,
            Some(Position {
                x: 10.5,
                y: -2.0,
                z: 1.25
            })
        );
        assert_eq!(report.wpos.unwrap().x, 0.5);
        assert_eq!(report.feed, Some(600.0));
        assert!(!report.is_idle());
    }

    #[test]
    fn test_parse_v0_9_rejects_other_shapes() {
        // 1.1 line against the 0.9 grammar
        assert!(StatusParser::parse_v0_9("<Idle|MPos:0.000,0.000,0.000|Bf:15,128|FS:0,0>").is_none());
        // Missing the trailing '.'
        assert!(StatusParser::parse_v0_9(
            "<Idle,MPos:0,0,0,WPos:0,0,0,Buf:0,RX:0,Ln:0,F:0>"
        )
        .is_none());
        // Non-numeric buffer
        assert!(StatusParser::parse_v0_9(
            "<Idle,MPos:0,0,0,WPos:0,0,0,Buf:x,RX:0,Ln:0,F:0.>"
        )
        .is_none());
    }

    #[test]
    fn test_parse_v1_1_idle() {
        let report =
            StatusParser::parse_v1_1("<Idle|MPos:0.000,0.000,0.000|Bf:15,128|FS:0,0>").unwrap();
        assert_eq!(report.state, "Idle");
        assert_eq!(report.cmdbuf, 15);
        assert_eq!(report.rxbuf, 128);
        assert_eq!(report.feed, Some(0.0));
        assert_eq!(report.spindle, Some(0.0));
        assert!(report.wpos.is_none());
    }

    #[test]
    fn test_parse_v1_1_field_order_is_free() {
        let report = StatusParser::parse_v1_1(
            "<Hold:0|Bf:3,40|WPos:1.000,2.000,3.000|Ln:7|F:250|Ov:100,100,100|Pn:XZ>",
        )
        .unwrap();
        assert_eq!(report.state, "Hold:0");
        assert_eq!(report.base_state(), "Hold");
        assert_eq!(report.cmdbuf, 3);
        assert_eq!(report.rxbuf, 40);
        assert_eq!(report.line_number, Some(7));
        assert_eq!(report.feed, Some(250.0));
        assert_eq!(
            report.overrides,
            Some(Overrides {
                feed: 100,
                rapid: 100,
                spindle: 100
            })
        );
    }

    #[test]
    fn test_parse_v1_1_is_all_or_nothing() {
        // No buffer field
        assert!(StatusParser::parse_v1_1("<Idle|MPos:0.000,0.000,0.000|FS:0,0>").is_none());
        // Broken position
        assert!(StatusParser::parse_v1_1("<Idle|MPos:0.000,abc,0.000|Bf:15,128>").is_none());
        // Not a status line
        assert!(StatusParser::parse_v1_1("ok").is_none());
        assert!(StatusParser::parse_v1_1("<|Bf:15,128>").is_none());
    }
}
