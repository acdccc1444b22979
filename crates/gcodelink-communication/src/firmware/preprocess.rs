//! Pre-send transform for checksummed firmwares (Trinus, Marlin)
//!
//! Lines are shortened to what the firmware understands: comments go,
//! unsupported mode setters are dropped, and everything else gets an XOR
//! checksum suffix so corruption on the wire can be detected.

/// Commands these firmwares reject; such lines are never transmitted
///
/// Units (`G20`/`G21`), positioning mode (`G90`/`G91`), extruder positioning
/// mode (`M82`/`M83`) and filament change (`M600`).
pub const BLOCKED_COMMANDS: &[&str] = &["G20", "G21", "G90", "G91", "M82", "M83", "M600"];

/// Outcome of the pre-send transform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prepared {
    /// Send this exact text
    Transmit(String),
    /// Nothing to send
    Suppressed,
}

/// XOR of every byte of `line` followed by one space
pub fn checksum(line: &str) -> u8 {
    line.bytes()
        .chain(std::iter::once(b' '))
        .fold(0u8, |acc, byte| acc ^ byte)
}

/// `line` with its ` *N` checksum suffix appended
pub fn with_checksum(line: &str) -> String {
    format!("{} *{}", line, checksum(line))
}

/// Drop everything from the first `;` and trailing whitespace
pub fn strip_comment(line: &str) -> &str {
    line.split(';').next().unwrap_or_default().trim_end()
}

/// Whether the (comment-stripped) line is on the block-list
pub fn is_blocked(line: &str) -> bool {
    let line = line.trim();
    BLOCKED_COMMANDS
        .iter()
        .any(|blocked| line.eq_ignore_ascii_case(blocked))
}

/// Apply the pre-send transform
///
/// `M117` display messages pass through uncompressed, and lines already
/// carrying a `*` are assumed checksummed and sent verbatim.
pub fn shorten(line: &str) -> Prepared {
    let stripped = strip_comment(line);

    if stripped.trim().is_empty() || is_blocked(stripped) {
        return Prepared::Suppressed;
    }

    if stripped.starts_with("M117") || stripped.contains('*') {
        return Prepared::Transmit(stripped.to_string());
    }

    Prepared::Transmit(with_checksum(stripped))
}
