//! G-code program reader
//!
//! Turns the text produced by a toolpath generator into the sequence of
//! command lines a job sender queues, one instruction per line.

use crate::error::{GcodeError, Result};
use std::path::Path;

/// One line of a program, ready to be queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLine {
    /// One-based line number in the source text
    pub number: usize,
    /// Text to queue; comments are stripped unless the line carries a checksum
    pub text: String,
}

/// A program loaded for streaming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcodeProgram {
    lines: Vec<ProgramLine>,
}

/// True when the line carries a `*` immediately followed by a digit
pub fn has_checksum(line: &str) -> bool {
    line.match_indices('*').any(|(idx, _)| {
        line[idx + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    })
}

fn is_printable_ascii(line: &str) -> bool {
    line.chars().all(|c| (' '..='~').contains(&c))
}

impl GcodeProgram {
    /// Parse program text
    ///
    /// Directive (`%`) and comment (`(`) lines are skipped, inline `;`
    /// comments are removed and blank lines dropped. Lines that already carry
    /// a checksum are kept verbatim apart from surrounding whitespace.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Vec::new();

        for (idx, raw) in text.lines().enumerate() {
            let number = idx + 1;

            if has_checksum(raw) {
                let text = raw.trim().to_string();
                Self::check_printable(number, &text)?;
                lines.push(ProgramLine { number, text });
                continue;
            }

            let line = raw.trim_end();
            if line.starts_with('%') || line.starts_with('(') {
                continue;
            }

            let line = line.split(';').next().unwrap_or_default().trim_end();
            if line.trim().is_empty() {
                continue;
            }

            Self::check_printable(number, line)?;
            lines.push(ProgramLine {
                number,
                text: line.to_string(),
            });
        }

        Ok(Self { lines })
    }

    /// Read and parse a program file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| GcodeError::FileError {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::parse(&text)
    }

    fn check_printable(number: usize, line: &str) -> Result<()> {
        if is_printable_ascii(line) {
            Ok(())
        } else {
            Err(GcodeError::InvalidLine {
                line_number: number,
                reason: "line contains non-printable or non-ASCII characters".to_string(),
            }
            .into())
        }
    }

    /// Lines in transmission order
    pub fn lines(&self) -> &[ProgramLine] {
        &self.lines
    }

    /// Number of lines to queue
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True when nothing would be queued
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
