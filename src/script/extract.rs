//! Locating the comment-wrapped config block inside a script
//!
//! The block opens with a line ending in `kiln-begin`. Whatever precedes the
//! marker on that line (`// `, `# `, `-- `) is the comment prefix, and it is
//! stripped from every line up to the matching `kiln-end`.

use crate::error::{KilnError, KilnResult};
use std::path::Path;

/// Marker opening the config block
pub const BEGIN_MARKER: &str = "kiln-begin";

/// Marker closing the config block
pub const END_MARKER: &str = "kiln-end";

/// The raw config block found in a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBlock {
    /// Comment prefix shared by the block's lines
    pub prefix: String,
    /// 1-based line number of the `kiln-begin` line
    pub begin_line: usize,
    /// 1-based line number of the `kiln-end` line
    pub end_line: usize,
    /// Raw text between the markers, prefixes included
    pub raw: String,
    /// Lines between the markers with the prefix removed
    pub lines: Vec<String>,
}

impl ConfigBlock {
    /// Script line number of `lines[0]`
    pub fn first_line(&self) -> usize {
        self.begin_line + 1
    }
}

/// Text before `marker` when the marker ends the line
fn marker_prefix<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let pos = line.find(marker)?;
    line[pos + marker.len()..]
        .trim()
        .is_empty()
        .then(|| &line[..pos])
}

fn is_end(line: &str, prefix: &str) -> bool {
    let text = line.trim_start();
    let prefix = prefix.trim();
    text.strip_prefix(prefix)
        .is_some_and(|rest| rest.trim() == END_MARKER)
}

fn strip_prefix<'a>(line: &'a str, prefix: &str, number: usize) -> KilnResult<&'a str> {
    if let Some(rest) = line.strip_prefix(prefix) {
        return Ok(rest);
    }
    if line.trim_end() == prefix.trim_end() || line.trim().is_empty() {
        return Ok("");
    }
    Err(KilnError::block(
        number,
        format!("line does not start with the block's comment prefix '{}'", prefix),
    ))
}

/// Find the single config block in `text`
pub fn extract_block(path: &Path, text: &str) -> KilnResult<ConfigBlock> {
    let mut block: Option<ConfigBlock> = None;
    let mut open: Option<ConfigBlock> = None;

    for (i, line) in text.lines().enumerate() {
        let number = i + 1;

        if let Some(current) = open.as_mut() {
            if is_end(line, &current.prefix) {
                current.end_line = number;
                block = open.take();
                continue;
            }
            if marker_prefix(line, BEGIN_MARKER).is_some() {
                return Err(KilnError::block(
                    number,
                    format!("'{}' inside an open config block", BEGIN_MARKER),
                ));
            }
            let stripped = strip_prefix(line, &current.prefix, number)?;
            if !current.raw.is_empty() || !current.lines.is_empty() {
                current.raw.push('\n');
            }
            current.raw.push_str(line);
            current.lines.push(stripped.to_string());
            continue;
        }

        if let Some(prefix) = marker_prefix(line, BEGIN_MARKER) {
            if let Some(existing) = &block {
                return Err(KilnError::block(
                    number,
                    format!(
                        "second config block; the first one starts at line {}",
                        existing.begin_line
                    ),
                ));
            }
            open = Some(ConfigBlock {
                prefix: prefix.to_string(),
                begin_line: number,
                end_line: 0,
                raw: String::new(),
                lines: Vec::new(),
            });
        } else if block.is_none() && marker_prefix(line, END_MARKER).is_some() {
            return Err(KilnError::block(
                number,
                format!("'{}' without a preceding '{}'", END_MARKER, BEGIN_MARKER),
            ));
        }
    }

    if let Some(unterminated) = open {
        return Err(KilnError::UnterminatedBlock {
            line: unterminated.begin_line,
        });
    }

    block.ok_or_else(|| KilnError::MissingBlock(path.to_path_buf()))
}
