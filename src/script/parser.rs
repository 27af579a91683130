//! Line-oriented parser for the YAML subset used inside config blocks
//!
//! The block has already had its comment prefix removed, so this parser
//! only sees lines like `build_cmd: make` or `  - path: go.mod`. It handles
//! mappings, sequences, plain and quoted scalars and literal block scalars
//! (`|`, `|-`, `|+`), which is everything a build config needs.

use crate::error::{KilnError, KilnResult};

/// A parsed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Key present with no value
    Empty,
    Scalar(String),
    Seq(Vec<Item>),
    Map(Vec<Entry>),
}

/// A sequence item with the script line it started on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub line: usize,
    pub node: Node,
}

/// A mapping entry with the script line of its key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub line: usize,
    pub value: Node,
}

#[derive(Debug, Clone)]
struct Line {
    number: usize,
    indent: usize,
    text: String,
}

impl Line {
    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    fn is_structural(&self) -> bool {
        !self.is_blank() && !self.text.starts_with('#')
    }

    fn is_seq_item(&self) -> bool {
        self.text == "-" || self.text.starts_with("- ")
    }

    /// The line re-indented to `column`, for block scalar content
    fn from_column(&self, column: usize) -> String {
        if self.is_blank() {
            let raw_len = self.indent + self.text.len();
            return " ".repeat(raw_len.saturating_sub(column));
        }
        let mut out = " ".repeat(self.indent.saturating_sub(column));
        out.push_str(&self.text);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chomp {
    Clip,
    Strip,
    Keep,
}

/// Parse prefix-stripped block lines; `first_line` is the script line number
/// of `lines[0]`.
pub fn parse(lines: &[String], first_line: usize) -> KilnResult<Node> {
    Parser::new(lines, first_line).document()
}

struct Parser {
    lines: Vec<Line>,
    pos: usize,
}

impl Parser {
    fn new(lines: &[String], first_line: usize) -> Self {
        let mut out = Vec::with_capacity(lines.len());
        for (i, raw) in lines.iter().enumerate() {
            let raw = raw.trim_end_matches(['\r', '\n']);
            let indent = raw.len() - raw.trim_start_matches(' ').len();
            out.push(Line {
                number: first_line + i,
                indent,
                text: raw[indent..].to_string(),
            });
        }
        Self { lines: out, pos: 0 }
    }

    fn document(mut self) -> KilnResult<Node> {
        let Some(first) = self.peek() else {
            return Ok(Node::Map(Vec::new()));
        };
        if first.is_seq_item() {
            return Err(KilnError::block(
                first.number,
                "config block must be a mapping of keys, not a list",
            ));
        }
        let indent = first.indent;
        let node = self.map(indent)?;
        if let Some(line) = self.peek() {
            return Err(KilnError::block(line.number, "unexpected indentation"));
        }
        Ok(node)
    }

    /// Next structural line, skipping blanks and comments
    fn peek(&mut self) -> Option<Line> {
        while let Some(line) = self.lines.get(self.pos) {
            if line.is_structural() {
                return Some(line.clone());
            }
            self.pos += 1;
        }
        None
    }

    fn map(&mut self, indent: usize) -> KilnResult<Node> {
        let mut entries: Vec<Entry> = Vec::new();

        while let Some(line) = self.peek() {
            if line.indent < indent || (line.indent == indent && line.is_seq_item()) {
                break;
            }
            if line.indent > indent {
                return Err(KilnError::block(line.number, "unexpected indentation"));
            }
            if line.text.starts_with('\t') {
                return Err(KilnError::block(line.number, "tabs are not allowed for indentation"));
            }

            let (key, rest) = split_key(&line)?;
            if entries.iter().any(|e| e.key == key) {
                return Err(KilnError::block(line.number, format!("duplicate key '{}'", key)));
            }
            self.pos += 1;

            let value = self.value(&line, indent, rest)?;
            entries.push(Entry {
                key,
                line: line.number,
                value,
            });
        }

        Ok(Node::Map(entries))
    }

    fn seq(&mut self, indent: usize) -> KilnResult<Node> {
        let mut items = Vec::new();

        while let Some(line) = self.peek() {
            if line.indent < indent || (line.indent == indent && !line.is_seq_item()) {
                break;
            }
            if line.indent > indent {
                return Err(KilnError::block(line.number, "unexpected indentation"));
            }

            let rest = line.text[1..].trim_start_matches(' ');
            let column = line.indent + (line.text.len() - rest.len());

            if rest.is_empty() {
                self.pos += 1;
                let node = self.nested(&line, indent)?;
                items.push(Item {
                    line: line.number,
                    node,
                });
                continue;
            }

            // Re-read the item's inline content as if it started at its own column
            self.lines[self.pos] = Line {
                number: line.number,
                indent: column,
                text: rest.to_string(),
            };

            let node = if looks_like_key(rest) {
                self.map(column)?
            } else {
                self.pos += 1;
                let header = self.lines[self.pos - 1].clone();
                self.inline_value(&header, indent, rest.trim_end())?
            };
            items.push(Item {
                line: line.number,
                node,
            });
        }

        Ok(Node::Seq(items))
    }

    /// Value following `key:` on `line`, which sits at `indent`
    fn value(&mut self, line: &Line, indent: usize, rest: &str) -> KilnResult<Node> {
        if rest.is_empty() {
            return self.nested(line, indent);
        }
        self.inline_value(line, indent, rest)
    }

    fn inline_value(&mut self, line: &Line, indent: usize, rest: &str) -> KilnResult<Node> {
        if let Some(header) = rest.strip_prefix('|') {
            let chomp = match header.trim_end() {
                "" => Chomp::Clip,
                "-" => Chomp::Strip,
                "+" => Chomp::Keep,
                other => {
                    return Err(KilnError::block(
                        line.number,
                        format!("unsupported block scalar header '|{}'", other),
                    ))
                }
            };
            return Ok(Node::Scalar(self.block_scalar(indent, chomp)));
        }
        if rest.starts_with('>') {
            return Err(KilnError::block(
                line.number,
                "folded scalars ('>') are not supported, use '|'",
            ));
        }
        match rest {
            "[]" => return Ok(Node::Seq(Vec::new())),
            "{}" => return Ok(Node::Map(Vec::new())),
            _ => {}
        }
        if rest.starts_with('[') || rest.starts_with('{') {
            return Err(KilnError::block(
                line.number,
                "flow collections are not supported, use one '- item' per line",
            ));
        }
        scalar(rest, line.number).map(Node::Scalar)
    }

    /// Value on the lines below a `key:` or `-` with nothing after it
    fn nested(&mut self, line: &Line, indent: usize) -> KilnResult<Node> {
        match self.peek() {
            Some(next) if next.indent > indent => {
                if next.is_seq_item() {
                    self.seq(next.indent)
                } else {
                    self.map(next.indent)
                }
            }
            // A sequence may sit at the same indentation as its parent key
            Some(next) if next.indent == indent && next.is_seq_item() && !line.is_seq_item() => {
                self.seq(indent)
            }
            _ => Ok(Node::Empty),
        }
    }

    fn block_scalar(&mut self, parent: usize, chomp: Chomp) -> String {
        let start = self.pos;
        let column = self.lines[start..]
            .iter()
            .find(|l| !l.is_blank())
            .map(|l| l.indent)
            .filter(|&c| c > parent);

        let Some(column) = column else {
            // Only blank lines (or nothing) follow: empty content
            while self.lines.get(self.pos).is_some_and(Line::is_blank) {
                self.pos += 1;
            }
            return String::new();
        };

        let mut content: Vec<String> = Vec::new();
        while let Some(line) = self.lines.get(self.pos) {
            if !line.is_blank() && line.indent < column {
                break;
            }
            content.push(line.from_column(column));
            self.pos += 1;
        }

        let mut trailing = 0;
        while content.last().is_some_and(|l| l.trim().is_empty()) {
            content.pop();
            trailing += 1;
        }

        let mut out = content.join("\n");
        match chomp {
            Chomp::Strip => {}
            Chomp::Clip => {
                if !out.is_empty() {
                    out.push('\n');
                }
            }
            Chomp::Keep => {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(&"\n".repeat(trailing));
            }
        }
        out
    }
}

fn looks_like_key(text: &str) -> bool {
    match text.find(':') {
        Some(pos) => {
            let after = &text[pos + 1..];
            let key = &text[..pos];
            (after.is_empty() || after.starts_with(' ')) && is_key(key)
        }
        None => false,
    }
}

fn is_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn split_key(line: &Line) -> KilnResult<(String, &str)> {
    let text = line.text.trim_end();
    if !looks_like_key(text) {
        return Err(KilnError::block(
            line.number,
            format!("expected 'key: value', found '{}'", text),
        ));
    }
    let pos = text.find(':').unwrap_or(text.len());
    let key = text[..pos].to_string();
    let rest = text.get(pos + 1..).unwrap_or("").trim();
    Ok((key, rest))
}

/// An inline plain or quoted scalar
fn scalar(text: &str, line: usize) -> KilnResult<String> {
    if let Some(body) = text.strip_prefix('"') {
        return double_quoted(body, line);
    }
    if let Some(body) = text.strip_prefix('\'') {
        return single_quoted(body, line);
    }
    // Plain scalars end at a ` #` comment
    let value = match text.find(" #") {
        Some(pos) => &text[..pos],
        None => text,
    };
    Ok(value.trim().to_string())
}

fn double_quoted(body: &str, line: usize) -> KilnResult<String> {
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                trailing_after_quote(&body[i + 1..], line)?;
                return Ok(out);
            }
            '\\' => {
                let escaped = match chars.next().map(|(_, e)| e) {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('0') => '\0',
                    Some('\\') => '\\',
                    Some('"') => '"',
                    Some('/') => '/',
                    Some(other) => {
                        return Err(KilnError::block(line, format!("unknown escape '\\{}'", other)))
                    }
                    None => break,
                };
                out.push(escaped);
            }
            other => out.push(other),
        }
    }
    Err(KilnError::block(line, "unterminated double-quoted string"))
}

fn single_quoted(body: &str, line: usize) -> KilnResult<String> {
    let mut out = String::new();
    let mut rest = body;
    loop {
        match rest.find('\'') {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                let after = &rest[pos + 1..];
                if let Some(tail) = after.strip_prefix('\'') {
                    out.push('\'');
                    rest = tail;
                } else {
                    trailing_after_quote(after, line)?;
                    return Ok(out);
                }
            }
            None => return Err(KilnError::block(line, "unterminated single-quoted string")),
        }
    }
}

fn trailing_after_quote(after: &str, line: usize) -> KilnResult<()> {
    let after = after.trim();
    if after.is_empty() || after.starts_with('#') {
        Ok(())
    } else {
        Err(KilnError::block(
            line,
            format!("unexpected text after closing quote: '{}'", after),
        ))
    }
}
