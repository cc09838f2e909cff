//! Incremental reassembly of records from fragmented process output.
//!
//! Raw chunks are stripped of terminal escapes and appended to a buffer. The
//! buffer is scanned left to right for `{ ... }` candidates (string and escape
//! aware inside a candidate). A candidate that parses as a JSON object becomes
//! a [`Record::Structured`]; everything else is text, emitted one
//! [`Record::Text`] per non-empty trimmed line.
//!
//! Output is only committed up to the end of the last parsed object or the
//! last newline outside any open candidate. The remainder stays buffered
//! verbatim, so the emitted sequence does not depend on how the input was
//! split into chunks.

use serde_json::Value;
use thiserror::Error;

use crate::core::ansi::{split_incomplete_escape, strip_ansi};

/// One reassembled unit of process output.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// A complete JSON object.
    Structured(Value),
    /// One trimmed, non-empty line of plain text.
    Text(String),
}

impl Record {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Record::Text(text) => Some(text),
            Record::Structured(_) => None,
        }
    }
}

/// End of stream was reached with an unclosed structured record.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("stream ended inside an unterminated record ({} bytes)", .remainder.len())]
pub struct MalformedOutput {
    /// The raw text from the start of the unclosed record.
    pub remainder: String,
    /// Records completed while flushing, before the malformed remainder.
    pub records: Vec<Record>,
}

/// Push-model reassembler; one instance per iteration.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    /// Raw bytes held back because they end in a partial escape sequence.
    held: String,
    /// Stripped text not yet committed as records.
    buffer: String,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a complete blob (pull model).
    pub fn parse_all(blob: &str) -> Result<Vec<Record>, MalformedOutput> {
        let mut reassembler = Self::new();
        let mut records = reassembler.push(blob);
        match reassembler.finish() {
            Ok(rest) => {
                records.extend(rest);
                Ok(records)
            }
            Err(mut err) => {
                records.append(&mut err.records);
                err.records = records;
                Err(err)
            }
        }
    }

    /// Feed one chunk and return every record it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<Record> {
        self.held.push_str(chunk);
        let raw = std::mem::take(&mut self.held);
        let (ready, held) = split_incomplete_escape(&raw);
        self.buffer.push_str(&strip_ansi(ready));
        self.held = held.to_string();
        self.drain(false).0
    }

    /// Number of bytes buffered but not yet emitted.
    pub fn pending_len(&self) -> usize {
        self.held.len() + self.buffer.len()
    }

    /// Signal end of stream and flush the remainder.
    ///
    /// Fails only when the stream ends inside something that started like a
    /// JSON object and never closed.
    pub fn finish(&mut self) -> Result<Vec<Record>, MalformedOutput> {
        let held = std::mem::take(&mut self.held);
        self.buffer.push_str(&strip_ansi(&held));
        let (records, malformed) = self.drain(true);
        match malformed {
            Some(remainder) => Err(MalformedOutput { remainder, records }),
            None => Ok(records),
        }
    }

    /// Commit as much of the buffer as is settled.
    ///
    /// With `at_end`, the whole buffer is settled; an unclosed candidate that
    /// looks like JSON is returned as the malformed remainder, any other
    /// unclosed `{` is demoted to text.
    fn drain(&mut self, at_end: bool) -> (Vec<Record>, Option<String>) {
        let text = std::mem::take(&mut self.buffer);
        let mut emitter = Emitter::default();
        let mut pos = 0;
        let mut text_start = 0;
        let mut committed = 0;
        let mut malformed = None;

        loop {
            match scan(&text, pos) {
                Scan::Object { start, end, value } => {
                    emitter.text(&text[text_start..start]);
                    emitter.object(value);
                    pos = end;
                    text_start = end;
                    committed = end;
                }
                Scan::Rejected { start } => {
                    // Unparsable braces stay part of the surrounding text, but
                    // their interior may still hold an embedded object.
                    pos = start + 1;
                }
                Scan::Open { start } => {
                    if !at_end {
                        if let Some(nl) = last_newline(&text[..start], pos) {
                            emitter.text(&text[text_start..nl]);
                            committed = nl;
                        }
                        break;
                    }
                    if looks_structured(&text[start..]) {
                        emitter.text(&text[text_start..start]);
                        malformed = Some(text[start..].to_string());
                        committed = text.len();
                        break;
                    }
                    pos = start + 1;
                }
                Scan::Done => {
                    if at_end {
                        emitter.text(&text[text_start..]);
                        committed = text.len();
                    } else if let Some(nl) = last_newline(&text, pos) {
                        emitter.text(&text[text_start..nl]);
                        committed = nl;
                    }
                    break;
                }
            }
        }

        self.buffer = text[committed..].to_string();
        (emitter.records, malformed)
    }
}

/// Collects records in order, splitting text into trimmed lines.
#[derive(Default)]
struct Emitter {
    records: Vec<Record>,
}

impl Emitter {
    fn text(&mut self, text: &str) {
        for line in text.lines() {
            let line = line.trim();
            if !line.is_empty() {
                self.records.push(Record::Text(line.to_string()));
            }
        }
    }

    fn object(&mut self, value: Value) {
        self.records.push(Record::Structured(value));
    }
}

enum Scan {
    /// A balanced candidate that parsed as a JSON object.
    Object { start: usize, end: usize, value: Value },
    /// A balanced candidate that did not parse.
    Rejected { start: usize },
    /// A candidate starting at `start` that has not closed yet.
    Open { start: usize },
    /// No further candidate in the text.
    Done,
}

/// Find the next `{` candidate at or after `from` and try to close it.
fn scan(text: &str, from: usize) -> Scan {
    let Some(offset) = text[from..].find('{') else {
        return Scan::Done;
    };
    let start = from + offset;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + idx + 1;
                    return match serde_json::from_str::<Value>(&text[start..end]) {
                        Ok(value) if value.is_object() => Scan::Object { start, end, value },
                        _ => Scan::Rejected { start },
                    };
                }
            }
            _ => {}
        }
    }
    Scan::Open { start }
}

/// Byte offset just past the last `\n` in `text` at or after `floor`.
///
/// `floor` is where the current scan started; everything before it was
/// already settled by earlier candidates.
fn last_newline(text: &str, floor: usize) -> Option<usize> {
    text.rfind('\n')
        .map(|idx| idx + 1)
        .filter(|end| *end > floor)
}

/// An unclosed candidate "looks structured" when `{` is followed by a key.
fn looks_structured(candidate: &str) -> bool {
    candidate[1..].trim_start().starts_with('"')
}
