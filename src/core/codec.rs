/// Dialogue codec: raw stream bytes to tagged text and back.
use std::fmt;

use tracing::warn;

use crate::core::normalize;
use crate::schema::control::{self, END_CONVERSATION, END_CONVERSATION_TAG, OPEN_CHOICE_MENU_TAG};
use crate::schema::glyph::{GlyphTable, NEWLINE_BYTE, PREFIX_BYTE, SPACE_BYTE, TERMINATOR};

/// Visible columns per line before the engine wraps.
pub const LINE_WIDTH: usize = 30;

/// A run of tagged text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Visible characters, emitted as-is.
    Text(String),
    /// A control tag including its angle brackets: `<Pause [0A]>`.
    Tag(String),
}

/// Visible text interleaved with control tags.
///
/// Adjacent text runs are always merged, so two `TaggedText`s that render
/// the same also compare equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggedText {
    pub segments: Vec<Segment>,
}

impl TaggedText {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a string into text runs and `<...>` tags.
    ///
    /// A tag runs from `<` to the next `>` and holds at least one character;
    /// a `<` with no closing `>` (or `<>`) stays literal text.
    pub fn parse(input: &str) -> TaggedText {
        let mut out = TaggedText::new();
        let mut rest = input;
        while let Some(open) = rest.find('<') {
            let after = &rest[open + 1..];
            match after.find('>') {
                Some(close) if close > 0 => {
                    out.push_text(&rest[..open]);
                    out.push_tag(&rest[open..open + close + 2]);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push_text(&rest[..open + 1]);
                    rest = after;
                }
            }
        }
        out.push_text(rest);
        out
    }

    pub fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Segment::Text(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(Segment::Text(text.to_string()));
        }
    }

    pub fn push_tag(&mut self, tag: &str) {
        self.segments.push(Segment::Tag(tag.to_string()));
    }

    /// Text with all tags removed.
    pub fn visible(&self) -> String {
        self.segments
            .iter()
            .filter_map(|seg| match seg {
                Segment::Text(text) => Some(text.as_str()),
                Segment::Tag(_) => None,
            })
            .collect()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Tag(tag) => Some(tag.as_str()),
            Segment::Text(_) => None,
        })
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags().any(|candidate| candidate == tag)
    }

    pub fn ends_conversation(&self) -> bool {
        self.has_tag(END_CONVERSATION_TAG)
    }

    pub fn has_open_menu(&self) -> bool {
        self.has_tag(OPEN_CHOICE_MENU_TAG)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for TaggedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            match seg {
                Segment::Text(text) | Segment::Tag(text) => f.write_str(text)?,
            }
        }
        Ok(())
    }
}

impl From<&str> for TaggedText {
    fn from(value: &str) -> Self {
        TaggedText::parse(value)
    }
}

/// Decode a raw dialogue buffer. Never fails: malformed input shows up as
/// placeholders in the output.
pub fn decode(data: &[u8]) -> TaggedText {
    let glyphs = GlyphTable::get();
    let mut out = TaggedText::new();
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        if byte == TERMINATOR {
            break;
        }
        if byte != PREFIX_BYTE {
            match glyphs.glyph(byte) {
                Some(glyph) => out.push_text(glyph),
                None => out.push_text(&format!("[?{byte:02X}]")),
            }
            i += 1;
            continue;
        }

        // Prefix byte at the very end: nothing left to interpret.
        let Some(&opcode) = data.get(i + 1) else {
            break;
        };
        if opcode == END_CONVERSATION {
            out.push_tag(END_CONVERSATION_TAG);
            break;
        }
        let args_start = i + 2;
        match control::by_opcode(opcode) {
            None => {
                out.push_tag(&format!("<Code 0x{opcode:02X}>"));
                i = args_start;
            }
            Some(code) => {
                let wanted = code.arg_len();
                let available = data.len() - args_start;
                if available < wanted {
                    out.push_tag(&format!("<Malformed Code 0x{opcode:02X}>"));
                    i = data.len();
                } else {
                    let args = &data[args_start..args_start + wanted];
                    out.push_tag(&code.render(&code.unpack(args)));
                    i = args_start + wanted;
                }
            }
        }
    }
    out
}

/// Encode arbitrary tagged text into a terminated dialogue buffer.
///
/// The input is canonicalized first (tag spelling, typography, charset),
/// unknown tags are dropped and literal runs are word-wrapped at
/// [`LINE_WIDTH`] visible columns.
pub fn encode(text: &str) -> Vec<u8> {
    let canonical = normalize::canonicalize(text);
    let tagged = TaggedText::parse(&canonical);
    let mut out = Vec::with_capacity(canonical.len() + 1);
    let mut column = 0usize;
    for seg in &tagged.segments {
        match seg {
            Segment::Tag(tag) => encode_tag(tag, &mut out),
            Segment::Text(run) => encode_run(run, &mut column, &mut out),
        }
    }
    out.push(TERMINATOR);
    out
}

/// What the engine will show for `text` once written: `decode(encode(text))`.
pub fn canonical(text: &str) -> TaggedText {
    decode(&encode(text))
}

fn encode_tag(tag: &str, out: &mut Vec<u8>) {
    if let Some((code, values)) = control::lookup_tag(tag) {
        out.push(PREFIX_BYTE);
        out.push(code.opcode);
        out.extend(code.pack(&values));
    } else if let Some(opcode) = passthrough_opcode(tag) {
        out.push(PREFIX_BYTE);
        out.push(opcode);
    } else {
        warn!(tag, "dropping unrecognized control tag");
    }
}

/// `<Code 0xHH>` re-emits an opcode the table does not describe, as long as
/// it cannot expect arguments.
fn passthrough_opcode(tag: &str) -> Option<u8> {
    let hex = tag.strip_prefix("<Code 0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    let opcode = u8::from_str_radix(hex, 16).ok()?;
    match control::by_opcode(opcode) {
        Some(code) if code.arg_len() > 0 => None,
        _ => Some(opcode),
    }
}

fn encode_run(run: &str, column: &mut usize, out: &mut Vec<u8>) {
    for (line_idx, line) in run.split('\n').enumerate() {
        if line_idx > 0 {
            out.push(NEWLINE_BYTE);
            *column = 0;
        }
        for (word_idx, word) in line.split(' ').enumerate() {
            let bytes = word_bytes(word);
            let mut space = word_idx > 0 && *column > 0;
            if *column > 0 && *column + usize::from(space) + bytes.len() > LINE_WIDTH {
                out.push(NEWLINE_BYTE);
                *column = 0;
                space = false;
            }
            if space {
                out.push(SPACE_BYTE);
                *column += 1;
            }
            *column += bytes.len();
            out.extend(bytes);
        }
    }
}

/// Bytes for one word; characters without a glyph are skipped.
fn word_bytes(word: &str) -> Vec<u8> {
    let glyphs = GlyphTable::get();
    let mut bytes = Vec::with_capacity(word.len());
    let mut rest = word;
    while let Some(ch) = rest.chars().next() {
        if let Some(byte) = raw_placeholder(rest) {
            bytes.push(byte);
            rest = &rest[5..];
        } else if let Some((byte, used)) = glyphs.match_prefix(rest) {
            bytes.push(byte);
            rest = &rest[used..];
        } else {
            rest = &rest[ch.len_utf8()..];
        }
    }
    bytes
}

/// `[?HH]` is how `decode` shows a byte with no glyph; write it back verbatim.
fn raw_placeholder(text: &str) -> Option<u8> {
    let inner = text.get(..5)?.strip_prefix("[?")?.strip_suffix(']')?;
    let byte = u8::from_str_radix(inner, 16).ok()?;
    (byte != TERMINATOR && byte != PREFIX_BYTE).then_some(byte)
}
