use std::ops::Range;
use std::sync::OnceLock;

use regex::{CaptureMatches, Regex};

fn script_block_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"(?ms)(```sjs\s*\n*(.*?)sjs```)").expect("script block regex"))
}

/// A fenced script region of a template body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBlock<'a> {
    /// The block including its fences.
    pub raw_text: &'a str,
    /// The code between the fences.
    pub script_source: &'a str,
    /// 1-based line of the body on which `script_source` starts.
    pub start_line: usize,
    /// Byte range of `raw_text` within the body.
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Script(ScriptBlock<'a>),
}

/// Splits a body into literal text and script blocks, in document order.
///
/// Concatenating every segment (literal text, and each block's `raw_text`)
/// reproduces the body. An opening fence without a closing one is literal
/// text, so a body without complete fences yields a single literal.
pub fn extract(body: &str) -> Segments<'_> {
    Segments {
        body,
        matches: script_block_regex().captures_iter(body),
        cursor: 0,
        line: 1,
        pending: None,
    }
}

pub struct Segments<'a> {
    body: &'a str,
    matches: CaptureMatches<'static, 'a>,
    cursor: usize,
    line: usize,
    pending: Option<ScriptBlock<'a>>,
}

impl<'a> Segments<'a> {
    fn advance_line(&mut self, to: usize) {
        self.line += self.body[self.cursor..to].matches('\n').count();
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(block) = self.pending.take() {
            self.advance_line(block.range.end);
            self.cursor = block.range.end;
            return Some(Segment::Script(block));
        }

        let Some(captures) = self.matches.next() else {
            if self.cursor < self.body.len() {
                let rest = &self.body[self.cursor..];
                self.cursor = self.body.len();
                return Some(Segment::Literal(rest));
            }
            return None;
        };

        let (Some(raw), Some(source)) = (captures.get(1), captures.get(2)) else {
            // A match without both groups is left in the text untouched.
            tracing::warn!("script fence matched without a body; leaving it as text");
            let whole = captures.get(0).map(|m| m.end()).unwrap_or(self.cursor);
            let literal = &self.body[self.cursor..whole];
            self.advance_line(whole);
            self.cursor = whole;
            return Some(Segment::Literal(literal));
        };

        let start_line =
            self.line + self.body[self.cursor..source.start()].matches('\n').count();
        let block = ScriptBlock {
            raw_text: raw.as_str(),
            script_source: source.as_str(),
            start_line,
            range: raw.range(),
        };

        if raw.start() > self.cursor {
            let literal = &self.body[self.cursor..raw.start()];
            self.advance_line(raw.start());
            self.cursor = raw.start();
            self.pending = Some(block);
            return Some(Segment::Literal(literal));
        }

        self.advance_line(block.range.end);
        self.cursor = block.range.end;
        Some(Segment::Script(block))
    }
}
