//! Splits interpreter output into styled segments.
//!
//! Only SGR sequences (`ESC [ <codes> m`) are recognized. Everything else,
//! including unknown codes, is passed through or ignored.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::domain::{Color, StyledSegment};

static SGR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[([0-9;]*)m").expect("valid regex"));

#[derive(Clone, Copy, Debug, Default)]
struct Style {
    color: Option<Color>,
    bold: Option<bool>,
}

impl Style {
    fn apply(&mut self, code: u32) {
        match code {
            0 => *self = Style::default(),
            1 => self.bold = Some(true),
            22 => self.bold = None,
            39 => self.color = None,
            code => {
                if let Some(color) = Color::from_sgr(code) {
                    self.color = Some(color);
                }
            }
        }
    }

    fn segment(&self, text: &str) -> StyledSegment {
        StyledSegment {
            text: text.to_string(),
            color: self.color,
            bold: self.bold,
        }
    }
}

/// Parses `text` into segments. Concatenating the segment texts gives back
/// `text` without its SGR sequences; no segment is ever empty.
pub fn parse(text: &str) -> Vec<StyledSegment> {
    let mut segments = Vec::new();
    let mut style = Style::default();
    let mut last = 0;

    for caps in SGR_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        push_segment(&mut segments, &style, &text[last..whole.start()]);
        last = whole.end();

        // Empty or oversized parameters are skipped like unknown codes.
        let codes: Vec<u32> = caps
            .get(1)
            .map_or("", |m| m.as_str())
            .split(';')
            .filter_map(|c| c.parse().ok())
            .collect();

        if codes.is_empty() {
            style.apply(0);
        }
        for code in codes {
            style.apply(code);
        }
    }

    push_segment(&mut segments, &style, &text[last..]);
    segments
}

fn push_segment(segments: &mut Vec<StyledSegment>, style: &Style, text: &str) {
    if !text.is_empty() {
        segments.push(style.segment(text));
    }
}
