use std::fmt;
use std::ops::Range;

use regex::bytes::{Regex, RegexBuilder};

use crate::buffer::ArcLogLine;
use crate::error::{LogError, Result};

/// Prefix selecting fuzzy matching
pub const FUZZY_MARKER: &str = "-f ";

/// Prefix selecting inverted matching
pub const INVERT_MARKER: char = '!';

/// ANSI 256-color index used for matched characters
pub const HIGHLIGHT_COLOR: u8 = 209;

const HIGHLIGHT_END: &[u8] = b"\x1b[0m";

/// SGR sequence switching the foreground to `HIGHLIGHT_COLOR`
fn highlight_start() -> Vec<u8> {
    format!("\x1b[38;5;{HIGHLIGHT_COLOR}m").into_bytes()
}

/// Match strategy chosen when the expression is parsed
#[derive(Clone)]
pub enum MatchMode {
    /// Unanchored regex search; plain text is a regex matching itself
    Regex(Regex),

    /// Lines that do NOT contain the regex
    Inverted(Regex),

    /// In-order subsequence of the term's characters
    Fuzzy(Vec<char>),
}

/// Compiled filter expression
#[derive(Clone)]
pub struct FilterSpec {
    /// Original expression as typed
    expr: String,

    mode: MatchMode,

    case_insensitive: bool,
}

impl FilterSpec {
    /// Parse a filter expression.
    ///
    /// Returns `Ok(None)` for a blank expression, meaning "no filter".
    pub fn parse(expr: &str, case_insensitive: bool) -> Result<Option<Self>> {
        if expr.trim().is_empty() {
            return Ok(None);
        }

        let mode = if let Some(term) = expr.strip_prefix(FUZZY_MARKER) {
            MatchMode::Fuzzy(term.chars().collect())
        } else if let Some(pattern) = expr.strip_prefix(INVERT_MARKER) {
            MatchMode::Inverted(compile(expr, pattern, case_insensitive)?)
        } else {
            MatchMode::Regex(compile(expr, expr, case_insensitive)?)
        };

        Ok(Some(Self {
            expr: expr.to_string(),
            mode,
            case_insensitive,
        }))
    }

    /// Check a rendered line.
    ///
    /// `None` excludes the line; otherwise the byte spans to highlight
    /// (always empty for inverted filters).
    pub fn matches(&self, line: &[u8]) -> Option<Vec<Range<usize>>> {
        match &self.mode {
            MatchMode::Regex(re) => {
                if !re.is_match(line) {
                    return None;
                }
                Some(
                    re.find_iter(line)
                        .map(|m| m.range())
                        .filter(|r| !r.is_empty())
                        .collect(),
                )
            }
            MatchMode::Inverted(re) => {
                if re.is_match(line) {
                    None
                } else {
                    Some(Vec::new())
                }
            }
            MatchMode::Fuzzy(term) => fuzzy_match(term, line, self.case_insensitive),
        }
    }

    /// Get the original expression
    pub fn expression(&self) -> &str {
        &self.expr
    }

    pub fn mode(&self) -> &MatchMode {
        &self.mode
    }
}

impl fmt::Debug for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            MatchMode::Regex(_) => "regex",
            MatchMode::Inverted(_) => "inverted",
            MatchMode::Fuzzy(_) => "fuzzy",
        };
        f.debug_struct("FilterSpec")
            .field("expr", &self.expr)
            .field("mode", &mode)
            .field("case_insensitive", &self.case_insensitive)
            .finish()
    }
}

fn compile(expr: &str, pattern: &str, case_insensitive: bool) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|source| LogError::InvalidFilter {
            expr: expr.to_string(),
            source,
        })
}

/// Greedy left-most subsequence match, returning the span of each matched char
fn fuzzy_match(term: &[char], line: &[u8], case_insensitive: bool) -> Option<Vec<Range<usize>>> {
    let mut wanted = term.iter().peekable();
    let mut spans = Vec::with_capacity(term.len());

    for (range, ch) in char_units(line) {
        let Some(&&t) = wanted.peek() else {
            break;
        };
        let Some(c) = ch else {
            continue;
        };
        let hit = if case_insensitive {
            c.to_lowercase().eq(t.to_lowercase())
        } else {
            c == t
        };
        if hit {
            spans.push(range);
            wanted.next();
        }
    }

    if wanted.peek().is_none() {
        Some(spans)
    } else {
        None
    }
}

/// Split a byte line into display units: whole UTF-8 chars, or single
/// invalid bytes (reported with `None`).
fn char_units(line: &[u8]) -> impl Iterator<Item = (Range<usize>, Option<char>)> + '_ {
    let mut offset = 0;
    line.utf8_chunks().flat_map(move |chunk| {
        let base = offset;
        let valid = chunk.valid();
        let invalid = chunk.invalid();
        offset += valid.len() + invalid.len();

        let chars = valid
            .char_indices()
            .map(move |(i, c)| (base + i..base + i + c.len_utf8(), Some(c)));
        let invalid_base = base + valid.len();
        let bytes = (0..invalid.len()).map(move |i| (invalid_base + i..invalid_base + i + 1, None));
        chars.chain(bytes)
    })
}

/// Wrap every character inside `spans` in its own color escape/reset pair.
///
/// Bytes outside the spans pass through unchanged.
pub fn highlight(line: &[u8], spans: &[Range<usize>]) -> Vec<u8> {
    if spans.is_empty() {
        return line.to_vec();
    }

    let mut marked = vec![false; line.len()];
    for span in spans {
        let end = span.end.min(line.len());
        for m in marked.iter_mut().take(end).skip(span.start) {
            *m = true;
        }
    }

    let start = highlight_start();
    let mut out = Vec::with_capacity(line.len() * 4);
    for (range, _) in char_units(line) {
        if marked[range.start] {
            out.extend_from_slice(&start);
            out.extend_from_slice(&line[range]);
            out.extend_from_slice(HIGHLIGHT_END);
        } else {
            out.extend_from_slice(&line[range]);
        }
    }
    out
}

/// Render a snapshot into the lines observers see.
///
/// With a filter, only matching lines are kept and each one is highlighted;
/// without one, every line is rendered as is.
pub fn apply(filter: Option<&FilterSpec>, snapshot: &[ArcLogLine], show_timestamps: bool) -> Vec<Vec<u8>> {
    let rendered = snapshot.iter().map(|line| line.render(show_timestamps));
    match filter {
        None => rendered.collect(),
        Some(filter) => rendered
            .filter_map(|text| {
                let spans = filter.matches(&text)?;
                Some(highlight(&text, &spans))
            })
            .collect(),
    }
}
