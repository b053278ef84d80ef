//! Pre-parse content filter.
//!
//! Matching runs on the raw encoded line, before any structural parse.

use std::io::Read;

use regex::bytes::Regex;
use tracing::debug;

use crate::error::LogError;
use crate::reader::{BoundedLine, BoundedLines};
use crate::record::{Keyword, TestId};
use crate::stop::StopFlag;

/// Prefix fields up to (not including) the id: keyword, hash, sequence,
/// type and subtype.
const PREFIX_BEFORE_ID: &str = r#"^[A-Z]+,"[^"]*",[0-9]+,"[A-Za-z]+",(?:null|"[A-Za-z]+"),"#;

#[derive(Debug, Clone)]
pub enum LinePattern {
    Any,
    Substring(Vec<u8>),
    Regex(Regex),
}

impl LinePattern {
    pub fn substring(needle: impl Into<Vec<u8>>) -> Self {
        Self::Substring(needle.into())
    }

    pub fn regex(pattern: &str) -> Result<Self, LogError> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    /// Lines whose keyword is one of `keywords`.
    pub fn keywords(keywords: &[Keyword]) -> Result<Self, LogError> {
        let alternatives = keywords
            .iter()
            .map(|kw| kw.as_str())
            .collect::<Vec<_>>()
            .join("|");
        Self::regex(&format!("^(?:{alternatives}),"))
    }

    /// Lines of the node `id` and of its descendants.
    pub fn test_id(id: &TestId) -> Result<Self, LogError> {
        let path = regex::escape(&id.path());
        let pattern = if id.is_root() {
            format!(r#"{PREFIX_BEFORE_ID}"[0-9/]*","#)
        } else {
            format!(r#"{PREFIX_BEFORE_ID}"{path}(?:/[0-9]+)*","#)
        };
        Self::regex(&pattern)
    }

    pub fn is_match(&self, line: &[u8]) -> bool {
        match self {
            LinePattern::Any => true,
            LinePattern::Substring(needle) => {
                needle.is_empty() || line.windows(needle.len()).any(|window| window == needle)
            }
            LinePattern::Regex(regex) => regex.is_match(line),
        }
    }
}

/// Recognises the STOP sentinel.
#[derive(Debug, Clone)]
pub struct StopMarker {
    target: Option<Regex>,
}

impl StopMarker {
    /// Any STOP record.
    pub fn any() -> Self {
        Self { target: None }
    }

    /// STOP record of exactly the node `id`.
    pub fn for_test(id: &TestId) -> Result<Self, LogError> {
        let path = regex::escape(&id.path());
        let target = Regex::new(&format!(r#"{PREFIX_BEFORE_ID}"{path}","#))?;
        Ok(Self {
            target: Some(target),
        })
    }

    pub fn is_stop(&self, line: &[u8]) -> bool {
        if !line.starts_with(b"STOP,") {
            return false;
        }
        self.target
            .as_ref()
            .map_or(true, |target| target.is_match(line))
    }
}

/// A line that passed the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredLine {
    pub line: String,
    /// Position of the line's first byte in the decoded stream.
    pub offset: u64,
}

/// Counters for lines the filter discarded before matching.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct FilterStats {
    pub emitted: u64,
    pub too_long: u64,
    pub invalid_utf8: u64,
}

/// Emits matching lines and raises the shared stop flag once the stop
/// marker has been emitted.
pub struct ContentFilter<R: Read> {
    lines: BoundedLines<R>,
    pattern: LinePattern,
    stop_marker: StopMarker,
    stop: StopFlag,
    stats: FilterStats,
}

impl<R: Read> ContentFilter<R> {
    pub fn new(
        lines: BoundedLines<R>,
        pattern: LinePattern,
        stop_marker: StopMarker,
        stop: StopFlag,
    ) -> Self {
        Self {
            lines,
            pattern,
            stop_marker,
            stop,
            stats: FilterStats::default(),
        }
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    fn line_is_blank(line: &[u8]) -> bool {
        line.iter().all(|b| b.is_ascii_whitespace())
    }
}

impl<R: Read> Iterator for ContentFilter<R> {
    type Item = Result<FilteredLine, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.stop.is_set() {
                return None;
            }
            match self.lines.next()? {
                BoundedLine::ReadError { error, .. } => return Some(Err(error)),
                BoundedLine::LineTooLong {
                    offset,
                    observed_bytes,
                    max_line_bytes,
                } => {
                    self.stats.too_long += 1;
                    debug!(offset, observed_bytes, max_line_bytes, "skipping oversized line");
                }
                BoundedLine::Line { offset, mut bytes } => {
                    if bytes.last() == Some(&b'\r') {
                        bytes.pop();
                    }
                    if Self::line_is_blank(&bytes) || !self.pattern.is_match(&bytes) {
                        continue;
                    }
                    let is_stop = self.stop_marker.is_stop(&bytes);
                    let Ok(line) = String::from_utf8(bytes) else {
                        self.stats.invalid_utf8 += 1;
                        debug!(offset, "skipping line that is not valid UTF-8");
                        continue;
                    };
                    self.stats.emitted += 1;
                    if is_stop {
                        debug!(offset, "stop marker observed");
                        self.stop.set();
                    }
                    return Some(Ok(FilteredLine { line, offset }));
                }
            }
        }
    }
}
