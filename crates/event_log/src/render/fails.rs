use std::collections::HashMap;

use owo_colors::Style;

use crate::config::RenderOptions;
use crate::error::LogError;
use crate::record::{Body, Flags, Record, ResultBody, ResultType, TestId, TestType};

use super::{Aggregator, Palette};

/// Collects unexpected and expected failures, reported in first-seen order.
///
/// A node reported more than once keeps its first position and its latest
/// result.
#[derive(Debug)]
pub struct FailsAggregator {
    options: RenderOptions,
    palette: Palette,
    divider: String,
    order: Vec<TestId>,
    results: HashMap<TestId, ResultBody>,
}

impl FailsAggregator {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            palette: Palette::new(options.colors),
            divider: "\n".to_string(),
            order: Vec::new(),
            results: HashMap::new(),
        }
    }

    pub fn with_divider(mut self, divider: impl Into<String>) -> Self {
        self.divider = divider.into();
        self
    }

    fn keep(&self, record: &Record, result: &ResultBody) -> bool {
        let kind = result.result_type;
        if matches!(kind, ResultType::Ok | ResultType::Skip) {
            return false;
        }
        if record.prefix.test_type < TestType::Iteration && !kind.is_expected() {
            return false;
        }
        if record.is_skipped() && !self.options.show_skipped {
            return false;
        }
        // retried attempts are summarised by the retry itself
        !(kind.is_failing() && record.prefix.cflags.contains(Flags::NESTED_RETRY))
    }

    fn entry(&self, result: &ResultBody, detail: Option<String>) -> String {
        let kind = result.result_type;
        let mut out = format!(
            "{} [ {} ] {}",
            self.palette.result(kind, "\u{2718}"),
            self.palette.result(kind, kind.as_str()),
            result.test
        );
        if let Some(detail) = detail {
            out.push_str(&detail);
        }
        out.push('\n');
        out
    }

    fn heading(&self, text: &str) -> String {
        self.palette.paint(text, Style::new().white().bold())
    }
}

impl Aggregator for FailsAggregator {
    fn accumulate(&mut self, record: &Record) -> Result<(), LogError> {
        let Body::Result(result) = &record.body else {
            return Ok(());
        };
        if !self.keep(record, result) {
            return Ok(());
        }
        let id = record.test_id().clone();
        if !self.results.contains_key(&id) {
            self.order.push(id.clone());
        }
        self.results.insert(id, result.as_ref().clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<String, LogError> {
        let mut known = String::new();
        let mut failing = String::new();
        for result in self.order.iter().filter_map(|id| self.results.get(id)) {
            if result.result_type.is_expected() {
                let reason = result
                    .reason
                    .as_deref()
                    .filter(|r| !r.is_empty())
                    .map(|r| self.palette.dim(&format!(" \u{1405} {r}")));
                known.push_str(&self.entry(result, reason));
            } else {
                let message = result
                    .message
                    .as_deref()
                    .and_then(|m| m.lines().map(str::trim).find(|l| !l.is_empty()))
                    .map(|m| format!(", {}", self.palette.dim(m)));
                failing.push_str(&self.entry(result, message));
            }
        }

        let mut out = String::new();
        if !known.is_empty() {
            out.push_str(&self.heading("\nKnown\n\n"));
            out.push_str(&known);
        }
        if !failing.is_empty() {
            out.push_str(&self.heading(&format!("{}Failing\n\n", self.divider)));
            out.push_str(&failing);
        }
        Ok(out)
    }
}
