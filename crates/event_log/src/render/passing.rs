use std::collections::HashMap;

use owo_colors::Style;

use crate::config::RenderOptions;
use crate::error::LogError;
use crate::record::{Body, Record, ResultBody, ResultType, TestId, TestType};

use super::{format_time, Aggregator, Palette};

/// Collects `OK` and `Skip` results of iterations and larger nodes.
#[derive(Debug)]
pub struct PassingAggregator {
    options: RenderOptions,
    palette: Palette,
    divider: String,
    order: Vec<TestId>,
    results: HashMap<TestId, (ResultBody, f64)>,
}

impl PassingAggregator {
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
        matches!(result.result_type, ResultType::Ok | ResultType::Skip)
            && record.prefix.test_type >= TestType::Iteration
            && (self.options.show_skipped || !record.is_skipped())
    }
}

impl Aggregator for PassingAggregator {
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
        self.results
            .insert(id, (result.as_ref().clone(), record.prefix.relative_time));
        Ok(())
    }

    fn flush(&mut self) -> Result<String, LogError> {
        let mut passing = String::new();
        for (result, rtime) in self.order.iter().filter_map(|id| self.results.get(id)) {
            let kind = result.result_type;
            passing.push_str(&format!(
                "{} [ {} ] {}",
                self.palette.result(kind, "\u{2714}"),
                self.palette.result(kind, kind.as_str()),
                result.test
            ));
            if let Some(reason) = result.reason.as_deref().filter(|r| !r.is_empty()) {
                passing.push_str(&self.palette.dim(&format!(" \u{1405} {reason}")));
            }
            passing.push(' ');
            passing.push_str(&self.palette.dim(&format!("({})", format_time(*rtime))));
            passing.push('\n');
        }
        if passing.is_empty() {
            return Ok(passing);
        }
        let heading = self.palette.paint(
            &format!("{}Passing\n\n", self.divider),
            Style::new().white().bold(),
        );
        Ok(heading + &passing)
    }
}
