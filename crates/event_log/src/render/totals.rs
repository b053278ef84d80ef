use owo_colors::Style;

use crate::config::RenderOptions;
use crate::error::LogError;
use crate::record::{Body, Flags, Record, ResultType, TestSubType, TestType};

use super::{format_time, Aggregator, Palette};

/// Counted unit kind, in report order.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Unit {
    Module,
    Book,
    Suite,
    Feature,
    Chapter,
    Test,
    Scenario,
    Check,
    Critical,
    Major,
    Minor,
    Recipe,
    Document,
    Page,
    Section,
    Example,
    Outline,
    Iteration,
    Retry,
    Paragraph,
    Step,
}

impl Unit {
    pub const ALL: [Unit; 21] = [
        Unit::Module,
        Unit::Book,
        Unit::Suite,
        Unit::Feature,
        Unit::Chapter,
        Unit::Test,
        Unit::Scenario,
        Unit::Check,
        Unit::Critical,
        Unit::Major,
        Unit::Minor,
        Unit::Recipe,
        Unit::Document,
        Unit::Page,
        Unit::Section,
        Unit::Example,
        Unit::Outline,
        Unit::Iteration,
        Unit::Retry,
        Unit::Paragraph,
        Unit::Step,
    ];

    /// Unit a node of this type and subtype counts towards.
    pub fn classify(test_type: TestType, subtype: Option<TestSubType>) -> Unit {
        if subtype == Some(TestSubType::Example) {
            return Unit::Example;
        }
        match (test_type, subtype) {
            (TestType::Module, Some(TestSubType::Book)) => Unit::Book,
            (TestType::Module, _) => Unit::Module,
            (TestType::Suite, Some(TestSubType::Feature)) => Unit::Feature,
            (TestType::Suite, Some(TestSubType::Chapter)) => Unit::Chapter,
            (TestType::Suite, _) => Unit::Suite,
            (TestType::Outline, _) => Unit::Outline,
            (TestType::Iteration, _) => Unit::Iteration,
            (TestType::RetryIteration, _) => Unit::Retry,
            (TestType::Step, Some(TestSubType::Paragraph)) => Unit::Paragraph,
            (TestType::Step, _) => Unit::Step,
            (TestType::Test, Some(TestSubType::Scenario)) => Unit::Scenario,
            (TestType::Test, Some(TestSubType::Check)) => Unit::Check,
            (TestType::Test, Some(TestSubType::Critical)) => Unit::Critical,
            (TestType::Test, Some(TestSubType::Major)) => Unit::Major,
            (TestType::Test, Some(TestSubType::Minor)) => Unit::Minor,
            (TestType::Test, Some(TestSubType::Recipe)) => Unit::Recipe,
            (TestType::Test, Some(TestSubType::Document)) => Unit::Document,
            (TestType::Test, Some(TestSubType::Page)) => Unit::Page,
            (TestType::Test, Some(TestSubType::Section)) => Unit::Section,
            (TestType::Test, _) => Unit::Test,
        }
    }

    /// `(singular, plural)` display names.
    pub fn names(self) -> (&'static str, &'static str) {
        match self {
            Unit::Module => ("module", "modules"),
            Unit::Book => ("book", "books"),
            Unit::Suite => ("suite", "suites"),
            Unit::Feature => ("feature", "features"),
            Unit::Chapter => ("chapter", "chapters"),
            Unit::Test => ("test", "tests"),
            Unit::Scenario => ("scenario", "scenarios"),
            Unit::Check => ("check", "checks"),
            Unit::Critical => ("critical", "critical"),
            Unit::Major => ("major", "major"),
            Unit::Minor => ("minor", "minor"),
            Unit::Recipe => ("recipe", "recipes"),
            Unit::Document => ("document", "documents"),
            Unit::Page => ("page", "pages"),
            Unit::Section => ("section", "sections"),
            Unit::Example => ("example", "examples"),
            Unit::Outline => ("outline", "outlines"),
            Unit::Iteration => ("iteration", "iterations"),
            Unit::Retry => ("retry", "retries"),
            Unit::Paragraph => ("paragraph", "paragraphs"),
            Unit::Step => ("step", "steps"),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Result columns, in report order. The last one counts failing results
/// of nodes running under a retry.
const TALLIES: [(&str, Option<ResultType>); 10] = [
    ("OK", Some(ResultType::Ok)),
    ("Fail", Some(ResultType::Fail)),
    ("Skip", Some(ResultType::Skip)),
    ("Error", Some(ResultType::Error)),
    ("Null", Some(ResultType::Null)),
    ("XOK", Some(ResultType::XOk)),
    ("XFail", Some(ResultType::XFail)),
    ("XError", Some(ResultType::XError)),
    ("XNull", Some(ResultType::XNull)),
    ("Retried", None),
];

const RETRIED: usize = TALLIES.len() - 1;

fn tally_index(result: ResultType, retried: bool) -> usize {
    if retried && result.is_failing() {
        return RETRIED;
    }
    TALLIES
        .iter()
        .position(|(_, kind)| *kind == Some(result))
        .unwrap_or(RETRIED)
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct Counts {
    pub units: u64,
    results: [u64; TALLIES.len()],
}

impl Counts {
    pub fn result(&self, result: ResultType) -> u64 {
        self.results[tally_index(result, false)]
    }

    pub fn retried(&self) -> u64 {
        self.results[RETRIED]
    }

    fn is_empty(&self) -> bool {
        self.units == 0 && self.results.iter().all(|n| *n == 0)
    }
}

/// Per unit counts of declared nodes and of their results.
#[derive(Debug)]
pub struct TotalsAggregator {
    options: RenderOptions,
    palette: Palette,
    divider: String,
    counts: [Counts; Unit::ALL.len()],
    last_time: f64,
}

impl TotalsAggregator {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            palette: Palette::new(options.colors),
            divider: "\n".to_string(),
            counts: [Counts::default(); Unit::ALL.len()],
            last_time: 0.0,
        }
    }

    /// Text written before the report, a blank line by default.
    pub fn with_divider(mut self, divider: impl Into<String>) -> Self {
        self.divider = divider.into();
        self
    }

    pub fn counts(&self, unit: Unit) -> Counts {
        self.counts[unit.index()]
    }

    fn line(&self, unit: Unit, counts: &Counts) -> String {
        let (singular, plural) = unit.names();
        let name = if counts.units == 1 { singular } else { plural };
        let bold = Style::new().white().bold();
        let mut out = self.palette.paint(&format!("{} {name}", counts.units), bold);

        let results: Vec<String> = TALLIES
            .iter()
            .zip(counts.results)
            .filter(|(_, n)| *n > 0)
            .map(|((label, kind), n)| {
                let text = format!("{n} {label}");
                match kind {
                    Some(ResultType::Skip) => self.palette.dim(&text),
                    Some(kind) => self.palette.result(*kind, &text),
                    None => self.palette.paint(&text, Style::new().cyan().bold()),
                }
            })
            .collect();
        if !results.is_empty() {
            out.push_str(&self.palette.paint(" (", bold));
            let comma = self.palette.paint(", ", bold);
            out.push_str(&results.join(comma.as_str()));
            out.push_str(&self.palette.paint(")", bold));
        }
        out.push('\n');
        out
    }
}

impl Aggregator for TotalsAggregator {
    fn accumulate(&mut self, record: &Record) -> Result<(), LogError> {
        self.last_time = record.prefix.relative_time;
        if record.is_skipped() && !self.options.show_skipped {
            return Ok(());
        }
        let unit = Unit::classify(record.prefix.test_type, record.prefix.test_subtype);
        let counts = &mut self.counts[unit.index()];
        match &record.body {
            Body::Test(_) => counts.units += 1,
            Body::Result(result) => {
                let retried = record.prefix.cflags.contains(Flags::NESTED_RETRY);
                counts.results[tally_index(result.result_type, retried)] += 1;
            }
            _ => {}
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<String, LogError> {
        let mut out = self.divider.clone();
        for unit in Unit::ALL {
            let counts = self.counts[unit.index()];
            if !counts.is_empty() {
                out.push_str(&self.line(unit, &counts));
            }
        }
        out.push_str(
            &self
                .palette
                .dim(&format!("\nTotal time {}\n", format_time(self.last_time))),
        );
        Ok(out)
    }
}
