//! Renderer and aggregator stages.
//!
//! A [`Renderer`] answers every record with text or nothing. An
//! [`Aggregator`] only accumulates, and produces its report once through
//! [`Aggregator::flush`].

mod fails;
mod passing;
mod short;
mod totals;
mod version;

use owo_colors::{OwoColorize, Style};

use crate::error::LogError;
use crate::record::{Record, ResultType};

pub use fails::FailsAggregator;
pub use passing::PassingAggregator;
pub use short::ShortRenderer;
pub use totals::{Counts, TotalsAggregator, Unit};
pub use version::VersionAggregator;

/// Streaming, per-record stage.
pub trait Renderer {
    fn render(&mut self, record: &Record) -> Result<Option<String>, LogError>;
}

/// Batch stage reporting once at end of stream.
pub trait Aggregator {
    fn accumulate(&mut self, record: &Record) -> Result<(), LogError>;

    fn flush(&mut self) -> Result<String, LogError>;
}

/// ANSI styling that collapses to plain text when colors are off.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Palette {
    colors: bool,
}

impl Palette {
    pub(crate) fn new(colors: bool) -> Self {
        Self { colors }
    }

    pub(crate) fn paint(&self, text: &str, style: Style) -> String {
        if self.colors {
            text.style(style).to_string()
        } else {
            text.to_string()
        }
    }

    pub(crate) fn result(&self, result: ResultType, text: &str) -> String {
        self.paint(text, result_style(result))
    }

    pub(crate) fn keyword(&self, text: &str) -> String {
        self.paint(text, Style::new().white().bold())
    }

    pub(crate) fn secondary(&self, text: &str) -> String {
        self.paint(text, Style::new().white().bold().dimmed())
    }

    pub(crate) fn dim(&self, text: &str) -> String {
        self.paint(text, Style::new().white().dimmed())
    }

    pub(crate) fn input(&self, text: &str) -> String {
        self.paint(text, Style::new().yellow().bold())
    }

    pub(crate) fn name(&self, text: &str) -> String {
        self.paint(text, Style::new().white())
    }
}

fn result_style(result: ResultType) -> Style {
    let style = Style::new().bold();
    match result {
        ResultType::XOk | ResultType::XFail | ResultType::XError | ResultType::XNull => {
            style.blue()
        }
        ResultType::Ok => style.green(),
        ResultType::Skip => style.cyan(),
        ResultType::Error => style.yellow(),
        ResultType::Fail => style.red(),
        ResultType::Null => style.magenta(),
    }
}

/// Two spaces per level.
pub(crate) fn indent_for(levels: usize) -> String {
    "  ".repeat(levels)
}

/// Last `/` separated segment of a test name.
pub(crate) fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Removes the whitespace prefix shared by every non-blank line.
/// Whitespace-only lines become empty.
pub(crate) fn dedent(text: &str) -> String {
    let margin = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| &line[..line.len() - line.trim_start().len()])
        .reduce(|common, prefix| {
            let shared = common
                .char_indices()
                .zip(prefix.chars())
                .find(|((_, a), b)| a != b)
                .map_or(common.len().min(prefix.len()), |((idx, _), _)| idx);
            &common[..shared]
        })
        .unwrap_or("");

    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                line.strip_prefix(margin).unwrap_or(line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prefixes every non-blank line.
pub(crate) fn indent(text: &str, prefix: &str) -> String {
    text.split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Block text under a header: the first line is stripped, the rest is
/// dedented, and everything is indented by `prefix` plus two spaces.
pub(crate) fn format_multiline(text: &str, prefix: &str) -> String {
    let text = format!("{}\n", text.trim_end());
    let (first, rest) = text.split_once('\n').unwrap_or((text.as_str(), ""));
    let first = first.trim();
    let mut out = String::new();
    if !first.is_empty() {
        out.push_str(first);
        out.push('\n');
    }
    out.push_str(&dedent(rest.trim_end()));
    indent(out.trim_end(), &format!("{prefix}  "))
}

/// Human duration: `250ms`, `3s 20ms`, `4m 2s`, `1h 5m`.
pub(crate) fn format_time(seconds: f64) -> String {
    let total_ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };
    let (secs, ms) = (total_ms / 1000, total_ms % 1000);
    if secs == 0 {
        format!("{ms}ms")
    } else if secs < 60 {
        format!("{secs}s {ms}ms")
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    }
}

/// Minimal `%s` row formatter for example tables. Understands `%s`,
/// `%-Ns`, `%Ns` and `%%`; other text is copied through.
pub(crate) fn format_row(row_format: &str, values: &[String]) -> String {
    let mut out = String::new();
    let mut values = values.iter();
    let mut chars = row_format.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        let left = chars.next_if_eq(&'-').is_some();
        let mut width = String::new();
        while let Some(digit) = chars.next_if(char::is_ascii_digit) {
            width.push(digit);
        }
        if chars.next_if_eq(&'s').is_none() {
            out.push('%');
            if left {
                out.push('-');
            }
            out.push_str(&width);
            continue;
        }
        let width = width.parse::<usize>().unwrap_or(0);
        let value = values.next().map(String::as_str).unwrap_or("");
        if left {
            out.push_str(&format!("{value:<width$}"));
        } else {
            out.push_str(&format!("{value:>width$}"));
        }
    }
    out
}

/// One left-aligned column per field, sized from the header or the row,
/// whichever is longer in total, and never narrower than three.
pub(crate) fn default_row_format(columns: &[String], row: &[String]) -> String {
    let total = |cells: &[String]| cells.iter().map(String::len).sum::<usize>();
    let sample = if !row.is_empty() && total(columns) < total(row) {
        row
    } else {
        columns
    };
    sample
        .iter()
        .map(|cell| format!("%-{}s", cell.len().max(3)))
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiline_strips_first_line_and_dedents_rest() {
        let text = "  Summary line.\n      detail one\n        nested\n";
        assert_eq!(
            format_multiline(text, "  "),
            "    Summary line.\n    detail one\n      nested"
        );
    }

    #[test]
    fn multiline_with_blank_first_line() {
        assert_eq!(format_multiline("\n  a\n  b", ""), "  a\n  b");
    }

    #[test]
    fn time_formatting_scales_units() {
        assert_eq!(format_time(0.25), "250ms");
        assert_eq!(format_time(3.02), "3s 20ms");
        assert_eq!(format_time(242.0), "4m 2s");
        assert_eq!(format_time(3900.0), "1h 5m");
        assert_eq!(format_time(-1.0), "0ms");
    }

    #[test]
    fn rows_follow_the_widest_sample() {
        let columns = vec!["a".to_string(), "bee".to_string()];
        let row = vec!["long value".to_string(), "x".to_string()];
        let format = default_row_format(&columns, &row);
        assert_eq!(format, "%-10s | %-3s");
        assert_eq!(format_row(&format, &columns), "a          | bee");
        assert_eq!(format_row("%3s|%%", &["x".to_string()]), "  x|%");
    }

    #[test]
    fn palette_without_colors_is_plain() {
        let palette = Palette::new(false);
        assert_eq!(palette.result(ResultType::Fail, "Fail"), "Fail");
        assert!(Palette::new(true)
            .result(ResultType::Fail, "Fail")
            .contains("\u{1b}["));
    }

    #[test]
    fn basename_takes_last_segment() {
        assert_eq!(basename("/suite/test"), "test");
        assert_eq!(basename("plain"), "plain");
    }
}
