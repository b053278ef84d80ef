use std::collections::HashMap;

use crate::config::RenderOptions;
use crate::error::LogError;
use crate::record::{
    Argument, Attribute, Body, Example, Keyword, Record, Requirement, ResultBody, Tag, TestBody,
    TestId, TestSubType, TestType,
};

use super::{
    basename, default_row_format, format_multiline, format_row, indent, indent_for, Palette,
    Renderer,
};

/// Compact tree view: one header line per test, one line per result,
/// metadata sections under their test.
///
/// Holds per-run context (tests seen so far, their children, the kind of
/// the last rendered record), so every pipeline run needs its own instance.
#[derive(Debug)]
pub struct ShortRenderer {
    options: RenderOptions,
    palette: Palette,
    subtypes: HashMap<TestId, Option<TestSubType>>,
    children: HashMap<TestId, Vec<TestId>>,
    last: Option<Keyword>,
}

impl ShortRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            options,
            palette: Palette::new(options.colors),
            subtypes: HashMap::new(),
            children: HashMap::new(),
            last: None,
        }
    }

    fn level(record: &Record) -> String {
        indent_for(record.test_id().depth().saturating_sub(1))
    }

    /// Repeated Given/When/Then style steps read as `And`.
    fn coalesce(
        &self,
        parent: &TestId,
        subtype: TestSubType,
        keyword: &'static str,
    ) -> &'static str {
        let siblings = self.children.get(parent).map_or(&[][..], Vec::as_slice);
        if let [.., prev, _current] = siblings {
            let same_role = self.subtypes.get(prev).copied().flatten() == Some(subtype);
            if same_role && !self.children.contains_key(prev) {
                return "And";
            }
        }
        let parent_role = self.subtypes.get(parent).copied().flatten();
        if parent_role == Some(subtype) && siblings.len() == 1 {
            return "And";
        }
        keyword
    }

    fn test_keyword(&self, record: &Record, parent: &TestId) -> &'static str {
        let subtype = record.prefix.test_subtype;
        if subtype == Some(TestSubType::Example) {
            return "Example";
        }
        match record.prefix.test_type {
            TestType::Module => "Module",
            TestType::Suite if subtype == Some(TestSubType::Feature) => "Feature",
            TestType::Suite => "Suite",
            TestType::Iteration => "Iteration",
            TestType::Outline => "Outline",
            TestType::Step => match subtype {
                Some(TestSubType::And) => "And",
                Some(role @ TestSubType::Given) => self.coalesce(parent, role, "Given"),
                Some(role @ TestSubType::When) => self.coalesce(parent, role, "When"),
                Some(role @ TestSubType::Then) => self.coalesce(parent, role, "Then"),
                Some(role @ TestSubType::By) => self.coalesce(parent, role, "By"),
                Some(role @ TestSubType::But) => self.coalesce(parent, role, "But"),
                Some(role @ TestSubType::Finally) => self.coalesce(parent, role, "Finally"),
                Some(role @ TestSubType::Background) => {
                    self.coalesce(parent, role, "Background")
                }
                _ => "Step",
            },
            _ if subtype == Some(TestSubType::Scenario) => "Scenario",
            _ => "Test",
        }
    }

    fn test(&mut self, record: &Record, test: &TestBody) -> String {
        let id = record.test_id().clone();
        let parent = id.parent().unwrap_or_default();
        self.children
            .entry(parent.clone())
            .or_default()
            .push(id.clone());
        self.subtypes.insert(id, record.prefix.test_subtype);

        let keyword = self.test_keyword(record, &parent);
        let level = Self::level(record);
        let mut out = format!(
            "{level}{} {}\n",
            self.palette.keyword(keyword),
            self.palette.name(basename(&test.name))
        );
        if let Some(description) = test.description.as_deref().filter(|d| !d.is_empty()) {
            out.push_str(&self.palette.dim(&format_multiline(description, &level)));
            out.push('\n');
        }
        out
    }

    fn result(&self, record: &Record, result: &ResultBody) -> String {
        let result_type = result.result_type;
        let level = Self::level(record);
        let mut out = format!(
            "{level}{}",
            self.palette.result(result_type, result_type.as_str())
        );
        let detail = if result_type.is_failing() {
            result
                .message
                .as_deref()
                .map(|message| format_multiline(message, &level).trim_start().to_string())
        } else if result_type.is_expected() {
            result.reason.clone()
        } else {
            return out + "\n";
        };
        out.push(' ');
        out.push_str(&self.palette.name(basename(&result.test)));
        if let Some(detail) = detail.filter(|d| !d.is_empty()) {
            out.push_str(&self.palette.name(","));
            out.push(' ');
            out.push_str(&self.palette.result(result_type, &detail));
        }
        out + "\n"
    }

    /// Section heading, printed when the previous rendered record was of
    /// another kind. The first rendered record gets none.
    fn section(&self, record: &Record, title: &str) -> Vec<String> {
        match self.last {
            Some(last) if last != record.keyword() => {}
            _ => return Vec::new(),
        }
        vec![format!(
            "{}  {}",
            Self::level(record),
            self.palette.secondary(title)
        )]
    }

    fn item(&self, record: &Record, extra: usize, text: &str) -> String {
        let prefix = format!("{}{}", Self::level(record), " ".repeat(extra));
        self.palette.dim(&indent(text, &prefix))
    }

    fn attribute(&self, record: &Record, attribute: &Attribute) -> String {
        let mut out = self.section(record, "Attributes");
        out.push(self.item(record, 4, &attribute.name));
        out.push(self.item(record, 6, &attribute.value));
        out.join("\n") + "\n"
    }

    fn argument(&self, record: &Record, argument: &Argument) -> String {
        let mut out = self.section(record, "Arguments");
        out.push(self.item(record, 4, &argument.name));
        out.push(self.item(record, 6, &argument.value));
        out.join("\n") + "\n"
    }

    fn requirement(&self, record: &Record, requirement: &Requirement) -> String {
        let mut out = self.section(record, "Requirements");
        out.push(self.item(record, 4, &requirement.name));
        if let Some(version) = &requirement.version {
            out.push(self.item(record, 6, &format!("version {version}")));
        }
        out.join("\n") + "\n"
    }

    fn tag(&self, record: &Record, tag: &Tag) -> String {
        let mut out = self.section(record, "Tags");
        out.push(self.item(record, 4, &tag.value));
        out.join("\n") + "\n"
    }

    fn example(&self, record: &Record, example: &Example) -> String {
        let row_format = example
            .row_format
            .clone()
            .unwrap_or_else(|| default_row_format(&example.columns, &example.values));
        let mut out = self.section(record, "Examples");
        if !out.is_empty() {
            let dashes: Vec<String> = example.columns.iter().map(|c| "-".repeat(c.len())).collect();
            let header = format!(
                "{}\n{}",
                format_row(&row_format, &example.columns),
                format_row(&row_format, &dashes)
            );
            out.push(self.item(record, 4, &header));
        }
        out.push(self.item(record, 4, &format_row(&row_format, &example.values)));
        out.join("\n") + "\n"
    }

    fn input(&self, record: &Record, message: &str) -> String {
        let level = indent_for(record.test_id().depth());
        let text = format!("\u{270b} {message}");
        format!("{level}{}\n", self.palette.input(&text))
    }
}

impl Renderer for ShortRenderer {
    fn render(&mut self, record: &Record) -> Result<Option<String>, LogError> {
        let handled = matches!(
            record.body,
            Body::Input(_)
                | Body::Test(_)
                | Body::Result(_)
                | Body::Attribute(_)
                | Body::Argument(_)
                | Body::Requirement(_)
                | Body::Tag(_)
                | Body::Example(_)
        );
        if !handled || (record.is_skipped() && !self.options.show_skipped) {
            return Ok(None);
        }

        let out = match &record.body {
            Body::Input(message) => self.input(record, message),
            Body::Test(test) => self.test(record, test),
            Body::Result(result) => self.result(record, result),
            Body::Attribute(attribute) => self.attribute(record, attribute),
            Body::Argument(argument) => self.argument(record, argument),
            Body::Requirement(requirement) => self.requirement(record, requirement),
            Body::Tag(tag) => self.tag(record, tag),
            Body::Example(example) => self.example(record, example),
            _ => return Ok(None),
        };
        self.last = Some(record.keyword());
        Ok(Some(out))
    }
}
