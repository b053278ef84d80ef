//! Typed records exchanged by every stage after parsing.
//!
//! A [`Record`] is a common [`Prefix`] plus one [`Body`] variant per message
//! kind. The wire keyword is derived from the body, so a record can never
//! carry a keyword that disagrees with its payload.

use std::fmt;

/// Message kind, written as the bare first field of every line.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Keyword {
    None,
    Test,
    Result,
    Exception,
    Note,
    Debug,
    Trace,
    Version,
    Protocol,
    Input,
    Prompt,
    Value,
    Metric,
    Ticket,
    Argument,
    Tag,
    Attribute,
    Requirement,
    Specification,
    Example,
    Stop,
}

impl Keyword {
    pub const ALL: [Keyword; 21] = [
        Keyword::None,
        Keyword::Test,
        Keyword::Result,
        Keyword::Exception,
        Keyword::Note,
        Keyword::Debug,
        Keyword::Trace,
        Keyword::Version,
        Keyword::Protocol,
        Keyword::Input,
        Keyword::Prompt,
        Keyword::Value,
        Keyword::Metric,
        Keyword::Ticket,
        Keyword::Argument,
        Keyword::Tag,
        Keyword::Attribute,
        Keyword::Requirement,
        Keyword::Specification,
        Keyword::Example,
        Keyword::Stop,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::None => "NONE",
            Keyword::Test => "TEST",
            Keyword::Result => "RESULT",
            Keyword::Exception => "EXCEPTION",
            Keyword::Note => "NOTE",
            Keyword::Debug => "DEBUG",
            Keyword::Trace => "TRACE",
            Keyword::Version => "VERSION",
            Keyword::Protocol => "PROTOCOL",
            Keyword::Input => "INPUT",
            Keyword::Prompt => "PROMPT",
            Keyword::Value => "VALUE",
            Keyword::Metric => "METRIC",
            Keyword::Ticket => "TICKET",
            Keyword::Argument => "ARGUMENT",
            Keyword::Tag => "TAG",
            Keyword::Attribute => "ATTRIBUTE",
            Keyword::Requirement => "REQUIREMENT",
            Keyword::Specification => "SPECIFICATION",
            Keyword::Example => "EXAMPLE",
            Keyword::Stop => "STOP",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kw| kw.as_str() == raw)
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node kind. Declared in ascending rank so derived ordering matches
/// `Step < RetryIteration < Iteration < Outline < Test < Suite < Module`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum TestType {
    Step,
    RetryIteration,
    Iteration,
    Outline,
    #[default]
    Test,
    Suite,
    Module,
}

impl TestType {
    pub fn as_str(self) -> &'static str {
        match self {
            TestType::Step => "Step",
            TestType::RetryIteration => "RetryIteration",
            TestType::Iteration => "Iteration",
            TestType::Outline => "Outline",
            TestType::Test => "Test",
            TestType::Suite => "Suite",
            TestType::Module => "Module",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "Step" => TestType::Step,
            "RetryIteration" => TestType::RetryIteration,
            "Iteration" => TestType::Iteration,
            "Outline" => TestType::Outline,
            "Test" => TestType::Test,
            "Suite" => TestType::Suite,
            "Module" => TestType::Module,
            _ => return None,
        })
    }
}

/// Behavioural subtype of a node.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TestSubType {
    Book,
    Feature,
    Chapter,
    Scenario,
    Document,
    Section,
    Page,
    Example,
    Background,
    Recipe,
    Critical,
    Check,
    Major,
    Minor,
    Given,
    Paragraph,
    When,
    Then,
    And,
    But,
    By,
    Finally,
    Cleanup,
}

impl TestSubType {
    const ALL: [TestSubType; 23] = [
        TestSubType::Book,
        TestSubType::Feature,
        TestSubType::Chapter,
        TestSubType::Scenario,
        TestSubType::Document,
        TestSubType::Section,
        TestSubType::Page,
        TestSubType::Example,
        TestSubType::Background,
        TestSubType::Recipe,
        TestSubType::Critical,
        TestSubType::Check,
        TestSubType::Major,
        TestSubType::Minor,
        TestSubType::Given,
        TestSubType::Paragraph,
        TestSubType::When,
        TestSubType::Then,
        TestSubType::And,
        TestSubType::But,
        TestSubType::By,
        TestSubType::Finally,
        TestSubType::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TestSubType::Book => "Book",
            TestSubType::Feature => "Feature",
            TestSubType::Chapter => "Chapter",
            TestSubType::Scenario => "Scenario",
            TestSubType::Document => "Document",
            TestSubType::Section => "Section",
            TestSubType::Page => "Page",
            TestSubType::Example => "Example",
            TestSubType::Background => "Background",
            TestSubType::Recipe => "Recipe",
            TestSubType::Critical => "Critical",
            TestSubType::Check => "Check",
            TestSubType::Major => "Major",
            TestSubType::Minor => "Minor",
            TestSubType::Given => "Given",
            TestSubType::Paragraph => "Paragraph",
            TestSubType::When => "When",
            TestSubType::Then => "Then",
            TestSubType::And => "And",
            TestSubType::But => "But",
            TestSubType::By => "By",
            TestSubType::Finally => "Finally",
            TestSubType::Cleanup => "Cleanup",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.as_str() == raw)
    }
}

/// Hierarchical node path. The parent of a node is its id with the last
/// element removed; the empty id is the root.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TestId(Vec<u32>);

impl TestId {
    pub fn new(path: impl Into<Vec<u32>>) -> Self {
        Self(path.into())
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn parent(&self) -> Option<TestId> {
        let (_, head) = self.0.split_last()?;
        Some(Self(head.to_vec()))
    }

    pub fn child(&self, index: u32) -> TestId {
        let mut path = self.0.clone();
        path.push(index);
        Self(path)
    }

    /// True when `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &TestId) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }

    /// Wire form: elements joined with `/`.
    pub fn path(&self) -> String {
        self.0
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Accepts `0/1/2`, tolerating a leading separator.
    pub fn parse_path(raw: &str) -> Option<Self> {
        let raw = raw.strip_prefix('/').unwrap_or(raw);
        if raw.is_empty() {
            return Some(Self::root());
        }
        raw.split('/')
            .map(|part| part.parse::<u32>().ok())
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Node flag bitmask. Only the bits that stages act on are named here; all
/// others are carried through untouched.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct Flags(pub u64);

impl Flags {
    pub const SKIP: Flags = Flags(1 << 2);
    pub const NESTED_RETRY: Flags = Flags(1 << 43);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, other: Flags) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ResultType {
    Ok,
    Fail,
    Error,
    Null,
    Skip,
    XOk,
    XFail,
    XError,
    XNull,
}

impl ResultType {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultType::Ok => "OK",
            ResultType::Fail => "Fail",
            ResultType::Error => "Error",
            ResultType::Null => "Null",
            ResultType::Skip => "Skip",
            ResultType::XOk => "XOK",
            ResultType::XFail => "XFail",
            ResultType::XError => "XError",
            ResultType::XNull => "XNull",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "OK" => ResultType::Ok,
            "Fail" => ResultType::Fail,
            "Error" => ResultType::Error,
            "Null" => ResultType::Null,
            "Skip" => ResultType::Skip,
            "XOK" => ResultType::XOk,
            "XFail" => ResultType::XFail,
            "XError" => ResultType::XError,
            "XNull" => ResultType::XNull,
            _ => return None,
        })
    }

    /// Expected outcome (`X*`).
    pub fn is_expected(self) -> bool {
        matches!(
            self,
            ResultType::XOk | ResultType::XFail | ResultType::XError | ResultType::XNull
        )
    }

    pub fn is_failing(self) -> bool {
        matches!(self, ResultType::Fail | ResultType::Error | ResultType::Null)
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: String,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Requirement {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub priority: Option<String>,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Specification {
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ticket {
    pub name: String,
    pub link: Option<String>,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub uid: Option<String>,
}

/// Users share the ticket shape on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct User {
    pub name: String,
    pub link: Option<String>,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub units: String,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub uid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Value {
    pub name: String,
    pub value: String,
    pub kind: Option<String>,
    pub group: Option<String>,
    pub uid: Option<String>,
}

/// One row of an examples table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Example {
    pub row: u32,
    pub columns: Vec<String>,
    pub values: Vec<String>,
    pub row_format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExamplesTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub row_format: Option<String>,
}

impl ExamplesTable {
    pub fn examples(&self) -> impl Iterator<Item = Example> + '_ {
        self.rows.iter().enumerate().map(|(idx, row)| Example {
            row: u32::try_from(idx).unwrap_or(u32::MAX),
            columns: self.columns.clone(),
            values: row.clone(),
            row_format: self.row_format.clone(),
        })
    }
}

/// Graph node information attached to a test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub name: String,
    pub module: Option<String>,
    pub uid: Option<String>,
    pub nexts: Vec<String>,
    pub ins: Vec<String>,
    pub outs: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestBody {
    pub name: String,
    pub uid: Option<String>,
    pub description: Option<String>,
    pub attributes: Vec<Attribute>,
    pub requirements: Vec<Requirement>,
    pub arguments: Vec<Argument>,
    pub tags: Vec<Tag>,
    pub users: Vec<User>,
    pub tickets: Vec<Ticket>,
    pub examples: Option<ExamplesTable>,
    pub node: Option<Node>,
    pub map: Vec<Node>,
}

impl TestBody {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultBody {
    pub result_type: ResultType,
    pub message: Option<String>,
    pub reason: Option<String>,
    /// Full name of the test the result belongs to.
    pub test: String,
    pub metrics: Vec<Metric>,
    pub tickets: Vec<Ticket>,
    pub values: Vec<Value>,
}

impl ResultBody {
    pub fn new(result_type: ResultType, test: impl Into<String>) -> Self {
        Self {
            result_type,
            message: None,
            reason: None,
            test: test.into(),
            metrics: Vec::new(),
            tickets: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    None(String),
    Test(Box<TestBody>),
    Result(Box<ResultBody>),
    Exception(String),
    Note(String),
    Debug(String),
    Trace(String),
    Version(String),
    Protocol(String),
    Input(String),
    Prompt(String),
    Value(Value),
    Metric(Metric),
    Ticket(Ticket),
    Argument(Argument),
    Tag(Tag),
    Attribute(Attribute),
    Requirement(Requirement),
    Specification(Specification),
    Example(Example),
    Stop,
}

impl Body {
    pub fn keyword(&self) -> Keyword {
        match self {
            Body::None(_) => Keyword::None,
            Body::Test(_) => Keyword::Test,
            Body::Result(_) => Keyword::Result,
            Body::Exception(_) => Keyword::Exception,
            Body::Note(_) => Keyword::Note,
            Body::Debug(_) => Keyword::Debug,
            Body::Trace(_) => Keyword::Trace,
            Body::Version(_) => Keyword::Version,
            Body::Protocol(_) => Keyword::Protocol,
            Body::Input(_) => Keyword::Input,
            Body::Prompt(_) => Keyword::Prompt,
            Body::Value(_) => Keyword::Value,
            Body::Metric(_) => Keyword::Metric,
            Body::Ticket(_) => Keyword::Ticket,
            Body::Argument(_) => Keyword::Argument,
            Body::Tag(_) => Keyword::Tag,
            Body::Attribute(_) => Keyword::Attribute,
            Body::Requirement(_) => Keyword::Requirement,
            Body::Specification(_) => Keyword::Specification,
            Body::Example(_) => Keyword::Example,
            Body::Stop => Keyword::Stop,
        }
    }

    /// Free text of the text-only kinds.
    pub fn text(&self) -> Option<&str> {
        match self {
            Body::None(text)
            | Body::Exception(text)
            | Body::Note(text)
            | Body::Debug(text)
            | Body::Trace(text)
            | Body::Input(text)
            | Body::Prompt(text) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prefix {
    pub hash: String,
    pub sequence: u64,
    pub test_type: TestType,
    pub test_subtype: Option<TestSubType>,
    pub test_id: TestId,
    pub flags: Flags,
    pub cflags: Flags,
    pub stream: Option<String>,
    /// Seconds since the owning node started.
    pub relative_time: f64,
}

impl Default for Prefix {
    fn default() -> Self {
        Self {
            hash: String::new(),
            sequence: 0,
            test_type: TestType::Test,
            test_subtype: None,
            test_id: TestId::root(),
            flags: Flags::default(),
            cflags: Flags::default(),
            stream: None,
            relative_time: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub prefix: Prefix,
    pub body: Body,
}

impl Record {
    pub fn keyword(&self) -> Keyword {
        self.body.keyword()
    }

    pub fn test_id(&self) -> &TestId {
        &self.prefix.test_id
    }

    pub fn is_skipped(&self) -> bool {
        self.prefix.flags.contains(Flags::SKIP)
    }

    pub fn is_stop(&self) -> bool {
        matches!(self.body, Body::Stop)
    }
}
