//! Line protocol.
//!
//! Each record is one line: the bare keyword, then the quoted hash, then
//! every other field as an individually encoded JSON value, comma-joined
//! without an enclosing array. Nested objects travel as positional arrays
//! and trailing `null`s are trimmed at every level.

use serde_json::Value as Json;
use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::config::{HashAlgorithm, HashConfig};
use crate::error::LogError;
use crate::record::{
    Argument, Attribute, Body, Example, ExamplesTable, Keyword, Metric, Node, Record, Requirement,
    ResultBody, ResultType, Specification, Tag, TestBody, Ticket, User, Value,
};

/// Version string carried by the `PROTOCOL` header record.
pub const PROTOCOL_VERSION: &str = "TFSPv2.1";

/// Number of prefix fields that follow the keyword.
pub(crate) const PREFIX_FIELDS: usize = 9;

/// Positional array encoding shared by nested objects and standalone
/// metadata records.
pub(crate) trait Positional: Sized {
    fn to_fields(&self) -> Vec<Json>;
    fn from_fields(fields: &[Json]) -> Result<Self, String>;
}

/// Encodes everything after the hash field: sequence through the last
/// non-null payload field.
pub fn encode_rest(record: &Record) -> String {
    let prefix = &record.prefix;
    let mut fields = vec![
        Json::from(prefix.sequence),
        Json::from(prefix.test_type.as_str()),
        opt_str(prefix.test_subtype.map(|st| st.as_str())),
        Json::from(prefix.test_id.path()),
        Json::from(prefix.flags.bits()),
        Json::from(prefix.cflags.bits()),
        opt_str(prefix.stream.as_deref()),
        Json::from(prefix.relative_time),
    ];
    fields.extend(trim(encode_body(&record.body)));
    join(&fields)
}

/// JSON has no spelling for NaN or infinity; such a field would decode as
/// `null` and the line would not read back.
pub(crate) fn check_finite(record: &Record) -> Result<(), LogError> {
    let finite = |field: &'static str, value: f64| {
        if value.is_finite() {
            Ok(())
        } else {
            Err(LogError::Encode { field, value })
        }
    };
    finite("relative_time", record.prefix.relative_time)?;
    let metrics: &[Metric] = match &record.body {
        Body::Metric(metric) => std::slice::from_ref(metric),
        Body::Result(result) => &result.metrics,
        _ => &[],
    };
    metrics
        .iter()
        .try_for_each(|metric| finite("metric value", metric.value))
}

pub fn join_line(keyword: Keyword, hash: &str, rest: &str) -> String {
    format!("{},{},{}", keyword.as_str(), Json::from(hash), rest)
}

/// Full line for a record whose hash is already known. No terminator.
pub fn encode_record(record: &Record) -> String {
    join_line(record.keyword(), &record.prefix.hash, &encode_rest(record))
}

/// Next link of the hash chain: `digest(prior + "," + KEYWORD + "," + rest)`
/// as lower-case hex truncated to `config.length`.
pub fn chain_hash(config: &HashConfig, prior: &str, keyword: Keyword, rest: &str) -> String {
    let input = [prior, ",", keyword.as_str(), ",", rest];
    let mut digest = match config.algorithm {
        HashAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            input.iter().for_each(|part| hasher.update(part.as_bytes()));
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            input.iter().for_each(|part| hasher.update(part.as_bytes()));
            hex::encode(hasher.finalize())
        }
    };
    digest.truncate(config.length);
    digest
}

/// Recomputes the chain over a sequence of lines from one node stream and
/// returns the index of the first line whose stored hash disagrees.
pub fn verify_chain<'a>(
    config: &HashConfig,
    lines: impl IntoIterator<Item = &'a str>,
) -> Option<usize> {
    let mut prior = String::new();
    for (idx, line) in lines.into_iter().enumerate() {
        let Some((keyword, hash, rest)) = split_head(line) else {
            return Some(idx);
        };
        let Some(keyword) = Keyword::parse(keyword) else {
            return Some(idx);
        };
        let expected = chain_hash(config, &prior, keyword, rest);
        if expected != hash {
            return Some(idx);
        }
        prior = expected;
    }
    None
}

/// Splits `KEYWORD,"hash",rest` into its three parts.
pub(crate) fn split_head(line: &str) -> Option<(&str, &str, &str)> {
    let (keyword, tail) = line.split_once(',')?;
    let tail = tail.strip_prefix('"')?;
    let (hash, rest) = tail.split_once("\",")?;
    Some((keyword, hash, rest))
}

pub(crate) fn encode_body(body: &Body) -> Vec<Json> {
    match body {
        Body::None(text)
        | Body::Exception(text)
        | Body::Note(text)
        | Body::Debug(text)
        | Body::Trace(text)
        | Body::Input(text)
        | Body::Prompt(text)
        | Body::Version(text)
        | Body::Protocol(text) => vec![Json::from(text.as_str())],
        Body::Test(test) => test.to_fields(),
        Body::Result(result) => result.to_fields(),
        Body::Value(value) => value.to_fields(),
        Body::Metric(metric) => metric.to_fields(),
        Body::Ticket(ticket) => ticket.to_fields(),
        Body::Argument(argument) => argument.to_fields(),
        Body::Tag(tag) => tag.to_fields(),
        Body::Attribute(attribute) => attribute.to_fields(),
        Body::Requirement(requirement) => requirement.to_fields(),
        Body::Specification(specification) => specification.to_fields(),
        Body::Example(example) => example.to_fields(),
        Body::Stop => Vec::new(),
    }
}

pub(crate) fn decode_body(keyword: Keyword, fields: &[Json]) -> Result<Body, String> {
    let text = || text_or_empty(field(fields, 0));
    Ok(match keyword {
        Keyword::None => Body::None(text()),
        Keyword::Exception => Body::Exception(text()),
        Keyword::Note => Body::Note(text()),
        Keyword::Debug => Body::Debug(text()),
        Keyword::Trace => Body::Trace(text()),
        Keyword::Input => Body::Input(text()),
        Keyword::Prompt => Body::Prompt(text()),
        Keyword::Version => Body::Version(text()),
        Keyword::Protocol => Body::Protocol(text()),
        Keyword::Test => Body::Test(Box::new(TestBody::from_fields(fields)?)),
        Keyword::Result => Body::Result(Box::new(ResultBody::from_fields(fields)?)),
        Keyword::Value => Body::Value(Value::from_fields(fields)?),
        Keyword::Metric => Body::Metric(Metric::from_fields(fields)?),
        Keyword::Ticket => Body::Ticket(Ticket::from_fields(fields)?),
        Keyword::Argument => Body::Argument(Argument::from_fields(fields)?),
        Keyword::Tag => Body::Tag(Tag::from_fields(fields)?),
        Keyword::Attribute => Body::Attribute(Attribute::from_fields(fields)?),
        Keyword::Requirement => Body::Requirement(Requirement::from_fields(fields)?),
        Keyword::Specification => Body::Specification(Specification::from_fields(fields)?),
        Keyword::Example => Body::Example(Example::from_fields(fields)?),
        Keyword::Stop => Body::Stop,
    })
}

fn join(fields: &[Json]) -> String {
    fields
        .iter()
        .map(Json::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn trim(mut fields: Vec<Json>) -> Vec<Json> {
    while fields.last().is_some_and(Json::is_null) {
        fields.pop();
    }
    fields
}

fn opt_str(value: Option<&str>) -> Json {
    value.map_or(Json::Null, Json::from)
}

fn opt(value: &Option<String>) -> Json {
    opt_str(value.as_deref())
}

fn strings(values: &[String]) -> Json {
    if values.is_empty() {
        Json::Null
    } else {
        Json::Array(values.iter().map(|v| Json::from(v.as_str())).collect())
    }
}

fn list<T: Positional>(items: &[T]) -> Json {
    if items.is_empty() {
        Json::Null
    } else {
        Json::Array(items.iter().map(nested).collect())
    }
}

fn nested<T: Positional>(item: &T) -> Json {
    Json::Array(trim(item.to_fields()))
}

static NULL: Json = Json::Null;

pub(crate) fn field(fields: &[Json], idx: usize) -> &Json {
    fields.get(idx).unwrap_or(&NULL)
}

/// Scalar as text; non-string scalars keep their JSON rendering.
fn text_of(value: &Json) -> Option<String> {
    match value {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn text_or_empty(value: &Json) -> String {
    text_of(value).unwrap_or_default()
}

fn required(fields: &[Json], idx: usize, name: &str) -> Result<String, String> {
    text_of(field(fields, idx)).ok_or_else(|| format!("missing {name}"))
}

fn optional(fields: &[Json], idx: usize) -> Option<String> {
    text_of(field(fields, idx))
}

fn string_list(value: &Json) -> Result<Vec<String>, String> {
    match value {
        Json::Null => Ok(Vec::new()),
        Json::Array(items) => Ok(items.iter().map(text_or_empty).collect()),
        other => Err(format!("expected list, found {other}")),
    }
}

fn list_of<T: Positional>(value: &Json) -> Result<Vec<T>, String> {
    match value {
        Json::Null => Ok(Vec::new()),
        Json::Array(items) => items.iter().map(nested_of).collect(),
        other => Err(format!("expected list, found {other}")),
    }
}

fn nested_of<T: Positional>(value: &Json) -> Result<T, String> {
    match value {
        Json::Array(fields) => T::from_fields(fields),
        other => Err(format!("expected positional array, found {other}")),
    }
}

fn optional_nested<T: Positional>(value: &Json) -> Result<Option<T>, String> {
    match value {
        Json::Null => Ok(None),
        other => nested_of(other).map(Some),
    }
}

impl Positional for TestBody {
    fn to_fields(&self) -> Vec<Json> {
        vec![
            Json::from(self.name.as_str()),
            opt(&self.uid),
            opt(&self.description),
            list(&self.attributes),
            list(&self.requirements),
            list(&self.arguments),
            list(&self.tags),
            list(&self.users),
            list(&self.tickets),
            self.examples.as_ref().map_or(Json::Null, nested),
            self.node.as_ref().map_or(Json::Null, nested),
            list(&self.map),
        ]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        Ok(Self {
            name: required(fields, 0, "test name")?,
            uid: optional(fields, 1),
            description: optional(fields, 2),
            attributes: list_of(field(fields, 3))?,
            requirements: list_of(field(fields, 4))?,
            arguments: list_of(field(fields, 5))?,
            tags: list_of(field(fields, 6))?,
            users: list_of(field(fields, 7))?,
            tickets: list_of(field(fields, 8))?,
            examples: optional_nested(field(fields, 9))?,
            node: optional_nested(field(fields, 10))?,
            map: list_of(field(fields, 11))?,
        })
    }
}

impl Positional for ResultBody {
    fn to_fields(&self) -> Vec<Json> {
        vec![
            Json::from(self.result_type.as_str()),
            opt(&self.message),
            opt(&self.reason),
            Json::from(self.test.as_str()),
            list(&self.metrics),
            list(&self.tickets),
            list(&self.values),
        ]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        let raw = required(fields, 0, "result type")?;
        let result_type =
            ResultType::parse(&raw).ok_or_else(|| format!("unknown result type `{raw}`"))?;
        Ok(Self {
            result_type,
            message: optional(fields, 1),
            reason: optional(fields, 2),
            test: optional(fields, 3).unwrap_or_default(),
            metrics: list_of(field(fields, 4))?,
            tickets: list_of(field(fields, 5))?,
            values: list_of(field(fields, 6))?,
        })
    }
}

/// Objects shaped `name, value, type, group, uid`.
macro_rules! named_value {
    ($ty:ty, $what:literal) => {
        impl Positional for $ty {
            fn to_fields(&self) -> Vec<Json> {
                vec![
                    Json::from(self.name.as_str()),
                    Json::from(self.value.as_str()),
                    opt(&self.kind),
                    opt(&self.group),
                    opt(&self.uid),
                ]
            }

            fn from_fields(fields: &[Json]) -> Result<Self, String> {
                Ok(Self {
                    name: required(fields, 0, $what)?,
                    value: text_or_empty(field(fields, 1)),
                    kind: optional(fields, 2),
                    group: optional(fields, 3),
                    uid: optional(fields, 4),
                })
            }
        }
    };
}

named_value!(Attribute, "attribute name");
named_value!(Argument, "argument name");
named_value!(Value, "value name");

/// Objects shaped `name, link, type, group, uid`.
macro_rules! named_link {
    ($ty:ty, $what:literal) => {
        impl Positional for $ty {
            fn to_fields(&self) -> Vec<Json> {
                vec![
                    Json::from(self.name.as_str()),
                    opt(&self.link),
                    opt(&self.kind),
                    opt(&self.group),
                    opt(&self.uid),
                ]
            }

            fn from_fields(fields: &[Json]) -> Result<Self, String> {
                Ok(Self {
                    name: required(fields, 0, $what)?,
                    link: optional(fields, 1),
                    kind: optional(fields, 2),
                    group: optional(fields, 3),
                    uid: optional(fields, 4),
                })
            }
        }
    };
}

named_link!(Ticket, "ticket name");
named_link!(User, "user name");

impl Positional for Metric {
    fn to_fields(&self) -> Vec<Json> {
        vec![
            Json::from(self.name.as_str()),
            Json::from(self.value),
            Json::from(self.units.as_str()),
            opt(&self.kind),
            opt(&self.group),
            opt(&self.uid),
        ]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        let value = field(fields, 1);
        let value = match value {
            Json::Null => 0.0,
            other => other
                .as_f64()
                .ok_or_else(|| format!("metric value is not a number: {other}"))?,
        };
        Ok(Self {
            name: required(fields, 0, "metric name")?,
            value,
            units: text_or_empty(field(fields, 2)),
            kind: optional(fields, 3),
            group: optional(fields, 4),
            uid: optional(fields, 5),
        })
    }
}

impl Positional for Tag {
    fn to_fields(&self) -> Vec<Json> {
        vec![Json::from(self.value.as_str())]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        Ok(Self {
            value: required(fields, 0, "tag value")?,
        })
    }
}

impl Positional for Requirement {
    fn to_fields(&self) -> Vec<Json> {
        vec![
            Json::from(self.name.as_str()),
            opt(&self.version),
            opt(&self.description),
            opt(&self.link),
            opt(&self.priority),
            opt(&self.kind),
            opt(&self.group),
            opt(&self.uid),
        ]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        Ok(Self {
            name: required(fields, 0, "requirement name")?,
            version: optional(fields, 1),
            description: optional(fields, 2),
            link: optional(fields, 3),
            priority: optional(fields, 4),
            kind: optional(fields, 5),
            group: optional(fields, 6),
            uid: optional(fields, 7),
        })
    }
}

impl Positional for Specification {
    fn to_fields(&self) -> Vec<Json> {
        vec![
            Json::from(self.name.as_str()),
            opt(&self.version),
            opt(&self.description),
            opt(&self.link),
            opt(&self.kind),
            opt(&self.group),
            opt(&self.uid),
        ]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        Ok(Self {
            name: required(fields, 0, "specification name")?,
            version: optional(fields, 1),
            description: optional(fields, 2),
            link: optional(fields, 3),
            kind: optional(fields, 4),
            group: optional(fields, 5),
            uid: optional(fields, 6),
        })
    }
}

impl Positional for Example {
    fn to_fields(&self) -> Vec<Json> {
        vec![
            Json::from(self.row),
            strings(&self.columns),
            strings(&self.values),
            opt(&self.row_format),
        ]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        let row = match field(fields, 0) {
            Json::Null => 0,
            other => other
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| format!("example row is not an index: {other}"))?,
        };
        Ok(Self {
            row,
            columns: string_list(field(fields, 1))?,
            values: string_list(field(fields, 2))?,
            row_format: optional(fields, 3),
        })
    }
}

impl Positional for ExamplesTable {
    fn to_fields(&self) -> Vec<Json> {
        let rows = if self.rows.is_empty() {
            Json::Null
        } else {
            Json::Array(self.rows.iter().map(|row| strings(row)).collect())
        };
        vec![strings(&self.columns), rows, opt(&self.row_format)]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        let rows = match field(fields, 1) {
            Json::Null => Vec::new(),
            Json::Array(rows) => rows.iter().map(string_list).collect::<Result<_, _>>()?,
            other => return Err(format!("expected example rows, found {other}")),
        };
        Ok(Self {
            columns: string_list(field(fields, 0))?,
            rows,
            row_format: optional(fields, 2),
        })
    }
}

impl Positional for Node {
    fn to_fields(&self) -> Vec<Json> {
        vec![
            Json::from(self.name.as_str()),
            opt(&self.module),
            opt(&self.uid),
            strings(&self.nexts),
            strings(&self.ins),
            strings(&self.outs),
        ]
    }

    fn from_fields(fields: &[Json]) -> Result<Self, String> {
        Ok(Self {
            name: required(fields, 0, "node name")?,
            module: optional(fields, 1),
            uid: optional(fields, 2),
            nexts: string_list(field(fields, 3))?,
            ins: string_list(field(fields, 4))?,
            outs: string_list(field(fields, 5))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Flags, Prefix, TestId, TestType};

    fn record(body: Body) -> Record {
        Record {
            prefix: Prefix {
                hash: "abcd0123".to_string(),
                sequence: 3,
                test_type: TestType::Test,
                test_id: TestId::new(vec![0, 1]),
                flags: Flags::SKIP,
                relative_time: 0.25,
                ..Prefix::default()
            },
            body,
        }
    }

    #[test]
    fn encodes_prefix_fields_in_order() {
        let line = encode_record(&record(Body::Note("hi".to_string())));
        assert_eq!(line, r#"NOTE,"abcd0123",3,"Test",null,"0/1",4,0,null,0.25,"hi""#);
    }

    #[test]
    fn stop_record_has_no_payload() {
        let line = encode_record(&record(Body::Stop));
        assert_eq!(line, r#"STOP,"abcd0123",3,"Test",null,"0/1",4,0,null,0.25"#);
    }

    #[test]
    fn trailing_nulls_are_trimmed_but_inner_nulls_stay() {
        let mut test = TestBody::named("/suite/t");
        test.tags.push(Tag {
            value: "smoke".to_string(),
        });
        let line = encode_record(&record(Body::Test(Box::new(test))));
        assert!(
            line.ends_with(r#",0.25,"/suite/t",null,null,null,null,null,[["smoke"]]"#),
            "{line}"
        );
    }

    #[test]
    fn nested_objects_trim_their_own_tails() {
        let attr = Attribute {
            name: "owner".to_string(),
            value: "qa".to_string(),
            ..Attribute::default()
        };
        assert_eq!(nested(&attr).to_string(), r#"["owner","qa"]"#);
    }

    #[test]
    fn chain_hash_depends_on_prior_and_keyword() {
        let config = HashConfig::default();
        let a = chain_hash(&config, "", Keyword::Note, "0");
        let b = chain_hash(&config, "x", Keyword::Note, "0");
        let c = chain_hash(&config, "", Keyword::Debug, "0");
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn sha256_hash_honours_length() {
        let config = HashConfig {
            algorithm: HashAlgorithm::Sha256,
            length: 12,
        };
        assert_eq!(chain_hash(&config, "", Keyword::Stop, "0").len(), 12);
    }

    #[test]
    fn verify_chain_finds_first_bad_link() {
        let config = HashConfig::default();
        let mut prior = String::new();
        let mut lines = Vec::new();
        for n in 0..3u64 {
            let mut rec = record(Body::Note(format!("line {n}")));
            rec.prefix.sequence = n;
            let rest = encode_rest(&rec);
            let hash = chain_hash(&config, &prior, Keyword::Note, &rest);
            lines.push(join_line(Keyword::Note, &hash, &rest));
            prior = hash;
        }
        assert_eq!(verify_chain(&config, lines.iter().map(String::as_str)), None);

        lines[1] = lines[1].replace("line 1", "line X");
        assert_eq!(
            verify_chain(&config, lines.iter().map(String::as_str)),
            Some(1)
        );
    }

    #[test]
    fn split_head_separates_keyword_and_hash() {
        assert_eq!(
            split_head(r#"STOP,"0011aabb",0,"Test""#),
            Some(("STOP", "0011aabb", r#"0,"Test""#))
        );
        assert_eq!(split_head("garbage"), None);
    }
}
