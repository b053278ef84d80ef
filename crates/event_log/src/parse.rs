use serde_json::Value as Json;
use tracing::debug;

use crate::codec::{self, PREFIX_FIELDS};
use crate::error::ParseError;
use crate::record::{Flags, Keyword, Prefix, Record, TestId, TestSubType, TestType};

/// Decodes one line into a record.
///
/// Missing or `null` trailing payload fields take their defaults; a
/// malformed prefix or an unknown keyword is an error.
pub fn parse_record(line: &str) -> Result<Record, ParseError> {
    let line = line.trim_end_matches(|ch: char| ch == '\n' || ch == '\r');
    let Some((keyword, rest)) = line.split_once(',') else {
        return Err(ParseError::new(line, "missing field separator"));
    };
    let keyword = Keyword::parse(keyword)
        .ok_or_else(|| ParseError::new(line, format!("unknown keyword `{keyword}`")))?;

    let fields: Vec<Json> = serde_json::from_str(&format!("[{rest}]"))
        .map_err(|err| ParseError::new(line, err.to_string()))?;
    if fields.len() < PREFIX_FIELDS {
        return Err(ParseError::new(
            line,
            format!("expected {PREFIX_FIELDS} prefix fields, found {}", fields.len()),
        ));
    }

    let prefix =
        parse_prefix(&fields[..PREFIX_FIELDS]).map_err(|reason| ParseError::new(line, reason))?;
    let body = codec::decode_body(keyword, &fields[PREFIX_FIELDS..])
        .map_err(|reason| ParseError::new(line, reason))?;
    Ok(Record { prefix, body })
}

fn parse_prefix(fields: &[Json]) -> Result<Prefix, String> {
    let hash = fields[0]
        .as_str()
        .ok_or("hash is not a string")?
        .to_string();
    let sequence = fields[1].as_u64().ok_or("sequence is not an integer")?;

    let raw_type = fields[2].as_str().ok_or("test type is not a string")?;
    let test_type =
        TestType::parse(raw_type).ok_or_else(|| format!("unknown test type `{raw_type}`"))?;

    let test_subtype = match &fields[3] {
        Json::Null => None,
        Json::String(raw) => Some(
            TestSubType::parse(raw).ok_or_else(|| format!("unknown test subtype `{raw}`"))?,
        ),
        other => return Err(format!("test subtype is not a string: {other}")),
    };

    let raw_id = fields[4].as_str().ok_or("test id is not a string")?;
    let test_id = TestId::parse_path(raw_id).ok_or_else(|| format!("invalid test id `{raw_id}`"))?;

    let flags = Flags(fields[5].as_u64().ok_or("flags are not an integer")?);
    let cflags = Flags(fields[6].as_u64().ok_or("cflags are not an integer")?);

    let stream = match &fields[7] {
        Json::Null => None,
        Json::String(name) => Some(name.clone()),
        other => return Err(format!("stream is not a string: {other}")),
    };
    let relative_time = fields[8].as_f64().ok_or("relative time is not a number")?;

    Ok(Prefix {
        hash,
        sequence,
        test_type,
        test_subtype,
        test_id,
        flags,
        cflags,
        stream,
        relative_time,
    })
}

/// Lenient parser used by pipelines: malformed lines become `None` and are
/// counted instead of failing the stream.
#[derive(Debug, Default)]
pub struct RecordParser {
    dropped: u64,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(&mut self, line: &str) -> Option<Record> {
        match parse_record(line) {
            Ok(record) => Some(record),
            Err(err) => {
                self.dropped += 1;
                debug!(reason = %err.reason, dropped = self.dropped, "dropping malformed line");
                None
            }
        }
    }

    /// Lines dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Body, ResultType};

    #[test]
    fn parses_minimal_stop() {
        let record = parse_record(r#"STOP,"00aa11bb",7,"Module",null,"0",0,0,null,1.5"#)
            .expect("stop parses");
        assert!(record.is_stop());
        assert_eq!(record.prefix.sequence, 7);
        assert_eq!(record.prefix.test_type, TestType::Module);
        assert_eq!(record.prefix.test_id, TestId::new(vec![0]));
        assert_eq!(record.prefix.relative_time, 1.5);
    }

    #[test]
    fn missing_trailing_payload_fields_take_defaults() {
        let record = parse_record(r#"RESULT,"h",0,"Test","Scenario","0/1",4,0,"stdout",0.0,"Fail""#)
            .expect("result parses");
        assert_eq!(record.prefix.test_subtype, Some(TestSubType::Scenario));
        assert_eq!(record.prefix.stream.as_deref(), Some("stdout"));
        assert!(record.is_skipped());
        match record.body {
            Body::Result(result) => {
                assert_eq!(result.result_type, ResultType::Fail);
                assert_eq!(result.message, None);
                assert_eq!(result.test, "");
                assert!(result.metrics.is_empty());
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn text_kind_without_payload_is_empty() {
        let record = parse_record(r#"NOTE,"h",0,"Step","Given","0/1/2",0,0,null,0.0"#)
            .expect("note parses");
        assert_eq!(record.body, Body::Note(String::new()));
    }

    #[test]
    fn rejects_torn_and_unknown_lines() {
        assert!(parse_record(r#"NOTE,"h",0,"Step""#).is_err());
        assert!(parse_record(r#"NOTE,"h",0,"Step",null,"0",0,0,null,0.0,"unterminated"#).is_err());
        assert!(parse_record(r#"BOGUS,"h",0,"Test",null,"0",0,0,null,0.0"#).is_err());
        assert!(parse_record(r#"NOTE,"h",0,"Widget",null,"0",0,0,null,0.0"#).is_err());
        assert!(parse_record("").is_err());
    }

    #[test]
    fn lenient_parser_counts_drops() {
        let mut parser = RecordParser::new();
        assert!(parser.parse("not a record").is_none());
        assert!(parser
            .parse(r#"STOP,"h",0,"Test",null,"",0,0,null,0.0"#)
            .is_some());
        assert_eq!(parser.dropped(), 1);
    }
}
