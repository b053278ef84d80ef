//! Producer side of the log.
//!
//! One [`LogFile`] is shared by every running node. Each node owns a
//! [`NodeWriter`] holding its prefix, rolling hash and sequence counter;
//! every emitted record is exactly one locked append of one complete line.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::debug;
use xz2::stream::{Check, Stream};
use xz2::write::XzEncoder;

use crate::codec::{self, PROTOCOL_VERSION};
use crate::config::{HashConfig, WriterConfig};
use crate::error::LogError;
use crate::record::{
    Body, Flags, Metric, Prefix, Record, ResultBody, Specification, TestBody, TestId,
    TestSubType, TestType, Ticket, Value,
};
use crate::stream::ValidatedStreamName;

type BoxedWrite = Box<dyn Write + Send>;

enum Target {
    Plain(BoxedWrite),
    Xz(XzEncoder<BoxedWrite>),
    Finished,
}

/// The single shared append target.
pub struct LogFile {
    target: Mutex<Target>,
}

impl std::fmt::Debug for LogFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogFile").finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LogFile {
    /// Creates (truncating) `path`, compressed when `config.compress` is set.
    pub fn create(path: impl AsRef<Path>, config: &WriterConfig) -> Result<Self, LogError> {
        let file = File::create(path.as_ref())?;
        if config.compress {
            Self::compressed(file, config.compression_level)
        } else {
            Ok(Self::from_writer(file))
        }
    }

    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            target: Mutex::new(Target::Plain(Box::new(writer))),
        }
    }

    /// Wraps `writer` in an xz stream. Every appended line is followed by a
    /// full flush so a tailing reader can decode it immediately. `level`
    /// must be an xz preset, 0 through 9.
    pub fn compressed(writer: impl Write + Send + 'static, level: u32) -> Result<Self, LogError> {
        let stream = Stream::new_easy_encoder(level, Check::Crc64)
            .map_err(|source| LogError::Encoder { level, source })?;
        let writer: BoxedWrite = Box::new(writer);
        Ok(Self {
            target: Mutex::new(Target::Xz(XzEncoder::new_stream(writer, stream))),
        })
    }

    /// Appends `line` plus the terminator as one write.
    pub fn append_line(&self, line: &str) -> Result<(), LogError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        let mut target = lock(&self.target);
        match &mut *target {
            Target::Plain(writer) => {
                writer.write_all(&buf)?;
                writer.flush()?;
            }
            Target::Xz(writer) => {
                writer.write_all(&buf)?;
                writer.flush()?;
            }
            Target::Finished => {
                return Err(LogError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "event log already finished",
                )))
            }
        }
        Ok(())
    }

    /// Finalises the compressed stream (if any). Later appends fail.
    pub fn finish(&self) -> Result<(), LogError> {
        let mut target = lock(&self.target);
        match std::mem::replace(&mut *target, Target::Finished) {
            Target::Plain(mut writer) => writer.flush()?,
            Target::Xz(writer) => {
                let mut inner = writer.finish()?;
                inner.flush()?;
            }
            Target::Finished => {}
        }
        Ok(())
    }
}

/// Static part of a node's prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfo {
    pub test_type: TestType,
    pub test_subtype: Option<TestSubType>,
    pub test_id: TestId,
    pub flags: Flags,
    pub cflags: Flags,
}

impl NodeInfo {
    pub fn new(test_type: TestType, test_id: TestId) -> Self {
        Self {
            test_type,
            test_id,
            ..Self::default()
        }
    }

    pub fn with_subtype(mut self, subtype: TestSubType) -> Self {
        self.test_subtype = Some(subtype);
        self
    }

    pub fn with_flags(mut self, flags: Flags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_cflags(mut self, cflags: Flags) -> Self {
        self.cflags = cflags;
        self
    }
}

#[derive(Debug, Default)]
struct Chain {
    prior: String,
    sequence: u64,
}

/// Emitter for one running node.
///
/// The hash chain and sequence are seeded fresh when the writer is created
/// and advance once per emitted record.
#[derive(Debug)]
pub struct NodeWriter {
    file: Arc<LogFile>,
    node: NodeInfo,
    hash: HashConfig,
    time_resolution: u32,
    started: Instant,
    chain: Mutex<Chain>,
}

impl NodeWriter {
    pub fn new(file: Arc<LogFile>, node: NodeInfo, config: &WriterConfig) -> Self {
        Self {
            file,
            node,
            hash: config.hash,
            time_resolution: config.time_resolution,
            started: Instant::now(),
            chain: Mutex::new(Chain::default()),
        }
    }

    pub fn node(&self) -> &NodeInfo {
        &self.node
    }

    /// Encodes `body` at `relative_time`, advances the chain and appends the
    /// line. Returns the line without its terminator.
    pub fn encode(
        &self,
        body: Body,
        relative_time: f64,
        stream: Option<&ValidatedStreamName>,
    ) -> Result<String, LogError> {
        let mut chain = lock(&self.chain);
        let record = Record {
            prefix: Prefix {
                hash: String::new(),
                sequence: chain.sequence,
                test_type: self.node.test_type,
                test_subtype: self.node.test_subtype,
                test_id: self.node.test_id.clone(),
                flags: self.node.flags,
                cflags: self.node.cflags,
                stream: stream.map(|name| name.as_str().to_string()),
                relative_time: round_time(relative_time, self.time_resolution),
            },
            body,
        };
        codec::check_finite(&record)?;
        let keyword = record.keyword();
        let rest = codec::encode_rest(&record);
        let hash = codec::chain_hash(&self.hash, &chain.prior, keyword, &rest);
        let line = codec::join_line(keyword, &hash, &rest);

        self.file.append_line(&line)?;
        chain.prior = hash;
        chain.sequence += 1;
        Ok(line)
    }

    /// Emits `body` timestamped relative to this writer's creation.
    pub fn emit(&self, body: Body) -> Result<String, LogError> {
        self.encode(body, self.elapsed(), None)
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn protocol(&self) -> Result<(), LogError> {
        self.emit(Body::Protocol(PROTOCOL_VERSION.to_string()))
            .map(drop)
    }

    pub fn version(&self, version: &str) -> Result<(), LogError> {
        self.emit(Body::Version(version.to_string())).map(drop)
    }

    /// Emits the TEST record followed by one record per attached attribute,
    /// requirement, argument, tag and example row.
    pub fn test(&self, test: TestBody) -> Result<(), LogError> {
        let attributes = test.attributes.clone();
        let requirements = test.requirements.clone();
        let arguments = test.arguments.clone();
        let tags = test.tags.clone();
        let examples: Vec<_> = test
            .examples
            .as_ref()
            .map(|table| table.examples().collect())
            .unwrap_or_default();

        self.emit(Body::Test(Box::new(test)))?;
        for attribute in attributes {
            self.emit(Body::Attribute(attribute))?;
        }
        for requirement in requirements {
            self.emit(Body::Requirement(requirement))?;
        }
        for argument in arguments {
            self.emit(Body::Argument(argument))?;
        }
        for tag in tags {
            self.emit(Body::Tag(tag))?;
        }
        for example in examples {
            self.emit(Body::Example(example))?;
        }
        Ok(())
    }

    pub fn result(&self, result: ResultBody) -> Result<(), LogError> {
        self.emit(Body::Result(Box::new(result))).map(drop)
    }

    pub fn note(&self, message: impl Into<String>) -> Result<(), LogError> {
        self.emit(Body::Note(message.into())).map(drop)
    }

    pub fn debug(&self, message: impl Into<String>) -> Result<(), LogError> {
        self.emit(Body::Debug(message.into())).map(drop)
    }

    pub fn trace(&self, message: impl Into<String>) -> Result<(), LogError> {
        self.emit(Body::Trace(message.into())).map(drop)
    }

    pub fn exception(&self, message: impl Into<String>) -> Result<(), LogError> {
        self.emit(Body::Exception(message.into())).map(drop)
    }

    pub fn input(&self, message: impl Into<String>) -> Result<(), LogError> {
        self.emit(Body::Input(message.into())).map(drop)
    }

    pub fn prompt(&self, message: impl Into<String>) -> Result<(), LogError> {
        self.emit(Body::Prompt(message.into())).map(drop)
    }

    pub fn value(&self, value: Value) -> Result<(), LogError> {
        self.emit(Body::Value(value)).map(drop)
    }

    pub fn metric(&self, metric: Metric) -> Result<(), LogError> {
        self.emit(Body::Metric(metric)).map(drop)
    }

    pub fn ticket(&self, ticket: Ticket) -> Result<(), LogError> {
        self.emit(Body::Ticket(ticket)).map(drop)
    }

    pub fn specification(&self, specification: Specification) -> Result<(), LogError> {
        self.emit(Body::Specification(specification)).map(drop)
    }

    pub fn stop(&self) -> Result<(), LogError> {
        self.emit(Body::Stop).map(drop)
    }

    /// Opens a named sub-stream whose complete lines become `NONE` records.
    pub fn stream(&self, name: &str) -> Result<StreamWriter<'_>, LogError> {
        let name = ValidatedStreamName::new(name)
            .ok_or_else(|| LogError::InvalidStreamName(name.to_string()))?;
        Ok(StreamWriter {
            writer: self,
            name,
            buffer: LineBuffer::default(),
        })
    }
}

fn round_time(seconds: f64, resolution: u32) -> f64 {
    let scale = 10f64.powi(i32::try_from(resolution).unwrap_or(i32::MAX).min(15));
    (seconds * scale).round() / scale
}

/// Accumulates partial output and releases only complete lines.
///
/// Bytes are held undecoded until their line is complete, so a multi-byte
/// character split across writes survives intact.
#[derive(Debug, Default, Clone)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    /// Appends `bytes` and returns every line they completed, terminators
    /// stripped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(bytes);
        let Some(last) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.partial.split_off(last + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete[..last]
            .split(|b| *b == b'\n')
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect()
    }

    /// Takes the pending partial line, if any.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            let partial = std::mem::take(&mut self.partial);
            Some(String::from_utf8_lossy(&partial).into_owned())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }
}

/// Named sub-stream of a node (for example redirected `stdout`).
pub struct StreamWriter<'a> {
    writer: &'a NodeWriter,
    name: ValidatedStreamName,
    buffer: LineBuffer,
}

impl StreamWriter<'_> {
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    fn emit_line(&self, line: String) -> io::Result<()> {
        self.writer
            .encode(Body::None(line), self.writer.elapsed(), Some(&self.name))
            .map(drop)
            .map_err(LogError::into_io)
    }
}

impl Write for StreamWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for line in self.buffer.push(buf) {
            self.emit_line(line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.buffer.take_partial() {
            Some(line) => self.emit_line(line),
            None => Ok(()),
        }
    }
}

impl Drop for StreamWriter<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            debug!(stream = self.name.as_str(), error = %err, "dropping unflushed stream text");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_record;
    use crate::record::{Attribute, Keyword, Tag};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            lock(&self.0).extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(lock(&self.0).clone())
                .expect("utf8")
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    fn node_writer(sink: &Shared) -> NodeWriter {
        let file = Arc::new(LogFile::from_writer(sink.clone()));
        NodeWriter::new(
            file,
            NodeInfo::new(TestType::Test, TestId::new(vec![0, 1])),
            &WriterConfig::default(),
        )
    }

    #[test]
    fn sequence_increments_and_hash_chains() {
        let sink = Shared::default();
        let writer = node_writer(&sink);
        let first = writer
            .encode(Body::Note("a".into()), 0.5, None)
            .expect("first");
        let second = writer
            .encode(Body::Note("b".into()), 0.75, None)
            .expect("second");

        let first = parse_record(&first).expect("parse first");
        let second_rec = parse_record(&second).expect("parse second");
        assert_eq!(first.prefix.sequence, 0);
        assert_eq!(second_rec.prefix.sequence, 1);

        let (_, _, rest) = codec::split_head(&second).expect("head");
        let expected = codec::chain_hash(&HashConfig::default(), &first.prefix.hash, Keyword::Note, rest);
        assert_eq!(second_rec.prefix.hash, expected);
        assert_eq!(sink.lines().len(), 2);
    }

    #[test]
    fn relative_time_is_rounded_to_resolution() {
        let sink = Shared::default();
        let file = Arc::new(LogFile::from_writer(sink.clone()));
        let config = WriterConfig {
            time_resolution: 2,
            ..WriterConfig::default()
        };
        let writer = NodeWriter::new(file, NodeInfo::default(), &config);
        let line = writer.encode(Body::Stop, 1.23456, None).expect("stop");
        assert_eq!(parse_record(&line).expect("parse").prefix.relative_time, 1.23);
    }

    #[test]
    fn test_emits_attached_metadata_records() {
        let sink = Shared::default();
        let writer = node_writer(&sink);
        let mut test = TestBody::named("/suite/case");
        test.attributes.push(Attribute {
            name: "owner".into(),
            value: "qa".into(),
            ..Attribute::default()
        });
        test.tags.push(Tag {
            value: "smoke".into(),
        });
        writer.test(test).expect("test");

        let keywords: Vec<_> = sink
            .lines()
            .iter()
            .map(|line| parse_record(line).expect("parse").keyword())
            .collect();
        assert_eq!(keywords, vec![Keyword::Test, Keyword::Attribute, Keyword::Tag]);
    }

    #[test]
    fn stream_writer_emits_only_complete_lines() {
        let sink = Shared::default();
        let writer = node_writer(&sink);
        {
            let mut out = writer.stream("stdout").expect("stream");
            out.write_all(b"hel").expect("write");
            assert!(sink.lines().is_empty());
            out.write_all(b"lo\nwor").expect("write");
            assert_eq!(sink.lines().len(), 1);
        }
        let records: Vec<_> = sink
            .lines()
            .iter()
            .map(|line| parse_record(line).expect("parse"))
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].body, Body::None("hello".into()));
        assert_eq!(records[1].body, Body::None("wor".into()));
        assert_eq!(records[1].prefix.stream.as_deref(), Some("stdout"));
    }

    #[test]
    fn invalid_stream_name_is_rejected() {
        let sink = Shared::default();
        let writer = node_writer(&sink);
        assert!(matches!(
            writer.stream("bad name"),
            Err(LogError::InvalidStreamName(_))
        ));
    }

    #[test]
    fn line_buffer_holds_partial_text() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"a").is_empty());
        assert_eq!(buffer.push(b"b\nc\nd"), vec!["ab".to_string(), "c".to_string()]);
        assert_eq!(buffer.take_partial().as_deref(), Some("d"));
        assert!(buffer.is_empty());
        assert_eq!(buffer.take_partial(), None);
    }

    #[test]
    fn line_buffer_keeps_split_characters_whole() {
        let mut buffer = LineBuffer::default();
        let bytes = "caf\u{e9}\n".as_bytes();
        assert!(buffer.push(&bytes[..4]).is_empty());
        assert_eq!(buffer.push(&bytes[4..]), vec!["caf\u{e9}".to_string()]);
    }

    #[test]
    fn compression_level_out_of_range_is_an_error() {
        match LogFile::compressed(Vec::new(), 12) {
            Err(LogError::Encoder { level, .. }) => assert_eq!(level, 12),
            other => panic!("expected encoder error, got {other:?}"),
        }
    }

    #[test]
    fn non_finite_numbers_are_rejected_before_writing() {
        let sink = Shared::default();
        let writer = node_writer(&sink);
        assert!(matches!(
            writer.encode(Body::Note("n".into()), f64::NAN, None),
            Err(LogError::Encode { field: "relative_time", .. })
        ));
        let metric = Metric {
            name: "rate".into(),
            value: f64::INFINITY,
            ..Metric::default()
        };
        assert!(matches!(
            writer.metric(metric),
            Err(LogError::Encode { field: "metric value", .. })
        ));
        assert!(sink.lines().is_empty());

        let next = writer.encode(Body::Stop, 0.0, None).expect("stop");
        assert_eq!(parse_record(&next).expect("parse").prefix.sequence, 0);
    }

    #[test]
    fn finished_log_rejects_appends() {
        let file = LogFile::compressed(Vec::new(), 6).expect("encoder");
        file.append_line("x").expect("append");
        file.finish().expect("finish");
        assert!(file.append_line("y").is_err());
    }
}
