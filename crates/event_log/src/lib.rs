#![forbid(unsafe_code)]
//! Test event log transport and streaming transforms.
//!
//! This crate provides:
//! - A hash-chained, one-record-per-line log protocol and its writer.
//! - A tail-capable reader for plain or xz-compressed logs that may still be
//!   growing or carry transient corruption (sync, plus optional tokio driver).
//! - A pre-parse content filter, a lenient parser, and a pull-based stage
//!   pipeline with fan-out and fan-in.
//! - A short tree renderer, totals and fails aggregators, and prebuilt
//!   pipelines combining them.

pub mod codec;
mod config;
mod error;
pub mod filter;
mod parse;
pub mod pipeline;
pub mod pipelines;
pub mod reader;
pub mod record;
pub mod render;
mod stop;
mod stream;
pub mod writer;

pub use codec::{chain_hash, encode_record, verify_chain, PROTOCOL_VERSION};
pub use config::{HashAlgorithm, HashConfig, ReaderConfig, RenderOptions, WriterConfig};
pub use error::{LogError, ParseError};
pub use filter::{ContentFilter, FilteredLine, LinePattern, StopMarker};
pub use parse::{parse_record, RecordParser};
pub use pipeline::{Item, Pipeline, RunSummary, Stage, Step};
pub use pipelines::PipelineOptions;
pub use reader::{BoundedLine, BoundedLines, LogReader};
pub use record::{Body, Flags, Keyword, Record, ResultType, TestId, TestSubType, TestType};
pub use stop::StopFlag;
pub use stream::ValidatedStreamName;
pub use writer::{LogFile, NodeInfo, NodeWriter, StreamWriter};

#[cfg(feature = "tokio")]
pub use reader::AsyncLogTail;
