use std::io;

use thiserror::Error;

/// Errors that abort a read, a write or a pipeline run.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("I/O error on event log: {0}")]
    Io(#[from] io::Error),
    #[error("event log is corrupt near byte {offset}: no compressed or raw record marker found")]
    Corrupt { offset: u64 },
    #[error("failed to initialise xz decoder: {0}")]
    Decoder(#[source] xz2::stream::Error),
    #[error("failed to initialise xz encoder at level {level}: {source}")]
    Encoder {
        level: u32,
        #[source]
        source: xz2::stream::Error,
    },
    /// The field has no JSON representation, so the line could never be read
    /// back.
    #[error("cannot encode {field}: {value} is not a finite number")]
    Encode { field: &'static str, value: f64 },
    #[error("stage `{stage}` failed: {message}")]
    Stage {
        stage: &'static str,
        message: String,
    },
    #[error("invalid line pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
    #[error("invalid stream name `{0}`")]
    InvalidStreamName(String),
}

impl LogError {
    pub(crate) fn stage(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }

    /// Recovers a `LogError` that travelled through an `io::Error` (the
    /// reader surfaces its failures through `std::io::Read`).
    pub(crate) fn from_io(err: io::Error) -> Self {
        let kind = err.kind();
        if err.get_ref().is_some_and(|inner| inner.is::<LogError>()) {
            if let Some(inner) = err.into_inner() {
                return match inner.downcast::<LogError>() {
                    Ok(log_err) => *log_err,
                    Err(other) => LogError::Io(io::Error::new(kind, other)),
                };
            }
            return LogError::Io(io::Error::from(kind));
        }
        LogError::Io(err)
    }

    pub(crate) fn into_io(self) -> io::Error {
        match self {
            LogError::Io(err) => err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// A single line that could not be decoded into a record.
///
/// Readers treat this as recoverable: the line is dropped and the stream
/// continues.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("malformed record ({reason}): {line}")]
pub struct ParseError {
    pub line: String,
    pub reason: String,
}

impl ParseError {
    pub(crate) fn new(line: &str, reason: impl Into<String>) -> Self {
        Self {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}
