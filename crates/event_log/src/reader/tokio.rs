use std::collections::VecDeque;
use std::io::Read;

use super::decode::{Fill, LogReader};
use super::lines::{BoundedLine, LineAssembler};

/// Async line driver over [`LogReader`].
///
/// Reads from the underlying source are still blocking; only the wait
/// between polls of an idle tailing log is async.
pub struct AsyncLogTail<R: Read> {
    reader: LogReader<R>,
    assembler: LineAssembler,
    ready: VecDeque<BoundedLine>,
    done: bool,
}

impl<R: Read> AsyncLogTail<R> {
    pub fn new(reader: LogReader<R>) -> Self {
        let max_line_bytes = reader.config().max_line_bytes;
        Self {
            reader,
            assembler: LineAssembler::new(max_line_bytes),
            ready: VecDeque::new(),
            done: false,
        }
    }

    pub async fn next_line(&mut self) -> Option<BoundedLine> {
        loop {
            if let Some(line) = self.ready.pop_front() {
                return Some(line);
            }
            if self.done {
                return None;
            }
            if self.reader.stop_flag().is_set() && self.reader.pending() == 0 {
                self.done = true;
                return self.assembler.finish();
            }
            match self.reader.poll_fill() {
                Ok(Fill::Data(_)) => {
                    let bytes = self.reader.take_output();
                    self.assembler.feed(&bytes, &mut self.ready);
                }
                Ok(Fill::Idle) => tokio::time::sleep(self.reader.config().poll_interval).await,
                Ok(Fill::Eof) => {
                    self.done = true;
                    return self.assembler.finish();
                }
                Err(error) => {
                    self.done = true;
                    return Some(BoundedLine::ReadError {
                        offset: self.assembler.consumed(),
                        error,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use super::*;
    use crate::config::ReaderConfig;
    use crate::stop::StopFlag;

    #[tokio::test]
    async fn yields_lines_then_ends() {
        let reader = LogReader::new(
            Cursor::new(b"TEST,\"a\"\nSTOP,\"b\"\n".to_vec()),
            ReaderConfig::default(),
            StopFlag::new(),
        );
        let mut tail = AsyncLogTail::new(reader);
        let mut seen = Vec::new();
        while let Some(line) = tail.next_line().await {
            if let BoundedLine::Line { bytes, .. } = line {
                seen.push(String::from_utf8(bytes).expect("utf8"));
            }
        }
        assert_eq!(seen, vec!["TEST,\"a\"".to_string(), "STOP,\"b\"".to_string()]);
    }

    #[tokio::test]
    async fn stop_flag_ends_idle_tail() {
        let stop = StopFlag::new();
        let config = ReaderConfig {
            tail: true,
            poll_interval: Duration::from_millis(5),
            ..ReaderConfig::default()
        };
        let reader = LogReader::new(Cursor::new(Vec::new()), config, stop.clone());
        let mut tail = AsyncLogTail::new(reader);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop.set();
        });
        assert!(tail.next_line().await.is_none());
        stopper.await.expect("stopper");
    }
}
