use std::io::{Read, Write};

use crate::error::LogError;
use crate::filter::ContentFilter;
use crate::parse::RecordParser;
use crate::render::{Aggregator, Renderer};
use crate::stop::StopFlag;

use super::{Item, Pull, Source, Stage, Step};

fn unexpected(stage: &'static str, item: &Item) -> LogError {
    LogError::stage(stage, format!("unexpected {} item", item.kind()))
}

/// Content filter as the pipeline's source.
pub struct FilterSource<R: Read> {
    filter: ContentFilter<R>,
}

impl<R: Read> FilterSource<R> {
    pub fn new(filter: ContentFilter<R>) -> Self {
        Self { filter }
    }
}

impl<R: Read> Source for FilterSource<R> {
    fn pull(&mut self) -> Result<Pull, LogError> {
        match self.filter.next() {
            Some(Ok(line)) => Ok(Pull::Item(Item::Line(line))),
            Some(Err(err)) => Err(err),
            None => Ok(Pull::Exhausted),
        }
    }

    fn dropped(&self) -> u64 {
        let stats = self.filter.stats();
        stats.too_long + stats.invalid_utf8
    }
}

/// Source over any iterator of items.
pub struct IterSource<I> {
    items: I,
}

impl<I: Iterator<Item = Item>> IterSource<I> {
    pub fn new(items: I) -> Self {
        Self { items }
    }
}

impl<I: Iterator<Item = Item>> Source for IterSource<I> {
    fn pull(&mut self) -> Result<Pull, LogError> {
        Ok(self.items.next().map_or(Pull::Exhausted, Pull::Item))
    }
}

/// Line to record. Malformed lines are suppressed and counted.
#[derive(Debug, Default)]
pub struct ParseStage {
    parser: RecordParser,
}

impl ParseStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for ParseStage {
    fn name(&self) -> &'static str {
        "parse"
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        let Item::Line(line) = item else {
            return Err(unexpected(self.name(), &item));
        };
        Ok(match self.parser.parse(&line.line) {
            Some(record) => Step::Emit(Item::Record(record)),
            None => Step::Suppressed,
        })
    }

    fn dropped(&self) -> u64 {
        self.parser.dropped()
    }
}

/// Per-record renderer stage.
pub struct RenderStage<R> {
    renderer: R,
}

impl<R: Renderer> RenderStage<R> {
    pub fn new(renderer: R) -> Self {
        Self { renderer }
    }
}

impl<R: Renderer> Stage for RenderStage<R> {
    fn name(&self) -> &'static str {
        "render"
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        let Item::Record(record) = &item else {
            return Err(unexpected(self.name(), &item));
        };
        Ok(match self.renderer.render(record)? {
            Some(text) => Step::Emit(Item::Text(text)),
            None => Step::Suppressed,
        })
    }
}

/// Batch stage: accumulates every record and emits its report once, on
/// the first record seen after the shared stop flag was raised (the stop
/// marker itself when the flag comes from the content filter).
pub struct AggregateStage<A> {
    aggregator: A,
    stop: StopFlag,
    flushed: bool,
}

impl<A: Aggregator> AggregateStage<A> {
    pub fn new(aggregator: A, stop: StopFlag) -> Self {
        Self {
            aggregator,
            stop,
            flushed: false,
        }
    }
}

impl<A: Aggregator> Stage for AggregateStage<A> {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        let Item::Record(record) = &item else {
            return Err(unexpected(self.name(), &item));
        };
        self.aggregator.accumulate(record)?;
        if self.flushed || !self.stop.is_set() {
            return Ok(Step::Suppressed);
        }
        self.flushed = true;
        let report = self.aggregator.flush()?;
        Ok(if report.is_empty() {
            Step::Suppressed
        } else {
            Step::Emit(Item::Text(report))
        })
    }
}

/// Feeds one item to every sub-stage and collects the non-suppressed
/// outputs in sub-stage order.
pub struct Fanout {
    stages: Vec<Box<dyn Stage>>,
}

impl Fanout {
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }
}

impl Stage for Fanout {
    fn name(&self) -> &'static str {
        "fanout"
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        let mut outputs = Vec::new();
        for stage in &mut self.stages {
            if let Step::Emit(output) = stage.next(item.clone())? {
                outputs.push(output);
            }
        }
        Ok(if outputs.is_empty() {
            Step::Suppressed
        } else {
            Step::Emit(Item::Outputs(outputs))
        })
    }

    fn dropped(&self) -> u64 {
        self.stages.iter().map(|stage| stage.dropped()).sum()
    }
}

type Combine = Box<dyn FnMut(Vec<Item>) -> Result<Item, LogError>>;

/// Combines a fan-out's outputs into one item.
pub struct Fanin {
    combine: Combine,
}

impl Fanin {
    pub fn new(combine: impl FnMut(Vec<Item>) -> Result<Item, LogError> + 'static) -> Self {
        Self {
            combine: Box::new(combine),
        }
    }

    /// Concatenates text outputs.
    pub fn join() -> Self {
        Self::new(|items| {
            let mut joined = String::new();
            for item in items {
                match item {
                    Item::Text(text) => joined.push_str(&text),
                    other => return Err(unexpected("fanin", &other)),
                }
            }
            Ok(Item::Text(joined))
        })
    }
}

impl Stage for Fanin {
    fn name(&self) -> &'static str {
        "fanin"
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        let items = match item {
            Item::Outputs(items) => items,
            single => vec![single],
        };
        (self.combine)(items).map(Step::Emit)
    }
}

/// Stage from a closure.
pub struct FnStage<F> {
    name: &'static str,
    f: F,
}

impl<F: FnMut(Item) -> Result<Step, LogError>> FnStage<F> {
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F: FnMut(Item) -> Result<Step, LogError>> Stage for FnStage<F> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        (self.f)(item)
    }
}

/// Raw line passthrough as text.
#[derive(Debug, Default)]
pub struct RawStage;

impl Stage for RawStage {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        match item {
            Item::Line(line) => Ok(Step::Emit(Item::Text(line.line + "\n"))),
            other => Err(unexpected(self.name(), &other)),
        }
    }
}

/// Terminal stage writing text to `W`, flushed per item.
pub struct WriteSink<W: Write> {
    out: W,
}

impl<W: Write> WriteSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Stage for WriteSink<W> {
    fn name(&self) -> &'static str {
        "write"
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        match &item {
            Item::Text(text) => self.out.write_all(text.as_bytes())?,
            Item::Line(line) => {
                self.out.write_all(line.line.as_bytes())?;
                self.out.write_all(b"\n")?;
            }
            other => return Err(unexpected(self.name(), other)),
        }
        self.out.flush()?;
        Ok(Step::Emit(item))
    }
}
