//! Pull-based stage engine.
//!
//! A [`Pipeline`] pulls one item from its [`Source`] and passes it through
//! every [`Stage`] in order. A stage that answers [`Step::Suppressed`] ends
//! the chain for that item only; the next iteration pulls afresh. The run
//! ends when the source is exhausted or the shared stop flag is raised.

mod stages;

use tracing::debug;

use crate::error::LogError;
use crate::filter::FilteredLine;
use crate::record::Record;
use crate::stop::StopFlag;

pub use stages::{
    AggregateStage, Fanin, Fanout, FilterSource, FnStage, IterSource, ParseStage, RawStage,
    RenderStage, WriteSink,
};

/// Value flowing between stages.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Line(FilteredLine),
    Record(Record),
    Text(String),
    /// Ordered outputs of a fan-out.
    Outputs(Vec<Item>),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Line(_) => "line",
            Item::Record(_) => "record",
            Item::Text(_) => "text",
            Item::Outputs(_) => "outputs",
        }
    }
}

/// Outcome of a stage for one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Emit(Item),
    /// Nothing to pass on for this item. Not end of input.
    Suppressed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pull {
    Item(Item),
    Suppressed,
    Exhausted,
}

pub trait Stage {
    fn name(&self) -> &'static str;

    fn next(&mut self, item: Item) -> Result<Step, LogError>;

    /// Items this stage discarded as malformed.
    fn dropped(&self) -> u64 {
        0
    }
}

pub trait Source {
    fn pull(&mut self) -> Result<Pull, LogError>;

    fn dropped(&self) -> u64 {
        0
    }
}

impl<S: Stage + ?Sized> Stage for Box<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn next(&mut self, item: Item) -> Result<Step, LogError> {
        (**self).next(item)
    }

    fn dropped(&self) -> u64 {
        (**self).dropped()
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Items pulled from the source.
    pub pulled: u64,
    /// Items that made it through every stage.
    pub emitted: u64,
    /// Lines discarded by the source or stages.
    pub dropped: u64,
}

pub struct Pipeline {
    source: Box<dyn Source>,
    stages: Vec<Box<dyn Stage>>,
    stop: StopFlag,
}

impl Pipeline {
    pub fn new(source: impl Source + 'static, stop: StopFlag) -> Self {
        Self {
            source: Box::new(source),
            stages: Vec::new(),
            stop,
        }
    }

    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// Drives the pipeline to completion. Any stage error aborts the run.
    pub fn run(&mut self) -> Result<RunSummary, LogError> {
        let mut summary = RunSummary::default();
        while !self.stop.is_set() {
            let mut item = match self.source.pull()? {
                Pull::Item(item) => item,
                Pull::Suppressed => continue,
                Pull::Exhausted => break,
            };
            summary.pulled += 1;

            let mut complete = true;
            for stage in &mut self.stages {
                match stage.next(item)? {
                    Step::Emit(next) => item = next,
                    Step::Suppressed => {
                        complete = false;
                        break;
                    }
                }
            }
            if complete {
                summary.emitted += 1;
            }
        }

        summary.dropped = self.source.dropped()
            + self.stages.iter().map(|stage| stage.dropped()).sum::<u64>();
        debug!(
            pulled = summary.pulled,
            emitted = summary.emitted,
            dropped = summary.dropped,
            stopped = self.stop.is_set(),
            "pipeline finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> IterSource<std::vec::IntoIter<Item>> {
        IterSource::new(
            items
                .iter()
                .map(|text| Item::Text(text.to_string()))
                .collect::<Vec<_>>()
                .into_iter(),
        )
    }

    #[derive(Default)]
    struct Collect(std::rc::Rc<std::cell::RefCell<Vec<String>>>);

    impl Stage for Collect {
        fn name(&self) -> &'static str {
            "collect"
        }

        fn next(&mut self, item: Item) -> Result<Step, LogError> {
            if let Item::Text(text) = &item {
                self.0.borrow_mut().push(text.clone());
            }
            Ok(Step::Emit(item))
        }
    }

    #[test]
    fn suppression_skips_rest_of_chain_for_one_item_only() {
        let seen = Collect::default();
        let out = seen.0.clone();
        let mut pipeline = Pipeline::new(texts(&["a", "skip", "b"]), StopFlag::new())
            .stage(FnStage::new("drop-skip", |item| {
                Ok(match &item {
                    Item::Text(text) if text == "skip" => Step::Suppressed,
                    _ => Step::Emit(item),
                })
            }))
            .stage(seen);

        let summary = pipeline.run().expect("run");
        assert_eq!(*out.borrow(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(summary.pulled, 3);
        assert_eq!(summary.emitted, 2);
    }

    #[test]
    fn stop_flag_ends_run_after_current_item() {
        let stop = StopFlag::new();
        let trigger = stop.clone();
        let seen = Collect::default();
        let out = seen.0.clone();
        let mut pipeline = Pipeline::new(texts(&["a", "b", "c"]), stop)
            .stage(FnStage::new("stop-on-b", move |item| {
                if item == Item::Text("b".into()) {
                    trigger.set();
                }
                Ok(Step::Emit(item))
            }))
            .stage(seen);

        pipeline.run().expect("run");
        assert_eq!(*out.borrow(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn stage_errors_abort_the_run() {
        let mut pipeline = Pipeline::new(texts(&["a"]), StopFlag::new())
            .stage(FnStage::new("broken", |_| Err(LogError::stage("broken", "boom"))));
        assert!(matches!(
            pipeline.run(),
            Err(LogError::Stage {
                stage: "broken",
                ..
            })
        ));
    }
}
