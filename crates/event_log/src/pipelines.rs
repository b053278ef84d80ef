//! Prebuilt consumer pipelines.
//!
//! Every builder wires its own reader, content filter and stop flag, so the
//! returned [`Pipeline`] owns all of its run state.

use std::io::{Read, Write};

use crate::config::{ReaderConfig, RenderOptions};
use crate::error::LogError;
use crate::filter::{ContentFilter, LinePattern, StopMarker};
use crate::pipeline::{
    AggregateStage, Fanin, Fanout, FilterSource, ParseStage, Pipeline, RawStage, RenderStage,
    Stage, WriteSink,
};
use crate::reader::{BoundedLines, LogReader};
use crate::record::{Keyword, TestId};
use crate::render::{
    FailsAggregator, PassingAggregator, ShortRenderer, TotalsAggregator, VersionAggregator,
};
use crate::stop::StopFlag;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub reader: ReaderConfig,
    pub render: RenderOptions,
    /// Stop at the STOP record of this node instead of the first one seen.
    pub stop_at: Option<TestId>,
}

fn source<R: Read + 'static>(
    input: R,
    pattern: LinePattern,
    options: &PipelineOptions,
    stop: &StopFlag,
) -> Result<FilterSource<LogReader<R>>, LogError> {
    let marker = match &options.stop_at {
        Some(id) => StopMarker::for_test(id)?,
        None => StopMarker::any(),
    };
    let reader = LogReader::new(input, options.reader, stop.clone());
    let lines = BoundedLines::new(reader, options.reader.max_line_bytes);
    Ok(FilterSource::new(ContentFilter::new(
        lines,
        pattern,
        marker,
        stop.clone(),
    )))
}

/// read → parse → fanout(short, passing, fails, totals, version) → join → write
pub fn short_log<R, W>(
    input: R,
    output: W,
    options: &PipelineOptions,
) -> Result<Pipeline, LogError>
where
    R: Read + 'static,
    W: Write + 'static,
{
    let stop = StopFlag::new();
    let render = options.render;
    let fanout: Vec<Box<dyn Stage>> = vec![
        Box::new(RenderStage::new(ShortRenderer::new(render))),
        Box::new(AggregateStage::new(
            PassingAggregator::new(render),
            stop.clone(),
        )),
        Box::new(AggregateStage::new(
            FailsAggregator::new(render),
            stop.clone(),
        )),
        Box::new(AggregateStage::new(
            TotalsAggregator::new(render),
            stop.clone(),
        )),
        Box::new(AggregateStage::new(
            VersionAggregator::new(render),
            stop.clone(),
        )),
    ];
    Ok(
        Pipeline::new(source(input, LinePattern::Any, options, &stop)?, stop)
            .stage(ParseStage::new())
            .stage(Fanout::new(fanout))
            .stage(Fanin::join())
            .stage(WriteSink::new(output)),
    )
}

/// read → raw passthrough → write
pub fn raw_log<R, W>(input: R, output: W, options: &PipelineOptions) -> Result<Pipeline, LogError>
where
    R: Read + 'static,
    W: Write + 'static,
{
    let stop = StopFlag::new();
    Ok(
        Pipeline::new(source(input, LinePattern::Any, options, &stop)?, stop)
            .stage(RawStage)
            .stage(WriteSink::new(output)),
    )
}

/// Unit and result counts, written once the log's STOP record arrives.
pub fn totals_report<R, W>(
    input: R,
    output: W,
    options: &PipelineOptions,
) -> Result<Pipeline, LogError>
where
    R: Read + 'static,
    W: Write + 'static,
{
    let stop = StopFlag::new();
    let pattern = LinePattern::keywords(&[Keyword::Test, Keyword::Result, Keyword::Stop])?;
    let totals = TotalsAggregator::new(options.render).with_divider("");
    Ok(Pipeline::new(source(input, pattern, options, &stop)?, stop.clone())
        .stage(ParseStage::new())
        .stage(AggregateStage::new(totals, stop))
        .stage(WriteSink::new(output)))
}

/// Failing and known-failing results, written once the log's STOP record
/// arrives.
pub fn fails_report<R, W>(
    input: R,
    output: W,
    options: &PipelineOptions,
) -> Result<Pipeline, LogError>
where
    R: Read + 'static,
    W: Write + 'static,
{
    let stop = StopFlag::new();
    let pattern = LinePattern::keywords(&[Keyword::Result, Keyword::Stop])?;
    let fails = FailsAggregator::new(options.render).with_divider("");
    Ok(Pipeline::new(source(input, pattern, options, &stop)?, stop.clone())
        .stage(ParseStage::new())
        .stage(AggregateStage::new(fails, stop))
        .stage(WriteSink::new(output)))
}

/// `OK` and `Skip` results with their times, written once the log's STOP
/// record arrives.
pub fn passing_report<R, W>(
    input: R,
    output: W,
    options: &PipelineOptions,
) -> Result<Pipeline, LogError>
where
    R: Read + 'static,
    W: Write + 'static,
{
    let stop = StopFlag::new();
    let pattern = LinePattern::keywords(&[Keyword::Result, Keyword::Stop])?;
    let passing = PassingAggregator::new(options.render).with_divider("");
    Ok(Pipeline::new(source(input, pattern, options, &stop)?, stop.clone())
        .stage(ParseStage::new())
        .stage(AggregateStage::new(passing, stop))
        .stage(WriteSink::new(output)))
}

/// Framework version of the run, written once the log's STOP record arrives.
pub fn version_report<R, W>(
    input: R,
    output: W,
    options: &PipelineOptions,
) -> Result<Pipeline, LogError>
where
    R: Read + 'static,
    W: Write + 'static,
{
    let stop = StopFlag::new();
    let pattern = LinePattern::keywords(&[Keyword::Version, Keyword::Stop])?;
    let version = VersionAggregator::new(options.render).with_divider("");
    Ok(Pipeline::new(source(input, pattern, options, &stop)?, stop.clone())
        .stage(ParseStage::new())
        .stage(AggregateStage::new(version, stop))
        .stage(WriteSink::new(output)))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use super::*;

    const LOG: &str = concat!(
        "PROTOCOL,\"a1\",0,\"Module\",null,\"0\",0,0,null,0.0,\"TFSPv2.1\"\n",
        "VERSION,\"a2\",1,\"Module\",null,\"0\",0,0,null,0.0,\"2.1.0\"\n",
        "TEST,\"a3\",2,\"Module\",null,\"0\",0,0,null,0.0,\"/m\"\n",
        "TEST,\"b1\",0,\"Test\",\"Scenario\",\"0/1\",0,0,null,0.0,\"/m/login\"\n",
        "NOTE,\"b2\",1,\"Test\",\"Scenario\",\"0/1\",0,0,null,0.1,\"hello\"\n",
        "not a record\n",
        "RESULT,\"b3\",2,\"Test\",\"Scenario\",\"0/1\",0,0,null,0.2,\"Fail\",\"bad password\",null,\"/m/login\"\n",
        "RESULT,\"a4\",3,\"Module\",null,\"0\",0,0,null,0.3,\"Fail\",null,null,\"/m\"\n",
        "STOP,\"a5\",4,\"Module\",null,\"0\",0,0,null,0.3\n",
        "NOTE,\"a6\",5,\"Module\",null,\"0\",0,0,null,0.4,\"late\"\n",
    );

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().expect("lock").clone()).expect("utf8")
        }
    }

    fn input() -> Cursor<Vec<u8>> {
        Cursor::new(LOG.as_bytes().to_vec())
    }

    #[test]
    fn short_log_renders_tree_and_reports_at_stop() {
        let out = Shared::default();
        let mut pipeline =
            short_log(input(), out.clone(), &PipelineOptions::default()).expect("pipeline");
        let summary = pipeline.run().expect("run");

        assert_eq!(
            out.text(),
            concat!(
                "Module m\n",
                "  Scenario login\n",
                "  Fail login, bad password\n",
                "Fail m\n",
                "\nFailing\n\n",
                "\u{2718} [ Fail ] /m/login, bad password\n",
                "\u{2718} [ Fail ] /m\n",
                "\n1 module (1 Fail)\n",
                "1 scenario (1 Fail)\n",
                "\nTotal time 300ms\n",
                "\nFramework v2.1.0\n",
            )
        );
        assert_eq!(summary.dropped, 1);
        assert!(pipeline.stop_flag().is_set());
    }

    #[test]
    fn raw_log_copies_lines_up_to_stop() {
        let out = Shared::default();
        raw_log(input(), out.clone(), &PipelineOptions::default())
            .expect("pipeline")
            .run()
            .expect("run");
        let expected = &LOG[..LOG.find("NOTE,\"a6\"").expect("late note")];
        assert_eq!(out.text(), expected);
    }

    #[test]
    fn reports_only_parse_the_kinds_they_need() {
        let out = Shared::default();
        let summary = totals_report(input(), out.clone(), &PipelineOptions::default())
            .expect("pipeline")
            .run()
            .expect("run");
        assert_eq!(
            out.text(),
            "1 module (1 Fail)\n1 scenario (1 Fail)\n\nTotal time 300ms\n"
        );
        assert_eq!(summary.dropped, 0);

        let out = Shared::default();
        fails_report(input(), out.clone(), &PipelineOptions::default())
            .expect("pipeline")
            .run()
            .expect("run");
        assert!(out.text().starts_with("Failing\n\n"));

        let out = Shared::default();
        version_report(input(), out.clone(), &PipelineOptions::default())
            .expect("pipeline")
            .run()
            .expect("run");
        assert_eq!(out.text(), "Framework v2.1.0\n");
    }

    #[test]
    fn passing_results_appear_before_failures() {
        let log = concat!(
            "TEST,\"a1\",0,\"Module\",null,\"0\",0,0,null,0.0,\"/m\"\n",
            "TEST,\"b1\",0,\"Test\",null,\"0/1\",0,0,null,0.0,\"/m/ok\"\n",
            "RESULT,\"b2\",1,\"Test\",null,\"0/1\",0,0,null,0.12,\"OK\",null,null,\"/m/ok\"\n",
            "TEST,\"c1\",0,\"Test\",null,\"0/2\",0,0,null,0.2,\"/m/bad\"\n",
            "RESULT,\"c2\",1,\"Test\",null,\"0/2\",0,0,null,0.3,\"Fail\",\"no\",null,\"/m/bad\"\n",
            "RESULT,\"a2\",1,\"Module\",null,\"0\",0,0,null,0.4,\"Fail\",null,null,\"/m\"\n",
            "STOP,\"a3\",2,\"Module\",null,\"0\",0,0,null,0.4\n",
        );

        let out = Shared::default();
        passing_report(Cursor::new(log.as_bytes().to_vec()), out.clone(), &PipelineOptions::default())
            .expect("pipeline")
            .run()
            .expect("run");
        assert_eq!(out.text(), "Passing\n\n\u{2714} [ OK ] /m/ok (120ms)\n");

        let out = Shared::default();
        short_log(Cursor::new(log.as_bytes().to_vec()), out.clone(), &PipelineOptions::default())
            .expect("pipeline")
            .run()
            .expect("run");
        let text = out.text();
        let passing = text.find("\nPassing\n\n").expect("passing section");
        let failing = text.find("\nFailing\n\n").expect("failing section");
        let totals = text.find("\n1 module").expect("totals section");
        assert!(passing < failing && failing < totals, "{text}");
        assert!(!text.contains("Framework v"), "{text}");
    }
}
