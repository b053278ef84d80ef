use clap::builder::FalseyValueParser;
use clap::{Args, Subcommand};
use event_log::pipelines::{self, PipelineOptions};
use event_log::{ReaderConfig, RenderOptions, TestId};
use tracing::debug;

use crate::files::{parse_test_id, Error, Files};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Tree of tests and results, followed by the passing, fails, totals and
    /// version reports.
    Short(ShortArgs),
    /// Copy records through unchanged up to the end of the run.
    Raw(RawArgs),
}

#[derive(Debug, Args)]
pub struct ShortArgs {
    #[command(flatten)]
    pub files: Files,

    /// Keep following the log while it is being written.
    #[arg(long)]
    pub tail: bool,

    /// Also render nodes that were skipped.
    #[arg(long, env = "EVLOG_SHOW_SKIPPED", value_parser = FalseyValueParser::new())]
    pub show_skipped: bool,

    #[arg(long)]
    pub no_colors: bool,

    /// End at the STOP record of this node (e.g. `/0`) instead of the first one.
    #[arg(long, value_parser = parse_test_id)]
    pub stop_id: Option<TestId>,
}

#[derive(Debug, Args)]
pub struct RawArgs {
    #[command(flatten)]
    pub files: Files,

    /// Keep following the log while it is being written.
    #[arg(long)]
    pub tail: bool,

    /// End at the STOP record of this node instead of the first one.
    #[arg(long, value_parser = parse_test_id)]
    pub stop_id: Option<TestId>,
}

fn reader_config(tail: bool) -> ReaderConfig {
    ReaderConfig {
        tail,
        ..ReaderConfig::default()
    }
}

pub fn run(command: Command) -> Result<(), Error> {
    let (mut pipeline, format) = match command {
        Command::Short(args) => {
            let options = PipelineOptions {
                reader: reader_config(args.tail),
                render: RenderOptions {
                    show_skipped: args.show_skipped,
                    colors: args.files.colors(args.no_colors),
                },
                stop_at: args.stop_id,
            };
            let pipeline =
                pipelines::short_log(args.files.input()?, args.files.output()?, &options)?;
            (pipeline, "short")
        }
        Command::Raw(args) => {
            let options = PipelineOptions {
                reader: reader_config(args.tail),
                stop_at: args.stop_id,
                ..PipelineOptions::default()
            };
            let pipeline = pipelines::raw_log(args.files.input()?, args.files.output()?, &options)?;
            (pipeline, "raw")
        }
    };

    let summary = pipeline.run()?;
    debug!(
        format,
        pulled = summary.pulled,
        emitted = summary.emitted,
        dropped = summary.dropped,
        "transform complete"
    );
    Ok(())
}
