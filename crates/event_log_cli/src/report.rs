use clap::{Args, Subcommand};
use event_log::pipelines::{self, PipelineOptions};
use event_log::RenderOptions;
use tracing::debug;

use crate::files::{Error, Files};

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Node and result counts per unit kind, plus total run time.
    Totals(ReportArgs),
    /// Passing and skipped results with their times.
    Passing(ReportArgs),
    /// Failing and known-failing results.
    Fails(ReportArgs),
    /// Framework version that wrote the log.
    Version(ReportArgs),
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[command(flatten)]
    pub files: Files,

    #[arg(long)]
    pub no_colors: bool,
}

impl ReportArgs {
    fn options(&self) -> PipelineOptions {
        PipelineOptions {
            render: RenderOptions {
                colors: self.files.colors(self.no_colors),
                ..RenderOptions::default()
            },
            ..PipelineOptions::default()
        }
    }
}

pub fn run(command: Command) -> Result<(), Error> {
    let (mut pipeline, report) = match command {
        Command::Totals(args) => (
            pipelines::totals_report(args.files.input()?, args.files.output()?, &args.options())?,
            "totals",
        ),
        Command::Passing(args) => (
            pipelines::passing_report(args.files.input()?, args.files.output()?, &args.options())?,
            "passing",
        ),
        Command::Fails(args) => (
            pipelines::fails_report(args.files.input()?, args.files.output()?, &args.options())?,
            "fails",
        ),
        Command::Version(args) => (
            pipelines::version_report(args.files.input()?, args.files.output()?, &args.options())?,
            "version",
        ),
    };

    let summary = pipeline.run()?;
    if !pipeline.stop_flag().is_set() {
        debug!(report, "log ended without a STOP record, nothing reported");
    }
    debug!(report, pulled = summary.pulled, dropped = summary.dropped, "report complete");
    Ok(())
}
