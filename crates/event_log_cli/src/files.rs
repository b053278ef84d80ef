use std::fs::File;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use clap::Args;
use event_log::{LogError, TestId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Log(#[from] LogError),
}

/// Input log and output destination shared by every command.
#[derive(Debug, Args)]
pub struct Files {
    /// Log file to read; `-` reads stdin.
    #[arg(default_value = "-")]
    pub log: PathBuf,

    /// Write to this file instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Files {
    pub fn input(&self) -> Result<Box<dyn Read>, Error> {
        if is_stdio(&self.log) {
            return Ok(Box::new(io::stdin()));
        }
        let file = File::open(&self.log).map_err(|source| Error::Open {
            path: self.log.clone(),
            source,
        })?;
        Ok(Box::new(file))
    }

    pub fn output(&self) -> Result<Box<dyn Write>, Error> {
        match &self.output {
            Some(path) if !is_stdio(path) => {
                let file = File::create(path).map_err(|source| Error::Create {
                    path: path.clone(),
                    source,
                })?;
                Ok(Box::new(file))
            }
            _ => Ok(Box::new(io::stdout())),
        }
    }

    /// Styling is on only when writing to an interactive terminal.
    pub fn colors(&self, no_colors: bool) -> bool {
        let to_stdout = self.output.as_deref().map_or(true, is_stdio);
        !no_colors && to_stdout && io::stdout().is_terminal()
    }
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

pub fn parse_test_id(raw: &str) -> Result<TestId, String> {
    TestId::parse_path(raw).ok_or_else(|| format!("expected a node path such as /0/1, got {raw:?}"))
}
