use crate::config::RenderOptions;
use crate::error::LogError;
use crate::record::{Body, Record};

use super::{Aggregator, Palette};

/// Reports the framework version announced by the log's VERSION record.
///
/// Records carry no wall-clock time, so unlike the other reports there is
/// no execution date line.
#[derive(Debug)]
pub struct VersionAggregator {
    palette: Palette,
    divider: String,
    version: Option<String>,
}

impl VersionAggregator {
    pub fn new(options: RenderOptions) -> Self {
        Self {
            palette: Palette::new(options.colors),
            divider: "\n".to_string(),
            version: None,
        }
    }

    pub fn with_divider(mut self, divider: impl Into<String>) -> Self {
        self.divider = divider.into();
        self
    }
}

impl Aggregator for VersionAggregator {
    fn accumulate(&mut self, record: &Record) -> Result<(), LogError> {
        if let Body::Version(version) = &record.body {
            self.version = Some(version.clone());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<String, LogError> {
        let Some(version) = self.version.as_deref().filter(|v| !v.is_empty()) else {
            return Ok(String::new());
        };
        let line = format!("{}Framework v{version}", self.divider);
        Ok(self.palette.dim(&line) + "\n")
    }
}
