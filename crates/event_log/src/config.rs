use std::time::Duration;

/// Digest used by the writer's rolling hash chain.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum HashAlgorithm {
    /// 160-bit SHA-1.
    #[default]
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct HashConfig {
    pub algorithm: HashAlgorithm,
    /// Number of hex characters of the digest kept in each record.
    pub length: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha1,
            length: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct WriterConfig {
    pub hash: HashConfig,
    /// Decimal places kept for `relative_time`.
    pub time_resolution: u32,
    /// Write the log as an xz stream instead of plain text.
    pub compress: bool,
    pub compression_level: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            hash: HashConfig::default(),
            time_resolution: 6,
            compress: false,
            compression_level: 6,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ReaderConfig {
    /// Keep waiting for more bytes at end of file instead of terminating.
    pub tail: bool,
    pub poll_interval: Duration,
    pub chunk_size: usize,
    pub max_line_bytes: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            tail: false,
            poll_interval: Duration::from_millis(150),
            chunk_size: 64 * 1024,
            max_line_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ReaderConfig {
    pub fn tailing() -> Self {
        Self {
            tail: true,
            ..Self::default()
        }
    }
}

/// Options shared by renderer and aggregator stages.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RenderOptions {
    /// Render records of nodes carrying the skip flag.
    pub show_skipped: bool,
    /// Emit ANSI styling.
    pub colors: bool,
}
