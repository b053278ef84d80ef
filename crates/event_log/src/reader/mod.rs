mod decode;
mod lines;

#[cfg(feature = "tokio")]
mod tokio;

pub use decode::{Fill, LogReader, XZ_MAGIC};
pub use lines::{BoundedLine, BoundedLines};

#[cfg(feature = "tokio")]
pub use self::tokio::AsyncLogTail;
