//! Asynchronous byte-range fetching.
//!
//! A [`RangeSource`] knows how to read a byte range from somewhere, blocking the calling thread. A [`RangeFetcher`] turns
//! that into fire-and-forget requests whose results come back through a [`FetchCallback`], possibly on another thread.

mod pooled;
mod source;

pub use pooled::*;
pub use source::*;

use crate::format::{ByteRange, FormatError};

use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum FetchError {
    #[error("range {range:?} starts past the end of the source ({len} bytes)")]
    OutOfBounds { range: ByteRange, len: u64 },
    #[error("I/O error: {0}")]
    Io(String),
    #[error("HTTP request failed with status {0}")]
    Status(u16),
    #[error("unsupported location {0:?}")]
    UnsupportedLocation(String),
    #[error(transparent)]
    Format(#[from] FormatError),
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// One range read against one source.
#[derive(Clone)]
pub struct FetchRequest {
    pub source: Arc<dyn RangeSource>,
    pub range: ByteRange,
}

impl FetchRequest {
    pub fn new(source: Arc<dyn RangeSource>, range: ByteRange) -> Self {
        Self { source, range }
    }

    /// Performs the read on the calling thread.
    pub fn read(&self) -> Result<Vec<u8>, FetchError> {
        self.source.read_range(self.range)
    }
}

pub type FetchCallback = Box<dyn FnOnce(Result<Vec<u8>, FetchError>) + Send>;

/// Issues range requests without blocking. Every request must eventually call its callback exactly once.
pub trait RangeFetcher: Send + Sync {
    fn fetch(&self, request: FetchRequest, on_complete: FetchCallback);
}
