//! Streaming and view-dependent rendering of Nexus multiresolution meshes.
//!
//! A [`Nexus`] opens a dataset from a [`RangeSource`], then once per frame picks the nodes that best match the view, fetches
//! the missing ones through a [`RangeFetcher`] and draws the selection through a [`GpuContext`].

mod config;
mod fetch;
mod gpu;
mod stream;

pub use config::{Config, ConfigError, StreamingConfig};
pub use fetch::{
    open_location, FetchCallback, FetchError, FetchRequest, FileSource, MemorySource, PooledFetcher, RangeFetcher,
    RangeSource,
};
#[cfg(feature = "http")]
pub use fetch::HttpSource;
pub use gpu::{BufferHandle, GpuCommand, GpuContext, HeadlessContext, NodeBinding, NodeBuffers, TextureHandle};
pub use stream::{
    point_count, retry_frame, DatasetState, DrawStats, Nexus, OpenError, RedrawSignal, RenderMode, Status,
    StreamEvent, ViewEstimator, Viewport,
};

pub use nexus_core as core;
pub use nexus_format as format;
