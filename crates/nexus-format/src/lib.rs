//! The Nexus multiresolution mesh format.
//!
//! A dataset is a single file made of three parts:
//!
//! 1. A fixed-size [`Header`] describing the vertex and face layout ([`Signature`]), the record counts and a bounding sphere.
//! 2. The index: dense arrays of [`Node`], [`Patch`] and [`Texture`] records. Together they form a DAG of levels of detail,
//!    where each node's patches point at the finer child nodes that refine them. The last node is the "sink," a placeholder
//!    that only bounds the byte range of the node before it.
//! 3. Node payloads (and texture blobs) stored at [`PADDING`]-aligned offsets, referenced from the records.
//!
//! All numbers have the same byte order, chosen by the reader with [`ByteOrder`].

mod error;
mod header;
mod index;
mod payload;
mod reader;
mod signature;
mod units;
mod writer;

pub use error::*;
pub use header::*;
pub use index::*;
pub use payload::*;
pub use reader::*;
pub use signature::*;
pub use units::*;
pub use writer::*;

pub use nexus_core as core;
