//! ## RESP (REdis Serialization Protocol) wire codec
//!
//! The proxy terminates client connections and opens upstream connections
//! that both speak RESP. This crate reads and writes the six frame kinds a
//! cluster-aware proxy needs — arrays, integers, bulk strings, simple
//! strings, errors, and the two null sentinels — and layers the two typed
//! topology views on top of them (`CLUSTER SLOTS` / `CLUSTER NODES`
//! replies).

pub mod frame;
pub mod topology;

pub use frame::{Frame, read_frame, write_frame};

use std::str::Utf8Error;

#[derive(Debug)]
pub enum Error {
    /// The leading byte did not name one of the six known frame kinds, or
    /// a length/terminator was not where the grammar requires it.
    MalformedFrame,
    /// A bulk string declared a length larger than the scratch buffer's
    /// capacity.
    OversizeFrame,
    /// A `SLOTS` or `NODES` reply did not have the shape §4.2 requires.
    MalformedTopology,
    Io(std::io::Error),
    Utf8Error(Utf8Error),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}
