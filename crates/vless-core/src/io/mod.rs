//! I/O adapters shared by the server and its tests.

mod prefixed;

pub use prefixed::PrefixedStream;
