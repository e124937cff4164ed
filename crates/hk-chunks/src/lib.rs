//! hk-chunks: payload compression and fragmentation
//!
//! # Overview
//! - `deflate`: raw DEFLATE compression of whole payloads
//! - `fragment`: fixed-size slicing of a compressed payload and the
//!   per-fragment wire codec

pub mod deflate;
pub mod fragment;

pub use deflate::{compress, decompress};
pub use fragment::{fragment_count, join_fragments, split_fragments, Fragment, DEFAULT_FRAGMENT_SIZE};
