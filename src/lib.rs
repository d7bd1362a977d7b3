// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Streaming reader and writer for [CAR](https://ipld.io/specs/transport/car/)
//! (Content-Addressable aRchive) data.
//!
//! # Varint frames
//!
//! A CAR stream is a concatenation of _varint frames_: an unsigned LEB128
//! _body length_ followed by the _frame body_ itself.
//!
//! ```text
//! ├───────────┬─────────────┤
//! │varint:    │             │
//! │body length│frame body   │
//! └───────────┼─────────────┤
//!             │◄───────────►│
//!                =body length
//! ```
//!
//! The first frame is the _header frame_: a dag-cbor map carrying the format
//! version and the archive's root [`Cid`](cid::Cid)s. Every following frame
//! is a _block frame_, whose body is a CID followed by the block data it
//! addresses:
//!
//! ```text
//! ├───────────┬───┬──────────┤
//! │body length│cid│block data│
//! └───────────┴───┴──────────┘
//! ```
//!
//! A CARv2 stream wraps a complete v1 stream: an 11-byte pragma
//! ([`CARV2_PRAGMA`]), a 40-byte characteristics record, optional padding and
//! then the v1 payload. Reading v2 means locating that payload and decoding
//! it with the v1 machinery; the v2 index structures that may follow it are
//! not interpreted.
//!
//! # Reading
//!
//! Four surfaces share the same forward-only decoder and differ only in what
//! they keep resident and what they yield:
//!
//! - [`CarReader`] drains the archive up front into an ordered CID index
//!   for random access by CID.
//! - [`CarBlockIterator`] yields each [`CarBlock`] once, in on-wire order.
//! - [`CarCidIterator`] yields CIDs only, seeking over block data.
//! - [`CarIndexer`] yields [`BlockLocation`] records, enough to seek or
//!   mmap the underlying storage later.
//!
//! Each surface opens either a fully-buffered archive (`from_bytes`) or an
//! asynchronous sequence of byte chunks (`from_stream`). All reads suspend
//! only at chunk boundaries; a buffered archive decodes without suspending.
//!
//! # Writing
//!
//! [`CarWriter::create`] returns a writer paired with a [`CarOutput`] byte
//! stream. Sections are emitted strictly in `put` order and each `put` waits
//! for the consumer, so output never buffers more than one frame.

mod block;
mod block_cid;
mod error;
mod header;
mod reader;
mod section;
mod source;
mod stream;
pub mod varint;
mod writer;

pub use block::CarBlock;
pub use error::Error;
pub use header::{CarHeader, CarVersion, CARV2_HEADER_SIZE, CARV2_PRAGMA, CARV2_PRAGMA_SIZE};
pub use reader::CarReader;
pub use section::BlockLocation;
pub use source::{ByteSource, ChunkSource, SliceSource};
pub use stream::{CarBlockIterator, CarCidIterator, CarIndexer};
pub use writer::{update_roots_in_bytes, CarOutput, CarWriter};

/// Ceiling on the body length of a single section, unless overridden.
/// Sections claiming more than this fail with [`Error::SectionTooLarge`]
/// instead of being read.
pub const DEFAULT_MAX_SECTION_LEN: u64 = 32 * 1024 * 1024;
