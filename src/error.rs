// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::io;

/// Errors raised while reading or writing CAR data.
///
/// The enum is `Clone` so that a failed streaming iterator can keep returning
/// the error that stopped it; io errors are therefore carried as their kind
/// plus rendered message rather than as [`std::io::Error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Invalid CAR header (zero length)")]
    ZeroLengthHeader,
    #[error("Invalid CAR section (zero length)")]
    ZeroLengthSection,
    #[error("Unexpected end of data")]
    UnexpectedEnd,
    #[error("Cannot read {0} more than once")]
    AlreadyConsumed(&'static str),
    #[error("Invalid CAR version: {0}")]
    UnsupportedVersion(u64),
    #[error("Unsupported CID version: {0}")]
    UnsupportedCidVersion(u64),
    #[error("Invalid CAR header format: {0}")]
    MalformedHeader(String),
    #[error("Invalid CAR section: {0}")]
    MalformedSection(String),
    #[error("Invalid CID: {0}")]
    MalformedCid(String),
    #[error("varint too long")]
    VarintTooLong,
    #[error("varint overflow")]
    VarintOverflow,
    #[error("CAR section of {len} bytes exceeds maximum of {max} bytes")]
    SectionTooLarge { len: u64, max: u64 },
    #[error("CAR writer is closed")]
    WriterClosed,
    #[error("CAR output stream dropped before close")]
    OutputDropped,
    #[error("updated CAR header (length {new}) does not match existing header (length {existing})")]
    HeaderLengthMismatch { new: usize, existing: usize },
    #[error("unsupported multihash code {0:#x}")]
    UnsupportedHashCode(u64),
    #[error("CID/block digest mismatch for {0}")]
    BlockDigestMismatch(String),
    #[error("Io error: {1}")]
    Io(io::ErrorKind, String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err.kind(), err.to_string())
    }
}
