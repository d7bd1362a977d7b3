// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::io;

use bytes::Bytes;
use cid::Cid;
use futures::Stream;
use indexmap::IndexMap;
use tracing::debug;

use crate::block::CarBlock;
use crate::error::Error;
use crate::header::{CarHeader, CarVersion};
use crate::section::Decoder;
use crate::source::{ByteSource, ChunkSource, SliceSource};
use crate::DEFAULT_MAX_SECTION_LEN;

/// Whole-archive reader with random access by CID.
///
/// Construction drains the archive eagerly and fails as a whole on any
/// framing error. Once built, every accessor is synchronous and the reader is
/// immutable, so it can be shared freely.
///
/// Duplicate CIDs in one archive: the first payload wins; [`CarReader::blocks`]
/// and [`CarReader::cids`] emit each CID once, at its first-occurrence
/// position.
#[derive(Debug)]
pub struct CarReader {
    header: CarHeader,
    index: IndexMap<Cid, Bytes>,
}

impl CarReader {
    /// Indexes an archive held in memory. Block data is sliced out of the
    /// buffer without copying.
    pub async fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, Error> {
        Self::from_bytes_with_limit(bytes, DEFAULT_MAX_SECTION_LEN).await
    }

    pub async fn from_bytes_with_limit(
        bytes: impl Into<Bytes>,
        max_section_len: u64,
    ) -> Result<Self, Error> {
        Self::build(SliceSource::new(bytes), max_section_len).await
    }

    /// Indexes an archive arriving as a sequence of byte chunks.
    pub async fn from_stream<S>(stream: S) -> Result<Self, Error>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        Self::from_stream_with_limit(stream, DEFAULT_MAX_SECTION_LEN).await
    }

    pub async fn from_stream_with_limit<S>(stream: S, max_section_len: u64) -> Result<Self, Error>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        Self::build(ChunkSource::new(stream), max_section_len).await
    }

    async fn build<S: ByteSource>(source: S, max_section_len: u64) -> Result<Self, Error> {
        let mut decoder = Decoder::new(source, max_section_len).await?;
        let mut index = IndexMap::new();
        while let Some(block) = decoder.next_block().await? {
            // first write wins; later duplicates keep the original payload
            index.entry(block.cid).or_insert(block.data);
        }
        debug!(num_blocks = index.len(), "indexed CAR");
        Ok(CarReader {
            header: decoder.header().clone(),
            index,
        })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn version(&self) -> CarVersion {
        self.header.version
    }

    pub fn roots(&self) -> &[Cid] {
        &self.header.roots
    }

    /// The outer characteristics bytes of a v2 archive, little-endian.
    pub fn characteristics(&self) -> Option<u128> {
        self.header.characteristics
    }

    pub fn has(&self, cid: &Cid) -> bool {
        self.index.contains_key(cid)
    }

    /// The block stored under `cid`, if any. The returned data is a cheap
    /// reference-counted clone.
    pub fn get(&self, cid: &Cid) -> Option<CarBlock> {
        self.index.get(cid).map(|data| CarBlock {
            cid: *cid,
            data: data.clone(),
        })
    }

    /// Blocks in archive order.
    pub fn blocks(&self) -> impl Iterator<Item = CarBlock> + '_ {
        self.index.iter().map(|(cid, data)| CarBlock {
            cid: *cid,
            data: data.clone(),
        })
    }

    /// CIDs in archive order.
    pub fn cids(&self) -> impl Iterator<Item = Cid> + '_ {
        self.index.keys().copied()
    }

    /// Number of distinct blocks in the archive.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
