// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use tracing::trace;

use crate::block::CarBlock;
use crate::block_cid::read_cid;
use crate::error::Error;
use crate::header::{read_header, CarHeader, StreamEnd};
use crate::source::ByteSource;
use crate::varint;

/// Where one block section sits inside the archive.
///
/// `offset`/`length` delimit the whole varint frame, starting at the length
/// prefix; `block_offset`/`block_length` delimit the block data inside it.
/// Seeking to `block_offset` and reading `block_length` bytes yields the data
/// addressed by `cid` (but not the CID itself).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocation {
    pub cid: Cid,
    pub offset: u64,
    pub length: u64,
    pub block_offset: u64,
    pub block_length: u64,
}

/// Forward-only section framer. Decodes the header on construction and then
/// serves sections one at a time, never re-reading a byte.
pub(crate) struct Decoder<S> {
    source: S,
    header: CarHeader,
    end: StreamEnd,
    max_section_len: u64,
}

impl<S: ByteSource> Decoder<S> {
    pub async fn new(mut source: S, max_section_len: u64) -> Result<Self, Error> {
        let (header, end) = read_header(&mut source).await?;
        Ok(Decoder {
            source,
            header,
            end,
            max_section_len,
        })
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    pub fn set_max_section_len(&mut self, max_section_len: u64) {
        self.max_section_len = max_section_len;
    }

    /// Reads the next section up to the end of its CID, leaving the cursor at
    /// the block data. `None` once the sections are exhausted.
    async fn read_section_head(&mut self) -> Result<Option<BlockLocation>, Error> {
        match self.end {
            StreamEnd::AfterNBytes(end) if self.source.pos() >= end => return Ok(None),
            StreamEnd::OnBlockEOF => {
                if self.source.upto(1).await?.is_empty() {
                    return Ok(None);
                }
            }
            StreamEnd::AfterNBytes(_) => {}
        }

        let offset = self.source.pos();
        let body_length = varint::read_u64(&mut self.source).await?;
        if body_length == 0 {
            return Err(Error::ZeroLengthSection);
        }
        if body_length > self.max_section_len {
            return Err(Error::SectionTooLarge {
                len: body_length,
                max: self.max_section_len,
            });
        }
        let length = (self.source.pos() - offset) + body_length;
        if let StreamEnd::AfterNBytes(end) = self.end {
            // a frame crossing the data bound means the declared data size
            // was cut short
            if offset + length > end {
                return Err(Error::UnexpectedEnd);
            }
        }

        let (cid, cid_len) = read_cid(&mut self.source).await?;
        if cid_len as u64 > body_length {
            return Err(Error::MalformedSection(format!(
                "CID of {cid_len} bytes overruns section of {body_length} bytes"
            )));
        }
        let block_offset = self.source.pos();
        let block_length = body_length - cid_len as u64;
        trace!(%cid, block_offset, block_length, "read section head");
        Ok(Some(BlockLocation {
            cid,
            offset,
            length,
            block_offset,
            block_length,
        }))
    }

    /// Next section with its block data materialised.
    pub async fn next_block(&mut self) -> Result<Option<CarBlock>, Error> {
        match self.read_section_head().await? {
            None => Ok(None),
            Some(head) => {
                let data = self.source.exactly(head.block_length as usize).await?;
                Ok(Some(CarBlock {
                    cid: head.cid,
                    data,
                }))
            }
        }
    }

    /// Next section's CID only; the block data is seeked over, not read.
    pub async fn next_cid(&mut self) -> Result<Option<Cid>, Error> {
        match self.read_section_head().await? {
            None => Ok(None),
            Some(head) => {
                self.source.seek(head.block_length).await?;
                Ok(Some(head.cid))
            }
        }
    }

    /// Next section's location only; the block data is seeked over, not read.
    pub async fn next_location(&mut self) -> Result<Option<BlockLocation>, Error> {
        match self.read_section_head().await? {
            None => Ok(None),
            Some(head) => {
                self.source.seek(head.block_length).await?;
                Ok(Some(head))
            }
        }
    }
}
