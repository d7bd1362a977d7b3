// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Single-pass streaming surfaces over one archive.
//!
//! Each surface decodes the header eagerly on construction and then yields
//! its sections exactly once, either through the low-level `next_*` pull
//! methods or through the lazy sequence returned by
//! `blocks()`/`cids()`/`locations()`. The lazy sequence may only be created
//! once; a failed surface keeps returning the error that stopped it.

use std::io;

use bytes::Bytes;
use cid::Cid;
use futures::Stream;

use crate::block::CarBlock;
use crate::error::Error;
use crate::header::{CarHeader, CarVersion};
use crate::section::{BlockLocation, Decoder};
use crate::source::{ByteSource, ChunkSource, SliceSource};
use crate::DEFAULT_MAX_SECTION_LEN;

enum IterState {
    Fresh,
    Consuming,
    Done,
    Errored(Error),
}

impl IterState {
    /// Gate for creating the lazy sequence; only a fresh surface may start.
    fn begin(&mut self, what: &'static str) -> Result<(), Error> {
        match self {
            IterState::Fresh => {
                *self = IterState::Consuming;
                Ok(())
            }
            _ => Err(Error::AlreadyConsumed(what)),
        }
    }
}

macro_rules! streaming_surface {
    (
        $(#[$doc:meta])*
        $name:ident, $item:ty, $next_fn:ident, $decoder_fn:ident, $seq_fn:ident, $what:literal
    ) => {
        $(#[$doc])*
        pub struct $name<S> {
            decoder: Decoder<S>,
            state: IterState,
        }

        impl $name<SliceSource> {
            /// Opens an archive held in memory, decoding the header eagerly.
            pub async fn from_bytes(bytes: impl Into<Bytes>) -> Result<Self, Error> {
                let source = SliceSource::new(bytes);
                Ok($name {
                    decoder: Decoder::new(source, DEFAULT_MAX_SECTION_LEN).await?,
                    state: IterState::Fresh,
                })
            }
        }

        impl<S> $name<ChunkSource<S>>
        where
            S: Stream<Item = io::Result<Bytes>> + Unpin,
        {
            /// Opens an archive arriving as a sequence of byte chunks,
            /// decoding the header eagerly.
            pub async fn from_stream(stream: S) -> Result<Self, Error> {
                let source = ChunkSource::new(stream);
                Ok($name {
                    decoder: Decoder::new(source, DEFAULT_MAX_SECTION_LEN).await?,
                    state: IterState::Fresh,
                })
            }
        }

        impl<S: ByteSource> $name<S> {
            /// Replaces the section-length ceiling applied to subsequent
            /// sections.
            pub fn with_max_section_len(mut self, max_section_len: u64) -> Self {
                self.decoder.set_max_section_len(max_section_len);
                self
            }

            pub fn header(&self) -> &CarHeader {
                self.decoder.header()
            }

            pub fn version(&self) -> CarVersion {
                self.decoder.header().version
            }

            pub fn roots(&self) -> &[Cid] {
                &self.decoder.header().roots
            }

            /// Pulls the next item, or `None` once the archive is exhausted.
            ///
            /// After an error every subsequent call returns that same error;
            /// after exhaustion every subsequent call returns `None`.
            pub async fn $next_fn(&mut self) -> Result<Option<$item>, Error> {
                match &self.state {
                    IterState::Done => return Ok(None),
                    IterState::Errored(err) => return Err(err.clone()),
                    IterState::Fresh => self.state = IterState::Consuming,
                    IterState::Consuming => {}
                }
                match self.decoder.$decoder_fn().await {
                    Ok(Some(item)) => Ok(Some(item)),
                    Ok(None) => {
                        self.state = IterState::Done;
                        Ok(None)
                    }
                    Err(err) => {
                        self.state = IterState::Errored(err.clone());
                        Err(err)
                    }
                }
            }

            /// The lazy sequence of items, in on-wire order. May only be
            /// created once.
            pub fn $seq_fn(
                &mut self,
            ) -> Result<impl Stream<Item = Result<$item, Error>> + '_, Error> {
                self.state.begin($what)?;
                Ok(futures::stream::unfold(self, |surface| async move {
                    match surface.$next_fn().await {
                        Ok(None) => None,
                        Ok(Some(item)) => Some((Ok(item), surface)),
                        Err(err) => Some((Err(err), surface)),
                    }
                }))
            }
        }
    };
}

streaming_surface!(
    /// Single-pass iterator over the blocks of an archive.
    CarBlockIterator,
    CarBlock,
    next_block,
    next_block,
    blocks,
    "blocks"
);

streaming_surface!(
    /// Single-pass iterator over the CIDs of an archive. Block data is
    /// seeked over, never materialised, which keeps memory flat for large
    /// archives.
    CarCidIterator,
    Cid,
    next_cid,
    next_cid,
    cids,
    "CIDs"
);

streaming_surface!(
    /// Single-pass indexer: yields each section's position and extent
    /// without materialising block data, enough for a consumer to seek or
    /// mmap the underlying storage later.
    CarIndexer,
    BlockLocation,
    next_location,
    next_location,
    locations,
    "locations"
);
