// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Byte sources the decoder pulls from.
//!
//! A CAR stream is consumed strictly forward, so the contract is small:
//! peek ([`ByteSource::upto`]), consume ([`ByteSource::exactly`]), skip
//! ([`ByteSource::seek`]) and tell ([`ByteSource::pos`]). [`SliceSource`]
//! serves a fully-buffered archive with zero-copy reads; [`ChunkSource`]
//! serves an asynchronous sequence of byte chunks, buffering only the
//! unconsumed tail.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::error::Error;

/// Forward-only cursor over the bytes of one archive.
///
/// `upto` returns fewer than `n` bytes only when the source is exhausted;
/// an empty return therefore means end of data. `seek` may only advance.
#[allow(async_fn_in_trait)]
pub trait ByteSource {
    /// Peek at up to `n` bytes without consuming them.
    async fn upto(&mut self, n: usize) -> Result<&[u8], Error>;

    /// Consume exactly `n` bytes.
    async fn exactly(&mut self, n: usize) -> Result<Bytes, Error>;

    /// Advance the cursor by `n` bytes without materialising them.
    async fn seek(&mut self, n: u64) -> Result<(), Error>;

    /// Absolute byte offset since the start of the source.
    fn pos(&self) -> u64;
}

/// Byte source over a single in-memory buffer. Never suspends; `exactly`
/// hands out zero-copy slices of the backing [`Bytes`].
pub struct SliceSource {
    data: Bytes,
    pos: usize,
}

impl SliceSource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        SliceSource {
            data: data.into(),
            pos: 0,
        }
    }
}

impl ByteSource for SliceSource {
    async fn upto(&mut self, n: usize) -> Result<&[u8], Error> {
        let end = self.data.len().min(self.pos.saturating_add(n));
        Ok(&self.data[self.pos..end])
    }

    async fn exactly(&mut self, n: usize) -> Result<Bytes, Error> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(Error::UnexpectedEnd)?;
        let out = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(out)
    }

    async fn seek(&mut self, n: u64) -> Result<(), Error> {
        let n = usize::try_from(n).map_err(|_| Error::UnexpectedEnd)?;
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(Error::UnexpectedEnd)?;
        self.pos = end;
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos as u64
    }
}

/// Byte source over an asynchronous sequence of byte chunks.
///
/// Unconsumed chunks sit in a deque; reads served from a single chunk are
/// zero-copy (`Bytes::split_to`), reads crossing a chunk boundary are
/// concatenated. Consumed chunks are dropped eagerly, so memory residency is
/// bounded by the largest single read plus one upstream chunk. Zero-length
/// upstream chunks are discarded and the stream re-polled.
pub struct ChunkSource<S> {
    stream: S,
    chunks: VecDeque<Bytes>,
    buffered: usize,
    pos: u64,
    exhausted: bool,
}

impl<S> ChunkSource<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    pub fn new(stream: S) -> Self {
        ChunkSource {
            stream,
            chunks: VecDeque::new(),
            buffered: 0,
            pos: 0,
            exhausted: false,
        }
    }

    /// Pull upstream chunks until `want` bytes are buffered or the stream ends.
    async fn fill(&mut self, want: usize) -> Result<(), Error> {
        while self.buffered < want && !self.exhausted {
            match self.stream.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    self.buffered += chunk.len();
                    self.chunks.push_back(chunk);
                }
                Some(Err(err)) => return Err(err.into()),
                None => self.exhausted = true,
            }
        }
        Ok(())
    }

    /// Make the head chunk hold at least `min(n, buffered)` contiguous bytes.
    fn coalesce_front(&mut self, n: usize) {
        let want = n.min(self.buffered);
        if want == 0 || self.chunks.front().is_some_and(|head| head.len() >= want) {
            return;
        }
        let mut head = BytesMut::with_capacity(want);
        while head.len() < want {
            let mut chunk = self.chunks.pop_front().expect("buffered bytes accounted");
            let take = (want - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk.split_to(take));
            if !chunk.is_empty() {
                self.chunks.push_front(chunk);
                break;
            }
        }
        self.chunks.push_front(head.freeze());
    }
}

impl<S> ByteSource for ChunkSource<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    async fn upto(&mut self, n: usize) -> Result<&[u8], Error> {
        self.fill(n).await?;
        self.coalesce_front(n);
        match self.chunks.front() {
            Some(head) => Ok(&head[..n.min(head.len())]),
            None => Ok(&[]),
        }
    }

    async fn exactly(&mut self, n: usize) -> Result<Bytes, Error> {
        if n == 0 {
            return Ok(Bytes::new());
        }
        self.fill(n).await?;
        if self.buffered < n {
            return Err(Error::UnexpectedEnd);
        }
        self.buffered -= n;
        self.pos += n as u64;

        let head = self.chunks.front_mut().expect("buffered bytes accounted");
        if head.len() >= n {
            let out = head.split_to(n);
            if head.is_empty() {
                self.chunks.pop_front();
            }
            return Ok(out);
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let mut chunk = self.chunks.pop_front().expect("buffered bytes accounted");
            let take = (n - out.len()).min(chunk.len());
            out.extend_from_slice(&chunk.split_to(take));
            if !chunk.is_empty() {
                self.chunks.push_front(chunk);
            }
        }
        Ok(out.freeze())
    }

    async fn seek(&mut self, n: u64) -> Result<(), Error> {
        let mut remaining = n;
        while remaining > 0 {
            if self.chunks.is_empty() {
                self.fill(1).await?;
                if self.chunks.is_empty() {
                    return Err(Error::UnexpectedEnd);
                }
            }
            let head = self.chunks.front_mut().expect("just checked non-empty");
            let take = remaining.min(head.len() as u64) as usize;
            head.advance(take);
            self.buffered -= take;
            self.pos += take as u64;
            if head.is_empty() {
                self.chunks.pop_front();
            }
            remaining -= take as u64;
        }
        Ok(())
    }

    fn pos(&self) -> u64 {
        self.pos
    }
}
