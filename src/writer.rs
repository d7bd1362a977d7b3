// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::{BufMut, Bytes, BytesMut};
use cid::Cid;
use futures::channel::mpsc;
use futures::{SinkExt, Stream};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::Error;
use crate::header::{encode_v1_header, CarV1HeaderWire};
use crate::varint;
use crate::{CarBlock, DEFAULT_MAX_SECTION_LEN};

/// Push-style v1 archive encoder.
///
/// [`CarWriter::create`] pairs the writer with a [`CarOutput`] byte stream.
/// The header frame is queued at creation; each [`CarWriter::put`] frames one
/// section and resolves once the consumer has made room for it, so a slow
/// consumer exerts backpressure without ever reordering sections.
pub struct CarWriter {
    tx: mpsc::Sender<Bytes>,
    max_section_len: u64,
    closed: bool,
}

pin_project! {
    /// The encoded byte stream produced by a [`CarWriter`]. Ends after
    /// [`CarWriter::close`].
    pub struct CarOutput {
        #[pin]
        rx: mpsc::Receiver<Bytes>,
    }
}

impl Stream for CarOutput {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().rx.poll_next(cx)
    }
}

impl CarWriter {
    /// Creates a writer for a v1 archive with the given roots (which may be
    /// empty). The header frame is queued immediately, so even an archive
    /// closed without any blocks yields a well-formed stream.
    pub fn create(roots: Vec<Cid>) -> Result<(CarWriter, CarOutput), Error> {
        let (mut tx, rx) = mpsc::channel(0);
        let header = encode_v1_header(&roots)?;
        tx.try_send(header)
            .expect("fresh channel has a free sender slot");
        Ok((
            CarWriter {
                tx,
                max_section_len: DEFAULT_MAX_SECTION_LEN,
                closed: false,
            },
            CarOutput { rx },
        ))
    }

    /// Replaces the section-length ceiling enforced by [`CarWriter::put`].
    pub fn with_max_section_len(mut self, max_section_len: u64) -> Self {
        self.max_section_len = max_section_len;
        self
    }

    /// Frames one section and hands it to the output stream, waiting for the
    /// consumer if the channel is full.
    pub async fn put(&mut self, block: &CarBlock) -> Result<(), Error> {
        if self.closed {
            return Err(Error::WriterClosed);
        }
        let body_len = block.cid.encoded_len() + block.data.len();
        if body_len as u64 > self.max_section_len {
            return Err(Error::SectionTooLarge {
                len: body_len as u64,
                max: self.max_section_len,
            });
        }

        let mut len_buf = varint::buffer();
        let len = varint::encode(body_len as u64, &mut len_buf);
        let mut frame = BytesMut::with_capacity(len.len() + body_len);
        frame.extend_from_slice(len);
        block
            .cid
            .write_bytes((&mut frame).writer())
            .map_err(|e| Error::MalformedCid(e.to_string()))?;
        frame.extend_from_slice(&block.data);

        self.tx
            .send(frame.freeze())
            .await
            .map_err(|_| Error::OutputDropped)
    }

    /// Ends the output stream. Any later [`CarWriter::put`] or `close` fails
    /// with [`Error::WriterClosed`].
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::WriterClosed);
        }
        self.closed = true;
        self.tx.close_channel();
        Ok(())
    }
}

/// Rewrites the roots of a v1 header in place.
///
/// The replacement header must encode to exactly the byte length of the
/// existing one; CIDs of the same shape (same version, codec and digest size)
/// satisfy this.
pub fn update_roots_in_bytes(bytes: &mut [u8], roots: Vec<Cid>) -> Result<(), Error> {
    let (existing_len, varint_len) = varint::decode(bytes)?;
    if existing_len == 0 {
        return Err(Error::ZeroLengthHeader);
    }
    let end = varint_len + existing_len as usize;
    if bytes.len() < end {
        return Err(Error::UnexpectedEnd);
    }
    let wire: CarV1HeaderWire = serde_ipld_dagcbor::from_slice(&bytes[varint_len..end])
        .map_err(|e| Error::MalformedHeader(e.to_string()))?;
    if wire.version != 1 {
        return Err(Error::UnsupportedVersion(wire.version));
    }
    if wire.roots.is_none() {
        return Err(Error::MalformedHeader("v1 header has no roots".to_string()));
    }

    let new_frame = encode_v1_header(&roots)?;
    if new_frame.len() != end {
        return Err(Error::HeaderLengthMismatch {
            new: new_frame.len(),
            existing: end,
        });
    }
    bytes[..end].copy_from_slice(&new_frame);
    Ok(())
}
