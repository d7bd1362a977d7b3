// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::{Bytes, BytesMut};
use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::source::ByteSource;
use crate::varint;

/// The fixed preamble identifying a CARv2 stream. Decodes as an ordinary
/// length-prefixed header frame whose CBOR body is `{"version": 2}`.
pub const CARV2_PRAGMA: [u8; 11] = [
    0x0a, // frame length 10
    0xa1, // map, 1 entry
    0x67, // string, 7 bytes
    0x76, 0x65, 0x72, 0x73, 0x69, 0x6f, 0x6e, // "version"
    0x02, // 2
];

pub const CARV2_PRAGMA_SIZE: usize = 11;
/// Size of the fixed characteristics record that follows the pragma.
pub const CARV2_HEADER_SIZE: usize = 40;

/// Sanity bound on the header frame, so a corrupt length prefix cannot drive
/// a large allocation.
const MAX_HEADER_LEN: u64 = 1_048_576;

/// Header frame body as it appears on the wire. `roots` is optional because
/// the v2 pragma carries none.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct CarV1HeaderWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Vec<Cid>>,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarVersion {
    V1 = 1,
    V2 = 2,
}

/// Decoded archive header. For a v2 archive the roots come from the embedded
/// v1 header and the outer characteristics bytes are preserved, little-endian,
/// without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarHeader {
    pub version: CarVersion,
    pub roots: Vec<Cid>,
    pub characteristics: Option<u128>,
}

/// Where the block sections stop: at source EOF for v1, or at a byte bound
/// for the v1 payload embedded in a v2 archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamEnd {
    OnBlockEOF,
    AfterNBytes(u64),
}

/// The fixed-size record at offset 11 of a v2 archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CarV2Header {
    pub characteristics: u128,
    pub data_offset: u64,
    pub data_size: u64,
    #[allow(dead_code)]
    pub index_offset: u64,
}

impl From<[u8; CARV2_HEADER_SIZE]> for CarV2Header {
    fn from(bytes: [u8; CARV2_HEADER_SIZE]) -> Self {
        CarV2Header {
            characteristics: u128::from_le_bytes(bytes[0..16].try_into().expect("16 bytes")),
            data_offset: u64::from_le_bytes(bytes[16..24].try_into().expect("8 bytes")),
            data_size: u64::from_le_bytes(bytes[24..32].try_into().expect("8 bytes")),
            index_offset: u64::from_le_bytes(bytes[32..40].try_into().expect("8 bytes")),
        }
    }
}

/// Reads the archive header, leaving the cursor at the first block section.
///
/// For a v2 archive this consumes the pragma and characteristics record,
/// skips any padding, decodes the embedded v1 header and returns the byte
/// bound at which the sections stop.
#[tracing::instrument(level = "trace", skip_all)]
pub(crate) async fn read_header<S: ByteSource>(src: &mut S) -> Result<(CarHeader, StreamEnd), Error> {
    let outer = read_header_frame(src).await?;
    match outer.version {
        1 => Ok((
            CarHeader {
                version: CarVersion::V1,
                roots: required_roots(outer.roots)?,
                characteristics: None,
            },
            StreamEnd::OnBlockEOF,
        )),
        2 => {
            let v2 = read_v2_header(src).await?;
            let pos = src.pos();
            if v2.data_offset < pos {
                return Err(Error::MalformedHeader(format!(
                    "v2 data offset {} overlaps the v2 header",
                    v2.data_offset
                )));
            }
            src.seek(v2.data_offset - pos).await?;

            let inner = read_header_frame(src).await?;
            if inner.version != 1 {
                return Err(Error::UnsupportedVersion(inner.version));
            }
            let end = v2
                .data_offset
                .checked_add(v2.data_size)
                .ok_or_else(|| Error::MalformedHeader("v2 data extent overflows".to_string()))?;
            Ok((
                CarHeader {
                    version: CarVersion::V2,
                    roots: required_roots(inner.roots)?,
                    characteristics: Some(v2.characteristics),
                },
                StreamEnd::AfterNBytes(end),
            ))
        }
        version => Err(Error::UnsupportedVersion(version)),
    }
}

fn required_roots(roots: Option<Vec<Cid>>) -> Result<Vec<Cid>, Error> {
    roots.ok_or_else(|| Error::MalformedHeader("v1 header has no roots".to_string()))
}

async fn read_header_frame<S: ByteSource>(src: &mut S) -> Result<CarV1HeaderWire, Error> {
    let header_len = varint::read_u64(src).await?;
    if header_len == 0 {
        return Err(Error::ZeroLengthHeader);
    }
    if header_len > MAX_HEADER_LEN {
        return Err(Error::MalformedHeader(format!(
            "header of {header_len} bytes exceeds maximum of {MAX_HEADER_LEN} bytes"
        )));
    }
    let buf = src.exactly(header_len as usize).await?;
    serde_ipld_dagcbor::from_slice(&buf).map_err(|e| Error::MalformedHeader(e.to_string()))
}

async fn read_v2_header<S: ByteSource>(src: &mut S) -> Result<CarV2Header, Error> {
    let buf = src.exactly(CARV2_HEADER_SIZE).await?;
    let mut bytes = [0u8; CARV2_HEADER_SIZE];
    bytes.copy_from_slice(&buf);
    Ok(CarV2Header::from(bytes))
}

/// Encodes a v1 header frame: varint length prefix plus the CBOR body.
pub(crate) fn encode_v1_header(roots: &[Cid]) -> Result<Bytes, Error> {
    let wire = CarV1HeaderWire {
        roots: Some(roots.to_vec()),
        version: 1,
    };
    let body =
        serde_ipld_dagcbor::to_vec(&wire).map_err(|e| Error::MalformedHeader(e.to_string()))?;
    let mut len_buf = varint::buffer();
    let len = varint::encode(body.len() as u64, &mut len_buf);
    let mut frame = BytesMut::with_capacity(len.len() + body.len());
    frame.extend_from_slice(len);
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}
