// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::multihash::Multihash;
use cid::Cid;

use crate::error::Error;
use crate::source::ByteSource;
use crate::varint;

const CODE_SHA2_256: u64 = 0x12;
const CIDV0_DIGEST_LEN: usize = 32;
/// Digest cap of the multihash representation backing [`Cid`].
const MAX_DIGEST_LEN: u64 = 64;

/// Reads one CID from the current cursor, returning it together with the
/// number of bytes it occupied on the wire.
///
/// A leading `0x12 0x20` is the CIDv0 form: a bare 34-byte sha2-256
/// multihash. Everything else must be the CIDv1 varint form
/// `version ‖ codec ‖ multihash`.
pub(crate) async fn read_cid<S: ByteSource>(src: &mut S) -> Result<(Cid, usize), Error> {
    let start = src.pos();

    let is_v0 = {
        let peek = src.upto(2).await?;
        peek.len() == 2 && peek[0] == 0x12 && peek[1] == 0x20
    };
    if is_v0 {
        let bytes = src.exactly(2 + CIDV0_DIGEST_LEN).await?;
        let mh = Multihash::<64>::wrap(CODE_SHA2_256, &bytes[2..])
            .expect("digest is always 32 bytes");
        let cid = Cid::new_v0(mh).map_err(|e| Error::MalformedCid(e.to_string()))?;
        return Ok((cid, (src.pos() - start) as usize));
    }

    let version = varint::read_u64(src).await?;
    if version != 1 {
        return Err(Error::UnsupportedCidVersion(version));
    }
    let codec = varint::read_u64(src).await?;
    let (mh_code, digest) = read_multihash(src).await?;
    let mh = Multihash::<64>::wrap(mh_code, &digest).map_err(|e| Error::MalformedCid(e.to_string()))?;
    Ok((Cid::new_v1(codec, mh), (src.pos() - start) as usize))
}

async fn read_multihash<S: ByteSource>(src: &mut S) -> Result<(u64, bytes::Bytes), Error> {
    let code = varint::read_u64(src).await?;
    let digest_len = varint::read_u64(src).await?;
    if digest_len > MAX_DIGEST_LEN {
        return Err(Error::MalformedCid(format!(
            "multihash digest of {digest_len} bytes exceeds the {MAX_DIGEST_LEN} byte limit"
        )));
    }
    let digest = src.exactly(digest_len as usize).await?;
    Ok((code, digest))
}
