// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use blake2b_simd::Params;
use bytes::Bytes;
use cid::Cid;
use sha2::{Digest, Sha256};

use crate::error::Error;

const CODE_IDENTITY: u64 = 0x00;
const CODE_SHA2_256: u64 = 0x12;
const CODE_BLAKE2B_256: u64 = 0xb220;

/// One content-addressed block: a CID and the bytes it names.
///
/// Nothing here guarantees that `cid` actually addresses `data`; decoding
/// trusts the archive. Call [`CarBlock::validate`] to check the digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CarBlock {
    pub cid: Cid,
    pub data: Bytes,
}

impl CarBlock {
    pub fn new(cid: Cid, data: impl Into<Bytes>) -> Self {
        CarBlock {
            cid,
            data: data.into(),
        }
    }

    pub fn valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Recomputes the multihash digest of `data` and compares it against the
    /// digest embedded in `cid`.
    pub fn validate(&self) -> Result<(), Error> {
        let digest = match self.cid.hash().code() {
            CODE_IDENTITY => self.data.to_vec(),
            CODE_SHA2_256 => hash_sha2_256(&self.data).to_vec(),
            CODE_BLAKE2B_256 => hash_blake2b_256(&self.data).to_vec(),
            code => return Err(Error::UnsupportedHashCode(code)),
        };
        if self.cid.hash().digest() != digest {
            return Err(Error::BlockDigestMismatch(self.cid.to_string()));
        }
        Ok(())
    }
}

fn hash_sha2_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn hash_blake2b_256(data: &[u8]) -> [u8; 32] {
    Params::new()
        .hash_length(32)
        .to_state()
        .update(data)
        .finalize()
        .as_bytes()
        .try_into()
        .expect("blake2b state configured for 32 bytes")
}
