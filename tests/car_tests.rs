// Copyright 2019-2025 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::io;

use bytes::Bytes;
use car_stream::{
    update_roots_in_bytes, varint, CarBlock, CarBlockIterator, CarCidIterator, CarIndexer,
    CarReader, CarVersion, CarWriter, Error, CARV2_HEADER_SIZE, CARV2_PRAGMA, CARV2_PRAGMA_SIZE,
};
use cid::multihash::Multihash;
use cid::Cid;
use futures::{Stream, StreamExt, TryStreamExt};
use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use sha2::{Digest, Sha256};

const IPLD_RAW: u64 = 0x55;
const SHA2_256: u64 = 0x12;

fn raw_cid(data: &[u8]) -> Cid {
    let digest: [u8; 32] = Sha256::digest(data).into();
    Cid::new_v1(
        IPLD_RAW,
        Multihash::<64>::wrap(SHA2_256, &digest).unwrap(),
    )
}

fn raw_block(data: &[u8]) -> CarBlock {
    CarBlock::new(raw_cid(data), data.to_vec())
}

async fn write_car(roots: Vec<Cid>, blocks: &[CarBlock]) -> Vec<u8> {
    let (mut writer, output) = CarWriter::create(roots).unwrap();
    let write = async {
        for block in blocks {
            writer.put(block).await.unwrap();
        }
        writer.close().await.unwrap();
    };
    let (_, frames) = futures::join!(write, output.collect::<Vec<Bytes>>());
    let mut out = Vec::new();
    for frame in frames {
        out.extend_from_slice(&frame);
    }
    out
}

/// The three-block fixture used throughout: payloads `[0,1,2]`, `[]` and
/// `[3,4,5]`, all raw codec, sha2-256, first block as the root.
async fn fixture() -> (Vec<u8>, Vec<CarBlock>) {
    let blocks = vec![
        raw_block(&[0, 1, 2]),
        raw_block(&[]),
        raw_block(&[3, 4, 5]),
    ];
    let archive = write_car(vec![blocks[0].cid], &blocks).await;
    (archive, blocks)
}

fn chunk_stream(bytes: &[u8], size: usize) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
    let chunks: Vec<io::Result<Bytes>> = bytes
        .chunks(size.max(1))
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    futures::stream::iter(chunks)
}

/// Like [`chunk_stream`], with an empty chunk injected between every pair.
fn gappy_chunk_stream(bytes: &[u8], size: usize) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
    let mut chunks: Vec<io::Result<Bytes>> = Vec::new();
    for chunk in bytes.chunks(size.max(1)) {
        chunks.push(Ok(Bytes::new()));
        chunks.push(Ok(Bytes::copy_from_slice(chunk)));
    }
    chunks.push(Ok(Bytes::new()));
    futures::stream::iter(chunks)
}

fn build_v2(v1: &[u8], padding: usize, characteristics: u128, trailing: &[u8]) -> Vec<u8> {
    let data_offset = (CARV2_PRAGMA_SIZE + CARV2_HEADER_SIZE + padding) as u64;
    let mut out = Vec::new();
    out.extend_from_slice(&CARV2_PRAGMA);
    out.extend_from_slice(&characteristics.to_le_bytes());
    out.extend_from_slice(&data_offset.to_le_bytes());
    out.extend_from_slice(&(v1.len() as u64).to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend(std::iter::repeat(0u8).take(padding));
    out.extend_from_slice(v1);
    out.extend_from_slice(trailing);
    out
}

#[tokio::test]
async fn reader_round_trip() {
    let (archive, blocks) = fixture().await;
    let reader = CarReader::from_bytes(archive).await.unwrap();

    assert_eq!(reader.version(), CarVersion::V1);
    assert_eq!(reader.characteristics(), None);
    assert_eq!(reader.roots(), &[blocks[0].cid]);
    assert_eq!(reader.len(), 3);

    for block in &blocks {
        assert!(reader.has(&block.cid));
        assert_eq!(reader.get(&block.cid).unwrap(), *block);
    }
    assert!(!reader.has(&raw_cid(b"absent")));
    assert!(reader.get(&raw_cid(b"absent")).is_none());

    let read_back: Vec<CarBlock> = reader.blocks().collect();
    assert_eq!(read_back, blocks);
    let cids: Vec<Cid> = reader.cids().collect();
    assert_eq!(cids, blocks.iter().map(|b| b.cid).collect::<Vec<_>>());
}

#[tokio::test]
async fn empty_payload_block() {
    let block = raw_block(&[]);
    let archive = write_car(vec![], &[block.clone()]).await;
    let reader = CarReader::from_bytes(archive).await.unwrap();

    assert!(reader.roots().is_empty());
    assert_eq!(reader.get(&block.cid).unwrap().data.len(), 0);
    reader.get(&block.cid).unwrap().validate().unwrap();
}

#[tokio::test]
async fn empty_archive() {
    let archive = write_car(vec![], &[]).await;
    let reader = CarReader::from_bytes(archive).await.unwrap();
    assert!(reader.is_empty());
    assert!(reader.roots().is_empty());
}

#[tokio::test]
async fn cid_v0_block_round_trips() {
    // dag-pb encoding of "helloworld" and the CIDv0 that addresses it
    let cid = Cid::try_from("QmUU2HcUBVSXkfWPUc3WUSeCMrWWeEJTuAgR9uyWBhh9Nf").unwrap();
    let data = hex::decode("0a110802120b68656c6c6f776f726c640a180b").unwrap();
    let block = CarBlock::new(cid, data);
    block.validate().unwrap();

    let archive = write_car(vec![cid], &[block.clone()]).await;
    let reader = CarReader::from_bytes(archive).await.unwrap();
    assert_eq!(reader.get(&cid).unwrap(), block);
}

#[tokio::test]
async fn duplicate_cids_first_write_wins() {
    let block = raw_block(&[1, 2, 3]);
    let mut duplicate = block.clone();
    duplicate.data = Bytes::from_static(&[9, 9, 9]);

    let archive = write_car(vec![block.cid], &[block.clone(), duplicate]).await;
    let reader = CarReader::from_bytes(archive.clone()).await.unwrap();

    assert_eq!(reader.len(), 1);
    assert_eq!(reader.get(&block.cid).unwrap().data, block.data);
    assert_eq!(reader.blocks().count(), 1);

    // the streaming surface still sees both sections as written
    let mut iter = CarBlockIterator::from_bytes(archive).await.unwrap();
    let mut count = 0;
    while iter.next_block().await.unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 2);
}

#[tokio::test]
async fn chunked_decode_matches_buffered_decode() {
    let (archive, blocks) = fixture().await;

    for size in [1, 32, 64, 101, archive.len()] {
        let mut iter = CarBlockIterator::from_stream(chunk_stream(&archive, size))
            .await
            .unwrap();
        let streamed: Vec<CarBlock> = iter.blocks().unwrap().try_collect().await.unwrap();
        assert_eq!(streamed, blocks, "chunk size {size}");
    }

    let mut iter = CarBlockIterator::from_stream(gappy_chunk_stream(&archive, 7))
        .await
        .unwrap();
    let streamed: Vec<CarBlock> = iter.blocks().unwrap().try_collect().await.unwrap();
    assert_eq!(streamed, blocks);

    let reader = CarReader::from_stream(chunk_stream(&archive, 32))
        .await
        .unwrap();
    assert_eq!(reader.blocks().collect::<Vec<_>>(), blocks);
}

#[tokio::test]
async fn cid_iterator_matches_block_iterator() {
    let (archive, _) = fixture().await;

    let mut block_iter = CarBlockIterator::from_bytes(archive.clone()).await.unwrap();
    let from_blocks: Vec<String> = block_iter
        .blocks()
        .unwrap()
        .map_ok(|block| block.cid.to_string())
        .try_collect()
        .await
        .unwrap();

    let mut cid_iter = CarCidIterator::from_stream(chunk_stream(&archive, 32))
        .await
        .unwrap();
    let from_cids: Vec<String> = cid_iter
        .cids()
        .unwrap()
        .map_ok(|cid| cid.to_string())
        .try_collect()
        .await
        .unwrap();

    assert_eq!(from_blocks, from_cids);
    assert_eq!(cid_iter.roots(), block_iter.roots());
}

#[tokio::test]
async fn indexer_locations_describe_the_archive() {
    let (archive, blocks) = fixture().await;

    let mut indexer = CarIndexer::from_bytes(archive.clone()).await.unwrap();
    let locations: Vec<_> = indexer.locations().unwrap().try_collect().await.unwrap();
    assert_eq!(locations.len(), blocks.len());

    for (location, block) in locations.iter().zip(&blocks) {
        assert_eq!(location.cid, block.cid);

        // the payload extent points at the block data
        let payload = &archive
            [location.block_offset as usize..(location.block_offset + location.block_length) as usize];
        assert_eq!(payload, &block.data[..]);

        // the frame extent re-parses as a complete section
        let frame =
            &archive[location.offset as usize..(location.offset + location.length) as usize];
        let (body_len, varint_len) = varint::decode(frame).unwrap();
        assert_eq!(varint_len + body_len as usize, frame.len());
        let cid_bytes = block.cid.to_bytes();
        assert_eq!(&frame[varint_len..varint_len + cid_bytes.len()], cid_bytes);
        assert_eq!(&frame[varint_len + cid_bytes.len()..], &block.data[..]);
    }

    // locations are contiguous: each frame starts where the previous ended
    let mut expected_offset = locations[0].offset;
    for location in &locations {
        assert_eq!(location.offset, expected_offset);
        expected_offset += location.length;
    }
    assert_eq!(expected_offset, archive.len() as u64);
}

#[tokio::test]
async fn truncated_archive_is_unexpected_end() {
    let (archive, _) = fixture().await;

    for cut in 1..10 {
        let truncated = &archive[..archive.len() - cut];
        assert_eq!(
            CarReader::from_bytes(truncated.to_vec()).await.unwrap_err(),
            Error::UnexpectedEnd,
            "cut {cut}"
        );

        let mut iter = CarBlockIterator::from_stream(chunk_stream(truncated, 32))
            .await
            .unwrap();
        let result: Result<Vec<_>, _> = iter.blocks().unwrap().try_collect().await;
        assert_eq!(result.unwrap_err(), Error::UnexpectedEnd, "cut {cut}");
    }
}

#[tokio::test]
async fn trailing_zero_bytes_are_a_zero_length_section() {
    let (archive, _) = fixture().await;

    for padding in [1, 4] {
        let mut padded = archive.clone();
        padded.extend(std::iter::repeat(0u8).take(padding));
        assert_eq!(
            CarReader::from_bytes(padded).await.unwrap_err(),
            Error::ZeroLengthSection
        );
    }
}

#[tokio::test]
async fn zeroed_first_byte_is_a_zero_length_header() {
    let (mut archive, _) = fixture().await;
    archive[0] = 0x00;
    assert_eq!(
        CarReader::from_bytes(archive).await.unwrap_err(),
        Error::ZeroLengthHeader
    );
}

#[tokio::test]
async fn streaming_surfaces_are_single_shot() {
    let (archive, _) = fixture().await;

    let mut iter = CarBlockIterator::from_bytes(archive.clone()).await.unwrap();
    let _ = iter.blocks().unwrap();
    assert_eq!(
        iter.blocks().err().unwrap(),
        Error::AlreadyConsumed("blocks")
    );

    let mut cids = CarCidIterator::from_bytes(archive.clone()).await.unwrap();
    cids.next_cid().await.unwrap();
    assert_eq!(cids.cids().err().unwrap(), Error::AlreadyConsumed("CIDs"));

    let mut indexer = CarIndexer::from_bytes(archive).await.unwrap();
    {
        let locations = indexer.locations().unwrap();
        let _: Vec<_> = locations.try_collect().await.unwrap();
    }
    assert_eq!(
        indexer.locations().err().unwrap(),
        Error::AlreadyConsumed("locations")
    );
}

#[tokio::test]
async fn errored_iterator_replays_its_error() {
    let (archive, _) = fixture().await;
    // corrupt the first section's length prefix into a zero-length section
    let mut corrupt = archive.clone();
    let (header_len, varint_len) = varint::decode(&corrupt).unwrap();
    corrupt[varint_len + header_len as usize] = 0x00;

    let mut iter = CarBlockIterator::from_bytes(corrupt).await.unwrap();
    assert_eq!(
        iter.next_block().await.unwrap_err(),
        Error::ZeroLengthSection
    );
    assert_eq!(
        iter.next_block().await.unwrap_err(),
        Error::ZeroLengthSection
    );
}

#[tokio::test]
async fn section_ceiling_is_enforced() {
    let (archive, _) = fixture().await;
    match CarReader::from_bytes_with_limit(archive, 16).await.unwrap_err() {
        Error::SectionTooLarge { len, max } => {
            assert_eq!(max, 16);
            assert!(len > 16);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn v2_archive_decodes_through_the_embedded_v1_payload() {
    let (v1, blocks) = fixture().await;

    for padding in [0, 40] {
        let v2 = build_v2(&v1, padding, 1, b"fake index bytes after the payload");
        let reader = CarReader::from_bytes(v2.clone()).await.unwrap();
        assert_eq!(reader.version(), CarVersion::V2);
        assert_eq!(reader.characteristics(), Some(1));
        assert_eq!(reader.roots(), &[blocks[0].cid]);
        assert_eq!(reader.blocks().collect::<Vec<_>>(), blocks);

        // chunked decode agrees
        let reader = CarReader::from_stream(chunk_stream(&v2, 32)).await.unwrap();
        assert_eq!(reader.blocks().collect::<Vec<_>>(), blocks);
    }
}

#[tokio::test]
async fn v2_data_size_shrunk_is_unexpected_end() {
    let (v1, _) = fixture().await;
    let mut v2 = build_v2(&v1, 0, 0, &[]);
    // dataSize lives at bytes [35, 43)
    let shrunk = (v1.len() as u64) - 10;
    v2[35..43].copy_from_slice(&shrunk.to_le_bytes());

    assert_eq!(
        CarReader::from_bytes(v2).await.unwrap_err(),
        Error::UnexpectedEnd
    );
}

#[tokio::test]
async fn v2_data_size_grown_is_unexpected_end() {
    let (v1, _) = fixture().await;
    let mut v2 = build_v2(&v1, 0, 0, &[]);
    let grown = (v1.len() as u64) + 100;
    v2[35..43].copy_from_slice(&grown.to_le_bytes());

    assert_eq!(
        CarReader::from_bytes(v2).await.unwrap_err(),
        Error::UnexpectedEnd
    );
}

#[tokio::test]
async fn writer_rejects_put_after_close() {
    let (mut writer, output) = CarWriter::create(vec![]).unwrap();
    let block = raw_block(&[1]);

    let drive = async {
        writer.put(&block).await.unwrap();
        writer.close().await.unwrap();
        assert_eq!(writer.put(&block).await.unwrap_err(), Error::WriterClosed);
        assert_eq!(writer.close().await.unwrap_err(), Error::WriterClosed);
    };
    let (_, frames) = futures::join!(drive, output.collect::<Vec<Bytes>>());
    assert_eq!(frames.len(), 2); // header frame + one section
}

#[tokio::test]
async fn writer_enforces_the_section_ceiling() {
    let (writer, output) = CarWriter::create(vec![]).unwrap();
    let mut writer = writer.with_max_section_len(8);
    drop(output);
    let block = raw_block(&[0; 64]);
    assert!(matches!(
        writer.put(&block).await.unwrap_err(),
        Error::SectionTooLarge { .. }
    ));
}

#[tokio::test]
async fn writer_output_preserves_put_order() {
    let blocks: Vec<CarBlock> = (0u8..16).map(|i| raw_block(&[i, i + 1])).collect();
    let archive = write_car(vec![blocks[0].cid], &blocks).await;

    let mut iter = CarBlockIterator::from_bytes(archive).await.unwrap();
    let read_back: Vec<CarBlock> = iter.blocks().unwrap().try_collect().await.unwrap();
    assert_eq!(read_back, blocks);
}

#[tokio::test]
async fn update_roots_swaps_same_shape_roots() {
    let (mut archive, blocks) = fixture().await;
    let new_root = blocks[2].cid;

    update_roots_in_bytes(&mut archive, vec![new_root]).unwrap();
    let reader = CarReader::from_bytes(archive).await.unwrap();
    assert_eq!(reader.roots(), &[new_root]);
}

#[tokio::test]
async fn update_roots_rejects_a_different_header_length() {
    let (mut archive, _) = fixture().await;
    assert!(matches!(
        update_roots_in_bytes(&mut archive, vec![]).unwrap_err(),
        Error::HeaderLengthMismatch { .. }
    ));
}

#[derive(Debug, Clone)]
struct Blocks(Vec<CarBlock>);

impl Arbitrary for Blocks {
    fn arbitrary(g: &mut Gen) -> Self {
        let n = usize::arbitrary(g) % 8 + 1;
        let mut blocks = Vec::with_capacity(n);
        for _ in 0..n {
            // small payloads keep the property fast and make duplicate CIDs likely
            let len = usize::arbitrary(g) % 4;
            let data: Vec<u8> = (0..len).map(|_| u8::arbitrary(g)).collect();
            blocks.push(raw_block(&data));
        }
        Blocks(blocks)
    }
}

#[quickcheck]
fn write_read_round_trip(blocks: Blocks) {
    futures::executor::block_on(async {
        let archive = write_car(vec![blocks.0[0].cid], &blocks.0).await;
        let mut iter = CarBlockIterator::from_bytes(archive).await.unwrap();
        let read_back: Vec<CarBlock> = iter.blocks().unwrap().try_collect().await.unwrap();
        assert_eq!(read_back, blocks.0);
    });
}

#[quickcheck]
fn chunking_never_changes_the_decoded_blocks(blocks: Blocks, chunk_size: u8) {
    futures::executor::block_on(async {
        let archive = write_car(vec![blocks.0[0].cid], &blocks.0).await;

        let mut buffered = CarBlockIterator::from_bytes(archive.clone()).await.unwrap();
        let expected: Vec<CarBlock> = buffered.blocks().unwrap().try_collect().await.unwrap();

        let size = usize::from(chunk_size) % 64 + 1;
        let mut chunked = CarBlockIterator::from_stream(chunk_stream(&archive, size))
            .await
            .unwrap();
        let streamed: Vec<CarBlock> = chunked.blocks().unwrap().try_collect().await.unwrap();

        assert_eq!(expected, streamed);
    });
}
