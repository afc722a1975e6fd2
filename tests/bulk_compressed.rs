//! # Bulk Build Tests (ROW_FORMAT=COMPRESSED)
//!
//! The compressed format builds the regular frame unlogged, compresses it
//! at page finalize, and splits the page in half whenever the records do
//! not fit the compressed target size. These tests drive that path with
//! incompressible payloads:
//!
//! 1. A build whose pages repeatedly fail compression still produces a
//!    valid tree, and every committed page carries a compressed image.
//! 2. A tuple too big for the compressed budget is rejected without
//!    disturbing the build.
//! 3. The adaptive pad widens after failures so later pages close earlier.

use std::sync::Arc;

use masondb::bulk::{scan, validate_index, TreeBuilder};
use masondb::config::{BuildConfig, DEFAULT_SPACE_CAPACITY};
use masondb::storage::pool::BufferPool;
use masondb::storage::redo::{LogSys, RedoWrite};
use masondb::storage::space::Space;
use masondb::{BuildError, IndexDef, RowFormat, Trx, Tuple};

const ZIP_TARGET: usize = 8192;

fn make_index() -> Arc<IndexDef> {
    let pool = BufferPool::new();
    let space = Space::new(1, pool, DEFAULT_SPACE_CAPACITY);
    let log = LogSys::new();
    IndexDef::create(
        "zip_test",
        space,
        log,
        RowFormat::Compressed,
        true,
        Some(ZIP_TARGET),
    )
    .unwrap()
}

/// Deterministic incompressible bytes; zstd cannot shrink them.
fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E3779B97F4A7C15) | 1;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

fn build(index: &Arc<IndexDef>, tuples: Vec<Tuple>) -> eyre::Result<()> {
    let trx = Trx::begin();
    let mut builder = TreeBuilder::new(index.clone(), trx, BuildConfig::default())?;
    let mut result = Ok(());
    for mut tuple in tuples {
        result = builder.insert(&mut tuple);
        if result.is_err() {
            break;
        }
    }
    builder.finalize(result)
}

#[test]
fn incompressible_records_split_until_pages_compress() {
    let index = make_index();
    let tuples: Vec<Tuple> = (1..=150u32)
        .map(|i| Tuple::new(i.to_be_bytes().to_vec(), noise(i as u64, 200)))
        .collect();

    build(&index, tuples).unwrap();

    let stats = validate_index(&index).unwrap();
    assert_eq!(stats.leaf_recs(), 150);
    assert!(
        stats.leaf_pages() > 1,
        "30KB of noise cannot compress into one {} byte page",
        ZIP_TARGET
    );

    // Splitting happened: the pad learned from at least one failure.
    assert!(index.zip_pad().pad() > 0);

    let rows = scan(&index).unwrap();
    assert_eq!(rows.len(), 150);
    for (i, (key, payload)) in rows.iter().enumerate() {
        let expect = (i + 1) as u32;
        assert_eq!(*key, expect.to_be_bytes().to_vec());
        assert_eq!(*payload, noise(expect as u64, 200));
    }
}

#[test]
fn page_images_cover_every_leaf() {
    let index = make_index();
    let tuples: Vec<Tuple> = (1..=60u32)
        .map(|i| Tuple::new(i.to_be_bytes().to_vec(), noise(i as u64 + 7, 180)))
        .collect();

    build(&index, tuples).unwrap();
    let stats = validate_index(&index).unwrap();

    let mut image_count = 0usize;
    for batch in index.log().snapshot() {
        for write in &batch.writes {
            if let RedoWrite::ZipImage { data, .. } = write {
                assert!(data.len() <= ZIP_TARGET);
                image_count += 1;
            }
        }
    }
    // One image per committed page; splits and the root swap commit extra
    // pages beyond the surviving tree.
    let surviving: usize = stats.pages_per_level.iter().sum();
    assert!(image_count >= surviving);
}

#[test]
fn oversize_tuple_is_rejected_and_the_build_continues() {
    let index = make_index();
    let trx = Trx::begin();
    let mut builder =
        TreeBuilder::new(index.clone(), trx, BuildConfig::default()).unwrap();

    let mut ok1 = Tuple::new(b"aaaa".to_vec(), noise(1, 64));
    builder.insert(&mut ok1).unwrap();

    // A key alone beyond the compressed budget cannot be stored at all.
    let huge_key = noise(2, ZIP_TARGET);
    let mut too_big = Tuple::new(huge_key.clone(), noise(3, 64));
    let err = builder.insert(&mut too_big).unwrap_err();
    assert_eq!(BuildError::of(&err), Some(BuildError::TooBigRecord));
    // The tuple came back intact from the failed conversion.
    assert_eq!(too_big.key(), huge_key.as_slice());
    assert!(!too_big.is_ext());

    let mut ok2 = Tuple::new(b"bbbb".to_vec(), noise(4, 64));
    builder.insert(&mut ok2).unwrap();

    builder.finalize(Ok(())).unwrap();
    let rows = scan(&index).unwrap();
    assert_eq!(rows.len(), 2);
}
