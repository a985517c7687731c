use crate::error::Error;
use crate::extraction::*;
use crate::test_helpers::{build_car, raw_block};
use sha2::Digest;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// should_extract
// ---------------------------------------------------------------------------

#[test]
fn car_suffix_triggers_extraction_regardless_of_size() {
    assert!(should_extract("bafybeigdyr.car", 10, 1024 * 1024));
    assert!(should_extract("BAFY.CAR", 0, 1024 * 1024));
}

#[test]
fn large_payload_triggers_extraction() {
    assert!(should_extract("bafy1", 1024 * 1024 + 1, 1024 * 1024));
    assert!(!should_extract("bafy1", 1024 * 1024, 1024 * 1024));
    assert!(!should_extract("bafy1", 500, 1024 * 1024));
}

// ---------------------------------------------------------------------------
// CarExtractor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn raw_blocks_are_concatenated_in_order() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("payload.car");
    let dest = dir.path().join("payload.out");

    let car = build_car(&[
        raw_block(b"hello, "),
        // dag-pb link node, skipped
        (0x70, b"\x12\x00links".to_vec()),
        raw_block(b"world"),
    ]);
    std::fs::write(&archive, &car).unwrap();

    let size = extract_payload(&archive, &dest).await.unwrap();

    assert_eq!(size, 12);
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello, world");
    // Container is left for the caller to clean up
    assert!(archive.exists());
}

#[test]
fn summary_counts_blocks() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("payload.car");
    let dest = dir.path().join("payload.out");

    std::fs::write(
        &archive,
        build_car(&[raw_block(b"a"), (0x70, b"node".to_vec()), raw_block(b"bc")]),
    )
    .unwrap();

    let summary = CarExtractor::extract(&archive, &dest).unwrap();
    assert_eq!(
        summary,
        CarSummary {
            blocks: 3,
            leaf_blocks: 2,
            payload_size: 3,
        }
    );
}

#[tokio::test]
async fn digest_mismatch_is_rejected_and_output_removed() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("corrupt.car");
    let dest = dir.path().join("corrupt.out");

    let mut car = build_car(&[raw_block(b"important bytes")]);
    // Flip the last payload byte
    let last = car.len() - 1;
    car[last] ^= 0xff;
    std::fs::write(&archive, &car).unwrap();

    let result = extract_payload(&archive, &dest).await;

    match result {
        Err(Error::Extraction { reason, .. }) => assert!(reason.contains("digest mismatch")),
        other => panic!("expected extraction error, got {other:?}"),
    }
    assert!(!dest.exists());
}

#[tokio::test]
async fn plain_bytes_are_not_a_container() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("plain.bin");
    let dest = dir.path().join("plain.out");
    std::fs::write(&archive, vec![0xABu8; 4096]).unwrap();

    assert!(matches!(
        extract_payload(&archive, &dest).await,
        Err(Error::Extraction { .. })
    ));
    assert!(!dest.exists());
}

#[tokio::test]
async fn container_without_file_data_is_rejected() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("nodes.car");
    let dest = dir.path().join("nodes.out");
    std::fs::write(&archive, build_car(&[(0x70, b"only a node".to_vec())])).unwrap();

    match extract_payload(&archive, &dest).await {
        Err(Error::Extraction { reason, .. }) => assert!(reason.contains("no file data blocks")),
        other => panic!("expected extraction error, got {other:?}"),
    }
}

/// dag-pb node whose UnixFS `Data` has `node_type`, optional bytes and raw `links`
fn unixfs_node(node_type: u8, data: Option<&[u8]>, links: &[u8]) -> (u64, Vec<u8>) {
    let mut unixfs = vec![0x08, node_type];
    if let Some(data) = data {
        unixfs.push(0x12);
        unixfs.push(data.len() as u8);
        unixfs.extend_from_slice(data);
    }

    let mut node = Vec::new();
    if !links.is_empty() {
        node.push(0x12);
        node.push(links.len() as u8);
        node.extend_from_slice(links);
    }
    node.push(0x0a);
    node.push(unixfs.len() as u8);
    node.extend_from_slice(&unixfs);
    (0x70, node)
}

#[test]
fn unixfs_file_leaves_are_unwrapped() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("unixfs.car");
    let dest = dir.path().join("unixfs.out");

    // Root file node linking two leaves, as a non-raw-leaves import writes it
    let link = b"\x0a\x02\x12\x20";
    let car = build_car(&[
        unixfs_node(2, None, link),
        unixfs_node(2, Some(b"hello, "), &[]),
        unixfs_node(2, Some(b"world"), &[]),
    ]);
    std::fs::write(&archive, car).unwrap();

    let summary = CarExtractor::extract(&archive, &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"hello, world");
    assert_eq!(
        summary,
        CarSummary {
            blocks: 3,
            leaf_blocks: 2,
            payload_size: 12,
        }
    );
}

#[test]
fn cidv0_blocks_are_read_as_dag_pb() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("v0.car");
    let dest = dir.path().join("v0.out");

    // build_car writes CIDv1; swap the section for a bare multihash
    let (_, node) = unixfs_node(0, Some(b"single block"), &[]);
    let mut car = build_car(&[]);
    let mut section = vec![0x12, 0x20];
    section.extend_from_slice(&sha2::Sha256::digest(&node));
    section.extend_from_slice(&node);
    car.push(section.len() as u8);
    car.extend_from_slice(&section);
    std::fs::write(&archive, car).unwrap();

    let summary = CarExtractor::extract(&archive, &dest).unwrap();
    assert_eq!(summary.leaf_blocks, 1);
    assert_eq!(std::fs::read(&dest).unwrap(), b"single block");
}

#[test]
fn unixfs_directories_contribute_nothing() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dir.car");
    let dest = dir.path().join("dir.out");
    std::fs::write(
        &archive,
        build_car(&[unixfs_node(1, Some(b"not file bytes"), &[]), raw_block(b"leaf")]),
    )
    .unwrap();

    CarExtractor::extract(&archive, &dest).unwrap();
    assert_eq!(std::fs::read(&dest).unwrap(), b"leaf");
}

#[tokio::test]
async fn truncated_container_is_rejected() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("short.car");
    let dest = dir.path().join("short.out");

    let car = build_car(&[raw_block(b"0123456789")]);
    std::fs::write(&archive, &car[..car.len() - 4]).unwrap();

    assert!(matches!(
        extract_payload(&archive, &dest).await,
        Err(Error::Extraction { .. })
    ));
}

#[tokio::test]
async fn empty_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("empty.car");
    let dest = dir.path().join("empty.out");
    std::fs::write(&archive, b"").unwrap();

    assert!(extract_payload(&archive, &dest).await.is_err());
}
