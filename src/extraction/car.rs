use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tracing::debug;

/// Multicodec for raw binary leaves
const CODEC_RAW: u64 = 0x55;
/// Multicodec for dag-pb nodes (implied by CIDv0)
const CODEC_DAG_PB: u64 = 0x70;
/// UnixFS node types whose `Data` holds file bytes
const UNIXFS_RAW: u64 = 0;
const UNIXFS_FILE: u64 = 2;
/// Multihash code for sha2-256
const MULTIHASH_SHA2_256: u64 = 0x12;
/// Upper bound for a single header or block section
const MAX_SECTION_LEN: u64 = 8 * 1024 * 1024;

/// CBOR text "version" followed by the unsigned integer 1
const CARV1_VERSION_MARKER: &[u8] = b"\x67version\x01";

/// Payload recovery from CARv1 containers
///
/// The container is a varint-prefixed dag-cbor header followed by sections of
/// `varint(len) | cid | block`. File bytes are concatenated in container order
/// to rebuild the payload. They come from raw leaves and from the `Data` of
/// dag-pb UnixFS file nodes, so CIDv0 imports without raw leaves unpack too.
/// Directories, symlinks and link-only nodes contribute nothing. Every block
/// hashed with sha2-256 is verified against its identifier.
///
/// Container order is trusted to be depth-first, as IPFS exports write it.
/// Links are not followed.
pub struct CarExtractor;

/// What a successful extraction produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarSummary {
    /// Sections read from the container
    pub blocks: usize,
    /// Blocks whose file bytes were written to the payload
    pub leaf_blocks: usize,
    /// Payload size in bytes
    pub payload_size: u64,
}

struct BlockCid {
    codec: u64,
    multihash_code: u64,
    digest: Vec<u8>,
}

impl CarExtractor {
    /// Extract the payload of `archive_path` into `dest_path`
    ///
    /// Blocking; run it on a blocking thread. `dest_path` is removed again if
    /// extraction fails.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<CarSummary> {
        let result = Self::extract_inner(archive_path, dest_path);
        if result.is_err() {
            let _ = std::fs::remove_file(dest_path);
        }
        result
    }

    fn extract_inner(archive_path: &Path, dest_path: &Path) -> Result<CarSummary> {
        let fail = |reason: String| Error::Extraction {
            archive: archive_path.to_path_buf(),
            reason,
        };

        let mut reader = BufReader::new(File::open(archive_path)?);

        let header_len = read_varint(&mut reader)
            .map_err(|e| fail(format!("unreadable header length: {}", e)))?
            .ok_or_else(|| fail("empty container".to_string()))?;
        if header_len == 0 || header_len > MAX_SECTION_LEN {
            return Err(fail(format!("implausible header length {}", header_len)));
        }
        let header = read_exact_vec(&mut reader, header_len)
            .map_err(|e| fail(format!("truncated header: {}", e)))?;
        if !contains(&header, CARV1_VERSION_MARKER) {
            return Err(fail("not a CARv1 container".to_string()));
        }

        let mut writer = BufWriter::new(File::create(dest_path)?);
        let mut summary = CarSummary {
            blocks: 0,
            leaf_blocks: 0,
            payload_size: 0,
        };

        while let Some(section_len) =
            read_varint(&mut reader).map_err(|e| fail(format!("unreadable section length: {}", e)))?
        {
            if section_len == 0 || section_len > MAX_SECTION_LEN {
                return Err(fail(format!(
                    "implausible section length {} at block {}",
                    section_len, summary.blocks
                )));
            }
            let section = read_exact_vec(&mut reader, section_len).map_err(|e| {
                fail(format!("truncated block {}: {}", summary.blocks, e))
            })?;

            let (cid, cid_len) = parse_cid(&section)
                .ok_or_else(|| fail(format!("malformed CID in block {}", summary.blocks)))?;
            let data = &section[cid_len..];

            if cid.multihash_code == MULTIHASH_SHA2_256 {
                let actual = Sha256::digest(data);
                if actual.as_slice() != cid.digest.as_slice() {
                    return Err(fail(format!(
                        "digest mismatch in block {}",
                        summary.blocks
                    )));
                }
            }

            summary.blocks += 1;
            let file_bytes = match cid.codec {
                CODEC_RAW => Some(data),
                CODEC_DAG_PB => unixfs_file_data(data),
                _ => None,
            };
            if let Some(bytes) = file_bytes {
                writer.write_all(bytes)?;
                summary.leaf_blocks += 1;
                summary.payload_size += bytes.len() as u64;
            }
        }

        if summary.leaf_blocks == 0 {
            return Err(fail("container holds no file data blocks".to_string()));
        }

        writer.flush()?;
        debug!(
            ?archive_path,
            blocks = summary.blocks,
            leaf_blocks = summary.leaf_blocks,
            payload_size = summary.payload_size,
            "CAR payload extracted"
        );
        Ok(summary)
    }
}

/// Read an unsigned LEB128 varint; `None` at a clean end of input
fn read_varint<R: Read>(reader: &mut R) -> std::io::Result<Option<u64>> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let mut byte = [0u8; 1];

    loop {
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && shift == 0 => return Ok(None),
            Err(e) => return Err(e),
        }
        if shift >= 63 {
            return Err(std::io::Error::new(ErrorKind::InvalidData, "varint overflow"));
        }
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }
        shift += 7;
    }
}

/// Decode a varint from the front of a slice, returning it and its length
fn decode_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for (i, b) in bytes.iter().enumerate().take(9) {
        value |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

fn read_exact_vec<R: Read>(reader: &mut R, len: u64) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Parse the CID at the start of a block section
fn parse_cid(section: &[u8]) -> Option<(BlockCid, usize)> {
    // CIDv0 is a bare sha2-256 multihash
    if section.len() >= 34 && section[0] == 0x12 && section[1] == 0x20 {
        return Some((
            BlockCid {
                codec: CODEC_DAG_PB,
                multihash_code: MULTIHASH_SHA2_256,
                digest: section[2..34].to_vec(),
            },
            34,
        ));
    }

    let mut offset = 0;
    let (version, n) = decode_varint(&section[offset..])?;
    offset += n;
    if version != 1 {
        return None;
    }
    let (codec, n) = decode_varint(&section[offset..])?;
    offset += n;
    let (multihash_code, n) = decode_varint(&section[offset..])?;
    offset += n;
    let (digest_len, n) = decode_varint(&section[offset..])?;
    offset += n;

    let end = offset.checked_add(usize::try_from(digest_len).ok()?)?;
    let digest = section.get(offset..end)?.to_vec();

    Some((
        BlockCid {
            codec,
            multihash_code,
            digest,
        },
        end,
    ))
}

enum PbValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

/// Split a protobuf message into `(field number, value)` pairs
///
/// Fixed-width fields are skipped. `None` when the message is malformed.
fn protobuf_fields(mut buf: &[u8]) -> Option<Vec<(u64, PbValue<'_>)>> {
    let mut fields = Vec::new();
    while !buf.is_empty() {
        let (key, n) = decode_varint(buf)?;
        buf = &buf[n..];
        match key & 0x7 {
            0 => {
                let (value, n) = decode_varint(buf)?;
                buf = &buf[n..];
                fields.push((key >> 3, PbValue::Varint(value)));
            }
            1 => buf = buf.get(8..)?,
            2 => {
                let (len, n) = decode_varint(buf)?;
                let end = n.checked_add(usize::try_from(len).ok()?)?;
                fields.push((key >> 3, PbValue::Bytes(buf.get(n..end)?)));
                buf = &buf[end..];
            }
            5 => buf = buf.get(4..)?,
            _ => return None,
        }
    }
    Some(fields)
}

/// File bytes carried by a dag-pb node, if it is a UnixFS file or raw node
fn unixfs_file_data(node: &[u8]) -> Option<&[u8]> {
    // PBNode.Data is field 1, holding a UnixFS Data message
    let unixfs = protobuf_fields(node)?
        .into_iter()
        .find_map(|(field, value)| match (field, value) {
            (1, PbValue::Bytes(bytes)) => Some(bytes),
            _ => None,
        })?;

    let mut node_type = None;
    let mut data = None;
    for (field, value) in protobuf_fields(unixfs)? {
        match (field, value) {
            (1, PbValue::Varint(kind)) => node_type = Some(kind),
            (2, PbValue::Bytes(bytes)) => data = Some(bytes),
            _ => {}
        }
    }

    match node_type? {
        UNIXFS_RAW | UNIXFS_FILE => data.filter(|bytes| !bytes.is_empty()),
        _ => None,
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
