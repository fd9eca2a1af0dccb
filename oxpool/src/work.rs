//! Work-template layout and solved-header reconstruction.
//!
//! Work travels through the pool as the hex encoding of a block header,
//! padded to the getwork submission size by the upstream daemon. Field
//! positions inside that hex string are a fixed contract with the work
//! source; they are collected here as named ranges rather than appearing
//! as bare offsets at call sites.
//!
//! A miner's `mining.submit` carries only the pieces it was allowed to
//! choose (extranonce2, nTime, nonce). [`solved_header`] splices those back
//! into the stored job template to recover the exact 180-byte header the
//! hardware hashed, which the submit handler then checks against the pool
//! and network targets.

use std::ops::Range;

use blake2::{Blake2s256, Digest};
use thiserror::Error;

use crate::miner::Miner;

/// Serialized block header size in bytes.
pub const HEADER_LEN: usize = 180;

/// Hex length of a serialized block header.
pub const WORK_HEX_LEN: usize = 2 * HEADER_LEN;

/// Size in bytes of a getwork submission: the header padded out to whole
/// hash blocks.
pub const GETWORK_DATA_LEN: usize = 192;

// Field positions inside the work hex string.
pub const BLOCK_VERSION: Range<usize> = 0..8;
pub const PREV_BLOCK: Range<usize> = 8..72;
pub const GEN_TX1: Range<usize> = 72..288;
pub const NBITS: Range<usize> = 232..240;
pub const HEIGHT: Range<usize> = 256..264;
pub const NTIME: Range<usize> = 272..280;
pub const NONCE: Range<usize> = 280..288;
pub const EXTRA_NONCE_START: usize = 288;
pub const GEN_TX2: Range<usize> = 352..360;

/// Errors from manipulating work hex or reconstructing headers.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("expected even hex input length, got {0}")]
    OddLength(usize),

    #[error("hash hex length {0} is not a whole number of 4-byte words")]
    WordLength(usize),

    #[error("work hex too short: expected at least {expected}, got {got}")]
    ShortWork { expected: usize, got: usize },

    #[error("{field} must be {expected} hex chars, got {got}")]
    FieldLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("submission must be {expected} bytes, got {got}")]
    PadLength { expected: usize, got: usize },

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

/// Reverse a hex string byte-wise, flipping its endianness.
pub fn hex_reversed(input: &str) -> Result<String, WorkError> {
    if input.len() % 2 != 0 {
        return Err(WorkError::OddLength(input.len()));
    }
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    for pair in bytes.chunks(2).rev() {
        out.push(pair[0] as char);
        out.push(pair[1] as char);
    }
    Ok(out)
}

/// Reverse the bytes within each 4-byte word of a hex-encoded hash.
///
/// Stratum hardware predating 64-bit firmware treats a 256-bit hash as
/// eight 32-bit words and expects each word byte-swapped independently.
pub fn reverse_prev_block_words(hash: &str) -> Result<String, WorkError> {
    if hash.len() % 8 != 0 {
        return Err(WorkError::WordLength(hash.len()));
    }
    let mut out = String::with_capacity(hash.len());
    for word in hash.as_bytes().chunks(8) {
        for pair in word.chunks(2).rev() {
            out.push(pair[0] as char);
            out.push(pair[1] as char);
        }
    }
    Ok(out)
}

/// Splice a little-endian timestamp into the nTime field of a work string.
pub fn roll_timestamp(work: &str, unix_time: u32) -> Result<String, WorkError> {
    if work.len() < NTIME.end {
        return Err(WorkError::ShortWork {
            expected: NTIME.end,
            got: work.len(),
        });
    }
    let stamp = hex::encode(unix_time.to_le_bytes());
    let mut out = String::with_capacity(work.len());
    out.push_str(&work[..NTIME.start]);
    out.push_str(&stamp);
    out.push_str(&work[NTIME.end..]);
    Ok(out)
}

/// Notification-relevant fields sliced out of a work string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkFields {
    pub block_version: String,
    pub prev_block: String,
    pub gen_tx1: String,
    pub gen_tx2: String,
    pub nbits: String,
    pub ntime: String,
    pub height: u32,
}

/// Slice the fields a `mining.notify` needs out of a work string.
pub fn split_work(work: &str) -> Result<WorkFields, WorkError> {
    if work.len() < WORK_HEX_LEN {
        return Err(WorkError::ShortWork {
            expected: WORK_HEX_LEN,
            got: work.len(),
        });
    }
    let height_bytes: [u8; 4] = hex::decode(&work[HEIGHT])?
        .try_into()
        .unwrap_or_default();
    Ok(WorkFields {
        block_version: work[BLOCK_VERSION].to_string(),
        prev_block: work[PREV_BLOCK].to_string(),
        gen_tx1: work[GEN_TX1].to_string(),
        gen_tx2: work[GEN_TX2].to_string(),
        nbits: work[NBITS].to_string(),
        ntime: work[NTIME].to_string(),
        height: u32::from_le_bytes(height_bytes),
    })
}

/// A deserialized 180-byte block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    bytes: [u8; HEADER_LEN],
}

impl BlockHeader {
    /// Parse a header from work hex, ignoring any getwork padding after
    /// the header proper.
    pub fn parse_hex(work: &str) -> Result<Self, WorkError> {
        if work.len() < WORK_HEX_LEN {
            return Err(WorkError::ShortWork {
                expected: WORK_HEX_LEN,
                got: work.len(),
            });
        }
        let decoded = hex::decode(&work[..WORK_HEX_LEN])?;
        let mut bytes = [0u8; HEADER_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; HEADER_LEN] {
        &self.bytes
    }

    /// Compact difficulty bits.
    pub fn bits(&self) -> u32 {
        u32::from_le_bytes(self.field(NBITS))
    }

    /// Block height.
    pub fn height(&self) -> u32 {
        u32::from_le_bytes(self.field(HEIGHT))
    }

    /// Header timestamp.
    pub fn timestamp(&self) -> u32 {
        u32::from_le_bytes(self.field(NTIME))
    }

    pub fn nonce(&self) -> u32 {
        u32::from_le_bytes(self.field(NONCE))
    }

    /// Proof-of-work hash of the serialized header.
    pub fn block_hash(&self) -> [u8; 32] {
        let mut hasher = Blake2s256::new();
        hasher.update(self.bytes);
        hasher.finalize().into()
    }

    /// Block hash in display order (most significant byte first).
    pub fn block_hash_hex(&self) -> String {
        let mut hash = self.block_hash();
        hash.reverse();
        hex::encode(hash)
    }

    /// Previous block hash in display order.
    pub fn prev_block_hex(&self) -> String {
        let mut prev = [0u8; 32];
        prev.copy_from_slice(&self.bytes[4..36]);
        prev.reverse();
        hex::encode(prev)
    }

    /// Read a 4-byte field at the byte offset named by a hex range.
    fn field(&self, hex_range: Range<usize>) -> [u8; 4] {
        let start = hex_range.start / 2;
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.bytes[start..start + 4]);
        out
    }
}

/// Rebuild the header a miner solved by splicing its submission back into
/// the stored job template.
///
/// The extranonce layout depends on the hardware: spec-compliant miners
/// submit a bare extranonce2 and the pool supplies extranonce1, while the
/// Antminer DR3/DR5 and Whatsminer D1 fold extranonce1 into the
/// extranonce2 they return, at 24 and 16 hex chars respectively.
pub fn solved_header(
    job_header: &str,
    extra_nonce1: &str,
    extra_nonce2: &str,
    ntime: &str,
    nonce: &str,
    miner: Miner,
) -> Result<BlockHeader, WorkError> {
    if job_header.len() < WORK_HEX_LEN {
        return Err(WorkError::ShortWork {
            expected: WORK_HEX_LEN,
            got: job_header.len(),
        });
    }
    check_len("nTime", ntime, 8)?;
    check_len("nonce", nonce, 8)?;

    let extra_nonce = match miner {
        Miner::AntminerDR3 | Miner::AntminerDR5 => {
            check_len("extraNonce2", extra_nonce2, 24)?;
            extra_nonce2.to_string()
        }
        Miner::WhatsminerD1 => {
            check_len("extraNonce2", extra_nonce2, 16)?;
            extra_nonce2.to_string()
        }
        _ => {
            check_len("extraNonce1", extra_nonce1, 8)?;
            check_len("extraNonce2", extra_nonce2, 8)?;
            format!("{extra_nonce1}{extra_nonce2}")
        }
    };

    let mut solved = String::with_capacity(job_header.len());
    solved.push_str(&job_header[..NTIME.start]);
    solved.push_str(ntime);
    solved.push_str(nonce);
    solved.push_str(&extra_nonce);
    solved.push_str(&job_header[EXTRA_NONCE_START + extra_nonce.len()..]);

    BlockHeader::parse_hex(&solved)
}

/// Hex-encode a getwork submission: the header followed by the
/// daemon-specified padding.
pub fn submission_hex(header: &BlockHeader, pad: &[u8]) -> Result<String, WorkError> {
    let mut data = Vec::with_capacity(GETWORK_DATA_LEN);
    data.extend_from_slice(header.as_bytes());
    data.extend_from_slice(pad);
    if data.len() != GETWORK_DATA_LEN {
        return Err(WorkError::PadLength {
            expected: GETWORK_DATA_LEN,
            got: data.len(),
        });
    }
    Ok(hex::encode(data))
}

fn check_len(field: &'static str, value: &str, expected: usize) -> Result<(), WorkError> {
    if value.len() != expected {
        return Err(WorkError::FieldLength {
            field,
            expected,
            got: value.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A zeroed work template with recognizable field values spliced in.
    fn sample_work(bits: u32, height: u32) -> String {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0..4].copy_from_slice(&6u32.to_le_bytes());
        bytes[4..36].copy_from_slice(&[0xab; 32]);
        bytes[116..120].copy_from_slice(&bits.to_le_bytes());
        bytes[128..132].copy_from_slice(&height.to_le_bytes());
        hex::encode(bytes)
    }

    #[test]
    fn hex_reversed_reverses_bytes() {
        assert_eq!(hex_reversed("a1b2c3d4").unwrap(), "d4c3b2a1");
    }

    #[test]
    fn hex_reversed_rejects_odd_length() {
        assert!(matches!(hex_reversed("abc"), Err(WorkError::OddLength(3))));
    }

    #[test]
    fn hex_reversed_involution() {
        let input = "00112233445566778899aabbccddeeff";
        let once = hex_reversed(input).unwrap();
        assert_eq!(hex_reversed(&once).unwrap(), input);
    }

    #[test]
    fn word_reversal() {
        assert_eq!(reverse_prev_block_words("00112233").unwrap(), "33221100");
    }

    #[test]
    fn word_reversal_involution() {
        // 64 hex chars, the size of a prev-block hash.
        let input: String = (0..32).map(|i| format!("{:02x}", i * 7 % 256)).collect();
        assert_eq!(input.len(), 64);
        let once = reverse_prev_block_words(&input).unwrap();
        assert_eq!(reverse_prev_block_words(&once).unwrap(), input);
    }

    #[test]
    fn word_reversal_rejects_partial_words() {
        assert!(matches!(
            reverse_prev_block_words("001122"),
            Err(WorkError::WordLength(6))
        ));
    }

    #[test]
    fn roll_timestamp_splices_ntime() {
        let work = sample_work(0x1b01_2dbe, 42);
        let rolled = roll_timestamp(&work, 0x5b1e_63f4).unwrap();
        assert_eq!(&rolled[NTIME], "f4631e5b");
        // Everything around the timestamp is untouched.
        assert_eq!(&rolled[..NTIME.start], &work[..NTIME.start]);
        assert_eq!(&rolled[NTIME.end..], &work[NTIME.end..]);
    }

    #[test]
    fn split_work_extracts_fields() {
        let work = sample_work(0x1b01_2dbe, 0x0001_e240);
        let fields = split_work(&work).unwrap();
        assert_eq!(fields.block_version, "06000000");
        assert_eq!(fields.nbits, "be2d011b");
        assert_eq!(fields.height, 0x0001_e240);
        assert_eq!(fields.prev_block.len(), 64);
        assert_eq!(fields.gen_tx1.len(), GEN_TX1.len());
        assert_eq!(fields.gen_tx2.len(), GEN_TX2.len());
    }

    #[test]
    fn header_field_accessors() {
        let work = sample_work(0x1d00_ffff, 1234);
        let header = BlockHeader::parse_hex(&work).unwrap();
        assert_eq!(header.bits(), 0x1d00_ffff);
        assert_eq!(header.height(), 1234);
        assert_eq!(header.timestamp(), 0);
        assert_eq!(header.nonce(), 0);
    }

    #[test]
    fn prev_block_displayed_big_endian() {
        let work = sample_work(0, 0);
        let header = BlockHeader::parse_hex(&work).unwrap();
        assert_eq!(header.prev_block_hex(), "ab".repeat(32));
    }

    #[test]
    fn solved_header_default_miner() {
        let work = sample_work(0x1d00_ffff, 77);
        let header = solved_header(
            &work,
            "a1b2c3d4",
            "00000001",
            "5b1e63f4",
            "deadbeef",
            Miner::Cpu,
        )
        .unwrap();

        assert_eq!(header.timestamp(), 0xf463_1e5b);
        assert_eq!(header.nonce(), 0xefbe_adde);
        // extraNonce1 ++ extraNonce2 land in the extra data region.
        assert_eq!(&header.as_bytes()[144..148], &[0xa1, 0xb2, 0xc3, 0xd4]);
        assert_eq!(&header.as_bytes()[148..152], &[0x00, 0x00, 0x00, 0x01]);
        // Fields before the splice are preserved.
        assert_eq!(header.bits(), 0x1d00_ffff);
        assert_eq!(header.height(), 77);
    }

    #[test]
    fn solved_header_antminer_combined_extranonce() {
        let work = sample_work(0x1d00_ffff, 77);
        let extra_nonce2 = "0102030405060708a1b2c3d4";
        let header = solved_header(
            &work,
            "a1b2c3d4",
            extra_nonce2,
            "5b1e63f4",
            "deadbeef",
            Miner::AntminerDR3,
        )
        .unwrap();
        assert_eq!(
            &header.as_bytes()[144..156],
            &hex::decode(extra_nonce2).unwrap()[..]
        );
    }

    #[test]
    fn solved_header_whatsminer_combined_extranonce() {
        let work = sample_work(0x1d00_ffff, 77);
        let extra_nonce2 = "01020304a1b2c3d4";
        let header = solved_header(
            &work,
            "a1b2c3d4",
            extra_nonce2,
            "5b1e63f4",
            "deadbeef",
            Miner::WhatsminerD1,
        )
        .unwrap();
        assert_eq!(
            &header.as_bytes()[144..152],
            &hex::decode(extra_nonce2).unwrap()[..]
        );
    }

    #[test]
    fn solved_header_rejects_bad_lengths() {
        let work = sample_work(0, 0);
        assert!(matches!(
            solved_header(&work, "a1b2c3d4", "0001", "5b1e63f4", "deadbeef", Miner::Cpu),
            Err(WorkError::FieldLength {
                field: "extraNonce2",
                ..
            })
        ));
        assert!(matches!(
            solved_header(&work, "a1b2c3d4", "00000001", "5b1e", "deadbeef", Miner::Cpu),
            Err(WorkError::FieldLength { field: "nTime", .. })
        ));
    }

    #[test]
    fn submission_padded_to_getwork_size() {
        let work = sample_work(0x1d00_ffff, 77);
        let header = BlockHeader::parse_hex(&work).unwrap();
        let pad = vec![0u8; GETWORK_DATA_LEN - HEADER_LEN];
        let submission = submission_hex(&header, &pad).unwrap();
        assert_eq!(submission.len(), GETWORK_DATA_LEN * 2);
        assert!(submission.starts_with(&work));
    }

    #[test]
    fn submission_rejects_wrong_pad() {
        let header = BlockHeader::parse_hex(&sample_work(0, 0)).unwrap();
        assert!(matches!(
            submission_hex(&header, &[0u8; 3]),
            Err(WorkError::PadLength { .. })
        ));
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let work = sample_work(0x1d00_ffff, 77);
        let a = solved_header(&work, "a1b2c3d4", "00000001", "5b1e63f4", "00000000", Miner::Cpu)
            .unwrap();
        let b = solved_header(&work, "a1b2c3d4", "00000001", "5b1e63f4", "00000001", Miner::Cpu)
            .unwrap();
        assert_ne!(a.block_hash(), b.block_hash());
        assert_eq!(a.block_hash_hex().len(), 64);
    }
}
