//! Miner hardware variants served by the pool.
//!
//! Each pool endpoint serves exactly one hardware variant, and the variant
//! drives three protocol quirks: the extranonce layout returned by
//! `mining.subscribe`, the byte order of `mining.notify` fields, and the
//! normalization applied to `mining.submit` parameters. The deviations are
//! firmware bugs the pool has to accommodate, not protocol options.

use std::fmt;
use std::str::FromStr;

use num_bigint::BigInt;
use num_rational::BigRational;
use thiserror::Error;

/// Size in bytes of the extranonce2 space advertised to miners that respect
/// the subscribe response.
pub const EXTRA_NONCE2_SIZE: u64 = 4;

/// Supported miner hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Miner {
    /// CPU miner, used for simnet testing.
    Cpu,
    AntminerDR3,
    AntminerDR5,
    InnosiliconD9,
    WhatsminerD1,
}

/// Error returned when an endpoint names an unsupported miner.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported miner: {0}")]
pub struct UnknownMiner(String);

impl Miner {
    /// Whether `mining.notify` must carry big-endian `nBits`/`nTime` for
    /// this hardware. Miners with this quirk also echo big-endian `nTime`
    /// and `nonce` in `mining.submit`.
    pub fn flips_notify_endianness(&self) -> bool {
        matches!(
            self,
            Miner::AntminerDR3 | Miner::AntminerDR5 | Miner::InnosiliconD9
        )
    }

    /// Whether the previous-block hash in `mining.notify` must have its
    /// 4-byte words reversed for this hardware.
    pub fn swaps_prev_block_words(&self) -> bool {
        !matches!(self, Miner::Cpu)
    }

    /// Relative weight of one share from this hardware, normalized against
    /// the slowest supported ASIC.
    pub fn share_weight(&self) -> BigRational {
        let (numer, denom) = match self {
            Miner::Cpu => (1, 1),
            Miner::InnosiliconD9 => (2182, 1000),
            Miner::AntminerDR3 => (2955, 1000),
            Miner::AntminerDR5 => (7091, 1000),
            Miner::WhatsminerD1 => (9955, 1000),
        };
        BigRational::new(BigInt::from(numer), BigInt::from(denom))
    }
}

impl fmt::Display for Miner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Miner::Cpu => "cpu",
            Miner::AntminerDR3 => "antminerdr3",
            Miner::AntminerDR5 => "antminerdr5",
            Miner::InnosiliconD9 => "innosilicond9",
            Miner::WhatsminerD1 => "whatsminerd1",
        };
        f.write_str(tag)
    }
}

impl FromStr for Miner {
    type Err = UnknownMiner;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cpu" => Ok(Miner::Cpu),
            "antminerdr3" => Ok(Miner::AntminerDR3),
            "antminerdr5" => Ok(Miner::AntminerDR5),
            "innosilicond9" => Ok(Miner::InnosiliconD9),
            "whatsminerd1" => Ok(Miner::WhatsminerD1),
            other => Err(UnknownMiner(other.to_string())),
        }
    }
}
