//! Active-network parameters.
//!
//! The engine only needs a thin slice of the chain configuration: the
//! network name, the proof-of-work limit used to express difficulties as
//! ratios, and the payout-address prefix used to sanity-check usernames
//! before an account id is derived from them.

use num_bigint::BigUint;
use num_traits::One;
use thiserror::Error;

/// Errors from validating a payout address against the active network.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address {address} is not valid on {net}")]
    WrongNetwork { address: String, net: &'static str },

    #[error("address length {0} out of range")]
    BadLength(usize),

    #[error("address contains non-alphanumeric characters")]
    BadCharacter,
}

/// Consensus parameters of the network being mined on.
#[derive(Debug, Clone)]
pub struct ChainParams {
    /// Network name ("mainnet", "testnet", "simnet").
    pub name: &'static str,

    /// Highest admissible proof-of-work target.
    pub pow_limit: BigUint,

    /// Leading characters of a pay-to-pubkey-hash address on this network.
    pub address_prefix: &'static str,
}

impl ChainParams {
    pub fn mainnet() -> Self {
        Self {
            name: "mainnet",
            pow_limit: low_bits(224),
            address_prefix: "Ds",
        }
    }

    pub fn testnet() -> Self {
        Self {
            name: "testnet",
            pow_limit: low_bits(232),
            address_prefix: "Ts",
        }
    }

    pub fn simnet() -> Self {
        Self {
            name: "simnet",
            pow_limit: low_bits(255),
            address_prefix: "Ss",
        }
    }

    pub fn is_mainnet(&self) -> bool {
        self.name == "mainnet"
    }

    /// Check that an address plausibly belongs to this network.
    ///
    /// This is a prefix, length, and character-set check, not a full
    /// decode. The payment manager performs the authoritative validation
    /// before any coin moves.
    pub fn validate_address(&self, address: &str) -> Result<(), AddressError> {
        let len = address.len();
        if !(26..=40).contains(&len) {
            return Err(AddressError::BadLength(len));
        }
        if !address.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(AddressError::BadCharacter);
        }
        if !address.starts_with(self.address_prefix) {
            return Err(AddressError::WrongNetwork {
                address: address.to_string(),
                net: self.name,
            });
        }
        Ok(())
    }
}

/// 2^bits - 1.
fn low_bits(bits: u32) -> BigUint {
    (BigUint::one() << bits) - BigUint::one()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMNET_ADDR: &str = "SsWKp7wtdTZYabYFYSc9cnxhwFEjA5g4pFc";

    #[test]
    fn validate_simnet_address() {
        let net = ChainParams::simnet();
        assert_eq!(net.validate_address(SIMNET_ADDR), Ok(()));
    }

    #[test]
    fn reject_wrong_network() {
        let net = ChainParams::mainnet();
        assert!(matches!(
            net.validate_address(SIMNET_ADDR),
            Err(AddressError::WrongNetwork { .. })
        ));
    }

    #[test]
    fn reject_bad_length() {
        let net = ChainParams::simnet();
        assert_eq!(
            net.validate_address("Ss123"),
            Err(AddressError::BadLength(5))
        );
    }

    #[test]
    fn reject_bad_characters() {
        let net = ChainParams::simnet();
        assert_eq!(
            net.validate_address("SsWKp7wtdTZYabYFYSc9cnxhwFEjA5g4pF!"),
            Err(AddressError::BadCharacter)
        );
    }

    #[test]
    fn pow_limits_ordered() {
        // Mainnet is the hardest network of the three.
        let main = ChainParams::mainnet();
        let sim = ChainParams::simnet();
        assert!(main.pow_limit < sim.pow_limit);
        assert!(main.is_mainnet());
        assert!(!sim.is_mainnet());
    }
}
