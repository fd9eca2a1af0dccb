//! Per-connection Stratum client engine for a mining pool server.
//!
//! Every miner that connects to the pool is handed to one [`stratum::Client`].
//! The client speaks newline-delimited JSON over the socket, walks the miner
//! through authorization and subscription, validates submitted block headers
//! against the pool and network difficulty targets, records the work the
//! miner contributed, and keeps a running hash-rate estimate.
//!
//! The engine deliberately does not listen for connections, select jobs, or
//! pay anyone. Those live elsewhere in the pool and are reached through the
//! capability bundle in [`stratum::PoolHandle`] and the record store behind
//! [`store::PoolStore`].

pub mod chain;
pub mod difficulty;
pub mod miner;
pub mod store;
pub mod stratum;
pub mod work;
