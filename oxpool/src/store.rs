//! Persisted pool records and the record-store seam.
//!
//! The engine only ever creates and fetches whole records by key; the
//! durable backend lives behind [`PoolStore`] so the pool can run against
//! whatever storage it likes. [`MemoryStore`] is the in-process
//! implementation used by tests and throwaway solo deployments.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use blake2::{Blake2s256, Digest};
use num_rational::BigRational;
use parking_lot::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::chain::ChainParams;

/// Errors surfaced by a record store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// No record under the requested key.
    #[error("record not found")]
    NotFound,

    /// A record already exists under the key being created.
    #[error("record already exists")]
    Exists,

    /// Backend-specific failure.
    #[error("store backend: {0}")]
    Backend(String),
}

/// A mining account, keyed by the id derived from its payout address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    pub address: String,
}

impl Account {
    pub fn new(id: String, address: String) -> Self {
        Self { id, address }
    }
}

/// Derive the stable account id for a payout address on the given network.
pub fn account_id(address: &str, net: &ChainParams) -> Result<String, crate::chain::AddressError> {
    net.validate_address(address)?;
    let mut hasher = Blake2s256::new();
    hasher.update(address.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// A work template handed to miners, keyed by UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub uuid: String,
    pub height: u32,
    pub header: String,
}

impl Job {
    /// Create a job for a work template at the given height, under a
    /// fresh UUID.
    pub fn new(header: String, height: u32) -> Self {
        Self {
            uuid: Uuid::new_v4().simple().to_string(),
            height,
            header,
        }
    }
}

/// A weighted share credited to an account, the unit of payout accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct Share {
    pub account: String,
    pub weight: BigRational,
    pub created_on: u64,
}

impl Share {
    pub fn new(account: String, weight: BigRational) -> Self {
        Self {
            account,
            weight,
            created_on: unix_now(),
        }
    }
}

/// A submission that solved a network block, keyed by its block hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedWork {
    pub block_hash: String,
    pub prev_hash: String,
    pub height: u32,
    pub account: String,
    pub miner: String,
}

impl AcceptedWork {
    pub fn new(
        block_hash: String,
        prev_hash: String,
        height: u32,
        account: String,
        miner: String,
    ) -> Self {
        Self {
            block_hash,
            prev_hash,
            height,
            account,
            miner,
        }
    }
}

/// Record store used by client connections.
///
/// Creations are upserts except for accepted work, where a duplicate key
/// must surface as [`StoreError::Exists`] so the submit handler can report
/// a duplicate share.
pub trait PoolStore: Send + Sync {
    fn fetch_account(&self, id: &str) -> Result<Account, StoreError>;
    fn create_account(&self, account: &Account) -> Result<(), StoreError>;
    fn fetch_job(&self, uuid: &str) -> Result<Job, StoreError>;
    fn create_job(&self, job: &Job) -> Result<(), StoreError>;
    fn create_share(&self, share: &Share) -> Result<(), StoreError>;
    fn create_accepted_work(&self, work: &AcceptedWork) -> Result<(), StoreError>;
}

/// Thread-safe in-memory record store.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    accounts: HashMap<String, Account>,
    jobs: HashMap<String, Job>,
    shares: Vec<Share>,
    accepted: HashMap<String, AcceptedWork>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all persisted shares, oldest first.
    pub fn shares(&self) -> Vec<Share> {
        self.inner.read().shares.clone()
    }

    /// Accepted work under the given block hash, if any.
    pub fn accepted_work(&self, block_hash: &str) -> Option<AcceptedWork> {
        self.inner.read().accepted.get(block_hash).cloned()
    }
}

impl PoolStore for MemoryStore {
    fn fetch_account(&self, id: &str) -> Result<Account, StoreError> {
        self.inner
            .read()
            .accounts
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn create_account(&self, account: &Account) -> Result<(), StoreError> {
        self.inner
            .write()
            .accounts
            .insert(account.id.clone(), account.clone());
        Ok(())
    }

    fn fetch_job(&self, uuid: &str) -> Result<Job, StoreError> {
        self.inner
            .read()
            .jobs
            .get(uuid)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner
            .write()
            .jobs
            .insert(job.uuid.clone(), job.clone());
        Ok(())
    }

    fn create_share(&self, share: &Share) -> Result<(), StoreError> {
        self.inner.write().shares.push(share.clone());
        Ok(())
    }

    fn create_accepted_work(&self, work: &AcceptedWork) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.accepted.contains_key(&work.block_hash) {
            return Err(StoreError::Exists);
        }
        inner.accepted.insert(work.block_hash.clone(), work.clone());
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
