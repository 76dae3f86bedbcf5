//! External-world ports for Sentinel: Chain Oracle, History Store, and
//! Classifier oracle.

pub mod chains;
pub mod classifier;
pub mod history;
pub mod oracle;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use sentinel_core::error::OracleError;
use std::collections::HashMap;

pub use chains::ChainRegistry;
pub use classifier::ClassifierClient;
pub use history::{history_key, scan_key, HistoryStore, InMemoryHistory, HISTORY_CAP, RECORD_TTL};
pub use oracle::RpcOracle;

/// Code plus a prefix of storage slots, fetched in one logical operation.
///
/// Zero-valued slots are omitted; a missing slot reads as zero downstream,
/// which is the correct EVM semantics.
#[derive(Debug, Clone, Default)]
pub struct PrefetchBundle {
    pub code: Bytes,
    pub storage: HashMap<U256, U256>,
}

/// Abstraction over any service returning code, storage, and call results
/// for a named chain at its head.
#[async_trait]
pub trait ChainOracle: Send + Sync {
    async fn get_code(&self, chain_id: u64, address: Address) -> Result<Bytes, OracleError>;

    async fn get_storage(
        &self,
        chain_id: u64,
        address: Address,
        slot: U256,
    ) -> Result<U256, OracleError>;

    async fn static_call(
        &self,
        chain_id: u64,
        to: Address,
        data: Bytes,
    ) -> Result<Bytes, OracleError>;

    async fn prefetch_bundle(
        &self,
        chain_id: u64,
        address: Address,
        slot_count: usize,
    ) -> Result<PrefetchBundle, OracleError>;
}
