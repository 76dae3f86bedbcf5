//! JSON-RPC Chain Oracle backed by alloy-rs.
//!
//! Every read walks the chain's ordered endpoint list (premium first, then
//! public fallbacks) with a per-endpoint timeout. A single endpoint timing
//! out never fails the call — only exhaustion of the list does. Endpoints
//! that fail repeatedly are circuit-broken for a cooldown window.

use crate::chains::ChainRegistry;
use crate::ChainOracle;
use alloy_primitives::{Address, Bytes, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::{TransactionInput, TransactionRequest};
use async_trait::async_trait;
use sentinel_core::error::OracleError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-endpoint cap for a single RPC operation.
pub const ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive failures before an endpoint is rotated out.
const BREAKER_THRESHOLD: u32 = 3;

/// How long a tripped endpoint stays out of rotation.
const BREAKER_COOLDOWN: Duration = Duration::from_secs(60);

/// Code responses are immutable enough to cache for an hour.
const CODE_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Max concurrent slot fetches inside one prefetch bundle.
const PREFETCH_CONCURRENCY: usize = 8;

/// Max retry attempts for 429 errors during bulk prefetch.
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Default)]
struct EndpointHealth {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

/// Chain Oracle client over public JSON-RPC endpoints.
///
/// Shared by many concurrent scans for the lifetime of the process. The
/// circuit-breaker map and code cache are the only mutable state, both
/// lock-guarded with short critical sections.
pub struct RpcOracle {
    registry: ChainRegistry,
    providers: tokio::sync::RwLock<HashMap<String, DynProvider>>,
    health: Mutex<HashMap<String, EndpointHealth>>,
    code_cache: Mutex<HashMap<(u64, Address), (Bytes, Instant)>>,
}

impl RpcOracle {
    pub fn new(registry: ChainRegistry) -> Self {
        Self {
            registry,
            providers: tokio::sync::RwLock::new(HashMap::new()),
            health: Mutex::new(HashMap::new()),
            code_cache: Mutex::new(HashMap::new()),
        }
    }

    // -- circuit breaker ----------------------------------------------------

    fn endpoint_available(&self, url: &str) -> bool {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        match health.get_mut(url) {
            Some(h) => match h.open_until {
                Some(until) if Instant::now() < until => false,
                Some(_) => {
                    // Cooldown elapsed: half-open, allow one probe.
                    h.open_until = None;
                    true
                }
                None => true,
            },
            None => true,
        }
    }

    fn record_failure(&self, url: &str) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        let h = health.entry(url.to_string()).or_default();
        h.consecutive_failures += 1;
        if h.consecutive_failures >= BREAKER_THRESHOLD {
            h.open_until = Some(Instant::now() + BREAKER_COOLDOWN);
            h.consecutive_failures = 0;
            tracing::warn!(url, cooldown_secs = BREAKER_COOLDOWN.as_secs(), "circuit opened");
        }
    }

    fn record_success(&self, url: &str) {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(h) = health.get_mut(url) {
            h.consecutive_failures = 0;
            h.open_until = None;
        }
    }

    // -- providers ----------------------------------------------------------

    async fn provider_for(&self, url: &str) -> Result<DynProvider, String> {
        {
            let providers = self.providers.read().await;
            if let Some(p) = providers.get(url) {
                return Ok(p.clone());
            }
        }

        let provider = ProviderBuilder::new()
            .connect(url)
            .await
            .map_err(|e| format!("Failed to connect to {url}: {e}"))?
            .erased();

        let mut providers = self.providers.write().await;
        providers.insert(url.to_string(), provider.clone());
        Ok(provider)
    }

    /// Walks the chain's endpoint list in order, applying `op` to the first
    /// healthy endpoint that answers within the per-endpoint cap.
    async fn try_endpoints<T, F, Fut>(
        &self,
        chain_id: u64,
        op_name: &'static str,
        op: F,
    ) -> Result<T, OracleError>
    where
        F: Fn(DynProvider) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let endpoints = self.registry.endpoints(chain_id);
        if endpoints.is_empty() {
            return Err(OracleError::NotReachable(chain_id));
        }

        let mut attempted = 0u32;
        let mut timeouts = 0u32;
        let mut first_open: Option<&String> = None;

        for url in &endpoints {
            if !self.endpoint_available(url) {
                tracing::debug!(url, op = op_name, "circuit open, skipping endpoint");
                first_open.get_or_insert(url);
                continue;
            }
            attempted += 1;

            let provider = match self.provider_for(url).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(url, error = %e, "endpoint connect failed");
                    self.record_failure(url);
                    continue;
                }
            };

            match tokio::time::timeout(ORACLE_TIMEOUT, op(provider)).await {
                Ok(Ok(value)) => {
                    self.record_success(url);
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    tracing::warn!(url, op = op_name, error = %e, "endpoint error");
                    self.record_failure(url);
                }
                Err(_) => {
                    timeouts += 1;
                    tracing::warn!(url, op = op_name, "endpoint timed out");
                    self.record_failure(url);
                }
            }
        }

        if attempted == 0 {
            // Every endpoint was skipped mid-cooldown; distinct from a
            // chain that is genuinely unreachable.
            if let Some(url) = first_open {
                return Err(OracleError::CircuitOpen(url.clone()));
            }
            return Err(OracleError::NotReachable(chain_id));
        }
        if timeouts == attempted {
            Err(OracleError::Timeout(chain_id))
        } else {
            Err(OracleError::NotReachable(chain_id))
        }
    }

    async fn first_available_provider(&self, chain_id: u64) -> Result<DynProvider, OracleError> {
        let mut attempted = false;
        let mut first_open = None;
        for url in self.registry.endpoints(chain_id) {
            if !self.endpoint_available(&url) {
                first_open.get_or_insert(url);
                continue;
            }
            attempted = true;
            if let Ok(p) = self.provider_for(&url).await {
                return Ok(p);
            }
            self.record_failure(&url);
        }
        match first_open {
            Some(url) if !attempted => Err(OracleError::CircuitOpen(url)),
            _ => Err(OracleError::NotReachable(chain_id)),
        }
    }
}

#[async_trait]
impl ChainOracle for RpcOracle {
    async fn get_code(&self, chain_id: u64, address: Address) -> Result<Bytes, OracleError> {
        {
            let cache = self.code_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((code, fetched_at)) = cache.get(&(chain_id, address)) {
                if fetched_at.elapsed() < CODE_CACHE_TTL {
                    return Ok(code.clone());
                }
            }
        }

        let code = self
            .try_endpoints(chain_id, "get_code", |p| async move {
                p.get_code_at(address).await.map_err(|e| e.to_string())
            })
            .await?;

        let mut cache = self.code_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert((chain_id, address), (code.clone(), Instant::now()));
        Ok(code)
    }

    async fn get_storage(
        &self,
        chain_id: u64,
        address: Address,
        slot: U256,
    ) -> Result<U256, OracleError> {
        self.try_endpoints(chain_id, "get_storage", |p| async move {
            p.get_storage_at(address, slot)
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    async fn static_call(
        &self,
        chain_id: u64,
        to: Address,
        data: Bytes,
    ) -> Result<Bytes, OracleError> {
        self.try_endpoints(chain_id, "static_call", move |p| {
            let tx = TransactionRequest::default()
                .to(to)
                .input(TransactionInput::new(data.clone()));
            async move { p.call(tx).await.map_err(|e| e.to_string()) }
        })
        .await
    }

    async fn prefetch_bundle(
        &self,
        chain_id: u64,
        address: Address,
        slot_count: usize,
    ) -> Result<crate::PrefetchBundle, OracleError> {
        let code = self.get_code(chain_id, address).await?;

        let provider = self.first_available_provider(chain_id).await?;
        let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(PREFETCH_CONCURRENCY));
        let mut tasks = tokio::task::JoinSet::new();

        tracing::debug!(chain_id, %address, slot_count, "prefetching storage slots");

        for i in 0..slot_count {
            let p = provider.clone();
            let sem = semaphore.clone();
            let slot = U256::from(i);
            tasks.spawn(async move {
                let _permit = sem.acquire().await.map_err(|e| e.to_string())?;
                let value = fetch_slot_with_retry(&p, address, slot).await?;
                Ok::<(U256, U256), String>((slot, value))
            });
        }

        let mut storage = HashMap::with_capacity(slot_count);
        let mut failed = 0usize;

        while let Some(result) = tasks.join_next().await {
            match result {
                // Zero-valued slots are omitted: missing slots read as zero
                // downstream, which is the correct EVM semantics.
                Ok(Ok((slot, value))) => {
                    if !value.is_zero() {
                        storage.insert(slot, value);
                    }
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "slot prefetch failed");
                    failed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "slot prefetch task panicked");
                    failed += 1;
                }
            }
        }

        tracing::debug!(
            chain_id,
            %address,
            fetched = storage.len(),
            failed,
            "prefetch bundle done"
        );

        Ok(crate::PrefetchBundle { code, storage })
    }
}

/// Fetch a storage slot with exponential backoff retry on 429.
async fn fetch_slot_with_retry(
    p: &DynProvider,
    address: Address,
    slot: U256,
) -> Result<U256, String> {
    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let delay = Duration::from_millis(200 * 2u64.pow(attempt - 1));
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(ORACLE_TIMEOUT, p.get_storage_at(address, slot)).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                let err = e.to_string();
                if err.contains("429") && attempt < MAX_RETRIES {
                    continue;
                }
                return Err(err);
            }
            Err(_) => return Err(format!("timeout fetching slot {slot} of {address}")),
        }
    }
    Err(format!("max retries exceeded for {address} slot {slot}"))
}
