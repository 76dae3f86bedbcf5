//! Proxy classification and implementation resolution.
//!
//! Recognizes EIP-1167 minimal proxies by code shape, EIP-1967 and EIP-1822
//! by their well-known storage slots, EIP-897 by calling
//! `implementation()`, and falls back to a generic escape hatch for tiny
//! delegating contracts. Chains of proxies are walked to a bounded depth
//! with mandatory cycle detection; the implementation's code is re-homed
//! into the analysis EVM while the proxy keeps the storage context.

use crate::bytecode::contains_opcode;
use alloy_primitives::{Address, Bytes, U256};
use sentinel_core::error::ResolverError;
use sentinel_core::types::{ProxyInfo, ProxyKind};
use sentinel_provider::ChainOracle;

/// Maximum proxy→implementation hops before the walk stops.
pub const MAX_PROXY_DEPTH: usize = 5;

/// `keccak256("eip1967.proxy.implementation") - 1`.
const EIP1967_IMPL_SLOT: &str =
    "0x360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc";

/// `keccak256("eip1967.proxy.beacon") - 1`.
const EIP1967_BEACON_SLOT: &str =
    "0xa3f0ad74e5423aebfd80d3ef4346578335a9a72aeaee59ff6cb3582b35133d50";

/// `keccak256("eip1967.proxy.admin") - 1`.
const EIP1967_ADMIN_SLOT: &str =
    "0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103";

/// `keccak256("PROXIABLE")` per EIP-1822.
const EIP1822_LOGIC_SLOT: &str =
    "0xc5f16f0fcc639fa48a6947836d9850f504798523bf8c9a3a87d5876cf622bcf7";

/// `implementation()` per EIP-897.
const EIP897_SELECTOR: [u8; 4] = [0x5c, 0x60, 0xda, 0x1b];

const EIP1167_PREFIX: [u8; 10] = [0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];
const EIP1167_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

const OP_DELEGATECALL: u8 = 0xf4;

/// Code below this size with a DELEGATECALL and no standard slot is
/// classified as a custom proxy.
const CUSTOM_PROXY_MAX_CODE: usize = 200;

/// Where analysis should continue after resolution.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub info: ProxyInfo,
    /// Code the bytecode-level analysis targets (final implementation).
    pub analysis_code: Bytes,
    /// `(address, code)` pairs to inject alongside the proxy in the fork.
    pub extra_code: Vec<(Address, Bytes)>,
    /// Why the walk stopped before reaching a non-proxy, if it did. The
    /// chain up to the stop point is still sound and used as-is.
    pub walk_error: Option<ResolverError>,
}

impl ResolvedTarget {
    fn plain(code: Bytes) -> Self {
        Self {
            info: ProxyInfo::not_a_proxy(),
            analysis_code: code,
            extra_code: Vec::new(),
            walk_error: None,
        }
    }
}

fn slot(hex: &str) -> U256 {
    // Compile-time constants; parse cannot fail.
    U256::from_str_radix(hex.trim_start_matches("0x"), 16).unwrap_or_default()
}

fn word_to_address(word: U256) -> Option<Address> {
    if word.is_zero() {
        return None;
    }
    let bytes = word.to_be_bytes::<32>();
    Some(Address::from_slice(&bytes[12..]))
}

#[derive(Debug)]
struct Hop {
    kind: ProxyKind,
    implementation: Option<Address>,
    beacon: Option<Address>,
    admin: Option<Address>,
}

/// Classifies one address without walking.
async fn classify(
    oracle: &dyn ChainOracle,
    chain_id: u64,
    address: Address,
    code: &Bytes,
) -> Option<Hop> {
    // EIP-1167: fixed prefix + suffix with the implementation in between.
    if code.len() == 45 && code.starts_with(&EIP1167_PREFIX) && code.ends_with(&EIP1167_SUFFIX) {
        return Some(Hop {
            kind: ProxyKind::Eip1167Minimal,
            implementation: Some(Address::from_slice(&code[10..30])),
            beacon: None,
            admin: None,
        });
    }

    // EIP-1967: implementation slot, with beacon and admin as side reads.
    if let Ok(word) = oracle
        .get_storage(chain_id, address, slot(EIP1967_IMPL_SLOT))
        .await
    {
        if let Some(implementation) = word_to_address(word) {
            let beacon = oracle
                .get_storage(chain_id, address, slot(EIP1967_BEACON_SLOT))
                .await
                .ok()
                .and_then(word_to_address);
            let admin = oracle
                .get_storage(chain_id, address, slot(EIP1967_ADMIN_SLOT))
                .await
                .ok()
                .and_then(word_to_address);
            return Some(Hop {
                kind: ProxyKind::Eip1967Transparent,
                implementation: Some(implementation),
                beacon,
                admin,
            });
        }
    }

    // EIP-1822 UUPS.
    if let Ok(word) = oracle
        .get_storage(chain_id, address, slot(EIP1822_LOGIC_SLOT))
        .await
    {
        if let Some(implementation) = word_to_address(word) {
            return Some(Hop {
                kind: ProxyKind::Eip1822Uups,
                implementation: Some(implementation),
                beacon: None,
                admin: None,
            });
        }
    }

    // EIP-897: ask the contract itself.
    if let Ok(ret) = oracle
        .static_call(chain_id, address, Bytes::from(EIP897_SELECTOR.to_vec()))
        .await
    {
        if ret.len() == 32 {
            let implementation = Address::from_slice(&ret[12..]);
            if !implementation.is_zero() {
                return Some(Hop {
                    kind: ProxyKind::Eip897Legacy,
                    implementation: Some(implementation),
                    beacon: None,
                    admin: None,
                });
            }
        }
    }

    // Generic escape hatch: tiny delegating code with no standard slot.
    if code.len() < CUSTOM_PROXY_MAX_CODE && contains_opcode(code, OP_DELEGATECALL) {
        return Some(Hop {
            kind: ProxyKind::Custom,
            implementation: None,
            beacon: None,
            admin: None,
        });
    }

    None
}

/// Resolves `address` to its final analysis target.
///
/// Walks proxy→implementation up to [`MAX_PROXY_DEPTH`] hops, checking every
/// new address against the visited set. Cycle or depth exhaustion stops the
/// walk at the last sound address — both are non-fatal.
pub async fn resolve(
    oracle: &dyn ChainOracle,
    chain_id: u64,
    address: Address,
    code: &Bytes,
) -> ResolvedTarget {
    let first_hop = match classify(oracle, chain_id, address, code).await {
        Some(hop) => hop,
        None => return ResolvedTarget::plain(code.clone()),
    };

    let mut info = ProxyInfo {
        is_proxy: true,
        kind: first_hop.kind,
        implementation: first_hop.implementation,
        beacon: first_hop.beacon,
        admin: first_hop.admin,
        resolution_chain: vec![address],
    };
    let mut extra_code = Vec::new();
    let mut analysis_code = code.clone();
    let mut walk_error = None;
    let mut next = first_hop.implementation;

    while let Some(implementation) = next {
        if info.resolution_chain.contains(&implementation) {
            let err = ResolverError::CycleDetected(implementation);
            tracing::warn!(error = %err, "proxy walk stopped");
            walk_error = Some(err);
            break;
        }
        if info.resolution_chain.len() >= MAX_PROXY_DEPTH {
            let err = ResolverError::DepthExceeded(MAX_PROXY_DEPTH);
            tracing::warn!(error = %err, %implementation, "proxy walk stopped");
            walk_error = Some(err);
            break;
        }

        let impl_code = match oracle.get_code(chain_id, implementation).await {
            Ok(code) if !code.is_empty() => code,
            Ok(_) => {
                tracing::debug!(%implementation, "implementation has no code");
                break;
            }
            Err(e) => {
                tracing::warn!(%implementation, error = %e, "implementation fetch failed");
                break;
            }
        };

        info.resolution_chain.push(implementation);
        extra_code.push((implementation, impl_code.clone()));
        analysis_code = impl_code.clone();

        next = match classify(oracle, chain_id, implementation, &impl_code).await {
            Some(hop) => hop.implementation,
            None => None,
        };
    }

    tracing::debug!(
        %address,
        kind = ?info.kind,
        depth = info.depth(),
        "proxy resolution done"
    );

    ResolvedTarget {
        info,
        analysis_code,
        extra_code,
        walk_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sentinel_core::error::OracleError;
    use sentinel_provider::PrefetchBundle;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeOracle {
        code: Mutex<HashMap<Address, Bytes>>,
        storage: Mutex<HashMap<(Address, U256), U256>>,
    }

    impl FakeOracle {
        fn with_code(mut self, address: Address, code: &[u8]) -> Self {
            self.code.get_mut().unwrap().insert(address, Bytes::from(code.to_vec()));
            self
        }

        fn with_storage(mut self, address: Address, slot_value: (U256, U256)) -> Self {
            self.storage
                .get_mut()
                .unwrap()
                .insert((address, slot_value.0), slot_value.1);
            self
        }
    }

    #[async_trait]
    impl ChainOracle for FakeOracle {
        async fn get_code(&self, _chain_id: u64, address: Address) -> Result<Bytes, OracleError> {
            Ok(self
                .code
                .lock()
                .unwrap()
                .get(&address)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_storage(
            &self,
            _chain_id: u64,
            address: Address,
            slot: U256,
        ) -> Result<U256, OracleError> {
            Ok(self
                .storage
                .lock()
                .unwrap()
                .get(&(address, slot))
                .copied()
                .unwrap_or_default())
        }

        async fn static_call(
            &self,
            _chain_id: u64,
            _to: Address,
            _data: Bytes,
        ) -> Result<Bytes, OracleError> {
            Ok(Bytes::new())
        }

        async fn prefetch_bundle(
            &self,
            chain_id: u64,
            address: Address,
            _slot_count: usize,
        ) -> Result<PrefetchBundle, OracleError> {
            Ok(PrefetchBundle {
                code: self.get_code(chain_id, address).await?,
                storage: HashMap::new(),
            })
        }
    }

    fn minimal_proxy_code(implementation: Address) -> Vec<u8> {
        let mut code = Vec::with_capacity(45);
        code.extend_from_slice(&EIP1167_PREFIX);
        code.extend_from_slice(implementation.as_slice());
        code.extend_from_slice(&EIP1167_SUFFIX);
        code
    }

    fn addr_word(address: Address) -> U256 {
        U256::from_be_slice(address.as_slice())
    }

    #[tokio::test]
    async fn minimal_proxy_resolves_by_code_shape() {
        let implementation = Address::repeat_byte(0x77);
        let proxy = Address::repeat_byte(0x11);
        let impl_code = [0x60, 0x00, 0x54, 0x00];

        let oracle = FakeOracle::default().with_code(implementation, &impl_code);
        let code = Bytes::from(minimal_proxy_code(implementation));
        let resolved = resolve(&oracle, 1, proxy, &code).await;

        assert!(resolved.info.is_proxy);
        assert_eq!(resolved.info.kind, ProxyKind::Eip1167Minimal);
        assert_eq!(resolved.info.implementation, Some(implementation));
        assert_eq!(resolved.analysis_code, Bytes::from(impl_code.to_vec()));
        assert_eq!(resolved.info.depth(), 1);
    }

    #[tokio::test]
    async fn eip1967_slot_resolves_and_rehomes() {
        let proxy = Address::repeat_byte(0x11);
        let implementation = Address::repeat_byte(0x77);
        let impl_code = [0xd0, 0x40, 0x22, 0x0a, 0x00];
        let proxy_code = [0x60, 0x00, 0x3d, 0xf4, 0x00];

        let oracle = FakeOracle::default()
            .with_code(implementation, &impl_code)
            .with_storage(proxy, (slot(EIP1967_IMPL_SLOT), addr_word(implementation)));

        let resolved = resolve(&oracle, 1, proxy, &Bytes::from(proxy_code.to_vec())).await;

        assert_eq!(resolved.info.kind, ProxyKind::Eip1967Transparent);
        assert_eq!(resolved.info.implementation, Some(implementation));
        assert_eq!(
            resolved.extra_code,
            vec![(implementation, Bytes::from(impl_code.to_vec()))]
        );
    }

    #[tokio::test]
    async fn cycle_terminates_within_depth() {
        let a = Address::repeat_byte(0xaa);
        let b = Address::repeat_byte(0xbb);

        // a -> b -> a through EIP-1967 slots.
        let oracle = FakeOracle::default()
            .with_code(a, &[0x60, 0x00, 0xf4])
            .with_code(b, &[0x60, 0x01, 0xf4])
            .with_storage(a, (slot(EIP1967_IMPL_SLOT), addr_word(b)))
            .with_storage(b, (slot(EIP1967_IMPL_SLOT), addr_word(a)));

        let code = oracle.get_code(1, a).await.unwrap();
        let resolved = resolve(&oracle, 1, a, &code).await;

        assert!(resolved.info.is_proxy);
        assert!(resolved.info.depth() <= MAX_PROXY_DEPTH);
        assert_eq!(resolved.info.resolution_chain, vec![a, b]);
        assert_eq!(resolved.walk_error, Some(ResolverError::CycleDetected(a)));
    }

    #[tokio::test]
    async fn long_chain_stops_at_max_depth() {
        // 0xa0 -> 0xa1 -> ... -> 0xa7, each hop via the EIP-1967 slot.
        let mut oracle = FakeOracle::default();
        for i in 0..8u8 {
            let here = Address::repeat_byte(0xa0 + i);
            oracle = oracle.with_code(here, &[0x60, i, 0xf4]);
            if i < 7 {
                let next = Address::repeat_byte(0xa1 + i);
                oracle = oracle.with_storage(here, (slot(EIP1967_IMPL_SLOT), addr_word(next)));
            }
        }

        let start = Address::repeat_byte(0xa0);
        let code = oracle.get_code(1, start).await.unwrap();
        let resolved = resolve(&oracle, 1, start, &code).await;

        assert_eq!(resolved.info.resolution_chain.len(), MAX_PROXY_DEPTH);
        assert_eq!(
            resolved.walk_error,
            Some(ResolverError::DepthExceeded(MAX_PROXY_DEPTH))
        );
    }

    #[tokio::test]
    async fn tiny_delegating_code_is_custom() {
        let proxy = Address::repeat_byte(0x11);
        let code = Bytes::from(vec![0x60, 0x00, 0x3d, 0xf4, 0x00]);

        let oracle = FakeOracle::default();
        let resolved = resolve(&oracle, 1, proxy, &code).await;

        assert!(resolved.info.is_proxy);
        assert_eq!(resolved.info.kind, ProxyKind::Custom);
        assert_eq!(resolved.info.implementation, None);
    }

    #[tokio::test]
    async fn plain_contract_is_not_a_proxy() {
        let code = Bytes::from(vec![0x60, 0x00, 0x54, 0x60, 0x01, 0x01, 0x60, 0x00, 0x55, 0x00]);
        let oracle = FakeOracle::default();
        let resolved = resolve(&oracle, 1, Address::repeat_byte(0x11), &code).await;

        assert!(!resolved.info.is_proxy);
        assert_eq!(resolved.analysis_code, code);
    }
}
