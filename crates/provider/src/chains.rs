//! Chain → RPC endpoint registry.
//!
//! Each recognized chain carries an ordered endpoint list: the operator's
//! premium endpoint first (when configured), then public fallbacks. The
//! oracle walks the list in order on every call.

use std::collections::HashMap;

/// Chains the firewall recognizes out of the box.
pub const RECOGNIZED_CHAINS: &[u64] = &[1, 10, 56, 137, 8453, 42161, 11155111, 31337];

const MAINNET_FALLBACKS: &[&str] = &[
    "https://eth.llamarpc.com",
    "https://ethereum-rpc.publicnode.com",
    "https://rpc.ankr.com/eth",
];

const OPTIMISM_FALLBACKS: &[&str] = &[
    "https://mainnet.optimism.io",
    "https://optimism-rpc.publicnode.com",
];

const BSC_FALLBACKS: &[&str] = &[
    "https://bsc-dataseed.binance.org",
    "https://bsc-rpc.publicnode.com",
];

const POLYGON_FALLBACKS: &[&str] = &[
    "https://polygon-rpc.com",
    "https://polygon-bor-rpc.publicnode.com",
];

const BASE_FALLBACKS: &[&str] = &[
    "https://mainnet.base.org",
    "https://base-rpc.publicnode.com",
];

const ARBITRUM_FALLBACKS: &[&str] = &[
    "https://arb1.arbitrum.io/rpc",
    "https://arbitrum-one-rpc.publicnode.com",
];

const SEPOLIA_FALLBACKS: &[&str] = &["https://ethereum-sepolia-rpc.publicnode.com"];

const LOCAL_FALLBACKS: &[&str] = &["http://127.0.0.1:8545"];

/// Ordered endpoint lists per chain, with optional premium overrides.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    premium: HashMap<u64, String>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads premium endpoints from `SENTINEL_RPC_<chain_id>` env vars.
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        for &chain_id in RECOGNIZED_CHAINS {
            if let Ok(url) = std::env::var(format!("SENTINEL_RPC_{chain_id}")) {
                if !url.is_empty() {
                    registry.set_premium(chain_id, url);
                }
            }
        }
        registry
    }

    /// Registers an operator-supplied premium endpoint for a chain. It will
    /// be tried before every public fallback.
    pub fn set_premium(&mut self, chain_id: u64, url: impl Into<String>) {
        self.premium.insert(chain_id, url.into());
    }

    pub fn is_recognized(&self, chain_id: u64) -> bool {
        RECOGNIZED_CHAINS.contains(&chain_id) || self.premium.contains_key(&chain_id)
    }

    /// Full ordered endpoint list for a chain: premium first, then public
    /// fallbacks. Empty for unrecognized chains with no premium endpoint.
    pub fn endpoints(&self, chain_id: u64) -> Vec<String> {
        let fallbacks: &[&str] = match chain_id {
            1 => MAINNET_FALLBACKS,
            10 => OPTIMISM_FALLBACKS,
            56 => BSC_FALLBACKS,
            137 => POLYGON_FALLBACKS,
            8453 => BASE_FALLBACKS,
            42161 => ARBITRUM_FALLBACKS,
            11155111 => SEPOLIA_FALLBACKS,
            31337 => LOCAL_FALLBACKS,
            _ => &[],
        };

        let mut out = Vec::with_capacity(fallbacks.len() + 1);
        if let Some(premium) = self.premium.get(&chain_id) {
            out.push(premium.clone());
        }
        out.extend(fallbacks.iter().map(|s| (*s).to_string()));
        out
    }
}
