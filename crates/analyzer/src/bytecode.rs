//! Static bytecode analyzer.
//!
//! Consumes deployed code only (plus an optional owner query through the
//! forked EVM or the Chain Oracle) and produces the base Security Report:
//! ownership status, selector catalogue hits, dangerous opcode flags, and
//! the byte-histogram entropy consumed by the feature extractor.

use crate::harness::{self, ForkSpec, NullObserver};
use crate::selectors;
use alloy_primitives::{Address, Bytes, U256};
use sentinel_core::flags;
use sentinel_core::types::{OwnershipStatus, SecurityReport};
use sentinel_provider::ChainOracle;
use std::collections::HashMap;

/// `owner()` — the one selector we actively call.
pub const OWNER_SELECTOR: [u8; 4] = [0x8d, 0xa5, 0xcb, 0x5b];

const OP_CALLCODE: u8 = 0xf2;
const OP_SELFDESTRUCT: u8 = 0xff;

/// Arbitrary funded caller for read-only probes.
const PROBE_SENDER: Address = Address::repeat_byte(0xbe);

/// Base report plus side-channel values other stages need.
#[derive(Debug, Clone)]
pub struct StaticAnalysis {
    pub report: SecurityReport,
    pub entropy: f32,
}

/// Runs the static pass over the analysis target.
///
/// `analysis_code` is what the bytecode patterns are matched against (the
/// implementation for proxies); `context_code`/`storage`/`extra_code`
/// describe the state the `owner()` probe executes in (the proxy context).
pub async fn analyze(
    oracle: Option<&dyn ChainOracle>,
    chain_id: u64,
    target: Address,
    analysis_code: &Bytes,
    context_code: &Bytes,
    storage: &HashMap<U256, U256>,
    extra_code: &[(Address, Bytes)],
) -> StaticAnalysis {
    let mut report = SecurityReport::new();

    // Ownership.
    let owner = determine_owner(oracle, chain_id, target, context_code, storage, extra_code).await;
    match owner {
        Some(addr) if addr.is_zero() => {
            report.ownership_status = OwnershipStatus::Renounced;
            report.owner = Some(Address::ZERO);
            report.add_flag(flags::OWNERSHIP_RENOUNCED);
        }
        Some(addr) => {
            report.ownership_status = OwnershipStatus::Centralized;
            report.owner = Some(addr);
            report.add_flag(flags::contract_has_owner(&addr));
            report.add_risk(10);
        }
        None => report.ownership_status = OwnershipStatus::Unknown,
    }

    // Selector catalogue. Any hit is treated as honeypot-grade by default;
    // downstream stages may still soften the final verdict.
    for entry in selectors::scan(analysis_code) {
        report.add_flag(flags::suspicious_function(entry.label));
        report.add_risk(entry.weight);
        report.is_honeypot = true;
    }

    // Dangerous opcodes, skipping PUSH immediates to avoid data-byte hits.
    if contains_opcode(analysis_code, OP_SELFDESTRUCT) {
        report.add_flag("Dangerous Opcode: SELFDESTRUCT");
        report.add_risk(25);
    }
    if contains_opcode(analysis_code, OP_CALLCODE) {
        report.add_flag("Dangerous Opcode: CALLCODE");
        report.add_risk(10);
    }

    tracing::debug!(
        %target,
        risk = report.risk_score,
        flags = report.flags.len(),
        ownership = ?report.ownership_status,
        "static analysis done"
    );

    StaticAnalysis {
        report,
        entropy: shannon_entropy(analysis_code),
    }
}

/// Tries `owner()` inside the fork first; falls back to a live static call
/// when the fork returns nothing useful and an oracle is available.
async fn determine_owner(
    oracle: Option<&dyn ChainOracle>,
    chain_id: u64,
    target: Address,
    context_code: &Bytes,
    storage: &HashMap<U256, U256>,
    extra_code: &[(Address, Bytes)],
) -> Option<Address> {
    let mut spec = ForkSpec::new(
        context_code.clone(),
        PROBE_SENDER,
        target,
        Bytes::from(OWNER_SELECTOR.to_vec()),
        U256::ZERO,
    );
    spec.preloaded_storage = storage.clone();
    spec.extra_code = extra_code.to_vec();

    if let Ok(outcome) = harness::run(&spec, &mut NullObserver) {
        if outcome.is_success() {
            if let Some(addr) = interpret_owner_return(&outcome.return_value) {
                if !addr.is_zero() {
                    return Some(addr);
                }
                // All-zero return: retry on chain before concluding Renounced.
                if oracle.is_none() {
                    return Some(addr);
                }
            }
        }
    }

    let oracle = oracle?;
    match oracle
        .static_call(chain_id, target, Bytes::from(OWNER_SELECTOR.to_vec()))
        .await
    {
        Ok(ret) => interpret_owner_return(&ret),
        Err(e) => {
            tracing::debug!(%target, error = %e, "on-chain owner() probe failed");
            None
        }
    }
}

/// A return of 20+ bytes is an address in its last 20 bytes.
fn interpret_owner_return(ret: &[u8]) -> Option<Address> {
    if ret.len() < 20 {
        return None;
    }
    Some(Address::from_slice(&ret[ret.len() - 20..]))
}

/// Whether `target` appears as an executed opcode (PUSH immediates skipped).
pub fn contains_opcode(code: &[u8], target: u8) -> bool {
    let mut i = 0;
    while i < code.len() {
        let op = code[i];
        if op == target {
            return true;
        }
        i += 1 + push_immediate_len(op);
    }
    false
}

#[inline]
fn push_immediate_len(op: u8) -> usize {
    if (0x60..=0x7f).contains(&op) {
        (op - 0x5f) as usize
    } else {
        0
    }
}

/// Shannon entropy of the byte histogram, normalized against log2(256).
pub fn shannon_entropy(code: &[u8]) -> f32 {
    if code.is_empty() {
        return 0.0;
    }
    let mut hist = [0u32; 256];
    for &b in code {
        hist[b as usize] += 1;
    }
    let n = code.len() as f32;
    let mut entropy = 0.0f32;
    for &count in &hist {
        if count > 0 {
            let p = count as f32 / n;
            entropy -= p * p.log2();
        }
    }
    (entropy / 8.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_selector_maxes_the_score() {
        let code = Bytes::from(vec![0x60, 0x00, 0xd0, 0x40, 0x22, 0x0a, 0x14, 0x57]);
        let analysis = analyze(
            None,
            1,
            Address::repeat_byte(0x22),
            &code,
            &code,
            &HashMap::new(),
            &[],
        )
        .await;

        assert!(analysis.report.is_honeypot);
        assert_eq!(analysis.report.risk_score, 100);
        assert!(analysis
            .report
            .flags
            .contains(&"Suspicious Function: drain()".to_string()));
    }

    #[tokio::test]
    async fn benign_code_stays_quiet() {
        // increment(): SLOAD slot 0, add 1, SSTORE.
        let code = Bytes::from(vec![
            0x60, 0x00, 0x54, 0x60, 0x01, 0x01, 0x60, 0x00, 0x55, 0x00,
        ]);
        let analysis = analyze(
            None,
            1,
            Address::repeat_byte(0x22),
            &code,
            &code,
            &HashMap::new(),
            &[],
        )
        .await;

        assert!(!analysis.report.is_honeypot);
        assert!(analysis.report.risk_score <= 10);
    }

    #[test]
    fn push_immediates_do_not_count_as_opcodes() {
        // PUSH1 0xff — the 0xff is data, not SELFDESTRUCT.
        assert!(!contains_opcode(&[0x60, 0xff, 0x00], OP_SELFDESTRUCT));
        // Bare 0xff executes.
        assert!(contains_opcode(&[0x60, 0x00, 0xff], OP_SELFDESTRUCT));
    }

    #[test]
    fn owner_return_interpretation() {
        assert_eq!(interpret_owner_return(&[0u8; 10]), None);

        let mut word = [0u8; 32];
        word[12..].fill(0xab);
        assert_eq!(
            interpret_owner_return(&word),
            Some(Address::repeat_byte(0xab))
        );

        assert_eq!(interpret_owner_return(&[0u8; 32]), Some(Address::ZERO));
    }

    #[test]
    fn entropy_bounds() {
        assert_eq!(shannon_entropy(&[]), 0.0);
        assert_eq!(shannon_entropy(&[0x42; 64]), 0.0);

        let all_bytes: Vec<u8> = (0..=255).collect();
        let e = shannon_entropy(&all_bytes);
        assert!((e - 1.0).abs() < 1e-5);
    }
}
