//! The stable flag catalogue and capability hashing.
//!
//! Flag strings are part of the external contract: drift detection compares
//! scans by flag identity, so labels here are never renamed. Parameterized
//! flags go through the builder functions to keep their shape uniform.

use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Fixed labels
// ---------------------------------------------------------------------------

pub const OWNERSHIP_RENOUNCED: &str = "Ownership Renounced (Safe)";
pub const HONEYPOT: &str = "CRITICAL HONEYPOT: Owner can execute, but users CANNOT";
pub const WHITELIST: &str = "WHITELIST DETECTED: Only whitelisted addresses can execute";
pub const UNUSUAL_OWNER_BLOCKED: &str = "UNUSUAL: Users execute but owner cannot";
pub const GAS_ANOMALY: &str = "GAS ANOMALY: Owner and user gas usage differ sharply";
pub const TRADING_CLOSED: &str = "TRADING CLOSED: Transaction worked before but fails now";
pub const ANALYSIS_INCOMPLETE: &str = "Analysis incomplete";

// ---------------------------------------------------------------------------
// Parameterized builders
// ---------------------------------------------------------------------------

/// Addresses render as canonical lowercase hex so the flag string is
/// byte-stable across scans.
pub fn contract_has_owner(owner: &alloy_primitives::Address) -> String {
    format!("Contract has an Owner: {owner:#x}")
}

pub fn suspicious_function(label: &str) -> String {
    format!("Suspicious Function: {label}")
}

pub fn proxy_contract(kind_label: &str) -> String {
    format!("Proxy Contract ({kind_label})")
}

pub fn time_bomb(offset_seconds: i64) -> String {
    format!("TIME-BOMB: Transaction fails at {}", humanize_offset(offset_seconds))
}

pub fn fails_within_week(offset_seconds: i64) -> String {
    format!(
        "CRITICAL: Fails within 7 days (at {})",
        humanize_offset(offset_seconds)
    )
}

pub fn delayed_trading(offset_seconds: i64) -> String {
    format!(
        "DELAYED TRADING: Trading opens at {}",
        humanize_offset(offset_seconds)
    )
}

pub fn extended_trading_delay(offset_seconds: i64) -> String {
    format!(
        "WARNING: Extended trading delay ({})",
        humanize_offset(offset_seconds)
    )
}

pub fn risk_increased(delta: i16) -> String {
    format!("Risk Increased (+{delta} since last scan)")
}

pub fn simulation_reverted(reason: &str) -> String {
    format!("Simulation Reverted: {reason}")
}

/// Humanizes a time offset into the fixed vocabulary used by flag strings.
///
/// Exact divisions render as `+7 Days`; anything else falls back to seconds
/// so an unexpected offset still produces a stable label.
pub fn humanize_offset(offset_seconds: i64) -> String {
    let sign = if offset_seconds < 0 { "-" } else { "+" };
    let abs = offset_seconds.unsigned_abs();

    let (count, unit) = if abs % 86_400 == 0 && abs > 0 {
        (abs / 86_400, "Day")
    } else if abs % 3_600 == 0 && abs > 0 {
        (abs / 3_600, "Hour")
    } else {
        (abs, "Second")
    };

    let plural = if count == 1 { "" } else { "s" };
    format!("{sign}{count} {unit}{plural}")
}

// ---------------------------------------------------------------------------
// Capability hash
// ---------------------------------------------------------------------------

/// Compact identity of a scan's flag set.
///
/// `sha256(sorted_flags.join("|"))` truncated to 16 hex characters.
/// Order-independent: shuffled inputs hash identically.
pub fn capability_hash(flags: &[String]) -> String {
    let mut sorted: Vec<&str> = flags.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let digest = Sha256::digest(sorted.join("|").as_bytes());
    let mut out = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_hash_is_order_independent() {
        let a = vec!["Flag B".to_string(), "Flag A".to_string()];
        let b = vec!["Flag A".to_string(), "Flag B".to_string()];
        assert_eq!(capability_hash(&a), capability_hash(&b));
    }

    #[test]
    fn capability_hash_changes_with_set() {
        let a = vec!["Flag A".to_string()];
        let b = vec!["Flag A".to_string(), "Flag B".to_string()];
        assert_ne!(capability_hash(&a), capability_hash(&b));
    }

    #[test]
    fn capability_hash_is_16_hex() {
        let h = capability_hash(&["x".to_string()]);
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn capability_hash_ignores_duplicates() {
        let a = vec!["Flag A".to_string(), "Flag A".to_string()];
        let b = vec!["Flag A".to_string()];
        assert_eq!(capability_hash(&a), capability_hash(&b));
    }

    #[test]
    fn offsets_humanize_to_fixed_vocabulary() {
        assert_eq!(humanize_offset(3_600), "+1 Hour");
        assert_eq!(humanize_offset(86_400), "+1 Day");
        assert_eq!(humanize_offset(604_800), "+7 Days");
        assert_eq!(humanize_offset(2_592_000), "+30 Days");
        assert_eq!(humanize_offset(-86_400), "-1 Day");
    }

    #[test]
    fn scenario_flags_render_exactly() {
        assert_eq!(
            time_bomb(604_800),
            "TIME-BOMB: Transaction fails at +7 Days"
        );
        assert_eq!(
            delayed_trading(86_400),
            "DELAYED TRADING: Trading opens at +1 Day"
        );
        assert_eq!(risk_increased(75), "Risk Increased (+75 since last scan)");
    }
}
