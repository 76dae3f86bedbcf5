//! Deterministic projection into the 15-dimensional feature vector.
//!
//! Every field lands in [0,1]; the math here is part of the external
//! contract with the classifier and never changes without a model retrain.

use sentinel_core::types::{
    BatteryResult, FeatureVector, OutcomeStatus, SecurityReport, TraceResult,
};

/// Inputs the projection reads. Flags are taken from the merged report so
/// battery findings count toward the pattern ratios.
pub struct FeatureInputs<'a> {
    pub battery: &'a BatteryResult,
    pub trace: &'a TraceResult,
    pub report: &'a SecurityReport,
    pub proxy_depth: usize,
    pub bytecode_entropy: f32,
}

#[inline]
fn clamp01(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[inline]
fn indicator(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn pattern_ratio(flags: &[String], patterns: &[&str]) -> f32 {
    let lowered: Vec<String> = flags.iter().map(|f| f.to_lowercase()).collect();
    let hits = patterns
        .iter()
        .filter(|p| lowered.iter().any(|f| f.contains(*p)))
        .count();
    clamp01(0.25 * hits as f32)
}

pub fn extract(inputs: &FeatureInputs<'_>) -> FeatureVector {
    let battery = inputs.battery;
    let cf = &battery.counterfactual;
    let tt = &battery.time_travel;
    let trace = inputs.trace;
    let report = inputs.report;

    let baseline_reverted = tt
        .current_outcome
        .as_ref()
        .map(|o| o.status == OutcomeStatus::Reverted)
        .unwrap_or(false);

    // Actors with a known outcome; errored sub-runs shrink the divisor.
    let known: Vec<OutcomeStatus> = cf
        .runs
        .iter()
        .filter_map(|r| r.outcome.as_ref().map(|o| o.status))
        .collect();

    let sim_success_rate = if known.is_empty() {
        if baseline_reverted {
            0.2
        } else {
            0.8
        }
    } else {
        known
            .iter()
            .filter(|s| **s == OutcomeStatus::Success)
            .count() as f32
            / known.len() as f32
    };

    let revert_rate = if known.is_empty() {
        if baseline_reverted {
            0.8
        } else {
            0.2
        }
    } else {
        known
            .iter()
            .filter(|s| **s == OutcomeStatus::Reverted)
            .count() as f32
            / known.len() as f32
    };

    let owner_privilege_ratio = 0.4 * indicator(cf.has_owner_privileges)
        + 0.3 * indicator(cf.is_honeypot)
        + (0.1 * cf.privilege_diffs.len() as f32).min(0.3);

    let diverging = tt.runs.iter().filter(|r| r.diverges).count();
    let time_variance_score = 0.5 * indicator(tt.is_time_sensitive)
        + (0.1 * diverging as f32).min(0.5)
        + (0.1 * tt.flags.len() as f32).min(0.3);

    let gated_branch_ratio = pattern_ratio(
        &report.flags,
        &["blacklist", "whitelist", "owner", "blocked"],
    );
    let mint_transfer_ratio = pattern_ratio(
        &report.flags,
        &["mint", "drain", "pause", "selfdestruct"],
    );

    let steps = trace.instruction_count;
    let weighted_hits = 2 * trace.selfdestruct_count + trace.delegatecall_count + trace.callcode_count;
    let denominator = (steps as f32 / 10.0).max(10.0);
    let suspicious_opcode_density = clamp01(weighted_hits as f32 / denominator);

    let sload_density = if steps == 0 {
        0.0
    } else {
        clamp01(trace.sload_count as f32 / steps as f32 * 10.0)
    };

    let counterfactual_risk = 0.5 * indicator(cf.is_honeypot)
        + 0.3 * indicator(cf.has_owner_privileges)
        + 0.2 * indicator(cf.has_whitelist_mechanism);

    let time_risk_flags = tt
        .flags
        .iter()
        .filter(|f| f.contains("TIME-BOMB") || f.contains("CRITICAL"))
        .count();
    let time_bomb_risk = (0.2 * time_risk_flags as f32).min(1.0);

    // Spread of gas across successful actors.
    let success_gas: Vec<u64> = cf
        .runs
        .iter()
        .filter_map(|r| r.outcome.as_ref())
        .filter(|o| o.status == OutcomeStatus::Success)
        .map(|o| o.gas_used)
        .collect();
    let mut gas_anomaly_score = match (success_gas.iter().max(), success_gas.iter().min()) {
        (Some(&max), Some(&min)) if max > 0 => (max - min) as f32 / max as f32,
        _ => 0.0,
    };
    if report.flags.iter().any(|f| f.contains("GAS ANOMALY")) {
        gas_anomaly_score = gas_anomaly_score.max(0.7);
    }

    FeatureVector {
        sim_success_rate: clamp01(sim_success_rate),
        owner_privilege_ratio: clamp01(owner_privilege_ratio),
        time_variance_score: clamp01(time_variance_score),
        gated_branch_ratio,
        mint_transfer_ratio,
        suspicious_opcode_density,
        proxy_depth_normalized: clamp01(inputs.proxy_depth as f32 / 3.0),
        sload_density,
        bytecode_entropy: clamp01(inputs.bytecode_entropy),
        counterfactual_risk: clamp01(counterfactual_risk),
        time_bomb_risk: clamp01(time_bomb_risk),
        gas_anomaly_score: clamp01(gas_anomaly_score),
        security_report_risk: clamp01(report.risk_score as f32 / 100.0),
        flag_density: clamp01(report.flags.len() as f32 / 10.0),
        revert_rate: clamp01(revert_rate),
    }
}
