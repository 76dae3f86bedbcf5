//! Scan orchestrator: one request in, one response envelope out.
//!
//! Pipeline: prefetch → proxy resolution → static analysis → traced
//! baseline run → simulation battery → feature extraction → classifier →
//! drift → verdict. The whole scan runs under one wall-clock deadline;
//! sub-system failures degrade the result instead of failing it, with the
//! single exception of a broken EVM invariant.

use crate::battery::{self, BatteryInputs};
use crate::tracer::{self, TraceCollector};
use crate::{bytecode, drift, features, harness, proxy, verdict};
use alloy_primitives::{Address, Bytes, U256};
use sentinel_core::error::{SentinelError, SentinelResult};
use sentinel_core::flags;
use sentinel_core::types::{
    BatteryResult, CounterfactualResult, OutcomeStatus, ProxyInfo, ScanResponse, SecurityReport,
    TimeTravelResult, TxRequest, Verdict, VerdictKind, VerdictSource,
};
use sentinel_provider::{ChainOracle, ClassifierClient, HistoryStore};
use std::time::{Duration, Instant, SystemTime};

/// Overall wall-clock budget for one scan.
pub const SCAN_DEADLINE: Duration = Duration::from_secs(15);

/// Storage prefix preloaded on the fast path.
pub const FAST_PRELOAD_SLOTS: usize = 20;

/// Storage prefix preloaded when higher accuracy is requested.
pub const DEEP_PRELOAD_SLOTS: usize = 100;

/// Shared services a scan borrows. The oracle outlives every scan; history
/// and classifier are optional and their absence only degrades the output.
pub struct ScanContext<'a> {
    pub oracle: &'a dyn ChainOracle,
    pub history: Option<&'a dyn HistoryStore>,
    pub classifier: Option<&'a ClassifierClient>,
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Preload 100 slots instead of 20.
    pub deep: bool,
    pub deadline: Duration,
    /// Pin the baseline timestamp (tests, reproductions). `None` uses the
    /// system clock.
    pub base_timestamp: Option<u64>,
    pub block_number: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            deep: false,
            deadline: SCAN_DEADLINE,
            base_timestamp: None,
            block_number: 21_000_000,
        }
    }
}

/// Runs a full scan under the deadline. Always yields a response: on
/// deadline the envelope degrades to a low-confidence default verdict.
pub async fn scan(
    ctx: &ScanContext<'_>,
    request: &TxRequest,
    options: &ScanOptions,
) -> SentinelResult<ScanResponse> {
    match tokio::time::timeout(options.deadline, run_pipeline(ctx, request, options)).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(to = %request.to, "scan deadline exceeded, returning degraded verdict");
            Ok(incomplete_response())
        }
    }
}

async fn run_pipeline(
    ctx: &ScanContext<'_>,
    request: &TxRequest,
    options: &ScanOptions,
) -> SentinelResult<ScanResponse> {
    let t0 = Instant::now();
    let base_timestamp = options.base_timestamp.unwrap_or_else(now_secs);

    // 1. Prefetch. Failure here is the one fatal oracle path: without the
    // target's code there is nothing to analyze.
    let slot_count = if options.deep {
        DEEP_PRELOAD_SLOTS
    } else {
        FAST_PRELOAD_SLOTS
    };
    let bundle = ctx
        .oracle
        .prefetch_bundle(request.chain_id, request.to, slot_count)
        .await?;

    // 2. Proxy resolution, re-homing analysis onto the implementation.
    // A cycle or depth stop is non-fatal: the chain up to it is still used.
    let resolved = proxy::resolve(ctx.oracle, request.chain_id, request.to, &bundle.code).await;
    if let Some(err) = &resolved.walk_error {
        tracing::warn!(to = %request.to, error = %err, "proxy walk stopped early");
    }

    // 3. Static bytecode pass.
    let static_analysis = bytecode::analyze(
        Some(ctx.oracle),
        request.chain_id,
        request.to,
        &resolved.analysis_code,
        &bundle.code,
        &bundle.storage,
        &resolved.extra_code,
    )
    .await;
    let mut report = static_analysis.report;

    if resolved.info.is_proxy {
        report.add_flag(flags::proxy_contract(resolved.info.kind.label()));
    }
    report.proxy_info = resolved.info.clone();

    // 4. Traced baseline run.
    // The proxy admin is the best second privileged identity the head
    // state exposes; true deployer and whitelist discovery need history
    // the core does not read, so those rows appear only when available.
    let inputs = BatteryInputs {
        request: request.clone(),
        code: bundle.code.clone(),
        extra_code: resolved.extra_code.clone(),
        storage: bundle.storage.clone(),
        owner: report.owner,
        deployer: resolved.info.admin.filter(|a| !a.is_zero()),
        whitelisted: Vec::new(),
        base_timestamp,
        block_number: options.block_number,
    };

    let baseline_spec = battery::baseline_spec(&inputs);
    let (baseline_outcome, trace) = tokio::task::spawn_blocking(move || {
        let mut collector = TraceCollector::new();
        let outcome = harness::run(&baseline_spec, &mut collector)?;
        Ok::<_, SentinelError>((outcome, collector.finish()))
    })
    .await
    .map_err(|e| SentinelError::Internal(format!("spawn_blocking panicked: {e}")))??;

    report.tracing_events = trace.events.iter().map(|e| e.label().to_string()).collect();
    report.mechanism_story = tracer::mechanism_story(&trace);

    if baseline_outcome.is_reverted() {
        let reason = baseline_outcome
            .revert_reason
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        report.add_flag(flags::simulation_reverted(&reason));
        report.add_risk(20);
    }

    // 5. Simulation battery.
    let battery_result = battery::run_battery(inputs).await?;

    for flag in battery_result
        .time_travel
        .flags
        .iter()
        .chain(battery_result.counterfactual.flags.iter())
    {
        report.add_flag(flag.clone());
    }
    report.is_honeypot |= battery_result.counterfactual.is_honeypot;
    report.add_risk(battery_result.overall_risk_score);

    verdict::reconcile_story(&mut report, &battery_result);
    report.friendly_explanation = verdict::friendly_explanation(&report, &battery_result);

    // 6. Feature extraction and classification.
    let feature_vector = features::extract(&features::FeatureInputs {
        battery: &battery_result,
        trace: &trace,
        report: &report,
        proxy_depth: resolved.info.depth(),
        bytecode_entropy: static_analysis.entropy,
    });

    let ml_analysis = match (ctx.classifier, feature_vector.is_valid()) {
        (Some(classifier), true) => classifier.score(&feature_vector).await,
        _ => None,
    };

    // 7. Drift against stored history, then write-back.
    let drift_analysis = match ctx.history {
        Some(store) => {
            let record = drift::record_from_report(request, &report, now_ms());
            drift::detect_and_record(store, &mut report, record).await
        }
        None => None,
    };

    // 8. Verdict.
    let mut final_verdict = verdict::assemble(&report, &battery_result, ml_analysis.as_ref());

    let completed_runs = battery_result
        .counterfactual
        .runs
        .iter()
        .filter(|r| r.outcome.is_some())
        .count()
        + battery_result
            .time_travel
            .runs
            .iter()
            .filter(|r| r.outcome.is_some())
            .count();
    if completed_runs < 2 {
        report.add_flag(flags::ANALYSIS_INCOMPLETE);
        final_verdict = Verdict {
            verdict: final_verdict.verdict,
            reason: final_verdict.reason,
            confidence: final_verdict.confidence.min(50),
            source: VerdictSource::Default,
            uncertainty: None,
            confidence_interval: None,
        };
    }

    tracing::info!(
        to = %request.to,
        chain = request.chain_id,
        verdict = ?final_verdict.verdict,
        risk = report.risk_score,
        flags = report.flags.len(),
        elapsed_ms = t0.elapsed().as_millis(),
        "scan complete"
    );

    Ok(ScanResponse {
        status: baseline_outcome.status,
        instruction_count: trace.instruction_count,
        sstore_count: trace.sstore_count,
        call_count: trace.external_call_count(),
        security_report: report,
        proxy_info: resolved.info,
        drift_analysis,
        advanced_analysis: battery_result,
        ml_analysis,
        final_verdict,
    })
}

/// The degraded envelope produced when the deadline fires before the
/// pipeline finishes.
fn incomplete_response() -> ScanResponse {
    let mut report = SecurityReport::new();
    report.add_flag(flags::ANALYSIS_INCOMPLETE);

    ScanResponse {
        status: OutcomeStatus::Reverted,
        instruction_count: 0,
        sstore_count: 0,
        call_count: 0,
        security_report: report,
        proxy_info: ProxyInfo::not_a_proxy(),
        drift_analysis: None,
        advanced_analysis: BatteryResult {
            time_travel: TimeTravelResult {
                current_outcome: None,
                runs: Vec::new(),
                flags: Vec::new(),
                is_time_sensitive: false,
            },
            counterfactual: CounterfactualResult {
                runs: Vec::new(),
                is_honeypot: false,
                has_owner_privileges: false,
                has_whitelist_mechanism: false,
                privilege_diffs: Vec::new(),
                flags: Vec::new(),
                risk: 0,
            },
            overall_risk_score: 0,
            overall_summary: "Analysis incomplete".to_string(),
            is_scam: false,
        },
        ml_analysis: None,
        final_verdict: Verdict {
            verdict: VerdictKind::Safe,
            reason: "Analysis incomplete — deadline exceeded".to_string(),
            confidence: 50,
            source: VerdictSource::Default,
            uncertainty: None,
            confidence_interval: None,
        },
    }
}

// ---------------------------------------------------------------------------
// Request parsing
// ---------------------------------------------------------------------------

/// Parses the inbound analyze parameters: hex addresses and data, a decimal
/// or hex value, and a chain given as an integer or `eip155:<n>`.
pub fn parse_request(
    from: &str,
    to: &str,
    data: &str,
    value: &str,
    chain: &str,
) -> SentinelResult<TxRequest> {
    let from: Address = from
        .parse()
        .map_err(|_| SentinelError::InvalidInput(format!("bad from address: {from}")))?;
    let to: Address = to
        .parse()
        .map_err(|_| SentinelError::InvalidInput(format!("bad to address: {to}")))?;

    let data = if data.is_empty() || data == "0x" {
        Bytes::new()
    } else {
        Bytes::from(
            alloy_primitives::hex::decode(data)
                .map_err(|_| SentinelError::InvalidInput(format!("bad call data: {data}")))?,
        )
    };

    let value = parse_value(value)?;
    let chain_id = parse_chain(chain)?;

    Ok(TxRequest {
        from,
        to,
        data,
        value,
        chain_id,
    })
}

fn parse_value(value: &str) -> SentinelResult<U256> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(U256::ZERO);
    }
    let parsed = if let Some(hex) = trimmed.strip_prefix("0x") {
        U256::from_str_radix(hex, 16)
    } else {
        U256::from_str_radix(trimmed, 10)
    };
    parsed.map_err(|_| SentinelError::InvalidInput(format!("bad value: {value}")))
}

fn parse_chain(chain: &str) -> SentinelResult<u64> {
    let trimmed = chain.trim();
    let id = trimmed.strip_prefix("eip155:").unwrap_or(trimmed);
    id.parse::<u64>()
        .map_err(|_| SentinelError::InvalidInput(format!("bad chain: {chain}")))
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
