//! Behavioral drift detection between successive scans.
//!
//! Reads the most recent stored record for the address, diffs risk and flag
//! sets by capability hash, then appends the new record to the bounded
//! per-address history list. History failures are non-fatal: the scan just
//! loses its drift section.

use sentinel_core::flags;
use sentinel_core::types::{DriftAnalysis, ScanRecord, SecurityReport, TxRequest};
use sentinel_provider::{history_key, scan_key, HistoryStore, HISTORY_CAP, RECORD_TTL};

/// Risk increase that earns the auto-flag.
pub const DRIFT_FLAG_THRESHOLD: i16 = 20;

/// Advisory severity for a risk increase, surfaced to the user.
pub fn drift_severity(risk_delta: i16) -> Option<&'static str> {
    match risk_delta {
        d if d >= 60 => Some("critical"),
        d if d >= 40 => Some("high"),
        d if d >= 20 => Some("moderate"),
        _ => None,
    }
}

/// Builds the record that represents this scan in history.
pub fn record_from_report(
    request: &TxRequest,
    report: &SecurityReport,
    timestamp_ms: u64,
) -> ScanRecord {
    ScanRecord {
        timestamp_ms,
        chain_id: request.chain_id,
        address: request.to,
        risk_score: report.risk_score,
        flags: report.flags.clone(),
        capability_hash: report.capability_hash(),
        is_honeypot: report.is_honeypot,
        ownership_status: report.ownership_status,
        proxy_info: report.proxy_info.is_proxy.then(|| report.proxy_info.clone()),
    }
}

/// Compares against the prior record, applies the auto-flag on a sharp risk
/// increase, then writes the (possibly re-flagged) record back.
pub async fn detect_and_record(
    store: &dyn HistoryStore,
    report: &mut SecurityReport,
    mut record: ScanRecord,
) -> Option<DriftAnalysis> {
    let key = history_key(&record.address);

    let prior: Option<ScanRecord> = match store.list_range(&key, 0, 0).await {
        Ok(rows) => rows
            .into_iter()
            .next()
            .and_then(|row| serde_json::from_str(&row).ok()),
        Err(e) => {
            tracing::warn!(error = %e, "history unavailable, drift analysis omitted");
            return None;
        }
    };

    let analysis = prior.map(|prior| {
        let risk_delta = record.risk_score as i16 - prior.risk_score as i16;
        let new_flags: Vec<String> = record
            .flags
            .iter()
            .filter(|f| !prior.flags.contains(f))
            .cloned()
            .collect();
        let removed_flags: Vec<String> = prior
            .flags
            .iter()
            .filter(|f| !record.flags.contains(f))
            .cloned()
            .collect();

        DriftAnalysis {
            has_drift: record.capability_hash != prior.capability_hash,
            risk_delta,
            new_flags,
            removed_flags,
            previous_scan_timestamp: Some(prior.timestamp_ms),
            prior: Some(prior),
        }
    });

    if let Some(analysis) = &analysis {
        if analysis.risk_delta >= DRIFT_FLAG_THRESHOLD {
            let flag = flags::risk_increased(analysis.risk_delta);
            tracing::info!(
                risk_delta = analysis.risk_delta,
                severity = drift_severity(analysis.risk_delta),
                "risk increased since last scan"
            );
            report.add_flag(flag.clone());
            record.flags.push(flag);
            record.capability_hash = flags::capability_hash(&record.flags);
        }
    }

    match serde_json::to_string(&record) {
        Ok(json) => {
            if let Err(e) = store.list_push_front(&key, json.clone()).await {
                tracing::warn!(error = %e, "history write failed");
            } else {
                let _ = store.list_trim(&key, 0, HISTORY_CAP - 1).await;
                let _ = store
                    .set_with_ttl(
                        &scan_key(&record.address, record.timestamp_ms),
                        json,
                        RECORD_TTL,
                    )
                    .await;
            }
        }
        Err(e) => tracing::warn!(error = %e, "record serialization failed"),
    }

    analysis
}
