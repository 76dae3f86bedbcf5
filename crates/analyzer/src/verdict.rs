//! Final verdict assembly.
//!
//! A deterministic decision table, evaluated top to bottom, first match
//! wins. Rule-based findings always outrank the classifier; the classifier
//! only decides when no hard rule fired.

use sentinel_core::types::{
    BatteryResult, MechanismStory, MlAnalysis, SecurityReport, Severity, Verdict, VerdictKind,
    VerdictSource,
};

/// Swaps a "Safe" tracer story for the canned narrative of the detected
/// scam family. Runs before the decision table, for explanation only.
pub fn reconcile_story(report: &mut SecurityReport, battery: &BatteryResult) {
    if !battery.is_scam || report.mechanism_story.severity != Severity::Safe {
        return;
    }

    let cf = &battery.counterfactual;
    report.mechanism_story = if cf.is_honeypot || cf.has_owner_privileges {
        MechanismStory {
            title: "Hidden Owner Privileges".to_string(),
            story: "Simulation shows the owner can execute this transaction while ordinary \
                    callers revert, even though the opcode trace looks benign. The gating \
                    logic is likely indirect or delegated."
                .to_string(),
            severity: Severity::High,
        }
    } else if battery
        .time_travel
        .flags
        .iter()
        .any(|f| f.contains("TIME-BOMB") || f.contains("CRITICAL"))
    {
        MechanismStory {
            title: "Time-Locked Execution".to_string(),
            story: "Simulation at future timestamps shows this transaction stops working, \
                    even though the opcode trace looks benign. A time lock is in effect."
                .to_string(),
            severity: Severity::High,
        }
    } else {
        MechanismStory {
            title: "Hidden Revert Conditions".to_string(),
            story: "Simulated variants of this transaction revert under conditions the \
                    opcode trace does not explain. Execution is gated by hidden state."
                .to_string(),
            severity: Severity::High,
        }
    };
}

/// Short prose summary of the dominant risk factors.
pub fn friendly_explanation(report: &SecurityReport, battery: &BatteryResult) -> String {
    let mut factors: Vec<&str> = Vec::new();

    if battery.counterfactual.is_honeypot || battery.counterfactual.has_owner_privileges {
        factors.push("owner-restricted execution paths");
    }
    if battery.counterfactual.has_whitelist_mechanism {
        factors.push("access-gated branches");
    }
    if battery.time_travel.is_time_sensitive {
        factors.push("time-based restrictions");
    }
    if report
        .flags
        .iter()
        .any(|f| f.starts_with("Suspicious Function"))
    {
        factors.push("suspicious privileged functions");
    }
    if report.proxy_info.is_proxy {
        factors.push("upgradeable proxy indirection");
    }

    if factors.is_empty() {
        return "Low risk — no significant issues detected".to_string();
    }

    if battery.is_scam || report.risk_score >= 70 {
        format!("High risk detected: {}", factors[..factors.len().min(3)].join(", "))
    } else {
        format!("Moderate risk: {}", factors[..factors.len().min(2)].join(", "))
    }
}

/// The decision table.
pub fn assemble(
    report: &SecurityReport,
    battery: &BatteryResult,
    ml: Option<&MlAnalysis>,
) -> Verdict {
    let cf = &battery.counterfactual;

    // 1. Hard rules: honeypot or scam evidence blocks outright.
    if report.is_honeypot || battery.is_scam || cf.is_honeypot || cf.has_owner_privileges {
        let reason = if !report.friendly_explanation.is_empty() {
            report.friendly_explanation.clone()
        } else if !battery.overall_summary.is_empty() {
            battery.overall_summary.clone()
        } else {
            "Honeypot or scam patterns detected".to_string()
        };
        return Verdict {
            verdict: VerdictKind::Block,
            reason,
            confidence: 100,
            source: VerdictSource::RuleBased,
            uncertainty: None,
            confidence_interval: None,
        };
    }

    // 2. Accumulated risk score.
    if report.risk_score >= 50 {
        return Verdict {
            verdict: VerdictKind::Warn,
            reason: format!(
                "Risk score {}/100 — Proceed with caution",
                report.risk_score
            ),
            confidence: 80,
            source: VerdictSource::RiskScore,
            uncertainty: None,
            confidence_interval: None,
        };
    }

    // 3–5. Calibrated classifier, when available.
    if let Some(ml) = ml {
        let p = ml.scam_probability.clamp(0.0, 1.0);
        let (verdict, confidence) = if p > 0.7 {
            (VerdictKind::Block, (100.0 * p) as u8)
        } else if p > 0.4 {
            (VerdictKind::Warn, (100.0 * p) as u8)
        } else {
            (VerdictKind::Safe, (100.0 * (1.0 - p)) as u8)
        };
        return Verdict {
            verdict,
            reason: ml.reason.clone(),
            confidence,
            source: VerdictSource::MlCalibrated,
            uncertainty: Some(ml.uncertainty),
            confidence_interval: Some((ml.confidence_interval[0], ml.confidence_interval[1])),
        };
    }

    // 6. Nothing fired and no model: safe by default, low confidence.
    Verdict {
        verdict: VerdictKind::Safe,
        reason: "No risk indicators detected".to_string(),
        confidence: 50,
        source: VerdictSource::Default,
        uncertainty: None,
        confidence_interval: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::types::{CounterfactualResult, Outcome, TimeTravelResult};

    fn clean_battery() -> BatteryResult {
        BatteryResult {
            time_travel: TimeTravelResult {
                current_outcome: Some(Outcome::success(21_000, Default::default())),
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
            overall_summary: String::new(),
            is_scam: false,
        }
    }

    fn ml(p: f32) -> MlAnalysis {
        MlAnalysis {
            scam_probability: p,
            uncertainty: 0.2,
            confidence_interval: [p - 0.05, p + 0.05],
            verdict: String::new(),
            reason: "model says so".to_string(),
            model_version: "test".to_string(),
            risk_band: "LOW".to_string(),
        }
    }

    #[test]
    fn honeypot_blocks_regardless_of_classifier() {
        let mut battery = clean_battery();
        battery.counterfactual.is_honeypot = true;
        battery.is_scam = true;

        let verdict = assemble(&SecurityReport::new(), &battery, Some(&ml(0.01)));
        assert_eq!(verdict.verdict, VerdictKind::Block);
        assert_eq!(verdict.source, VerdictSource::RuleBased);
        assert_eq!(verdict.confidence, 100);
    }

    #[test]
    fn risk_score_warns_before_classifier() {
        let mut report = SecurityReport::new();
        report.risk_score = 60;

        let verdict = assemble(&report, &clean_battery(), Some(&ml(0.05)));
        assert_eq!(verdict.verdict, VerdictKind::Warn);
        assert_eq!(verdict.source, VerdictSource::RiskScore);
        assert_eq!(verdict.reason, "Risk score 60/100 — Proceed with caution");
        assert_eq!(verdict.confidence, 80);
    }

    #[test]
    fn classifier_thresholds() {
        let report = SecurityReport::new();
        let battery = clean_battery();

        let v = assemble(&report, &battery, Some(&ml(0.8)));
        assert_eq!(v.verdict, VerdictKind::Block);
        assert_eq!(v.source, VerdictSource::MlCalibrated);
        assert_eq!(v.confidence, 80);

        let v = assemble(&report, &battery, Some(&ml(0.5)));
        assert_eq!(v.verdict, VerdictKind::Warn);

        let v = assemble(&report, &battery, Some(&ml(0.1)));
        assert_eq!(v.verdict, VerdictKind::Safe);
        assert_eq!(v.confidence, 90);
        assert!(v.uncertainty.is_some());
    }

    #[test]
    fn default_verdict_without_classifier() {
        let verdict = assemble(&SecurityReport::new(), &clean_battery(), None);
        assert_eq!(verdict.verdict, VerdictKind::Safe);
        assert_eq!(verdict.source, VerdictSource::Default);
        assert_eq!(verdict.confidence, 50);
    }

    #[test]
    fn safe_story_is_replaced_when_battery_flags_scam() {
        let mut report = SecurityReport::new();
        let mut battery = clean_battery();
        battery.is_scam = true;
        battery.counterfactual.is_honeypot = true;

        reconcile_story(&mut report, &battery);
        assert_eq!(report.mechanism_story.severity, Severity::High);
        assert_eq!(report.mechanism_story.title, "Hidden Owner Privileges");
    }

    #[test]
    fn non_safe_story_is_kept() {
        let mut report = SecurityReport::new();
        report.mechanism_story.severity = Severity::Medium;
        report.mechanism_story.title = "Caller-Gated Execution".to_string();

        let mut battery = clean_battery();
        battery.is_scam = true;

        reconcile_story(&mut report, &battery);
        assert_eq!(report.mechanism_story.title, "Caller-Gated Execution");
    }
}
