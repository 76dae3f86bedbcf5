//! Domain types for the Sentinel pre-signing firewall.

use crate::flags;
use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A candidate transaction submitted for analysis. Immutable for the
/// lifetime of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    /// `Bytes` (ref-counted) for zero-copy sharing through the pipeline.
    pub data: Bytes,
    pub value: U256,
    pub chain_id: u64,
}

// ---------------------------------------------------------------------------
// Simulation outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Success,
    Reverted,
}

/// Terminal result of one EVM run.
///
/// A `Reverted` outcome always carries a reason string; construction goes
/// through [`Outcome::reverted`] so the invariant cannot be skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: OutcomeStatus,
    pub revert_reason: Option<String>,
    pub gas_used: u64,
    pub return_value: Bytes,
}

impl Outcome {
    pub fn success(gas_used: u64, return_value: Bytes) -> Self {
        Self {
            status: OutcomeStatus::Success,
            revert_reason: None,
            gas_used,
            return_value,
        }
    }

    pub fn reverted(reason: Option<String>, gas_used: u64, return_value: Bytes) -> Self {
        Self {
            status: OutcomeStatus::Reverted,
            revert_reason: Some(reason.unwrap_or_else(|| "unknown".to_string())),
            gas_used,
            return_value,
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    #[inline]
    pub fn is_reverted(&self) -> bool {
        self.status == OutcomeStatus::Reverted
    }
}

// ---------------------------------------------------------------------------
// Opcode stream
// ---------------------------------------------------------------------------

/// One step of EVM execution as seen by the tracer.
///
/// Only the top five stack words are retained, so a step is constant-size
/// regardless of actual stack depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcodeStep {
    pub pc: u32,
    pub opcode: u8,
    pub opcode_name: String,
    pub depth: u16,
    pub stack_top: SmallVec<[String; 5]>,
}

/// Semantic events mined from the opcode stream. Within a single frame
/// events are emitted monotonically by `pc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    SenderLoaded { pc: u32 },
    OriginLoaded { pc: u32 },
    TimestampLoaded { pc: u32 },
    StorageReadAfterSender { pc: u32, slot: String },
    ComparisonAfterSender { pc: u32 },
    ComparisonAfterTimestamp { pc: u32 },
}

impl TraceEvent {
    /// Stable label for the response envelope's `tracing_events[]`.
    pub fn label(&self) -> &'static str {
        match self {
            TraceEvent::SenderLoaded { .. } => "sender_loaded",
            TraceEvent::OriginLoaded { .. } => "origin_loaded",
            TraceEvent::TimestampLoaded { .. } => "timestamp_loaded",
            TraceEvent::StorageReadAfterSender { .. } => "storage_read_after_sender",
            TraceEvent::ComparisonAfterSender { .. } => "comparison_after_sender",
            TraceEvent::ComparisonAfterTimestamp { .. } => "comparison_after_timestamp",
        }
    }
}

/// Everything the tracer mined from one call-frame root. Created per run,
/// dropped once the feature extractor has consumed it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceResult {
    pub events: Vec<TraceEvent>,
    /// Numeric slots touched by SLOAD, as canonical hex. `BTreeSet` keeps
    /// iteration deterministic across scans.
    pub touched_slots: BTreeSet<String>,
    pub instruction_count: u64,
    pub sload_count: u64,
    pub sstore_count: u64,
    pub call_count: u64,
    pub delegatecall_count: u64,
    pub staticcall_count: u64,
    pub callcode_count: u64,
    pub selfdestruct_count: u64,
    pub reads_sender: bool,
    pub reads_origin: bool,
    pub reads_timestamp: bool,
    pub storage_gated_on_sender: bool,
    pub compares_sender: bool,
    pub compares_timestamp: bool,
}

impl TraceResult {
    /// Total CALL-family opcodes (CALL, DELEGATECALL, STATICCALL, CALLCODE).
    pub fn external_call_count(&self) -> u64 {
        self.call_count + self.delegatecall_count + self.staticcall_count + self.callcode_count
    }
}

// ---------------------------------------------------------------------------
// Proxy info
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Eip1967Transparent,
    Eip1822Uups,
    Eip897Legacy,
    Eip1167Minimal,
    Custom,
    None,
}

impl ProxyKind {
    /// Human label used inside `Proxy Contract (<label>)` flags.
    pub fn label(&self) -> &'static str {
        match self {
            ProxyKind::Eip1967Transparent => "EIP-1967",
            ProxyKind::Eip1822Uups => "EIP-1822 UUPS",
            ProxyKind::Eip897Legacy => "EIP-897",
            ProxyKind::Eip1167Minimal => "EIP-1167 Minimal",
            ProxyKind::Custom => "Custom",
            ProxyKind::None => "None",
        }
    }
}

/// Result of proxy classification and implementation resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub is_proxy: bool,
    pub kind: ProxyKind,
    pub implementation: Option<Address>,
    pub beacon: Option<Address>,
    pub admin: Option<Address>,
    /// proxy → … → final implementation; max length 5, cycle-free.
    pub resolution_chain: Vec<Address>,
}

impl Default for ProxyInfo {
    fn default() -> Self {
        Self::not_a_proxy()
    }
}

impl ProxyInfo {
    pub fn not_a_proxy() -> Self {
        Self {
            is_proxy: false,
            kind: ProxyKind::None,
            implementation: None,
            beacon: None,
            admin: None,
            resolution_chain: Vec::new(),
        }
    }

    /// Number of proxy hops walked (0 for a plain contract).
    pub fn depth(&self) -> usize {
        self.resolution_chain.len().saturating_sub(1)
    }
}

// ---------------------------------------------------------------------------
// Security report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OwnershipStatus {
    Renounced,
    Centralized,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Safe,
    Low,
    Medium,
    High,
}

/// What the opcode-level evidence says the contract *does*, in prose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MechanismStory {
    pub title: String,
    pub story: String,
    pub severity: Severity,
}

impl MechanismStory {
    pub fn safe() -> Self {
        Self {
            title: "No Restrictive Mechanisms".to_string(),
            story: "Execution does not branch on caller identity or block time.".to_string(),
            severity: Severity::Safe,
        }
    }
}

/// The base analysis result, accumulated across the static analyzer, the
/// battery, and the drift detector.
///
/// `flags` is a set with stable string identity; insertion order is kept
/// for display, duplicates are rejected by [`SecurityReport::add_flag`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityReport {
    pub is_honeypot: bool,
    pub ownership_status: OwnershipStatus,
    pub risk_score: u8,
    pub flags: Vec<String>,
    #[serde(rename = "owner_address", skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    pub friendly_explanation: String,
    pub mechanism_story: MechanismStory,
    pub tracing_events: Vec<String>,
    #[serde(skip_serializing, default)]
    pub proxy_info: ProxyInfo,
}

impl SecurityReport {
    pub fn new() -> Self {
        Self {
            is_honeypot: false,
            ownership_status: OwnershipStatus::Unknown,
            risk_score: 0,
            flags: Vec::new(),
            owner: None,
            friendly_explanation: String::new(),
            mechanism_story: MechanismStory::safe(),
            tracing_events: Vec::new(),
            proxy_info: ProxyInfo::not_a_proxy(),
        }
    }

    /// Adds a flag unless an identical one is already present.
    pub fn add_flag(&mut self, flag: impl Into<String>) {
        let flag = flag.into();
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }

    /// Saturating risk accumulation — the score never leaves 0..=100.
    pub fn add_risk(&mut self, weight: u8) {
        self.risk_score = self.risk_score.saturating_add(weight).min(100);
    }

    pub fn capability_hash(&self) -> String {
        flags::capability_hash(&self.flags)
    }
}

impl Default for SecurityReport {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Simulation battery results
// ---------------------------------------------------------------------------

/// One time-travel run at a given offset from the baseline timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeTravelRun {
    pub offset_seconds: i64,
    pub description: String,
    /// `None` when the sub-run errored — "outcome unknown".
    pub outcome: Option<Outcome>,
    pub diverges: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeTravelResult {
    pub current_outcome: Option<Outcome>,
    pub runs: Vec<TimeTravelRun>,
    pub flags: Vec<String>,
    pub is_time_sensitive: bool,
}

/// Identity under which a counterfactual run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorRole {
    CurrentUser,
    RandomUser,
    Owner,
    Deployer,
    Whitelisted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRun {
    pub role: ActorRole,
    pub address: Address,
    /// `None` when the sub-run errored — excluded from every ratio.
    pub outcome: Option<Outcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegeDiff {
    pub severity: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterfactualResult {
    pub runs: Vec<ActorRun>,
    pub is_honeypot: bool,
    pub has_owner_privileges: bool,
    pub has_whitelist_mechanism: bool,
    pub privilege_diffs: Vec<PrivilegeDiff>,
    pub flags: Vec<String>,
    pub risk: u8,
}

/// Combined output of the simulation battery (spec's "advanced analysis").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryResult {
    pub time_travel: TimeTravelResult,
    pub counterfactual: CounterfactualResult,
    pub overall_risk_score: u8,
    pub overall_summary: String,
    pub is_scam: bool,
}

// ---------------------------------------------------------------------------
// Feature vector
// ---------------------------------------------------------------------------

/// The 15-dimensional projection consumed by the classifier oracle.
///
/// Field names, order, and semantics are the external contract with the
/// model — serialization must match `FIELD_NAMES` exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub sim_success_rate: f32,
    pub owner_privilege_ratio: f32,
    pub time_variance_score: f32,
    pub gated_branch_ratio: f32,
    pub mint_transfer_ratio: f32,
    pub suspicious_opcode_density: f32,
    pub proxy_depth_normalized: f32,
    pub sload_density: f32,
    pub bytecode_entropy: f32,
    pub counterfactual_risk: f32,
    pub time_bomb_risk: f32,
    pub gas_anomaly_score: f32,
    pub security_report_risk: f32,
    pub flag_density: f32,
    pub revert_rate: f32,
}

impl FeatureVector {
    pub const FIELD_NAMES: [&'static str; 15] = [
        "sim_success_rate",
        "owner_privilege_ratio",
        "time_variance_score",
        "gated_branch_ratio",
        "mint_transfer_ratio",
        "suspicious_opcode_density",
        "proxy_depth_normalized",
        "sload_density",
        "bytecode_entropy",
        "counterfactual_risk",
        "time_bomb_risk",
        "gas_anomaly_score",
        "security_report_risk",
        "flag_density",
        "revert_rate",
    ];

    /// Fields in contract order.
    pub fn to_array(&self) -> [f32; 15] {
        [
            self.sim_success_rate,
            self.owner_privilege_ratio,
            self.time_variance_score,
            self.gated_branch_ratio,
            self.mint_transfer_ratio,
            self.suspicious_opcode_density,
            self.proxy_depth_normalized,
            self.sload_density,
            self.bytecode_entropy,
            self.counterfactual_risk,
            self.time_bomb_risk,
            self.gas_anomaly_score,
            self.security_report_risk,
            self.flag_density,
            self.revert_rate,
        ]
    }

    /// Every field must be finite and in [0,1]. NaN/Inf forbidden.
    pub fn is_valid(&self) -> bool {
        self.to_array()
            .iter()
            .all(|v| v.is_finite() && (0.0..=1.0).contains(v))
    }
}

// ---------------------------------------------------------------------------
// Scan history & drift
// ---------------------------------------------------------------------------

/// One line-size record appended to the per-address history list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub timestamp_ms: u64,
    pub chain_id: u64,
    pub address: Address,
    pub risk_score: u8,
    pub flags: Vec<String>,
    /// `sha256(sorted_flags.join("|"))[..16]`.
    pub capability_hash: String,
    pub is_honeypot: bool,
    pub ownership_status: OwnershipStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_info: Option<ProxyInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftAnalysis {
    pub has_drift: bool,
    pub risk_delta: i16,
    pub new_flags: Vec<String>,
    pub removed_flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_scan_timestamp: Option<u64>,
    #[serde(skip)]
    pub prior: Option<ScanRecord>,
}

// ---------------------------------------------------------------------------
// Classifier output
// ---------------------------------------------------------------------------

/// What the external calibrated model returned for one feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlAnalysis {
    pub scam_probability: f32,
    pub uncertainty: f32,
    pub confidence_interval: [f32; 2],
    pub verdict: String,
    pub reason: String,
    pub model_version: String,
    #[serde(default)]
    pub risk_band: String,
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictKind {
    Block,
    Warn,
    Safe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerdictSource {
    RuleBased,
    RiskScore,
    MlCalibrated,
    Default,
}

/// The user-facing classification. Always produced, even for degraded scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub reason: String,
    pub confidence: u8,
    pub source: VerdictSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncertainty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_interval: Option<(f32, f32)>,
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// The full analyze response returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResponse {
    pub status: OutcomeStatus,
    pub instruction_count: u64,
    pub sstore_count: u64,
    pub call_count: u64,
    pub security_report: SecurityReport,
    pub proxy_info: ProxyInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drift_analysis: Option<DriftAnalysis>,
    pub advanced_analysis: BatteryResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ml_analysis: Option<MlAnalysis>,
    pub final_verdict: Verdict,
}
