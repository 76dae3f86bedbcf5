//! Multi-scenario simulation battery.
//!
//! Two independent scenario families share one prefetched bundle:
//! time-travel runs vary `block.timestamp`, counterfactual runs vary the
//! sender identity (with balance injection for that actor, and owner-slot
//! injection for the simulated owner). Each run gets its own freshly built
//! EVM, so the whole battery parallelizes freely; divergences between
//! terminal outcomes define the scam signals.

use crate::harness::{self, BlockSpec, ForkSpec, NullObserver};
use alloy_primitives::{keccak256, Address, Bytes, U256};
use rayon::prelude::*;
use sentinel_core::error::{SentinelError, SentinelResult};
use sentinel_core::flags;
use sentinel_core::types::{
    ActorRole, ActorRun, BatteryResult, CounterfactualResult, Outcome, OutcomeStatus,
    PrivilegeDiff, TimeTravelResult, TimeTravelRun, TxRequest,
};
use std::collections::HashMap;

/// Canonical timestamp offsets, seconds relative to the baseline.
pub const TIME_OFFSETS: [i64; 5] = [3_600, 86_400, 604_800, 2_592_000, -86_400];

const WEEK_SECONDS: i64 = 604_800;
const DAY_SECONDS: i64 = 86_400;

/// Relative gas difference between owner and user that counts as anomalous.
const GAS_ANOMALY_RATIO: f64 = 0.5;

/// Everything the battery needs; owned so the whole run can move onto a
/// blocking thread.
#[derive(Debug, Clone)]
pub struct BatteryInputs {
    pub request: TxRequest,
    /// Code installed at the target (the proxy's own code when re-homed).
    pub code: Bytes,
    pub extra_code: Vec<(Address, Bytes)>,
    pub storage: HashMap<U256, U256>,
    pub owner: Option<Address>,
    pub deployer: Option<Address>,
    pub whitelisted: Vec<Address>,
    pub base_timestamp: u64,
    pub block_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    Baseline,
    Time(i64),
    Actor(ActorRole, Address),
}

/// The counterfactual "uniformly random" user, derived from the request so
/// repeated scans of the same transaction are bit-identical.
pub fn derive_random_actor(request: &TxRequest) -> Address {
    let mut buf = Vec::with_capacity(52);
    buf.extend_from_slice(request.from.as_slice());
    buf.extend_from_slice(request.to.as_slice());
    buf.extend_from_slice(b"sentinel.counterfactual.random");
    Address::from_slice(&keccak256(&buf)[12..])
}

fn injected_balance() -> U256 {
    // One million whole tokens at 18 decimals.
    U256::from(1_000_000u64) * U256::from(10u64).pow(U256::from(18u64))
}

fn build_spec(
    inputs: &BatteryInputs,
    sender: Address,
    owner_injection: Option<Address>,
    timestamp: u64,
) -> ForkSpec {
    let mut spec = ForkSpec::new(
        inputs.code.clone(),
        sender,
        inputs.request.to,
        inputs.request.data.clone(),
        inputs.request.value,
    );
    spec.preloaded_storage = inputs.storage.clone();
    spec.extra_code = inputs.extra_code.clone();
    spec.balance_injections.insert(sender, injected_balance());
    spec.owner_injection = owner_injection;
    spec.block = BlockSpec {
        timestamp,
        number: inputs.block_number,
        ..BlockSpec::default()
    };
    spec
}

/// Spec for the baseline run (real sender, baseline timestamp). Exposed so
/// the orchestrator's traced run and the battery's own baseline agree.
pub fn baseline_spec(inputs: &BatteryInputs) -> ForkSpec {
    build_spec(inputs, inputs.request.from, None, inputs.base_timestamp)
}

/// Runs the full battery on the current thread. CPU-bound, gas-bounded.
pub fn run_battery_sync(inputs: &BatteryInputs) -> SentinelResult<BatteryResult> {
    let mut scenarios = vec![Scenario::Baseline];
    for offset in TIME_OFFSETS {
        scenarios.push(Scenario::Time(offset));
    }

    scenarios.push(Scenario::Actor(
        ActorRole::RandomUser,
        derive_random_actor(&inputs.request),
    ));
    if let Some(owner) = inputs.owner.filter(|o| !o.is_zero()) {
        scenarios.push(Scenario::Actor(ActorRole::Owner, owner));
    }
    if let Some(deployer) = inputs.deployer {
        if inputs.owner != Some(deployer) {
            scenarios.push(Scenario::Actor(ActorRole::Deployer, deployer));
        }
    }
    for &whitelisted in &inputs.whitelisted {
        scenarios.push(Scenario::Actor(ActorRole::Whitelisted, whitelisted));
    }

    tracing::debug!(runs = scenarios.len(), "battery fan-out");

    let results: Vec<(Scenario, SentinelResult<Outcome>)> = scenarios
        .par_iter()
        .map(|scenario| {
            let spec = match *scenario {
                Scenario::Baseline => {
                    build_spec(inputs, inputs.request.from, None, inputs.base_timestamp)
                }
                Scenario::Time(offset) => build_spec(
                    inputs,
                    inputs.request.from,
                    None,
                    inputs.base_timestamp.saturating_add_signed(offset),
                ),
                Scenario::Actor(role, address) => build_spec(
                    inputs,
                    address,
                    (role == ActorRole::Owner).then_some(address),
                    inputs.base_timestamp,
                ),
            };
            (*scenario, harness::run(&spec, &mut NullObserver))
        })
        .collect();

    let mut baseline: Option<Outcome> = None;
    let mut time_runs: Vec<(i64, Outcome)> = Vec::new();
    let mut actor_runs: Vec<ActorRun> = Vec::new();

    for (scenario, result) in results {
        // Only an internal EVM invariant can fail a run; it is fatal for
        // the whole scan.
        let outcome = result?;
        match scenario {
            Scenario::Baseline => baseline = Some(outcome),
            Scenario::Time(offset) => time_runs.push((offset, outcome)),
            Scenario::Actor(role, address) => actor_runs.push(ActorRun {
                role,
                address,
                outcome: Some(outcome),
            }),
        }
    }

    let baseline =
        baseline.ok_or_else(|| SentinelError::Internal("baseline run missing".to_string()))?;

    // The real sender doubles as the CurrentUser actor.
    actor_runs.insert(
        0,
        ActorRun {
            role: ActorRole::CurrentUser,
            address: inputs.request.from,
            outcome: Some(baseline.clone()),
        },
    );

    let time_travel = assemble_time_travel(&baseline, time_runs);
    let counterfactual = assemble_counterfactual(actor_runs);
    Ok(aggregate(time_travel, counterfactual))
}

/// `spawn_blocking` wrapper so async callers never pin an executor thread.
pub async fn run_battery(inputs: BatteryInputs) -> SentinelResult<BatteryResult> {
    tokio::task::spawn_blocking(move || run_battery_sync(&inputs))
        .await
        .map_err(|e| SentinelError::Internal(format!("spawn_blocking panicked: {e}")))?
}

// ---------------------------------------------------------------------------
// Time-travel family
// ---------------------------------------------------------------------------

fn assemble_time_travel(baseline: &Outcome, time_runs: Vec<(i64, Outcome)>) -> TimeTravelResult {
    let mut runs = Vec::with_capacity(time_runs.len());
    let mut result_flags: Vec<String> = Vec::new();
    let mut is_time_sensitive = false;

    let mut push_flag = |flags: &mut Vec<String>, flag: String| {
        if !flags.contains(&flag) {
            flags.push(flag);
        }
    };

    for (offset, outcome) in time_runs {
        let diverges = outcome.status != baseline.status;
        if diverges && offset > 0 {
            is_time_sensitive = true;
        }

        if offset > 0 {
            match (baseline.status, outcome.status) {
                (OutcomeStatus::Success, OutcomeStatus::Reverted) => {
                    push_flag(&mut result_flags, flags::time_bomb(offset));
                    if offset <= WEEK_SECONDS {
                        push_flag(&mut result_flags, flags::fails_within_week(offset));
                    }
                }
                (OutcomeStatus::Reverted, OutcomeStatus::Success) => {
                    push_flag(&mut result_flags, flags::delayed_trading(offset));
                    if offset > DAY_SECONDS {
                        push_flag(&mut result_flags, flags::extended_trading_delay(offset));
                    }
                }
                _ => {}
            }
        } else if offset < 0
            && baseline.is_reverted()
            && outcome.status == OutcomeStatus::Success
        {
            push_flag(&mut result_flags, flags::TRADING_CLOSED.to_string());
        }

        runs.push(TimeTravelRun {
            offset_seconds: offset,
            description: flags::humanize_offset(offset),
            outcome: Some(outcome),
            diverges,
        });
    }

    TimeTravelResult {
        current_outcome: Some(baseline.clone()),
        runs,
        flags: result_flags,
        is_time_sensitive,
    }
}

// ---------------------------------------------------------------------------
// Counterfactual family
// ---------------------------------------------------------------------------

fn assemble_counterfactual(runs: Vec<ActorRun>) -> CounterfactualResult {
    let known = |run: &&ActorRun| run.outcome.is_some();
    let succeeded =
        |run: &&ActorRun| matches!(&run.outcome, Some(o) if o.status == OutcomeStatus::Success);
    let reverted =
        |run: &&ActorRun| matches!(&run.outcome, Some(o) if o.status == OutcomeStatus::Reverted);

    let owner_runs: Vec<&ActorRun> = runs.iter().filter(|r| r.role == ActorRole::Owner).collect();
    let non_owner_runs: Vec<&ActorRun> =
        runs.iter().filter(|r| r.role != ActorRole::Owner).collect();
    let random_runs: Vec<&ActorRun> = runs
        .iter()
        .filter(|r| r.role == ActorRole::RandomUser)
        .collect();
    let whitelisted_runs: Vec<&ActorRun> = runs
        .iter()
        .filter(|r| r.role == ActorRole::Whitelisted)
        .collect();

    let any_owner_succeeded = owner_runs.iter().any(succeeded);
    let all_non_owner_reverted = {
        let known_runs: Vec<&&ActorRun> =
            non_owner_runs.iter().filter(|arg0: &&&ActorRun| known(*arg0)).collect();
        !known_runs.is_empty() && known_runs.iter().all(|r| reverted(r))
    };
    let all_random_reverted = {
        let known_runs: Vec<&&ActorRun> =
            random_runs.iter().filter(|arg0: &&&ActorRun| known(*arg0)).collect();
        !known_runs.is_empty() && known_runs.iter().all(|r| reverted(r))
    };

    let mut result = CounterfactualResult {
        runs: runs.clone(),
        is_honeypot: false,
        has_owner_privileges: false,
        has_whitelist_mechanism: false,
        privilege_diffs: Vec::new(),
        flags: Vec::new(),
        risk: 0,
    };

    if all_non_owner_reverted && any_owner_succeeded {
        result.is_honeypot = true;
        result.has_owner_privileges = true;
        result.risk = 100;
        result.flags.push(flags::HONEYPOT.to_string());
        result.privilege_diffs.push(PrivilegeDiff {
            severity: "Critical".to_string(),
            description: "Owner can execute while every non-owner caller reverts".to_string(),
        });
    }

    if whitelisted_runs.iter().any(succeeded) && all_random_reverted {
        result.has_whitelist_mechanism = true;
        result.risk = result.risk.max(80);
        result.flags.push(flags::WHITELIST.to_string());
        result.privilege_diffs.push(PrivilegeDiff {
            severity: "High".to_string(),
            description: "Whitelisted callers succeed while random users revert".to_string(),
        });
    }

    if random_runs.iter().any(succeeded)
        && !owner_runs.is_empty()
        && owner_runs.iter().filter(|arg0: &&&ActorRun| known(*arg0)).all(|r| reverted(r))
        && owner_runs.iter().any(known)
    {
        result.flags.push(flags::UNUSUAL_OWNER_BLOCKED.to_string());
        result.privilege_diffs.push(PrivilegeDiff {
            severity: "Medium".to_string(),
            description: "Random users execute but the owner cannot".to_string(),
        });
    }

    // Gas anomaly between a successful user and a successful owner.
    let user_gas = random_runs
        .iter()
        .find(|r| succeeded(r))
        .and_then(|r| r.outcome.as_ref())
        .map(|o| o.gas_used);
    let owner_gas = owner_runs
        .iter()
        .find(|r| succeeded(r))
        .and_then(|r| r.outcome.as_ref())
        .map(|o| o.gas_used);
    if let (Some(user_gas), Some(owner_gas)) = (user_gas, owner_gas) {
        let avg = (user_gas as f64 + owner_gas as f64) / 2.0;
        if avg > 0.0 && (user_gas as f64 - owner_gas as f64).abs() / avg > GAS_ANOMALY_RATIO {
            result.flags.push(flags::GAS_ANOMALY.to_string());
            result.risk = result.risk.saturating_add(15).min(100);
            result.privilege_diffs.push(PrivilegeDiff {
                severity: "Low".to_string(),
                description: format!(
                    "Gas usage differs sharply between user ({user_gas}) and owner ({owner_gas})"
                ),
            });
        }
    }

    result
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

fn aggregate(time_travel: TimeTravelResult, counterfactual: CounterfactualResult) -> BatteryResult {
    let has_time_bomb = time_travel.flags.iter().any(|f| f.contains("TIME-BOMB"));

    let mut overall_risk_score = counterfactual.risk;
    if time_travel.is_time_sensitive {
        overall_risk_score = overall_risk_score.saturating_add(25);
    }
    if has_time_bomb {
        overall_risk_score = overall_risk_score.saturating_add(25);
    }
    let overall_risk_score = overall_risk_score.min(100);

    let is_scam = counterfactual.is_honeypot
        || counterfactual.has_whitelist_mechanism
        || time_travel
            .flags
            .iter()
            .any(|f| f.contains("TIME-BOMB") || f.contains("CRITICAL"));

    let total_runs = time_travel.runs.len() + counterfactual.runs.len();
    let overall_summary = if counterfactual.is_honeypot {
        "Owner can execute but ordinary users cannot — honeypot behavior".to_string()
    } else if counterfactual.has_whitelist_mechanism {
        "Only whitelisted addresses can execute this transaction".to_string()
    } else if !time_travel.flags.is_empty() {
        "Transaction behavior changes across simulated timestamps".to_string()
    } else {
        format!("No divergent behavior across {total_runs} simulations")
    };

    BatteryResult {
        time_travel,
        counterfactual,
        overall_risk_score,
        overall_summary,
        is_scam,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn request() -> TxRequest {
        TxRequest {
            from: addr(0x11),
            to: addr(0x22),
            data: Bytes::new(),
            value: U256::ZERO,
            chain_id: 1,
        }
    }

    fn inputs(code: &[u8]) -> BatteryInputs {
        BatteryInputs {
            request: request(),
            code: Bytes::from(code.to_vec()),
            extra_code: Vec::new(),
            storage: HashMap::new(),
            owner: None,
            deployer: None,
            whitelisted: Vec::new(),
            base_timestamp: 1_700_000_000,
            block_number: 21_000_000,
        }
    }

    /// SLOAD slot 0 == CALLER, or revert.
    const OWNER_GATE: [u8; 15] = [
        0x60, 0x00, 0x54, 0x33, 0x14, 0x60, 0x0d, 0x57, 0x60, 0x00, 0x60, 0x00, 0xfd, 0x5b, 0x00,
    ];

    /// Succeeds while timestamp < 1_700_600_000 (baseline + ~7 days).
    const TIME_BOMB_GATE: [u8; 17] = [
        0x42, 0x63, 0x65, 0x5d, 0x18, 0xc0, 0x11, 0x60, 0x0f, 0x57, 0x60, 0x00, 0x60, 0x00, 0xfd,
        0x5b, 0x00,
    ];

    /// Reverts until timestamp > 1_700_050_000 (baseline + ~14 hours).
    const DELAYED_OPEN_GATE: [u8; 17] = [
        0x42, 0x63, 0x65, 0x54, 0xb4, 0x50, 0x10, 0x60, 0x0f, 0x57, 0x60, 0x00, 0x60, 0x00, 0xfd,
        0x5b, 0x00,
    ];

    #[test]
    fn benign_contract_is_clean() {
        let result = run_battery_sync(&inputs(&[0x00])).unwrap();
        assert!(!result.is_scam);
        assert_eq!(result.overall_risk_score, 0);
        assert!(!result.time_travel.is_time_sensitive);
        assert!(result.time_travel.flags.is_empty());
        assert!(result.counterfactual.flags.is_empty());
    }

    #[test]
    fn owner_gate_is_a_honeypot() {
        let mut inputs = inputs(&OWNER_GATE);
        inputs.owner = Some(addr(0x44));

        let result = run_battery_sync(&inputs).unwrap();
        let cf = &result.counterfactual;

        assert!(cf.is_honeypot);
        assert!(cf.has_owner_privileges);
        assert_eq!(cf.risk, 100);
        assert!(cf.flags.contains(&flags::HONEYPOT.to_string()));
        assert!(result.is_scam);
        assert_eq!(result.overall_risk_score, 100);

        let owner_run = cf.runs.iter().find(|r| r.role == ActorRole::Owner).unwrap();
        assert!(owner_run.outcome.as_ref().unwrap().is_success());
        let random_run = cf
            .runs
            .iter()
            .find(|r| r.role == ActorRole::RandomUser)
            .unwrap();
        assert!(random_run.outcome.as_ref().unwrap().is_reverted());
    }

    #[test]
    fn time_bomb_flags_within_seven_days() {
        let result = run_battery_sync(&inputs(&TIME_BOMB_GATE)).unwrap();
        let tt = &result.time_travel;

        assert!(tt.is_time_sensitive);
        assert!(tt
            .flags
            .contains(&"TIME-BOMB: Transaction fails at +7 Days".to_string()));
        assert!(tt
            .flags
            .contains(&"CRITICAL: Fails within 7 days (at +7 Days)".to_string()));
        assert!(tt
            .flags
            .contains(&"TIME-BOMB: Transaction fails at +30 Days".to_string()));
        assert!(result.is_scam);
        assert_eq!(result.overall_risk_score, 50);
    }

    #[test]
    fn delayed_open_flags_trading_delay() {
        let result = run_battery_sync(&inputs(&DELAYED_OPEN_GATE)).unwrap();
        let tt = &result.time_travel;

        assert!(tt.current_outcome.as_ref().unwrap().is_reverted());
        assert!(tt
            .flags
            .contains(&"DELAYED TRADING: Trading opens at +1 Day".to_string()));
        assert!(tt.is_time_sensitive);
        assert!(!result.counterfactual.is_honeypot);
    }

    #[test]
    fn baseline_matches_separate_offset_zero_run() {
        let inputs = inputs(&TIME_BOMB_GATE);
        let result = run_battery_sync(&inputs).unwrap();

        let spec = build_spec(&inputs, inputs.request.from, None, inputs.base_timestamp);
        let separate = harness::run(&spec, &mut NullObserver).unwrap();

        let baseline = result.time_travel.current_outcome.as_ref().unwrap();
        assert_eq!(baseline.status, separate.status);
        assert_eq!(baseline.gas_used, separate.gas_used);
    }

    #[test]
    fn deployer_runs_only_when_distinct_from_owner() {
        let mut inputs = inputs(&OWNER_GATE);
        inputs.owner = Some(addr(0x44));
        inputs.deployer = Some(addr(0x55));

        let result = run_battery_sync(&inputs).unwrap();
        let deployer_run = result
            .counterfactual
            .runs
            .iter()
            .find(|r| r.role == ActorRole::Deployer)
            .expect("distinct deployer is simulated");
        assert!(deployer_run.outcome.as_ref().unwrap().is_reverted());
        // A reverting deployer is just another non-owner data point.
        assert!(result.counterfactual.is_honeypot);

        inputs.deployer = inputs.owner;
        let result = run_battery_sync(&inputs).unwrap();
        assert!(!result
            .counterfactual
            .runs
            .iter()
            .any(|r| r.role == ActorRole::Deployer));
    }

    #[test]
    fn random_actor_is_deterministic_per_request() {
        let a = derive_random_actor(&request());
        let b = derive_random_actor(&request());
        assert_eq!(a, b);

        let mut other = request();
        other.to = addr(0x99);
        assert_ne!(a, derive_random_actor(&other));
    }

    #[test]
    fn battery_results_are_deterministic() {
        let mut inputs = inputs(&OWNER_GATE);
        inputs.owner = Some(addr(0x44));

        let a = run_battery_sync(&inputs).unwrap();
        let b = run_battery_sync(&inputs).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
