//! Forked EVM execution harness built on `revm`.
//!
//! Constructs an isolated EVM instance from a [`ForkSpec`] — injected code,
//! a preloaded storage prefix, balance and owner slot injections — runs a
//! single call, and streams every opcode step to a [`StepObserver`] before
//! returning. Identical specs produce byte-identical outcomes and streams.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use revm::context::result::{ExecutionResult, Output};
use revm::context::{Context, TxEnv};
use revm::database::{CacheDB, EmptyDB};
use revm::handler::{MainBuilder, MainContext};
use revm::inspector::{InspectEvm, Inspector};
use revm::interpreter::interpreter::EthInterpreter;
use revm::interpreter::{interpreter_types::*, Interpreter};
use revm::primitives::TxKind;
use revm::state::{AccountInfo, Bytecode};
use sentinel_core::error::{EvmError, SentinelResult};
use sentinel_core::types::{OpcodeStep, Outcome};
use smallvec::SmallVec;
use std::collections::HashMap;

/// Gas cap per run; local execution is CPU-bound and bounded by this.
pub const GAS_LIMIT: u64 = 5_000_000;

/// Mapping base slots probed during balance injection. Fixed to defend
/// against varying ERC-20 storage layouts: at most one is the true balance
/// slot, the rest are inert writes.
pub const BALANCE_PROBE_SLOTS: [u64; 8] = [0, 1, 2, 3, 4, 5, 6, 51];

/// Common owner slots written during counterfactual owner injection.
pub const OWNER_SLOTS: [u64; 3] = [0, 5, 51];

const SELECTOR_ERROR_STRING: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Block environment inputs. Timestamp is a configurable input, never "now".
#[derive(Debug, Clone)]
pub struct BlockSpec {
    pub timestamp: u64,
    pub number: u64,
    pub base_fee: u64,
    pub coinbase: Address,
    pub difficulty: U256,
    pub gas_limit: u64,
}

impl Default for BlockSpec {
    fn default() -> Self {
        Self {
            timestamp: 0,
            number: 21_000_000,
            base_fee: 0,
            coinbase: Address::ZERO,
            difficulty: U256::ZERO,
            gas_limit: 30_000_000,
        }
    }
}

/// Full configuration for one isolated EVM run.
///
/// The harness exclusively owns the state database it builds from this and
/// is consumed by a single call.
#[derive(Debug, Clone)]
pub struct ForkSpec {
    /// Deployed code installed at `to`.
    pub code: Bytes,
    /// Storage prefix preloaded at `to`. Missing slots read as zero, which
    /// is the correct EVM semantics.
    pub preloaded_storage: HashMap<U256, U256>,
    /// Token balances written into every probe slot for each holder.
    pub balance_injections: HashMap<Address, U256>,
    /// Counterfactual only: written right-aligned into [`OWNER_SLOTS`].
    pub owner_injection: Option<Address>,
    /// Additional code-bearing accounts (re-homed proxy implementations).
    pub extra_code: Vec<(Address, Bytes)>,
    pub sender: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub block: BlockSpec,
}

impl ForkSpec {
    pub fn new(code: Bytes, sender: Address, to: Address, data: Bytes, value: U256) -> Self {
        Self {
            code,
            preloaded_storage: HashMap::new(),
            balance_injections: HashMap::new(),
            owner_injection: None,
            extra_code: Vec::new(),
            sender,
            to,
            data,
            value,
            gas_limit: GAS_LIMIT,
            block: BlockSpec::default(),
        }
    }
}

/// Capability interface receiving each opcode step synchronously, in strict
/// execution order, before `run` returns. Purely observational.
pub trait StepObserver {
    fn on_step(&mut self, step: &OpcodeStep);
}

/// Observer for runs where only the terminal outcome matters.
pub struct NullObserver;

impl StepObserver for NullObserver {
    #[inline]
    fn on_step(&mut self, _step: &OpcodeStep) {}
}

/// Canonical Solidity mapping slot: `keccak256(pad32(holder) ∥ pad32(base))`.
pub fn mapping_slot(holder: &Address, base_slot: u64) -> U256 {
    let mut buf = [0u8; 64];
    buf[12..32].copy_from_slice(holder.as_slice());
    buf[32..64].copy_from_slice(&U256::from(base_slot).to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(buf).0)
}

/// An address as a 32-byte storage word: 20 bytes at the low end.
pub fn address_word(address: &Address) -> U256 {
    U256::from_be_bytes(B256::left_padding_from(address.as_slice()).0)
}

// ---------------------------------------------------------------------------
// Inspector
// ---------------------------------------------------------------------------

/// Forwards each interpreter step to the registered observer.
///
/// Tracks frame depth via `call()`/`call_end()` hooks; stack snapshots keep
/// only the top five words, so each step is constant-size.
struct StreamInspector<'a> {
    observer: &'a mut dyn StepObserver,
    depth: u16,
}

impl<CTX> Inspector<CTX, EthInterpreter> for StreamInspector<'_> {
    #[inline]
    fn step(&mut self, interp: &mut Interpreter<EthInterpreter>, _context: &mut CTX) {
        let opcode = interp.bytecode.opcode();
        let stack_data = interp.stack.data();

        let mut stack_top: SmallVec<[String; 5]> = SmallVec::new();
        for word in stack_data.iter().rev().take(5) {
            stack_top.push(format!("{word:#x}"));
        }

        let step = OpcodeStep {
            pc: interp.bytecode.pc() as u32,
            opcode,
            opcode_name: opcode_name(opcode).to_string(),
            depth: self.depth,
            stack_top,
        };

        self.observer.on_step(&step);
    }

    fn call(
        &mut self,
        _context: &mut CTX,
        _inputs: &mut revm::interpreter::CallInputs,
    ) -> Option<revm::interpreter::CallOutcome> {
        self.depth += 1;
        None
    }

    fn call_end(
        &mut self,
        _context: &mut CTX,
        _inputs: &revm::interpreter::CallInputs,
        _outcome: &mut revm::interpreter::CallOutcome,
    ) {
        self.depth = self.depth.saturating_sub(1);
    }
}

fn opcode_name(opcode: u8) -> &'static str {
    revm::bytecode::opcode::OpCode::new(opcode).map_or("INVALID", |op| op.as_str())
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Runs one call against a freshly built forked state.
///
/// A revert is a normal [`Outcome`]; only internal failures surface as
/// [`EvmError::InvariantBroken`], which is fatal for the enclosing scan.
pub fn run(spec: &ForkSpec, observer: &mut dyn StepObserver) -> SentinelResult<Outcome> {
    let db = build_db(spec)?;

    let tx_env = TxEnv::builder()
        .caller(spec.sender)
        .kind(TxKind::Call(spec.to))
        .data(spec.data.clone())
        .value(spec.value)
        .gas_limit(spec.gas_limit)
        .build()
        .map_err(|e| EvmError::InvariantBroken(format!("Failed to build TxEnv: {e:?}")))?;

    // Disable validation that depends on real-chain accounting; the fork is
    // synthetic state, not a pinned block.
    let mut ctx = Context::mainnet().with_db(db).with_tx(TxEnv::default());
    ctx.cfg.disable_nonce_check = true;
    ctx.cfg.disable_balance_check = true;
    ctx.cfg.disable_block_gas_limit = true;
    ctx.cfg.disable_base_fee = true;
    ctx.cfg.disable_eip3607 = true;

    ctx.block.timestamp = U256::from(spec.block.timestamp);
    ctx.block.number = U256::from(spec.block.number);
    ctx.block.basefee = spec.block.base_fee;
    ctx.block.beneficiary = spec.block.coinbase;
    ctx.block.difficulty = spec.block.difficulty;
    ctx.block.gas_limit = spec.block.gas_limit;

    let inspector = StreamInspector { observer, depth: 0 };
    let mut evm = ctx.build_mainnet_with_inspector(inspector);

    let result = evm
        .inspect_one_tx(tx_env)
        .map_err(|e| EvmError::InvariantBroken(format!("Execution failed: {e:?}")))?;

    Ok(match result {
        ExecutionResult::Success {
            gas_used, output, ..
        } => {
            let return_value = match output {
                Output::Call(bytes) => bytes,
                Output::Create(bytes, _) => bytes,
            };
            Outcome::success(gas_used, return_value)
        }
        ExecutionResult::Revert { gas_used, output } => {
            Outcome::reverted(decode_revert_reason(&output), gas_used, output)
        }
        ExecutionResult::Halt { reason, gas_used } => {
            Outcome::reverted(Some(format!("halted: {reason:?}")), gas_used, Bytes::new())
        }
    })
}

fn build_db(spec: &ForkSpec) -> SentinelResult<CacheDB<EmptyDB>> {
    let mut db = CacheDB::new(EmptyDB::new());

    let bytecode = Bytecode::new_raw(spec.code.clone());
    let code_hash = bytecode.hash_slow();
    db.insert_account_info(spec.to, AccountInfo::new(U256::ZERO, 1, code_hash, bytecode));

    for (slot, value) in &spec.preloaded_storage {
        db.insert_account_storage(spec.to, *slot, *value)
            .map_err(|e| EvmError::InvariantBroken(format!("storage preload: {e:?}")))?;
    }

    for (address, code) in &spec.extra_code {
        let bytecode = Bytecode::new_raw(code.clone());
        let code_hash = bytecode.hash_slow();
        db.insert_account_info(
            *address,
            AccountInfo::new(U256::ZERO, 1, code_hash, bytecode),
        );
    }

    // Token balance probes across the fixed base-slot set.
    for (holder, amount) in &spec.balance_injections {
        for base_slot in BALANCE_PROBE_SLOTS {
            db.insert_account_storage(spec.to, mapping_slot(holder, base_slot), *amount)
                .map_err(|e| EvmError::InvariantBroken(format!("balance injection: {e:?}")))?;
        }
    }

    // Owner injection overrides whatever the preload put in the owner slots;
    // this lets onlyOwner paths succeed under a simulated-owner caller.
    if let Some(owner) = spec.owner_injection {
        let word = address_word(&owner);
        for slot in OWNER_SLOTS {
            db.insert_account_storage(spec.to, U256::from(slot), word)
                .map_err(|e| EvmError::InvariantBroken(format!("owner injection: {e:?}")))?;
        }
    }

    // The sender is always funded so ordinary value transfers do not revert
    // on balance alone. A sender that is also the target keeps its code.
    if spec.sender != spec.to {
        let funding = U256::from(100u64) * U256::from(10u64).pow(U256::from(18u64));
        let empty_code = Bytecode::new();
        let empty_hash = empty_code.hash_slow();
        db.insert_account_info(
            spec.sender,
            AccountInfo::new(funding, 0, empty_hash, empty_code),
        );
    }

    Ok(db)
}

/// Decodes a Solidity `Error(string)` payload; anything else degrades to a
/// hex dump, and empty output to `None` (rendered "unknown" upstream).
fn decode_revert_reason(output: &Bytes) -> Option<String> {
    if output.len() >= 68 && output[..4] == SELECTOR_ERROR_STRING {
        let len = U256::from_be_slice(&output[36..68]);
        if let Ok(len) = usize::try_from(len) {
            if let Some(end) = 68usize.checked_add(len) {
                if output.len() >= end {
                    return Some(String::from_utf8_lossy(&output[68..end]).into_owned());
                }
            }
        }
    }

    if output.is_empty() {
        None
    } else {
        Some(format!("0x{}", alloy_primitives::hex::encode(output)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingObserver {
        steps: Vec<OpcodeStep>,
    }

    impl StepObserver for CountingObserver {
        fn on_step(&mut self, step: &OpcodeStep) {
            self.steps.push(step.clone());
        }
    }

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    /// Runtime: sloads slot 0, compares against CALLER, jumps to STOP on
    /// match, reverts otherwise.
    fn owner_gate() -> Bytes {
        Bytes::from_static(&[
            0x60, 0x00, // PUSH1 0
            0x54, // SLOAD
            0x33, // CALLER
            0x14, // EQ
            0x60, 0x0d, // PUSH1 13
            0x57, // JUMPI
            0x60, 0x00, 0x60, 0x00, // PUSH1 0, PUSH1 0
            0xfd, // REVERT
            0x5b, // JUMPDEST
            0x00, // STOP
        ])
    }

    #[test]
    fn stop_bytecode_succeeds() {
        let spec = ForkSpec::new(
            Bytes::from_static(&[0x00]),
            addr(0x11),
            addr(0x22),
            Bytes::new(),
            U256::ZERO,
        );
        let outcome = run(&spec, &mut NullObserver).unwrap();
        assert!(outcome.is_success());
    }

    #[test]
    fn revert_without_data_reads_unknown() {
        // PUSH1 0, PUSH1 0, REVERT
        let spec = ForkSpec::new(
            Bytes::from_static(&[0x60, 0x00, 0x60, 0x00, 0xfd]),
            addr(0x11),
            addr(0x22),
            Bytes::new(),
            U256::ZERO,
        );
        let outcome = run(&spec, &mut NullObserver).unwrap();
        assert!(outcome.is_reverted());
        assert_eq!(outcome.revert_reason.as_deref(), Some("unknown"));
    }

    #[test]
    fn owner_injection_opens_gated_path() {
        let owner = addr(0x44);
        let stranger = addr(0x55);

        let mut spec = ForkSpec::new(owner_gate(), stranger, addr(0x22), Bytes::new(), U256::ZERO);
        let outcome = run(&spec, &mut NullObserver).unwrap();
        assert!(outcome.is_reverted(), "stranger must not pass the gate");

        spec.sender = owner;
        spec.owner_injection = Some(owner);
        let outcome = run(&spec, &mut NullObserver).unwrap();
        assert!(outcome.is_success(), "injected owner must pass the gate");
    }

    #[test]
    fn timestamp_is_an_input_not_now() {
        // TIMESTAMP, PUSH4 deadline, GT, PUSH1 15, JUMPI, revert, JUMPDEST, STOP
        let code = Bytes::from_static(&[
            0x42, 0x63, 0x65, 0x5a, 0x07, 0x40, 0x11, 0x60, 0x0f, 0x57, 0x60, 0x00, 0x60, 0x00,
            0xfd, 0x5b, 0x00,
        ]);
        // deadline = 0x655a0740 = 1_700_398_912
        let mut spec = ForkSpec::new(code, addr(0x11), addr(0x22), Bytes::new(), U256::ZERO);

        spec.block.timestamp = 1_700_000_000;
        assert!(run(&spec, &mut NullObserver).unwrap().is_success());

        spec.block.timestamp = 1_800_000_000;
        assert!(run(&spec, &mut NullObserver).unwrap().is_reverted());
    }

    #[test]
    fn identical_specs_produce_identical_streams() {
        let spec = ForkSpec::new(owner_gate(), addr(0x11), addr(0x22), Bytes::new(), U256::ZERO);

        let mut a = CountingObserver { steps: Vec::new() };
        let mut b = CountingObserver { steps: Vec::new() };
        let out_a = run(&spec, &mut a).unwrap();
        let out_b = run(&spec, &mut b).unwrap();

        assert_eq!(out_a.status, out_b.status);
        assert_eq!(out_a.gas_used, out_b.gas_used);
        assert_eq!(a.steps.len(), b.steps.len());
        for (x, y) in a.steps.iter().zip(&b.steps) {
            assert_eq!(x.pc, y.pc);
            assert_eq!(x.opcode, y.opcode);
            assert_eq!(x.stack_top, y.stack_top);
        }
    }

    #[test]
    fn mapping_slot_depends_on_holder_and_base() {
        let a = mapping_slot(&addr(0x01), 0);
        let b = mapping_slot(&addr(0x02), 0);
        let c = mapping_slot(&addr(0x01), 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn address_word_sits_at_low_end() {
        let word = address_word(&addr(0xab));
        let bytes = word.to_be_bytes::<32>();
        assert!(bytes[..12].iter().all(|&b| b == 0));
        assert!(bytes[12..].iter().all(|&b| b == 0xab));
    }
}
