//! Opcode-level semantic tracer.
//!
//! Consumes the harness step stream and mines taint patterns with a tiny
//! transient state machine. This is lossy static taint tracking — enough to
//! flag patterns, not a dataflow analysis: the "in play" flags survive
//! PUSH/DUP stack shuffles and are cleared by the next substantive opcode.

use crate::harness::StepObserver;
use sentinel_core::types::{MechanismStory, OpcodeStep, Severity, TraceEvent, TraceResult};

const OP_LT: u8 = 0x10;
const OP_GT: u8 = 0x11;
const OP_SLT: u8 = 0x12;
const OP_SGT: u8 = 0x13;
const OP_EQ: u8 = 0x14;
const OP_ORIGIN: u8 = 0x32;
const OP_CALLER: u8 = 0x33;
const OP_TIMESTAMP: u8 = 0x42;
const OP_SLOAD: u8 = 0x54;
const OP_SSTORE: u8 = 0x55;
const OP_CALL: u8 = 0xf1;
const OP_CALLCODE: u8 = 0xf2;
const OP_DELEGATECALL: u8 = 0xf4;
const OP_STATICCALL: u8 = 0xfa;
const OP_SELFDESTRUCT: u8 = 0xff;

#[inline]
fn is_push_or_dup(opcode: u8) -> bool {
    // PUSH0..PUSH32 and DUP1..DUP16 are transparent to the taint one-shots.
    (0x5f..=0x8f).contains(&opcode)
}

#[inline]
fn is_comparison(opcode: u8) -> bool {
    matches!(opcode, OP_LT | OP_GT | OP_SLT | OP_SGT | OP_EQ)
}

/// Collects a [`TraceResult`] from one run's opcode stream.
///
/// Constant memory per step: only the top-of-stack hex strings the harness
/// already captured are examined, nothing is buffered.
#[derive(Default)]
pub struct TraceCollector {
    result: TraceResult,
    sender_in_play: bool,
    timestamp_in_play: bool,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> TraceResult {
        self.result
    }
}

impl StepObserver for TraceCollector {
    fn on_step(&mut self, step: &OpcodeStep) {
        self.result.instruction_count += 1;
        let opcode = step.opcode;

        match opcode {
            OP_CALLER => {
                self.result.events.push(TraceEvent::SenderLoaded { pc: step.pc });
                self.result.reads_sender = true;
                self.sender_in_play = true;
                return;
            }
            OP_ORIGIN => {
                self.result.events.push(TraceEvent::OriginLoaded { pc: step.pc });
                self.result.reads_origin = true;
                self.sender_in_play = true;
                return;
            }
            OP_TIMESTAMP => {
                self.result
                    .events
                    .push(TraceEvent::TimestampLoaded { pc: step.pc });
                self.result.reads_timestamp = true;
                self.timestamp_in_play = true;
                return;
            }
            _ => {}
        }

        if opcode == OP_SLOAD {
            self.result.sload_count += 1;
            if let Some(slot) = step.stack_top.first() {
                self.result.touched_slots.insert(slot.clone());
                if self.sender_in_play {
                    self.result.storage_gated_on_sender = true;
                    self.result.events.push(TraceEvent::StorageReadAfterSender {
                        pc: step.pc,
                        slot: slot.clone(),
                    });
                }
            }
        }

        if is_comparison(opcode) {
            if self.sender_in_play {
                self.result.compares_sender = true;
                self.result
                    .events
                    .push(TraceEvent::ComparisonAfterSender { pc: step.pc });
            }
            if self.timestamp_in_play {
                // Timestamp comparisons only count EQ/LT/GT.
                if matches!(opcode, OP_EQ | OP_LT | OP_GT) {
                    self.result.compares_timestamp = true;
                    self.result
                        .events
                        .push(TraceEvent::ComparisonAfterTimestamp { pc: step.pc });
                }
            }
        }

        match opcode {
            OP_SSTORE => self.result.sstore_count += 1,
            OP_CALL => self.result.call_count += 1,
            OP_CALLCODE => self.result.callcode_count += 1,
            OP_DELEGATECALL => self.result.delegatecall_count += 1,
            OP_STATICCALL => self.result.staticcall_count += 1,
            OP_SELFDESTRUCT => self.result.selfdestruct_count += 1,
            _ => {}
        }

        if !is_push_or_dup(opcode) {
            self.sender_in_play = false;
            self.timestamp_in_play = false;
        }
    }
}

/// Narrates what the taint events imply about the contract's mechanism.
pub fn mechanism_story(trace: &TraceResult) -> MechanismStory {
    let sender_gated = trace.compares_sender || trace.storage_gated_on_sender;

    if sender_gated && trace.compares_timestamp {
        return MechanismStory {
            title: "Caller and Time Gated Execution".to_string(),
            story: "Execution branches on both the caller identity and the block timestamp. \
                    Outcomes can differ per caller and change over time without any state write."
                .to_string(),
            severity: Severity::High,
        };
    }

    if sender_gated {
        let story = if trace.storage_gated_on_sender {
            "The contract reads storage keyed by the caller and branches on the result. \
             Different callers can take different execution paths."
        } else {
            "The contract compares the caller identity against stored values before \
             proceeding. Some callers may be rejected."
        };
        return MechanismStory {
            title: "Caller-Gated Execution".to_string(),
            story: story.to_string(),
            severity: Severity::Medium,
        };
    }

    if trace.compares_timestamp {
        return MechanismStory {
            title: "Time-Gated Execution".to_string(),
            story: "Execution branches on the block timestamp. Behavior observed now may \
                    not hold at a later time."
                .to_string(),
            severity: Severity::Medium,
        };
    }

    if trace.reads_origin {
        return MechanismStory {
            title: "Origin-Dependent Execution".to_string(),
            story: "The contract inspects tx.origin, which distinguishes direct calls from \
                    contract-mediated calls."
                .to_string(),
            severity: Severity::Low,
        };
    }

    MechanismStory::safe()
}
