//! The analysis pipeline: EVM harness, opcode tracer, proxy resolver,
//! static bytecode analyzer, simulation battery, feature extractor, drift
//! detector, and verdict assembler.

pub mod battery;
pub mod bytecode;
pub mod drift;
pub mod features;
pub mod harness;
pub mod proxy;
pub mod scan;
pub mod selectors;
pub mod tracer;
pub mod verdict;

pub use battery::{run_battery, BatteryInputs, TIME_OFFSETS};
pub use harness::{ForkSpec, NullObserver, StepObserver, GAS_LIMIT};
pub use scan::{parse_request, scan, ScanContext, ScanOptions, SCAN_DEADLINE};
pub use tracer::TraceCollector;
