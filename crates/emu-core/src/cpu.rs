//! CPU executor contract and the debugger handle it calls out through.

use std::sync::Arc;

use crate::access::{CpuErrorDetail, MemAccess, MemResponse, StepResult};
use crate::trace::{TraceOptions, TraceRecord};

/// The narrow interface between an executor and its host.
///
/// Installed with [`CpuExecutor::set_debugger`]. Every memory access the
/// executor performs goes through `bus_read`/`bus_write` (executors hold
/// no direct bus reference), breakpoints are consulted before each fetch,
/// and retired instructions are reported via `log_trace` whenever any
/// enabled trace option applies.
pub trait CpuDebugger: Send + Sync {
    fn bus_read(&self, access: &MemAccess) -> MemResponse;
    fn bus_write(&self, access: &MemAccess) -> MemResponse;

    /// Cheap guard so the fetch path can skip the breakpoint test when no
    /// breakpoints exist.
    fn has_breakpoints(&self) -> bool;
    fn is_breakpoint(&self, address: u64) -> bool;

    fn trace_options(&self) -> TraceOptions;
    fn log_trace(&self, record: &TraceRecord);
}

/// A pluggable instruction-set executor.
///
/// The core does not define an instruction set; any executor that honors
/// this contract can drive the machine.
pub trait CpuExecutor: Send {
    /// Zero all architectural state.
    fn reset(&mut self);

    /// Execute up to `max_instructions` instructions or `max_cycles`
    /// cycles, whichever comes first. Stops at a breakpoint boundary
    /// (checked before fetch), on any error, or when a bound is reached.
    /// On error, `last_error` is populated before returning and the
    /// result carries the counts actually retired.
    fn step(&mut self, max_instructions: u64, max_cycles: u64) -> StepResult;

    fn last_error(&self) -> CpuErrorDetail;

    fn pc(&self) -> u64;
    fn set_pc(&mut self, pc: u64);

    /// Monotonically non-decreasing cycle counter.
    fn cycle(&self) -> u64;

    /// Register read; index 0 is writable only if the executor allows it.
    fn register(&self, index: u32) -> u64;
    fn set_register(&mut self, index: u32, value: u64);
    fn register_count(&self) -> u32;

    /// Install the host handle all bus traffic, breakpoint tests and
    /// trace emission go through.
    fn set_debugger(&mut self, debugger: Arc<dyn CpuDebugger>);
}
