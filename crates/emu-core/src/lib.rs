//! Core contracts for the emulator.
//!
//! Everything the rest of the workspace plugs into lives here: the bus
//! access descriptors and fault model, the memory bus that dispatches
//! guest addresses to devices, the `Device` contract with its batched
//! time-sync machinery, the CPU executor contract and the narrow
//! debugger handle it calls out through, and the per-instruction trace
//! model.
//!
//! This crate has no dependencies; concrete devices, the controller and
//! the executors build on top of it.

mod access;
mod bus;
mod cpu;
mod device;
pub mod trace;

pub use access::{AccessKind, CpuErrorDetail, CpuErrorKind, MemAccess, MemResponse, StepResult};
pub use bus::{region_end, regions_overlap, validate_mappings, MemoryBus, MemoryRegion};
pub use cpu::{CpuDebugger, CpuExecutor};
pub use device::{Device, DeviceKind, SyncState, DEFAULT_SYNC_THRESHOLD};
pub use trace::{BranchInfo, MemEvent, TraceFormatter, TraceOptions, TraceRecord};
