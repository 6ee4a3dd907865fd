//! Debugger and run-loop controller.
//!
//! The [`Debugger`] owns the machine: it holds the CPU executor, the bus
//! and handles to the interactive devices, it is the only object that
//! creates threads, and it is the handle the executor performs all bus
//! traffic, breakpoint tests and trace emission through.

mod debugger;
mod expr;
mod presenter;

pub use debugger::{CpuState, DebugStatus, Debugger, StatusHandler};
pub use expr::evaluate;
pub use presenter::{PresentBackend, PresentEvents};
