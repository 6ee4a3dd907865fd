//! Runner library: configuration, wiring and present backends.
//!
//! The `emu-runner` binary and the examples build machines through this
//! crate; the binary adds CLI parsing and the operator loops on top.

pub mod backend;
pub mod config;
pub mod wiring;
