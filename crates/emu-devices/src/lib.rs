//! Built-in bus devices.
//!
//! Each device implements the `emu_core::Device` contract: device-local
//! addressing, little-endian multi-byte values, and batched time sync
//! driven by the CPU cycle counter.

mod framebuffer;
mod memory;
mod timer;
mod uart;

pub use framebuffer::{FramebufferDevice, CONTROL_REGION_SIZE};
pub use memory::MemoryDevice;
pub use timer::TimerDevice;
pub use uart::{TxHandler, UartDevice};
