//! Monotonic microsecond timer driven by CPU cycles.

use std::sync::atomic::{AtomicU64, Ordering};

use emu_core::{CpuErrorKind, Device, DeviceKind, MemAccess, MemResponse, SyncState};

const REG_LOW: u64 = 0x00;
const REG_HIGH: u64 = 0x04;
const REG_CTRL: u64 = 0x08;
const REG_SIZE: u32 = 4;

/// 64-bit microsecond counter split across two 32-bit registers, with a
/// control register whose write resets the count.
///
/// Emulated time is the cycle counter: one cycle is one microsecond at
/// the 1 MHz reference frequency. Rescaling for other CPU frequencies is
/// the controller's concern.
pub struct TimerDevice {
    micros: AtomicU64,
    sync: SyncState,
}

impl TimerDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            micros: AtomicU64::new(0),
            sync: SyncState::new(),
        }
    }

    #[must_use]
    pub fn micros(&self) -> u64 {
        self.micros.load(Ordering::Relaxed)
    }
}

impl Default for TimerDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for TimerDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Timer
    }

    fn read(&self, access: &MemAccess) -> MemResponse {
        if access.size != REG_SIZE {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        let counter = self.micros();
        match access.address {
            REG_LOW => MemResponse::ok(counter & 0xffff_ffff),
            REG_HIGH => MemResponse::ok((counter >> 32) & 0xffff_ffff),
            _ => MemResponse::fault(CpuErrorKind::AccessFault, access),
        }
    }

    fn write(&self, access: &MemAccess) -> MemResponse {
        if access.size != REG_SIZE {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        match access.address {
            REG_CTRL => {
                self.micros.store(0, Ordering::Relaxed);
                MemResponse::ok(0)
            }
            _ => MemResponse::fault(CpuErrorKind::AccessFault, access),
        }
    }

    fn tick(&self, cycles: u64) {
        self.micros.fetch_add(cycles, Ordering::Relaxed);
    }

    fn sync_state(&self) -> &SyncState {
        &self.sync
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances_with_ticks() {
        let timer = TimerDevice::new();
        timer.tick(1500);
        assert_eq!(timer.read(&MemAccess::read(REG_LOW, 4)).data, 1500);
        assert_eq!(timer.read(&MemAccess::read(REG_HIGH, 4)).data, 0);
    }

    #[test]
    fn high_register_carries_upper_word() {
        let timer = TimerDevice::new();
        timer.tick(0x2_0000_0001);
        assert_eq!(timer.read(&MemAccess::read(REG_LOW, 4)).data, 1);
        assert_eq!(timer.read(&MemAccess::read(REG_HIGH, 4)).data, 2);
    }

    #[test]
    fn control_write_resets_counter() {
        let timer = TimerDevice::new();
        timer.tick(999);
        assert!(timer.write(&MemAccess::write(REG_CTRL, 4, 1)).success);
        assert_eq!(timer.read(&MemAccess::read(REG_LOW, 4)).data, 0);
    }

    #[test]
    fn invalid_shapes_fault() {
        let timer = TimerDevice::new();
        assert!(!timer.read(&MemAccess::read(REG_LOW, 8)).success);
        assert!(!timer.read(&MemAccess::read(REG_CTRL, 4)).success);
        assert!(!timer.write(&MemAccess::write(REG_LOW, 4, 0)).success);
        assert!(!timer.write(&MemAccess::write(0x0C, 4, 0)).success);
    }
}
