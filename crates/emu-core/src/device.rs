//! Device contract and batched time-sync machinery.
//!
//! The emulated clock is the CPU cycle counter; devices never see wall
//! time. After each CPU burst the controller calls `sync` on every
//! device, which batches the elapsed cycles into coarse `tick` calls
//! bounded by a per-device threshold.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::access::{CpuErrorKind, MemAccess, MemResponse};

/// Kind tag for devices on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Rom,
    Ram,
    Uart,
    Timer,
    Display,
    Other,
}

/// Cycles between ticks when no frequency-derived threshold is installed.
pub const DEFAULT_SYNC_THRESHOLD: u64 = 128;

/// Per-device sync bookkeeping: the last cycle point a tick was delivered
/// at and the minimum cycle delta between consecutive ticks.
///
/// Only the CPU worker advances this, so relaxed atomics suffice; the
/// atomics exist because devices are shared behind `Arc`.
#[derive(Debug)]
pub struct SyncState {
    last_sync_cycle: AtomicU64,
    sync_threshold: AtomicU64,
}

impl SyncState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_sync_cycle: AtomicU64::new(0),
            sync_threshold: AtomicU64::new(DEFAULT_SYNC_THRESHOLD),
        }
    }

    /// When at least `sync_threshold` cycles have elapsed since the last
    /// tick, latches `current_cycle` and returns the accumulated delta.
    pub fn due(&self, current_cycle: u64) -> Option<u64> {
        let last = self.last_sync_cycle.load(Ordering::Relaxed);
        let delta = current_cycle.wrapping_sub(last);
        if delta < self.sync_threshold.load(Ordering::Relaxed) {
            return None;
        }
        self.last_sync_cycle.store(current_cycle, Ordering::Relaxed);
        Some(delta)
    }

    pub fn set_threshold(&self, threshold: u64) {
        self.sync_threshold.store(threshold.max(1), Ordering::Relaxed);
    }

    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.sync_threshold.load(Ordering::Relaxed)
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

/// A memory-mapped peripheral.
///
/// Addresses in the accesses passed to `read`/`write` are device-local:
/// the bus subtracts the mapping base before delegating. Devices that
/// hold queues protect them with their own interior mutex; handlers must
/// not block on external resources and must not call back into the bus.
///
/// The default `read`/`write` reject the access with `DeviceFault`.
pub trait Device: Send + Sync {
    fn kind(&self) -> DeviceKind;

    fn read(&self, access: &MemAccess) -> MemResponse {
        MemResponse::fault(CpuErrorKind::DeviceFault, access)
    }

    fn write(&self, access: &MemAccess) -> MemResponse {
        MemResponse::fault(CpuErrorKind::DeviceFault, access)
    }

    /// Advance device time by `cycles` elapsed CPU cycles.
    fn tick(&self, _cycles: u64) {}

    /// Nominal update frequency in Hz. 0 means the device has no pacing
    /// preference and ticks only when cycles happen to elapse.
    fn update_frequency(&self) -> u32 {
        0
    }

    /// Sync bookkeeping embedded in every device.
    fn sync_state(&self) -> &SyncState;

    /// Advance device time to `current_cycle`, batching via the threshold.
    fn sync(&self, current_cycle: u64) {
        if let Some(delta) = self.sync_state().due(current_cycle) {
            self.tick(delta);
        }
    }
}
