//! UART device: host-fed receive queue and a buffered transmit path.
//!
//! TX bytes accumulate locally and are flushed to the logger's device
//! channel (or an installed handler) when the buffer fills or the device
//! goes idle, so guest `putchar` loops do not produce one host write per
//! byte.

use std::collections::VecDeque;
use std::sync::Mutex;

use emu_core::{CpuErrorKind, Device, DeviceKind, MemAccess, MemResponse, SyncState};

const REG_DATA: u64 = 0x00;
const REG_STATUS: u64 = 0x04;
const REG_SIZE: u32 = 4;

const STATUS_RX_READY: u64 = 1 << 0;
const STATUS_TX_READY: u64 = 1 << 1;

/// TX buffer size that forces a flush.
const TX_FLUSH_THRESHOLD: usize = 256;
/// Cycles without a write after which a pending TX buffer is flushed.
const TX_IDLE_FLUSH_CYCLES: u64 = 10_000;

/// Receives flushed TX bytes. Replaces the device log channel while
/// installed (the interactive console mirrors UART output this way).
pub type TxHandler = Box<dyn Fn(&[u8]) + Send>;

struct UartState {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    idle_cycles: u64,
    tx_handler: Option<TxHandler>,
}

impl UartState {
    fn flush_tx(&mut self) {
        if self.tx.is_empty() {
            return;
        }
        if let Some(handler) = &self.tx_handler {
            handler(&self.tx);
        } else {
            emu_logger::device_write_bytes(&self.tx);
        }
        self.tx.clear();
    }
}

/// Memory-mapped UART with a 32-bit register file:
///
/// | offset | read | write |
/// |---|---|---|
/// | `0x00` | pop one RX byte (0 when empty) | append byte to TX buffer |
/// | `0x04` | bit0 RX_READY, bit1 TX_READY (always set) | no-op |
///
/// Accesses of any width other than 4 bytes fault.
pub struct UartDevice {
    state: Mutex<UartState>,
    sync: SyncState,
}

impl UartDevice {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(UartState {
                rx: VecDeque::new(),
                tx: Vec::new(),
                idle_cycles: 0,
                tx_handler: None,
            }),
            sync: SyncState::new(),
        }
    }

    /// Feeds one byte into the receive queue. Callable from any thread.
    pub fn push_rx(&self, byte: u8) {
        self.state.lock().unwrap().rx.push_back(byte);
    }

    /// Installs (or clears) the TX handler. Pending bytes are flushed
    /// first so output ordering across the switch is preserved.
    pub fn set_tx_handler(&self, handler: Option<TxHandler>) {
        let mut state = self.state.lock().unwrap();
        state.flush_tx();
        state.tx_handler = handler;
    }

    /// Forces out any buffered TX bytes.
    pub fn flush(&self) {
        self.state.lock().unwrap().flush_tx();
    }

    fn status(state: &UartState) -> u64 {
        let mut status = STATUS_TX_READY;
        if !state.rx.is_empty() {
            status |= STATUS_RX_READY;
        }
        status
    }
}

impl Default for UartDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UartDevice {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.flush_tx();
        }
    }
}

impl Device for UartDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Uart
    }

    fn read(&self, access: &MemAccess) -> MemResponse {
        if access.size != REG_SIZE {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        let mut state = self.state.lock().unwrap();
        match access.address {
            REG_DATA => {
                let byte = state.rx.pop_front().unwrap_or(0);
                MemResponse::ok(u64::from(byte))
            }
            REG_STATUS => MemResponse::ok(Self::status(&state)),
            _ => MemResponse::fault(CpuErrorKind::AccessFault, access),
        }
    }

    fn write(&self, access: &MemAccess) -> MemResponse {
        if access.size != REG_SIZE {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        let mut state = self.state.lock().unwrap();
        match access.address {
            REG_DATA => {
                state.tx.push((access.data & 0xff) as u8);
                state.idle_cycles = 0;
                if state.tx.len() >= TX_FLUSH_THRESHOLD {
                    state.flush_tx();
                }
                MemResponse::ok(0)
            }
            REG_STATUS => MemResponse::ok(0),
            _ => MemResponse::fault(CpuErrorKind::AccessFault, access),
        }
    }

    fn tick(&self, cycles: u64) {
        let mut state = self.state.lock().unwrap();
        if state.tx.is_empty() {
            return;
        }
        state.idle_cycles += cycles;
        if state.idle_cycles >= TX_IDLE_FLUSH_CYCLES {
            state.flush_tx();
            state.idle_cycles = 0;
        }
    }

    fn sync_state(&self) -> &SyncState {
        &self.sync
    }
}
