//! Framebuffer device: control registers, pixel memory, key input.
//!
//! Memory layout is a 4 KiB control region followed by a contiguous
//! ARGB8888 little-endian pixel buffer. The device itself owns no window;
//! the presenter thread renders snapshots of the pixel buffer and feeds
//! host input back in through `push_key`/`request_quit`. Its input mutex
//! and atomics are the synchronization boundary the controller relies on.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use emu_core::{CpuErrorKind, Device, DeviceKind, MemAccess, MemResponse, SyncState};

/// Size of the control-register region preceding the pixel buffer.
pub const CONTROL_REGION_SIZE: u64 = 0x1000;

const REG_CTRL: u64 = 0x00;
const REG_WIDTH: u64 = 0x04;
const REG_HEIGHT: u64 = 0x08;
const REG_PITCH: u64 = 0x0c;
const REG_STATUS: u64 = 0x10;
const REG_KEY_DATA: u64 = 0x20;
const REG_KEY_STATUS: u64 = 0x24;
const REG_KEY_LAST: u64 = 0x28;

const STATUS_READY: u64 = 1 << 0;
const STATUS_DIRTY: u64 = 1 << 1;
const KEY_STATUS_READY: u64 = 1 << 0;

struct InputState {
    keys: VecDeque<u32>,
    last_key: u32,
    quit: bool,
}

/// Pixel display with a key queue, mapped as control registers plus a
/// pixel buffer:
///
/// | offset | semantics |
/// |---|---|
/// | `0x00` CTRL | write bit0 requests a present |
/// | `0x04` WIDTH / `0x08` HEIGHT / `0x0C` PITCH | geometry, read-only |
/// | `0x10` STATUS | bit0 READY, bit1 DIRTY |
/// | `0x20` KEY_DATA | read pops one key (0 when empty) |
/// | `0x24` KEY_STATUS | bit0 key available; write clears queue and last key |
/// | `0x28` KEY_LAST | most recent key seen |
pub struct FramebufferDevice {
    width: u32,
    height: u32,
    frame: Mutex<Vec<u8>>,
    input: Mutex<InputState>,
    dirty: AtomicBool,
    present_requested: AtomicBool,
    sync: SyncState,
}

impl FramebufferDevice {
    /// `width` and `height` must be non-zero and their pixel size must
    /// fit the address space; the wiring layer validates this before
    /// construction.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let bytes = u64::from(width) * u64::from(height) * 4;
        Self {
            width,
            height,
            frame: Mutex::new(vec![0; bytes as usize]),
            input: Mutex::new(InputState {
                keys: VecDeque::new(),
                last_key: 0,
                quit: false,
            }),
            dirty: AtomicBool::new(true),
            present_requested: AtomicBool::new(false),
            sync: SyncState::new(),
        }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Total mapped size: control region plus pixel buffer.
    #[must_use]
    pub fn mapped_size(&self) -> u64 {
        CONTROL_REGION_SIZE + u64::from(self.width) * u64::from(self.height) * 4
    }

    /// Enqueues a host key event. Used by the presenter and by headless
    /// input injection.
    pub fn push_key(&self, key: u32) {
        let mut input = self.input.lock().unwrap();
        input.last_key = key;
        input.keys.push_back(key);
    }

    /// Records that the host asked to close the window.
    pub fn request_quit(&self) {
        self.input.lock().unwrap().quit = true;
    }

    #[must_use]
    pub fn quit_requested(&self) -> bool {
        self.input.lock().unwrap().quit
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_present_requested(&self) -> bool {
        self.present_requested.load(Ordering::Acquire)
    }

    /// Consumes a pending present request. Returns true at most once per
    /// guest request.
    pub fn consume_present_request(&self) -> bool {
        self.present_requested.swap(false, Ordering::AcqRel)
    }

    /// Snapshots the pixel buffer as packed `0xAARRGGBB` words and clears
    /// DIRTY. The presenter calls this once per rendered frame.
    pub fn snapshot_frame(&self, out: &mut Vec<u32>) {
        let frame = self.frame.lock().unwrap();
        out.clear();
        out.reserve(frame.len() / 4);
        for chunk in frame.chunks_exact(4) {
            out.push(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        self.dirty.store(false, Ordering::Release);
    }

    fn read_register(&self, offset: u64) -> Option<u64> {
        match offset {
            REG_WIDTH => Some(u64::from(self.width)),
            REG_HEIGHT => Some(u64::from(self.height)),
            REG_PITCH => Some(u64::from(self.width) * 4),
            REG_STATUS => {
                let mut status = STATUS_READY;
                if self.is_dirty() {
                    status |= STATUS_DIRTY;
                }
                Some(status)
            }
            REG_KEY_DATA => {
                let mut input = self.input.lock().unwrap();
                Some(u64::from(input.keys.pop_front().unwrap_or(0)))
            }
            REG_KEY_STATUS => {
                let input = self.input.lock().unwrap();
                Some(if input.keys.is_empty() {
                    0
                } else {
                    KEY_STATUS_READY
                })
            }
            REG_KEY_LAST => Some(u64::from(self.input.lock().unwrap().last_key)),
            _ => None,
        }
    }

    fn write_register(&self, offset: u64, value: u64) -> bool {
        match offset {
            REG_CTRL => {
                if value & 1 != 0 {
                    self.present_requested.store(true, Ordering::Release);
                }
                true
            }
            REG_KEY_STATUS => {
                let mut input = self.input.lock().unwrap();
                input.keys.clear();
                input.last_key = 0;
                true
            }
            _ => false,
        }
    }

    fn check_bounds(&self, access: &MemAccess) -> bool {
        if !access.has_valid_size() {
            return false;
        }
        let mapped = self.mapped_size();
        access.address < mapped && u64::from(access.size) <= mapped - access.address
    }
}

impl Device for FramebufferDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Display
    }

    fn read(&self, access: &MemAccess) -> MemResponse {
        if !self.check_bounds(access) {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        if access.address < CONTROL_REGION_SIZE {
            return match self.read_register(access.address) {
                Some(value) => MemResponse::ok(value),
                None => MemResponse::fault(CpuErrorKind::AccessFault, access),
            };
        }
        let offset = (access.address - CONTROL_REGION_SIZE) as usize;
        let frame = self.frame.lock().unwrap();
        let mut value = 0u64;
        for i in 0..access.size as usize {
            value |= u64::from(frame[offset + i]) << (8 * i);
        }
        MemResponse::ok(value)
    }

    fn write(&self, access: &MemAccess) -> MemResponse {
        if !self.check_bounds(access) {
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        if access.address < CONTROL_REGION_SIZE {
            if self.write_register(access.address, access.data) {
                return MemResponse::ok(0);
            }
            return MemResponse::fault(CpuErrorKind::AccessFault, access);
        }
        let offset = (access.address - CONTROL_REGION_SIZE) as usize;
        {
            let mut frame = self.frame.lock().unwrap();
            let mut value = access.data;
            for i in 0..access.size as usize {
                frame[offset + i] = (value & 0xff) as u8;
                value >>= 8;
            }
        }
        self.dirty.store(true, Ordering::Release);
        MemResponse::ok(0)
    }

    fn update_frequency(&self) -> u32 {
        60
    }

    fn sync_state(&self) -> &SyncState {
        &self.sync
    }
}
