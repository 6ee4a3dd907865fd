//! Present backend contract and the presenter thread loop.
//!
//! The framebuffer device is the synchronization boundary: the presenter
//! polls the host window through a [`PresentBackend`], pushes input into
//! the device, and uploads pixel snapshots when the guest requests a
//! present or when dirty pixels age past the present interval.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use emu_devices::FramebufferDevice;

use crate::debugger::DebuggerCore;

/// Host events gathered by one poll.
#[derive(Debug, Default)]
pub struct PresentEvents {
    /// Key codes pressed since the last poll.
    pub keys: Vec<u32>,
    /// The host asked to close the window.
    pub quit: bool,
}

/// Host-window abstraction the presenter drives. The windowed runner
/// implements this over minifb; headless runs use a no-op backend.
pub trait PresentBackend: Send {
    /// Pump host events, waiting up to `timeout` when there is nothing
    /// to render.
    fn poll_events(&mut self, timeout: Duration) -> PresentEvents;

    /// Upload one frame of packed `0xAARRGGBB` pixels.
    fn present(&mut self, frame: &[u32], width: u32, height: u32);
}

/// Poll timeout while nothing is dirty or requested.
const IDLE_POLL: Duration = Duration::from_millis(8);
/// Dirty pixels older than this are rendered without a present request.
const PRESENT_INTERVAL: Duration = Duration::from_millis(16);

pub(crate) fn presenter_loop(
    core: Arc<DebuggerCore>,
    framebuffer: Arc<FramebufferDevice>,
    mut backend: Box<dyn PresentBackend>,
) {
    let mut last_present = Instant::now();
    let mut frame: Vec<u32> = Vec::new();

    while !core.should_exit.load(Ordering::Acquire) {
        let idle = !framebuffer.is_dirty() && !framebuffer.is_present_requested();
        let timeout = if idle { IDLE_POLL } else { Duration::ZERO };

        let events = backend.poll_events(timeout);
        for key in events.keys {
            framebuffer.push_key(key);
        }
        if events.quit || framebuffer.quit_requested() {
            framebuffer.request_quit();
            core.request_exit();
            break;
        }

        let now = Instant::now();
        if framebuffer.consume_present_request() {
            framebuffer.snapshot_frame(&mut frame);
            backend.present(&frame, framebuffer.width(), framebuffer.height());
            last_present = now;
        } else if framebuffer.is_dirty() && now - last_present >= PRESENT_INTERVAL {
            framebuffer.snapshot_frame(&mut frame);
            backend.present(&frame, framebuffer.width(), framebuffer.height());
            last_present = now;
        }
    }
}
