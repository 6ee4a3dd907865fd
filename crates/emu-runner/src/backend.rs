//! Present backends: a minifb window and a headless stub.

use std::thread;
use std::time::Duration;

use emu_debugger::{PresentBackend, PresentEvents};
use minifb::{Key, KeyRepeat, Window, WindowOptions};

/// Windowed backend over minifb. Created on the presenter thread and
/// polled there; the window never escapes it.
pub struct MinifbBackend {
    window: Window,
}

impl MinifbBackend {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self, minifb::Error> {
        let mut window = Window::new(
            title,
            width as usize,
            height as usize,
            WindowOptions::default(),
        )?;
        // The presenter paces itself; don't let minifb throttle updates.
        window.set_target_fps(0);
        Ok(Self { window })
    }
}

impl PresentBackend for MinifbBackend {
    fn poll_events(&mut self, timeout: Duration) -> PresentEvents {
        if !timeout.is_zero() {
            thread::sleep(timeout);
        }
        if !self.window.is_open() {
            return PresentEvents {
                keys: Vec::new(),
                quit: true,
            };
        }
        self.window.update();
        let keys = self
            .window
            .get_keys_pressed(KeyRepeat::No)
            .into_iter()
            .filter_map(key_code)
            .collect();
        PresentEvents {
            keys,
            quit: !self.window.is_open(),
        }
    }

    fn present(&mut self, frame: &[u32], width: u32, height: u32) {
        let _ = self
            .window
            .update_with_buffer(frame, width as usize, height as usize);
    }
}

/// Backend for headless runs: consumes present requests, renders
/// nothing, reports no input.
pub struct HeadlessBackend;

impl PresentBackend for HeadlessBackend {
    fn poll_events(&mut self, timeout: Duration) -> PresentEvents {
        if !timeout.is_zero() {
            thread::sleep(timeout);
        }
        PresentEvents::default()
    }

    fn present(&mut self, _frame: &[u32], _width: u32, _height: u32) {}
}

/// Maps a host key to the guest key code: ASCII where one exists.
fn key_code(key: Key) -> Option<u32> {
    let code = match key {
        Key::A => b'a',
        Key::B => b'b',
        Key::C => b'c',
        Key::D => b'd',
        Key::E => b'e',
        Key::F => b'f',
        Key::G => b'g',
        Key::H => b'h',
        Key::I => b'i',
        Key::J => b'j',
        Key::K => b'k',
        Key::L => b'l',
        Key::M => b'm',
        Key::N => b'n',
        Key::O => b'o',
        Key::P => b'p',
        Key::Q => b'q',
        Key::R => b'r',
        Key::S => b's',
        Key::T => b't',
        Key::U => b'u',
        Key::V => b'v',
        Key::W => b'w',
        Key::X => b'x',
        Key::Y => b'y',
        Key::Z => b'z',
        Key::Key0 => b'0',
        Key::Key1 => b'1',
        Key::Key2 => b'2',
        Key::Key3 => b'3',
        Key::Key4 => b'4',
        Key::Key5 => b'5',
        Key::Key6 => b'6',
        Key::Key7 => b'7',
        Key::Key8 => b'8',
        Key::Key9 => b'9',
        Key::Space => b' ',
        Key::Enter => b'\n',
        Key::Backspace => 0x08,
        Key::Tab => b'\t',
        Key::Escape => 0x1b,
        _ => return None,
    };
    Some(u32::from(code))
}
