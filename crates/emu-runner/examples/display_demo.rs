//! Draws a gradient from guest code and presents it in a window.
//!
//! Generates a demo-ISA ROM that stores one pixel per five instructions
//! into the framebuffer, requests a present and halts. The window stays
//! open until it is closed.

use std::fs::File;
use std::io::Write as _;
use std::thread;
use std::time::Duration;

use cpu_toy::{halt, lui, ori, sw, ToyCpu};
use emu_core::CpuExecutor;
use emu_runner::backend::MinifbBackend;
use emu_runner::config::EmulatorConfig;
use emu_runner::wiring::wire;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;
const FB_BASE: u32 = 0x3000_0000;
const PIXEL_BASE: u32 = FB_BASE + 0x1000;

/// r1 = addr, r2 = value, then one 32-bit store.
fn emit_write32(program: &mut Vec<u32>, addr: u32, value: u32) {
    program.push(lui(1, (addr >> 16) as u16));
    program.push(ori(1, (addr & 0xffff) as u16));
    program.push(lui(2, (value >> 16) as u16));
    program.push(ori(2, (value & 0xffff) as u16));
    program.push(sw(2, 1, 0));
}

fn main() {
    // A gradient rectangle in the top-left corner, ARGB8888.
    let mut program = Vec::new();
    for y in 0..64u32 {
        for x in 0..96u32 {
            let red = x * 255 / 95;
            let green = y * 255 / 63;
            let argb = 0xFF00_0000 | (red << 16) | (green << 8) | 0x40;
            let addr = PIXEL_BASE + (y * WIDTH + x) * 4;
            emit_write32(&mut program, addr, argb);
        }
    }
    emit_write32(&mut program, FB_BASE, 1); // CTRL bit0: present
    program.push(halt());

    let rom_path = std::env::temp_dir().join("emu-display-demo.bin");
    {
        let mut file = File::create(&rom_path).expect("failed to create demo ROM");
        for word in &program {
            file.write_all(&word.to_le_bytes())
                .expect("failed to write demo ROM");
        }
    }

    let config = EmulatorConfig {
        rom_path: rom_path.clone(),
        width: WIDTH,
        height: HEIGHT,
        ram_size: 0x1_0000,
        title: "Display Demo".to_string(),
        ..EmulatorConfig::default()
    };
    let mut machine =
        wire(&config, || Box::new(ToyCpu::new()) as Box<dyn CpuExecutor>).expect("wiring failed");
    let backend =
        MinifbBackend::new(&config.title, WIDTH, HEIGHT).expect("failed to open window");
    machine.debugger.start(Some(Box::new(backend)));

    // The guest halts right after the present; hold the machine open
    // until the window is closed.
    while !machine.debugger.should_exit() {
        thread::sleep(Duration::from_millis(50));
    }
    machine.debugger.shutdown();
    let _ = std::fs::remove_file(rom_path);
}
