//! Builds the machine from a configuration record.
//!
//! Reads the ROM, validates the mapping table, instantiates the devices
//! and the executor, registers everything on the bus and hands back a
//! started-but-not-running controller.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use emu_core::{validate_mappings, CpuExecutor, MemoryBus, MemoryRegion};
use emu_debugger::Debugger;
use emu_devices::{FramebufferDevice, MemoryDevice, TimerDevice, UartDevice};
use thiserror::Error;

use crate::config::EmulatorConfig;

/// Mapped size of the UART register window.
pub const UART_SIZE: u64 = 0x1000;
/// Mapped size of the timer register window.
pub const TIMER_SIZE: u64 = 0x1000;

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("ROM path is required")]
    MissingRom,
    #[error("ROM base must be 0x00000000")]
    RomBaseNonZero,
    #[error("failed to read ROM image {path}: {source}")]
    RomUnreadable {
        path: PathBuf,
        source: io::Error,
    },
    #[error("ROM image {path} is empty")]
    RomEmpty { path: PathBuf },
    #[error("display width/height must be non-zero")]
    ZeroDisplayDimension,
    #[error("framebuffer size overflows the address space")]
    FramebufferOverflow,
    #[error("{0}")]
    Mapping(String),
}

/// The wired machine. The controller holds the device handles the
/// operator loops and the presenter need.
pub struct Machine {
    pub debugger: Debugger,
    pub framebuffer: Arc<FramebufferDevice>,
}

/// Computes the framebuffer mapping size, rejecting overflow.
fn framebuffer_mapped_size(width: u32, height: u32) -> Result<u64, WiringError> {
    if width == 0 || height == 0 {
        return Err(WiringError::ZeroDisplayDimension);
    }
    let pixels = u64::from(width)
        .checked_mul(u64::from(height))
        .and_then(|p| p.checked_mul(4))
        .ok_or(WiringError::FramebufferOverflow)?;
    emu_devices::CONTROL_REGION_SIZE
        .checked_add(pixels)
        .ok_or(WiringError::FramebufferOverflow)
}

/// Wires a machine. `cpu_factory` supplies the executor implementation;
/// the core never names a concrete instruction set.
pub fn wire(
    config: &EmulatorConfig,
    cpu_factory: impl FnOnce() -> Box<dyn CpuExecutor>,
) -> Result<Machine, WiringError> {
    if config.rom_path.as_os_str().is_empty() {
        return Err(WiringError::MissingRom);
    }
    if config.rom_base != 0 {
        return Err(WiringError::RomBaseNonZero);
    }

    let rom_size = std::fs::metadata(&config.rom_path)
        .map_err(|source| WiringError::RomUnreadable {
            path: config.rom_path.clone(),
            source,
        })?
        .len();
    if rom_size == 0 {
        return Err(WiringError::RomEmpty {
            path: config.rom_path.clone(),
        });
    }

    let fb_size = framebuffer_mapped_size(config.width, config.height)?;

    let mappings = vec![
        MemoryRegion::new("ROM", config.rom_base, rom_size),
        MemoryRegion::new("UART", config.uart_base, UART_SIZE),
        MemoryRegion::new("TIMER", config.timer_base, TIMER_SIZE),
        MemoryRegion::new("FB", config.fb_base, fb_size),
        MemoryRegion::new("RAM", config.ram_base, config.ram_size),
    ];
    validate_mappings(&mappings).map_err(WiringError::Mapping)?;

    let rom = Arc::new(MemoryDevice::new(rom_size, true));
    rom.load_image(&config.rom_path, 0)
        .map_err(|source| WiringError::RomUnreadable {
            path: config.rom_path.clone(),
            source,
        })?;
    let ram = Arc::new(MemoryDevice::new(config.ram_size, false));
    let uart = Arc::new(UartDevice::new());
    let timer = Arc::new(TimerDevice::new());
    let framebuffer = Arc::new(FramebufferDevice::new(config.width, config.height));

    let mut bus = MemoryBus::new();
    bus.register(rom, config.rom_base, rom_size, "ROM");
    bus.register(uart.clone(), config.uart_base, UART_SIZE, "UART");
    bus.register(timer, config.timer_base, TIMER_SIZE, "TIMER");
    bus.register(framebuffer.clone(), config.fb_base, fb_size, "FB");
    bus.register(ram, config.ram_base, config.ram_size, "RAM");
    let bus = Arc::new(bus);

    let mut cpu = cpu_factory();
    cpu.reset();
    cpu.set_pc(config.rom_base);

    let mut debugger = Debugger::new(cpu, bus, config.debug);
    debugger.set_uart(uart);
    debugger.set_framebuffer(framebuffer.clone());
    debugger.set_cpu_frequency(config.cpu_frequency);
    debugger.configure_trace(emu_core::TraceOptions {
        log_instruction: config.itrace,
        log_mem_events: config.mtrace,
        log_branch_prediction: config.bptrace,
    });

    Ok(Machine {
        debugger,
        framebuffer,
    })
}
