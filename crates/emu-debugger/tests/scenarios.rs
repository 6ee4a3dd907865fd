//! End-to-end scenarios: toy executor, real devices, real controller
//! threads.

use std::fs::File;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpu_toy::{halt, lui, lw, nop, ori, sw, ToyCpu};
use emu_core::trace::TraceOptions;
use emu_core::{CpuErrorKind, CpuExecutor, Device, MemAccess, MemoryBus};
use emu_debugger::{CpuState, Debugger, PresentBackend, PresentEvents};
use emu_devices::{FramebufferDevice, MemoryDevice, TimerDevice, UartDevice, CONTROL_REGION_SIZE};

const ROM_BASE: u64 = 0;
const UART_BASE: u64 = 0x2000_0000;
const TIMER_BASE: u64 = 0x2000_1000;
const FB_BASE: u64 = 0x3000_0000;
const RAM_BASE: u64 = 0x8000_0000;
const RAM_SIZE: u64 = 0x1_0000;

struct Machine {
    debugger: Debugger,
    uart: Arc<UartDevice>,
    framebuffer: Arc<FramebufferDevice>,
}

struct TempRom(PathBuf);

impl Drop for TempRom {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn write_rom(program: &[u32], tag: &str) -> TempRom {
    let path = std::env::temp_dir().join(format!("emu-scenario-{}-{tag}.bin", std::process::id()));
    let mut file = File::create(&path).unwrap();
    for word in program {
        file.write_all(&word.to_le_bytes()).unwrap();
    }
    TempRom(path)
}

fn build_machine(program: &[u32], tag: &str, interactive: bool) -> Machine {
    let rom_image = write_rom(program, tag);
    let rom_size = (program.len() * 4) as u64;
    let rom = Arc::new(MemoryDevice::new(rom_size, true));
    rom.load_image(&rom_image.0, 0).unwrap();

    let ram = Arc::new(MemoryDevice::new(RAM_SIZE, false));
    let uart = Arc::new(UartDevice::new());
    let timer = Arc::new(TimerDevice::new());
    let framebuffer = Arc::new(FramebufferDevice::new(96, 64));

    let mut bus = MemoryBus::new();
    bus.register(rom, ROM_BASE, rom_size, "ROM");
    bus.register(uart.clone(), UART_BASE, 0x1000, "UART");
    bus.register(timer.clone(), TIMER_BASE, 0x1000, "TIMER");
    bus.register(framebuffer.clone(), FB_BASE, framebuffer.mapped_size(), "FB");
    bus.register(ram, RAM_BASE, RAM_SIZE, "RAM");
    let bus = Arc::new(bus);

    let mut cpu = ToyCpu::new();
    cpu.reset();
    cpu.set_pc(ROM_BASE);

    let mut debugger = Debugger::new(Box::new(cpu), bus, interactive);
    debugger.set_uart(uart.clone());
    debugger.set_framebuffer(framebuffer.clone());
    debugger.set_cpu_frequency(1_000_000);

    Machine {
        debugger,
        uart,
        framebuffer,
    }
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("timed out waiting for {what}");
}

/// Backend that renders nowhere and counts presents.
struct CountingBackend {
    presents: Arc<AtomicU32>,
}

impl PresentBackend for CountingBackend {
    fn poll_events(&mut self, timeout: Duration) -> PresentEvents {
        if !timeout.is_zero() {
            thread::sleep(timeout);
        }
        PresentEvents::default()
    }

    fn present(&mut self, frame: &[u32], width: u32, height: u32) {
        assert_eq!(frame.len(), (width * height) as usize);
        self.presents.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn uart_echo_reaches_the_device_log() {
    let program = [
        lui(5, 0x2000), // r5 = UART base
        ori(2, u16::from(b'O')),
        sw(2, 5, 0),
        ori(3, u16::from(b'K')),
        sw(3, 5, 0),
        ori(4, u16::from(b'\n')),
        sw(4, 5, 0),
        halt(),
    ];
    let mut machine = build_machine(&program, "uart-echo", false);

    let captured = Arc::new(Mutex::new(Vec::<u8>::new()));
    let sink = captured.clone();
    machine
        .uart
        .set_tx_handler(Some(Box::new(move |bytes: &[u8]| {
            sink.lock().unwrap().extend_from_slice(bytes);
        })));

    machine.debugger.start(None);
    wait_until("halt", || machine.debugger.cpu_state() == CpuState::Halted);
    machine.uart.flush();

    let output = captured.lock().unwrap().clone();
    assert_eq!(String::from_utf8_lossy(&output), "OK\n");
    // Halting via the halt opcode is clean termination.
    assert_eq!(
        machine.debugger.last_cpu_error().kind,
        CpuErrorKind::Halt
    );
    machine.debugger.shutdown();
}

#[test]
fn ram_round_trip_lands_in_register_3() {
    let program = [
        lui(2, 0x1122),
        ori(2, 0x3344),
        lui(1, 0x8000), // r1 = RAM base
        sw(2, 1, 0),
        lw(3, 1, 0),
        halt(),
    ];
    let mut machine = build_machine(&program, "ram-round-trip", false);
    machine.debugger.start(None);
    wait_until("halt", || machine.debugger.cpu_state() == CpuState::Halted);

    let regs = machine.debugger.read_registers();
    assert_eq!(regs[3], 0x1122_3344);
    assert_eq!(machine.debugger.last_cpu_error().kind, CpuErrorKind::Halt);
    machine.debugger.shutdown();
}

#[test]
fn unmapped_load_halts_with_access_fault() {
    let program = [
        lui(2, 0x1000), // r2 = 0x10000000, in no mapping
        lw(3, 2, 0),
        halt(),
    ];
    let mut machine = build_machine(&program, "unmapped", false);
    machine.debugger.start(None);
    wait_until("halt", || machine.debugger.cpu_state() == CpuState::Halted);

    let error = machine.debugger.last_cpu_error();
    assert_eq!(error.kind, CpuErrorKind::AccessFault);
    assert_eq!(error.address, 0x1000_0000);
    machine.debugger.shutdown();
}

#[test]
fn timer_counts_cycles_and_resets() {
    // Burn enough instructions that a device sync has delivered cycles to
    // the timer before the guest samples it.
    let mut program = vec![nop(); 1200];
    program.extend_from_slice(&[
        lui(4, 0x2000),
        ori(4, 0x1000), // r4 = TIMER base
        lw(2, 4, 0),    // pre-reset LOW
        sw(0, 4, 8),    // CTRL write resets
        lw(3, 4, 0),    // post-reset LOW
        halt(),
    ]);
    let mut machine = build_machine(&program, "timer-reset", false);
    machine.debugger.start(None);
    wait_until("halt", || machine.debugger.cpu_state() == CpuState::Halted);

    let regs = machine.debugger.read_registers();
    let pre = regs[2];
    let post = regs[3];
    assert!(pre >= 1000, "timer never advanced: pre={pre}");
    assert!(post < pre || post == 0, "reset had no effect: pre={pre} post={post}");
    machine.debugger.shutdown();
}

#[test]
fn framebuffer_gradient_present_flow() {
    let program = [
        lui(6, 0x3000), // r6 = FB base
        ori(2, 1),
        sw(2, 6, 0), // CTRL bit0: request present
        halt(),
    ];
    let mut machine = build_machine(&program, "fb-gradient", false);

    // Paint the gradient through the bus before the threads start, so the
    // DIRTY observation cannot race the presenter.
    let fb = &machine.framebuffer;
    for y in 0..64u64 {
        for x in 0..96u64 {
            let pixel = 0xFF00_0000 | ((x * 255 / 95) << 16) | ((y * 255 / 63) << 8);
            let offset = CONTROL_REGION_SIZE + (y * 96 + x) * 4;
            let response = fb.write(&MemAccess::write(offset, 4, pixel));
            assert!(response.success);
        }
    }
    let status = fb.read(&MemAccess::read(0x10, 4)).data;
    assert_eq!(status & 0b10, 0b10, "gradient writes must set DIRTY");

    let presents = Arc::new(AtomicU32::new(0));
    let backend = CountingBackend {
        presents: presents.clone(),
    };
    machine.debugger.start(Some(Box::new(backend)));
    wait_until("halt", || machine.debugger.cpu_state() == CpuState::Halted);
    wait_until("present consumed", || {
        !fb.is_present_requested() && presents.load(Ordering::Relaxed) >= 1
    });
    wait_until("dirty cleared", || !fb.is_dirty());

    let status = fb.read(&MemAccess::read(0x10, 4)).data;
    assert_eq!(status & 0b10, 0, "DIRTY must clear after present");
    machine.debugger.shutdown();
}

#[test]
fn breakpoint_stops_run_and_step_moves_past_it() {
    let program = [nop(), nop(), ori(2, 7), nop(), halt()];
    let mut machine = build_machine(&program, "breakpoint", true);
    machine.debugger.start(None);

    machine.debugger.add_breakpoint(ROM_BASE + 8);
    assert!(machine.debugger.process_command("run"));
    wait_until("breakpoint pause", || {
        machine.debugger.cpu_state() == CpuState::Pause && machine.debugger.pc() == ROM_BASE + 8
    });
    // The instruction at the breakpoint has not executed.
    assert_eq!(machine.debugger.read_registers()[2], 0);

    assert!(machine.debugger.process_command("step 1"));
    wait_until("step past breakpoint", || {
        machine.debugger.cpu_state() == CpuState::Pause && machine.debugger.pc() == ROM_BASE + 12
    });
    assert_eq!(machine.debugger.read_registers()[2], 7);
    machine.debugger.shutdown();
}

#[test]
fn step_lands_in_pause_and_halted_rejects_commands() {
    let program = [nop(), nop(), nop(), halt()];
    let mut machine = build_machine(&program, "state-machine", true);
    machine.debugger.start(None);

    assert!(machine.debugger.process_command("step 2"));
    wait_until("pause after step 2", || {
        machine.debugger.cpu_state() == CpuState::Pause && machine.debugger.pc() == 8
    });

    assert!(machine.debugger.process_command("run"));
    wait_until("halt", || machine.debugger.cpu_state() == CpuState::Halted);

    // Halted is terminal: run/step are accepted commands but no-ops.
    assert!(machine.debugger.process_command("run"));
    assert!(machine.debugger.process_command("step"));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(machine.debugger.cpu_state(), CpuState::Halted);

    assert!(!machine.debugger.process_command("frobnicate"));
    machine.debugger.shutdown();
}

#[test]
fn expression_commands_reach_cpu_and_bus() {
    let program = [
        lui(2, 0x1122),
        ori(2, 0x3344),
        lui(1, 0x8000),
        sw(2, 1, 0),
        halt(),
    ];
    let mut machine = build_machine(&program, "eval", false);
    machine.debugger.start(None);
    wait_until("halt", || machine.debugger.cpu_state() == CpuState::Halted);

    assert_eq!(machine.debugger.eval_expression("0x10 + 0x20"), 0x30);
    assert_eq!(machine.debugger.eval_expression("[0x80000000]"), 0x1122_3344);
    assert_eq!(
        machine.debugger.eval_expression("$pc"),
        machine.debugger.pc()
    );
    assert_eq!(machine.debugger.eval_expression("$r2"), 0x1122_3344);

    let bytes = machine.debugger.scan_memory(RAM_BASE, 4);
    assert_eq!(bytes, vec![0x44, 0x33, 0x22, 0x11]);
    machine.debugger.shutdown();
}

#[test]
fn trace_formatter_sees_every_retired_instruction() {
    let program = [nop(), ori(2, 1), halt()];
    let mut machine = build_machine(&program, "trace", false);
    machine.debugger.configure_trace(TraceOptions::default());

    let pcs = Arc::new(Mutex::new(Vec::<u64>::new()));
    let seen = pcs.clone();
    machine
        .debugger
        .set_trace_formatter(Some(Box::new(move |record, _options| {
            seen.lock().unwrap().push(record.pc);
            String::new()
        })));

    machine.debugger.start(None);
    wait_until("halt", || machine.debugger.cpu_state() == CpuState::Halted);
    machine.debugger.shutdown();

    assert_eq!(pcs.lock().unwrap().clone(), vec![0, 4]);
}
