//! The controller: run-state machine, threads, commands and trace routing.

use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use emu_core::trace::{self, TraceFormatter, TraceOptions, TraceRecord};
use emu_core::{
    CpuDebugger, CpuErrorDetail, CpuErrorKind, CpuExecutor, MemAccess, MemResponse, MemoryBus,
};
use emu_devices::{FramebufferDevice, UartDevice};
use emu_logger::{log_error, log_info, log_print};

use crate::expr;
use crate::presenter::{presenter_loop, PresentBackend};

/// Scheduling state of the emulated CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CpuState {
    Running = 0,
    Pause = 1,
    /// Terminal for forward progress; `run` and `step` are rejected.
    Halted = 2,
}

impl CpuState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Pause,
            _ => Self::Halted,
        }
    }

    /// Name shown on the status line.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Pause => "PAUSE",
            Self::Halted => "HALTED",
        }
    }
}

/// One atomic status-line update.
#[derive(Debug, Clone)]
pub struct DebugStatus {
    pub state: CpuState,
    pub pc: u64,
    pub cycle: u64,
    pub instructions: u64,
    pub ipc: f64,
    pub cps: f64,
    pub last_command: String,
}

impl DebugStatus {
    /// Exponential formatting for the cycles-per-second figure.
    #[must_use]
    pub fn format_cps(cps: f64) -> String {
        if cps >= 1e6 {
            format!("{:.2}M", cps / 1e6)
        } else if cps >= 1e3 {
            format!("{:.1}K", cps / 1e3)
        } else {
            format!("{cps:.0}")
        }
    }
}

impl std::fmt::Display for DebugStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] pc=0x{:08x} cycle={} insts={} ipc={:.2} cps={} last={}",
            self.state.name(),
            self.pc,
            self.cycle,
            self.instructions,
            self.ipc,
            Self::format_cps(self.cps),
            self.last_command
        )
    }
}

/// Receives status updates; installed by the UI layer.
pub type StatusHandler = Box<dyn Fn(&DebugStatus) + Send + Sync>;

struct TraceConfig {
    options: TraceOptions,
    formatter: Option<TraceFormatter>,
}

/// Shared half of the controller. Implements the executor-facing
/// [`CpuDebugger`] contract. It does not own the executor, so the
/// executor's back-handle creates no reference cycle.
pub(crate) struct DebuggerCore {
    bus: Arc<MemoryBus>,
    breakpoints: Mutex<HashSet<u64>>,
    /// Fast-path mirror of `!breakpoints.is_empty()`.
    breakpoints_present: AtomicBool,
    /// Breakpoint suppressed for one consultation: lets `step` move off a
    /// breakpoint the worker is parked on.
    suppressed_breakpoint: Mutex<Option<u64>>,

    state: AtomicU8,
    pub(crate) should_exit: AtomicBool,
    steps_pending: AtomicU32,
    control: Mutex<()>,
    condvar: Condvar,

    trace: Mutex<TraceConfig>,
    total_instructions: AtomicU64,
    /// Current cycles-per-second estimate, stored as f64 bits.
    cps_bits: AtomicU64,
    status_handler: Mutex<Option<StatusHandler>>,
    last_command: Mutex<String>,
}

impl DebuggerCore {
    fn new(bus: Arc<MemoryBus>, initial_state: CpuState) -> Self {
        Self {
            bus,
            breakpoints: Mutex::new(HashSet::new()),
            breakpoints_present: AtomicBool::new(false),
            suppressed_breakpoint: Mutex::new(None),
            state: AtomicU8::new(initial_state as u8),
            should_exit: AtomicBool::new(false),
            steps_pending: AtomicU32::new(0),
            control: Mutex::new(()),
            condvar: Condvar::new(),
            trace: Mutex::new(TraceConfig {
                options: TraceOptions::none(),
                formatter: None,
            }),
            total_instructions: AtomicU64::new(0),
            cps_bits: AtomicU64::new(0),
            status_handler: Mutex::new(None),
            last_command: Mutex::new(String::new()),
        }
    }

    fn state(&self) -> CpuState {
        CpuState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CpuState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn notify(&self) {
        let _guard = self.control.lock().unwrap();
        self.condvar.notify_all();
    }

    pub(crate) fn request_exit(&self) {
        self.should_exit.store(true, Ordering::Release);
        self.notify();
    }

    fn cps(&self) -> f64 {
        f64::from_bits(self.cps_bits.load(Ordering::Relaxed))
    }

    fn set_cps(&self, cps: f64) {
        self.cps_bits.store(cps.to_bits(), Ordering::Relaxed);
    }

    fn breakpoint_set_contains(&self, address: u64) -> bool {
        self.breakpoints.lock().unwrap().contains(&address)
    }

    fn push_status(&self, pc: u64, cycle: u64) {
        let handler = self.status_handler.lock().unwrap();
        let Some(handler) = handler.as_ref() else {
            return;
        };
        let instructions = self.total_instructions.load(Ordering::Relaxed);
        let ipc = if cycle == 0 {
            0.0
        } else {
            instructions as f64 / cycle as f64
        };
        let status = DebugStatus {
            state: self.state(),
            pc,
            cycle,
            instructions,
            ipc,
            cps: self.cps(),
            last_command: self.last_command.lock().unwrap().clone(),
        };
        handler(&status);
    }
}

impl CpuDebugger for DebuggerCore {
    fn bus_read(&self, access: &MemAccess) -> MemResponse {
        self.bus.read(access)
    }

    fn bus_write(&self, access: &MemAccess) -> MemResponse {
        self.bus.write(access)
    }

    fn has_breakpoints(&self) -> bool {
        self.breakpoints_present.load(Ordering::Acquire)
    }

    fn is_breakpoint(&self, address: u64) -> bool {
        {
            let mut suppressed = self.suppressed_breakpoint.lock().unwrap();
            if *suppressed == Some(address) {
                *suppressed = None;
                return false;
            }
        }
        self.breakpoint_set_contains(address)
    }

    fn trace_options(&self) -> TraceOptions {
        self.trace.lock().unwrap().options
    }

    fn log_trace(&self, record: &TraceRecord) {
        let config = self.trace.lock().unwrap();
        if !config.options.any() {
            return;
        }
        let mut enriched = record.clone();
        trace::append_metrics(&mut enriched);
        let line = match &config.formatter {
            Some(formatter) => formatter(&enriched, &config.options),
            None => trace::format_record(&enriched, &config.options),
        };
        if !line.is_empty() {
            log_print!("{line}\n");
        }
    }
}

/// Fixed instruction ceiling for one running burst.
const INSTRUCTIONS_PER_BURST: u64 = 1_000;
/// Minimum wall-clock window for a cycles-per-second estimate.
const CPS_WINDOW: Duration = Duration::from_millis(30);

/// The debugger/controller. See the crate docs for the thread model.
pub struct Debugger {
    core: Arc<DebuggerCore>,
    cpu: Arc<Mutex<Box<dyn CpuExecutor>>>,
    uart: Option<Arc<UartDevice>>,
    framebuffer: Option<Arc<FramebufferDevice>>,
    cpu_frequency: u64,
    register_count: u32,
    interactive: bool,
    threads: Vec<JoinHandle<()>>,
}

struct CommandEntry {
    name: &'static str,
    help: &'static str,
    handler: fn(&Debugger, &str) -> bool,
}

const COMMANDS: &[CommandEntry] = &[
    CommandEntry {
        name: "run",
        help: "resume execution",
        handler: Debugger::cmd_run,
    },
    CommandEntry {
        name: "step",
        help: "step [n] - execute n instructions (default 1)",
        handler: Debugger::cmd_step,
    },
    CommandEntry {
        name: "pause",
        help: "pause execution",
        handler: Debugger::cmd_pause,
    },
    CommandEntry {
        name: "quit",
        help: "quit the emulator",
        handler: Debugger::cmd_quit,
    },
    CommandEntry {
        name: "exit",
        help: "quit the emulator",
        handler: Debugger::cmd_quit,
    },
    CommandEntry {
        name: "regs",
        help: "print all registers",
        handler: Debugger::cmd_regs,
    },
    CommandEntry {
        name: "mem",
        help: "mem <addr> <len> - dump memory bytes",
        handler: Debugger::cmd_mem,
    },
    CommandEntry {
        name: "eval",
        help: "eval <expr> - evaluate an expression",
        handler: Debugger::cmd_eval,
    },
    CommandEntry {
        name: "bp",
        help: "bp list | bp add <addr> | bp del <addr>",
        handler: Debugger::cmd_bp,
    },
    CommandEntry {
        name: "input",
        help: "input <text> - feed text into the UART",
        handler: Debugger::cmd_input,
    },
    CommandEntry {
        name: "log",
        help: "log <trace|debug|info|warn|error> - set log level",
        handler: Debugger::cmd_log,
    },
    CommandEntry {
        name: "help",
        help: "list commands",
        handler: Debugger::cmd_help,
    },
];

impl Debugger {
    /// Creates the controller around an executor and a fully wired bus.
    /// `interactive` selects the initial CPU state: paused for a debug
    /// session, running otherwise.
    #[must_use]
    pub fn new(cpu: Box<dyn CpuExecutor>, bus: Arc<MemoryBus>, interactive: bool) -> Self {
        let initial = if interactive {
            CpuState::Pause
        } else {
            CpuState::Running
        };
        let register_count = cpu.register_count();
        Self {
            core: Arc::new(DebuggerCore::new(bus, initial)),
            cpu: Arc::new(Mutex::new(cpu)),
            uart: None,
            framebuffer: None,
            cpu_frequency: 1_000_000,
            register_count,
            interactive,
            threads: Vec::new(),
        }
    }

    pub fn set_uart(&mut self, uart: Arc<UartDevice>) {
        self.uart = Some(uart);
    }

    pub fn set_framebuffer(&mut self, framebuffer: Arc<FramebufferDevice>) {
        self.framebuffer = Some(framebuffer);
    }

    pub fn set_cpu_frequency(&mut self, hz: u64) {
        self.cpu_frequency = hz.max(1);
    }

    pub fn set_status_handler(&self, handler: Option<StatusHandler>) {
        *self.core.status_handler.lock().unwrap() = handler;
    }

    pub fn configure_trace(&self, options: TraceOptions) {
        self.core.trace.lock().unwrap().options = options;
    }

    pub fn set_trace_formatter(&self, formatter: Option<TraceFormatter>) {
        self.core.trace.lock().unwrap().formatter = formatter;
    }

    #[must_use]
    pub fn cpu_state(&self) -> CpuState {
        self.core.state()
    }

    #[must_use]
    pub fn should_exit(&self) -> bool {
        self.core.should_exit.load(Ordering::Acquire)
    }

    pub fn request_exit(&self) {
        self.core.request_exit();
    }

    #[must_use]
    pub fn last_cpu_error(&self) -> CpuErrorDetail {
        self.cpu.lock().unwrap().last_error()
    }

    #[must_use]
    pub fn pc(&self) -> u64 {
        self.cpu.lock().unwrap().pc()
    }

    #[must_use]
    pub fn cpu_cycle(&self) -> u64 {
        self.cpu.lock().unwrap().cycle()
    }

    /// Snapshot of the full register file.
    #[must_use]
    pub fn read_registers(&self) -> Vec<u64> {
        let cpu = self.cpu.lock().unwrap();
        (0..self.register_count).map(|i| cpu.register(i)).collect()
    }

    /// Reads `length` bytes through the bus, one at a time. Unreadable
    /// bytes come back as zero.
    #[must_use]
    pub fn scan_memory(&self, address: u64, length: u32) -> Vec<u8> {
        (0..u64::from(length))
            .map(|i| {
                let response = self.core.bus.read(&MemAccess::read(address + i, 1));
                if response.success {
                    (response.data & 0xff) as u8
                } else {
                    0
                }
            })
            .collect()
    }

    /// Evaluates a debugger expression against live CPU and bus state.
    #[must_use]
    pub fn eval_expression(&self, expression: &str) -> u64 {
        let cpu = self.cpu.lock().unwrap();
        expr::evaluate(&**cpu, &self.core.bus, expression)
    }

    pub fn add_breakpoint(&self, address: u64) {
        let mut set = self.core.breakpoints.lock().unwrap();
        set.insert(address);
        self.core
            .breakpoints_present
            .store(!set.is_empty(), Ordering::Release);
    }

    pub fn remove_breakpoint(&self, address: u64) {
        let mut set = self.core.breakpoints.lock().unwrap();
        set.remove(&address);
        self.core
            .breakpoints_present
            .store(!set.is_empty(), Ordering::Release);
    }

    #[must_use]
    pub fn breakpoints(&self) -> Vec<u64> {
        let mut list: Vec<u64> = self.core.breakpoints.lock().unwrap().iter().copied().collect();
        list.sort_unstable();
        list
    }

    /// Installs per-device sync thresholds derived from the CPU frequency
    /// and returns the cycle ceiling for one running burst: the minimum
    /// threshold among devices that declare a frequency, or one sixtieth
    /// of a second worth of cycles when none does.
    fn install_sync_thresholds(&self) -> u64 {
        let mut ceiling: Option<u64> = None;
        for device in self.core.bus.devices() {
            let frequency = device.update_frequency();
            if frequency == 0 {
                continue;
            }
            let threshold = (self.cpu_frequency / u64::from(frequency)).max(1);
            device.sync_state().set_threshold(threshold);
            ceiling = Some(ceiling.map_or(threshold, |c| c.min(threshold)));
        }
        ceiling.unwrap_or((self.cpu_frequency / 60).max(1))
    }

    /// Installs this controller as the executor's handle and starts the
    /// CPU worker thread, plus the presenter thread when a backend is
    /// supplied. The calling thread becomes the operator.
    pub fn start(&mut self, backend: Option<Box<dyn PresentBackend>>) {
        self.cpu
            .lock()
            .unwrap()
            .set_debugger(self.core.clone() as Arc<dyn CpuDebugger>);

        let cycles_per_burst = self.install_sync_thresholds();

        let core = self.core.clone();
        let cpu = self.cpu.clone();
        let worker = thread::Builder::new()
            .name("cpu-worker".to_string())
            .spawn(move || worker_loop(&core, &cpu, cycles_per_burst))
            .expect("failed to spawn cpu worker");
        self.threads.push(worker);

        if let (Some(framebuffer), Some(backend)) = (self.framebuffer.clone(), backend) {
            let core = self.core.clone();
            let presenter = thread::Builder::new()
                .name("presenter".to_string())
                .spawn(move || presenter_loop(core, framebuffer, backend))
                .expect("failed to spawn presenter");
            self.threads.push(presenter);
        }
    }

    /// Signals exit and joins every thread this controller started.
    pub fn shutdown(&mut self) {
        self.core.request_exit();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        if let Some(uart) = &self.uart {
            uart.flush();
        }
    }

    // -----------------------------------------------------------------
    // Command dispatch
    // -----------------------------------------------------------------

    /// Dispatches one operator command line. Returns false for an
    /// unknown verb or malformed arguments; the shell reports those.
    pub fn process_command(&self, line: &str) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return true;
        }
        let verb = trimmed.split_whitespace().next().unwrap_or_default();
        let rest = trimmed[verb.len()..].trim();

        let Some(entry) = COMMANDS.iter().find(|c| c.name == verb) else {
            return false;
        };
        *self.core.last_command.lock().unwrap() = verb.to_string();
        (entry.handler)(self, rest)
    }

    fn cmd_run(&self, _args: &str) -> bool {
        if self.core.state() == CpuState::Halted {
            log_print!("CPU is halted. Cannot run.\n");
            return true;
        }
        self.core.set_state(CpuState::Running);
        self.core.notify();
        self.push_status();
        true
    }

    fn cmd_step(&self, args: &str) -> bool {
        if self.core.state() == CpuState::Halted {
            log_print!("CPU is halted. Cannot step.\n");
            return true;
        }
        let count = if args.is_empty() {
            1
        } else {
            self.eval_expression(args).max(1)
        };
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.core.steps_pending.fetch_add(count, Ordering::Release);
        self.core.set_state(CpuState::Running);
        self.core.notify();
        true
    }

    fn cmd_pause(&self, _args: &str) -> bool {
        if self.core.state() == CpuState::Running {
            self.core.set_state(CpuState::Pause);
            self.push_status();
        }
        true
    }

    fn cmd_quit(&self, _args: &str) -> bool {
        self.core.request_exit();
        true
    }

    fn cmd_regs(&self, _args: &str) -> bool {
        for (index, value) in self.read_registers().iter().enumerate() {
            log_print!("r{index} = 0x{value:x}\n");
        }
        true
    }

    fn cmd_mem(&self, args: &str) -> bool {
        let mut parts = args.split_whitespace();
        let (Some(addr_text), Some(len_text)) = (parts.next(), parts.next()) else {
            return false;
        };
        let address = self.eval_expression(addr_text);
        let length = self.eval_expression(len_text);
        let length = u32::try_from(length).unwrap_or(u32::MAX);

        let data = self.scan_memory(address, length);
        let mut row = String::new();
        for (i, byte) in data.iter().enumerate() {
            if i % 16 == 0 {
                row.push_str(&format!("{:08x}: ", address + i as u64));
            }
            row.push_str(&format!("{byte:02x} "));
            if i % 16 == 15 || i + 1 == data.len() {
                log_print!("{row}\n");
                row.clear();
            }
        }
        true
    }

    fn cmd_eval(&self, args: &str) -> bool {
        if args.is_empty() {
            return false;
        }
        let value = self.eval_expression(args);
        log_print!("0x{value:x} ({value})\n");
        true
    }

    fn cmd_bp(&self, args: &str) -> bool {
        let mut parts = args.split_whitespace();
        match parts.next() {
            Some("list") => {
                for address in self.breakpoints() {
                    log_print!("0x{address:x}\n");
                }
                true
            }
            Some("add") => match parts.next() {
                Some(addr_text) => {
                    self.add_breakpoint(self.eval_expression(addr_text));
                    true
                }
                None => false,
            },
            Some("del") => match parts.next() {
                Some(addr_text) => {
                    self.remove_breakpoint(self.eval_expression(addr_text));
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    fn cmd_input(&self, args: &str) -> bool {
        let Some(uart) = &self.uart else {
            return false;
        };
        for byte in args.bytes() {
            uart.push_rx(byte);
        }
        uart.push_rx(b'\n');
        true
    }

    fn cmd_log(&self, args: &str) -> bool {
        match emu_logger::LogLevel::parse(args.trim()) {
            Some(level) => {
                emu_logger::set_level(level);
                true
            }
            None => false,
        }
    }

    fn cmd_help(&self, _args: &str) -> bool {
        for entry in COMMANDS {
            log_print!("{:8} {}\n", entry.name, entry.help);
        }
        true
    }

    fn push_status(&self) {
        let (pc, cycle) = {
            let cpu = self.cpu.lock().unwrap();
            (cpu.pc(), cpu.cycle())
        };
        self.core.push_status(pc, cycle);
    }

    // -----------------------------------------------------------------
    // Operator loops
    // -----------------------------------------------------------------

    /// Interactive console on the calling thread: a `dbg> ` prompt with
    /// UART output mirrored between prompts.
    pub fn run_console(&self) {
        if let Some(uart) = &self.uart {
            uart.set_tx_handler(Some(Box::new(|bytes: &[u8]| {
                let mut out = io::stdout().lock();
                let _ = out.write_all(b"\r\n");
                let _ = out.write_all(bytes);
                if bytes.last() != Some(&b'\n') {
                    let _ = out.write_all(b"\n");
                }
                let _ = out.write_all(b"dbg> ");
                let _ = out.flush();
            })));
        }

        let stdin = io::stdin();
        let mut line = String::new();
        while !self.should_exit() {
            {
                let mut out = io::stdout().lock();
                let _ = out.write_all(b"dbg> ");
                let _ = out.flush();
            }
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => {
                    self.core.request_exit();
                    break;
                }
                Ok(_) => {}
            }
            if !self.process_command(&line) {
                println!("Unknown command");
            }
        }

        if let Some(uart) = &self.uart {
            uart.set_tx_handler(None);
        }
    }

    /// Headless operator on the calling thread: forwards stdin lines into
    /// the UART until the CPU stops or `quit`/`exit` is typed. Rechecks
    /// the exit flag every 50 ms so shutdown stays responsive.
    pub fn run_headless_pump(&self) {
        let (sender, receiver) = mpsc::channel::<String>();
        thread::Builder::new()
            .name("stdin-pump".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            })
            .expect("failed to spawn stdin pump");

        loop {
            if self.should_exit() || self.core.state() != CpuState::Running {
                break;
            }
            match receiver.recv_timeout(Duration::from_millis(50)) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == "quit" || trimmed == "exit" {
                        self.core.request_exit();
                        break;
                    }
                    if let Some(uart) = &self.uart {
                        for byte in line.bytes() {
                            uart.push_rx(byte);
                        }
                        uart.push_rx(b'\n');
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    // stdin closed; keep waiting on the run state alone.
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }

    /// Whether this controller was created for an interactive session.
    #[must_use]
    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// CPU worker: waits for `Running` or a pending step request, executes
/// one bounded burst, then advances device time and the status surface.
fn worker_loop(
    core: &Arc<DebuggerCore>,
    cpu: &Arc<Mutex<Box<dyn CpuExecutor>>>,
    cycles_per_burst: u64,
) {
    let mut last_cps_time = Instant::now();
    let mut last_cps_cycles = 0u64;

    loop {
        {
            let guard = core.control.lock().unwrap();
            let _guard = core
                .condvar
                .wait_while(guard, |_| {
                    !core.should_exit.load(Ordering::Acquire)
                        && core.state() != CpuState::Running
                        && core.steps_pending.load(Ordering::Acquire) == 0
                })
                .unwrap();
        }
        if core.should_exit.load(Ordering::Acquire) {
            break;
        }

        let pending = core.steps_pending.swap(0, Ordering::AcqRel);
        let stepping = pending > 0;
        let (max_instructions, max_cycles) = if stepping {
            if core.state() == CpuState::Halted {
                continue;
            }
            core.set_state(CpuState::Running);
            (u64::from(pending), u64::MAX)
        } else if core.state() == CpuState::Running {
            (INSTRUCTIONS_PER_BURST, cycles_per_burst)
        } else {
            continue;
        };

        let (result, pc, cycle, error) = {
            let mut cpu = cpu.lock().unwrap();
            if stepping {
                *core.suppressed_breakpoint.lock().unwrap() = Some(cpu.pc());
            }
            let result = cpu.step(max_instructions, max_cycles);
            *core.suppressed_breakpoint.lock().unwrap() = None;
            (result, cpu.pc(), cpu.cycle(), cpu.last_error())
        };
        core.total_instructions
            .fetch_add(result.instructions, Ordering::Relaxed);

        // All memory traffic of the burst has completed; only now do the
        // devices see its cycles.
        core.bus.sync_all(cycle);

        if !result.success {
            core.set_state(CpuState::Halted);
            if error.kind == CpuErrorKind::Halt {
                log_info!("CPU halted at pc=0x{pc:x}");
            } else {
                log_error!(
                    "CPU halted at pc=0x{pc:x}: {:?} address=0x{:x} size={}",
                    error.kind,
                    error.address,
                    error.size
                );
            }
            core.notify();
            core.push_status(pc, cycle);
            continue;
        }

        if stepping {
            core.set_state(CpuState::Pause);
            core.push_status(pc, cycle);
            continue;
        }

        if core.has_breakpoints()
            && core.breakpoint_set_contains(pc)
            && core.state() == CpuState::Running
        {
            core.set_state(CpuState::Pause);
            log_info!("Breakpoint hit at 0x{pc:x}");
            core.push_status(pc, cycle);
            continue;
        }

        let elapsed = last_cps_time.elapsed();
        if elapsed >= CPS_WINDOW {
            let cps = (cycle - last_cps_cycles) as f64 / elapsed.as_secs_f64();
            core.set_cps(cps);
            last_cps_time = Instant::now();
            last_cps_cycles = cycle;
            core.push_status(pc, cycle);
        }
    }
}
