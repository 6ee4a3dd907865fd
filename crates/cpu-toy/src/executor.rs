//! The demo-ISA executor.

use std::sync::Arc;

use emu_core::trace::{BranchInfo, MemEvent, TraceRecord};
use emu_core::{
    AccessKind, CpuDebugger, CpuErrorDetail, CpuErrorKind, CpuExecutor, MemAccess, MemResponse,
    StepResult,
};

use crate::isa::{self, Op};

const REG_COUNT: u32 = 16;
const INST_SIZE: u32 = 4;

/// Executor state: sixteen 64-bit registers (r0 hardwired to zero), a
/// program counter and a cycle counter. All bus traffic goes through the
/// installed debugger handle.
pub struct ToyCpu {
    regs: [u64; REG_COUNT as usize],
    pc: u64,
    cycle: u64,
    last_error: CpuErrorDetail,
    debugger: Option<Arc<dyn CpuDebugger>>,
}

/// Per-instruction bookkeeping gathered while executing, turned into a
/// trace record when tracing is enabled.
struct InstContext {
    pc: u64,
    inst: u32,
    events: Vec<MemEvent>,
    branch: Option<BranchInfo>,
}

impl ToyCpu {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regs: [0; REG_COUNT as usize],
            pc: 0,
            cycle: 0,
            last_error: CpuErrorDetail::default(),
            debugger: None,
        }
    }

    fn fault(&mut self, kind: CpuErrorKind, address: u64, size: u32, data: u64) {
        self.last_error = CpuErrorDetail {
            kind,
            address,
            size,
            data,
        };
    }

    fn record_event(ctx: &mut Option<InstContext>, kind: AccessKind, access: &MemAccess, response: &MemResponse) {
        if let Some(ctx) = ctx {
            ctx.events.push(MemEvent {
                kind,
                address: access.address,
                size: access.size,
                data: if kind == AccessKind::Write {
                    access.data
                } else {
                    response.data
                },
                latency_cycles: response.latency_cycles,
            });
        }
    }

    /// Executes one instruction. Returns the cycles it consumed, or
    /// `None` after recording `last_error`.
    fn execute_one(&mut self, host: &Arc<dyn CpuDebugger>, ctx: &mut Option<InstContext>) -> Option<u64> {
        let pc_before = self.pc;
        let fetch_access = MemAccess::fetch(pc_before, INST_SIZE);
        let fetch = host.bus_read(&fetch_access);
        if !fetch.success {
            self.last_error = fetch.error;
            return None;
        }
        let inst = (fetch.data & 0xffff_ffff) as u32;
        if let Some(ctx) = ctx {
            ctx.pc = pc_before;
            ctx.inst = inst;
        }
        Self::record_event(ctx, AccessKind::Fetch, &fetch_access, &fetch);

        self.pc = pc_before.wrapping_add(u64::from(INST_SIZE));
        let mut cost = 1 + u64::from(fetch.latency_cycles);

        let Some(op) = Op::from_u8(isa::opcode(inst)) else {
            self.fault(CpuErrorKind::InvalidOp, pc_before, INST_SIZE, u64::from(inst));
            return None;
        };

        match op {
            Op::Nop => {}
            Op::Halt => {
                self.fault(CpuErrorKind::Halt, pc_before, INST_SIZE, 0);
                return None;
            }
            Op::Lui => {
                let value = u64::from(isa::imm16(inst)) << 16;
                self.set_register(u32::from(isa::rd(inst)), value);
            }
            Op::Ori => {
                let rd = u32::from(isa::rd(inst));
                let value = self.register(rd) | u64::from(isa::imm16(inst));
                self.set_register(rd, value);
            }
            Op::Lw => {
                let base = self.register(u32::from(isa::rs(inst)));
                let address = base.wrapping_add(i64::from(isa::off8(inst)) as u64);
                let access = MemAccess::read(address, 4);
                let response = host.bus_read(&access);
                if !response.success {
                    self.last_error = response.error;
                    return None;
                }
                Self::record_event(ctx, AccessKind::Read, &access, &response);
                cost += u64::from(response.latency_cycles);
                self.set_register(u32::from(isa::rd(inst)), response.data & 0xffff_ffff);
            }
            Op::Sw => {
                let base = self.register(u32::from(isa::rs(inst)));
                let address = base.wrapping_add(i64::from(isa::off8(inst)) as u64);
                let value = self.register(u32::from(isa::rd(inst))) & 0xffff_ffff;
                let access = MemAccess::write(address, 4, value);
                let response = host.bus_write(&access);
                if !response.success {
                    self.last_error = response.error;
                    return None;
                }
                Self::record_event(ctx, AccessKind::Write, &access, &response);
                cost += u64::from(response.latency_cycles);
            }
            Op::Beq => {
                let lhs = self.register(u32::from(isa::rd(inst)));
                let rhs = self.register(u32::from(isa::rs(inst)));
                let fallthrough = self.pc;
                let target =
                    fallthrough.wrapping_add((i64::from(isa::off8(inst)) * 4) as u64);
                let taken = lhs == rhs;
                if taken {
                    self.pc = target;
                }
                if let Some(ctx) = ctx {
                    // Static predictor: branches are assumed not taken.
                    ctx.branch = Some(BranchInfo {
                        taken,
                        target,
                        predicted_taken: false,
                        predicted_target: fallthrough,
                    });
                }
            }
        }

        self.cycle += cost;
        Some(cost)
    }
}

impl Default for ToyCpu {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuExecutor for ToyCpu {
    fn reset(&mut self) {
        self.regs = [0; REG_COUNT as usize];
        self.pc = 0;
        self.cycle = 0;
        self.last_error = CpuErrorDetail::default();
    }

    fn step(&mut self, max_instructions: u64, max_cycles: u64) -> StepResult {
        let mut result = StepResult {
            success: true,
            instructions: 0,
            cycles: 0,
        };

        let Some(host) = self.debugger.clone() else {
            self.fault(CpuErrorKind::DeviceFault, self.pc, 0, 0);
            result.success = false;
            return result;
        };

        while result.instructions < max_instructions && result.cycles < max_cycles {
            if host.has_breakpoints() && host.is_breakpoint(self.pc) {
                break;
            }

            let options = host.trace_options();
            let mut ctx = options.any().then(|| InstContext {
                pc: self.pc,
                inst: 0,
                events: Vec::new(),
                branch: None,
            });
            let cycle_begin = self.cycle;

            let Some(cost) = self.execute_one(&host, &mut ctx) else {
                result.success = false;
                return result;
            };

            result.instructions += 1;
            result.cycles += cost;

            if let Some(ctx) = ctx {
                let record = TraceRecord {
                    pc: ctx.pc,
                    inst: ctx.inst,
                    decoded: isa::disassemble(ctx.inst),
                    cycle_begin,
                    cycle_end: self.cycle,
                    mem_events: ctx.events,
                    is_branch: ctx.branch.is_some(),
                    branch: ctx.branch.unwrap_or_default(),
                    extra: Vec::new(),
                };
                host.log_trace(&record);
            }
        }

        result
    }

    fn last_error(&self) -> CpuErrorDetail {
        self.last_error
    }

    fn pc(&self) -> u64 {
        self.pc
    }

    fn set_pc(&mut self, pc: u64) {
        self.pc = pc;
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn register(&self, index: u32) -> u64 {
        if index == 0 || index >= REG_COUNT {
            return 0;
        }
        self.regs[index as usize]
    }

    fn set_register(&mut self, index: u32, value: u64) {
        if index == 0 || index >= REG_COUNT {
            return;
        }
        self.regs[index as usize] = value;
    }

    fn register_count(&self) -> u32 {
        REG_COUNT
    }

    fn set_debugger(&mut self, debugger: Arc<dyn CpuDebugger>) {
        self.debugger = Some(debugger);
    }
}
