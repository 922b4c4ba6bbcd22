//! Simulated bare-metal target: a flat little-endian memory, a 17-register
//! file and the debug comparator unit the control engine programs. The
//! comparators are consulted before every fetch and before every data
//! access, exactly where the real debug hardware sits in the pipeline.

mod insn;

pub use insn::{asm, decode, Insn};

use crate::fault::{Regs, REG_LR, REG_PC, REG_SP};
use crate::regs::{moe_encode, DebugPort, MOE_BREAKPOINT, MOE_WATCHPOINT};
use crate::{DebugError, DebugResult, DATA_SLOTS, INSN_SLOTS};

const FSR_DEBUG_EVENT: u32 = 0b0010;
const DFSR_WRITE: u32 = 1 << 11;
const DSCR_MONITOR: u32 = 1 << 15;
const DSCR_HALTING: u32 = 1 << 14;
const BCR_ENABLE: u32 = 1;
const BCR_MISMATCH: u32 = 0b10 << 21;
const BCR_MODE_MASK: u32 = 0b11 << 21;
const WCR_ENABLE: u32 = 1;
const WCR_ON_LOAD: u32 = 1 << 3;
const WCR_ON_STORE: u32 = 1 << 4;

#[derive(Debug, Clone, Copy, Default)]
struct CompBank {
    bvr: [u32; INSN_SLOTS],
    bcr: [u32; INSN_SLOTS],
    wvr: [u32; DATA_SLOTS],
    wcr: [u32; DATA_SLOTS],
    dscr: u32,
}

/// The comparator register bank. Writes land in a staging copy and only
/// reach the match logic on `pipeline_flush()`; a caller that forgets the
/// flush keeps matching against the stale programming, which is exactly the
/// failure mode the real pipeline has.
#[derive(Debug, Default)]
pub struct DebugUnit {
    staged: CompBank,
    live: CompBank,
    ifsr: u32,
    dfsr: u32,
    far: u32,
    wfar: u32,
}

impl DebugUnit {
    fn enabled(&self) -> bool {
        self.live.dscr & DSCR_MONITOR != 0 && self.live.dscr & DSCR_HALTING == 0
    }

    /// Consult the instruction comparators for a fetch at `pc`. Latches the
    /// fault-status registers and returns true if one fires.
    fn check_fetch(&mut self, pc: u32) -> bool {
        if !self.enabled() {
            return false;
        }
        for i in 0..INSN_SLOTS {
            if self.live.bcr[i] & BCR_ENABLE == 0 {
                continue;
            }
            let mismatch = self.live.bcr[i] & BCR_MODE_MASK == BCR_MISMATCH;
            let hit = if mismatch {
                pc != self.live.bvr[i]
            } else {
                pc == self.live.bvr[i]
            };
            if hit {
                self.ifsr = FSR_DEBUG_EVENT;
                self.staged.dscr = moe_encode(self.staged.dscr, MOE_BREAKPOINT);
                self.live.dscr = moe_encode(self.live.dscr, MOE_BREAKPOINT);
                return true;
            }
        }
        false
    }

    /// Consult the data comparators for an access to `addr` by the
    /// instruction at `pc`.
    fn check_data(&mut self, pc: u32, addr: u32, is_load: bool) -> bool {
        if !self.enabled() {
            return false;
        }
        let dir = if is_load { WCR_ON_LOAD } else { WCR_ON_STORE };
        for i in 0..DATA_SLOTS {
            if self.live.wcr[i] & WCR_ENABLE == 0 || self.live.wcr[i] & dir == 0 {
                continue;
            }
            if self.live.wvr[i] == addr & !0b11 {
                self.dfsr = FSR_DEBUG_EVENT | if is_load { 0 } else { DFSR_WRITE };
                self.far = addr;
                self.wfar = pc.wrapping_add(8);
                self.staged.dscr = moe_encode(self.staged.dscr, MOE_WATCHPOINT);
                self.live.dscr = moe_encode(self.live.dscr, MOE_WATCHPOINT);
                return true;
            }
        }
        false
    }
}

impl DebugPort for DebugUnit {
    fn bvr_get(&self, idx: usize) -> u32 {
        self.staged.bvr[idx]
    }
    fn bvr_set(&mut self, idx: usize, val: u32) {
        self.staged.bvr[idx] = val;
    }
    fn bcr_get(&self, idx: usize) -> u32 {
        self.staged.bcr[idx]
    }
    fn bcr_set(&mut self, idx: usize, val: u32) {
        self.staged.bcr[idx] = val;
    }

    fn wvr_get(&self, idx: usize) -> u32 {
        self.staged.wvr[idx]
    }
    fn wvr_set(&mut self, idx: usize, val: u32) {
        self.staged.wvr[idx] = val;
    }
    fn wcr_get(&self, idx: usize) -> u32 {
        self.staged.wcr[idx]
    }
    fn wcr_set(&mut self, idx: usize, val: u32) {
        self.staged.wcr[idx] = val;
    }

    fn dscr_get(&self) -> u32 {
        self.staged.dscr
    }
    fn dscr_set(&mut self, val: u32) {
        self.staged.dscr = val;
    }

    fn ifsr_get(&self) -> u32 {
        self.ifsr
    }
    fn dfsr_get(&self) -> u32 {
        self.dfsr
    }
    fn far_get(&self) -> u32 {
        self.far
    }
    fn wfar_get(&self) -> u32 {
        self.wfar
    }

    fn pipeline_flush(&mut self) {
        self.live = self.staged;
    }
}

/// A debug exception raised by the target, delivered to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFault {
    Prefetch { pc: u32 },
    Data { pc: u32, addr: u32, is_load: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The instruction retired normally.
    Executed,
    /// A halt instruction retired.
    Halted,
    /// A comparator fired; pc still points at the faulting instruction.
    Fault(TargetFault),
}

/// Simulated processor: register file, memory and debug unit.
pub struct Machine {
    pub regs: Regs,
    pub dbg: DebugUnit,
    mem: Vec<u8>,
    base: u32,
}

impl Machine {
    pub fn new(mem_size: usize, base: u32) -> Self {
        Self {
            regs: Regs::default(),
            dbg: DebugUnit::default(),
            mem: vec![0; mem_size],
            base,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Top of memory; stepped contexts get this as their scratch stack.
    pub fn scratch_stack_top(&self) -> u32 {
        self.base + self.mem.len() as u32
    }

    fn offset(&self, addr: u32, len: usize) -> DebugResult<usize> {
        let off = addr.wrapping_sub(self.base) as usize;
        if addr < self.base || off + len > self.mem.len() {
            return Err(DebugError::MemoryViolation(addr));
        }
        Ok(off)
    }

    pub fn read_u32(&self, addr: u32) -> DebugResult<u32> {
        let off = self.offset(addr, 4)?;
        let bytes: [u8; 4] = self.mem[off..off + 4].try_into().unwrap_or([0; 4]);
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u32(&mut self, addr: u32, val: u32) -> DebugResult<()> {
        let off = self.offset(addr, 4)?;
        self.mem[off..off + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// Place a sequence of instruction words at `addr`.
    pub fn load(&mut self, addr: u32, words: &[u32]) -> DebugResult<()> {
        for (i, w) in words.iter().enumerate() {
            self.write_u32(addr + 4 * i as u32, *w)?;
        }
        Ok(())
    }

    fn read_reg(&self, n: u8) -> u32 {
        self.regs[n as usize]
    }

    fn write_reg(&mut self, n: u8, val: u32) {
        self.regs[n as usize] = val;
    }

    /// Execute one instruction, or raise the debug fault that preempts it.
    pub fn step_insn(&mut self) -> DebugResult<StepOutcome> {
        let pc = self.regs[REG_PC];

        // comparators sit ahead of the fetch stage
        if self.dbg.check_fetch(pc) {
            return Ok(StepOutcome::Fault(TargetFault::Prefetch { pc }));
        }

        let word = self.read_u32(pc)?;
        let insn = decode(word).ok_or(DebugError::DecodeError(pc))?;
        tracing::trace!(pc = format_args!("{pc:#x}"), ?insn, "execute");

        let mut next_pc = pc.wrapping_add(4);
        match insn {
            Insn::Halt => return Ok(StepOutcome::Halted),
            Insn::Nop => {}
            Insn::Movi { rd, imm } => {
                if rd as usize == REG_PC {
                    next_pc = imm as u32;
                } else {
                    self.write_reg(rd, imm as u32);
                }
            }
            Insn::Addi { rd, rs, imm } => {
                let val = self.read_reg(rs).wrapping_add(imm as u32);
                self.write_reg(rd, val);
            }
            Insn::Add { rd, rs1, rs2 } => {
                let val = self.read_reg(rs1).wrapping_add(self.read_reg(rs2));
                self.write_reg(rd, val);
            }
            Insn::Sub { rd, rs1, rs2 } => {
                let val = self.read_reg(rs1).wrapping_sub(self.read_reg(rs2));
                self.write_reg(rd, val);
            }
            Insn::Ldr { rd, rs, off } => {
                let addr = self.read_reg(rs).wrapping_add(off as u32);
                if self.dbg.check_data(pc, addr, true) {
                    return Ok(StepOutcome::Fault(TargetFault::Data {
                        pc,
                        addr,
                        is_load: true,
                    }));
                }
                let val = self.read_u32(addr)?;
                self.write_reg(rd, val);
            }
            Insn::Str { rd, rs, off } => {
                let addr = self.read_reg(rs).wrapping_add(off as u32);
                if self.dbg.check_data(pc, addr, false) {
                    return Ok(StepOutcome::Fault(TargetFault::Data {
                        pc,
                        addr,
                        is_load: false,
                    }));
                }
                let val = self.read_reg(rd);
                self.write_u32(addr, val)?;
            }
            Insn::B { off } => {
                next_pc = pc.wrapping_add((off as i32 * 4) as u32);
            }
            Insn::Bnz { rs, off } => {
                if self.read_reg(rs) != 0 {
                    next_pc = pc.wrapping_add((off as i32 * 4) as u32);
                }
            }
            Insn::Bl { off } => {
                self.regs[REG_LR] = pc.wrapping_add(4);
                next_pc = pc.wrapping_add((off as i32 * 4) as u32);
            }
            Insn::Ret => {
                next_pc = self.regs[REG_LR];
            }
        }

        self.regs[REG_PC] = next_pc;
        Ok(StepOutcome::Executed)
    }
}
