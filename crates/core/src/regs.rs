//! Typed accessors over the debug comparator register bank.
//!
//! Every comparator *set* must be followed by an instruction-pipeline flush
//! before the new value can be trusted to affect subsequent fetches. The
//! arm/disarm helpers here always perform the write-then-flush sequence, so
//! callers cannot get the ordering wrong. Reads are side-effect-free and the
//! accessors are infallible: they are unconditional hardware accesses,
//! correct by construction once the debug unit is enabled.

use crate::{DATA_SLOTS, INSN_SLOTS};
use bitflags::bitflags;

/// Raw access to the debug register bank: one value/control pair per
/// instruction comparator and per data comparator, the status/enable
/// register, and the read-only fault-status registers latched by the
/// hardware when a comparator fires.
pub trait DebugPort {
    fn bvr_get(&self, idx: usize) -> u32;
    fn bvr_set(&mut self, idx: usize, val: u32);
    fn bcr_get(&self, idx: usize) -> u32;
    fn bcr_set(&mut self, idx: usize, val: u32);

    fn wvr_get(&self, idx: usize) -> u32;
    fn wvr_set(&mut self, idx: usize, val: u32);
    fn wcr_get(&self, idx: usize) -> u32;
    fn wcr_set(&mut self, idx: usize, val: u32);

    fn dscr_get(&self) -> u32;
    fn dscr_set(&mut self, val: u32);

    /// Instruction fault status (prefetch aborts).
    fn ifsr_get(&self) -> u32;
    /// Data fault status (data aborts).
    fn dfsr_get(&self) -> u32;
    /// Faulting data address.
    fn far_get(&self) -> u32;
    /// Watchpoint fault address register (pc + 8 of the access).
    fn wfar_get(&self) -> u32;

    /// Commit prior register writes to the match logic.
    fn pipeline_flush(&mut self);
}

bitflags! {
    /// Instruction comparator control word layout.
    ///
    /// Bits 22:21 select match (0b00) vs. mismatch (0b10) mode, bits 8:5 are
    /// the byte-address-select mask, bits 2:1 the privilege-mode mask and
    /// bit 0 the enable. Linking (bit 20) and the secure-world bits (15:14)
    /// stay clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BcrControl: u32 {
        const ENABLE     = 1 << 0;
        const PRIV       = 0b01 << 1;
        const USER       = 0b10 << 1;
        const ANY_MODE   = 0b11 << 1;
        const ANY_BYTE   = 0b1111 << 5;
        const MISMATCH   = 0b10 << 21;
    }
}

bitflags! {
    /// Data comparator control word layout. Bits 4:3 select which access
    /// directions fire the comparator.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WcrControl: u32 {
        const ENABLE    = 1 << 0;
        const ANY_MODE  = 0b11 << 1;
        const ON_LOAD   = 1 << 3;
        const ON_STORE  = 1 << 4;
        const ANY_BYTE  = 0b1111 << 5;
    }
}

impl BcrControl {
    /// Fire on any instruction fetch of the programmed address, in any
    /// privilege mode, for all access widths.
    pub fn match_any() -> Self {
        Self::ENABLE | Self::ANY_MODE | Self::ANY_BYTE
    }

    /// Fire on every fetch *except* the programmed address.
    pub fn mismatch_any() -> Self {
        Self::match_any() | Self::MISMATCH
    }
}

impl WcrControl {
    /// Fire on any load or store of the programmed address.
    pub fn watch_any() -> Self {
        Self::ENABLE | Self::ANY_MODE | Self::ON_LOAD | Self::ON_STORE | Self::ANY_BYTE
    }
}

// DSCR layout: bit 15 enables monitor debug mode, bit 14 selects halting
// mode (must stay clear), bits 5:2 record the method of entry of the last
// debug exception.
const DSCR_MONITOR: u32 = 1 << 15;
const DSCR_HALTING: u32 = 1 << 14;
const DSCR_MOE_SHIFT: u32 = 2;
const DSCR_MOE_MASK: u32 = 0xf << DSCR_MOE_SHIFT;
pub(crate) const MOE_BREAKPOINT: u32 = 0b0001;
pub(crate) const MOE_WATCHPOINT: u32 = 0b0010;

// FSR low nibble for a debug event.
const FSR_DEBUG_EVENT: u32 = 0b0010;
// DFSR bit 11 is set for stores, clear for loads.
const DFSR_WRITE: u32 = 1 << 11;

/// Select and enable monitor debug mode. Idempotent.
pub fn unit_enable(port: &mut dyn DebugPort) {
    if unit_is_enabled(port) {
        return;
    }
    let val = (port.dscr_get() | DSCR_MONITOR) & !DSCR_HALTING;
    port.dscr_set(val);
    port.pipeline_flush();
}

pub fn unit_disable(port: &mut dyn DebugPort) {
    let val = port.dscr_get() & !DSCR_MONITOR;
    port.dscr_set(val);
    port.pipeline_flush();
}

pub fn unit_is_enabled(port: &dyn DebugPort) -> bool {
    let val = port.dscr_get();
    val & DSCR_MONITOR != 0 && val & DSCR_HALTING == 0
}

/// Program and enable instruction comparator `idx` in one atomic sequence.
pub fn insn_arm(port: &mut dyn DebugPort, idx: usize, addr: u32, ctrl: BcrControl) {
    assert!(idx < INSN_SLOTS);
    // disable while reprogramming so a partially written pair never matches
    port.bcr_set(idx, 0);
    port.bvr_set(idx, addr);
    port.bcr_set(idx, (ctrl | BcrControl::ENABLE).bits());
    port.pipeline_flush();
}

pub fn insn_disarm(port: &mut dyn DebugPort, idx: usize) {
    assert!(idx < INSN_SLOTS);
    let val = port.bcr_get(idx) & !BcrControl::ENABLE.bits();
    port.bcr_set(idx, val);
    port.pipeline_flush();
}

pub fn insn_is_armed(port: &dyn DebugPort, idx: usize) -> bool {
    assert!(idx < INSN_SLOTS);
    port.bcr_get(idx) & BcrControl::ENABLE.bits() != 0
}

/// Program and enable data comparator `idx`. The comparator requires a
/// word-aligned address; callers mask the low two bits first.
pub fn data_arm(port: &mut dyn DebugPort, idx: usize, addr: u32, ctrl: WcrControl) {
    assert!(idx < DATA_SLOTS);
    port.wcr_set(idx, 0);
    port.wvr_set(idx, addr);
    port.wcr_set(idx, (ctrl | WcrControl::ENABLE).bits());
    port.pipeline_flush();
}

pub fn data_disarm(port: &mut dyn DebugPort, idx: usize) {
    assert!(idx < DATA_SLOTS);
    let val = port.wcr_get(idx) & !WcrControl::ENABLE.bits();
    port.wcr_set(idx, val);
    port.pipeline_flush();
}

pub fn data_is_armed(port: &dyn DebugPort, idx: usize) -> bool {
    assert!(idx < DATA_SLOTS);
    port.wcr_get(idx) & WcrControl::ENABLE.bits() != 0
}

/// Was the current prefetch abort raised by an instruction comparator?
pub fn faulted_on_breakpoint(port: &dyn DebugPort) -> bool {
    if port.ifsr_get() & 0xf != FSR_DEBUG_EVENT {
        return false;
    }
    (port.dscr_get() & DSCR_MOE_MASK) >> DSCR_MOE_SHIFT == MOE_BREAKPOINT
}

/// Was the current data abort raised by a data comparator?
pub fn faulted_on_watchpoint(port: &dyn DebugPort) -> bool {
    if port.dfsr_get() & 0xf != FSR_DEBUG_EVENT {
        return false;
    }
    (port.dscr_get() & DSCR_MOE_MASK) >> DSCR_MOE_SHIFT == MOE_WATCHPOINT
}

/// Was the watchpoint fault caused by a load (vs. a store)?
pub fn watch_access_was_load(port: &dyn DebugPort) -> bool {
    port.dfsr_get() & DFSR_WRITE == 0
}

/// Address of the instruction that triggered the watchpoint. WFAR latches
/// pc + 8.
pub fn watch_fault_pc(port: &dyn DebugPort) -> u32 {
    port.wfar_get().wrapping_sub(8)
}

pub(crate) fn moe_encode(dscr: u32, moe: u32) -> u32 {
    (dscr & !DSCR_MOE_MASK) | (moe << DSCR_MOE_SHIFT)
}
