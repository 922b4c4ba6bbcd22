//! Instruction breakpoint manager. Multiplexes slots 1..INSN_SLOTS of the
//! hardware comparator bank across client requests; slot 0 belongs to the
//! single-step engine and is never assigned here.
//!
//! Slots are one-shot: a breakpoint disarms the instant it fires, and
//! re-arming is an explicit, separate action by the handler or by policy
//! above this layer.

use crate::fault::StepHandler;
use crate::regs::{self, BcrControl, DebugPort};
use crate::{DebugError, DebugResult, SlotKind, INSN_SLOTS, STEP_SLOT};

struct Slot {
    armed: bool,
    addr: u32,
    handler: Option<StepHandler>,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            armed: false,
            addr: 0,
            handler: None,
        }
    }
}

pub struct BreakpointManager {
    slots: [Slot; INSN_SLOTS],
    fired: u64,
}

impl Default for BreakpointManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BreakpointManager {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::default()),
            fired: 0,
        }
    }

    /// Arm a breakpoint on `addr` in the lowest-numbered free slot.
    /// Errors when all slots are in use; an armed breakpoint is never
    /// silently dropped to make room.
    pub fn set(&mut self, port: &mut dyn DebugPort, addr: u32, handler: StepHandler) -> DebugResult<usize> {
        let idx = (STEP_SLOT + 1..INSN_SLOTS)
            .find(|&i| !self.slots[i].armed)
            .ok_or(DebugError::SlotsExhausted(SlotKind::Breakpoint))?;

        regs::insn_arm(port, idx, addr, BcrControl::match_any());
        self.slots[idx] = Slot {
            armed: true,
            addr,
            handler: Some(handler),
        };
        tracing::debug!(addr = format_args!("{addr:#x}"), slot = idx, "breakpoint armed");
        Ok(idx)
    }

    /// Disarm the breakpoint on `addr` and release its slot.
    pub fn remove(&mut self, port: &mut dyn DebugPort, addr: u32) -> DebugResult<()> {
        let idx = self
            .slot_for(addr)
            .ok_or(DebugError::UnknownAddress(SlotKind::Breakpoint, addr))?;
        regs::insn_disarm(port, idx);
        self.slots[idx] = Slot::default();
        tracing::debug!(addr = format_args!("{addr:#x}"), slot = idx, "breakpoint removed");
        Ok(())
    }

    /// One-shot disarm after a fire. Tolerates a handler that already
    /// removed the breakpoint itself (the STEP/CONTINUE dance does).
    pub fn disarm_at(&mut self, port: &mut dyn DebugPort, addr: u32) {
        if let Some(idx) = self.slot_for(addr) {
            regs::insn_disarm(port, idx);
            self.slots[idx] = Slot::default();
        }
    }

    /// Slot index holding `addr`, if armed. Linear scan over the live table.
    pub fn slot_for(&self, addr: u32) -> Option<usize> {
        (STEP_SLOT + 1..INSN_SLOTS).find(|&i| self.slots[i].armed && self.slots[i].addr == addr)
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.slot_for(addr).is_some()
    }

    pub fn handler(&self, idx: usize) -> Option<StepHandler> {
        self.slots[idx].handler.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.armed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Armed addresses by slot, zero for empty slots. Wire-frame order.
    pub fn table(&self) -> [u32; INSN_SLOTS - 1] {
        std::array::from_fn(|i| {
            let s = &self.slots[i + 1];
            if s.armed {
                s.addr
            } else {
                0
            }
        })
    }

    pub(crate) fn note_fired(&mut self) {
        self.fired += 1;
    }

    /// Total breakpoint faults delivered since construction.
    pub fn num_faults(&self) -> u64 {
        self.fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::step_handler;
    use crate::sim::DebugUnit;

    #[test]
    fn claims_lowest_free_slot_and_caps_out() {
        let mut port = DebugUnit::default();
        let mut bp = BreakpointManager::new();
        for i in 0..INSN_SLOTS - 1 {
            let idx = bp.set(&mut port, 0x1000 + i as u32 * 4, step_handler(|_| {})).unwrap();
            assert_eq!(idx, i + 1);
        }
        assert!(matches!(
            bp.set(&mut port, 0x2000, step_handler(|_| {})),
            Err(DebugError::SlotsExhausted(SlotKind::Breakpoint))
        ));
        // the existing table is intact
        assert_eq!(bp.len(), INSN_SLOTS - 1);
        assert_eq!(bp.table()[0], 0x1000);
    }

    #[test]
    fn remove_unknown_is_an_error() {
        let mut port = DebugUnit::default();
        let mut bp = BreakpointManager::new();
        assert!(matches!(
            bp.remove(&mut port, 0xdead_0000),
            Err(DebugError::UnknownAddress(SlotKind::Breakpoint, 0xdead_0000))
        ));
    }

    #[test]
    fn slot_is_reusable_after_remove() {
        let mut port = DebugUnit::default();
        let mut bp = BreakpointManager::new();
        bp.set(&mut port, 0x1000, step_handler(|_| {})).unwrap();
        bp.set(&mut port, 0x1004, step_handler(|_| {})).unwrap();
        bp.remove(&mut port, 0x1000).unwrap();
        assert!(!bp.contains(0x1000));
        let idx = bp.set(&mut port, 0x1008, step_handler(|_| {})).unwrap();
        assert_eq!(idx, 1);
        assert_eq!(bp.table(), [0x1008, 0x1004, 0, 0, 0]);
    }
}
