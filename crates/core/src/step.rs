//! Single-step engine. Runs comparator slot 0 in mismatch mode, programmed
//! with the current pc: the one instruction about to execute runs "for
//! free", and every other fetch faults. Re-arming on the new pc after each
//! fault steps the whole program one instruction at a time with no software
//! traps in the target.

use crate::fault::StepHandler;
use crate::regs::{self, BcrControl, DebugPort};
use crate::STEP_SLOT;

pub struct StepEngine {
    enabled: bool,
    handler: Option<StepHandler>,
}

impl Default for StepEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StepEngine {
    pub fn new() -> Self {
        Self {
            enabled: false,
            handler: None,
        }
    }

    /// Register the handler invoked on every mismatch fault.
    pub fn install_handler(&mut self, handler: StepHandler) {
        self.handler = Some(handler);
    }

    pub fn handler(&self) -> Option<StepHandler> {
        self.handler.clone()
    }

    /// Arm slot 0 in mismatch mode against address 0, which is assumed
    /// never executed, so the very next instruction faults.
    pub fn enable(&mut self, port: &mut dyn DebugPort) {
        self.enabled = true;
        regs::unit_enable(port);
        self.advance_to(port, 0);
    }

    /// Clear the slot-0 enable bit and flush. Idempotent. Must run before
    /// control leaves the stepped context: the hardware behavior of a
    /// mismatch comparator across privileged transitions is undefined.
    pub fn disable(&mut self, port: &mut dyn DebugPort) {
        self.enabled = false;
        regs::insn_disarm(port, STEP_SLOT);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Consume the instruction at `pc` and re-arm for the next one.
    pub fn advance_to(&mut self, port: &mut dyn DebugPort, pc: u32) {
        debug_assert!(self.enabled);
        regs::insn_arm(port, STEP_SLOT, pc, BcrControl::mismatch_any());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::DebugUnit;

    #[test]
    fn disable_is_idempotent() {
        let mut port = DebugUnit::default();
        let mut step = StepEngine::new();
        step.enable(&mut port);
        assert!(step.is_enabled());
        assert!(regs::insn_is_armed(&port, STEP_SLOT));
        step.disable(&mut port);
        step.disable(&mut port);
        assert!(!step.is_enabled());
        assert!(!regs::insn_is_armed(&port, STEP_SLOT));
    }

    #[test]
    fn advance_reprograms_slot_zero_only() {
        let mut port = DebugUnit::default();
        let mut step = StepEngine::new();
        step.enable(&mut port);
        step.advance_to(&mut port, 0x8040);
        assert_eq!(port.bvr_get(STEP_SLOT), 0x8040);
        assert!(port.bcr_get(STEP_SLOT) & BcrControl::MISMATCH.bits() != 0);
        for i in 1..crate::INSN_SLOTS {
            assert!(!regs::insn_is_armed(&port, i));
        }
    }
}
