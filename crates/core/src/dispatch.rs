//! Fault dispatcher. Owns the target machine, the comparator managers and
//! the step engine; classifies every debug exception and routes it to the
//! right handler, then resumes the (possibly mutated) faulted context.
//!
//! Fault handling is sequential and non-reentrant: the hardware masks
//! same-class exceptions while one is in flight, and nothing here re-enables
//! them before the current fault is fully resolved. The slot tables are
//! therefore accessed without locks.

use crate::breakpoint::BreakpointManager;
use crate::fault::{HandlerRole, Regs, StepFault, WatchFault, CPSR_USER, REG_CPSR, REG_LR, REG_PC, REG_SP};
use crate::regs;
use crate::sim::{Machine, StepOutcome, TargetFault};
use crate::step::StepEngine;
use crate::watchpoint::WatchpointManager;
use crate::{DebugError, DebugResult, SlotKind, STEP_EXIT};

/// Why `run` handed control back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The target executed a halt instruction.
    Halted,
    /// The step budget ran out before the target stopped.
    BudgetExhausted,
}

/// What kind of stop a [`StopSink`] is being shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    Breakpoint,
    Step,
    Watch { addr: u32, is_load: bool },
}

/// Everything a session needs while the target is stopped: the live slot
/// tables and the machine (comparator port + target memory). The register
/// copy is passed alongside; mutations to it are honored on resume.
pub struct StopCtx<'a> {
    pub breakpoints: &'a mut BreakpointManager,
    pub watchpoints: &'a mut WatchpointManager,
    pub step: &'a mut StepEngine,
    pub machine: &'a mut Machine,
}

/// Receiver for stops routed to the remote session. Called from inside the
/// fault path; returning resumes the target.
pub trait StopSink {
    fn on_stop(
        &mut self,
        ctx: &mut StopCtx<'_>,
        event: StopEvent,
        pc: u32,
        regs: &mut Regs,
    ) -> DebugResult<()>;
}

enum Dispatched {
    Resumed,
    StepExit,
}

pub struct Debugger {
    pub machine: Machine,
    pub breakpoints: BreakpointManager,
    pub watchpoints: WatchpointManager,
    pub step: StepEngine,
    sink: Option<Box<dyn StopSink>>,
    installed: bool,
}

impl Debugger {
    pub fn new(machine: Machine) -> Self {
        Self {
            machine,
            breakpoints: BreakpointManager::new(),
            watchpoints: WatchpointManager::new(),
            step: StepEngine::new(),
            sink: None,
            installed: false,
        }
    }

    /// Take the prefetch-abort and data-abort vectors and enable the debug
    /// unit. Idempotent; faults delivered before this is called are fatal.
    pub fn install(&mut self) {
        if self.installed {
            return;
        }
        regs::unit_enable(&mut self.machine.dbg);
        self.installed = true;
        tracing::info!("abort vectors installed, debug unit enabled");
    }

    pub fn attach_sink(&mut self, sink: Box<dyn StopSink>) {
        self.sink = Some(sink);
    }

    pub fn add_breakpoint(&mut self, addr: u32, handler: crate::StepHandler) -> DebugResult<()> {
        self.breakpoints.set(&mut self.machine.dbg, addr, handler)?;
        Ok(())
    }

    pub fn remove_breakpoint(&mut self, addr: u32) -> DebugResult<()> {
        self.breakpoints.remove(&mut self.machine.dbg, addr)
    }

    pub fn add_watchpoint(&mut self, addr: u32, handler: crate::WatchHandler) -> DebugResult<()> {
        self.watchpoints.set(&mut self.machine.dbg, addr, handler)?;
        Ok(())
    }

    pub fn remove_watchpoint(&mut self, addr: u32) -> DebugResult<()> {
        self.watchpoints.remove(&mut self.machine.dbg, addr)
    }

    /// Drive the target until it halts or the optional step budget runs
    /// out. Debug faults are dispatched in-line; a classification failure
    /// aborts the run.
    pub fn run(&mut self, budget: Option<u64>) -> DebugResult<StopReason> {
        if !self.installed {
            return Err(DebugError::NotInstalled);
        }
        let mut steps: u64 = 0;
        loop {
            if let Some(max) = budget {
                if steps >= max {
                    return Ok(StopReason::BudgetExhausted);
                }
            }
            match self.machine.step_insn()? {
                StepOutcome::Executed => {}
                StepOutcome::Halted => return Ok(StopReason::Halted),
                StepOutcome::Fault(fault) => match self.dispatch(fault)? {
                    Dispatched::Resumed => {}
                    // nothing outside step_run builds a context that
                    // returns to the sentinel
                    Dispatched::StepExit => return Err(DebugError::UnclaimedFault(STEP_EXIT)),
                },
            }
            steps += 1;
        }
    }

    /// Run `entry` with `arg` in r0 under whole-program single-stepping.
    ///
    /// Builds a fresh user-mode context on the scratch stack with lr set to
    /// the exit sentinel, arms the mismatch comparator and context-switches
    /// in. Blocks until the stepped program returns; there is no timeout.
    /// Returns the stepped context's r0.
    pub fn step_run(&mut self, entry: u32, arg: u32) -> DebugResult<u32> {
        if !self.installed {
            return Err(DebugError::NotInstalled);
        }
        let start_regs = self.machine.regs;

        let mut r = Regs::default();
        r[0] = arg;
        r[REG_SP] = self.machine.scratch_stack_top();
        r[REG_LR] = STEP_EXIT;
        r[REG_PC] = entry;
        r[REG_CPSR] = CPSR_USER;
        self.machine.regs = r;

        self.step.enable(&mut self.machine.dbg);
        tracing::debug!(entry = format_args!("{entry:#x}"), "entering stepped context");

        let ret = loop {
            match self.machine.step_insn()? {
                StepOutcome::Executed => {}
                StepOutcome::Halted => break self.machine.regs[0],
                StepOutcome::Fault(fault) => match self.dispatch(fault)? {
                    Dispatched::Resumed => {}
                    Dispatched::StepExit => break self.machine.regs[0],
                },
            }
        };

        // never leave mismatch stepping armed past the stepped context
        if self.step.is_enabled() {
            self.step.disable(&mut self.machine.dbg);
        }
        self.machine.regs = start_regs;
        tracing::debug!(ret = format_args!("{ret:#x}"), "stepped context done, resuming caller");
        Ok(ret)
    }

    fn dispatch(&mut self, fault: TargetFault) -> DebugResult<Dispatched> {
        if !self.installed {
            return Err(DebugError::NotInstalled);
        }
        match fault {
            TargetFault::Prefetch { pc } => self.on_prefetch(pc),
            TargetFault::Data { pc, addr, is_load } => {
                self.on_data_abort(pc, addr, is_load)?;
                Ok(Dispatched::Resumed)
            }
        }
    }

    /// Prefetch-abort classification, in order: step-exit sentinel, fault
    /// status sanity, live breakpoint table, mismatch step.
    fn on_prefetch(&mut self, pc: u32) -> DebugResult<Dispatched> {
        if pc == STEP_EXIT {
            tracing::debug!("stepped context reached the exit sentinel");
            return Ok(Dispatched::StepExit);
        }
        if !regs::faulted_on_breakpoint(&self.machine.dbg) {
            return Err(DebugError::Misclassified(SlotKind::Breakpoint));
        }

        let mut regs = self.machine.regs;

        if let Some(idx) = self.breakpoints.slot_for(pc) {
            tracing::debug!(pc = format_args!("{pc:#x}"), slot = idx, "breakpoint fault");
            let handler = self
                .breakpoints
                .handler(idx)
                .ok_or(DebugError::UnclaimedFault(pc))?;
            match handler {
                HandlerRole::Client(cb) => {
                    let mut fault = StepFault { pc, regs: &mut regs };
                    (cb.borrow_mut())(&mut fault);
                }
                HandlerRole::Session => {
                    let Debugger {
                        machine,
                        breakpoints,
                        watchpoints,
                        step,
                        sink,
                        ..
                    } = self;
                    let sink = sink.as_mut().ok_or(DebugError::NoSession)?;
                    let mut ctx = StopCtx {
                        breakpoints,
                        watchpoints,
                        step,
                        machine,
                    };
                    sink.on_stop(&mut ctx, StopEvent::Breakpoint, pc, &mut regs)?;
                }
            }
            self.breakpoints.note_fired();
            // one-shot: the fired slot never survives its own fault
            self.breakpoints.disarm_at(&mut self.machine.dbg, pc);
        } else if self.step.is_enabled() {
            let handler = self.step.handler().ok_or(DebugError::UnclaimedFault(pc))?;
            match handler {
                HandlerRole::Client(cb) => {
                    let mut fault = StepFault { pc, regs: &mut regs };
                    (cb.borrow_mut())(&mut fault);
                }
                HandlerRole::Session => {
                    let Debugger {
                        machine,
                        breakpoints,
                        watchpoints,
                        step,
                        sink,
                        ..
                    } = self;
                    let sink = sink.as_mut().ok_or(DebugError::NoSession)?;
                    let mut ctx = StopCtx {
                        breakpoints,
                        watchpoints,
                        step,
                        machine,
                    };
                    sink.on_stop(&mut ctx, StopEvent::Step, pc, &mut regs)?;
                }
            }
            // re-arm on the new pc so the engine keeps stepping across
            // calls and returns; honors a handler that rewrote pc
            if self.step.is_enabled() {
                let next = regs[REG_PC];
                self.step.advance_to(&mut self.machine.dbg, next);
            }
        } else {
            return Err(DebugError::UnclaimedFault(pc));
        }

        self.machine.regs = regs;
        Ok(Dispatched::Resumed)
    }

    /// Data aborts can only be watchpoint faults while the debug unit owns
    /// the vector; anything else is a configuration bug.
    fn on_data_abort(&mut self, pc: u32, addr: u32, is_load: bool) -> DebugResult<()> {
        if !regs::faulted_on_watchpoint(&self.machine.dbg) {
            return Err(DebugError::Misclassified(SlotKind::Watchpoint));
        }
        let fault_pc = regs::watch_fault_pc(&self.machine.dbg);
        debug_assert_eq!(fault_pc, pc);
        debug_assert_eq!(regs::watch_access_was_load(&self.machine.dbg), is_load);

        let idx = self
            .watchpoints
            .slot_for(addr)
            .ok_or(DebugError::UnclaimedFault(addr))?;
        tracing::debug!(
            pc = format_args!("{fault_pc:#x}"),
            addr = format_args!("{addr:#x}"),
            is_load,
            slot = idx,
            "watchpoint fault"
        );
        let handler = self
            .watchpoints
            .handler(idx)
            .ok_or(DebugError::UnclaimedFault(addr))?;

        let mut regs = self.machine.regs;
        match handler {
            HandlerRole::Client(cb) => {
                let mut fault = WatchFault {
                    pc: fault_pc,
                    addr,
                    is_load,
                    regs: &mut regs,
                };
                (cb.borrow_mut())(&mut fault);
            }
            HandlerRole::Session => {
                let Debugger {
                    machine,
                    breakpoints,
                    watchpoints,
                    step,
                    sink,
                    ..
                } = self;
                let sink = sink.as_mut().ok_or(DebugError::NoSession)?;
                let mut ctx = StopCtx {
                    breakpoints,
                    watchpoints,
                    step,
                    machine,
                };
                sink.on_stop(&mut ctx, StopEvent::Watch { addr, is_load }, fault_pc, &mut regs)?;
            }
        }
        // one-shot, then re-execute the access unimpeded
        self.watchpoints.disarm_index(&mut self.machine.dbg, idx);
        self.machine.regs = regs;
        Ok(())
    }
}
