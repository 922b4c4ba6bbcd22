pub mod breakpoint;
pub mod dispatch;
pub mod fault;
pub mod regs;
pub mod sim;
pub mod step;
pub mod watchpoint;


use std::fmt;

/// Number of hardware instruction-comparator slots. Slot 0 is reserved for
/// the single-step engine; breakpoints use slots 1..INSN_SLOTS.
pub const INSN_SLOTS: usize = 6;

/// Number of hardware data-comparator (watchpoint) slots.
pub const DATA_SLOTS: usize = 2;

/// The comparator slot the single-step engine runs in mismatch mode.
pub const STEP_SLOT: usize = 0;

/// Link-register sentinel for stepped contexts. Never mapped: a return to
/// this address raises a prefetch fault that the dispatcher recognizes as
/// "the stepped program is done".
pub const STEP_EXIT: u32 = 0xffff_ff00;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Breakpoint,
    Watchpoint,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Breakpoint => f.write_str("breakpoint"),
            SlotKind::Watchpoint => f.write_str("watchpoint"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    #[error("all {0} comparator slots are in use")]
    SlotsExhausted(SlotKind),
    #[error("no {0} armed at {1:#x}")]
    UnknownAddress(SlotKind, u32),
    #[error("debug fault at {0:#x} matches no armed comparator")]
    UnclaimedFault(u32),
    #[error("fault status does not identify a {0} fault")]
    Misclassified(SlotKind),
    #[error("fault delivered before the abort vectors were installed")]
    NotInstalled,
    #[error("stop routed to the remote session, but none is attached")]
    NoSession,
    #[error("memory access violation at {0:#x}")]
    MemoryViolation(u32),
    #[error("instruction decode error at {0:#x}")]
    DecodeError(u32),
    #[error("session transport: {0}")]
    Transport(#[from] std::io::Error),
}

pub type DebugResult<T> = Result<T, DebugError>;

pub use dispatch::{Debugger, StopCtx, StopEvent, StopReason, StopSink};
pub use fault::{
    step_handler, watch_handler, HandlerRole, Regs, StepFault, StepHandler, WatchFault,
    WatchHandler, CPSR_USER, NUM_REGS, REG_CPSR, REG_LR, REG_PC, REG_SP,
};
pub use regs::DebugPort;
pub use sim::{Machine, StepOutcome, TargetFault};
