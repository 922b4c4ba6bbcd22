//! Register snapshots, transient fault descriptors and the handler roles a
//! comparator slot can carry.

use serde::Serialize;
use std::cell::RefCell;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

pub const NUM_REGS: usize = 17;
pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PC: usize = 15;
pub const REG_CPSR: usize = 16;

/// CPSR word for a freshly built user-mode context.
pub const CPSR_USER: u32 = 0x10;

/// The full register file captured at the moment of a fault: r0..r12, sp,
/// lr, pc, cpsr. The fault path copies this out of the target before any
/// handler runs; handler mutation of the copy is written back on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Regs(pub [u32; NUM_REGS]);

impl Regs {
    pub fn pc(&self) -> u32 {
        self.0[REG_PC]
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.0[REG_PC] = pc;
    }
}

impl Default for Regs {
    fn default() -> Self {
        Regs([0; NUM_REGS])
    }
}

impl Index<usize> for Regs {
    type Output = u32;
    fn index(&self, i: usize) -> &u32 {
        &self.0[i]
    }
}

impl IndexMut<usize> for Regs {
    fn index_mut(&mut self, i: usize) -> &mut u32 {
        &mut self.0[i]
    }
}

/// Delivered once per breakpoint or mismatch-step fault, then discarded.
pub struct StepFault<'a> {
    /// Address of the instruction that faulted.
    pub pc: u32,
    /// Live register copy; mutations are honored on resume.
    pub regs: &'a mut Regs,
}

/// Delivered once per watchpoint fault.
pub struct WatchFault<'a> {
    /// Address of the instruction that performed the access.
    pub pc: u32,
    /// The watched data address that was touched.
    pub addr: u32,
    /// True when the access was a load, false for a store.
    pub is_load: bool,
    pub regs: &'a mut Regs,
}

/// The closed set of roles a slot handler can take. Faults route either to a
/// plain client callback or to the attached remote session; there is no
/// null-handler state to check for at fault time.
///
/// Callbacks are `Rc<RefCell<..>>` rather than `Arc<Mutex<..>>`: fault
/// handling is strictly sequential and non-reentrant (the hardware masks
/// same-class exceptions until the current one is resolved), so the slot
/// tables are single-threaded by construction.
pub enum HandlerRole<F: ?Sized> {
    Client(Rc<RefCell<F>>),
    Session,
}

impl<F: ?Sized> Clone for HandlerRole<F> {
    fn clone(&self) -> Self {
        match self {
            HandlerRole::Client(f) => HandlerRole::Client(Rc::clone(f)),
            HandlerRole::Session => HandlerRole::Session,
        }
    }
}

pub type StepHandler = HandlerRole<dyn FnMut(&mut StepFault<'_>)>;
pub type WatchHandler = HandlerRole<dyn FnMut(&mut WatchFault<'_>)>;

/// Wrap a closure as a breakpoint/step handler role.
pub fn step_handler(f: impl FnMut(&mut StepFault<'_>) + 'static) -> StepHandler {
    HandlerRole::Client(Rc::new(RefCell::new(f)))
}

/// Wrap a closure as a watchpoint handler role.
pub fn watch_handler(f: impl FnMut(&mut WatchFault<'_>) + 'static) -> WatchHandler {
    HandlerRole::Client(Rc::new(RefCell::new(f)))
}
