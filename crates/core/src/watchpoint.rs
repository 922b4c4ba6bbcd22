//! Data watchpoint manager. Same slot lifecycle as breakpoints, but the two
//! data comparators trigger on load/store access rather than instruction
//! fetch, and the fault descriptor records the access direction.

use crate::fault::WatchHandler;
use crate::regs::{self, DebugPort, WcrControl};
use crate::{DebugError, DebugResult, SlotKind, DATA_SLOTS};

struct Slot {
    armed: bool,
    addr: u32,
    handler: Option<WatchHandler>,
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

pub struct WatchpointManager {
    slots: [Slot; DATA_SLOTS],
}

impl Default for WatchpointManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchpointManager {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::default()),
        }
    }

    /// Arm a watchpoint on `addr`. The comparator is word-granular, so the
    /// low two address bits are masked before programming.
    pub fn set(&mut self, port: &mut dyn DebugPort, addr: u32, handler: WatchHandler) -> DebugResult<usize> {
        let addr = addr & !0b11;
        let idx = (0..DATA_SLOTS)
            .find(|&i| !self.slots[i].armed)
            .ok_or(DebugError::SlotsExhausted(SlotKind::Watchpoint))?;

        regs::data_arm(port, idx, addr, WcrControl::watch_any());
        self.slots[idx] = Slot {
            armed: true,
            addr,
            handler: Some(handler),
        };
        tracing::debug!(addr = format_args!("{addr:#x}"), slot = idx, "watchpoint armed");
        Ok(idx)
    }

    pub fn remove(&mut self, port: &mut dyn DebugPort, addr: u32) -> DebugResult<()> {
        let addr = addr & !0b11;
        let idx = self
            .slot_for(addr)
            .ok_or(DebugError::UnknownAddress(SlotKind::Watchpoint, addr))?;
        regs::data_disarm(port, idx);
        self.slots[idx] = Slot::default();
        tracing::debug!(addr = format_args!("{addr:#x}"), slot = idx, "watchpoint removed");
        Ok(())
    }

    /// One-shot disarm of the fired slot.
    pub fn disarm_index(&mut self, port: &mut dyn DebugPort, idx: usize) {
        if self.slots[idx].armed {
            regs::data_disarm(port, idx);
            self.slots[idx] = Slot::default();
        }
    }

    pub fn slot_for(&self, addr: u32) -> Option<usize> {
        let addr = addr & !0b11;
        (0..DATA_SLOTS).find(|&i| self.slots[i].armed && self.slots[i].addr == addr)
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.slot_for(addr).is_some()
    }

    pub fn handler(&self, idx: usize) -> Option<WatchHandler> {
        self.slots[idx].handler.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.armed).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Armed addresses by slot, 0xffff_ffff for empty slots. Wire-frame
    /// order.
    pub fn table(&self) -> [u32; DATA_SLOTS] {
        std::array::from_fn(|i| {
            let s = &self.slots[i];
            if s.armed {
                s.addr
            } else {
                0xffff_ffff
            }
        })
    }
}
