//! Target side of the remote session. Installed as the stop sink, it
//! reports each stop as a five-frame state burst, then blocks applying
//! host commands until one of them resumes the target.

use crate::wire::{self, Command, WireError};
use faultline_core::{
    DebugError, DebugResult, HandlerRole, Regs, StopCtx, StopEvent, StopSink, NUM_REGS,
};
use std::io::{Read, Write};

/// Byte channel to the host. Any blocking reader/writer pair will do; the
/// server uses a TCP stream, tests use an in-memory script.
pub trait Channel: Read + Write {}
impl<T: Read + Write> Channel for T {}

pub struct DebugSession<C> {
    chan: C,
    /// Continue mode: skip reporting until a breakpoint is hit.
    free_run: bool,
    /// Breakpoint disarmed so the target could step off of it; re-armed at
    /// the next stop that has moved past the address.
    reinstate: Option<u32>,
    /// The host ended the session; stops are no longer reported.
    exited: bool,
}

impl<C: Channel> DebugSession<C> {
    pub fn new(chan: C) -> Self {
        Self {
            chan,
            free_run: false,
            reinstate: None,
            exited: false,
        }
    }

    fn send_state(&mut self, ctx: &StopCtx<'_>, regs: &Regs) -> DebugResult<()> {
        let burst = wire::state_burst(regs, ctx.breakpoints.table(), ctx.watchpoints.table());
        for frame in burst {
            self.chan.write_all(&frame.encode())?;
        }
        self.chan.flush()?;
        Ok(())
    }

    /// Arm the machinery that delivers the next stop: remember a breakpoint
    /// parked under the pc for reinstatement, and consume the current
    /// instruction so stepping fires on the one after it.
    fn prepare_resume(&mut self, ctx: &mut StopCtx<'_>, pc: u32) {
        if ctx.breakpoints.contains(pc) {
            self.reinstate = Some(pc);
        }
        if !ctx.step.is_enabled() {
            ctx.step.enable(&mut ctx.machine.dbg);
        }
        ctx.step.advance_to(&mut ctx.machine.dbg, pc);
    }

    fn command_loop(
        &mut self,
        ctx: &mut StopCtx<'_>,
        pc: u32,
        regs: &mut Regs,
    ) -> DebugResult<()> {
        loop {
            let cmd = match wire::read_command(&mut self.chan) {
                Ok(cmd) => cmd,
                Err(WireError::Io(e)) => return Err(DebugError::Transport(e)),
                // protocol desync is the host's problem to recover from
                Err(err) => {
                    tracing::warn!(%err, "ignoring malformed command");
                    continue;
                }
            };
            tracing::debug!(?cmd, "host command");
            match cmd {
                Command::Step => {
                    self.prepare_resume(ctx, pc);
                    return Ok(());
                }
                Command::Continue => {
                    self.free_run = true;
                    self.prepare_resume(ctx, pc);
                    return Ok(());
                }
                Command::Exit => {
                    self.exited = true;
                    if ctx.step.is_enabled() {
                        ctx.step.disable(&mut ctx.machine.dbg);
                    }
                    tracing::info!("host ended the session, target released");
                    return Ok(());
                }
                Command::AddBreakpoint(addr) => {
                    ctx.breakpoints
                        .set(&mut ctx.machine.dbg, addr, HandlerRole::Session)?;
                }
                Command::RemoveBreakpoint(addr) => {
                    if let Err(err) = ctx.breakpoints.remove(&mut ctx.machine.dbg, addr) {
                        tracing::warn!(%err, "host removed a breakpoint we do not have");
                    }
                }
                Command::AddWatchpoint(addr) => {
                    ctx.watchpoints
                        .set(&mut ctx.machine.dbg, addr, HandlerRole::Session)?;
                }
                Command::RemoveWatchpoint(addr) => {
                    if let Err(err) = ctx.watchpoints.remove(&mut ctx.machine.dbg, addr) {
                        tracing::warn!(%err, "host removed a watchpoint we do not have");
                    }
                }
                Command::WriteRegister { index, value } => {
                    if (index as usize) < NUM_REGS {
                        regs[index as usize] = value;
                    } else {
                        tracing::warn!(index, "register index out of range");
                    }
                }
                Command::ReadAddress(addr) => match ctx.machine.read_u32(addr) {
                    Ok(value) => tracing::info!(
                        addr = format_args!("{addr:#x}"),
                        value = format_args!("{value:#x}"),
                        "memory read for host"
                    ),
                    Err(err) => tracing::warn!(%err, "host read of an unmapped address"),
                },
                Command::WriteAddress { addr, value } => {
                    match ctx.machine.write_u32(addr, value) {
                        Ok(()) => tracing::info!(
                            addr = format_args!("{addr:#x}"),
                            value = format_args!("{value:#x}"),
                            "memory write for host"
                        ),
                        Err(err) => tracing::warn!(%err, "host write to an unmapped address"),
                    }
                }
            }
        }
    }
}

impl<C: Channel> StopSink for DebugSession<C> {
    fn on_stop(
        &mut self,
        ctx: &mut StopCtx<'_>,
        event: StopEvent,
        pc: u32,
        regs: &mut Regs,
    ) -> DebugResult<()> {
        if self.exited {
            return Ok(());
        }

        if let Some(addr) = self.reinstate.take() {
            if addr == pc {
                // still parked on it, hold until the next stop
                self.reinstate = Some(addr);
            } else {
                ctx.breakpoints
                    .set(&mut ctx.machine.dbg, addr, HandlerRole::Session)?;
            }
        }

        let on_breakpoint =
            matches!(event, StopEvent::Breakpoint) || ctx.breakpoints.contains(pc);
        if self.free_run && !on_breakpoint {
            return Ok(());
        }
        self.free_run = false;

        if let StopEvent::Watch { addr, is_load } = event {
            tracing::info!(
                pc = format_args!("{pc:#x}"),
                addr = format_args!("{addr:#x}"),
                is_load,
                "watchpoint stop"
            );
        }

        self.send_state(ctx, regs)?;
        self.command_loop(ctx, pc, regs)
    }
}
