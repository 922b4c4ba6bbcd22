//! Session scenarios over an in-memory channel: the host side is a
//! pre-scripted byte stream, the target runs for real underneath.

use std::cell::RefCell;
use std::io::{Cursor, Read, Write};
use std::rc::Rc;

use faultline_core::sim::asm;
use faultline_core::{DebugError, Debugger, Machine, StopReason, REG_PC, REG_SP};

use crate::wire::{Command, StateFrame, FRAME_LEN};
use crate::attach_session;

/// Reads from a canned script, collects everything the target transmits.
struct ScriptChannel {
    input: Cursor<Vec<u8>>,
    output: Rc<RefCell<Vec<u8>>>,
}

impl ScriptChannel {
    fn new(commands: &[Command]) -> (Self, Rc<RefCell<Vec<u8>>>) {
        let mut script = Vec::new();
        for cmd in commands {
            script.extend_from_slice(&cmd.encode());
        }
        Self::raw(script)
    }

    /// Script from raw bytes, for exercising the target against input no
    /// well-behaved host would send.
    fn raw(script: Vec<u8>) -> (Self, Rc<RefCell<Vec<u8>>>) {
        let output = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                input: Cursor::new(script),
                output: output.clone(),
            },
            output,
        )
    }
}

impl Read for ScriptChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn debugger_with(words: &[u32]) -> Debugger {
    let mut m = Machine::new(0x1000, 0x8000);
    m.load(0x8000, words).unwrap();
    m.regs[REG_PC] = 0x8000;
    m.regs[REG_SP] = m.scratch_stack_top();
    Debugger::new(m)
}

/// Split the transmitted bytes into decoded five-frame bursts.
fn bursts(bytes: &[u8]) -> Vec<[StateFrame; 5]> {
    assert_eq!(bytes.len() % (5 * FRAME_LEN), 0);
    bytes
        .chunks(5 * FRAME_LEN)
        .map(|burst| {
            let frames: Vec<StateFrame> = burst
                .chunks(FRAME_LEN)
                .map(|c| StateFrame::decode(c.try_into().unwrap()).unwrap())
                .collect();
            let out: [StateFrame; 5] = frames.try_into().unwrap();
            assert_eq!(out[4], StateFrame::End);
            out
        })
        .collect()
}

fn burst_pc(burst: &[StateFrame; 5]) -> u32 {
    match burst[1] {
        StateFrame::RegsHigh(w) => w[1],
        other => panic!("frame 1 should be the high registers, got {other:?}"),
    }
}

fn burst_reg(burst: &[StateFrame; 5], n: usize) -> u32 {
    match burst[0] {
        StateFrame::RegsLow(w) => w[n],
        other => panic!("frame 0 should be the low registers, got {other:?}"),
    }
}

fn burst_bp_table(burst: &[StateFrame; 5]) -> [u32; 5] {
    match burst[2] {
        StateFrame::Breakpoints(w) => w,
        other => panic!("frame 2 should be the breakpoint table, got {other:?}"),
    }
}

#[test]
fn step_and_continue_drive_the_target_through_a_loop() {
    // 0x8000: movi r1, 2
    // 0x8004: addi r1, r1, -1
    // 0x8008: bnz r1, -1
    // 0x800c: halt
    let mut d = debugger_with(&[
        asm::movi(1, 2),
        asm::addi(1, 1, -1),
        asm::bnz(1, -1),
        asm::halt(),
    ]);

    let (chan, output) = ScriptChannel::new(&[
        // initial stop at 0x8000
        Command::AddBreakpoint(0x8004),
        Command::Continue,
        // breakpoint stop, first loop trip
        Command::Step,
        // step stop one instruction later
        Command::Continue,
        // breakpoint stop, second loop trip
        Command::Exit,
    ]);
    attach_session(&mut d, chan);

    assert_eq!(d.run(None).unwrap(), StopReason::Halted);
    assert_eq!(d.machine.regs[1], 0);
    assert_eq!(d.breakpoints.num_faults(), 2);

    let out = output.borrow();
    let bursts = bursts(&out);
    assert_eq!(bursts.len(), 4);

    // initial stop: nothing armed yet, nothing executed yet
    assert_eq!(burst_pc(&bursts[0]), 0x8000);
    assert_eq!(burst_bp_table(&bursts[0]), [0; 5]);

    // first breakpoint stop: addi not yet executed
    assert_eq!(burst_pc(&bursts[1]), 0x8004);
    assert_eq!(burst_reg(&bursts[1], 1), 2);
    assert_eq!(burst_bp_table(&bursts[1]), [0x8004, 0, 0, 0, 0]);

    // single step landed past the disarmed breakpoint, which is back in
    // the table by the time the stop is reported
    assert_eq!(burst_pc(&bursts[2]), 0x8008);
    assert_eq!(burst_reg(&bursts[2], 1), 1);
    assert_eq!(burst_bp_table(&bursts[2]), [0x8004, 0, 0, 0, 0]);

    // the reinstated breakpoint caught the second trip
    assert_eq!(burst_pc(&bursts[3]), 0x8004);
    assert_eq!(burst_reg(&bursts[3], 1), 1);
}

#[test]
fn memory_and_register_commands_apply_before_resume() {
    let mut d = debugger_with(&[asm::movi(0, 5), asm::halt()]);

    let (chan, output) = ScriptChannel::new(&[
        Command::WriteAddress { addr: 0x8f00, value: 0xabcd },
        Command::ReadAddress(0x8f00),
        Command::WriteRegister { index: 2, value: 9 },
        Command::Exit,
    ]);
    attach_session(&mut d, chan);

    assert_eq!(d.run(None).unwrap(), StopReason::Halted);
    assert_eq!(d.machine.read_u32(0x8f00).unwrap(), 0xabcd);
    // the mutated register copy was honored on resume
    assert_eq!(d.machine.regs[2], 9);
    assert_eq!(d.machine.regs[0], 5);

    // one burst for the initial stop, none after the exit
    assert_eq!(output.borrow().len(), 5 * FRAME_LEN);
}

#[test]
fn watchpoint_stop_is_reported_with_its_table() {
    // 0x8000: movi r1, 0x8f00
    // 0x8004: movi r0, 42
    // 0x8008: str r0, [r1]
    // 0x800c: halt
    let mut d = debugger_with(&[
        asm::movi(1, 0x8f00),
        asm::movi(0, 42),
        asm::str(0, 1, 0),
        asm::halt(),
    ]);

    let (chan, output) = ScriptChannel::new(&[
        // initial stop at 0x8000
        Command::AddWatchpoint(0x8f00),
        Command::Step,
        // step stops at 0x8004 and 0x8008
        Command::Step,
        Command::Step,
        // watchpoint stop on the store, same pc
        Command::Exit,
    ]);
    attach_session(&mut d, chan);

    assert_eq!(d.run(None).unwrap(), StopReason::Halted);
    assert_eq!(d.machine.read_u32(0x8f00).unwrap(), 42);

    let out = output.borrow();
    let bursts = bursts(&out);
    assert_eq!(bursts.len(), 4);
    assert_eq!(burst_pc(&bursts[2]), 0x8008);
    assert_eq!(burst_pc(&bursts[3]), 0x8008);
    match bursts[3][3] {
        StateFrame::Watchpoints(w) => assert_eq!(w, [0x8f00, 0xffff_ffff]),
        other => panic!("frame 3 should be the watchpoint table, got {other:?}"),
    }
}

#[test]
fn free_run_skips_stops_that_are_not_breakpoints() {
    let mut d = debugger_with(&[
        asm::movi(1, 0x8f00),
        asm::movi(0, 42),
        asm::str(0, 1, 0),
        asm::halt(),
    ]);

    let (chan, output) = ScriptChannel::new(&[
        Command::AddWatchpoint(0x8f00),
        Command::Continue,
    ]);
    attach_session(&mut d, chan);

    // the watch stop is logged but not reported, so the target runs to
    // the halt without consuming further commands
    assert_eq!(d.run(None).unwrap(), StopReason::Halted);
    assert_eq!(d.machine.read_u32(0x8f00).unwrap(), 42);
    assert_eq!(output.borrow().len(), 5 * FRAME_LEN);
}

#[test]
fn unknown_opcode_is_skipped_and_the_session_stays_alive() {
    let mut d = debugger_with(&[asm::movi(0, 5), asm::halt()]);

    // a garbage opcode, then a well-formed exit
    let mut script = vec![1u8, 0xee];
    script.extend_from_slice(&Command::Exit.encode());
    let (chan, output) = ScriptChannel::raw(script);
    attach_session(&mut d, chan);

    assert_eq!(d.run(None).unwrap(), StopReason::Halted);
    assert_eq!(d.machine.regs[0], 5);
    // the initial stop was reported once; the bad command changed nothing
    assert_eq!(output.borrow().len(), 5 * FRAME_LEN);
}

#[test]
fn host_hangup_surfaces_as_a_transport_error() {
    let mut d = debugger_with(&[asm::b(0)]);
    let (chan, _output) = ScriptChannel::new(&[]);
    attach_session(&mut d, chan);
    assert!(matches!(d.run(None), Err(DebugError::Transport(_))));
}
