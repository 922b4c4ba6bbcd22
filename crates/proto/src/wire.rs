//! Wire format of the remote session.
//!
//! State flows target -> host as fixed 64-byte frames: a 5-byte tag, a raw
//! sequence byte, two pad bytes, then little-endian 32-bit payload words.
//! Sequence numbers 0..=3 carry registers and the comparator tables;
//! sequence 9 closes a burst. Commands flow host -> target as a length byte
//! followed by an opcode byte and fixed-width 4-byte fields.

use faultline_core::{Regs, DATA_SLOTS, INSN_SLOTS, NUM_REGS};
use std::io::Read;

pub const FRAME_LEN: usize = 64;
pub const TAG: [u8; 5] = *b"_D_S_";
const PAYLOAD_OFF: usize = 8;

/// Words in the frame-2 breakpoint table (slot 0 is not reported).
pub const BP_TABLE_WORDS: usize = INSN_SLOTS - 1;
/// Words in the frame-3 watchpoint table.
pub const WP_TABLE_WORDS: usize = DATA_SLOTS;

const SEQ_REGS_LOW: u8 = 0;
const SEQ_REGS_HIGH: u8 = 1;
const SEQ_BREAKPOINTS: u8 = 2;
const SEQ_WATCHPOINTS: u8 = 3;
const SEQ_END: u8 = 9;

const OP_ADD_BP: u8 = 0;
const OP_REMOVE_BP: u8 = 1;
const OP_STEP: u8 = 2;
const OP_CONTINUE: u8 = 3;
const OP_EXIT: u8 = 4;
const OP_ADD_WP: u8 = 5;
const OP_REMOVE_WP: u8 = 6;
const OP_WRITE_REG: u8 = 7;
const OP_READ_ADDR: u8 = 8;
const OP_WRITE_ADDR: u8 = 9;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("bad frame tag {0:02x?}")]
    BadTag([u8; 5]),
    #[error("unknown frame sequence number {0}")]
    BadSeq(u8),
    #[error("unknown command opcode {0}")]
    UnknownOpcode(u8),
    #[error("short command: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One 64-byte state frame, keyed by its sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFrame {
    /// Seq 0: r0..r12 and sp.
    RegsLow([u32; 14]),
    /// Seq 1: lr, pc, cpsr.
    RegsHigh([u32; 3]),
    /// Seq 2: armed breakpoint addresses, zero for an empty slot.
    Breakpoints([u32; BP_TABLE_WORDS]),
    /// Seq 3: armed watchpoint addresses, `0xffff_ffff` for an empty slot.
    Watchpoints([u32; WP_TABLE_WORDS]),
    /// Seq 9: end of burst, no payload.
    End,
}

fn put_words(buf: &mut [u8; FRAME_LEN], words: &[u32]) {
    for (i, w) in words.iter().enumerate() {
        let off = PAYLOAD_OFF + 4 * i;
        buf[off..off + 4].copy_from_slice(&w.to_le_bytes());
    }
}

fn get_word(buf: &[u8; FRAME_LEN], i: usize) -> u32 {
    let off = PAYLOAD_OFF + 4 * i;
    let bytes: [u8; 4] = buf[off..off + 4].try_into().unwrap_or([0; 4]);
    u32::from_le_bytes(bytes)
}

impl StateFrame {
    pub fn seq(&self) -> u8 {
        match self {
            StateFrame::RegsLow(_) => SEQ_REGS_LOW,
            StateFrame::RegsHigh(_) => SEQ_REGS_HIGH,
            StateFrame::Breakpoints(_) => SEQ_BREAKPOINTS,
            StateFrame::Watchpoints(_) => SEQ_WATCHPOINTS,
            StateFrame::End => SEQ_END,
        }
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        buf[..5].copy_from_slice(&TAG);
        buf[5] = self.seq();
        buf[6] = b'_';
        buf[7] = b'_';
        match self {
            StateFrame::RegsLow(w) => put_words(&mut buf, w),
            StateFrame::RegsHigh(w) => put_words(&mut buf, w),
            StateFrame::Breakpoints(w) => put_words(&mut buf, w),
            StateFrame::Watchpoints(w) => put_words(&mut buf, w),
            StateFrame::End => {}
        }
        buf
    }

    pub fn decode(buf: &[u8; FRAME_LEN]) -> Result<Self, WireError> {
        let tag: [u8; 5] = buf[..5].try_into().unwrap_or([0; 5]);
        if tag != TAG {
            return Err(WireError::BadTag(tag));
        }
        Ok(match buf[5] {
            SEQ_REGS_LOW => StateFrame::RegsLow(std::array::from_fn(|i| get_word(buf, i))),
            SEQ_REGS_HIGH => StateFrame::RegsHigh(std::array::from_fn(|i| get_word(buf, i))),
            SEQ_BREAKPOINTS => StateFrame::Breakpoints(std::array::from_fn(|i| get_word(buf, i))),
            SEQ_WATCHPOINTS => StateFrame::Watchpoints(std::array::from_fn(|i| get_word(buf, i))),
            SEQ_END => StateFrame::End,
            seq => return Err(WireError::BadSeq(seq)),
        })
    }
}

/// The five-frame burst reporting one stop: registers split across two
/// frames, both comparator tables, end sentinel.
pub fn state_burst(
    regs: &Regs,
    breakpoints: [u32; BP_TABLE_WORDS],
    watchpoints: [u32; WP_TABLE_WORDS],
) -> [StateFrame; 5] {
    [
        StateFrame::RegsLow(std::array::from_fn(|i| regs[i])),
        StateFrame::RegsHigh(std::array::from_fn(|i| regs[14 + i])),
        StateFrame::Breakpoints(breakpoints),
        StateFrame::Watchpoints(watchpoints),
        StateFrame::End,
    ]
}

/// Rebuild a register snapshot from the two register frames.
pub fn regs_from_frames(low: &[u32; 14], high: &[u32; 3]) -> Regs {
    let mut regs = Regs::default();
    for i in 0..NUM_REGS {
        regs[i] = if i < 14 { low[i] } else { high[i - 14] };
    }
    regs
}

/// A host command, decoded from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AddBreakpoint(u32),
    RemoveBreakpoint(u32),
    Step,
    Continue,
    Exit,
    AddWatchpoint(u32),
    RemoveWatchpoint(u32),
    WriteRegister { index: u32, value: u32 },
    ReadAddress(u32),
    WriteAddress { addr: u32, value: u32 },
}

fn field(body: &[u8], n: usize) -> Result<u32, WireError> {
    let off = 1 + 4 * n;
    let bytes: [u8; 4] = body
        .get(off..off + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(WireError::Truncated {
            need: off + 4,
            got: body.len(),
        })?;
    Ok(u32::from_le_bytes(bytes))
}

impl Command {
    /// Decode a command body: opcode byte plus its fixed-width fields.
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let op = *body.first().ok_or(WireError::Truncated { need: 1, got: 0 })?;
        Ok(match op {
            OP_ADD_BP => Command::AddBreakpoint(field(body, 0)?),
            OP_REMOVE_BP => Command::RemoveBreakpoint(field(body, 0)?),
            OP_STEP => Command::Step,
            OP_CONTINUE => Command::Continue,
            OP_EXIT => Command::Exit,
            OP_ADD_WP => Command::AddWatchpoint(field(body, 0)?),
            OP_REMOVE_WP => Command::RemoveWatchpoint(field(body, 0)?),
            OP_WRITE_REG => Command::WriteRegister {
                index: field(body, 0)?,
                value: field(body, 1)?,
            },
            OP_READ_ADDR => Command::ReadAddress(field(body, 0)?),
            OP_WRITE_ADDR => Command::WriteAddress {
                addr: field(body, 0)?,
                value: field(body, 1)?,
            },
            op => return Err(WireError::UnknownOpcode(op)),
        })
    }

    /// Encode for transmission, length prefix included. This is the host
    /// half of the contract; the target only decodes.
    pub fn encode(&self) -> Vec<u8> {
        let mut fields: Vec<u32> = Vec::with_capacity(2);
        let op = match *self {
            Command::AddBreakpoint(a) => {
                fields.push(a);
                OP_ADD_BP
            }
            Command::RemoveBreakpoint(a) => {
                fields.push(a);
                OP_REMOVE_BP
            }
            Command::Step => OP_STEP,
            Command::Continue => OP_CONTINUE,
            Command::Exit => OP_EXIT,
            Command::AddWatchpoint(a) => {
                fields.push(a);
                OP_ADD_WP
            }
            Command::RemoveWatchpoint(a) => {
                fields.push(a);
                OP_REMOVE_WP
            }
            Command::WriteRegister { index, value } => {
                fields.extend([index, value]);
                OP_WRITE_REG
            }
            Command::ReadAddress(a) => {
                fields.push(a);
                OP_READ_ADDR
            }
            Command::WriteAddress { addr, value } => {
                fields.extend([addr, value]);
                OP_WRITE_ADDR
            }
        };
        let mut out = Vec::with_capacity(2 + 4 * fields.len());
        out.push(1 + 4 * fields.len() as u8);
        out.push(op);
        for f in &fields {
            out.extend_from_slice(&f.to_le_bytes());
        }
        out
    }
}

/// Block until one length-prefixed command arrives on `chan`.
pub fn read_command<C: Read>(chan: &mut C) -> Result<Command, WireError> {
    let mut len = [0u8; 1];
    chan.read_exact(&mut len)?;
    let len = len[0] as usize;
    if len == 0 {
        return Err(WireError::Truncated { need: 1, got: 0 });
    }
    let mut body = vec![0u8; len];
    chan.read_exact(&mut body)?;
    Command::decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_snapshot_survives_the_two_frame_split() {
        let mut regs = Regs::default();
        for i in 0..NUM_REGS {
            regs[i] = 0x1000_0000 + i as u32;
        }
        let burst = state_burst(&regs, [0; BP_TABLE_WORDS], [0xffff_ffff; WP_TABLE_WORDS]);
        let low = match StateFrame::decode(&burst[0].encode()).unwrap() {
            StateFrame::RegsLow(w) => w,
            other => panic!("expected a low register frame, got {other:?}"),
        };
        let high = match StateFrame::decode(&burst[1].encode()).unwrap() {
            StateFrame::RegsHigh(w) => w,
            other => panic!("expected a high register frame, got {other:?}"),
        };
        assert_eq!(regs_from_frames(&low, &high), regs);
    }

    #[test]
    fn frame_header_layout_is_stable() {
        let buf = StateFrame::End.encode();
        assert_eq!(&buf[..5], b"_D_S_");
        assert_eq!(buf[5], 9);
        assert_eq!(&buf[6..8], b"__");
        assert!(buf[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn bad_tag_and_bad_seq_are_rejected() {
        let mut buf = StateFrame::End.encode();
        buf[5] = 7;
        assert!(matches!(StateFrame::decode(&buf), Err(WireError::BadSeq(7))));
        buf[0] = b'X';
        assert!(matches!(StateFrame::decode(&buf), Err(WireError::BadTag(_))));
    }

    #[test]
    fn commands_round_trip_through_the_length_prefixed_form() {
        let cmds = [
            Command::AddBreakpoint(0x8004),
            Command::RemoveBreakpoint(0x8004),
            Command::Step,
            Command::Continue,
            Command::Exit,
            Command::AddWatchpoint(0x8f00),
            Command::RemoveWatchpoint(0x8f00),
            Command::WriteRegister { index: 2, value: 9 },
            Command::ReadAddress(0x8f00),
            Command::WriteAddress { addr: 0x8f00, value: 0xabcd },
        ];
        for cmd in cmds {
            let bytes = cmd.encode();
            assert_eq!(bytes[0] as usize, bytes.len() - 1);
            let mut chan = std::io::Cursor::new(bytes);
            assert_eq!(read_command(&mut chan).unwrap(), cmd);
        }
    }

    #[test]
    fn unknown_opcode_is_reported_not_fatal() {
        let mut chan = std::io::Cursor::new(vec![1u8, 0xee]);
        assert!(matches!(
            read_command(&mut chan),
            Err(WireError::UnknownOpcode(0xee))
        ));
    }

    #[test]
    fn short_command_body_is_detected() {
        assert!(matches!(
            Command::decode(&[OP_ADD_BP, 1, 2]),
            Err(WireError::Truncated { need: 5, got: 3 })
        ));
    }
}
