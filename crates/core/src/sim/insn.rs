//! Fixed-width 32-bit instruction set of the simulated target.
//!
//! Layout: bits 31:24 opcode, 23:20 rd, 19:16 rs1, 15:12 rs2 (register
//! forms) or bits 15:0 a 16-bit immediate. Branch offsets are signed word
//! counts relative to the branch itself. Registers 0..=12 are general,
//! 13 = sp, 14 = lr; a move to register 15 writes pc.

const OP_HALT: u8 = 0x00;
const OP_NOP: u8 = 0x01;
const OP_MOVI: u8 = 0x02;
const OP_ADDI: u8 = 0x03;
const OP_ADD: u8 = 0x04;
const OP_SUB: u8 = 0x05;
const OP_LDR: u8 = 0x06;
const OP_STR: u8 = 0x07;
const OP_B: u8 = 0x08;
const OP_BNZ: u8 = 0x09;
const OP_BL: u8 = 0x0a;
const OP_RET: u8 = 0x0b;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insn {
    Halt,
    Nop,
    Movi { rd: u8, imm: u16 },
    Addi { rd: u8, rs: u8, imm: i16 },
    Add { rd: u8, rs1: u8, rs2: u8 },
    Sub { rd: u8, rs1: u8, rs2: u8 },
    Ldr { rd: u8, rs: u8, off: i16 },
    Str { rd: u8, rs: u8, off: i16 },
    B { off: i16 },
    Bnz { rs: u8, off: i16 },
    Bl { off: i16 },
    Ret,
}

pub fn decode(word: u32) -> Option<Insn> {
    let op = (word >> 24) as u8;
    let rd = ((word >> 20) & 0xf) as u8;
    let rs1 = ((word >> 16) & 0xf) as u8;
    let rs2 = ((word >> 12) & 0xf) as u8;
    let imm = (word & 0xffff) as u16;
    let simm = imm as i16;

    Some(match op {
        OP_HALT => Insn::Halt,
        OP_NOP => Insn::Nop,
        OP_MOVI => Insn::Movi { rd, imm },
        OP_ADDI => Insn::Addi { rd, rs: rs1, imm: simm },
        OP_ADD => Insn::Add { rd, rs1, rs2 },
        OP_SUB => Insn::Sub { rd, rs1, rs2 },
        OP_LDR => Insn::Ldr { rd, rs: rs1, off: simm },
        OP_STR => Insn::Str { rd, rs: rs1, off: simm },
        OP_B => Insn::B { off: simm },
        OP_BNZ => Insn::Bnz { rs: rs1, off: simm },
        OP_BL => Insn::Bl { off: simm },
        OP_RET => Insn::Ret,
        _ => return None,
    })
}

/// Instruction encoders for building test and demo programs in-process.
pub mod asm {
    use super::*;

    fn enc(op: u8, rd: u8, rs1: u8, rs2: u8) -> u32 {
        debug_assert!(rd < 16 && rs1 < 16 && rs2 < 16);
        (op as u32) << 24 | (rd as u32) << 20 | (rs1 as u32) << 16 | (rs2 as u32) << 12
    }

    fn enc_imm(op: u8, rd: u8, rs1: u8, imm: u16) -> u32 {
        debug_assert!(rd < 16 && rs1 < 16);
        (op as u32) << 24 | (rd as u32) << 20 | (rs1 as u32) << 16 | imm as u32
    }

    pub fn halt() -> u32 {
        enc_imm(OP_HALT, 0, 0, 0)
    }
    pub fn nop() -> u32 {
        enc_imm(OP_NOP, 0, 0, 0)
    }
    pub fn movi(rd: u8, imm: u16) -> u32 {
        enc_imm(OP_MOVI, rd, 0, imm)
    }
    pub fn addi(rd: u8, rs: u8, imm: i16) -> u32 {
        enc_imm(OP_ADDI, rd, rs, imm as u16)
    }
    pub fn add(rd: u8, rs1: u8, rs2: u8) -> u32 {
        enc(OP_ADD, rd, rs1, rs2)
    }
    pub fn sub(rd: u8, rs1: u8, rs2: u8) -> u32 {
        enc(OP_SUB, rd, rs1, rs2)
    }
    pub fn ldr(rd: u8, rs: u8, off: i16) -> u32 {
        enc_imm(OP_LDR, rd, rs, off as u16)
    }
    pub fn str(rd: u8, rs: u8, off: i16) -> u32 {
        enc_imm(OP_STR, rd, rs, off as u16)
    }
    pub fn b(off: i16) -> u32 {
        enc_imm(OP_B, 0, 0, off as u16)
    }
    pub fn bnz(rs: u8, off: i16) -> u32 {
        enc_imm(OP_BNZ, 0, rs, off as u16)
    }
    pub fn bl(off: i16) -> u32 {
        enc_imm(OP_BL, 0, 0, off as u16)
    }
    pub fn ret() -> u32 {
        enc_imm(OP_RET, 0, 0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_register_forms() {
        assert_eq!(decode(asm::add(2, 0, 1)), Some(Insn::Add { rd: 2, rs1: 0, rs2: 1 }));
        assert_eq!(decode(asm::movi(12, 0xbeef)), Some(Insn::Movi { rd: 12, imm: 0xbeef }));
        assert_eq!(decode(asm::addi(1, 1, -1)), Some(Insn::Addi { rd: 1, rs: 1, imm: -1 }));
        assert_eq!(decode(asm::bnz(3, -2)), Some(Insn::Bnz { rs: 3, off: -2 }));
        assert_eq!(decode(asm::ret()), Some(Insn::Ret));
    }

    #[test]
    fn unknown_opcode_rejected() {
        assert_eq!(decode(0xff00_0000), None);
    }
}
