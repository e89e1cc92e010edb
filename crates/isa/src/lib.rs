//! Opcode table and instruction word encoding.
//!
//! Every instruction is a 48-bit word partitioned as `opcode:12 | operand:36`.
//! The opcode assignments below are the ABI: tapes and the library builder
//! depend on these exact numeric values.

mod call;
mod ff;

pub use call::{CallMode, CallOperand, CALL_FLAG_PB};
pub use ff::FfOperand;

use word_math::{from_tc36, to_tc36, OPR_MASK, WORD_MASK};

pub const OP_NOP: u16 = 0x000;
pub const OP_LOAD_R1: u16 = 0x001;
pub const OP_LOAD_R2: u16 = 0x002;
pub const OP_LOAD_R3: u16 = 0x003;
pub const OP_STORE_R1: u16 = 0x004;
pub const OP_STORE_R3: u16 = 0x005;
pub const OP_CLEAR_R1: u16 = 0x006;
pub const OP_CLEAR_R2: u16 = 0x007;
pub const OP_CLEAR_R3: u16 = 0x008;
pub const OP_ADD: u16 = 0x009;
pub const OP_NEG: u16 = 0x00A;
pub const OP_MUL: u16 = 0x00B;
pub const OP_DIV: u16 = 0x00C;
pub const OP_ROUND: u16 = 0x00D;
pub const OP_AND: u16 = 0x00E;
pub const OP_OR: u16 = 0x00F;
pub const OP_XOR: u16 = 0x010;
pub const OP_SHIFT_LEFT: u16 = 0x011;
pub const OP_SHIFT_RIGHT: u16 = 0x012;
pub const OP_CALL: u16 = 0x013;
pub const OP_RET: u16 = 0x014;
pub const OP_WRITE_TAPE: u16 = 0x015;
pub const OP_READ_CARD: u16 = 0x016;
pub const OP_SKIP: u16 = 0x017;
pub const OP_SKIP_IF_ZERO: u16 = 0x018;
pub const OP_SKIP_IF_NONZERO: u16 = 0x019;
pub const OP_TXR: u16 = 0x01A;
pub const OP_HALT: u16 = 0x01B;
pub const OP_REWIND: u16 = 0x01C;
pub const OP_FF: u16 = 0x01D;
pub const OP_STATUS: u16 = 0x01E;
pub const OP_JUMP: u16 = 0x01F;
pub const OP_SLOAD_R1: u16 = 0x020;
pub const OP_SLOAD_R2: u16 = 0x021;
pub const OP_SLOAD_R3: u16 = 0x022;

/// Look up the mnemonic for a known opcode, for tracing.
#[must_use]
pub fn mnemonic(op: u16) -> &'static str {
    match op {
        OP_NOP => "NOP",
        OP_LOAD_R1 => "LOAD_R1",
        OP_LOAD_R2 => "LOAD_R2",
        OP_LOAD_R3 => "LOAD_R3",
        OP_STORE_R1 => "STORE_R1",
        OP_STORE_R3 => "STORE_R3",
        OP_CLEAR_R1 => "CLEAR_R1",
        OP_CLEAR_R2 => "CLEAR_R2",
        OP_CLEAR_R3 => "CLEAR_R3",
        OP_ADD => "ADD",
        OP_NEG => "NEG",
        OP_MUL => "MUL",
        OP_DIV => "DIV",
        OP_ROUND => "ROUND",
        OP_AND => "AND",
        OP_OR => "OR",
        OP_XOR => "XOR",
        OP_SHIFT_LEFT => "SHIFT_LEFT",
        OP_SHIFT_RIGHT => "SHIFT_RIGHT",
        OP_CALL => "CALL",
        OP_RET => "RET",
        OP_WRITE_TAPE => "WRITE_TAPE",
        OP_READ_CARD => "READ_CARD",
        OP_SKIP => "SKIP",
        OP_SKIP_IF_ZERO => "SKIP_IF_ZERO",
        OP_SKIP_IF_NONZERO => "SKIP_IF_NONZERO",
        OP_TXR => "TXR",
        OP_HALT => "HALT",
        OP_REWIND => "REWIND",
        OP_FF => "FF",
        OP_STATUS => "STATUS",
        OP_JUMP => "JUMP",
        OP_SLOAD_R1 => "SLOAD_R1",
        OP_SLOAD_R2 => "SLOAD_R2",
        OP_SLOAD_R3 => "SLOAD_R3",
        _ => "UNKNOWN",
    }
}

/// Pack a mnemonic's opcode and a signed operand into a 48-bit instruction
/// word.
#[must_use]
pub fn encode_instr(op: u16, operand: i64) -> u64 {
    let op = u64::from(op) & 0xFFF;
    ((op << 36) | to_tc36(operand)) & WORD_MASK
}

/// Pack a raw (already-built) 36-bit operand pattern, e.g. from
/// [`CallOperand::pack`] or [`FfOperand::pack`].
#[must_use]
pub fn encode_instr_raw(op: u16, operand_bits: u64) -> u64 {
    let op = u64::from(op) & 0xFFF;
    ((op << 36) | (operand_bits & OPR_MASK)) & WORD_MASK
}

/// Split a 48-bit instruction word into its raw 12-bit opcode and raw 36-bit
/// operand bit pattern.
#[must_use]
pub const fn decode_op(bits48: u64) -> (u16, u64) {
    (((bits48 >> 36) & 0xFFF) as u16, bits48 & OPR_MASK)
}

/// Decode the operand of an address/shift-count instruction as a signed
/// integer.
#[must_use]
pub const fn decode_signed_operand(operand_bits: u64) -> i64 {
    from_tc36(operand_bits)
}
