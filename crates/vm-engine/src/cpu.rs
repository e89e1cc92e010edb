//! The register file, multi-device CALL/RET, and fetch-decode-dispatch
//! execution loop.

use isa::{
    decode_op, decode_signed_operand, CallMode, CallOperand, FfOperand, OP_ADD, OP_AND, OP_CALL,
    OP_CLEAR_R1, OP_CLEAR_R2, OP_CLEAR_R3, OP_DIV, OP_FF, OP_HALT, OP_JUMP, OP_LOAD_R1, OP_LOAD_R2,
    OP_LOAD_R3, OP_MUL, OP_NEG, OP_OR, OP_READ_CARD, OP_RET, OP_REWIND, OP_ROUND, OP_SHIFT_LEFT,
    OP_SHIFT_RIGHT, OP_SKIP, OP_SKIP_IF_NONZERO, OP_SKIP_IF_ZERO, OP_SLOAD_R1, OP_SLOAD_R2,
    OP_SLOAD_R3, OP_STATUS, OP_STORE_R1, OP_STORE_R3, OP_TXR, OP_WRITE_TAPE, OP_XOR, mnemonic,
};
use tape_device::{FastForwardable, Positioned, Rewindable, Tape};
use word_math::{
    clamp_word, div_q47_scaled, from_twos_complement, mul_q47_pair, round_q94_to_q47,
    shift_pair_96, to_twos_complement,
};

use crate::context::{ContextStack, DeviceRef};
use crate::error::VmError;
use crate::trace::{AnomalyRule, TraceEvent, TraceSink};

/// Reserved scratchpad address: PB arguments beyond the third are copied
/// here for the callee to read.
pub const PB_SHADOW_BASE: u64 = 0x100000;

/// Outcome of a single boot-card tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStep {
    /// Another card was processed; boot continues.
    Continue,
    /// The card reader is exhausted with no TXR encountered.
    Eof,
    /// A TXR was executed; the boot driver should now run a block at this
    /// scratchpad address.
    Transfer(u64),
}

/// The 48-bit-word CPU: three registers operating over four tape devices,
/// all of the same device type `D`.
pub struct Cpu<D: Tape + Rewindable + FastForwardable + Positioned> {
    r1: i64,
    r2: i64,
    r3: i64,

    scratchpad: D,
    library: D,
    cards: D,
    paper: D,
    cards_pos: u64,

    ctx_stack: ContextStack,
    current_dev: DeviceRef,

    trace_sink: Option<Box<dyn TraceSink>>,
    anomaly_rules: Vec<AnomalyRule>,
}

impl<D: Tape + Rewindable + FastForwardable + Positioned> Cpu<D> {
    pub fn new(scratchpad: D, library: D, cards: D, paper: D) -> Self {
        Self {
            r1: 0,
            r2: 0,
            r3: 0,
            scratchpad,
            library,
            cards,
            paper,
            cards_pos: 0,
            ctx_stack: ContextStack::new(),
            current_dev: DeviceRef::Scratchpad,
            trace_sink: None,
            anomaly_rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn r1(&self) -> i64 {
        self.r1
    }

    #[must_use]
    pub fn r2(&self) -> i64 {
        self.r2
    }

    #[must_use]
    pub fn r3(&self) -> i64 {
        self.r3
    }

    #[must_use]
    pub fn scratchpad(&self) -> &D {
        &self.scratchpad
    }

    #[must_use]
    pub fn scratchpad_mut(&mut self) -> &mut D {
        &mut self.scratchpad
    }

    #[must_use]
    pub fn library_mut(&mut self) -> &mut D {
        &mut self.library
    }

    #[must_use]
    pub fn cards_mut(&mut self) -> &mut D {
        &mut self.cards
    }

    #[must_use]
    pub fn paper(&self) -> &D {
        &self.paper
    }

    #[must_use]
    pub fn stack_depth(&self) -> usize {
        self.ctx_stack.depth()
    }

    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace_sink = Some(sink);
    }

    pub fn add_anomaly_rule(&mut self, rule: AnomalyRule) {
        self.anomaly_rules.push(rule);
    }

    fn device_mut(&mut self, which: DeviceRef) -> &mut D {
        match which {
            DeviceRef::Scratchpad => &mut self.scratchpad,
            DeviceRef::Library => &mut self.library,
        }
    }

    fn device_ref(&self, which: DeviceRef) -> &D {
        match which {
            DeviceRef::Scratchpad => &self.scratchpad,
            DeviceRef::Library => &self.library,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_trace(
        &mut self,
        dev: DeviceRef,
        tape_ip: Option<u64>,
        op_code: u16,
        operand_raw: u64,
        extra_words: u32,
        pb_used: bool,
        ctx_switch: bool,
    ) {
        if self.trace_sink.is_none() {
            return;
        }
        let mut event = TraceEvent {
            ip: tape_ip,
            device: dev,
            op_code,
            op_name: mnemonic(op_code),
            operand_raw,
            operand_signed: decode_signed_operand(operand_raw),
            r1: self.r1,
            r2: self.r2,
            r3: self.r3,
            stack_depth: self.ctx_stack.depth(),
            ctx_switch,
            extra_words,
            pb_used,
            device_position: Some(self.device_ref(dev).get_position()),
            error: false,
            anomalies: Vec::new(),
        };
        let mut anomalies = Vec::new();
        for rule in &mut self.anomaly_rules {
            anomalies.extend(rule(&event));
        }
        event.anomalies = anomalies;
        if let Some(sink) = &mut self.trace_sink {
            sink.emit(&event);
        }
    }

    /// Execute the block starting at `(start_dev, start_ip)` until a
    /// handler signals end-of-block (HALT, RET on empty stack) or fetch
    /// reaches end-of-tape.
    ///
    /// # Errors
    /// Propagates any [`VmError`] raised by an instruction.
    pub fn execute_block(&mut self, start_dev: DeviceRef, start_ip: u64) -> Result<(), VmError> {
        self.current_dev = start_dev;
        let mut ip = start_ip;
        loop {
            let dev = self.current_dev;
            if ip >= self.device_ref(dev).record_count() {
                break;
            }
            let Some(bits) = self.device_mut(dev).read_bits(ip) else {
                break;
            };
            match self.execute_encoded(dev, bits, Some(ip))? {
                Some(next) => ip = next,
                None => break,
            }
        }
        Ok(())
    }

    /// Execute a single encoded instruction on `dev`, returning the next
    /// instruction pointer (`None` ends the block).
    ///
    /// # Errors
    /// Returns [`VmError::Addressing`] for a negative address operand,
    /// [`VmError::Decode`] for a malformed CALL, or [`VmError::Resolution`]
    /// if a library target can't be found.
    #[allow(clippy::too_many_lines)]
    pub fn execute_encoded(
        &mut self,
        dev: DeviceRef,
        bits48: u64,
        tape_ip: Option<u64>,
    ) -> Result<Option<u64>, VmError> {
        let (op, operand_bits) = decode_op(bits48);
        let advance = |ip: Option<u64>| ip.map(|v| v + 1);

        macro_rules! addr_of {
            ($label:literal) => {{
                let addr = decode_signed_operand(operand_bits);
                if addr < 0 {
                    return Err(VmError::Addressing(format!(
                        "negative address for {}",
                        $label
                    )));
                }
                addr as u64
            }};
        }

        match op {
            isa::OP_NOP => {
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_STORE_R1 => {
                let addr = addr_of!("STORE_R1");
                let v = self.r1;
                self.device_mut(dev).write_word(addr, v);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_STORE_R3 => {
                let addr = addr_of!("STORE_R3");
                let v = self.r3;
                self.device_mut(dev).write_word(addr, v);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_LOAD_R1 => {
                let addr = addr_of!("LOAD_R1");
                self.r1 = self.device_mut(dev).read_word(addr);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_LOAD_R2 => {
                let addr = addr_of!("LOAD_R2");
                self.r2 = self.device_mut(dev).read_word(addr);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_LOAD_R3 => {
                let addr = addr_of!("LOAD_R3");
                self.r3 = self.device_mut(dev).read_word(addr);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_CLEAR_R1 => {
                self.r1 = 0;
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_CLEAR_R2 => {
                self.r2 = 0;
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_CLEAR_R3 => {
                self.r3 = 0;
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_WRITE_TAPE => {
                self.paper.append_word(self.r3);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_READ_CARD => {
                if self.cards_pos < self.cards.record_count() {
                    self.r3 = self.cards.read_word(self.cards_pos);
                    self.cards_pos += 1;
                }
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_ADD => {
                self.r1 = clamp_word(self.r1 + self.r2);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_NEG => {
                self.r1 = clamp_word(-self.r1);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_MUL => {
                let (hi, lo) = mul_q47_pair(self.r2, self.r3);
                self.r1 = hi;
                self.r2 = lo;
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_DIV => {
                self.r1 = if self.r2 == 0 {
                    if self.r1 >= 0 {
                        (1i64 << 47) - 1
                    } else {
                        -(1i64 << 47)
                    }
                } else {
                    div_q47_scaled(self.r1, self.r2)
                };
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_ROUND => {
                self.r1 = round_q94_to_q47(self.r1, self.r2);
                self.r2 = 0;
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_AND => {
                self.r1 = from_twos_complement(
                    to_twos_complement(self.r1) & to_twos_complement(self.r2),
                );
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_OR => {
                self.r1 = from_twos_complement(
                    to_twos_complement(self.r1) | to_twos_complement(self.r2),
                );
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_XOR => {
                self.r1 = from_twos_complement(
                    to_twos_complement(self.r1) ^ to_twos_complement(self.r2),
                );
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_SHIFT_LEFT => {
                let count = decode_signed_operand(operand_bits);
                let (hi, lo) = shift_pair_96(true, count, self.r1, self.r2);
                self.r1 = hi;
                self.r2 = lo;
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_SHIFT_RIGHT => {
                let count = decode_signed_operand(operand_bits);
                let (hi, lo) = shift_pair_96(false, count, self.r1, self.r2);
                self.r1 = hi;
                self.r2 = lo;
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_SKIP => {
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(tape_ip.map(|ip| ip + 2))
            }
            OP_SKIP_IF_ZERO => {
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(if self.r1 == 0 {
                    tape_ip.map(|ip| ip + 2)
                } else {
                    advance(tape_ip)
                })
            }
            OP_SKIP_IF_NONZERO => {
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(if self.r1 != 0 {
                    tape_ip.map(|ip| ip + 2)
                } else {
                    advance(tape_ip)
                })
            }
            OP_TXR => {
                let target = addr_of!("TXR");
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(Some(target))
            }
            OP_JUMP => {
                let target = addr_of!("JUMP");
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(Some(target))
            }
            OP_SLOAD_R1 => {
                let addr = addr_of!("SLOAD_R1");
                self.r1 = self.scratchpad.read_word(addr);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_SLOAD_R2 => {
                let addr = addr_of!("SLOAD_R2");
                self.r2 = self.scratchpad.read_word(addr);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_SLOAD_R3 => {
                let addr = addr_of!("SLOAD_R3");
                self.r3 = self.scratchpad.read_word(addr);
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_HALT => {
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(None)
            }
            OP_CALL => self.execute_call(dev, operand_bits, tape_ip),
            OP_RET => {
                if let Some(frame) = self.ctx_stack.pop() {
                    self.current_dev = frame.device;
                    self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, true);
                    Ok(Some(frame.return_ip))
                } else {
                    self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                    Ok(None)
                }
            }
            OP_REWIND => {
                match decode_signed_operand(operand_bits) {
                    0 => self.scratchpad.rewind(),
                    1 => self.library.rewind(),
                    2 => self.cards.rewind(),
                    _ => {}
                }
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_FF => {
                let ff = FfOperand::unpack(operand_bits);
                let count = i64::from(ff.count);
                match ff.device {
                    0 => self.scratchpad.fast_forward(count),
                    1 => self.library.fast_forward(count),
                    2 => self.cards.fast_forward(count),
                    _ => {}
                }
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            OP_STATUS => {
                self.r3 = match decode_signed_operand(operand_bits) {
                    0 => self.scratchpad.get_position(),
                    1 => self.library.get_position(),
                    2 => self.cards.get_position(),
                    _ => 0,
                } as i64;
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
            _ => {
                // Unknown opcode: treated as NOP.
                self.emit_trace(dev, tape_ip, op, operand_bits, 0, false, false);
                Ok(advance(tape_ip))
            }
        }
    }

    fn execute_call(
        &mut self,
        dev: DeviceRef,
        operand_bits: u64,
        tape_ip: Option<u64>,
    ) -> Result<Option<u64>, VmError> {
        let Some(ip) = tape_ip else {
            return Err(VmError::Decode("CALL encountered without a tape ip".into()));
        };
        let call = CallOperand::unpack(operand_bits);
        if matches!(call.mode, CallMode::Unknown) {
            return Err(VmError::Decode(format!(
                "unknown CALL mode bits {:#X}",
                (operand_bits >> 32) & 0xF
            )));
        }
        let mut consumed_extra: u64 = 0;

        let namehash = if matches!(call.mode, CallMode::LibName) {
            let h = self
                .device_mut(dev)
                .read_bits(ip + 1 + consumed_extra)
                .ok_or_else(|| VmError::Decode("CALL LIBNAME missing namehash immediate".into()))?;
            consumed_extra += 1;
            Some(h)
        } else {
            None
        };

        let mut pb_used = false;
        let pb_addr = if call.has_pb() {
            let addr = self
                .device_mut(dev)
                .read_bits(ip + 1 + consumed_extra)
                .ok_or_else(|| VmError::Decode("CALL PB missing PB address immediate".into()))?;
            consumed_extra += 1;
            pb_used = true;
            Some(addr)
        } else {
            None
        };

        if let Some(pb_addr) = pb_addr {
            let count = self.scratchpad.read_word(pb_addr).max(0) as u64;
            if count >= 1 {
                self.r1 = self.scratchpad.read_word(pb_addr + 1);
            }
            if count >= 2 {
                self.r2 = self.scratchpad.read_word(pb_addr + 2);
            }
            if count >= 3 {
                self.r3 = self.scratchpad.read_word(pb_addr + 3);
            }
            let extra = count.saturating_sub(3);
            for i in 0..extra {
                let v = self.scratchpad.read_word(pb_addr + 4 + i);
                self.scratchpad.write_word(PB_SHADOW_BASE + i, v);
            }
        }

        let value = u64::from(call.value);
        let (target_dev, target_ip) = match call.mode {
            CallMode::ScratchAbs => (DeviceRef::Scratchpad, value),
            CallMode::LibAbs => (DeviceRef::Library, value),
            CallMode::LibIdx => (DeviceRef::Library, library_tape::resolve_idx(&mut self.library, value)?),
            CallMode::LibName => (
                DeviceRef::Library,
                library_tape::resolve_name(&mut self.library, namehash.expect("LIBNAME carries a namehash"))?,
            ),
            CallMode::Unknown => unreachable!("rejected above"),
        };

        self.ctx_stack.push(dev, ip + 1 + consumed_extra);
        self.current_dev = target_dev;
        self.emit_trace(
            dev,
            Some(ip),
            OP_CALL,
            operand_bits,
            consumed_extra as u32,
            pb_used,
            true,
        );
        Ok(Some(target_ip))
    }

    /// Perform one step of the boot process: read the next card, load it
    /// into `r1` (odd index) or execute it as an instruction on the
    /// scratchpad (even index).
    ///
    /// # Errors
    /// Propagates any [`VmError`] raised while executing an even-indexed
    /// boot card.
    pub fn boot_tick(&mut self, boot_idx: &mut u64) -> Result<BootStep, VmError> {
        if self.cards_pos >= self.cards.record_count() {
            return Ok(BootStep::Eof);
        }
        let val = self.cards.read_word(self.cards_pos);
        self.cards_pos += 1;

        let start_ip = if *boot_idx % 2 == 1 {
            self.r1 = val;
            None
        } else {
            let bits = to_twos_complement(val);
            self.execute_encoded(DeviceRef::Scratchpad, bits, None)?
        };

        *boot_idx += 1;
        Ok(match start_ip {
            Some(ip) => BootStep::Transfer(ip),
            None => BootStep::Continue,
        })
    }

    /// Drive the boot process to completion: process cards until a TXR
    /// transfers control to the scratchpad program (which is then run to
    /// completion) or the card reader is exhausted.
    ///
    /// # Errors
    /// Propagates any [`VmError`] from [`Cpu::boot_tick`] or the
    /// subsequent [`Cpu::execute_block`].
    pub fn boot_from_cards(&mut self) -> Result<(), VmError> {
        let mut boot_idx = 1u64;
        loop {
            match self.boot_tick(&mut boot_idx)? {
                BootStep::Eof => break,
                BootStep::Transfer(ip) => {
                    self.execute_block(DeviceRef::Scratchpad, ip)?;
                    break;
                }
                BootStep::Continue => {}
            }
        }
        Ok(())
    }
}
