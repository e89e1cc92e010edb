//! End-to-end scenarios for boot, ALU, and multi-device CALL/RET.

use isa::{encode_instr, CallOperand};
use library_tape::{LibFunctionSpec, LibraryBuilder};
use tape_device::{InMemoryTape, Tape};
use vm_engine::{CardDeckBuilder, Cpu, DeviceRef, VmError};
use word_math::float_to_q47;

fn new_cpu() -> Cpu<InMemoryTape> {
    Cpu::new(
        InMemoryTape::new(),
        InMemoryTape::new(),
        InMemoryTape::new(),
        InMemoryTape::new(),
    )
}

#[test]
fn boot_txr_to_halt() {
    let mut cpu = new_cpu();
    cpu.scratchpad_mut().write_bits(0, encode_instr(isa::OP_HALT, 0));
    CardDeckBuilder::new(cpu.cards_mut()).finalize_boot(0);

    cpu.boot_from_cards().unwrap();

    assert_eq!(cpu.r1(), 0);
    assert_eq!(cpu.r2(), 0);
    assert_eq!(cpu.r3(), 0);
    assert_eq!(cpu.paper().record_count(), 0);
}

#[test]
fn fixed_point_multiply() {
    let mut cpu = new_cpu();
    let pad = cpu.scratchpad_mut();
    pad.write_bits(10, word_math::to_twos_complement(float_to_q47(0.2)));
    pad.write_bits(11, word_math::to_twos_complement(float_to_q47(0.25)));
    pad.write_bits(0, encode_instr(isa::OP_LOAD_R2, 10));
    pad.write_bits(1, encode_instr(isa::OP_LOAD_R3, 11));
    pad.write_bits(2, encode_instr(isa::OP_MUL, 0));
    pad.write_bits(3, encode_instr(isa::OP_ROUND, 0));
    pad.write_bits(4, encode_instr(isa::OP_STORE_R1, 12));
    pad.write_bits(5, encode_instr(isa::OP_HALT, 0));

    cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap();

    let expected = float_to_q47(0.05);
    let got = cpu.scratchpad_mut().read_word(12);
    assert!((got - expected).abs() <= 1, "got={got} expected={expected}");
}

#[test]
fn divide_floors_toward_negative_infinity_for_mismatched_signs() {
    let mut cpu = new_cpu();
    let pad = cpu.scratchpad_mut();
    pad.write_word(20, -(1i64 << 47)); // minimum representable Q47 value
    pad.write_word(21, 3);
    pad.write_bits(0, encode_instr(isa::OP_LOAD_R1, 20));
    pad.write_bits(1, encode_instr(isa::OP_LOAD_R2, 21));
    pad.write_bits(2, encode_instr(isa::OP_DIV, 0));
    pad.write_bits(3, encode_instr(isa::OP_STORE_R1, 22));
    pad.write_bits(4, encode_instr(isa::OP_HALT, 0));

    cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap();

    // Exact quotient is -46912496118442.667; floor division (matching the
    // reference interpreter's `//`) lands one below truncating division.
    assert_eq!(cpu.scratchpad_mut().read_word(22), -46_912_496_118_443);
}

#[test]
fn divide_exact_quotient_of_two_q47_registers() {
    let mut cpu = new_cpu();
    let pad = cpu.scratchpad_mut();
    pad.write_word(20, float_to_q47(0.25));
    pad.write_word(21, float_to_q47(0.5));
    pad.write_bits(0, encode_instr(isa::OP_LOAD_R1, 20));
    pad.write_bits(1, encode_instr(isa::OP_LOAD_R2, 21));
    pad.write_bits(2, encode_instr(isa::OP_DIV, 0));
    pad.write_bits(3, encode_instr(isa::OP_STORE_R1, 22));
    pad.write_bits(4, encode_instr(isa::OP_HALT, 0));

    cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap();

    let expected = float_to_q47(0.5);
    let got = cpu.scratchpad_mut().read_word(22);
    assert!((got - expected).abs() <= 1, "got={got} expected={expected}");
}

#[test]
fn call_with_invalid_mode_is_a_decode_error() {
    let mut cpu = new_cpu();
    let pad = cpu.scratchpad_mut();
    let call_operand = CallOperand {
        mode: isa::CallMode::Unknown,
        flags: 0,
        value: 0,
    };
    pad.write_bits(0, isa::encode_instr_raw(isa::OP_CALL, call_operand.pack()));
    pad.write_bits(1, encode_instr(isa::OP_HALT, 0));

    let err = cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap_err();
    assert!(matches!(err, VmError::Decode(_)));
}

fn fix_mul_round_library() -> InMemoryTape {
    let mut builder = LibraryBuilder::new();
    builder.push_function(LibFunctionSpec {
        name: "FixMulRound".to_string(),
        fn_id: 1,
        args: 3,
        returns: 0,
        clobbers: 0,
        body: vec![
            encode_instr(isa::OP_MUL, 0),
            encode_instr(isa::OP_ROUND, 0),
            encode_instr(isa::OP_RET, 0),
        ],
    });
    let mut tape = InMemoryTape::new();
    builder.build(&mut tape);
    tape
}

#[test]
fn library_call_by_name_with_pb() {
    let mut cpu = Cpu::new(
        InMemoryTape::new(),
        fix_mul_round_library(),
        InMemoryTape::new(),
        InMemoryTape::new(),
    );

    let pad = cpu.scratchpad_mut();
    pad.write_word(200, 3);
    pad.write_word(201, 0);
    pad.write_word(202, float_to_q47(0.2));
    pad.write_word(203, float_to_q47(0.25));

    let namehash = word_math::fnv1a_hash_48("FixMulRound");
    let call_operand = CallOperand {
        mode: isa::CallMode::LibName,
        flags: isa::CALL_FLAG_PB,
        value: 0,
    };
    pad.write_bits(0, isa::encode_instr_raw(isa::OP_CALL, call_operand.pack()));
    pad.write_bits(1, namehash);
    pad.write_bits(2, 200);
    pad.write_bits(3, encode_instr(isa::OP_STORE_R1, 12));
    pad.write_bits(4, encode_instr(isa::OP_HALT, 0));

    cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap();

    let expected = float_to_q47(0.05);
    let got = cpu.scratchpad_mut().read_word(12);
    assert!((got - expected).abs() <= 1, "got={got} expected={expected}");
}

#[test]
fn call_by_index_with_extras() {
    // Library function 2: r1 := r1 + shadow[0] + shadow[1]; RET
    let mut builder = LibraryBuilder::new();
    builder.push_function(LibFunctionSpec {
        name: "Pad0".to_string(),
        fn_id: 10,
        args: 0,
        returns: 0,
        clobbers: 0,
        body: vec![encode_instr(isa::OP_RET, 0)],
    });
    builder.push_function(LibFunctionSpec {
        name: "Pad1".to_string(),
        fn_id: 11,
        args: 0,
        returns: 0,
        clobbers: 0,
        body: vec![encode_instr(isa::OP_RET, 0)],
    });
    builder.push_function(LibFunctionSpec {
        name: "SumWithShadow".to_string(),
        fn_id: 12,
        args: 5,
        returns: 0,
        clobbers: 0,
        body: vec![
            // r2 := shadow[0]
            isa::encode_instr_raw(
                isa::OP_SLOAD_R2,
                word_math::to_tc36(vm_engine::PB_SHADOW_BASE as i64),
            ),
            encode_instr(isa::OP_ADD, 0), // r1 := r1 + r2
            // r2 := shadow[1]
            isa::encode_instr_raw(
                isa::OP_SLOAD_R2,
                word_math::to_tc36(vm_engine::PB_SHADOW_BASE as i64 + 1),
            ),
            encode_instr(isa::OP_ADD, 0), // r1 := r1 + r2
            encode_instr(isa::OP_RET, 0),
        ],
    });
    let mut library = InMemoryTape::new();
    builder.build(&mut library);

    let mut cpu = Cpu::new(InMemoryTape::new(), library, InMemoryTape::new(), InMemoryTape::new());

    let pad = cpu.scratchpad_mut();
    pad.write_word(300, 5);
    pad.write_word(301, float_to_q47(0.2));
    pad.write_word(302, float_to_q47(0.1));
    pad.write_word(303, float_to_q47(0.3));
    pad.write_word(304, float_to_q47(0.05));
    pad.write_word(305, float_to_q47(0.15));

    let call_operand = CallOperand {
        mode: isa::CallMode::LibIdx,
        flags: isa::CALL_FLAG_PB,
        value: 2,
    };
    pad.write_bits(0, isa::encode_instr_raw(isa::OP_CALL, call_operand.pack()));
    pad.write_bits(1, 300);
    pad.write_bits(2, encode_instr(isa::OP_STORE_R1, 20));
    pad.write_bits(3, encode_instr(isa::OP_HALT, 0));

    cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap();

    let expected = float_to_q47(0.4);
    let got = cpu.scratchpad_mut().read_word(20);
    assert!((got - expected).abs() <= 1, "got={got} expected={expected}");
}

#[test]
fn skip_if_zero_taken() {
    let mut cpu = new_cpu();
    let pad = cpu.scratchpad_mut();
    pad.write_bits(0, encode_instr(isa::OP_CLEAR_R1, 0));
    pad.write_bits(1, encode_instr(isa::OP_SKIP_IF_ZERO, 0));
    pad.write_bits(2, encode_instr(isa::OP_HALT, 0)); // skipped over
    pad.write_bits(3, encode_instr(isa::OP_STORE_R1, 50)); // landed on
    pad.write_bits(4, encode_instr(isa::OP_HALT, 0));

    cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap();

    assert_eq!(cpu.scratchpad_mut().read_word(50), 0);
}

#[test]
fn ret_on_empty_stack_ends_block() {
    let mut cpu = new_cpu();
    cpu.scratchpad_mut().write_bits(0, encode_instr(isa::OP_RET, 0));

    cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap();

    assert_eq!(cpu.r1(), 0);
    assert_eq!(cpu.r2(), 0);
    assert_eq!(cpu.r3(), 0);
    assert_eq!(cpu.paper().record_count(), 0);
}

#[test]
fn call_then_ret_restores_caller_device() {
    let mut cpu = Cpu::new(
        InMemoryTape::new(),
        fix_mul_round_library(),
        InMemoryTape::new(),
        InMemoryTape::new(),
    );
    let pad = cpu.scratchpad_mut();
    pad.write_word(200, 3);
    pad.write_word(201, 0);
    pad.write_word(202, float_to_q47(0.2));
    pad.write_word(203, float_to_q47(0.25));

    let call_operand = CallOperand {
        mode: isa::CallMode::LibIdx,
        flags: isa::CALL_FLAG_PB,
        value: 0,
    };
    pad.write_bits(0, isa::encode_instr_raw(isa::OP_CALL, call_operand.pack()));
    pad.write_bits(1, 200);
    pad.write_bits(2, encode_instr(isa::OP_HALT, 0));

    assert_eq!(cpu.stack_depth(), 0);
    cpu.execute_block(DeviceRef::Scratchpad, 0).unwrap();
    assert_eq!(cpu.stack_depth(), 0, "RET should have popped the CALL frame");
}
