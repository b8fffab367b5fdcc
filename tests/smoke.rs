use std::sync::Arc;

use stampede::{
    common::{addr, word::Word},
    BaseAccount, ErrorCode, Interpreter, Message, World,
};

fn run(code: &str, gas_limit: u64) -> stampede::Outcome {
    let target = addr("00000000000000000000000000000000000000aa");
    let mut world = World::new();
    world.insert(
        target,
        BaseAccount {
            code: hex::decode(code).unwrap(),
            ..Default::default()
        },
    );
    let msg = Message {
        caller: addr("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
        origin: addr("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"),
        to: target,
        gas_limit,
        ..Default::default()
    };
    Interpreter::new(Arc::new(world)).run(msg)
}

#[test]
fn test_arithmetic_smoke() {
    // PUSH1 1, PUSH1 2, ADD, STOP
    let outcome = run("600160020100", 1_000_000);
    assert_eq!(outcome.error, ErrorCode::None);
    assert_eq!(outcome.trace.len(), 4);
    assert_eq!(outcome.gas_used, 3 * 3);
    assert_eq!(outcome.trace.stack_at(3), &[Word::from(3u64)]);
    assert_eq!(outcome.trace.last_error(), ErrorCode::None);
}

#[test]
fn test_trace_pcs_walk_the_bytecode() {
    let outcome = run("600160020100", 1_000_000);
    let pcs: Vec<u32> = (0..outcome.trace.len())
        .map(|i| outcome.trace.pc_at(i))
        .collect();
    assert_eq!(pcs, vec![0, 2, 4, 5]);
    assert_eq!(outcome.trace.opcode_at(2), 0x01);
    assert_eq!(outcome.trace.opcode_at(3), 0x00);
}

#[test]
fn test_stack_underflow() {
    // ADD on an empty stack
    let outcome = run("01", 50_000);
    assert_eq!(outcome.error, ErrorCode::StackUnderflow);
    assert_eq!(outcome.trace.len(), 1);
    assert_eq!(outcome.trace.error_at(0), ErrorCode::StackUnderflow);
    // deterministic faults burn the whole allowance
    assert_eq!(outcome.gas_used, 50_000);
    let (used, limit, _) = outcome.trace.gas_at(0);
    assert_eq!(used, limit);
}

#[test]
fn test_memory_expansion_gas() {
    // PUSH1 0x20, PUSH1 0x00, MSTORE, STOP
    let outcome = run("602060005200", 100);
    assert_eq!(outcome.error, ErrorCode::None);
    // 3 + 3 + (3 static + 3 expansion) + 0
    assert_eq!(outcome.gas_used, 12);
    // the MSTORE entry snapshots one touched word
    assert_eq!(outcome.trace.memory_at(2).len(), 32);
    assert_eq!(
        outcome.trace.memory_at(2)[31],
        0x20,
        "MSTORE wrote the value right-aligned"
    );
}

#[test]
fn test_msize_after_expansion() {
    // PUSH1 0, MLOAD, POP, MSIZE, STOP
    let outcome = run("600051505900", 1_000);
    assert_eq!(outcome.error, ErrorCode::None);
    let top = outcome.trace.stack_at(3).last().copied().unwrap();
    assert_eq!(top, Word::from(32u64));
}

#[test]
fn test_division_by_zero_on_stack() {
    // PUSH1 0, PUSH1 7, DIV, STOP: 7 / 0 == 0
    let outcome = run("6000600704", 1_000);
    assert_eq!(outcome.error, ErrorCode::None);
    assert_eq!(
        outcome.trace.stack_at(outcome.trace.len() - 1),
        &[Word::zero()]
    );
}
