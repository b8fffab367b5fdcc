use std::sync::Arc;

use stampede::{
    common::{addr, Address},
    staging::{from_device, to_device},
    BaseAccount, BatchOptions, ErrorCode, Message, World,
};

const CALLER: Address = addr("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");

fn spinner_world(target: Address) -> World {
    let mut world = World::new();
    world.insert(
        target,
        BaseAccount {
            // JUMPDEST, PUSH1 1, PUSH1 0, SSTORE, PUSH1 0, JUMP
            code: hex::decode("5b6001600055600056").unwrap(),
            ..Default::default()
        },
    );
    world
}

/// S6: a 300-entry trace crosses the page size several times; staging it
/// out and back is byte-exact.
#[test]
fn test_round_trip_300_entries() {
    let target = addr("0000000000000000000000000000000000000077");
    let messages = vec![Message {
        caller: CALLER,
        origin: CALLER,
        to: target,
        gas_limit: 100_000_000,
        ..Default::default()
    }];

    let outcomes = stampede::run_batch(
        Arc::new(spinner_world(target)),
        messages,
        BatchOptions {
            step_budget: Some(299),
        },
    );
    let trace = &outcomes[0].trace;
    assert_eq!(outcomes[0].error, ErrorCode::Aborted);
    assert_eq!(trace.len(), 300);

    let staged = to_device(std::slice::from_ref(trace));
    let restored = from_device(&staged).unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(&restored[0], trace);

    // element-wise spot check on top of the structural equality
    for i in 0..trace.len() {
        assert_eq!(restored[0].pc_at(i), trace.pc_at(i));
        assert_eq!(restored[0].stack_at(i), trace.stack_at(i));
        assert_eq!(restored[0].touches_at(i), trace.touches_at(i));
        assert_eq!(restored[0].gas_at(i), trace.gas_at(i));
    }
}

/// A staged batch renders the same trace document as the original.
#[test]
fn test_staged_trace_renders_identically() {
    let target = addr("0000000000000000000000000000000000000088");
    let messages = vec![
        Message {
            caller: CALLER,
            origin: CALLER,
            to: target,
            gas_limit: 1_000_000,
            ..Default::default()
        };
        3
    ];

    let outcomes = stampede::run_batch(
        Arc::new(spinner_world(target)),
        messages,
        BatchOptions {
            step_budget: Some(40),
        },
    );
    let traces: Vec<_> = outcomes.iter().map(|o| o.trace.clone()).collect();

    let staged = to_device(&traces);
    let restored = from_device(&staged).unwrap();
    for (restored, original) in restored.iter().zip(&traces) {
        let a = serde_json::to_string(&restored.render()).unwrap();
        let b = serde_json::to_string(&original.render()).unwrap();
        assert_eq!(a, b);
    }
}
