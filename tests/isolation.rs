use std::sync::Arc;

use stampede::{
    common::{addr, word::Word, Address},
    journal::AccountStatus,
    run_batch, BaseAccount, BatchOptions, ErrorCode, Message, World,
};

const CALLER: Address = addr("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
const VICTIM: Address = addr("00000000000000000000000000000000000000cc");
const BENEFICIARY: Address = addr("00000000000000000000000000000000000000dd");
const READER: Address = addr("00000000000000000000000000000000000000ee");

/// One instance self-destructs an account while another reads the same
/// account's balance: the reader must see the base world, not the
/// destroyer's view.
#[test]
fn test_batch_isolation_under_selfdestruct() {
    let mut world = World::new();
    // VICTIM: PUSH20 BENEFICIARY, SELFDESTRUCT
    world.insert(
        VICTIM,
        BaseAccount {
            balance: Word::from(100u64),
            code: hex::decode(format!("73{}ff", hex::encode(BENEFICIARY.0))).unwrap(),
            ..Default::default()
        },
    );
    // READER: PUSH20 VICTIM, BALANCE, PUSH1 0, SSTORE, STOP
    world.insert(
        READER,
        BaseAccount {
            code: hex::decode(format!("73{}3160005500", hex::encode(VICTIM.0))).unwrap(),
            ..Default::default()
        },
    );

    let messages = vec![
        Message {
            caller: CALLER,
            origin: CALLER,
            to: VICTIM,
            gas_limit: 1_000_000,
            ..Default::default()
        },
        Message {
            caller: CALLER,
            origin: CALLER,
            to: READER,
            gas_limit: 1_000_000,
            ..Default::default()
        },
    ];

    let world = Arc::new(world);
    let outcomes = run_batch(world, messages, BatchOptions::default());
    assert_eq!(outcomes.len(), 2);

    // instance 0 destroyed the victim and moved its balance
    assert_eq!(outcomes[0].error, ErrorCode::None);
    let victim = outcomes[0]
        .post_state
        .iter()
        .find(|d| d.address == VICTIM)
        .unwrap();
    assert_eq!(victim.status, AccountStatus::Destroyed);
    assert_eq!(victim.balance, Word::zero());
    let beneficiary = outcomes[0]
        .post_state
        .iter()
        .find(|d| d.address == BENEFICIARY)
        .unwrap();
    assert_eq!(beneficiary.balance, Word::from(100u64));

    // instance 1 still saw the base balance
    assert_eq!(outcomes[1].error, ErrorCode::None);
    let reader = outcomes[1]
        .post_state
        .iter()
        .find(|d| d.address == READER)
        .unwrap();
    assert_eq!(reader.storage, vec![(Word::zero(), Word::from(100u64))]);
}

/// Faults stay within their instance: a batch mixing clean and faulting
/// runs reports them independently, in input order.
#[test]
fn test_faults_do_not_cross_instances() {
    let clean = addr("0000000000000000000000000000000000000011");
    let broken = addr("0000000000000000000000000000000000000022");
    let mut world = World::new();
    world.insert(
        clean,
        BaseAccount {
            code: hex::decode("600160020100").unwrap(),
            ..Default::default()
        },
    );
    world.insert(
        broken,
        BaseAccount {
            // ADD on an empty stack
            code: hex::decode("01").unwrap(),
            ..Default::default()
        },
    );

    let to_addrs = [clean, broken, clean, broken, clean];
    let messages: Vec<Message> = to_addrs
        .iter()
        .map(|to| Message {
            caller: CALLER,
            origin: CALLER,
            to: *to,
            gas_limit: 1_000,
            ..Default::default()
        })
        .collect();

    let outcomes = run_batch(Arc::new(world), messages, BatchOptions::default());
    let errors: Vec<ErrorCode> = outcomes.iter().map(|o| o.error).collect();
    assert_eq!(
        errors,
        vec![
            ErrorCode::None,
            ErrorCode::StackUnderflow,
            ErrorCode::None,
            ErrorCode::StackUnderflow,
            ErrorCode::None,
        ]
    );
}

/// The step budget surfaces as `Aborted` with the partial trace intact.
#[test]
fn test_step_budget_keeps_partial_trace() {
    let spinner = addr("0000000000000000000000000000000000000033");
    let mut world = World::new();
    world.insert(
        spinner,
        BaseAccount {
            // JUMPDEST, PUSH1 0, JUMP
            code: hex::decode("5b600056").unwrap(),
            ..Default::default()
        },
    );

    let messages = vec![Message {
        caller: CALLER,
        origin: CALLER,
        to: spinner,
        gas_limit: 10_000_000,
        ..Default::default()
    }];

    let outcomes = run_batch(
        Arc::new(world),
        messages,
        BatchOptions {
            step_budget: Some(50),
        },
    );
    assert_eq!(outcomes[0].error, ErrorCode::Aborted);
    assert_eq!(outcomes[0].trace.len(), 51);
    assert_eq!(outcomes[0].trace.last_error(), ErrorCode::Aborted);
    // everything before the boundary is a clean record
    assert_eq!(outcomes[0].trace.error_at(49), ErrorCode::None);
}
