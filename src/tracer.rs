use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    common::{address::Address, word::Word},
    error::ErrorCode,
    journal::{AccountDelta, Journal},
    memory::Memory,
    stack::Stack,
};

/// Trace capacity grows by whole pages; a page is sized so that growth is
/// rare and amortised O(1) per push.
pub const PAGE: usize = 128;

/// Everything the tracer snapshots when one instruction retires.
pub struct StepRecord<'a> {
    pub address: Address,
    pub pc: u32,
    pub opcode: u8,
    pub stack: &'a Stack,
    pub memory: &'a Memory,
    pub journal: &'a Journal,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub gas_refund: i64,
    pub error: ErrorCode,
}

/// Per-instance append-only execution log, stored as parallel arrays
/// (one column per field) rather than an array of structs: renderers and
/// the staging layer stream whole columns at a time.
#[derive(Debug, Default, Clone)]
pub struct Trace {
    addresses: Vec<Address>,
    pcs: Vec<u32>,
    opcodes: Vec<u8>,
    gas_used: Vec<u64>,
    gas_limits: Vec<u64>,
    gas_refunds: Vec<i64>,
    errors: Vec<ErrorCode>,
    stacks: Vec<Vec<Word>>,
    memories: Vec<Vec<u8>>,
    touches: Vec<Vec<AccountDelta>>,
    patched: Option<usize>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.pcs.capacity()
    }

    fn grow(&mut self) {
        self.addresses.reserve_exact(PAGE);
        self.pcs.reserve_exact(PAGE);
        self.opcodes.reserve_exact(PAGE);
        self.gas_used.reserve_exact(PAGE);
        self.gas_limits.reserve_exact(PAGE);
        self.gas_refunds.reserve_exact(PAGE);
        self.errors.reserve_exact(PAGE);
        self.stacks.reserve_exact(PAGE);
        self.memories.reserve_exact(PAGE);
        self.touches.reserve_exact(PAGE);
    }

    /// Appends one entry, deep-copying the stack, memory and journal
    /// snapshots: later mutation of the live frame must not be visible
    /// through the log.
    pub fn push(&mut self, record: StepRecord<'_>) {
        if self.len() == self.capacity() {
            self.grow();
        }
        self.addresses.push(record.address);
        self.pcs.push(record.pc);
        self.opcodes.push(record.opcode);
        self.gas_used.push(record.gas_used);
        self.gas_limits.push(record.gas_limit);
        self.gas_refunds.push(record.gas_refund);
        self.errors.push(record.error);
        self.stacks.push(record.stack.snapshot());
        self.memories.push(record.memory.snapshot());
        self.touches.push(record.journal.deltas());
    }

    /// Re-snapshots only the stack of the most recent entry. Used by call
    /// opcodes whose stack effect lands after the sub-call returns; each
    /// entry may be patched at most once.
    pub fn modify_last_stack(&mut self, stack: &Stack) {
        assert!(!self.is_empty(), "no trace entry to patch");
        let last = self.len() - 1;
        assert!(
            self.patched != Some(last),
            "trace entry {last} patched twice"
        );
        self.stacks[last] = stack.snapshot();
        self.patched = Some(last);
    }

    /// Error code of the most recent entry; `None` code for empty traces.
    pub fn last_error(&self) -> ErrorCode {
        self.errors.last().copied().unwrap_or_default()
    }

    pub fn pc_at(&self, index: usize) -> u32 {
        self.pcs[index]
    }

    pub fn opcode_at(&self, index: usize) -> u8 {
        self.opcodes[index]
    }

    pub fn stack_at(&self, index: usize) -> &[Word] {
        &self.stacks[index]
    }

    pub fn memory_at(&self, index: usize) -> &[u8] {
        &self.memories[index]
    }

    pub fn touches_at(&self, index: usize) -> &[AccountDelta] {
        &self.touches[index]
    }

    pub fn gas_at(&self, index: usize) -> (u64, u64, i64) {
        (
            self.gas_used[index],
            self.gas_limits[index],
            self.gas_refunds[index],
        )
    }

    pub fn address_at(&self, index: usize) -> Address {
        self.addresses[index]
    }

    pub fn error_at(&self, index: usize) -> ErrorCode {
        self.errors[index]
    }

    /// Renders the ordered trace document. Pure: the trace survives.
    pub fn render(&self) -> Vec<TraceStep> {
        (0..self.len())
            .map(|i| TraceStep {
                address: self.addresses[i].to_string(),
                pc: self.pcs[i] as u64,
                opcode: self.opcodes[i],
                stack: self.stacks[i]
                    .iter()
                    .map(|w| format!("0x{:064x}", w))
                    .collect(),
                memory: format!("0x{}", hex::encode(&self.memories[i])),
                touch_state: self.touches[i]
                    .iter()
                    .map(TouchState::from_delta)
                    .collect(),
                gas_used: format!("{:#x}", self.gas_used[i]),
                gas_limit: format!("{:#x}", self.gas_limits[i]),
                gas_refund: format!("{:#x}", self.gas_refunds[i].max(0)),
                error_code: self.errors[i],
            })
            .collect()
    }
}

// `patched` is bookkeeping for the double-patch assertion, not data; two
// traces with identical entries are equal.
impl PartialEq for Trace {
    fn eq(&self, other: &Self) -> bool {
        self.addresses == other.addresses
            && self.pcs == other.pcs
            && self.opcodes == other.opcodes
            && self.gas_used == other.gas_used
            && self.gas_limits == other.gas_limits
            && self.gas_refunds == other.gas_refunds
            && self.errors == other.errors
            && self.stacks == other.stacks
            && self.memories == other.memories
            && self.touches == other.touches
    }
}

impl Eq for Trace {}

/// One element of the rendered trace document.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub address: String,
    pub pc: u64,
    pub opcode: u8,
    pub stack: Vec<String>,
    pub memory: String,
    pub touch_state: Vec<TouchState>,
    pub gas_used: String,
    pub gas_limit: String,
    pub gas_refund: String,
    pub error_code: ErrorCode,
}

#[derive(Debug, Clone, Serialize)]
pub struct TouchState {
    pub address: String,
    pub balance: String,
    pub nonce: String,
    pub status: &'static str,
    pub warm: bool,
    pub storage: BTreeMap<String, String>,
}

impl TouchState {
    fn from_delta(delta: &AccountDelta) -> Self {
        use crate::journal::AccountStatus;
        Self {
            address: delta.address.to_string(),
            balance: format!("{:#x}", delta.balance),
            nonce: format!("{:#x}", delta.nonce),
            status: match delta.status {
                AccountStatus::Untouched => "untouched",
                AccountStatus::Read => "read",
                AccountStatus::Written => "written",
                AccountStatus::Created => "created",
                AccountStatus::Destroyed => "destroyed",
            },
            warm: delta.warm,
            storage: delta
                .storage
                .iter()
                .map(|(k, v)| (format!("{:#x}", k), format!("{:#x}", v)))
                .collect(),
        }
    }
}

/// Rebuilds a trace from raw columns. Only the staging layer uses this;
/// the interpreter always goes through `push`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn from_columns(
    addresses: Vec<Address>,
    pcs: Vec<u32>,
    opcodes: Vec<u8>,
    gas_used: Vec<u64>,
    gas_limits: Vec<u64>,
    gas_refunds: Vec<i64>,
    errors: Vec<ErrorCode>,
    stacks: Vec<Vec<Word>>,
    memories: Vec<Vec<u8>>,
    touches: Vec<Vec<AccountDelta>>,
) -> Trace {
    Trace {
        addresses,
        pcs,
        opcodes,
        gas_used,
        gas_limits,
        gas_refunds,
        errors,
        stacks,
        memories,
        touches,
        patched: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::World;
    use std::sync::Arc;

    fn push_step(trace: &mut Trace, pc: u32, stack: &Stack, memory: &Memory, journal: &Journal) {
        trace.push(StepRecord {
            address: Address::zero(),
            pc,
            opcode: 0x01,
            stack,
            memory,
            journal,
            gas_used: 3,
            gas_limit: 100,
            gas_refund: 0,
            error: ErrorCode::None,
        });
    }

    #[test]
    fn test_snapshots_are_independent() {
        let mut trace = Trace::new();
        let mut stack = Stack::new();
        let mut memory = Memory::new();
        let mut journal = Journal::new(Arc::new(World::new()));
        let _ = journal.snapshot();

        stack.push(Word::from(1u64)).unwrap();
        memory.store_byte(0, 0xaa);
        journal.write_storage(&Address::zero(), &Word::zero(), Word::one());
        push_step(&mut trace, 0, &stack, &memory, &journal);

        // mutate the live frame, then compare against the logged entry
        stack.push(Word::from(2u64)).unwrap();
        memory.store_byte(0, 0xbb);
        journal.write_storage(&Address::zero(), &Word::zero(), Word::from(9u64));

        assert_eq!(trace.stack_at(0), &[Word::from(1u64)]);
        assert_eq!(trace.memory_at(0)[0], 0xaa);
        assert_eq!(trace.touches_at(0)[0].storage, vec![(Word::zero(), Word::one())]);
    }

    #[test]
    fn test_growth_preserves_prefix() {
        let mut trace = Trace::new();
        let stack = Stack::new();
        let memory = Memory::new();
        let journal = Journal::new(Arc::new(World::new()));

        for pc in 0..PAGE as u32 {
            push_step(&mut trace, pc, &stack, &memory, &journal);
        }
        let before: Vec<u32> = (0..trace.len()).map(|i| trace.pc_at(i)).collect();

        // the next push crosses a page boundary
        push_step(&mut trace, PAGE as u32, &stack, &memory, &journal);
        assert_eq!(trace.len(), PAGE + 1);
        for (i, pc) in before.iter().enumerate() {
            assert_eq!(trace.pc_at(i), *pc);
        }
    }

    #[test]
    fn test_modify_last_stack() {
        let mut trace = Trace::new();
        let mut stack = Stack::new();
        let memory = Memory::new();
        let journal = Journal::new(Arc::new(World::new()));

        push_step(&mut trace, 0, &stack, &memory, &journal);
        stack.push(Word::one()).unwrap();
        trace.modify_last_stack(&stack);
        assert_eq!(trace.stack_at(0), &[Word::one()]);

        // a later entry may be patched again
        push_step(&mut trace, 1, &stack, &memory, &journal);
        trace.modify_last_stack(&stack);
    }

    #[test]
    #[should_panic(expected = "patched twice")]
    fn test_double_patch_panics() {
        let mut trace = Trace::new();
        let stack = Stack::new();
        let memory = Memory::new();
        let journal = Journal::new(Arc::new(World::new()));

        push_step(&mut trace, 0, &stack, &memory, &journal);
        trace.modify_last_stack(&stack);
        trace.modify_last_stack(&stack);
    }

    #[test]
    fn test_render_document_shape() {
        let mut trace = Trace::new();
        let mut stack = Stack::new();
        stack.push(Word::from(3u64)).unwrap();
        let memory = Memory::new();
        let journal = Journal::new(Arc::new(World::new()));
        push_step(&mut trace, 4, &stack, &memory, &journal);

        let doc = trace.render();
        assert_eq!(doc.len(), 1);
        assert_eq!(doc[0].pc, 4);
        assert_eq!(doc[0].opcode, 0x01);
        assert_eq!(doc[0].stack, vec![format!("0x{:064x}", Word::from(3u64))]);
        assert_eq!(doc[0].memory, "0x");
        assert_eq!(doc[0].gas_used, "0x3");

        // rendering twice is pure
        assert_eq!(trace.render().len(), 1);
    }
}
