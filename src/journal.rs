use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::{
    common::{address::Address, word::Word},
    error::VmError,
};

/// An account as it stood before the transaction.
#[derive(Debug, Clone, Default)]
pub struct BaseAccount {
    pub balance: Word,
    pub nonce: Word,
    pub code: Vec<u8>,
    pub storage: HashMap<Word, Word>,
}

/// The immutable pre-transaction world, shared read-only across instances.
#[derive(Debug, Default)]
pub struct World {
    accounts: HashMap<Address, BaseAccount>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: Address, account: BaseAccount) {
        self.accounts.insert(address, account);
    }

    pub fn account(&self, address: &Address) -> Option<&BaseAccount> {
        self.accounts.get(address)
    }

    pub fn balance(&self, address: &Address) -> Word {
        self.accounts
            .get(address)
            .map(|a| a.balance)
            .unwrap_or_default()
    }

    pub fn nonce(&self, address: &Address) -> Word {
        self.accounts
            .get(address)
            .map(|a| a.nonce)
            .unwrap_or_default()
    }

    pub fn code(&self, address: &Address) -> &[u8] {
        self.accounts
            .get(address)
            .map(|a| a.code.as_slice())
            .unwrap_or_default()
    }

    pub fn storage(&self, address: &Address, key: &Word) -> Word {
        self.accounts
            .get(address)
            .and_then(|a| a.storage.get(key))
            .copied()
            .unwrap_or_default()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.accounts.contains_key(address)
    }
}

/// How far an account has been disturbed within the transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Untouched,
    Read,
    Written,
    Created,
    Destroyed,
}

/// EIP-2929 access-list outcome of touching an address or slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Cold,
    Warm,
}

/// Opaque handle returned by `snapshot`, consumed by `revert`/`commit`.
#[derive(Debug, Clone, Copy)]
pub struct Snapshot(usize);

#[derive(Debug, Clone, Default)]
struct AccountRecord {
    balance: Word,
    nonce: Word,
    code: Vec<u8>,
    // written slots only; reads fall through to the base world
    storage: HashMap<Word, Word>,
    status: AccountStatus,
}

#[derive(Debug, Clone)]
struct AccountUndo {
    balance: Word,
    nonce: Word,
    code: Vec<u8>,
    status: AccountStatus,
}

/// One undo layer, pushed by `snapshot`. Maps hold the value observed the
/// first time this layer disturbed the entry; `None` means "absent".
#[derive(Debug, Default)]
struct Layer {
    accounts: HashMap<Address, Option<AccountUndo>>,
    slots: HashMap<(Address, Word), Option<Word>>,
    warmed_addresses: HashSet<Address>,
    warmed_slots: HashSet<(Address, Word)>,
    destroyed_len: usize,
}

/// Per-step snapshot of one disturbed account, consumed by the tracer and
/// the trace document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountDelta {
    pub address: Address,
    pub balance: Word,
    pub nonce: Word,
    pub status: AccountStatus,
    pub warm: bool,
    pub storage: Vec<(Word, Word)>,
}

/// The touched-state journal: per-instance account deltas layered over the
/// shared base world, with snapshot/revert/commit, EIP-2929 warmth and
/// EIP-2200 original-value tracking.
#[derive(Debug, Default)]
pub struct Journal {
    world: Arc<World>,
    accounts: HashMap<Address, AccountRecord>,
    // transaction-start slot values, first-access wins
    original: HashMap<(Address, Word), Word>,
    warm_addresses: HashSet<Address>,
    warm_slots: HashSet<(Address, Word)>,
    // (victim, beneficiary) in call order; settled once at end of tx
    destroyed: Vec<(Address, Address)>,
    layers: Vec<Layer>,
}

impl Journal {
    pub fn new(world: Arc<World>) -> Self {
        Self {
            world,
            ..Default::default()
        }
    }

    pub fn world(&self) -> &Arc<World> {
        &self.world
    }

    pub fn snapshot(&mut self) -> Snapshot {
        self.layers.push(Layer {
            destroyed_len: self.destroyed.len(),
            ..Default::default()
        });
        Snapshot(self.layers.len() - 1)
    }

    /// Restores every observable bit (accounts, slots, warmth, destruct
    /// set) to the moment `snapshot` produced the handle.
    pub fn revert(&mut self, snapshot: Snapshot) {
        assert!(
            snapshot.0 < self.layers.len(),
            "revert of a dead journal layer"
        );
        while self.layers.len() > snapshot.0 {
            let layer = self.layers.pop().expect("layer count checked above");
            self.unwind(layer);
        }
    }

    /// Discards rollback info gathered since the handle, folding it into
    /// the enclosing layer so an outer revert still covers it.
    pub fn commit(&mut self, snapshot: Snapshot) {
        assert!(
            snapshot.0 < self.layers.len(),
            "commit of a dead journal layer"
        );
        while self.layers.len() > snapshot.0 {
            let layer = self.layers.pop().expect("layer count checked above");
            match self.layers.last_mut() {
                Some(parent) => {
                    for (addr, undo) in layer.accounts {
                        parent.accounts.entry(addr).or_insert(undo);
                    }
                    for (slot, undo) in layer.slots {
                        parent.slots.entry(slot).or_insert(undo);
                    }
                    parent.warmed_addresses.extend(layer.warmed_addresses);
                    parent.warmed_slots.extend(layer.warmed_slots);
                    // parent keeps its earlier destruct-set watermark
                }
                None => drop(layer),
            }
        }
    }

    fn unwind(&mut self, layer: Layer) {
        for ((addr, key), prior) in layer.slots {
            if let Some(record) = self.accounts.get_mut(&addr) {
                match prior {
                    Some(value) => {
                        record.storage.insert(key, value);
                    }
                    None => {
                        record.storage.remove(&key);
                    }
                }
            }
        }
        for (addr, undo) in layer.accounts {
            match undo {
                Some(undo) => {
                    let record = self
                        .accounts
                        .get_mut(&addr)
                        .expect("undone account must exist");
                    record.balance = undo.balance;
                    record.nonce = undo.nonce;
                    record.code = undo.code;
                    record.status = undo.status;
                }
                None => {
                    self.accounts.remove(&addr);
                }
            }
        }
        for addr in layer.warmed_addresses {
            self.warm_addresses.remove(&addr);
        }
        for slot in layer.warmed_slots {
            self.warm_slots.remove(&slot);
        }
        self.destroyed.truncate(layer.destroyed_len);
    }

    fn save_account(&mut self, addr: &Address) {
        let prior = self.accounts.get(addr).map(|r| AccountUndo {
            balance: r.balance,
            nonce: r.nonce,
            code: r.code.clone(),
            status: r.status,
        });
        if let Some(layer) = self.layers.last_mut() {
            layer.accounts.entry(*addr).or_insert(prior);
        }
    }

    fn save_slot(&mut self, addr: &Address, key: &Word) {
        let prior = self
            .accounts
            .get(addr)
            .and_then(|r| r.storage.get(key).copied());
        if let Some(layer) = self.layers.last_mut() {
            layer.slots.entry((*addr, *key)).or_insert(prior);
        }
    }

    fn record_mut(&mut self, addr: &Address) -> &mut AccountRecord {
        self.save_account(addr);
        let world = &self.world;
        self.accounts.entry(*addr).or_insert_with(|| {
            let base = world.account(addr);
            AccountRecord {
                balance: base.map(|a| a.balance).unwrap_or_default(),
                nonce: base.map(|a| a.nonce).unwrap_or_default(),
                code: base.map(|a| a.code.clone()).unwrap_or_default(),
                storage: HashMap::new(),
                status: AccountStatus::Read,
            }
        })
    }

    fn bump_status(&mut self, addr: &Address, status: AccountStatus) {
        let record = self.record_mut(addr);
        // created/destroyed stick; read never downgrades written
        let keep = matches!(
            (record.status, status),
            (AccountStatus::Created, _)
                | (AccountStatus::Destroyed, _)
                | (AccountStatus::Written, AccountStatus::Read)
        );
        if !keep {
            record.status = status;
        }
    }

    /// Lifts the address from cold to warm, reporting which it was. The
    /// prior warmth is journaled and restored on revert.
    pub fn touch_account(&mut self, addr: &Address) -> Access {
        self.bump_status(addr, AccountStatus::Read);
        if self.warm_addresses.insert(*addr) {
            if let Some(layer) = self.layers.last_mut() {
                layer.warmed_addresses.insert(*addr);
            }
            Access::Cold
        } else {
            Access::Warm
        }
    }

    /// Lifts the storage slot from cold to warm, reporting which it was.
    pub fn touch_slot(&mut self, addr: &Address, key: &Word) -> Access {
        if self.warm_slots.insert((*addr, *key)) {
            if let Some(layer) = self.layers.last_mut() {
                layer.warmed_slots.insert((*addr, *key));
            }
            Access::Cold
        } else {
            Access::Warm
        }
    }

    pub fn is_warm(&self, addr: &Address) -> bool {
        self.warm_addresses.contains(addr)
    }

    /// Current slot value, 0 when absent everywhere. Records the
    /// transaction-start value on first sight.
    pub fn read_storage(&mut self, addr: &Address, key: &Word) -> Word {
        let base = self.world.storage(addr, key);
        self.original.entry((*addr, *key)).or_insert(base);
        self.bump_status(addr, AccountStatus::Read);
        self.accounts
            .get(addr)
            .and_then(|r| r.storage.get(key).copied())
            .unwrap_or(base)
    }

    /// The slot value at transaction start (EIP-2200 "original").
    pub fn original_storage(&mut self, addr: &Address, key: &Word) -> Word {
        let base = self.world.storage(addr, key);
        *self.original.entry((*addr, *key)).or_insert(base)
    }

    pub fn write_storage(&mut self, addr: &Address, key: &Word, value: Word) {
        let base = self.world.storage(addr, key);
        self.original.entry((*addr, *key)).or_insert(base);
        self.save_slot(addr, key);
        self.bump_status(addr, AccountStatus::Written);
        let record = self.record_mut(addr);
        record.storage.insert(*key, value);
    }

    pub fn balance(&self, addr: &Address) -> Word {
        self.accounts
            .get(addr)
            .map(|r| r.balance)
            .unwrap_or_else(|| self.world.balance(addr))
    }

    pub fn nonce(&self, addr: &Address) -> Word {
        self.accounts
            .get(addr)
            .map(|r| r.nonce)
            .unwrap_or_else(|| self.world.nonce(addr))
    }

    pub fn code(&self, addr: &Address) -> Vec<u8> {
        self.accounts
            .get(addr)
            .map(|r| r.code.clone())
            .unwrap_or_else(|| self.world.code(addr).to_vec())
    }

    pub fn code_len(&self, addr: &Address) -> usize {
        self.accounts
            .get(addr)
            .map(|r| r.code.len())
            .unwrap_or_else(|| self.world.code(addr).len())
    }

    /// True when the account has no balance, no nonce and no code anywhere.
    pub fn is_empty(&self, addr: &Address) -> bool {
        self.balance(addr).is_zero() && self.nonce(addr).is_zero() && self.code_len(addr) == 0
    }

    pub fn set_balance(&mut self, addr: &Address, balance: Word) {
        self.bump_status(addr, AccountStatus::Written);
        self.record_mut(addr).balance = balance;
    }

    pub fn transfer(&mut self, from: &Address, to: &Address, value: Word) -> Result<(), VmError> {
        if value.is_zero() {
            return Ok(());
        }
        let available = self.balance(from);
        if available < value {
            return Err(VmError::InsufficientBalance);
        }
        self.set_balance(from, available - value);
        let credited = self.balance(to) + value;
        self.set_balance(to, credited);
        Ok(())
    }

    pub fn bump_nonce(&mut self, addr: &Address) {
        self.bump_status(addr, AccountStatus::Written);
        let record = self.record_mut(addr);
        record.nonce += Word::one();
    }

    pub fn set_code(&mut self, addr: &Address, code: Vec<u8>) {
        self.bump_status(addr, AccountStatus::Written);
        self.record_mut(addr).code = code;
    }

    /// Marks a fresh contract account: status created, nonce 1 (EIP-161).
    pub fn create_account(&mut self, addr: &Address) {
        self.save_account(addr);
        let record = self.record_mut(addr);
        record.status = AccountStatus::Created;
        record.nonce = Word::one();
    }

    /// Queues the account for destruction. Balance moves to the
    /// beneficiary at `settle`; reads keep answering until then. Returns
    /// whether this is the first destruct of the address this transaction.
    pub fn selfdestruct(&mut self, addr: &Address, beneficiary: &Address) -> bool {
        let first = !self.destroyed.iter().any(|(victim, _)| victim == addr);
        self.bump_status(addr, AccountStatus::Destroyed);
        self.destroyed.push((*addr, *beneficiary));
        first
    }

    /// End-of-transaction settlement: each destroyed account credits its
    /// beneficiary once (first queued beneficiary wins) and is emptied.
    pub fn settle(&mut self) {
        let queue = self.destroyed.clone();
        let mut settled: HashSet<Address> = HashSet::new();
        for (victim, beneficiary) in queue {
            if !settled.insert(victim) {
                continue;
            }
            let balance = self.balance(&victim);
            if !balance.is_zero() && victim != beneficiary {
                let credited = self.balance(&beneficiary) + balance;
                self.set_balance(&beneficiary, credited);
            }
            let record = self.record_mut(&victim);
            record.balance = Word::zero();
            record.nonce = Word::zero();
            record.code = Vec::new();
            record.storage.clear();
            record.status = AccountStatus::Destroyed;
        }
    }

    /// Deep-copy snapshot of every disturbed account, ordered by address.
    pub fn deltas(&self) -> Vec<AccountDelta> {
        let mut deltas: Vec<AccountDelta> = self
            .accounts
            .iter()
            .map(|(addr, record)| {
                let mut storage: Vec<(Word, Word)> = record
                    .storage
                    .iter()
                    .map(|(k, v)| (*k, *v))
                    .collect();
                storage.sort_by_key(|(k, _)| *k);
                AccountDelta {
                    address: *addr,
                    balance: record.balance,
                    nonce: record.nonce,
                    status: record.status,
                    warm: self.warm_addresses.contains(addr),
                    storage,
                }
            })
            .collect();
        deltas.sort_by_key(|d| d.address);
        deltas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::address::addr;

    fn world_with(addr: Address, balance: u64, slot: (u64, u64)) -> Arc<World> {
        let mut world = World::new();
        let mut storage = HashMap::new();
        storage.insert(Word::from(slot.0), Word::from(slot.1));
        world.insert(
            addr,
            BaseAccount {
                balance: Word::from(balance),
                nonce: Word::one(),
                code: vec![0x60, 0x00],
                storage,
            },
        );
        Arc::new(world)
    }

    const A: Address = addr("00000000000000000000000000000000000000aa");
    const B: Address = addr("00000000000000000000000000000000000000bb");

    #[test]
    fn test_read_through_base() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        assert_eq!(journal.balance(&A), Word::from(100u64));
        assert_eq!(journal.read_storage(&A, &Word::one()), Word::from(7u64));
        assert_eq!(journal.read_storage(&A, &Word::from(9u64)), Word::zero());
        assert_eq!(journal.balance(&B), Word::zero());
    }

    #[test]
    fn test_revert_restores_storage_and_balance() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        let snap = journal.snapshot();
        journal.write_storage(&A, &Word::one(), Word::from(42u64));
        journal.set_balance(&A, Word::from(5u64));
        assert_eq!(journal.read_storage(&A, &Word::one()), Word::from(42u64));

        journal.revert(snap);
        // the record itself is gone again
        assert!(journal.deltas().is_empty());
        assert_eq!(journal.read_storage(&A, &Word::one()), Word::from(7u64));
        assert_eq!(journal.balance(&A), Word::from(100u64));
    }

    #[test]
    fn test_revert_restores_warmth() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        let outer = journal.snapshot();
        assert_eq!(journal.touch_account(&A), Access::Cold);

        let inner = journal.snapshot();
        assert_eq!(journal.touch_account(&B), Access::Cold);
        assert_eq!(journal.touch_slot(&A, &Word::one()), Access::Cold);
        journal.revert(inner);

        // B and the slot cooled back down, A stays warm
        assert_eq!(journal.touch_account(&B), Access::Cold);
        assert_eq!(journal.touch_slot(&A, &Word::one()), Access::Cold);
        assert_eq!(journal.touch_account(&A), Access::Warm);

        journal.revert(outer);
        assert_eq!(journal.touch_account(&A), Access::Cold);
    }

    #[test]
    fn test_commit_folds_into_parent() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        let outer = journal.snapshot();
        journal.write_storage(&A, &Word::one(), Word::from(10u64));

        let inner = journal.snapshot();
        journal.write_storage(&A, &Word::one(), Word::from(20u64));
        journal.write_storage(&A, &Word::from(2u64), Word::from(30u64));
        journal.commit(inner);

        // committed values survive
        assert_eq!(journal.read_storage(&A, &Word::one()), Word::from(20u64));
        assert_eq!(
            journal.read_storage(&A, &Word::from(2u64)),
            Word::from(30u64)
        );

        // but the outer revert still rolls everything back
        journal.revert(outer);
        assert_eq!(journal.read_storage(&A, &Word::one()), Word::from(7u64));
        assert_eq!(journal.read_storage(&A, &Word::from(2u64)), Word::zero());
    }

    #[test]
    fn test_original_is_transaction_scoped() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        let snap = journal.snapshot();
        journal.write_storage(&A, &Word::one(), Word::from(42u64));
        assert_eq!(journal.original_storage(&A, &Word::one()), Word::from(7u64));
        journal.revert(snap);
        assert_eq!(journal.original_storage(&A, &Word::one()), Word::from(7u64));
    }

    #[test]
    fn test_transfer_checks_balance() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        let _ = journal.snapshot();
        assert_eq!(
            journal.transfer(&A, &B, Word::from(200u64)),
            Err(VmError::InsufficientBalance)
        );
        journal.transfer(&A, &B, Word::from(60u64)).unwrap();
        assert_eq!(journal.balance(&A), Word::from(40u64));
        assert_eq!(journal.balance(&B), Word::from(60u64));
    }

    #[test]
    fn test_selfdestruct_settles_once() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        let _ = journal.snapshot();
        assert!(journal.selfdestruct(&A, &B));
        assert!(!journal.selfdestruct(&A, &B));
        // still answers reads before settlement
        assert_eq!(journal.balance(&A), Word::from(100u64));

        journal.settle();
        assert_eq!(journal.balance(&A), Word::zero());
        assert_eq!(journal.balance(&B), Word::from(100u64));
        assert_eq!(journal.code_len(&A), 0);
    }

    #[test]
    fn test_selfdestruct_reverts_with_frame() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        let snap = journal.snapshot();
        journal.selfdestruct(&A, &B);
        journal.revert(snap);
        journal.settle();
        assert_eq!(journal.balance(&A), Word::from(100u64));
        assert_eq!(journal.balance(&B), Word::zero());
    }

    #[test]
    fn test_created_account_status() {
        let mut journal = Journal::new(Arc::new(World::new()));
        let _ = journal.snapshot();
        journal.create_account(&A);
        journal.set_code(&A, vec![0x00]);
        let deltas = journal.deltas();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].status, AccountStatus::Created);
        assert_eq!(journal.nonce(&A), Word::one());
    }

    #[test]
    fn test_deltas_are_sorted_and_deep() {
        let mut journal = Journal::new(world_with(A, 100, (1, 7)));
        let _ = journal.snapshot();
        journal.write_storage(&B, &Word::from(5u64), Word::from(6u64));
        journal.write_storage(&A, &Word::one(), Word::from(2u64));
        let deltas = journal.deltas();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].address, A);
        assert_eq!(deltas[1].address, B);
        assert_eq!(deltas[0].storage, vec![(Word::one(), Word::from(2u64))]);

        // later mutation is invisible through the copies
        journal.write_storage(&A, &Word::one(), Word::from(99u64));
        assert_eq!(deltas[0].storage, vec![(Word::one(), Word::from(2u64))]);
    }
}
