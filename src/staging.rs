use thiserror::Error;

use crate::{
    common::{address::Address, word::Word},
    error::ErrorCode,
    journal::{AccountDelta, AccountStatus},
    tracer::{self, Trace},
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StagingError {
    #[error("Descriptor {instance} points outside the staged pools")]
    OutOfRange { instance: usize },
    #[error("Staged pools are shorter than the descriptors require")]
    Truncated,
    #[error("Unknown error code {0} in staged batch")]
    UnknownErrorCode(u8),
    #[error("Unknown account status {0} in staged batch")]
    UnknownStatus(u8),
}

/// Offsets into the shared pools for one instance. On a real accelerator
/// these fields hold device pointers; in a single address space the
/// fix-up step resolves them to pool offsets instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceDescriptor {
    pub steps: u32,
    pub step_base: u32,
    pub stack_base: u32,
    pub memory_base: u32,
    pub touch_base: u32,
    pub slot_base: u32,
}

/// Flattened account-delta record, POD only; storage pairs live in the
/// slot pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedTouch {
    pub address: [u8; 20],
    pub balance: [u8; 32],
    pub nonce: [u8; 32],
    pub status: u8,
    pub warm: bool,
    pub slots: u32,
}

/// The device-shaped image of a batch of traces: an outer descriptor
/// array over contiguous per-field pools, capacity equal to size
/// everywhere.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceBatch {
    pub descriptors: Vec<TraceDescriptor>,

    // per-step PODs
    pub addresses: Vec<[u8; 20]>,
    pub pcs: Vec<u32>,
    pub opcodes: Vec<u8>,
    pub gas_used: Vec<u64>,
    pub gas_limits: Vec<u64>,
    pub gas_refunds: Vec<i64>,
    pub errors: Vec<u8>,

    // per-step extents into the nested pools
    pub stack_lens: Vec<u32>,
    pub memory_lens: Vec<u32>,
    pub touch_lens: Vec<u32>,

    // nested payloads
    pub stack_words: Vec<[u8; 32]>,
    pub memory_bytes: Vec<u8>,
    pub touch_records: Vec<StagedTouch>,
    pub slot_pairs: Vec<([u8; 32], [u8; 32])>,
}

impl DeviceBatch {
    pub fn instances(&self) -> usize {
        self.descriptors.len()
    }
}

/// Stages a batch of traces into the flat device image.
///
/// Three phases, mirroring a controller that cannot write device pointers
/// directly: size and allocate the outer descriptor array, fill every
/// inner pool while the descriptors are still host-side, then write the
/// fixed-up descriptors into the outer array.
pub fn to_device(traces: &[Trace]) -> DeviceBatch {
    // phase 1: exact pool sizing, no empty tails
    let total_steps: usize = traces.iter().map(|t| t.len()).sum();
    let mut total_stack_words = 0;
    let mut total_memory_bytes = 0;
    let mut total_touches = 0;
    let mut total_slots = 0;
    for trace in traces {
        for i in 0..trace.len() {
            total_stack_words += trace.stack_at(i).len();
            total_memory_bytes += trace.memory_at(i).len();
            let touches = trace.touches_at(i);
            total_touches += touches.len();
            total_slots += touches.iter().map(|d| d.storage.len()).sum::<usize>();
        }
    }
    let mut batch = DeviceBatch {
        descriptors: Vec::with_capacity(traces.len()),
        addresses: Vec::with_capacity(total_steps),
        pcs: Vec::with_capacity(total_steps),
        opcodes: Vec::with_capacity(total_steps),
        gas_used: Vec::with_capacity(total_steps),
        gas_limits: Vec::with_capacity(total_steps),
        gas_refunds: Vec::with_capacity(total_steps),
        errors: Vec::with_capacity(total_steps),
        stack_lens: Vec::with_capacity(total_steps),
        memory_lens: Vec::with_capacity(total_steps),
        touch_lens: Vec::with_capacity(total_steps),
        stack_words: Vec::with_capacity(total_stack_words),
        memory_bytes: Vec::with_capacity(total_memory_bytes),
        touch_records: Vec::with_capacity(total_touches),
        slot_pairs: Vec::with_capacity(total_slots),
    };

    // phase 2: inner copies; descriptors accumulate host-side
    let mut fixed_up = Vec::with_capacity(traces.len());
    for trace in traces {
        let descriptor = TraceDescriptor {
            steps: trace.len() as u32,
            step_base: batch.pcs.len() as u32,
            stack_base: batch.stack_words.len() as u32,
            memory_base: batch.memory_bytes.len() as u32,
            touch_base: batch.touch_records.len() as u32,
            slot_base: batch.slot_pairs.len() as u32,
        };
        for i in 0..trace.len() {
            batch.addresses.push(trace.address_at(i).0);
            batch.pcs.push(trace.pc_at(i));
            batch.opcodes.push(trace.opcode_at(i));
            let (used, limit, refund) = trace.gas_at(i);
            batch.gas_used.push(used);
            batch.gas_limits.push(limit);
            batch.gas_refunds.push(refund);
            batch.errors.push(trace.error_at(i).as_u8());

            let stack = trace.stack_at(i);
            batch.stack_lens.push(stack.len() as u32);
            batch
                .stack_words
                .extend(stack.iter().map(|w| w.into_bytes()));

            let memory = trace.memory_at(i);
            batch.memory_lens.push(memory.len() as u32);
            batch.memory_bytes.extend_from_slice(memory);

            let touches = trace.touches_at(i);
            batch.touch_lens.push(touches.len() as u32);
            for delta in touches {
                batch.touch_records.push(StagedTouch {
                    address: delta.address.0,
                    balance: delta.balance.into_bytes(),
                    nonce: delta.nonce.into_bytes(),
                    status: status_to_u8(delta.status),
                    warm: delta.warm,
                    slots: delta.storage.len() as u32,
                });
                batch
                    .slot_pairs
                    .extend(delta.storage.iter().map(|(k, v)| (k.into_bytes(), v.into_bytes())));
            }
        }
        fixed_up.push(descriptor);
    }

    // phase 3: descriptor fix-up into the outer array
    batch.descriptors = fixed_up;
    batch
}

/// Rebuilds the per-instance traces from a device image. Every descriptor
/// range is validated; on any inconsistency the partially rebuilt batch is
/// dropped and the error surfaced.
pub fn from_device(batch: &DeviceBatch) -> Result<Vec<Trace>, StagingError> {
    let mut traces = Vec::with_capacity(batch.instances());

    for (instance, descriptor) in batch.descriptors.iter().enumerate() {
        let steps = descriptor.steps as usize;
        let base = descriptor.step_base as usize;
        let end = base
            .checked_add(steps)
            .ok_or(StagingError::OutOfRange { instance })?;
        if end > batch.pcs.len() {
            return Err(StagingError::OutOfRange { instance });
        }

        let mut stack_cursor = descriptor.stack_base as usize;
        let mut memory_cursor = descriptor.memory_base as usize;
        let mut touch_cursor = descriptor.touch_base as usize;
        let mut slot_cursor = descriptor.slot_base as usize;

        let mut addresses = Vec::with_capacity(steps);
        let mut errors = Vec::with_capacity(steps);
        let mut stacks = Vec::with_capacity(steps);
        let mut memories = Vec::with_capacity(steps);
        let mut touches = Vec::with_capacity(steps);

        for i in base..end {
            addresses.push(Address::from(batch.addresses[i]));
            errors.push(
                ErrorCode::try_from(batch.errors[i])
                    .map_err(StagingError::UnknownErrorCode)?,
            );

            let stack_len = batch.stack_lens[i] as usize;
            let stack_end = stack_cursor + stack_len;
            if stack_end > batch.stack_words.len() {
                return Err(StagingError::Truncated);
            }
            stacks.push(
                batch.stack_words[stack_cursor..stack_end]
                    .iter()
                    .map(|b| Word::from_bytes(b))
                    .collect::<Vec<_>>(),
            );
            stack_cursor = stack_end;

            let memory_len = batch.memory_lens[i] as usize;
            let memory_end = memory_cursor + memory_len;
            if memory_end > batch.memory_bytes.len() {
                return Err(StagingError::Truncated);
            }
            memories.push(batch.memory_bytes[memory_cursor..memory_end].to_vec());
            memory_cursor = memory_end;

            let touch_len = batch.touch_lens[i] as usize;
            let touch_end = touch_cursor + touch_len;
            if touch_end > batch.touch_records.len() {
                return Err(StagingError::Truncated);
            }
            let mut deltas = Vec::with_capacity(touch_len);
            for record in &batch.touch_records[touch_cursor..touch_end] {
                let slots = record.slots as usize;
                let slot_end = slot_cursor + slots;
                if slot_end > batch.slot_pairs.len() {
                    return Err(StagingError::Truncated);
                }
                deltas.push(AccountDelta {
                    address: Address::from(record.address),
                    balance: Word::from_bytes(&record.balance),
                    nonce: Word::from_bytes(&record.nonce),
                    status: status_from_u8(record.status)?,
                    warm: record.warm,
                    storage: batch.slot_pairs[slot_cursor..slot_end]
                        .iter()
                        .map(|(k, v)| (Word::from_bytes(k), Word::from_bytes(v)))
                        .collect(),
                });
                slot_cursor = slot_end;
            }
            touches.push(deltas);
            touch_cursor = touch_end;
        }

        traces.push(tracer::from_columns(
            addresses,
            batch.pcs[base..end].to_vec(),
            batch.opcodes[base..end].to_vec(),
            batch.gas_used[base..end].to_vec(),
            batch.gas_limits[base..end].to_vec(),
            batch.gas_refunds[base..end].to_vec(),
            errors,
            stacks,
            memories,
            touches,
        ));
    }

    Ok(traces)
}

fn status_to_u8(status: AccountStatus) -> u8 {
    match status {
        AccountStatus::Untouched => 0,
        AccountStatus::Read => 1,
        AccountStatus::Written => 2,
        AccountStatus::Created => 3,
        AccountStatus::Destroyed => 4,
    }
}

fn status_from_u8(value: u8) -> Result<AccountStatus, StagingError> {
    Ok(match value {
        0 => AccountStatus::Untouched,
        1 => AccountStatus::Read,
        2 => AccountStatus::Written,
        3 => AccountStatus::Created,
        4 => AccountStatus::Destroyed,
        other => return Err(StagingError::UnknownStatus(other)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        journal::{Journal, World},
        memory::Memory,
        stack::Stack,
        tracer::StepRecord,
    };
    use std::sync::Arc;

    fn sample_trace(steps: u32, seed: u64) -> Trace {
        let mut trace = Trace::new();
        let mut stack = Stack::new();
        let mut memory = Memory::new();
        let mut journal = Journal::new(Arc::new(World::new()));
        let _ = journal.snapshot();

        for pc in 0..steps {
            stack.push(Word::from(seed + pc as u64)).unwrap();
            memory.store_byte(pc as usize, (seed as u8).wrapping_add(pc as u8));
            journal.write_storage(
                &Address::zero(),
                &Word::from(pc as u64 % 3),
                Word::from(seed + pc as u64),
            );
            trace.push(StepRecord {
                address: Address::zero(),
                pc,
                opcode: (pc % 256) as u8,
                stack: &stack,
                memory: &memory,
                journal: &journal,
                gas_used: 3 * (pc as u64 + 1),
                gas_limit: 1_000_000,
                gas_refund: pc as i64 - 1,
                error: ErrorCode::None,
            });
        }
        trace
    }

    #[test]
    fn test_round_trip_single() {
        let trace = sample_trace(10, 7);
        let staged = to_device(std::slice::from_ref(&trace));
        let restored = from_device(&staged).unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0], trace);
    }

    #[test]
    fn test_round_trip_batch() {
        let traces = vec![sample_trace(5, 1), sample_trace(0, 2), sample_trace(17, 3)];
        let staged = to_device(&traces);
        assert_eq!(staged.instances(), 3);
        let restored = from_device(&staged).unwrap();
        assert_eq!(restored, traces);
    }

    #[test]
    fn test_size_discipline() {
        let traces = vec![sample_trace(4, 9)];
        let staged = to_device(&traces);
        assert_eq!(staged.pcs.len(), 4);
        assert_eq!(staged.pcs.capacity(), 4);
        assert_eq!(staged.stack_words.len(), (1..=4).sum::<usize>());
        assert_eq!(staged.stack_words.capacity(), staged.stack_words.len());
        assert_eq!(staged.memory_bytes.capacity(), staged.memory_bytes.len());
        assert_eq!(staged.slot_pairs.capacity(), staged.slot_pairs.len());
    }

    #[test]
    fn test_corrupt_descriptor_is_rejected() {
        let traces = vec![sample_trace(4, 9)];
        let mut staged = to_device(&traces);
        staged.descriptors[0].steps = 100;
        assert_eq!(
            from_device(&staged),
            Err(StagingError::OutOfRange { instance: 0 })
        );

        let mut staged = to_device(&traces);
        staged.descriptors[0].slot_base = u32::MAX;
        assert!(from_device(&staged).is_err());
    }
}
