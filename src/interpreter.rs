use std::sync::Arc;

use crate::{
    common::{address::Address, hash::keccak_word, word::Word},
    decoder::{Bytecode, Decoder, Instruction},
    error::{ErrorCode, VmError},
    gas::{self, Gas},
    journal::{AccountDelta, Journal, World},
    memory::Memory,
    message::{CallKind, Message, CALL_DEPTH_LIMIT},
    stack::Stack,
    tracer::{StepRecord, Trace},
};

/// EIP-170 deployed-code size cap.
pub const MAX_CODE_SIZE: usize = 24576;

/// Final state of one instance: the last frame's error code, settled gas,
/// return payload and the full per-step trace.
#[derive(Debug)]
pub struct Outcome {
    pub error: ErrorCode,
    pub gas_used: u64,
    pub gas_refund: i64,
    pub ret: Vec<u8>,
    pub trace: Trace,
    /// Journal deltas after settlement (or rollback), the instance's
    /// post-state as the driver reports it.
    pub post_state: Vec<AccountDelta>,
}

struct FrameResult {
    error: ErrorCode,
    gas_left: u64,
    refund: i64,
    output: Vec<u8>,
}

enum Control {
    Continue,
    Jump(usize),
    Stop,
    Return,
    Revert,
}

/// Everything owned by one call frame. Stacks and memories are never
/// shared across depth; the journal and trace belong to the instance.
struct Frame<'m> {
    msg: &'m Message,
    stack: Stack,
    memory: Memory,
    gas: Gas,
    return_data: Vec<u8>,
    output: Vec<u8>,
    // set by call-family handlers that push their own (patched) entry
    traced: bool,
}

impl Frame<'_> {
    fn new(msg: &Message) -> Frame<'_> {
        Frame {
            msg,
            stack: Stack::new(),
            memory: Memory::new(),
            gas: Gas::new(msg.gas_limit),
            return_data: Vec::new(),
            output: Vec::new(),
            traced: false,
        }
    }

    /// Charges memory expansion for the range before any mutation.
    fn charge_memory(&mut self, offset: usize, len: usize) -> Result<(), VmError> {
        let words = Memory::words_for(offset, len);
        self.gas.charge(self.memory.expansion_cost(words))
    }
}

/// Executes one instance: a synchronous opcode loop over its own journal
/// and trace, recursing for nested calls.
pub struct Interpreter {
    journal: Journal,
    trace: Trace,
    steps: u64,
    step_budget: Option<u64>,
}

impl Interpreter {
    pub fn new(world: Arc<World>) -> Self {
        Self {
            journal: Journal::new(world),
            trace: Trace::new(),
            steps: 0,
            step_budget: None,
        }
    }

    /// Caps the instance at `budget` instructions; on exceed the frame
    /// halts with `Aborted` at the next instruction boundary.
    pub fn with_step_budget(mut self, budget: u64) -> Self {
        self.step_budget = Some(budget);
        self
    }

    pub fn run(mut self, msg: Message) -> Outcome {
        let mut msg = msg;
        self.journal.touch_account(&msg.origin);
        if msg.kind.is_create() && msg.to.is_zero() {
            msg.to = msg.caller.create(self.journal.nonce(&msg.caller));
        }
        self.journal.touch_account(&msg.to);

        tracing::debug!(to = %msg.to, kind = ?msg.kind, gas = msg.gas_limit, "instance start");

        let mut result = if msg.kind.is_create() {
            let code = Decoder::decode(&msg.data);
            let exec_msg = Message {
                data: Vec::new(),
                ..msg.clone()
            };
            self.journal.bump_nonce(&msg.caller);
            let snap = self.journal.snapshot();
            let mut result = self.execute(&exec_msg, &code);
            if result.error == ErrorCode::None {
                let deposit = gas::GAS_CODE_DEPOSIT * result.output.len() as u64;
                if result.output.len() > MAX_CODE_SIZE || result.gas_left < deposit {
                    self.journal.revert(snap);
                    result.error = ErrorCode::OutOfGas;
                    result.gas_left = 0;
                    result.refund = 0;
                    result.output = Vec::new();
                } else {
                    result.gas_left -= deposit;
                    self.journal.set_code(&msg.to, result.output.clone());
                    self.journal.commit(snap);
                }
            } else {
                self.journal.revert(snap);
            }
            result
        } else {
            let code = Decoder::decode(&self.journal.code(&msg.to));
            self.execute(&msg, &code)
        };

        if result.error == ErrorCode::None {
            self.journal.settle();
        }

        let used = msg.gas_limit - result.gas_left;
        // EIP-3529: at most a fifth of the gas spent comes back
        let capped = (result.refund.max(0) as u64).min(used / 5);
        tracing::debug!(error = ?result.error, gas_used = used - capped, "instance done");
        Outcome {
            error: result.error,
            gas_used: used - capped,
            gas_refund: result.refund,
            ret: std::mem::take(&mut result.output),
            post_state: self.journal.deltas(),
            trace: self.trace,
        }
    }

    /// Runs one frame to completion. The journal snapshot taken on entry
    /// is committed on success and reverted on REVERT and on every
    /// deterministic fault.
    fn execute(&mut self, msg: &Message, code: &Bytecode) -> FrameResult {
        let snap = self.journal.snapshot();

        let do_transfer = matches!(
            msg.kind,
            CallKind::Call | CallKind::Create | CallKind::Create2
        );
        if msg.kind.is_create() {
            self.journal.create_account(&msg.to);
        }
        if do_transfer {
            if let Err(fault) = self.journal.transfer(&msg.caller, &msg.to, msg.value) {
                self.journal.revert(snap);
                return FrameResult {
                    error: fault.code(),
                    gas_left: 0,
                    refund: 0,
                    output: Vec::new(),
                };
            }
        }

        let mut frame = Frame::new(msg);
        let mut pc = 0usize;

        loop {
            let Some(ins) = code.instructions.get(pc) else {
                // ran off the end of the code: implicit STOP
                break;
            };

            self.steps += 1;
            if let Some(budget) = self.step_budget {
                if self.steps > budget {
                    self.trace_step(&frame, ins, ErrorCode::Aborted);
                    return FrameResult {
                        error: ErrorCode::Aborted,
                        gas_left: frame.gas.remaining(),
                        refund: frame.gas.refund(),
                        output: Vec::new(),
                    };
                }
            }

            frame.traced = false;
            let result = frame
                .gas
                .charge(ins.opcode.gas as u64)
                .and_then(|_| self.exec(&mut frame, code, ins));

            match result {
                Ok(Control::Continue) => {
                    if !frame.traced {
                        self.trace_step(&frame, ins, ErrorCode::None);
                    }
                    pc += 1;
                }
                Ok(Control::Jump(index)) => {
                    self.trace_step(&frame, ins, ErrorCode::None);
                    pc = index;
                }
                Ok(Control::Stop) => {
                    self.trace_step(&frame, ins, ErrorCode::None);
                    self.journal.commit(snap);
                    return FrameResult {
                        error: ErrorCode::None,
                        gas_left: frame.gas.remaining(),
                        refund: frame.gas.refund(),
                        output: Vec::new(),
                    };
                }
                Ok(Control::Return) => {
                    self.trace_step(&frame, ins, ErrorCode::None);
                    self.journal.commit(snap);
                    return FrameResult {
                        error: ErrorCode::None,
                        gas_left: frame.gas.remaining(),
                        refund: frame.gas.refund(),
                        output: std::mem::take(&mut frame.output),
                    };
                }
                Ok(Control::Revert) => {
                    self.trace_step(&frame, ins, ErrorCode::Revert);
                    self.journal.revert(snap);
                    return FrameResult {
                        error: ErrorCode::Revert,
                        gas_left: frame.gas.remaining(),
                        refund: 0,
                        output: std::mem::take(&mut frame.output),
                    };
                }
                Err(VmError::Aborted) => {
                    // resource fault: no rollback, the partial state stands
                    if !frame.traced {
                        self.trace_step(&frame, ins, ErrorCode::Aborted);
                    }
                    return FrameResult {
                        error: ErrorCode::Aborted,
                        gas_left: frame.gas.remaining(),
                        refund: frame.gas.refund(),
                        output: Vec::new(),
                    };
                }
                Err(fault) => {
                    frame.gas.consume_all();
                    if !frame.traced {
                        self.trace_step(&frame, ins, fault.code());
                    }
                    self.journal.revert(snap);
                    return FrameResult {
                        error: fault.code(),
                        gas_left: 0,
                        refund: 0,
                        output: Vec::new(),
                    };
                }
            }
        }

        self.journal.commit(snap);
        FrameResult {
            error: ErrorCode::None,
            gas_left: frame.gas.remaining(),
            refund: frame.gas.refund(),
            output: Vec::new(),
        }
    }

    fn trace_step(&mut self, frame: &Frame<'_>, ins: &Instruction, error: ErrorCode) {
        self.trace.push(StepRecord {
            address: frame.msg.to,
            pc: ins.offset as u32,
            opcode: ins.opcode.code,
            stack: &frame.stack,
            memory: &frame.memory,
            journal: &self.journal,
            gas_used: frame.gas.used(),
            gas_limit: frame.gas.limit(),
            gas_refund: frame.gas.refund(),
            error,
        });
    }

    fn exec(
        &mut self,
        frame: &mut Frame<'_>,
        code: &Bytecode,
        ins: &Instruction,
    ) -> Result<Control, VmError> {
        let opcode = ins.opcode.code;
        match opcode {
            // 0x00: STOP
            0x00 => return Ok(Control::Stop),

            // 0x01..0x0b: arithmetic
            0x01 => {
                // ADD
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a.overflowing_add(b).0)?;
            }
            0x02 => {
                // MUL
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a.overflowing_mul(b).0)?;
            }
            0x03 => {
                // SUB
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a.overflowing_sub(b).0)?;
            }
            0x04 => {
                // DIV
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a.div_evm(&b))?;
            }
            0x05 => {
                // SDIV
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a.sdiv(&b))?;
            }
            0x06 => {
                // MOD
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a.mod_evm(&b))?;
            }
            0x07 => {
                // SMOD
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a.smod(&b))?;
            }
            0x08 => {
                // ADDMOD
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                let n = frame.stack.pop()?;
                frame.stack.push(a.add_modulo(&b, &n))?;
            }
            0x09 => {
                // MULMOD
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                let n = frame.stack.pop()?;
                frame.stack.push(a.mul_modulo(&b, &n))?;
            }
            0x0a => {
                // EXP
                let base = frame.stack.pop()?;
                let exponent = frame.stack.pop()?;
                frame.gas.charge(gas::exp_cost(&exponent))?;
                frame.stack.push(base.pow(exponent))?;
            }
            0x0b => {
                // SIGNEXTEND
                let b = frame.stack.pop()?;
                let x = frame.stack.pop()?;
                frame.stack.push(x.signextend(&b))?;
            }

            // 0x10..0x1d: comparison & bitwise logic
            0x10 => {
                // LT
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(Word::from_bool(a < b))?;
            }
            0x11 => {
                // GT
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(Word::from_bool(a > b))?;
            }
            0x12 => {
                // SLT
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(Word::from_bool(a.slt(&b)))?;
            }
            0x13 => {
                // SGT
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(Word::from_bool(a.sgt(&b)))?;
            }
            0x14 => {
                // EQ
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(Word::from_bool(a == b))?;
            }
            0x15 => {
                // ISZERO
                let a = frame.stack.pop()?;
                frame.stack.push(Word::from_bool(a.is_zero()))?;
            }
            0x16 => {
                // AND
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a & b)?;
            }
            0x17 => {
                // OR
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a | b)?;
            }
            0x18 => {
                // XOR
                let a = frame.stack.pop()?;
                let b = frame.stack.pop()?;
                frame.stack.push(a ^ b)?;
            }
            0x19 => {
                // NOT
                let a = frame.stack.pop()?;
                frame.stack.push(!a)?;
            }
            0x1a => {
                // BYTE
                let index = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                frame.stack.push(value.byte(&index))?;
            }
            0x1b => {
                // SHL
                let shift = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                frame.stack.push(value.shift_left(&shift))?;
            }
            0x1c => {
                // SHR
                let shift = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                frame.stack.push(value.shift_right(&shift))?;
            }
            0x1d => {
                // SAR
                let shift = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                frame.stack.push(value.sar(&shift))?;
            }

            0x20 => {
                // KECCAK256
                let offset = frame.stack.pop()?;
                let len = frame.stack.pop()?;
                let (offset, len) = Memory::range(&offset, &len)?;
                frame.charge_memory(offset, len)?;
                frame.gas.charge(gas::keccak_cost(len))?;
                let data = frame.memory.read(offset, len);
                frame.stack.push(keccak_word(&data))?;
            }

            // 0x30..0x3f: environment
            0x30 => {
                // ADDRESS
                frame.stack.push(frame.msg.to.as_word())?;
            }
            0x31 => {
                // BALANCE
                let target = Address::from(&frame.stack.pop()?);
                let access = self.journal.touch_account(&target);
                frame.gas.charge(gas::account_access_cost(access))?;
                frame.stack.push(self.journal.balance(&target))?;
            }
            0x32 => {
                // ORIGIN
                frame.stack.push(frame.msg.origin.as_word())?;
            }
            0x33 => {
                // CALLER
                frame.stack.push(frame.msg.caller.as_word())?;
            }
            0x34 => {
                // CALLVALUE
                frame.stack.push(frame.msg.value)?;
            }
            0x35 => {
                // CALLDATALOAD
                let offset = frame.stack.pop()?;
                let available = frame.msg.input_slice(&offset, 32);
                let mut data = [0u8; 32];
                data[..available.len()].copy_from_slice(available);
                frame.stack.push(Word::from_bytes(&data))?;
            }
            0x36 => {
                // CALLDATASIZE
                frame.stack.push(Word::from(frame.msg.data.len()))?;
            }
            0x37 => {
                // CALLDATACOPY
                let dst = frame.stack.pop()?;
                let offset = frame.stack.pop()?;
                let len = frame.stack.pop()?;
                let (dst, len) = Memory::range(&dst, &len)?;
                frame.charge_memory(dst, len)?;
                frame.gas.charge(gas::copy_cost(len))?;
                let mut data = vec![0u8; len];
                let available = frame.msg.input_slice(&offset, len);
                data[..available.len()].copy_from_slice(available);
                frame.memory.write(dst, &data);
            }
            0x38 => {
                // CODESIZE
                frame.stack.push(Word::from(code.bytecode.len()))?;
            }
            0x39 => {
                // CODECOPY
                let dst = frame.stack.pop()?;
                let offset = frame.stack.pop()?;
                let len = frame.stack.pop()?;
                let (dst, len) = Memory::range(&dst, &len)?;
                frame.charge_memory(dst, len)?;
                frame.gas.charge(gas::copy_cost(len))?;
                frame.memory.write(dst, &slice_padded(&code.bytecode, &offset, len));
            }
            0x3a => {
                // GASPRICE
                frame.stack.push(frame.msg.gas_price)?;
            }
            0x3b => {
                // EXTCODESIZE
                let target = Address::from(&frame.stack.pop()?);
                let access = self.journal.touch_account(&target);
                frame.gas.charge(gas::account_access_cost(access))?;
                frame.stack.push(Word::from(self.journal.code_len(&target)))?;
            }
            0x3c => {
                // EXTCODECOPY
                let target = Address::from(&frame.stack.pop()?);
                let dst = frame.stack.pop()?;
                let offset = frame.stack.pop()?;
                let len = frame.stack.pop()?;
                let (dst, len) = Memory::range(&dst, &len)?;
                let access = self.journal.touch_account(&target);
                frame.gas.charge(gas::account_access_cost(access))?;
                frame.charge_memory(dst, len)?;
                frame.gas.charge(gas::copy_cost(len))?;
                let ext_code = self.journal.code(&target);
                frame.memory.write(dst, &slice_padded(&ext_code, &offset, len));
            }
            0x3d => {
                // RETURNDATASIZE
                frame.stack.push(Word::from(frame.return_data.len()))?;
            }
            0x3e => {
                // RETURNDATACOPY
                let dst = frame.stack.pop()?;
                let offset = frame.stack.pop()?;
                let len = frame.stack.pop()?;
                let (dst, len) = Memory::range(&dst, &len)?;
                // unlike calldata, return-data reads past the end fault
                let start = offset.as_u64() as usize;
                let end = start.checked_add(len);
                if !offset.fits_u64()
                    || !end.is_some_and(|end| end <= frame.return_data.len())
                {
                    return Err(VmError::ReturnDataOob);
                }
                frame.charge_memory(dst, len)?;
                frame.gas.charge(gas::copy_cost(len))?;
                let data = frame.return_data[start..start + len].to_vec();
                frame.memory.write(dst, &data);
            }
            0x3f => {
                // EXTCODEHASH
                let target = Address::from(&frame.stack.pop()?);
                let access = self.journal.touch_account(&target);
                frame.gas.charge(gas::account_access_cost(access))?;
                if self.journal.is_empty(&target) {
                    frame.stack.push(Word::zero())?;
                } else {
                    frame.stack.push(keccak_word(&self.journal.code(&target)))?;
                }
            }

            // 0x40..0x48: block information. The fixture format carries no
            // block context, so these report neutral values.
            0x40 => {
                // BLOCKHASH
                let _number = frame.stack.pop()?;
                frame.stack.push(Word::zero())?;
            }
            0x41..=0x44 => {
                // COINBASE | TIMESTAMP | NUMBER | DIFFICULTY
                frame.stack.push(Word::zero())?;
            }
            0x45 => {
                // GASLIMIT
                frame.stack.push(Word::from(frame.msg.gas_limit))?;
            }
            0x46 => {
                // CHAINID
                frame.stack.push(Word::one())?;
            }
            0x47 => {
                // SELFBALANCE
                frame.stack.push(self.journal.balance(&frame.msg.to))?;
            }
            0x48 => {
                // BASEFEE
                frame.stack.push(Word::zero())?;
            }

            // 0x50s: stack, memory, storage and flow
            0x50 => {
                // POP
                frame.stack.pop()?;
            }
            0x51 => {
                // MLOAD
                let offset = frame.stack.pop()?;
                let (offset, _) = Memory::range(&offset, &Word::from(32u64))?;
                frame.charge_memory(offset, 32)?;
                let value = frame.memory.load_word(offset);
                frame.stack.push(value)?;
            }
            0x52 => {
                // MSTORE
                let offset = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                let (offset, _) = Memory::range(&offset, &Word::from(32u64))?;
                frame.charge_memory(offset, 32)?;
                frame.memory.store_word(offset, &value);
            }
            0x53 => {
                // MSTORE8
                let offset = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                let (offset, _) = Memory::range(&offset, &Word::one())?;
                frame.charge_memory(offset, 1)?;
                frame.memory.store_byte(offset, value.as_u64() as u8);
            }
            0x54 => {
                // SLOAD
                let key = frame.stack.pop()?;
                let access = self.journal.touch_slot(&frame.msg.to, &key);
                frame.gas.charge(gas::sload_cost(access))?;
                let value = self.journal.read_storage(&frame.msg.to, &key);
                frame.stack.push(value)?;
            }
            0x55 => {
                // SSTORE
                if frame.msg.is_static {
                    return Err(VmError::StaticViolation);
                }
                // EIP-2200 sentry: never leave less than the stipend
                if frame.gas.remaining() <= gas::GAS_CALL_STIPEND {
                    return Err(VmError::OutOfGas);
                }
                let key = frame.stack.pop()?;
                let value = frame.stack.pop()?;
                let access = self.journal.touch_slot(&frame.msg.to, &key);
                let original = self.journal.original_storage(&frame.msg.to, &key);
                let current = self.journal.read_storage(&frame.msg.to, &key);
                frame
                    .gas
                    .charge(gas::sstore_cost(original, current, value, access))?;
                frame
                    .gas
                    .add_refund(gas::sstore_refund(original, current, value));
                self.journal.write_storage(&frame.msg.to, &key, value);
            }
            0x56 => {
                // JUMP
                let dest = frame.stack.pop()?;
                return Ok(Control::Jump(resolve_jump(code, &dest)?));
            }
            0x57 => {
                // JUMPI
                let dest = frame.stack.pop()?;
                let cond = frame.stack.pop()?;
                if !cond.is_zero() {
                    return Ok(Control::Jump(resolve_jump(code, &dest)?));
                }
            }
            0x58 => {
                // PC
                frame.stack.push(Word::from(ins.offset))?;
            }
            0x59 => {
                // MSIZE
                frame.stack.push(Word::from(frame.memory.len_bytes()))?;
            }
            0x5a => {
                // GAS
                frame.stack.push(Word::from(frame.gas.remaining()))?;
            }
            0x5b => {
                // JUMPDEST
            }
            0x5e => {
                // MCOPY
                let dst = frame.stack.pop()?;
                let src = frame.stack.pop()?;
                let len = frame.stack.pop()?;
                let (dst, len) = Memory::range(&dst, &len)?;
                let (src, _) = Memory::range(&src, &Word::from(len))?;
                frame.charge_memory(dst.max(src), len)?;
                frame.gas.charge(gas::copy_cost(len))?;
                frame.memory.copy(dst, src, len);
            }
            0x5f => {
                // PUSH0
                frame.stack.push(Word::zero())?;
            }

            // 0x60..=0x7f: PUSH1 to PUSH32
            0x60..=0x7f => {
                let arg = ins
                    .argument
                    .as_ref()
                    .expect("decoder always attaches push data");
                frame.stack.push(Word::from_bytes(arg))?;
            }

            // 0x80..=0x8f: DUP1 to DUP16
            0x80..=0x8f => {
                frame.stack.dup(ins.opcode.n as usize)?;
            }

            // 0x90..=0x9f: SWAP1 to SWAP16
            0x90..=0x9f => {
                frame.stack.swap(ins.opcode.n as usize)?;
            }

            // 0xa0..=0xa4: LOG0 to LOG4. Topics and payload are charged
            // and consumed; the log itself is not part of the trace model.
            0xa0..=0xa4 => {
                if frame.msg.is_static {
                    return Err(VmError::StaticViolation);
                }
                let offset = frame.stack.pop()?;
                let len = frame.stack.pop()?;
                let topics = ins.opcode.n as usize;
                for _ in 0..topics {
                    frame.stack.pop()?;
                }
                let (offset, len) = Memory::range(&offset, &len)?;
                frame.charge_memory(offset, len)?;
                frame.gas.charge(gas::log_cost(topics, len))?;
                frame.memory.read(offset, len);
            }

            // system operations
            0xf0 => return self.op_create(frame, ins, CallKind::Create),
            0xf1 => return self.op_call(frame, ins, CallKind::Call),
            0xf2 => return self.op_call(frame, ins, CallKind::CallCode),
            0xf3 | 0xfd => {
                // RETURN | REVERT
                let offset = frame.stack.pop()?;
                let len = frame.stack.pop()?;
                let (offset, len) = Memory::range(&offset, &len)?;
                frame.charge_memory(offset, len)?;
                frame.output = frame.memory.read(offset, len);
                return Ok(if opcode == 0xf3 {
                    Control::Return
                } else {
                    Control::Revert
                });
            }
            0xf4 => return self.op_call(frame, ins, CallKind::DelegateCall),
            0xf5 => return self.op_create(frame, ins, CallKind::Create2),
            0xfa => return self.op_call(frame, ins, CallKind::StaticCall),
            0xff => {
                // SELFDESTRUCT
                if frame.msg.is_static {
                    return Err(VmError::StaticViolation);
                }
                let beneficiary = Address::from(&frame.stack.pop()?);
                let access = self.journal.touch_account(&beneficiary);
                let mut cost = gas::GAS_SELF_DESTRUCT;
                if access == crate::journal::Access::Cold {
                    cost += gas::GAS_COLD_ACCOUNT_ACCESS;
                }
                if self.journal.is_empty(&beneficiary)
                    && !self.journal.balance(&frame.msg.to).is_zero()
                {
                    cost += gas::GAS_NEW_ACCOUNT;
                }
                frame.gas.charge(cost)?;
                self.journal.selfdestruct(&frame.msg.to, &beneficiary);
                return Ok(Control::Stop);
            }

            _ => {
                // 0xfe INVALID and every unassigned byte
                return Err(VmError::InvalidOpcode(opcode));
            }
        }

        Ok(Control::Continue)
    }

    fn op_call(
        &mut self,
        frame: &mut Frame<'_>,
        ins: &Instruction,
        kind: CallKind,
    ) -> Result<Control, VmError> {
        let gas_requested = frame.stack.pop()?;
        let target = Address::from(&frame.stack.pop()?);
        let value = match kind {
            CallKind::Call | CallKind::CallCode => frame.stack.pop()?,
            _ => Word::zero(),
        };
        let args_offset = frame.stack.pop()?;
        let args_len = frame.stack.pop()?;
        let ret_offset = frame.stack.pop()?;
        let ret_len = frame.stack.pop()?;

        if kind == CallKind::Call && frame.msg.is_static && !value.is_zero() {
            return Err(VmError::StaticViolation);
        }

        let (args_offset, args_len) = Memory::range(&args_offset, &args_len)?;
        let (ret_offset, ret_len) = Memory::range(&ret_offset, &ret_len)?;
        let words = Memory::words_for(args_offset, args_len)
            .max(Memory::words_for(ret_offset, ret_len));
        frame.gas.charge(frame.memory.expansion_cost(words))?;

        let access = self.journal.touch_account(&target);
        frame.gas.charge(gas::account_access_cost(access))?;

        if !value.is_zero() {
            let mut extra = gas::GAS_CALL_VALUE;
            if kind == CallKind::Call && self.journal.is_empty(&target) {
                extra += gas::GAS_NEW_ACCOUNT;
            }
            frame.gas.charge(extra)?;
        }

        // EIP-150: forward at most 63/64 of what remains
        let available = frame.gas.available_for_call();
        let base_forward = if gas_requested.fits_u64() {
            gas_requested.as_u64().min(available)
        } else {
            available
        };
        frame.gas.charge(base_forward)?;
        let stipend = if value.is_zero() {
            0
        } else {
            gas::GAS_CALL_STIPEND
        };
        let gas_forward = base_forward + stipend;

        if frame.msg.depth + 1 > CALL_DEPTH_LIMIT {
            return Err(VmError::DepthExceeded);
        }

        // a value-bearing call without the balance is a failed call, not
        // a fault: the forwarded gas comes back and 0 lands on the stack
        if !value.is_zero() && self.journal.balance(&frame.msg.to) < value {
            frame.gas.reclaim(base_forward);
            frame.return_data.clear();
            frame.traced = true;
            self.trace_step(frame, ins, ErrorCode::None);
            frame.stack.push(Word::zero())?;
            self.trace.modify_last_stack(&frame.stack);
            return Ok(Control::Continue);
        }

        let input = frame.memory.read(args_offset, args_len);
        let child = Message {
            caller: match kind {
                CallKind::DelegateCall => frame.msg.caller,
                _ => frame.msg.to,
            },
            to: match kind {
                CallKind::Call | CallKind::StaticCall => target,
                _ => frame.msg.to,
            },
            value: match kind {
                CallKind::DelegateCall => frame.msg.value,
                _ => value,
            },
            data: input,
            gas_limit: gas_forward,
            depth: frame.msg.depth + 1,
            kind,
            is_static: frame.msg.is_static || kind == CallKind::StaticCall,
            origin: frame.msg.origin,
            gas_price: frame.msg.gas_price,
        };

        let code_bytes = self.journal.code(&target);
        let result = if code_bytes.is_empty() {
            // plain transfer; the value still moves for CALL
            if kind == CallKind::Call {
                self.journal
                    .transfer(&frame.msg.to, &target, value)
                    .expect("balance was checked above");
            }
            FrameResult {
                error: ErrorCode::None,
                gas_left: gas_forward,
                refund: 0,
                output: Vec::new(),
            }
        } else {
            let code = Decoder::decode(&code_bytes);
            self.execute(&child, &code)
        };

        if result.error == ErrorCode::Aborted {
            return Err(VmError::Aborted);
        }

        frame.gas.reclaim(result.gas_left.saturating_sub(stipend));
        let success = result.error == ErrorCode::None;
        if success {
            frame.gas.add_refund(result.refund);
        }
        frame.return_data = result.output.clone();

        // the entry retires now; the child's effect on the stack lands
        // after it, through the late-binding patch
        frame.traced = true;
        self.trace_step(frame, ins, ErrorCode::None);

        if success || result.error == ErrorCode::Revert {
            let n = ret_len.min(result.output.len());
            frame.memory.write(ret_offset, &result.output[..n]);
        }
        frame.stack.push(Word::from_bool(success))?;
        self.trace.modify_last_stack(&frame.stack);
        Ok(Control::Continue)
    }

    fn op_create(
        &mut self,
        frame: &mut Frame<'_>,
        ins: &Instruction,
        kind: CallKind,
    ) -> Result<Control, VmError> {
        if frame.msg.is_static {
            return Err(VmError::StaticViolation);
        }
        let value = frame.stack.pop()?;
        let offset = frame.stack.pop()?;
        let len = frame.stack.pop()?;
        let salt = if kind == CallKind::Create2 {
            Some(frame.stack.pop()?)
        } else {
            None
        };

        let (offset, len) = Memory::range(&offset, &len)?;
        frame.charge_memory(offset, len)?;
        let mut cost = gas::GAS_CREATE + gas::init_code_cost(len);
        if kind == CallKind::Create2 {
            // the init code gets hashed for the address derivation
            cost += gas::GAS_KECCAK256_WORD * len.div_ceil(32) as u64;
        }
        frame.gas.charge(cost)?;

        if frame.msg.depth + 1 > CALL_DEPTH_LIMIT {
            return Err(VmError::DepthExceeded);
        }

        let init_code = frame.memory.read(offset, len);

        if self.journal.balance(&frame.msg.to) < value {
            frame.return_data.clear();
            frame.traced = true;
            self.trace_step(frame, ins, ErrorCode::None);
            frame.stack.push(Word::zero())?;
            self.trace.modify_last_stack(&frame.stack);
            return Ok(Control::Continue);
        }

        let nonce = self.journal.nonce(&frame.msg.to);
        self.journal.bump_nonce(&frame.msg.to);
        let created = match salt {
            Some(salt) => frame.msg.to.create2(&salt, &init_code),
            None => frame.msg.to.create(nonce),
        };
        self.journal.touch_account(&created);

        // address collision: the create fails without running the init code
        if self.journal.code_len(&created) > 0 || !self.journal.nonce(&created).is_zero() {
            frame.return_data.clear();
            frame.traced = true;
            self.trace_step(frame, ins, ErrorCode::None);
            frame.stack.push(Word::zero())?;
            self.trace.modify_last_stack(&frame.stack);
            return Ok(Control::Continue);
        }

        let gas_forward = frame.gas.available_for_call();
        frame.gas.charge(gas_forward)?;

        let child = Message {
            caller: frame.msg.to,
            to: created,
            value,
            data: Vec::new(),
            gas_limit: gas_forward,
            depth: frame.msg.depth + 1,
            kind,
            is_static: false,
            origin: frame.msg.origin,
            gas_price: frame.msg.gas_price,
        };

        let create_snap = self.journal.snapshot();
        let code = Decoder::decode(&init_code);
        let mut result = self.execute(&child, &code);

        if result.error == ErrorCode::Aborted {
            return Err(VmError::Aborted);
        }

        let mut success = result.error == ErrorCode::None;
        if success {
            let deposit = gas::GAS_CODE_DEPOSIT * result.output.len() as u64;
            if result.output.len() > MAX_CODE_SIZE || result.gas_left < deposit {
                success = false;
                result.gas_left = 0;
                self.journal.revert(create_snap);
            } else {
                result.gas_left -= deposit;
                self.journal.set_code(&created, result.output.clone());
                self.journal.commit(create_snap);
                frame.gas.add_refund(result.refund);
            }
        } else {
            self.journal.revert(create_snap);
        }

        frame.gas.reclaim(result.gas_left);
        // only a reverting init frame leaves return data behind
        frame.return_data = if result.error == ErrorCode::Revert {
            result.output
        } else {
            Vec::new()
        };

        frame.traced = true;
        self.trace_step(frame, ins, ErrorCode::None);
        frame.stack.push(if success {
            created.as_word()
        } else {
            Word::zero()
        })?;
        self.trace.modify_last_stack(&frame.stack);
        Ok(Control::Continue)
    }
}

fn resolve_jump(code: &Bytecode, dest: &Word) -> Result<usize, VmError> {
    if !dest.fits_u64() {
        return Err(VmError::InvalidJump);
    }
    code.resolve_jump(dest.as_usize())
        .ok_or(VmError::InvalidJump)
}

/// `len` bytes of `data` starting at `offset`, zero-padded past the end.
fn slice_padded(data: &[u8], offset: &Word, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    if offset.fits_u64() {
        let offset = offset.as_u64() as usize;
        if offset < data.len() {
            let available = len.min(data.len() - offset);
            out[..available].copy_from_slice(&data[offset..offset + available]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_code(code: &str, gas_limit: u64) -> Outcome {
        let msg = Message {
            to: Address::from([0x11u8; 20]),
            gas_limit,
            ..Default::default()
        };
        let mut world = World::new();
        world.insert(
            msg.to,
            crate::journal::BaseAccount {
                code: hex::decode(code).unwrap(),
                ..Default::default()
            },
        );
        Interpreter::new(Arc::new(world)).run(msg)
    }

    #[test]
    fn test_add_smoke() {
        // PUSH1 1, PUSH1 2, ADD, STOP
        let outcome = run_code("600160020100", 100);
        assert_eq!(outcome.error, ErrorCode::None);
        assert_eq!(outcome.gas_used, 9);
        assert_eq!(outcome.trace.len(), 4);
        assert_eq!(
            outcome.trace.stack_at(3),
            &[Word::from(3u64)]
        );
    }

    #[test]
    fn test_underflow_consumes_all_gas() {
        let outcome = run_code("01", 100);
        assert_eq!(outcome.error, ErrorCode::StackUnderflow);
        assert_eq!(outcome.gas_used, 100);
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.trace.error_at(0), ErrorCode::StackUnderflow);
    }

    #[test]
    fn test_invalid_jump() {
        // PUSH1 3, JUMP (3 is not a JUMPDEST)
        let outcome = run_code("600356", 100);
        assert_eq!(outcome.error, ErrorCode::InvalidJump);
    }

    #[test]
    fn test_taken_jump_over_invalid() {
        // PUSH1 4, JUMP, INVALID, JUMPDEST, STOP
        let outcome = run_code("600456fe5b00", 100);
        assert_eq!(outcome.error, ErrorCode::None);
        let pcs: Vec<u32> = (0..outcome.trace.len())
            .map(|i| outcome.trace.pc_at(i))
            .collect();
        assert_eq!(pcs, vec![0, 2, 4, 5]);
    }

    #[test]
    fn test_untaken_jumpi_ignores_bad_dest() {
        // PUSH1 0 (cond), PUSH1 99 (dest), JUMPI, STOP: condition false,
        // dest invalid, no fault
        let outcome = run_code("600060635700", 100);
        assert_eq!(outcome.error, ErrorCode::None);
    }

    #[test]
    fn test_step_budget_aborts() {
        // JUMPDEST, PUSH1 0, JUMP: infinite loop
        let msg = Message {
            to: Address::from([0x11u8; 20]),
            gas_limit: 1_000_000,
            ..Default::default()
        };
        let mut world = World::new();
        world.insert(
            msg.to,
            crate::journal::BaseAccount {
                code: hex::decode("5b600056").unwrap(),
                ..Default::default()
            },
        );
        let outcome = Interpreter::new(Arc::new(world))
            .with_step_budget(10)
            .run(msg);
        assert_eq!(outcome.error, ErrorCode::Aborted);
        assert_eq!(outcome.trace.len(), 11);
        assert_eq!(outcome.trace.last_error(), ErrorCode::Aborted);
    }

    #[test]
    fn test_implicit_stop_off_code_end() {
        let outcome = run_code("6001", 100);
        assert_eq!(outcome.error, ErrorCode::None);
        assert_eq!(outcome.trace.len(), 1);
        assert_eq!(outcome.gas_used, 3);
    }
}
