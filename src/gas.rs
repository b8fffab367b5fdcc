use crate::{
    common::word::Word,
    error::VmError,
    journal::Access,
};

// Berlin/London schedule, the slice of it this interpreter charges.
pub const GAS_KECCAK256: u64 = 30;
pub const GAS_KECCAK256_WORD: u64 = 6;
pub const GAS_COPY_WORD: u64 = 3;
pub const GAS_EXP_BYTE: u64 = 50;
pub const GAS_LOG: u64 = 375;
pub const GAS_LOG_TOPIC: u64 = 375;
pub const GAS_LOG_DATA: u64 = 8;
pub const GAS_CREATE: u64 = 32000;
pub const GAS_CODE_DEPOSIT: u64 = 200;
pub const GAS_CALL_VALUE: u64 = 9000;
pub const GAS_CALL_STIPEND: u64 = 2300;
pub const GAS_NEW_ACCOUNT: u64 = 25000;
pub const GAS_SELF_DESTRUCT: u64 = 5000;
pub const GAS_COLD_SLOAD: u64 = 2100;
pub const GAS_COLD_ACCOUNT_ACCESS: u64 = 2600;
pub const GAS_WARM_ACCESS: u64 = 100;
pub const GAS_STORAGE_SET: u64 = 20000;
pub const GAS_STORAGE_RESET: u64 = 2900;
pub const GAS_STORAGE_CLEAR_REFUND: u64 = 4800;
pub const GAS_INIT_CODE_WORD: u64 = 2;

/// The gas triple of one frame: fixed limit, monotone used, running
/// refund counter. Refunds propagate to the parent only on success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gas {
    limit: u64,
    used: u64,
    refund: i64,
}

impl Gas {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            used: 0,
            refund: 0,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.used
    }

    pub fn refund(&self) -> i64 {
        self.refund
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), VmError> {
        if self.remaining() < amount {
            return Err(VmError::OutOfGas);
        }
        self.used += amount;
        Ok(())
    }

    pub fn add_refund(&mut self, delta: i64) {
        self.refund += delta;
    }

    /// Deterministic faults burn the frame's entire allowance.
    pub fn consume_all(&mut self) {
        self.used = self.limit;
        self.refund = 0;
    }

    /// Returns unspent child gas to this frame.
    pub fn reclaim(&mut self, amount: u64) {
        assert!(amount <= self.used, "reclaiming more gas than was spent");
        self.used -= amount;
    }

    /// EIP-150: a caller retains 1/64th of its remaining gas.
    pub fn available_for_call(&self) -> u64 {
        let remaining = self.remaining();
        remaining - remaining / 64
    }
}

/// EIP-2929 surcharge for touching an address.
pub fn account_access_cost(access: Access) -> u64 {
    match access {
        Access::Cold => GAS_COLD_ACCOUNT_ACCESS,
        Access::Warm => GAS_WARM_ACCESS,
    }
}

/// SLOAD under EIP-2929.
pub fn sload_cost(access: Access) -> u64 {
    match access {
        Access::Cold => GAS_COLD_SLOAD + GAS_WARM_ACCESS,
        Access::Warm => GAS_WARM_ACCESS,
    }
}

/// SSTORE cost from the EIP-2200 tri-value `(original, current, new)`,
/// with the EIP-2929 cold surcharge folded in.
pub fn sstore_cost(original: Word, current: Word, new: Word, access: Access) -> u64 {
    let mut cost = if new == current {
        GAS_WARM_ACCESS
    } else if current == original {
        if original.is_zero() {
            GAS_STORAGE_SET
        } else {
            GAS_STORAGE_RESET
        }
    } else {
        GAS_WARM_ACCESS
    };
    if access == Access::Cold {
        cost += GAS_COLD_SLOAD;
    }
    cost
}

/// SSTORE refund delta per EIP-2200 as tightened by EIP-3529. May be
/// negative when a previously counted clear is undone.
pub fn sstore_refund(original: Word, current: Word, new: Word) -> i64 {
    if new == current {
        return 0;
    }
    let mut refund = 0i64;
    if current == original {
        if !original.is_zero() && new.is_zero() {
            refund += GAS_STORAGE_CLEAR_REFUND as i64;
        }
    } else {
        if !original.is_zero() {
            if current.is_zero() {
                refund -= GAS_STORAGE_CLEAR_REFUND as i64;
            } else if new.is_zero() {
                refund += GAS_STORAGE_CLEAR_REFUND as i64;
            }
        }
        if new == original {
            if original.is_zero() {
                refund += (GAS_STORAGE_SET - GAS_WARM_ACCESS) as i64;
            } else {
                refund += (GAS_STORAGE_RESET - GAS_WARM_ACCESS) as i64;
            }
        }
    }
    refund
}

/// Per-word cost of copy-style opcodes (CALLDATACOPY, CODECOPY, ...).
pub fn copy_cost(len: usize) -> u64 {
    GAS_COPY_WORD * len.div_ceil(32) as u64
}

/// Dynamic part of KECCAK256.
pub fn keccak_cost(len: usize) -> u64 {
    GAS_KECCAK256 + GAS_KECCAK256_WORD * len.div_ceil(32) as u64
}

/// Dynamic part of EXP: per significant byte of the exponent.
pub fn exp_cost(exponent: &Word) -> u64 {
    GAS_EXP_BYTE * exponent.byte_len() as u64
}

/// LOGn: base, per-topic and per-byte components.
pub fn log_cost(topics: usize, len: usize) -> u64 {
    GAS_LOG + GAS_LOG_TOPIC * topics as u64 + GAS_LOG_DATA * len as u64
}

/// EIP-3860 init-code word cost for CREATE/CREATE2.
pub fn init_code_cost(len: usize) -> u64 {
    GAS_INIT_CODE_WORD * len.div_ceil(32) as u64
}
