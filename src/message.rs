use serde::Serialize;

use crate::common::{address::Address, word::Word};

pub const CALL_DEPTH_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CallKind {
    #[default]
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

impl CallKind {
    pub fn is_create(&self) -> bool {
        matches!(self, CallKind::Create | CallKind::Create2)
    }
}

/// Immutable inputs to one call frame. `origin` and `gas_price` are
/// transaction-wide and carried unchanged through nesting.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub caller: Address,
    pub to: Address,
    pub value: Word,
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub depth: usize,
    pub kind: CallKind,
    pub is_static: bool,
    pub origin: Address,
    pub gas_price: Word,
}

impl Message {
    /// Up to `len` bytes of input starting at `offset`. Total for any
    /// offset, including ones past the data or overflowing the address
    /// space; callers zero-pad the missing tail (CALLDATALOAD semantics).
    pub fn input_slice(&self, offset: &Word, len: usize) -> &[u8] {
        if !offset.fits_u64() {
            return &[];
        }
        let offset = offset.as_u64() as usize;
        if offset >= self.data.len() {
            return &[];
        }
        let available = len.min(self.data.len() - offset);
        &self.data[offset..offset + available]
    }
}
