use serde::{Serialize, Serializer};
use thiserror::Error;

/// Stable numeric outcome of one instance, recorded per trace entry.
///
/// Ids are append-only: new codes may be added, existing ones are never
/// renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    #[default]
    None = 0,
    StackOverflow = 1,
    StackUnderflow = 2,
    InvalidOpcode = 3,
    OutOfGas = 4,
    InvalidJump = 5,
    StaticViolation = 6,
    Revert = 7,
    DepthExceeded = 8,
    InsufficientBalance = 9,
    ReturnDataOob = 10,
    MemoryLimit = 11,
    Aborted = 12,
}

impl ErrorCode {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Codes the batch driver treats as a non-zero exit.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidOpcode | ErrorCode::DepthExceeded | ErrorCode::Aborted
        )
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => ErrorCode::None,
            1 => ErrorCode::StackOverflow,
            2 => ErrorCode::StackUnderflow,
            3 => ErrorCode::InvalidOpcode,
            4 => ErrorCode::OutOfGas,
            5 => ErrorCode::InvalidJump,
            6 => ErrorCode::StaticViolation,
            7 => ErrorCode::Revert,
            8 => ErrorCode::DepthExceeded,
            9 => ErrorCode::InsufficientBalance,
            10 => ErrorCode::ReturnDataOob,
            11 => ErrorCode::MemoryLimit,
            12 => ErrorCode::Aborted,
            other => return Err(other),
        })
    }
}

/// A fault raised while executing one frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    #[error("Stack overflow")]
    StackOverflow,
    #[error("Stack underflow")]
    StackUnderflow,
    #[error("Invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    #[error("Out of gas")]
    OutOfGas,
    #[error("Invalid jump destination")]
    InvalidJump,
    #[error("State mutation inside a static call")]
    StaticViolation,
    #[error("Call depth limit reached")]
    DepthExceeded,
    #[error("Insufficient balance for value transfer")]
    InsufficientBalance,
    #[error("Return data access out of bounds")]
    ReturnDataOob,
    #[error("Memory limit exceeded")]
    MemoryLimit,
    #[error("Instance aborted")]
    Aborted,
}

impl VmError {
    pub fn code(&self) -> ErrorCode {
        match self {
            VmError::StackOverflow => ErrorCode::StackOverflow,
            VmError::StackUnderflow => ErrorCode::StackUnderflow,
            VmError::InvalidOpcode(_) => ErrorCode::InvalidOpcode,
            VmError::OutOfGas => ErrorCode::OutOfGas,
            VmError::InvalidJump => ErrorCode::InvalidJump,
            VmError::StaticViolation => ErrorCode::StaticViolation,
            VmError::DepthExceeded => ErrorCode::DepthExceeded,
            VmError::InsufficientBalance => ErrorCode::InsufficientBalance,
            VmError::ReturnDataOob => ErrorCode::ReturnDataOob,
            VmError::MemoryLimit => ErrorCode::MemoryLimit,
            VmError::Aborted => ErrorCode::Aborted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_ids() {
        assert_eq!(ErrorCode::None.as_u8(), 0);
        assert_eq!(ErrorCode::StackUnderflow.as_u8(), 2);
        assert_eq!(ErrorCode::Revert.as_u8(), 7);
        assert_eq!(ErrorCode::Aborted.as_u8(), 12);
        for id in 0u8..=12 {
            assert_eq!(ErrorCode::try_from(id).unwrap().as_u8(), id);
        }
        assert!(ErrorCode::try_from(13).is_err());
    }

    #[test]
    fn test_fatal_codes() {
        assert!(ErrorCode::InvalidOpcode.is_fatal());
        assert!(ErrorCode::DepthExceeded.is_fatal());
        assert!(ErrorCode::Aborted.is_fatal());
        assert!(!ErrorCode::Revert.is_fatal());
        assert!(!ErrorCode::OutOfGas.is_fatal());
    }
}
