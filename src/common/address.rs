use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::{decode, hash::keccak256, word::Word};

/// A 160-bit account address.
#[derive(Clone, Copy, Default, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn zero() -> Self {
        Self([0u8; 20])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|byte| byte == &0)
    }

    /// CREATE address: `keccak256(rlp([creator, nonce]))[12:]`.
    pub fn create(&self, nonce: Word) -> Address {
        // RLP of the nonce as an integer: leading zeros dropped, zero is
        // the empty string (0x80), a lone byte below 0x80 stands for
        // itself, anything longer gets a length prefix
        let trimmed = nonce
            .into_bytes()
            .into_iter()
            .skip_while(|byte| *byte == 0)
            .collect::<Vec<_>>();
        let mut nonce_rlp = Vec::with_capacity(1 + trimmed.len());
        match trimmed.as_slice() {
            [] => nonce_rlp.push(0x80),
            [byte] if *byte < 0x80 => nonce_rlp.push(*byte),
            bytes => {
                nonce_rlp.push(0x80 + bytes.len() as u8);
                nonce_rlp.extend_from_slice(bytes);
            }
        }

        // two-item list: 0x94-prefixed 20-byte address, then the nonce
        let payload = 1 + 20 + nonce_rlp.len();
        let mut rlp = Vec::with_capacity(1 + payload);
        rlp.push(0xc0 + payload as u8);
        rlp.push(0x80 + 20);
        rlp.extend_from_slice(&self.0);
        rlp.extend_from_slice(&nonce_rlp);

        let hash = keccak256(&rlp);
        let mut ret = [0u8; 20];
        ret.copy_from_slice(&hash[12..32]);
        Address(ret)
    }

    /// CREATE2 address: `keccak256(0xff ++ creator ++ salt ++ keccak256(init_code))[12:]`.
    pub fn create2(&self, salt: &Word, init_code: &[u8]) -> Address {
        let mut buffer = Vec::with_capacity(1 + 20 + 32 + 32);
        buffer.push(0xffu8);
        buffer.extend_from_slice(&self.0);
        buffer.extend_from_slice(&salt.into_bytes());
        buffer.extend_from_slice(&keccak256(init_code));
        let hash = keccak256(&buffer);
        let mut ret = [0u8; 20];
        ret.copy_from_slice(&hash[12..32]);
        Address(ret)
    }

    pub fn as_word(&self) -> Word {
        Word::from_bytes(&self.0)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl From<&Address> for Word {
    fn from(value: &Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[12..].copy_from_slice(&value.0);
        Word::from_bytes(&bytes)
    }
}

impl From<&Word> for Address {
    fn from(value: &Word) -> Self {
        let bytes: [u8; 32] = value.into_bytes();
        let mut ret = Address::default();
        ret.0[..].copy_from_slice(&bytes[12..]);
        ret
    }
}

impl From<[u8; 20]> for Address {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<&[u8]> for Address {
    type Error = crate::common::error::Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != 20 {
            return Err(crate::common::error::Error::InvalidAddress);
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(value);
        Ok(Address(bytes))
    }
}

impl TryFrom<&str> for Address {
    type Error = crate::common::error::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        if value.len() != 40 && value.len() != 42 {
            return Err(crate::common::error::Error::InvalidAddress);
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(value.trim_start_matches("0x"), &mut bytes)
            .map_err(|_| crate::common::error::Error::InvalidAddress)?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex = hex::encode(self.0);
        let hex = format!("0x{hex}");
        serializer.serialize_str(&hex)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Address, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;

        let hex: String = Deserialize::deserialize(deserializer)?;
        let hex = hex.trim_start_matches("0x");
        if hex.len() != 40 {
            return Err(D::Error::invalid_value(
                serde::de::Unexpected::Str(hex),
                &"Invalid hex length",
            ));
        }
        Ok(addr(hex))
    }
}

pub const fn addr(s: &str) -> Address {
    Address(decode(s))
}
