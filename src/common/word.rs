use std::ops::{BitAnd, BitOr, BitXor, Shl, Shr};

use i256::I256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::common::decode;

type U256 = primitive_types::U256;
type U512 = primitive_types::U512;

/// The EVM's native 256-bit unsigned integer.
#[derive(Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Word(U256);

impl Word {
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    pub fn one() -> Self {
        Self(U256::one())
    }

    pub fn max() -> Self {
        Self(U256::max_value())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn bit(&self, index: usize) -> bool {
        self.0.bit(index)
    }

    /// Number of significant bytes, 0 for zero. Drives EXP gas.
    pub fn byte_len(&self) -> usize {
        (self.0.bits() + 7) / 8
    }

    /// True when the value fits into 64 bits.
    pub fn fits_u64(&self) -> bool {
        self.0.bits() <= 64
    }

    /// Low 64 bits, truncating.
    pub fn as_u64(&self) -> u64 {
        self.0.low_u64()
    }

    /// Low bits as usize, truncating. Callers bound-check first.
    pub fn as_usize(&self) -> usize {
        self.0.low_u64() as usize
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(U256::from_big_endian(bytes))
    }

    pub fn into_bytes(&self) -> [u8; 32] {
        self.0.to_big_endian()
    }

    pub fn from_hex(hex: &str) -> eyre::Result<Self> {
        let hex = hex.trim_start_matches("0x");
        let word = U256::from_str_radix(hex, 16);
        Ok(Self(
            word.map_err(|_| eyre::eyre!("Invalid U256: '{hex}'."))?,
        ))
    }

    pub fn saturating_sub(&self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    pub fn overflowing_add(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_add(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_sub(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_sub(rhs.0);
        (Self(word), flag)
    }

    pub fn overflowing_mul(&self, rhs: Self) -> (Self, bool) {
        let (word, flag) = self.0.overflowing_mul(rhs.0);
        (Self(word), flag)
    }

    /// Unsigned division with the EVM zero-divisor convention.
    pub fn div_evm(&self, rhs: &Word) -> Word {
        if rhs.is_zero() {
            Word::zero()
        } else {
            Word(self.0 / rhs.0)
        }
    }

    /// Unsigned remainder with the EVM zero-divisor convention.
    pub fn mod_evm(&self, rhs: &Word) -> Word {
        if rhs.is_zero() {
            Word::zero()
        } else {
            Word(self.0 % rhs.0)
        }
    }

    /// Two's-complement division. `sdiv(INT_MIN, -1)` wraps to `INT_MIN`.
    pub fn sdiv(&self, rhs: &Word) -> Word {
        let a = I256::from_be_bytes(self.0.to_big_endian());
        let b = I256::from_be_bytes(rhs.0.to_big_endian());
        let res = if rhs.is_zero() {
            I256::from(0)
        } else if a == I256::MIN && b == I256::from(-1) {
            I256::MIN
        } else {
            a / b
        };
        Word(U256::from_big_endian(&res.to_be_bytes()))
    }

    /// Two's-complement remainder; sign follows the dividend.
    pub fn smod(&self, rhs: &Word) -> Word {
        let a = I256::from_be_bytes(self.0.to_big_endian());
        let b = I256::from_be_bytes(rhs.0.to_big_endian());
        let res = if rhs.is_zero() { I256::from(0) } else { a % b };
        Word(U256::from_big_endian(&res.to_be_bytes()))
    }

    /// `(self + rhs) % modulo` over the full 512-bit sum; modulus 0 yields 0.
    pub fn add_modulo(&self, rhs: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let sum = U512::from(self.0) + U512::from(rhs.0);
        let rem = sum % U512::from(modulo.0);
        Word(U256::from_big_endian(&rem.to_big_endian()[32..]))
    }

    /// `(self * rhs) % modulo` over the full 512-bit product; modulus 0 yields 0.
    pub fn mul_modulo(&self, rhs: &Word, modulo: &Word) -> Word {
        if modulo.is_zero() {
            return Word::zero();
        }
        let res = self.0.full_mul(rhs.0) % U512::from(modulo.0);
        Word(U256::from_big_endian(&res.to_big_endian()[32..]))
    }

    /// Full 512-bit product split into (high, low) words.
    pub fn full_mul(&self, rhs: &Word) -> (Word, Word) {
        let wide = self.0.full_mul(rhs.0);
        let bytes = wide.to_big_endian();
        (
            Word(U256::from_big_endian(&bytes[..32])),
            Word(U256::from_big_endian(&bytes[32..])),
        )
    }

    /// Exponentiation by squaring in wrapping 256-bit arithmetic.
    pub fn pow(&self, exp: Self) -> Self {
        let (ret, _) = self.0.overflowing_pow(exp.0);
        Self(ret)
    }

    /// Logical shift left; shift >= 256 saturates to zero.
    pub fn shift_left(&self, shift: &Word) -> Word {
        if !shift.fits_u64() || shift.as_u64() >= 256 {
            Word::zero()
        } else {
            Word(self.0 << shift.as_usize())
        }
    }

    /// Logical shift right; shift >= 256 saturates to zero.
    pub fn shift_right(&self, shift: &Word) -> Word {
        if !shift.fits_u64() || shift.as_u64() >= 256 {
            Word::zero()
        } else {
            Word(self.0 >> shift.as_usize())
        }
    }

    /// Arithmetic shift right: the sign bit fills vacated positions.
    pub fn sar(&self, shift: &Word) -> Word {
        let negative = self.0.bit(255);
        if !shift.fits_u64() || shift.as_u64() >= 256 {
            return if negative { Word::max() } else { Word::zero() };
        }
        let s = shift.as_usize();
        if s == 0 {
            return *self;
        }
        let mut ret = self.0 >> s;
        if negative {
            ret |= U256::max_value() << (256 - s);
        }
        Word(ret)
    }

    /// The i-th byte counted from the big-endian side; i >= 32 yields 0.
    pub fn byte(&self, index: &Word) -> Word {
        if !index.fits_u64() || index.as_u64() >= 32 {
            Word::zero()
        } else {
            Word(U256::from(self.0.byte(31 - index.as_usize())))
        }
    }

    /// Sign-extend from bit `8 * (b + 1) - 1`; `b >= 31` is the identity.
    pub fn signextend(&self, b: &Word) -> Word {
        if !b.fits_u64() || b.as_u64() >= 31 {
            return *self;
        }
        let bit = 8 * (b.as_usize() + 1) - 1;
        let mask = (U256::one() << (bit + 1)) - U256::one();
        if self.0.bit(bit) {
            Word(self.0 | !mask)
        } else {
            Word(self.0 & mask)
        }
    }

    /// Signed less-than.
    pub fn slt(&self, rhs: &Word) -> bool {
        let a = I256::from_be_bytes(self.0.to_big_endian());
        let b = I256::from_be_bytes(rhs.0.to_big_endian());
        a < b
    }

    /// Signed greater-than.
    pub fn sgt(&self, rhs: &Word) -> bool {
        let a = I256::from_be_bytes(self.0.to_big_endian());
        let b = I256::from_be_bytes(rhs.0.to_big_endian());
        a > b
    }

    /// Boolean as the EVM encodes it on the stack.
    pub fn from_bool(flag: bool) -> Word {
        if flag {
            Word::one()
        } else {
            Word::zero()
        }
    }
}

impl std::fmt::Debug for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::Display for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl std::fmt::LowerHex for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::LowerHex::fmt(&self.0, f)
    }
}

impl From<u8> for Word {
    fn from(value: u8) -> Self {
        Self(U256::from(value))
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<u128> for Word {
    fn from(value: u128) -> Self {
        Self(U256::from(value))
    }
}

impl From<usize> for Word {
    fn from(value: usize) -> Self {
        Self(U256::from(value))
    }
}

impl std::ops::Add<Word> for Word {
    type Output = Word;

    fn add(self, rhs: Word) -> Self::Output {
        Word(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign<Word> for Word {
    fn add_assign(&mut self, rhs: Word) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub<Word> for Word {
    type Output = Word;

    fn sub(self, rhs: Word) -> Self::Output {
        Word(self.0 - rhs.0)
    }
}

impl std::ops::SubAssign<Word> for Word {
    fn sub_assign(&mut self, rhs: Word) {
        self.0 -= rhs.0;
    }
}

impl std::ops::Mul<Word> for Word {
    type Output = Word;

    fn mul(self, rhs: Word) -> Self::Output {
        Word(self.0 * rhs.0)
    }
}

impl BitAnd for Word {
    type Output = Word;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self(self.0 & rhs.0)
    }
}

impl BitOr for Word {
    type Output = Word;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl BitXor for Word {
    type Output = Word;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

impl std::ops::Not for Word {
    type Output = Word;

    fn not(self) -> Self::Output {
        Self(!self.0)
    }
}

impl Shl<usize> for Word {
    type Output = Word;

    fn shl(self, rhs: usize) -> Self::Output {
        Self(self.0 << rhs)
    }
}

impl Shr<usize> for Word {
    type Output = Word;

    fn shr(self, rhs: usize) -> Self::Output {
        Self(self.0 >> rhs)
    }
}

impl Serialize for Word {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let hex: String = hex::encode(self.0.to_big_endian())
            .chars()
            .skip_while(|c| c == &'0')
            .collect();
        let hex = format!("0x{hex}");
        serializer.serialize_str(&hex)
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D>(deserializer: D) -> Result<Word, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex: String = Deserialize::deserialize(deserializer)?;
        let word = word(hex.trim_start_matches("0x"));
        Ok(word)
    }
}

pub fn word(s: &str) -> Word {
    let b = decode::<32>(s);
    Word::from_bytes(&b)
}
