//! Binary encoding and decoding traits for deterministic serialization.
//!
//! All consensus-relevant data is serialized through this module. Encoded
//! data uses little-endian byte order throughout.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - `bool`: single byte (0 = false, 1 = true)
//! - `Vec<T>`: 8-byte length prefix followed by elements
//! - `Option<T>`: 1-byte tag (0 = None, 1 = Some) followed by the value
//! - Arrays `[T; N]`: elements serialized sequentially, no length prefix
//! - [`VarInt`]: Bitcoin-style compact size, used on the block wire where
//!   the record layout demands it

use crate::types::bytes::Bytes;

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers and hashers so encodable types can be fed
/// straight into a digest without an intermediate allocation.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating.
///
/// Used by `Encode::to_bytes` to pre-allocate exact capacity, and by the
/// block size checks which only need the byte count.
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }
}

impl Default for SizeCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Bytes {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Trait for types that can be serialized to binary format.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Returns the encoded length in bytes without allocating.
    fn encoded_len(&self) -> usize {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);
        counter.len()
    }

    /// Serializes to a new byte buffer with exact capacity.
    fn to_bytes(&self) -> Bytes {
        let mut out = Bytes::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }
}

/// Errors that can occur during decoding.
///
/// Every variant is a `MalformedEncoding` rejection at the consensus level:
/// the input is discarded, never retried as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before expected data was read.
    UnexpectedEof,
    /// Data does not represent a valid value for the target type.
    InvalidValue,
    /// Length prefix exceeds the maximum allowed size.
    LengthOverflow,
    /// A compact size integer was not encoded in its shortest form.
    NonCanonicalVarInt,
}

/// Trait for types that can be deserialized from binary format.
pub trait Decode: Sized {
    /// Reads and decodes a value, advancing the input past consumed bytes.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value from a byte slice, requiring all bytes to be consumed.
    ///
    /// Returns `InvalidValue` if trailing bytes remain after decoding.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;

        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }

        Ok(value)
    }
}

/// Reads exactly `n` bytes from the input, advancing the slice.
pub(crate) fn read_bytes<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (bytes, rest) = input.split_at(n);
    *input = rest;
    Ok(bytes)
}

impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Decode for u8 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(read_bytes(input, 1)?[0])
    }
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let bytes = read_bytes(input, std::mem::size_of::<$t>())?;
                    Ok(<$t>::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    };
}

impl_int!(u16, u32, u64, u128, i32, i64);

// usize as u64 for portability
impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let v = u64::decode(input)?;
        usize::try_from(v).map_err(|_| DecodeError::LengthOverflow)
    }
}

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

/// Maximum allowed length for decoded vectors to prevent memory exhaustion.
const MAX_VEC_LEN: usize = 1_000_000;

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(input)?;
        if len > MAX_VEC_LEN {
            return Err(DecodeError::LengthOverflow);
        }

        let mut vec = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            vec.push(T::decode(input)?);
        }
        Ok(vec)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(v) => {
                1u8.encode(out);
                v.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        for item in self {
            item.encode(out);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut vec = Vec::with_capacity(N);
        for _ in 0..N {
            vec.push(T::decode(input)?);
        }
        vec.try_into().map_err(|_| DecodeError::InvalidValue)
    }
}

/// Bitcoin-style compact size integer.
///
/// Values below 0xfd are a single byte; larger values use a marker byte
/// (0xfd/0xfe/0xff) followed by a little-endian u16/u32/u64. Decoding
/// rejects overlong encodings so every value has exactly one wire form.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarInt(pub u64);

impl Encode for VarInt {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self.0 {
            0..=0xfc => out.write(&[self.0 as u8]),
            0xfd..=0xffff => {
                out.write(&[0xfd]);
                out.write(&(self.0 as u16).to_le_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                out.write(&[0xfe]);
                out.write(&(self.0 as u32).to_le_bytes());
            }
            _ => {
                out.write(&[0xff]);
                out.write(&self.0.to_le_bytes());
            }
        }
    }
}

impl Decode for VarInt {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let marker = u8::decode(input)?;
        let value = match marker {
            0xfd => {
                let v = u16::decode(input)? as u64;
                if v < 0xfd {
                    return Err(DecodeError::NonCanonicalVarInt);
                }
                v
            }
            0xfe => {
                let v = u32::decode(input)? as u64;
                if v <= 0xffff {
                    return Err(DecodeError::NonCanonicalVarInt);
                }
                v
            }
            0xff => {
                let v = u64::decode(input)?;
                if v <= 0xffff_ffff {
                    return Err(DecodeError::NonCanonicalVarInt);
                }
                v
            }
            b => b as u64,
        };
        Ok(VarInt(value))
    }
}

impl VarInt {
    /// Decodes a compact size and bounds-checks it as a count.
    pub fn decode_count(input: &mut &[u8], max: usize) -> Result<usize, DecodeError> {
        let VarInt(v) = VarInt::decode(input)?;
        let count = usize::try_from(v).map_err(|_| DecodeError::LengthOverflow)?;
        if count > max {
            return Err(DecodeError::LengthOverflow);
        }
        Ok(count)
    }
}
