//! Byte-oriented read/write contract with endian-aware typed primitives.
//!
//! Implementors only provide [`BinaryStream::write_bytes`] and
//! [`BinaryStream::read_bytes`]; typed values and length-prefixed strings are
//! layered on top. Strings travel as:
//!
//! ```text
//! +-------------------+----------------------------+
//! | length (2 bytes)  |   raw bytes (length bytes) |
//! +-------------------+----------------------------+
//! ```
//!
//! A length of `0xFFFF` marks an absent string; no terminator is written.

use crate::error::NetError;

/// Length prefix written for an absent string.
pub const ABSENT_STRING_LENGTH: u16 = 0xFFFF;

/// Byte order used for multi-byte primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Least significant byte first. Used by every wire format in this crate.
    #[default]
    Little,
    /// Most significant byte first.
    Big,
}

impl ByteOrder {
    /// Byte order of the host CPU.
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }
}

/// A fixed-size primitive that can be written to a [`BinaryStream`].
pub trait WireValue: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Encode into the first [`Self::SIZE`] bytes of `out`.
    fn encode(self, order: ByteOrder, out: &mut [u8]);

    /// Decode from the first [`Self::SIZE`] bytes of `bytes`.
    fn decode(order: ByteOrder, bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl WireValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn encode(self, order: ByteOrder, out: &mut [u8]) {
                    let bytes = match order {
                        ByteOrder::Little => self.to_le_bytes(),
                        ByteOrder::Big => self.to_be_bytes(),
                    };
                    out[..Self::SIZE].copy_from_slice(&bytes);
                }

                fn decode(order: ByteOrder, bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    match order {
                        ByteOrder::Little => <$ty>::from_le_bytes(raw),
                        ByteOrder::Big => <$ty>::from_be_bytes(raw),
                    }
                }
            }
        )*
    };
}

impl_wire_value!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl WireValue for bool {
    const SIZE: usize = 1;

    fn encode(self, _order: ByteOrder, out: &mut [u8]) {
        out[0] = u8::from(self);
    }

    fn decode(_order: ByteOrder, bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Largest [`WireValue::SIZE`] among the provided implementations.
const MAX_WIRE_VALUE_SIZE: usize = 8;

/// Byte-level stream contract.
pub trait BinaryStream {
    /// Write all of `bytes` or nothing. Returns the number of bytes written.
    fn write_bytes(&mut self, bytes: &[u8]) -> usize;

    /// Fill all of `out` or nothing. Returns the number of bytes read.
    fn read_bytes(&mut self, out: &mut [u8]) -> usize;

    /// Byte order applied to multi-byte primitives.
    fn byte_order(&self) -> ByteOrder {
        ByteOrder::Little
    }

    /// Write a typed primitive.
    fn write<T: WireValue>(&mut self, value: T) -> Result<(), NetError>
    where
        Self: Sized,
    {
        let mut buf = [0u8; MAX_WIRE_VALUE_SIZE];
        value.encode(self.byte_order(), &mut buf);
        if self.write_bytes(&buf[..T::SIZE]) == T::SIZE {
            Ok(())
        } else {
            Err(NetError::WriteOverflow { requested: T::SIZE })
        }
    }

    /// Read a typed primitive.
    fn read<T: WireValue>(&mut self) -> Result<T, NetError>
    where
        Self: Sized,
    {
        let mut buf = [0u8; MAX_WIRE_VALUE_SIZE];
        if self.read_bytes(&mut buf[..T::SIZE]) != T::SIZE {
            return Err(NetError::ReadUnderflow { requested: T::SIZE });
        }
        Ok(T::decode(self.byte_order(), &buf))
    }

    /// Write a `u16` length-prefixed string, or the absent sentinel for `None`.
    ///
    /// Prefix and bytes are written in a single call, so a capacity failure
    /// leaves the stream unchanged.
    fn write_string(&mut self, value: Option<&str>) -> Result<(), NetError>
    where
        Self: Sized,
    {
        let Some(value) = value else {
            return self.write(ABSENT_STRING_LENGTH);
        };

        let len = value.len();
        if len >= usize::from(ABSENT_STRING_LENGTH) {
            return Err(NetError::StringTooLong(len));
        }

        let mut encoded = vec![0u8; 2 + len];
        (len as u16).encode(self.byte_order(), &mut encoded[..2]);
        encoded[2..].copy_from_slice(value.as_bytes());

        if self.write_bytes(&encoded) == encoded.len() {
            Ok(())
        } else {
            Err(NetError::WriteOverflow {
                requested: encoded.len(),
            })
        }
    }

    /// Read a length-prefixed string, keeping at most `max_size` bytes.
    ///
    /// Returns `None` for the absent sentinel, for an empty string, and when
    /// the stream runs out of data. Only `max_size` bytes are consumed when the
    /// encoded string is longer.
    fn read_string(&mut self, max_size: usize) -> Option<String>
    where
        Self: Sized,
    {
        let length: u16 = self.read().ok()?;
        if length == ABSENT_STRING_LENGTH || length == 0 {
            return None;
        }

        let take = usize::from(length).min(max_size);
        let mut bytes = vec![0u8; take];
        if self.read_bytes(&mut bytes) != take {
            return None;
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Growable in-memory stream for exercising the provided methods.
    #[derive(Default)]
    struct VecStream {
        bytes: Vec<u8>,
        cursor: usize,
        order: ByteOrder,
        limit: Option<usize>,
    }

    impl BinaryStream for VecStream {
        fn write_bytes(&mut self, bytes: &[u8]) -> usize {
            if let Some(limit) = self.limit
                && self.bytes.len() + bytes.len() > limit
            {
                return 0;
            }
            self.bytes.extend_from_slice(bytes);
            bytes.len()
        }

        fn read_bytes(&mut self, out: &mut [u8]) -> usize {
            if self.cursor + out.len() > self.bytes.len() {
                return 0;
            }
            out.copy_from_slice(&self.bytes[self.cursor..self.cursor + out.len()]);
            self.cursor += out.len();
            out.len()
        }

        fn byte_order(&self) -> ByteOrder {
            self.order
        }
    }

    #[test]
    fn test_primitives_little_endian_layout() {
        let mut stream = VecStream::default();
        stream.write(0x1234u16).unwrap();
        stream.write(0xAABBCCDDu32).unwrap();
        assert_eq!(stream.bytes, vec![0x34, 0x12, 0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn test_primitives_big_endian_layout() {
        let mut stream = VecStream {
            order: ByteOrder::Big,
            ..Default::default()
        };
        stream.write(0x1234u16).unwrap();
        assert_eq!(stream.bytes, vec![0x12, 0x34]);
        assert_eq!(stream.read::<u16>().unwrap(), 0x1234);
    }

    #[test]
    fn test_mixed_primitives_read_back() {
        let mut stream = VecStream::default();
        stream.write(-7i32).unwrap();
        stream.write(1.5f32).unwrap();
        stream.write(true).unwrap();
        stream.write(u64::MAX).unwrap();

        assert_eq!(stream.read::<i32>().unwrap(), -7);
        assert_eq!(stream.read::<f32>().unwrap(), 1.5);
        assert!(stream.read::<bool>().unwrap());
        assert_eq!(stream.read::<u64>().unwrap(), u64::MAX);
    }

    #[test]
    fn test_read_past_end_is_an_error() {
        let mut stream = VecStream::default();
        stream.write(1u8).unwrap();
        assert!(matches!(
            stream.read::<u32>(),
            Err(NetError::ReadUnderflow { requested: 4 })
        ));
    }

    #[test]
    fn test_absent_string_sentinel() {
        let mut stream = VecStream::default();
        stream.write_string(None).unwrap();
        assert_eq!(stream.bytes, vec![0xFF, 0xFF]);
        assert_eq!(stream.read_string(64), None);
    }

    #[test]
    fn test_empty_string_reads_as_absent() {
        let mut stream = VecStream::default();
        stream.write_string(Some("")).unwrap();
        assert_eq!(stream.bytes, vec![0x00, 0x00]);
        assert_eq!(stream.read_string(64), None);
    }

    #[test]
    fn test_string_has_no_terminator_on_wire() {
        let mut stream = VecStream::default();
        stream.write_string(Some("abc")).unwrap();
        assert_eq!(stream.bytes, vec![3, 0, b'a', b'b', b'c']);
        assert_eq!(stream.read_string(64).as_deref(), Some("abc"));
    }

    #[test]
    fn test_string_clamped_to_max_size() {
        let mut stream = VecStream::default();
        stream.write_string(Some("abcdef")).unwrap();
        assert_eq!(stream.read_string(3).as_deref(), Some("abc"));
    }

    #[test]
    fn test_string_write_is_all_or_nothing() {
        let mut stream = VecStream {
            limit: Some(4),
            ..Default::default()
        };
        let result = stream.write_string(Some("abcdef"));
        assert!(matches!(result, Err(NetError::WriteOverflow { requested: 8 })));
        assert!(stream.bytes.is_empty());
    }

    #[test]
    fn test_native_order_matches_target() {
        let expected = if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        };
        assert_eq!(ByteOrder::native(), expected);
    }
}
