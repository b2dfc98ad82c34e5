//! Big-endian byte conversion for FITS data.
//!
//! FITS stores all binary data in big-endian (most-significant byte first) format.
//! The [`BigEndian`] trait gives every pixel and column element type a
//! byte-order swap, and the bulk helpers decode or encode whole arrays through
//! `bytemuck` so the typed buffers are always properly aligned.

use bytemuck::{pod_collect_to_vec, Pod};

/// Element types that can be converted between big-endian and native order.
pub trait BigEndian: Pod {
    /// Interpret `self` as a big-endian value and return it in native order.
    fn from_be_value(self) -> Self;
    /// Return `self` re-encoded in big-endian order.
    fn to_be_value(self) -> Self;
}

macro_rules! impl_be_int {
    ($($t:ty),*) => {$(
        impl BigEndian for $t {
            #[inline]
            fn from_be_value(self) -> Self {
                <$t>::from_be(self)
            }
            #[inline]
            fn to_be_value(self) -> Self {
                self.to_be()
            }
        }
    )*};
}

impl_be_int!(u8, i8, u16, i16, u32, i32, u64, i64);

impl BigEndian for f32 {
    #[inline]
    fn from_be_value(self) -> Self {
        f32::from_bits(u32::from_be(self.to_bits()))
    }
    #[inline]
    fn to_be_value(self) -> Self {
        f32::from_bits(self.to_bits().to_be())
    }
}

impl BigEndian for f64 {
    #[inline]
    fn from_be_value(self) -> Self {
        f64::from_bits(u64::from_be(self.to_bits()))
    }
    #[inline]
    fn to_be_value(self) -> Self {
        f64::from_bits(self.to_bits().to_be())
    }
}

/// Decode a big-endian byte slice into a native-order vector.
///
/// Trailing bytes that do not form a whole element are ignored.
pub fn decode_be<T: BigEndian>(raw: &[u8]) -> Vec<T> {
    let whole = raw.len() - raw.len() % core::mem::size_of::<T>();
    let mut values: Vec<T> = pod_collect_to_vec(&raw[..whole]);
    for v in &mut values {
        *v = v.from_be_value();
    }
    values
}

/// Encode native-order values as a big-endian byte vector.
pub fn encode_be<T: BigEndian>(values: &[T]) -> Vec<u8> {
    let swapped: Vec<T> = values.iter().map(|v| v.to_be_value()).collect();
    pod_collect_to_vec(&swapped)
}

/// Reverse each `elem_size`-byte group of `buf` in place on little-endian hosts.
///
/// Used for table cells whose element type is only known at run time.
pub fn swap_be_in_place(buf: &mut [u8], elem_size: usize) {
    if elem_size <= 1 || cfg!(target_endian = "big") {
        return;
    }
    for chunk in buf.chunks_exact_mut(elem_size) {
        chunk.reverse();
    }
}

/// Read a big-endian `i32` from the first 4 bytes of the slice.
#[inline]
pub fn read_i32_be(buf: &[u8]) -> i32 {
    i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Read a big-endian `i64` from the first 8 bytes of the slice.
#[inline]
pub fn read_i64_be(buf: &[u8]) -> i64 {
    i64::from_be_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}
