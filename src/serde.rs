//! Per-item (de)serialization for the binary image format.
//!
//! Items are opaque to the sketch core; turning them into bytes is the
//! caller's responsibility, expressed through the [`SerDe`] trait. A
//! hand-rolled little-endian [`ByteCursor`] backs both the preamble and
//! the primitive `SerDe` impls below (pulling in an off-heap buffer
//! crate for this would be a much bigger dependency than the handful of
//! `u8`/`i64`/`f64` reads and writes the format actually needs).

use crate::error::SketchError;

/// Encodes and decodes a run of `T` to and from bytes for the binary
/// image format (`§6`). Implementors only need to agree with themselves:
/// `deserialize(&serialize(items), items.len())` must reproduce `items`.
pub trait SerDe<T> {
    /// Serializes `items` in order, with no length prefix (the sketch
    /// preamble already carries the counts needed to know how many items
    /// to read back).
    fn serialize(&self, items: &[T]) -> Vec<u8>;

    /// Deserializes exactly `count` items from `bytes`. Returns
    /// [`SketchError::Corruption`] if `bytes` doesn't hold that many.
    fn deserialize(&self, bytes: &[u8], count: usize) -> Result<Vec<T>, SketchError>;
}

/// A [`SerDe`] for `f64` items: 8 bytes each, little-endian.
pub struct F64SerDe;

impl SerDe<f64> for F64SerDe {
    fn serialize(&self, items: &[f64]) -> Vec<u8> {
        let mut cursor = ByteCursor::with_capacity(items.len() * 8);
        for &item in items {
            cursor.write_f64(item);
        }
        cursor.into_vec()
    }

    fn deserialize(&self, bytes: &[u8], count: usize) -> Result<Vec<f64>, SketchError> {
        let mut cursor = ByteCursor::from_slice(bytes);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(cursor.read_f64()?);
        }
        Ok(out)
    }
}

/// A [`SerDe`] for `i64` items: 8 bytes each, little-endian.
pub struct I64SerDe;

impl SerDe<i64> for I64SerDe {
    fn serialize(&self, items: &[i64]) -> Vec<u8> {
        let mut cursor = ByteCursor::with_capacity(items.len() * 8);
        for &item in items {
            cursor.write_i64(item);
        }
        cursor.into_vec()
    }

    fn deserialize(&self, bytes: &[u8], count: usize) -> Result<Vec<i64>, SketchError> {
        let mut cursor = ByteCursor::from_slice(bytes);
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(cursor.read_i64()?);
        }
        Ok(out)
    }
}

/// A growable write cursor / shrinking read cursor over a little-endian
/// byte buffer. Reads return `Corruption` instead of panicking on a
/// truncated buffer, which is the whole reason this exists instead of
/// just slicing `&[u8]` by hand at each call site.
pub struct ByteCursor<'a> {
    write_buf: Vec<u8>,
    read_buf: &'a [u8],
    pos: usize,
}

impl ByteCursor<'static> {
    pub fn with_capacity(cap: usize) -> Self {
        ByteCursor { write_buf: Vec::with_capacity(cap), read_buf: &[], pos: 0 }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.write_buf
    }
}

impl<'a> ByteCursor<'a> {
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        ByteCursor { write_buf: Vec::new(), read_buf: bytes, pos: 0 }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write_buf.push(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.write_buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SketchError> {
        if self.pos + n > self.read_buf.len() {
            return Err(SketchError::Corruption(format!(
                "expected {n} more bytes at offset {}, only {} remain",
                self.pos,
                self.read_buf.len() - self.pos.min(self.read_buf.len())
            )));
        }
        let slice = &self.read_buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, SketchError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_i32(&mut self) -> Result<i32, SketchError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(i32::from_le_bytes(bytes))
    }

    pub fn read_i64(&mut self) -> Result<i64, SketchError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(i64::from_le_bytes(bytes))
    }

    pub fn read_f64(&mut self) -> Result<f64, SketchError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_le_bytes(bytes))
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.read_buf[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f64_round_trips() {
        let serde = F64SerDe;
        let items = vec![1.0, -2.5, 0.0, std::f64::consts::E];
        let bytes = serde.serialize(&items);
        let back = serde.deserialize(&bytes, items.len()).unwrap();
        assert_eq!(items, back);
    }

    #[test]
    fn i64_round_trips() {
        let serde = I64SerDe;
        let items = vec![i64::MIN, -1, 0, 1, i64::MAX];
        let bytes = serde.serialize(&items);
        let back = serde.deserialize(&bytes, items.len()).unwrap();
        assert_eq!(items, back);
    }

    #[test]
    fn truncated_read_is_corruption_not_panic() {
        let serde = I64SerDe;
        let bytes = vec![1, 2, 3];
        let err = serde.deserialize(&bytes, 1).unwrap_err();
        assert!(matches!(err, SketchError::Corruption(_)));
    }
}
