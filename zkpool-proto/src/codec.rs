//! Primitive big-endian encoding used by every record on the wire.
//!
//! - `int` / `long`: 4 / 8 byte big-endian two's complement
//! - `bool`: one byte, non-zero is true
//! - `buffer` / `string`: `int` length then the bytes; length `-1` is null
//! - `vector<T>`: `int` count then the elements; count `-1` is null
//!
//! Null buffers, strings and vectors decode as empty values.

use crate::ProtoError;

/// Append-only encoder over a byte vector.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an encoder with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Write a 32-bit integer.
    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a 64-bit integer.
    pub fn write_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a boolean as a single byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// Write a length-prefixed byte buffer.
    pub fn write_buffer(&mut self, bytes: &[u8]) {
        self.write_i32(bytes.len() as i32);
        self.buf.extend_from_slice(bytes);
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) {
        self.write_buffer(value.as_bytes());
    }

    /// Write a vector of strings.
    pub fn write_strings<S: AsRef<str>>(&mut self, values: &[S]) {
        self.write_i32(values.len() as i32);
        for value in values {
            self.write_string(value.as_ref());
        }
    }

    /// Write a vector of records.
    pub fn write_vec<T: Encode>(&mut self, values: &[T]) {
        self.write_i32(values.len() as i32);
        for value in values {
            value.encode(self);
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consume the encoder and return the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based decoder over a borrowed byte slice.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Create a decoder positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fail unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), ProtoError> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(ProtoError::TrailingBytes { count }),
        }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtoError> {
        if self.remaining() < n {
            return Err(ProtoError::InsufficientData {
                needed: n,
                have: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtoError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a 32-bit integer.
    pub fn read_i32(&mut self) -> Result<i32, ProtoError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    /// Read a 64-bit integer.
    pub fn read_i64(&mut self) -> Result<i64, ProtoError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    /// Read a one-byte boolean.
    pub fn read_bool(&mut self) -> Result<bool, ProtoError> {
        Ok(self.take(1)?[0] != 0)
    }

    /// Read a length prefix, mapping the null marker to zero.
    fn read_len(&mut self) -> Result<usize, ProtoError> {
        match self.read_i32()? {
            -1 => Ok(0),
            length if length < 0 => Err(ProtoError::InvalidLength { length }),
            length => Ok(length as usize),
        }
    }

    /// Read a length-prefixed byte buffer.
    pub fn read_buffer(&mut self) -> Result<Vec<u8>, ProtoError> {
        let len = self.read_len()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, ProtoError> {
        let len = self.read_len()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| ProtoError::InvalidUtf8)
    }

    /// Read a vector of strings.
    pub fn read_strings(&mut self) -> Result<Vec<String>, ProtoError> {
        let count = self.read_len()?;
        // Each element needs at least its 4-byte length prefix.
        if count > self.remaining() / 4 {
            return Err(ProtoError::InvalidLength {
                length: count as i32,
            });
        }
        (0..count).map(|_| self.read_string()).collect()
    }

    /// Read a vector of records.
    pub fn read_vec<T: Decode>(&mut self) -> Result<Vec<T>, ProtoError> {
        let count = self.read_len()?;
        if count > self.remaining() {
            return Err(ProtoError::InvalidLength {
                length: count as i32,
            });
        }
        (0..count).map(|_| T::decode(self)).collect()
    }
}

/// A record with a fixed wire encoding.
pub trait Encode {
    /// Append this record to the encoder.
    fn encode(&self, enc: &mut Encoder);
}

/// A record that can be decoded from the wire.
pub trait Decode: Sized {
    /// Decode one record from the decoder's current position.
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, ProtoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_big_endian() {
        let mut enc = Encoder::new();
        enc.write_i32(1);
        enc.write_i64(-2);
        let bytes = enc.into_bytes();
        assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[4..], &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe]);
    }

    #[test]
    fn test_null_buffer_decodes_empty() {
        let bytes = (-1i32).to_be_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.read_buffer().expect("null buffer"), Vec::<u8>::new());
        assert!(dec.is_empty());
    }

    #[test]
    fn test_negative_length_rejected() {
        let bytes = (-5i32).to_be_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(
            dec.read_string(),
            Err(ProtoError::InvalidLength { length: -5 })
        );
    }

    #[test]
    fn test_truncated_string_reports_shortfall() {
        let mut enc = Encoder::new();
        enc.write_i32(10);
        enc.write_bool(true);
        let bytes = enc.into_bytes();
        let mut dec = Decoder::new(&bytes);
        assert_eq!(
            dec.read_string(),
            Err(ProtoError::InsufficientData { needed: 10, have: 1 })
        );
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut enc = Encoder::new();
        enc.write_buffer(&[0xff, 0xfe]);
        let bytes = enc.into_bytes();
        assert_eq!(
            Decoder::new(&bytes).read_string(),
            Err(ProtoError::InvalidUtf8)
        );
    }

    #[test]
    fn test_huge_vector_count_rejected_before_allocation() {
        let bytes = i32::MAX.to_be_bytes();
        assert!(matches!(
            Decoder::new(&bytes).read_strings(),
            Err(ProtoError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_finish_reports_trailing_bytes() {
        let bytes = [0u8; 6];
        let mut dec = Decoder::new(&bytes);
        dec.read_i32().expect("int");
        assert_eq!(dec.finish(), Err(ProtoError::TrailingBytes { count: 2 }));
    }
}
