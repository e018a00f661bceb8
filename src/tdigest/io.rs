// src/tdigest/io.rs
//
// Byte source/sink boundary for the wire codec. Digests never allocate or
// manage buffers themselves; they are handed a writer to serialize into or a
// reader to deserialize from. All multi-byte fields are big-endian.

use crate::error::{TdError, TdResult};

/// Sequential writer of primitive numeric fields.
pub trait BinaryOutput {
    fn write_byte(&mut self, v: u8);
    fn write_i16(&mut self, v: i16);
    fn write_i32(&mut self, v: i32);
    fn write_i64(&mut self, v: i64);
    fn write_f32(&mut self, v: f32);
    fn write_f64(&mut self, v: f64);
}

impl BinaryOutput for Vec<u8> {
    fn write_byte(&mut self, v: u8) {
        self.push(v);
    }
    fn write_i16(&mut self, v: i16) {
        self.extend_from_slice(&v.to_be_bytes());
    }
    fn write_i32(&mut self, v: i32) {
        self.extend_from_slice(&v.to_be_bytes());
    }
    fn write_i64(&mut self, v: i64) {
        self.extend_from_slice(&v.to_be_bytes());
    }
    fn write_f32(&mut self, v: f32) {
        self.extend_from_slice(&v.to_be_bytes());
    }
    fn write_f64(&mut self, v: f64) {
        self.extend_from_slice(&v.to_be_bytes());
    }
}

/// Sequential reader of primitive numeric fields. Reads past the end report
/// [`TdError::Truncated`] instead of panicking.
pub trait BinaryInput {
    fn read_byte(&mut self) -> TdResult<u8>;
    fn read_i16(&mut self) -> TdResult<i16>;
    fn read_i32(&mut self) -> TdResult<i32>;
    fn read_i64(&mut self) -> TdResult<i64>;
    fn read_f32(&mut self) -> TdResult<f32>;
    fn read_f64(&mut self) -> TdResult<f64>;
}

/// A [`BinaryInput`] over a borrowed byte slice.
pub struct SliceInput<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> SliceInput<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        SliceInput { bytes, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take<const N: usize>(&mut self, what: &'static str) -> TdResult<[u8; N]> {
        if self.offset + N > self.bytes.len() {
            return Err(TdError::Truncated { what });
        }
        let mut arr = [0u8; N];
        arr.copy_from_slice(&self.bytes[self.offset..self.offset + N]);
        self.offset += N;
        Ok(arr)
    }
}

impl BinaryInput for SliceInput<'_> {
    fn read_byte(&mut self) -> TdResult<u8> {
        Ok(self.take::<1>("byte")?[0])
    }
    fn read_i16(&mut self) -> TdResult<i16> {
        Ok(i16::from_be_bytes(self.take("i16")?))
    }
    fn read_i32(&mut self) -> TdResult<i32> {
        Ok(i32::from_be_bytes(self.take("i32")?))
    }
    fn read_i64(&mut self) -> TdResult<i64> {
        Ok(i64::from_be_bytes(self.take("i64")?))
    }
    fn read_f32(&mut self) -> TdResult<f32> {
        Ok(f32::from_be_bytes(self.take("f32")?))
    }
    fn read_f64(&mut self) -> TdResult<f64> {
        Ok(f64::from_be_bytes(self.take("f64")?))
    }
}

/// Write a non-negative integer as 7 data bits per byte, continuation bit in
/// the high bit, least-significant group first. Values needing 6 or more
/// bytes are implausible for a centroid weight and fail fatally.
pub fn encode_varint<W: BinaryOutput + ?Sized>(out: &mut W, n: i32) -> TdResult<()> {
    let mut n = n;
    let mut k = 0;
    while n < 0 || n > 0x7f {
        out.write_byte((0x80 | (0x7f & n)) as u8);
        n = ((n as u32) >> 7) as i32;
        k += 1;
        if k >= 6 {
            return Err(TdError::VarintOverflow);
        }
    }
    out.write_byte(n as u8);
    Ok(())
}

/// Inverse of [`encode_varint`].
pub fn decode_varint<R: BinaryInput + ?Sized>(input: &mut R) -> TdResult<i32> {
    let mut v = input.read_byte()? as i32;
    let mut z = 0x7f & v;
    let mut shift = 7;
    while v & 0x80 != 0 {
        if shift > 28 {
            return Err(TdError::VarintOverflow);
        }
        v = input.read_byte()? as i32;
        z += (v & 0x7f) << shift;
        shift += 7;
    }
    Ok(z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip_big_endian() {
        let mut buf = Vec::new();
        buf.write_byte(0xab);
        buf.write_i16(-2);
        buf.write_i32(123_456_789);
        buf.write_i64(-9_876_543_210);
        buf.write_f32(1.5);
        buf.write_f64(-0.25);

        // spot-check the byte order on the i32
        assert_eq!(&buf[3..7], &123_456_789i32.to_be_bytes());

        let mut input = SliceInput::new(&buf);
        assert_eq!(input.read_byte().unwrap(), 0xab);
        assert_eq!(input.read_i16().unwrap(), -2);
        assert_eq!(input.read_i32().unwrap(), 123_456_789);
        assert_eq!(input.read_i64().unwrap(), -9_876_543_210);
        assert_eq!(input.read_f32().unwrap(), 1.5);
        assert_eq!(input.read_f64().unwrap(), -0.25);
        assert_eq!(input.remaining(), 0);
    }

    #[test]
    fn truncated_reads_error_out() {
        let mut input = SliceInput::new(&[0, 1, 2]);
        assert!(matches!(
            input.read_f64(),
            Err(TdError::Truncated { .. })
        ));
        // a failed read consumes nothing
        assert_eq!(input.read_i16().unwrap(), 1);
    }

    #[test]
    fn varint_round_trip() {
        for n in [0, 1, 127, 128, 1000, 16_383, 16_384, i32::MAX] {
            let mut buf = Vec::new();
            encode_varint(&mut buf, n).unwrap();
            assert!(buf.len() <= 5);
            let mut input = SliceInput::new(&buf);
            assert_eq!(decode_varint(&mut input).unwrap(), n, "n={}", n);
        }
    }

    #[test]
    fn varint_codec_works_through_trait_objects() {
        // the digest encoders hand the varint codec unsized writers
        let mut buf = Vec::new();
        let out: &mut dyn BinaryOutput = &mut buf;
        encode_varint(out, 90_210).unwrap();
        let mut cursor = SliceInput::new(&buf);
        let input: &mut dyn BinaryInput = &mut cursor;
        assert_eq!(decode_varint(input).unwrap(), 90_210);
    }

    #[test]
    fn varint_sizes() {
        let mut buf = Vec::new();
        encode_varint(&mut buf, 127).unwrap();
        assert_eq!(buf.len(), 1);
        buf.clear();
        encode_varint(&mut buf, 128).unwrap();
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let mut input = SliceInput::new(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert_eq!(decode_varint(&mut input), Err(TdError::VarintOverflow));
    }
}
