use std::{cmp::{max, min}, fmt};

use crate::pdu_parse_error::PduParseErr;

/// MSB-first bit buffer used for DCI payloads, RAR grants and MAC PDUs.
///
/// Bit 0 is the most significant bit of byte 0, which matches the field order of
/// TS 38.212 DCI payloads and TS 38.321 MAC subheaders.
#[derive(Clone)]
pub struct BitBuffer {
    buffer: Vec<u8>,
    pos: usize,             // next bit offset for read/write
    end: usize,             // bits at or after this are out of window
    flag_autoexpand: bool,  // writes past end grow the buffer instead of panicking
}

impl BitBuffer {
    /// Create a zeroed buffer holding exactly `len_bits` bits.
    pub fn new(len_bits: usize) -> Self {
        BitBuffer {
            buffer: vec![0; len_bits.div_ceil(8)],
            pos: 0,
            end: len_bits,
            flag_autoexpand: false,
        }
    }

    /// Create an empty buffer that grows with every write.
    pub fn new_autoexpand(initial_cap_bits: usize) -> Self {
        BitBuffer {
            buffer: vec![0; initial_cap_bits.div_ceil(8)],
            pos: 0,
            end: 0,
            flag_autoexpand: true,
        }
    }

    /// Wrap an owned byte vector, all bits readable.
    pub fn from_vec(data: Vec<u8>) -> Self {
        let end = data.len() * 8;
        BitBuffer { buffer: data, pos: 0, end, flag_autoexpand: false }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Construct from a string of '0'/'1' characters. Panics on any other character.
    pub fn from_bitstr(bitstr: &str) -> Self {
        let mut buf = BitBuffer::new(bitstr.len());
        for c in bitstr.chars() {
            match c {
                '0' => buf.write_bit(0),
                '1' => buf.write_bit(1),
                other => panic!("from_bitstr: invalid character `{}`; only '0' or '1' allowed", other),
            }
        }
        buf.pos = 0;
        buf
    }

    /// Whole window as a '0'/'1' string.
    pub fn to_bitstr(&self) -> String {
        (0..self.end)
            .map(|i| if self.read_bits_at_unchecked(i, 1) == 1 { '1' } else { '0' })
            .collect()
    }

    /// Peek `num_bits` at the current pos without advancing.
    /// Returns None on overflow or if `num_bits > 64`.
    pub fn peek_bits(&self, num_bits: usize) -> Option<u64> {
        self.peek_bits_at(self.pos, num_bits)
    }

    /// Peek `num_bits` at absolute bit offset `offset`.
    pub fn peek_bits_at(&self, offset: usize, num_bits: usize) -> Option<u64> {
        if num_bits > 64 || offset + num_bits > self.end {
            return None;
        }
        Some(self.read_bits_at_unchecked(offset, num_bits))
    }

    /// Read `num_bits` at the current pos, advancing on success.
    pub fn read_bits(&mut self, num_bits: usize) -> Option<u64> {
        let v = self.peek_bits(num_bits)?;
        self.pos += num_bits;
        Some(v)
    }

    /// As read_bits, but reports the field name in a PduParseErr::BufferEnded
    pub fn read_field(&mut self, num_bits: usize, field: &'static str) -> Result<u64, PduParseErr> {
        self.read_bits(num_bits).ok_or(PduParseErr::BufferEnded { field: Some(field) })
    }

    /// Read `num_bytes` whole bytes starting at the current pos (which need not be aligned)
    pub fn read_bytes(&mut self, num_bytes: usize, field: &'static str) -> Result<Vec<u8>, PduParseErr> {
        if self.pos + num_bytes * 8 > self.end {
            return Err(PduParseErr::BufferEnded { field: Some(field) });
        }
        let mut out = Vec::with_capacity(num_bytes);
        for _ in 0..num_bytes {
            out.push(self.read_bits_at_unchecked(self.pos, 8) as u8);
            self.pos += 8;
        }
        Ok(out)
    }

    /// Write a single bit at pos
    pub fn write_bit(&mut self, value: u8) {
        assert!(value <= 1, "write_bit: value must be 0 or 1");
        self.write_bits(value as u64, 1);
    }

    /// Write up to 64 bits MSB-first, advancing pos.
    /// Expands the buffer when autoexpand is set, panics past end otherwise.
    pub fn write_bits(&mut self, value: u64, num_bits: usize) {
        assert!(num_bits <= 64, "can only write up to 64 bits");
        assert!(num_bits == 64 || value >> num_bits == 0, "value {} exceeds num_bits {}", value, num_bits);
        if self.pos + num_bits > self.end {
            assert!(self.flag_autoexpand, "write would exceed buffer end");
            self.grow(self.pos + num_bits - self.end);
        }
        self.write_bits_at_unchecked(self.pos, value, num_bits);
        self.pos += num_bits;
    }

    pub fn write_zeroes(&mut self, num_bits: usize) {
        let mut remaining = num_bits;
        while remaining > 0 {
            let chunk = min(remaining, 64);
            self.write_bits(0, chunk);
            remaining -= chunk;
        }
    }

    pub fn write_ones(&mut self, num_bits: usize) {
        let mut remaining = num_bits;
        while remaining > 0 {
            let chunk = min(remaining, 64);
            self.write_bits(u64::MAX >> (64 - chunk), chunk);
            remaining -= chunk;
        }
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        for b in data {
            self.write_bits(*b as u64, 8);
        }
    }

    /// Length of the window in bits
    pub fn get_len(&self) -> usize {
        self.end
    }

    /// Bits between pos and end
    pub fn get_len_remaining(&self) -> usize {
        self.end - self.pos
    }

    pub fn get_pos(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        assert!(pos <= self.end, "seek beyond end");
        self.pos = pos;
    }

    pub fn seek_rel(&mut self, offset: isize) {
        let target = self.pos as isize + offset;
        assert!(target >= 0 && target as usize <= self.end, "seek_rel out of window");
        self.pos = target as usize;
    }

    /// Bytes covering the window, the last one zero-padded
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.end.div_ceil(8)]
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.buffer.truncate(self.end.div_ceil(8));
        self.buffer
    }

    pub fn dump_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn grow(&mut self, extra_bits: usize) {
        let needed = self.end + extra_bits;
        if needed > self.buffer.len() * 8 {
            let new_cap_bits = max(needed, self.buffer.len() * 16);
            self.buffer.resize(new_cap_bits.div_ceil(8), 0);
        }
        self.end = needed;
    }

    fn read_bits_at_unchecked(&self, pos: usize, num_bits: usize) -> u64 {
        let mut v = 0u64;
        let mut p = pos;
        let mut remaining = num_bits;
        while remaining > 0 {
            let bit_off = p % 8;
            let take = min(8 - bit_off, remaining);
            let mask = ((1u16 << take) - 1) as u8;
            let chunk = (self.buffer[p / 8] >> (8 - bit_off - take)) & mask;
            v = (v << take) | chunk as u64;
            p += take;
            remaining -= take;
        }
        v
    }

    fn write_bits_at_unchecked(&mut self, pos: usize, value: u64, num_bits: usize) {
        let mut p = pos;
        let mut remaining = num_bits;
        while remaining > 0 {
            let bit_off = p % 8;
            let take = min(8 - bit_off, remaining);
            let shift = 8 - bit_off - take;
            let mask = ((1u16 << take) - 1) as u8;
            let chunk = ((value >> (remaining - take)) as u8) & mask;
            let byte = &mut self.buffer[p / 8];
            *byte = (*byte & !(mask << shift)) | (chunk << shift);
            p += take;
            remaining -= take;
        }
    }
}

impl fmt::Debug for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitBuffer {{ pos: {}, end: {}, data: {} }}", self.pos, self.end, self.dump_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unaligned_fields() {
        // 1 | 0110 | 101 | 11110000 : fields spanning byte boundaries
        let mut buf = BitBuffer::from_bitstr("1011010111110000");
        assert_eq!(buf.read_bits(1), Some(1));
        assert_eq!(buf.read_bits(4), Some(0b0110));
        assert_eq!(buf.read_bits(3), Some(0b101));
        assert_eq!(buf.read_bits(8), Some(0xF0));
        assert_eq!(buf.read_bits(1), None);
    }

    #[test]
    fn test_read_field_reports_name() {
        let mut buf = BitBuffer::from_bitstr("101");
        assert_eq!(buf.read_field(2, "mcs"), Ok(0b10));
        assert_eq!(buf.read_field(2, "ndi"), Err(PduParseErr::BufferEnded { field: Some("ndi") }));
        // Failed read does not advance
        assert_eq!(buf.get_pos(), 2);
    }

    #[test]
    fn test_write_then_read_back() {
        let mut buf = BitBuffer::new_autoexpand(8);
        buf.write_bits(0b1, 1);
        buf.write_bits(0x1ABC, 13);
        buf.write_bits(0xDEADBEEF, 32);
        buf.write_zeroes(3);
        buf.write_ones(5);
        assert_eq!(buf.get_len(), 54);
        buf.seek(0);
        assert_eq!(buf.read_bits(1), Some(1));
        assert_eq!(buf.read_bits(13), Some(0x1ABC));
        assert_eq!(buf.read_bits(32), Some(0xDEADBEEF));
        assert_eq!(buf.read_bits(8), Some(0b00011111));
    }

    #[test]
    fn test_bytes_and_hex() {
        let mut buf = BitBuffer::new_autoexpand(16);
        buf.write_bits(0x3, 2);
        buf.write_bits(0x3F, 6);
        buf.write_bytes(&[0x01, 0xFF]);
        assert_eq!(buf.dump_hex(), "ff01ff");
        buf.seek(8);
        assert_eq!(buf.read_bytes(2, "sdu"), Ok(vec![0x01, 0xFF]));
        assert_eq!(buf.into_bytes(), vec![0xFF, 0x01, 0xFF]);
    }

    #[test]
    fn test_bitstr_roundtrip() {
        let s = "0010011101";
        assert_eq!(BitBuffer::from_bitstr(s).to_bitstr(), s);
    }

    #[test]
    #[should_panic(expected = "write would exceed buffer end")]
    fn test_fixed_buffer_overflow_panics() {
        let mut buf = BitBuffer::new(4);
        buf.write_bits(0x1F, 5);
    }
}
