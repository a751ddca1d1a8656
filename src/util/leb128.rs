use byteorder::WriteBytesExt;
use std::io::Result;

/// Write an unsigned LEB128 value (at most 5 bytes for a `u32`)
pub fn write_uleb128<W: WriteBytesExt>(writer: &mut W, mut value: u32) -> Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            return writer.write_u8(byte);
        }
        writer.write_u8(byte | 0x80)?;
    }
}

/// Write a signed LEB128 value (at most 5 bytes for an `i32`)
pub fn write_sleb128<W: WriteBytesExt>(writer: &mut W, mut value: i32) -> Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;

        // Done once the remaining bits are all sign bits, and the sign bit of this byte agrees
        let sign_bit_set = byte & 0x40 != 0;
        if (value == 0 && !sign_bit_set) || (value == -1 && sign_bit_set) {
            return writer.write_u8(byte);
        }
        writer.write_u8(byte | 0x80)?;
    }
}

/// Number of bytes `write_uleb128` will produce
pub fn uleb128_len(value: u32) -> usize {
    match value {
        0..=0x7f => 1,
        0x80..=0x3fff => 2,
        0x4000..=0x1f_ffff => 3,
        0x20_0000..=0x0fff_ffff => 4,
        _ => 5,
    }
}
