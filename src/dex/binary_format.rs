use byteorder::{LittleEndian, WriteBytesExt};
use std::cmp::Ordering;
use std::io::Result;

/// Utility trait for serializing fixed-layout items of a dex file
///
/// Dex files are little-endian throughout, and most sequences are prefixed with a `u32` size (the
/// variable-length parts use LEB128, which is handled separately by [`crate::util`]).
pub trait Serialize: Sized {
    /// Serialize construct into a binary output stream
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()>;
}

impl Serialize for u8 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)
    }
}

impl Serialize for u16 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<LittleEndian>(*self)
    }
}

impl Serialize for u32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(*self)
    }
}

impl Serialize for i32 {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<LittleEndian>(*self)
    }
}

/// Size in `u32` is the first thing serialized
impl<A: Serialize> Serialize for Vec<A> {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
        (self.len() as u32).serialize(writer)?;
        for elem in self {
            elem.serialize(writer)?;
        }
        Ok(())
    }
}

/// Sentinel for absent index fields
pub const NO_INDEX: u32 = 0xffff_ffff;

/// Encode a string into the "modified" UTF-8 used by dex `string_data_item`s
///
/// The string is first split into UTF-16 code units. Each unit is then encoded on its own, so
/// supplementary characters become two 3-byte surrogate sequences and `\u{0000}` takes 2 bytes.
/// The trailing NUL byte is not included.
pub fn encode_modified_utf8(string: &str) -> Vec<u8> {
    let mut buffer: Vec<u8> = Vec::with_capacity(string.len());
    for unit in string.encode_utf16() {
        match unit {
            0x0001..=0x007f => buffer.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                buffer.push(0xc0 | (unit >> 6) as u8);
                buffer.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                buffer.push(0xe0 | (unit >> 12) as u8);
                buffer.push(0x80 | (unit >> 6 & 0x3f) as u8);
                buffer.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    buffer
}

/// Number of UTF-16 code units in a string (the length prefix of a `string_data_item`)
pub fn utf16_len(string: &str) -> usize {
    string.encode_utf16().count()
}

/// Compare strings by UTF-16 code units, which is the order dex string ids must be sorted in
///
/// This differs from `str`'s own ordering for characters outside the basic multilingual plane.
pub fn compare_utf16(left: &str, right: &str) -> Ordering {
    left.encode_utf16().cmp(right.encode_utf16())
}
