//! Encoding of `encoded_value`, `encoded_array`, and `encoded_annotation`
//!
//! Every value starts with a header byte: the value type in the low 5 bits and an argument in
//! the high 3 bits. For numbers and indices the argument is the byte count minus one, and only as
//! many bytes as needed are written.

use crate::dex::code::ReferenceIndexer;
use crate::dex::{EncodedAnnotation, EncodedValue, Error};
use crate::util::write_uleb128;
use byteorder::WriteBytesExt;

pub fn write_encoded_value<W: WriteBytesExt>(
    writer: &mut W,
    value: &EncodedValue,
    indexer: &impl ReferenceIndexer,
) -> Result<(), Error> {
    let value_type = value.value_type();
    match value {
        EncodedValue::Byte(byte) => {
            writer.write_u8(value_type)?;
            writer.write_i8(*byte)?;
        }
        EncodedValue::Short(short) => write_signed(writer, value_type, *short as i64)?,
        EncodedValue::Char(unit) => write_unsigned(writer, value_type, *unit as u64)?,
        EncodedValue::Int(int) => write_signed(writer, value_type, *int as i64)?,
        EncodedValue::Long(long) => write_signed(writer, value_type, *long)?,
        EncodedValue::Float(bytes) => write_right_extended(writer, value_type, bytes)?,
        EncodedValue::Double(bytes) => write_right_extended(writer, value_type, bytes)?,
        EncodedValue::MethodType(proto) => {
            write_unsigned(writer, value_type, indexer.proto_index(proto)? as u64)?
        }
        EncodedValue::MethodHandle(handle) => write_unsigned(
            writer,
            value_type,
            indexer.method_handle_index(handle)? as u64,
        )?,
        EncodedValue::String(string) => {
            write_unsigned(writer, value_type, indexer.string_index(string)? as u64)?
        }
        EncodedValue::Type(descriptor) => {
            write_unsigned(writer, value_type, indexer.type_index(descriptor)? as u64)?
        }
        EncodedValue::Field(field) | EncodedValue::Enum(field) => {
            write_unsigned(writer, value_type, indexer.field_index(field)? as u64)?
        }
        EncodedValue::Method(method) => {
            write_unsigned(writer, value_type, indexer.method_index(method)? as u64)?
        }
        EncodedValue::Array(values) => {
            writer.write_u8(value_type)?;
            write_encoded_array(writer, values, indexer)?;
        }
        EncodedValue::Annotation(annotation) => {
            writer.write_u8(value_type)?;
            write_encoded_annotation(writer, annotation, indexer)?;
        }
        EncodedValue::Null => writer.write_u8(value_type)?,
        EncodedValue::Boolean(boolean) => writer.write_u8(((*boolean as u8) << 5) | value_type)?,
    }
    Ok(())
}

pub fn write_encoded_array<W: WriteBytesExt>(
    writer: &mut W,
    values: &[EncodedValue],
    indexer: &impl ReferenceIndexer,
) -> Result<(), Error> {
    write_uleb128(writer, values.len() as u32)?;
    for value in values {
        write_encoded_value(writer, value, indexer)?;
    }
    Ok(())
}

pub fn write_encoded_annotation<W: WriteBytesExt>(
    writer: &mut W,
    annotation: &EncodedAnnotation,
    indexer: &impl ReferenceIndexer,
) -> Result<(), Error> {
    write_uleb128(writer, indexer.type_index(&annotation.annotation_type)?)?;
    write_uleb128(writer, annotation.elements().len() as u32)?;
    for element in annotation.elements() {
        write_uleb128(writer, indexer.string_index(&element.name)?)?;
        write_encoded_value(writer, &element.value, indexer)?;
    }
    Ok(())
}

/// Sign-extended value in the fewest bytes that preserve it
fn write_signed<W: WriteBytesExt>(writer: &mut W, value_type: u8, value: i64) -> Result<(), Error> {
    let mut size = 1;
    while size < 8 && (value << (64 - 8 * size)) >> (64 - 8 * size) != value {
        size += 1;
    }
    write_sized(writer, value_type, &value.to_le_bytes()[..size])
}

/// Zero-extended value in the fewest bytes that preserve it (at least one)
fn write_unsigned<W: WriteBytesExt>(
    writer: &mut W,
    value_type: u8,
    value: u64,
) -> Result<(), Error> {
    let size = 8 - (value.leading_zeros() as usize / 8).min(7);
    write_sized(writer, value_type, &value.to_le_bytes()[..size])
}

/// Floating point value with its low-order zero bytes dropped
fn write_right_extended<W: WriteBytesExt>(
    writer: &mut W,
    value_type: u8,
    bytes: &[u8],
) -> Result<(), Error> {
    let skipped = bytes
        .iter()
        .take(bytes.len() - 1)
        .take_while(|byte| **byte == 0)
        .count();
    write_sized(writer, value_type, &bytes[skipped..])
}

fn write_sized<W: WriteBytesExt>(writer: &mut W, value_type: u8, bytes: &[u8]) -> Result<(), Error> {
    writer.write_u8((((bytes.len() - 1) as u8) << 5) | value_type)?;
    writer.write_all(bytes)?;
    Ok(())
}
