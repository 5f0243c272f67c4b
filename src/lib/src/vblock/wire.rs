//! Little-endian field access for trust chain records.
//!
//! Readers operate on a `Cursor` over a borrowed slice so that declared
//! lengths can be checked against what is actually left before anything is
//! allocated.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read};

use crate::error::*;

pub type Reader<'a> = Cursor<&'a [u8]>;

fn map_eof(e: io::Error) -> CodecError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::Truncated
    } else {
        e.into()
    }
}

pub fn remaining(reader: &Reader<'_>) -> usize {
    let len = reader.get_ref().len();
    len.saturating_sub(reader.position() as usize)
}

pub fn position(reader: &Reader<'_>) -> usize {
    reader.position() as usize
}

pub fn get8(reader: &mut Reader<'_>) -> Result<u8, CodecError> {
    reader.read_u8().map_err(map_eof)
}

pub fn get16(reader: &mut Reader<'_>) -> Result<u16, CodecError> {
    reader.read_u16::<LittleEndian>().map_err(map_eof)
}

pub fn get32(reader: &mut Reader<'_>) -> Result<u32, CodecError> {
    reader.read_u32::<LittleEndian>().map_err(map_eof)
}

pub fn get64(reader: &mut Reader<'_>) -> Result<u64, CodecError> {
    reader.read_u64::<LittleEndian>().map_err(map_eof)
}

pub fn get_array<const N: usize>(reader: &mut Reader<'_>) -> Result<[u8; N], CodecError> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes).map_err(map_eof)?;
    Ok(bytes)
}

/// Read `len` bytes, failing before allocation if fewer are left.
pub fn get_bytes(reader: &mut Reader<'_>, len: usize) -> Result<Vec<u8>, CodecError> {
    let available = remaining(reader);
    if len > available {
        return Err(CodecError::OutOfBounds {
            needed: len,
            available,
        });
    }
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).map_err(map_eof)?;
    Ok(bytes)
}

pub fn put8(writer: &mut Vec<u8>, v: u8) -> Result<(), CodecError> {
    writer.write_u8(v)?;
    Ok(())
}

pub fn put16(writer: &mut Vec<u8>, v: u16) -> Result<(), CodecError> {
    writer.write_u16::<LittleEndian>(v)?;
    Ok(())
}

pub fn put32(writer: &mut Vec<u8>, v: u32) -> Result<(), CodecError> {
    writer.write_u32::<LittleEndian>(v)?;
    Ok(())
}

pub fn put64(writer: &mut Vec<u8>, v: u64) -> Result<(), CodecError> {
    writer.write_u64::<LittleEndian>(v)?;
    Ok(())
}

/// Encode a length field, refusing lengths that do not fit in 32 bits.
pub fn put_len(writer: &mut Vec<u8>, len: usize) -> Result<(), CodecError> {
    let len = u32::try_from(len).map_err(|_| CodecError::NonCanonical("length field"))?;
    put32(writer, len)
}
