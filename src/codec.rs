//! Big-endian integer and fixed-point coordinate primitives.
//!
//! Shared by the database writer and reader. Every read fails with
//! [`std::io::ErrorKind::UnexpectedEof`] on short input; callers decide how
//! to report it.

use std::io::{self, Read, Write};

/// Number of fractional bits in the fixed-point coordinate encoding.
pub const FIXED_POINT_FRACTION_BITS: u32 = 20;

const FIXED_POINT_SCALE: f64 = (1u32 << FIXED_POINT_FRACTION_BITS) as f64;

pub fn write_u8<W: Write>(out: &mut W, value: u8) -> io::Result<()> {
    out.write_all(&[value])
}

pub fn write_u16<W: Write>(out: &mut W, value: u16) -> io::Result<()> {
    out.write_all(&value.to_be_bytes())
}

pub fn write_u32<W: Write>(out: &mut W, value: u32) -> io::Result<()> {
    out.write_all(&value.to_be_bytes())
}

pub fn write_u64<W: Write>(out: &mut W, value: u64) -> io::Result<()> {
    out.write_all(&value.to_be_bytes())
}

pub fn read_u8<R: Read>(input: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    input.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn read_u16<R: Read>(input: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    input.read_exact(&mut buf)?;
    Ok(u16::from_be_bytes(buf))
}

pub fn read_u32<R: Read>(input: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

pub fn read_u64<R: Read>(input: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_be_bytes(buf))
}

/// Encode decimal degrees as a signed 12.20 fixed-point value.
///
/// The product is truncated toward zero and then wrapped into 32 bits.
/// Nothing is clamped: values beyond +-2048 degrees wrap, and range checks
/// belong to the caller.
pub fn encode_fixed_point(degrees: f64) -> i32 {
    (degrees * FIXED_POINT_SCALE).trunc() as i64 as i32
}

/// Decode a 12.20 fixed-point value back into decimal degrees.
pub fn decode_fixed_point(raw: i32) -> f64 {
    raw as f64 / FIXED_POINT_SCALE
}

/// Write a signed value in two's complement, as fixed-point coordinates
/// are stored.
pub fn write_i32<W: Write>(out: &mut W, value: i32) -> io::Result<()> {
    out.write_all(&value.to_be_bytes())
}

pub fn read_i32<R: Read>(input: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}
