// Primitive encodings shared by the container footer and the dataset schema
// Length-prefixed big-endian integers, fixed-width floats, null-terminated names

use std::io::{self, Read, Write};

/// Write `value` as `[n: u8][n bytes big-endian]`, with zero written as a lone `0`.
/// Returns the number of bytes written.
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<usize> {
    let n = (8 - value.leading_zeros() / 8) as usize;
    let bytes = value.to_be_bytes();
    writer.write_all(&[n as u8])?;
    writer.write_all(&bytes[8 - n..])?;
    Ok(n + 1)
}

/// Read a value written by [`write_varint`]. Returns `(value, bytes_read)`.
pub fn read_varint<R: Read>(reader: &mut R) -> io::Result<(u64, usize)> {
    let mut len = [0u8; 1];
    reader.read_exact(&mut len)?;
    let n = len[0] as usize;
    if n > 8 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("varint length prefix {n} exceeds 8 bytes"),
        ));
    }

    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes[8 - n..])?;
    Ok((u64::from_be_bytes(bytes), n + 1))
}

/// Zigzag-map a signed value so small magnitudes stay short under [`write_varint`].
pub fn write_signed<W: Write>(writer: &mut W, value: i64) -> io::Result<usize> {
    write_varint(writer, ((value << 1) ^ (value >> 63)) as u64)
}

pub fn read_signed<R: Read>(reader: &mut R) -> io::Result<i64> {
    let (raw, _) = read_varint(reader)?;
    Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
}

/// Fixed 8-byte little-endian unsigned integer (container footer size)
pub fn write_fixed_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<usize> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(8)
}

pub fn read_fixed_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

/// Floats travel as their IEEE bit pattern so NaN payloads survive a round trip.
pub fn write_f64<W: Write>(writer: &mut W, value: f64) -> io::Result<usize> {
    write_fixed_u64(writer, value.to_bits())
}

pub fn read_f64<R: Read>(reader: &mut R) -> io::Result<f64> {
    read_fixed_u64(reader).map(f64::from_bits)
}

/// Null-terminated UTF-8 string. Names must not contain NUL.
pub fn write_cstr<W: Write>(writer: &mut W, value: &str) -> io::Result<usize> {
    if value.as_bytes().contains(&0) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("name {value:?} contains a NUL byte"),
        ));
    }
    writer.write_all(value.as_bytes())?;
    writer.write_all(&[0])?;
    Ok(value.len() + 1)
}

pub fn read_cstr<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut buf = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Length-prefixed byte string (attribute text may legitimately contain NUL).
pub fn write_bytes<W: Write>(writer: &mut W, value: &[u8]) -> io::Result<usize> {
    let n = write_varint(writer, value.len() as u64)?;
    writer.write_all(value)?;
    Ok(n + value.len())
}

pub fn read_bytes<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let (len, _) = read_varint(reader)?;
    // Grow with the bytes actually present; `len` is untrusted
    let mut buf = Vec::new();
    reader.take(len).read_to_end(&mut buf)?;
    if buf.len() as u64 != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("byte string of {len} bytes truncated after {}", buf.len()),
        ));
    }
    Ok(buf)
}
