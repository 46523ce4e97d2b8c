//! Just enough BER to encode and decode the CredSSP structures: universal sequences, integers and
//! octet strings, context-specific tags, definite lengths up to two bytes.

#[cfg(test)]
mod tests;

use std::io;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Pc {
    Primitive = 0x00,
    Construct = 0x20,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Class {
    Universal = 0x00,
    ContextSpecific = 0x80,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Tag {
    Integer = 0x02,
    OctetString = 0x04,
    Sequence = 0x10,
}

const TAG_MASK: u8 = 0x1F;
const LONG_FORM: u8 = 0x80;

const fn identifier(class: Class, pc: Pc, number: u8) -> u8 {
    class as u8 | pc as u8 | (TAG_MASK & number)
}

pub(crate) fn sizeof_length(length: u16) -> u16 {
    match length {
        0..=0x7F => 1,
        0x80..=0xFF => 2,
        _ => 3,
    }
}

/// Size of a whole element (identifier, length and content) with the given content length.
fn sizeof_element(length: u16) -> u16 {
    1 + sizeof_length(length) + length
}

pub(crate) fn sizeof_sequence(length: u16) -> u16 {
    sizeof_element(length)
}

pub(crate) fn sizeof_contextual_tag(length: u16) -> u16 {
    1 + sizeof_length(length)
}

pub(crate) fn sizeof_octet_string(length: u16) -> u16 {
    sizeof_element(length)
}

/// Size of `[tagnum] OCTET STRING` with the given string length.
pub(crate) fn sizeof_sequence_octet_string(length: u16) -> u16 {
    let octet_string = sizeof_octet_string(length);

    sizeof_contextual_tag(octet_string) + octet_string
}

pub(crate) fn sizeof_integer(value: u32) -> u16 {
    match value {
        0..=0x7F => 3,
        0x80..=0x7FFF => 4,
        0x8000..=0x007F_FFFF => 5,
        0x0080_0000..=0x7FFF_FFFF => 6,
        // a leading zero byte keeps the value positive
        _ => 7,
    }
}

pub(crate) fn write_sequence_tag(mut stream: impl io::Write, length: u16) -> io::Result<usize> {
    stream.write_u8(identifier(Class::Universal, Pc::Construct, Tag::Sequence as u8))?;

    write_length(stream, length).map(|length| length + 1)
}

pub(crate) fn read_sequence_tag(mut stream: impl io::Read) -> io::Result<u16> {
    expect_identifier(
        &mut stream,
        identifier(Class::Universal, Pc::Construct, Tag::Sequence as u8),
        "sequence",
    )?;

    read_length(stream)
}

pub(crate) fn write_contextual_tag(mut stream: impl io::Write, tagnum: u8, length: u16, pc: Pc) -> io::Result<usize> {
    stream.write_u8(identifier(Class::ContextSpecific, pc, tagnum))?;

    write_length(stream, length).map(|length| length + 1)
}

pub(crate) fn read_contextual_tag(mut stream: impl io::Read, tagnum: u8, pc: Pc) -> io::Result<u16> {
    expect_identifier(
        &mut stream,
        identifier(Class::ContextSpecific, pc, tagnum),
        "contextual tag",
    )?;

    read_length(stream)
}

/// Reads the contextual tag if it is the next element, otherwise leaves the stream untouched.
pub(crate) fn read_contextual_tag_or_unwind(
    stream: &mut io::Cursor<&[u8]>,
    tagnum: u8,
    pc: Pc,
) -> io::Result<Option<u16>> {
    let expected = identifier(Class::ContextSpecific, pc, tagnum);

    match peek_u8(stream) {
        Some(found) if found == expected => read_contextual_tag(stream, tagnum, pc).map(Some),
        _ => Ok(None),
    }
}

pub(crate) fn write_integer(mut stream: impl io::Write, value: u32) -> io::Result<usize> {
    stream.write_u8(identifier(Class::Universal, Pc::Primitive, Tag::Integer as u8))?;

    let size = sizeof_integer(value);
    let content_len = size - 2;
    write_length(&mut stream, content_len)?;

    // big endian, minimal number of bytes that keeps the value positive
    let mut bytes = [0x00; 5];
    bytes[1..].copy_from_slice(&value.to_be_bytes());
    stream.write_all(&bytes[bytes.len() - usize::from(content_len)..])?;

    Ok(usize::from(size))
}

/// Reads a two's complement INTEGER of up to 8 bytes.
pub(crate) fn read_integer(mut stream: impl io::Read) -> io::Result<i64> {
    expect_identifier(
        &mut stream,
        identifier(Class::Universal, Pc::Primitive, Tag::Integer as u8),
        "integer",
    )?;
    let length = read_length(&mut stream)?;

    if length == 0 || length > 8 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid integer length: {}", length),
        ));
    }

    let start = 8 - usize::from(length);
    let mut bytes = [0x00; 8];
    stream.read_exact(&mut bytes[start..])?;

    if bytes[start] & 0x80 != 0 {
        bytes[..start].fill(0xFF);
    }

    Ok(i64::from_be_bytes(bytes))
}

/// Writes `[tagnum] OCTET STRING`.
pub(crate) fn write_sequence_octet_string(mut stream: impl io::Write, tagnum: u8, value: &[u8]) -> io::Result<usize> {
    let tag_len = write_contextual_tag(
        &mut stream,
        tagnum,
        sizeof_octet_string(checked_len(value)?),
        Pc::Construct,
    )?;
    let string_len = write_octet_string(&mut stream, value)?;

    Ok(tag_len + string_len)
}

pub(crate) fn write_octet_string(mut stream: impl io::Write, value: &[u8]) -> io::Result<usize> {
    let tag_len = write_octet_string_tag(&mut stream, checked_len(value)?)?;
    stream.write_all(value)?;

    Ok(tag_len + value.len())
}

pub(crate) fn write_octet_string_tag(mut stream: impl io::Write, length: u16) -> io::Result<usize> {
    stream.write_u8(identifier(Class::Universal, Pc::Primitive, Tag::OctetString as u8))?;

    write_length(stream, length).map(|length| length + 1)
}

pub(crate) fn read_octet_string_tag(mut stream: impl io::Read) -> io::Result<u16> {
    expect_identifier(
        &mut stream,
        identifier(Class::Universal, Pc::Primitive, Tag::OctetString as u8),
        "octet string",
    )?;

    read_length(stream)
}

/// Reads a whole octet string, refusing a length that runs past the end of the buffer.
pub(crate) fn read_octet_string(stream: &mut io::Cursor<&[u8]>) -> io::Result<Vec<u8>> {
    let length = read_octet_string_tag(&mut *stream)?;
    ensure_remaining(stream, length)?;

    let mut value = vec![0x00; usize::from(length)];
    io::Read::read_exact(stream, &mut value)?;

    Ok(value)
}

/// Fails if fewer than `length` bytes are left after the current position.
pub(crate) fn ensure_remaining(stream: &io::Cursor<&[u8]>, length: u16) -> io::Result<()> {
    let remaining = (stream.get_ref().len() as u64).saturating_sub(stream.position());

    if u64::from(length) > remaining {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "element length ({}) exceeds the remaining buffer ({})",
                length, remaining
            ),
        ))
    } else {
        Ok(())
    }
}

pub(crate) fn write_length(mut stream: impl io::Write, length: u16) -> io::Result<usize> {
    match sizeof_length(length) {
        1 => stream.write_u8(length as u8)?,
        2 => {
            stream.write_u8(LONG_FORM | 1)?;
            stream.write_u8(length as u8)?;
        }
        _ => {
            stream.write_u8(LONG_FORM | 2)?;
            stream.write_u16::<BigEndian>(length)?;
        }
    }

    Ok(usize::from(sizeof_length(length)))
}

pub(crate) fn read_length(mut stream: impl io::Read) -> io::Result<u16> {
    let byte = stream.read_u8()?;

    if byte & LONG_FORM == 0 {
        return Ok(u16::from(byte));
    }

    match byte & !LONG_FORM {
        1 => stream.read_u8().map(u16::from),
        2 => {
            let length = stream.read_u16::<BigEndian>()?;

            // the whole element (identifier + length + content) must still fit into u16
            if length > u16::MAX - 1 - sizeof_length(length) {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "the length is too big"));
            }

            Ok(length)
        }
        count => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported length of the length: {}", count),
        )),
    }
}

fn expect_identifier(mut stream: impl io::Read, expected: u8, name: &str) -> io::Result<()> {
    let found = stream.read_u8()?;

    if found != expected {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid {} identifier: expected {:#04x}, got {:#04x}", name, expected, found),
        ))
    } else {
        Ok(())
    }
}

fn peek_u8(stream: &io::Cursor<&[u8]>) -> Option<u8> {
    usize::try_from(stream.position())
        .ok()
        .and_then(|position| stream.get_ref().get(position).copied())
}

pub(crate) fn checked_len(value: &[u8]) -> io::Result<u16> {
    u16::try_from(value.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("value is too long to be encoded: {} bytes", value.len()),
        )
    })
}
