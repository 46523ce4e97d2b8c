//! NTLM message codec.
//!
//! Every variable-length field of a message is described by an 8-byte descriptor
//! `{len: u16, max_len: u16, offset: u32}` whose offset is relative to the start of the message.

pub(crate) mod av_pair;
pub(crate) mod client;
pub(crate) mod computations;
pub(crate) mod server;

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::ntlm::{NegotiateFlags, NTLM_VERSION_SIZE};

pub(crate) const NTLM_SIGNATURE: &[u8; NTLM_SIGNATURE_SIZE] = b"NTLMSSP\0";
pub(crate) const NTLM_SIGNATURE_SIZE: usize = 8;

pub(crate) const CLIENT_SIGN_MAGIC: &[u8] = b"session key to client-to-server signing key magic constant\0";
pub(crate) const SERVER_SIGN_MAGIC: &[u8] = b"session key to server-to-client signing key magic constant\0";
pub(crate) const CLIENT_SEAL_MAGIC: &[u8] = b"session key to client-to-server sealing key magic constant\0";
pub(crate) const SERVER_SEAL_MAGIC: &[u8] = b"session key to server-to-client sealing key magic constant\0";

#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub(crate) enum MessageTypes {
    Negotiate = 1,
    Challenge = 2,
    Authenticate = 3,
}

/// A field descriptor together with the bytes it points to.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub(crate) struct MessageFields {
    pub(crate) buffer: Vec<u8>,
    pub(crate) buffer_offset: u32,
}

impl MessageFields {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_buffer(buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            buffer_offset: 0,
        }
    }

    pub(crate) fn len(&self) -> crate::Result<u16> {
        u16::try_from(self.buffer.len()).map_err(|_| {
            crate::Error::new(
                crate::ErrorKind::InvalidParameter,
                format!("message field is too long: {} bytes", self.buffer.len()),
            )
        })
    }

    pub(crate) fn write_to(&self, mut buffer: impl Write) -> crate::Result<()> {
        let len = self.len()?;

        buffer.write_u16::<LittleEndian>(len)?; // Len
        buffer.write_u16::<LittleEndian>(len)?; // MaxLen
        buffer.write_u32::<LittleEndian>(self.buffer_offset)?; // BufferOffset

        Ok(())
    }

    pub(crate) fn write_buffer_to(&self, mut buffer: impl Write) -> io::Result<()> {
        buffer.write_all(&self.buffer)
    }

    /// Reads the descriptor and reserves the buffer; the bytes are filled by `read_buffer_from`.
    pub(crate) fn read_from(&mut self, mut buffer: impl Read) -> io::Result<()> {
        let len = buffer.read_u16::<LittleEndian>()?;
        let _max_len = buffer.read_u16::<LittleEndian>()?;
        self.buffer_offset = buffer.read_u32::<LittleEndian>()?;
        self.buffer.resize(usize::from(len), 0x00);

        Ok(())
    }

    /// Copies the described bytes out of the whole message.
    ///
    /// The `offset + len` range is validated against the message before anything is copied.
    pub(crate) fn read_buffer_from(&mut self, message: &[u8]) -> crate::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let start = usize::try_from(self.buffer_offset).map_err(|_| out_of_bounds(self, message.len()))?;
        let end = start
            .checked_add(self.buffer.len())
            .ok_or_else(|| out_of_bounds(self, message.len()))?;
        let data = message.get(start..end).ok_or_else(|| out_of_bounds(self, message.len()))?;

        self.buffer.clone_from_slice(data);

        Ok(())
    }
}

fn out_of_bounds(field: &MessageFields, message_len: usize) -> crate::Error {
    crate::Error::new(
        crate::ErrorKind::InvalidToken,
        format!(
            "message field (offset = {}, len = {}) is out of the message bounds ({} bytes)",
            field.buffer_offset,
            field.buffer.len(),
            message_len
        ),
    )
}

pub(crate) fn write_ntlm_header(mut buffer: impl Write, message_type: MessageTypes) -> io::Result<()> {
    buffer.write_all(NTLM_SIGNATURE)?;
    buffer.write_u32::<LittleEndian>(message_type as u32)?;

    Ok(())
}

pub(crate) fn read_ntlm_header(mut stream: impl Read, expected_message_type: MessageTypes) -> crate::Result<()> {
    let mut signature = [0x00; NTLM_SIGNATURE_SIZE];
    stream.read_exact(signature.as_mut())?;
    let message_type = stream.read_u32::<LittleEndian>()?;

    if signature != *NTLM_SIGNATURE {
        return Err(crate::Error::new(
            crate::ErrorKind::InvalidToken,
            format!("read NTLM signature is invalid: {:?}", signature),
        ));
    }

    match MessageTypes::from_u32(message_type) {
        Some(message_type) if message_type == expected_message_type => Ok(()),
        _ => Err(crate::Error::new(
            crate::ErrorKind::InvalidToken,
            format!(
                "message type is invalid: {}, expected {:?}",
                message_type, expected_message_type
            ),
        )),
    }
}

/// Reads the version block when the flags announce it.
pub(crate) fn try_read_version(
    flags: NegotiateFlags,
    mut stream: impl Read,
) -> io::Result<Option<[u8; NTLM_VERSION_SIZE]>> {
    if flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION) {
        let mut version = [0x00; NTLM_VERSION_SIZE];
        stream.read_exact(version.as_mut())?;

        Ok(Some(version))
    } else {
        Ok(None)
    }
}
