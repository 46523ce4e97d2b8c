use std::io;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::ntlm::messages::{read_ntlm_header, try_read_version, MessageFields, MessageTypes};
use crate::ntlm::{NegotiateFlags, NegotiateMessage, Ntlm, NtlmState};
use crate::SecurityStatus;

pub(crate) fn read_negotiate(context: &mut Ntlm, message: &[u8]) -> crate::Result<SecurityStatus> {
    check_state(context.state)?;

    context.flags = match read_message(message) {
        Ok(flags) => flags,
        Err(err) => {
            warn!(error = %err, "NEGOTIATE message is malformed");
            context.state = NtlmState::PacketError;

            return Err(err);
        }
    };
    context.negotiate_message = Some(NegotiateMessage::new(message.to_vec()));

    context.state = NtlmState::Challenge;

    Ok(SecurityStatus::ContinueNeeded)
}

fn read_message(mut stream: &[u8]) -> crate::Result<NegotiateFlags> {
    read_ntlm_header(&mut stream, MessageTypes::Negotiate)?;
    let negotiate_flags = read_header(&mut stream)?;
    let _version = try_read_version(negotiate_flags, &mut stream)?;

    Ok(negotiate_flags)
}

fn check_state(state: NtlmState) -> crate::Result<()> {
    if state != NtlmState::Negotiate {
        Err(crate::Error::new(
            crate::ErrorKind::OutOfSequence,
            "Read negotiate was fired but the state is not a Negotiate",
        ))
    } else {
        Ok(())
    }
}

fn read_header(mut buffer: impl io::Read) -> crate::Result<NegotiateFlags> {
    let mut domain_name = MessageFields::new();
    let mut workstation = MessageFields::new();

    let negotiate_flags = NegotiateFlags::from_bits_truncate(buffer.read_u32::<LittleEndian>()?);

    if !negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_REQUEST_TARGET)
        || !negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM)
        || !negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE)
    {
        return Err(crate::Error::new(
            crate::ErrorKind::InvalidToken,
            "Negotiate flags do not contain the necessary flags",
        ));
    }

    domain_name.read_from(&mut buffer)?;
    workstation.read_from(&mut buffer)?;

    Ok(negotiate_flags)
}
