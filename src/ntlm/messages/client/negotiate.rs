use std::io;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::ntlm::messages::{write_ntlm_header, MessageFields, MessageTypes};
use crate::ntlm::{NegotiateFlags, NegotiateMessage, Ntlm, NtlmState, NTLM_VERSION_SIZE};
use crate::SecurityStatus;

const HEADER_SIZE: usize = 32;

fn check_state(state: NtlmState) -> crate::Result<()> {
    if state != NtlmState::Negotiate {
        Err(crate::Error::new(
            crate::ErrorKind::OutOfSequence,
            "Write negotiate was fired but the state is not a Negotiate",
        ))
    } else {
        Ok(())
    }
}

pub(crate) fn write_negotiate(context: &mut Ntlm, mut transport: impl io::Write) -> crate::Result<SecurityStatus> {
    check_state(context.state)?;

    let negotiate_flags = get_flags(context);
    // neither the domain nor the workstation is supplied at this point
    let domain_name = MessageFields::new();
    let workstation = MessageFields::new();

    let mut buffer = Vec::with_capacity(HEADER_SIZE + NTLM_VERSION_SIZE);

    write_ntlm_header(&mut buffer, MessageTypes::Negotiate)?; // signature and message type 12 bytes
    buffer.write_u32::<LittleEndian>(negotiate_flags.bits())?; // negotiate flags 4 bytes
    domain_name.write_to(&mut buffer)?; // domain name 8 bytes
    workstation.write_to(&mut buffer)?; // workstation 8 bytes
    if negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION) {
        buffer.extend_from_slice(context.version()); // version 8 bytes
    }

    transport.write_all(buffer.as_slice())?;
    transport.flush()?;

    debug!(flags = ?negotiate_flags, len = buffer.len(), "NEGOTIATE message is written");

    context.flags = negotiate_flags;
    context.negotiate_message = Some(NegotiateMessage::new(buffer));
    context.state = NtlmState::Challenge;

    Ok(SecurityStatus::ContinueNeeded)
}

fn get_flags(context: &Ntlm) -> NegotiateFlags {
    let mut flags = NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH
        | NegotiateFlags::NTLM_SSP_NEGOTIATE128
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_ALWAYS_SIGN
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_SEAL
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_SIGN
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_REQUEST_TARGET
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE;

    if context.config.ntlm_v2 {
        flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE56
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_LM_KEY
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_OEM;
    }

    flags
}
