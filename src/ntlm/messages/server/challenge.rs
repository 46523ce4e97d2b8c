use std::io;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::ntlm::messages::computations::*;
use crate::ntlm::messages::{write_ntlm_header, MessageFields, MessageTypes};
use crate::ntlm::{ChallengeMessage, NegotiateFlags, Ntlm, NtlmState, CHALLENGE_SIZE, NTLM_VERSION_SIZE};
use crate::{utils, SecurityStatus};

const HEADER_SIZE: usize = 48;

struct ChallengeMessageFields {
    target_name: MessageFields,
    target_info: MessageFields,
}

impl ChallengeMessageFields {
    fn new(target_name: Vec<u8>, target_info: Vec<u8>, offset: u32) -> crate::Result<Self> {
        let mut target_name = MessageFields::with_buffer(target_name);
        let mut target_info = MessageFields::with_buffer(target_info);

        target_name.buffer_offset = offset;
        target_info.buffer_offset = target_name.buffer_offset + u32::from(target_name.len()?);

        Ok(Self {
            target_name,
            target_info,
        })
    }

    fn data_len(&self) -> usize {
        self.target_info.buffer_offset as usize + self.target_info.buffer.len()
    }
}

fn check_state(state: NtlmState) -> crate::Result<()> {
    if state != NtlmState::Challenge {
        Err(crate::Error::new(
            crate::ErrorKind::OutOfSequence,
            "Write challenge was fired but the state is not a Challenge",
        ))
    } else {
        Ok(())
    }
}

pub(crate) fn write_challenge(context: &mut Ntlm, mut transport: impl io::Write) -> crate::Result<SecurityStatus> {
    check_state(context.state)?;

    let server_challenge = generate_challenge()?;
    let timestamp = now_file_time_timestamp()?;

    let computer_name = context
        .config
        .workstation
        .as_deref()
        .map(utils::string_to_utf16)
        .unwrap_or_default();
    let domain_name = match context.identity.as_ref() {
        Some(identity) if !identity.domain.is_empty() => identity.domain.clone(),
        _ => computer_name.clone(),
    };
    let target_info = get_challenge_target_info(&computer_name, &domain_name, timestamp)?;

    let negotiate_flags = context.flags
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_INFO
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_TYPE_SERVER;
    let target_name = if negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_REQUEST_TARGET) {
        computer_name
    } else {
        Vec::new()
    };

    let offset = if negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION) {
        HEADER_SIZE + NTLM_VERSION_SIZE
    } else {
        HEADER_SIZE
    };
    let message_fields = ChallengeMessageFields::new(target_name, target_info, offset as u32)?;

    let mut buffer = Vec::with_capacity(message_fields.data_len());
    write_header(
        negotiate_flags,
        context.version(),
        &server_challenge,
        &message_fields,
        &mut buffer,
    )?;
    message_fields.target_name.write_buffer_to(&mut buffer)?;
    message_fields.target_info.write_buffer_to(&mut buffer)?;

    transport.write_all(buffer.as_slice())?;
    transport.flush()?;

    debug!(flags = ?negotiate_flags, len = buffer.len(), "CHALLENGE message is written");

    context.flags = negotiate_flags;
    context.challenge_message = Some(ChallengeMessage::new(buffer, server_challenge));
    context.state = NtlmState::Authenticate;

    Ok(SecurityStatus::ContinueNeeded)
}

fn write_header(
    negotiate_flags: NegotiateFlags,
    version: &[u8],
    server_challenge: &[u8; CHALLENGE_SIZE],
    message_fields: &ChallengeMessageFields,
    mut buffer: impl io::Write,
) -> crate::Result<()> {
    write_ntlm_header(&mut buffer, MessageTypes::Challenge)?; // signature and message type 12 bytes
    message_fields.target_name.write_to(&mut buffer)?; // target name 8 bytes
    buffer.write_u32::<LittleEndian>(negotiate_flags.bits())?; // negotiate flags 4 bytes
    buffer.write_all(server_challenge)?; // server challenge 8 bytes
    buffer.write_u64::<LittleEndian>(0)?; // reserved 8 bytes
    message_fields.target_info.write_to(&mut buffer)?; // target info 8 bytes

    if negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION) {
        buffer.write_all(version)?;
    }

    Ok(())
}
