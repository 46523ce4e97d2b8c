use std::io;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::ntlm::messages::computations::compute_message_integrity_check;
use crate::ntlm::messages::{write_ntlm_header, MessageFields, MessageTypes};
use crate::ntlm::{
    AuthenticateMessage, Mic, NegotiateFlags, Ntlm, NtlmState, MESSAGE_INTEGRITY_CHECK_SIZE, NTLM_VERSION_SIZE,
};
use crate::SecurityStatus;

const HEADER_SIZE: usize = 64;
const MIC_OFFSET: usize = HEADER_SIZE + NTLM_VERSION_SIZE;

struct AuthenticateMessageFields {
    domain_name: MessageFields,
    user_name: MessageFields,
    workstation: MessageFields,
    lm_challenge_response: MessageFields,
    nt_challenge_response: MessageFields,
    encrypted_random_session_key: MessageFields,
}

impl AuthenticateMessageFields {
    fn new(authenticate_message: &AuthenticateMessage, offset: u32) -> crate::Result<Self> {
        let mut domain_name = MessageFields::with_buffer(authenticate_message.domain_name.clone());
        let mut user_name = MessageFields::with_buffer(authenticate_message.user_name.clone());
        let mut workstation = MessageFields::with_buffer(authenticate_message.workstation.clone());
        let mut lm_challenge_response = MessageFields::with_buffer(authenticate_message.lm_challenge_response.clone());
        let mut nt_challenge_response = MessageFields::with_buffer(authenticate_message.nt_challenge_response.clone());
        let mut encrypted_random_session_key = MessageFields::with_buffer(
            authenticate_message
                .encrypted_random_session_key
                .map(|key| key.to_vec())
                .unwrap_or_default(),
        );

        domain_name.buffer_offset = offset;
        user_name.buffer_offset = domain_name.buffer_offset + u32::from(domain_name.len()?);
        workstation.buffer_offset = user_name.buffer_offset + u32::from(user_name.len()?);
        lm_challenge_response.buffer_offset = workstation.buffer_offset + u32::from(workstation.len()?);
        nt_challenge_response.buffer_offset =
            lm_challenge_response.buffer_offset + u32::from(lm_challenge_response.len()?);
        encrypted_random_session_key.buffer_offset =
            nt_challenge_response.buffer_offset + u32::from(nt_challenge_response.len()?);

        Ok(Self {
            domain_name,
            user_name,
            workstation,
            lm_challenge_response,
            nt_challenge_response,
            encrypted_random_session_key,
        })
    }

    fn data_len(&self) -> usize {
        self.encrypted_random_session_key.buffer_offset as usize + self.encrypted_random_session_key.buffer.len()
    }
}

fn check_state(state: NtlmState) -> crate::Result<()> {
    if state != NtlmState::Authenticate {
        Err(crate::Error::new(
            crate::ErrorKind::OutOfSequence,
            "Write authenticate was fired but the state is not an Authenticate",
        ))
    } else {
        Ok(())
    }
}

/// Writes the AUTHENTICATE message. In NTLMv2 mode the MIC is patched in once the whole message is known.
pub(crate) fn write_authenticate(context: &mut Ntlm, mut transport: impl io::Write) -> crate::Result<SecurityStatus> {
    check_state(context.state)?;

    let ntlm_v2 = context.config.ntlm_v2;
    let authenticate_message = context.authenticate_message.as_ref().ok_or_else(|| {
        crate::Error::new(
            crate::ErrorKind::OutOfSequence,
            "the challenge responses are not computed",
        )
    })?;
    let negotiate_flags = get_flags(ntlm_v2, !authenticate_message.workstation.is_empty());
    let offset = if ntlm_v2 {
        MIC_OFFSET + MESSAGE_INTEGRITY_CHECK_SIZE
    } else {
        HEADER_SIZE
    };
    let message_fields = AuthenticateMessageFields::new(authenticate_message, offset as u32)?;

    let mut buffer = Vec::with_capacity(message_fields.data_len());
    write_header(negotiate_flags, context.version(), ntlm_v2, &message_fields, &mut buffer)?;
    write_payload(&message_fields, &mut buffer)?;

    let mic = if ntlm_v2 {
        let exported_session_key = context
            .session_key
            .ok_or_else(|| crate::Error::new(crate::ErrorKind::OutOfSequence, "the session key is not established"))?;
        let negotiate_message = context
            .negotiate_message
            .as_ref()
            .ok_or_else(|| crate::Error::new(crate::ErrorKind::OutOfSequence, "the NEGOTIATE message is missing"))?;
        let challenge_message = context
            .challenge_message
            .as_ref()
            .ok_or_else(|| crate::Error::new(crate::ErrorKind::OutOfSequence, "the CHALLENGE message is missing"))?;

        let mic_value = compute_message_integrity_check(
            &negotiate_message.message,
            &challenge_message.message,
            &buffer,
            &exported_session_key,
        )?;
        buffer[MIC_OFFSET..MIC_OFFSET + MESSAGE_INTEGRITY_CHECK_SIZE].clone_from_slice(&mic_value);

        Some(Mic::new(mic_value, MIC_OFFSET))
    } else {
        None
    };

    transport.write_all(buffer.as_slice())?;
    transport.flush()?;

    debug!(flags = ?negotiate_flags, len = buffer.len(), "AUTHENTICATE message is written");

    if let Some(authenticate_message) = context.authenticate_message.as_mut() {
        authenticate_message.message = buffer;
        authenticate_message.mic = mic;
    }
    context.state = NtlmState::Final;

    Ok(SecurityStatus::CompleteNeeded)
}

fn get_flags(ntlm_v2: bool, workstation_supplied: bool) -> NegotiateFlags {
    let mut flags = NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH
        | NegotiateFlags::NTLM_SSP_NEGOTIATE128
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_ALWAYS_SIGN
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_NTLM
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_SEAL
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_SIGN
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_REQUEST_TARGET
        | NegotiateFlags::NTLM_SSP_NEGOTIATE_UNICODE;

    if ntlm_v2 {
        flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE56
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION
            | NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_INFO;
    }

    if workstation_supplied {
        flags |= NegotiateFlags::NTLM_SSP_NEGOTIATE_WORKSTATION_SUPPLIED;
    }

    flags
}

fn write_header(
    negotiate_flags: NegotiateFlags,
    version: &[u8],
    with_mic: bool,
    message_fields: &AuthenticateMessageFields,
    mut buffer: impl io::Write,
) -> crate::Result<()> {
    write_ntlm_header(&mut buffer, MessageTypes::Authenticate)?;
    message_fields.lm_challenge_response.write_to(&mut buffer)?; // LmChallengeResponseFields (8 bytes)
    message_fields.nt_challenge_response.write_to(&mut buffer)?; // NtChallengeResponseFields (8 bytes)
    message_fields.domain_name.write_to(&mut buffer)?; // DomainNameFields (8 bytes)
    message_fields.user_name.write_to(&mut buffer)?; // UserNameFields (8 bytes)
    message_fields.workstation.write_to(&mut buffer)?; // WorkstationFields (8 bytes)
    message_fields.encrypted_random_session_key.write_to(&mut buffer)?; // EncryptedRandomSessionKeyFields (8 bytes)
    buffer.write_u32::<LittleEndian>(negotiate_flags.bits())?; // NegotiateFlags (4 bytes)

    if negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_VERSION) {
        buffer.write_all(version)?;
    }
    if with_mic {
        // zeroed until all three messages are known
        buffer.write_all(&[0x00; MESSAGE_INTEGRITY_CHECK_SIZE])?;
    }

    Ok(())
}

fn write_payload(message_fields: &AuthenticateMessageFields, mut buffer: impl io::Write) -> io::Result<()> {
    message_fields.domain_name.write_buffer_to(&mut buffer)?;
    message_fields.user_name.write_buffer_to(&mut buffer)?;
    message_fields.workstation.write_buffer_to(&mut buffer)?;
    message_fields.lm_challenge_response.write_buffer_to(&mut buffer)?;
    message_fields.nt_challenge_response.write_buffer_to(&mut buffer)?;
    message_fields.encrypted_random_session_key.write_buffer_to(&mut buffer)?;

    Ok(())
}
