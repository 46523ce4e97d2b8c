use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::ntlm::messages::av_pair::AvPair;
use crate::ntlm::messages::computations::*;
use crate::ntlm::messages::{read_ntlm_header, try_read_version, MessageFields, MessageTypes};
use crate::ntlm::{
    AuthenticateMessage, ChallengeMessage, NegotiateFlags, Ntlm, NtlmState, CHALLENGE_SIZE,
    LM_CHALLENGE_RESPONSE_BUFFER_SIZE,
};
use crate::{utils, SecurityStatus};

struct ChallengeMessageFields {
    target_name: MessageFields,
    target_info: MessageFields,
}

struct Challenge {
    negotiate_flags: NegotiateFlags,
    server_challenge: [u8; CHALLENGE_SIZE],
    target_info: Vec<u8>,
    timestamp: u64,
}

fn check_state(state: NtlmState) -> crate::Result<()> {
    if state != NtlmState::Challenge {
        Err(crate::Error::new(
            crate::ErrorKind::OutOfSequence,
            "Read challenge was fired but the state is not a Challenge",
        ))
    } else {
        Ok(())
    }
}

/// Decodes the CHALLENGE message, computes the responses and derives every session key.
///
/// A message that cannot be decoded moves the context to `PacketError`.
pub(crate) fn read_challenge(context: &mut Ntlm, message: &[u8]) -> crate::Result<SecurityStatus> {
    check_state(context.state)?;

    let challenge = match read_message(context, message) {
        Ok(challenge) => challenge,
        Err(err) => {
            warn!(error = %err, "CHALLENGE message is malformed");
            context.state = NtlmState::PacketError;

            return Err(err);
        }
    };

    let identity = context
        .identity
        .as_ref()
        .ok_or_else(|| crate::Error::new(crate::ErrorKind::NoCredentials, "credentials are not set"))?;

    let client_challenge = generate_challenge()?;
    let ntlm_v2_hash = compute_ntlm_v2_hash(identity)?;

    let lm_challenge_response = if context.config.ntlm_v2 {
        // LMv2 is redundant once the target info carries a timestamp
        [0x00; LM_CHALLENGE_RESPONSE_BUFFER_SIZE]
    } else {
        compute_lm_v2_response(&client_challenge, &challenge.server_challenge, &ntlm_v2_hash)?
    };
    let (nt_challenge_response, session_base_key) = compute_ntlm_v2_response(
        &client_challenge,
        &challenge.server_challenge,
        &challenge.target_info,
        &ntlm_v2_hash,
        challenge.timestamp,
    )?;

    let workstation = match (&context.config.workstation, context.config.ntlm_v2) {
        (Some(workstation), true) => utils::string_to_utf16(workstation),
        _ => Vec::new(),
    };

    let key_exchange_key = session_base_key;
    let exported_session_key = generate_random_session_key()?;
    let encrypted_random_session_key = rc4k(&key_exchange_key, &exported_session_key);

    context.authenticate_message = Some(AuthenticateMessage {
        message: Vec::new(),
        mic: None,
        lm_challenge_response: lm_challenge_response.to_vec(),
        nt_challenge_response,
        user_name: identity.user.clone(),
        domain_name: identity.domain.clone(),
        workstation,
        encrypted_random_session_key: Some(encrypted_random_session_key),
    });
    context.challenge_message = Some(ChallengeMessage::new(message.to_vec(), challenge.server_challenge));
    context.flags = challenge.negotiate_flags;
    context.session_key = Some(exported_session_key);
    context.init_cipher_state()?;

    context.state = NtlmState::Authenticate;

    Ok(SecurityStatus::ContinueNeeded)
}

fn read_message(context: &Ntlm, message: &[u8]) -> crate::Result<Challenge> {
    let mut stream = message;

    read_ntlm_header(&mut stream, MessageTypes::Challenge)?;
    let (mut message_fields, negotiate_flags, server_challenge) = read_header(&mut stream)?;
    let _version = try_read_version(negotiate_flags, &mut stream)?;

    message_fields.target_name.read_buffer_from(message)?;
    message_fields.target_info.read_buffer_from(message)?;

    let (target_info, timestamp) = if context.config.ntlm_v2 {
        // the server may omit the target info altogether
        let av_pairs = if message_fields.target_info.buffer.is_empty() {
            Vec::new()
        } else {
            AvPair::buffer_to_av_pairs(&message_fields.target_info.buffer)?
        };
        let timestamp = match get_timestamp(&av_pairs) {
            Some(timestamp) => timestamp,
            None => now_file_time_timestamp()?,
        };
        let target_info = get_authenticate_target_info(
            &av_pairs,
            context.channel_bindings.as_ref(),
            context.target_name.as_deref(),
            context.config.send_single_host_data,
            true,
        )?;

        (target_info, timestamp)
    } else {
        (message_fields.target_info.buffer, now_file_time_timestamp()?)
    };

    Ok(Challenge {
        negotiate_flags,
        server_challenge,
        target_info,
        timestamp,
    })
}

fn read_header(mut buffer: impl io::Read) -> crate::Result<(ChallengeMessageFields, NegotiateFlags, [u8; CHALLENGE_SIZE])> {
    let mut target_name = MessageFields::new();
    let mut target_info = MessageFields::new();

    target_name.read_from(&mut buffer)?;
    let negotiate_flags = NegotiateFlags::from_bits_truncate(buffer.read_u32::<LittleEndian>()?);

    let mut server_challenge = [0x00; CHALLENGE_SIZE];
    buffer.read_exact(&mut server_challenge)?;
    let _reserved = buffer.read_u64::<LittleEndian>()?;

    target_info.read_from(&mut buffer)?;

    Ok((
        ChallengeMessageFields {
            target_name,
            target_info,
        },
        negotiate_flags,
        server_challenge,
    ))
}
