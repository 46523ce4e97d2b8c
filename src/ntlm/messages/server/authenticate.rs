use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::channel_bindings::ChannelBindings;
use crate::crypto::{compute_md5_channel_bindings_hash, HASH_SIZE};
use crate::ntlm::messages::av_pair::{AvPair, MsvAvFlags};
use crate::ntlm::messages::computations::*;
use crate::ntlm::messages::{read_ntlm_header, try_read_version, MessageFields, MessageTypes};
use crate::ntlm::{
    AuthenticateMessage, Mic, NegotiateFlags, Ntlm, NtlmState, ENCRYPTED_RANDOM_SESSION_KEY_SIZE,
    MESSAGE_INTEGRITY_CHECK_SIZE,
};
use crate::SecurityStatus;

struct AuthenticateMessageFields {
    workstation: MessageFields,
    domain_name: MessageFields,
    encrypted_random_session_key: MessageFields,
    user_name: MessageFields,
    lm_challenge_response: MessageFields,
    nt_challenge_response: MessageFields,
}

pub(crate) fn read_authenticate(context: &mut Ntlm, message: &[u8]) -> crate::Result<SecurityStatus> {
    check_state(context.state)?;

    let result = read_message(message).and_then(|(message_fields, mic, flags)| {
        let authenticate_message =
            process_message_fields(message_fields, mic, message, context.channel_bindings.as_ref())?;

        Ok((authenticate_message, flags))
    });

    match result {
        Ok((authenticate_message, flags)) => {
            context.flags = flags;
            context.authenticate_message = Some(authenticate_message);
        }
        Err(err) if err.error_type == crate::ErrorKind::InvalidToken => {
            warn!(error = %err, "AUTHENTICATE message is malformed");
            context.state = NtlmState::PacketError;

            return Err(err);
        }
        Err(err) => return Err(err),
    }

    context.state = NtlmState::Completion;

    Ok(SecurityStatus::CompleteNeeded)
}

fn check_state(state: NtlmState) -> crate::Result<()> {
    if state != NtlmState::Authenticate {
        Err(crate::Error::new(
            crate::ErrorKind::OutOfSequence,
            "Read authenticate was fired but the state is not an Authenticate",
        ))
    } else {
        Ok(())
    }
}

fn read_message(message: &[u8]) -> crate::Result<(AuthenticateMessageFields, Option<Mic>, NegotiateFlags)> {
    let mut stream = message;

    read_ntlm_header(&mut stream, MessageTypes::Authenticate)?;
    let (mut message_fields, flags) = read_header(&mut stream)?;
    let _version = try_read_version(flags, &mut stream)?;

    let mic = if flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_TARGET_INFO) {
        let mic_offset = message.len() - stream.len();
        let mut mic_value = [0x00; MESSAGE_INTEGRITY_CHECK_SIZE];
        stream.read_exact(&mut mic_value)?;

        Some(Mic::new(mic_value, mic_offset))
    } else {
        None
    };

    message_fields.domain_name.read_buffer_from(message)?;
    message_fields.user_name.read_buffer_from(message)?;
    message_fields.workstation.read_buffer_from(message)?;
    message_fields.lm_challenge_response.read_buffer_from(message)?;
    message_fields.nt_challenge_response.read_buffer_from(message)?;
    message_fields.encrypted_random_session_key.read_buffer_from(message)?;

    Ok((message_fields, mic, flags))
}

fn read_header(mut buffer: impl io::Read) -> crate::Result<(AuthenticateMessageFields, NegotiateFlags)> {
    let mut lm_challenge_response = MessageFields::new();
    let mut nt_challenge_response = MessageFields::new();
    let mut domain_name = MessageFields::new();
    let mut user_name = MessageFields::new();
    let mut workstation = MessageFields::new();
    let mut encrypted_random_session_key = MessageFields::new();

    lm_challenge_response.read_from(&mut buffer)?;
    nt_challenge_response.read_from(&mut buffer)?;
    domain_name.read_from(&mut buffer)?;
    user_name.read_from(&mut buffer)?;
    workstation.read_from(&mut buffer)?;
    encrypted_random_session_key.read_from(&mut buffer)?;
    let negotiate_flags = NegotiateFlags::from_bits_truncate(buffer.read_u32::<LittleEndian>()?);

    let negotiate_key_exchange = negotiate_flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH);
    let key_len = encrypted_random_session_key.buffer.len();
    if negotiate_key_exchange && key_len != ENCRYPTED_RANDOM_SESSION_KEY_SIZE || !negotiate_key_exchange && key_len != 0 {
        return Err(crate::Error::new(
            crate::ErrorKind::InvalidToken,
            format!(
                "encrypted random session key has a wrong length ({} bytes) for the key exchange flag ({})",
                key_len, negotiate_key_exchange
            ),
        ));
    }

    let message_fields = AuthenticateMessageFields {
        workstation,
        domain_name,
        encrypted_random_session_key,
        user_name,
        lm_challenge_response,
        nt_challenge_response,
    };

    Ok((message_fields, negotiate_flags))
}

fn process_message_fields(
    message_fields: AuthenticateMessageFields,
    mic: Option<Mic>,
    authenticate_message: &[u8],
    channel_bindings: Option<&ChannelBindings>,
) -> crate::Result<AuthenticateMessage> {
    if message_fields.nt_challenge_response.buffer.is_empty() {
        return Err(crate::Error::new(
            crate::ErrorKind::InvalidToken,
            "NtChallengeResponse cannot be empty",
        ));
    }

    let response = read_ntlm_v2_response(&message_fields.nt_challenge_response.buffer)?;
    let av_pairs = AvPair::buffer_to_av_pairs(&response.target_info)?;

    // the MIC region is only meaningful when the client announced it
    let mic = mic.filter(|_| get_av_flags(&av_pairs).contains(MsvAvFlags::MESSAGE_INTEGRITY_CHECK));

    // an all-zero hash means the client has no channel bindings
    let client_bindings_hash = av_pairs
        .iter()
        .find_map(|av_pair| match av_pair {
            AvPair::ChannelBindings(hash) => Some(*hash),
            _ => None,
        })
        .filter(|hash| *hash != [0x00; HASH_SIZE]);
    if let (Some(hash), Some(channel_bindings)) = (client_bindings_hash, channel_bindings) {
        if compute_md5_channel_bindings_hash(channel_bindings)? != hash {
            return Err(crate::Error::new(
                crate::ErrorKind::BadBindings,
                "channel bindings hash mismatch",
            ));
        }
    }

    let encrypted_random_session_key = match message_fields.encrypted_random_session_key.buffer.len() {
        0 => None,
        _ => {
            let mut encrypted_random_session_key = [0x00; ENCRYPTED_RANDOM_SESSION_KEY_SIZE];
            encrypted_random_session_key.clone_from_slice(&message_fields.encrypted_random_session_key.buffer);

            Some(encrypted_random_session_key)
        }
    };

    Ok(AuthenticateMessage {
        message: authenticate_message.to_vec(),
        mic,
        lm_challenge_response: message_fields.lm_challenge_response.buffer,
        nt_challenge_response: message_fields.nt_challenge_response.buffer,
        user_name: message_fields.user_name.buffer,
        domain_name: message_fields.domain_name.buffer,
        workstation: message_fields.workstation.buffer,
        encrypted_random_session_key,
    })
}
