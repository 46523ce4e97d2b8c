use crate::ntlm::messages::computations::*;
use crate::ntlm::{AuthIdentityBuffers, NegotiateFlags, Ntlm, NtlmState, MESSAGE_INTEGRITY_CHECK_SIZE};
use crate::{utils, SecurityStatus};

/// Verifies the client's proof and the MIC, then derives the session keys.
pub(crate) fn complete_authenticate(context: &mut Ntlm) -> crate::Result<SecurityStatus> {
    check_state(context.state)?;

    let negotiate_message = context
        .negotiate_message
        .as_ref()
        .ok_or_else(|| crate::Error::new(crate::ErrorKind::OutOfSequence, "the NEGOTIATE message is missing"))?;
    let challenge_message = context
        .challenge_message
        .as_ref()
        .ok_or_else(|| crate::Error::new(crate::ErrorKind::OutOfSequence, "the CHALLENGE message is missing"))?;
    let authenticate_message = context
        .authenticate_message
        .as_ref()
        .ok_or_else(|| crate::Error::new(crate::ErrorKind::OutOfSequence, "the AUTHENTICATE message is missing"))?;
    let stored_identity = context
        .identity
        .as_ref()
        .ok_or_else(|| crate::Error::new(crate::ErrorKind::NoCredentials, "the server has no credentials to check"))?;

    let user = utils::bytes_to_utf16_string(&authenticate_message.user_name)?;
    let stored_user = utils::bytes_to_utf16_string(&stored_identity.user)?;
    if user.to_uppercase() != stored_user.to_uppercase() {
        warn!(%user, "unknown user");

        return Err(crate::Error::new(
            crate::ErrorKind::LogonDenied,
            "the user is not known to the server",
        ));
    }

    let identity = AuthIdentityBuffers {
        user: authenticate_message.user_name.clone(),
        domain: authenticate_message.domain_name.clone(),
        password: stored_identity.password.clone(),
    };
    let ntlm_v2_hash = compute_ntlm_v2_hash(&identity)?;
    let session_base_key = verify_ntlm_v2_response(
        &authenticate_message.nt_challenge_response,
        &challenge_message.server_challenge,
        &ntlm_v2_hash,
    )?;

    let key_exchange_key = session_base_key;
    let exported_session_key = match authenticate_message.encrypted_random_session_key {
        Some(encrypted_random_session_key)
            if context.flags.contains(NegotiateFlags::NTLM_SSP_NEGOTIATE_KEY_EXCH) =>
        {
            rc4k(&key_exchange_key, &encrypted_random_session_key)
        }
        _ => key_exchange_key,
    };

    if let Some(mic) = authenticate_message.mic.as_ref() {
        let mut message = authenticate_message.message.clone();
        message
            .get_mut(mic.offset..mic.offset + MESSAGE_INTEGRITY_CHECK_SIZE)
            .ok_or_else(|| crate::Error::new(crate::ErrorKind::InvalidToken, "the MIC is out of the message bounds"))?
            .fill(0x00);

        let expected_mic = compute_message_integrity_check(
            &negotiate_message.message,
            &challenge_message.message,
            &message,
            &exported_session_key,
        )?;

        if expected_mic != mic.value {
            warn!("AUTHENTICATE message integrity check failed");

            return Err(crate::Error::new(
                crate::ErrorKind::MessageAltered,
                "message integrity check (MIC) verification failed",
            ));
        }
    }

    context.identity = Some(identity);
    context.session_key = Some(exported_session_key);
    context.init_cipher_state()?;
    context.state = NtlmState::Final;

    debug!("NTLM server authentication is complete");

    Ok(SecurityStatus::Ok)
}

fn check_state(state: NtlmState) -> crate::Result<()> {
    if state != NtlmState::Completion {
        Err(crate::Error::new(
            crate::ErrorKind::OutOfSequence,
            "Complete authenticate was fired but the state is not a Completion",
        ))
    } else {
        Ok(())
    }
}
