//! NTLMv2 key schedule. Every function here is pure apart from the random generators.


use std::io::{self, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use time::OffsetDateTime;

use crate::channel_bindings::ChannelBindings;
use crate::crypto::{compute_hmac_md5, compute_md4, compute_md5, compute_md5_channel_bindings_hash, Rc4, HASH_SIZE};
use crate::ntlm::messages::av_pair::{AvPair, MsvAvFlags, AV_PAIR_FLAGS};
use crate::ntlm::{
    AuthIdentityBuffers, CHALLENGE_SIZE, LM_CHALLENGE_RESPONSE_BUFFER_SIZE, MESSAGE_INTEGRITY_CHECK_SIZE,
    SESSION_KEY_SIZE,
};
use crate::utils;

const NT_V2_RESPONSE_BASE_SIZE: usize = 28;
const NT_V2_RESPONSE_TYPE: u8 = 1;

pub(crate) const SINGLE_HOST_DATA_SIZE: usize = 48;
const SECURITY_MANDATORY_MEDIUM_RID: u32 = 0x2000;

/// Number of 100-nanosecond intervals between 1601-01-01 and 1970-01-01.
const FILE_TIME_UNIX_EPOCH: i128 = 116_444_736_000_000_000;

/// Parts of an `NTLMv2_RESPONSE` the responder needs to verify it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct NtlmV2Response {
    pub(crate) nt_proof: [u8; HASH_SIZE],
    pub(crate) timestamp: u64,
    pub(crate) client_challenge: [u8; CHALLENGE_SIZE],
    /// The AV pair list, including the trailing padding the client appended.
    pub(crate) target_info: Vec<u8>,
}

pub(crate) fn convert_to_file_time(date: OffsetDateTime) -> crate::Result<u64> {
    let file_time = date.unix_timestamp_nanos() / 100 + FILE_TIME_UNIX_EPOCH;

    u64::try_from(file_time).map_err(|_| {
        crate::Error::new(
            crate::ErrorKind::InternalError,
            format!("{} cannot be represented as a FILETIME", date),
        )
    })
}

pub(crate) fn now_file_time_timestamp() -> crate::Result<u64> {
    convert_to_file_time(OffsetDateTime::now_utc())
}

/// Target info of the CHALLENGE message: NetBIOS and DNS names followed by the server timestamp.
pub(crate) fn get_challenge_target_info(computer_name: &[u8], domain_name: &[u8], timestamp: u64) -> crate::Result<Vec<u8>> {
    let av_pairs = [
        AvPair::NbDomainName(domain_name.to_vec()),
        AvPair::NbComputerName(computer_name.to_vec()),
        AvPair::DnsDomainName(domain_name.to_vec()),
        AvPair::DnsComputerName(computer_name.to_vec()),
        AvPair::Timestamp(timestamp),
    ];

    AvPair::list_to_buffer(&av_pairs)
}

/// Target info the client puts into its NTLMv2 response: the server pairs, `MsvAvFlags` announcing the MIC,
/// `Single_Host_Data`, the channel bindings hash (all zero when there are no bindings) and the SPN.
pub(crate) fn get_authenticate_target_info(
    server_av_pairs: &[AvPair],
    channel_bindings: Option<&ChannelBindings>,
    target_name: Option<&[u8]>,
    send_single_host_data: bool,
    ntlm_v2: bool,
) -> crate::Result<Vec<u8>> {
    let mut av_pairs = server_av_pairs
        .iter()
        .filter(|av_pair| !matches!(av_pair, AvPair::EOL | AvPair::Flags(_)))
        .cloned()
        .collect::<Vec<_>>();

    if ntlm_v2 {
        av_pairs.push(AvPair::Flags(MsvAvFlags::MESSAGE_INTEGRITY_CHECK.bits()));
    }

    if send_single_host_data {
        av_pairs.push(AvPair::Restrictions(single_host_data().to_vec()));
    }

    let channel_bindings_hash = match channel_bindings {
        Some(channel_bindings) => compute_md5_channel_bindings_hash(channel_bindings)?,
        // an all-zero hash tells the server that there are no channel bindings
        None => [0x00; HASH_SIZE],
    };
    av_pairs.push(AvPair::ChannelBindings(channel_bindings_hash));

    if let Some(target_name) = target_name.filter(|target_name| !target_name.is_empty()) {
        av_pairs.push(AvPair::TargetName(target_name.to_vec()));
    }

    let mut target_info = AvPair::list_to_buffer(&av_pairs)?;

    if ntlm_v2 {
        // AvEOL is followed by 8 zero bytes, as Windows clients send
        target_info.write_u64::<LittleEndian>(0x00)?;
    }

    Ok(target_info)
}

// The Single_Host_Data structure allows a client to send machine-specific information
// to services on the same machine. Any fields after the MachineID field MUST be ignored on receipt.
pub(crate) fn single_host_data() -> [u8; SINGLE_HOST_DATA_SIZE] {
    let mut data = [0x00; SINGLE_HOST_DATA_SIZE];

    data[0..4].copy_from_slice(&(SINGLE_HOST_DATA_SIZE as u32).to_le_bytes()); // Size
    // Z4 stays zero
    data[8..12].copy_from_slice(&1u32.to_le_bytes()); // DataPresent
    data[12..16].copy_from_slice(&SECURITY_MANDATORY_MEDIUM_RID.to_le_bytes()); // CustomData
    data[16..].copy_from_slice(&[0xaa; 32]); // MachineID

    data
}

pub(crate) fn get_timestamp(av_pairs: &[AvPair]) -> Option<u64> {
    av_pairs.iter().find_map(|av_pair| match av_pair {
        AvPair::Timestamp(timestamp) => Some(*timestamp),
        _ => None,
    })
}

pub(crate) fn get_av_flags(av_pairs: &[AvPair]) -> MsvAvFlags {
    av_pairs
        .iter()
        .find(|av_pair| av_pair.as_u16() == AV_PAIR_FLAGS)
        .and_then(|av_pair| match av_pair {
            AvPair::Flags(value) => Some(MsvAvFlags::from_bits_truncate(*value)),
            _ => None,
        })
        .unwrap_or_else(MsvAvFlags::empty)
}

pub(crate) fn generate_challenge() -> crate::Result<[u8; CHALLENGE_SIZE]> {
    let mut challenge = [0x00; CHALLENGE_SIZE];
    utils::fill_random(&mut challenge)?;

    Ok(challenge)
}

pub(crate) fn generate_random_session_key() -> crate::Result<[u8; SESSION_KEY_SIZE]> {
    let mut session_key = [0x00; SESSION_KEY_SIZE];
    utils::fill_random(&mut session_key)?;

    Ok(session_key)
}

/// `NTOWFv2`: HMAC-MD5 keyed by MD4(password) over uppercase(user) ‖ domain, all UTF-16LE.
pub(crate) fn compute_ntlm_v2_hash(identity: &AuthIdentityBuffers) -> crate::Result<[u8; HASH_SIZE]> {
    let nt_hash = compute_md4(identity.password.as_ref());

    let user = utils::bytes_to_utf16_string(&identity.user)?;
    let mut user_uppercase_with_domain = utils::string_to_utf16(user.to_uppercase());
    user_uppercase_with_domain.extend_from_slice(&identity.domain);

    compute_hmac_md5(&nt_hash, &user_uppercase_with_domain)
}

pub(crate) fn compute_lm_v2_response(
    client_challenge: &[u8; CHALLENGE_SIZE],
    server_challenge: &[u8; CHALLENGE_SIZE],
    ntlm_v2_hash: &[u8; HASH_SIZE],
) -> crate::Result<[u8; LM_CHALLENGE_RESPONSE_BUFFER_SIZE]> {
    let mut lm_challenge_data = [0x00; CHALLENGE_SIZE * 2];
    lm_challenge_data[..CHALLENGE_SIZE].clone_from_slice(server_challenge);
    lm_challenge_data[CHALLENGE_SIZE..].clone_from_slice(client_challenge);

    let mut lm_challenge_response = [0x00; LM_CHALLENGE_RESPONSE_BUFFER_SIZE];
    lm_challenge_response[..HASH_SIZE].clone_from_slice(&compute_hmac_md5(ntlm_v2_hash, &lm_challenge_data)?);
    lm_challenge_response[HASH_SIZE..].clone_from_slice(client_challenge);

    Ok(lm_challenge_response)
}

/// Returns the NT challenge response (`NTProofStr ‖ temp`) and the session base key
/// `HMAC_MD5(NTOWFv2, NTProofStr)`.
pub(crate) fn compute_ntlm_v2_response(
    client_challenge: &[u8; CHALLENGE_SIZE],
    server_challenge: &[u8; CHALLENGE_SIZE],
    target_info: &[u8],
    ntlm_v2_hash: &[u8; HASH_SIZE],
    timestamp: u64,
) -> crate::Result<(Vec<u8>, [u8; HASH_SIZE])> {
    let mut ntlm_v2_temp = Vec::with_capacity(NT_V2_RESPONSE_BASE_SIZE + target_info.len());
    ntlm_v2_temp.write_u8(NT_V2_RESPONSE_TYPE)?; // RespType 1 byte
    ntlm_v2_temp.write_u8(NT_V2_RESPONSE_TYPE)?; // HiRespType 1 byte
    ntlm_v2_temp.write_u16::<LittleEndian>(0)?; // Reserved1 2 bytes
    ntlm_v2_temp.write_u32::<LittleEndian>(0)?; // Reserved2 4 bytes
    ntlm_v2_temp.write_u64::<LittleEndian>(timestamp)?; // Timestamp 8 bytes
    ntlm_v2_temp.extend_from_slice(client_challenge); // ClientChallenge 8 bytes
    ntlm_v2_temp.write_u32::<LittleEndian>(0)?; // Reserved3 4 bytes
    ntlm_v2_temp.extend_from_slice(target_info);

    let nt_proof = compute_nt_proof(server_challenge, &ntlm_v2_temp, ntlm_v2_hash)?;

    let mut nt_challenge_response = Vec::with_capacity(HASH_SIZE + ntlm_v2_temp.len());
    nt_challenge_response.extend_from_slice(&nt_proof);
    nt_challenge_response.append(&mut ntlm_v2_temp);

    let session_base_key = compute_hmac_md5(ntlm_v2_hash, &nt_proof)?;

    Ok((nt_challenge_response, session_base_key))
}

fn compute_nt_proof(
    server_challenge: &[u8; CHALLENGE_SIZE],
    ntlm_v2_temp: &[u8],
    ntlm_v2_hash: &[u8; HASH_SIZE],
) -> crate::Result<[u8; HASH_SIZE]> {
    let mut nt_proof_input = Vec::with_capacity(CHALLENGE_SIZE + ntlm_v2_temp.len());
    nt_proof_input.extend_from_slice(server_challenge);
    nt_proof_input.extend_from_slice(ntlm_v2_temp);

    compute_hmac_md5(ntlm_v2_hash, &nt_proof_input)
}

pub(crate) fn read_ntlm_v2_response(mut challenge_response: &[u8]) -> io::Result<NtlmV2Response> {
    let mut nt_proof = [0x00; HASH_SIZE];
    challenge_response.read_exact(&mut nt_proof)?;

    let resp_type = challenge_response.read_u8()?;
    let hi_resp_type = challenge_response.read_u8()?;
    if resp_type != NT_V2_RESPONSE_TYPE || hi_resp_type != NT_V2_RESPONSE_TYPE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported NTLMv2 response type: {}.{}", resp_type, hi_resp_type),
        ));
    }

    let _reserved1 = challenge_response.read_u16::<LittleEndian>()?;
    let _reserved2 = challenge_response.read_u32::<LittleEndian>()?;
    let timestamp = challenge_response.read_u64::<LittleEndian>()?;

    let mut client_challenge = [0x00; CHALLENGE_SIZE];
    challenge_response.read_exact(&mut client_challenge)?;
    let _reserved3 = challenge_response.read_u32::<LittleEndian>()?;

    Ok(NtlmV2Response {
        nt_proof,
        timestamp,
        client_challenge,
        target_info: challenge_response.to_vec(),
    })
}

/// Recomputes `NTProofStr` for a received response; returns it with the session base key.
pub(crate) fn verify_ntlm_v2_response(
    nt_challenge_response: &[u8],
    server_challenge: &[u8; CHALLENGE_SIZE],
    ntlm_v2_hash: &[u8; HASH_SIZE],
) -> crate::Result<[u8; HASH_SIZE]> {
    let response = read_ntlm_v2_response(nt_challenge_response)?;
    let nt_proof = compute_nt_proof(server_challenge, &nt_challenge_response[HASH_SIZE..], ntlm_v2_hash)?;

    if nt_proof != response.nt_proof {
        return Err(crate::Error::new(
            crate::ErrorKind::LogonDenied,
            "NTLMv2 proof does not match the credentials",
        ));
    }

    compute_hmac_md5(ntlm_v2_hash, &nt_proof)
}

/// RC4K: the key exchange key encrypts the random session key for the wire, and decrypts it back.
pub(crate) fn rc4k(key: &[u8; HASH_SIZE], data: &[u8; SESSION_KEY_SIZE]) -> [u8; SESSION_KEY_SIZE] {
    let mut result = [0x00; SESSION_KEY_SIZE];
    result.clone_from_slice(&Rc4::new(key).process(data));

    result
}

/// `MD5(exported session key ‖ magic)`, used for both the signing and the sealing keys.
pub(crate) fn generate_signing_key(exported_session_key: &[u8], sign_magic: &[u8]) -> [u8; HASH_SIZE] {
    let mut value = Vec::with_capacity(exported_session_key.len() + sign_magic.len());
    value.extend_from_slice(exported_session_key);
    value.extend_from_slice(sign_magic);

    compute_md5(&value)
}

/// HMAC-MD5 keyed by the exported session key over NEGOTIATE ‖ CHALLENGE ‖ AUTHENTICATE.
///
/// The AUTHENTICATE message must have its MIC region zeroed.
pub(crate) fn compute_message_integrity_check(
    negotiate_message: &[u8],
    challenge_message: &[u8],
    authenticate_message: &[u8],
    exported_session_key: &[u8],
) -> crate::Result<[u8; MESSAGE_INTEGRITY_CHECK_SIZE]> {
    let mut message_integrity_check = negotiate_message.to_vec();
    message_integrity_check.extend_from_slice(challenge_message);
    message_integrity_check.extend_from_slice(authenticate_message);

    compute_hmac_md5(exported_session_key, &message_integrity_check)
}
