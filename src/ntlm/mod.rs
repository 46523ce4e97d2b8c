mod config;
pub(crate) mod messages;
#[cfg(test)]
mod test;

use std::sync::LazyLock;

use bitflags::bitflags;
use byteorder::{LittleEndian, WriteBytesExt};

pub use self::config::NtlmConfig;
use self::messages::computations::generate_signing_key;
use self::messages::{client, server, CLIENT_SEAL_MAGIC, CLIENT_SIGN_MAGIC, SERVER_SEAL_MAGIC, SERVER_SIGN_MAGIC};
use crate::channel_bindings::ChannelBindings;
use crate::crypto::{compute_hmac_md5, Rc4, HASH_SIZE};
use crate::utils;
use crate::{
    AcceptSecurityContextResult, AcquireCredentialsHandleResult, AuthIdentity, AuthIdentityBuffers, BufferType,
    ClientResponseFlags, ContextNames, ContextSizes, CredentialUse, DecryptionFlags, EncryptionFlags, Error,
    ErrorKind, FilledAcceptSecurityContext, FilledAcquireCredentialsHandle, FilledInitializeSecurityContext,
    InitializeSecurityContextResult, PackageCapabilities, PackageInfo, SecurityBuffer, SecurityPackageType,
    SecurityStatus, ServerResponseFlags, SessionKeys, Sspi, SspiImpl,
};

pub const PKG_NAME: &str = "NTLM";
pub const NTLM_VERSION_SIZE: usize = 8;
/// Windows 7 (6.1 build 7600), NTLM revision 15.
pub const DEFAULT_NTLM_VERSION: [u8; NTLM_VERSION_SIZE] = [0x06, 0x01, 0xb0, 0x1d, 0x00, 0x00, 0x00, 0x0f];

pub const ENCRYPTED_RANDOM_SESSION_KEY_SIZE: usize = 16;
pub const SIGNATURE_SIZE: usize = SIGNATURE_VERSION_SIZE + SIGNATURE_CHECKSUM_SIZE + SIGNATURE_SEQ_NUM_SIZE;

const CHALLENGE_SIZE: usize = 8;
const SESSION_KEY_SIZE: usize = 16;
const MESSAGE_INTEGRITY_CHECK_SIZE: usize = 16;
const LM_CHALLENGE_RESPONSE_BUFFER_SIZE: usize = HASH_SIZE + CHALLENGE_SIZE;

const SIGNATURE_VERSION_SIZE: usize = 4;
const SIGNATURE_SEQ_NUM_SIZE: usize = 4;
const SIGNATURE_CHECKSUM_SIZE: usize = 8;
const MESSAGES_VERSION: u32 = 1;

const MAX_TOKEN_SIZE: u32 = 2010;

pub static PACKAGE_INFO: LazyLock<PackageInfo> = LazyLock::new(|| PackageInfo {
    capabilities: PackageCapabilities::INTEGRITY
        | PackageCapabilities::PRIVACY
        | PackageCapabilities::TOKEN_ONLY
        | PackageCapabilities::CONNECTION
        | PackageCapabilities::MULTI_REQUIRED
        | PackageCapabilities::IMPERSONATION
        | PackageCapabilities::ACCEPT_WIN32_NAME
        | PackageCapabilities::NEGOTIABLE
        | PackageCapabilities::LOGON
        | PackageCapabilities::RESTRICTED_TOKENS,
    rpc_id: 0x000a,
    max_token_len: 0xb48,
    name: SecurityPackageType::Ntlm,
    comment: String::from("NTLM Security Package"),
});

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum NtlmState {
    Initial,
    Negotiate,
    Challenge,
    Authenticate,
    Completion,
    Final,
    /// A received message could not be decoded. No handshake call is valid afterwards.
    PacketError,
}

/// Specifies the NT LAN Manager (NTLM) Authentication Protocol, used for authentication between clients and servers.
///
/// One context serves exactly one connection. Once the handshake reaches its final state the context signs
/// and seals messages with the derived per-direction keys.
///
/// # MSDN
///
/// * [[MS-NLMP]: NT LAN Manager (NTLM) Authentication Protocol](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-nlmp/b38c36ed-2804-4868-a9ff-8dd3182128e4)
#[derive(Debug, Clone)]
pub struct Ntlm {
    config: NtlmConfig,

    negotiate_message: Option<NegotiateMessage>,
    challenge_message: Option<ChallengeMessage>,
    authenticate_message: Option<AuthenticateMessage>,

    channel_bindings: Option<ChannelBindings>,
    /// UTF-16 service principal name sent in `MsvAvTargetName`.
    target_name: Option<Vec<u8>>,

    state: NtlmState,
    flags: NegotiateFlags,
    identity: Option<AuthIdentityBuffers>,

    send_signing_key: [u8; HASH_SIZE],
    recv_signing_key: [u8; HASH_SIZE],
    send_sealing_key: Option<Rc4>,
    recv_sealing_key: Option<Rc4>,

    // For the client, our_seq_number counts client-to-server messages and remote_seq_number server-to-client ones.
    // The server uses them the other way around.
    our_seq_number: u32,
    remote_seq_number: u32,
    is_client: bool,

    /// The exported session key.
    session_key: Option<[u8; SESSION_KEY_SIZE]>,
}

#[derive(Debug, Clone)]
struct Mic {
    value: [u8; MESSAGE_INTEGRITY_CHECK_SIZE],
    offset: usize,
}

#[derive(Debug, Clone)]
struct NegotiateMessage {
    message: Vec<u8>,
}

#[derive(Debug, Clone)]
struct ChallengeMessage {
    message: Vec<u8>,
    server_challenge: [u8; CHALLENGE_SIZE],
}

#[derive(Debug, Clone)]
struct AuthenticateMessage {
    message: Vec<u8>,
    mic: Option<Mic>,
    lm_challenge_response: Vec<u8>,
    nt_challenge_response: Vec<u8>,
    user_name: Vec<u8>,
    domain_name: Vec<u8>,
    workstation: Vec<u8>,
    encrypted_random_session_key: Option<[u8; ENCRYPTED_RANDOM_SESSION_KEY_SIZE]>,
}

impl Ntlm {
    pub fn new() -> Self {
        Self::with_config(NtlmConfig::default())
    }

    pub fn with_config(config: NtlmConfig) -> Self {
        Self {
            config,

            negotiate_message: None,
            challenge_message: None,
            authenticate_message: None,

            channel_bindings: None,
            target_name: None,

            state: NtlmState::Initial,
            flags: NegotiateFlags::empty(),
            identity: None,

            send_signing_key: [0x00; HASH_SIZE],
            recv_signing_key: [0x00; HASH_SIZE],
            send_sealing_key: None,
            recv_sealing_key: None,

            our_seq_number: 0,
            remote_seq_number: 0,
            is_client: true,

            session_key: None,
        }
    }

    pub fn config(&self) -> &NtlmConfig {
        &self.config
    }

    /// Sets the channel bindings whose MD5 hash goes into the `MsvAvChannelBindings` AV pair.
    ///
    /// Must be called before the CHALLENGE message is processed.
    pub fn set_channel_bindings(&mut self, channel_bindings: ChannelBindings) {
        self.channel_bindings = Some(channel_bindings);
    }

    fn version(&self) -> &[u8; NTLM_VERSION_SIZE] {
        &self.config.version
    }

    /// Derives both signing keys and the two RC4 sealing states from the exported session key.
    ///
    /// The RC4 states are created once here and then consumed by every later signed or sealed message.
    fn init_cipher_state(&mut self) -> crate::Result<()> {
        let session_key = self
            .session_key
            .ok_or_else(|| Error::new(ErrorKind::OutOfSequence, "the session key is not established"))?;

        let (send_sign_magic, recv_sign_magic, send_seal_magic, recv_seal_magic) = if self.is_client {
            (CLIENT_SIGN_MAGIC, SERVER_SIGN_MAGIC, CLIENT_SEAL_MAGIC, SERVER_SEAL_MAGIC)
        } else {
            (SERVER_SIGN_MAGIC, CLIENT_SIGN_MAGIC, SERVER_SEAL_MAGIC, CLIENT_SEAL_MAGIC)
        };

        self.send_signing_key = generate_signing_key(&session_key, send_sign_magic);
        self.recv_signing_key = generate_signing_key(&session_key, recv_sign_magic);
        self.send_sealing_key = Some(Rc4::new(&generate_signing_key(&session_key, send_seal_magic)));
        self.recv_sealing_key = Some(Rc4::new(&generate_signing_key(&session_key, recv_seal_magic)));

        Ok(())
    }

    fn our_seq_num(&mut self) -> u32 {
        let seq_num = self.our_seq_number;
        self.our_seq_number = self.our_seq_number.wrapping_add(1);

        seq_num
    }

    fn remote_seq_num(&mut self) -> u32 {
        let seq_num = self.remote_seq_number;
        self.remote_seq_number = self.remote_seq_number.wrapping_add(1);

        seq_num
    }

    fn check_final_state(&self) -> crate::Result<()> {
        if self.state == NtlmState::Final {
            Ok(())
        } else {
            Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("messages cannot be protected in the {:?} state", self.state),
            ))
        }
    }

    fn sealing_key(key: &mut Option<Rc4>) -> crate::Result<&mut Rc4> {
        key.as_mut()
            .ok_or_else(|| Error::new(ErrorKind::OutOfSequence, "the sealing key is not established"))
    }
}

impl Default for Ntlm {
    fn default() -> Self {
        Self::new()
    }
}

impl SspiImpl for Ntlm {
    type CredentialsHandle = Option<AuthIdentityBuffers>;
    type AuthenticationData = AuthIdentity;

    #[instrument(level = "trace", ret, fields(state = ?self.state), skip_all)]
    fn acquire_credentials_handle_impl(
        &mut self,
        builder: FilledAcquireCredentialsHandle<'_, Self::CredentialsHandle, Self::AuthenticationData>,
    ) -> crate::Result<AcquireCredentialsHandleResult<Self::CredentialsHandle>> {
        if builder.credential_use == CredentialUse::Outbound && builder.auth_data.is_none() {
            return Err(Error::new(
                ErrorKind::NoCredentials,
                "the client must specify the auth data",
            ));
        }

        self.identity = builder.auth_data.map(AuthIdentityBuffers::from);

        Ok(AcquireCredentialsHandleResult {
            credentials_handle: self.identity.clone(),
            expiry: None,
        })
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip_all)]
    fn initialize_security_context_impl(
        &mut self,
        builder: &mut FilledInitializeSecurityContext<'_, Self::CredentialsHandle>,
    ) -> crate::Result<InitializeSecurityContextResult> {
        self.is_client = true;

        let status = match self.state {
            NtlmState::Initial => {
                let identity = builder
                    .credentials_handle
                    .as_deref()
                    .and_then(Option::as_ref)
                    .or(self.identity.as_ref())
                    .cloned()
                    .ok_or_else(|| Error::new(ErrorKind::NoCredentials, "the credentials handle is empty"))?;
                let output_token = SecurityBuffer::find_buffer_mut(builder.output, BufferType::Token)?;
                output_token.buffer.clear();

                self.identity = Some(identity);
                self.target_name = builder
                    .target_name
                    .filter(|target_name| !target_name.is_empty())
                    .map(utils::string_to_utf16);
                self.state = NtlmState::Negotiate;

                client::write_negotiate(self, &mut output_token.buffer)?
            }
            NtlmState::Challenge => {
                let input = builder.input.as_deref().ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidToken,
                        "input buffers must be specified on subsequent calls",
                    )
                })?;
                let input_token = SecurityBuffer::find_buffer(input, BufferType::Token)?;
                if let Ok(bindings) = SecurityBuffer::find_buffer(input, BufferType::ChannelBindings) {
                    self.channel_bindings = Some(ChannelBindings {
                        application_data: bindings.buffer.clone(),
                        ..Default::default()
                    });
                }

                let output_token = SecurityBuffer::find_buffer_mut(builder.output, BufferType::Token)?;
                output_token.buffer.clear();

                client::read_challenge(self, input_token.buffer.as_slice())?;
                client::write_authenticate(self, &mut output_token.buffer)?
            }
            state => {
                return Err(Error::new(
                    ErrorKind::OutOfSequence,
                    format!("got wrong NTLM state: {:?}", state),
                ))
            }
        };

        trace!(output_buffers = ?builder.output);

        Ok(InitializeSecurityContextResult {
            status,
            flags: ClientResponseFlags::from_bits_truncate(builder.context_requirements.bits()),
            expiry: None,
        })
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip_all)]
    fn accept_security_context_impl(
        &mut self,
        builder: FilledAcceptSecurityContext<'_, Self::CredentialsHandle>,
    ) -> crate::Result<AcceptSecurityContextResult> {
        self.is_client = false;

        let input = builder
            .input
            .ok_or_else(|| Error::new(ErrorKind::InvalidToken, "input buffers must be specified"))?;
        let input_token = SecurityBuffer::find_buffer(input, BufferType::Token)?;

        if let Some(identity) = builder.credentials_handle.and_then(|handle| handle.as_ref()) {
            self.identity = Some(identity.clone());
        }

        let status = match self.state {
            NtlmState::Initial => {
                let output_token = SecurityBuffer::find_buffer_mut(builder.output, BufferType::Token)?;
                output_token.buffer.clear();

                self.state = NtlmState::Negotiate;
                server::read_negotiate(self, input_token.buffer.as_slice())?;

                server::write_challenge(self, &mut output_token.buffer)?
            }
            NtlmState::Authenticate => server::read_authenticate(self, input_token.buffer.as_slice())?,
            state => {
                return Err(Error::new(
                    ErrorKind::OutOfSequence,
                    format!("got wrong NTLM state: {:?}", state),
                ))
            }
        };

        Ok(AcceptSecurityContextResult {
            status,
            flags: ServerResponseFlags::from_bits_truncate(builder.context_requirements.bits()),
            expiry: None,
        })
    }
}

impl Sspi for Ntlm {
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip_all)]
    fn complete_auth_token(&mut self, _token: &mut [SecurityBuffer]) -> crate::Result<SecurityStatus> {
        match self.state {
            NtlmState::Final if self.is_client => Ok(SecurityStatus::Ok),
            NtlmState::Completion => server::complete_authenticate(self),
            state => Err(Error::new(
                ErrorKind::OutOfSequence,
                format!("complete_auth_token was called in the {:?} state", state),
            )),
        }
    }

    /// Seals the `Data` buffer and writes the 16-byte signature into the `Token` buffer.
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self, _flags, message))]
    fn encrypt_message(
        &mut self,
        _flags: EncryptionFlags,
        message: &mut [SecurityBuffer],
        _sequence_number: u32,
    ) -> crate::Result<SecurityStatus> {
        self.check_final_state()?;
        // check if exists
        SecurityBuffer::find_buffer(message, BufferType::Token)?;

        let sequence_number = self.our_seq_num();

        let data = SecurityBuffer::find_buffer_mut(message, BufferType::Data)?;
        let digest = compute_digest(&self.send_signing_key, sequence_number, &data.buffer)?;

        let sealing_key = Self::sealing_key(&mut self.send_sealing_key)?;
        data.buffer = sealing_key.process(&data.buffer);
        let checksum = sealing_key.process(&digest[..SIGNATURE_CHECKSUM_SIZE]);

        let signature_buffer = SecurityBuffer::find_buffer_mut(message, BufferType::Token)?;
        signature_buffer.buffer = compute_signature(&checksum, sequence_number).to_vec();

        Ok(SecurityStatus::Ok)
    }

    /// Unseals the `Data` buffer in place once the signature in the `Token` buffer is verified.
    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self, message))]
    fn decrypt_message(
        &mut self,
        message: &mut [SecurityBuffer],
        _sequence_number: u32,
    ) -> crate::Result<DecryptionFlags> {
        self.check_final_state()?;

        let signature = SecurityBuffer::find_buffer(message, BufferType::Token)?.buffer.clone();
        if signature.len() < SIGNATURE_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidToken,
                format!("the signature is too short: {} bytes", signature.len()),
            ));
        }

        let sequence_number = self.remote_seq_num();

        let data = SecurityBuffer::find_buffer_mut(message, BufferType::Data)?;
        let sealing_key = Self::sealing_key(&mut self.recv_sealing_key)?;
        let decrypted = sealing_key.process(&data.buffer);

        let digest = compute_digest(&self.recv_signing_key, sequence_number, &decrypted)?;
        let checksum = Self::sealing_key(&mut self.recv_sealing_key)?.process(&digest[..SIGNATURE_CHECKSUM_SIZE]);
        let expected_signature = compute_signature(&checksum, sequence_number);

        if signature[..SIGNATURE_SIZE] != expected_signature {
            warn!(sequence_number, "message signature verification failed");

            return Err(Error::new(
                ErrorKind::MessageAltered,
                "signature verification failed, something nasty is going on",
            ));
        }

        data.buffer = decrypted;

        Ok(DecryptionFlags::empty())
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self))]
    fn query_context_sizes(&mut self) -> crate::Result<ContextSizes> {
        Ok(ContextSizes {
            max_token: MAX_TOKEN_SIZE,
            max_signature: SIGNATURE_SIZE as u32,
            block: 0,
            security_trailer: SIGNATURE_SIZE as u32,
        })
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self))]
    fn query_context_names(&mut self) -> crate::Result<ContextNames> {
        if let Some(identity_buffers) = &self.identity {
            let identity = AuthIdentity::try_from(identity_buffers)?;

            Ok(ContextNames {
                username: identity.username,
                domain: identity.domain,
            })
        } else {
            Err(Error::new(
                ErrorKind::NoCredentials,
                "requested names, but no credentials were provided",
            ))
        }
    }

    #[instrument(level = "debug", ret, fields(state = ?self.state), skip(self))]
    fn query_context_package_info(&mut self) -> crate::Result<PackageInfo> {
        Ok(PACKAGE_INFO.clone())
    }

    #[instrument(level = "debug", fields(state = ?self.state), skip(self))]
    fn query_context_session_key(&self) -> crate::Result<SessionKeys> {
        match (self.state, self.session_key) {
            (NtlmState::Final, Some(session_key)) => Ok(SessionKeys {
                session_key: session_key.to_vec().into(),
            }),
            _ => Err(Error::new(
                ErrorKind::OutOfSequence,
                "the session key is not established",
            )),
        }
    }
}

impl NegotiateMessage {
    fn new(message: Vec<u8>) -> Self {
        Self { message }
    }
}

impl ChallengeMessage {
    fn new(message: Vec<u8>, server_challenge: [u8; CHALLENGE_SIZE]) -> Self {
        Self {
            message,
            server_challenge,
        }
    }
}

impl Mic {
    fn new(value: [u8; MESSAGE_INTEGRITY_CHECK_SIZE], offset: usize) -> Self {
        Self { value, offset }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    struct NegotiateFlags: u32 {
        /// W-bit
        /// requests 56-bit encryption
        const NTLM_SSP_NEGOTIATE56 = 0x8000_0000;

        /// V-bit
        /// requests explicit key exchange
        const NTLM_SSP_NEGOTIATE_KEY_EXCH = 0x4000_0000;

        /// U-bit
        /// requests an 128 bit session key
        const NTLM_SSP_NEGOTIATE128 = 0x2000_0000;

        /// T-bit
        /// the VERSION structure is present
        const NTLM_SSP_NEGOTIATE_VERSION = 0x0200_0000;

        /// S-bit
        const NTLM_SSP_NEGOTIATE_TARGET_INFO = 0x0080_0000;

        /// R
        const NTLM_SSP_NEGOTIATE_REQUEST_NON_NT_SESSION_KEY = 0x0040_0000;

        /// Q
        const NTLM_SSP_NEGOTIATE_IDENTIFY = 0x0010_0000;

        /// P-bit
        /// NTLMv2 Session Security
        const NTLM_SSP_NEGOTIATE_EXTENDED_SESSION_SECURITY = 0x0008_0000;

        /// O
        const NTLM_SSP_NEGOTIATE_TARGET_TYPE_SERVER = 0x0002_0000;

        /// N
        const NTLM_SSP_NEGOTIATE_TARGET_TYPE_DOMAIN = 0x0001_0000;

        /// M-bit
        /// requests a signature block
        const NTLM_SSP_NEGOTIATE_ALWAYS_SIGN = 0x0000_8000;

        /// L-bit
        const NTLM_SSP_NEGOTIATE_WORKSTATION_SUPPLIED = 0x0000_2000;

        /// K-bit
        const NTLM_SSP_NEGOTIATE_DOMAIN_SUPPLIED = 0x0000_1000;

        /// J
        const NTLM_SSP_NEGOTIATE_ANONYMOUS = 0x0000_0800;

        /// H-bit
        const NTLM_SSP_NEGOTIATE_NTLM = 0x0000_0200;

        /// G-bit
        const NTLM_SSP_NEGOTIATE_LM_KEY = 0x0000_0080;

        /// F
        const NTLM_SSP_NEGOTIATE_DATAGRAM = 0x0000_0040;

        /// E-bit
        /// session key negotiation with message confidentiality
        const NTLM_SSP_NEGOTIATE_SEAL = 0x0000_0020;

        /// D-bit
        const NTLM_SSP_NEGOTIATE_SIGN = 0x0000_0010;

        /// C-bit
        const NTLM_SSP_NEGOTIATE_REQUEST_TARGET = 0x0000_0004;

        /// B-bit
        const NTLM_SSP_NEGOTIATE_OEM = 0x0000_0002;

        /// A-bit
        const NTLM_SSP_NEGOTIATE_UNICODE = 0x0000_0001;
    }
}

fn compute_digest(key: &[u8], seq_num: u32, data: &[u8]) -> crate::Result<[u8; HASH_SIZE]> {
    let mut digest_data = Vec::with_capacity(SIGNATURE_SEQ_NUM_SIZE + data.len());
    digest_data.write_u32::<LittleEndian>(seq_num)?;
    digest_data.extend_from_slice(data);

    compute_hmac_md5(key, &digest_data)
}

fn compute_signature(checksum: &[u8], seq_num: u32) -> [u8; SIGNATURE_SIZE] {
    let mut signature = [0x00; SIGNATURE_SIZE];
    signature[..SIGNATURE_VERSION_SIZE].clone_from_slice(&MESSAGES_VERSION.to_le_bytes());
    signature[SIGNATURE_VERSION_SIZE..SIGNATURE_VERSION_SIZE + SIGNATURE_CHECKSUM_SIZE].clone_from_slice(checksum);
    signature[SIGNATURE_VERSION_SIZE + SIGNATURE_CHECKSUM_SIZE..].clone_from_slice(&seq_num.to_le_bytes());

    signature
}
