//! CredSSP: NTLM (or Negotiate) tokens carried in `TSRequest` envelopes over an established TLS channel, bound to
//! the server's public key and followed by the delegation of the user's credentials.
//!
//! [CredSspClient::process] and [CredSspServer::process] advance the handshake by one envelope and never touch the
//! network. [CredSspClient::authenticate] and [CredSspServer::accept] drive the whole exchange over a blocking
//! [Transport].

mod sspi_cred_ssp;
#[cfg(test)]
mod test;
mod ts_request;

use std::sync::LazyLock;
use std::{error, fmt, io};

use rand::rngs::OsRng;
use rand::Rng;

pub use self::sspi_cred_ssp::SspiCredSsp;
pub use self::ts_request::{read_ts_credentials, write_ts_credentials, NStatusCode, TsRequest, NONCE_SIZE};
use self::ts_request::TS_REQUEST_VERSION;
use crate::crypto::compute_sha256;
use crate::ntlm::SIGNATURE_SIZE;
use crate::registry::SspiContext;
use crate::{
    AuthIdentity, AuthIdentityBuffers, BufferType, ClientRequestFlags, CredentialUse, DataRepresentation,
    EncryptionFlags, Error, ErrorKind, PackageCapabilities, PackageInfo, SecurityBuffer, SecurityPackageType,
    SecurityStatus, ServerRequestFlags, Sspi,
};

pub const PKG_NAME: &str = "CREDSSP";

pub static PACKAGE_INFO: LazyLock<PackageInfo> = LazyLock::new(|| PackageInfo {
    capabilities: PackageCapabilities::INTEGRITY
        | PackageCapabilities::PRIVACY
        | PackageCapabilities::CONNECTION
        | PackageCapabilities::MULTI_REQUIRED
        | PackageCapabilities::IMPERSONATION
        | PackageCapabilities::ACCEPT_WIN32_NAME
        | PackageCapabilities::STREAM
        | PackageCapabilities::MUTUAL_AUTH
        | PackageCapabilities::NEGO_EXTENDER,
    rpc_id: 0xFFFF,
    max_token_len: 0x90A8,
    name: SecurityPackageType::CredSsp,
    comment: String::from("Microsoft CredSSP Security Provider"),
});

const HASH_MAGIC_LEN: usize = 38;
const SERVER_CLIENT_HASH_MAGIC: &[u8; HASH_MAGIC_LEN] = b"CredSSP Server-To-Client Binding Hash\0";
const CLIENT_SERVER_HASH_MAGIC: &[u8; HASH_MAGIC_LEN] = b"CredSSP Client-To-Server Binding Hash\0";

/// The first envelope version that binds the public key through a hash instead of the echo.
const HASH_BINDING_VERSION: u32 = 5;

/// Blocking byte transport, usually the TLS stream established before CredSSP starts.
pub trait Transport {
    /// Sends one encoded `TsRequest`.
    fn send(&mut self, buffer: &[u8]) -> io::Result<()>;

    /// Receives exactly one encoded `TsRequest`.
    fn recv(&mut self) -> io::Result<Vec<u8>>;
}

/// Frames `TsRequest`s on top of any byte stream.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: io::Read + io::Write> Transport for StreamTransport<S> {
    fn send(&mut self, buffer: &[u8]) -> io::Result<()> {
        self.stream.write_all(buffer)?;
        self.stream.flush()
    }

    fn recv(&mut self) -> io::Result<Vec<u8>> {
        // identifier and the first length byte; a long form length adds one or two bytes
        let mut buffer = vec![0x00; 2];
        self.stream.read_exact(&mut buffer)?;

        if buffer[1] & 0x80 != 0 {
            let length_of_length = usize::from(buffer[1] & 0x7F);
            buffer.resize(2 + length_of_length, 0x00);
            self.stream.read_exact(&mut buffer[2..])?;
        }

        let header_len = buffer.len();
        let ts_request_len = TsRequest::read_length(buffer.as_slice())?;
        if ts_request_len < header_len {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "invalid TSRequest length"));
        }

        buffer.resize(ts_request_len, 0x00);
        self.stream.read_exact(&mut buffer[header_len..])?;

        Ok(buffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredSspConfig {
    /// Version advertised in every `TsRequest`. Public key hashes are used when both sides speak 5 or later.
    pub ts_request_version: u32,
    /// The package that carries the authentication, NTLM or Negotiate.
    pub package: SecurityPackageType,
}

impl Default for CredSspConfig {
    fn default() -> Self {
        Self {
            ts_request_version: TS_REQUEST_VERSION,
            package: SecurityPackageType::Ntlm,
        }
    }
}

/// Failure of a whole CredSSP exchange.
#[derive(Debug)]
pub enum CredSspError {
    /// The transport could not send or receive.
    Transport(io::Error),
    /// The peer or the security package rejected the exchange.
    Sspi(Error),
}

impl fmt::Display for CredSspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredSspError::Transport(err) => write!(f, "CredSSP transport error: {}", err),
            CredSspError::Sspi(err) => write!(f, "CredSSP error: {}", err),
        }
    }
}

impl error::Error for CredSspError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            CredSspError::Transport(err) => Some(err),
            CredSspError::Sspi(err) => Some(err),
        }
    }
}

impl From<Error> for CredSspError {
    fn from(err: Error) -> Self {
        CredSspError::Sspi(err)
    }
}

/// The result of a CredSSP client processing.
#[derive(Debug, Clone)]
pub enum ClientState {
    /// Send the request and feed the answer back to `process`.
    ReplyNeeded(TsRequest),
    /// Send the request; the credentials are in it and the exchange is over.
    FinalMessage(TsRequest),
}

/// The result of a CredSSP server processing.
#[derive(Debug, Clone)]
pub enum ServerState {
    /// Used as a result of processing of negotiation tokens.
    ReplyNeeded(TsRequest),
    /// The credentials delegated by the client.
    Finished(AuthIdentity),
}

/// The error of a CredSSP server processing.
/// Contains `TsRequest` with non-empty `error_code`, and the error which caused the server to fail.
#[derive(Debug, Clone)]
pub struct ServerError {
    pub ts_request: TsRequest,
    pub error: Error,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CredSspState {
    NegoToken,
    AuthInfo,
    Final,
    /// A previous call failed. The exchange cannot be resumed.
    Failed,
}

impl CredSspState {
    /// A finished exchange stays finished, anything else becomes `Failed`.
    fn fail(&mut self) {
        if *self != CredSspState::Final {
            *self = CredSspState::Failed;
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum EndpointType {
    Client,
    Server,
}

/// Implements the CredSSP *client*. The client's credentials are to
/// be securely delegated to the server.
///
/// # MSDN
///
/// * [Glossary](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-cssp/97e4a826-1112-4ab4-8662-cfa58418b4c1)
#[derive(Debug)]
pub struct CredSspClient {
    state: CredSspState,
    context: Option<CredSspContext>,
    credentials: AuthIdentity,
    credentials_handle: Option<AuthIdentityBuffers>,
    public_key: Vec<u8>,
    client_nonce: [u8; NONCE_SIZE],
    config: CredSspConfig,
    target_name: String,
}

impl CredSspClient {
    /// `public_key` is the server's TLS public key (the subject public key of its certificate).
    pub fn new(public_key: Vec<u8>, credentials: AuthIdentity, config: CredSspConfig) -> Self {
        Self {
            state: CredSspState::NegoToken,
            context: None,
            credentials,
            credentials_handle: None,
            public_key,
            client_nonce: OsRng.gen::<[u8; NONCE_SIZE]>(),
            config,
            target_name: String::new(),
        }
    }

    /// The service principal name handed to the security package, e.g. `TERMSRV/server.example.com`.
    pub fn with_target_name(mut self, target_name: impl Into<String>) -> Self {
        self.target_name = target_name.into();
        self
    }

    /// Runs the whole exchange and returns once the credentials are sent.
    ///
    /// Nothing is sent after a failed public key check.
    #[instrument(level = "debug", skip_all)]
    pub fn authenticate(&mut self, transport: &mut impl Transport) -> Result<(), CredSspError> {
        let mut ts_request = TsRequest {
            version: self.config.ts_request_version,
            ..Default::default()
        };

        loop {
            match self.process(ts_request)? {
                ClientState::ReplyNeeded(reply) => {
                    send_ts_request(transport, &reply)?;
                    ts_request = recv_ts_request(transport)?;
                }
                ClientState::FinalMessage(reply) => {
                    send_ts_request(transport, &reply)?;
                    debug!("CredSSP client delegated the credentials");

                    return Ok(());
                }
            }
        }
    }

    /// Processes one envelope from the server. The first call takes an empty request.
    ///
    /// Any error is final: later calls return `OutOfSequence`.
    #[instrument(level = "debug", fields(state = ?self.state), skip_all)]
    pub fn process(&mut self, ts_request: TsRequest) -> crate::Result<ClientState> {
        self.process_impl(ts_request).inspect_err(|error| {
            warn!(?error, "CredSSP client failed");
            self.state.fail();
        })
    }

    fn process_impl(&mut self, mut ts_request: TsRequest) -> crate::Result<ClientState> {
        if self.state == CredSspState::Failed {
            return Err(Error::new(
                ErrorKind::OutOfSequence,
                "CredSSP client's 'process' method must not be fired after a failure",
            ));
        }

        ts_request.check_error()?;

        match self.context.as_mut() {
            Some(context) => context.check_peer_version(ts_request.version)?,
            None => {
                let mut context = CredSspContext::new(&self.config.package)?;
                let result = context
                    .sspi_context
                    .acquire_credentials_handle()
                    .with_credential_use(CredentialUse::Outbound)
                    .with_auth_data(&self.credentials)
                    .execute(&mut context.sspi_context)?;

                self.credentials_handle = result.credentials_handle;
                self.context = Some(context);
            }
        }
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::InternalError, "the CredSSP context is not set"))?;

        ts_request.version = self.config.ts_request_version;

        match self.state {
            CredSspState::NegoToken => {
                let mut input_token = [SecurityBuffer::new(
                    ts_request.nego_tokens.take().unwrap_or_default(),
                    BufferType::Token,
                )];
                let mut output_token = [SecurityBuffer::new(Vec::with_capacity(1024), BufferType::Token)];

                let mut builder = context
                    .sspi_context
                    .initialize_security_context()
                    .with_credentials_handle(&mut self.credentials_handle)
                    .with_context_requirements(
                        ClientRequestFlags::REPLAY_DETECT
                            | ClientRequestFlags::SEQUENCE_DETECT
                            | ClientRequestFlags::CONFIDENTIALITY
                            | ClientRequestFlags::DELEGATE,
                    )
                    .with_target_data_representation(DataRepresentation::Native)
                    .with_target_name(&self.target_name)
                    .with_output(&mut output_token);
                if !input_token[0].buffer.is_empty() {
                    builder = builder.with_input(&mut input_token);
                }
                let result = builder.execute(&mut context.sspi_context)?;

                let [output_token] = output_token;
                ts_request.nego_tokens = Some(output_token.buffer).filter(|token| !token.is_empty());

                let status = match result.status {
                    SecurityStatus::CompleteNeeded | SecurityStatus::CompleteAndContinue => {
                        context.sspi_context.complete_auth_token(&mut [])?;

                        if result.status == SecurityStatus::CompleteNeeded {
                            SecurityStatus::Ok
                        } else {
                            SecurityStatus::ContinueNeeded
                        }
                    }
                    status => status,
                };

                if status == SecurityStatus::Ok {
                    debug!("CredSSP finished NLA stage");

                    let version = context.negotiated_version(self.config.ts_request_version)?;
                    ts_request.pub_key_auth = Some(context.encrypt_public_key(
                        &self.public_key,
                        EndpointType::Client,
                        Some(&self.client_nonce),
                        version,
                    )?);
                    if version >= HASH_BINDING_VERSION {
                        ts_request.client_nonce = Some(self.client_nonce);
                    }

                    self.state = CredSspState::AuthInfo;
                }

                Ok(ClientState::ReplyNeeded(ts_request))
            }
            CredSspState::AuthInfo => {
                ts_request.nego_tokens = None;

                let pub_key_auth = ts_request
                    .pub_key_auth
                    .take()
                    .ok_or_else(|| Error::new(ErrorKind::InvalidToken, "expected an encrypted public key"))?;
                let version = context.negotiated_version(self.config.ts_request_version)?;
                context.decrypt_public_key(
                    &self.public_key,
                    &pub_key_auth,
                    EndpointType::Client,
                    Some(&self.client_nonce),
                    version,
                )?;

                let credentials = self
                    .credentials_handle
                    .as_ref()
                    .ok_or_else(|| Error::new(ErrorKind::NoCredentials, "the credentials handle is empty"))?;
                ts_request.auth_info = Some(context.encrypt_ts_credentials(credentials)?);
                ts_request.client_nonce = None;
                debug!("tscredentials has been written");

                self.state = CredSspState::Final;

                Ok(ClientState::FinalMessage(ts_request))
            }
            CredSspState::Final | CredSspState::Failed => Err(Error::new(
                ErrorKind::OutOfSequence,
                "CredSSP client's 'process' method must not be fired after the 'Finished' state",
            )),
        }
    }
}

/// Implements the CredSSP *server*: checks the client's proof against a known identity, echoes the public key
/// and decrypts the delegated credentials.
///
/// # MSDN
///
/// * [Glossary](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-cssp/97e4a826-1112-4ab4-8662-cfa58418b4c1)
#[derive(Debug)]
pub struct CredSspServer {
    state: CredSspState,
    context: Option<CredSspContext>,
    credentials: AuthIdentity,
    credentials_handle: Option<AuthIdentityBuffers>,
    public_key: Vec<u8>,
    config: CredSspConfig,
}

impl CredSspServer {
    /// `credentials` is the identity the client is expected to prove.
    pub fn new(public_key: Vec<u8>, credentials: AuthIdentity, config: CredSspConfig) -> Self {
        Self {
            state: CredSspState::NegoToken,
            context: None,
            credentials,
            credentials_handle: None,
            public_key,
            config,
        }
    }

    /// Answers the client until it delegates its credentials.
    ///
    /// A failure is reported to the client with an `errorCode` before it is returned.
    #[instrument(level = "debug", skip_all)]
    pub fn accept(&mut self, transport: &mut impl Transport) -> Result<AuthIdentity, CredSspError> {
        loop {
            let ts_request = recv_ts_request(transport)?;

            match self.process(ts_request) {
                Ok(ServerState::ReplyNeeded(reply)) => send_ts_request(transport, &reply)?,
                Ok(ServerState::Finished(identity)) => return Ok(identity),
                Err(ServerError { ts_request, error }) => {
                    send_ts_request(transport, &ts_request)?;

                    return Err(CredSspError::Sspi(error));
                }
            }
        }
    }

    #[allow(clippy::result_large_err)]
    #[instrument(level = "debug", fields(state = ?self.state), skip_all)]
    pub fn process(&mut self, ts_request: TsRequest) -> Result<ServerState, ServerError> {
        self.process_impl(ts_request).map_err(|error| {
            warn!(?error, "CredSSP server failed");
            self.state.fail();

            ServerError {
                ts_request: TsRequest {
                    version: self.config.ts_request_version,
                    error_code: Some(construct_error(&error)),
                    ..Default::default()
                },
                error,
            }
        })
    }

    fn process_impl(&mut self, mut ts_request: TsRequest) -> crate::Result<ServerState> {
        if self.state == CredSspState::Failed {
            return Err(Error::new(
                ErrorKind::OutOfSequence,
                "CredSSP server's 'process' method must not be fired after a failure",
            ));
        }

        match self.context.as_mut() {
            Some(context) => context.check_peer_version(ts_request.version)?,
            None => {
                let mut context = CredSspContext::new(&self.config.package)?;
                context.check_peer_version(ts_request.version)?;

                let result = context
                    .sspi_context
                    .acquire_credentials_handle()
                    .with_credential_use(CredentialUse::Inbound)
                    .with_auth_data(&self.credentials)
                    .execute(&mut context.sspi_context)?;

                self.credentials_handle = result.credentials_handle;
                self.context = Some(context);
            }
        }
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::InternalError, "the CredSSP context is not set"))?;

        let client_nonce = ts_request.client_nonce.take();
        ts_request.version = self.config.ts_request_version;

        match self.state {
            CredSspState::NegoToken => {
                let input = ts_request
                    .nego_tokens
                    .take()
                    .ok_or_else(|| Error::new(ErrorKind::InvalidToken, "expected a negotiation token"))?;
                let mut input_token = [SecurityBuffer::new(input, BufferType::Token)];
                let mut output_token = [SecurityBuffer::new(Vec::with_capacity(1024), BufferType::Token)];

                let result = context
                    .sspi_context
                    .accept_security_context()
                    .with_credentials_handle(&mut self.credentials_handle)
                    .with_context_requirements(ServerRequestFlags::empty())
                    .with_target_data_representation(DataRepresentation::Native)
                    .with_input(&mut input_token)
                    .with_output(&mut output_token)
                    .execute(&mut context.sspi_context)?;

                match result.status {
                    SecurityStatus::ContinueNeeded => {
                        let [output_token] = output_token;
                        ts_request.nego_tokens = Some(output_token.buffer);
                    }
                    SecurityStatus::CompleteNeeded => {
                        context.sspi_context.complete_auth_token(&mut [])?;
                        ts_request.nego_tokens = None;

                        let pub_key_auth = ts_request
                            .pub_key_auth
                            .take()
                            .ok_or_else(|| Error::new(ErrorKind::InvalidToken, "expected an encrypted public key"))?;
                        let version = context.negotiated_version(self.config.ts_request_version)?;
                        context.decrypt_public_key(
                            &self.public_key,
                            &pub_key_auth,
                            EndpointType::Server,
                            client_nonce.as_ref(),
                            version,
                        )?;
                        ts_request.pub_key_auth = Some(context.encrypt_public_key(
                            &self.public_key,
                            EndpointType::Server,
                            client_nonce.as_ref(),
                            version,
                        )?);

                        self.state = CredSspState::AuthInfo;
                    }
                    status => {
                        return Err(Error::new(
                            ErrorKind::InternalError,
                            format!("unexpected status of the accepting side: {:?}", status),
                        ))
                    }
                }

                Ok(ServerState::ReplyNeeded(ts_request))
            }
            CredSspState::AuthInfo => {
                let auth_info = ts_request
                    .auth_info
                    .take()
                    .ok_or_else(|| Error::new(ErrorKind::InvalidToken, "expected an encrypted ts credentials"))?;
                let read_credentials = context.decrypt_ts_credentials(&auth_info)?;

                self.state = CredSspState::Final;

                let identity = AuthIdentity::try_from(&read_credentials)?;

                Ok(ServerState::Finished(identity))
            }
            CredSspState::Final | CredSspState::Failed => Err(Error::new(
                ErrorKind::OutOfSequence,
                "CredSSP server's 'process' method must not be fired after the 'Finished' state",
            )),
        }
    }
}

fn send_ts_request(transport: &mut impl Transport, ts_request: &TsRequest) -> Result<(), CredSspError> {
    let mut buffer = Vec::with_capacity(ts_request.buffer_len().map_err(Error::from)?);
    ts_request.encode_ts_request(&mut buffer).map_err(Error::from)?;
    trace!(len = buffer.len(), "sending TSRequest");

    transport.send(&buffer).map_err(CredSspError::Transport)
}

fn recv_ts_request(transport: &mut impl Transport) -> Result<TsRequest, CredSspError> {
    let buffer = transport.recv().map_err(CredSspError::Transport)?;
    trace!(len = buffer.len(), "received TSRequest");

    Ok(TsRequest::from_buffer(&buffer).map_err(Error::from)?)
}

/// The security package of one exchange with the state needed to seal the CredSSP payloads.
#[derive(Debug, Clone)]
struct CredSspContext {
    peer_version: Option<u32>,
    sspi_context: SspiContext,
    send_seq_num: u32,
    recv_seq_num: u32,
}

impl CredSspContext {
    fn new(package: &SecurityPackageType) -> crate::Result<Self> {
        let sspi_context = match package {
            SecurityPackageType::Ntlm | SecurityPackageType::Negotiate => SspiContext::new(&package.to_string())?,
            package => {
                return Err(Error::new(
                    ErrorKind::UnsupportedFunction,
                    format!("the {} package cannot carry CredSSP", package),
                ))
            }
        };

        Ok(Self {
            peer_version: None,
            sspi_context,
            send_seq_num: 0,
            recv_seq_num: 0,
        })
    }

    fn check_peer_version(&mut self, other_peer_version: u32) -> crate::Result<()> {
        match self.peer_version {
            Some(peer_version) if peer_version != other_peer_version => Err(Error::new(
                ErrorKind::InvalidToken,
                format!(
                    "CredSSP peer changed protocol version from {} to {}",
                    peer_version, other_peer_version
                ),
            )),
            Some(_) => Ok(()),
            None => {
                self.peer_version = Some(other_peer_version);

                Ok(())
            }
        }
    }

    /// The version both sides speak.
    fn negotiated_version(&self, own_version: u32) -> crate::Result<u32> {
        self.peer_version
            .map(|peer_version| peer_version.min(own_version))
            .ok_or_else(|| Error::new(ErrorKind::OutOfSequence, "no TSRequest was received from the peer yet"))
    }

    fn encrypt_public_key(
        &mut self,
        public_key: &[u8],
        endpoint: EndpointType,
        client_nonce: Option<&[u8; NONCE_SIZE]>,
        version: u32,
    ) -> crate::Result<Vec<u8>> {
        let hash_magic = match endpoint {
            EndpointType::Client => CLIENT_SERVER_HASH_MAGIC,
            EndpointType::Server => SERVER_CLIENT_HASH_MAGIC,
        };

        if version < HASH_BINDING_VERSION {
            self.encrypt_public_key_echo(public_key, endpoint)
        } else {
            let client_nonce = client_nonce.ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidToken,
                    "client nonce from the TSRequest is empty, but a peer version is >= 5",
                )
            })?;

            self.encrypt_message(&public_key_hash(hash_magic, client_nonce, public_key))
        }
    }

    fn decrypt_public_key(
        &mut self,
        public_key: &[u8],
        encrypted_public_key: &[u8],
        endpoint: EndpointType,
        client_nonce: Option<&[u8; NONCE_SIZE]>,
        version: u32,
    ) -> crate::Result<()> {
        let hash_magic = match endpoint {
            EndpointType::Client => SERVER_CLIENT_HASH_MAGIC,
            EndpointType::Server => CLIENT_SERVER_HASH_MAGIC,
        };

        if version < HASH_BINDING_VERSION {
            self.decrypt_public_key_echo(public_key, encrypted_public_key, endpoint)
        } else {
            let client_nonce = client_nonce.ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidToken,
                    "client nonce from the TSRequest is empty, but a peer version is >= 5",
                )
            })?;
            let decrypted_hash = self.decrypt_message(encrypted_public_key)?;

            if public_key_hash(hash_magic, client_nonce, public_key).as_ref() != decrypted_hash.as_slice() {
                error!("Expected and decrypted public key hash are not the same");

                return Err(Error::new(
                    ErrorKind::MessageAltered,
                    "could not verify a public key hash",
                ));
            }

            Ok(())
        }
    }

    fn encrypt_public_key_echo(&mut self, public_key: &[u8], endpoint: EndpointType) -> crate::Result<Vec<u8>> {
        let mut public_key = public_key.to_vec();

        if endpoint == EndpointType::Server {
            if let Some(first) = public_key.first_mut() {
                *first = first.wrapping_add(1);
            }
        }

        self.encrypt_message(&public_key)
    }

    fn decrypt_public_key_echo(
        &mut self,
        public_key: &[u8],
        encrypted_public_key: &[u8],
        endpoint: EndpointType,
    ) -> crate::Result<()> {
        let mut decrypted_public_key = self.decrypt_message(encrypted_public_key)?;

        if endpoint == EndpointType::Client {
            if let Some(first) = decrypted_public_key.first_mut() {
                *first = first.wrapping_sub(1);
            }
        }

        if public_key != decrypted_public_key.as_slice() {
            error!("Expected and decrypted public key are not the same");

            return Err(Error::new(
                ErrorKind::MessageAltered,
                "could not verify a public key echo",
            ));
        }

        Ok(())
    }

    fn encrypt_ts_credentials(&mut self, credentials: &AuthIdentityBuffers) -> crate::Result<Vec<u8>> {
        self.encrypt_message(&write_ts_credentials(credentials)?)
    }

    fn decrypt_ts_credentials(&mut self, auth_info: &[u8]) -> crate::Result<AuthIdentityBuffers> {
        let ts_credentials_buffer = self.decrypt_message(auth_info)?;

        read_ts_credentials(&ts_credentials_buffer)
    }

    /// Seals `input` and returns the signature followed by the sealed bytes.
    fn encrypt_message(&mut self, input: &[u8]) -> crate::Result<Vec<u8>> {
        let mut buffers = [
            SecurityBuffer::new(Vec::with_capacity(SIGNATURE_SIZE), BufferType::Token),
            SecurityBuffer::new(input.to_vec(), BufferType::Data),
        ];

        self.sspi_context
            .encrypt_message(EncryptionFlags::empty(), &mut buffers, self.send_seq_num)?;
        self.send_seq_num += 1;

        let [token, data] = buffers;
        let mut output = token.buffer;
        output.extend_from_slice(&data.buffer);

        Ok(output)
    }

    fn decrypt_message(&mut self, input: &[u8]) -> crate::Result<Vec<u8>> {
        if input.len() < SIGNATURE_SIZE {
            return Err(Error::new(
                ErrorKind::InvalidToken,
                format!("sealed CredSSP payload is too short: {} bytes", input.len()),
            ));
        }

        let (signature, data) = input.split_at(SIGNATURE_SIZE);
        let mut buffers = [
            SecurityBuffer::new(data.to_vec(), BufferType::Data),
            SecurityBuffer::new(signature.to_vec(), BufferType::Token),
        ];

        self.sspi_context.decrypt_message(&mut buffers, self.recv_seq_num)?;
        self.recv_seq_num += 1;

        let [data, _] = buffers;

        Ok(data.buffer)
    }
}

fn public_key_hash(hash_magic: &[u8], client_nonce: &[u8; NONCE_SIZE], public_key: &[u8]) -> [u8; 32] {
    let mut data = hash_magic.to_vec();
    data.extend_from_slice(client_nonce);
    data.extend_from_slice(public_key);

    compute_sha256(&data)
}

/// Maps an SSPI error to the NTSTATUS sent in `errorCode`: facility 7, severity error.
fn construct_error(e: &Error) -> NStatusCode {
    let code = ((e.error_type as i64 & 0x0000_FFFF) | (0x7 << 16) | 0xC000_0000) as u32;
    NStatusCode(code)
}
