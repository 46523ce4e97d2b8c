//! Network level authentication for remote desktop clients.
//!
//! The crate provides an NTLM security package, a small SSPI-style dispatch layer over the packages
//! reachable by name (NTLM, Kerberos, Negotiate and CredSSP), and a CredSSP client driver that runs
//! the NTLM exchange inside `TSRequest` envelopes, checks the public key echo and delegates the
//! user's credentials.
//!
//! # Example
//!
//! ```
//! use sspi_nla::{
//!     AuthIdentity, BufferType, ClientRequestFlags, CredentialUse, DataRepresentation, Ntlm, SecurityBuffer,
//!     SecurityStatus, Sspi,
//! };
//!
//! let mut ntlm = Ntlm::new();
//! let identity = AuthIdentity {
//!     username: String::from("user"),
//!     password: String::from("password").into(),
//!     domain: None,
//! };
//!
//! let mut acq_cred_result = ntlm
//!     .acquire_credentials_handle()
//!     .with_credential_use(CredentialUse::Outbound)
//!     .with_auth_data(&identity)
//!     .execute(&mut ntlm)
//!     .unwrap();
//!
//! let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
//! let result = ntlm
//!     .initialize_security_context()
//!     .with_credentials_handle(&mut acq_cred_result.credentials_handle)
//!     .with_context_requirements(ClientRequestFlags::CONFIDENTIALITY | ClientRequestFlags::ALLOCATE_MEMORY)
//!     .with_target_data_representation(DataRepresentation::Native)
//!     .with_output(&mut output)
//!     .execute(&mut ntlm)
//!     .unwrap();
//!
//! assert_eq!(result.status, SecurityStatus::ContinueNeeded);
//! assert_eq!(output[0].buffer.len(), 40);
//! ```

#[macro_use]
extern crate tracing;

mod auth_identity;
mod ber;
pub mod builders;
mod channel_bindings;
pub mod credssp;
mod crypto;
pub mod kerberos;
pub mod negotiate;
pub mod ntlm;
pub mod registry;
mod secret;
mod utils;

use std::{error, fmt, io, result, str, string};

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};

pub use self::auth_identity::{AuthIdentity, AuthIdentityBuffers};
pub use self::builders::{
    AcceptSecurityContextResult, AcquireCredentialsHandleResult, InitializeSecurityContextResult,
};
use self::builders::{
    AcceptSecurityContext, AcquireCredentialsHandle, EmptyAcceptSecurityContext, EmptyAcquireCredentialsHandle,
    EmptyInitializeSecurityContext, FilledAcceptSecurityContext, FilledAcquireCredentialsHandle,
    FilledInitializeSecurityContext, InitializeSecurityContext,
};
pub use self::channel_bindings::ChannelBindings;
pub use self::credssp::{
    ClientState, CredSspClient, CredSspConfig, CredSspError, CredSspServer, NStatusCode, ServerError, ServerState,
    StreamTransport, Transport, TsRequest,
};
pub use self::kerberos::Kerberos;
pub use self::negotiate::Negotiate;
pub use self::ntlm::{Ntlm, NtlmConfig};
pub use self::registry::{
    enumerate_security_packages, query_security_package_info, ContextHandle, CredentialsHandle, SspiContext,
};
pub use self::secret::Secret;

/// Representation of SSPI-related result operation. Makes it easier to return a `Result` with SSPI-related `Error`.
pub type Result<T> = result::Result<T, Error>;

const PACKAGE_ID_NONE: u16 = 0xFFFF;

/// This trait provides interface for all available SSPI functions. The `acquire_credentials_handle`,
/// `initialize_security_context`, and `accept_security_context` methods return Builders that make it
/// easier to assemble the list of arguments for the function and then execute it.
///
/// # MSDN
///
/// * [SSPI.h](https://docs.microsoft.com/en-us/windows/win32/api/sspi/)
pub trait Sspi
where
    Self: Sized + SspiImpl,
{
    /// Acquires a handle to preexisting credentials of a security principal. The credentials are
    /// consumed by the `initialize_security_context` and `accept_security_context` builders.
    ///
    /// # MSDN
    ///
    /// * [AcquireCredentialshandleW function](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-acquirecredentialshandlew)
    fn acquire_credentials_handle<'a>(
        &self,
    ) -> EmptyAcquireCredentialsHandle<'a, Self::CredentialsHandle, Self::AuthenticationData> {
        AcquireCredentialsHandle::new()
    }

    /// Initiates the client side, outbound security context from a credential handle.
    ///
    /// The first call produces the negotiate token. Every next call consumes the token received from
    /// the server and returns the following one, until the returned status is not
    /// `SecurityStatus::ContinueNeeded`.
    ///
    /// # MSDN
    ///
    /// * [InitializeSecurityContextW function](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-initializesecuritycontextw)
    fn initialize_security_context<'a>(&self) -> EmptyInitializeSecurityContext<'a, Self::CredentialsHandle> {
        InitializeSecurityContext::new()
    }

    /// Lets the server component of a transport application establish a security context between the server and
    /// a remote client.
    ///
    /// # MSDN
    ///
    /// * [AcceptSecurityContext function](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-acceptsecuritycontext)
    fn accept_security_context<'a>(&self) -> EmptyAcceptSecurityContext<'a, Self::CredentialsHandle> {
        AcceptSecurityContext::new()
    }

    /// Completes an authentication token once the handshake returned `SecurityStatus::CompleteNeeded`.
    ///
    /// # MSDN
    ///
    /// * [CompleteAuthToken function](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-completeauthtoken)
    fn complete_auth_token(&mut self, token: &mut [SecurityBuffer]) -> Result<SecurityStatus>;

    /// Encrypts the `Data` buffer in place and writes the signature into the `Token` buffer.
    ///
    /// The sequence number is tracked by the context itself: the argument is accepted for API
    /// compatibility and is not used to compute the signature.
    ///
    /// # MSDN
    ///
    /// * [EncryptMessage function](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-encryptmessage)
    fn encrypt_message(
        &mut self,
        flags: EncryptionFlags,
        message: &mut [SecurityBuffer],
        sequence_number: u32,
    ) -> Result<SecurityStatus>;

    /// Decrypts the `Data` buffer in place and verifies the signature held by the `Token` buffer.
    ///
    /// # MSDN
    ///
    /// * [DecryptMessage function](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-decryptmessage)
    fn decrypt_message(&mut self, message: &mut [SecurityBuffer], sequence_number: u32) -> Result<DecryptionFlags>;

    /// Retrieves the sizes of the structures used by the protect and unprotect operations.
    fn query_context_sizes(&mut self) -> Result<ContextSizes>;

    /// Retrieves the username and domain of the credential associated with the context.
    fn query_context_names(&mut self) -> Result<ContextNames>;

    /// Retrieves information about the security package behind the context.
    fn query_context_package_info(&mut self) -> Result<PackageInfo>;

    /// Retrieves the exported session key once the handshake has reached its final state.
    fn query_context_session_key(&self) -> Result<SessionKeys>;
}

/// The package-side half of the SSPI functions that go through builders.
pub trait SspiImpl {
    /// Represents the actual credentials handle type that the package works with.
    type CredentialsHandle;
    /// Represents the authentication data type accepted by `acquire_credentials_handle`.
    type AuthenticationData;

    fn acquire_credentials_handle_impl(
        &mut self,
        builder: FilledAcquireCredentialsHandle<'_, Self::CredentialsHandle, Self::AuthenticationData>,
    ) -> Result<AcquireCredentialsHandleResult<Self::CredentialsHandle>>;

    fn initialize_security_context_impl(
        &mut self,
        builder: &mut FilledInitializeSecurityContext<'_, Self::CredentialsHandle>,
    ) -> Result<InitializeSecurityContextResult>;

    fn accept_security_context_impl(
        &mut self,
        builder: FilledAcceptSecurityContext<'_, Self::CredentialsHandle>,
    ) -> Result<AcceptSecurityContextResult>;
}

bitflags! {
    /// Indicate the quality of protection. Used in the `encrypt_message` method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EncryptionFlags: u32 {
        const WRAP_OOB_DATA = 0x4000_0000;
        const WRAP_NO_ENCRYPT = 0x8000_0001;
    }
}

bitflags! {
    /// Indicate the quality of protection. Returned by the `decrypt_message` method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DecryptionFlags: u32 {
        const SIGN_ONLY = 0x8000_0000;
        const WRAP_NO_ENCRYPT = 0x8000_0001;
    }
}

bitflags! {
    /// Indicate requests for the context. Not all packages can support all requirements.
    ///
    /// # MSDN
    ///
    /// * [InitializeSecurityContextW function (fContextReq parameter)](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-initializesecuritycontextw)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClientRequestFlags: u32 {
        /// The server can use the context to authenticate to other servers as the client.
        const DELEGATE = 0x1;
        const MUTUAL_AUTH = 0x2;
        /// Detect replayed messages that have been encoded by using the `encrypt_message` method.
        const REPLAY_DETECT = 0x4;
        /// Detect messages received out of sequence.
        const SEQUENCE_DETECT = 0x8;
        /// Encrypt messages by using the `encrypt_message` method.
        const CONFIDENTIALITY = 0x10;
        const USE_SESSION_KEY = 0x20;
        const USE_SUPPLIED_CREDS = 0x80;
        /// The security package allocates output buffers for you.
        const ALLOCATE_MEMORY = 0x100;
        const CONNECTION = 0x800;
        const EXTENDED_ERROR = 0x4000;
        const STREAM = 0x8000;
        /// Sign messages and verify signatures.
        const INTEGRITY = 0x1_0000;
        const NULL_SESSION = 0x4_0000;
    }
}

bitflags! {
    /// Specify the attributes required by the server to establish the context.
    ///
    /// # MSDN
    ///
    /// * [AcceptSecurityContext function (fContextReq parameter)](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-acceptsecuritycontext)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ServerRequestFlags: u32 {
        const DELEGATE = 0x1;
        const MUTUAL_AUTH = 0x2;
        const REPLAY_DETECT = 0x4;
        const SEQUENCE_DETECT = 0x8;
        const CONFIDENTIALITY = 0x10;
        const USE_SESSION_KEY = 0x20;
        const ALLOCATE_MEMORY = 0x100;
        const CONNECTION = 0x800;
        const EXTENDED_ERROR = 0x8000;
        const STREAM = 0x1_0000;
        const INTEGRITY = 0x2_0000;
    }
}

bitflags! {
    /// Indicate the attributes of the established context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClientResponseFlags: u32 {
        const DELEGATE = 0x1;
        const MUTUAL_AUTH = 0x2;
        const REPLAY_DETECT = 0x4;
        const SEQUENCE_DETECT = 0x8;
        const CONFIDENTIALITY = 0x10;
        const USE_SESSION_KEY = 0x20;
        const USED_SUPPLIED_CREDS = 0x80;
        const ALLOCATED_MEMORY = 0x100;
        const CONNECTION = 0x800;
        const EXTENDED_ERROR = 0x4000;
        const STREAM = 0x8000;
        const INTEGRITY = 0x1_0000;
    }
}

bitflags! {
    /// Indicate the attributes of the established context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ServerResponseFlags: u32 {
        const DELEGATE = 0x1;
        const MUTUAL_AUTH = 0x2;
        const REPLAY_DETECT = 0x4;
        const SEQUENCE_DETECT = 0x8;
        const CONFIDENTIALITY = 0x10;
        const USE_SESSION_KEY = 0x20;
        const ALLOCATED_MEMORY = 0x100;
        const CONNECTION = 0x800;
        const EXTENDED_ERROR = 0x8000;
        const STREAM = 0x1_0000;
        const INTEGRITY = 0x2_0000;
    }
}

/// The data representation, such as byte ordering, on the target.
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum DataRepresentation {
    Network = 0,
    Native = 0x10,
}

/// Describes a buffer allocated by a transport application to pass to a security package.
///
/// The buffer owns its storage, so it is released on every exit path.
///
/// # MSDN
///
/// * [SecBuffer structure](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-secbuffer)
#[derive(Clone, Eq, PartialEq)]
pub struct SecurityBuffer {
    pub buffer: Vec<u8>,
    pub buffer_type: BufferType,
}

impl fmt::Debug for SecurityBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SecurityBuffer {{ buffer_type: {:?}, buffer: 0x",
            self.buffer_type
        )?;
        self.buffer.iter().try_for_each(|byte| write!(f, "{byte:02X}"))?;
        write!(f, " }}")
    }
}

impl SecurityBuffer {
    pub fn new(buffer: Vec<u8>, buffer_type: BufferType) -> Self {
        Self { buffer, buffer_type }
    }

    pub fn find_buffer(buffers: &[SecurityBuffer], buffer_type: BufferType) -> Result<&SecurityBuffer> {
        buffers.iter().find(|b| b.buffer_type == buffer_type).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidToken,
                format!("no buffer was provided with type {:?}", buffer_type),
            )
        })
    }

    pub fn find_buffer_mut(buffers: &mut [SecurityBuffer], buffer_type: BufferType) -> Result<&mut SecurityBuffer> {
        buffers.iter_mut().find(|b| b.buffer_type == buffer_type).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidToken,
                format!("no buffer was provided with type {:?}", buffer_type),
            )
        })
    }
}

/// Bit flags that indicate the type of buffer.
///
/// # MSDN
///
/// * [SecBuffer structure (BufferType parameter)](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-secbuffer)
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum BufferType {
    Empty = 0,
    /// The buffer contains common data. The security package can read and write this data.
    Data = 1,
    /// The buffer contains the security token portion of the message: a handshake token or a signature.
    Token = 2,
    Missing = 4,
    Extra = 5,
    Padding = 9,
    Stream = 10,
    /// The buffer contains channel binding information.
    ChannelBindings = 14,
}

/// A flag that indicates how the credentials are used.
///
/// # MSDN
///
/// * [AcquireCredentialsHandleW function (fCredentialUse parameter)](https://docs.microsoft.com/en-us/windows/win32/api/sspi/nf-sspi-acquirecredentialshandlew)
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum CredentialUse {
    Inbound = 1,
    Outbound = 2,
    Both = 3,
    Default = 4,
}

/// Represents the security principal in use.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum SecurityPackageType {
    Ntlm,
    Kerberos,
    Negotiate,
    CredSsp,
    Other(String),
}

impl fmt::Display for SecurityPackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityPackageType::Ntlm => write!(f, "{}", ntlm::PKG_NAME),
            SecurityPackageType::Kerberos => write!(f, "{}", kerberos::PKG_NAME),
            SecurityPackageType::Negotiate => write!(f, "{}", negotiate::PKG_NAME),
            SecurityPackageType::CredSsp => write!(f, "{}", credssp::PKG_NAME),
            SecurityPackageType::Other(name) => write!(f, "{}", name),
        }
    }
}

impl str::FromStr for SecurityPackageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            ntlm::PKG_NAME => SecurityPackageType::Ntlm,
            kerberos::PKG_NAME => SecurityPackageType::Kerberos,
            negotiate::PKG_NAME => SecurityPackageType::Negotiate,
            credssp::PKG_NAME => SecurityPackageType::CredSsp,
            s => SecurityPackageType::Other(s.to_string()),
        })
    }
}

/// General security package information.
///
/// # MSDN
///
/// * [SecPkgInfoW structure](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-secpkginfow)
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PackageInfo {
    pub capabilities: PackageCapabilities,
    pub rpc_id: u16,
    pub max_token_len: u32,
    pub name: SecurityPackageType,
    pub comment: String,
}

bitflags! {
    /// Set of bit flags that describes the capabilities of the security package.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PackageCapabilities: u32 {
        const INTEGRITY = 0x1;
        const PRIVACY = 0x2;
        const TOKEN_ONLY = 0x4;
        const DATAGRAM = 0x8;
        const CONNECTION = 0x10;
        const MULTI_REQUIRED = 0x20;
        const CLIENT_ONLY = 0x40;
        const EXTENDED_ERROR = 0x80;
        const IMPERSONATION = 0x100;
        const ACCEPT_WIN32_NAME = 0x200;
        const STREAM = 0x400;
        const NEGOTIABLE = 0x800;
        const GSS_COMPATIBLE = 0x1000;
        const LOGON = 0x2000;
        const ASCII_BUFFERS = 0x4000;
        const FRAGMENT = 0x8000;
        const MUTUAL_AUTH = 0x1_0000;
        const DELEGATION = 0x2_0000;
        const READONLY_WITH_CHECKSUM = 0x4_0000;
        const RESTRICTED_TOKENS = 0x8_0000;
        const NEGO_EXTENDER = 0x10_0000;
        const NEGOTIABLE2 = 0x20_0000;
        const APP_CONTAINER_PASSTHROUGH = 0x40_0000;
        const APP_CONTAINER_CHECKS = 0x80_0000;
    }
}

/// Indicates the sizes of important structures used in the message support functions.
///
/// # MSDN
///
/// * [SecPkgContext_Sizes structure](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-secpkgcontext_sizes)
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ContextSizes {
    pub max_token: u32,
    pub max_signature: u32,
    pub block: u32,
    pub security_trailer: u32,
}

/// Indicates the name of the user associated with a security context.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ContextNames {
    pub username: String,
    pub domain: Option<String>,
}

/// The exported session key of an established context.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    pub session_key: Secret<Vec<u8>>,
}

/// The kind of an SSPI related error. Enables to specify an error based on its type.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum ErrorKind {
    Unknown = 0,
    /// A caller-supplied buffer is too small for the produced data.
    InsufficientMemory = 0x8009_0300,
    /// The handle was never allocated or has already been invalidated.
    InvalidHandle = 0x8009_0301,
    /// The resolved package does not implement the requested operation.
    UnsupportedFunction = 0x8009_0302,
    TargetUnknown = 0x8009_0303,
    /// May correspond to any internal error (I/O error, RNG failure, etc.).
    InternalError = 0x8009_0304,
    /// No package is registered under the requested name.
    SecurityPackageNotFound = 0x8009_0305,
    /// Used in cases when supplied data is missing, malformed or of the wrong message type.
    InvalidToken = 0x8009_0308,
    LogonDenied = 0x8009_030C,
    UnknownCredentials = 0x8009_030D,
    NoCredentials = 0x8009_030E,
    /// An integrity check, a signature or the public key echo does not match.
    MessageAltered = 0x8009_030F,
    /// The operation is not valid for the current state of the context.
    OutOfSequence = 0x8009_0310,
    IncompleteMessage = 0x8009_0318,
    IncompleteCredentials = 0x8009_0320,
    BufferTooSmall = 0x8009_0321,
    WrongPrincipalName = 0x8009_0322,
    EncryptFailure = 0x8009_0329,
    DecryptFailure = 0x8009_0330,
    BadBindings = 0x8009_0346,
    InvalidParameter = 0x8009_035D,
    NoContext = 0x8009_0361,
}

/// Holds the `ErrorKind` and the description of the SSPI-related error.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
    pub nstatus: Option<NStatusCode>,
}

/// Handshake progress signals returned on success.
///
/// # MSDN
///
/// * [Security status codes](https://docs.microsoft.com/en-us/windows/win32/secauthn/sspi-status-codes)
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum SecurityStatus {
    Ok = 0,
    ContinueNeeded = 0x0009_0312,
    CompleteNeeded = 0x0009_0313,
    CompleteAndContinue = 0x0009_0314,
}

impl Error {
    /// Allows to fill a new error easily, supplying it with a coherent description.
    pub fn new(error_type: ErrorKind, description: impl ToString) -> Self {
        Self {
            error_type,
            description: description.to_string(),
            nstatus: None,
        }
    }

    /// Same as `new`, also keeping the NTSTATUS code reported by the peer.
    pub fn new_with_nstatus(error_type: ErrorKind, description: impl ToString, status_code: NStatusCode) -> Self {
        Self {
            error_type,
            description: description.to_string(),
            nstatus: Some(status_code),
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)?;

        if let Some(nstatus) = self.nstatus {
            write!(f, "; status is {}", nstatus)?;
        }

        Ok(())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            // in-memory decoding ran past the end of the token or met a malformed field
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => {
                Self::new(ErrorKind::InvalidToken, format!("malformed data: {}", err))
            }
            _ => Self::new(ErrorKind::InternalError, format!("IO error: {:?}", err)),
        }
    }
}

impl From<rand::Error> for Error {
    fn from(err: rand::Error) -> Self {
        Self::new(ErrorKind::InternalError, format!("Rand error: {:?}", err))
    }
}

impl From<picky_asn1_der::Asn1DerError> for Error {
    fn from(err: picky_asn1_der::Asn1DerError) -> Self {
        Self::new(ErrorKind::InvalidToken, format!("ASN.1 DER error: {:?}", err))
    }
}

impl From<string::FromUtf16Error> for Error {
    fn from(err: string::FromUtf16Error) -> Self {
        Self::new(ErrorKind::InvalidToken, format!("UTF-16 error: {:?}", err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::new(io::ErrorKind::Other, format!("{:?}: {}", err.error_type, err.description))
    }
}
