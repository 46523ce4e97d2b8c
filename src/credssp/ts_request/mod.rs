
use core::fmt;
use std::io::{self, Read};

use picky_asn1::wrapper::{ExplicitContextTag0, ExplicitContextTag1, IntegerAsn1, OctetStringAsn1};
use picky_krb::constants::cred_ssp::{TS_PASSWORD_CREDS, TS_SMART_CARD_CREDS};
use picky_krb::credssp::{TsCredentials, TsPasswordCreds};

use crate::{ber, AuthIdentityBuffers, Error, ErrorKind};

/// The `TSRequest` version written by default. Version 2 carries no error code and no client nonce.
pub const TS_REQUEST_VERSION: u32 = 2;

pub const NONCE_SIZE: usize = 32;

/// Upper bound for a single octet string field, so that every enclosing length still fits into `u16`.
const MAX_FIELD_LEN: u16 = 0xFF00;

/// Used for communication in the CredSSP [client](crate::CredSspClient) and
/// [server](crate::CredSspServer). It's a top-most structure that they use.
///
/// ```text
/// TSRequest ::= SEQUENCE {
///     version     [0] INTEGER,
///     negoTokens  [1] NegoData OPTIONAL,
///     authInfo    [2] OCTET STRING OPTIONAL,
///     pubKeyAuth  [3] OCTET STRING OPTIONAL,
///     errorCode   [4] INTEGER OPTIONAL,
///     clientNonce [5] OCTET STRING OPTIONAL
/// }
/// ```
///
/// # MSDN
///
/// * [TSRequest](https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-cssp/6aac4dea-08ef-47a6-8747-22ea7f6d8685)
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TsRequest {
    /// Specifies the supported version of the CredSSP protocol.
    pub version: u32,
    /// Contains the NTLM messages that are passed between the client and server.
    pub nego_tokens: Option<Vec<u8>>,
    /// Contains the user's credentials that are delegated to the server.
    pub auth_info: Option<Vec<u8>>,
    /// Used to assure that the public key that is used by the server during
    /// the TLS handshake belongs to the target server and not to a man-in-the-middle.
    pub pub_key_auth: Option<Vec<u8>>,
    /// If the exchange fails on the server, this field is used to send the failure code to the client.
    pub error_code: Option<NStatusCode>,
    /// Random bytes mixed into the public key hash since version 5.
    pub client_nonce: Option<[u8; NONCE_SIZE]>,
}

impl Default for TsRequest {
    fn default() -> Self {
        Self {
            version: TS_REQUEST_VERSION,
            nego_tokens: None,
            auth_info: None,
            pub_key_auth: None,
            error_code: None,
            client_nonce: None,
        }
    }
}

impl TsRequest {
    /// Returns the length of the whole encoded request from its first bytes, so that a transport can read
    /// exactly one request off the wire.
    pub fn read_length(mut stream: impl io::Read) -> io::Result<usize> {
        let ts_request_len = ber::read_sequence_tag(&mut stream)?;

        Ok(usize::from(ber::sizeof_sequence(ts_request_len)))
    }

    /// Decodes a `TsRequest`. Every inner length is checked against the bytes left in the buffer.
    pub fn from_buffer(buffer: &[u8]) -> io::Result<TsRequest> {
        let mut stream = io::Cursor::new(buffer);

        if buffer.len() < TsRequest::read_length(&mut stream)? {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "incomplete buffer"));
        }

        ber::read_contextual_tag(&mut stream, 0, ber::Pc::Construct)?;
        let version = u32::try_from(ber::read_integer(&mut stream)?)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "the version does not fit into 32 bits"))?;

        let nego_tokens = if ber::read_contextual_tag_or_unwind(&mut stream, 1, ber::Pc::Construct)?.is_some() {
            ber::read_sequence_tag(&mut stream)?; /* SEQUENCE OF NegoDataItem */
            ber::read_sequence_tag(&mut stream)?; /* NegoDataItem */
            ber::read_contextual_tag(&mut stream, 0, ber::Pc::Construct)?;

            Some(ber::read_octet_string(&mut stream)?)
        } else {
            None
        };

        let auth_info = read_optional_octet_string(&mut stream, 2)?;
        let pub_key_auth = read_optional_octet_string(&mut stream, 3)?;

        let error_code =
            if version >= 3 && ber::read_contextual_tag_or_unwind(&mut stream, 4, ber::Pc::Construct)?.is_some() {
                // NTSTATUS values are negative when read as a signed integer: keep the low 32 bits
                Some(NStatusCode(ber::read_integer(&mut stream)? as u32))
            } else {
                None
            };

        let client_nonce =
            if version >= 5 && ber::read_contextual_tag_or_unwind(&mut stream, 5, ber::Pc::Construct)?.is_some() {
                let length = ber::read_octet_string_tag(&mut stream)?;
                if usize::from(length) != NONCE_SIZE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("got ClientNonce with invalid length: {}", length),
                    ));
                }

                let mut client_nonce = [0x00; NONCE_SIZE];
                stream.read_exact(&mut client_nonce)?;

                Some(client_nonce)
            } else {
                None
            };

        Ok(TsRequest {
            version,
            nego_tokens,
            auth_info,
            pub_key_auth,
            error_code,
            client_nonce,
        })
    }

    /// Encodes the `TsRequest` to be ready to be sent to the TLS stream.
    pub fn encode_ts_request(&self, mut buffer: impl io::Write) -> io::Result<()> {
        let len = self.ts_request_len()?;

        ber::write_sequence_tag(&mut buffer, len)?;
        /* [0] version */
        ber::write_contextual_tag(&mut buffer, 0, ber::sizeof_integer(self.version), ber::Pc::Construct)?;
        ber::write_integer(&mut buffer, self.version)?;

        /* [1] negoTokens (NegoData) */
        if let Some(nego_tokens) = &self.nego_tokens {
            let nego_data_item_len = ber::sizeof_sequence_octet_string(field_len(nego_tokens)?);

            ber::write_contextual_tag(
                &mut buffer,
                1,
                ber::sizeof_sequence(ber::sizeof_sequence(nego_data_item_len)),
                ber::Pc::Construct,
            )?;
            ber::write_sequence_tag(&mut buffer, ber::sizeof_sequence(nego_data_item_len))?; /* SEQUENCE OF NegoDataItem */
            ber::write_sequence_tag(&mut buffer, nego_data_item_len)?; /* NegoDataItem */
            ber::write_sequence_octet_string(&mut buffer, 0, nego_tokens)?; /* OCTET STRING */
        }

        /* [2] authInfo (OCTET STRING) */
        if let Some(auth_info) = &self.auth_info {
            ber::write_sequence_octet_string(&mut buffer, 2, auth_info)?;
        }

        /* [3] pubKeyAuth (OCTET STRING) */
        if let Some(pub_key_auth) = &self.pub_key_auth {
            ber::write_sequence_octet_string(&mut buffer, 3, pub_key_auth)?;
        }

        /* [4] errorCode (INTEGER) */
        if let Some(error_code) = self.error_code.filter(|_| self.version >= 3) {
            ber::write_contextual_tag(&mut buffer, 4, ber::sizeof_integer(error_code.0), ber::Pc::Construct)?;
            ber::write_integer(&mut buffer, error_code.0)?;
        }

        /* [5] clientNonce (OCTET STRING) */
        if let Some(client_nonce) = self.client_nonce.as_ref().filter(|_| self.version >= 5) {
            ber::write_sequence_octet_string(&mut buffer, 5, client_nonce)?;
        }

        Ok(())
    }

    /// Length of the whole encoded request.
    pub fn buffer_len(&self) -> io::Result<usize> {
        Ok(usize::from(ber::sizeof_sequence(self.ts_request_len()?)))
    }

    pub fn check_error(&self) -> crate::Result<()> {
        match self.error_code {
            Some(error_code) if error_code != NStatusCode::SUCCESS => Err(Error::new_with_nstatus(
                ErrorKind::InvalidToken,
                "CredSSP server returned an error status",
                error_code,
            )),
            _ => Ok(()),
        }
    }

    /// Content length of the outer sequence.
    fn ts_request_len(&self) -> io::Result<u16> {
        let version_len = ber::sizeof_integer(self.version);
        let mut len = usize::from(ber::sizeof_contextual_tag(version_len) + version_len);

        if let Some(nego_tokens) = &self.nego_tokens {
            let item = ber::sizeof_sequence(ber::sizeof_sequence_octet_string(field_len(nego_tokens)?));
            let items = ber::sizeof_sequence(item);

            len += usize::from(ber::sizeof_contextual_tag(items)) + usize::from(items);
        }

        for field in [&self.auth_info, &self.pub_key_auth].into_iter().flatten() {
            len += usize::from(ber::sizeof_sequence_octet_string(field_len(field)?));
        }

        if let Some(error_code) = self.error_code.filter(|_| self.version >= 3) {
            let error_code_len = ber::sizeof_integer(error_code.0);

            len += usize::from(ber::sizeof_contextual_tag(error_code_len) + error_code_len);
        }

        if self.client_nonce.is_some() && self.version >= 5 {
            len += usize::from(ber::sizeof_sequence_octet_string(NONCE_SIZE as u16));
        }

        u16::try_from(len)
            .ok()
            // the length header of the outer sequence must fit as well
            .filter(|len| *len <= u16::MAX - 4)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("TSRequest is too long: {}", len)))
    }
}

/// Encodes the delegated password credentials:
///
/// ```text
/// TSCredentials ::= SEQUENCE {
///     credType    [0] INTEGER,
///     credentials [1] OCTET STRING
/// }
///
/// TSPasswordCreds ::= SEQUENCE {
///     domainName  [0] OCTET STRING,
///     userName    [1] OCTET STRING,
///     password    [2] OCTET STRING
/// }
/// ```
#[instrument(level = "trace", skip_all)]
pub fn write_ts_credentials(credentials: &AuthIdentityBuffers) -> crate::Result<Vec<u8>> {
    let ts_creds = TsCredentials {
        cred_type: ExplicitContextTag0::from(IntegerAsn1::from(vec![TS_PASSWORD_CREDS])),
        credentials: ExplicitContextTag1::from(OctetStringAsn1::from(write_password_credentials(credentials)?)),
    };

    Ok(picky_asn1_der::to_vec(&ts_creds)?)
}

fn write_password_credentials(credentials: &AuthIdentityBuffers) -> io::Result<Vec<u8>> {
    let password_creds_len = sizeof_ts_password_creds(credentials)?;

    let mut buffer = Vec::with_capacity(usize::from(ber::sizeof_sequence(password_creds_len)));

    /* TSPasswordCreds (SEQUENCE) */
    ber::write_sequence_tag(&mut buffer, password_creds_len)?;
    /* [0] domainName (OCTET STRING) */
    ber::write_sequence_octet_string(&mut buffer, 0, &credentials.domain)?;
    /* [1] userName (OCTET STRING) */
    ber::write_sequence_octet_string(&mut buffer, 1, &credentials.user)?;
    /* [2] password (OCTET STRING) */
    ber::write_sequence_octet_string(&mut buffer, 2, credentials.password.as_ref())?;

    Ok(buffer)
}

pub fn read_ts_credentials(buffer: &[u8]) -> crate::Result<AuthIdentityBuffers> {
    let ts_credentials: TsCredentials = picky_asn1_der::from_bytes(buffer)?;

    match ts_credentials.cred_type.0 .0.as_slice() {
        [TS_PASSWORD_CREDS] => read_password_credentials(&ts_credentials.credentials.0 .0),
        [TS_SMART_CARD_CREDS] => Err(Error::new(
            ErrorKind::UnsupportedFunction,
            "Reading of the TsSmartCard credentials is not supported",
        )),
        [] => Err(Error::new(
            ErrorKind::InvalidToken,
            "TsCredentials::cred_type field is empty",
        )),
        cred_type => Err(Error::new(
            ErrorKind::InvalidToken,
            format!("Invalid or unsupported TsCredentials::cred_type value: {:?}", cred_type),
        )),
    }
}

fn read_password_credentials(buffer: &[u8]) -> crate::Result<AuthIdentityBuffers> {
    let TsPasswordCreds {
        domain_name,
        user_name,
        password,
    } = picky_asn1_der::from_bytes(buffer)?;

    Ok(AuthIdentityBuffers {
        user: user_name.0 .0,
        domain: domain_name.0 .0,
        password: password.0 .0.into(),
    })
}

fn sizeof_ts_password_creds(identity: &AuthIdentityBuffers) -> io::Result<u16> {
    let len = [
        identity.domain.as_slice(),
        identity.user.as_slice(),
        identity.password.as_ref().as_slice(),
    ]
    .into_iter()
    .map(|field| field_len(field).map(|len| usize::from(ber::sizeof_sequence_octet_string(len))))
    .sum::<io::Result<usize>>()?;

    u16::try_from(len)
        .ok()
        .filter(|len| *len <= MAX_FIELD_LEN)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("credentials are too long: {}", len)))
}

fn field_len(value: &[u8]) -> io::Result<u16> {
    let len = ber::checked_len(value)?;

    if len > MAX_FIELD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("field is too long: {} bytes", len),
        ));
    }

    Ok(len)
}

fn read_optional_octet_string(stream: &mut io::Cursor<&[u8]>, tagnum: u8) -> io::Result<Option<Vec<u8>>> {
    if ber::read_contextual_tag_or_unwind(stream, tagnum, ber::Pc::Construct)?.is_some() {
        ber::read_octet_string(stream).map(Some)
    } else {
        Ok(None)
    }
}

/// An NTSTATUS code carried in the `errorCode` field.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NStatusCode(pub u32);

impl NStatusCode {
    pub const SUCCESS: Self = Self(0x0000_0000);
    pub const NO_LOGON_SERVERS: Self = Self(0xc000_005e);
    pub const NO_SUCH_USER: Self = Self(0xc000_0064);
    pub const WRONG_PASSWORD: Self = Self(0xc000_006a);
    pub const LOGON_FAILURE: Self = Self(0xc000_006d);
    pub const ACCOUNT_RESTRICTION: Self = Self(0xc000_006e);
    pub const INVALID_LOGON_HOURS: Self = Self(0xc000_006f);
    pub const INVALID_WORKSTATION: Self = Self(0xc000_0070);
    pub const PASSWORD_EXPIRED: Self = Self(0xc000_0071);
    pub const ACCOUNT_DISABLED: Self = Self(0xc000_0072);
    pub const LOGON_TYPE_NOT_GRANTED: Self = Self(0xc000_015b);
    pub const PASSWORD_MUST_CHANGE: Self = Self(0xc000_0224);
    pub const ACCOUNT_LOCKED_OUT: Self = Self(0xc000_0234);

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "STATUS_SUCCESS",
            Self::NO_LOGON_SERVERS => "STATUS_NO_LOGON_SERVERS",
            Self::NO_SUCH_USER => "STATUS_NO_SUCH_USER",
            Self::WRONG_PASSWORD => "STATUS_WRONG_PASSWORD",
            Self::LOGON_FAILURE => "STATUS_LOGON_FAILURE",
            Self::ACCOUNT_RESTRICTION => "STATUS_ACCOUNT_RESTRICTION",
            Self::INVALID_LOGON_HOURS => "STATUS_INVALID_LOGON_HOURS",
            Self::INVALID_WORKSTATION => "STATUS_INVALID_WORKSTATION",
            Self::PASSWORD_EXPIRED => "STATUS_PASSWORD_EXPIRED",
            Self::ACCOUNT_DISABLED => "STATUS_ACCOUNT_DISABLED",
            Self::LOGON_TYPE_NOT_GRANTED => "STATUS_LOGON_TYPE_NOT_GRANTED",
            Self::PASSWORD_MUST_CHANGE => "STATUS_PASSWORD_MUST_CHANGE",
            Self::ACCOUNT_LOCKED_OUT => "STATUS_ACCOUNT_LOCKED_OUT",
            _ => return None,
        };

        Some(name)
    }
}

impl fmt::Debug for NStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NStatusCode({:#x})", self.0)
    }
}

impl fmt::Display for NStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = self.name() {
            write!(f, "{name} [{:#x}]", self.0)
        } else {
            write!(f, "NSTATUS code {:#x}", self.0)
        }
    }
}
