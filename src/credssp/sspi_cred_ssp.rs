use super::PACKAGE_INFO;
use crate::{
    AcceptSecurityContextResult, AcquireCredentialsHandleResult, AuthIdentity, AuthIdentityBuffers, ContextNames,
    ContextSizes, DecryptionFlags, EncryptionFlags, Error, ErrorKind, FilledAcceptSecurityContext,
    FilledAcquireCredentialsHandle, FilledInitializeSecurityContext, InitializeSecurityContextResult, PackageInfo,
    SecurityBuffer, SecurityStatus, SessionKeys, Sspi, SspiImpl,
};

/// The CREDSSP package as it is reachable through the dispatch layer.
///
/// CredSSP needs a transport and the peer's public key, so the handshake itself is driven by
/// [CredSspClient](super::CredSspClient) and [CredSspServer](super::CredSspServer). Through the generic interface
/// the package only stores credentials and answers queries.
#[derive(Debug, Clone, Default)]
pub struct SspiCredSsp {
    identity: Option<AuthIdentityBuffers>,
}

impl SspiCredSsp {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unsupported(operation: &str) -> Error {
    Error::new(
        ErrorKind::UnsupportedFunction,
        format!("{} is not available for CredSSP through the generic interface", operation),
    )
}

impl SspiImpl for SspiCredSsp {
    type CredentialsHandle = Option<AuthIdentityBuffers>;
    type AuthenticationData = AuthIdentity;

    #[instrument(level = "trace", ret, skip_all)]
    fn acquire_credentials_handle_impl(
        &mut self,
        builder: FilledAcquireCredentialsHandle<'_, Self::CredentialsHandle, Self::AuthenticationData>,
    ) -> crate::Result<AcquireCredentialsHandleResult<Self::CredentialsHandle>> {
        self.identity = builder.auth_data.map(AuthIdentityBuffers::from);

        Ok(AcquireCredentialsHandleResult {
            credentials_handle: self.identity.clone(),
            expiry: None,
        })
    }

    fn initialize_security_context_impl(
        &mut self,
        _builder: &mut FilledInitializeSecurityContext<'_, Self::CredentialsHandle>,
    ) -> crate::Result<InitializeSecurityContextResult> {
        Err(unsupported("initialize_security_context"))
    }

    fn accept_security_context_impl(
        &mut self,
        _builder: FilledAcceptSecurityContext<'_, Self::CredentialsHandle>,
    ) -> crate::Result<AcceptSecurityContextResult> {
        Err(unsupported("accept_security_context"))
    }
}

impl Sspi for SspiCredSsp {
    fn complete_auth_token(&mut self, _token: &mut [SecurityBuffer]) -> crate::Result<SecurityStatus> {
        Err(unsupported("complete_auth_token"))
    }

    fn encrypt_message(
        &mut self,
        _flags: EncryptionFlags,
        _message: &mut [SecurityBuffer],
        _sequence_number: u32,
    ) -> crate::Result<SecurityStatus> {
        Err(unsupported("encrypt_message"))
    }

    fn decrypt_message(
        &mut self,
        _message: &mut [SecurityBuffer],
        _sequence_number: u32,
    ) -> crate::Result<DecryptionFlags> {
        Err(unsupported("decrypt_message"))
    }

    fn query_context_sizes(&mut self) -> crate::Result<ContextSizes> {
        Err(unsupported("query_context_sizes"))
    }

    fn query_context_names(&mut self) -> crate::Result<ContextNames> {
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NoCredentials, "no credentials were provided"))?;
        let identity = AuthIdentity::try_from(identity)?;

        Ok(ContextNames {
            username: identity.username,
            domain: identity.domain,
        })
    }

    fn query_context_package_info(&mut self) -> crate::Result<PackageInfo> {
        Ok(PACKAGE_INFO.clone())
    }

    fn query_context_session_key(&self) -> crate::Result<SessionKeys> {
        Err(unsupported("query_context_session_key"))
    }
}
