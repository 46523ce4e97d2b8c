//! The Kerberos package as seen by the dispatch layer.
//!
//! Only the credentials contract is implemented: the identity is kept so that a caller can select the
//! package and query it, but no ticket is ever requested, so every context operation reports
//! `UnsupportedFunction`.

use std::sync::LazyLock;

use crate::{
    AcceptSecurityContextResult, AcquireCredentialsHandleResult, AuthIdentity, AuthIdentityBuffers, ContextNames,
    ContextSizes, DecryptionFlags, EncryptionFlags, Error, ErrorKind, FilledAcceptSecurityContext,
    FilledAcquireCredentialsHandle, FilledInitializeSecurityContext, InitializeSecurityContextResult,
    PackageCapabilities, PackageInfo, Result, SecurityBuffer, SecurityPackageType, SecurityStatus, SessionKeys, Sspi,
    SspiImpl, PACKAGE_ID_NONE,
};

pub const PKG_NAME: &str = "Kerberos";

pub static PACKAGE_INFO: LazyLock<PackageInfo> = LazyLock::new(|| PackageInfo {
    capabilities: PackageCapabilities::empty(),
    rpc_id: PACKAGE_ID_NONE,
    max_token_len: 0xbb80, // 48 000 bytes: default maximum token len in Windows
    name: SecurityPackageType::Kerberos,
    comment: String::from("Kerberos Security Package"),
});

#[derive(Debug, Clone, Default)]
pub struct Kerberos {
    identity: Option<AuthIdentityBuffers>,
}

impl Kerberos {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unsupported(operation: &str) -> Error {
    Error::new(
        ErrorKind::UnsupportedFunction,
        format!("{} is not supported by the Kerberos package", operation),
    )
}

impl SspiImpl for Kerberos {
    type CredentialsHandle = Option<AuthIdentityBuffers>;
    type AuthenticationData = AuthIdentity;

    #[instrument(level = "trace", ret, skip_all)]
    fn acquire_credentials_handle_impl(
        &mut self,
        builder: FilledAcquireCredentialsHandle<'_, Self::CredentialsHandle, Self::AuthenticationData>,
    ) -> Result<AcquireCredentialsHandleResult<Self::CredentialsHandle>> {
        self.identity = builder.auth_data.map(AuthIdentityBuffers::from);

        Ok(AcquireCredentialsHandleResult {
            credentials_handle: self.identity.clone(),
            expiry: None,
        })
    }

    fn initialize_security_context_impl(
        &mut self,
        _builder: &mut FilledInitializeSecurityContext<'_, Self::CredentialsHandle>,
    ) -> Result<InitializeSecurityContextResult> {
        Err(unsupported("initialize_security_context"))
    }

    fn accept_security_context_impl(
        &mut self,
        _builder: FilledAcceptSecurityContext<'_, Self::CredentialsHandle>,
    ) -> Result<AcceptSecurityContextResult> {
        Err(unsupported("accept_security_context"))
    }
}

impl Sspi for Kerberos {
    fn complete_auth_token(&mut self, _token: &mut [SecurityBuffer]) -> Result<SecurityStatus> {
        Err(unsupported("complete_auth_token"))
    }

    fn encrypt_message(
        &mut self,
        _flags: EncryptionFlags,
        _message: &mut [SecurityBuffer],
        _sequence_number: u32,
    ) -> Result<SecurityStatus> {
        Err(unsupported("encrypt_message"))
    }

    fn decrypt_message(&mut self, _message: &mut [SecurityBuffer], _sequence_number: u32) -> Result<DecryptionFlags> {
        Err(unsupported("decrypt_message"))
    }

    fn query_context_sizes(&mut self) -> Result<ContextSizes> {
        Err(unsupported("query_context_sizes"))
    }

    fn query_context_names(&mut self) -> Result<ContextNames> {
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

    fn query_context_package_info(&mut self) -> Result<PackageInfo> {
        Ok(PACKAGE_INFO.clone())
    }

    fn query_context_session_key(&self) -> Result<SessionKeys> {
        Err(unsupported("query_context_session_key"))
    }
}
