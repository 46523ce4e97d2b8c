use std::sync::LazyLock;

use crate::ntlm::NtlmConfig;
use crate::{
    ntlm, AcceptSecurityContextResult, AcquireCredentialsHandleResult, AuthIdentity, AuthIdentityBuffers,
    ContextNames, ContextSizes, DecryptionFlags, EncryptionFlags, FilledAcceptSecurityContext,
    FilledAcquireCredentialsHandle, FilledInitializeSecurityContext, InitializeSecurityContextResult, Ntlm,
    PackageCapabilities, PackageInfo, Result, SecurityBuffer, SecurityPackageType, SecurityStatus, SessionKeys, Sspi,
    SspiImpl, PACKAGE_ID_NONE,
};

pub const PKG_NAME: &str = "Negotiate";

pub static PACKAGE_INFO: LazyLock<PackageInfo> = LazyLock::new(|| PackageInfo {
    capabilities: PackageCapabilities::empty(),
    rpc_id: PACKAGE_ID_NONE,
    max_token_len: 0xbb80, // 48 000 bytes: default maximum token len in Windows
    name: SecurityPackageType::Negotiate,
    comment: String::from("Microsoft Package Negotiator"),
});

/// The Negotiate package. Kerberos cannot establish a context here, so the negotiated protocol is always NTLM.
#[derive(Debug, Clone)]
pub struct Negotiate {
    protocol: Ntlm,
}

impl Negotiate {
    pub fn new(config: NtlmConfig) -> Self {
        Self {
            protocol: Ntlm::with_config(config),
        }
    }

    pub fn protocol_name(&self) -> &str {
        ntlm::PKG_NAME
    }

    /// Information about the package that actually runs the exchange.
    pub fn query_context_negotiation_package(&mut self) -> Result<PackageInfo> {
        self.protocol.query_context_package_info()
    }
}

impl Default for Negotiate {
    fn default() -> Self {
        Self::new(NtlmConfig::default())
    }
}

impl SspiImpl for Negotiate {
    type CredentialsHandle = Option<AuthIdentityBuffers>;
    type AuthenticationData = AuthIdentity;

    #[instrument(ret, fields(protocol = self.protocol_name()), skip_all)]
    fn acquire_credentials_handle_impl(
        &mut self,
        builder: FilledAcquireCredentialsHandle<'_, Self::CredentialsHandle, Self::AuthenticationData>,
    ) -> Result<AcquireCredentialsHandleResult<Self::CredentialsHandle>> {
        self.protocol.acquire_credentials_handle_impl(builder)
    }

    #[instrument(ret, fields(protocol = self.protocol_name()), skip_all)]
    fn initialize_security_context_impl(
        &mut self,
        builder: &mut FilledInitializeSecurityContext<'_, Self::CredentialsHandle>,
    ) -> Result<InitializeSecurityContextResult> {
        self.protocol.initialize_security_context_impl(builder)
    }

    #[instrument(ret, fields(protocol = self.protocol_name()), skip_all)]
    fn accept_security_context_impl(
        &mut self,
        builder: FilledAcceptSecurityContext<'_, Self::CredentialsHandle>,
    ) -> Result<AcceptSecurityContextResult> {
        self.protocol.accept_security_context_impl(builder)
    }
}

impl Sspi for Negotiate {
    #[instrument(ret, fields(protocol = self.protocol_name()), skip(self))]
    fn complete_auth_token(&mut self, token: &mut [SecurityBuffer]) -> Result<SecurityStatus> {
        self.protocol.complete_auth_token(token)
    }

    #[instrument(ret, fields(protocol = self.protocol_name()), skip_all)]
    fn encrypt_message(
        &mut self,
        flags: EncryptionFlags,
        message: &mut [SecurityBuffer],
        sequence_number: u32,
    ) -> Result<SecurityStatus> {
        self.protocol.encrypt_message(flags, message, sequence_number)
    }

    #[instrument(ret, fields(protocol = self.protocol_name()), skip_all)]
    fn decrypt_message(&mut self, message: &mut [SecurityBuffer], sequence_number: u32) -> Result<DecryptionFlags> {
        self.protocol.decrypt_message(message, sequence_number)
    }

    #[instrument(ret, fields(protocol = self.protocol_name()), skip_all)]
    fn query_context_sizes(&mut self) -> Result<ContextSizes> {
        self.protocol.query_context_sizes()
    }

    #[instrument(ret, fields(protocol = self.protocol_name()), skip_all)]
    fn query_context_names(&mut self) -> Result<ContextNames> {
        self.protocol.query_context_names()
    }

    #[instrument(ret, fields(protocol = self.protocol_name()), skip_all)]
    fn query_context_package_info(&mut self) -> Result<PackageInfo> {
        Ok(PACKAGE_INFO.clone())
    }

    #[instrument(fields(protocol = self.protocol_name()), skip_all)]
    fn query_context_session_key(&self) -> Result<SessionKeys> {
        self.protocol.query_context_session_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferType, ClientRequestFlags, CredentialUse, DataRepresentation};

    #[test]
    fn produces_ntlm_negotiate_message() {
        let identity = AuthIdentity {
            username: String::from("user"),
            password: String::from("password").into(),
            domain: None,
        };
        let mut negotiate = Negotiate::default();
        let mut credentials_handle = negotiate
            .acquire_credentials_handle()
            .with_credential_use(CredentialUse::Outbound)
            .with_auth_data(&identity)
            .execute(&mut negotiate)
            .unwrap()
            .credentials_handle;
        let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];

        let result = negotiate
            .initialize_security_context()
            .with_credentials_handle(&mut credentials_handle)
            .with_context_requirements(ClientRequestFlags::CONFIDENTIALITY)
            .with_target_data_representation(DataRepresentation::Native)
            .with_output(&mut output)
            .execute(&mut negotiate)
            .unwrap();

        assert_eq!(result.status, SecurityStatus::ContinueNeeded);
        assert_eq!(&output[0].buffer[..8], b"NTLMSSP\0");
    }

    #[test]
    fn reports_both_packages() {
        let mut negotiate = Negotiate::default();

        assert_eq!(
            negotiate.query_context_package_info().unwrap().name,
            SecurityPackageType::Negotiate
        );
        assert_eq!(
            negotiate.query_context_negotiation_package().unwrap().name,
            SecurityPackageType::Ntlm
        );
    }
}
