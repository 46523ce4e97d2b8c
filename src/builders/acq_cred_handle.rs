use std::fmt;
use std::marker::PhantomData;

use time::OffsetDateTime;

use super::ToAssign;
use crate::{CredentialUse, SspiImpl};

pub type EmptyAcquireCredentialsHandle<'a, C, A> = AcquireCredentialsHandle<'a, C, A, WithoutCredentialUse>;
pub type FilledAcquireCredentialsHandle<'a, C, A> = AcquireCredentialsHandle<'a, C, A, WithCredentialUse>;

/// Contains data returned by calling the `execute` method of the `AcquireCredentialsHandle` builder.
#[derive(Debug, Clone)]
pub struct AcquireCredentialsHandleResult<C> {
    pub credentials_handle: C,
    pub expiry: Option<OffsetDateTime>,
}

/// A builder to execute one of the SSPI functions. Returned by the `acquire_credentials_handle` method.
///
/// # Requirements for execution
///
/// These methods are required to be called before calling the `execute` method
/// * [`with_credential_use`](struct.AcquireCredentialsHandle.html#method.with_credential_use)
pub struct AcquireCredentialsHandle<'a, CredsHandle, AuthData, CredentialUseSet>
where
    CredentialUseSet: ToAssign,
{
    phantom_cred_handle: PhantomData<CredsHandle>,
    phantom_cred_use_set: PhantomData<CredentialUseSet>,

    pub credential_use: CredentialUse,
    pub principal_name: Option<&'a str>,
    pub auth_data: Option<&'a AuthData>,
}

impl<CredsHandle, AuthData: fmt::Debug, CredentialUseSet: ToAssign> fmt::Debug
    for AcquireCredentialsHandle<'_, CredsHandle, AuthData, CredentialUseSet>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquireCredentialsHandle")
            .field("credential_use", &self.credential_use)
            .field("principal_name", &self.principal_name)
            .field("auth_data", &self.auth_data)
            .finish()
    }
}

impl<'a, CredsHandle, AuthData> EmptyAcquireCredentialsHandle<'a, CredsHandle, AuthData> {
    pub fn new() -> Self {
        Self {
            phantom_cred_handle: PhantomData,
            phantom_cred_use_set: PhantomData,

            credential_use: CredentialUse::Inbound,
            principal_name: None,
            auth_data: None,
        }
    }

    /// Specifies a flag that indicates how these credentials will be used.
    pub fn with_credential_use(
        self,
        credential_use: CredentialUse,
    ) -> FilledAcquireCredentialsHandle<'a, CredsHandle, AuthData> {
        AcquireCredentialsHandle {
            phantom_cred_handle: PhantomData,
            phantom_cred_use_set: PhantomData,

            credential_use,
            principal_name: self.principal_name,
            auth_data: self.auth_data,
        }
    }
}

impl<CredsHandle, AuthData> Default for EmptyAcquireCredentialsHandle<'_, CredsHandle, AuthData> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, CredsHandle, AuthData, CredentialUseSet: ToAssign>
    AcquireCredentialsHandle<'a, CredsHandle, AuthData, CredentialUseSet>
{
    /// Specifies the name of the principal whose credentials the handle will reference.
    pub fn with_principal_name(self, principal_name: &'a str) -> Self {
        Self {
            principal_name: Some(principal_name),
            ..self
        }
    }

    /// Specifies the authentication data (the user's identity) the credentials are built from.
    pub fn with_auth_data(self, auth_data: &'a AuthData) -> Self {
        Self {
            auth_data: Some(auth_data),
            ..self
        }
    }
}

impl<CredsHandle, AuthData> FilledAcquireCredentialsHandle<'_, CredsHandle, AuthData> {
    /// Executes the SSPI function that the builder represents.
    pub fn execute<I>(self, inner: &mut I) -> crate::Result<AcquireCredentialsHandleResult<CredsHandle>>
    where
        I: SspiImpl<CredentialsHandle = CredsHandle, AuthenticationData = AuthData>,
    {
        inner.acquire_credentials_handle_impl(self)
    }
}

/// Simulates the presence of the `credential_use` value of the `AcquireCredentialsHandle` builder.
#[derive(Debug)]
pub struct WithCredentialUse;
impl ToAssign for WithCredentialUse {}

/// Simulates the absence of the `credential_use` value of the `AcquireCredentialsHandle` builder.
#[derive(Debug)]
pub struct WithoutCredentialUse;
impl ToAssign for WithoutCredentialUse {}
