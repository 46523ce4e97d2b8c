//! Package dispatch: resolves security packages by name and keeps the credentials and contexts created
//! through the generic entry points behind opaque handles.
//!
//! The table is process-wide. It is set up by [`initialize`] or by the first call that needs it, and
//! [`shutdown`] drops every credential and context it still owns.

mod handle;
#[cfg(test)]
mod test;

use std::sync::{LazyLock, Mutex, MutexGuard};

use self::handle::{Handle, HandleTable};
use crate::credssp::{self, SspiCredSsp};
use crate::{
    kerberos, negotiate, ntlm, AcceptSecurityContextResult, AcquireCredentialsHandleResult, AuthIdentity,
    AuthIdentityBuffers, BufferType, ClientRequestFlags, ContextNames, ContextSizes, CredentialUse,
    DataRepresentation, DecryptionFlags, EncryptionFlags, Error, ErrorKind, FilledAcceptSecurityContext,
    FilledAcquireCredentialsHandle, FilledInitializeSecurityContext, InitializeSecurityContextResult, Kerberos,
    Negotiate, Ntlm, PackageInfo, Result, SecurityBuffer, SecurityPackageType, SecurityStatus, ServerRequestFlags,
    SessionKeys, Sspi, SspiImpl,
};

/// A context of any package known to the registry.
#[derive(Debug, Clone)]
pub enum SspiContext {
    Ntlm(Ntlm),
    Kerberos(Kerberos),
    Negotiate(Negotiate),
    CredSsp(SspiCredSsp),
}

impl SspiContext {
    /// Creates a fresh context of the named package.
    pub fn new(package_name: &str) -> Result<Self> {
        let package = find_package(package_name)?;

        Ok(match &package.name {
            SecurityPackageType::Ntlm => SspiContext::Ntlm(Ntlm::new()),
            SecurityPackageType::Kerberos => SspiContext::Kerberos(Kerberos::new()),
            SecurityPackageType::Negotiate => SspiContext::Negotiate(Negotiate::default()),
            SecurityPackageType::CredSsp => SspiContext::CredSsp(SspiCredSsp::new()),
            SecurityPackageType::Other(name) => {
                return Err(Error::new(
                    ErrorKind::SecurityPackageNotFound,
                    format!("the {} package cannot be instantiated", name),
                ))
            }
        })
    }

    pub fn package_name(&self) -> &'static str {
        match self {
            SspiContext::Ntlm(_) => ntlm::PKG_NAME,
            SspiContext::Kerberos(_) => kerberos::PKG_NAME,
            SspiContext::Negotiate(_) => negotiate::PKG_NAME,
            SspiContext::CredSsp(_) => credssp::PKG_NAME,
        }
    }
}

impl SspiImpl for SspiContext {
    type CredentialsHandle = Option<AuthIdentityBuffers>;
    type AuthenticationData = AuthIdentity;

    #[instrument(ret, fields(security_package = self.package_name()), skip_all)]
    fn acquire_credentials_handle_impl(
        &mut self,
        builder: FilledAcquireCredentialsHandle<'_, Self::CredentialsHandle, Self::AuthenticationData>,
    ) -> Result<AcquireCredentialsHandleResult<Self::CredentialsHandle>> {
        match self {
            SspiContext::Ntlm(ntlm) => builder.execute(ntlm),
            SspiContext::Kerberos(kerberos) => builder.execute(kerberos),
            SspiContext::Negotiate(negotiate) => builder.execute(negotiate),
            SspiContext::CredSsp(credssp) => builder.execute(credssp),
        }
    }

    #[instrument(ret, fields(security_package = self.package_name()), skip_all)]
    fn initialize_security_context_impl(
        &mut self,
        builder: &mut FilledInitializeSecurityContext<'_, Self::CredentialsHandle>,
    ) -> Result<InitializeSecurityContextResult> {
        match self {
            SspiContext::Ntlm(ntlm) => ntlm.initialize_security_context_impl(builder),
            SspiContext::Kerberos(kerberos) => kerberos.initialize_security_context_impl(builder),
            SspiContext::Negotiate(negotiate) => negotiate.initialize_security_context_impl(builder),
            SspiContext::CredSsp(credssp) => credssp.initialize_security_context_impl(builder),
        }
    }

    #[instrument(ret, fields(security_package = self.package_name()), skip_all)]
    fn accept_security_context_impl(
        &mut self,
        builder: FilledAcceptSecurityContext<'_, Self::CredentialsHandle>,
    ) -> Result<AcceptSecurityContextResult> {
        match self {
            SspiContext::Ntlm(ntlm) => builder.execute(ntlm),
            SspiContext::Kerberos(kerberos) => builder.execute(kerberos),
            SspiContext::Negotiate(negotiate) => builder.execute(negotiate),
            SspiContext::CredSsp(credssp) => builder.execute(credssp),
        }
    }
}

impl Sspi for SspiContext {
    #[instrument(ret, fields(security_package = self.package_name()), skip(self))]
    fn complete_auth_token(&mut self, token: &mut [SecurityBuffer]) -> Result<SecurityStatus> {
        match self {
            SspiContext::Ntlm(ntlm) => ntlm.complete_auth_token(token),
            SspiContext::Kerberos(kerberos) => kerberos.complete_auth_token(token),
            SspiContext::Negotiate(negotiate) => negotiate.complete_auth_token(token),
            SspiContext::CredSsp(credssp) => credssp.complete_auth_token(token),
        }
    }

    #[instrument(ret, fields(security_package = self.package_name()), skip_all)]
    fn encrypt_message(
        &mut self,
        flags: EncryptionFlags,
        message: &mut [SecurityBuffer],
        sequence_number: u32,
    ) -> Result<SecurityStatus> {
        match self {
            SspiContext::Ntlm(ntlm) => ntlm.encrypt_message(flags, message, sequence_number),
            SspiContext::Kerberos(kerberos) => kerberos.encrypt_message(flags, message, sequence_number),
            SspiContext::Negotiate(negotiate) => negotiate.encrypt_message(flags, message, sequence_number),
            SspiContext::CredSsp(credssp) => credssp.encrypt_message(flags, message, sequence_number),
        }
    }

    #[instrument(ret, fields(security_package = self.package_name()), skip_all)]
    fn decrypt_message(&mut self, message: &mut [SecurityBuffer], sequence_number: u32) -> Result<DecryptionFlags> {
        match self {
            SspiContext::Ntlm(ntlm) => ntlm.decrypt_message(message, sequence_number),
            SspiContext::Kerberos(kerberos) => kerberos.decrypt_message(message, sequence_number),
            SspiContext::Negotiate(negotiate) => negotiate.decrypt_message(message, sequence_number),
            SspiContext::CredSsp(credssp) => credssp.decrypt_message(message, sequence_number),
        }
    }

    #[instrument(ret, fields(security_package = self.package_name()), skip(self))]
    fn query_context_sizes(&mut self) -> Result<ContextSizes> {
        match self {
            SspiContext::Ntlm(ntlm) => ntlm.query_context_sizes(),
            SspiContext::Kerberos(kerberos) => kerberos.query_context_sizes(),
            SspiContext::Negotiate(negotiate) => negotiate.query_context_sizes(),
            SspiContext::CredSsp(credssp) => credssp.query_context_sizes(),
        }
    }

    #[instrument(ret, fields(security_package = self.package_name()), skip(self))]
    fn query_context_names(&mut self) -> Result<ContextNames> {
        match self {
            SspiContext::Ntlm(ntlm) => ntlm.query_context_names(),
            SspiContext::Kerberos(kerberos) => kerberos.query_context_names(),
            SspiContext::Negotiate(negotiate) => negotiate.query_context_names(),
            SspiContext::CredSsp(credssp) => credssp.query_context_names(),
        }
    }

    #[instrument(ret, fields(security_package = self.package_name()), skip(self))]
    fn query_context_package_info(&mut self) -> Result<PackageInfo> {
        match self {
            SspiContext::Ntlm(ntlm) => ntlm.query_context_package_info(),
            SspiContext::Kerberos(kerberos) => kerberos.query_context_package_info(),
            SspiContext::Negotiate(negotiate) => negotiate.query_context_package_info(),
            SspiContext::CredSsp(credssp) => credssp.query_context_package_info(),
        }
    }

    #[instrument(fields(security_package = self.package_name()), skip(self))]
    fn query_context_session_key(&self) -> Result<SessionKeys> {
        match self {
            SspiContext::Ntlm(ntlm) => ntlm.query_context_session_key(),
            SspiContext::Kerberos(kerberos) => kerberos.query_context_session_key(),
            SspiContext::Negotiate(negotiate) => negotiate.query_context_session_key(),
            SspiContext::CredSsp(credssp) => credssp.query_context_session_key(),
        }
    }
}

/// Opaque reference to credentials acquired through [`acquire_credentials_handle`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CredentialsHandle(Handle);

/// Opaque reference to a context created through [`initialize_security_context`] or
/// [`accept_security_context`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ContextHandle(Handle);

/// Result of one handshake step made through the generic entry points.
#[derive(Debug, Clone)]
pub struct HandshakeStep {
    pub status: SecurityStatus,
    pub context: ContextHandle,
    pub output: Vec<u8>,
}

#[derive(Debug)]
struct CredentialsEntry {
    package_name: &'static str,
    credentials: Option<AuthIdentityBuffers>,
}

#[derive(Debug)]
struct ContextEntry {
    package_name: &'static str,
    context: SspiContext,
}

/// The state behind the generic entry points.
#[derive(Debug)]
pub(crate) struct Registry {
    initialized: bool,
    credentials: HandleTable<CredentialsEntry>,
    contexts: HandleTable<ContextEntry>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| Mutex::new(Registry::new()));

fn packages() -> [&'static PackageInfo; 4] {
    [
        &*ntlm::PACKAGE_INFO,
        &*kerberos::PACKAGE_INFO,
        &*negotiate::PACKAGE_INFO,
        &*credssp::PACKAGE_INFO,
    ]
}

fn find_package(package_name: &str) -> Result<&'static PackageInfo> {
    packages()
        .into_iter()
        .find(|package| package.name.to_string() == package_name)
        .ok_or_else(|| {
            Error::new(
                ErrorKind::SecurityPackageNotFound,
                format!("security package {} is not registered", package_name),
            )
        })
}

fn lock_registry() -> Result<MutexGuard<'static, Registry>> {
    let mut registry = REGISTRY
        .lock()
        .map_err(|_| Error::new(ErrorKind::InternalError, "the package registry lock is poisoned"))?;
    registry.initialize();

    Ok(registry)
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            initialized: false,
            credentials: HandleTable::new(),
            contexts: HandleTable::new(),
        }
    }

    fn initialize(&mut self) {
        if !self.initialized {
            debug!("initializing the security package registry");
            self.initialized = true;
        }
    }

    fn shutdown(&mut self) {
        if self.initialized {
            debug!(
                credentials = self.credentials.len(),
                contexts = self.contexts.len(),
                "shutting down the security package registry"
            );
        }

        self.credentials.clear();
        self.contexts.clear();
        self.initialized = false;
    }

    fn acquire_credentials_handle(
        &mut self,
        package_name: &str,
        credential_use: CredentialUse,
        identity: Option<&AuthIdentity>,
    ) -> Result<CredentialsHandle> {
        let mut context = SspiContext::new(package_name)?;

        let mut builder = context.acquire_credentials_handle().with_credential_use(credential_use);
        if let Some(identity) = identity {
            builder = builder.with_auth_data(identity);
        }
        let result = builder.execute(&mut context)?;

        self.credentials
            .insert(CredentialsEntry {
                package_name: context.package_name(),
                credentials: result.credentials_handle,
            })
            .map(CredentialsHandle)
    }

    fn free_credentials_handle(&mut self, handle: CredentialsHandle) -> Result<()> {
        self.credentials.remove(handle.0).map(|_| ())
    }

    /// Resolves the context for a handshake step, creating it when `context` is `None`.
    fn context_for_step(
        &mut self,
        credentials: CredentialsHandle,
        context: Option<ContextHandle>,
    ) -> Result<(ContextHandle, Option<AuthIdentityBuffers>, bool)> {
        let entry = self.credentials.get(credentials.0)?;
        let package_name = entry.package_name;
        let identity = entry.credentials.clone();

        match context {
            Some(handle) => {
                let context = self.contexts.get(handle.0)?;
                if context.package_name != package_name {
                    return Err(Error::new(
                        ErrorKind::InvalidHandle,
                        format!(
                            "the context belongs to {} but the credentials to {}",
                            context.package_name, package_name
                        ),
                    ));
                }

                Ok((handle, identity, false))
            }
            None => {
                let handle = self.contexts.insert(ContextEntry {
                    package_name,
                    context: SspiContext::new(package_name)?,
                })?;

                Ok((ContextHandle(handle), identity, true))
            }
        }
    }

    /// Drops a context created by a failed first step so the caller never sees its handle.
    fn finish_step(
        &mut self,
        handle: ContextHandle,
        created: bool,
        result: Result<(SecurityStatus, Vec<u8>)>,
    ) -> Result<HandshakeStep> {
        match result {
            Ok((status, output)) => Ok(HandshakeStep {
                status,
                context: handle,
                output,
            }),
            Err(err) => {
                if created {
                    self.contexts.remove(handle.0)?;
                }

                Err(err)
            }
        }
    }

    fn initialize_security_context(
        &mut self,
        credentials: CredentialsHandle,
        context: Option<ContextHandle>,
        context_requirements: ClientRequestFlags,
        target_name: Option<&str>,
        input: Option<&[u8]>,
    ) -> Result<HandshakeStep> {
        let (handle, mut identity, created) = self.context_for_step(credentials, context)?;
        let entry = self.contexts.get_mut(handle.0)?;

        let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
        let mut input = input.map(|token| vec![SecurityBuffer::new(token.to_vec(), BufferType::Token)]);

        let mut builder = entry
            .context
            .initialize_security_context()
            .with_credentials_handle(&mut identity)
            .with_context_requirements(context_requirements)
            .with_target_data_representation(DataRepresentation::Native)
            .with_output(&mut output);
        if let Some(target_name) = target_name {
            builder = builder.with_target_name(target_name);
        }
        if let Some(input) = input.as_mut() {
            builder = builder.with_input(input);
        }

        let result = builder
            .execute(&mut entry.context)
            .map(|result| (result.status, take_token(output)));

        self.finish_step(handle, created, result)
    }

    fn accept_security_context(
        &mut self,
        credentials: CredentialsHandle,
        context: Option<ContextHandle>,
        context_requirements: ServerRequestFlags,
        input: &[u8],
    ) -> Result<HandshakeStep> {
        let (handle, mut identity, created) = self.context_for_step(credentials, context)?;
        let entry = self.contexts.get_mut(handle.0)?;

        let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
        let mut input = vec![SecurityBuffer::new(input.to_vec(), BufferType::Token)];

        let result = entry
            .context
            .accept_security_context()
            .with_credentials_handle(&mut identity)
            .with_context_requirements(context_requirements)
            .with_target_data_representation(DataRepresentation::Native)
            .with_output(&mut output)
            .with_input(&mut input)
            .execute(&mut entry.context)
            .map(|result| (result.status, take_token(output)));

        self.finish_step(handle, created, result)
    }

    fn context_mut(&mut self, handle: ContextHandle) -> Result<&mut SspiContext> {
        self.contexts.get_mut(handle.0).map(|entry| &mut entry.context)
    }

    fn delete_security_context(&mut self, handle: ContextHandle) -> Result<()> {
        self.contexts.remove(handle.0).map(|_| ())
    }
}

fn take_token(buffers: Vec<SecurityBuffer>) -> Vec<u8> {
    buffers
        .into_iter()
        .find(|buffer| buffer.buffer_type == BufferType::Token)
        .map(|buffer| buffer.buffer)
        .unwrap_or_default()
}

/// Sets up the registry. Calling it is optional: every entry point initializes the registry on first use.
pub fn initialize() -> Result<()> {
    lock_registry().map(|_| ())
}

/// Drops every credential and context owned by the registry. Their handles become invalid.
pub fn shutdown() -> Result<()> {
    REGISTRY
        .lock()
        .map_err(|_| Error::new(ErrorKind::InternalError, "the package registry lock is poisoned"))?
        .shutdown();

    Ok(())
}

/// Lists the packages that can be requested by name.
pub fn enumerate_security_packages() -> Result<Vec<PackageInfo>> {
    Ok(packages().into_iter().cloned().collect())
}

/// Information about a single package. Fails with `SecurityPackageNotFound` for unknown names.
pub fn query_security_package_info(package_name: &str) -> Result<PackageInfo> {
    find_package(package_name).cloned()
}

pub fn acquire_credentials_handle(
    package_name: &str,
    credential_use: CredentialUse,
    identity: Option<&AuthIdentity>,
) -> Result<CredentialsHandle> {
    lock_registry()?.acquire_credentials_handle(package_name, credential_use, identity)
}

pub fn free_credentials_handle(handle: CredentialsHandle) -> Result<()> {
    lock_registry()?.free_credentials_handle(handle)
}

/// Runs one client handshake step. Pass `None` as `context` on the first call to create the context.
pub fn initialize_security_context(
    credentials: CredentialsHandle,
    context: Option<ContextHandle>,
    context_requirements: ClientRequestFlags,
    target_name: Option<&str>,
    input: Option<&[u8]>,
) -> Result<HandshakeStep> {
    lock_registry()?.initialize_security_context(credentials, context, context_requirements, target_name, input)
}

/// Runs one server handshake step. Pass `None` as `context` on the first call to create the context.
pub fn accept_security_context(
    credentials: CredentialsHandle,
    context: Option<ContextHandle>,
    context_requirements: ServerRequestFlags,
    input: &[u8],
) -> Result<HandshakeStep> {
    lock_registry()?.accept_security_context(credentials, context, context_requirements, input)
}

pub fn complete_auth_token(context: ContextHandle) -> Result<SecurityStatus> {
    lock_registry()?.context_mut(context)?.complete_auth_token(&mut [])
}

pub fn query_context_sizes(context: ContextHandle) -> Result<ContextSizes> {
    lock_registry()?.context_mut(context)?.query_context_sizes()
}

pub fn query_context_names(context: ContextHandle) -> Result<ContextNames> {
    lock_registry()?.context_mut(context)?.query_context_names()
}

pub fn query_context_package_info(context: ContextHandle) -> Result<PackageInfo> {
    lock_registry()?.context_mut(context)?.query_context_package_info()
}

pub fn encrypt_message(
    context: ContextHandle,
    message: &mut [SecurityBuffer],
    sequence_number: u32,
) -> Result<SecurityStatus> {
    lock_registry()?
        .context_mut(context)?
        .encrypt_message(EncryptionFlags::empty(), message, sequence_number)
}

pub fn decrypt_message(
    context: ContextHandle,
    message: &mut [SecurityBuffer],
    sequence_number: u32,
) -> Result<DecryptionFlags> {
    lock_registry()?.context_mut(context)?.decrypt_message(message, sequence_number)
}

pub fn delete_security_context(context: ContextHandle) -> Result<()> {
    lock_registry()?.delete_security_context(context)
}
