use std::fmt;
use std::marker::PhantomData;

use time::OffsetDateTime;

use super::{
    ToAssign, WithContextRequirements, WithCredentialsHandle, WithOutput, WithTargetDataRepresentation,
    WithoutContextRequirements, WithoutCredentialsHandle, WithoutOutput, WithoutTargetDataRepresentation,
};
use crate::{ClientRequestFlags, ClientResponseFlags, DataRepresentation, SecurityBuffer, SecurityStatus, SspiImpl};

pub type EmptyInitializeSecurityContext<'a, C> = InitializeSecurityContext<
    'a,
    C,
    WithoutCredentialsHandle,
    WithoutContextRequirements,
    WithoutTargetDataRepresentation,
    WithoutOutput,
>;
pub type FilledInitializeSecurityContext<'a, C> = InitializeSecurityContext<
    'a,
    C,
    WithCredentialsHandle,
    WithContextRequirements,
    WithTargetDataRepresentation,
    WithOutput,
>;

/// Contains data returned by calling the `execute` method of the `InitializeSecurityContext` builder.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct InitializeSecurityContextResult {
    pub status: SecurityStatus,
    pub flags: ClientResponseFlags,
    pub expiry: Option<OffsetDateTime>,
}

/// A builder to execute one of the SSPI functions. Returned by the `initialize_security_context` method.
///
/// # Requirements for execution
///
/// These methods are required to be called before calling the `execute` method
/// * [`with_credentials_handle`](struct.InitializeSecurityContext.html#method.with_credentials_handle)
/// * [`with_context_requirements`](struct.InitializeSecurityContext.html#method.with_context_requirements)
/// * [`with_target_data_representation`](struct.InitializeSecurityContext.html#method.with_target_data_representation)
/// * [`with_output`](struct.InitializeSecurityContext.html#method.with_output)
pub struct InitializeSecurityContext<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
where
    CredsHandleSet: ToAssign,
    ContextRequirementsSet: ToAssign,
    TargetDataRepresentationSet: ToAssign,
    OutputSet: ToAssign,
{
    phantom_state: PhantomData<(CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet)>,

    pub credentials_handle: Option<&'a mut CredsHandle>,
    pub context_requirements: ClientRequestFlags,
    pub target_data_representation: DataRepresentation,
    pub output: &'a mut [SecurityBuffer],

    pub target_name: Option<&'a str>,
    pub input: Option<&'a mut [SecurityBuffer]>,
}

impl<CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet> fmt::Debug
    for InitializeSecurityContext<'_, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
where
    CredsHandleSet: ToAssign,
    ContextRequirementsSet: ToAssign,
    TargetDataRepresentationSet: ToAssign,
    OutputSet: ToAssign,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitializeSecurityContext")
            .field("context_requirements", &self.context_requirements)
            .field("target_data_representation", &self.target_data_representation)
            .field("target_name", &self.target_name)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
    InitializeSecurityContext<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
where
    CredsHandleSet: ToAssign,
    ContextRequirementsSet: ToAssign,
    TargetDataRepresentationSet: ToAssign,
    OutputSet: ToAssign,
{
    /// Moves the arguments into a builder with other markers.
    fn retype<C2: ToAssign, R2: ToAssign, T2: ToAssign, O2: ToAssign>(
        self,
    ) -> InitializeSecurityContext<'a, CredsHandle, C2, R2, T2, O2> {
        InitializeSecurityContext {
            phantom_state: PhantomData,

            credentials_handle: self.credentials_handle,
            context_requirements: self.context_requirements,
            target_data_representation: self.target_data_representation,
            output: self.output,

            target_name: self.target_name,
            input: self.input,
        }
    }

    /// Specifies the credentials handle returned by `acquire_credentials_handle`.
    pub fn with_credentials_handle(
        mut self,
        credentials_handle: &'a mut CredsHandle,
    ) -> InitializeSecurityContext<'a, CredsHandle, WithCredentialsHandle, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
    {
        self.credentials_handle = Some(credentials_handle);
        self.retype()
    }

    /// Specifies the bit flags that indicate requests for the context.
    pub fn with_context_requirements(
        mut self,
        context_requirements: ClientRequestFlags,
    ) -> InitializeSecurityContext<'a, CredsHandle, CredsHandleSet, WithContextRequirements, TargetDataRepresentationSet, OutputSet>
    {
        self.context_requirements = context_requirements;
        self.retype()
    }

    /// Specifies the data representation, such as byte ordering, on the target.
    pub fn with_target_data_representation(
        mut self,
        target_data_representation: DataRepresentation,
    ) -> InitializeSecurityContext<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, WithTargetDataRepresentation, OutputSet>
    {
        self.target_data_representation = target_data_representation;
        self.retype()
    }

    /// Specifies the buffers that receive the produced token.
    pub fn with_output(
        mut self,
        output: &'a mut [SecurityBuffer],
    ) -> InitializeSecurityContext<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, WithOutput>
    {
        self.output = output;
        self.retype()
    }

    /// Specifies the target of the context, e.g. `TERMSRV/server.example.com`.
    pub fn with_target_name(self, target_name: &'a str) -> Self {
        Self {
            target_name: Some(target_name),
            ..self
        }
    }

    /// Specifies the buffers holding the token received from the server and, optionally, the channel bindings.
    pub fn with_input(self, input: &'a mut [SecurityBuffer]) -> Self {
        Self {
            input: Some(input),
            ..self
        }
    }
}

impl<'a, CredsHandle> EmptyInitializeSecurityContext<'a, CredsHandle> {
    pub fn new() -> Self {
        Self {
            phantom_state: PhantomData,

            credentials_handle: None,
            context_requirements: ClientRequestFlags::empty(),
            target_data_representation: DataRepresentation::Native,
            output: &mut [],

            target_name: None,
            input: None,
        }
    }
}

impl<CredsHandle> Default for EmptyInitializeSecurityContext<'_, CredsHandle> {
    fn default() -> Self {
        Self::new()
    }
}

impl<CredsHandle> FilledInitializeSecurityContext<'_, CredsHandle> {
    /// Executes the SSPI function that the builder represents.
    pub fn execute<I>(mut self, inner: &mut I) -> crate::Result<InitializeSecurityContextResult>
    where
        I: SspiImpl<CredentialsHandle = CredsHandle>,
    {
        inner.initialize_security_context_impl(&mut self)
    }
}
