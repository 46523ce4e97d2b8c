use std::fmt;
use std::marker::PhantomData;

use time::OffsetDateTime;

use super::{
    ToAssign, WithContextRequirements, WithCredentialsHandle, WithOutput, WithTargetDataRepresentation,
    WithoutContextRequirements, WithoutCredentialsHandle, WithoutOutput, WithoutTargetDataRepresentation,
};
use crate::{DataRepresentation, SecurityBuffer, SecurityStatus, ServerRequestFlags, ServerResponseFlags, SspiImpl};

pub type EmptyAcceptSecurityContext<'a, C> = AcceptSecurityContext<
    'a,
    C,
    WithoutCredentialsHandle,
    WithoutContextRequirements,
    WithoutTargetDataRepresentation,
    WithoutOutput,
>;
pub type FilledAcceptSecurityContext<'a, C> = AcceptSecurityContext<
    'a,
    C,
    WithCredentialsHandle,
    WithContextRequirements,
    WithTargetDataRepresentation,
    WithOutput,
>;

/// Contains data returned by calling the `execute` method of the `AcceptSecurityContext` builder.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AcceptSecurityContextResult {
    pub status: SecurityStatus,
    pub flags: ServerResponseFlags,
    pub expiry: Option<OffsetDateTime>,
}

/// A builder to execute one of the SSPI functions. Returned by the `accept_security_context` method.
///
/// # Requirements for execution
///
/// These methods are required to be called before calling the `execute` method
/// * [`with_credentials_handle`](struct.AcceptSecurityContext.html#method.with_credentials_handle)
/// * [`with_context_requirements`](struct.AcceptSecurityContext.html#method.with_context_requirements)
/// * [`with_target_data_representation`](struct.AcceptSecurityContext.html#method.with_target_data_representation)
/// * [`with_output`](struct.AcceptSecurityContext.html#method.with_output)
pub struct AcceptSecurityContext<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
where
    CredsHandleSet: ToAssign,
    ContextRequirementsSet: ToAssign,
    TargetDataRepresentationSet: ToAssign,
    OutputSet: ToAssign,
{
    phantom_state: PhantomData<(CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet)>,

    pub credentials_handle: Option<&'a mut CredsHandle>,
    pub context_requirements: ServerRequestFlags,
    pub target_data_representation: DataRepresentation,
    pub output: &'a mut [SecurityBuffer],

    pub input: Option<&'a mut [SecurityBuffer]>,
}

impl<CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet> fmt::Debug
    for AcceptSecurityContext<'_, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
where
    CredsHandleSet: ToAssign,
    ContextRequirementsSet: ToAssign,
    TargetDataRepresentationSet: ToAssign,
    OutputSet: ToAssign,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcceptSecurityContext")
            .field("context_requirements", &self.context_requirements)
            .field("target_data_representation", &self.target_data_representation)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
    AcceptSecurityContext<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
where
    CredsHandleSet: ToAssign,
    ContextRequirementsSet: ToAssign,
    TargetDataRepresentationSet: ToAssign,
    OutputSet: ToAssign,
{
    fn retype<C2: ToAssign, R2: ToAssign, T2: ToAssign, O2: ToAssign>(
        self,
    ) -> AcceptSecurityContext<'a, CredsHandle, C2, R2, T2, O2> {
        AcceptSecurityContext {
            phantom_state: PhantomData,

            credentials_handle: self.credentials_handle,
            context_requirements: self.context_requirements,
            target_data_representation: self.target_data_representation,
            output: self.output,

            input: self.input,
        }
    }

    pub fn with_credentials_handle(
        mut self,
        credentials_handle: &'a mut CredsHandle,
    ) -> AcceptSecurityContext<'a, CredsHandle, WithCredentialsHandle, ContextRequirementsSet, TargetDataRepresentationSet, OutputSet>
    {
        self.credentials_handle = Some(credentials_handle);
        self.retype()
    }

    pub fn with_context_requirements(
        mut self,
        context_requirements: ServerRequestFlags,
    ) -> AcceptSecurityContext<'a, CredsHandle, CredsHandleSet, WithContextRequirements, TargetDataRepresentationSet, OutputSet>
    {
        self.context_requirements = context_requirements;
        self.retype()
    }

    pub fn with_target_data_representation(
        mut self,
        target_data_representation: DataRepresentation,
    ) -> AcceptSecurityContext<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, WithTargetDataRepresentation, OutputSet>
    {
        self.target_data_representation = target_data_representation;
        self.retype()
    }

    pub fn with_output(
        mut self,
        output: &'a mut [SecurityBuffer],
    ) -> AcceptSecurityContext<'a, CredsHandle, CredsHandleSet, ContextRequirementsSet, TargetDataRepresentationSet, WithOutput>
    {
        self.output = output;
        self.retype()
    }

    /// Specifies the buffers holding the token received from the client.
    pub fn with_input(self, input: &'a mut [SecurityBuffer]) -> Self {
        Self {
            input: Some(input),
            ..self
        }
    }
}

impl<'a, CredsHandle> EmptyAcceptSecurityContext<'a, CredsHandle> {
    pub fn new() -> Self {
        Self {
            phantom_state: PhantomData,

            credentials_handle: None,
            context_requirements: ServerRequestFlags::empty(),
            target_data_representation: DataRepresentation::Native,
            output: &mut [],

            input: None,
        }
    }
}

impl<CredsHandle> Default for EmptyAcceptSecurityContext<'_, CredsHandle> {
    fn default() -> Self {
        Self::new()
    }
}

impl<CredsHandle> FilledAcceptSecurityContext<'_, CredsHandle> {
    /// Executes the SSPI function that the builder represents.
    pub fn execute<I>(self, inner: &mut I) -> crate::Result<AcceptSecurityContextResult>
    where
        I: SspiImpl<CredentialsHandle = CredsHandle>,
    {
        inner.accept_security_context_impl(self)
    }
}
