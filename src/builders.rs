//! Typestate builders for the SSPI functions that take many arguments.
//!
//! Every required argument has a `With*`/`Without*` marker so that `execute` is only available
//! once all of them have been supplied.

mod accept_sec_context;
mod acq_cred_handle;
mod init_sec_context;

use std::fmt;

pub use self::accept_sec_context::{
    AcceptSecurityContext, AcceptSecurityContextResult, EmptyAcceptSecurityContext, FilledAcceptSecurityContext,
};
pub use self::acq_cred_handle::{
    AcquireCredentialsHandle, AcquireCredentialsHandleResult, EmptyAcquireCredentialsHandle,
    FilledAcquireCredentialsHandle, WithCredentialUse, WithoutCredentialUse,
};
pub use self::init_sec_context::{
    EmptyInitializeSecurityContext, FilledInitializeSecurityContext, InitializeSecurityContext,
    InitializeSecurityContextResult,
};

pub trait ToAssign: fmt::Debug {}

macro_rules! markers {
    ($($with:ident / $without:ident),* $(,)?) => {
        $(
            /// Simulates the presence of a required builder argument.
            #[derive(Debug)]
            pub struct $with;
            impl ToAssign for $with {}

            /// Simulates the absence of a required builder argument.
            #[derive(Debug)]
            pub struct $without;
            impl ToAssign for $without {}
        )*
    };
}

markers! {
    WithCredentialsHandle / WithoutCredentialsHandle,
    WithContextRequirements / WithoutContextRequirements,
    WithTargetDataRepresentation / WithoutTargetDataRepresentation,
    WithOutput / WithoutOutput,
}
