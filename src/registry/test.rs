use super::*;
use crate::ntlm::messages::test::test_credentials;

fn handshake(registry: &mut Registry) -> (ContextHandle, ContextHandle) {
    let identity = test_credentials();
    let client_credentials = registry
        .acquire_credentials_handle(ntlm::PKG_NAME, CredentialUse::Outbound, Some(&identity))
        .unwrap();
    let server_credentials = registry
        .acquire_credentials_handle(ntlm::PKG_NAME, CredentialUse::Inbound, Some(&identity))
        .unwrap();

    let negotiate = registry
        .initialize_security_context(client_credentials, None, ClientRequestFlags::CONFIDENTIALITY, None, None)
        .unwrap();
    assert_eq!(negotiate.status, SecurityStatus::ContinueNeeded);

    let challenge = registry
        .accept_security_context(server_credentials, None, ServerRequestFlags::empty(), &negotiate.output)
        .unwrap();
    assert_eq!(challenge.status, SecurityStatus::ContinueNeeded);

    let authenticate = registry
        .initialize_security_context(
            client_credentials,
            Some(negotiate.context),
            ClientRequestFlags::CONFIDENTIALITY,
            Some("TERMSRV/server"),
            Some(challenge.output.as_slice()),
        )
        .unwrap();
    assert_eq!(authenticate.status, SecurityStatus::CompleteNeeded);
    assert_eq!(authenticate.context, negotiate.context);

    let accepted = registry
        .accept_security_context(
            server_credentials,
            Some(challenge.context),
            ServerRequestFlags::empty(),
            &authenticate.output,
        )
        .unwrap();
    assert_eq!(accepted.status, SecurityStatus::CompleteNeeded);

    registry
        .context_mut(negotiate.context)
        .unwrap()
        .complete_auth_token(&mut [])
        .unwrap();
    registry
        .context_mut(challenge.context)
        .unwrap()
        .complete_auth_token(&mut [])
        .unwrap();

    (negotiate.context, challenge.context)
}

#[test]
fn enumerates_every_package() {
    let packages = enumerate_security_packages().unwrap();

    let names = packages.iter().map(|package| package.name.to_string()).collect::<Vec<_>>();
    assert_eq!(names, ["NTLM", "Kerberos", "Negotiate", "CREDSSP"]);
}

#[test]
fn package_info_by_name() {
    let ntlm = query_security_package_info("NTLM").unwrap();
    assert_eq!(ntlm.max_token_len, 0xb48);
    assert_eq!(ntlm.capabilities.bits(), 0x0008_2b37);

    let credssp = query_security_package_info("CREDSSP").unwrap();
    assert_eq!(credssp.max_token_len, 0x90a8);
    assert_eq!(credssp.capabilities.bits(), 0x0011_0733);
    assert_eq!(credssp.rpc_id, 0xffff);

    let kerberos = query_security_package_info("Kerberos").unwrap();
    assert_eq!(kerberos.max_token_len, 0xbb80);
}

#[test]
fn unknown_package_is_not_found() {
    let err = query_security_package_info("Schannel").unwrap_err();
    assert_eq!(err.error_type, ErrorKind::SecurityPackageNotFound);

    let err = SspiContext::new("ntlm").unwrap_err();
    assert_eq!(err.error_type, ErrorKind::SecurityPackageNotFound);

    let mut registry = Registry::new();
    let err = registry
        .acquire_credentials_handle("Digest", CredentialUse::Outbound, None)
        .unwrap_err();
    assert_eq!(err.error_type, ErrorKind::SecurityPackageNotFound);
}

#[test]
fn contexts_are_created_per_package() {
    for name in ["NTLM", "Kerberos", "Negotiate", "CREDSSP"] {
        let context = SspiContext::new(name).unwrap();

        assert_eq!(context.package_name(), name);
    }
}

#[test]
fn handshake_through_handles() {
    let mut registry = Registry::new();

    let (client, server) = handshake(&mut registry);

    let sizes = registry.context_mut(client).unwrap().query_context_sizes().unwrap();
    assert_eq!(sizes.max_signature, 16);

    let mut message = vec![
        SecurityBuffer::new(Vec::new(), BufferType::Token),
        SecurityBuffer::new(b"payload".to_vec(), BufferType::Data),
    ];
    registry
        .context_mut(client)
        .unwrap()
        .encrypt_message(EncryptionFlags::empty(), &mut message, 0)
        .unwrap();
    registry
        .context_mut(server)
        .unwrap()
        .decrypt_message(&mut message, 0)
        .unwrap();

    assert_eq!(message[1].buffer, b"payload");
}

#[test]
fn unsupported_operation_is_reported() {
    let mut registry = Registry::new();
    let identity = test_credentials();
    let credentials = registry
        .acquire_credentials_handle(kerberos::PKG_NAME, CredentialUse::Outbound, Some(&identity))
        .unwrap();

    let err = registry
        .initialize_security_context(credentials, None, ClientRequestFlags::empty(), None, None)
        .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::UnsupportedFunction);
    // the context created for the failed first step is released
    assert_eq!(registry.contexts.len(), 0);
}

#[test]
fn deleted_context_handle_is_invalid() {
    let mut registry = Registry::new();
    let (client, _) = handshake(&mut registry);

    registry.delete_security_context(client).unwrap();

    assert_eq!(
        registry.context_mut(client).unwrap_err().error_type,
        ErrorKind::InvalidHandle
    );
    assert_eq!(
        registry.delete_security_context(client).unwrap_err().error_type,
        ErrorKind::InvalidHandle
    );
}

#[test]
fn freed_credentials_cannot_start_a_context() {
    let mut registry = Registry::new();
    let identity = test_credentials();
    let credentials = registry
        .acquire_credentials_handle(ntlm::PKG_NAME, CredentialUse::Outbound, Some(&identity))
        .unwrap();

    registry.free_credentials_handle(credentials).unwrap();
    let err = registry
        .initialize_security_context(credentials, None, ClientRequestFlags::empty(), None, None)
        .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidHandle);
}

#[test]
fn context_of_another_package_is_rejected() {
    let mut registry = Registry::new();
    let identity = test_credentials();
    let ntlm_credentials = registry
        .acquire_credentials_handle(ntlm::PKG_NAME, CredentialUse::Outbound, Some(&identity))
        .unwrap();
    let negotiate_credentials = registry
        .acquire_credentials_handle(negotiate::PKG_NAME, CredentialUse::Outbound, Some(&identity))
        .unwrap();
    let step = registry
        .initialize_security_context(ntlm_credentials, None, ClientRequestFlags::empty(), None, None)
        .unwrap();

    let err = registry
        .initialize_security_context(
            negotiate_credentials,
            Some(step.context),
            ClientRequestFlags::empty(),
            None,
            Some([0x00; 4].as_ref()),
        )
        .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidHandle);
}

#[test]
fn shutdown_invalidates_handles() {
    let mut registry = Registry::new();
    registry.initialize();
    let (client, server) = handshake(&mut registry);

    registry.shutdown();
    registry.initialize();
    let identity = test_credentials();
    registry
        .acquire_credentials_handle(ntlm::PKG_NAME, CredentialUse::Outbound, Some(&identity))
        .unwrap();

    assert!(registry.context_mut(client).is_err());
    assert!(registry.context_mut(server).is_err());
}

#[test]
fn global_entry_points() {
    initialize().unwrap();
    let identity = test_credentials();
    let credentials = acquire_credentials_handle(ntlm::PKG_NAME, CredentialUse::Outbound, Some(&identity)).unwrap();

    let step =
        initialize_security_context(credentials, None, ClientRequestFlags::CONFIDENTIALITY, None, None).unwrap();

    assert_eq!(step.status, SecurityStatus::ContinueNeeded);
    assert_eq!(step.output.len(), 40);
    assert_eq!(query_context_sizes(step.context).unwrap().max_token, 2010);
    assert_eq!(
        query_context_package_info(step.context).unwrap().name,
        SecurityPackageType::Ntlm
    );
    assert_eq!(query_context_names(step.context).unwrap().username, "User");
    assert_eq!(
        complete_auth_token(step.context).unwrap_err().error_type,
        ErrorKind::OutOfSequence
    );

    let mut message = vec![
        SecurityBuffer::new(Vec::new(), BufferType::Token),
        SecurityBuffer::new(b"early".to_vec(), BufferType::Data),
    ];
    assert_eq!(
        encrypt_message(step.context, &mut message, 0).unwrap_err().error_type,
        ErrorKind::OutOfSequence
    );
    assert_eq!(
        decrypt_message(step.context, &mut message, 0).unwrap_err().error_type,
        ErrorKind::OutOfSequence
    );

    delete_security_context(step.context).unwrap();
    free_credentials_handle(credentials).unwrap();
    assert_eq!(
        query_context_sizes(step.context).unwrap_err().error_type,
        ErrorKind::InvalidHandle
    );
}

#[test]
fn global_accept_needs_valid_credentials() {
    let identity = test_credentials();
    let credentials = acquire_credentials_handle(ntlm::PKG_NAME, CredentialUse::Inbound, Some(&identity)).unwrap();
    free_credentials_handle(credentials).unwrap();

    let err = accept_security_context(credentials, None, ServerRequestFlags::empty(), &[0x00; 8]).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidHandle);
}
