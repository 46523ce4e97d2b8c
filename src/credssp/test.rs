use std::io::{self, Read, Write};

use static_assertions::assert_impl_all;

use super::*;
use crate::{BufferType, DataRepresentation, SecurityBuffer, ServerRequestFlags};

assert_impl_all!(CredSspClient: Send, Sync);
assert_impl_all!(CredSspServer: Send, Sync);

fn identity(password: &str) -> AuthIdentity {
    AuthIdentity {
        username: String::from("User"),
        password: String::from(password).into(),
        domain: Some(String::from("Domain")),
    }
}

fn public_key() -> Vec<u8> {
    let mut public_key = vec![0x30, 0x82, 0x01, 0x0a, 0x02, 0x82, 0x01, 0x01];
    public_key.extend((0..=0xFF_u8).cycle().skip(7).take(262));

    public_key
}

fn config(ts_request_version: u32) -> CredSspConfig {
    CredSspConfig {
        ts_request_version,
        ..Default::default()
    }
}

fn reply(state: ClientState) -> TsRequest {
    match state {
        ClientState::ReplyNeeded(ts_request) => ts_request,
        ClientState::FinalMessage(_) => panic!("the client finished too early"),
    }
}

fn server_reply(state: ServerState) -> TsRequest {
    match state {
        ServerState::ReplyNeeded(ts_request) => ts_request,
        ServerState::Finished(_) => panic!("the server finished too early"),
    }
}

/// Runs both drivers to completion and returns the identity received by the server with every client request.
fn run(client: &mut CredSspClient, server: &mut CredSspServer) -> (AuthIdentity, Vec<TsRequest>) {
    let mut sent = Vec::new();
    let mut request = TsRequest::default();

    loop {
        match client.process(request).unwrap() {
            ClientState::ReplyNeeded(ts_request) => {
                sent.push(ts_request.clone());
                request = server_reply(server.process(ts_request).unwrap());
            }
            ClientState::FinalMessage(ts_request) => {
                sent.push(ts_request.clone());

                return match server.process(ts_request).unwrap() {
                    ServerState::Finished(identity) => (identity, sent),
                    ServerState::ReplyNeeded(_) => panic!("the server expects more messages"),
                };
            }
        }
    }
}

/// Leaves both sides right after the client sent its public key: the server context is established and has
/// verified the client's public key, the echo is up to the caller.
fn establish_until_echo(client: &mut CredSspClient, server: &mut CredSspServer) {
    let negotiate = reply(client.process(TsRequest::default()).unwrap());
    let challenge = server_reply(server.process(negotiate).unwrap());
    let mut authenticate = reply(client.process(challenge).unwrap());

    assert!(authenticate.pub_key_auth.is_some());
    assert_eq!(client.state, CredSspState::AuthInfo);

    let context = server.context.as_mut().unwrap();
    let mut input = [SecurityBuffer::new(
        authenticate.nego_tokens.take().unwrap(),
        BufferType::Token,
    )];
    let mut output = [SecurityBuffer::new(Vec::new(), BufferType::Token)];
    let result = context
        .sspi_context
        .accept_security_context()
        .with_credentials_handle(&mut server.credentials_handle)
        .with_context_requirements(ServerRequestFlags::empty())
        .with_target_data_representation(DataRepresentation::Native)
        .with_input(&mut input)
        .with_output(&mut output)
        .execute(&mut context.sspi_context)
        .unwrap();
    assert_eq!(result.status, SecurityStatus::CompleteNeeded);
    context.sspi_context.complete_auth_token(&mut []).unwrap();

    context
        .decrypt_public_key(
            &server.public_key,
            &authenticate.pub_key_auth.unwrap(),
            EndpointType::Server,
            None,
            TS_REQUEST_VERSION,
        )
        .unwrap();
}

fn echo(server: &mut CredSspServer, echoed_key: &[u8]) -> TsRequest {
    let pub_key_auth = server.context.as_mut().unwrap().encrypt_message(echoed_key).unwrap();

    TsRequest {
        pub_key_auth: Some(pub_key_auth),
        ..Default::default()
    }
}

#[test]
fn handshake_delegates_credentials() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());

    let (received, sent) = run(&mut client, &mut server);

    assert_eq!(received.username, "User");
    assert_eq!(received.domain.as_deref(), Some("Domain"));
    assert_eq!(received.password.as_ref(), "Password");

    assert_eq!(sent.len(), 3);
    assert!(sent.iter().all(|ts_request| ts_request.version == TS_REQUEST_VERSION));
    // the authenticate message and the public key travel together
    assert!(sent[1].nego_tokens.is_some() && sent[1].pub_key_auth.is_some());
    assert!(sent[2].nego_tokens.is_none() && sent[2].auth_info.is_some());
    assert!(sent.iter().all(|ts_request| ts_request.client_nonce.is_none()));
}

#[test]
fn handshake_through_negotiate() {
    let config = CredSspConfig {
        package: SecurityPackageType::Negotiate,
        ..Default::default()
    };
    let mut client = CredSspClient::new(public_key(), identity("Password"), config.clone());
    let mut server = CredSspServer::new(public_key(), identity("Password"), config);

    let (received, _) = run(&mut client, &mut server);

    assert_eq!(received.username, "User");
}

#[test]
fn version_6_binds_public_key_hash() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), config(6));
    let mut server = CredSspServer::new(public_key(), identity("Password"), config(6));

    let (received, sent) = run(&mut client, &mut server);

    assert_eq!(received.password.as_ref(), "Password");
    assert_eq!(sent[1].client_nonce, Some(client.client_nonce));
    // signature followed by a sealed SHA-256 hash
    assert_eq!(sent[1].pub_key_auth.as_ref().unwrap().len(), SIGNATURE_SIZE + 32);
}

#[test]
fn lower_server_version_falls_back_to_echo() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), config(6));
    let mut server = CredSspServer::new(public_key(), identity("Password"), config(2));

    let (received, sent) = run(&mut client, &mut server);

    assert_eq!(received.username, "User");
    assert_eq!(sent[1].client_nonce, None);
    assert_eq!(
        sent[1].pub_key_auth.as_ref().unwrap().len(),
        SIGNATURE_SIZE + public_key().len()
    );
}

#[test]
fn hash_binding_requires_client_nonce() {
    let mut context = CredSspContext::new(&SecurityPackageType::Ntlm).unwrap();

    let err = context
        .encrypt_public_key(&public_key(), EndpointType::Server, None, 6)
        .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidToken);
}

#[test]
fn echo_with_incremented_first_byte_is_accepted() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());
    establish_until_echo(&mut client, &mut server);

    let mut echoed_key = public_key();
    echoed_key[0] += 1;

    match client.process(echo(&mut server, &echoed_key)).unwrap() {
        ClientState::FinalMessage(ts_request) => assert!(ts_request.auth_info.is_some()),
        ClientState::ReplyNeeded(_) => panic!("expected the credentials"),
    }
    assert_eq!(client.state, CredSspState::Final);
}

#[test]
fn echo_increment_wraps_the_first_byte() {
    let mut public_key = public_key();
    public_key[0] = 0xFF;
    let mut client = CredSspClient::new(public_key.clone(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key.clone(), identity("Password"), CredSspConfig::default());
    establish_until_echo(&mut client, &mut server);

    let mut echoed_key = public_key;
    echoed_key[0] = 0x00;

    assert!(matches!(
        client.process(echo(&mut server, &echoed_key)).unwrap(),
        ClientState::FinalMessage(_)
    ));
}

#[test]
fn unchanged_echo_is_rejected() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());
    establish_until_echo(&mut client, &mut server);

    let err = client.process(echo(&mut server, &public_key())).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::MessageAltered);
    assert_eq!(client.state, CredSspState::Failed);
}

#[test]
fn client_cannot_resume_after_a_failure() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());
    establish_until_echo(&mut client, &mut server);

    client.process(TsRequest::default()).unwrap_err();

    let mut echoed_key = public_key();
    echoed_key[0] += 1;
    let err = client.process(echo(&mut server, &echoed_key)).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::OutOfSequence);
    assert_eq!(client.state, CredSspState::Failed);
}

#[test]
fn server_cannot_resume_after_a_failure() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());

    let negotiate = reply(client.process(TsRequest::default()).unwrap());
    server.process(TsRequest::default()).unwrap_err();

    let ServerError { ts_request, error } = server.process(negotiate).unwrap_err();

    assert_eq!(error.error_type, ErrorKind::OutOfSequence);
    assert!(ts_request.error_code.is_some());
}

#[test]
fn echo_with_other_byte_changed_is_rejected() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());
    establish_until_echo(&mut client, &mut server);

    let mut echoed_key = public_key();
    echoed_key[0] += 1;
    echoed_key[100] ^= 0x01;

    let err = client.process(echo(&mut server, &echoed_key)).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::MessageAltered);
}

#[test]
fn missing_echo_is_invalid_token() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());
    establish_until_echo(&mut client, &mut server);

    let err = client.process(TsRequest::default()).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidToken);
}

#[test]
fn peer_version_change_is_rejected() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());
    establish_until_echo(&mut client, &mut server);

    let mut echoed_key = public_key();
    echoed_key[0] += 1;
    let mut ts_request = echo(&mut server, &echoed_key);
    ts_request.version = 1;

    let err = client.process(ts_request).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidToken);
}

#[test]
fn wrong_password_is_reported_to_the_client() {
    let mut client = CredSspClient::new(public_key(), identity("Wrong"), config(3));
    let mut server = CredSspServer::new(public_key(), identity("Password"), config(3));

    let negotiate = reply(client.process(TsRequest::default()).unwrap());
    let challenge = server_reply(server.process(negotiate).unwrap());
    let authenticate = reply(client.process(challenge).unwrap());

    let ServerError { ts_request, error } = server.process(authenticate).unwrap_err();

    assert_eq!(error.error_type, ErrorKind::LogonDenied);
    assert_eq!(ts_request.error_code, Some(NStatusCode(0xC007_030C)));

    let err = client.process(ts_request).unwrap_err();

    assert_eq!(err.nstatus, Some(NStatusCode(0xC007_030C)));
}

#[test]
fn server_requires_negotiation_token() {
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());

    let ServerError { error, .. } = server.process(TsRequest::default()).unwrap_err();

    assert_eq!(error.error_type, ErrorKind::InvalidToken);
}

#[test]
fn process_after_final_is_out_of_sequence() {
    let mut client = CredSspClient::new(public_key(), identity("Password"), CredSspConfig::default());
    let mut server = CredSspServer::new(public_key(), identity("Password"), CredSspConfig::default());
    run(&mut client, &mut server);

    let err = client.process(TsRequest::default()).unwrap_err();
    assert_eq!(err.error_type, ErrorKind::OutOfSequence);
    assert_eq!(client.state, CredSspState::Final);

    let ServerError { error, .. } = server.process(TsRequest::default()).unwrap_err();
    assert_eq!(error.error_type, ErrorKind::OutOfSequence);
}

#[test]
fn kerberos_cannot_carry_credssp() {
    let config = CredSspConfig {
        package: SecurityPackageType::Kerberos,
        ..Default::default()
    };
    let mut client = CredSspClient::new(public_key(), identity("Password"), config);

    let err = client.process(TsRequest::default()).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::UnsupportedFunction);
}

#[test]
fn construct_error_uses_facility_7() {
    let error = Error::new(ErrorKind::MessageAltered, "altered");

    assert_eq!(construct_error(&error), NStatusCode(0xC007_030F));
}

struct Pipe {
    input: io::Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl io::Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl io::Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn stream_transport_frames_requests() {
    let short = TsRequest::default();
    let long = TsRequest {
        nego_tokens: Some(vec![0x4e; 300]),
        ..Default::default()
    };
    let mut input = Vec::new();
    short.encode_ts_request(&mut input).unwrap();
    long.encode_ts_request(&mut input).unwrap();

    let mut transport = StreamTransport::new(Pipe {
        input: io::Cursor::new(input),
        output: Vec::new(),
    });

    assert_eq!(TsRequest::from_buffer(&transport.recv().unwrap()).unwrap(), short);
    assert_eq!(TsRequest::from_buffer(&transport.recv().unwrap()).unwrap(), long);
    assert_eq!(
        transport.recv().unwrap_err().kind(),
        io::ErrorKind::UnexpectedEof
    );

    transport.send(&[0x30, 0x00]).unwrap();
    assert_eq!(transport.into_inner().output, [0x30, 0x00]);
}
