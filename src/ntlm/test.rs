use static_assertions::assert_impl_all;

use crate::crypto::{Rc4, HASH_SIZE};
use crate::ntlm::messages::test::test_credentials;
use crate::ntlm::{Ntlm, NtlmConfig, NtlmState, SIGNATURE_SIZE};
use crate::*;

const TEST_SEQ_NUM: u32 = 1_234_567_890;
const SEALING_KEY: [u8; HASH_SIZE] = [
    0xa4, 0xf1, 0xba, 0xa6, 0x7c, 0xdc, 0x1a, 0x12, 0x20, 0xc0, 0x2b, 0x3d, 0xc0, 0x61, 0xa7, 0x73,
];
const SIGNING_KEY: [u8; HASH_SIZE] = [
    0x20, 0xc0, 0x2b, 0x3d, 0xc0, 0x61, 0xa7, 0x73, 0xa4, 0xf1, 0xba, 0xa6, 0x7c, 0xdc, 0x1a, 0x12,
];

const TEST_DATA: &[u8] = b"Hello, World!!!";

const ENCRYPTED_TEST_DATA: [u8; 15] = [
    0x20, 0x2e, 0xdd, 0xd9, 0x56, 0x5e, 0xc4, 0x59, 0x42, 0xdb, 0x94, 0xfd, 0x6b, 0xf3, 0x11,
];

const DIGEST_FOR_TEST_DATA: [u8; 8] = [0x58, 0x27, 0x4d, 0x35, 0x1f, 0x2d, 0x3c, 0xfd];

const SIGNATURE_FOR_TEST_DATA: [u8; 16] = [
    0x1, 0x0, 0x0, 0x0, 0x58, 0x27, 0x4d, 0x35, 0x1f, 0x2d, 0x3c, 0xfd, 0xd2, 0x2, 0x96, 0x49,
];

assert_impl_all!(Ntlm: Send, Sync);

fn final_context() -> Ntlm {
    let mut context = Ntlm::new();
    context.state = NtlmState::Final;

    context
}

fn sender() -> Ntlm {
    let mut context = final_context();
    context.our_seq_number = TEST_SEQ_NUM;
    context.send_signing_key = SIGNING_KEY;
    context.send_sealing_key = Some(Rc4::new(&SEALING_KEY));

    context
}

fn receiver() -> Ntlm {
    let mut context = final_context();
    context.remote_seq_number = TEST_SEQ_NUM;
    context.recv_signing_key = SIGNING_KEY;
    context.recv_sealing_key = Some(Rc4::new(&SEALING_KEY));

    context
}

fn message_buffers(data: &[u8], signature: &[u8]) -> Vec<SecurityBuffer> {
    vec![
        SecurityBuffer::new(signature.to_vec(), BufferType::Token),
        SecurityBuffer::new(data.to_vec(), BufferType::Data),
    ]
}

fn decrypt_with_signature(mut context: Ntlm, signature: &[u8]) -> crate::Result<DecryptionFlags> {
    let mut buffers = message_buffers(&ENCRYPTED_TEST_DATA, signature);

    context.decrypt_message(&mut buffers, 0)
}

fn client_config() -> NtlmConfig {
    NtlmConfig::new(String::from("WORKSTATION"))
}

fn acquire(context: &mut Ntlm, credential_use: CredentialUse) -> Option<AuthIdentityBuffers> {
    let identity = test_credentials();

    context
        .acquire_credentials_handle()
        .with_credential_use(credential_use)
        .with_auth_data(&identity)
        .execute(context)
        .unwrap()
        .credentials_handle
}

fn initialize(
    context: &mut Ntlm,
    credentials_handle: &mut Option<AuthIdentityBuffers>,
    input: Option<&[u8]>,
) -> crate::Result<(SecurityStatus, Vec<u8>)> {
    let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
    let mut input = input.map(|token| vec![SecurityBuffer::new(token.to_vec(), BufferType::Token)]);

    let mut builder = context
        .initialize_security_context()
        .with_credentials_handle(credentials_handle)
        .with_context_requirements(ClientRequestFlags::CONFIDENTIALITY | ClientRequestFlags::ALLOCATE_MEMORY)
        .with_target_data_representation(DataRepresentation::Native)
        .with_output(&mut output);
    if let Some(input) = input.as_mut() {
        builder = builder.with_input(input);
    }
    let result = builder.execute(context)?;

    Ok((result.status, output.remove(0).buffer))
}

fn accept(
    context: &mut Ntlm,
    credentials_handle: &mut Option<AuthIdentityBuffers>,
    input: &[u8],
) -> crate::Result<(SecurityStatus, Vec<u8>)> {
    let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
    let mut input = vec![SecurityBuffer::new(input.to_vec(), BufferType::Token)];

    let result = context
        .accept_security_context()
        .with_credentials_handle(credentials_handle)
        .with_context_requirements(ServerRequestFlags::ALLOCATE_MEMORY)
        .with_target_data_representation(DataRepresentation::Native)
        .with_output(&mut output)
        .with_input(&mut input)
        .execute(context)?;

    Ok((result.status, output.remove(0).buffer))
}

/// Drives both contexts through the whole handshake with the public API.
fn establish(client: &mut Ntlm, server: &mut Ntlm) {
    let mut client_credentials = acquire(client, CredentialUse::Outbound);
    let mut server_credentials = acquire(server, CredentialUse::Inbound);

    let (status, negotiate) = initialize(client, &mut client_credentials, None).unwrap();
    assert_eq!(status, SecurityStatus::ContinueNeeded);

    let (status, challenge) = accept(server, &mut server_credentials, &negotiate).unwrap();
    assert_eq!(status, SecurityStatus::ContinueNeeded);

    let (status, authenticate) = initialize(client, &mut client_credentials, Some(challenge.as_slice())).unwrap();
    assert_eq!(status, SecurityStatus::CompleteNeeded);
    assert_eq!(client.complete_auth_token(&mut []).unwrap(), SecurityStatus::Ok);

    let (status, _) = accept(server, &mut server_credentials, &authenticate).unwrap();
    assert_eq!(status, SecurityStatus::CompleteNeeded);
    assert_eq!(server.complete_auth_token(&mut []).unwrap(), SecurityStatus::Ok);
}

#[test]
fn encrypt_message_crypts_data() {
    let mut context = final_context();
    context.send_sealing_key = Some(Rc4::new(&SEALING_KEY));
    let mut buffers = message_buffers(TEST_DATA, &[]);

    let result = context
        .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
        .unwrap();
    let output = SecurityBuffer::find_buffer(&buffers, BufferType::Data).unwrap();

    assert_eq!(result, SecurityStatus::Ok);
    assert_eq!(output.buffer, ENCRYPTED_TEST_DATA);
}

#[test]
fn encrypt_message_correct_computes_digest() {
    let mut context = sender();
    let mut buffers = message_buffers(TEST_DATA, &[]);

    context
        .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
        .unwrap();
    let signature = SecurityBuffer::find_buffer(&buffers, BufferType::Token).unwrap();

    assert_eq!(signature.buffer[4..12], DIGEST_FOR_TEST_DATA);
}

#[test]
fn encrypt_message_writes_seq_num_to_signature() {
    let mut context = sender();
    let mut buffers = message_buffers(TEST_DATA, &[]);

    context
        .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
        .unwrap();
    let signature = SecurityBuffer::find_buffer(&buffers, BufferType::Token).unwrap();

    assert_eq!(signature.buffer.len(), SIGNATURE_SIZE);
    assert_eq!(signature.buffer, SIGNATURE_FOR_TEST_DATA);
    assert_eq!(signature.buffer[12..SIGNATURE_SIZE], TEST_SEQ_NUM.to_le_bytes());
}

#[test]
fn encrypt_message_ignores_caller_sequence_number() {
    let mut context = sender();
    let mut buffers = message_buffers(TEST_DATA, &[]);

    context
        .encrypt_message(EncryptionFlags::empty(), &mut buffers, 7)
        .unwrap();

    assert_eq!(buffers[0].buffer, SIGNATURE_FOR_TEST_DATA);
}

#[test]
fn encrypt_message_increments_sequence_number() {
    let mut context = sender();

    for expected in TEST_SEQ_NUM..TEST_SEQ_NUM + 3 {
        let mut buffers = message_buffers(TEST_DATA, &[]);
        context
            .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
            .unwrap();

        assert_eq!(buffers[0].buffer[12..], expected.to_le_bytes());
    }
    assert_eq!(context.our_seq_number, TEST_SEQ_NUM + 3);
}

#[test]
fn sequence_number_wraps_around() {
    let mut context = sender();
    context.our_seq_number = u32::MAX;
    let mut buffers = message_buffers(TEST_DATA, &[]);

    context
        .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
        .unwrap();

    assert_eq!(buffers[0].buffer[12..], u32::MAX.to_le_bytes());
    assert_eq!(context.our_seq_number, 0);
}

#[test]
fn encrypt_message_fails_before_final_state() {
    let mut context = sender();
    context.state = NtlmState::Authenticate;
    let mut buffers = message_buffers(TEST_DATA, &[]);

    let err = context
        .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
        .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::OutOfSequence);
    assert_eq!(buffers[1].buffer, TEST_DATA);
    assert_eq!(context.our_seq_number, TEST_SEQ_NUM);
}

#[test]
fn encrypt_message_requires_token_buffer() {
    let mut context = sender();
    let mut buffers = vec![SecurityBuffer::new(TEST_DATA.to_vec(), BufferType::Data)];

    let err = context
        .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
        .unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidToken);
}

#[test]
fn decrypt_message_decrypts_data() {
    let mut context = receiver();
    let mut buffers = message_buffers(&ENCRYPTED_TEST_DATA, &SIGNATURE_FOR_TEST_DATA);

    context.decrypt_message(&mut buffers, 0).unwrap();
    let data = SecurityBuffer::find_buffer(&buffers, BufferType::Data).unwrap();

    assert_eq!(data.buffer, TEST_DATA);
    assert_eq!(context.remote_seq_number, TEST_SEQ_NUM + 1);
}

#[test]
fn decrypt_message_fails_on_incorrect_version() {
    let signature = [
        0x02, 0x00, 0x00, 0x00, 0x58, 0x27, 0x4d, 0x35, 0x1f, 0x2d, 0x3c, 0xfd, 0xd2, 0x02, 0x96, 0x49,
    ];

    let err = decrypt_with_signature(receiver(), &signature).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::MessageAltered);
}

#[test]
fn decrypt_message_fails_on_incorrect_checksum() {
    let signature = [
        0x01, 0x00, 0x00, 0x00, 0x58, 0x27, 0x4d, 0x35, 0x1f, 0x2d, 0x3c, 0xff, 0xd2, 0x02, 0x96, 0x49,
    ];

    let err = decrypt_with_signature(receiver(), &signature).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::MessageAltered);
}

#[test]
fn decrypt_message_fails_on_incorrect_seq_num() {
    let mut context = receiver();
    context.remote_seq_number = TEST_SEQ_NUM + 1;

    let err = decrypt_with_signature(context, &SIGNATURE_FOR_TEST_DATA).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::MessageAltered);
}

#[test]
fn decrypt_message_fails_on_incorrect_signing_key() {
    let mut context = receiver();
    context.recv_signing_key = SEALING_KEY;

    let err = decrypt_with_signature(context, &SIGNATURE_FOR_TEST_DATA).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::MessageAltered);
}

#[test]
fn decrypt_message_fails_on_incorrect_sealing_key() {
    let mut context = receiver();
    context.recv_sealing_key = Some(Rc4::new(&SIGNING_KEY));

    let err = decrypt_with_signature(context, &SIGNATURE_FOR_TEST_DATA).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::MessageAltered);
}

#[test]
fn decrypt_message_keeps_data_on_failure() {
    let mut context = receiver();
    context.remote_seq_number = 0;
    let mut buffers = message_buffers(&ENCRYPTED_TEST_DATA, &SIGNATURE_FOR_TEST_DATA);

    context.decrypt_message(&mut buffers, 0).unwrap_err();

    assert_eq!(buffers[1].buffer, ENCRYPTED_TEST_DATA);
}

#[test]
fn decrypt_message_fails_on_short_signature() {
    let err = decrypt_with_signature(receiver(), &SIGNATURE_FOR_TEST_DATA[..12]).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidToken);
}

#[test]
fn decrypt_message_fails_before_final_state() {
    let mut context = receiver();
    context.state = NtlmState::Challenge;

    let err = decrypt_with_signature(context, &SIGNATURE_FOR_TEST_DATA).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::OutOfSequence);
}

#[test]
fn initialize_security_context_without_credentials() {
    let mut context = Ntlm::new();
    let mut credentials_handle = None;

    let err = initialize(&mut context, &mut credentials_handle, None).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::NoCredentials);
    assert_eq!(context.state, NtlmState::Initial);
}

#[test]
fn initialize_security_context_wrong_states() {
    for state in [
        NtlmState::Negotiate,
        NtlmState::Authenticate,
        NtlmState::Completion,
        NtlmState::Final,
        NtlmState::PacketError,
    ] {
        let mut context = Ntlm::new();
        context.state = state;
        let mut credentials_handle = Some(AuthIdentityBuffers::from(test_credentials()));

        let err = initialize(&mut context, &mut credentials_handle, Some([0x00; 8].as_ref())).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::OutOfSequence);
        assert_eq!(context.state, state);
    }
}

#[test]
fn initialize_security_context_writes_negotiate_message() {
    let mut context = Ntlm::new();
    let mut credentials_handle = acquire(&mut context, CredentialUse::Outbound);

    let (status, negotiate) = initialize(&mut context, &mut credentials_handle, None).unwrap();

    assert_eq!(status, SecurityStatus::ContinueNeeded);
    assert_eq!(context.state, NtlmState::Challenge);
    assert_eq!(&negotiate[..8], b"NTLMSSP\0");
    assert_eq!(negotiate.len(), 40);
}

#[test]
fn initialize_security_context_keeps_target_name_as_utf16() {
    let mut context = Ntlm::new();
    let mut credentials_handle = acquire(&mut context, CredentialUse::Outbound);
    let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];

    context
        .initialize_security_context()
        .with_credentials_handle(&mut credentials_handle)
        .with_context_requirements(ClientRequestFlags::CONFIDENTIALITY)
        .with_target_data_representation(DataRepresentation::Native)
        .with_target_name("TERMSRV/server")
        .with_output(&mut output)
        .execute(&mut context)
        .unwrap();

    assert_eq!(context.target_name, Some(utils::string_to_utf16("TERMSRV/server")));
}

#[test]
fn empty_target_name_is_ignored() {
    let mut context = Ntlm::new();
    let mut credentials_handle = acquire(&mut context, CredentialUse::Outbound);
    let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];

    context
        .initialize_security_context()
        .with_credentials_handle(&mut credentials_handle)
        .with_context_requirements(ClientRequestFlags::CONFIDENTIALITY)
        .with_target_data_representation(DataRepresentation::Native)
        .with_target_name("")
        .with_output(&mut output)
        .execute(&mut context)
        .unwrap();

    assert!(context.target_name.is_none());
}

#[test]
fn initialize_security_context_fails_without_input_on_challenge_state() {
    let mut context = Ntlm::new();
    let mut credentials_handle = acquire(&mut context, CredentialUse::Outbound);
    initialize(&mut context, &mut credentials_handle, None).unwrap();

    let err = initialize(&mut context, &mut credentials_handle, None).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::InvalidToken);
    assert_eq!(context.state, NtlmState::Challenge);
}

#[test]
fn accept_security_context_wrong_states() {
    for state in [
        NtlmState::Negotiate,
        NtlmState::Challenge,
        NtlmState::Completion,
        NtlmState::Final,
        NtlmState::PacketError,
    ] {
        let mut context = Ntlm::new();
        context.state = state;
        let mut credentials_handle = Some(AuthIdentityBuffers::from(test_credentials()));

        let err = accept(&mut context, &mut credentials_handle, &[0x00; 8]).unwrap_err();

        assert_eq!(err.error_type, ErrorKind::OutOfSequence);
        assert_eq!(context.state, state);
    }
}

#[test]
fn complete_auth_token_fails_on_incorrect_state() {
    let mut context = Ntlm::new();

    let err = context.complete_auth_token(&mut []).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::OutOfSequence);
}

#[test]
fn handshake_establishes_matching_keys() {
    let mut client = Ntlm::with_config(client_config());
    let mut server = Ntlm::with_config(NtlmConfig::new(String::from("SERVER")));

    establish(&mut client, &mut server);

    assert_eq!(client.state, NtlmState::Final);
    assert_eq!(server.state, NtlmState::Final);
    assert_eq!(
        client.query_context_session_key().unwrap().session_key.as_ref(),
        server.query_context_session_key().unwrap().session_key.as_ref()
    );

    let names = server.query_context_names().unwrap();
    assert_eq!(names.username, "User");
    assert_eq!(names.domain.as_deref(), Some("Domain"));
}

#[test]
fn sealed_messages_travel_both_ways() {
    let mut client = Ntlm::with_config(client_config());
    let mut server = Ntlm::new();
    establish(&mut client, &mut server);

    for round in 0..3_u8 {
        let payload = vec![round; 32];

        let mut buffers = message_buffers(&payload, &[]);
        client
            .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
            .unwrap();
        assert_ne!(buffers[1].buffer, payload);
        server.decrypt_message(&mut buffers, 0).unwrap();
        assert_eq!(buffers[1].buffer, payload);

        let mut buffers = message_buffers(&payload, &[]);
        server
            .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
            .unwrap();
        client.decrypt_message(&mut buffers, 0).unwrap();
        assert_eq!(buffers[1].buffer, payload);
    }
}

#[test]
fn replayed_message_is_rejected() {
    let mut client = Ntlm::with_config(client_config());
    let mut server = Ntlm::new();
    establish(&mut client, &mut server);

    let mut buffers = message_buffers(b"first", &[]);
    client
        .encrypt_message(EncryptionFlags::empty(), &mut buffers, 0)
        .unwrap();
    let mut replayed = buffers.clone();
    server.decrypt_message(&mut buffers, 0).unwrap();

    let err = server.decrypt_message(&mut replayed, 0).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::MessageAltered);
}

#[test]
fn session_key_is_not_available_before_final_state() {
    let context = Ntlm::new();

    let err = context.query_context_session_key().unwrap_err();

    assert_eq!(err.error_type, ErrorKind::OutOfSequence);
}

#[test]
fn channel_bindings_buffer_reaches_the_authenticate_message() {
    let mut client = Ntlm::new();
    let mut credentials_handle = acquire(&mut client, CredentialUse::Outbound);
    let mut server = Ntlm::new();
    let mut server_credentials = acquire(&mut server, CredentialUse::Inbound);
    server.set_channel_bindings(ChannelBindings::from_tls_server_end_point(&[0x01; 32]));

    let (_, negotiate) = initialize(&mut client, &mut credentials_handle, None).unwrap();
    let (_, challenge) = accept(&mut server, &mut server_credentials, &negotiate).unwrap();

    let mut output = vec![SecurityBuffer::new(Vec::new(), BufferType::Token)];
    let mut input = vec![
        SecurityBuffer::new(challenge, BufferType::Token),
        SecurityBuffer::new(
            ChannelBindings::from_tls_server_end_point(&[0x02; 32]).application_data,
            BufferType::ChannelBindings,
        ),
    ];
    client
        .initialize_security_context()
        .with_credentials_handle(&mut credentials_handle)
        .with_context_requirements(ClientRequestFlags::empty())
        .with_target_data_representation(DataRepresentation::Native)
        .with_output(&mut output)
        .with_input(&mut input)
        .execute(&mut client)
        .unwrap();

    let err = accept(&mut server, &mut server_credentials, &output[0].buffer).unwrap_err();

    assert_eq!(err.error_type, ErrorKind::BadBindings);
}

#[test]
fn context_sizes() {
    let mut context = Ntlm::new();

    assert_eq!(
        context.query_context_sizes().unwrap(),
        ContextSizes {
            max_token: 2010,
            max_signature: 16,
            block: 0,
            security_trailer: 16,
        }
    );
}

#[test]
fn package_info() {
    let mut context = Ntlm::new();

    let info = context.query_context_package_info().unwrap();

    assert_eq!(info.name, SecurityPackageType::Ntlm);
    assert_eq!(info.capabilities.bits(), 0x0008_2b37);
    assert_eq!(info.max_token_len, 0xb48);
    assert_eq!(info.rpc_id, 0x000a);
}
