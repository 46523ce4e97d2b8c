/// TLS channel binding data: a `SEC_CHANNEL_BINDINGS` structure that carries only application data.
///
/// The MD5 hash of this structure is sent to the server in the `MsvAvChannelBindings` AV pair of the
/// AUTHENTICATE message.
///
/// # MSDN
///
/// * [SEC_CHANNEL_BINDINGS](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-sec_channel_bindings)
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct ChannelBindings {
    pub initiator_addr_type: u32,
    pub initiator: Vec<u8>,
    pub acceptor_addr_type: u32,
    pub acceptor: Vec<u8>,
    pub application_data: Vec<u8>,
}

const TLS_SERVER_END_POINT_PREFIX: &[u8] = b"tls-server-end-point:";

impl ChannelBindings {
    /// Builds the RFC 5929 `tls-server-end-point` bindings from the hash of the server certificate.
    pub fn from_tls_server_end_point(certificate_hash: &[u8]) -> Self {
        let mut application_data = TLS_SERVER_END_POINT_PREFIX.to_vec();
        application_data.extend_from_slice(certificate_hash);

        Self {
            application_data,
            ..Default::default()
        }
    }
}
