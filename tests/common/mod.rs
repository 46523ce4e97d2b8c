use std::io;
use std::sync::mpsc::{channel, Receiver, Sender};

use sspi_nla::{AuthIdentity, Transport, TsRequest};
use tracing_subscriber::EnvFilter;

/// Logs go to the test output, filtered with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn credentials() -> AuthIdentity {
    AuthIdentity {
        username: String::from("Username"),
        password: String::from("Password").into(),
        domain: Some(String::from("Domain")),
    }
}

/// A DER `SubjectPublicKeyInfo`-like blob standing in for the server's TLS key.
pub fn public_key() -> Vec<u8> {
    let mut public_key = vec![0x30, 0x82, 0x01, 0x22, 0x30, 0x0d, 0x06, 0x09];
    public_key.extend((0..0x11a).map(|i| (i * 7) as u8));

    public_key
}

/// One end of an in-memory duplex connection.
pub struct ChannelTransport {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
}

pub fn duplex() -> (ChannelTransport, ChannelTransport) {
    let (client_sender, server_receiver) = channel();
    let (server_sender, client_receiver) = channel();

    (
        ChannelTransport {
            sender: client_sender,
            receiver: client_receiver,
        },
        ChannelTransport {
            sender: server_sender,
            receiver: server_receiver,
        },
    )
}

impl Transport for ChannelTransport {
    fn send(&mut self, buffer: &[u8]) -> io::Result<()> {
        self.sender
            .send(buffer.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "the peer is gone"))
    }

    fn recv(&mut self) -> io::Result<Vec<u8>> {
        self.receiver
            .recv()
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionReset, "the peer is gone"))
    }
}

/// Wraps a transport, records what was sent and lets a test rewrite what is received.
pub struct Interceptor<T, F> {
    pub inner: T,
    pub sent: Vec<TsRequest>,
    pub received: usize,
    pub on_recv: F,
}

impl<T, F: FnMut(usize, &mut TsRequest)> Interceptor<T, F> {
    pub fn new(inner: T, on_recv: F) -> Self {
        Self {
            inner,
            sent: Vec::new(),
            received: 0,
            on_recv,
        }
    }
}

impl<T: Transport, F: FnMut(usize, &mut TsRequest)> Transport for Interceptor<T, F> {
    fn send(&mut self, buffer: &[u8]) -> io::Result<()> {
        self.sent.push(TsRequest::from_buffer(buffer)?);
        self.inner.send(buffer)
    }

    fn recv(&mut self) -> io::Result<Vec<u8>> {
        let buffer = self.inner.recv()?;
        let mut ts_request = TsRequest::from_buffer(&buffer)?;

        (self.on_recv)(self.received, &mut ts_request);
        self.received += 1;

        let mut buffer = Vec::new();
        ts_request.encode_ts_request(&mut buffer)?;

        Ok(buffer)
    }
}

/// Fails every receive, like a connection reset in the middle of the handshake.
pub struct BrokenTransport {
    pub sent: usize,
}

impl Transport for BrokenTransport {
    fn send(&mut self, _buffer: &[u8]) -> io::Result<()> {
        self.sent += 1;

        Ok(())
    }

    fn recv(&mut self) -> io::Result<Vec<u8>> {
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"))
    }
}
