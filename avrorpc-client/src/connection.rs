//! TCP connection carrying framed Avro RPC messages.

use crate::error::ClientError;
use avrorpc_ipc::{IpcError, Transceiver};
use avrorpc_protocol::{Decoder, Encoder, FramingMode, Protocol};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Time allowed for one response to arrive.
    pub request_timeout: Duration,
    /// Framing; must match the server's.
    pub framing: FramingMode,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            framing: FramingMode::Plain,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// A [`Transceiver`] over one TCP connection.
///
/// Calls are strictly sequential: each request is written and its response
/// read before the next request starts. Under serial framing, responses
/// whose serial does not match the outstanding request are discarded.
pub struct SocketTransceiver {
    config: ConnectionConfig,
    stream: Option<TcpStream>,
    encoder: Encoder,
    decoder: Decoder,
    next_serial: u32,
    last_serial: Option<u32>,
    remote_name: String,
    remote: Option<Arc<Protocol>>,
}

impl SocketTransceiver {
    /// Connects to the server.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", config.addr);

        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Timeout
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Io(e)
            })?;

        stream.set_nodelay(true).ok();
        tracing::debug!("TCP connected to {} ({} framing)", config.addr, config.framing);

        Ok(Self {
            remote_name: config.addr.to_string(),
            encoder: Encoder::new(config.framing),
            decoder: Decoder::new(config.framing),
            config,
            stream: Some(stream),
            next_serial: 1,
            last_serial: None,
            remote: None,
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Returns whether the socket is still open.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, message: &[u8]) -> Result<(), ClientError> {
        let serial = match self.config.framing {
            FramingMode::Serial => {
                let serial = self.next_serial;
                self.next_serial = self.next_serial.wrapping_add(1);
                Some(serial)
            }
            FramingMode::Plain => None,
        };
        let encoded = self.encoder.encode(serial, message)?;

        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;
        tokio::time::timeout(self.config.request_timeout, stream.write_all(&encoded))
            .await
            .map_err(|_| ClientError::Timeout)??;
        self.last_serial = serial;
        tracing::trace!("Sent {} bytes (serial {:?})", encoded.len(), serial);
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, ClientError> {
        let timeout = self.config.request_timeout;
        let expected = self.last_serial;
        let mut buf = vec![0u8; self.config.read_buffer_size];
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;

        tokio::time::timeout(timeout, read_reply(stream, &mut self.decoder, &mut buf, expected))
            .await
            .map_err(|_| {
                tracing::debug!("Read timeout");
                ClientError::Timeout
            })?
    }
}

/// Reads until one message for `expected` is decoded or the peer closes.
async fn read_reply(
    stream: &mut TcpStream,
    decoder: &mut Decoder,
    buf: &mut [u8],
    expected: Option<u32>,
) -> Result<Option<Vec<u8>>, ClientError> {
    loop {
        while let Some(envelope) = decoder.decode_message()? {
            match (expected, envelope.serial) {
                (Some(want), Some(got)) if want != got => {
                    tracing::warn!("Discarding response with serial {} (expected {})", got, want);
                }
                _ => return Ok(Some(envelope.payload.to_vec())),
            }
        }

        let n = stream.read(buf).await?;
        if n == 0 {
            if decoder.buffered() > 0 {
                tracing::debug!("Connection closed mid-message");
                return Err(ClientError::ConnectionClosed);
            }
            tracing::debug!("Connection closed by server");
            return Ok(None);
        }
        decoder.extend(&buf[..n]);
    }
}

impl Transceiver for SocketTransceiver {
    fn remote_name(&self) -> &str {
        &self.remote_name
    }

    async fn write_message(&mut self, message: Vec<u8>) -> Result<(), IpcError> {
        Ok(self.send(&message).await?)
    }

    async fn read_message(&mut self) -> Result<Option<Vec<u8>>, IpcError> {
        Ok(self.receive().await?)
    }

    fn set_remote(&mut self, remote: Arc<Protocol>) {
        self.remote = Some(remote);
    }

    fn remote(&self) -> Option<&Arc<Protocol>> {
        self.remote.as_ref()
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        tracing::debug!("Closing connection...");
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.decoder.clear();
        self.remote = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.framing, FramingMode::Plain);
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config = ConnectionConfig::new("127.0.0.1:9090".parse().unwrap()).with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new("127.0.0.1:9090".parse().unwrap())
            .with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[tokio::test]
    async fn test_echo_over_plain_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Echo server that returns each framed message unchanged.
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                socket.write_all(&buf[..n]).await.unwrap();
            }
        });

        let mut transceiver = SocketTransceiver::connect(ConnectionConfig::new(addr)).await.unwrap();
        assert_eq!(transceiver.remote_name(), addr.to_string());
        let reply = transceiver.transceive(b"ping".to_vec()).await.unwrap();
        assert_eq!(reply, b"ping");

        transceiver.close().await.unwrap();
        assert!(!transceiver.is_open());
        assert!(matches!(
            transceiver.write_message(b"x".to_vec()).await,
            Err(IpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_stale_serial_discarded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = Decoder::new(FramingMode::Serial);
            let encoder = Encoder::new(FramingMode::Serial);
            let mut buf = vec![0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                decoder.extend(&buf[..n]);
                while let Some(envelope) = decoder.decode_message().unwrap() {
                    let serial = envelope.serial.unwrap();
                    let stale = encoder.encode(Some(serial + 100), b"stale").unwrap();
                    let reply = encoder.encode(Some(serial), &envelope.payload).unwrap();
                    socket.write_all(&stale).await.unwrap();
                    socket.write_all(&reply).await.unwrap();
                }
            }
        });

        let config = ConnectionConfig::new(addr).with_framing(FramingMode::Serial);
        let mut transceiver = SocketTransceiver::connect(config).await.unwrap();
        assert_eq!(transceiver.transceive(b"one".to_vec()).await.unwrap(), b"one");
        assert_eq!(transceiver.transceive(b"two".to_vec()).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_server_disconnect_reads_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transceiver = SocketTransceiver::connect(ConnectionConfig::new(addr)).await.unwrap();
        assert!(transceiver.read_message().await.unwrap().is_none());
        assert!(matches!(
            transceiver.transceive(b"x".to_vec()).await,
            Err(IpcError::ConnectionClosed) | Err(IpcError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = ConnectionConfig::new(addr).with_request_timeout(Duration::from_millis(50));
        let mut transceiver = SocketTransceiver::connect(config).await.unwrap();
        assert!(matches!(transceiver.read_message().await, Err(IpcError::Timeout)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = SocketTransceiver::connect(ConnectionConfig::new(addr)).await;
        assert!(matches!(result, Err(ClientError::Io(_)) | Err(ClientError::Timeout)));
    }
}
