//! TCP server implementation.

use crate::config::Config;
use crate::error::ServerError;
use crate::session::Session;
use avrorpc_ipc::Responder;
use avrorpc_protocol::{Decoder, Encoder, FramingMode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Idle connection timeout.
    pub idle_timeout: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Message framing on every connection.
    pub framing: FramingMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for ServerConfig {
    fn from(config: &Config) -> Self {
        Self {
            bind_addr: config.network.bind_addr,
            idle_timeout: config.network.idle_timeout(),
            max_connections: config.network.max_connections,
            framing: config.protocol.framing,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_framing(mut self, framing: FramingMode) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server answering Avro RPC calls.
///
/// Each connection runs on its own task with its own handshake state; the
/// responder and its protocol cache are shared by all of them.
pub struct Server {
    config: ServerConfig,
    responder: Arc<Responder>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

/// Default read buffer size for connections.
const READ_BUFFER_SIZE: usize = 8192;

impl Server {
    pub fn new(config: ServerConfig, responder: Responder) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            responder: Arc::new(responder),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the server on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);

        let local = self.responder.local_protocol();
        tracing::info!(
            "Server listening on {} ({} framing, protocol {} {})",
            listener.local_addr()?,
            self.config.framing,
            local.fullname(),
            local.md5_hex()
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let responder = self.responder.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let result = Self::handle_connection(
                                    tcp_stream,
                                    addr,
                                    responder,
                                    &stats,
                                    config,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(e) = result {
                                    tracing::warn!("Connection {} dropped: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Handles a single connection until it closes, idles out, or fails.
    async fn handle_connection(
        mut stream: TcpStream,
        addr: SocketAddr,
        responder: Arc<Responder>,
        stats: &ServerStats,
        config: ServerConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        stream.set_nodelay(true).ok();
        let mut session = Session::new(addr);
        tracing::info!("Client connected: {} (session {})", addr, session.id);

        let encoder = Encoder::new(config.framing);
        let mut decoder = Decoder::new(config.framing);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            tokio::select! {
                result = stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!(
                                "[{}] Connection closed by client after {} messages in {:?}",
                                addr,
                                session.request_count(),
                                session.age()
                            );
                            return Ok(());
                        }
                        Ok(n) => {
                            tracing::trace!("[{}] Received {} bytes", addr, n);
                            decoder.extend(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] Read error: {}", addr, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }

                _ = tokio::time::sleep(config.idle_timeout) => {
                    if session.idle_duration() >= config.idle_timeout {
                        tracing::debug!("[{}] Idle timeout", addr);
                        return Ok(());
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] Shutdown signal received", addr);
                    return Err(ServerError::ShuttingDown);
                }
            }

            while let Some(envelope) = decoder.decode_message()? {
                session.touch();
                stats.requests_total.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "[{}] Message of {} bytes (serial {:?})",
                    addr,
                    envelope.payload.len(),
                    envelope.serial
                );

                let was_established = session.is_established();
                let reply = responder.respond(&envelope.payload, session.state_mut())?;
                if !was_established {
                    if let Some(remote) = session.state().remote() {
                        tracing::info!(
                            "[{}] Handshake complete with {} {}",
                            addr,
                            remote.fullname(),
                            remote.md5_hex()
                        );
                    }
                }

                if let Some(reply) = reply {
                    let encoded = encoder.encode(envelope.serial, &reply)?;
                    tracing::trace!("[{}] Writing {} bytes", addr, encoded.len());
                    stream.write_all(&encoded).await?;
                }
            }
        }
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn responder(&self) -> &Arc<Responder> {
        &self.responder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{simple_protocol, SimpleHandler};
    use avrorpc_client::{Client, ClientError, ConnectionConfig};
    use avrorpc_ipc::{IpcError, RemoteError};
    use avrorpc_protocol::Protocol;
    use avrorpc_schema::{Record, Value};

    async fn start(framing: FramingMode) -> (Arc<Server>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig::new(addr).with_framing(framing);
        let responder = Responder::new(simple_protocol().unwrap(), SimpleHandler);
        let server = Arc::new(Server::new(config, responder));

        let running = server.clone();
        tokio::spawn(async move { running.serve(listener).await });
        (server, addr)
    }

    async fn connect(protocol: Protocol, addr: SocketAddr, framing: FramingMode) -> Client {
        let config = ConnectionConfig::new(addr)
            .with_framing(framing)
            .with_request_timeout(Duration::from_secs(5));
        Client::connect(protocol, config).await.unwrap()
    }

    fn add(a: i32, b: i32) -> Value {
        Record::new("").with("arg1", a).with("arg2", b).into()
    }

    #[tokio::test]
    async fn test_server_not_running_before_serve() {
        let responder = Responder::new(simple_protocol().unwrap(), SimpleHandler);
        let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()), responder);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_calls_over_both_framings() {
        for framing in [FramingMode::Plain, FramingMode::Serial] {
            let (server, addr) = start(framing).await;
            let mut client = connect(simple_protocol().unwrap(), addr, framing).await;

            let sum = client.call("add", &add(19, 23)).await.unwrap();
            assert_eq!(sum, Value::Int(42));
            assert!(client.is_connected());

            let greeting = Record::new("").with("greeting", "avro").into();
            assert_eq!(client.call("hello", &greeting).await.unwrap(), Value::from("goodbye avro"));

            let data = Record::new("").with("data", vec![0u8, 1, 255]).into();
            assert_eq!(
                client.call("echoBytes", &data).await.unwrap(),
                Value::Bytes(vec![0, 1, 255])
            );

            client.close().await.unwrap();
            server.shutdown();
        }
    }

    #[tokio::test]
    async fn test_echo_record() {
        let (_server, addr) = start(FramingMode::Plain).await;
        let mut client = connect(simple_protocol().unwrap(), addr, FramingMode::Plain).await;

        let record: Value = Record::new("org.apache.avro.test.TestRecord")
            .with("name", "foo")
            .with("kind", Value::Enum("BAR".into()))
            .with("hash", Value::Fixed(vec![7; 16]))
            .into();
        let request = Record::new("").with("record", record).into();

        let echoed = client.call("echo", &request).await.unwrap();
        assert_eq!(echoed.field("name"), Some(&Value::from("foo")));
        assert_eq!(echoed.field("kind"), Some(&Value::Enum("BAR".into())));
        assert_eq!(echoed.field("hash"), Some(&Value::Fixed(vec![7; 16])));
    }

    #[tokio::test]
    async fn test_errors_and_one_way() {
        let (server, addr) = start(FramingMode::Plain).await;
        let mut client = connect(simple_protocol().unwrap(), addr, FramingMode::Plain).await;

        let empty = Value::Map(Default::default());
        let err = client.call("error", &empty).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Ipc(IpcError::Remote(RemoteError::Declared { ref name, .. }))
                if name == "org.apache.avro.test.TestError"
        ));

        assert_eq!(client.call("ack", &empty).await.unwrap(), Value::Null);
        assert_eq!(client.call("ack", &empty).await.unwrap(), Value::Null);

        // The connection is still in step after one-way calls.
        assert_eq!(client.call("add", &add(1, 2)).await.unwrap(), Value::Int(3));
        // Messages are counted before they are answered, so all four are in.
        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 4);
    }

    #[tokio::test]
    async fn test_client_with_newer_protocol() {
        let (server, addr) = start(FramingMode::Plain).await;

        // Same messages plus one the server lacks.
        let mut json: serde_json::Value = serde_json::from_str(crate::demo::SIMPLE_PROTOCOL).unwrap();
        json["messages"]["subtract"] = serde_json::json!({
            "request": [{"name": "arg1", "type": "int"}, {"name": "arg2", "type": "int"}],
            "response": "int"
        });
        let newer = Protocol::parse(&json.to_string()).unwrap();

        let mut client = connect(newer.clone(), addr, FramingMode::Plain).await;
        assert_eq!(client.call("add", &add(2, 2)).await.unwrap(), Value::Int(4));
        assert_eq!(client.server_protocol().unwrap().md5(), simple_protocol().unwrap().md5());
        assert_eq!(server.responder().cached_protocols(), 2);

        let err = client.call("subtract", &add(2, 2)).await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Ipc(IpcError::Remote(RemoteError::System(ref m))) if m.contains("subtract")
        ));

        // A second connection with the same protocol is recognized at once.
        let mut second = connect(newer, addr, FramingMode::Plain).await;
        assert_eq!(second.call("add", &add(5, 5)).await.unwrap(), Value::Int(10));
    }

    #[tokio::test]
    async fn test_bad_frame_drops_only_that_connection() {
        let (server, addr) = start(FramingMode::Plain).await;
        let mut good = connect(simple_protocol().unwrap(), addr, FramingMode::Plain).await;
        assert_eq!(good.call("add", &add(1, 1)).await.unwrap(), Value::Int(2));

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
        let mut buf = [0u8; 16];
        // Oversized frame: the server closes this connection.
        let n = tokio::time::timeout(Duration::from_secs(5), bad.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);

        assert_eq!(good.call("add", &add(2, 2)).await.unwrap(), Value::Int(4));
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.stats().errors_total.load(Ordering::Relaxed) == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_oversized_length_in_handshake_gets_error_reply() {
        let (_server, addr) = start(FramingMode::Plain).await;

        // clientHash, then a clientProtocol string length far beyond the message.
        let mut payload = vec![0xaa; 16];
        payload.push(0x02);
        avrorpc_io::encode_long(i64::MAX / 2, &mut payload);

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let framed = Encoder::new(FramingMode::Plain).encode(None, &payload).unwrap();
        raw.write_all(&framed).await.unwrap();

        let mut decoder = Decoder::new(FramingMode::Plain);
        let mut buf = [0u8; 1024];
        let reply = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(envelope) = decoder.decode_message().unwrap() {
                    return envelope.payload;
                }
                let n = raw.read(&mut buf).await.unwrap();
                assert!(n > 0, "connection closed without a reply");
                decoder.extend(&buf[..n]);
            }
        })
        .await
        .unwrap();
        // Empty call metadata, then the error flag.
        assert_eq!(&reply[..2], &[0x00, 0x01]);

        let mut client = connect(simple_protocol().unwrap(), addr, FramingMode::Plain).await;
        assert_eq!(client.call("add", &add(3, 4)).await.unwrap(), Value::Int(7));
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig::new(addr).with_idle_timeout(Duration::from_millis(100));
        let responder = Responder::new(simple_protocol().unwrap(), SimpleHandler);
        let server = Arc::new(Server::new(config, responder));
        let running = server.clone();
        tokio::spawn(async move { running.serve(listener).await });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 4];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_serving() {
        let (server, _addr) = start(FramingMode::Plain).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(server.is_running());

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), async {
            while server.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
