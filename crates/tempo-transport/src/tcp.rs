//! TCP transport
//!
//! Sockets are driven by a small tokio runtime owned by the transport.
//! Runtime threads are plain OS threads, so sends block on the runtime
//! and inbound bytes are decoded by a spawned receive loop that forwards
//! whole messages to a channel.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Mutex as AsyncMutex;

use tempo_core::{TempoError, TempoResult};
use tempo_wire::{Message, MessageDecoder};

use crate::{EventSender, Link, LinkEvent, LinkReceiver};

/// Read buffer size for the receive loop
pub const READ_CHUNK: usize = 4096;

fn io_error(e: std::io::Error) -> TempoError {
    TempoError::TransportError(e.to_string())
}

/// Build the I/O runtime shared by links and acceptors
pub fn io_runtime() -> TempoResult<Arc<Runtime>> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("tempo-io")
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(io_error)
}

/// TCP link to the coordinator or a peer
pub struct TcpLink {
    runtime: Arc<Runtime>,
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    peer_addr: SocketAddr,
    closed: AtomicBool,
}

impl TcpLink {
    /// Connect to a remote address on a fresh I/O runtime
    pub fn connect(addr: SocketAddr) -> TempoResult<(Self, LinkReceiver)> {
        let runtime = io_runtime()?;
        Self::connect_on(runtime, addr)
    }

    /// Connect using an existing I/O runtime
    pub fn connect_on(runtime: Arc<Runtime>, addr: SocketAddr) -> TempoResult<(Self, LinkReceiver)> {
        let stream = runtime
            .block_on(TcpStream::connect(addr))
            .map_err(io_error)?;
        Self::from_stream(runtime, stream)
    }

    /// Wrap an established stream and start its receive loop
    pub fn from_stream(runtime: Arc<Runtime>, stream: TcpStream) -> TempoResult<(Self, LinkReceiver)> {
        stream.set_nodelay(true).map_err(io_error)?;
        let peer_addr = stream.peer_addr().map_err(io_error)?;
        let (reader, writer) = stream.into_split();
        let (tx, rx) = LinkReceiver::channel();
        start_receive_loop(runtime.handle(), reader, tx);
        Ok((
            TcpLink {
                runtime,
                writer: Arc::new(AsyncMutex::new(writer)),
                peer_addr,
                closed: AtomicBool::new(false),
            },
            rx,
        ))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Link for TcpLink {
    fn send(&self, message: &Message) -> TempoResult<()> {
        if self.is_closed() {
            return Err(TempoError::TransportError("link closed".into()));
        }
        let bytes = message.to_bytes()?;
        let writer = Arc::clone(&self.writer);
        self.runtime
            .block_on(async move {
                let mut writer = writer.lock().await;
                writer.write_all(&bytes).await?;
                writer.flush().await
            })
            .map_err(io_error)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let writer = Arc::clone(&self.writer);
        let result = self
            .runtime
            .block_on(async move { writer.lock().await.shutdown().await });
        if let Err(e) = result {
            tracing::debug!("TCP shutdown to {} failed: {}", self.peer_addr, e);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Start a background receive loop that decodes messages into `tx`
pub fn start_receive_loop(handle: &Handle, mut reader: OwnedReadHalf, tx: EventSender) {
    handle.spawn(async move {
        let mut decoder = MessageDecoder::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    let event = if decoder.pending() == 0 {
                        LinkEvent::Closed
                    } else {
                        LinkEvent::Corrupt(TempoError::ProtocolDesync(format!(
                            "EOF with {} bytes of a partial message",
                            decoder.pending()
                        )))
                    };
                    let _ = tx.send(event);
                    break;
                }
                Ok(len) => {
                    decoder.extend(&buf[..len]);
                    loop {
                        match decoder.next_message() {
                            Ok(Some(message)) => {
                                if tx.send(LinkEvent::Message(message)).is_err() {
                                    return; // Receiver dropped
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                let _ = tx.send(LinkEvent::Corrupt(e));
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("TCP receive error: {}", e);
                    let event = if decoder.pending() > 0 {
                        LinkEvent::Corrupt(TempoError::ProtocolDesync(e.to_string()))
                    } else if e.kind() == ErrorKind::ConnectionReset {
                        LinkEvent::Broken(format!("connection reset: {}", e))
                    } else {
                        LinkEvent::Broken(e.to_string())
                    };
                    let _ = tx.send(event);
                    break;
                }
            }
        }
    });
}

/// Listener for inbound peer connections
pub struct TcpAcceptor {
    runtime: Arc<Runtime>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    pub fn bind(addr: SocketAddr) -> TempoResult<Self> {
        Self::bind_on(io_runtime()?, addr)
    }

    pub fn bind_on(runtime: Arc<Runtime>, addr: SocketAddr) -> TempoResult<Self> {
        let listener = runtime.block_on(TcpListener::bind(addr)).map_err(io_error)?;
        let local_addr = listener.local_addr().map_err(io_error)?;
        Ok(TcpAcceptor {
            runtime,
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Block until a peer connects
    pub fn accept(&self) -> TempoResult<(TcpLink, LinkReceiver)> {
        let (stream, addr) = self
            .runtime
            .block_on(self.listener.accept())
            .map_err(io_error)?;
        tracing::debug!("Accepted connection from {}", addr);
        TcpLink::from_stream(Arc::clone(&self.runtime), stream)
    }

    pub fn runtime(&self) -> Arc<Runtime> {
        Arc::clone(&self.runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_core::{FederateId, PortId, Tag};
    use tempo_wire::TaggedPayload;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_tcp_roundtrip() {
        let acceptor = TcpAcceptor::bind(loopback()).unwrap();
        let addr = acceptor.local_addr();
        let server = std::thread::spawn(move || {
            let (link, mut rx) = acceptor.accept().unwrap();
            let first = rx.recv_blocking();
            link.send(&Message::TagAdvanceGrant(Tag::at(10))).unwrap();
            first
        });

        let (client, mut client_rx) = TcpLink::connect(addr).unwrap();
        let msg = Message::TaggedMessage(TaggedPayload {
            port: PortId::new(3),
            federate: FederateId::new(1),
            tag: Tag::new(10, 0),
            body: vec![9u8; 10_000].into(),
        });
        client.send(&msg).unwrap();
        assert_eq!(server.join().unwrap(), Some(LinkEvent::Message(msg)));
        assert_eq!(
            client_rx.recv_blocking(),
            Some(LinkEvent::Message(Message::TagAdvanceGrant(Tag::at(10))))
        );
    }

    #[test]
    fn test_close_yields_eof() {
        let acceptor = TcpAcceptor::bind(loopback()).unwrap();
        let addr = acceptor.local_addr();
        let server = std::thread::spawn(move || {
            let (_link, mut rx) = acceptor.accept().unwrap();
            rx.recv_blocking()
        });
        let (client, _rx) = TcpLink::connect(addr).unwrap();
        client.close();
        assert!(client.send(&Message::Resign).is_err());
        assert_eq!(server.join().unwrap(), Some(LinkEvent::Closed));
    }
}
