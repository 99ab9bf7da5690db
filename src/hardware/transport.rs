//! Socket transports for MAVLink frames
//!
//! Supports `udpin:`, `udpout:` and `tcpout:` connection strings. Frames are
//! encoded and decoded with the `mavlink` codec over std sockets that carry a
//! read timeout, so the reader thread notices shutdown promptly and
//! [`Transport::shutdown`] can join it.

use crate::hardware::{LinkError, LinkResult};
use ::mavlink::common::MavMessage;
use ::mavlink::error::MessageReadError;
use ::mavlink::peek_reader::PeekReader;
use ::mavlink::MavHeader;
use std::io::{self, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest a reader blocks before checking for shutdown
const READ_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 1500;
/// Largest MAVLink v2 frame, signature included
const MAX_FRAME: usize = 280;

pub(crate) type Frame = (MavHeader, MavMessage);

/// Parsed connection string
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Endpoint {
    /// Listen on a local address; replies go to whoever sent last
    UdpIn(SocketAddr),
    /// Send to a remote address from an ephemeral port
    UdpOut(SocketAddr),
    /// Connect to a TCP server such as ArduPilot SITL on 5760
    TcpOut(SocketAddr),
}

impl Endpoint {
    pub fn parse(address: &str) -> LinkResult<Self> {
        let (scheme, rest) = address.split_once(':').ok_or_else(|| connection_failed(address, "missing scheme"))?;
        let socket_addr = rest
            .to_socket_addrs()
            .map_err(|e| connection_failed(address, e))?
            .next()
            .ok_or_else(|| connection_failed(address, "address did not resolve"))?;

        match scheme {
            "udpin" => Ok(Endpoint::UdpIn(socket_addr)),
            "udpout" => Ok(Endpoint::UdpOut(socket_addr)),
            "tcpout" => Ok(Endpoint::TcpOut(socket_addr)),
            other => Err(connection_failed(address, format!("unsupported scheme {other}"))),
        }
    }
}

enum Writer {
    Udp {
        socket: UdpSocket,
        peer: Arc<Mutex<Option<SocketAddr>>>,
    },
    Tcp(TcpStream),
}

/// An open socket plus the thread decoding frames off it
pub struct Transport {
    writer: Writer,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl Transport {
    /// Open the socket and start the reader. Decoded frames arrive on the
    /// returned channel.
    pub fn open(address: &str) -> LinkResult<(Self, Receiver<Frame>)> {
        let endpoint = Endpoint::parse(address)?;
        let fail = |e: io::Error| connection_failed(address, e);
        let running = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel();

        let (writer, local_addr, reader) = match endpoint {
            Endpoint::UdpIn(bind) | Endpoint::UdpOut(bind) => {
                let listening = matches!(endpoint, Endpoint::UdpIn(_));
                let local = if listening { bind } else { unspecified_like(&bind) };
                let socket = UdpSocket::bind(local).map_err(fail)?;
                socket.set_read_timeout(Some(READ_POLL_INTERVAL)).map_err(fail)?;

                let peer = Arc::new(Mutex::new(if listening { None } else { Some(bind) }));
                let local_addr = socket.local_addr().map_err(fail)?;
                let rx_socket = socket.try_clone().map_err(fail)?;
                let rx_peer = listening.then(|| Arc::clone(&peer));
                let flag = Arc::clone(&running);
                let reader = spawn("mavlink-udp-rx", move || read_datagrams(rx_socket, rx_peer, tx, flag))?;
                (Writer::Udp { socket, peer }, local_addr, reader)
            }
            Endpoint::TcpOut(remote) => {
                let stream = TcpStream::connect(remote).map_err(fail)?;
                stream.set_read_timeout(Some(READ_POLL_INTERVAL)).map_err(fail)?;
                stream.set_nodelay(true).map_err(fail)?;

                let local_addr = stream.local_addr().map_err(fail)?;
                let rx_stream = stream.try_clone().map_err(fail)?;
                let flag = Arc::clone(&running);
                let reader = spawn("mavlink-tcp-rx", move || read_stream(rx_stream, tx, flag))?;
                (Writer::Tcp(stream), local_addr, reader)
            }
        };

        debug!(address, %local_addr, "transport open");
        Ok((
            Self {
                writer,
                local_addr,
                running,
                reader: Some(reader),
            },
            rx,
        ))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Encode and send one MAVLink v2 frame. A listening UDP socket drops
    /// frames until it has heard from a peer.
    pub fn send(&mut self, header: MavHeader, msg: &MavMessage) -> LinkResult<()> {
        let mut frame = Vec::with_capacity(MAX_FRAME);
        ::mavlink::write_v2_msg(&mut frame, header, msg).map_err(|e| LinkError::Io(e.to_string()))?;

        match &mut self.writer {
            Writer::Udp { socket, peer } => {
                let dest = *peer
                    .lock()
                    .map_err(|_| LinkError::Io("peer address lock poisoned".to_string()))?;
                if let Some(dest) = dest {
                    socket.send_to(&frame, dest).map_err(|e| LinkError::Io(e.to_string()))?;
                }
            }
            Writer::Tcp(stream) => stream.write_all(&frame).map_err(|e| LinkError::Io(e.to_string()))?,
        }
        Ok(())
    }

    /// Stop and join the reader. The socket is released once the transport
    /// is dropped.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Writer::Tcp(stream) = &self.writer {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("mavlink reader thread panicked");
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn connection_failed(address: &str, reason: impl ToString) -> LinkError {
    LinkError::ConnectionFailed {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

/// Wildcard address of the same family as `remote`, any port
fn unspecified_like(remote: &SocketAddr) -> SocketAddr {
    match remote {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}

fn spawn<F>(name: &str, body: F) -> LinkResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .map_err(|e| LinkError::Io(e.to_string()))
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Datagram reader. When `peer` is given, it learns the reply address from
/// each datagram.
fn read_datagrams(
    socket: UdpSocket,
    peer: Option<Arc<Mutex<Option<SocketAddr>>>>,
    tx: Sender<Frame>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; MAX_DATAGRAM];
    while running.load(Ordering::Relaxed) {
        let (len, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                warn!(error = %e, "udp receive failed, stopping reader");
                return;
            }
        };
        if let Some(Ok(mut reply_to)) = peer.as_ref().map(|p| p.lock()) {
            *reply_to = Some(from);
        }

        let mut reader = PeekReader::new(&buf[..len]);
        while let Ok(frame) = ::mavlink::read_v2_msg::<MavMessage, _>(&mut reader) {
            if tx.send(frame).is_err() {
                return;
            }
        }
    }
}

fn read_stream(stream: TcpStream, tx: Sender<Frame>, running: Arc<AtomicBool>) {
    let mut reader = PeekReader::new(stream);
    while running.load(Ordering::Relaxed) {
        match ::mavlink::read_v2_msg::<MavMessage, _>(&mut reader) {
            Ok(frame) => {
                if tx.send(frame).is_err() {
                    return;
                }
            }
            Err(MessageReadError::Io(e)) if is_timeout(&e) => continue,
            Err(MessageReadError::Io(e)) => {
                warn!(error = %e, "tcp receive failed, stopping reader");
                return;
            }
            Err(e) => debug!(error = %e, "dropping undecodable frame"),
        }
    }
}
