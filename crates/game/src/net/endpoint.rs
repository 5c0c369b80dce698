use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use super::frame::{Frame, FramePayload};
use super::protocol::PlayerId;
use super::stats::{NetworkStats, rand_u64};
use super::transport::{
    Connector, Pinger, Priority, Reliability, Transport, TransportError, TransportEvent,
};

pub const MAX_DATAGRAM_SIZE: usize = 1400;

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub connect_timeout: Duration,
    pub connect_retry: Duration,
    pub idle_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            connect_retry: Duration::from_millis(250),
            idle_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(1),
        }
    }
}

pub(crate) fn send_frame(
    socket: &UdpSocket,
    frame: &Frame,
    addr: SocketAddr,
) -> Result<usize, TransportError> {
    let data = frame
        .serialize()
        .map_err(|e| TransportError::Frame(e.to_string()))?;

    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(TransportError::TooLarge(data.len()));
    }

    Ok(socket.send_to(&data, addr)?)
}

/// Reads the next valid frame. Garbage datagrams are skipped; `None` means
/// the socket has nothing more right now.
pub(crate) fn recv_frame(
    socket: &UdpSocket,
    buffer: &mut [u8],
) -> io::Result<Option<(Frame, SocketAddr, usize)>> {
    loop {
        match socket.recv_from(buffer) {
            Ok((size, addr)) => match Frame::deserialize(&buffer[..size]) {
                Ok(frame) if frame.header.is_valid() => return Ok(Some((frame, addr, size))),
                _ => continue,
            },
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkState {
    Connecting,
    Connected,
    Closed,
}

/// Client side of a UDP connection to a host endpoint.
pub struct UdpConnection {
    socket: UdpSocket,
    remote: SocketAddr,
    state: LinkState,
    salt: u64,
    peer_id: Option<PlayerId>,
    config: EndpointConfig,
    started: Instant,
    last_request: Instant,
    last_receive: Instant,
    last_send: Instant,
    send_sequence: u32,
    events: VecDeque<TransportEvent>,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_DATAGRAM_SIZE],
}

impl UdpConnection {
    pub fn open(remote: SocketAddr, config: EndpointConfig) -> Result<Self, TransportError> {
        let bind_addr = if remote.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;

        let now = Instant::now();
        let mut connection = Self {
            socket,
            remote,
            state: LinkState::Connecting,
            salt: rand_u64(),
            peer_id: None,
            config,
            started: now,
            last_request: now,
            last_receive: now,
            last_send: now,
            send_sequence: 0,
            events: VecDeque::new(),
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_DATAGRAM_SIZE],
        };

        log::debug!("Connecting to {}", remote);
        connection.send_connect_request()?;
        Ok(connection)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }

    fn send_payload(&mut self, payload: FramePayload) -> Result<(), TransportError> {
        let frame = Frame::new(self.send_sequence, payload);
        self.send_sequence = self.send_sequence.wrapping_add(1);

        let bytes = send_frame(&self.socket, &frame, self.remote)?;
        self.stats.record_sent(bytes);
        self.last_send = Instant::now();
        Ok(())
    }

    fn send_connect_request(&mut self) -> Result<(), TransportError> {
        self.last_request = Instant::now();
        self.send_payload(FramePayload::ConnectRequest { salt: self.salt })
    }

    fn close(&mut self, event: TransportEvent) {
        self.state = LinkState::Closed;
        self.events.push_back(event);
    }

    fn poll(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }

        loop {
            match recv_frame(&self.socket, &mut self.recv_buffer) {
                Ok(Some((frame, addr, size))) => {
                    if addr != self.remote {
                        continue;
                    }
                    self.stats.record_received(size);
                    self.last_receive = Instant::now();
                    self.handle_frame(frame.payload);
                }
                Ok(None) => break,
                Err(e) => {
                    // ICMP unreachable surfaces here on some platforms.
                    log::debug!("Receive from {} failed: {}", self.remote, e);
                    break;
                }
            }
        }

        self.check_timers();
    }

    fn handle_frame(&mut self, payload: FramePayload) {
        match (self.state, payload) {
            (LinkState::Connecting, FramePayload::ConnectAccepted { peer_id }) => {
                log::debug!("Connection to {} accepted as peer {}", self.remote, peer_id);
                self.state = LinkState::Connected;
                self.peer_id = Some(peer_id);
                self.events.push_back(TransportEvent::ConnectionAccepted);
            }
            (LinkState::Connecting, FramePayload::ConnectDenied) => {
                log::debug!("Connection to {} denied", self.remote);
                self.close(TransportEvent::ConnectionFailed);
            }
            (LinkState::Connecting, FramePayload::Disconnect) => {
                self.close(TransportEvent::ConnectionFailed);
            }
            (LinkState::Connected, FramePayload::Data(data)) => {
                self.events.push_back(TransportEvent::Packet(data));
            }
            (LinkState::Connected, FramePayload::Disconnect) => {
                self.close(TransportEvent::DisconnectionNotification);
            }
            _ => {}
        }
    }

    fn check_timers(&mut self) {
        match self.state {
            LinkState::Connecting => {
                if self.started.elapsed() > self.config.connect_timeout {
                    log::debug!("Connection to {} timed out", self.remote);
                    self.close(TransportEvent::ConnectionFailed);
                } else if self.last_request.elapsed() >= self.config.connect_retry {
                    if let Err(e) = self.send_connect_request() {
                        log::debug!("Connect retry to {} failed: {}", self.remote, e);
                    }
                }
            }
            LinkState::Connected => {
                if self.last_receive.elapsed() > self.config.idle_timeout {
                    log::warn!("Connection to {} lost", self.remote);
                    self.close(TransportEvent::ConnectionLost);
                } else if self.last_send.elapsed() >= self.config.keepalive_interval {
                    let _ = self.send_payload(FramePayload::KeepAlive);
                }
            }
            LinkState::Closed => {}
        }
    }
}

impl Transport for UdpConnection {
    fn send(
        &mut self,
        data: &[u8],
        _priority: Priority,
        _reliability: Reliability,
    ) -> Result<(), TransportError> {
        if self.state != LinkState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.send_payload(FramePayload::Data(data.to_vec()))
    }

    fn receive(&mut self) -> Option<TransportEvent> {
        if self.events.is_empty() {
            self.poll();
        }
        self.events.pop_front()
    }

    fn disconnect(&mut self) {
        if self.state != LinkState::Closed {
            let _ = self.send_payload(FramePayload::Disconnect);
            self.state = LinkState::Closed;
        }
        self.events.clear();
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    fn local_id(&self) -> Option<PlayerId> {
        self.peer_id
    }
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[derive(Debug, Clone, Default)]
pub struct UdpConnector {
    config: EndpointConfig,
}

impl UdpConnector {
    pub fn new(config: EndpointConfig) -> Self {
        Self { config }
    }
}

impl Connector for UdpConnector {
    type Connection = UdpConnection;

    fn connect(&self, addr: SocketAddr) -> Result<UdpConnection, TransportError> {
        UdpConnection::open(addr, self.config.clone())
    }
}

/// Long-lived socket for discovery pings; broadcast is enabled so a LAN scan
/// can address the whole subnet.
pub struct UdpPinger {
    socket: UdpSocket,
}

impl UdpPinger {
    pub fn bind() -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        Ok(Self { socket })
    }
}

impl Pinger for UdpPinger {
    fn ping(&self, addr: SocketAddr) -> Result<(), TransportError> {
        send_frame(&self.socket, &Frame::new(0, FramePayload::Ping), addr)?;
        Ok(())
    }

    fn receive_pong(&self) -> Option<SocketAddr> {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE];
        loop {
            match recv_frame(&self.socket, &mut buffer) {
                Ok(Some((frame, addr, _))) => {
                    if frame.payload == FramePayload::Pong {
                        return Some(addr);
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    log::debug!("Pong receive failed: {}", e);
                    return None;
                }
            }
        }
    }
}
