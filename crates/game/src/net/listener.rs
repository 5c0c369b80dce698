use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use super::connection::{AdmitError, DisconnectReason, PeerManager};
use super::endpoint::{MAX_DATAGRAM_SIZE, recv_frame, send_frame};
use super::frame::{Frame, FramePayload};
use super::protocol::PlayerId;
use super::stats::NetworkStats;
use super::transport::TransportError;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    PeerConnected { peer: PlayerId, addr: SocketAddr },
    Packet { peer: PlayerId, data: Vec<u8> },
    PeerDisconnected { peer: PlayerId, reason: DisconnectReason },
    ConnectionDenied { addr: SocketAddr, reason: &'static str },
}

/// Server side of the UDP transport: admits peers, answers discovery pings
/// and turns datagrams into per-peer events.
pub struct HostEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peers: PeerManager,
    accepting: bool,
    events: VecDeque<HostEvent>,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_DATAGRAM_SIZE],
}

impl HostEndpoint {
    pub fn bind(addr: &str, max_peers: usize, idle_timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            peers: PeerManager::with_timeout(max_peers, idle_timeout),
            accepting: true,
            events: VecDeque::new(),
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn peer_addr(&self, peer: PlayerId) -> Option<SocketAddr> {
        self.peers.get(peer).map(|p| p.addr)
    }

    /// New connection requests are denied while this is off. Pings are
    /// still answered.
    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Drains the socket, runs timers and returns everything that happened
    /// since the last call.
    pub fn receive(&mut self) -> io::Result<Vec<HostEvent>> {
        loop {
            match recv_frame(&self.socket, &mut self.recv_buffer) {
                Ok(Some((frame, addr, size))) => {
                    self.stats.record_received(size);
                    self.handle_frame(frame, addr);
                }
                Ok(None) => break,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        for peer in self.peers.cleanup_timed_out() {
            log::info!("Peer {} timed out", peer);
            self.events.push_back(HostEvent::PeerDisconnected {
                peer,
                reason: DisconnectReason::Timeout,
            });
        }

        self.send_keepalives();

        Ok(self.events.drain(..).collect())
    }

    pub fn send_to(&mut self, peer: PlayerId, data: &[u8]) -> Result<(), TransportError> {
        let Some(connection) = self.peers.get_mut(peer) else {
            return Err(TransportError::NotConnected);
        };
        let addr = connection.addr;
        let frame = Frame::new(connection.next_sequence(), FramePayload::Data(data.to_vec()));

        let bytes = send_frame(&self.socket, &frame, addr)?;
        self.stats.record_sent(bytes);
        Ok(())
    }

    pub fn disconnect_peer(&mut self, peer: PlayerId) {
        if let Some(connection) = self.peers.remove(peer) {
            self.send_raw(FramePayload::Disconnect, connection.addr);
            self.events.push_back(HostEvent::PeerDisconnected {
                peer,
                reason: DisconnectReason::Kicked,
            });
        }
    }

    pub fn shutdown(&mut self) {
        let ids: Vec<PlayerId> = self.peers.iter().map(|p| p.peer_id).collect();
        for peer in ids {
            self.disconnect_peer(peer);
        }
        self.accepting = false;
    }

    fn handle_frame(&mut self, frame: Frame, addr: SocketAddr) {
        match frame.payload {
            FramePayload::Ping => {
                self.send_raw(FramePayload::Pong, addr);
            }
            FramePayload::ConnectRequest { salt } => {
                self.handle_connect_request(addr, salt);
            }
            FramePayload::Data(data) => {
                if let Some(connection) = self.peers.get_by_addr_mut(&addr) {
                    connection.touch();
                    let peer = connection.peer_id;
                    self.events.push_back(HostEvent::Packet { peer, data });
                }
            }
            FramePayload::KeepAlive => {
                if let Some(connection) = self.peers.get_by_addr_mut(&addr) {
                    connection.touch();
                }
            }
            FramePayload::Disconnect => {
                if let Some(connection) = self.peers.remove_by_addr(&addr) {
                    self.events.push_back(HostEvent::PeerDisconnected {
                        peer: connection.peer_id,
                        reason: DisconnectReason::Graceful,
                    });
                }
            }
            FramePayload::ConnectAccepted { .. }
            | FramePayload::ConnectDenied
            | FramePayload::Pong => {}
        }
    }

    fn handle_connect_request(&mut self, addr: SocketAddr, salt: u64) {
        let known = self.peers.get_by_addr(&addr).is_some_and(|p| p.salt == salt);
        if !self.accepting && !known {
            log::debug!("Denied connection from {}: not accepting", addr);
            self.send_raw(FramePayload::ConnectDenied, addr);
            self.events.push_back(HostEvent::ConnectionDenied {
                addr,
                reason: "not accepting new players",
            });
            return;
        }

        match self.peers.admit(addr, salt) {
            Ok((connection, created)) => {
                connection.touch();
                let peer = connection.peer_id;
                let sequence = connection.next_sequence();
                let frame = Frame::new(sequence, FramePayload::ConnectAccepted { peer_id: peer });

                if created {
                    log::info!("Peer {} connected from {}", peer, addr);
                    self.events.push_back(HostEvent::PeerConnected { peer, addr });
                }

                match send_frame(&self.socket, &frame, addr) {
                    Ok(bytes) => self.stats.record_sent(bytes),
                    Err(e) => log::warn!("Failed to accept {}: {}", addr, e),
                }
            }
            Err(AdmitError::Full) => {
                log::debug!("Denied connection from {}: server full", addr);
                self.send_raw(FramePayload::ConnectDenied, addr);
                self.events.push_back(HostEvent::ConnectionDenied {
                    addr,
                    reason: "server full",
                });
            }
        }
    }

    fn send_keepalives(&mut self) {
        let idle: Vec<(SocketAddr, u32)> = self
            .peers
            .iter_mut()
            .filter(|p| p.last_send_time.elapsed() >= KEEPALIVE_INTERVAL)
            .map(|p| (p.addr, p.next_sequence()))
            .collect();

        for (addr, sequence) in idle {
            let frame = Frame::new(sequence, FramePayload::KeepAlive);
            if let Ok(bytes) = send_frame(&self.socket, &frame, addr) {
                self.stats.record_sent(bytes);
            }
        }
    }

    fn send_raw(&mut self, payload: FramePayload, addr: SocketAddr) {
        match send_frame(&self.socket, &Frame::new(0, payload), addr) {
            Ok(bytes) => self.stats.record_sent(bytes),
            Err(e) => log::debug!("Send to {} failed: {}", addr, e),
        }
    }
}

impl Drop for HostEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::net::endpoint::{EndpointConfig, UdpConnection, UdpPinger};
    use crate::net::transport::{Pinger, Priority, Reliability, Transport, TransportEvent};

    fn host() -> HostEndpoint {
        HostEndpoint::bind("127.0.0.1:0", 4, Duration::from_secs(5)).unwrap()
    }

    fn pump_until<F: FnMut(&mut HostEndpoint, &mut Vec<HostEvent>) -> bool>(
        host: &mut HostEndpoint,
        mut done: F,
    ) -> Vec<HostEvent> {
        let mut seen = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            seen.extend(host.receive().unwrap());
            if done(host, &mut seen) {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        seen
    }

    fn next_event(connection: &mut UdpConnection, host: &mut HostEndpoint) -> TransportEvent {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            host.receive().unwrap();
            if let Some(event) = connection.receive() {
                return event;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("no transport event");
    }

    #[test]
    fn test_connect_and_exchange_data() {
        let mut host = host();
        let mut client = UdpConnection::open(host.local_addr(), EndpointConfig::default()).unwrap();

        assert_eq!(next_event(&mut client, &mut host), TransportEvent::ConnectionAccepted);
        let peer = client.local_id().unwrap();

        client.send(b"hello", Priority::Low, Reliability::ReliableOrdered).unwrap();
        let events = pump_until(&mut host, |_, seen| {
            seen.iter().any(|e| matches!(e, HostEvent::Packet { .. }))
        });
        assert!(events.contains(&HostEvent::Packet {
            peer,
            data: b"hello".to_vec()
        }));

        host.send_to(peer, b"world").unwrap();
        assert_eq!(
            next_event(&mut client, &mut host),
            TransportEvent::Packet(b"world".to_vec())
        );
    }

    #[test]
    fn test_not_accepting_denies() {
        let mut host = host();
        host.set_accepting(false);
        let mut client = UdpConnection::open(host.local_addr(), EndpointConfig::default()).unwrap();
        assert_eq!(next_event(&mut client, &mut host), TransportEvent::ConnectionFailed);
        assert_eq!(host.peer_count(), 0);
    }

    #[test]
    fn test_ping_is_answered() {
        let mut host = host();
        let pinger = UdpPinger::bind().unwrap();
        pinger.ping(host.local_addr()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut pong = None;
        while Instant::now() < deadline && pong.is_none() {
            host.receive().unwrap();
            pong = pinger.receive_pong();
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(pong, Some(host.local_addr()));
    }

    #[test]
    fn test_disconnect_is_reported() {
        let mut host = host();
        let mut client = UdpConnection::open(host.local_addr(), EndpointConfig::default()).unwrap();
        assert_eq!(next_event(&mut client, &mut host), TransportEvent::ConnectionAccepted);
        let peer = client.local_id().unwrap();

        drop(client);
        let events = pump_until(&mut host, |host, _| host.peer_count() == 0);
        assert!(events.contains(&HostEvent::PeerDisconnected {
            peer,
            reason: DisconnectReason::Graceful
        }));
    }
}
