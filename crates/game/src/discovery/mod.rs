mod directory;
mod scan;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::config::{DiscoveryConfig, parse_server_address};
use crate::lobby::SessionOrigin;
use crate::net::{
    ClientMessage, Connector, PacketError, Pinger, Priority, ProtocolVersion, Reliability,
    ServerInfo, ServerMessage, Transport, TransportEvent,
};

pub use directory::{
    DirectoryError, DirectoryFetch, HttpDirectory, online_candidates, parse_directory,
    read_cache, refresh_cache,
};
use scan::{ScanJob, ScanTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    Lan,
    Online,
}

impl From<DiscoveryStrategy> for SessionOrigin {
    fn from(strategy: DiscoveryStrategy) -> Self {
        match strategy {
            DiscoveryStrategy::Lan => SessionOrigin::Lan,
            DiscoveryStrategy::Online => SessionOrigin::Online,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// Go straight to the lobby of this server.
    EnterLobby {
        server: ServerInfo,
        origin: SessionOrigin,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeKind {
    Pong,
    Direct,
}

struct Probe<T> {
    addr: SocketAddr,
    transport: T,
    kind: ProbeKind,
    done: bool,
}

enum ProbeReply {
    Server(ServerInfo, ProbeKind),
    Outdated(ProtocolVersion),
}

/// Finds servers and turns their identification replies into a browse list.
/// Pings go out on a background thread; everything else happens in
/// `update`, which never blocks.
pub struct ServerBrowser<P: Pinger + 'static, C: Connector> {
    strategy: DiscoveryStrategy,
    pinger: Arc<P>,
    connector: C,
    directory: Arc<dyn DirectoryFetch>,
    config: DiscoveryConfig,
    additional: Option<(String, u16)>,
    scan: Option<ScanTask>,
    retired: Vec<ScanTask>,
    probes: Vec<Probe<C::Connection>>,
    servers: Vec<ServerInfo>,
    selected: usize,
    hosted: Option<ServerInfo>,
    update_notice: Option<ProtocolVersion>,
    duplicates: usize,
    pending: Option<DiscoveryEvent>,
}

impl<P: Pinger + 'static, C: Connector> ServerBrowser<P, C> {
    pub fn new(
        strategy: DiscoveryStrategy,
        pinger: Arc<P>,
        connector: C,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            strategy,
            pinger,
            connector,
            directory: Arc::new(HttpDirectory),
            config,
            additional: None,
            scan: None,
            retired: Vec::new(),
            probes: Vec::new(),
            servers: Vec::new(),
            selected: 0,
            hosted: None,
            update_notice: None,
            duplicates: 0,
            pending: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DirectoryFetch>) -> Self {
        self.directory = directory;
        self
    }

    /// Extra `host[:port]` pinged by online scans; blank means none.
    pub fn with_additional_server(mut self, address: &str) -> Self {
        let address = address.trim();
        self.additional = (!address.is_empty()).then(|| parse_server_address(address));
        self
    }

    pub fn strategy(&self) -> DiscoveryStrategy {
        self.strategy
    }

    pub fn servers(&self) -> &[ServerInfo] {
        &self.servers
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Record of the server this process hosts. Replies from it skip the
    /// browse list and go straight to its lobby.
    pub fn set_hosted(&mut self, hosted: Option<ServerInfo>) {
        self.hosted = hosted;
    }

    pub fn take_update_notice(&mut self) -> Option<ProtocolVersion> {
        self.update_notice.take()
    }

    pub fn has_update_notice(&self) -> bool {
        self.update_notice.is_some()
    }

    /// Starts a fresh scan. A running one is cancelled and its thread parked
    /// until it finishes; its late replies are still processed.
    pub fn scan(&mut self) {
        if let Some(previous) = self.scan.take() {
            previous.cancel();
            self.retired.push(previous);
        }
        self.reap_retired();

        self.servers.clear();
        self.selected = 0;

        let pinger: Arc<dyn Pinger> = self.pinger.clone();
        self.scan = Some(ScanTask::spawn(ScanJob {
            strategy: self.strategy,
            pinger,
            directory: Arc::clone(&self.directory),
            config: self.config.clone(),
            additional: self.additional.clone(),
        }));
    }

    /// Probes `host[:port]` without a ping and enters its lobby once it
    /// identifies itself.
    pub fn direct_connect(&mut self, address: &str) -> Result<(), crate::lobby::SessionError> {
        let (hostname, port) = parse_server_address(address.trim());
        let target = ServerInfo::default().with_address(hostname, port);
        let addr = crate::lobby::resolve_server(&target)?;
        self.open_probe(addr, ProbeKind::Direct);
        Ok(())
    }

    pub fn select(&mut self, index: usize) {
        self.selected = index.min(self.servers.len().saturating_sub(1));
    }

    pub fn selected(&self) -> Option<&ServerInfo> {
        self.servers.get(self.selected)
    }

    pub fn enter_selected(&self) -> Option<DiscoveryEvent> {
        self.selected().map(|server| DiscoveryEvent::EnterLobby {
            server: server.clone(),
            origin: self.strategy.into(),
        })
    }

    /// Processes pongs and probe replies. Call once per frame.
    pub fn update(&mut self) -> Option<DiscoveryEvent> {
        self.reap_retired();

        while let Some(addr) = self.pinger.receive_pong() {
            if self.probes.iter().any(|p| p.addr == addr) {
                log::debug!("Probe to {} already in flight", addr);
                continue;
            }
            log::debug!("Pong from {}, querying", addr);
            self.open_probe(addr, ProbeKind::Pong);
        }

        let mut replies = Vec::new();
        for probe in &mut self.probes {
            if let Some(reply) = poll_probe(probe) {
                replies.push(reply);
            }
        }

        self.probes.retain_mut(|probe| {
            if probe.done {
                probe.transport.disconnect();
            }
            !probe.done
        });

        for reply in replies {
            match reply {
                ProbeReply::Server(info, kind) => self.on_server(info, kind),
                ProbeReply::Outdated(version) => {
                    log::info!("Found server with protocol {}, client is outdated", version);
                    self.update_notice = Some(version);
                }
            }
        }

        self.pending.take()
    }

    fn open_probe(&mut self, addr: SocketAddr, kind: ProbeKind) {
        match self.connector.connect(addr) {
            Ok(transport) => self.probes.push(Probe {
                addr,
                transport,
                kind,
                done: false,
            }),
            Err(e) => log::warn!("Can't query {}: {}", addr, e),
        }
    }

    fn on_server(&mut self, info: ServerInfo, kind: ProbeKind) {
        log::debug!("Server {} answered", info);

        let index = match self.servers.iter().position(|s| *s == info) {
            Some(index) => {
                self.duplicates += 1;
                log::debug!("Duplicate server entry {}", info);
                index
            }
            None => {
                self.servers.push(info.clone());
                self.servers.len() - 1
            }
        };

        if self.pending.is_some() {
            return;
        }

        if kind == ProbeKind::Direct {
            self.selected = index;
            self.pending = Some(DiscoveryEvent::EnterLobby {
                server: info,
                origin: SessionOrigin::Direct,
            });
        } else if self.is_hosted(&info) {
            log::info!("Found own server at {}:{}", info.hostname, info.port);
            self.selected = index;
            self.pending = Some(DiscoveryEvent::EnterLobby {
                server: info,
                origin: self.strategy.into(),
            });
        }
    }

    fn is_hosted(&self, info: &ServerInfo) -> bool {
        let Some(hosted) = &self.hosted else {
            return false;
        };
        if hosted.port != info.port {
            return false;
        }
        hosted.hostname == info.hostname
            || info
                .hostname
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }

    fn reap_retired(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.retired.drain(..).partition(|task| task.is_finished());
        self.retired = running;
        for task in finished {
            task.join();
        }
    }
}

impl<P: Pinger + 'static, C: Connector> Drop for ServerBrowser<P, C> {
    fn drop(&mut self) {
        for probe in &mut self.probes {
            probe.transport.disconnect();
        }
        if let Some(task) = self.scan.take() {
            task.join();
        }
        for task in self.retired.drain(..) {
            task.join();
        }
    }
}

/// Drains one probe until it produced its single answer or died.
fn poll_probe<T: Transport>(probe: &mut Probe<T>) -> Option<ProbeReply> {
    while !probe.done {
        let event = probe.transport.receive()?;
        match event {
            TransportEvent::ConnectionAccepted => {
                let hello = ClientMessage::ServerPresent(ProtocolVersion::CURRENT).encode();
                if let Err(e) = probe
                    .transport
                    .send(&hello, Priority::Low, Reliability::ReliableOrdered)
                {
                    log::warn!("Failed to query {}: {}", probe.addr, e);
                    probe.done = true;
                }
            }
            TransportEvent::Packet(data) => {
                let addr = probe.transport.remote_addr();
                match ServerMessage::decode(&data, addr) {
                    Ok(ServerMessage::ServerPresent(info)) => {
                        probe.done = true;
                        return Some(ProbeReply::Server(info, probe.kind));
                    }
                    Ok(ServerMessage::VersionMismatch(version)) => {
                        probe.done = true;
                        return Some(ProbeReply::Outdated(version));
                    }
                    Err(PacketError::InvalidLength { expected, actual }) => {
                        log::debug!(
                            "Server at {} is invalid: {} bytes, expected {}",
                            addr,
                            actual,
                            expected
                        );
                        probe.done = true;
                    }
                    Ok(other) => log::debug!("Ignoring {:?} from {}", other, addr),
                    Err(e) => {
                        log::debug!("Malformed reply from {}: {}", addr, e);
                        probe.done = true;
                    }
                }
            }
            other => {
                log::debug!("Query to {} ended: {:?}", probe.addr, other);
                probe.done = true;
            }
        }
    }
    None
}
