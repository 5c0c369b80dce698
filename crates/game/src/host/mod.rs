use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::net::ServerInfo;

/// What the host loop drives each tick.
pub trait HostedServer: Send {
    /// Identification record advertised to clients.
    fn info(&self) -> ServerInfo;

    fn allow_new_players(&mut self, allow: bool);

    fn has_active_game(&self) -> bool;

    fn process_packets(&mut self);

    fn update_games(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("failed to bind host: {0}")]
    Bind(io::Error),
    #[error("failed to start host thread: {0}")]
    Spawn(io::Error),
    #[error("tick rate must be positive")]
    InvalidTickRate,
}

/// A dedicated server running on a background thread. Dropping or stopping
/// the handle always joins the thread.
pub struct HostSession {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    info: ServerInfo,
}

impl HostSession {
    /// Runs `server` until stopped. Its advertised record is completed with
    /// this machine's address so discovery can recognise replies from it.
    pub fn start<S>(server: S, tick_rate: u32) -> Result<Self, HostError>
    where
        S: HostedServer + 'static,
    {
        if tick_rate == 0 {
            return Err(HostError::InvalidTickRate);
        }

        let info = server.info();

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let tick = Duration::from_secs_f64(1.0 / tick_rate as f64);

        let handle = thread::Builder::new()
            .name("dedicated-host".into())
            .spawn(move || run_host(server, &flag, tick))
            .map_err(HostError::Spawn)?;

        let port = info.port;
        let info = info.with_address(local_ip().to_string(), port);
        log::info!("Hosting {} at {}:{}", info.name, info.hostname, info.port);

        Ok(Self {
            cancel,
            handle: Some(handle),
            info,
        })
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Raises the cancel flag and waits for the loop to exit.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Host thread panicked");
            }
            log::info!("Stopped hosting {}", self.info.name);
        }
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Owner of at most one self-hosted server.
#[derive(Default)]
pub struct LocalHost {
    session: Option<HostSession>,
}

impl LocalHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stops whatever was hosted before, then builds and starts a new
    /// server. `build` runs only after the old loop has exited and released
    /// its socket, so re-hosting on the same port works.
    pub fn start<S, F>(&mut self, build: F, tick_rate: u32) -> Result<&ServerInfo, HostError>
    where
        S: HostedServer + 'static,
        F: FnOnce() -> io::Result<S>,
    {
        self.stop();
        let server = build().map_err(HostError::Bind)?;
        let session = self.session.insert(HostSession::start(server, tick_rate)?);
        Ok(session.info())
    }

    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
    }

    pub fn hosted(&self) -> Option<&ServerInfo> {
        self.session.as_ref().map(HostSession::info)
    }

    pub fn is_hosting(&self) -> bool {
        self.session.as_ref().is_some_and(HostSession::is_running)
    }
}

fn run_host<S: HostedServer>(mut server: S, cancel: &AtomicBool, tick: Duration) {
    let mut next_tick = Instant::now();

    while !cancel.load(Ordering::SeqCst) {
        let active = server.has_active_game();
        server.allow_new_players(!active);
        server.process_packets();
        server.update_games();

        next_tick += tick;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        } else {
            next_tick = now;
        }
    }
}

/// Address other machines on the network would reach us at. No packet is
/// sent; connecting a UDP socket only selects the outgoing interface.
fn local_ip() -> IpAddr {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|socket| socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).map(|_| socket))
        .and_then(|socket| socket.local_addr());

    match probe {
        Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
