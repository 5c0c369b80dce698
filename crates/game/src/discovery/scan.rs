use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::config::DiscoveryConfig;
use crate::net::Pinger;

use super::DiscoveryStrategy;
use super::directory::{DirectoryFetch, online_candidates};

/// One background scan. Raising the flag makes the thread stop before its
/// next ping; pings already sent are not recalled.
pub(crate) struct ScanTask {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

pub(crate) struct ScanJob {
    pub strategy: DiscoveryStrategy,
    pub pinger: Arc<dyn Pinger>,
    pub directory: Arc<dyn DirectoryFetch>,
    pub config: DiscoveryConfig,
    pub additional: Option<(String, u16)>,
}

impl ScanTask {
    pub fn spawn(job: ScanJob) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);

        let handle = thread::Builder::new()
            .name("server-scan".into())
            .spawn(move || run_scan(job, &flag));

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to start server scan: {}", e);
                None
            }
        };

        Self { cancel, handle }
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    pub fn join(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Server scan thread panicked");
            }
        }
    }
}

fn run_scan(job: ScanJob, cancel: &AtomicBool) {
    match job.strategy {
        DiscoveryStrategy::Lan => {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            let broadcast = SocketAddr::from((Ipv4Addr::BROADCAST, job.config.port));
            log::debug!("Broadcasting ping on port {}", job.config.port);
            if let Err(e) = job.pinger.ping(broadcast) {
                log::warn!("LAN ping failed: {}", e);
            }
        }
        DiscoveryStrategy::Online => {
            let candidates =
                online_candidates(job.directory.as_ref(), &job.config, job.additional);
            log::info!("Pinging {} online servers", candidates.len());

            for (host, port) in candidates {
                if cancel.load(Ordering::SeqCst) {
                    log::debug!("Server scan cancelled");
                    break;
                }
                ping_host(job.pinger.as_ref(), &host, port);
            }
        }
    }
}

fn ping_host(pinger: &dyn Pinger, host: &str, port: u16) {
    let addr = match (host, port).to_socket_addrs().map(|mut addrs| addrs.next()) {
        Ok(Some(addr)) => addr,
        Ok(None) => {
            log::warn!("No address for {}:{}", host, port);
            return;
        }
        Err(e) => {
            log::warn!("Failed to resolve {}:{}: {}", host, port, e);
            return;
        }
    };

    log::debug!("Pinging {}", addr);
    if let Err(e) = pinger.ping(addr) {
        log::warn!("Ping to {} failed: {}", addr, e);
    }
}
