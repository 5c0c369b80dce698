use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scraper::{Html, Selector};
use tokio::time;

use crate::config::DiscoveryConfig;
use crate::net::DEFAULT_PORT;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("failed to start fetch runtime: {0}")]
    Runtime(std::io::Error),
    #[error("fetching {url} timed out")]
    Timeout { url: String },
    #[error("fetching {url} failed: {source}")]
    Fetch { url: String, source: reqwest::Error },
    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },
    #[error("failed to write cache {path}: {source}")]
    CacheWrite { path: PathBuf, source: std::io::Error },
    #[error("failed to read cache {path}: {source}")]
    CacheRead { path: PathBuf, source: std::io::Error },
    #[error("directory document is malformed: {0}")]
    Malformed(String),
}

/// Source of the online server directory.
pub trait DirectoryFetch: Send + Sync {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<String, DirectoryError>;
}

/// Plain HTTP GET, run on a private single-threaded runtime so the scan
/// thread can stay synchronous.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpDirectory;

impl DirectoryFetch for HttpDirectory {
    fn fetch(&self, url: &str, timeout: Duration) -> Result<String, DirectoryError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(DirectoryError::Runtime)?;

        runtime.block_on(async {
            let response = time::timeout(timeout, reqwest::get(url))
                .await
                .map_err(|_| DirectoryError::Timeout { url: url.into() })?
                .map_err(|source| DirectoryError::Fetch {
                    url: url.into(),
                    source,
                })?;

            if !response.status().is_success() {
                return Err(DirectoryError::Status {
                    url: url.into(),
                    status: response.status().as_u16(),
                });
            }

            time::timeout(timeout, response.text())
                .await
                .map_err(|_| DirectoryError::Timeout { url: url.into() })?
                .map_err(|source| DirectoryError::Fetch {
                    url: url.into(),
                    source,
                })
        })
    }
}

/// Fetches the directory and stores it verbatim in the cache file.
pub fn refresh_cache(
    fetcher: &dyn DirectoryFetch,
    config: &DiscoveryConfig,
) -> Result<(), DirectoryError> {
    let document = fetcher.fetch(&config.directory_url, config.fetch_timeout)?;
    fs::write(&config.cache_path, document).map_err(|source| DirectoryError::CacheWrite {
        path: config.cache_path.clone(),
        source,
    })
}

pub fn read_cache(path: &Path) -> Result<Vec<(String, u16)>, DirectoryError> {
    let document = fs::read_to_string(path).map_err(|source| DirectoryError::CacheRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_directory(&document)
}

/// Extracts `(host, port)` pairs from an `<onlineserver>` document. Each
/// `<server>` carries `<var host=".."/>` and `<var port=".."/>` entries;
/// a bad or missing port means the well-known one.
pub fn parse_directory(document: &str) -> Result<Vec<(String, u16)>, DirectoryError> {
    let root_selector = selector("onlineserver")?;
    let server_selector = selector("server")?;
    let var_selector = selector("var")?;

    let html = Html::parse_fragment(document);
    let Some(root) = html.select(&root_selector).next() else {
        return Err(DirectoryError::Malformed("no onlineserver element".into()));
    };

    let mut servers = Vec::new();
    for server in root.select(&server_selector) {
        let mut host = None;
        let mut port = DEFAULT_PORT;
        for var in server.select(&var_selector) {
            if let Some(value) = var.value().attr("host") {
                host = Some(value.trim().to_string());
            } else if let Some(value) = var.value().attr("port") {
                port = value
                    .trim()
                    .parse::<i64>()
                    .ok()
                    .filter(|p| (1..=65535).contains(p))
                    .map(|p| p as u16)
                    .unwrap_or(DEFAULT_PORT);
            }
        }
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            servers.push((host, port));
        }
    }
    Ok(servers)
}

fn selector(css: &str) -> Result<Selector, DirectoryError> {
    Selector::parse(css).map_err(|e| DirectoryError::Malformed(e.to_string()))
}

/// Everything an online scan should ping. Fetch and parse failures are
/// logged and only cost the directory entries.
pub fn online_candidates(
    fetcher: &dyn DirectoryFetch,
    config: &DiscoveryConfig,
    additional: Option<(String, u16)>,
) -> Vec<(String, u16)> {
    if let Err(e) = refresh_cache(fetcher, config) {
        log::warn!("Can't update server directory: {}", e);
    }

    let mut candidates = match read_cache(&config.cache_path) {
        Ok(servers) => servers,
        Err(e) => {
            log::warn!("Can't read server directory: {}", e);
            Vec::new()
        }
    };

    if let Some(server) = additional {
        candidates.push(server);
    }
    candidates
}
