use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use volley::{HostConfig, HostedServer, LobbyServer, RulesetEntry, ServerEvent};

#[derive(Parser)]
#[command(name = "volley-server")]
#[command(about = "Dedicated volley lobby server")]
struct Args {
    #[arg(short, long, help = "TOML file with server settings")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(short, long)]
    max_clients: Option<usize>,

    #[arg(short, long, help = "Name shown in server lists")]
    name: Option<String>,

    #[arg(long, help = "Rules script to offer, may be repeated")]
    rules: Vec<PathBuf>,

    #[arg(long, help = "Stop after this many seconds")]
    run_for: Option<u64>,
}

impl Args {
    fn host_config(&self) -> Result<HostConfig> {
        let mut config = match &self.config {
            Some(path) => HostConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => HostConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if !self.rules.is_empty() {
            config.rulesets = self
                .rules
                .iter()
                .map(RulesetEntry::from_script)
                .collect::<Result<_, _>>()?;
        }

        anyhow::ensure!(config.tick_rate > 0, "tick rate must be positive");
        anyhow::ensure!(!config.speeds.is_empty(), "at least one speed is required");
        anyhow::ensure!(!config.rulesets.is_empty(), "at least one ruleset is required");
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.host_config()?;
    let tick = Duration::from_secs_f64(1.0 / config.tick_rate as f64);

    let mut server = LobbyServer::bind(config.clone())
        .with_context(|| format!("binding {}", config.bind_addr()))?;

    let deadline = args.run_for.map(|secs| Instant::now() + Duration::from_secs(secs));

    log::info!("Server {:?} started on {}", config.name, server.local_addr());

    loop {
        let started = Instant::now();
        server.process_packets();
        server.update_games();

        for event in server.drain_events() {
            log_event(&event);
        }

        if deadline.is_some_and(|d| started >= d) {
            break;
        }

        let elapsed = started.elapsed();
        if elapsed < tick {
            std::thread::sleep(tick - elapsed);
        }
    }

    log::info!("Server shutting down");
    server.shutdown();
    for event in server.drain_events() {
        log_event(&event);
    }

    let stats = server.stats();
    log::info!(
        "Sent {} packets ({} bytes), received {} packets ({} bytes)",
        stats.packets_sent,
        stats.bytes_sent,
        stats.packets_received,
        stats.bytes_received
    );

    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::Error { .. } => log::error!("{}", event),
        ServerEvent::ConnectionDenied { .. }
        | ServerEvent::RequestDenied { .. }
        | ServerEvent::VersionRejected { .. } => log::warn!("{}", event),
        _ => log::info!("{}", event),
    }
}
