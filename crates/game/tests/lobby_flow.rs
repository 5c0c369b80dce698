use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use volley::discovery::{DirectoryError, DirectoryFetch};
use volley::{
    ConnectionState, DiscoveryConfig, DiscoveryEvent, DiscoveryStrategy, HostConfig, HostSession,
    LobbyServer, LobbySession, LobbySubstate, LocalHost, RulesetEntry, ServerBrowser,
    SessionOrigin, UdpConnection, UdpConnector, UdpPinger, UserConfig, rules_checksum,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn wait_for<T, F: FnMut() -> Option<T>>(timeout_ms: u64, mut poll: F) -> Option<T> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if let Some(value) = poll() {
            return Some(value);
        }
        thread::sleep(Duration::from_millis(2));
    }
    None
}

fn host_config(port: u16) -> HostConfig {
    HostConfig {
        bind: "127.0.0.1".into(),
        port,
        name: "loopback".into(),
        speeds: vec![60, 75, 100],
        rulesets: vec![rules()],
        ..Default::default()
    }
}

const RULES_SCRIPT: &str = "__TITLE__ = \"Default\"\n__AUTHOR__ = \"tests\"\n";

fn rules() -> RulesetEntry {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("default.lua");
    fs::write(&path, RULES_SCRIPT).unwrap();
    RulesetEntry::from_script(&path).unwrap()
}

fn start_host(port: u16) -> HostSession {
    let server = LobbyServer::bind(host_config(port)).unwrap().logging_events();
    HostSession::start(server, 200).unwrap()
}

struct ListedDirectory(String);

impl DirectoryFetch for ListedDirectory {
    fn fetch(&self, _url: &str, _timeout: Duration) -> Result<String, DirectoryError> {
        Ok(self.0.clone())
    }
}

fn enter_lobby(server: volley::ServerInfo, name: &str) -> LobbySession<UdpConnection> {
    let mut config = UserConfig::default();
    config.left_player.name = name.into();

    let mut session =
        LobbySession::connect(&UdpConnector::default(), server, SessionOrigin::Direct, config)
            .unwrap();
    let entered = wait_for(2000, || {
        session.poll();
        (session.state() == ConnectionState::Connected && session.status().is_some()).then_some(())
    });
    assert!(entered.is_some(), "never entered the lobby");
    session
}

#[test]
fn test_direct_connect_enters_lobby() {
    let port = next_port();
    let _host = start_host(port);

    let mut browser = ServerBrowser::new(
        DiscoveryStrategy::Lan,
        Arc::new(UdpPinger::bind().unwrap()),
        UdpConnector::default(),
        DiscoveryConfig::default(),
    );
    browser.direct_connect(&format!("127.0.0.1:{}", port)).unwrap();

    let event = wait_for(2000, || browser.update()).expect("no lobby entry");
    let DiscoveryEvent::EnterLobby { server, origin } = event;
    assert_eq!(origin, SessionOrigin::Direct);
    assert_eq!(server.name, "loopback");
    assert!(server.is_at("127.0.0.1", port));
    assert_eq!(browser.probe_count(), 0);
}

#[test]
fn test_online_scan_lists_server() {
    let port = next_port();
    let _host = start_host(port);

    let dir = tempfile::tempdir().unwrap();
    let config = DiscoveryConfig {
        port,
        cache_path: dir.path().join("onlineserver.xml"),
        ..Default::default()
    };
    let document = format!(
        r#"<onlineserver><server><var host="127.0.0.1"/><var port="{}"/></server></onlineserver>"#,
        port
    );

    let mut browser = ServerBrowser::new(
        DiscoveryStrategy::Online,
        Arc::new(UdpPinger::bind().unwrap()),
        UdpConnector::default(),
        config.clone(),
    )
    .with_directory(Arc::new(ListedDirectory(document.clone())));
    browser.scan();

    let found = wait_for(3000, || {
        assert_eq!(browser.update(), None);
        (!browser.servers().is_empty()).then_some(())
    });
    assert!(found.is_some(), "server never showed up");
    assert_eq!(browser.servers()[0].name, "loopback");
    assert_eq!(fs::read_to_string(&config.cache_path).unwrap(), document);
}

#[test]
fn test_self_hosted_server_auto_advances() {
    let port = next_port();
    let mut local = LocalHost::new();
    let hosted = local
        .start(|| LobbyServer::bind(host_config(port)), 200)
        .unwrap()
        .clone();

    let dir = tempfile::tempdir().unwrap();
    let config = DiscoveryConfig {
        port,
        cache_path: dir.path().join("onlineserver.xml"),
        ..Default::default()
    };
    let document = format!(
        r#"<onlineserver><server><var host="127.0.0.1"/><var port="{}"/></server></onlineserver>"#,
        port
    );

    let mut browser = ServerBrowser::new(
        DiscoveryStrategy::Online,
        Arc::new(UdpPinger::bind().unwrap()),
        UdpConnector::default(),
        config,
    )
    .with_directory(Arc::new(ListedDirectory(document)));
    browser.set_hosted(Some(hosted));
    browser.scan();

    let event = wait_for(3000, || browser.update()).expect("no lobby entry");
    let DiscoveryEvent::EnterLobby { server, origin } = event;
    assert_eq!(origin, SessionOrigin::Online);
    assert_eq!(server.port, port);

    local.stop();
    assert!(!local.is_hosting());
}

#[test]
fn test_rehosting_reuses_the_port() {
    let port = next_port();
    let mut local = LocalHost::new();

    for _ in 0..3 {
        let hosted = local
            .start(|| LobbyServer::bind(host_config(port)), 200)
            .unwrap()
            .clone();
        assert_eq!(hosted.port, port);
        assert!(local.is_hosting());
    }

    let mut server = local.hosted().unwrap().clone();
    server.hostname = "127.0.0.1".into();
    let session = enter_lobby(server, "alice");
    assert_eq!(session.status().unwrap().possible_speeds, vec![60, 75, 100]);

    local.stop();
    assert!(!local.is_hosting());
}

#[test]
fn test_two_players_arrange_a_match() {
    let port = next_port();
    let host = start_host(port);
    let mut server = host.info().clone();
    server.hostname = "127.0.0.1".into();

    let mut alice = enter_lobby(server.clone(), "alice");
    let mut bob = enter_lobby(server, "bob");

    alice.open_game().unwrap();
    let opened = wait_for(2000, || {
        alice.poll();
        matches!(alice.substate(), LobbySubstate::Game(_)).then_some(())
    });
    assert!(opened.is_some(), "game never opened");
    assert!(alice.substate().as_game().unwrap().is_host);

    let listed = wait_for(2000, || {
        bob.poll();
        bob.status()
            .is_some_and(|s| s.open_games.len() == 1)
            .then_some(())
    });
    assert!(listed.is_some(), "game never listed");

    bob.select_game(1).unwrap();
    bob.join_selected_game().unwrap();
    let joined = wait_for(2000, || {
        bob.poll();
        alice.poll();
        let bob_in = matches!(bob.substate(), LobbySubstate::Game(_));
        let alice_sees = alice
            .substate()
            .as_game()
            .is_some_and(|g| g.other_player_names == vec!["bob".to_string()]);
        (bob_in && alice_sees).then_some(())
    });
    assert!(joined.is_some(), "join never completed");
    assert!(!bob.substate().as_game().unwrap().is_host);
    assert!(bob.start_game().is_err());

    alice.start_game().unwrap();
    let mut alice_handoff = None;
    let mut bob_handoff = None;
    wait_for(2000, || {
        alice_handoff = alice_handoff.take().or_else(|| alice.poll());
        bob_handoff = bob_handoff.take().or_else(|| bob.poll());
        (alice_handoff.is_some() && bob_handoff.is_some()).then_some(())
    })
    .expect("match never started");

    let alice_handoff = alice_handoff.unwrap();
    let bob_handoff = bob_handoff.unwrap();
    assert_eq!(alice_handoff.rules.checksum, rules_checksum(RULES_SCRIPT.as_bytes()));
    assert_eq!(alice_handoff.rules.score_to_win, 15);
    assert_eq!(bob_handoff.rules, alice_handoff.rules);
    assert_eq!(bob_handoff.game.game_id, alice_handoff.game.game_id);
}

#[test]
fn test_leaving_returns_to_main_view() {
    let port = next_port();
    let host = start_host(port);
    let mut server = host.info().clone();
    server.hostname = "127.0.0.1".into();

    let mut alice = enter_lobby(server, "alice");
    let prefs = alice.preferences().unwrap();

    alice.open_game().unwrap();
    wait_for(2000, || {
        alice.poll();
        matches!(alice.substate(), LobbySubstate::Game(_)).then_some(())
    })
    .expect("game never opened");

    alice.leave_game().unwrap();
    wait_for(2000, || {
        alice.poll();
        matches!(alice.substate(), LobbySubstate::Main(_)).then_some(())
    })
    .expect("never returned to the main view");

    let main = alice.substate().as_main().unwrap();
    assert_eq!(main.chosen_speed, prefs.speed);
    assert_eq!(main.chosen_score, prefs.score);
}

#[test]
fn test_stopped_host_drops_session() {
    let port = next_port();
    let mut host = start_host(port);
    let mut server = host.info().clone();
    server.hostname = "127.0.0.1".into();

    let mut alice = enter_lobby(server, "alice");
    host.stop();

    wait_for(2000, || {
        alice.poll();
        (alice.state() == ConnectionState::Disconnected).then_some(())
    })
    .expect("disconnect never noticed");
    assert!(alice.open_game().is_err());
}
