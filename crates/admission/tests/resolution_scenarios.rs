//! End-to-end resolution through the public API: real socket files on disk,
//! scripted agents behind them.

use std::collections::HashMap;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use derp_admission::{
    AdmissionConfig, AdmissionError, NodeIdentity, StatusConnector, StatusSnapshot, StatusSource,
    Verifier,
};

fn key(n: u8) -> NodeIdentity {
    NodeIdentity::from_bytes([n; 32])
}

struct ScriptedAgent {
    snapshot: Mutex<StatusSnapshot>,
}

impl ScriptedAgent {
    fn new(self_key: NodeIdentity, peers: &[NodeIdentity]) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(StatusSnapshot::new(self_key, peers.iter().copied())),
        })
    }

    fn set_peers(&self, peers: &[NodeIdentity]) {
        let mut snapshot = self.snapshot.lock().unwrap();
        snapshot.peer_identities = peers.iter().copied().collect();
    }
}

#[async_trait]
impl StatusSource for ScriptedAgent {
    async fn status(&self) -> Result<StatusSnapshot, AdmissionError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct ScriptedConnector {
    agents: HashMap<String, Arc<ScriptedAgent>>,
}

impl StatusConnector for ScriptedConnector {
    fn connect(&self, socket: &Path) -> Arc<dyn StatusSource> {
        let name = socket.file_name().unwrap().to_string_lossy().into_owned();
        self.agents[&name].clone()
    }
}

struct Host {
    _dir: tempfile::TempDir,
    _sockets: Vec<UnixListener>,
    verifier: Verifier,
    s1: Arc<ScriptedAgent>,
}

/// Two agents: `s1` is K0 with peer K1, `s2` is K2 with peer K1.
fn host() -> Host {
    let dir = tempfile::tempdir().unwrap();
    let sockets = vec![
        UnixListener::bind(dir.path().join("s1")).unwrap(),
        UnixListener::bind(dir.path().join("s2")).unwrap(),
    ];

    let s1 = ScriptedAgent::new(key(0), &[key(1)]);
    let s2 = ScriptedAgent::new(key(2), &[key(1)]);
    let mut connector = ScriptedConnector::default();
    connector.agents.insert("s1".to_string(), s1.clone());
    connector.agents.insert("s2".to_string(), s2);

    let config = AdmissionConfig {
        sockets_dir: dir.path().to_path_buf(),
        ..AdmissionConfig::default()
    };
    let verifier = Verifier::with_connector(&config, Arc::new(connector));

    Host {
        _dir: dir,
        _sockets: sockets,
        verifier,
        s1,
    }
}

#[tokio::test]
async fn peer_of_first_agent_resolves_to_it() {
    let host = host();
    let socket = host.verifier.resolve(&key(1)).await.unwrap().unwrap();
    assert!(socket.ends_with("s1"));
}

#[tokio::test]
async fn agent_self_identity_resolves_to_it() {
    let host = host();
    let socket = host.verifier.resolve(&key(0)).await.unwrap().unwrap();
    assert!(socket.ends_with("s1"));
}

#[tokio::test]
async fn unknown_identity_resolves_to_nothing() {
    let host = host();
    assert!(host.verifier.resolve(&key(9)).await.unwrap().is_none());
}

#[tokio::test]
async fn departed_peer_falls_back_to_next_agent() {
    let host = host();
    let first = host.verifier.resolve(&key(1)).await.unwrap().unwrap();
    assert!(first.ends_with("s1"));

    host.s1.set_peers(&[]);
    let second = host.verifier.resolve(&key(1)).await.unwrap().unwrap();
    assert!(second.ends_with("s2"));

    let cached = host.verifier.cache().get(&key(1)).unwrap();
    assert!(cached.socket().ends_with("s2"));
}

#[tokio::test]
async fn purge_lifecycle_around_resolution() {
    let host = host();
    host.verifier.start().await.unwrap();
    assert!(host.verifier.resolve(&key(1)).await.unwrap().is_some());
    host.verifier.shutdown().await.unwrap();
}
