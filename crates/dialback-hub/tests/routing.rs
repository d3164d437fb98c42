//! Routing integration tests: a real hub on an ephemeral port, with
//! scripted agent and client peers speaking the wire protocol.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;

use dialback_core::{version, AgentId, SessionId};
use dialback_hub::{Directory, HubServer};
use dialback_protocol::messages::{
    encode_payload, RegisterParams, RegisterResult, SessionDataParams, SessionStartParams,
    METHOD_AGENT_REGISTER, METHOD_SESSION_DATA, METHOD_SESSION_START,
};
use dialback_protocol::{ws, Handler, Inbound, ProtocolError, RpcConn};

/// Records inbound notifications on a scripted peer
struct Recorder {
    inbound: Mutex<Vec<Inbound>>,
}

impl Recorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inbound: Mutex::new(Vec::new()),
        })
    }

    fn payloads(&self, method: &str) -> Vec<String> {
        self.inbound
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.method == method)
            .filter_map(|i| i.params.as_ref())
            .filter_map(|p| p["payload"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Handler for Recorder {
    async fn handle(&self, _conn: &RpcConn, inbound: Inbound) {
        self.inbound.lock().unwrap().push(inbound);
    }
}

async fn start_hub(security_key: Option<String>) -> (SocketAddr, Arc<Directory>) {
    let server = HubServer::new(security_key);
    let directory = server.directory();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (addr, directory)
}

async fn dial_peer(
    addr: SocketAddr,
    security_key: Option<&str>,
) -> Result<(RpcConn, Arc<Recorder>), ProtocolError> {
    let url = format!("ws://{addr}/ws");
    let (sink, source) = ws::dial(&url, version::version(), security_key).await?;
    let recorder = Recorder::new();
    let conn = RpcConn::spawn(sink, source, Arc::clone(&recorder) as _);
    Ok((conn, recorder))
}

async fn register(conn: &RpcConn, agent_id: &str) -> RegisterResult {
    conn.call(
        METHOD_AGENT_REGISTER,
        &RegisterParams {
            agent_id: agent_id.to_string(),
            name: format!("{agent_id}-name"),
            hostname: None,
            platform: None,
        },
    )
    .await
    .unwrap()
}

/// Poll a condition until it holds or the deadline passes
macro_rules! wait_until {
    ($what:expr, $cond:expr) => {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !$cond {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", $what))
    };
}

async fn hub_session_exists(directory: &Directory, agent: &str, session: &str) -> bool {
    match directory.get_agent(&AgentId::new(agent)).await {
        Some(record) => record.get_session(&SessionId::new(session)).await.is_some(),
        None => false,
    }
}

fn expect_dial_error<T>(outcome: Result<T, ProtocolError>) -> ProtocolError {
    match outcome {
        Err(e) => e,
        Ok(_) => panic!("handshake should have been rejected"),
    }
}

#[tokio::test]
async fn wrong_security_key_is_rejected_with_401() {
    let (addr, _directory) = start_hub(Some("secret".to_string())).await;

    let err = expect_dial_error(dial_peer(addr, Some("wrong")).await);
    assert!(
        matches!(&err, ProtocolError::Handshake(msg) if msg.contains("401")),
        "unexpected error: {err}"
    );

    let err = expect_dial_error(dial_peer(addr, None).await);
    assert!(matches!(&err, ProtocolError::Handshake(msg) if msg.contains("401")));

    // The right key gets through.
    let (conn, _recorder) = dial_peer(addr, Some("secret")).await.unwrap();
    assert!(register(&conn, "A1").await.success);
}

#[tokio::test]
async fn version_skew_is_rejected_with_412() {
    let (addr, _directory) = start_hub(None).await;

    let url = format!("ws://{addr}/ws");
    let err = expect_dial_error(ws::dial(&url, "0.0.0-bogus", None).await);
    assert!(
        matches!(&err, ProtocolError::Handshake(msg) if msg.contains("412")),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn concurrent_duplicate_register_has_one_winner() {
    let (addr, directory) = start_hub(None).await;

    let (first, _r1) = dial_peer(addr, None).await.unwrap();
    let (second, _r2) = dial_peer(addr, None).await.unwrap();

    let (a, b) = tokio::join!(register(&first, "A1"), register(&second, "A1"));
    assert!(a.success != b.success, "exactly one register must win");
    let loser = if a.success { b } else { a };
    assert!(loser.message.unwrap().contains("already registered"));

    assert_eq!(directory.agent_count().await, 1);
}

#[tokio::test]
async fn unknown_agent_start_creates_no_session() {
    let (addr, directory) = start_hub(None).await;

    let (client, recorder) = dial_peer(addr, None).await.unwrap();
    client
        .notify(
            METHOD_SESSION_START,
            &SessionStartParams {
                agent_id: Some("nope".into()),
                session_id: "S1".into(),
                shell: Some("/bin/sh".into()),
            },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(directory.snapshot_sessions().await.is_empty());
    assert!(recorder.inbound.lock().unwrap().is_empty(), "no bytes may flow");
}

#[tokio::test]
async fn data_round_trip_preserves_per_direction_order() {
    let (addr, directory) = start_hub(None).await;

    let (agent, agent_recorder) = dial_peer(addr, None).await.unwrap();
    assert!(register(&agent, "A1").await.success);

    let (client, client_recorder) = dial_peer(addr, None).await.unwrap();
    client
        .notify(
            METHOD_SESSION_START,
            &SessionStartParams {
                agent_id: Some("A1".into()),
                session_id: "S1".into(),
                shell: Some("/bin/sh".into()),
            },
        )
        .await
        .unwrap();

    wait_until!(
        "session record",
        hub_session_exists(&directory, "A1", "S1").await
    );
    let record = directory.get_agent(&AgentId::new("A1")).await.unwrap();
    assert_eq!(record.session_count().await, 1);

    // Client -> agent: 50 numbered chunks.
    for i in 0..50 {
        client
            .notify(
                METHOD_SESSION_DATA,
                &SessionDataParams {
                    agent_id: Some("A1".into()),
                    session_id: "S1".into(),
                    payload: encode_payload(format!("c{i}").as_bytes()),
                },
            )
            .await
            .unwrap();
    }

    wait_until!(
        "all forward chunks",
        agent_recorder.payloads(METHOD_SESSION_DATA).len() == 50
    );
    let expected: Vec<String> = (0..50)
        .map(|i| encode_payload(format!("c{i}").as_bytes()))
        .collect();
    assert_eq!(agent_recorder.payloads(METHOD_SESSION_DATA), expected);

    // Agent -> client: 50 numbered chunks on the return path.
    for i in 0..50 {
        agent
            .notify(
                METHOD_SESSION_DATA,
                &SessionDataParams {
                    agent_id: None,
                    session_id: "S1".into(),
                    payload: encode_payload(format!("a{i}").as_bytes()),
                },
            )
            .await
            .unwrap();
    }

    wait_until!(
        "all return chunks",
        client_recorder.payloads(METHOD_SESSION_DATA).len() == 50
    );
    let expected: Vec<String> = (0..50)
        .map(|i| encode_payload(format!("a{i}").as_bytes()))
        .collect();
    assert_eq!(client_recorder.payloads(METHOD_SESSION_DATA), expected);
}

#[tokio::test]
async fn agent_disappearance_cleans_the_directory() {
    let (addr, directory) = start_hub(None).await;

    let (agent, _ar) = dial_peer(addr, None).await.unwrap();
    assert!(register(&agent, "A1").await.success);

    let (client, _cr) = dial_peer(addr, None).await.unwrap();
    client
        .notify(
            METHOD_SESSION_START,
            &SessionStartParams {
                agent_id: Some("A1".into()),
                session_id: "S1".into(),
                shell: Some("/bin/sh".into()),
            },
        )
        .await
        .unwrap();

    wait_until!(
        "session record",
        hub_session_exists(&directory, "A1", "S1").await
    );

    // Kill the agent's transport abruptly.
    agent.close();

    wait_until!("directory cleanup", directory.agent_count().await == 0);
    assert!(directory.snapshot_sessions().await.is_empty());
}

#[tokio::test]
async fn client_listing_sees_registered_agents() {
    use dialback_protocol::messages::{
        ListAgentsParams, ListAgentsResult, ListSessionsParams, ListSessionsResult,
        METHOD_AGENT_LIST, METHOD_SESSION_LIST,
    };

    let (addr, _directory) = start_hub(None).await;

    let (agent, _ar) = dial_peer(addr, None).await.unwrap();
    assert!(register(&agent, "A1").await.success);

    let (client, _cr) = dial_peer(addr, None).await.unwrap();

    let agents: ListAgentsResult = client
        .call(METHOD_AGENT_LIST, &ListAgentsParams {})
        .await
        .unwrap();
    assert_eq!(agents.count, 1);
    assert_eq!(agents.agents[0].id, "A1");
    assert_eq!(agents.agents[0].name, "A1-name");
    assert_eq!(agents.agents[0].session_count, 0);

    let sessions: ListSessionsResult = client
        .call(METHOD_SESSION_LIST, &ListSessionsParams {})
        .await
        .unwrap();
    assert_eq!(sessions.count, 0);
}
