//! Fault tolerance: timeouts, pending-table hygiene, lifecycle
//! idempotence, and waiter isolation under concurrency.

use std::path::Path;
use std::time::{Duration, Instant};

use proxy::{Proxy, ProxyConfig, ProxyHandle};
use skill_server::{MatcherMode, ServerConfig, ServerHandle, SkillServer};
use skillscale::{ClientConfig, ClientError, SkillClient};
use ss_protocol::ResponseEnvelope;
use ss_transport::PubSocket;

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

async fn start_proxy() -> (String, String, ProxyHandle) {
    let config = ProxyConfig {
        xsub_bind: "tcp://127.0.0.1:0".to_owned(),
        xpub_bind: "tcp://127.0.0.1:0".to_owned(),
        hwm: 4096,
    };
    let broker = Proxy::bind(&config).await.expect("bind proxy");
    let xsub = broker.xsub_endpoint();
    let xpub = broker.xpub_endpoint();
    let handle = broker.handle();
    tokio::spawn(async move {
        broker.run().await.expect("proxy run");
    });
    (xsub, xpub, handle)
}

fn write_skill(topic_dir: &Path, name: &str, script_body: &str) {
    let skill_dir = topic_dir.join(name);
    let scripts = skill_dir.join("scripts");
    std::fs::create_dir_all(&scripts).unwrap();
    std::fs::write(
        skill_dir.join("SKILL.md"),
        format!("---\nname: {name}\ndescription: {name} test skill\n---\n\nRuns {name}.\n"),
    )
    .unwrap();
    std::fs::write(scripts.join("run.sh"), script_body).unwrap();
}

async fn start_echo_server(xsub: &str, xpub: &str, topic_dir: &Path, topic: &str) -> ServerHandle {
    write_skill(topic_dir, "echo", "#!/bin/sh\nprintf '%s-ok' \"$(cat)\"\n");
    let config = ServerConfig {
        topic: topic.to_owned(),
        skills_dir: topic_dir.to_path_buf(),
        proxy_xsub: xsub.to_owned(),
        proxy_xpub: xpub.to_owned(),
        workers: 4,
        exec_timeout: Duration::from_secs(10),
        settle_time: Duration::from_millis(300),
        matcher_mode: MatcherMode::Single,
        ..ServerConfig::default()
    };
    SkillServer::new(config)
        .expect("server config")
        .start()
        .await
        .expect("server start")
}

fn client_config(xsub: &str, xpub: &str) -> ClientConfig {
    ClientConfig {
        proxy_xsub: xsub.to_owned(),
        proxy_xpub: xpub.to_owned(),
        default_timeout: Duration::from_secs(10),
        settle_time: Duration::from_millis(300),
        ..ClientConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// With no server on the topic, invoke fails with Timeout close to the
/// requested deadline.
#[tokio::test]
async fn timeout_fires_when_nobody_serves_the_topic() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    let started = Instant::now();
    let result = client
        .invoke("TOPIC_NONE", "x", Some(Duration::from_secs(1)))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ClientError::Timeout(_))));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1300), "elapsed: {elapsed:?}");

    client.close().await;
    proxy.shutdown();
}

/// Timed-out requests never accumulate in the pending table.
#[tokio::test]
async fn repeated_timeouts_do_not_leak_pending_entries() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    for _ in 0..5 {
        let result = client
            .invoke("TOPIC_NOWHERE", "test", Some(Duration::from_millis(300)))
            .await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }
    assert_eq!(client.pending_count(), 0);

    client.close().await;
    proxy.shutdown();
}

/// Calling invoke before connect is a programmer error, not a hang.
#[tokio::test]
async fn invoke_before_connect_is_not_connected() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let client = SkillClient::new(client_config(&xsub, &xpub));
    let result = client.invoke("TOPIC_ANY", "x", None).await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
    proxy.shutdown();
}

/// connect / close / connect leaves a fully functional client, and both
/// lifecycle calls are idempotent.
#[tokio::test]
async fn reconnect_cycle_leaves_a_working_client() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("demo");
    let server = start_echo_server(&xsub, &xpub, &topic_dir, "TOPIC_DEMO").await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();
    client.connect().await.unwrap(); // no-op
    assert!(client.is_connected().await);

    client.close().await;
    client.close().await; // no-op
    assert!(!client.is_connected().await);

    client.connect().await.unwrap();
    let result = client.invoke("TOPIC_DEMO", "again", None).await.unwrap();
    assert_eq!(result, "again-ok");

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// close() cancels in-flight waiters and empties the pending table.
#[tokio::test]
async fn close_cancels_outstanding_requests() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let client = std::sync::Arc::new(SkillClient::new(client_config(&xsub, &xpub)));
    client.connect().await.unwrap();

    let invoker = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .invoke("TOPIC_VOID", "never answered", Some(Duration::from_secs(30)))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.pending_count(), 1);

    client.close().await;

    let result = invoker.await.unwrap();
    assert!(matches!(result, Err(ClientError::NotConnected)));
    assert_eq!(client.pending_count(), 0);
    proxy.shutdown();
}

/// A response carrying an unknown request_id is dropped without touching
/// other in-flight work.
#[tokio::test]
async fn unknown_request_id_responses_are_ignored() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("demo");
    let server = start_echo_server(&xsub, &xpub, &topic_dir, "TOPIC_DEMO").await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    // Forge a response for a request the client never issued.
    let rogue = PubSocket::connect(&xsub, 64).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let forged = ResponseEnvelope::success("feedfacefeedface".to_owned(), "ghost".to_owned());
    rogue.send(vec![
        client.client_id().as_bytes().to_vec(),
        serde_json::to_vec(&forged).unwrap(),
    ]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(client.pending_count(), 0);
    // Unrelated work is unaffected.
    let result = client.invoke("TOPIC_DEMO", "still fine", None).await.unwrap();
    assert_eq!(result, "still fine-ok");

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// A burst of concurrent invokes resolves every waiter to its own
/// response, with unique request ids.
#[tokio::test]
async fn concurrent_invokes_resolve_to_their_own_responses() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("burst");
    let server = start_echo_server(&xsub, &xpub, &topic_dir, "TOPIC_BURST").await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    let requests: Vec<(String, String)> = (0..20)
        .map(|i| ("TOPIC_BURST".to_owned(), format!("msg-{i}")))
        .collect();
    let results = client.invoke_parallel(&requests, None).await;

    assert_eq!(results.len(), 20);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.as_ref().unwrap(), &format!("msg-{i}-ok"));
    }
    assert_eq!(client.pending_count(), 0);

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// Malformed payloads on the reply topic never kill the listener.
#[tokio::test]
async fn garbage_on_the_reply_topic_is_survivable() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("demo");
    let server = start_echo_server(&xsub, &xpub, &topic_dir, "TOPIC_DEMO").await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    let rogue = PubSocket::connect(&xsub, 64).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    rogue.send(vec![
        client.client_id().as_bytes().to_vec(),
        b"this is not json".to_vec(),
    ]);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let result = client.invoke("TOPIC_DEMO", "alive", None).await.unwrap();
    assert_eq!(result, "alive-ok");

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}
