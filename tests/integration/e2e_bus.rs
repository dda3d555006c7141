//! End-to-end bus scenarios: proxy + skill server(s) + client, all
//! in-process on dynamic ports, with POSIX-sh skills under temp trees.

use std::path::Path;
use std::time::Duration;

use proxy::{Proxy, ProxyConfig, ProxyHandle};
use skill_server::{MatcherMode, ServerConfig, ServerHandle, SkillServer};
use skillscale::{ClientConfig, ClientError, SkillClient};

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

/// Lay down `<topic_dir>/<name>/SKILL.md` plus a `scripts/run.sh`.
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

async fn start_server(
    xsub: &str,
    xpub: &str,
    topic_dir: &Path,
    topic: &str,
    matcher_mode: MatcherMode,
) -> ServerHandle {
    let config = ServerConfig {
        topic: topic.to_owned(),
        skills_dir: topic_dir.to_path_buf(),
        proxy_xsub: xsub.to_owned(),
        proxy_xpub: xpub.to_owned(),
        workers: 2,
        exec_timeout: Duration::from_secs(10),
        settle_time: Duration::from_millis(300),
        matcher_mode,
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

/// Reverse stdin (single line, no trailing newline expected).
const REVERSE_SH: &str = "#!/bin/sh\n\
awk '{ out = \"\"; for (i = length($0); i > 0; i--) out = out substr($0, i, 1); printf \"%s\", out }'\n";

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// A single-skill server echoes stdin reversed.
#[tokio::test]
async fn invoke_round_trips_through_a_skill_server() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("demo");
    write_skill(&topic_dir, "reverser", REVERSE_SH);
    let server = start_server(&xsub, &xpub, &topic_dir, "TOPIC_DEMO", MatcherMode::Single).await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    let result = client.invoke("TOPIC_DEMO", "hello", None).await.unwrap();
    assert_eq!(result, "olleh");
    assert_eq!(client.pending_count(), 0);

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// A failing skill surfaces exit code and stderr in the error.
#[tokio::test]
async fn failing_skill_reports_exit_code_and_stderr() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("err");
    write_skill(&topic_dir, "boom", "#!/bin/sh\necho bad >&2\nexit 2\n");
    let server = start_server(&xsub, &xpub, &topic_dir, "TOPIC_ERR", MatcherMode::Single).await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    match client.invoke("TOPIC_ERR", "x", None).await {
        Err(ClientError::Skill(message)) => {
            assert!(message.contains("exit=2"), "message: {message}");
            assert!(message.contains("bad"), "message: {message}");
        }
        other => panic!("expected SkillError, got {:?}", other),
    }

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// Parallel fan-out over two servers on disjoint topics keeps input order.
#[tokio::test]
async fn invoke_parallel_collects_results_in_input_order() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();

    let dir_a = root.path().join("alpha");
    write_skill(&dir_a, "suffix-a", "#!/bin/sh\nprintf '%s-ok' \"$(cat)\"\n");
    let server_a = start_server(&xsub, &xpub, &dir_a, "TOPIC_ALPHA", MatcherMode::Single).await;

    let dir_b = root.path().join("bravo");
    write_skill(&dir_b, "suffix-b", "#!/bin/sh\nprintf '%s-ok' \"$(cat)\"\n");
    let server_b = start_server(&xsub, &xpub, &dir_b, "TOPIC_BRAVO", MatcherMode::Single).await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    let requests = vec![
        ("TOPIC_ALPHA".to_owned(), "a".to_owned()),
        ("TOPIC_BRAVO".to_owned(), "b".to_owned()),
    ];
    let results = client.invoke_parallel(&requests, None).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].as_ref().unwrap(), "a-ok");
    assert_eq!(results[1].as_ref().unwrap(), "b-ok");

    client.close().await;
    server_a.stop().await;
    server_b.stop().await;
    proxy.shutdown();
}

/// Explicit mode: a two-skill server runs exactly the named skill with the
/// intent's `data` on stdin.
#[tokio::test]
async fn explicit_skill_selection_feeds_data_on_stdin() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("multi");
    write_skill(&topic_dir, "alpha", "#!/bin/sh\nprintf 'alpha:%s' \"$(cat)\"\n");
    write_skill(&topic_dir, "beta", "#!/bin/sh\nprintf 'beta:%s' \"$(cat)\"\n");
    let server = start_server(&xsub, &xpub, &topic_dir, "TOPIC_X", MatcherMode::ExactName).await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    let result = client
        .invoke("TOPIC_X", r#"{"skill":"alpha","data":"hi"}"#, None)
        .await
        .unwrap();
    assert_eq!(result, "alpha:hi");

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// Task mode with a matcher that finds nothing fails cleanly.
#[tokio::test]
async fn unmatched_task_fails_with_no_matching_skill() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("multi");
    write_skill(&topic_dir, "alpha", "#!/bin/sh\ncat\n");
    write_skill(&topic_dir, "beta", "#!/bin/sh\ncat\n");
    let server = start_server(&xsub, &xpub, &topic_dir, "TOPIC_X", MatcherMode::ExactName).await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    match client.invoke("TOPIC_X", r#"{"task":"unrelated"}"#, None).await {
        Err(ClientError::Skill(message)) => assert_eq!(message, "No matching skill"),
        other => panic!("expected SkillError, got {:?}", other),
    }

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// Task mode with an exact-name matcher picks the named skill.
#[tokio::test]
async fn exact_name_task_routes_to_that_skill() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("multi");
    write_skill(&topic_dir, "alpha", "#!/bin/sh\nprintf 'alpha:%s' \"$(cat)\"\n");
    write_skill(&topic_dir, "beta", "#!/bin/sh\nprintf 'beta:%s' \"$(cat)\"\n");
    let server = start_server(&xsub, &xpub, &topic_dir, "TOPIC_X", MatcherMode::ExactName).await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    // No `data`, so the task text itself goes to stdin.
    let result = client
        .invoke("TOPIC_X", r#"{"task":"beta"}"#, None)
        .await
        .unwrap();
    assert_eq!(result, "beta:beta");

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// Sequential invocation preserves order and stops at the first error.
#[tokio::test]
async fn invoke_sequential_stops_on_first_error() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("alpha");
    write_skill(&topic_dir, "suffix", "#!/bin/sh\nprintf '%s-ok' \"$(cat)\"\n");
    let server = start_server(&xsub, &xpub, &topic_dir, "TOPIC_ALPHA", MatcherMode::Single).await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    let ok = client
        .invoke_sequential(
            &[
                ("TOPIC_ALPHA".to_owned(), "one".to_owned()),
                ("TOPIC_ALPHA".to_owned(), "two".to_owned()),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(ok, vec!["one-ok".to_owned(), "two-ok".to_owned()]);

    // Second request targets a topic nobody serves: the call errors and
    // the third request is never issued.
    let requests = vec![
        ("TOPIC_ALPHA".to_owned(), "first".to_owned()),
        ("TOPIC_NONE".to_owned(), "second".to_owned()),
        ("TOPIC_ALPHA".to_owned(), "third".to_owned()),
    ];
    let result = client
        .invoke_sequential(&requests, Some(Duration::from_millis(500)))
        .await;
    assert!(matches!(result, Err(ClientError::Timeout(_))));

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}

/// Free-text intents reach the single skill's stdin unchanged.
#[tokio::test]
async fn free_text_intent_goes_to_the_single_skill() {
    let (xsub, xpub, proxy) = start_proxy().await;
    let root = tempfile::tempdir().unwrap();
    let topic_dir = root.path().join("demo");
    write_skill(&topic_dir, "echo", "#!/bin/sh\nprintf 'got:%s' \"$(cat)\"\n");
    let server = start_server(&xsub, &xpub, &topic_dir, "TOPIC_DEMO", MatcherMode::Single).await;

    let client = SkillClient::new(client_config(&xsub, &xpub));
    client.connect().await.unwrap();

    let result = client
        .invoke("TOPIC_DEMO", "free text intent", None)
        .await
        .unwrap();
    assert_eq!(result, "got:free text intent");

    // Empty intents are legal too.
    let result = client.invoke("TOPIC_DEMO", "", None).await.unwrap();
    assert_eq!(result, "got:");

    client.close().await;
    server.stop().await;
    proxy.shutdown();
}
