use std::path::PathBuf;
use std::time::Duration;

use clap::{Arg, Command};
use skill_server::{MatcherMode, ServerConfig, SkillServer};
use tracing::{error, info};

fn env_or(var: &str, fallback: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback.to_owned())
}

fn validate_matcher_mode(value: &str) -> Result<MatcherMode, String> {
    value.parse()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let defaults = ServerConfig::default();

    let matches = Command::new("SkillScale Skill Server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Subscribes to a topic and executes matched skills")
        .arg(
            Arg::new("topic")
                .help("Topic to subscribe to, e.g. TOPIC_DATA_PROCESSING")
                .long("topic")
                .default_value(env_or("SKILLSCALE_TOPIC", &defaults.topic)),
        )
        .arg(
            Arg::new("description")
                .help("Informational description of this server")
                .long("description")
                .default_value(env_or("SKILLSCALE_DESCRIPTION", "")),
        )
        .arg(
            Arg::new("skills_dir")
                .help("Topic folder holding AGENTS.md and/or skill directories")
                .long("skills-dir")
                .default_value(env_or("SKILLSCALE_SKILLS_DIR", "./skills")),
        )
        .arg(
            Arg::new("xsub")
                .help("Proxy endpoint publishers connect to")
                .long("proxy-xsub")
                .default_value(env_or("SKILLSCALE_PROXY_XSUB", &defaults.proxy_xsub)),
        )
        .arg(
            Arg::new("xpub")
                .help("Proxy endpoint subscribers connect to")
                .long("proxy-xpub")
                .default_value(env_or("SKILLSCALE_PROXY_XPUB", &defaults.proxy_xpub)),
        )
        .arg(
            Arg::new("workers")
                .help("Worker pool size")
                .long("workers")
                .value_parser(clap::value_parser!(usize))
                .default_value(env_or("SKILLSCALE_WORKERS", "2")),
        )
        .arg(
            Arg::new("timeout")
                .help("Per-request execution timeout in seconds")
                .long("timeout")
                .value_parser(clap::value_parser!(u64))
                .default_value(env_or("SKILLSCALE_TIMEOUT", "120")),
        )
        .arg(
            Arg::new("matcher")
                .help("Matcher mode: single, exact-name, or external")
                .long("matcher")
                .value_parser(validate_matcher_mode)
                .default_value("single"),
        )
        .arg(
            Arg::new("matcher_command")
                .help("Callout command for --matcher external")
                .long("matcher-command"),
        )
        .arg(
            Arg::new("executor")
                .help("Interpreter override for skill executables")
                .long("executor"),
        )
        .get_matches();

    let config = ServerConfig {
        topic: matches.get_one::<String>("topic").cloned().expect("has default"),
        skills_dir: PathBuf::from(matches.get_one::<String>("skills_dir").expect("has default")),
        description: matches
            .get_one::<String>("description")
            .cloned()
            .expect("has default"),
        proxy_xsub: matches.get_one::<String>("xsub").cloned().expect("has default"),
        proxy_xpub: matches.get_one::<String>("xpub").cloned().expect("has default"),
        workers: *matches.get_one::<usize>("workers").expect("has default"),
        exec_timeout: Duration::from_secs(*matches.get_one::<u64>("timeout").expect("has default")),
        matcher_mode: *matches.get_one::<MatcherMode>("matcher").expect("has default"),
        matcher_command: matches.get_one::<String>("matcher_command").map(PathBuf::from),
        executor: matches.get_one::<String>("executor").cloned(),
        ..ServerConfig::default()
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        topic = %config.topic,
        skills_dir = %config.skills_dir.display(),
        workers = config.workers,
        "skillscale-server starting"
    );

    let server = match SkillServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "server configuration failed");
            std::process::exit(1);
        }
    };

    let handle = match server.start().await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "server startup failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal handler failed");
    }
    info!("shutdown signal received");
    handle.stop().await;
}
