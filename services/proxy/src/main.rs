use clap::{Arg, Command};
use proxy::{Proxy, ProxyConfig};
use tracing::{error, info};

fn env_or(var: &str, fallback: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| fallback.to_owned())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let defaults = ProxyConfig::default();
    let xsub_default = env_or("SKILLSCALE_PROXY_XSUB", &defaults.xsub_bind);
    let xpub_default = env_or("SKILLSCALE_PROXY_XPUB", &defaults.xpub_bind);

    let matches = Command::new("SkillScale Proxy")
        .version(env!("CARGO_PKG_VERSION"))
        .about("XPUB/XSUB forwarding broker for the SkillScale bus")
        .arg(
            Arg::new("xsub")
                .help("Endpoint publishers connect to (tcp://host:port)")
                .long("xsub")
                .default_value(xsub_default),
        )
        .arg(
            Arg::new("xpub")
                .help("Endpoint subscribers connect to (tcp://host:port)")
                .long("xpub")
                .default_value(xpub_default),
        )
        .arg(
            Arg::new("hwm")
                .help("Per-queue bound, in messages")
                .long("hwm")
                .value_parser(clap::value_parser!(usize))
                .default_value("50000"),
        )
        .get_matches();

    let config = ProxyConfig {
        xsub_bind: matches.get_one::<String>("xsub").cloned().expect("has default"),
        xpub_bind: matches.get_one::<String>("xpub").cloned().expect("has default"),
        hwm: *matches.get_one::<usize>("hwm").expect("has default"),
    };

    info!(version = env!("CARGO_PKG_VERSION"), "skillscale-proxy starting");

    let proxy = match Proxy::bind(&config).await {
        Ok(proxy) => proxy,
        Err(e) => {
            error!(error = %e, "failed to bind proxy endpoints");
            std::process::exit(1);
        }
    };

    if let Err(e) = proxy.run().await {
        error!(error = %e, "proxy terminated");
        std::process::exit(1);
    }
}
