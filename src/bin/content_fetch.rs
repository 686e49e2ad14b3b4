//! content-fetch: 通过调度核心获取一个内容资源并打印每个阶段的结果
//!
//! Usage:
//!   content-fetch <path>            GET <path> through the cache and the network
//!
//! Configuration comes from the YAML file named by `CONTENT_CONFIG`, or
//! from the `CONTENT_API_*` environment variables when it is unset. An
//! initial session may be supplied with `CONTENT_ACCESS_TOKEN` and
//! `CONTENT_REFRESH_TOKEN`. Log verbosity follows `RUST_LOG`.

use anyhow::Context;
use content_dispatch::{listener_channel, ClientConfig, ContentClient, ListenerEvent, Origin, Session};
use std::env;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!(
        r#"content-fetch: fetch one resource through the dispatch core

USAGE:
    content-fetch <path>

ENVIRONMENT:
    CONTENT_CONFIG              YAML configuration file
    CONTENT_API_BASE_URL        API root (when CONTENT_CONFIG is unset)
    CONTENT_ACCESS_TOKEN        Initial access token
    CONTENT_REFRESH_TOKEN       Initial refresh token
    RUST_LOG                    Log filter, e.g. content_dispatch=debug"#
    );
}

async fn load_config() -> anyhow::Result<ClientConfig> {
    match env::var("CONTENT_CONFIG") {
        Ok(path) => Ok(ClientConfig::from_yaml_file(&path)
            .await
            .with_context(|| format!("reading configuration from {path}"))?
            .with_env_overrides()),
        Err(_) => Ok(ClientConfig::from_env()),
    }
}

fn initial_session() -> Session {
    let access = env::var("CONTENT_ACCESS_TOKEN").unwrap_or_default();
    let refresh = env::var("CONTENT_REFRESH_TOKEN").unwrap_or_default();
    if access.is_empty() {
        Session::default()
    } else {
        // Unknown lifetime; an hour keeps proactive refresh out of the way.
        Session::expiring_in(access, refresh, 3600)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let Some(path) = args.get(1) else {
        print_usage();
        std::process::exit(1);
    };
    if matches!(path.as_str(), "help" | "--help" | "-h") {
        print_usage();
        return Ok(());
    }

    let config = load_config().await?;
    let client: ContentClient<serde_json::Value> = ContentClient::builder(config)
        .session(initial_session())
        .build()
        .context("building content client")?;

    let (listener, mut events) = listener_channel();
    if !client.get(path.as_str(), listener) {
        anyhow::bail!("request queue rejected {path}");
    }

    let mut failed = false;
    while let Some(event) = events.recv().await {
        let done = event.is_network_outcome();
        failed |= print_event(event)?;
        if done {
            break;
        }
    }

    client.shutdown().await;
    // A session change is reported right after the outcome it came with.
    while let Ok(event) = events.try_recv() {
        print_event(event)?;
    }
    if failed {
        std::process::exit(2);
    }
    Ok(())
}

/// Print one event; returns whether it was a network failure.
fn print_event(event: ListenerEvent<serde_json::Value>) -> anyhow::Result<bool> {
    match event {
        ListenerEvent::Success { payload, origin, .. } => {
            println!("[{origin}] {}", serde_json::to_string_pretty(&payload)?);
            Ok(false)
        }
        ListenerEvent::Failure { message, origin, .. } => {
            eprintln!("[{origin}] error: {message}");
            Ok(origin == Origin::Network)
        }
        ListenerEvent::SessionChanged { session, .. } => {
            eprintln!("session refreshed, expires in {}s", session.seconds_until_expiry());
            Ok(false)
        }
    }
}
