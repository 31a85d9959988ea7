use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use anyhow::{bail, Context};
use clap::Args;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub ai_service_url: String,
    pub upstream_timeout: Duration,
    pub outbound_buffer: usize,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Interface the HTTP and WebSocket listener binds to.
    #[arg(long, env = "ARCHWAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port shared by the HTTP API and the relay.
    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// Base URL of the AI service that `/api/v1/enhance` forwards to.
    #[arg(long, env = "AI_SERVICE_URL", default_value = "http://localhost:8000")]
    pub ai_service_url: String,

    /// Per-request timeout for calls to the AI service.
    #[arg(long, env = "ARCHWAY_UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Frames queued per connection before further relays to it are dropped.
    #[arg(long, env = "ARCHWAY_OUTBOUND_BUFFER", default_value_t = 64)]
    pub outbound_buffer: usize,

    /// Grace period applied during shutdown.
    #[arg(long, env = "ARCHWAY_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

impl TryFrom<ServeArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self, Self::Error> {
        let host: IpAddr = args
            .host
            .parse()
            .with_context(|| format!("invalid listen host: {}", args.host))?;
        if args.outbound_buffer == 0 {
            bail!("outbound buffer must be greater than zero");
        }
        if args.upstream_timeout_secs == 0 {
            bail!("upstream timeout must be greater than zero");
        }

        Ok(ServerConfig {
            listen_addr: SocketAddr::new(host, args.port),
            ai_service_url: normalize_base_url(&args.ai_service_url),
            upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
            outbound_buffer: args.outbound_buffer,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}

fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServeArgs {
        ServeArgs {
            host: "127.0.0.1".into(),
            port: 3001,
            ai_service_url: "http://localhost:8000".into(),
            upstream_timeout_secs: 30,
            outbound_buffer: 64,
            shutdown_grace_secs: 2,
        }
    }

    #[test_timeout::timeout]
    fn builds_listen_addr_from_host_and_port() {
        let config = ServerConfig::try_from(args()).expect("valid config");
        assert_eq!(config.listen_addr, "127.0.0.1:3001".parse().unwrap());
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
    }

    #[test_timeout::timeout]
    fn rejects_bad_host() {
        let mut args = args();
        args.host = "not-a-host".into();
        let err = ServerConfig::try_from(args).unwrap_err();
        assert!(err.to_string().contains("invalid listen host"));
    }

    #[test_timeout::timeout]
    fn rejects_zero_outbound_buffer() {
        let mut args = args();
        args.outbound_buffer = 0;
        assert!(ServerConfig::try_from(args).is_err());
    }

    #[test_timeout::timeout]
    fn normalizes_ai_service_url() {
        assert_eq!(normalize_base_url("localhost:8000/"), "http://localhost:8000");
        assert_eq!(
            normalize_base_url(" https://ai.internal/ "),
            "https://ai.internal"
        );
    }
}
