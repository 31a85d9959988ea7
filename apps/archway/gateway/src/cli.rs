use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::config::ServeArgs;

#[derive(Parser, Debug)]
#[command(name = "archway-gateway", author, version)]
#[command(about = "Archway prompt gateway and real-time relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server options (used when no subcommand is given)
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a running relay as a peer and print what it relays
    Tap(TapArgs),
}

#[derive(Args, Debug)]
pub struct TapArgs {
    /// Relay URL (e.g., ws://localhost:3001)
    #[arg(short, long, default_value = "ws://localhost:3001")]
    pub url: String,

    /// Text message to send once connected
    #[arg(short, long)]
    pub send: Option<String>,

    /// Stop listening after this many seconds (listen until closed if omitted)
    #[arg(short, long)]
    pub duration: Option<u64>,
}

pub async fn run_tap(args: TapArgs) -> Result<()> {
    debug!("connecting to relay at {}", args.url);

    let connect = connect_async(args.url.as_str());
    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("failed to connect to {}: {}", args.url, e);
            return Err(anyhow!("connection failed: {}", e));
        }
        Err(_) => {
            error!("connection to {} timed out after 5 seconds", args.url);
            return Err(anyhow!("connection timeout"));
        }
    };

    let (mut write, mut read) = ws_stream.split();

    if let Some(text) = args.send {
        write.send(Message::text(text)).await?;
    }

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, read.next()).await {
                Ok(next) => next,
                Err(_) => break,
            },
            None => read.next().await,
        };

        match next {
            Some(Ok(Message::Text(text))) => println!("{}", text.as_str()),
            Some(Ok(Message::Binary(bytes))) => println!("<binary {} bytes>", bytes.len()),
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(anyhow!("relay connection error: {}", e)),
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
