use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::protocol::{Envelope, SignalPayload};

#[derive(Parser, Debug)]
#[command(name = "peerhub")]
#[command(about = "Peer rendezvous and signaling relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running relay, optionally send a text message, and
    /// print relayed traffic
    Probe {
        /// Relay URL (e.g., ws://localhost:5000)
        #[arg(short, long, default_value = "ws://localhost:5000")]
        url: String,

        /// Text message to send once connected
        #[arg(short, long)]
        message: Option<String>,

        /// Peer id to address; broadcast when omitted
        #[arg(short, long)]
        to: Option<String>,

        /// Seconds to keep listening before exiting
        #[arg(long, default_value_t = 10)]
        listen_secs: u64,
    },
}

pub async fn run_probe(
    url: String,
    message: Option<String>,
    to: Option<String>,
    listen_secs: u64,
) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));
    debug!("connecting to {}", ws_url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            return Err(anyhow::anyhow!("connection failed: {e}"));
        }
        Err(_) => {
            return Err(anyhow::anyhow!(
                "connection timeout - is the relay running?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    // the first text frame is the welcome carrying our assigned id
    let welcome = timeout(Duration::from_secs(5), async {
        while let Some(msg) = read.next().await {
            if let Message::Text(text) = msg? {
                let value: serde_json::Value = serde_json::from_str(&text)?;
                if value["type"] == "id" {
                    return Ok::<_, anyhow::Error>(value);
                }
            }
        }
        Err(anyhow::anyhow!("connection closed before welcome"))
    })
    .await
    .map_err(|_| anyhow::anyhow!("no welcome received within 5 seconds"))??;

    println!("connected as {}", welcome["id"]);
    println!("current peers: {}", welcome["peers"]);

    if let Some(content) = message {
        let envelope = Envelope {
            payload: SignalPayload::TextMessage {
                content: Some(content),
            },
            to,
            from: None,
            timestamp: None,
        };
        let text = serde_json::to_string(&envelope)?;
        write.send(Message::Text(text.into())).await?;
        println!("message sent");
    }

    let listen = async {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => println!("{text}"),
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    let _ = timeout(Duration::from_secs(listen_secs), listen).await;

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
