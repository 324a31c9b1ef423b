//! Relay WebSocket client.
//!
//! Single-shot by design: if the relay connection drops, the run is over
//! and the operator reruns the command. Frames that fail to decode are
//! dropped without comment; with external envelope encryption in play,
//! undecodable frames are expected traffic.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::protocol::RelayMessage;

/// Characters used for generated network names, matching what the drop.lol
/// web client produces.
const NETWORK_NAME_CHARSET: &[u8] = b"CEFGHJKMNPQRTVWXY";
const NETWORK_NAME_LEN: usize = 5;

/// Generate a random network name like "KXQPT".
pub fn random_network_name() -> String {
    let mut rng = rand::thread_rng();
    (0..NETWORK_NAME_LEN)
        .map(|_| NETWORK_NAME_CHARSET[rng.gen_range(0..NETWORK_NAME_CHARSET.len())] as char)
        .collect()
}

/// Cloneable handle for queueing outbound relay messages, usable from
/// connection callbacks.
#[derive(Clone)]
pub struct RelaySender {
    tx: mpsc::Sender<RelayMessage>,
}

impl RelaySender {
    pub async fn send(&self, msg: RelayMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("relay connection closed"))
    }
}

/// Message-oriented connection to the relay.
pub struct RelayClient {
    tx: mpsc::Sender<RelayMessage>,
    rx: mpsc::Receiver<RelayMessage>,
}

impl RelayClient {
    /// Connect and spawn the reader/writer tasks. No reconnection: when
    /// either side of the socket goes away, `recv` starts failing.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws, _) = connect_async(url)
            .await
            .with_context(|| format!("failed to connect to relay {url}"))?;
        let (mut write, mut read) = ws.split();

        let (in_tx, in_rx) = mpsc::channel::<RelayMessage>(64);
        let (out_tx, mut out_rx) = mpsc::channel::<RelayMessage>(64);

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Ok(msg) = serde_json::from_str::<RelayMessage>(&text) {
                            if in_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
        });

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(json) => json,
                    Err(_) => continue,
                };
                if write.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self { tx: out_tx, rx: in_rx })
    }

    /// A cloneable outbound handle for use outside the main loop.
    pub fn handle(&self) -> RelaySender {
        RelaySender {
            tx: self.tx.clone(),
        }
    }

    pub async fn recv(&mut self) -> Result<RelayMessage> {
        self.rx.recv().await.context("relay connection closed")
    }

    pub async fn send(&self, msg: RelayMessage) -> Result<()> {
        self.handle().send(msg).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_use_the_fixed_charset() {
        for _ in 0..50 {
            let name = random_network_name();
            assert_eq!(name.len(), NETWORK_NAME_LEN);
            assert!(name
                .bytes()
                .all(|b| NETWORK_NAME_CHARSET.contains(&b)));
        }
    }
}
