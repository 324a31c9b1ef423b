//! Sender run loop: offer a file to every peer on the network, stream it to
//! the first one that accepts, then exit.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::{OutboundChannel, RtcChannel};
use crate::negotiator::{Acceptance, FileMeta, OfferBook, OfferLedger};
use crate::peer::{PeerEvent, PeerEventKind, PeerLink};
use crate::progress::{format_bytes, TransferProgress};
use crate::protocol::{RelayMessage, RtcConfigurationModel};
use crate::pump;
use crate::sessions::SessionDirectory;
use crate::signaling::{random_network_name, RelayClient};

/// Trailing transport flush allowance before the process exits after a
/// completed send. Deliberately a fixed delay, not an acknowledgment.
pub const COMPLETION_GRACE: Duration = Duration::from_secs(5);

pub struct SenderConfig {
    pub relay_url: String,
    pub public_url: String,
    pub network_name: Option<String>,
}

pub async fn run_sender(file_path: &Path, opts: &SenderConfig) -> Result<()> {
    let data = Bytes::from(
        tokio::fs::read(file_path)
            .await
            .with_context(|| format!("failed to read {}", file_path.display()))?,
    );
    let file_name = file_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("path has no file name")?;
    let file_type = mime_guess::from_path(file_path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let meta = FileMeta {
        file_name,
        file_size: data.len() as u64,
        file_type,
    };

    let mut relay = RelayClient::connect(&opts.relay_url).await?;
    println!("[connection] connected to relay: {}", opts.relay_url);

    let (event_tx, mut event_rx) = mpsc::channel::<PeerEvent>(16);
    let mut sessions: SessionDirectory<PeerLink> = SessionDirectory::new();
    // inbound offers are auto-cancelled while sending
    let mut inbound = OfferLedger::new(false);
    let mut book: Option<OfferBook> = None;
    let mut rtc_config: Option<RtcConfigurationModel> = None;
    let mut network = String::new();
    let mut pump_task: Option<JoinHandle<Result<()>>> = None;
    // Set by the pump before it returns, so a close event racing the task's
    // completion cannot turn a finished send into a failure.
    let completed = Arc::new(AtomicBool::new(false));

    loop {
        tokio::select! {
            done = async { pump_task.as_mut().expect("branch gated on pump_task").await }, if pump_task.is_some() => {
                pump_task = None;
                return finish(done.context("transfer task panicked")?).await;
            }

            Some(event) = event_rx.recv() => {
                match event.kind {
                    PeerEventKind::ChannelOpen(dc) => {
                        println!(
                            "[transfer] connected, sending {} ({})",
                            meta.file_name,
                            format_bytes(meta.file_size)
                        );
                        let channel = RtcChannel::new(dc);
                        let payload = data.clone();
                        let total = meta.file_size;
                        let completed = completed.clone();
                        pump_task = Some(tokio::spawn(async move {
                            let mut progress = TransferProgress::new(total);
                            match pump::send_bytes(&channel, &payload, &mut progress).await {
                                Ok(()) => {
                                    completed.store(true, Ordering::SeqCst);
                                    Ok(())
                                }
                                Err(err) => {
                                    channel.close().await;
                                    Err(err)
                                }
                            }
                        }));
                    }
                    PeerEventKind::ChannelClosed => {
                        if let Some(link) = sessions.remove(&event.transfer_id) {
                            link.close().await;
                        }
                        return settle(pump_task.take(), &completed, "channel closed before completion").await;
                    }
                    PeerEventKind::ConnectionFailed => {
                        if let Some(link) = sessions.remove(&event.transfer_id) {
                            link.close().await;
                        }
                        return settle(pump_task.take(), &completed, "peer connection failed").await;
                    }
                }
            }

            msg = relay.recv() => {
                match msg? {
                    RelayMessage::Welcome { client_id, suggested_name, rtc_configuration, notice_text, notice_url } => {
                        if let Some(text) = notice_text {
                            println!("[relay] {text}");
                            if let Some(url) = notice_url {
                                println!("[relay] {url}");
                            }
                        }
                        rtc_config = rtc_configuration;
                        network = opts
                            .network_name
                            .clone()
                            .or(suggested_name)
                            .unwrap_or_else(random_network_name);
                        relay
                            .send(RelayMessage::NetworkName { network_name: network.clone() })
                            .await?;
                        book = Some(OfferBook::new(client_id, meta.clone()));
                    }
                    RelayMessage::Network { clients } => {
                        let Some(book) = book.as_mut() else { continue };
                        let others = clients.len().saturating_sub(1);
                        println!("[connection] available clients: {others}");
                        if others == 0 {
                            println!(
                                "[connection] no clients available, open: {}{}",
                                opts.public_url, network
                            );
                        }
                        for offer in book.on_roster(&clients) {
                            relay.send(offer).await?;
                        }
                    }
                    RelayMessage::Action { transfer_id, action, .. } => {
                        let Some(book) = book.as_mut() else { continue };
                        if let Acceptance::Committed { transfer_id, target_id, cancels } =
                            book.on_action(&transfer_id, action)
                        {
                            println!("[transfer] offer accepted by {target_id}");
                            for cancel in cancels {
                                relay.send(cancel).await?;
                            }
                            let link = PeerLink::connect(
                                &transfer_id,
                                &target_id,
                                rtc_config.as_ref(),
                                relay.handle(),
                                event_tx.clone(),
                            )
                            .await?;
                            sessions.insert(transfer_id, link)?;
                        }
                    }
                    RelayMessage::Transfer { transfer_id, file_name, file_size, file_type, client_id, .. } => {
                        // send-only mode: decline inbound offers
                        if let Some(from) = client_id {
                            let reply = inbound.on_offer(
                                &transfer_id,
                                FileMeta { file_name, file_size, file_type },
                                &from,
                            );
                            relay.send(reply).await?;
                        }
                    }
                    RelayMessage::RtcDescription { transfer_id, data, .. } => {
                        if let Some(link) = sessions.get(&transfer_id) {
                            link.apply_remote_description(&data).await?;
                        }
                    }
                    RelayMessage::RtcCandidate { transfer_id, data, .. } => {
                        if let Some(link) = sessions.get(&transfer_id) {
                            // late and duplicate candidates are routine
                            let _ = link.apply_remote_candidate(&data).await;
                        }
                    }
                    RelayMessage::Ping { timestamp } => {
                        relay.send(RelayMessage::Ping { timestamp }).await?;
                    }
                    RelayMessage::Chat { message, client_id, .. } => {
                        println!("[chat] {}: {message}", client_id.unwrap_or_default());
                    }
                    // envelope decryption happens outside this client
                    RelayMessage::Encrypted { .. } => {}
                    RelayMessage::NetworkName { .. } => {}
                }
            }
        }
    }
}

/// Handle the pump's own verdict.
async fn finish(result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => {
            println!("[transfer] file transfer complete");
            tokio::time::sleep(COMPLETION_GRACE).await;
            Ok(())
        }
        Err(err) => Err(err.context("transfer failed")),
    }
}

/// A close or connectivity failure arrived; if the pump already finished
/// sending it decides the outcome, otherwise this run failed. The flag
/// covers the window where the pump has sent the last byte but the task is
/// not yet marked finished.
async fn settle(
    pump_task: Option<JoinHandle<Result<()>>>,
    completed: &AtomicBool,
    reason: &str,
) -> Result<()> {
    match pump_task {
        Some(task) if task.is_finished() || completed.load(Ordering::SeqCst) => {
            finish(task.await.context("transfer task panicked")?).await
        }
        Some(task) => {
            task.abort();
            bail!("transfer failed: {reason}");
        }
        None => bail!("transfer failed: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_task() -> (tokio::sync::oneshot::Sender<()>, JoinHandle<Result<()>>) {
        let (release, gate) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            gate.await.ok();
            Ok(())
        });
        (release, task)
    }

    #[tokio::test(start_paused = true)]
    async fn close_after_last_byte_is_still_success() {
        let completed = AtomicBool::new(true);
        let (release, task) = pending_task();
        assert!(!task.is_finished());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = release.send(());
        });

        settle(Some(task), &completed, "channel closed before completion")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn close_mid_transfer_is_failure() {
        let completed = AtomicBool::new(false);
        let (_release, task) = pending_task();

        let err = settle(Some(task), &completed, "peer connection failed")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("peer connection failed"));
    }

    #[tokio::test]
    async fn close_with_no_pump_is_failure() {
        let completed = AtomicBool::new(false);
        let err = settle(None, &completed, "channel closed before completion")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("channel closed before completion"));
    }
}
