//! Receiver run loop: join a network, accept every inbound offer, and save
//! the transferred files. The loop keeps serving after a failed or finished
//! transfer.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use crate::negotiator::{FileMeta, OfferLedger};
use crate::peer::{PeerEvent, PeerEventKind, PeerLink};
use crate::progress::{format_bytes, TransferProgress};
use crate::protocol::{RelayMessage, RtcConfigurationModel, TransferAction};
use crate::pump::{self, ChannelEvent};
use crate::sessions::SessionDirectory;
use crate::signaling::{random_network_name, RelayClient};

pub struct ReceiverConfig {
    pub relay_url: String,
    pub public_url: String,
    pub network_name: Option<String>,
    pub output_dir: PathBuf,
}

pub async fn run_receiver(opts: &ReceiverConfig) -> Result<()> {
    let mut relay = RelayClient::connect(&opts.relay_url).await?;
    println!("[connection] connected to relay: {}", opts.relay_url);

    let (event_tx, mut event_rx) = mpsc::channel::<PeerEvent>(16);
    let mut sessions: SessionDirectory<PeerLink> = SessionDirectory::new();
    let mut ledger = OfferLedger::new(true);
    let mut rtc_config: Option<RtcConfigurationModel> = None;

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event.kind {
                    PeerEventKind::ChannelOpen(dc) => {
                        let Some(offer) = ledger.get(&event.transfer_id) else { continue };
                        println!(
                            "[transfer] receiving {} ({})",
                            offer.file.file_name,
                            format_bytes(offer.file.file_size)
                        );
                        let file = offer.file.clone();
                        let out_dir = opts.output_dir.clone();
                        let transfer_id = event.transfer_id.clone();
                        let done_tx = event_tx.clone();
                        let mut events = channel_events(&dc);
                        tokio::spawn(async move {
                            let mut progress = TransferProgress::new(file.file_size);
                            match pump::receive_bytes(
                                &mut events,
                                &file.file_name,
                                file.file_size,
                                &out_dir,
                                &mut progress,
                            )
                            .await
                            {
                                Ok(path) => {
                                    println!("[transfer] saved {}", path.display());
                                    dc.close().await.ok();
                                }
                                Err(err) => eprintln!("[transfer] {err:#}"),
                            }
                            let _ = done_tx
                                .send(PeerEvent {
                                    transfer_id,
                                    kind: PeerEventKind::ChannelClosed,
                                })
                                .await;
                        });
                    }
                    PeerEventKind::ChannelClosed => {
                        if let Some(link) = sessions.remove(&event.transfer_id) {
                            link.close().await;
                        }
                        ledger.discard(&event.transfer_id);
                    }
                    PeerEventKind::ConnectionFailed => {
                        eprintln!("[connection] peer connection failed");
                        if let Some(link) = sessions.remove(&event.transfer_id) {
                            link.close().await;
                        }
                        ledger.discard(&event.transfer_id);
                    }
                }
            }

            msg = relay.recv() => {
                match msg? {
                    RelayMessage::Welcome { suggested_name, rtc_configuration, notice_text, notice_url, .. } => {
                        if let Some(text) = notice_text {
                            println!("[relay] {text}");
                            if let Some(url) = notice_url {
                                println!("[relay] {url}");
                            }
                        }
                        rtc_config = rtc_configuration;
                        let network = opts
                            .network_name
                            .clone()
                            .or(suggested_name)
                            .unwrap_or_else(random_network_name);
                        relay
                            .send(RelayMessage::NetworkName { network_name: network.clone() })
                            .await?;
                        println!(
                            "[connection] waiting for files at {}{}",
                            opts.public_url, network
                        );
                    }
                    RelayMessage::Transfer { transfer_id, file_name, file_size, file_type, client_id, .. } => {
                        if let Some(from) = client_id {
                            let reply = ledger.on_offer(
                                &transfer_id,
                                FileMeta { file_name, file_size, file_type },
                                &from,
                            );
                            relay.send(reply).await?;
                        }
                    }
                    RelayMessage::Action { transfer_id, action, .. } => {
                        if matches!(action, TransferAction::Cancel) {
                            ledger.discard(&transfer_id);
                            if let Some(link) = sessions.remove(&transfer_id) {
                                link.close().await;
                            }
                        }
                    }
                    RelayMessage::RtcDescription { transfer_id, data, client_id, .. } => {
                        // one connection per transfer; repeats are ignored
                        if sessions.contains(&transfer_id) {
                            continue;
                        }
                        let Some(from) = client_id else { continue };
                        if ledger.get(&transfer_id).is_none() {
                            continue;
                        }
                        match PeerLink::accept(
                            &transfer_id,
                            &from,
                            rtc_config.as_ref(),
                            &data,
                            relay.handle(),
                            event_tx.clone(),
                        )
                        .await
                        {
                            Ok(link) => sessions.insert(transfer_id, link)?,
                            Err(err) => {
                                eprintln!("[connection] failed to answer offer: {err:#}");
                                ledger.discard(&transfer_id);
                            }
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
                    RelayMessage::Network { .. } => {}
                    RelayMessage::NetworkName { .. } => {}
                }
            }
        }
    }
}

/// Bridge a data channel's message and close callbacks into a stream of
/// [`ChannelEvent`]s for the receive pump.
fn channel_events(dc: &Arc<RTCDataChannel>) -> mpsc::Receiver<ChannelEvent> {
    let (tx, rx) = mpsc::channel::<ChannelEvent>(256);

    {
        let tx = tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(ChannelEvent::Data(msg.data.to_vec())).await;
            })
        }));
    }

    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(ChannelEvent::Closed).await;
        })
    }));

    rx
}
