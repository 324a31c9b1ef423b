//! Outbound byte-channel capability.
//!
//! The send pump is written against [`OutboundChannel`] so the flow-control
//! logic stays independent of the concrete transport; [`RtcChannel`] is the
//! adapter over a WebRTC data channel.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use webrtc::data_channel::RTCDataChannel;

/// Message-size ceiling advertised by [`RtcChannel`]. The webrtc crate does
/// not surface the negotiated SCTP max-message-size, so a conservative fixed
/// ceiling is used; pacing comes from the buffered-amount-low signal.
pub const RTC_MESSAGE_CEILING: usize = 16 * 1024;

/// An established bidirectional channel, seen from the sending side.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    /// Largest message the channel accepts, if it advertises one. A channel
    /// that advertises a size also supports the drain signal.
    fn max_message_size(&self) -> Option<usize>;

    /// Arm the buffered-amount-low signal with a threshold of zero, so
    /// [`drained`](Self::drained) resolves whenever queued data has flushed.
    async fn arm_drain_signal(&self);

    /// Resolve once the send buffer has drained below the armed threshold.
    async fn drained(&self);

    async fn send(&self, chunk: Bytes) -> Result<()>;

    async fn close(&self);
}

/// [`OutboundChannel`] over a WebRTC data channel.
pub struct RtcChannel {
    dc: Arc<RTCDataChannel>,
    drained: Arc<Notify>,
}

impl RtcChannel {
    pub fn new(dc: Arc<RTCDataChannel>) -> Self {
        Self {
            dc,
            drained: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl OutboundChannel for RtcChannel {
    fn max_message_size(&self) -> Option<usize> {
        Some(RTC_MESSAGE_CEILING)
    }

    async fn arm_drain_signal(&self) {
        self.dc.set_buffered_amount_low_threshold(0).await;

        let drained = self.drained.clone();
        self.dc
            .on_buffered_amount_low(Box::new(move || {
                let drained = drained.clone();
                Box::pin(async move {
                    drained.notify_one();
                })
            }))
            .await;
    }

    async fn drained(&self) {
        self.drained.notified().await;
    }

    async fn send(&self, chunk: Bytes) -> Result<()> {
        self.dc
            .send(&chunk)
            .await
            .context("data channel send failed")?;
        Ok(())
    }

    async fn close(&self) {
        let _ = self.dc.close().await;
    }
}
