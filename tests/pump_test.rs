use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use drop_rs::channel::OutboundChannel;
use drop_rs::progress::TransferProgress;
use drop_rs::pump::{self, ChannelEvent, FALLBACK_CHUNK_SIZE};

/// In-memory channel that records chunk sizes and drain waits.
#[derive(Default)]
struct MockChannel {
    max: Option<usize>,
    chunks: Mutex<Vec<usize>>,
    armed: AtomicBool,
    drain_waits: AtomicUsize,
    fail_after: Option<usize>,
}

#[async_trait]
impl OutboundChannel for MockChannel {
    fn max_message_size(&self) -> Option<usize> {
        self.max
    }

    async fn arm_drain_signal(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    async fn drained(&self) {
        self.drain_waits.fetch_add(1, Ordering::SeqCst);
    }

    async fn send(&self, chunk: Bytes) -> Result<()> {
        let mut chunks = self.chunks.lock().unwrap();
        if let Some(limit) = self.fail_after {
            if chunks.len() >= limit {
                bail!("send queue rejected chunk");
            }
        }
        chunks.push(chunk.len());
        Ok(())
    }

    async fn close(&self) {}
}

#[tokio::test]
async fn paced_send_respects_ceiling_and_waits_between_chunks() {
    let channel = MockChannel {
        max: Some(8),
        ..Default::default()
    };
    let data = Bytes::from(vec![7u8; 20]);
    let mut progress = TransferProgress::hidden(20);

    pump::send_bytes(&channel, &data, &mut progress)
        .await
        .unwrap();

    let chunks = channel.chunks.lock().unwrap().clone();
    assert_eq!(chunks, vec![8, 8, 4]);
    assert!(channel.armed.load(Ordering::SeqCst));
    // no wait after the final chunk
    assert_eq!(channel.drain_waits.load(Ordering::SeqCst), 2);
    assert_eq!(progress.bytes_moved(), 20);
}

#[tokio::test]
async fn unpaced_send_uses_fallback_chunking() {
    let channel = MockChannel::default();
    let data = Bytes::from(vec![0u8; FALLBACK_CHUNK_SIZE * 2 + 1]);
    let mut progress = TransferProgress::hidden(data.len() as u64);

    pump::send_bytes(&channel, &data, &mut progress)
        .await
        .unwrap();

    let chunks = channel.chunks.lock().unwrap().clone();
    assert_eq!(chunks, vec![FALLBACK_CHUNK_SIZE, FALLBACK_CHUNK_SIZE, 1]);
    assert!(!channel.armed.load(Ordering::SeqCst));
    assert_eq!(channel.drain_waits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn send_failure_surfaces_as_error() {
    let channel = MockChannel {
        max: Some(4),
        fail_after: Some(2),
        ..Default::default()
    };
    let data = Bytes::from(vec![1u8; 16]);
    let mut progress = TransferProgress::hidden(16);

    let err = pump::send_bytes(&channel, &data, &mut progress)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to send chunk"));
}

#[tokio::test]
async fn receive_reassembles_across_arbitrary_boundaries() {
    let payload: Vec<u8> = (0..10_000u32).map(|n| (n % 251) as u8).collect();
    let (tx, mut rx) = mpsc::channel::<ChannelEvent>(16);

    let boundaries = [0usize, 1, 1500, 1501, 6000, payload.len()];
    for window in boundaries.windows(2) {
        tx.send(ChannelEvent::Data(payload[window[0]..window[1]].to_vec()))
            .await
            .unwrap();
    }

    let dir = tempfile::tempdir().unwrap();
    let mut progress = TransferProgress::hidden(payload.len() as u64);
    let path = pump::receive_bytes(
        &mut rx,
        "data.bin",
        payload.len() as u64,
        dir.path(),
        &mut progress,
    )
    .await
    .unwrap();

    assert_eq!(path.file_name().unwrap(), "data.bin");
    assert_eq!(std::fs::read(&path).unwrap(), payload);
}

#[tokio::test]
async fn close_at_completion_still_persists() {
    let payload = vec![9u8; 4096];
    let (tx, mut rx) = mpsc::channel::<ChannelEvent>(4);
    tx.send(ChannelEvent::Data(payload.clone())).await.unwrap();
    tx.send(ChannelEvent::Closed).await.unwrap();
    drop(tx);

    let dir = tempfile::tempdir().unwrap();
    let mut progress = TransferProgress::hidden(payload.len() as u64);
    let path = pump::receive_bytes(
        &mut rx,
        "blob",
        payload.len() as u64,
        dir.path(),
        &mut progress,
    )
    .await
    .unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), payload);
    // the queued close must not produce a second outcome
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn early_close_fails_and_persists_nothing() {
    let (tx, mut rx) = mpsc::channel::<ChannelEvent>(4);
    tx.send(ChannelEvent::Data(vec![0u8; 400])).await.unwrap();
    tx.send(ChannelEvent::Closed).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut progress = TransferProgress::hidden(1000);
    let err = pump::receive_bytes(&mut rx, "partial.bin", 1000, dir.path(), &mut progress)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("channel closed after 400 of 1000"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn huge_advertised_size_does_not_allocate_up_front() {
    let (tx, mut rx) = mpsc::channel::<ChannelEvent>(4);
    tx.send(ChannelEvent::Data(vec![1u8; 8])).await.unwrap();
    tx.send(ChannelEvent::Closed).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut progress = TransferProgress::hidden(u64::MAX);
    // an absurd advertised size must fail through the normal close path,
    // not abort the task on allocation
    let err = pump::receive_bytes(&mut rx, "huge.bin", u64::MAX, dir.path(), &mut progress)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("channel closed after 8"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn dropped_producer_counts_as_close() {
    let (tx, mut rx) = mpsc::channel::<ChannelEvent>(4);
    drop(tx);

    let dir = tempfile::tempdir().unwrap();
    let mut progress = TransferProgress::hidden(10);
    assert!(
        pump::receive_bytes(&mut rx, "x", 10, dir.path(), &mut progress)
            .await
            .is_err()
    );
}
