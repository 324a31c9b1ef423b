//! Chunked transport engine: the byte pumps for both sides of a transfer.
//!
//! The send pump slices an in-memory file buffer into channel-sized chunks
//! and, when the channel advertises a message-size capability, paces itself
//! on the buffered-amount-low signal so the send buffer never grows without
//! bound. The receive pump accumulates inbound messages into a single
//! buffer and persists it once the advertised size is reached.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;

use crate::channel::OutboundChannel;
use crate::progress::TransferProgress;

/// Chunk size when the channel advertises no message-size capability.
pub const FALLBACK_CHUNK_SIZE: usize = 16 * 1024;

/// Preallocation ceiling for the receive buffer. The advertised file size
/// is remote input and must not drive the initial allocation unbounded;
/// past this the buffer grows as bytes actually arrive.
const RECEIVE_PREALLOC_LIMIT: usize = 16 * 1024 * 1024;

/// Events delivered by an inbound data channel.
#[derive(Debug)]
pub enum ChannelEvent {
    Data(Vec<u8>),
    Closed,
}

/// Stream `data` over `channel`, chunk by chunk.
///
/// With a message-size capability the next chunk is enqueued only after the
/// drain signal fires; without one the channel is assumed to pace itself
/// and chunks are queued back to back.
pub async fn send_bytes<C>(channel: &C, data: &Bytes, progress: &mut TransferProgress) -> Result<()>
where
    C: OutboundChannel + ?Sized,
{
    let (chunk_size, paced) = match channel.max_message_size() {
        Some(max) => (max, true),
        None => (FALLBACK_CHUNK_SIZE, false),
    };
    if paced {
        channel.arm_drain_signal().await;
    }

    let total = data.len();
    let mut offset = 0usize;
    while offset < total {
        let end = usize::min(offset + chunk_size, total);
        if let Err(err) = channel.send(data.slice(offset..end)).await {
            progress.abandon();
            return Err(err.context("failed to send chunk"));
        }
        progress.advance((end - offset) as u64);
        offset = end;

        if paced && offset < total {
            channel.drained().await;
        }
    }

    progress.finish();
    Ok(())
}

/// Accumulate inbound channel events until `file_size` bytes have arrived,
/// then persist the buffer under the sanitized `file_name` in `out_dir`.
///
/// A close arriving exactly at completion is the fallback success path;
/// control flow guarantees only one of the two paths persists. A close
/// before completion fails the transfer and persists nothing.
pub async fn receive_bytes(
    events: &mut mpsc::Receiver<ChannelEvent>,
    file_name: &str,
    file_size: u64,
    out_dir: &Path,
    progress: &mut TransferProgress,
) -> Result<PathBuf> {
    let mut buffer: Vec<u8> =
        Vec::with_capacity(usize::min(file_size as usize, RECEIVE_PREALLOC_LIMIT));

    loop {
        // a dropped producer counts as a close
        let event = events.recv().await.unwrap_or(ChannelEvent::Closed);
        match event {
            ChannelEvent::Data(data) => {
                progress.advance(data.len() as u64);
                buffer.extend_from_slice(&data);
                if buffer.len() as u64 >= file_size {
                    let path = persist(file_name, &buffer, out_dir)?;
                    progress.finish();
                    return Ok(path);
                }
            }
            ChannelEvent::Closed => {
                if buffer.len() as u64 >= file_size {
                    let path = persist(file_name, &buffer, out_dir)?;
                    progress.finish();
                    return Ok(path);
                }
                progress.abandon();
                bail!(
                    "channel closed after {} of {} bytes",
                    buffer.len(),
                    file_size
                );
            }
        }
    }
}

/// Reduce an advertised file name to a safe base name, stripping any
/// directory traversal.
pub fn sanitize_file_name(advertised: &str) -> String {
    let base = advertised.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if base.is_empty() || base == "." || base == ".." {
        "received.bin".to_string()
    } else {
        base.to_string()
    }
}

/// Write through a temp file in the target directory so a crash mid-write
/// never leaves a half-written file under the final name.
fn persist(advertised_name: &str, data: &[u8], out_dir: &Path) -> Result<PathBuf> {
    let path = out_dir.join(sanitize_file_name(advertised_name));

    let mut tmp =
        NamedTempFile::new_in(out_dir).context("failed to create temporary file")?;
    tmp.write_all(data).context("failed to write file data")?;
    tmp.persist(&path)
        .map_err(|err| anyhow::anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("notes.txt"), "notes.txt");
        assert_eq!(sanitize_file_name("dir/notes.txt"), "notes.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("..\\..\\evil.exe"), "evil.exe");
    }

    #[test]
    fn sanitize_rejects_degenerate_names() {
        assert_eq!(sanitize_file_name(""), "received.bin");
        assert_eq!(sanitize_file_name("."), "received.bin");
        assert_eq!(sanitize_file_name(".."), "received.bin");
        assert_eq!(sanitize_file_name("a/.."), "received.bin");
    }
}
