//! Byte-level framing over a serial or TCP link, and a paced single-writer
//! actor that serializes every outgoing frame (§4.6, §9 "Bus access
//! serialization").

use crate::constants::{END_BYTE, MIN_PACKET_SIZE, START_BYTE};
use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

/// Largest frame the reframer will buffer before giving up and resyncing;
/// guards against a corrupted size field causing unbounded buffering.
const MAX_FRAME_SIZE: usize = 512;

/// Minimum spacing the writer actor enforces between successive writes
/// (the bus's own pacing requirement, not a caller concern).
const WRITE_PACING: Duration = Duration::from_millis(500);

/// Byte-level framer/deframer for the NASA bus. Produces raw, still-encoded
/// frames (start byte through end byte inclusive); CRC and field decoding
/// happen one layer up, in [`crate::packet::NasaPacket::parse`].
#[derive(Debug, Default)]
pub struct NasaFrameCodec;

impl Decoder for NasaFrameCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<Bytes>> {
        loop {
            let Some(start) = src.iter().position(|&b| b == START_BYTE) else {
                src.clear();
                return Ok(None);
            };
            if start > 0 {
                debug!(garbage = start, "discarding bytes before start marker");
                src.advance(start);
            }

            if src.len() < 3 {
                return Ok(None);
            }
            let size = u16::from_be_bytes([src[1], src[2]]) as usize;
            let frame_len = size + 2;

            if frame_len < MIN_PACKET_SIZE || frame_len > MAX_FRAME_SIZE {
                warn!(size, "implausible frame size, resynchronizing");
                src.advance(1);
                continue;
            }
            if src.len() < frame_len {
                return Ok(None);
            }
            if src[frame_len - 1] != END_BYTE {
                warn!("missing end marker, resynchronizing");
                src.advance(1);
                continue;
            }

            let frame = src.split_to(frame_len).freeze();
            return Ok(Some(frame));
        }
    }
}

impl Encoder<Bytes> for NasaFrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> std::io::Result<()> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}

/// A handle to submit frames to the writer actor; cloneable, cheap.
#[derive(Clone)]
pub struct TransportWriter {
    tx: mpsc::Sender<Bytes>,
}

impl TransportWriter {
    /// Wrap an existing sender directly; mainly useful in tests that want
    /// to observe submitted frames without a real writer task.
    pub fn from_sender(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Enqueue a frame for transmission. Returns once accepted onto the
    /// queue, not once written; the actor applies its own pacing.
    pub async fn submit(&self, frame: Bytes) -> Result<(), crate::error::EhsError> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| crate::error::EhsError::Io(std::io::Error::other("transport writer closed")))
    }
}

/// Drives the paced write side of a transport: one task owns the sink and
/// writes frames strictly in submission order, at least [`WRITE_PACING`]
/// apart.
pub fn spawn_writer<W>(mut sink: W) -> (TransportWriter, tokio::task::JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Bytes>(32);
    let handle = tokio::spawn(async move {
        let mut last_write: Option<Instant> = None;
        while let Some(frame) = rx.recv().await {
            if let Some(last) = last_write {
                let elapsed = last.elapsed();
                if elapsed < WRITE_PACING {
                    tokio::time::sleep(WRITE_PACING - elapsed).await;
                }
            }
            if let Err(err) = sink.write_all(&frame).await {
                warn!(%err, "transport write failed");
            }
            last_write = Some(Instant::now());
        }
    });
    (TransportWriter { tx }, handle)
}

/// Reads frames from an async byte source, pushing each deframed packet to
/// `out` until the source ends or errors.
pub async fn run_reader<R>(
    mut source: R,
    out: mpsc::Sender<Bytes>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut codec = NasaFrameCodec;
    let mut buf = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 1024];

    loop {
        while let Some(frame) = codec.decode(&mut buf)? {
            if out.send(frame).await.is_err() {
                return Ok(());
            }
        }
        let n = source.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s.replace(' ', "")).unwrap()
    }

    #[test]
    fn decodes_one_frame_and_leaves_buffer_empty() {
        let mut codec = NasaFrameCodec;
        let bytes = hex("32 00 16 10 00 00 B0 00 FF C0 14 8B 02 82 37 00 20 82 38 00 23 B8 CE 34");
        let mut buf = BytesMut::from(&bytes[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.len(), bytes.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn skips_garbage_before_start_marker() {
        let mut codec = NasaFrameCodec;
        let mut bytes = vec![0xAA, 0xBB, 0xCC];
        bytes.extend(hex(
            "32 00 16 10 00 00 B0 00 FF C0 14 8B 02 82 37 00 20 82 38 00 23 B8 CE 34",
        ));
        let mut buf = BytesMut::from(&bytes[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame[0], START_BYTE);
    }

    #[test]
    fn waits_for_more_bytes_on_partial_frame() {
        let mut codec = NasaFrameCodec;
        let bytes = hex("32 00 16 10 00 00 B0 00");
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn resyncs_on_missing_end_marker() {
        let mut codec = NasaFrameCodec;
        let mut bytes = hex("32 00 16 10 00 00 B0 00 FF C0 14 8B 02 82 37 00 20 82 38 00 23 B8 CE");
        bytes.push(0x00); // wrong trailer
        bytes.extend(hex(
            "32 00 16 10 00 00 B0 00 FF C0 14 8B 02 82 37 00 20 82 38 00 23 B8 CE 34",
        ));
        let mut buf = BytesMut::from(&bytes[..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame[0], START_BYTE);
    }
}
