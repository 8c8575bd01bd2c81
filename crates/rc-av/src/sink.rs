//! Consumers of streamed media bytes.
//!
//! The runner and the direct streamer push chunks into a [`ChunkSink`]. A
//! delivery error means the consumer is gone and is treated as a
//! cancellation by the caller.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Destination for streamed output.
#[async_trait]
pub trait ChunkSink: Send {
    /// Deliver one chunk. An error means no further bytes can be written.
    async fn deliver(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Flush after the last chunk, including when the stream stops early
    /// so that partial output reaches the consumer.
    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Resolves once the consumer has gone away. Sinks that cannot observe
    /// this never resolve.
    async fn closed(&mut self) {
        futures::future::pending::<()>().await
    }
}

/// Adapter over any [`AsyncWrite`] (files, stdout, sockets, `Vec<u8>`).
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

#[async_trait]
impl<W> ChunkSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn deliver(&mut self, chunk: Bytes) -> io::Result<()> {
        self.writer.write_all(&chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

/// Sink feeding a bounded channel, used to expose output as a `Stream`.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<rc_core::Result<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<rc_core::Result<Bytes>>) -> Self {
        Self { tx }
    }

    /// Terminate the stream with an error item so the consumer can tell a
    /// failed encode from a complete one.
    pub async fn fail(&self, err: rc_core::Error) {
        let _ = self.tx.send(Err(err)).await;
    }
}

#[async_trait]
impl ChunkSink for ChannelSink {
    async fn deliver(&mut self, chunk: Bytes) -> io::Result<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stream consumer dropped"))
    }

    async fn closed(&mut self) {
        self.tx.closed().await
    }
}
