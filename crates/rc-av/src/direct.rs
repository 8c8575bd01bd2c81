//! Direct (passthrough) streaming of a source file.
//!
//! No encoder is involved: the file is read in chunks and handed to the sink
//! with the same cancellation contract as an encode. Offsets and lengths are
//! not applied; the whole file is always sent.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use rc_core::{Error, Result};
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::process::STREAM_BUFFER;
use crate::sink::{ChannelSink, ChunkSink};
use crate::transcoder::TranscodeStream;

/// Copy `path` into `sink`, returning the number of bytes delivered.
///
/// # Errors
///
/// - [`Error::SourceUnavailable`] if the file cannot be opened.
/// - [`Error::Cancelled`] if `cancel` fires or the consumer goes away.
/// - [`Error::Io`] if a read fails mid-stream.
pub async fn stream_file<S>(
    path: &Path,
    sink: &mut S,
    cancel: &CancellationToken,
    chunk_size: usize,
) -> Result<u64>
where
    S: ChunkSink + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled("cancelled before the source was opened".into()));
    }

    let file = File::open(path)
        .await
        .map_err(|e| Error::source_unavailable(path, e))?;
    let size = file.metadata().await.map(|m| m.len()).ok();
    info!(path = %path.display(), size = ?size, "Direct stream started");

    let chunks = ReaderStream::with_capacity(file, chunk_size.max(1));
    let total = match copy_chunks(chunks, sink, cancel).await {
        Ok(total) => total,
        Err(e) => {
            if let Err(flush) = sink.finish().await {
                debug!(path = %path.display(), "Discarding sink flush error after failed stream: {flush}");
            }
            return Err(e);
        }
    };

    sink.finish().await?;
    debug!(path = %path.display(), bytes = total, "Direct stream finished");
    Ok(total)
}

async fn copy_chunks<S>(
    mut chunks: ReaderStream<File>,
    sink: &mut S,
    cancel: &CancellationToken,
) -> Result<u64>
where
    S: ChunkSink + ?Sized,
{
    let mut total: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled("cancelled by caller".into())),
            _ = sink.closed() => return Err(Error::Cancelled("consumer disconnected".into())),
            next = chunks.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(Error::from(e)),
            None => return Ok(total),
        };
        let len = chunk.len() as u64;

        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled("cancelled by caller".into())),
            r = sink.deliver(chunk) => r,
        };
        delivered.map_err(|e| Error::Cancelled(format!("consumer write failed: {e}")))?;
        total += len;
    }
}

/// Background variant of [`stream_file`] exposed as a stream.
pub fn stream_direct(path: PathBuf, chunk_size: usize, cancel: &CancellationToken) -> TranscodeStream {
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);
    let cancel = cancel.child_token();
    let token = cancel.clone();

    tokio::spawn(async move {
        let mut sink = ChannelSink::new(tx);
        if let Err(e) = stream_file(&path, &mut sink, &token, chunk_size).await {
            sink.fail(e).await;
        }
    });

    TranscodeStream::new(ReceiverStream::new(rx), cancel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::WriterSink;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn copies_whole_file_in_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mkv");
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &content).unwrap();

        let mut sink = WriterSink::new(Vec::new());
        let n = stream_file(&path, &mut sink, &CancellationToken::new(), 1024)
            .await
            .unwrap();

        assert_eq!(n, 10_000);
        assert_eq!(sink.into_inner(), content);
    }

    #[tokio::test]
    async fn empty_file_streams_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mp3");
        std::fs::write(&path, b"").unwrap();

        let mut sink = WriterSink::new(Vec::new());
        let n = stream_file(&path, &mut sink, &CancellationToken::new(), 1024)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn missing_file_is_source_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.mkv");

        let mut sink = WriterSink::new(Vec::new());
        let err = stream_file(&path, &mut sink, &CancellationToken::new(), 1024)
            .await
            .unwrap_err();
        assert_matches!(err, Error::SourceUnavailable { .. });
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.mp3");
        std::fs::write(&path, b"data").unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sink = WriterSink::new(Vec::new());
        let err = stream_file(&path, &mut sink, &cancel, 1024).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(sink.get_ref().is_empty());
    }

    #[tokio::test]
    async fn cancelled_copy_flushes_delivered_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("movie.mkv");
        std::fs::write(&path, vec![9u8; 64]).unwrap();
        let out = dir.path().join("partial.mkv");

        let cancel = CancellationToken::new();
        let file = File::create(&out).await.unwrap();
        let mut sink = CancelAfterFirst {
            inner: WriterSink::new(tokio::io::BufWriter::new(file)),
            cancel: cancel.clone(),
        };
        let err = stream_file(&path, &mut sink, &cancel, 16).await.unwrap_err();

        assert!(err.is_cancelled());
        let written = std::fs::read(&out).unwrap();
        assert!(!written.is_empty());
        assert!(written.iter().all(|&b| b == 9));
    }

    /// Buffered sink that cancels the copy once it has taken one chunk.
    struct CancelAfterFirst<W> {
        inner: WriterSink<W>,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl<W> ChunkSink for CancelAfterFirst<W>
    where
        W: tokio::io::AsyncWrite + Unpin + Send,
    {
        async fn deliver(&mut self, chunk: bytes::Bytes) -> std::io::Result<()> {
            self.inner.deliver(chunk).await?;
            self.cancel.cancel();
            Ok(())
        }

        async fn finish(&mut self) -> std::io::Result<()> {
            self.inner.finish().await
        }
    }

    #[tokio::test]
    async fn stream_variant_yields_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.flac");
        std::fs::write(&path, b"flac-bytes").unwrap();

        let stream = stream_direct(path, 4, &CancellationToken::new());
        let chunks: Vec<_> = stream.collect().await;
        let bytes: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();
        assert_eq!(bytes, b"flac-bytes");
    }

    #[tokio::test]
    async fn stream_variant_reports_missing_file() {
        let stream = stream_direct(PathBuf::from("/nonexistent/dir/x.mkv"), 4, &CancellationToken::new());
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_matches!(items[0], Err(Error::SourceUnavailable { .. }));
    }
}
