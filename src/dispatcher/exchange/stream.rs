//! Chunked body transfer with progress reporting and cancellation checks

use crate::error::{Error, TransportError};
use crate::transport::UploadSink;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Upper bound for pre-allocating a response buffer from Content-Length
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

#[derive(Debug)]
pub(crate) enum StreamError {
    Cancelled,
    Transport(TransportError),
}

impl From<TransportError> for StreamError {
    fn from(err: TransportError) -> Self {
        StreamError::Transport(err)
    }
}

impl From<StreamError> for Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Cancelled => Error::Cancelled,
            StreamError::Transport(e) => Error::Transport(e),
        }
    }
}

/// Await `fut`, failing with a read timeout if it takes longer than `limit`
pub(crate) async fn with_read_timeout<F, T>(
    limit: Option<Duration>,
    fut: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::TimedOut {
                phase: "read",
                millis: limit.as_millis(),
            })?,
        None => fut.await,
    }
}

/// Moves a body in chunks of at most `chunk_size` bytes
///
/// After each chunk the running total is reported; the cancellation token is
/// checked before each chunk and raced against every suspension. A transfer
/// that reports nothing (empty body) still produces one final report.
pub(crate) struct ProgressReporter<'a> {
    cancel: &'a CancellationToken,
    chunk_size: usize,
    read_timeout: Option<Duration>,
    total: Option<u64>,
    transferred: u64,
    reports: usize,
}

impl<'a> ProgressReporter<'a> {
    pub(crate) fn new(
        cancel: &'a CancellationToken,
        chunk_size: usize,
        read_timeout: Option<Duration>,
        total: Option<u64>,
    ) -> Self {
        Self {
            cancel,
            chunk_size: chunk_size.max(1),
            read_timeout,
            total,
            transferred: 0,
            reports: 0,
        }
    }

    pub(crate) fn transferred(&self) -> u64 {
        self.transferred
    }

    fn check(&self) -> Result<(), StreamError> {
        if self.cancel.is_cancelled() {
            Err(StreamError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn advance(&mut self, n: usize, progress: &mut impl FnMut(u64, Option<u64>)) {
        self.transferred += n as u64;
        self.reports += 1;
        progress(self.transferred, self.total);
    }

    fn finish(&mut self, progress: &mut impl FnMut(u64, Option<u64>)) {
        if self.reports == 0 {
            self.reports = 1;
            progress(self.transferred, self.total);
        }
    }

    /// Read `source` to the end and push it into `sink`
    pub(crate) async fn upload<R>(
        &mut self,
        source: &mut R,
        sink: &UploadSink,
        mut progress: impl FnMut(u64, Option<u64>),
    ) -> Result<u64, StreamError>
    where
        R: AsyncRead + Unpin,
    {
        let cancel = self.cancel;
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            self.check()?;
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                read = source.read(&mut buf) => read.map_err(TransportError::Io)?,
            };
            if read == 0 {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                sent = sink.send(Bytes::copy_from_slice(&buf[..read])) => sent?,
            }
            self.advance(read, &mut progress);
        }
        self.finish(&mut progress);
        Ok(self.transferred)
    }

    /// Collect `body` into one buffer
    pub(crate) async fn download<S>(
        &mut self,
        body: &mut S,
        mut progress: impl FnMut(u64, Option<u64>),
    ) -> Result<Bytes, StreamError>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    {
        let cancel = self.cancel;
        let read_timeout = self.read_timeout;
        let capacity = self.total.map(|t| t.min(MAX_PREALLOCATION)).unwrap_or(0) as usize;
        let mut out = BytesMut::with_capacity(capacity);
        loop {
            self.check()?;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                next = with_read_timeout(read_timeout, async {
                    body.next().await.transpose().map_err(TransportError::Io)
                }) => next?,
            };
            let Some(chunk) = next else { break };
            for piece in chunk.chunks(self.chunk_size) {
                self.check()?;
                out.extend_from_slice(piece);
                self.advance(piece.len(), &mut progress);
            }
        }
        self.finish(&mut progress);
        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::UploadSink;
    use futures::stream;

    fn body_of(chunks: Vec<Vec<u8>>) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    #[tokio::test]
    async fn download_reslices_large_chunks() {
        let cancel = CancellationToken::new();
        let mut reporter = ProgressReporter::new(&cancel, 4096, None, Some(10_000));
        let mut body = body_of(vec![vec![7u8; 10_000]]);
        let mut reports = Vec::new();

        let bytes = reporter
            .download(&mut body, |t, total| reports.push((t, total)))
            .await
            .unwrap();

        assert_eq!(bytes.len(), 10_000);
        assert_eq!(
            reports,
            vec![
                (4096, Some(10_000)),
                (8192, Some(10_000)),
                (10_000, Some(10_000))
            ]
        );
    }

    #[tokio::test]
    async fn download_progress_is_monotonic_and_complete() {
        let cancel = CancellationToken::new();
        let mut reporter = ProgressReporter::new(&cancel, 3, None, None);
        let mut body = body_of(vec![vec![1; 2], vec![2; 5], vec![], vec![3; 1]]);
        let mut reports = Vec::new();

        reporter
            .download(&mut body, |t, total| reports.push((t, total)))
            .await
            .unwrap();

        let totals: Vec<u64> = reports.iter().map(|(t, _)| *t).collect();
        assert!(totals.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(totals.last(), Some(&8));
        assert!(reports.iter().all(|(_, total)| total.is_none()));
        assert_eq!(reporter.transferred(), 8);
    }

    #[tokio::test]
    async fn empty_body_reports_once() {
        let cancel = CancellationToken::new();
        let mut reporter = ProgressReporter::new(&cancel, 16, None, Some(0));
        let mut body = body_of(vec![]);
        let mut reports = Vec::new();

        let bytes = reporter
            .download(&mut body, |t, total| reports.push((t, total)))
            .await
            .unwrap();

        assert!(bytes.is_empty());
        assert_eq!(reports, vec![(0, Some(0))]);
    }

    #[tokio::test]
    async fn cancellation_stops_download_at_chunk_boundary() {
        let cancel = CancellationToken::new();
        let mut reporter = ProgressReporter::new(&cancel, 4, None, Some(12));
        let mut body = body_of(vec![vec![0; 12]]);
        let mut reports = 0;

        let result = reporter
            .download(&mut body, |_, _| {
                reports += 1;
                cancel.cancel();
            })
            .await;

        assert!(matches!(result, Err(StreamError::Cancelled)));
        assert_eq!(reports, 1);
        assert_eq!(reporter.transferred(), 4);
    }

    #[tokio::test]
    async fn cancellation_unblocks_stalled_download() {
        let cancel = CancellationToken::new();
        let mut body = stream::pending::<std::io::Result<Bytes>>();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let mut reporter = ProgressReporter::new(&cancel, 16, None, None);
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            reporter.download(&mut body, |_, _| {}),
        )
        .await
        .expect("cancellation should unblock the read");
        assert!(matches!(result, Err(StreamError::Cancelled)));
    }

    #[tokio::test]
    async fn stalled_download_hits_read_timeout() {
        let cancel = CancellationToken::new();
        let mut body = stream::pending::<std::io::Result<Bytes>>();
        let limit = Some(Duration::from_millis(50));
        let mut reporter = ProgressReporter::new(&cancel, 16, limit, None);

        let result = reporter.download(&mut body, |_, _| {}).await;
        assert!(matches!(
            result,
            Err(StreamError::Transport(TransportError::TimedOut { phase: "read", millis: 50 }))
        ));
    }

    #[tokio::test]
    async fn upload_pushes_every_byte_in_chunks() {
        let cancel = CancellationToken::new();
        let (sink, mut stream) = UploadSink::channel(16);
        let data = vec![9u8; 2500];
        let mut source = std::io::Cursor::new(data.clone());
        let mut reporter = ProgressReporter::new(&cancel, 1024, None, Some(2500));
        let mut reports = Vec::new();

        let sent = reporter
            .upload(&mut source, &sink, |t, total| reports.push((t, total)))
            .await
            .unwrap();
        drop(sink);

        assert_eq!(sent, 2500);
        assert_eq!(reports.last(), Some(&(2500, Some(2500))));
        assert!(reports.iter().all(|(t, _)| *t <= 2500));

        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= 1024);
            received.extend_from_slice(&chunk);
        }
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn upload_to_closed_sink_is_a_transport_error() {
        let cancel = CancellationToken::new();
        let (sink, stream) = UploadSink::channel(1);
        drop(stream);
        let mut source = std::io::Cursor::new(vec![1u8; 10]);
        let mut reporter = ProgressReporter::new(&cancel, 4, None, None);

        let result = reporter.upload(&mut source, &sink, |_, _| {}).await;
        assert!(matches!(
            result,
            Err(StreamError::Transport(TransportError::Closed))
        ));
    }
}
